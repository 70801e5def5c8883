use std::sync::Mutex;

use chrono::{Duration, SubsecRound, Utc};
use domain::Timestamp;

pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Utc::now()
    }
}

/// 单实例内严格递增的时钟。
///
/// 精度截断到微秒（与 PostgreSQL `timestamptz` 一致），系统时间回拨或同一微秒内多次调用时
/// 在上一次的结果上加 1µs，因此同一连接的发送顺序与 createdAt 顺序一致。
pub struct MonotonicClock<C: Clock = SystemClock> {
    source: C,
    last: Mutex<Option<Timestamp>>,
}

impl MonotonicClock<SystemClock> {
    pub fn system() -> Self {
        Self::new(SystemClock)
    }
}

impl Default for MonotonicClock<SystemClock> {
    fn default() -> Self {
        Self::system()
    }
}

impl<C: Clock> MonotonicClock<C> {
    pub fn new(source: C) -> Self {
        Self {
            source,
            last: Mutex::new(None),
        }
    }
}

impl<C: Clock> Clock for MonotonicClock<C> {
    fn now(&self) -> Timestamp {
        let candidate = self.source.now().trunc_subsecs(6);
        let mut last = self.last.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let next = match *last {
            Some(previous) if candidate <= previous => previous + Duration::microseconds(1),
            _ => candidate,
        };
        *last = Some(next);
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    struct FrozenClock(Timestamp);

    impl Clock for FrozenClock {
        fn now(&self) -> Timestamp {
            self.0
        }
    }

    #[test]
    fn frozen_source_still_advances() {
        let frozen = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let clock = MonotonicClock::new(FrozenClock(frozen));
        let a = clock.now();
        let b = clock.now();
        let c = clock.now();
        assert_eq!(a, frozen);
        assert_eq!(b - a, Duration::microseconds(1));
        assert!(c > b);
    }

    #[test]
    fn system_clock_is_strictly_increasing() {
        let clock = MonotonicClock::system();
        let mut previous = clock.now();
        for _ in 0..1000 {
            let next = clock.now();
            assert!(next > previous);
            previous = next;
        }
    }
}
