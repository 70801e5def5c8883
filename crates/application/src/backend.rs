//! 服务装配：同一组协作方构建出的全部应用服务

use std::sync::Arc;

use config::HistoryConfig;

use crate::bus::{BusError, EventBus};
use crate::clock::Clock;
use crate::enrich::MessageEnricher;
use crate::fanout::{spawn_dispatchers, FanoutService, ResubscribePolicy};
use crate::history::HistoryPager;
use crate::hub::ConnectionHub;
use crate::ingest::{MessageIngest, MessageIngestDependencies};
use crate::presence::PresenceRegistry;
use crate::repository::{MessageRepository, RoomRepository, UserRepository};
use crate::rooms::{RoomService, RoomServiceDependencies};
use crate::session::{SessionDependencies, SessionService};
use crate::storage::ObjectStorage;

#[derive(Clone)]
pub struct ChatBackendDependencies {
    pub users: Arc<dyn UserRepository>,
    pub rooms: Arc<dyn RoomRepository>,
    pub messages: Arc<dyn MessageRepository>,
    pub presence: Arc<dyn PresenceRegistry>,
    pub bus: Arc<dyn EventBus>,
    pub storage: Arc<dyn ObjectStorage>,
    pub clock: Arc<dyn Clock>,
}

/// 一个实例上运行的全部服务，共享同一个连接中心
#[derive(Clone)]
pub struct ChatBackend {
    pub hub: Arc<ConnectionHub>,
    pub ingest: Arc<MessageIngest>,
    pub sessions: Arc<SessionService>,
    pub rooms: Arc<RoomService>,
    pub fanout: Arc<FanoutService>,
    bus: Arc<dyn EventBus>,
}

impl ChatBackend {
    pub fn new(deps: ChatBackendDependencies, history: HistoryConfig) -> Self {
        let hub = Arc::new(ConnectionHub::new(deps.presence.instance_id().clone()));
        let enricher = Arc::new(MessageEnricher::new(
            deps.users.clone(),
            deps.messages.clone(),
            deps.storage.clone(),
        ));

        let ingest = MessageIngest::new(MessageIngestDependencies {
            users: deps.users.clone(),
            rooms: deps.rooms.clone(),
            messages: deps.messages.clone(),
            enricher: enricher.clone(),
            bus: deps.bus.clone(),
            hub: hub.clone(),
            clock: deps.clock.clone(),
        });
        let sessions = SessionService::new(SessionDependencies {
            users: deps.users.clone(),
            rooms: deps.rooms.clone(),
            messages: deps.messages.clone(),
            presence: deps.presence.clone(),
            bus: deps.bus.clone(),
            hub: hub.clone(),
            clock: deps.clock.clone(),
        });
        let rooms = RoomService::new(
            RoomServiceDependencies {
                users: deps.users.clone(),
                rooms: deps.rooms.clone(),
                pager: Arc::new(HistoryPager::new(deps.messages.clone())),
                enricher,
                storage: deps.storage.clone(),
                hub: hub.clone(),
                clock: deps.clock.clone(),
            },
            history,
        );
        let fanout = FanoutService::new(hub.clone(), deps.presence.clone(), deps.rooms.clone());

        Self {
            hub,
            ingest: Arc::new(ingest),
            sessions: Arc::new(sessions),
            rooms: Arc::new(rooms),
            fanout: Arc::new(fanout),
            bus: deps.bus,
        }
    }

    /// 订阅总线并启动本实例的事件分发
    pub async fn start_dispatch(
        &self,
        policy: ResubscribePolicy,
    ) -> Result<Vec<tokio::task::JoinHandle<()>>, BusError> {
        spawn_dispatchers(self.fanout.clone(), self.bus.clone(), policy).await
    }
}
