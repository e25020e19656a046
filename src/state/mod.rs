pub mod game;
pub mod game_type_cache;
pub mod games;
pub mod session;

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use dashmap::DashMap;
use tokio::{sync::watch, task::JoinHandle};
use uuid::Uuid;

use crate::{
    config::AppConfig,
    dao::{broker::Broker, durable_store::DurableStore},
    services::{queue::TaskQueue, reconciliation::ReconciliationLog},
};

use self::{game_type_cache::GameTypeCache, games::GameTable, session::SessionRegistry};

pub type SharedState = Arc<AppState>;

/// Central application state: local sessions and games plus handles on the
/// shared broker and durable store.
pub struct AppState {
    node_id: Uuid,
    config: AppConfig,
    store: Arc<dyn DurableStore>,
    broker: Arc<dyn Broker>,
    sessions: SessionRegistry,
    games: GameTable,
    game_types: GameTypeCache,
    db_queue: TaskQueue,
    game_queue: TaskQueue,
    subscriptions: DashMap<Uuid, JoinHandle<()>>,
    reconciliation: ReconciliationLog,
    maintenance: AtomicBool,
    shutdown: watch::Sender<bool>,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    pub fn new(
        config: AppConfig,
        store: Arc<dyn DurableStore>,
        broker: Arc<dyn Broker>,
    ) -> SharedState {
        let (shutdown, _rx) = watch::channel(false);
        Arc::new(Self {
            node_id: Uuid::new_v4(),
            db_queue: TaskQueue::new(broker.clone(), config.db_queue.clone()),
            game_queue: TaskQueue::new(broker.clone(), config.game_queue.clone()),
            game_types: GameTypeCache::new(config.game_type_ttl),
            reconciliation: ReconciliationLog::new(config.reconciliation_log.clone()),
            maintenance: AtomicBool::new(config.maintenance),
            sessions: SessionRegistry::new(),
            games: GameTable::new(),
            subscriptions: DashMap::new(),
            shutdown,
            config,
            store,
            broker,
        })
    }

    /// Identifier of this process, used as the owner value of broker claims.
    pub fn node_id(&self) -> Uuid {
        self.node_id
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn DurableStore> {
        &self.store
    }

    pub fn broker(&self) -> &Arc<dyn Broker> {
        &self.broker
    }

    /// Players connected to this process.
    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    /// Replicas of the games local players are in.
    pub fn games(&self) -> &GameTable {
        &self.games
    }

    pub fn game_types(&self) -> &GameTypeCache {
        &self.game_types
    }

    /// Queue for durable store mutations.
    pub fn db_queue(&self) -> &TaskQueue {
        &self.db_queue
    }

    /// Queue for deferred joins and disconnect cleanups.
    pub fn game_queue(&self) -> &TaskQueue {
        &self.game_queue
    }

    /// Listener tasks of the game channels this process is subscribed to.
    pub fn subscriptions(&self) -> &DashMap<Uuid, JoinHandle<()>> {
        &self.subscriptions
    }

    pub fn reconciliation(&self) -> &ReconciliationLog {
        &self.reconciliation
    }

    pub fn is_maintenance(&self) -> bool {
        self.maintenance.load(Ordering::SeqCst)
    }

    pub fn set_maintenance(&self, enabled: bool) {
        self.maintenance.store(enabled, Ordering::SeqCst);
    }

    /// Subscribe to the shutdown flag.
    pub fn shutdown_watcher(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Ask workers and listeners to stop.
    pub fn trigger_shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Stop listening on a game channel.
    pub fn drop_subscription(&self, game_id: Uuid) {
        if let Some((_, handle)) = self.subscriptions.remove(&game_id) {
            handle.abort();
        }
    }
}
