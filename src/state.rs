use std::sync::Arc;

use sqlx::PgPool;

use crate::config::Config;
use crate::machines::MachineRegistry;
use crate::signaling::{SignalingBroker, SignalingRegistry};
use crate::websocket::connection_manager::ConnectionManager;

/// Shared application state passed to all handlers and extractors.
///
/// Every field is cheaply cloneable (`PgPool`/`ConnectionManager` wrap an
/// `Arc` internally, `SignalingBroker` wraps one explicitly), so cloning
/// `AppState` per request or per connection is inexpensive.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<Config>,
    /// The "connected-clients" table (§5) — every live control channel.
    pub connections: ConnectionManager,
    pub machines: MachineRegistry,
    pub signaling: SignalingBroker,
}

impl AppState {
    pub fn new(pool: PgPool, config: Config) -> Self {
        let config = Arc::new(config);
        AppState {
            machines: MachineRegistry::new(pool.clone()),
            signaling: SignalingBroker::new(Arc::new(SignalingRegistry::new())),
            connections: ConnectionManager::new(),
            pool,
            config,
        }
    }
}
