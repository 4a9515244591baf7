//! Shared handles passed to every connection task

use std::sync::Arc;

use crate::config::ServerConfig;
use crate::hub::HubHandle;
use crate::store::Store;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub hub: HubHandle,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, hub: HubHandle, config: ServerConfig) -> Self {
        Self {
            store,
            hub,
            config: Arc::new(config),
        }
    }
}
