pub mod config;
pub mod db;

use crate::services::hooks::UploadHooks;
use crate::services::locks::UploadLocks;
use crate::services::states::config::AppConfig;
use crate::services::states::db::UploadStore;
use std::sync::Arc;

pub struct TuskerState {
    pub storage: Arc<dyn UploadStore>,
    pub hooks: Arc<dyn UploadHooks>,
    pub config: Arc<AppConfig>,
    pub locks: UploadLocks,
}

impl TuskerState {
    pub fn new(
        storage: Arc<dyn UploadStore>,
        hooks: Arc<dyn UploadHooks>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            storage,
            hooks,
            config,
            locks: UploadLocks::new(),
        }
    }
}
