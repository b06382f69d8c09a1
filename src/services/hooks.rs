use crate::models::info::UploadInfo;
use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct HookError(pub String);

pub type HookResult = Result<(), HookError>;

/// Lifecycle extension points around the upload state machine. Failures
/// propagate to the client as server errors; there is no rollback.
#[async_trait]
pub trait UploadHooks: Send + Sync {
    async fn before_create(&self, _uid: &str, _info: &UploadInfo) -> HookResult {
        Ok(())
    }

    async fn after_create(&self, _uid: &str, _info: &UploadInfo) -> HookResult {
        Ok(())
    }

    async fn after_finish(&self, _uid: &str, _info: &UploadInfo) -> HookResult {
        Ok(())
    }

    async fn after_terminate(&self, _uid: &str, _info: &UploadInfo) -> HookResult {
        Ok(())
    }
}

/// Default hook set: structured log events for each lifecycle transition.
pub struct LogHooks;

#[async_trait]
impl UploadHooks for LogHooks {
    async fn after_create(&self, uid: &str, info: &UploadInfo) -> HookResult {
        tracing::info!(uid, length = ?info.length(), "upload created");
        Ok(())
    }

    async fn after_finish(&self, uid: &str, info: &UploadInfo) -> HookResult {
        tracing::info!(uid, length = ?info.length(), "upload finished");
        Ok(())
    }

    async fn after_terminate(&self, uid: &str, _info: &UploadInfo) -> HookResult {
        tracing::info!(uid, "upload terminated");
        Ok(())
    }
}
