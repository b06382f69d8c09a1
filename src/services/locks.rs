use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Serializes mutating operations per upload id: PATCH, DELETE and
/// concatenation hold the guard across their read-validate-write span, so a
/// concurrent same-offset PATCH reacquires state and fails the offset check.
#[derive(Default)]
pub struct UploadLocks {
    inner: parking_lot::Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl UploadLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, uid: &str) -> OwnedMutexGuard<()> {
        let cell = {
            let mut map = self.inner.lock();
            map.entry(uid.to_owned())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        cell.lock_owned().await
    }

    // TODO: reclaim guard entries for uploads deleted by the sweeper
    pub fn release(&self, uid: &str) {
        self.inner.lock().remove(uid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_acquire_waits_for_the_first() {
        let locks = Arc::new(UploadLocks::new());
        let guard = locks.acquire("u1").await;
        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _g = locks.acquire("u1").await;
            })
        };
        tokio::task::yield_now().await;
        assert!(!contender.is_finished());
        drop(guard);
        contender.await.unwrap();
    }

    #[tokio::test]
    async fn different_uids_do_not_contend() {
        let locks = UploadLocks::new();
        let _a = locks.acquire("a").await;
        let _b = locks.acquire("b").await;
    }
}
