use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// One async write lock per site root, shared by bulk and single-page indexing.
#[derive(Default)]
pub struct SiteLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl SiteLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, root: &str) -> OwnedMutexGuard<()> {
        let lock = self.locks.lock().entry(root.to_string()).or_default().clone();
        lock.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_root_is_exclusive() {
        let locks = SiteLocks::new();
        let held = locks.lock("https://a.ru").await;
        assert!(tokio::time::timeout(Duration::from_millis(20), locks.lock("https://a.ru")).await.is_err());
        let _other = locks.lock("https://b.ru").await;
        drop(held);
        let _again = locks.lock("https://a.ru").await;
    }
}
