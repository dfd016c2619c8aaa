//! Test backends.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

use super::{Change, DocumentStore, MemoryStore, StoreResult, WriteBatch};

/// In-memory store whose change feed can be cut, the way a dropped Redis
/// subscription cuts it: receivers handed out before [`sever`](Self::sever)
/// see `Closed`, later ones work normally.
pub(crate) struct SeverableStore {
    inner: MemoryStore,
    feed: Mutex<broadcast::Sender<Change>>,
}

impl SeverableStore {
    pub(crate) fn new() -> Arc<Self> {
        let (tx, _) = broadcast::channel(64);
        let store = Arc::new(Self { inner: MemoryStore::new(), feed: Mutex::new(tx) });
        let mut rx = store.inner.watch();
        let weak = Arc::downgrade(&store);
        tokio::spawn(async move {
            while let Ok(change) = rx.recv().await {
                let Some(store) = weak.upgrade() else {
                    return;
                };
                let _ = store.feed.lock().unwrap().send(change);
            }
        });
        store
    }

    pub(crate) fn sever(&self) {
        let (tx, _) = broadcast::channel(64);
        *self.feed.lock().unwrap() = tx;
    }
}

#[async_trait]
impl DocumentStore for SeverableStore {
    async fn get(&self, path: &str) -> StoreResult<Option<Value>> {
        self.inner.get(path).await
    }

    async fn children(&self, path: &str) -> StoreResult<Vec<(String, Value)>> {
        self.inner.children(path).await
    }

    async fn apply(&self, batch: WriteBatch) -> StoreResult<()> {
        self.inner.apply(batch).await
    }

    fn watch(&self) -> broadcast::Receiver<Change> {
        self.feed.lock().unwrap().subscribe()
    }
}
