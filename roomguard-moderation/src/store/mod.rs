//! Hierarchical JSON document store.
//!
//! Paths are `/`-separated segments (`banned/a_b@x_com`,
//! `chatrooms/global/messages/{pushKey}`). Backends guarantee that a
//! [`WriteBatch`] is applied atomically and that every applied write is
//! announced on the change feed returned by [`DocumentStore::watch`].

pub mod memory;
pub mod paths;
pub mod redis_store;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::broadcast;
use uuid::Uuid;

pub use memory::MemoryStore;
pub use redis_store::RedisStore;

#[cfg(test)]
pub(crate) mod testing;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store backend error: {0}")]
    Backend(String),

    #[error("malformed record at {path}: {source}")]
    Serialization {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid store path: {0:?}")]
    InvalidPath(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl From<::redis::RedisError> for StoreError {
    fn from(err: ::redis::RedisError) -> Self {
        if err.is_io_error() || err.is_connection_dropped() || err.is_timeout() {
            StoreError::Unavailable(err.to_string())
        } else {
            StoreError::Backend(err.to_string())
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Overwrite the node at `path`. A `null` value removes it.
    Set { path: String, value: Value },
    /// Merge fields into the object at `path`; `null` fields are removed.
    Update { path: String, fields: Map<String, Value> },
    /// Remove the node at `path` and everything below it.
    Remove { path: String },
}

impl WriteOp {
    pub fn path(&self) -> &str {
        match self {
            WriteOp::Set { path, .. } | WriteOp::Update { path, .. } | WriteOp::Remove { path } => path,
        }
    }
}

/// Ordered list of writes committed as one unit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, path: impl Into<String>, value: Value) -> &mut Self {
        self.ops.push(WriteOp::Set { path: path.into(), value });
        self
    }

    /// Serializes `value` and sets it at `path`.
    pub fn set_record<T: Serialize>(&mut self, path: impl Into<String>, value: &T) -> StoreResult<&mut Self> {
        let path = path.into();
        let value = serde_json::to_value(value).map_err(|source| StoreError::Serialization {
            path: path.clone(),
            source,
        })?;
        Ok(self.set(path, value))
    }

    pub fn update(&mut self, path: impl Into<String>, fields: Map<String, Value>) -> &mut Self {
        self.ops.push(WriteOp::Update { path: path.into(), fields });
        self
    }

    pub fn remove(&mut self, path: impl Into<String>) -> &mut Self {
        self.ops.push(WriteOp::Remove { path: path.into() });
        self
    }

    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }
}

/// Generates a child key for append-style writes. UUIDv7 strings sort by
/// creation time, so ordered child listings return pushes oldest first.
pub fn push_key() -> String {
    Uuid::now_v7().to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Changed,
    Removed,
}

/// One applied write, as seen by subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub path: String,
    pub kind: ChangeKind,
    #[serde(default)]
    pub value: Option<Value>,
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Point read. `None` when nothing is stored at `path`.
    async fn get(&self, path: &str) -> StoreResult<Option<Value>>;

    /// Direct children of `path`, ordered by key.
    async fn children(&self, path: &str) -> StoreResult<Vec<(String, Value)>>;

    /// Applies every op of the batch or none of them.
    async fn apply(&self, batch: WriteBatch) -> StoreResult<()>;

    /// Live feed of applied writes. Each call returns an independent receiver.
    fn watch(&self) -> broadcast::Receiver<Change>;

    /// Liveness check used by `/health`.
    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn set(&self, path: &str, value: Value) -> StoreResult<()> {
        let mut batch = WriteBatch::new();
        batch.set(path, value);
        self.apply(batch).await
    }

    async fn update(&self, path: &str, fields: Map<String, Value>) -> StoreResult<()> {
        let mut batch = WriteBatch::new();
        batch.update(path, fields);
        self.apply(batch).await
    }

    async fn remove(&self, path: &str) -> StoreResult<()> {
        let mut batch = WriteBatch::new();
        batch.remove(path);
        self.apply(batch).await
    }

    /// Appends `value` under a generated key and returns the key.
    async fn push(&self, path: &str, value: Value) -> StoreResult<String> {
        let key = push_key();
        self.set(&paths::child(path, &key), value).await?;
        Ok(key)
    }

    /// The last `limit` children of `path` in key order.
    async fn limit_to_last(&self, path: &str, limit: usize) -> StoreResult<Vec<(String, Value)>> {
        let mut children = self.children(path).await?;
        let skip = children.len().saturating_sub(limit);
        Ok(children.split_off(skip))
    }

    /// Children whose `field` equals `value`.
    async fn query_eq(&self, path: &str, field: &str, value: &Value) -> StoreResult<Vec<(String, Value)>> {
        let children = self.children(path).await?;
        Ok(children
            .into_iter()
            .filter(|(_, child)| child.get(field) == Some(value))
            .collect())
    }
}

/// Deserializes a stored node, naming the path on failure.
pub fn decode<T: DeserializeOwned>(path: &str, value: Value) -> StoreResult<T> {
    serde_json::from_value(value).map_err(|source| StoreError::Serialization {
        path: path.to_string(),
        source,
    })
}

/// Typed point read.
pub async fn get_record<T: DeserializeOwned>(store: &dyn DocumentStore, path: &str) -> StoreResult<Option<T>> {
    match store.get(path).await? {
        Some(value) => decode(path, value).map(Some),
        None => Ok(None),
    }
}

/// Firebase-style truthiness: anything but absent, `null`, `false`, `0` or `""`.
pub fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(Value::String(s)) => !s.is_empty(),
        Some(_) => true,
    }
}

/// Yields children newly added directly under one parent path.
pub struct ChildAdded {
    rx: broadcast::Receiver<Change>,
    parent: String,
}

impl ChildAdded {
    pub fn new(store: &dyn DocumentStore, parent: &str) -> Self {
        Self { rx: store.watch(), parent: paths::normalize(parent) }
    }

    /// Next `(key, value)` added under the parent; `None` once the store shuts down.
    pub async fn next(&mut self) -> Option<(String, Value)> {
        loop {
            match self.rx.recv().await {
                Ok(change) => {
                    if change.kind != ChangeKind::Added {
                        continue;
                    }
                    let Some((parent, key)) = paths::split_last(&change.path) else {
                        continue;
                    };
                    if parent != self.parent {
                        continue;
                    }
                    if let Some(value) = change.value {
                        return Some((key.to_string(), value));
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(parent = %self.parent, skipped, "child-added subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Yields the new value each time the node at exactly `path` is written.
pub struct ValueWatch {
    rx: broadcast::Receiver<Change>,
    path: String,
}

impl ValueWatch {
    pub fn new(store: &dyn DocumentStore, path: &str) -> Self {
        Self { rx: store.watch(), path: paths::normalize(path) }
    }

    /// `Some(None)` means the node was removed; `None` means the feed closed.
    pub async fn next(&mut self) -> Option<Option<Value>> {
        loop {
            match self.rx.recv().await {
                Ok(change) if change.path == self.path => {
                    return Some(match change.kind {
                        ChangeKind::Removed => None,
                        ChangeKind::Added | ChangeKind::Changed => change.value,
                    });
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(path = %self.path, skipped, "value subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn truthiness_matches_store_semantics() {
        assert!(is_truthy(Some(&json!(true))));
        assert!(is_truthy(Some(&json!({ "by": "x" }))));
        assert!(!is_truthy(Some(&json!(false))));
        assert!(!is_truthy(Some(&json!(0))));
        assert!(!is_truthy(Some(&Value::Null)));
        assert!(!is_truthy(None));
    }

    #[test]
    fn push_keys_sort_in_creation_order() {
        let keys: Vec<String> = (0..50).map(|_| push_key()).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
    }

    #[tokio::test]
    async fn child_added_ignores_other_parents_and_updates() {
        let store = MemoryStore::new();
        let mut added = ChildAdded::new(&store, "admin_commands");

        store.set("reports/r1", json!({ "reason": "spam" })).await.unwrap();
        let key = store.push("admin_commands", json!({ "command": "ban" })).await.unwrap();
        store
            .update(&paths::child("admin_commands", &key), json!({ "processed": true }).as_object().cloned().unwrap())
            .await
            .unwrap();

        let (got, value) = added.next().await.unwrap();
        assert_eq!(got, key);
        assert_eq!(value["command"], "ban");
    }

    #[tokio::test]
    async fn value_watch_sees_set_and_remove() {
        let store = MemoryStore::new();
        let mut watch = ValueWatch::new(&store, "force_logout/a_b@x_com");

        store.set("force_logout/a_b@x_com", json!(true)).await.unwrap();
        store.remove("force_logout/a_b@x_com").await.unwrap();

        assert_eq!(watch.next().await, Some(Some(json!(true))));
        assert_eq!(watch.next().await, Some(None));
    }

    #[tokio::test]
    async fn query_and_limit_helpers() {
        let store = MemoryStore::new();
        for i in 0..5 {
            store.push("chatrooms/global/messages", json!({ "n": i, "user": if i % 2 == 0 { "a" } else { "b" } })).await.unwrap();
        }

        let last = store.limit_to_last("chatrooms/global/messages", 2).await.unwrap();
        assert_eq!(last.iter().map(|(_, v)| v["n"].as_i64().unwrap()).collect::<Vec<_>>(), vec![3, 4]);

        let by_a = store.query_eq("chatrooms/global/messages", "user", &json!("a")).await.unwrap();
        assert_eq!(by_a.len(), 3);
    }
}
