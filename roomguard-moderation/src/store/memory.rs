use std::sync::RwLock;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::broadcast;

use super::{paths, Change, ChangeKind, DocumentStore, StoreError, StoreResult, WriteBatch, WriteOp};

const CHANGE_CAPACITY: usize = 1024;

/// In-process store: one JSON tree behind a lock.
///
/// Backs the `memory` store backend and every test in this crate.
pub struct MemoryStore {
    root: RwLock<Value>,
    changes: broadcast::Sender<Change>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CAPACITY);
        Self {
            root: RwLock::new(Value::Object(Map::new())),
            changes,
        }
    }

    /// Copy of the whole tree.
    pub fn snapshot(&self) -> Value {
        self.root.read().map(|root| root.clone()).unwrap_or(Value::Null)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn lookup<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut node = root;
    for segment in paths::segments(path) {
        node = node.as_object()?.get(segment)?;
    }
    Some(node)
}

/// Walks to `path`, creating (or replacing non-object) intermediate nodes.
fn entry<'a>(root: &'a mut Value, path: &str) -> &'a mut Value {
    let mut node = root;
    for segment in paths::segments(path) {
        if !node.is_object() {
            *node = Value::Object(Map::new());
        }
        node = match node {
            Value::Object(map) => map.entry(segment.to_string()).or_insert(Value::Null),
            _ => unreachable!("node was just made an object"),
        };
    }
    node
}

/// Removes the node at `segments`, pruning parents left empty.
fn remove_at(node: &mut Value, segments: &[&str]) -> bool {
    let Some((first, rest)) = segments.split_first() else {
        return false;
    };
    let Some(map) = node.as_object_mut() else {
        return false;
    };
    let removed = if rest.is_empty() {
        map.remove(*first).is_some()
    } else {
        let removed = match map.get_mut(*first) {
            Some(child) => remove_at(child, rest),
            None => false,
        };
        if map.get(*first).is_some_and(|c| c.as_object().is_some_and(|m| m.is_empty())) {
            map.remove(*first);
        }
        removed
    };
    removed
}

fn apply_op(root: &mut Value, op: WriteOp) -> StoreResult<Option<Change>> {
    let path = paths::normalize(op.path());
    if path.is_empty() {
        return Err(StoreError::InvalidPath(op.path().to_string()));
    }
    let segments: Vec<&str> = paths::segments(&path).collect();
    let existed = lookup(root, &path).is_some();

    match op {
        WriteOp::Set { value: Value::Null, .. } | WriteOp::Remove { .. } => {
            if remove_at(root, &segments) {
                Ok(Some(Change { path, kind: ChangeKind::Removed, value: None }))
            } else {
                Ok(None)
            }
        }
        WriteOp::Set { value, .. } => {
            *entry(root, &path) = value.clone();
            let kind = if existed { ChangeKind::Changed } else { ChangeKind::Added };
            Ok(Some(Change { path, kind, value: Some(value) }))
        }
        WriteOp::Update { fields, .. } => {
            let node = entry(root, &path);
            if !node.is_object() {
                *node = Value::Object(Map::new());
            }
            if let Value::Object(map) = node {
                for (field, value) in fields {
                    if value.is_null() {
                        map.remove(&field);
                    } else {
                        map.insert(field, value);
                    }
                }
            }
            let value = node.clone();
            if value.as_object().is_some_and(|m| m.is_empty()) {
                remove_at(root, &segments);
                return Ok(existed.then(|| Change { path, kind: ChangeKind::Removed, value: None }));
            }
            let kind = if existed { ChangeKind::Changed } else { ChangeKind::Added };
            Ok(Some(Change { path, kind, value: Some(value) }))
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, path: &str) -> StoreResult<Option<Value>> {
        let root = self
            .root
            .read()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".into()))?;
        Ok(lookup(&root, path).filter(|v| !v.is_null()).cloned())
    }

    async fn children(&self, path: &str) -> StoreResult<Vec<(String, Value)>> {
        let root = self
            .root
            .read()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".into()))?;
        let mut children: Vec<(String, Value)> = match lookup(&root, path) {
            Some(Value::Object(map)) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            _ => Vec::new(),
        };
        children.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(children)
    }

    async fn apply(&self, batch: WriteBatch) -> StoreResult<()> {
        let changes = {
            let mut root = self
                .root
                .write()
                .map_err(|_| StoreError::Unavailable("memory store lock poisoned".into()))?;
            // Work on a copy so a failing op leaves the tree untouched.
            let mut staged = root.clone();
            let mut changes = Vec::with_capacity(batch.len());
            for op in batch.into_ops() {
                if let Some(change) = apply_op(&mut staged, op)? {
                    changes.push(change);
                }
            }
            *root = staged;
            changes
        };

        for change in changes {
            // No receivers is fine.
            let _ = self.changes.send(change);
        }
        Ok(())
    }

    fn watch(&self) -> broadcast::Receiver<Change> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn set_get_remove() {
        let store = MemoryStore::new();
        store.set("banned/a_b@x_com", json!({ "by": "ops@x.com", "ts": 1 })).await.unwrap();

        assert_eq!(store.get("banned/a_b@x_com").await.unwrap().unwrap()["by"], "ops@x.com");
        assert!(store.get("banned/nobody").await.unwrap().is_none());

        store.remove("banned/a_b@x_com").await.unwrap();
        assert!(store.get("banned/a_b@x_com").await.unwrap().is_none());
        // Emptied parents disappear with their last child.
        assert!(store.get("banned").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn removing_missing_path_is_not_an_error() {
        let store = MemoryStore::new();
        store.remove("banned/ghost").await.unwrap();
        assert_eq!(store.snapshot(), json!({}));
    }

    #[tokio::test]
    async fn update_merges_and_null_deletes_field() {
        let store = MemoryStore::new();
        store.set("users/u1", json!({ "email": "a@x.com", "pfp": "http://img" })).await.unwrap();

        let mut fields = Map::new();
        fields.insert("nickname".into(), json!("Al"));
        fields.insert("pfp".into(), Value::Null);
        store.update("users/u1", fields).await.unwrap();

        assert_eq!(store.get("users/u1").await.unwrap().unwrap(), json!({ "email": "a@x.com", "nickname": "Al" }));
    }

    #[tokio::test]
    async fn subtree_removal() {
        let store = MemoryStore::new();
        store.push("chatrooms/lobby/messages", json!({ "msg": "hi" })).await.unwrap();
        store.set("chatrooms/global/messages/k", json!({ "msg": "stay" })).await.unwrap();

        store.remove("chatrooms/lobby").await.unwrap();

        assert!(store.get("chatrooms/lobby").await.unwrap().is_none());
        assert!(store.get("chatrooms/global/messages/k").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn failing_batch_leaves_tree_untouched() {
        let store = MemoryStore::new();
        let mut batch = WriteBatch::new();
        batch.set("banned/a", json!(true));
        batch.set("/", json!(true));

        assert!(matches!(store.apply(batch).await, Err(StoreError::InvalidPath(_))));
        assert!(store.get("banned/a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn batch_emits_one_change_per_op() {
        let store = MemoryStore::new();
        let mut rx = store.watch();

        let mut batch = WriteBatch::new();
        batch.set("banned/a", json!(true));
        batch.set("banned/a", json!(false));
        store.apply(batch).await.unwrap();

        assert_eq!(rx.recv().await.unwrap().kind, ChangeKind::Added);
        assert_eq!(rx.recv().await.unwrap().kind, ChangeKind::Changed);
    }
}
