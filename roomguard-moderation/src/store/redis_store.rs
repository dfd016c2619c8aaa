use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use futures_lite::StreamExt;
use redis::aio::PubSub;
use serde_json::{Map, Value};
use tokio::sync::broadcast;

use roomguard_shared::clients::redis::RedisClient;

use super::{paths, Change, ChangeKind, DocumentStore, StoreError, StoreResult, WriteBatch, WriteOp};

const CHANGE_CAPACITY: usize = 1024;
const RESUBSCRIBE_MIN: Duration = Duration::from_millis(250);
const RESUBSCRIBE_MAX: Duration = Duration::from_secs(30);

/// Fan-out side of the pub/sub change feed.
///
/// When the subscription drops, the sender is replaced: receivers handed out
/// before the drop see `Closed` and resubscribe through [`DocumentStore::watch`].
struct ChangeFeed {
    tx: RwLock<broadcast::Sender<Change>>,
    live: AtomicBool,
}

impl ChangeFeed {
    fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANGE_CAPACITY);
        Self { tx: RwLock::new(tx), live: AtomicBool::new(false) }
    }

    fn subscribe(&self) -> broadcast::Receiver<Change> {
        self.tx.read().unwrap_or_else(|e| e.into_inner()).subscribe()
    }

    fn send(&self, change: Change) {
        let _ = self.tx.read().unwrap_or_else(|e| e.into_inner()).send(change);
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    fn set_live(&self) {
        self.live.store(true, Ordering::Release);
    }

    /// Marks the feed down and closes every outstanding receiver.
    fn sever(&self) {
        self.live.store(false, Ordering::Release);
        let (tx, _) = broadcast::channel(CHANGE_CAPACITY);
        *self.tx.write().unwrap_or_else(|e| e.into_inner()) = tx;
    }
}

/// Document store on Redis.
///
/// Layout, with `{ns}` the configured namespace:
/// - `{ns}:h:{parent}`: hash of the parent's direct children, one JSON
///   document per field (`{ns}:h:banned` -> `a_b@x_com => {"by":..,"ts":..}`)
/// - `{ns}:index`: set of every parent path that has a hash, used to find
///   descendants when a subtree is removed
/// - `{ns}:changes`: pub/sub channel carrying one JSON [`Change`] per write
///
/// Records are read and written whole; a node is either a field of its
/// parent's hash or, when it has no value of its own, the object assembled
/// from its own hash.
///
/// Changes published while the subscription is down are not replayed;
/// subscribers learn about the gap through `Closed` and re-read what they need.
pub struct RedisStore {
    redis: RedisClient,
    namespace: String,
    feed: Arc<ChangeFeed>,
}

impl RedisStore {
    /// Connects the change feed and returns the store.
    pub async fn connect(redis: RedisClient, namespace: impl Into<String>) -> StoreResult<Self> {
        let namespace = namespace.into();
        let store = Self { redis, namespace, feed: Arc::new(ChangeFeed::new()) };
        let pubsub = store.redis.subscribe(&store.channel()).await?;
        store.feed.set_live();
        tokio::spawn(follow_changes(
            store.redis.clone(),
            store.channel(),
            Arc::downgrade(&store.feed),
            pubsub,
        ));
        Ok(store)
    }

    fn hash_key(&self, parent: &str) -> String {
        hash_key(&self.namespace, parent)
    }

    fn index_key(&self) -> String {
        format!("{}:index", self.namespace)
    }

    fn channel(&self) -> String {
        format!("{}:changes", self.namespace)
    }

    fn parse(path: &str, raw: &str) -> StoreResult<Value> {
        serde_json::from_str(raw).map_err(|source| StoreError::Serialization {
            path: path.to_string(),
            source,
        })
    }

    async fn read_field(&self, path: &str) -> StoreResult<Option<Value>> {
        let Some((parent, last)) = paths::split_last(path) else {
            return Err(StoreError::InvalidPath(path.to_string()));
        };
        match self.redis.hget(&self.hash_key(&parent), last).await? {
            Some(raw) => Self::parse(path, &raw).map(Some),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl DocumentStore for RedisStore {
    async fn get(&self, path: &str) -> StoreResult<Option<Value>> {
        let path = paths::normalize(path);
        if let Some(value) = self.read_field(&path).await? {
            return Ok(Some(value));
        }
        let children = self.children(&path).await?;
        if children.is_empty() {
            return Ok(None);
        }
        Ok(Some(Value::Object(children.into_iter().collect())))
    }

    async fn children(&self, path: &str) -> StoreResult<Vec<(String, Value)>> {
        let path = paths::normalize(path);
        let raw = self.redis.hgetall(&self.hash_key(&path)).await?;
        let mut children = raw
            .into_iter()
            .map(|(key, raw)| {
                let value = Self::parse(&paths::child(&path, &key), &raw)?;
                Ok((key, value))
            })
            .collect::<StoreResult<Vec<_>>>()?;
        children.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(children)
    }

    async fn apply(&self, batch: WriteBatch) -> StoreResult<()> {
        let mut pipe = redis::pipe();
        let mut changes = Vec::with_capacity(batch.len());
        let mut indexed: Option<HashSet<String>> = None;

        for op in batch.into_ops() {
            let path = paths::normalize(op.path());
            let Some((parent, last)) = paths::split_last(&path) else {
                return Err(StoreError::InvalidPath(op.path().to_string()));
            };
            let last = last.to_string();

            match op {
                WriteOp::Set { value: Value::Null, .. } | WriteOp::Remove { .. } => {
                    if indexed.is_none() {
                        indexed = Some(self.redis.smembers(&self.index_key()).await?.into_iter().collect());
                    }
                    pipe.hdel(self.hash_key(&parent), &last).ignore();
                    let prefix = format!("{path}/");
                    for hash in indexed.iter().flatten() {
                        if *hash == path || hash.starts_with(&prefix) {
                            pipe.del(self.hash_key(hash)).ignore();
                            pipe.srem(self.index_key(), hash).ignore();
                        }
                    }
                    changes.push(Change { path, kind: ChangeKind::Removed, value: None });
                }
                WriteOp::Set { value, .. } => {
                    let existed = self.read_field(&path).await?.is_some();
                    pipe.hset(self.hash_key(&parent), &last, value.to_string()).ignore();
                    pipe.sadd(self.index_key(), &parent).ignore();
                    let kind = if existed { ChangeKind::Changed } else { ChangeKind::Added };
                    changes.push(Change { path, kind, value: Some(value) });
                }
                WriteOp::Update { fields, .. } => {
                    // Read-modify-write on one record: last writer wins.
                    let current = self.read_field(&path).await?;
                    let existed = current.is_some();
                    let mut merged = match current {
                        Some(Value::Object(map)) => map,
                        _ => Map::new(),
                    };
                    for (field, value) in fields {
                        if value.is_null() {
                            merged.remove(&field);
                        } else {
                            merged.insert(field, value);
                        }
                    }
                    if merged.is_empty() {
                        pipe.hdel(self.hash_key(&parent), &last).ignore();
                        if existed {
                            changes.push(Change { path, kind: ChangeKind::Removed, value: None });
                        }
                        continue;
                    }
                    let value = Value::Object(merged);
                    pipe.hset(self.hash_key(&parent), &last, value.to_string()).ignore();
                    pipe.sadd(self.index_key(), &parent).ignore();
                    let kind = if existed { ChangeKind::Changed } else { ChangeKind::Added };
                    changes.push(Change { path, kind, value: Some(value) });
                }
            }
        }

        self.redis.exec_atomic(pipe).await?;

        let channel = self.channel();
        for change in changes {
            let payload = serde_json::to_string(&change).map_err(|source| StoreError::Serialization {
                path: change.path.clone(),
                source,
            })?;
            if let Err(e) = self.redis.publish(&channel, &payload).await {
                tracing::warn!(error = %e, path = %change.path, "failed to publish change");
            }
        }
        Ok(())
    }

    fn watch(&self) -> broadcast::Receiver<Change> {
        self.feed.subscribe()
    }

    async fn ping(&self) -> StoreResult<()> {
        self.redis.ping().await?;
        if !self.feed.is_live() {
            return Err(StoreError::Unavailable("change feed disconnected".into()));
        }
        Ok(())
    }
}

pub(crate) fn hash_key(namespace: &str, parent: &str) -> String {
    format!("{namespace}:h:{parent}")
}

/// Forwards published changes to the feed, resubscribing with backoff
/// whenever the pub/sub connection drops. Ends once the store is gone.
async fn follow_changes(redis: RedisClient, channel: String, feed: Weak<ChangeFeed>, mut pubsub: PubSub) {
    loop {
        {
            let mut messages = pubsub.on_message();
            while let Some(msg) = messages.next().await {
                let Some(feed) = feed.upgrade() else {
                    return;
                };
                let payload: String = match msg.get_payload() {
                    Ok(payload) => payload,
                    Err(e) => {
                        tracing::error!(error = %e, "unreadable change notification");
                        continue;
                    }
                };
                match serde_json::from_str::<Change>(&payload) {
                    Ok(change) => feed.send(change),
                    Err(e) => tracing::error!(error = %e, "malformed change notification"),
                }
            }
        }

        match feed.upgrade() {
            Some(current) => current.sever(),
            None => return,
        }
        tracing::warn!(channel = %channel, "redis change feed dropped, resubscribing");

        let mut backoff = RESUBSCRIBE_MIN;
        pubsub = loop {
            tokio::time::sleep(backoff).await;
            if feed.strong_count() == 0 {
                return;
            }
            match redis.subscribe(&channel).await {
                Ok(pubsub) => break pubsub,
                Err(e) => {
                    tracing::warn!(error = %e, retry_in = ?backoff, "redis resubscribe failed");
                    backoff = (backoff * 2).min(RESUBSCRIBE_MAX);
                }
            }
        };
        match feed.upgrade() {
            Some(current) => current.set_live(),
            None => return,
        }
        tracing::info!(channel = %channel, "redis change feed restored");
    }
}
