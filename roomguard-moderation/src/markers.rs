//! Slow-mode last-send markers.
//!
//! A marker records when an identity last sent in a room. The send gate reads
//! it; the chat service claims it just before appending a message and
//! restores the previous value if the append fails.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

use roomguard_shared::clients::redis::RedisClient;

use crate::identity::ModerationKey;
use crate::store::{StoreError, StoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    /// The marker now holds the new send time; `previous` is what it held before.
    Claimed { previous: Option<DateTime<Utc>> },
    /// A send at `last` is still inside the interval; nothing was written.
    Refused { last: DateTime<Utc> },
}

#[async_trait]
pub trait SendMarkers: Send + Sync {
    async fn last_send(&self, key: &ModerationKey, room: &str) -> StoreResult<Option<DateTime<Utc>>>;

    /// Records `now` as the last send unless the stored marker is less than
    /// `min_interval` old. Check and write happen as one step.
    async fn claim(
        &self,
        key: &ModerationKey,
        room: &str,
        now: DateTime<Utc>,
        min_interval: Duration,
    ) -> StoreResult<Claim>;

    /// Puts back the marker a successful claim replaced.
    async fn restore(&self, key: &ModerationKey, room: &str, previous: Option<DateTime<Utc>>) -> StoreResult<()>;
}

/// Per-device string store, the way a browser's local storage behaves.
pub trait LocalKeyValue: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: String);
    fn remove(&self, key: &str);

    /// Atomically replaces the value at `key` with whatever `f` returns.
    /// `f` sees the current value; returning `None` leaves the entry as is.
    fn update(&self, key: &str, f: &mut dyn FnMut(Option<&str>) -> Option<String>);
}

#[derive(Debug, Default)]
pub struct MemoryKeyValue {
    entries: DashMap<String, String>,
}

impl MemoryKeyValue {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LocalKeyValue for MemoryKeyValue {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).map(|v| v.value().clone())
    }

    fn set(&self, key: &str, value: String) {
        self.entries.insert(key.to_string(), value);
    }

    fn remove(&self, key: &str) {
        self.entries.remove(key);
    }

    fn update(&self, key: &str, f: &mut dyn FnMut(Option<&str>) -> Option<String>) {
        // The entry guard holds the shard lock for the whole read-modify-write.
        match self.entries.entry(key.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
                if let Some(next) = f(Some(occupied.get().as_str())) {
                    occupied.insert(next);
                }
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                if let Some(next) = f(None) {
                    vacant.insert(next);
                }
            }
        }
    }
}

fn parse_millis(raw: &str) -> Option<DateTime<Utc>> {
    raw.trim().parse::<i64>().ok().and_then(DateTime::from_timestamp_millis)
}

/// Markers kept on the sending device under `lastMsg_{key}_{room}`.
///
/// Only sees sends made from this device; [`RedisMarkers`] covers every
/// device of an identity.
pub struct DeviceMarkers {
    kv: Arc<dyn LocalKeyValue>,
}

impl DeviceMarkers {
    pub fn new(kv: Arc<dyn LocalKeyValue>) -> Self {
        Self { kv }
    }

    pub fn storage_key(key: &ModerationKey, room: &str) -> String {
        format!("lastMsg_{key}_{room}")
    }
}

#[async_trait]
impl SendMarkers for DeviceMarkers {
    async fn last_send(&self, key: &ModerationKey, room: &str) -> StoreResult<Option<DateTime<Utc>>> {
        Ok(self.kv.get(&Self::storage_key(key, room)).as_deref().and_then(parse_millis))
    }

    async fn claim(
        &self,
        key: &ModerationKey,
        room: &str,
        now: DateTime<Utc>,
        min_interval: Duration,
    ) -> StoreResult<Claim> {
        let mut outcome = Claim::Claimed { previous: None };
        self.kv.update(&Self::storage_key(key, room), &mut |current| {
            let last = current.and_then(parse_millis);
            match last {
                Some(last) if now - last < min_interval => {
                    outcome = Claim::Refused { last };
                    None
                }
                previous => {
                    outcome = Claim::Claimed { previous };
                    Some(now.timestamp_millis().to_string())
                }
            }
        });
        Ok(outcome)
    }

    async fn restore(&self, key: &ModerationKey, room: &str, previous: Option<DateTime<Utc>>) -> StoreResult<()> {
        let storage_key = Self::storage_key(key, room);
        match previous {
            Some(at) => self.kv.set(&storage_key, at.timestamp_millis().to_string()),
            None => self.kv.remove(&storage_key),
        }
        Ok(())
    }
}

/// Replies `{1, previous}` after writing the new marker (`previous` is -1
/// when there was none) or `{0, last}` when the interval has not passed.
const CLAIM_SCRIPT: &str = r#"
local last = redis.call('GET', KEYS[1])
if last and (tonumber(ARGV[1]) - tonumber(last)) < tonumber(ARGV[2]) then
  return {0, tonumber(last)}
end
redis.call('SET', KEYS[1], ARGV[1], 'EX', ARGV[3])
if last then
  return {1, tonumber(last)}
end
return {1, -1}
"#;

/// Server-side markers keyed by identity and room, shared by every device.
pub struct RedisMarkers {
    redis: RedisClient,
    namespace: String,
    ttl_secs: u64,
    script: redis::Script,
}

impl RedisMarkers {
    pub fn new(redis: RedisClient, namespace: impl Into<String>, ttl_secs: u64) -> Self {
        Self {
            redis,
            namespace: namespace.into(),
            ttl_secs: ttl_secs.max(1),
            script: redis::Script::new(CLAIM_SCRIPT),
        }
    }
}

fn marker_key(namespace: &str, key: &ModerationKey, room: &str) -> String {
    format!("{namespace}:lastmsg:{key}:{room}")
}

/// Expiry for a freshly claimed marker: the configured TTL, stretched so the
/// marker outlives the slow-mode interval it enforces.
fn marker_ttl(ttl_secs: u64, min_interval: Duration) -> u64 {
    let interval_ms = min_interval.num_milliseconds().max(0) as u64;
    ttl_secs.max(interval_ms.div_ceil(1000))
}

/// Maps the `{claimed, last}` script reply onto a [`Claim`].
fn decode_claim(marker: &str, claimed: i64, last: i64) -> StoreResult<Claim> {
    let last = (last >= 0).then(|| DateTime::from_timestamp_millis(last)).flatten();
    match (claimed, last) {
        (1, previous) => Ok(Claim::Claimed { previous }),
        (0, Some(last)) => Ok(Claim::Refused { last }),
        _ => Err(StoreError::Backend(format!("unexpected marker reply for {marker}: {{{claimed}, {last:?}}}"))),
    }
}

#[async_trait]
impl SendMarkers for RedisMarkers {
    async fn last_send(&self, key: &ModerationKey, room: &str) -> StoreResult<Option<DateTime<Utc>>> {
        let mut conn = self.redis.connection();
        let raw: Option<String> = redis::cmd("GET")
            .arg(marker_key(&self.namespace, key, room))
            .query_async(&mut conn)
            .await?;
        Ok(raw.as_deref().and_then(parse_millis))
    }

    async fn claim(
        &self,
        key: &ModerationKey,
        room: &str,
        now: DateTime<Utc>,
        min_interval: Duration,
    ) -> StoreResult<Claim> {
        let marker = marker_key(&self.namespace, key, room);
        let args = [
            now.timestamp_millis().to_string(),
            min_interval.num_milliseconds().to_string(),
            marker_ttl(self.ttl_secs, min_interval).to_string(),
        ];
        let (claimed, last): (i64, i64) = self.redis.run_script(&self.script, &[marker.as_str()], &args).await?;
        decode_claim(&marker, claimed, last)
    }

    /// Rewrites the marker in place, keeping the expiry the claim set.
    async fn restore(&self, key: &ModerationKey, room: &str, previous: Option<DateTime<Utc>>) -> StoreResult<()> {
        let marker = marker_key(&self.namespace, key, room);
        let mut conn = self.redis.connection();
        match previous {
            Some(at) => {
                redis::cmd("SET")
                    .arg(&marker)
                    .arg(at.timestamp_millis())
                    .arg("KEEPTTL")
                    .query_async::<_, ()>(&mut conn)
                    .await?
            }
            None => self.redis.del(&marker).await?,
        }
        Ok(())
    }
}
