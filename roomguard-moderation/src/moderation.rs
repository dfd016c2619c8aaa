//! Typed view of the moderation records.
//!
//! Presence checks accept any stored shape; listings keep records that do
//! not match the current shape as [`Stored::Legacy`]. Writes are not performed here:
//! the `set_*` / `clear_*` builders add ops to a [`WriteBatch`] so that Admin
//! Control can commit them together with the audit entry.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;

use crate::identity::ModerationKey;
use crate::models::{BanRecord, MuteRecord, ShadowbanRecord, SlowModeRecord, Stored};
use crate::store::{decode, is_truthy, paths, DocumentStore, StoreResult, WriteBatch};

/// Outcome of reading a mute record at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MuteStatus {
    NotMuted,
    /// `until: None` is an indefinite mute.
    Active { until: Option<DateTime<Utc>> },
    /// The record is still stored but its `until` has passed.
    Expired,
}

#[derive(Clone)]
pub struct ModerationStore {
    docs: Arc<dyn DocumentStore>,
}

impl ModerationStore {
    pub fn new(docs: Arc<dyn DocumentStore>) -> Self {
        Self { docs }
    }

    pub fn docs(&self) -> &Arc<dyn DocumentStore> {
        &self.docs
    }

    pub async fn is_admin(&self, key: &ModerationKey) -> StoreResult<bool> {
        let value = self.docs.get(&paths::admin(key)).await?;
        Ok(is_truthy(value.as_ref()))
    }

    /// Presence check used by the send gate: any stored value counts,
    /// whatever its shape.
    pub async fn is_banned(&self, key: &ModerationKey) -> StoreResult<bool> {
        Ok(self.docs.get(&paths::banned(key)).await?.is_some())
    }

    pub async fn is_shadowbanned(&self, key: &ModerationKey) -> StoreResult<bool> {
        Ok(self.docs.get(&paths::shadowbanned(key)).await?.is_some())
    }

    /// Lazy expiry: a mute whose `until` is at or before `now` is reported as
    /// [`MuteStatus::Expired`] and left in place.
    pub async fn mute_status(&self, key: &ModerationKey, now: DateTime<Utc>) -> StoreResult<MuteStatus> {
        let Some(value) = self.docs.get(&paths::muted(key)).await? else {
            return Ok(MuteStatus::NotMuted);
        };
        let until = value
            .get("until")
            .and_then(Value::as_i64)
            .filter(|ms| *ms != 0)
            .and_then(DateTime::from_timestamp_millis);
        Ok(match until {
            None => MuteStatus::Active { until: None },
            Some(until) if until > now => MuteStatus::Active { until: Some(until) },
            Some(_) => MuteStatus::Expired,
        })
    }

    pub async fn is_locked(&self, room: &str) -> StoreResult<bool> {
        Ok(self.docs.get(&paths::locked(room)).await?.is_some())
    }

    /// Minimum spacing between sends in `room`, if slow mode is on. A record
    /// without `seconds` counts as zero.
    pub async fn slow_mode_interval(&self, room: &str) -> StoreResult<Option<Duration>> {
        let Some(value) = self.docs.get(&paths::slowmode(room)).await? else {
            return Ok(None);
        };
        let seconds = value.get("seconds").and_then(Value::as_f64).unwrap_or(0.0).max(0.0);
        Ok(Some(Duration::milliseconds((seconds * 1000.0) as i64)))
    }

    pub async fn force_logout_pending(&self, key: &ModerationKey) -> StoreResult<bool> {
        let value = self.docs.get(&paths::force_logout(key)).await?;
        Ok(is_truthy(value.as_ref()))
    }

    /// Every ban, ordered by key.
    pub async fn banned(&self) -> StoreResult<Vec<(String, Stored<BanRecord>)>> {
        self.records(paths::BANNED).await
    }

    /// Every mute record, expired ones included.
    pub async fn muted(&self) -> StoreResult<Vec<(String, Stored<MuteRecord>)>> {
        self.records(paths::MUTED).await
    }

    async fn records<T: serde::de::DeserializeOwned>(&self, parent: &str) -> StoreResult<Vec<(String, Stored<T>)>> {
        self.docs
            .children(parent)
            .await?
            .into_iter()
            .map(|(key, value)| {
                let record = decode(&paths::child(parent, &key), value)?;
                Ok((key, record))
            })
            .collect()
    }
}

// --- Write-op builders ---

pub fn grant_admin(batch: &mut WriteBatch, key: &ModerationKey) {
    batch.set(paths::admin(key), Value::Bool(true));
}

pub fn set_ban(batch: &mut WriteBatch, key: &ModerationKey, record: &BanRecord) -> StoreResult<()> {
    batch.set_record(paths::banned(key), record)?;
    Ok(())
}

pub fn clear_ban(batch: &mut WriteBatch, key: &ModerationKey) {
    batch.remove(paths::banned(key));
}

pub fn set_mute(batch: &mut WriteBatch, key: &ModerationKey, record: &MuteRecord) -> StoreResult<()> {
    batch.set_record(paths::muted(key), record)?;
    Ok(())
}

pub fn clear_mute(batch: &mut WriteBatch, key: &ModerationKey) {
    batch.remove(paths::muted(key));
}

pub fn set_shadowban(batch: &mut WriteBatch, key: &ModerationKey, record: &ShadowbanRecord) -> StoreResult<()> {
    batch.set_record(paths::shadowbanned(key), record)?;
    Ok(())
}

pub fn clear_shadowban(batch: &mut WriteBatch, key: &ModerationKey) {
    batch.remove(paths::shadowbanned(key));
}

pub fn set_force_logout(batch: &mut WriteBatch, key: &ModerationKey) {
    batch.set(paths::force_logout(key), Value::Bool(true));
}

pub fn set_locked(batch: &mut WriteBatch, room: &str) {
    batch.set(paths::locked(room), Value::Bool(true));
}

pub fn clear_locked(batch: &mut WriteBatch, room: &str) {
    batch.remove(paths::locked(room));
}

pub fn set_slow_mode(batch: &mut WriteBatch, room: &str, record: &SlowModeRecord) -> StoreResult<()> {
    batch.set_record(paths::slowmode(room), record)?;
    Ok(())
}

pub fn clear_slow_mode(batch: &mut WriteBatch, room: &str) {
    batch.remove(paths::slowmode(room));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn store() -> ModerationStore {
        ModerationStore::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn absent_records_read_as_none() {
        let mods = store();
        let key = ModerationKey::from_identity("a@x.com");
        assert!(!mods.is_banned(&key).await.unwrap());
        assert_eq!(mods.mute_status(&key, Utc::now()).await.unwrap(), MuteStatus::NotMuted);
        assert!(!mods.is_admin(&key).await.unwrap());
        assert!(!mods.is_locked("global").await.unwrap());
    }

    #[tokio::test]
    async fn builders_round_trip_through_store() {
        let mods = store();
        let key = ModerationKey::from_identity("a.b@x.com");
        let ts = DateTime::from_timestamp_millis(1_000).unwrap();
        let record = BanRecord { issued_by: "ops@x.com".into(), issued_at: ts };

        let mut batch = WriteBatch::new();
        set_ban(&mut batch, &key, &record).unwrap();
        set_locked(&mut batch, "lobby");
        grant_admin(&mut batch, &ModerationKey::from_identity("ops@x.com"));
        mods.docs().apply(batch).await.unwrap();

        assert!(mods.is_banned(&key).await.unwrap());
        assert!(mods.is_locked("lobby").await.unwrap());
        assert!(mods.is_admin(&ModerationKey::from_identity("OPS@x.com")).await.unwrap());
        assert_eq!(mods.banned().await.unwrap(), vec![("a_b@x_com".to_string(), Stored::Typed(record))]);

        let mut batch = WriteBatch::new();
        clear_ban(&mut batch, &key);
        mods.docs().apply(batch).await.unwrap();
        assert!(!mods.is_banned(&key).await.unwrap());
    }

    #[tokio::test]
    async fn admin_flag_false_is_not_admin() {
        let mods = store();
        mods.docs().set("admins/ops@x_com", json!(false)).await.unwrap();
        assert!(!mods.is_admin(&ModerationKey::from_identity("ops@x.com")).await.unwrap());
    }

    #[tokio::test]
    async fn mute_status_is_lazy() {
        let mods = store();
        let key = ModerationKey::from_identity("a@x.com");
        let now = DateTime::from_timestamp_millis(10_000).unwrap();

        mods.docs().set("muted/a@x_com", json!({ "by": "ops", "ts": 0, "until": 5_000 })).await.unwrap();
        assert_eq!(mods.mute_status(&key, now).await.unwrap(), MuteStatus::Expired);
        // Still stored.
        assert_eq!(mods.muted().await.unwrap().len(), 1);

        mods.docs().set("muted/a@x_com", json!({ "by": "ops", "ts": 0 })).await.unwrap();
        assert_eq!(mods.mute_status(&key, now).await.unwrap(), MuteStatus::Active { until: None });
    }

    #[tokio::test]
    async fn presence_checks_accept_any_shape() {
        let mods = store();
        mods.docs().set("banned/a@x_com", json!(true)).await.unwrap();
        mods.docs().set("slowmode/global", json!({ "seconds": 30 })).await.unwrap();

        assert!(mods.is_banned(&ModerationKey::from_identity("a@x.com")).await.unwrap());
        assert_eq!(mods.slow_mode_interval("global").await.unwrap(), Some(Duration::seconds(30)));
        assert_eq!(mods.slow_mode_interval("lobby").await.unwrap(), None);
    }

    #[tokio::test]
    async fn listings_keep_legacy_records() {
        let mods = store();
        mods.docs().set("banned/old@x_com", json!(true)).await.unwrap();
        mods.docs().set("banned/new@x_com", json!({ "by": "ops", "ts": 1_000 })).await.unwrap();
        mods.docs().set("muted/old@x_com", json!("yes")).await.unwrap();

        let banned = mods.banned().await.unwrap();
        assert_eq!(banned.len(), 2);
        let current = BanRecord { issued_by: "ops".into(), issued_at: DateTime::from_timestamp_millis(1_000).unwrap() };
        assert_eq!(banned[0], ("new@x_com".to_string(), Stored::Typed(current)));
        assert_eq!(banned[1], ("old@x_com".to_string(), Stored::Legacy(json!(true))));
        assert_eq!(mods.muted().await.unwrap()[0].1, Stored::Legacy(json!("yes")));
    }
}
