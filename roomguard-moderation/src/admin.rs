//! Admin control plane.
//!
//! Every mutation follows the same protocol: the actor must be on the admin
//! allow-list, then the mutation and its audit entry are committed in a single
//! batch, so a change is either fully recorded or not applied at all.

use std::sync::Arc;

use chrono::Duration;
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::clock::Clock;
use crate::identity::{same_identity, Identity, ModerationKey};
use crate::models::{
    Announcement, AuditLogEntry, BanRecord, Keyed, Maintenance, MuteRecord, ShadowbanRecord, SiteField,
    SlowModeRecord, Stored, UserProfile,
};
use crate::moderation::{self, ModerationStore};
use crate::store::{decode, paths, push_key, DocumentStore, StoreError, WriteBatch};

/// Default temp-mute length.
pub const DEFAULT_TEMP_MUTE_SECS: i64 = 3600;

/// Audit action names as they appear in `admin_logs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum AdminAction {
    Ban,
    Unban,
    Mute,
    Unmute,
    TempMute,
    Shadowban,
    Unshadowban,
    ForceLogout,
    ChangeNickname,
    #[serde(rename = "resetPFP")]
    ResetPfp,
    ClearAllChat,
    ClearUserMessages,
    DeleteMessage,
    DeleteRoom,
    LockChat,
    UnlockChat,
    SetSlowMode,
    DisableSlowMode,
    GlobalAnnouncement,
    SetAccentColor,
    SetServerName,
    SetServerLogo,
    SetBackground,
    ToggleMaintenance,
}

impl AdminAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ban => "ban",
            Self::Unban => "unban",
            Self::Mute => "mute",
            Self::Unmute => "unmute",
            Self::TempMute => "tempMute",
            Self::Shadowban => "shadowban",
            Self::Unshadowban => "unshadowban",
            Self::ForceLogout => "forceLogout",
            Self::ChangeNickname => "changeNickname",
            Self::ResetPfp => "resetPFP",
            Self::ClearAllChat => "clearAllChat",
            Self::ClearUserMessages => "clearUserMessages",
            Self::DeleteMessage => "deleteMessage",
            Self::DeleteRoom => "deleteRoom",
            Self::LockChat => "lockChat",
            Self::UnlockChat => "unlockChat",
            Self::SetSlowMode => "setSlowMode",
            Self::DisableSlowMode => "disableSlowMode",
            Self::GlobalAnnouncement => "globalAnnouncement",
            Self::SetAccentColor => "setAccentColor",
            Self::SetServerName => "setServerName",
            Self::SetServerLogo => "setServerLogo",
            Self::SetBackground => "setBackground",
            Self::ToggleMaintenance => "toggleMaintenance",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AdminError {
    #[error("Access denied. Not admin.")]
    AccessDenied,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What a committed mutation reports back to the caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionReceipt {
    pub action: AdminAction,
    pub notice: String,
    pub audit_key: String,
}

#[derive(Clone)]
pub struct AdminControl {
    docs: Arc<dyn DocumentStore>,
    moderation: ModerationStore,
    clock: Arc<dyn Clock>,
}

fn required<'a>(value: &'a str, what: &str) -> Result<&'a str, AdminError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(AdminError::InvalidInput(format!("{what} is required")));
    }
    Ok(value)
}

impl AdminControl {
    pub fn new(docs: Arc<dyn DocumentStore>, clock: Arc<dyn Clock>) -> Self {
        Self { moderation: ModerationStore::new(docs.clone()), docs, clock }
    }

    /// Resolves the acting admin. No identity, or one missing from the
    /// allow-list, is refused before anything is read or written on its behalf.
    pub async fn authorize<'a>(&self, actor: Option<&'a Identity>) -> Result<&'a Identity, AdminError> {
        let Some(actor) = actor else {
            return Err(AdminError::AccessDenied);
        };
        if !self.moderation.is_admin(&actor.key()).await? {
            tracing::warn!(actor = %actor.email, "admin access denied");
            return Err(AdminError::AccessDenied);
        }
        Ok(actor)
    }

    async fn commit(
        &self,
        actor: &Identity,
        action: AdminAction,
        details: Value,
        mut batch: WriteBatch,
        notice: String,
    ) -> Result<ActionReceipt, AdminError> {
        let audit_key = push_key();
        let entry = AuditLogEntry {
            actor: actor.email.clone(),
            action: action.as_str().to_string(),
            details,
            at: self.clock.now(),
        };
        batch.set_record(paths::child(paths::ADMIN_LOGS, &audit_key), &entry)?;

        if let Err(e) = self.docs.apply(batch).await {
            tracing::error!(actor = %actor.email, action = action.as_str(), error = %e, "admin action failed");
            return Err(e.into());
        }

        metrics::counter!("roomguard_admin_actions_total", "action" => action.as_str()).increment(1);
        tracing::info!(actor = %actor.email, action = action.as_str(), audit_key = %audit_key, "admin action applied");
        Ok(ActionReceipt { action, notice, audit_key })
    }

    // --- User management ---

    pub async fn ban(&self, actor: Option<&Identity>, email: &str) -> Result<ActionReceipt, AdminError> {
        let actor = self.authorize(actor).await?;
        let email = required(email, "email")?;
        let record = BanRecord { issued_by: actor.email.clone(), issued_at: self.clock.now() };
        let mut batch = WriteBatch::new();
        moderation::set_ban(&mut batch, &ModerationKey::from_identity(email), &record)?;
        self.commit(actor, AdminAction::Ban, json!({ "email": email }), batch, format!("Banned {email}")).await
    }

    pub async fn unban(&self, actor: Option<&Identity>, email: &str) -> Result<ActionReceipt, AdminError> {
        let actor = self.authorize(actor).await?;
        let email = required(email, "email")?;
        let mut batch = WriteBatch::new();
        moderation::clear_ban(&mut batch, &ModerationKey::from_identity(email));
        self.commit(actor, AdminAction::Unban, json!({ "email": email }), batch, format!("Unbanned {email}")).await
    }

    pub async fn mute(&self, actor: Option<&Identity>, email: &str) -> Result<ActionReceipt, AdminError> {
        let actor = self.authorize(actor).await?;
        let email = required(email, "email")?;
        let record = MuteRecord { issued_by: actor.email.clone(), issued_at: self.clock.now(), until: None };
        let mut batch = WriteBatch::new();
        moderation::set_mute(&mut batch, &ModerationKey::from_identity(email), &record)?;
        self.commit(actor, AdminAction::Mute, json!({ "email": email }), batch, format!("Muted {email}")).await
    }

    pub async fn unmute(&self, actor: Option<&Identity>, email: &str) -> Result<ActionReceipt, AdminError> {
        let actor = self.authorize(actor).await?;
        let email = required(email, "email")?;
        let mut batch = WriteBatch::new();
        moderation::clear_mute(&mut batch, &ModerationKey::from_identity(email));
        self.commit(actor, AdminAction::Unmute, json!({ "email": email }), batch, format!("Unmuted {email}")).await
    }

    /// Mutes for `duration` (one hour when `None`). The record stays after it
    /// expires; the send gate just stops counting it.
    pub async fn temp_mute(
        &self,
        actor: Option<&Identity>,
        email: &str,
        duration: Option<Duration>,
    ) -> Result<ActionReceipt, AdminError> {
        let actor = self.authorize(actor).await?;
        let email = required(email, "email")?;
        let duration = duration.unwrap_or_else(|| Duration::seconds(DEFAULT_TEMP_MUTE_SECS));
        if duration <= Duration::zero() {
            return Err(AdminError::InvalidInput("mute duration must be positive".into()));
        }
        let now = self.clock.now();
        let until = now
            .checked_add_signed(duration)
            .ok_or_else(|| AdminError::InvalidInput("mute duration is too long".into()))?;
        let record = MuteRecord { issued_by: actor.email.clone(), issued_at: now, until: Some(until) };
        let mut batch = WriteBatch::new();
        moderation::set_mute(&mut batch, &ModerationKey::from_identity(email), &record)?;

        let hours = duration.num_milliseconds() as f64 / 3_600_000.0;
        self.commit(
            actor,
            AdminAction::TempMute,
            json!({ "email": email, "hours": hours }),
            batch,
            format!("Temp-muted {email} for {hours} hour(s)"),
        )
        .await
    }

    pub async fn shadowban(&self, actor: Option<&Identity>, email: &str) -> Result<ActionReceipt, AdminError> {
        let actor = self.authorize(actor).await?;
        let email = required(email, "email")?;
        let record = ShadowbanRecord { issued_by: actor.email.clone(), issued_at: self.clock.now() };
        let mut batch = WriteBatch::new();
        moderation::set_shadowban(&mut batch, &ModerationKey::from_identity(email), &record)?;
        self.commit(actor, AdminAction::Shadowban, json!({ "email": email }), batch, format!("Shadowbanned {email}"))
            .await
    }

    pub async fn unshadowban(&self, actor: Option<&Identity>, email: &str) -> Result<ActionReceipt, AdminError> {
        let actor = self.authorize(actor).await?;
        let email = required(email, "email")?;
        let mut batch = WriteBatch::new();
        moderation::clear_shadowban(&mut batch, &ModerationKey::from_identity(email));
        self.commit(
            actor,
            AdminAction::Unshadowban,
            json!({ "email": email }),
            batch,
            format!("Unshadowbanned {email}"),
        )
        .await
    }

    pub async fn force_logout(&self, actor: Option<&Identity>, email: &str) -> Result<ActionReceipt, AdminError> {
        let actor = self.authorize(actor).await?;
        let email = required(email, "email")?;
        let mut batch = WriteBatch::new();
        moderation::set_force_logout(&mut batch, &ModerationKey::from_identity(email));
        self.commit(
            actor,
            AdminAction::ForceLogout,
            json!({ "email": email }),
            batch,
            format!("Force logout issued for {email}"),
        )
        .await
    }

    /// Sets the nickname of every profile whose `email` field equals `email`.
    pub async fn change_display_name(
        &self,
        actor: Option<&Identity>,
        email: &str,
        name: &str,
    ) -> Result<ActionReceipt, AdminError> {
        let actor = self.authorize(actor).await?;
        let email = required(email, "email")?;
        let name = required(name, "name")?;
        let mut batch = WriteBatch::new();
        for uid in self.profile_uids(email).await? {
            let mut fields = Map::new();
            fields.insert("nickname".into(), json!(name));
            batch.update(paths::user(&uid), fields);
        }
        self.commit(
            actor,
            AdminAction::ChangeNickname,
            json!({ "email": email, "newNick": name }),
            batch,
            format!("Nickname changed for {email}"),
        )
        .await
    }

    pub async fn reset_avatar(&self, actor: Option<&Identity>, email: &str) -> Result<ActionReceipt, AdminError> {
        let actor = self.authorize(actor).await?;
        let email = required(email, "email")?;
        let mut batch = WriteBatch::new();
        for uid in self.profile_uids(email).await? {
            let mut fields = Map::new();
            fields.insert("pfp".into(), Value::Null);
            batch.update(paths::user(&uid), fields);
        }
        self.commit(actor, AdminAction::ResetPfp, json!({ "email": email }), batch, format!("Reset PFP for {email}"))
            .await
    }

    async fn profile_uids(&self, email: &str) -> Result<Vec<String>, AdminError> {
        let matches = self.docs.query_eq(paths::USERS, "email", &json!(email)).await?;
        if matches.is_empty() {
            tracing::debug!(email = %email, "no profile matches email");
        }
        Ok(matches.into_iter().map(|(uid, _)| uid).collect())
    }

    // --- Chat management ---

    pub async fn clear_all_messages(&self, actor: Option<&Identity>, room: &str) -> Result<ActionReceipt, AdminError> {
        let actor = self.authorize(actor).await?;
        let room = paths::room_name(room);
        let mut batch = WriteBatch::new();
        batch.remove(paths::messages(&room));
        self.commit(actor, AdminAction::ClearAllChat, json!({ "room": room }), batch, format!("Cleared chat room {room}"))
            .await
    }

    /// Removes every message in `room` whose sender matches `email`, ignoring case.
    pub async fn clear_messages_by(
        &self,
        actor: Option<&Identity>,
        email: &str,
        room: &str,
    ) -> Result<ActionReceipt, AdminError> {
        let actor = self.authorize(actor).await?;
        let email = required(email, "email")?;
        let room = paths::room_name(room);
        let mut batch = WriteBatch::new();
        let mut removed = 0usize;
        for (key, message) in self.docs.children(&paths::messages(&room)).await? {
            let sender = message.get("user").and_then(Value::as_str).unwrap_or_default();
            if same_identity(sender, email) {
                batch.remove(paths::message(&room, &key));
                removed += 1;
            }
        }
        tracing::debug!(room = %room, email = %email, removed, "clearing user messages");
        self.commit(
            actor,
            AdminAction::ClearUserMessages,
            json!({ "email": email, "room": room }),
            batch,
            format!("Cleared messages for {email} in {room}"),
        )
        .await
    }

    pub async fn delete_message(
        &self,
        actor: Option<&Identity>,
        room: &str,
        msg_key: &str,
    ) -> Result<ActionReceipt, AdminError> {
        let actor = self.authorize(actor).await?;
        let room = paths::room_name(room);
        let msg_key = required(msg_key, "message key")?;
        let mut batch = WriteBatch::new();
        batch.remove(paths::message(&room, msg_key));
        self.commit(
            actor,
            AdminAction::DeleteMessage,
            json!({ "room": room, "msgKey": msg_key }),
            batch,
            format!("Deleted message {msg_key}"),
        )
        .await
    }

    pub async fn delete_room(&self, actor: Option<&Identity>, room: &str) -> Result<ActionReceipt, AdminError> {
        let actor = self.authorize(actor).await?;
        let room = paths::room_name(room);
        let mut batch = WriteBatch::new();
        batch.remove(paths::chatroom(&room));
        batch.remove(paths::room_meta(&room));
        self.commit(actor, AdminAction::DeleteRoom, json!({ "room": room }), batch, format!("Deleted room {room}")).await
    }

    pub async fn lock_room(&self, actor: Option<&Identity>, room: &str) -> Result<ActionReceipt, AdminError> {
        let actor = self.authorize(actor).await?;
        let room = paths::room_name(room);
        let mut batch = WriteBatch::new();
        moderation::set_locked(&mut batch, &room);
        self.commit(actor, AdminAction::LockChat, json!({ "room": room }), batch, format!("Locked chat {room}")).await
    }

    pub async fn unlock_room(&self, actor: Option<&Identity>, room: &str) -> Result<ActionReceipt, AdminError> {
        let actor = self.authorize(actor).await?;
        let room = paths::room_name(room);
        let mut batch = WriteBatch::new();
        moderation::clear_locked(&mut batch, &room);
        self.commit(actor, AdminAction::UnlockChat, json!({ "room": room }), batch, format!("Unlocked chat {room}"))
            .await
    }

    pub async fn set_slow_mode(
        &self,
        actor: Option<&Identity>,
        room: &str,
        seconds: u64,
    ) -> Result<ActionReceipt, AdminError> {
        let actor = self.authorize(actor).await?;
        if seconds == 0 {
            return Err(AdminError::InvalidInput("slow mode seconds must be greater than zero".into()));
        }
        let room = paths::room_name(room);
        let record = SlowModeRecord { seconds, issued_by: actor.email.clone(), issued_at: self.clock.now() };
        let mut batch = WriteBatch::new();
        moderation::set_slow_mode(&mut batch, &room, &record)?;
        self.commit(
            actor,
            AdminAction::SetSlowMode,
            json!({ "room": room, "seconds": seconds }),
            batch,
            format!("Set slow mode {seconds}s for {room}"),
        )
        .await
    }

    pub async fn clear_slow_mode(&self, actor: Option<&Identity>, room: &str) -> Result<ActionReceipt, AdminError> {
        let actor = self.authorize(actor).await?;
        let room = paths::room_name(room);
        let mut batch = WriteBatch::new();
        moderation::clear_slow_mode(&mut batch, &room);
        self.commit(
            actor,
            AdminAction::DisableSlowMode,
            json!({ "room": room }),
            batch,
            format!("Disabled slow mode for {room}"),
        )
        .await
    }

    pub async fn announce(&self, actor: Option<&Identity>, text: &str) -> Result<ActionReceipt, AdminError> {
        let actor = self.authorize(actor).await?;
        let text = required(text, "announcement text")?;
        let announcement = Announcement { text: text.to_string(), by: actor.email.clone(), at: self.clock.now() };
        let mut batch = WriteBatch::new();
        batch.set_record(paths::child(paths::ANNOUNCEMENTS, &push_key()), &announcement)?;
        self.commit(actor, AdminAction::GlobalAnnouncement, json!({ "text": text }), batch, "Announcement sent".into())
            .await
    }

    // --- Site customization ---

    pub async fn set_site_field(
        &self,
        actor: Option<&Identity>,
        field: SiteField,
        value: &str,
    ) -> Result<ActionReceipt, AdminError> {
        let actor = self.authorize(actor).await?;
        let value = value.trim();
        let (action, details, notice) = match field {
            SiteField::Accent => (AdminAction::SetAccentColor, json!({ "hex": value }), "Accent color set"),
            SiteField::Name => (AdminAction::SetServerName, json!({ "name": value }), "Server name set"),
            SiteField::Logo => (AdminAction::SetServerLogo, json!({ "url": value }), "Server logo set"),
            SiteField::Background => (AdminAction::SetBackground, json!({ "url": value }), "Background set"),
        };
        let mut batch = WriteBatch::new();
        batch.set(paths::site_field(field.segment()), json!(value));
        self.commit(actor, action, details, batch, notice.to_string()).await
    }

    pub async fn set_maintenance(
        &self,
        actor: Option<&Identity>,
        on: bool,
        message: Option<&str>,
    ) -> Result<ActionReceipt, AdminError> {
        let actor = self.authorize(actor).await?;
        let maintenance = Maintenance { on, msg: message.unwrap_or_default().to_string() };
        let mut batch = WriteBatch::new();
        batch.set_record(paths::MAINTENANCE, &maintenance)?;
        self.commit(
            actor,
            AdminAction::ToggleMaintenance,
            json!({ "mode": on, "message": message }),
            batch,
            format!("Maintenance mode set to {on}"),
        )
        .await
    }

    // --- Views ---

    pub async fn list_users(&self, actor: Option<&Identity>) -> Result<Vec<Keyed<UserProfile>>, AdminError> {
        self.authorize(actor).await?;
        self.profiles().await
    }

    pub async fn list_online(&self, actor: Option<&Identity>) -> Result<Vec<Keyed<UserProfile>>, AdminError> {
        self.authorize(actor).await?;
        let mut users = self.profiles().await?;
        users.retain(|user| user.record.is_online());
        Ok(users)
    }

    pub async fn list_banned(&self, actor: Option<&Identity>) -> Result<Vec<Keyed<Stored<BanRecord>>>, AdminError> {
        self.authorize(actor).await?;
        let banned = self.moderation.banned().await?;
        Ok(banned.into_iter().map(|(key, record)| Keyed::new(key, record)).collect())
    }

    pub async fn list_muted(&self, actor: Option<&Identity>) -> Result<Vec<Keyed<Stored<MuteRecord>>>, AdminError> {
        self.authorize(actor).await?;
        let muted = self.moderation.muted().await?;
        Ok(muted.into_iter().map(|(key, record)| Keyed::new(key, record)).collect())
    }

    pub async fn list_reports(&self, actor: Option<&Identity>) -> Result<Vec<Keyed<Value>>, AdminError> {
        self.authorize(actor).await?;
        let reports = self.docs.children(paths::REPORTS).await?;
        Ok(reports.into_iter().map(|(key, record)| Keyed::new(key, record)).collect())
    }

    /// The `limit` most recent audit entries, newest first.
    pub async fn audit_log(
        &self,
        actor: Option<&Identity>,
        limit: usize,
    ) -> Result<Vec<Keyed<AuditLogEntry>>, AdminError> {
        self.authorize(actor).await?;
        let mut entries = self
            .docs
            .limit_to_last(paths::ADMIN_LOGS, limit)
            .await?
            .into_iter()
            .map(|(key, value)| {
                let entry = decode(&paths::child(paths::ADMIN_LOGS, &key), value)?;
                Ok(Keyed::new(key, entry))
            })
            .collect::<Result<Vec<_>, StoreError>>()?;
        entries.reverse();
        Ok(entries)
    }

    async fn profiles(&self) -> Result<Vec<Keyed<UserProfile>>, AdminError> {
        let mut profiles = Vec::new();
        for (uid, value) in self.docs.children(paths::USERS).await? {
            match decode::<UserProfile>(&paths::user(&uid), value) {
                Ok(profile) => profiles.push(Keyed::new(uid, profile)),
                Err(e) => tracing::warn!(uid = %uid, error = %e, "skipping unreadable profile"),
            }
        }
        Ok(profiles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryStore;
    use chrono::DateTime;

    struct Fixture {
        docs: Arc<MemoryStore>,
        clock: Arc<ManualClock>,
        admin: AdminControl,
        ops: Identity,
    }

    async fn fixture() -> Fixture {
        let docs = Arc::new(MemoryStore::new());
        docs.set("admins/ops@x_com", json!(true)).await.unwrap();
        let clock = Arc::new(ManualClock::new(DateTime::from_timestamp_millis(1_700_000_000_000).unwrap()));
        let admin = AdminControl::new(docs.clone(), clock.clone());
        Fixture { docs, clock, admin, ops: Identity::new("ops@x.com", "admin-uid") }
    }

    async fn audit_entries(docs: &MemoryStore) -> Vec<Value> {
        docs.children("admin_logs").await.unwrap().into_iter().map(|(_, v)| v).collect()
    }

    #[tokio::test]
    async fn non_admin_is_refused_without_side_effects() {
        let f = fixture().await;
        let mallory = Identity::new("m@x.com", "u6");

        assert!(matches!(f.admin.ban(Some(&mallory), "a@x.com").await, Err(AdminError::AccessDenied)));
        assert!(matches!(f.admin.ban(None, "a@x.com").await, Err(AdminError::AccessDenied)));
        assert!(f.docs.get("banned").await.unwrap().is_none());
        assert!(audit_entries(&f.docs).await.is_empty());
    }

    #[tokio::test]
    async fn ban_writes_record_and_one_audit_entry() {
        let f = fixture().await;
        let receipt = f.admin.ban(Some(&f.ops), "a.b@x.com").await.unwrap();

        assert_eq!(receipt.notice, "Banned a.b@x.com");
        let ban = f.docs.get("banned/a_b@x_com").await.unwrap().unwrap();
        assert_eq!(ban, json!({ "by": "ops@x.com", "ts": 1_700_000_000_000i64 }));

        let audit = audit_entries(&f.docs).await;
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0]["action"], "ban");
        assert_eq!(audit[0]["details"], json!({ "email": "a.b@x.com" }));
        assert!(f.docs.get(&format!("admin_logs/{}", receipt.audit_key)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn unban_is_idempotent_and_reban_refreshes_timestamp() {
        let f = fixture().await;
        f.admin.unban(Some(&f.ops), "a@x.com").await.unwrap();

        f.admin.ban(Some(&f.ops), "a@x.com").await.unwrap();
        f.clock.advance(Duration::seconds(60));
        f.admin.ban(Some(&f.ops), "a@x.com").await.unwrap();

        let ban = f.docs.get("banned/a@x_com").await.unwrap().unwrap();
        assert_eq!(ban["ts"], 1_700_000_060_000i64);
        assert_eq!(audit_entries(&f.docs).await.len(), 3);
    }

    #[tokio::test]
    async fn temp_mute_past_the_calendar_is_rejected() {
        let f = fixture().await;
        let err = f.admin.temp_mute(Some(&f.ops), "a@x.com", Some(Duration::days(365 * 1_000_000))).await.unwrap_err();

        assert!(matches!(err, AdminError::InvalidInput(_)));
        assert!(f.docs.get("muted/a@x_com").await.unwrap().is_none());
        assert!(audit_entries(&f.docs).await.is_empty());
    }

    #[tokio::test]
    async fn temp_mute_defaults_to_one_hour() {
        let f = fixture().await;
        let receipt = f.admin.temp_mute(Some(&f.ops), "a@x.com", None).await.unwrap();

        assert_eq!(receipt.notice, "Temp-muted a@x.com for 1 hour(s)");
        let mute = f.docs.get("muted/a@x_com").await.unwrap().unwrap();
        assert_eq!(mute["until"], 1_700_000_000_000i64 + 3_600_000);
        assert_eq!(audit_entries(&f.docs).await[0]["action"], "tempMute");
    }

    #[tokio::test]
    async fn slow_mode_requires_positive_seconds() {
        let f = fixture().await;
        assert!(matches!(
            f.admin.set_slow_mode(Some(&f.ops), "global", 0).await,
            Err(AdminError::InvalidInput(_))
        ));
        assert!(audit_entries(&f.docs).await.is_empty());

        f.admin.set_slow_mode(Some(&f.ops), "", 30).await.unwrap();
        assert_eq!(f.docs.get("slowmode/global").await.unwrap().unwrap()["seconds"], 30);
    }

    #[tokio::test]
    async fn nickname_and_avatar_apply_to_matching_profiles() {
        let f = fixture().await;
        f.docs.set("users/u1", json!({ "email": "a@x.com", "pfp": "http://img" })).await.unwrap();
        f.docs.set("users/u2", json!({ "email": "b@x.com", "pfp": "http://img2" })).await.unwrap();

        f.admin.change_display_name(Some(&f.ops), "a@x.com", "Renamed").await.unwrap();
        f.admin.reset_avatar(Some(&f.ops), "a@x.com").await.unwrap();

        let u1 = f.docs.get("users/u1").await.unwrap().unwrap();
        assert_eq!(u1, json!({ "email": "a@x.com", "nickname": "Renamed" }));
        assert_eq!(f.docs.get("users/u2/pfp").await.unwrap().unwrap(), "http://img2");
        let actions: Vec<_> = audit_entries(&f.docs).await.iter().map(|e| e["action"].clone()).collect();
        assert!(actions.contains(&json!("changeNickname")));
        assert!(actions.contains(&json!("resetPFP")));
    }

    #[tokio::test]
    async fn clear_messages_by_matches_sender_case_insensitively() {
        let f = fixture().await;
        f.docs.set("chatrooms/global/messages/k1", json!({ "user": "A@x.com", "msg": "1" })).await.unwrap();
        f.docs.set("chatrooms/global/messages/k2", json!({ "user": "b@x.com", "msg": "2" })).await.unwrap();
        f.docs.set("chatrooms/global/messages/k3", json!({ "user": "a@x.com", "msg": "3" })).await.unwrap();

        f.admin.clear_messages_by(Some(&f.ops), "a@x.com", "global").await.unwrap();

        let left: Vec<String> = f.docs.children("chatrooms/global/messages").await.unwrap().into_iter().map(|(k, _)| k).collect();
        assert_eq!(left, vec!["k2".to_string()]);
    }

    #[tokio::test]
    async fn clear_messages_by_folds_non_ascii_case() {
        let f = fixture().await;
        f.docs.set("chatrooms/global/messages/k1", json!({ "user": "ÉLODIE@x.com", "msg": "1" })).await.unwrap();
        f.docs.set("chatrooms/global/messages/k2", json!({ "user": "elodie@x.com", "msg": "2" })).await.unwrap();

        f.admin.clear_messages_by(Some(&f.ops), "élodie@x.com", "global").await.unwrap();

        let left: Vec<String> = f.docs.children("chatrooms/global/messages").await.unwrap().into_iter().map(|(k, _)| k).collect();
        assert_eq!(left, vec!["k2".to_string()]);
    }

    #[tokio::test]
    async fn delete_room_removes_messages_and_metadata() {
        let f = fixture().await;
        f.docs.set("chatrooms/lobby/messages/k1", json!({ "msg": "x" })).await.unwrap();
        f.docs.set("rooms/lobby", json!({ "title": "Lobby" })).await.unwrap();

        f.admin.delete_room(Some(&f.ops), "lobby").await.unwrap();

        assert!(f.docs.get("chatrooms/lobby").await.unwrap().is_none());
        assert!(f.docs.get("rooms/lobby").await.unwrap().is_none());
        assert_eq!(audit_entries(&f.docs).await[0]["details"], json!({ "room": "lobby" }));
    }

    #[tokio::test]
    async fn site_fields_and_maintenance() {
        let f = fixture().await;
        let receipt = f.admin.set_site_field(Some(&f.ops), SiteField::Accent, "#ff0066").await.unwrap();
        assert_eq!(receipt.action, AdminAction::SetAccentColor);
        f.admin.set_maintenance(Some(&f.ops), true, Some("upgrading")).await.unwrap();

        assert_eq!(f.docs.get("siteCustom/accent").await.unwrap().unwrap(), "#ff0066");
        assert_eq!(f.docs.get("maintenance").await.unwrap().unwrap(), json!({ "on": true, "msg": "upgrading" }));
    }

    #[tokio::test]
    async fn views_require_admin() {
        let f = fixture().await;
        f.docs.set("users/u1", json!({ "email": "a@x.com", "presence": { "online": true } })).await.unwrap();
        f.docs.set("users/u2", json!({ "email": "b@x.com" })).await.unwrap();

        assert!(matches!(f.admin.list_users(None).await, Err(AdminError::AccessDenied)));
        assert_eq!(f.admin.list_users(Some(&f.ops)).await.unwrap().len(), 2);
        let online = f.admin.list_online(Some(&f.ops)).await.unwrap();
        assert_eq!(online.len(), 1);
        assert_eq!(online[0].key, "u1");
    }

    #[tokio::test]
    async fn audit_log_is_newest_first() {
        let f = fixture().await;
        f.admin.lock_room(Some(&f.ops), "global").await.unwrap();
        f.admin.unlock_room(Some(&f.ops), "global").await.unwrap();

        let log = f.admin.audit_log(Some(&f.ops), 10).await.unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].record.action, "unlockChat");
        assert_eq!(log[1].record.action, "lockChat");
    }

    #[test]
    fn action_names_serialize_like_audit_entries() {
        assert_eq!(serde_json::to_value(AdminAction::ResetPfp).unwrap(), json!("resetPFP"));
        assert_eq!(serde_json::to_value(AdminAction::GlobalAnnouncement).unwrap(), json!("globalAnnouncement"));
        assert_eq!(AdminAction::DisableSlowMode.as_str(), "disableSlowMode");
    }
}
