use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// Field names follow the storage schema; timestamps are epoch milliseconds on the wire.

// --- Moderation records ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BanRecord {
    #[serde(rename = "by")]
    pub issued_by: String,
    #[serde(rename = "ts", with = "chrono::serde::ts_milliseconds")]
    pub issued_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MuteRecord {
    #[serde(rename = "by")]
    pub issued_by: String,
    #[serde(rename = "ts", with = "chrono::serde::ts_milliseconds")]
    pub issued_at: DateTime<Utc>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "chrono::serde::ts_milliseconds_option"
    )]
    pub until: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShadowbanRecord {
    #[serde(rename = "by")]
    pub issued_by: String,
    #[serde(rename = "ts", with = "chrono::serde::ts_milliseconds")]
    pub issued_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlowModeRecord {
    #[serde(default)]
    pub seconds: u64,
    #[serde(rename = "by")]
    pub issued_by: String,
    #[serde(rename = "ts", with = "chrono::serde::ts_milliseconds")]
    pub issued_at: DateTime<Utc>,
}

// --- Chat ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "user")]
    pub sender: String,
    #[serde(rename = "uid")]
    pub sender_uid: String,
    #[serde(rename = "msg")]
    pub body: String,
    #[serde(rename = "time", with = "chrono::serde::ts_milliseconds")]
    pub sent_at: DateTime<Utc>,
    #[serde(rename = "nickname", default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(rename = "pfp", default)]
    pub avatar_url: String,
}

/// A message together with its push key inside `chatrooms/{room}/messages`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageEntry {
    pub key: String,
    #[serde(flatten)]
    pub message: Message,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Presence {
    #[serde(default)]
    pub online: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pfp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence: Option<Presence>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl UserProfile {
    /// Name shown next to messages: nickname first, then the account name.
    pub fn display_name(&self) -> Option<String> {
        self.nickname.clone().or_else(|| self.name.clone())
    }

    pub fn is_online(&self) -> bool {
        self.presence.as_ref().is_some_and(|p| p.online)
    }
}

// --- Admin ---

/// A record together with the last segment of its path.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Keyed<T> {
    pub key: String,
    pub record: T,
}

impl<T> Keyed<T> {
    pub fn new(key: impl Into<String>, record: T) -> Self {
        Self { key: key.into(), record }
    }
}

/// A stored record that either has the current shape or predates it
/// (`banned/{key} = true` from older clients). Legacy values still count as
/// sanctions and are listed as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Stored<T> {
    Typed(T),
    Legacy(serde_json::Value),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    #[serde(rename = "by")]
    pub actor: String,
    pub action: String,
    #[serde(default)]
    pub details: serde_json::Value,
    #[serde(rename = "ts", with = "chrono::serde::ts_milliseconds")]
    pub at: DateTime<Utc>,
}

/// Raw queue item under `admin_commands`. Decoded into a typed command by the relay.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdminCommand {
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default)]
    pub processed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Announcement {
    pub text: String,
    pub by: String,
    #[serde(rename = "ts", with = "chrono::serde::ts_milliseconds")]
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Maintenance {
    #[serde(default)]
    pub on: bool,
    #[serde(default)]
    pub msg: String,
}

/// Site customization fields under `siteCustom`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SiteField {
    Accent,
    Name,
    Logo,
    Background,
}

impl SiteField {
    pub fn segment(&self) -> &'static str {
        match self {
            Self::Accent => "accent",
            Self::Name => "name",
            Self::Logo => "logo",
            Self::Background => "background",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SiteSettings {
    #[serde(default)]
    pub accent: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub logo: Option<String>,
    #[serde(default)]
    pub background: Option<String>,
    #[serde(default)]
    pub maintenance: Maintenance,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_uses_storage_field_names() {
        let json = serde_json::json!({
            "user": "a@x.com",
            "uid": "u1",
            "msg": "hello",
            "time": 1_700_000_000_000i64,
            "nickname": "Al",
            "pfp": ""
        });
        let message: Message = serde_json::from_value(json.clone()).unwrap();
        assert_eq!(message.sender, "a@x.com");
        assert_eq!(message.display_name.as_deref(), Some("Al"));
        assert_eq!(serde_json::to_value(&message).unwrap(), json);
    }

    #[test]
    fn stored_falls_back_to_legacy_shape() {
        let typed: Stored<BanRecord> = serde_json::from_value(serde_json::json!({ "by": "ops", "ts": 5 })).unwrap();
        assert!(matches!(typed, Stored::Typed(BanRecord { ref issued_by, .. }) if issued_by == "ops"));

        let legacy: Stored<BanRecord> = serde_json::from_value(serde_json::json!(true)).unwrap();
        assert_eq!(legacy, Stored::Legacy(serde_json::json!(true)));
        assert_eq!(serde_json::to_value(&legacy).unwrap(), serde_json::json!(true));
    }

    #[test]
    fn profile_keeps_unknown_fields() {
        let json = serde_json::json!({ "email": "a@x.com", "presence": { "online": true }, "bio": "hi" });
        let profile: UserProfile = serde_json::from_value(json).unwrap();
        assert!(profile.is_online());
        assert_eq!(profile.extra["bio"], "hi");
    }

    #[test]
    fn display_name_falls_back_to_name() {
        let profile = UserProfile { name: Some("Alice".into()), ..Default::default() };
        assert_eq!(profile.display_name().as_deref(), Some("Alice"));
    }
}
