use std::fmt;

use serde::{Deserialize, Serialize};

use roomguard_shared::types::auth::AuthUser;

/// Characters that cannot appear in a store path segment.
const PATH_DELIMITERS: [char; 6] = ['.', '/', '#', '$', '[', ']'];

/// Normalized, storage-safe form of an identity string.
///
/// Every moderation record (bans, mutes, the admin allow-list, ...) is keyed
/// by this value. Changing the normalization orphans every existing record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModerationKey(String);

impl ModerationKey {
    pub fn from_identity(identity: &str) -> Self {
        let key = fold(identity)
            .chars()
            .map(|c| if PATH_DELIMITERS.contains(&c) { '_' } else { c })
            .collect();
        Self(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModerationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An authenticated principal: an email-like identifier plus the auth
/// provider's opaque user id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub email: String,
    pub uid: String,
}

impl Identity {
    pub fn new(email: impl Into<String>, uid: impl Into<String>) -> Self {
        Self { email: email.into(), uid: uid.into() }
    }

    pub fn key(&self) -> ModerationKey {
        ModerationKey::from_identity(&self.email)
    }

    /// Case-insensitive match against another identity string.
    pub fn same_person(&self, email: &str) -> bool {
        same_identity(&self.email, email)
    }
}

/// Whether two identity strings name the same person: equal after trimming
/// and Unicode lowercasing, the same folding the moderation key applies.
pub fn same_identity(a: &str, b: &str) -> bool {
    fold(a) == fold(b)
}

fn fold(identity: &str) -> String {
    identity.trim().to_lowercase()
}

impl From<AuthUser> for Identity {
    fn from(user: AuthUser) -> Self {
        Self { email: user.email, uid: user.uid }
    }
}
