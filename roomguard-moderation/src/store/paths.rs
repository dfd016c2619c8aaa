//! Storage schema. Every path the service reads or writes is built here.

use crate::identity::ModerationKey;

pub const DEFAULT_ROOM: &str = "global";

pub const ADMINS: &str = "admins";
pub const BANNED: &str = "banned";
pub const MUTED: &str = "muted";
pub const SHADOWBANNED: &str = "shadowbanned";
pub const FORCE_LOGOUT: &str = "force_logout";
pub const LOCKED: &str = "locked";
pub const SLOWMODE: &str = "slowmode";
pub const CHATROOMS: &str = "chatrooms";
pub const ROOMS: &str = "rooms";
pub const USERS: &str = "users";
pub const REPORTS: &str = "reports";
pub const ADMIN_LOGS: &str = "admin_logs";
pub const ADMIN_COMMANDS: &str = "admin_commands";
pub const ANNOUNCEMENTS: &str = "global_announcements";
pub const SITE_CUSTOM: &str = "siteCustom";
pub const MAINTENANCE: &str = "maintenance";

/// Canonical room segment: trimmed, delimiter-free, `global` when empty.
pub fn room_name(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return DEFAULT_ROOM.to_string();
    }
    trimmed
        .chars()
        .map(|c| if matches!(c, '.' | '/' | '#' | '$' | '[' | ']') { '_' } else { c })
        .collect()
}

/// Strips leading, trailing and doubled separators.
pub fn normalize(path: &str) -> String {
    segments(path).collect::<Vec<_>>().join("/")
}

pub fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

pub fn child(parent: &str, key: &str) -> String {
    let parent = normalize(parent);
    if parent.is_empty() {
        key.to_string()
    } else {
        format!("{parent}/{key}")
    }
}

/// `("a/b", "c")` for `"a/b/c"`; `("", "a")` for a top-level path.
pub fn split_last(path: &str) -> Option<(String, &str)> {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        return None;
    }
    match trimmed.rsplit_once('/') {
        Some((parent, last)) => Some((normalize(parent), last)),
        None => Some((String::new(), trimmed)),
    }
}

pub fn admin(key: &ModerationKey) -> String {
    child(ADMINS, key.as_str())
}

pub fn banned(key: &ModerationKey) -> String {
    child(BANNED, key.as_str())
}

pub fn muted(key: &ModerationKey) -> String {
    child(MUTED, key.as_str())
}

pub fn shadowbanned(key: &ModerationKey) -> String {
    child(SHADOWBANNED, key.as_str())
}

pub fn force_logout(key: &ModerationKey) -> String {
    child(FORCE_LOGOUT, key.as_str())
}

pub fn locked(room: &str) -> String {
    child(LOCKED, room)
}

pub fn slowmode(room: &str) -> String {
    child(SLOWMODE, room)
}

pub fn chatroom(room: &str) -> String {
    child(CHATROOMS, room)
}

pub fn messages(room: &str) -> String {
    format!("{CHATROOMS}/{room}/messages")
}

pub fn message(room: &str, key: &str) -> String {
    format!("{CHATROOMS}/{room}/messages/{key}")
}

pub fn room_meta(room: &str) -> String {
    child(ROOMS, room)
}

pub fn user(uid: &str) -> String {
    child(USERS, uid)
}

pub fn admin_command(key: &str) -> String {
    child(ADMIN_COMMANDS, key)
}

pub fn site_field(segment: &str) -> String {
    child(SITE_CUSTOM, segment)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_room_is_global() {
        assert_eq!(room_name(""), "global");
        assert_eq!(room_name("   "), "global");
        assert_eq!(room_name("lobby"), "lobby");
        assert_eq!(room_name("a.b/c"), "a_b_c");
    }

    #[test]
    fn split_last_handles_top_level() {
        assert_eq!(split_last("maintenance"), Some((String::new(), "maintenance")));
        assert_eq!(split_last("/chatrooms/global/messages/k1"), Some(("chatrooms/global/messages".to_string(), "k1")));
        assert_eq!(split_last("/"), None);
    }

    #[test]
    fn record_paths() {
        let key = ModerationKey::from_identity("a.b@x.com");
        assert_eq!(banned(&key), "banned/a_b@x_com");
        assert_eq!(message("global", "k1"), "chatrooms/global/messages/k1");
        assert_eq!(child("", "maintenance"), "maintenance");
    }
}
