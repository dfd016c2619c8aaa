use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use chrono::Duration;
use serde_json::Value;

use crate::clock::Clock;
use crate::display::DisplayFilter;
use crate::gate::{Denial, SendDecision, SendGate};
use crate::identity::Identity;
use crate::markers::{Claim, SendMarkers};
use crate::models::{Announcement, Message, MessageEntry, SiteSettings, UserProfile};
use crate::moderation::ModerationStore;
use crate::store::{
    decode, get_record, paths, push_key, ChildAdded, DocumentStore, StoreError, StoreResult, WriteBatch,
};

/// Messages replayed when a viewer opens a room.
pub const REPLAY_LIMIT: usize = 200;

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("message is empty")]
    EmptyMessage,

    #[error("{}", .0.notice())]
    Denied(Denial),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Posting and reading chat messages, with moderation applied on both sides.
#[derive(Clone)]
pub struct ChatService {
    docs: Arc<dyn DocumentStore>,
    moderation: ModerationStore,
    gate: SendGate,
    display: DisplayFilter,
    markers: Arc<dyn SendMarkers>,
    clock: Arc<dyn Clock>,
}

impl ChatService {
    pub fn new(docs: Arc<dyn DocumentStore>, markers: Arc<dyn SendMarkers>, clock: Arc<dyn Clock>) -> Self {
        let moderation = ModerationStore::new(docs.clone());
        Self {
            gate: SendGate::new(moderation.clone(), markers.clone(), clock.clone()),
            display: DisplayFilter::new(moderation.clone()),
            docs,
            moderation,
            markers,
            clock,
        }
    }

    pub fn gate(&self) -> &SendGate {
        &self.gate
    }

    pub fn display(&self) -> &DisplayFilter {
        &self.display
    }

    pub async fn send_message(&self, identity: &Identity, room: &str, body: &str) -> Result<MessageEntry, SendError> {
        if body.trim().is_empty() {
            return Err(SendError::EmptyMessage);
        }
        let room = paths::room_name(room);

        if let SendDecision::Denied(denial) = self.gate.can_send(identity, &room).await? {
            return Err(SendError::Denied(denial));
        }

        let profile = self.profile(&identity.uid).await?;

        // The gate's slow-mode check is advisory; the claim is what actually
        // serializes two sends racing for the same marker.
        let key = identity.key();
        let now = self.clock.now();
        let interval = self.moderation.slow_mode_interval(&room).await?;
        let previous = match self
            .markers
            .claim(&key, &room, now, interval.unwrap_or_else(Duration::zero))
            .await?
        {
            Claim::Claimed { previous } => previous,
            Claim::Refused { last } => match interval {
                Some(interval) => {
                    let wait_ms = (interval - (now - last)).num_milliseconds().max(0);
                    let denial = Denial::SlowMode { wait_ms };
                    metrics::counter!("roomguard_send_denied_total", "reason" => denial.reason()).increment(1);
                    return Err(SendError::Denied(denial));
                }
                // Marker from the future and no slow mode: nothing to enforce.
                None => Some(last),
            },
        };

        let message = Message {
            sender: identity.email.clone(),
            sender_uid: identity.uid.clone(),
            body: body.to_string(),
            sent_at: now,
            display_name: profile.display_name(),
            avatar_url: profile.pfp.clone().unwrap_or_default(),
        };
        let msg_key = push_key();
        let mut batch = WriteBatch::new();
        batch.set_record(paths::message(&room, &msg_key), &message)?;

        if let Err(e) = self.docs.apply(batch).await {
            if let Err(restore_err) = self.markers.restore(&key, &room, previous).await {
                tracing::error!(error = %restore_err, user = %identity.email, room = %room, "failed to restore slow-mode marker");
            }
            return Err(SendError::Store(e));
        }

        tracing::debug!(room = %room, key = %msg_key, user = %identity.email, "message sent");
        Ok(MessageEntry { key: msg_key, message })
    }

    /// The last `limit` messages of `room` that `viewer` may see, oldest first.
    pub async fn history(&self, room: &str, viewer: Option<&Identity>, limit: usize) -> StoreResult<Vec<MessageEntry>> {
        let room = paths::room_name(room);
        let raw = self.docs.limit_to_last(&paths::messages(&room), limit).await?;
        let mut visible = Vec::with_capacity(raw.len());
        for (key, value) in raw {
            if let Some(entry) = self.visible_entry(&room, key, value, viewer).await? {
                visible.push(entry);
            }
        }
        Ok(visible)
    }

    /// Replays recent history, then follows new messages as they are added.
    pub async fn watch_room(&self, room: &str, viewer: Option<Identity>) -> StoreResult<RoomFeed> {
        let room = paths::room_name(room);
        // Subscribe before reading history so nothing posted in between is lost.
        let live = ChildAdded::new(self.docs.as_ref(), &paths::messages(&room));
        let replay: VecDeque<MessageEntry> = self.history(&room, viewer.as_ref(), REPLAY_LIMIT).await?.into();
        let seen = self
            .docs
            .limit_to_last(&paths::messages(&room), REPLAY_LIMIT)
            .await?
            .into_iter()
            .map(|(key, _)| key)
            .collect();
        Ok(RoomFeed {
            chat: self.clone(),
            room,
            viewer,
            replay,
            seen,
            live,
        })
    }

    pub async fn site_settings(&self) -> StoreResult<SiteSettings> {
        let mut settings: SiteSettings = get_record(self.docs.as_ref(), paths::SITE_CUSTOM)
            .await?
            .unwrap_or_default();
        settings.maintenance = get_record(self.docs.as_ref(), paths::MAINTENANCE).await?.unwrap_or_default();
        Ok(settings)
    }

    /// Most recent announcements, oldest first.
    pub async fn announcements(&self, limit: usize) -> StoreResult<Vec<Announcement>> {
        self.docs
            .limit_to_last(paths::ANNOUNCEMENTS, limit)
            .await?
            .into_iter()
            .map(|(key, value)| decode(&paths::child(paths::ANNOUNCEMENTS, &key), value))
            .collect()
    }

    async fn profile(&self, uid: &str) -> StoreResult<UserProfile> {
        match get_record::<UserProfile>(self.docs.as_ref(), &paths::user(uid)).await {
            Ok(profile) => Ok(profile.unwrap_or_default()),
            Err(StoreError::Serialization { path, source }) => {
                tracing::warn!(path = %path, error = %source, "unreadable profile, sending without it");
                Ok(UserProfile::default())
            }
            Err(e) => Err(e),
        }
    }

    async fn visible_entry(
        &self,
        room: &str,
        key: String,
        value: Value,
        viewer: Option<&Identity>,
    ) -> StoreResult<Option<MessageEntry>> {
        let message: Message = match decode(&paths::message(room, &key), value) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(room = %room, key = %key, error = %e, "skipping malformed message");
                return Ok(None);
            }
        };
        if !self.display.should_show(&message, viewer).await? {
            return Ok(None);
        }
        Ok(Some(MessageEntry { key, message }))
    }
}

/// Live view of one room for one viewer.
pub struct RoomFeed {
    chat: ChatService,
    room: String,
    viewer: Option<Identity>,
    replay: VecDeque<MessageEntry>,
    seen: HashSet<String>,
    live: ChildAdded,
}

impl RoomFeed {
    pub fn room(&self) -> &str {
        &self.room
    }

    /// Next visible message. `Ok(None)` once the store's change feed closes.
    pub async fn next(&mut self) -> StoreResult<Option<MessageEntry>> {
        if let Some(entry) = self.replay.pop_front() {
            return Ok(Some(entry));
        }
        while let Some((key, value)) = self.live.next().await {
            if !self.seen.insert(key.clone()) {
                continue;
            }
            if let Some(entry) = self.chat.visible_entry(&self.room, key, value, self.viewer.as_ref()).await? {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::markers::{DeviceMarkers, MemoryKeyValue};
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use chrono::DateTime;
    use serde_json::json;
    use tokio::sync::broadcast;

    struct Fixture {
        docs: Arc<MemoryStore>,
        markers: Arc<DeviceMarkers>,
        clock: Arc<ManualClock>,
        chat: ChatService,
    }

    fn fixture() -> Fixture {
        let docs = Arc::new(MemoryStore::new());
        let markers = Arc::new(DeviceMarkers::new(Arc::new(MemoryKeyValue::new())));
        let clock = Arc::new(ManualClock::new(DateTime::from_timestamp_millis(1_700_000_000_000).unwrap()));
        let chat = ChatService::new(docs.clone(), markers.clone(), clock.clone());
        Fixture { docs, markers, clock, chat }
    }

    fn alice() -> Identity {
        Identity::new("a@x.com", "u1")
    }

    #[tokio::test]
    async fn send_appends_with_profile_fields() {
        let f = fixture();
        f.docs.set("users/u1", json!({ "email": "a@x.com", "name": "Alice", "pfp": "http://img/a" })).await.unwrap();

        let entry = f.chat.send_message(&alice(), "", "hello").await.unwrap();

        let stored = f.docs.get(&paths::message("global", &entry.key)).await.unwrap().unwrap();
        assert_eq!(stored["msg"], "hello");
        assert_eq!(stored["nickname"], "Alice");
        assert_eq!(stored["pfp"], "http://img/a");
        assert_eq!(stored["time"], 1_700_000_000_000i64);
    }

    #[tokio::test]
    async fn empty_body_is_rejected_without_write() {
        let f = fixture();
        assert!(matches!(f.chat.send_message(&alice(), "global", "   ").await, Err(SendError::EmptyMessage)));
        assert!(f.docs.get("chatrooms").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn denied_send_writes_nothing() {
        let f = fixture();
        f.docs.set("locked/global", json!(true)).await.unwrap();

        let err = f.chat.send_message(&alice(), "global", "hi").await.unwrap_err();
        assert!(matches!(err, SendError::Denied(Denial::Locked)));
        assert!(f.docs.get("chatrooms/global").await.unwrap().is_none());
        assert!(f.markers.last_send(&alice().key(), "global").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn slow_mode_spaces_sends() {
        let f = fixture();
        f.docs.set("slowmode/global", json!({ "seconds": 30, "by": "ops", "ts": 0 })).await.unwrap();

        f.chat.send_message(&alice(), "global", "one").await.unwrap();
        f.clock.advance(Duration::seconds(5));
        let err = f.chat.send_message(&alice(), "global", "two").await.unwrap_err();
        assert!(matches!(err, SendError::Denied(Denial::SlowMode { wait_ms: 25_000 })));

        f.clock.advance(Duration::seconds(25));
        f.chat.send_message(&alice(), "global", "three").await.unwrap();
    }

    #[tokio::test]
    async fn history_hides_shadowbanned_from_others() {
        let f = fixture();
        let spammer = Identity::new("s@x.com", "u9");
        f.chat.send_message(&alice(), "global", "hi").await.unwrap();
        f.chat.send_message(&spammer, "global", "buy now").await.unwrap();
        f.docs.set("shadowbanned/s@x_com", json!({ "by": "ops", "ts": 0 })).await.unwrap();

        let for_alice = f.chat.history("global", Some(&alice()), 200).await.unwrap();
        assert_eq!(for_alice.len(), 1);
        let for_spammer = f.chat.history("global", Some(&spammer), 200).await.unwrap();
        assert_eq!(for_spammer.len(), 2);
    }

    #[tokio::test]
    async fn room_feed_replays_then_follows_without_duplicates() {
        let f = fixture();
        f.chat.send_message(&alice(), "global", "old").await.unwrap();

        let mut feed = f.chat.watch_room("global", None).await.unwrap();
        f.chat.send_message(&alice(), "global", "new").await.unwrap();

        assert_eq!(feed.next().await.unwrap().unwrap().message.body, "old");
        assert_eq!(feed.next().await.unwrap().unwrap().message.body, "new");
    }

    #[tokio::test]
    async fn site_settings_merge_custom_and_maintenance() {
        let f = fixture();
        f.docs.set("siteCustom/name", json!("Lounge")).await.unwrap();
        f.docs.set("maintenance", json!({ "on": true, "msg": "back soon" })).await.unwrap();

        let settings = f.chat.site_settings().await.unwrap();
        assert_eq!(settings.name.as_deref(), Some("Lounge"));
        assert!(settings.maintenance.on);
        assert_eq!(settings.maintenance.msg, "back soon");
    }

    /// Store whose writes always fail; reads come from an inner memory store.
    struct FailingWrites(MemoryStore);

    #[async_trait]
    impl DocumentStore for FailingWrites {
        async fn get(&self, path: &str) -> StoreResult<Option<Value>> {
            self.0.get(path).await
        }

        async fn children(&self, path: &str) -> StoreResult<Vec<(String, Value)>> {
            self.0.children(path).await
        }

        async fn apply(&self, _batch: WriteBatch) -> StoreResult<()> {
            Err(StoreError::Unavailable("disk full".into()))
        }

        fn watch(&self) -> broadcast::Receiver<crate::store::Change> {
            self.0.watch()
        }
    }

    #[tokio::test]
    async fn failed_append_restores_marker() {
        let docs = Arc::new(FailingWrites(MemoryStore::new()));
        let markers = Arc::new(DeviceMarkers::new(Arc::new(MemoryKeyValue::new())));
        let clock = Arc::new(ManualClock::new(DateTime::from_timestamp_millis(50_000).unwrap()));
        let earlier = DateTime::from_timestamp_millis(10_000).unwrap();
        markers.restore(&alice().key(), "global", Some(earlier)).await.unwrap();

        let chat = ChatService::new(docs, markers.clone(), clock);
        let err = chat.send_message(&alice(), "global", "hi").await.unwrap_err();

        assert!(matches!(err, SendError::Store(StoreError::Unavailable(_))));
        assert_eq!(markers.last_send(&alice().key(), "global").await.unwrap(), Some(earlier));
    }
}
