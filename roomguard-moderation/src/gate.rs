use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::clock::Clock;
use crate::identity::Identity;
use crate::markers::SendMarkers;
use crate::moderation::{ModerationStore, MuteStatus};
use crate::store::paths;
use crate::store::StoreResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Denial {
    Banned,
    Muted {
        #[serde(with = "chrono::serde::ts_milliseconds_option", skip_serializing_if = "Option::is_none")]
        until: Option<DateTime<Utc>>,
    },
    Locked,
    #[serde(rename = "slowmode")]
    SlowMode { wait_ms: i64 },
}

impl Denial {
    pub fn reason(&self) -> &'static str {
        match self {
            Denial::Banned => "banned",
            Denial::Muted { .. } => "muted",
            Denial::Locked => "locked",
            Denial::SlowMode { .. } => "slowmode",
        }
    }

    /// Message shown to the sender.
    pub fn notice(&self) -> &'static str {
        match self {
            Denial::Banned => "You are banned",
            Denial::Muted { .. } => "You are muted",
            Denial::Locked => "This room is locked",
            Denial::SlowMode { .. } => "Slow mode active. Wait a bit.",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendDecision {
    Allowed,
    Denied(Denial),
}

impl SendDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, SendDecision::Allowed)
    }
}

/// Decides whether an identity may post to a room right now.
///
/// Checks run in a fixed order and the first match wins: ban, active mute,
/// room lock, slow mode. Admins go through the same checks.
#[derive(Clone)]
pub struct SendGate {
    moderation: ModerationStore,
    markers: Arc<dyn SendMarkers>,
    clock: Arc<dyn Clock>,
}

impl SendGate {
    pub fn new(moderation: ModerationStore, markers: Arc<dyn SendMarkers>, clock: Arc<dyn Clock>) -> Self {
        Self { moderation, markers, clock }
    }

    pub async fn can_send(&self, identity: &Identity, room: &str) -> StoreResult<SendDecision> {
        let room = paths::room_name(room);
        let decision = self.evaluate(identity, &room).await?;
        if let SendDecision::Denied(denial) = &decision {
            metrics::counter!("roomguard_send_denied_total", "reason" => denial.reason()).increment(1);
            tracing::debug!(user = %identity.email, room = %room, reason = denial.reason(), "send denied");
        }
        Ok(decision)
    }

    async fn evaluate(&self, identity: &Identity, room: &str) -> StoreResult<SendDecision> {
        let key = identity.key();
        let now = self.clock.now();

        if self.moderation.is_banned(&key).await? {
            return Ok(SendDecision::Denied(Denial::Banned));
        }

        if let MuteStatus::Active { until } = self.moderation.mute_status(&key, now).await? {
            return Ok(SendDecision::Denied(Denial::Muted { until }));
        }

        if self.moderation.is_locked(room).await? {
            return Ok(SendDecision::Denied(Denial::Locked));
        }

        if let Some(interval) = self.moderation.slow_mode_interval(room).await? {
            if let Some(last) = self.markers.last_send(&key, room).await? {
                let elapsed = now - last;
                if elapsed < interval {
                    let wait_ms = (interval - elapsed).num_milliseconds();
                    return Ok(SendDecision::Denied(Denial::SlowMode { wait_ms }));
                }
            }
        }

        Ok(SendDecision::Allowed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::markers::{DeviceMarkers, MemoryKeyValue};
    use crate::store::{DocumentStore, MemoryStore};
    use chrono::Duration;
    use serde_json::json;

    struct Fixture {
        docs: Arc<MemoryStore>,
        markers: Arc<DeviceMarkers>,
        clock: Arc<ManualClock>,
        gate: SendGate,
    }

    fn fixture() -> Fixture {
        let docs = Arc::new(MemoryStore::new());
        let markers = Arc::new(DeviceMarkers::new(Arc::new(MemoryKeyValue::new())));
        let clock = Arc::new(ManualClock::new(DateTime::from_timestamp_millis(1_000_000).unwrap()));
        let gate = SendGate::new(ModerationStore::new(docs.clone()), markers.clone(), clock.clone());
        Fixture { docs, markers, clock, gate }
    }

    fn alice() -> Identity {
        Identity::new("a@x.com", "u1")
    }

    #[tokio::test]
    async fn clean_identity_is_allowed() {
        let f = fixture();
        assert_eq!(f.gate.can_send(&alice(), "global").await.unwrap(), SendDecision::Allowed);
    }

    #[tokio::test]
    async fn ban_wins_over_everything() {
        let f = fixture();
        f.docs.set("banned/a@x_com", json!({ "by": "ops", "ts": 0 })).await.unwrap();
        f.docs.set("muted/a@x_com", json!({ "by": "ops", "ts": 0 })).await.unwrap();
        f.docs.set("locked/global", json!(true)).await.unwrap();

        assert_eq!(f.gate.can_send(&alice(), "global").await.unwrap(), SendDecision::Denied(Denial::Banned));
    }

    #[tokio::test]
    async fn temp_mute_reports_until_then_expires() {
        let f = fixture();
        let until = f.clock.now() + Duration::minutes(5);
        f.docs
            .set("muted/a@x_com", json!({ "by": "ops", "ts": 0, "until": until.timestamp_millis() }))
            .await
            .unwrap();

        assert_eq!(
            f.gate.can_send(&alice(), "global").await.unwrap(),
            SendDecision::Denied(Denial::Muted { until: Some(until) })
        );

        f.clock.advance(Duration::minutes(5));
        assert!(f.gate.can_send(&alice(), "global").await.unwrap().is_allowed());
    }

    #[tokio::test]
    async fn lock_applies_per_room() {
        let f = fixture();
        f.docs.set("locked/lobby", json!(true)).await.unwrap();

        assert_eq!(f.gate.can_send(&alice(), "lobby").await.unwrap(), SendDecision::Denied(Denial::Locked));
        assert!(f.gate.can_send(&alice(), "global").await.unwrap().is_allowed());
    }

    #[tokio::test]
    async fn empty_room_means_global() {
        let f = fixture();
        f.docs.set("locked/global", json!(true)).await.unwrap();
        assert_eq!(f.gate.can_send(&alice(), "").await.unwrap(), SendDecision::Denied(Denial::Locked));
    }

    #[tokio::test]
    async fn slow_mode_reports_remaining_wait() {
        let f = fixture();
        f.docs.set("slowmode/global", json!({ "seconds": 30, "by": "ops", "ts": 0 })).await.unwrap();
        f.markers.restore(&alice().key(), "global", Some(f.clock.now())).await.unwrap();

        f.clock.advance(Duration::seconds(10));
        assert_eq!(
            f.gate.can_send(&alice(), "global").await.unwrap(),
            SendDecision::Denied(Denial::SlowMode { wait_ms: 20_000 })
        );

        f.clock.advance(Duration::seconds(21));
        assert!(f.gate.can_send(&alice(), "global").await.unwrap().is_allowed());
    }

    #[tokio::test]
    async fn slow_mode_without_marker_is_allowed() {
        let f = fixture();
        f.docs.set("slowmode/global", json!({ "seconds": 30, "by": "ops", "ts": 0 })).await.unwrap();
        assert!(f.gate.can_send(&alice(), "global").await.unwrap().is_allowed());
    }

    #[tokio::test]
    async fn admins_are_not_exempt() {
        let f = fixture();
        f.docs.set("admins/a@x_com", json!(true)).await.unwrap();
        f.docs.set("locked/global", json!(true)).await.unwrap();
        assert_eq!(f.gate.can_send(&alice(), "global").await.unwrap(), SendDecision::Denied(Denial::Locked));
    }

    #[test]
    fn denial_serializes_with_reason_tag() {
        let json = serde_json::to_value(Denial::SlowMode { wait_ms: 1200 }).unwrap();
        assert_eq!(json, json!({ "reason": "slowmode", "wait_ms": 1200 }));
    }
}
