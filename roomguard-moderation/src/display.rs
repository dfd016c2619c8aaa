use crate::identity::{Identity, ModerationKey};
use crate::models::Message;
use crate::moderation::ModerationStore;
use crate::store::StoreResult;

/// Hides shadow-banned senders from everyone but themselves.
#[derive(Clone)]
pub struct DisplayFilter {
    moderation: ModerationStore,
}

impl DisplayFilter {
    pub fn new(moderation: ModerationStore) -> Self {
        Self { moderation }
    }

    /// `viewer` is `None` for anonymous readers, who never see shadow-banned
    /// messages.
    pub async fn should_show(&self, message: &Message, viewer: Option<&Identity>) -> StoreResult<bool> {
        let sender = ModerationKey::from_identity(&message.sender);
        if !self.moderation.is_shadowbanned(&sender).await? {
            return Ok(true);
        }
        Ok(viewer.is_some_and(|v| v.same_person(&message.sender)))
    }
}
