//! Forced logout.
//!
//! An admin sets `force_logout/{key}`; the next time the flagged identity is
//! seen (HTTP request or auth-state watcher) its session is ended and the flag
//! cleared, so it fires exactly once.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::identity::Identity;
use crate::moderation::ModerationStore;
use crate::store::{is_truthy, paths, DocumentStore, StoreResult, ValueWatch};

const FEED_RETRY_DELAY: Duration = Duration::from_secs(1);

#[async_trait]
pub trait AuthProvider: Send + Sync {
    fn current(&self) -> Option<Identity>;

    /// Follows sign-in and sign-out; the receiver starts at the current state.
    fn subscribe(&self) -> watch::Receiver<Option<Identity>>;

    async fn sign_out(&self);
}

#[derive(Clone)]
pub struct SessionGuard {
    docs: Arc<dyn DocumentStore>,
    moderation: ModerationStore,
}

impl SessionGuard {
    pub fn new(docs: Arc<dyn DocumentStore>) -> Self {
        Self { moderation: ModerationStore::new(docs.clone()), docs }
    }

    /// Clears a pending forced logout for `identity`. Returns whether one was pending.
    pub async fn consume_force_logout(&self, identity: &Identity) -> StoreResult<bool> {
        let key = identity.key();
        if !self.moderation.force_logout_pending(&key).await? {
            return Ok(false);
        }
        self.docs.remove(&paths::force_logout(&key)).await?;
        tracing::info!(user = %identity.email, "forced logout consumed");
        Ok(true)
    }

    /// Watches the signed-in identity's flag and signs it out when set.
    /// Returns when the auth provider goes away.
    pub async fn run(&self, auth: Arc<dyn AuthProvider>) {
        let mut states = auth.subscribe();
        loop {
            let current = states.borrow_and_update().clone();
            match current {
                Some(identity) => {
                    tokio::select! {
                        changed = states.changed() => {
                            if changed.is_err() {
                                return;
                            }
                        }
                        flagged = self.wait_for_flag(&identity) => {
                            if flagged {
                                auth.sign_out().await;
                            } else {
                                // Feed closed: watch again, which also picks up
                                // a flag set while it was down.
                                tracing::warn!(user = %identity.email, "force-logout watch lost its change feed");
                                tokio::time::sleep(FEED_RETRY_DELAY).await;
                            }
                        }
                    }
                }
                None => {
                    if states.changed().await.is_err() {
                        return;
                    }
                }
            }
        }
    }

    /// Resolves `true` once the flag is set and consumed, `false` if the
    /// change feed closes first.
    async fn wait_for_flag(&self, identity: &Identity) -> bool {
        let mut watch = ValueWatch::new(self.docs.as_ref(), &paths::force_logout(&identity.key()));
        // Flag set while signed out.
        match self.consume_force_logout(identity).await {
            Ok(true) => return true,
            Ok(false) => {}
            Err(e) => tracing::error!(error = %e, user = %identity.email, "force-logout check failed"),
        }
        while let Some(value) = watch.next().await {
            if !is_truthy(value.as_ref()) {
                continue;
            }
            match self.consume_force_logout(identity).await {
                Ok(true) => return true,
                Ok(false) => {}
                Err(e) => tracing::error!(error = %e, user = %identity.email, "force-logout check failed"),
            }
        }
        false
    }
}
