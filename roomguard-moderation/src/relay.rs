//! Queue-driven moderation.
//!
//! External tools append `{command, payload}` items under `admin_commands`.
//! The relay decodes each one into a closed [`RelayCommand`], marks it
//! processed, then replays it through [`AdminControl`] as the configured
//! operator.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Map, Value};
use tokio::task::JoinHandle;

use crate::admin::{ActionReceipt, AdminAction, AdminControl, AdminError};
use crate::identity::Identity;
use crate::models::AdminCommand;
use crate::store::{decode, paths, ChildAdded, DocumentStore, StoreResult};

const RESYNC_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayCommand {
    Ban { target: String },
    Unban { target: String },
    Mute { target: String },
    Unmute { target: String },
    Shadowban { target: String },
    Unshadowban { target: String },
    ClearChat { room: String },
    DeleteMessage { room: String, msg_key: String },
    Unknown { command: String },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    #[error("malformed command: {0}")]
    Malformed(String),
}

/// Lowercases and drops separators: `"Un-Ban"`, `"un_ban"` and `"unban"` agree.
fn normalize_command(raw: &str) -> String {
    raw.chars().filter(|c| c.is_alphanumeric()).flat_map(char::to_lowercase).collect()
}

fn payload_str<'a>(payload: &'a Value, field: &str) -> Option<&'a str> {
    payload.get(field).and_then(Value::as_str).map(str::trim).filter(|s| !s.is_empty())
}

impl RelayCommand {
    pub fn decode(command: &AdminCommand) -> Result<Self, RelayError> {
        let raw = command.command.as_deref().map(str::trim).unwrap_or_default();
        if raw.is_empty() {
            return Err(RelayError::Malformed("missing command".into()));
        }
        let payload = &command.payload;
        let target = || {
            payload_str(payload, "target")
                .or_else(|| payload_str(payload, "email"))
                .map(str::to_string)
                .ok_or_else(|| RelayError::Malformed(format!("{raw}: missing target")))
        };
        let room = || paths::room_name(payload_str(payload, "room").unwrap_or_default());

        let decoded = match normalize_command(raw).as_str() {
            "ban" | "banuser" => Self::Ban { target: target()? },
            "unban" | "unbanuser" => Self::Unban { target: target()? },
            "mute" | "muteuser" => Self::Mute { target: target()? },
            "unmute" | "unmuteuser" => Self::Unmute { target: target()? },
            "shadowban" | "shadowbanuser" => Self::Shadowban { target: target()? },
            "unshadowban" | "unshadowbanuser" => Self::Unshadowban { target: target()? },
            "clearchat" | "clearallchat" => Self::ClearChat { room: room() },
            "deletemessage" | "deletemsg" => {
                let msg_key = payload_str(payload, "msgKey")
                    .or_else(|| payload_str(payload, "msg_key"))
                    .ok_or_else(|| RelayError::Malformed(format!("{raw}: missing msgKey")))?;
                Self::DeleteMessage { room: room(), msg_key: msg_key.to_string() }
            }
            _ => Self::Unknown { command: raw.to_string() },
        };
        Ok(decoded)
    }
}

/// What happened to one queue item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    Applied(AdminAction),
    Failed,
    Unknown,
    Malformed,
    AlreadyProcessed,
}

impl RelayOutcome {
    fn label(&self) -> &'static str {
        match self {
            Self::Applied(_) => "applied",
            Self::Failed => "failed",
            Self::Unknown => "unknown",
            Self::Malformed => "malformed",
            Self::AlreadyProcessed => "skipped",
        }
    }
}

pub struct CommandRelay {
    docs: Arc<dyn DocumentStore>,
    admin: AdminControl,
    operator: Identity,
    mark_unknown_processed: bool,
}

impl CommandRelay {
    pub fn new(docs: Arc<dyn DocumentStore>, admin: AdminControl, operator: Identity) -> Self {
        Self { docs, admin, operator, mark_unknown_processed: true }
    }

    /// When `false`, unknown and malformed items are left unprocessed.
    pub fn mark_unknown_processed(mut self, mark: bool) -> Self {
        self.mark_unknown_processed = mark;
        self
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    /// Drains the existing queue, then follows new items. When the store's
    /// change feed closes, the queue is drained again from a fresh
    /// subscription so items queued during the gap still run.
    pub async fn run(&self) {
        tracing::info!(operator = %self.operator.email, "command relay started");
        loop {
            self.follow().await;
            tracing::warn!(retry_in = ?RESYNC_DELAY, "command relay lost its change feed, resyncing");
            tokio::time::sleep(RESYNC_DELAY).await;
        }
    }

    async fn follow(&self) {
        // Subscribe before listing so nothing queued in between is missed.
        let mut added = ChildAdded::new(self.docs.as_ref(), paths::ADMIN_COMMANDS);

        let mut backlog_keys = HashSet::new();
        match self.docs.children(paths::ADMIN_COMMANDS).await {
            Ok(backlog) => {
                for (key, value) in backlog {
                    self.process(&key, value).await;
                    backlog_keys.insert(key);
                }
            }
            Err(e) => tracing::error!(error = %e, "failed to read command backlog"),
        }

        while let Some((key, value)) = added.next().await {
            if backlog_keys.remove(&key) {
                continue;
            }
            self.process(&key, value).await;
        }
    }

    /// Handles one queue item. Never fails; problems are logged and counted.
    pub async fn process(&self, key: &str, value: Value) -> RelayOutcome {
        let outcome = self.process_inner(key, value).await;
        metrics::counter!("roomguard_relay_commands_total", "outcome" => outcome.label()).increment(1);
        outcome
    }

    async fn process_inner(&self, key: &str, value: Value) -> RelayOutcome {
        let item_path = paths::admin_command(key);
        let item: AdminCommand = match decode(&item_path, value) {
            Ok(item) => item,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "unreadable admin command");
                self.settle_unhandled(key).await;
                return RelayOutcome::Malformed;
            }
        };
        if item.processed {
            return RelayOutcome::AlreadyProcessed;
        }

        let command = match RelayCommand::decode(&item) {
            Ok(RelayCommand::Unknown { command }) => {
                tracing::warn!(key = %key, command = %command, "unknown admin command");
                self.settle_unhandled(key).await;
                return RelayOutcome::Unknown;
            }
            Ok(command) => command,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "malformed admin command");
                self.settle_unhandled(key).await;
                return RelayOutcome::Malformed;
            }
        };

        // Marked before dispatch: a crash between the two drops the command
        // instead of running it twice.
        if let Err(e) = self.mark_processed(key).await {
            tracing::error!(key = %key, error = %e, "could not mark command processed, skipping");
            return RelayOutcome::Failed;
        }

        match self.dispatch(&command).await {
            Ok(receipt) => {
                tracing::info!(key = %key, action = receipt.action.as_str(), notice = %receipt.notice, "relayed admin command");
                RelayOutcome::Applied(receipt.action)
            }
            Err(e) => {
                tracing::error!(key = %key, command = ?command, error = %e, "relayed admin command failed");
                RelayOutcome::Failed
            }
        }
    }

    async fn dispatch(&self, command: &RelayCommand) -> Result<ActionReceipt, AdminError> {
        let actor = Some(&self.operator);
        match command {
            RelayCommand::Ban { target } => self.admin.ban(actor, target).await,
            RelayCommand::Unban { target } => self.admin.unban(actor, target).await,
            RelayCommand::Mute { target } => self.admin.mute(actor, target).await,
            RelayCommand::Unmute { target } => self.admin.unmute(actor, target).await,
            RelayCommand::Shadowban { target } => self.admin.shadowban(actor, target).await,
            RelayCommand::Unshadowban { target } => self.admin.unshadowban(actor, target).await,
            RelayCommand::ClearChat { room } => self.admin.clear_all_messages(actor, room).await,
            RelayCommand::DeleteMessage { room, msg_key } => self.admin.delete_message(actor, room, msg_key).await,
            RelayCommand::Unknown { command } => {
                Err(AdminError::InvalidInput(format!("unknown command {command}")))
            }
        }
    }

    async fn settle_unhandled(&self, key: &str) {
        if !self.mark_unknown_processed {
            return;
        }
        if let Err(e) = self.mark_processed(key).await {
            tracing::error!(key = %key, error = %e, "could not mark command processed");
        }
    }

    async fn mark_processed(&self, key: &str) -> StoreResult<()> {
        let mut fields = Map::new();
        fields.insert("processed".into(), json!(true));
        self.docs.update(&paths::admin_command(key), fields).await
    }
}
