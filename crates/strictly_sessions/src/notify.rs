//! Fire-and-forget notifications to participants.

use crate::model::{PlayerId, SessionId};
use derive_more::{Display, Error};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, instrument};

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NotificationKind {
    /// The invitee accepted and play began.
    InvitationAccepted,
    /// The invitee declined.
    InvitationDeclined,
    /// A move was applied and the other side is to move.
    TurnChanged,
    /// The session completed.
    GameOver,
    /// An undo or reset was proposed.
    RequestProposed,
    /// The open request was approved and applied.
    RequestAccepted,
    /// The counterpart declined the open request.
    RequestDeclined,
    /// The open request was withdrawn or overtaken by a move.
    RequestCancelled,
}

/// One event addressed to one participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, derive_new::new)]
pub struct Notification {
    /// Recipient.
    pub participant: PlayerId,
    /// Event kind.
    pub kind: NotificationKind,
    /// Session the event belongs to.
    pub session_id: SessionId,
    /// Event-specific details.
    pub data: serde_json::Value,
}

/// A notification could not be handed off.
#[derive(Debug, Clone, Display, Error)]
#[display("Notify error: {}", message)]
pub struct NotifyError {
    /// Error message.
    pub message: String,
}

/// Delivers notifications. Failures never affect session state.
pub trait NotificationSink: Send + Sync {
    /// Hands off one notification.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError`] if the notification could not be handed off.
    fn send(&self, notification: Notification) -> Result<(), NotifyError>;
}

/// Writes notifications to the log and nowhere else.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl NotificationSink for TracingSink {
    #[instrument(skip(self, notification), fields(participant = %notification.participant, session_id = %notification.session_id))]
    fn send(&self, notification: Notification) -> Result<(), NotifyError> {
        info!(kind = %notification.kind, data = %notification.data, "Notification");
        Ok(())
    }
}

/// Forwards notifications into a tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Notification>,
}

impl ChannelSink {
    /// Creates a sink and the receiving end of its channel.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl NotificationSink for ChannelSink {
    fn send(&self, notification: Notification) -> Result<(), NotifyError> {
        self.tx.send(notification).map_err(|e| NotifyError {
            message: format!("Receiver dropped, lost {} for {}", e.0.kind, e.0.participant),
        })
    }
}
