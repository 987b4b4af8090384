use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Identifier a user registers under.
pub type UserId = String;

/// Sending half of a user's delivery channel. The broker only ever writes to it.
pub type DeliverySender = mpsc::Sender<Message>;

/// Non-owning handle to a delivery channel. It does not keep the channel
/// open; [`mpsc::WeakSender::upgrade`] fails once the registry has let go.
pub type WeakDeliverySender = mpsc::WeakSender<Message>;

/// Receiving half of a user's delivery channel, owned by the user's session.
pub type Inbox = mpsc::Receiver<Message>;

/// Builds a delivery channel for a session.
///
/// The session keeps the [`Inbox`] and hands the sender to the registry. Once
/// the registry drops its sender (on unregister or replacement) the inbox
/// yields `None`.
pub fn inbox(capacity: usize) -> (DeliverySender, Inbox) {
    mpsc::channel(capacity.max(1))
}

/// A chat message routed by the broker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub sender: UserId,
    /// Ignored when `broadcast` is set.
    pub recipient: UserId,
    pub content: String,
    pub broadcast: bool,
    /// Send time in milliseconds since the Unix epoch.
    pub timestamp: i64,
}

impl Message {
    pub fn new(
        sender: impl Into<UserId>,
        recipient: impl Into<UserId>,
        content: impl Into<String>,
        broadcast: bool,
        timestamp: i64,
    ) -> Self {
        Self {
            sender: sender.into(),
            recipient: recipient.into(),
            content: content.into(),
            broadcast,
            timestamp,
        }
    }

    /// A point-to-point message stamped with the current time.
    pub fn direct(
        sender: impl Into<UserId>,
        recipient: impl Into<UserId>,
        content: impl Into<String>,
    ) -> Self {
        Self::new(sender, recipient, content, false, now_millis())
    }

    /// A message for every registered user, stamped with the current time.
    pub fn broadcast(sender: impl Into<UserId>, content: impl Into<String>) -> Self {
        Self::new(sender, String::new(), content, true, now_millis())
    }

    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }
}

fn now_millis() -> i64 {
    // A clock set before 1970 stamps zero rather than failing the send.
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}
