//! Events emitted by the client.
//!
//! Every event is pushed into one unbounded channel in dispatch order;
//! the application drains it from [`crate::Client::take_events`].

use std::collections::BTreeMap;

use tokio::sync::mpsc;

use crate::content::ContentMessage;
use crate::session::Group;

/// Delivery state reported for a sent message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientReceived {
    /// Id of the message we sent
    pub id: String,
    /// Who received it
    pub from: String,
    /// `received` or `read`
    pub kind: String,
    /// When (unix seconds)
    pub time: i64,
}

/// Contact availability
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Presence {
    /// Contact address
    pub from: String,
    /// `available` or `unavailable`
    pub kind: String,
    /// Last seen (unix seconds); None when the contact hides it
    pub last_seen: Option<i64>,
}

/// Typing indicator state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypingState {
    /// Writing a message
    Composing,
    /// Stopped writing
    Paused,
}

impl TypingState {
    /// Parse the chatstate child tag
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "composing" => Some(Self::Composing),
            "paused" => Some(Self::Paused),
            _ => None,
        }
    }
}

/// Typing indicator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Typing {
    /// Composing or paused
    pub state: TypingState,
    /// Contact or group address
    pub from: String,
    /// Actual author inside a group, empty otherwise
    pub author: String,
}

/// Account status after an extension request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountInfo {
    /// Account kind (`free`, `paid`)
    pub kind: String,
    /// Account status (`active`, `expired`)
    pub status: String,
    /// Creation (unix seconds)
    pub creation: i64,
    /// Expiration (unix seconds)
    pub expiration: i64,
}

/// Participants added, removed, promoted or demoted in a group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantsChanged {
    /// Group id
    pub group_id: String,
    /// `add`, `remove`, `promote` or `demote`
    pub action: String,
    /// Who performed the change
    pub by: String,
    /// When (unix seconds)
    pub time: i64,
    /// Affected participant addresses
    pub participants: Vec<String>,
}

/// Group subject change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectChanged {
    /// Group id
    pub group_id: String,
    /// Who changed it
    pub by: String,
    /// When (unix seconds)
    pub time: i64,
    /// New subject
    pub subject: String,
}

/// Client event
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Transport connected
    Connected,
    /// Transport ended and a reconnect is starting
    Reconnecting,
    /// Transport ended for good
    Ended,
    /// Runtime transport error or login failure (raw failure node)
    Error(String),
    /// Transport error before the first connection was established
    ConnectError(String),
    /// Login succeeded
    LoggedIn,
    /// A sent message was received or read
    ClientReceived(ClientReceived),
    /// Messages waiting from the offline period
    OfflineCount(u64),
    /// Contact presence change
    Presence(Presence),
    /// Contact typing state
    Typing(Typing),
    /// Current privacy settings
    PrivacySettings(BTreeMap<String, String>),
    /// Privacy settings after an update
    PrivacySettingsUpdated(BTreeMap<String, String>),
    /// Account was extended
    AccountExtended(AccountInfo),
    /// Someone created a group we are in
    GroupCreated {
        /// Group description
        group: Group,
        /// Notification id
        notification_id: String,
    },
    /// Group membership change
    GroupParticipantsChanged {
        /// Change description
        change: ParticipantsChanged,
        /// Notification id
        notification_id: String,
    },
    /// Group subject change
    GroupSubjectChanged {
        /// Change description
        change: SubjectChanged,
        /// Notification id
        notification_id: String,
    },
    /// Contact status text changed
    StatusUpdated {
        /// Contact address
        from: String,
        /// New status
        status: String,
        /// Notification id
        notification_id: String,
    },
    /// Contact profile picture changed
    PictureUpdated {
        /// Contact address
        from: String,
        /// `set` or `delete`
        action: String,
        /// Notification id
        notification_id: String,
    },
    /// Inbound content message
    Message(ContentMessage),
}

impl Event {
    /// Short event name for logging
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connected => "connect",
            Self::Reconnecting => "reconnect",
            Self::Ended => "end",
            Self::Error(_) => "error",
            Self::ConnectError(_) => "connectError",
            Self::LoggedIn => "login",
            Self::ClientReceived(_) => "clientReceived",
            Self::OfflineCount(_) => "offlineCount",
            Self::Presence(_) => "presence",
            Self::Typing(_) => "typing",
            Self::PrivacySettings(_) => "privacySettings",
            Self::PrivacySettingsUpdated(_) => "privacySettingsUpdated",
            Self::AccountExtended(_) => "accountExtended",
            Self::GroupCreated { .. } => "groupCreated",
            Self::GroupParticipantsChanged { .. } => "groupParticipantsChanged",
            Self::GroupSubjectChanged { .. } => "groupSubjectChanged",
            Self::StatusUpdated { .. } => "statusUpdated",
            Self::PictureUpdated { .. } => "pictureUpdated",
            Self::Message(_) => "message",
        }
    }
}

/// Receiving end of the event channel
pub type EventStream = mpsc::UnboundedReceiver<Event>;

/// Sending side of the event channel; emitting never fails, events sent
/// after the receiver was dropped are discarded.
#[derive(Debug, Clone)]
pub struct Emitter {
    tx: mpsc::UnboundedSender<Event>,
}

impl Emitter {
    /// Create an emitter and its stream
    pub fn channel() -> (Self, EventStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Emit one event
    pub fn emit(&self, event: Event) {
        tracing::trace!("event {}", event.name());
        let _ = self.tx.send(event);
    }
}
