//! Typed results delivered to request callbacks.

use std::collections::BTreeMap;

use crate::protocol::Node;

/// Group participant as listed in group results
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupParticipant {
    /// Participant address
    pub jid: String,
    /// `admin` / `superadmin` when set
    pub role: Option<String>,
}

/// Group description
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Group {
    /// Group id (local part of the group address)
    pub id: String,
    /// Creator address
    pub creator: String,
    /// Creation time (unix seconds)
    pub creation: i64,
    /// Current subject
    pub subject: String,
    /// Who set the subject
    pub subject_owner: String,
    /// When the subject was set (unix seconds)
    pub subject_time: i64,
    /// Members
    pub participants: Vec<GroupParticipant>,
}

impl Group {
    /// Decode a `group` node
    pub fn from_node(node: &Node) -> Self {
        let participants = node
            .children()
            .iter()
            .filter(|c| c.tag() == "participant")
            .filter_map(|c| {
                c.attribute("jid").map(|jid| GroupParticipant {
                    jid: jid.to_string(),
                    role: c.attribute("type").map(str::to_string),
                })
            })
            .collect();

        Self {
            id: node.attribute("id").unwrap_or_default().to_string(),
            creator: node.attribute("creator").unwrap_or_default().to_string(),
            creation: node.attribute_i64("creation").unwrap_or(0),
            subject: node.attribute("subject").unwrap_or_default().to_string(),
            subject_owner: node.attribute("s_o").unwrap_or_default().to_string(),
            subject_time: node.attribute_i64("s_t").unwrap_or(0),
            participants,
        }
    }
}

/// Outcome for one participant of a participant-change request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantOutcome {
    /// Participant address
    pub jid: String,
    /// Error code when the change was refused for this participant
    pub error: Option<String>,
}

/// Status message of one user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserStatus {
    /// User address
    pub jid: String,
    /// Status text
    pub status: String,
    /// When it was set (unix seconds)
    pub time: i64,
}

/// Result payload passed to a request callback on success
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// Acknowledgment without data
    Empty,
    /// Last-seen information
    LastSeen {
        /// Queried address
        from: String,
        /// Unix time of last activity (now - `seconds_ago`)
        date: i64,
        /// Seconds since last activity, as reported
        seconds_ago: i64,
    },
    /// Groups listing
    Groups(Vec<Group>),
    /// Group info or created group
    Group(Group),
    /// Participant change results
    ParticipantsChanged {
        /// `add`, `remove`, `promote` or `demote`
        action: String,
        /// Per-participant outcome
        outcomes: Vec<ParticipantOutcome>,
        /// Group id
        group_id: String,
    },
    /// Profile picture bytes
    ProfilePicture {
        /// Owner address
        from: String,
        /// Whether this is the preview thumbnail
        is_preview: bool,
        /// JPEG bytes
        data: Vec<u8>,
        /// Picture id
        picture_id: String,
    },
    /// Statuses of the requested users
    Statuses(Vec<UserStatus>),
    /// Contacts sync result
    ContactsSync {
        /// Numbers registered on the service
        existing: Vec<String>,
        /// Numbers not registered
        non_existing: Vec<String>,
        /// Numbers the server could not parse
        invalid: Vec<String>,
    },
    /// Server properties
    Properties(BTreeMap<String, String>),
    /// Service pricing
    Pricing {
        /// Display price
        price: String,
        /// Numeric cost
        cost: String,
        /// Currency code
        currency: String,
        /// Expiration (unix seconds)
        expiration: i64,
    },
}
