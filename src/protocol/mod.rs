//! Protocol vocabulary: nodes, addresses, request id prefixes, and the
//! constructors for every stanza the client emits.
//!
//! # Stanza Flow
//!
//! ```text
//! Client                                  Server
//!    |                                      |
//!    |--- stream start + features + auth -->|
//!    |<------------- challenge -------------|  (skipped when the stored
//!    |-------------- response ------------->|   challenge token is valid)
//!    |<---------- success / failure --------|
//!    |                                      |
//!    |--- message / iq (id = prefix-t-n) -->|
//!    |<------ ack / receipt / iq result ----|  correlated by id
//!    |<-------- message / notification -----|  receipt / ack sent back
//! ```
//!
//! # Addresses
//!
//! | Form                  | Meaning           |
//! |-----------------------|-------------------|
//! | `491234@s.whatsapp.net` | user            |
//! | `4912-1400000000@g.us`  | group           |

pub mod builders;
mod node;

pub use node::{Node, NodeContent, PARTICIPANT_ACTIONS, PING_XMLNS};

use crate::config::ServerConfig;

/// Request id prefixes. Ids are minted as `prefix-<unix seconds>-<counter>`.
pub mod ids {
    /// Outgoing chat message
    pub const MESSAGE: &str = "message";
    /// Media upload slot request
    pub const UPLOAD: &str = "upload";
    /// Clean dirty categories
    pub const CLEAN_DIRTY: &str = "cleandirty";
    /// Server properties
    pub const PROPERTIES: &str = "getproperties";
    /// Service pricing
    pub const PRICING: &str = "get_service_pricing";
    /// Contacts sync
    pub const SYNC: &str = "sendsync";
    /// Privacy settings update
    pub const SET_PRIVACY: &str = "send_privacy_settings";
    /// Privacy settings query
    pub const GET_PRIVACY: &str = "get_privacy_settings";
    /// Own status update
    pub const SET_STATUS: &str = "sendstatus";
    /// Status query
    pub const GET_STATUS: &str = "getstatus";
    /// Last seen query
    pub const LAST_SEEN: &str = "lastseen";
    /// Own profile picture update
    pub const SET_PICTURE: &str = "setphoto";
    /// Profile picture query
    pub const GET_PICTURE: &str = "profilepicture";
    /// Account extension
    pub const EXTEND_ACCOUNT: &str = "extend_account";
    /// Groups listing
    pub const GET_GROUPS: &str = "getgroups";
    /// Group info
    pub const GROUP_INFO: &str = "getgroupinfo";
    /// Group creation
    pub const CREATE_GROUP: &str = "creategroup";
    /// Group participant changes
    pub const PARTICIPANTS: &str = "group_participants";
    /// Leaving groups
    pub const LEAVE_GROUPS: &str = "leavegroups";
    /// Group subject change
    pub const SET_GROUP_SUBJECT: &str = "set_group_subject";
}

/// Build the full address for a number, group id, or existing address.
///
/// Identifiers containing `@` are returned unchanged; ids containing `-`
/// (creator-timestamp) are groups.
pub fn jid(id: &str, server: &ServerConfig) -> String {
    if id.contains('@') {
        return id.to_string();
    }

    let domain = if id.contains('-') {
        &server.group_domain
    } else {
        &server.domain
    };

    format!("{id}@{domain}")
}

/// Local part of an address (`4912-1400@g.us` -> `4912-1400`)
pub fn jid_to_id(jid: &str) -> &str {
    jid.split('@').next().unwrap_or(jid)
}

/// Whether an address belongs to the group domain
pub fn is_group_jid(jid: &str, server: &ServerConfig) -> bool {
    jid.ends_with(&server.group_domain)
}

/// Current unix time in seconds
pub fn unix_timestamp() -> i64 {
    chrono::Utc::now().timestamp()
}
