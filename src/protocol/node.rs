//! Protocol node: the tree value every frame carries.
//!
//! A node has a tag, a set of string attributes, and either an ordered list
//! of child nodes or a raw payload (never both). Classification predicates
//! answer "what kind of stanza is this" for the dispatcher.

use std::collections::BTreeMap;
use std::fmt;

use super::ids;

/// Namespace of the server ping iq
pub const PING_XMLNS: &str = "urn:xmpp:ping";

/// Participant change actions reported in group iq results
pub const PARTICIPANT_ACTIONS: [&str; 4] = ["add", "remove", "promote", "demote"];

/// Node body: nothing, children, or an opaque payload
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum NodeContent {
    /// Leaf without payload
    #[default]
    Empty,
    /// Structured children, in wire order
    Children(Vec<Node>),
    /// Raw trailing value
    Payload(Vec<u8>),
}

/// Immutable protocol tree element
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Node {
    tag: String,
    attributes: BTreeMap<String, String>,
    content: NodeContent,
}

impl Node {
    /// Create a leaf node
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            attributes: BTreeMap::new(),
            content: NodeContent::Empty,
        }
    }

    /// Set an attribute
    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Set an attribute only when a value is present
    pub fn with_opt_attr(self, key: impl Into<String>, value: Option<impl Into<String>>) -> Self {
        match value {
            Some(value) => self.with_attr(key, value),
            None => self,
        }
    }

    /// Replace the body with children
    pub fn with_children(mut self, children: Vec<Node>) -> Self {
        self.content = NodeContent::Children(children);
        self
    }

    /// Append one child (turns a payload node into a parent node)
    pub fn with_child(mut self, child: Node) -> Self {
        match &mut self.content {
            NodeContent::Children(children) => children.push(child),
            _ => self.content = NodeContent::Children(vec![child]),
        }
        self
    }

    /// Replace the body with a payload
    pub fn with_payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.content = NodeContent::Payload(payload.into());
        self
    }

    /// Tag name
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Attribute value, if present
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// Attribute parsed as an integer (missing or malformed -> None)
    pub fn attribute_i64(&self, name: &str) -> Option<i64> {
        self.attribute(name).and_then(|v| v.trim().parse().ok())
    }

    /// All attributes
    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    /// Message id attribute
    pub fn id(&self) -> Option<&str> {
        self.attribute("id")
    }

    /// Body of the node
    pub fn content(&self) -> &NodeContent {
        &self.content
    }

    /// Children, empty for leaf and payload nodes
    pub fn children(&self) -> &[Node] {
        match &self.content {
            NodeContent::Children(children) => children,
            _ => &[],
        }
    }

    /// First child with the given tag
    pub fn child(&self, tag: &str) -> Option<&Node> {
        self.children().iter().find(|c| c.tag == tag)
    }

    /// Child at position `index`
    pub fn child_at(&self, index: usize) -> Option<&Node> {
        self.children().get(index)
    }

    /// Raw payload, if this node carries one
    pub fn payload(&self) -> Option<&[u8]> {
        match &self.content {
            NodeContent::Payload(data) => Some(data),
            _ => None,
        }
    }

    /// Payload decoded as UTF-8 (lossy), empty when absent
    pub fn payload_str(&self) -> String {
        self.payload()
            .map(|data| String::from_utf8_lossy(data).into_owned())
            .unwrap_or_default()
    }

    fn is_iq(&self, kind: &str) -> bool {
        self.tag == "iq" && self.attribute("type") == Some(kind)
    }

    fn is_result(&self) -> bool {
        self.is_iq("result")
    }

    fn id_has_prefix(&self, prefix: &str) -> bool {
        self.id().is_some_and(|id| id.starts_with(prefix))
    }

    // ─────────────────────────────────────────────────────────────────────
    // Classification predicates, one per dispatcher rule
    // ─────────────────────────────────────────────────────────────────────

    /// Error iq answering one of our requests
    pub fn is_error(&self) -> bool {
        self.is_iq("error")
    }

    /// Inbound message the protocol expects a receipt for
    pub fn should_be_replied(&self) -> bool {
        self.tag == "message" && self.id().is_some() && self.attribute("from").is_some()
    }

    /// Server notification (group/status/picture changes)
    pub fn is_notification(&self) -> bool {
        self.tag == "notification"
    }

    /// Delivery/read receipt for a message we sent
    pub fn is_receipt(&self) -> bool {
        self.tag == "receipt"
    }

    /// Server acknowledgment of a stanza we sent
    pub fn is_ack(&self) -> bool {
        self.tag == "ack"
    }

    /// Confirmation of a profile picture update
    pub fn is_profile_picture_ack(&self) -> bool {
        self.is_result()
            && self.id_has_prefix(ids::SET_PICTURE)
            && self.child("picture").is_none_or_empty_payload()
    }

    /// Confirmation of a status update
    pub fn is_set_status_ack(&self) -> bool {
        self.is_result() && self.id_has_prefix(ids::SET_STATUS)
    }

    /// Auth challenge nonce
    pub fn is_challenge(&self) -> bool {
        self.tag == "challenge"
    }

    /// Login accepted
    pub fn is_success(&self) -> bool {
        self.tag == "success"
    }

    /// Login rejected
    pub fn is_failure(&self) -> bool {
        self.tag == "failure"
    }

    /// Count of messages queued while offline
    pub fn is_offline_count(&self) -> bool {
        self.tag == "ib"
            && self
                .child("offline")
                .is_some_and(|c| c.attribute("count").is_some())
    }

    /// Contact presence update
    pub fn is_presence(&self) -> bool {
        self.tag == "presence"
    }

    /// Server reports dirty account categories
    pub fn is_dirty(&self) -> bool {
        self.tag == "ib" && self.child("dirty").is_some()
    }

    /// Last-seen query result
    pub fn is_last_seen(&self) -> bool {
        self.is_result()
            && self
                .child("query")
                .is_some_and(|c| c.attribute("seconds").is_some())
    }

    /// Keep-alive ping from the server
    pub fn is_ping(&self) -> bool {
        self.is_iq("get") && (self.attribute("xmlns") == Some(PING_XMLNS) || self.child("ping").is_some())
    }

    /// Participating/owned groups listing
    pub fn is_groups_list(&self) -> bool {
        self.is_result() && self.child("groups").is_some()
    }

    /// Group info result
    pub fn is_group_info(&self) -> bool {
        self.is_result() && self.child("group").is_some() && !self.id_has_prefix(ids::CREATE_GROUP)
    }

    /// Group created confirmation
    pub fn is_group_created(&self) -> bool {
        self.is_result() && self.child("group").is_some() && self.id_has_prefix(ids::CREATE_GROUP)
    }

    /// Result of adding/removing/promoting/demoting participants
    pub fn is_change_group_participants(&self) -> bool {
        self.is_result()
            && self
                .child_at(0)
                .is_some_and(|c| PARTICIPANT_ACTIONS.contains(&c.tag()))
    }

    /// Leave group confirmation
    pub fn is_leave_group(&self) -> bool {
        self.is_result() && self.child("leave").is_some()
    }

    /// Group subject change confirmation
    pub fn is_group_subject_changed(&self) -> bool {
        self.is_result() && self.id_has_prefix(ids::SET_GROUP_SUBJECT)
    }

    /// Media upload slot granted (or file already hosted)
    pub fn is_media_ready(&self) -> bool {
        self.is_result() && (self.child("media").is_some() || self.child("duplicate").is_some())
    }

    /// Profile picture data
    pub fn is_profile_picture(&self) -> bool {
        self.is_result() && self.child("picture").is_some_and(|c| c.payload().is_some())
    }

    /// Status list result
    pub fn is_get_status(&self) -> bool {
        self.is_result() && self.child("status").is_some()
    }

    /// Chat message
    pub fn is_message(&self) -> bool {
        self.tag == "message"
    }

    /// Typing indicator
    pub fn is_typing(&self) -> bool {
        self.tag == "chatstate"
    }

    /// Contacts sync result
    pub fn is_sync(&self) -> bool {
        self.is_result() && self.child("sync").is_some()
    }

    /// Server properties result
    pub fn is_properties(&self) -> bool {
        self.is_result() && self.child("props").is_some()
    }

    /// Service pricing result
    pub fn is_service_pricing(&self) -> bool {
        self.is_result() && self.child("pricing").is_some()
    }

    /// Privacy settings query result
    pub fn is_get_privacy_settings(&self) -> bool {
        self.is_result() && self.child("privacy").is_some() && self.id_has_prefix(ids::GET_PRIVACY)
    }

    /// Privacy settings update confirmation
    pub fn is_send_privacy_settings(&self) -> bool {
        self.is_result() && self.child("privacy").is_some() && self.id_has_prefix(ids::SET_PRIVACY)
    }

    /// Account extension confirmation
    pub fn is_account_extended(&self) -> bool {
        self.is_result()
            && self
                .child("extend")
                .is_some_and(|c| c.child("account").is_some())
    }

    /// XML-like rendering, used for logs and login failure reports
    pub fn to_xml(&self) -> String {
        let mut out = String::new();
        self.write_xml(&mut out);
        out
    }

    fn write_xml(&self, out: &mut String) {
        out.push('<');
        out.push_str(&self.tag);
        for (key, value) in &self.attributes {
            out.push_str(&format!(" {key}=\"{value}\""));
        }
        match &self.content {
            NodeContent::Empty => out.push_str("/>"),
            NodeContent::Children(children) => {
                out.push('>');
                for child in children {
                    child.write_xml(out);
                }
                out.push_str(&format!("</{}>", self.tag));
            },
            NodeContent::Payload(data) => {
                out.push('>');
                match std::str::from_utf8(data) {
                    Ok(text) => out.push_str(text),
                    Err(_) => out.push_str(&format!("[{} bytes]", data.len())),
                }
                out.push_str(&format!("</{}>", self.tag));
            },
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_xml())
    }
}

trait OptionalNodeExt {
    fn is_none_or_empty_payload(&self) -> bool;
}

impl OptionalNodeExt for Option<&Node> {
    fn is_none_or_empty_payload(&self) -> bool {
        match self {
            None => true,
            Some(node) => node.payload().is_none_or(<[u8]>::is_empty),
        }
    }
}
