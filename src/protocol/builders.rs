//! Constructors for outbound stanzas.
//!
//! Builders are pure: ids, addresses and timestamps are passed in by the
//! caller so the output is fully determined by the arguments.

use super::Node;

/// Namespace of group iqs
pub const GROUPS_XMLNS: &str = "w:g2";
/// Namespace of media upload iqs
pub const MEDIA_XMLNS: &str = "w:m";
/// Namespace of account iqs (pricing, extension)
pub const ACCOUNT_XMLNS: &str = "urn:xmpp:whatsapp:account";
/// Namespace of the dirty/clean iq
pub const DIRTY_XMLNS: &str = "urn:xmpp:whatsapp:dirty";
/// Namespace of media content nodes
pub const MMS_XMLNS: &str = "urn:xmpp:whatsapp:mms";
/// Namespace of contacts sync iqs
pub const SYNC_XMLNS: &str = "urn:xmpp:whatsapp:sync";
/// Namespace of last-seen iqs
pub const LAST_XMLNS: &str = "jabber:iq:last";
/// Namespace of profile picture iqs
pub const PICTURE_XMLNS: &str = "w:profile:picture";

/// Auth mechanism advertised in the auth node
pub const AUTH_MECHANISM: &str = "WAUTH-2";

/// Bare iq skeleton
pub fn iq(id: &str, kind: &str, xmlns: &str, to: &str) -> Node {
    Node::new("iq")
        .with_attr("id", id)
        .with_attr("type", kind)
        .with_attr("xmlns", xmlns)
        .with_attr("to", to)
}

/// Features advertised right after the stream start
pub fn features() -> Node {
    Node::new("stream:features").with_children(vec![
        Node::new("readreceipts"),
        Node::new("groups_v2"),
        Node::new("privacy"),
        Node::new("presence"),
    ])
}

/// Auth node; `data` is empty unless a stored challenge token is replayed
pub fn auth(msisdn: &str, data: Vec<u8>) -> Node {
    Node::new("auth")
        .with_attr("mechanism", AUTH_MECHANISM)
        .with_attr("user", msisdn)
        .with_payload(data)
}

/// Signed answer to a challenge
pub fn auth_response(data: Vec<u8>) -> Node {
    Node::new("response").with_payload(data)
}

/// Receipt for an incoming message (`kind` = None for delivery, `read`)
pub fn receipt(message: &Node, kind: Option<&str>, timestamp: i64) -> Node {
    Node::new("receipt")
        .with_opt_attr("to", message.attribute("from"))
        .with_opt_attr("id", message.id())
        .with_attr("t", timestamp.to_string())
        .with_opt_attr("type", kind)
        .with_opt_attr("participant", message.attribute("participant"))
}

/// Receipt for a message known only by its identifiers
pub fn message_receipt(
    to: &str,
    id: &str,
    participant: Option<&str>,
    kind: Option<&str>,
    timestamp: i64,
) -> Node {
    Node::new("receipt")
        .with_attr("to", to)
        .with_attr("id", id)
        .with_attr("t", timestamp.to_string())
        .with_opt_attr("type", kind)
        .with_opt_attr("participant", participant)
}

/// Ack for a notification
pub fn notification_ack(notification: &Node) -> Node {
    Node::new("ack")
        .with_opt_attr("to", notification.attribute("from"))
        .with_attr("class", "notification")
        .with_opt_attr("id", notification.id())
        .with_opt_attr("type", notification.attribute("type"))
        .with_opt_attr("from", notification.attribute("to"))
        .with_opt_attr("participant", notification.attribute("participant"))
}

/// Ack for a receipt
pub fn receipt_ack(receipt: &Node) -> Node {
    Node::new("ack")
        .with_opt_attr("to", receipt.attribute("from"))
        .with_attr("class", "receipt")
        .with_opt_attr("id", receipt.id())
        .with_attr("type", receipt.attribute("type").unwrap_or("delivery"))
}

/// Pong echoing the ping id
pub fn pong(id: &str, server: &str) -> Node {
    Node::new("iq")
        .with_attr("to", server)
        .with_attr("id", id)
        .with_attr("type", "result")
}

/// Clean every dirty category listed in an `ib` node
pub fn clean_dirty(dirty: &Node, id: &str, server: &str) -> Node {
    let cleans = dirty
        .children()
        .iter()
        .filter(|c| c.tag() == "dirty")
        .map(|c| Node::new("clean").with_opt_attr("type", c.attribute("type")))
        .collect();

    iq(id, "set", DIRTY_XMLNS, server).with_children(cleans)
}

/// Message envelope around a content node
pub fn message(to: &str, id: &str, content: Node, timestamp: i64) -> Node {
    let kind = if content.tag() == "body" { "text" } else { "media" };
    Node::new("message")
        .with_attr("to", to)
        .with_attr("type", kind)
        .with_attr("id", id)
        .with_attr("t", timestamp.to_string())
        .with_child(content)
}

/// Text content
pub fn text_body(text: &str) -> Node {
    Node::new("body").with_payload(text.as_bytes().to_vec())
}

/// Location content
pub fn location(latitude: f64, longitude: f64, name: Option<&str>, url: Option<&str>) -> Node {
    Node::new("media")
        .with_attr("xmlns", MMS_XMLNS)
        .with_attr("type", "location")
        .with_attr("encoding", "raw")
        .with_attr("latitude", latitude.to_string())
        .with_attr("longitude", longitude.to_string())
        .with_opt_attr("name", name)
        .with_opt_attr("url", url)
}

/// Contact card content
pub fn vcard(name: &str, data: Vec<u8>) -> Node {
    Node::new("media")
        .with_attr("xmlns", MMS_XMLNS)
        .with_attr("type", "vcard")
        .with_child(Node::new("vcard").with_attr("name", name).with_payload(data))
}

/// Request an upload slot for a media file
pub fn media_upload_request(id: &str, hash: &str, kind: &str, size: u64, server: &str) -> Node {
    iq(id, "set", MEDIA_XMLNS, server).with_child(
        Node::new("media")
            .with_attr("hash", hash)
            .with_attr("type", kind)
            .with_attr("size", size.to_string()),
    )
}

/// Attributes of hosted media, as returned by the upload or a duplicate hit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostedMedia {
    /// Download URL
    pub url: String,
    /// Media type (`image`, `video`, ...)
    pub kind: String,
    /// Size in bytes, as reported by the server
    pub size: String,
    /// Storage token (file name on the media host)
    pub file: String,
}

/// Final media content node
pub fn media_content(hosted: &HostedMedia, caption: Option<&str>, thumbnail: Vec<u8>) -> Node {
    Node::new("media")
        .with_attr("xmlns", MMS_XMLNS)
        .with_opt_attr("caption", caption)
        .with_attr("url", hosted.url.as_str())
        .with_attr("type", hosted.kind.as_str())
        .with_attr("size", hosted.size.as_str())
        .with_attr("file", hosted.file.as_str())
        .with_payload(thumbnail)
}

/// Own availability
pub fn presence(available: bool, name: Option<&str>) -> Node {
    Node::new("presence")
        .with_attr("type", if available { "available" } else { "unavailable" })
        .with_opt_attr("name", name)
}

/// Typing state sent to a contact or group
pub fn chatstate(to: &str, composing: bool) -> Node {
    let state = if composing { "composing" } else { "paused" };
    Node::new("chatstate")
        .with_attr("to", to)
        .with_child(Node::new(state))
}

/// Last seen query
pub fn last_seen(id: &str, to: &str) -> Node {
    iq(id, "get", LAST_XMLNS, to).with_child(Node::new("query"))
}

/// Status query for several users
pub fn get_statuses(id: &str, jids: &[String], server: &str) -> Node {
    let users = jids
        .iter()
        .map(|jid| Node::new("user").with_attr("jid", jid.as_str()))
        .collect();
    iq(id, "get", "status", server).with_child(Node::new("status").with_children(users))
}

/// Own status update
pub fn set_status(id: &str, status: &str, server: &str) -> Node {
    iq(id, "set", "status", server).with_child(Node::new("status").with_payload(status.as_bytes().to_vec()))
}

/// Profile picture query (`preview` for the thumbnail)
pub fn get_profile_picture(id: &str, to: &str, preview: bool) -> Node {
    let kind = if preview { "preview" } else { "image" };
    iq(id, "get", PICTURE_XMLNS, to).with_child(Node::new("picture").with_attr("type", kind))
}

/// Own profile picture update
pub fn set_profile_picture(id: &str, to: &str, picture: Vec<u8>, preview: Vec<u8>) -> Node {
    iq(id, "set", PICTURE_XMLNS, to).with_children(vec![
        Node::new("picture").with_payload(picture),
        Node::new("picture").with_attr("type", "preview").with_payload(preview),
    ])
}

/// Groups listing (`participating` or `owning`)
pub fn get_groups(id: &str, kind: &str, group_server: &str) -> Node {
    iq(id, "get", GROUPS_XMLNS, group_server).with_child(Node::new(kind))
}

/// Group info query
pub fn get_group_info(id: &str, group_jid: &str) -> Node {
    iq(id, "get", GROUPS_XMLNS, group_jid).with_child(Node::new("query").with_attr("request", "interactive"))
}

fn participant_nodes(jids: &[String]) -> Vec<Node> {
    jids.iter()
        .map(|jid| Node::new("participant").with_attr("jid", jid.as_str()))
        .collect()
}

/// Group creation
pub fn create_group(id: &str, subject: &str, participants: &[String], group_server: &str) -> Node {
    iq(id, "set", GROUPS_XMLNS, group_server).with_child(
        Node::new("create")
            .with_attr("subject", subject)
            .with_children(participant_nodes(participants)),
    )
}

/// Add/remove/promote/demote participants
pub fn group_participants(id: &str, group_jid: &str, action: &str, participants: &[String]) -> Node {
    iq(id, "set", GROUPS_XMLNS, group_jid)
        .with_child(Node::new(action).with_children(participant_nodes(participants)))
}

/// Leave one or more groups
pub fn leave_groups(id: &str, group_jids: &[String], group_server: &str) -> Node {
    let groups = group_jids
        .iter()
        .map(|jid| Node::new("group").with_attr("id", jid.as_str()))
        .collect();
    iq(id, "set", GROUPS_XMLNS, group_server)
        .with_child(Node::new("leave").with_attr("action", "delete").with_children(groups))
}

/// Group subject change
pub fn set_group_subject(id: &str, group_jid: &str, subject: &str) -> Node {
    iq(id, "set", GROUPS_XMLNS, group_jid)
        .with_child(Node::new("subject").with_payload(subject.as_bytes().to_vec()))
}

/// Contacts sync; numbers must already carry a leading `+`
pub fn contacts_sync(id: &str, numbers: &[String], mode: &str, context: &str, sid: &str) -> Node {
    let users = numbers
        .iter()
        .map(|number| Node::new("user").with_payload(number.as_bytes().to_vec()))
        .collect();

    Node::new("iq")
        .with_attr("type", "get")
        .with_attr("id", id)
        .with_attr("xmlns", SYNC_XMLNS)
        .with_child(
            Node::new("sync")
                .with_attr("mode", mode)
                .with_attr("context", context)
                .with_attr("sid", sid)
                .with_attr("index", "0")
                .with_attr("last", "true")
                .with_children(users),
        )
}

/// Server properties query
pub fn server_properties(id: &str, server: &str) -> Node {
    iq(id, "get", "w", server).with_child(Node::new("props"))
}

/// Service pricing query
pub fn service_pricing(id: &str, language: &str, country: &str, server: &str) -> Node {
    iq(id, "get", ACCOUNT_XMLNS, server).with_child(
        Node::new("pricing")
            .with_attr("lg", language)
            .with_attr("lc", country),
    )
}

/// Privacy settings query
pub fn get_privacy_settings(id: &str, server: &str) -> Node {
    iq(id, "get", "privacy", server).with_child(Node::new("privacy"))
}

/// Privacy setting update (`last`/`status`/`profile` to `all`/`contacts`/`none`)
pub fn set_privacy_settings(id: &str, name: &str, value: &str, server: &str) -> Node {
    iq(id, "set", "privacy", server).with_child(
        Node::new("privacy").with_child(
            Node::new("category")
                .with_attr("name", name)
                .with_attr("value", value),
        ),
    )
}

/// Account extension request
pub fn extend_account(id: &str, server: &str) -> Node {
    iq(id, "set", ACCOUNT_XMLNS, server).with_child(Node::new("extend"))
}
