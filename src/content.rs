//! Typed content decoding for inbound chat messages.
//!
//! The processor is an ordered list of matchers. Every matcher that claims
//! a message node decodes it; in practice the kinds are disjoint so a node
//! yields at most one [`ContentMessage`].

use crate::protocol::Node;

/// Kind of decoded content
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    /// Plain text body
    Text,
    /// Shared location
    Location,
    /// Image attachment
    Image,
    /// Video attachment
    Video,
    /// Audio attachment
    Audio,
    /// Contact card
    Vcard,
}

/// Fields every content message carries
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MessageMeta {
    /// Sender address (group address for group messages)
    pub from: String,
    /// Message id
    pub id: String,
    /// Send time (unix seconds)
    pub date: i64,
    /// Sender push name
    pub notify: String,
    /// Actual sender inside a group, empty otherwise
    pub author: String,
    /// Whether `from` is a group
    pub is_group: bool,
}

/// Attributes shared by hosted media
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MediaAttachment {
    /// Download URL
    pub url: String,
    /// Storage token
    pub file: String,
    /// Size in bytes
    pub size: u64,
    /// MIME type
    pub mimetype: String,
    /// Base64 SHA-256 of the file
    pub filehash: String,
    /// Media host address
    pub ip: String,
    /// Transfer encoding
    pub encoding: String,
    /// Caption (empty when none)
    pub caption: String,
    /// Embedded thumbnail bytes
    pub thumbnail: Vec<u8>,
}

/// Video stream details
#[derive(Debug, Clone, PartialEq, Default)]
pub struct VideoDetails {
    /// Length in seconds
    pub seconds: u64,
    /// Duration in seconds
    pub duration: u64,
    /// Video codec
    pub vcodec: String,
    /// Frame width
    pub width: u32,
    /// Frame height
    pub height: u32,
    /// Frames per second
    pub fps: u32,
    /// Video bitrate (bit/s)
    pub vbitrate: u64,
    /// Audio codec
    pub acodec: String,
    /// Audio sample frequency
    pub asampfreq: u64,
    /// Audio sample format
    pub asampfmt: String,
    /// Audio bitrate (bit/s)
    pub abitrate: u64,
}

/// Audio stream details
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AudioDetails {
    /// Length in seconds
    pub seconds: u64,
    /// Duration in seconds
    pub duration: u64,
    /// `live` for voice notes, empty otherwise
    pub origin: String,
    /// Audio codec
    pub acodec: String,
    /// Sample frequency
    pub asampfreq: u64,
    /// Bitrate (bit/s)
    pub abitrate: u64,
}

/// Decoded inbound content
#[derive(Debug, Clone, PartialEq)]
pub enum ContentMessage {
    /// Text message
    Text {
        /// Common fields
        meta: MessageMeta,
        /// UTF-8 body
        body: String,
    },
    /// Location message
    Location {
        /// Common fields
        meta: MessageMeta,
        /// Latitude
        latitude: f64,
        /// Longitude
        longitude: f64,
        /// Place name
        name: Option<String>,
        /// Place URL
        url: Option<String>,
        /// Map thumbnail
        thumbnail: Vec<u8>,
    },
    /// Image message
    Image {
        /// Common fields
        meta: MessageMeta,
        /// Hosted file
        media: MediaAttachment,
        /// Width in px
        width: u32,
        /// Height in px
        height: u32,
    },
    /// Video message
    Video {
        /// Common fields
        meta: MessageMeta,
        /// Hosted file
        media: MediaAttachment,
        /// Stream details
        details: VideoDetails,
    },
    /// Audio message
    Audio {
        /// Common fields
        meta: MessageMeta,
        /// Hosted file
        media: MediaAttachment,
        /// Stream details
        details: AudioDetails,
    },
    /// Contact card
    Vcard {
        /// Common fields
        meta: MessageMeta,
        /// Contact name
        name: String,
        /// Raw vCard data
        data: Vec<u8>,
    },
}

impl ContentMessage {
    /// Kind of this message
    pub fn kind(&self) -> ContentKind {
        match self {
            Self::Text { .. } => ContentKind::Text,
            Self::Location { .. } => ContentKind::Location,
            Self::Image { .. } => ContentKind::Image,
            Self::Video { .. } => ContentKind::Video,
            Self::Audio { .. } => ContentKind::Audio,
            Self::Vcard { .. } => ContentKind::Vcard,
        }
    }

    /// Common fields
    pub fn meta(&self) -> &MessageMeta {
        match self {
            Self::Text { meta, .. }
            | Self::Location { meta, .. }
            | Self::Image { meta, .. }
            | Self::Video { meta, .. }
            | Self::Audio { meta, .. }
            | Self::Vcard { meta, .. } => meta,
        }
    }
}

type Predicate = fn(&Node) -> bool;
type Decoder = fn(&Node, MessageMeta) -> ContentMessage;

struct Matcher {
    kind: ContentKind,
    matches: Predicate,
    decode: Decoder,
}

/// Ordered content matchers
pub struct ContentProcessor {
    group_domain: String,
    matchers: Vec<Matcher>,
}

impl std::fmt::Debug for ContentProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kinds: Vec<_> = self.matchers.iter().map(|m| m.kind).collect();
        f.debug_struct("ContentProcessor")
            .field("group_domain", &self.group_domain)
            .field("matchers", &kinds)
            .finish()
    }
}

impl ContentProcessor {
    /// Processor with the standard matchers, in order
    pub fn new(group_domain: impl Into<String>) -> Self {
        Self {
            group_domain: group_domain.into(),
            matchers: vec![
                Matcher {
                    kind: ContentKind::Text,
                    matches: is_text,
                    decode: decode_text,
                },
                Matcher {
                    kind: ContentKind::Location,
                    matches: |n| is_media_of(n, "location"),
                    decode: decode_location,
                },
                Matcher {
                    kind: ContentKind::Image,
                    matches: |n| is_media_of(n, "image"),
                    decode: decode_image,
                },
                Matcher {
                    kind: ContentKind::Video,
                    matches: |n| is_media_of(n, "video"),
                    decode: decode_video,
                },
                Matcher {
                    kind: ContentKind::Audio,
                    matches: |n| is_media_of(n, "audio"),
                    decode: decode_audio,
                },
                Matcher {
                    kind: ContentKind::Vcard,
                    matches: is_vcard,
                    decode: decode_vcard,
                },
            ],
        }
    }

    /// Decode a message node with every matcher that claims it
    pub fn process(&self, node: &Node) -> Vec<ContentMessage> {
        self.matchers
            .iter()
            .filter(|m| (m.matches)(node))
            .map(|m| (m.decode)(node, self.meta(node)))
            .collect()
    }

    fn meta(&self, node: &Node) -> MessageMeta {
        let from = text(node, "from");
        MessageMeta {
            is_group: from.contains(self.group_domain.as_str()),
            from,
            id: text(node, "id"),
            date: node.attribute_i64("t").unwrap_or(0),
            notify: text(node, "notify"),
            author: text(node, "participant"),
        }
    }
}

fn text(node: &Node, name: &str) -> String {
    node.attribute(name).unwrap_or_default().to_string()
}

fn number<T: std::str::FromStr + Default>(node: &Node, name: &str) -> T {
    node.attribute(name)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or_default()
}

fn is_text(node: &Node) -> bool {
    node.attribute("notify").is_some()
        && node.attribute("type") == Some("text")
        && node.child("body").is_some()
}

fn is_media_of(node: &Node, kind: &str) -> bool {
    node.attribute("notify").is_some()
        && node
            .child("media")
            .is_some_and(|m| m.attribute("type") == Some(kind))
}

fn is_vcard(node: &Node) -> bool {
    is_media_of(node, "vcard") && node.child("media").and_then(|m| m.child("vcard")).is_some()
}

fn with_media<R>(node: &Node, decode: impl FnOnce(&Node) -> R) -> R {
    match node.child("media") {
        Some(media) => decode(media),
        None => decode(&Node::new("media")),
    }
}

fn attachment(media: &Node) -> MediaAttachment {
    MediaAttachment {
        url: text(media, "url"),
        file: text(media, "file"),
        size: number(media, "size"),
        mimetype: text(media, "mimetype"),
        filehash: text(media, "filehash"),
        ip: text(media, "ip"),
        encoding: text(media, "encoding"),
        caption: text(media, "caption"),
        thumbnail: media.payload().map(<[u8]>::to_vec).unwrap_or_default(),
    }
}

fn decode_text(node: &Node, meta: MessageMeta) -> ContentMessage {
    ContentMessage::Text {
        meta,
        body: node.child("body").map(Node::payload_str).unwrap_or_default(),
    }
}

fn decode_location(node: &Node, meta: MessageMeta) -> ContentMessage {
    with_media(node, |media| ContentMessage::Location {
        meta,
        latitude: number(media, "latitude"),
        longitude: number(media, "longitude"),
        name: media.attribute("name").map(str::to_string),
        url: media.attribute("url").map(str::to_string),
        thumbnail: media.payload().map(<[u8]>::to_vec).unwrap_or_default(),
    })
}

fn decode_image(node: &Node, meta: MessageMeta) -> ContentMessage {
    with_media(node, |media| ContentMessage::Image {
        meta,
        media: attachment(media),
        width: number(media, "width"),
        height: number(media, "height"),
    })
}

fn decode_video(node: &Node, meta: MessageMeta) -> ContentMessage {
    with_media(node, |media| ContentMessage::Video {
        meta,
        media: attachment(media),
        details: VideoDetails {
            seconds: number(media, "seconds"),
            duration: number(media, "duration"),
            vcodec: text(media, "vcodec"),
            width: number(media, "width"),
            height: number(media, "height"),
            fps: number(media, "fps"),
            vbitrate: number(media, "vbitrate"),
            acodec: text(media, "acodec"),
            asampfreq: number(media, "asampfreq"),
            asampfmt: text(media, "asampfmt"),
            abitrate: number(media, "abitrate"),
        },
    })
}

fn decode_audio(node: &Node, meta: MessageMeta) -> ContentMessage {
    with_media(node, |media| ContentMessage::Audio {
        meta,
        media: attachment(media),
        details: AudioDetails {
            seconds: number(media, "seconds"),
            duration: number(media, "duration"),
            origin: text(media, "origin"),
            acodec: text(media, "acodec"),
            asampfreq: number(media, "asampfreq"),
            abitrate: number(media, "abitrate"),
        },
    })
}

fn decode_vcard(node: &Node, meta: MessageMeta) -> ContentMessage {
    let vcard = node.child("media").and_then(|m| m.child("vcard"));
    ContentMessage::Vcard {
        meta,
        name: vcard.map(|v| text(v, "name")).unwrap_or_default(),
        data: vcard
            .and_then(Node::payload)
            .map(<[u8]>::to_vec)
            .unwrap_or_default(),
    }
}
