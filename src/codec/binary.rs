//! Framed binary tree encoding.
//!
//! # Frame
//!
//! ```text
//! ┌──────────┬──────────────────┬────────────────────────┬─────────┐
//! │ flags:4  │ length:20        │ tree (length bytes)    │ mac:4   │
//! └──────────┴──────────────────┴────────────────────────┴─────────┘
//!   0x8 = encrypted; the mac is only present (and counted in length)
//!   on encrypted frames
//! ```
//!
//! # Tree
//!
//! ```text
//! varint(len) tag
//! varint(n)   n × (varint(len) key, varint(len) value)
//! kind:u8     0 = empty | 1 = varint(n) children | 2 = varint(len) payload
//! ```

use bytes::{Buf, BytesMut};

use super::crypto::{KeyStream, MAC_LENGTH};
use super::varint::{read_varint, write_varint};
use super::{Codec, Decoded};
use crate::error::{Result, WaError};
use crate::protocol::{Node, NodeContent};

/// Bytes written once before the first frame of a stream
pub const STREAM_PROLOGUE: [u8; 4] = *b"WA\x01\x05";

/// Frame header size in bytes
pub const HEADER_SIZE: usize = 3;

/// Largest frame body the 20-bit length field can describe
pub const MAX_FRAME_LENGTH: usize = 0xF_FFFF;

/// Header flag marking an encrypted frame
pub const FLAG_ENCRYPTED: u8 = 0x8;

const KIND_EMPTY: u8 = 0;
const KIND_CHILDREN: u8 = 1;
const KIND_PAYLOAD: u8 = 2;

/// Nesting depth accepted when decoding
const MAX_DEPTH: usize = 64;

/// Frame codec with optional per-direction key streams
#[derive(Default)]
pub struct BinaryCodec {
    buffer: BytesMut,
    reader: Option<Box<dyn KeyStream>>,
    writer: Option<Box<dyn KeyStream>>,
    awaiting_prologue: bool,
}

impl std::fmt::Debug for BinaryCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinaryCodec")
            .field("buffered", &self.buffer.len())
            .field("reader_keyed", &self.reader.is_some())
            .field("writer_keyed", &self.writer.is_some())
            .finish()
    }
}

impl BinaryCodec {
    /// Create a client-side codec
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a codec that strips the stream prologue before the first frame
    /// (the accepting side of a stream).
    pub fn accepting() -> Self {
        Self {
            awaiting_prologue: true,
            ..Self::default()
        }
    }

    /// Bytes buffered but not yet forming a full frame
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    fn frame(&mut self, node: &Node, encrypt: bool) -> Result<Vec<u8>> {
        let mut body = Vec::new();
        write_node(&mut body, node);
        let tree_len = body.len();

        let mut flags = 0u8;
        if encrypt {
            if let Some(writer) = self.writer.as_mut() {
                body.resize(tree_len + MAC_LENGTH, 0);
                writer.encode_message(&mut body, tree_len, 0, tree_len)?;
                flags |= FLAG_ENCRYPTED;
            }
        }

        if body.len() > MAX_FRAME_LENGTH {
            return Err(WaError::Codec(format!(
                "frame too large: {} bytes (max {MAX_FRAME_LENGTH})",
                body.len()
            )));
        }

        let len = body.len();
        let mut frame = Vec::with_capacity(HEADER_SIZE + len);
        frame.push((flags << 4) | ((len >> 16) as u8 & 0x0F));
        frame.push((len >> 8) as u8);
        frame.push(len as u8);
        frame.extend_from_slice(&body);
        Ok(frame)
    }

    fn next_frame(&mut self) -> Result<Option<Node>> {
        if self.awaiting_prologue {
            if self.buffer.len() < STREAM_PROLOGUE.len() {
                return Ok(None);
            }
            if self.buffer[..STREAM_PROLOGUE.len()] != STREAM_PROLOGUE {
                return Err(WaError::Codec("missing stream prologue".to_string()));
            }
            self.buffer.advance(STREAM_PROLOGUE.len());
            self.awaiting_prologue = false;
        }

        if self.buffer.len() < HEADER_SIZE {
            return Ok(None);
        }

        let flags = self.buffer[0] >> 4;
        let len = (usize::from(self.buffer[0] & 0x0F) << 16)
            | (usize::from(self.buffer[1]) << 8)
            | usize::from(self.buffer[2]);

        if self.buffer.len() < HEADER_SIZE + len {
            return Ok(None);
        }

        self.buffer.advance(HEADER_SIZE);
        let mut body = self.buffer.split_to(len).to_vec();

        if flags & FLAG_ENCRYPTED != 0 {
            let reader = self
                .reader
                .as_mut()
                .ok_or_else(|| WaError::Codec("encrypted frame before reader key".to_string()))?;
            if len < MAC_LENGTH {
                return Err(WaError::Codec("encrypted frame shorter than its mac".to_string()));
            }
            let data_len = len - MAC_LENGTH;
            reader.decode_message(&mut body, data_len, 0, data_len)?;
            body.truncate(data_len);
        }

        let (node, used) = read_node(&body, 0)?;
        if used != body.len() {
            return Err(WaError::Codec(format!(
                "{} trailing bytes after node",
                body.len() - used
            )));
        }
        Ok(Some(node))
    }
}

impl Codec for BinaryCodec {
    fn stream_start(&mut self, domain: &str, resource: &str) -> Result<Vec<u8>> {
        let start = Node::new("stream:stream")
            .with_attr("to", domain)
            .with_attr("resource", resource);

        let mut out = STREAM_PROLOGUE.to_vec();
        out.extend(self.frame(&start, false)?);
        Ok(out)
    }

    fn encode(&mut self, node: &Node) -> Result<Vec<u8>> {
        self.frame(node, true)
    }

    fn decode(&mut self, data: &[u8]) -> Decoded {
        self.buffer.extend_from_slice(data);

        let mut decoded = Decoded::default();
        loop {
            match self.next_frame() {
                Ok(Some(node)) => decoded.nodes.push(node),
                Ok(None) => break,
                Err(e) => {
                    decoded.error = Some(e);
                    break;
                },
            }
        }
        decoded
    }

    fn set_reader_key(&mut self, key: Option<Box<dyn KeyStream>>) {
        self.reader = key;
    }

    fn set_writer_key(&mut self, key: Option<Box<dyn KeyStream>>) {
        self.writer = key;
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.reset_keys();
    }
}

fn write_bytes(buf: &mut Vec<u8>, data: &[u8]) {
    write_varint(buf, data.len() as u64);
    buf.extend_from_slice(data);
}

fn write_node(buf: &mut Vec<u8>, node: &Node) {
    write_bytes(buf, node.tag().as_bytes());

    write_varint(buf, node.attributes().len() as u64);
    for (key, value) in node.attributes() {
        write_bytes(buf, key.as_bytes());
        write_bytes(buf, value.as_bytes());
    }

    match node.content() {
        NodeContent::Empty => buf.push(KIND_EMPTY),
        NodeContent::Children(children) => {
            buf.push(KIND_CHILDREN);
            write_varint(buf, children.len() as u64);
            for child in children {
                write_node(buf, child);
            }
        },
        NodeContent::Payload(data) => {
            buf.push(KIND_PAYLOAD);
            write_bytes(buf, data);
        },
    }
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn varint(&mut self) -> Result<usize> {
        let (value, used) = read_varint(&self.data[self.pos..])?;
        self.pos += used;
        usize::try_from(value).map_err(|_| WaError::Codec("length overflow".to_string()))
    }

    fn bytes(&mut self) -> Result<&'a [u8]> {
        let len = self.varint()?;
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| WaError::Codec("length exceeds frame".to_string()))?;
        let out = &self.data[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn string(&mut self) -> Result<String> {
        let raw = self.bytes()?;
        String::from_utf8(raw.to_vec()).map_err(|e| WaError::Codec(format!("invalid UTF-8: {e}")))
    }

    fn byte(&mut self) -> Result<u8> {
        let byte = *self
            .data
            .get(self.pos)
            .ok_or_else(|| WaError::Codec("unexpected end of frame".to_string()))?;
        self.pos += 1;
        Ok(byte)
    }
}

fn read_node(data: &[u8], depth: usize) -> Result<(Node, usize)> {
    let mut cursor = Cursor { data, pos: 0 };
    let node = read_node_at(&mut cursor, depth)?;
    Ok((node, cursor.pos))
}

fn read_node_at(cursor: &mut Cursor<'_>, depth: usize) -> Result<Node> {
    if depth > MAX_DEPTH {
        return Err(WaError::Codec("node nesting too deep".to_string()));
    }

    let mut node = Node::new(cursor.string()?);

    let attrs = cursor.varint()?;
    for _ in 0..attrs {
        let key = cursor.string()?;
        let value = cursor.string()?;
        node = node.with_attr(key, value);
    }

    match cursor.byte()? {
        KIND_EMPTY => {},
        KIND_CHILDREN => {
            let count = cursor.varint()?;
            let mut children = Vec::new();
            for _ in 0..count {
                children.push(read_node_at(cursor, depth + 1)?);
            }
            node = node.with_children(children);
        },
        KIND_PAYLOAD => {
            let data = cursor.bytes()?;
            node = node.with_payload(data.to_vec());
        },
        other => return Err(WaError::Codec(format!("unknown content kind {other}"))),
    }

    Ok(node)
}
