//! Node serialization and stream keys.
//!
//! The client only talks to a [`Codec`]: nodes go in, frames come out, and
//! each direction can be keyed independently once authentication derives
//! session keys through a [`Cipher`].
//!
//! # Key Activation
//!
//! ```text
//! login()            reader = None   writer = None
//! challenge received reader = keys.reader          (before the response)
//! response sent                      writer = keys.writer
//! success received                   writer = pending fast-login key, if any
//! ```

mod binary;
pub mod crypto;
pub mod varint;

pub use binary::{BinaryCodec, FLAG_ENCRYPTED, HEADER_SIZE, MAX_FRAME_LENGTH, STREAM_PROLOGUE};
pub use crypto::{Cipher, HmacCipher, HmacKeyStream, KeyStream, SessionKeys, MAC_LENGTH};

use crate::error::{Result, WaError};
use crate::protocol::Node;

/// Outcome of feeding bytes to a [`Codec`].
///
/// Nodes completed before a bad frame are kept; `error` holds what stopped
/// decoding, if anything.
#[derive(Debug, Default)]
pub struct Decoded {
    /// Complete nodes, in arrival order
    pub nodes: Vec<Node>,
    /// Failure that ended this call after `nodes`
    pub error: Option<WaError>,
}

impl Decoded {
    /// Nodes when decoding finished cleanly, the error otherwise
    pub fn into_result(self) -> Result<Vec<Node>> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.nodes),
        }
    }
}

/// Node <-> frame conversion with per-direction keys
pub trait Codec: Send {
    /// Bytes that open a stream to `domain` for the given client resource
    fn stream_start(&mut self, domain: &str, resource: &str) -> Result<Vec<u8>>;

    /// Encode one node into a frame (encrypted when a writer key is set)
    fn encode(&mut self, node: &Node) -> Result<Vec<u8>>;

    /// Feed received bytes; returns every node completed by them, in order,
    /// up to the first bad frame. Incomplete trailing bytes are kept for
    /// the next call.
    fn decode(&mut self, data: &[u8]) -> Decoded;

    /// Install or clear the inbound key stream
    fn set_reader_key(&mut self, key: Option<Box<dyn KeyStream>>);

    /// Install or clear the outbound key stream
    fn set_writer_key(&mut self, key: Option<Box<dyn KeyStream>>);

    /// Return both directions to the unkeyed state
    fn reset_keys(&mut self) {
        self.set_reader_key(None);
        self.set_writer_key(None);
    }

    /// Drop keys and any buffered input before a new connection
    fn reset(&mut self) {
        self.reset_keys();
    }
}
