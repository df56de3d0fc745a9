//! Transport layer abstraction.
//!
//! A transport moves raw frames; it knows nothing about nodes or keys.
//! Inbound activity is pushed to the client as [`TransportEvent`]s over an
//! unbounded channel handed over at connect time, so the client run loop
//! sees connect, data, error and end notifications in the order they
//! happened.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │                 Client                   │
//! │   send(frame)          ▲ TransportEvent  │
//! └──────┬─────────────────┼─────────────────┘
//!        ▼                 │
//! ┌─────────────────┐ ┌─────────────────────┐
//! │  TcpTransport   │ │  LoopbackTransport  │
//! │  (tokio tasks)  │ │   (in-memory peer)  │
//! └─────────────────┘ └─────────────────────┘
//! ```

mod loopback;
mod tcp;

pub use loopback::{LoopbackPeer, LoopbackTransport};
pub use tcp::TcpTransport;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::Result;

/// Push notification from a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Connection established
    Connected,
    /// Bytes received
    Data(Bytes),
    /// Connection-level failure (connect refused, I/O error)
    Error(String),
    /// Peer closed the stream
    End,
}

/// Channel the transport pushes its events into
pub type EventSender = mpsc::UnboundedSender<TransportEvent>;

/// Receiving side of [`EventSender`]
pub type EventReceiver = mpsc::UnboundedReceiver<TransportEvent>;

/// Byte transport for one client connection.
///
/// `connect` returns immediately; the outcome arrives as
/// [`TransportEvent::Connected`] or [`TransportEvent::Error`].
pub trait Transport: Send {
    /// Open a connection, replacing any existing one
    fn connect(&mut self, host: &str, port: u16, events: EventSender);

    /// Queue a frame for sending
    fn send(&mut self, frame: Vec<u8>) -> Result<()>;

    /// Close the connection without emitting an end event
    fn disconnect(&mut self);

    /// Transport name for logging
    fn name(&self) -> &'static str;
}
