//! # WhatsApi - client session engine for a binary messaging protocol
//!
//! Client for an XMPP-style instant-messaging protocol carried as binary
//! node trees over one long-lived, encrypted stream. The crate drives the
//! connection lifecycle, correlates requests with their responses by id,
//! and turns every inbound node into an acknowledgment, a callback or a
//! typed [`Event`].
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                            Client                             │
//! │  ┌──────────────┐  ┌─────────────────┐  ┌──────────────────┐  │
//! │  │   Session    │  │   Dispatcher    │  │ MediaCoordinator │  │
//! │  │ state, queue │  │  29 node rules  │  │ upload/thumbnail │  │
//! │  │  + registry  │  │ + notifications │  │     stages       │  │
//! │  └──────────────┘  └─────────────────┘  └──────────────────┘  │
//! └──────────┬───────────────────▲──────────────────────┬─────────┘
//!            │ Node              │ Node                 │ HTTP
//!      ┌─────▼───────────────────┴─────┐         ┌──────▼───────┐
//!      │   Codec (BinaryCodec)         │         │   Uploader   │
//!      │   keyed by Cipher streams     │         │ (reqwest)    │
//!      └─────┬───────────────────▲─────┘         └──────────────┘
//!            │ frames            │ TransportEvent
//!      ┌─────▼───────────────────┴─────┐
//!      │ Transport (TCP / loopback)    │
//!      └───────────────────────────────┘
//! ```
//!
//! ## Login
//!
//! | Step | Client sends | Server answers |
//! |------|--------------|----------------|
//! | 1 | stream start, features, auth (empty or fast-login blob) | challenge, or success |
//! | 2 | response sealed with the derived writer key | success / failure |
//! | 3 | queued messages, in order | acks |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use whatsapi::{Client, Config, Event};
//!
//! #[tokio::main]
//! async fn main() -> whatsapi::Result<()> {
//!     let mut client = Client::new(Config::from_env())?;
//!     let mut events = client.take_events().unwrap();
//!
//!     client.connect(None);
//!     client.send_message("491234567", "hello", None)?; // queued until login
//!
//!     loop {
//!         client.step().await;
//!         while let Ok(event) = events.try_recv() {
//!             if event == Event::Connected {
//!                 client.login(None)?;
//!             }
//!             println!("{}", event.name());
//!         }
//!     }
//! }
//! ```

pub mod client;
pub mod codec;
pub mod config;
pub mod content;
pub mod error;
pub mod events;
pub mod media;
pub mod protocol;
pub mod session;
pub mod transport;

pub use client::{Client, ConnectCallback, GroupListKind, LoginCallback};
pub use codec::{BinaryCodec, Cipher, Codec, Decoded, HmacCipher, KeyStream, SessionKeys};
pub use config::{Config, ReceiptPolicy};
pub use content::{ContentKind, ContentMessage, ContentProcessor};
pub use error::{AuthFailure, ResponseError, Result, WaError};
pub use events::{Emitter, Event, EventStream};
pub use media::{MediaCoordinator, MediaStage, MediaType, Thumbnailer, Uploader};
pub use protocol::Node;
pub use session::{
    CorrelationRegistry, Response, ResponseCallback, ResponseResult, Session, SessionState,
};
pub use transport::{LoopbackPeer, LoopbackTransport, TcpTransport, Transport, TransportEvent};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
