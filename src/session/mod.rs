//! Session state: connection flags, auth progress, the deferred outbound
//! queue, the persisted challenge token and the correlation registry.
//!
//! # State Machine
//!
//! ```text
//! Disconnected ──connect()──► Connecting ──transport up──► Connected
//!      ▲                                                      │ login()
//!      │ transport end / failure                              ▼
//!      └──────────── Authenticated ◄──success── ChallengeSent ◄─challenge── StreamOpened
//!                                  ◄──────────────success (fast login)──────────┘
//! ```
//!
//! `connected` and `authenticated` are tracked separately from the state:
//! a dropped transport clears `connected` but `authenticated` only resets
//! on the next `connect()` or an explicit login failure.

mod registry;
mod response;

pub use registry::{CorrelationRegistry, PendingRequest, ResponseCallback, ResponseResult};
pub use response::{Group, GroupParticipant, ParticipantOutcome, Response, UserStatus};

use std::collections::VecDeque;
use std::path::Path;

use crate::error::Result;
use crate::protocol::Node;

/// Connection and authentication progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No transport connection
    #[default]
    Disconnected,
    /// Transport connect in flight
    Connecting,
    /// Transport up, login not started
    Connected,
    /// Stream start, features and auth sent
    StreamOpened,
    /// Challenge answered, waiting for success/failure
    ChallengeSent,
    /// Login succeeded
    Authenticated,
}

/// Message deferred until authentication completes
pub struct QueuedMessage {
    /// Destination address
    pub to: String,
    /// Complete message node, id already assigned
    pub node: Node,
    /// Delivery-ack callback, registered when the message is flushed
    pub callback: Option<ResponseCallback>,
}

impl std::fmt::Debug for QueuedMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuedMessage")
            .field("to", &self.to)
            .field("id", &self.node.id())
            .field("has_callback", &self.callback.is_some())
            .finish()
    }
}

/// Per-client protocol session
#[derive(Debug)]
pub struct Session {
    state: SessionState,
    connected: bool,
    authenticated: bool,
    self_jid: String,
    queue: VecDeque<QueuedMessage>,
    challenge_token: Vec<u8>,
    registry: CorrelationRegistry,
}

impl Session {
    /// Create a session for the given own address
    pub fn new(self_jid: impl Into<String>) -> Self {
        Self {
            state: SessionState::Disconnected,
            connected: false,
            authenticated: false,
            self_jid: self_jid.into(),
            queue: VecDeque::new(),
            challenge_token: Vec::new(),
            registry: CorrelationRegistry::new(),
        }
    }

    /// Get current state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Transport currently connected
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Login completed and not reset since
    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// Own address
    pub fn self_jid(&self) -> &str {
        &self.self_jid
    }

    /// Whether `jid` is our own address
    pub fn is_self(&self, jid: &str) -> bool {
        jid == self.self_jid
    }

    /// Correlation registry
    pub fn registry(&self) -> &CorrelationRegistry {
        &self.registry
    }

    /// Correlation registry (mutable)
    pub fn registry_mut(&mut self) -> &mut CorrelationRegistry {
        &mut self.registry
    }

    /// Challenge token for the next fast login (empty when none)
    pub fn challenge_token(&self) -> &[u8] {
        &self.challenge_token
    }

    /// Replace the challenge token
    pub fn set_challenge_token(&mut self, token: Vec<u8>) {
        self.challenge_token = token;
    }

    /// Load the challenge token from disk; a missing or unreadable file
    /// leaves an empty token.
    pub fn load_challenge_token(&mut self, path: &Path) -> &[u8] {
        self.challenge_token = match std::fs::read(path) {
            Ok(data) => data,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!("Failed to read challenge file {}: {}", path.display(), e);
                }
                Vec::new()
            },
        };
        &self.challenge_token
    }

    /// Store `token` as the current challenge token and write it to disk
    pub fn persist_challenge_token(&mut self, path: &Path, token: Vec<u8>) -> Result<()> {
        self.challenge_token = token;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, &self.challenge_token)?;
        Ok(())
    }

    /// Defer a message until login succeeds
    pub fn enqueue(&mut self, message: QueuedMessage) {
        self.queue.push_back(message);
    }

    /// Messages waiting for login
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Take every deferred message, oldest first
    pub fn drain_queue(&mut self) -> Vec<QueuedMessage> {
        self.queue.drain(..).collect()
    }

    /// `connect()` started; any previous login no longer counts
    pub fn begin_connect(&mut self) {
        self.state = SessionState::Connecting;
        self.authenticated = false;
    }

    /// Transport reported a live connection
    pub fn mark_connected(&mut self) {
        self.connected = true;
        if self.state == SessionState::Connecting {
            self.state = SessionState::Connected;
        }
    }

    /// Transport went away
    pub fn mark_disconnected(&mut self) {
        self.connected = false;
        self.state = SessionState::Disconnected;
    }

    /// Stream start, features and auth were written
    pub fn mark_stream_opened(&mut self) {
        self.state = SessionState::StreamOpened;
    }

    /// Challenge response was written
    pub fn mark_challenge_sent(&mut self) {
        self.state = SessionState::ChallengeSent;
    }

    /// Server accepted the login
    pub fn mark_authenticated(&mut self) {
        self.authenticated = true;
        self.state = SessionState::Authenticated;
    }

    /// Server rejected the login; the transport stays up
    pub fn mark_auth_failed(&mut self) {
        self.authenticated = false;
        self.state = SessionState::Disconnected;
    }
}
