//! In-memory transport.
//!
//! The [`LoopbackPeer`] half plays the server: it sees every frame the
//! client sent and can push bytes, errors and end-of-stream back.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;

use super::{EventSender, Transport, TransportEvent};
use crate::error::{Result, WaError};

#[derive(Debug, Default)]
struct Shared {
    events: Option<EventSender>,
    sent: Vec<Vec<u8>>,
    connects: Vec<(String, u16)>,
    refuse: Option<String>,
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Client half of an in-memory connection
#[derive(Debug, Clone)]
pub struct LoopbackTransport {
    shared: Arc<Mutex<Shared>>,
}

/// Server half of an in-memory connection
#[derive(Debug, Clone)]
pub struct LoopbackPeer {
    shared: Arc<Mutex<Shared>>,
}

impl LoopbackTransport {
    /// Create a connected pair
    pub fn pair() -> (Self, LoopbackPeer) {
        let shared = Arc::new(Mutex::new(Shared::default()));
        (
            Self {
                shared: Arc::clone(&shared),
            },
            LoopbackPeer { shared },
        )
    }
}

impl Transport for LoopbackTransport {
    fn connect(&mut self, host: &str, port: u16, events: EventSender) {
        let mut shared = lock(&self.shared);
        shared.connects.push((host.to_string(), port));

        match shared.refuse.clone() {
            Some(reason) => {
                let _ = events.send(TransportEvent::Error(reason));
                shared.events = None;
            },
            None => {
                let _ = events.send(TransportEvent::Connected);
                shared.events = Some(events);
            },
        }
    }

    fn send(&mut self, frame: Vec<u8>) -> Result<()> {
        let mut shared = lock(&self.shared);
        if shared.events.is_none() {
            return Err(WaError::NotConnected);
        }
        shared.sent.push(frame);
        Ok(())
    }

    fn disconnect(&mut self) {
        lock(&self.shared).events = None;
    }

    fn name(&self) -> &'static str {
        "loopback"
    }
}

impl LoopbackPeer {
    /// Frames sent by the client since the last call
    pub fn take_sent(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut lock(&self.shared).sent)
    }

    /// Every (host, port) the client connected to, in order
    pub fn connects(&self) -> Vec<(String, u16)> {
        lock(&self.shared).connects.clone()
    }

    /// Whether the client side currently holds a connection
    pub fn is_connected(&self) -> bool {
        lock(&self.shared).events.is_some()
    }

    /// Make subsequent connect attempts fail with `reason` (None accepts again)
    pub fn refuse_connects(&self, reason: Option<&str>) {
        lock(&self.shared).refuse = reason.map(str::to_string);
    }

    /// Deliver bytes to the client
    pub fn push(&self, data: impl Into<Bytes>) -> bool {
        self.emit(TransportEvent::Data(data.into()))
    }

    /// Report a connection error to the client
    pub fn fail(&self, reason: &str) -> bool {
        self.emit(TransportEvent::Error(reason.to_string()))
    }

    /// Close the stream from the server side
    pub fn end(&self) -> bool {
        let events = lock(&self.shared).events.take();
        events.is_some_and(|tx| tx.send(TransportEvent::End).is_ok())
    }

    fn emit(&self, event: TransportEvent) -> bool {
        lock(&self.shared)
            .events
            .as_ref()
            .is_some_and(|tx| tx.send(event).is_ok())
    }
}
