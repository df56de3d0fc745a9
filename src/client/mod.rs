//! The client: connection and login state machine, inbound dispatch, and
//! the outbound request API.
//!
//! # Control Flow
//!
//! ```text
//! Transport ──TransportEvent──► Client::handle_transport_event
//!                                   │ Data
//!                                   ▼
//!                              Codec::decode ──► Node ──► dispatch rules
//!                                                           │
//!              Emitter ◄── events ──┬── registry callbacks ◄┤
//!                                   └── receipts / acks ────┘──► Codec::encode ──► Transport
//! ```
//!
//! Everything runs on the task that owns the `Client`. Uploads and
//! thumbnails run in background tasks and report back through
//! [`Client::step`], which waits on both sources.

mod dispatch;
mod requests;

pub use requests::GroupListKind;

use std::sync::Arc;

use base64::Engine;

use crate::codec::{BinaryCodec, Cipher, Codec, HmacCipher, KeyStream, MAC_LENGTH};
use crate::config::Config;
use crate::content::ContentProcessor;
use crate::error::{AuthFailure, ResponseError, Result, WaError};
use crate::events::{Emitter, Event, EventStream};
use crate::media::{
    HttpUploader, ImageThumbnailer, MediaCompletion, MediaCoordinator, MediaOutcome, Thumbnailer,
    Uploader,
};
use crate::protocol::{self, builders, Node};
use crate::session::{ResponseCallback, Session, SessionState};
use crate::transport::{EventReceiver, EventSender, TcpTransport, Transport, TransportEvent};

/// Fired once with the outcome of the first connect attempt
pub type ConnectCallback = Box<dyn FnOnce(std::result::Result<(), String>) + Send>;

/// Fired once when login succeeds or fails
pub type LoginCallback = Box<dyn FnOnce(std::result::Result<(), AuthFailure>) + Send>;

/// Protocol client for one account
pub struct Client {
    config: Config,
    session: Session,
    codec: Box<dyn Codec>,
    cipher: Box<dyn Cipher>,
    transport: Box<dyn Transport>,
    transport_tx: EventSender,
    transport_rx: EventReceiver,
    emitter: Emitter,
    events: Option<EventStream>,
    content: ContentProcessor,
    media: MediaCoordinator,
    connect_callback: Option<ConnectCallback>,
    login_callback: Option<LoginCallback>,
    pending_writer_key: Option<Box<dyn KeyStream>>,
    ever_connected: bool,
    closed: bool,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("session", &self.session)
            .field("transport", &self.transport.name())
            .field("media", &self.media)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Create a client with the default TCP transport, binary codec and
    /// HTTP uploader
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let uploader = HttpUploader::new(&config.client.user_agent)?;
        let self_jid = protocol::jid(&config.account.msisdn, &config.server);
        let (transport_tx, transport_rx) = tokio::sync::mpsc::unbounded_channel();
        let (emitter, events) = Emitter::channel();

        Ok(Self {
            session: Session::new(self_jid),
            codec: Box::new(BinaryCodec::new()),
            cipher: Box::new(HmacCipher),
            transport: Box::new(TcpTransport::new()),
            transport_tx,
            transport_rx,
            emitter,
            events: Some(events),
            content: ContentProcessor::new(config.server.group_domain.clone()),
            media: MediaCoordinator::new(Arc::new(uploader), Arc::new(ImageThumbnailer::default())),
            connect_callback: None,
            login_callback: None,
            pending_writer_key: None,
            ever_connected: false,
            closed: false,
            config,
        })
    }

    /// Use a different codec
    pub fn with_codec(mut self, codec: Box<dyn Codec>) -> Self {
        self.codec = codec;
        self
    }

    /// Use a different key derivation
    pub fn with_cipher(mut self, cipher: Box<dyn Cipher>) -> Self {
        self.cipher = cipher;
        self
    }

    /// Use a different transport
    pub fn with_transport(mut self, transport: Box<dyn Transport>) -> Self {
        self.transport = transport;
        self
    }

    /// Use a different media uploader
    pub fn with_uploader(mut self, uploader: Arc<dyn Uploader>) -> Self {
        self.media.set_uploader(uploader);
        self
    }

    /// Use a different thumbnailer
    pub fn with_thumbnailer(mut self, thumbnailer: Arc<dyn Thumbnailer>) -> Self {
        self.media.set_thumbnailer(thumbnailer);
        self
    }

    /// Take the event stream; returns `None` after the first call
    pub fn take_events(&mut self) -> Option<EventStream> {
        self.events.take()
    }

    /// Active configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Session state
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Session state (mutable), e.g. to purge the correlation registry
    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    /// Media jobs in progress
    pub fn media(&self) -> &MediaCoordinator {
        &self.media
    }

    /// Whether the client was closed by `disconnect()` or a final end
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    // ─────────────────────────────────────────────────────────────────────
    // Connection and login
    // ─────────────────────────────────────────────────────────────────────

    /// Open the transport. `callback` fires once, on the first success or
    /// failure of this attempt.
    pub fn connect(&mut self, callback: Option<ConnectCallback>) {
        self.session.begin_connect();
        self.codec.reset();
        self.pending_writer_key = None;
        self.closed = false;

        if callback.is_some() {
            self.connect_callback = callback;
        }

        let host = self.config.server.resolve_host();
        let port = self.config.server.port;
        tracing::info!("Connecting to {}:{} via {}", host, port, self.transport.name());
        self.transport.connect(&host, port, self.transport_tx.clone());
    }

    /// Start the login sequence. Fails without writing anything when the
    /// session is already authenticated.
    pub fn login(&mut self, callback: Option<LoginCallback>) -> Result<()> {
        if self.session.is_authenticated() {
            if let Some(callback) = callback {
                callback(Err(AuthFailure::AlreadyLoggedIn));
            }
            return Err(WaError::AlreadyLoggedIn);
        }

        self.login_callback = callback;
        self.codec.reset_keys();
        self.pending_writer_key = None;

        match self.write_login_frames() {
            Ok(()) => {
                self.session.mark_stream_opened();
                Ok(())
            },
            Err(e) => {
                if let Some(callback) = self.login_callback.take() {
                    callback(Err(AuthFailure::Aborted(e.to_string())));
                }
                Err(e)
            },
        }
    }

    fn write_login_frames(&mut self) -> Result<()> {
        let path = self.config.client.challenge_file.clone();
        let token = self.session.load_challenge_token(&path).to_vec();

        let auth_data = if token.is_empty() {
            Vec::new()
        } else {
            tracing::debug!("Replaying stored challenge token ({} bytes)", token.len());
            let keys = self.cipher.derive_keys(&self.secret()?, &token)?;
            let mut writer = keys.writer;
            let blob = self.fast_login_blob(writer.as_mut(), &token)?;
            self.codec.set_reader_key(Some(keys.reader));
            self.pending_writer_key = Some(writer);
            blob
        };

        let resource = self.config.client.resource(self.config.server.port);
        let start = self.codec.stream_start(&self.config.server.domain, &resource)?;
        self.transport.send(start)?;
        self.send_node(&builders::features())?;
        self.send_node(&builders::auth(&self.config.account.msisdn, auth_data))
    }

    fn secret(&self) -> Result<Vec<u8>> {
        Ok(base64::engine::general_purpose::STANDARD.decode(&self.config.account.password)?)
    }

    fn fast_login_blob(&self, writer: &mut dyn KeyStream, token: &[u8]) -> Result<Vec<u8>> {
        let client = &self.config.client;
        let mut data = token.to_vec();
        data.extend_from_slice(protocol::unix_timestamp().to_string().as_bytes());
        data.extend_from_slice(client.user_agent.as_bytes());
        data.extend_from_slice(format!(" MccMnc/{}001", self.config.account.ccode).as_bytes());
        seal(writer, &self.config.account.msisdn, &data)
    }

    fn handle_challenge(&mut self, node: &Node) -> Result<()> {
        let challenge = node.payload().unwrap_or_default().to_vec();
        let keys = self.cipher.derive_keys(&self.secret()?, &challenge)?;
        let mut writer = keys.writer;

        // a stale fast-login key must never reach the writer
        self.pending_writer_key = None;
        self.codec.set_reader_key(Some(keys.reader));

        let response = seal(writer.as_mut(), &self.config.account.msisdn, &challenge)?;
        self.send_node(&builders::auth_response(response))?;
        self.codec.set_writer_key(Some(writer));
        self.session.mark_challenge_sent();
        tracing::debug!("Challenge answered");
        Ok(())
    }

    fn handle_success(&mut self, node: &Node) {
        let token = node.payload().unwrap_or_default().to_vec();
        let path = self.config.client.challenge_file.clone();
        if let Err(e) = self.session.persist_challenge_token(&path, token) {
            tracing::warn!("Failed to persist challenge token to {}: {}", path.display(), e);
        }

        if let Some(writer) = self.pending_writer_key.take() {
            self.codec.set_writer_key(Some(writer));
        }
        self.session.mark_authenticated();
        tracing::info!("Logged in as {}", self.session.self_jid());

        for message in self.session.drain_queue() {
            let id = message.node.id().unwrap_or_default();
            match self.send_node(&message.node) {
                Ok(()) => {
                    if let Some(callback) = message.callback {
                        self.register(id, callback);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to flush queued message to {}: {}", message.to, e);
                    report_local(message.callback, id, e.to_string());
                },
            }
        }

        self.emitter.emit(Event::LoggedIn);
        if let Some(callback) = self.login_callback.take() {
            callback(Ok(()));
        }
    }

    fn handle_failure(&mut self, node: &Node) {
        let raw = node.to_xml();
        tracing::warn!("Login rejected: {}", raw);

        self.pending_writer_key = None;
        self.session.mark_auth_failed();
        self.emitter.emit(Event::Error(raw.clone()));
        if let Some(callback) = self.login_callback.take() {
            callback(Err(AuthFailure::Rejected(raw)));
        }
    }

    /// Close the transport; no reconnect follows
    pub fn disconnect(&mut self) {
        tracing::info!("Disconnecting");
        self.transport.disconnect();
        self.session.mark_disconnected();
        self.closed = true;
    }

    // ─────────────────────────────────────────────────────────────────────
    // Event loop
    // ─────────────────────────────────────────────────────────────────────

    /// React to one transport notification
    pub fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected => {
                self.session.mark_connected();
                self.ever_connected = true;
                tracing::info!("Connected");
                self.emitter.emit(Event::Connected);
                if let Some(callback) = self.connect_callback.take() {
                    callback(Ok(()));
                }
            },
            TransportEvent::Data(data) => {
                let decoded = self.codec.decode(&data);
                for node in &decoded.nodes {
                    self.process_node(node);
                }
                if let Some(e) = decoded.error {
                    tracing::warn!("Dropping undecodable input: {}", e);
                    self.emitter.emit(Event::Error(e.to_string()));
                }
            },
            TransportEvent::Error(message) => {
                tracing::warn!("Transport error: {}", message);
                if let Some(callback) = self.connect_callback.take() {
                    callback(Err(message.clone()));
                }
                if self.ever_connected {
                    self.emitter.emit(Event::Error(message));
                } else {
                    self.emitter.emit(Event::ConnectError(message));
                }
            },
            TransportEvent::End => {
                self.session.mark_disconnected();
                if self.config.server.reconnect && !self.closed {
                    tracing::info!("Connection ended, reconnecting");
                    self.emitter.emit(Event::Reconnecting);
                    self.connect(None);
                } else {
                    tracing::info!("Connection ended");
                    self.closed = true;
                    self.emitter.emit(Event::Ended);
                }
            },
        }
    }

    /// Handle every transport event already queued without waiting.
    /// Returns how many were handled.
    pub fn poll_transport(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.transport_rx.try_recv() {
            self.handle_transport_event(event);
            handled += 1;
        }
        handled
    }

    /// Wait for the next transport event or media completion and handle it
    pub async fn step(&mut self) {
        tokio::select! {
            Some(event) = self.transport_rx.recv() => self.handle_transport_event(event),
            Some(completion) = self.media.next_completion() => self.handle_media_completion(completion),
            else => tracing::warn!("Event sources closed"),
        }
    }

    /// Run until the connection ends for good or `disconnect()` is called
    pub async fn run(&mut self) {
        while !self.closed {
            self.step().await;
        }
    }

    fn handle_media_completion(&mut self, completion: MediaCompletion) {
        let outcome = self.media.complete(completion);
        self.apply_media_outcome(outcome);
    }

    fn apply_media_outcome(&mut self, outcome: MediaOutcome) {
        match outcome {
            MediaOutcome::Pending | MediaOutcome::Unknown => {},
            MediaOutcome::Ready { job, content } => {
                tracing::debug!("Media {} ready, sending to {}", job.id, job.to);
                if let Err(e) = self.send_content(&job.to, content, job.callback) {
                    tracing::warn!("Failed to send media message to {}: {}", job.to, e);
                }
            },
            MediaOutcome::Failed { job, error } => {
                tracing::warn!("Media {} failed: {}", job.id, error);
                report_local(job.callback, &job.id, error);
            },
            MediaOutcome::Fetched { job } => {
                let id = job.id.clone();
                if let Err(e) = self.request_media_slot(job) {
                    tracing::warn!("Failed to request upload slot for {}: {}", id, e);
                    if let Some(job) = self.media.abort(&id) {
                        report_local(job.callback, &id, e.to_string());
                    }
                }
            },
            MediaOutcome::Rejected { id, remote, error } => {
                tracing::warn!("Media {} from {} rejected: {}", id, remote.url, error);
                report_local(remote.callback, &id, error);
            },
            MediaOutcome::Picture { job, result } => {
                let sent = result.and_then(|(picture, preview)| {
                    let node = builders::set_profile_picture(&job.id, &job.to, picture, preview);
                    self.send_node(&node).map_err(|e| e.to_string())
                });
                match (sent, job.callback) {
                    (Ok(()), Some(callback)) => self.register(&job.id, callback),
                    (Ok(()), None) => {},
                    (Err(error), callback) => {
                        tracing::warn!("Profile picture {} failed: {}", job.id, error);
                        report_local(callback, &job.id, error);
                    },
                }
            },
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Write path
    // ─────────────────────────────────────────────────────────────────────

    /// Encode and send one node
    pub fn send_node(&mut self, node: &Node) -> Result<()> {
        tracing::debug!("tx <{}> id={}", node.tag(), node.id().unwrap_or("-"));
        let frame = self.codec.encode(node)?;
        self.transport.send(frame)
    }

    /// Send a node for which no error is reported back to a caller
    fn reply(&mut self, node: &Node) {
        if let Err(e) = self.send_node(node) {
            tracing::warn!("Failed to send <{}>: {}", node.tag(), e);
        }
    }

    fn register(&mut self, id: &str, callback: ResponseCallback) {
        if let Err(e) = self.session.registry_mut().register(id, callback) {
            tracing::warn!("{}", e);
        }
    }

    fn next_id(&mut self, prefix: &str) -> String {
        self.session.registry_mut().next_id(prefix)
    }

    /// Current session state
    pub fn state(&self) -> SessionState {
        self.session.state()
    }
}

/// Seal `[0; MAC] ++ msisdn ++ data` with the MAC at offset 0
fn seal(writer: &mut dyn KeyStream, msisdn: &str, data: &[u8]) -> Result<Vec<u8>> {
    let mut buffer = vec![0u8; MAC_LENGTH];
    buffer.extend_from_slice(msisdn.as_bytes());
    buffer.extend_from_slice(data);

    let length = buffer.len() - MAC_LENGTH;
    writer.encode_message(&mut buffer, 0, MAC_LENGTH, length)?;
    Ok(buffer)
}

/// Hand a client-side failure to the request's callback, if any
fn report_local(callback: Option<ResponseCallback>, id: &str, error: String) {
    if let Some(callback) = callback {
        callback(Err(ResponseError::local(error)), id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::HmacKeyStream;

    #[test]
    fn test_seal_layout() {
        let mut writer = HmacKeyStream::new(&[1u8; 32], &[2u8; 32]);
        let sealed = seal(&mut writer, "491234", b"nonce").unwrap();

        assert_eq!(sealed.len(), MAC_LENGTH + 6 + 5);
        assert_ne!(&sealed[MAC_LENGTH..MAC_LENGTH + 6], b"491234");

        let mut reader = HmacKeyStream::new(&[1u8; 32], &[2u8; 32]);
        let mut opened = sealed.clone();
        let length = opened.len() - MAC_LENGTH;
        reader.decode_message(&mut opened, 0, MAC_LENGTH, length).unwrap();
        assert_eq!(&opened[MAC_LENGTH..], b"491234nonce");
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        assert!(Client::new(Config::default()).is_err());
    }

    #[tokio::test]
    async fn test_take_events_once() {
        let mut client = Client::new(Config::new("491234", "c2VjcmV0")).unwrap();
        assert!(client.take_events().is_some());
        assert!(client.take_events().is_none());
        assert_eq!(client.state(), SessionState::Disconnected);
    }
}
