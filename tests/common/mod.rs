//! Shared harness for client integration tests.
//!
//! The client talks to a [`LoopbackPeer`] through a [`RecordingCodec`]
//! that frames nodes with the real binary layout but only records key
//! activations, so the peer side can decode every frame in plain form.

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use whatsapi::codec::{BinaryCodec, Codec, Decoded, KeyStream, STREAM_PROLOGUE};
use whatsapi::media::{Thumbnailer, UploadFuture, UploadRequest, Uploader};
use whatsapi::protocol::builders::HostedMedia;
use whatsapi::{Client, Config, Event, EventStream, LoopbackPeer, LoopbackTransport, Node};

/// Ordered log of codec activity
pub type Journal = Arc<Mutex<Vec<String>>>;

/// Binary framing without encryption; key changes go to the journal
pub struct RecordingCodec {
    inner: BinaryCodec,
    journal: Journal,
}

impl RecordingCodec {
    pub fn new(journal: Journal) -> Self {
        Self {
            inner: BinaryCodec::new(),
            journal,
        }
    }

    fn log(&self, entry: impl Into<String>) {
        self.journal.lock().unwrap().push(entry.into());
    }
}

impl Codec for RecordingCodec {
    fn stream_start(&mut self, domain: &str, resource: &str) -> whatsapi::Result<Vec<u8>> {
        self.log("stream start");
        self.inner.stream_start(domain, resource)
    }

    fn encode(&mut self, node: &Node) -> whatsapi::Result<Vec<u8>> {
        self.log(format!("send {}", node.tag()));
        self.inner.encode(node)
    }

    fn decode(&mut self, data: &[u8]) -> Decoded {
        self.inner.decode(data)
    }

    fn set_reader_key(&mut self, key: Option<Box<dyn KeyStream>>) {
        self.log(if key.is_some() { "reader key" } else { "reader cleared" });
    }

    fn set_writer_key(&mut self, key: Option<Box<dyn KeyStream>>) {
        self.log(if key.is_some() { "writer key" } else { "writer cleared" });
    }

    fn reset(&mut self) {
        self.log("reset");
        self.inner.reset();
    }
}

/// Uploader that records calls and serves a fixed URL
#[derive(Default)]
pub struct FakeUploader {
    pub calls: AtomicUsize,
}

impl Uploader for FakeUploader {
    fn upload(&self, request: UploadRequest) -> UploadFuture {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move {
            Ok(HostedMedia {
                url: format!("{}/uploaded.png", request.url),
                kind: "image".to_string(),
                size: "7".to_string(),
                file: "uploaded.png".to_string(),
            })
        })
    }
}

/// Thumbnailer returning fixed bytes
pub struct FakeThumbnailer;

impl Thumbnailer for FakeThumbnailer {
    fn image_thumbnail(&self, _path: &Path) -> whatsapi::Result<Vec<u8>> {
        Ok(b"thumb".to_vec())
    }

    fn video_thumbnail(&self, _path: &Path) -> whatsapi::Result<Vec<u8>> {
        Ok(b"frame".to_vec())
    }
}

pub const MSISDN: &str = "491234567";
pub const SELF_JID: &str = "491234567@s.whatsapp.net";
pub const CONTACT: &str = "497654321@s.whatsapp.net";

/// base64("secret")
pub const PASSWORD: &str = "c2VjcmV0";

/// Client wired to an in-memory server
pub struct Harness {
    pub client: Client,
    pub peer: LoopbackPeer,
    pub events: EventStream,
    pub journal: Journal,
    pub uploader: Arc<FakeUploader>,
    pub dir: tempfile::TempDir,
    reader: BinaryCodec,
    writer: BinaryCodec,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(configure: impl FnOnce(&mut Config)) -> Self {
        let dir = tempfile::tempdir().unwrap();

        let mut config = Config::new(MSISDN, PASSWORD);
        config.server.host = "loopback.test".to_string();
        config.server.port = 5222;
        config.client.challenge_file = dir.path().join("challenge");
        configure(&mut config);

        let journal = Journal::default();
        let (transport, peer) = LoopbackTransport::pair();
        let uploader = Arc::new(FakeUploader::default());

        let mut client = Client::new(config)
            .unwrap()
            .with_codec(Box::new(RecordingCodec::new(Arc::clone(&journal))))
            .with_transport(Box::new(transport))
            .with_uploader(uploader.clone())
            .with_thumbnailer(Arc::new(FakeThumbnailer));
        let events = client.take_events().unwrap();

        Self {
            client,
            peer,
            events,
            journal,
            uploader,
            dir,
            reader: BinaryCodec::accepting(),
            writer: BinaryCodec::new(),
        }
    }

    /// Connect and handle the resulting transport events
    pub fn connect(&mut self) {
        self.client.connect(None);
        self.client.poll_transport();
    }

    /// Deliver a node from the server and dispatch it
    pub fn inject(&mut self, node: Node) {
        let frame = self.frame(&node);
        self.inject_raw(frame);
    }

    /// Server-side framing of `node`
    pub fn frame(&mut self, node: &Node) -> Vec<u8> {
        self.writer.encode(node).unwrap()
    }

    /// Deliver raw bytes from the server and dispatch them
    pub fn inject_raw(&mut self, bytes: Vec<u8>) {
        assert!(self.peer.push(bytes), "client is not connected");
        self.client.poll_transport();
    }

    /// Nodes the client sent since the last call (stream start excluded)
    pub fn sent(&mut self) -> Vec<Node> {
        let mut nodes = Vec::new();
        for frame in self.peer.take_sent() {
            if frame.starts_with(&STREAM_PROLOGUE) {
                self.reader = BinaryCodec::accepting();
                self.reader.decode(&frame).into_result().unwrap();
                continue;
            }
            nodes.extend(self.reader.decode(&frame).into_result().unwrap());
        }
        nodes
    }

    /// Events emitted since the last call
    pub fn events(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    pub fn journal(&self) -> Vec<String> {
        self.journal.lock().unwrap().clone()
    }

    /// Connect, log in through a challenge, and forget the traffic
    pub fn login(&mut self) {
        self.connect();
        self.client.login(None).unwrap();
        self.inject(Node::new("challenge").with_payload(b"nonce".to_vec()));
        self.inject(Node::new("success").with_payload(b"token".to_vec()));
        assert!(self.client.session().is_authenticated());
        self.sent();
        self.events();
    }
}

/// Position of the first journal entry equal to `entry`
pub fn position(journal: &[String], entry: &str) -> usize {
    journal
        .iter()
        .position(|e| e == entry)
        .unwrap_or_else(|| panic!("{entry:?} not in journal {journal:?}"))
}

/// Callback storing its outcome
pub fn capture() -> (whatsapi::ResponseCallback, Arc<Mutex<Vec<whatsapi::ResponseResult>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let callback: whatsapi::ResponseCallback = Box::new(move |result, _id| {
        sink.lock().unwrap().push(result);
    });
    (callback, seen)
}

/// Serve `routes` (path, status line plus headers, body) over plain HTTP,
/// one response per connection. Unknown paths get a 404. Returns the base URL.
pub async fn serve_http(routes: Vec<(&'static str, String, Vec<u8>)>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            let text = String::from_utf8_lossy(&request).to_string();
            let path = text.split(' ').nth(1).unwrap_or_default().to_string();

            let (head, body) = routes
                .iter()
                .find(|(route, _, _)| *route == path)
                .map(|(_, head, body)| (head.clone(), body.clone()))
                .unwrap_or_else(|| ("HTTP/1.1 404 Not Found\r\n".to_string(), Vec::new()));
            let response = format!(
                "{head}Content-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.write_all(&body).await.unwrap();
            socket.shutdown().await.ok();
        }
    });
    base
}
