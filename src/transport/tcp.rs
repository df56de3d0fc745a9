//! Plain TCP transport on tokio.
//!
//! One reader task forwards received bytes as events; one writer task
//! drains the outbound frame queue so `send` never blocks the caller.

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{EventSender, Transport, TransportEvent};
use crate::error::{Result, WaError};

const READ_BUFFER_SIZE: usize = 8192;

/// TCP transport using tokio sockets
#[derive(Debug, Default)]
pub struct TcpTransport {
    outbound: Option<mpsc::UnboundedSender<Vec<u8>>>,
    task: Option<JoinHandle<()>>,
}

impl TcpTransport {
    /// Create a disconnected transport
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a connection attempt or connection is live
    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl Transport for TcpTransport {
    fn connect(&mut self, host: &str, port: u16, events: EventSender) {
        self.disconnect();

        let (tx, rx) = mpsc::unbounded_channel();
        self.outbound = Some(tx);

        let addr = format!("{host}:{port}");
        self.task = Some(tokio::spawn(run_connection(addr, events, rx)));
    }

    fn send(&mut self, frame: Vec<u8>) -> Result<()> {
        let outbound = self.outbound.as_ref().ok_or(WaError::NotConnected)?;
        outbound
            .send(frame)
            .map_err(|_| WaError::Transport("connection closed".to_string()))
    }

    fn disconnect(&mut self) {
        self.outbound = None;
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    fn name(&self) -> &'static str {
        "TCP"
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.disconnect();
    }
}

async fn run_connection(
    addr: String,
    events: EventSender,
    mut outbound: mpsc::UnboundedReceiver<Vec<u8>>,
) {
    tracing::debug!("TCP transport connecting to {}", addr);

    let stream = match TcpStream::connect(&addr).await {
        Ok(stream) => stream,
        Err(e) => {
            let _ = events.send(TransportEvent::Error(format!(
                "Failed to connect to {addr}: {e}"
            )));
            return;
        },
    };
    let _ = stream.set_nodelay(true);
    let _ = events.send(TransportEvent::Connected);

    let (mut reader, mut writer) = stream.into_split();

    let writer_events = events.clone();
    let writer_task = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            if let Err(e) = writer.write_all(&frame).await {
                let _ = writer_events.send(TransportEvent::Error(format!("Write failed: {e}")));
                break;
            }
        }
        let _ = writer.shutdown().await;
    });

    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => {
                let _ = events.send(TransportEvent::End);
                break;
            },
            Ok(n) => {
                if events
                    .send(TransportEvent::Data(Bytes::copy_from_slice(&buf[..n])))
                    .is_err()
                {
                    break;
                }
            },
            Err(e) => {
                let _ = events.send(TransportEvent::Error(format!("Read failed: {e}")));
                let _ = events.send(TransportEvent::End);
                break;
            },
        }
    }

    writer_task.abort();
}
