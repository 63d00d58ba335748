//! Does all communication related stuff with the JS8Call daemon.
//!
//! JS8Call exposes a newline-delimited JSON API on a TCP port (default 2442).
//! The link owns the socket in a background receive task that reconnects
//! forever while running, and turns every directed message into a
//! [`DirectedMessage`] on the stream returned by [`RadioLink::start`].
//! Outbound sends go through the [`Transmitter`] seam and are serialized by
//! the send mutex.
//!
//! Wire shapes:
//!   Inbound:  `{"type": "RX.DIRECTED", "value": {"FROM": "...", "TO": "...", "TEXT": "..."}}`
//!   Outbound: `{"type": "TX.SEND_MESSAGE", "value": {"TO": "...", "TEXT": "..."}}`
//!
//! Field names vary slightly between JS8Call versions; the decoder tolerates
//! the lowercase fallbacks and logs raw traffic at debug level so operators
//! can calibrate.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio::time::timeout;

/// Delay between reconnect attempts towards the daemon.
const RECONNECT_DELAY: Duration = Duration::from_secs(10);

/// Socket timeout for connects and reads. Timing out on a read is normal and
/// lets the loop observe the shutdown flag.
const SOCKET_TIMEOUT: Duration = Duration::from_secs(5);

/// One directed message as decoded from the daemon. Callsigns are uppercased
/// and trimmed; the text is trimmed only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectedMessage {
    pub from: String,
    pub to: String,
    pub text: String,
}

/// The outbound seam: anything that can carry a directed text message to a
/// callsign. Implemented by [`RadioLink`]; tests substitute a recorder.
#[async_trait]
pub trait Transmitter: Send + Sync {
    /// Sends a directed message. Returns true if the bytes were written to
    /// the socket; the actual radio transmission may be delayed by the
    /// daemon's own PTT and scheduling logic.
    async fn transmit(&self, to: &str, text: &str) -> bool;
}

#[derive(Serialize)]
struct TxEnvelope<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    value: TxValue<'a>,
}

#[derive(Serialize)]
struct TxValue<'a> {
    #[serde(rename = "TO")]
    to: &'a str,
    #[serde(rename = "TEXT")]
    text: &'a str,
}

/// Maintains a persistent TCP connection to JS8Call.
pub struct RadioLink {
    host: String,
    port: u16,
    writer: Arc<Mutex<Option<OwnedWriteHalf>>>,
    running: Arc<AtomicBool>,
    recv_task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl RadioLink {
    pub fn new(host: &str, port: u16) -> RadioLink {
        RadioLink {
            host: host.to_string(),
            port,
            writer: Arc::new(Mutex::new(None)),
            running: Arc::new(AtomicBool::new(false)),
            recv_task: std::sync::Mutex::new(None),
        }
    }

    /// Starts the background receiver and returns the stream of directed
    /// messages. Messages are delivered in the order the daemon sent them.
    pub fn start(&self) -> UnboundedReceiver<DirectedMessage> {
        let (events, stream) = mpsc::unbounded_channel();
        self.running.store(true, Ordering::SeqCst);
        let handle = tokio::spawn(recv_loop(
            self.host.clone(),
            self.port,
            Arc::clone(&self.writer),
            Arc::clone(&self.running),
            events,
        ));
        *self.recv_task.lock().unwrap() = Some(handle);
        tracing::info!(host = %self.host, port = self.port, "radio link started");
        stream
    }

    /// Shuts the link down. Closing the socket unblocks any pending read;
    /// the receive task is aborted so quit does not wait out a connection
    /// attempt in progress.
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.writer.lock().await.take();
        if let Some(handle) = self.recv_task.lock().unwrap().take() {
            handle.abort();
        }
        tracing::info!("radio link stopped");
    }

    /// True while a socket to the daemon is open.
    pub async fn connected(&self) -> bool {
        self.writer.lock().await.is_some()
    }
}

#[async_trait]
impl Transmitter for RadioLink {
    async fn transmit(&self, to: &str, text: &str) -> bool {
        let to = to.to_uppercase();
        let envelope = TxEnvelope {
            kind: "TX.SEND_MESSAGE",
            value: TxValue { to: &to, text },
        };
        let raw = match serde_json::to_string(&envelope) {
            Ok(raw) => raw,
            Err(err) => {
                tracing::error!(?err, "could not serialize send request");
                return false;
            }
        };

        let mut guard = self.writer.lock().await;
        let result = match guard.as_mut() {
            Some(writer) => writer.write_all(format!("{raw}\n").as_bytes()).await,
            None => {
                tracing::warn!("cannot send: not connected to JS8Call");
                return false;
            }
        };
        match result {
            Ok(()) => {
                tracing::debug!(%raw, "daemon TX");
                true
            }
            Err(err) => {
                // The receive loop notices the dead socket and reconnects.
                tracing::error!(?err, "send failed; closing socket");
                guard.take();
                false
            }
        }
    }
}

/// Background task: keep a connection up and pump decoded directed messages
/// onto the event channel.
async fn recv_loop(
    host: String,
    port: u16,
    writer: Arc<Mutex<Option<OwnedWriteHalf>>>,
    running: Arc<AtomicBool>,
    events: UnboundedSender<DirectedMessage>,
) {
    while running.load(Ordering::SeqCst) {
        let stream = match timeout(SOCKET_TIMEOUT, TcpStream::connect((host.as_str(), port))).await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(err)) => {
                tracing::warn!(%host, port, ?err, "JS8Call connection failed");
                tokio::time::sleep(RECONNECT_DELAY).await;
                continue;
            }
            Err(_) => {
                tracing::warn!(%host, port, "JS8Call connection attempt timed out");
                tokio::time::sleep(RECONNECT_DELAY).await;
                continue;
            }
        };
        tracing::info!(%host, port, "connected to JS8Call");
        let (read_half, write_half) = stream.into_split();
        *writer.lock().await = Some(write_half);

        let mut lines = BufReader::new(read_half).lines();
        loop {
            if !running.load(Ordering::SeqCst) {
                break;
            }
            match timeout(SOCKET_TIMEOUT, lines.next_line()).await {
                Err(_) => continue, // read timeout, just poll again
                Ok(Ok(Some(line))) => dispatch_line(&line, &events),
                Ok(Ok(None)) => {
                    tracing::warn!("JS8Call closed the connection; reconnecting");
                    break;
                }
                Ok(Err(err)) => {
                    if running.load(Ordering::SeqCst) {
                        tracing::error!(?err, "receive error; reconnecting");
                    }
                    break;
                }
            }
        }
        writer.lock().await.take();
    }
}

fn dispatch_line(line: &str, events: &UnboundedSender<DirectedMessage>) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }
    tracing::debug!(%line, "daemon RX raw");
    let event: serde_json::Value = match serde_json::from_str(line) {
        Ok(event) => event,
        Err(err) => {
            tracing::debug!(%line, ?err, "non-JSON data from JS8Call");
            return;
        }
    };
    if let Some(message) = decode_event(&event) {
        tracing::info!(from = %message.from, to = %message.to, text = %message.text, "daemon directed message");
        // Send failure means the consumer is gone, which only happens during
        // shutdown.
        let _ = events.send(message);
    }
}

/// Decodes one daemon event into a directed message, or `None` for event
/// kinds we do not care about.
fn decode_event(event: &serde_json::Value) -> Option<DirectedMessage> {
    let kind = event.get("type").and_then(|v| v.as_str()).unwrap_or_default();
    if kind != "RX.DIRECTED" && kind != "RX.DIRECTED.ME" {
        tracing::debug!(kind, "ignored JS8Call event type");
        return None;
    }

    fn field<'v>(value: Option<&'v serde_json::Value>, names: &[&str]) -> &'v str {
        names
            .iter()
            .find_map(|name| value.and_then(|v| v.get(*name)).and_then(|v| v.as_str()))
            .unwrap_or_default()
            .trim()
    }

    let value = event.get("value");
    Some(DirectedMessage {
        from: field(value, &["FROM", "from"]).to_uppercase(),
        to: field(value, &["TO", "to"]).to_uppercase(),
        text: field(value, &["TEXT", "text", "VALUE"]).to_string(),
    })
}
