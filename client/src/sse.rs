use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::{Buf, BytesMut};
use chrono::{DateTime, Utc};
use futures::stream::{Stream, StreamExt};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::{debug, error, info, warn};
use warmap_shared::{EntityChange, StreamKind};

use crate::config::{StreamConfig, USER_AGENT};
use crate::error::{ClientError, MalformedMessage, StreamError};

const STREAM_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Server hello sent right after the channel opens. Carries no entity.
const CONNECTION_ESTABLISHED: &str = "connection_established";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Live,
    Reconnecting,
    /// Bounded retries exhausted. Only a new `connect()` leaves this state.
    Failed,
}

/// One decoded push from the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct DomainMessage {
    pub kind: StreamKind,
    pub payload: serde_json::Value,
    pub event_id: Option<String>,
    pub received_at: DateTime<Utc>,
}

impl DomainMessage {
    pub fn entity_change(&self) -> Option<EntityChange> {
        EntityChange::from_payload(self.kind, &self.payload)
    }
}

/// What every subscriber observes: messages, and at most one terminal error per connect.
pub type StreamItem = Result<DomainMessage, StreamError>;

struct Shared {
    tx: broadcast::Sender<StreamItem>,
    replay: Mutex<VecDeque<DomainMessage>>,
    replay_capacity: usize,
    status: watch::Sender<ConnectionStatus>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    fn publish(&self, item: StreamItem) {
        // Held across the send so a concurrent subscribe sees each message exactly once.
        let mut replay = lock(&self.replay);
        if let Ok(message) = &item
            && self.replay_capacity > 0
        {
            replay.push_back(message.clone());
            while replay.len() > self.replay_capacity {
                replay.pop_front();
            }
        }
        let _ = self.tx.send(item);
    }

    fn subscribe(&self) -> Subscription {
        let replay = lock(&self.replay);
        let backlog = replay.iter().cloned().map(Ok).collect();
        let rx = BroadcastStream::new(self.tx.subscribe());
        Subscription {
            backlog,
            rx,
            missed: 0,
        }
    }

    fn set_status(&self, status: ConnectionStatus) {
        self.status.send_replace(status);
    }
}

/// A receiver on the consumer's broadcast, starting with any replayed backlog.
pub struct Subscription {
    backlog: VecDeque<StreamItem>,
    rx: BroadcastStream<StreamItem>,
    missed: u64,
}

impl Subscription {
    /// Next item, or `None` once the consumer has been dropped.
    pub async fn recv(&mut self) -> Option<StreamItem> {
        if let Some(item) = self.backlog.pop_front() {
            return Some(item);
        }
        while let Some(result) = self.rx.next().await {
            match result {
                Ok(item) => return Some(item),
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    warn!(
                        skipped_messages = skipped,
                        "stream subscriber lagged behind broadcast buffer"
                    );
                    self.missed = self.missed.saturating_add(skipped);
                }
            }
        }
        None
    }

    /// Messages dropped by lag since the last call. Non-zero means local state
    /// may have missed changes and should be reloaded.
    pub fn take_missed(&mut self) -> u64 {
        std::mem::take(&mut self.missed)
    }

    pub fn into_stream(mut self) -> impl Stream<Item = StreamItem> + Send {
        async_stream::stream! {
            while let Some(item) = self.recv().await {
                yield item;
            }
        }
    }
}

/// Maintains one persistent push channel and fans its messages out to subscribers.
pub struct EventStreamConsumer {
    config: StreamConfig,
    http: reqwest::Client,
    shared: Arc<Shared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl EventStreamConsumer {
    pub fn new(config: StreamConfig) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(Duration::from_secs(STREAM_CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(ClientError::Build)?;
        Ok(Self::with_client(config, http))
    }

    pub fn with_client(config: StreamConfig, http: reqwest::Client) -> Self {
        let (tx, _) = broadcast::channel(config.broadcast_buffer.max(1));
        let (status, _) = watch::channel(ConnectionStatus::Disconnected);
        let shared = Arc::new(Shared {
            tx,
            replay: Mutex::new(VecDeque::with_capacity(config.replay_buffer)),
            replay_capacity: config.replay_buffer,
            status,
        });
        Self {
            config,
            http,
            shared,
            task: Mutex::new(None),
        }
    }

    /// Opens the channel unless it is already running.
    pub fn connect(&self) {
        let mut task = lock(&self.task);
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }
        info!(url = %self.config.url, "connecting event stream");
        *task = Some(tokio::spawn(run(
            self.config.clone(),
            self.http.clone(),
            Arc::clone(&self.shared),
        )));
    }

    /// Closes the channel. Safe to call any number of times.
    pub fn disconnect(&self) {
        let Some(handle) = lock(&self.task).take() else {
            return;
        };
        handle.abort();
        if *self.shared.status.borrow() != ConnectionStatus::Failed {
            self.shared.set_status(ConnectionStatus::Disconnected);
        }
        info!("event stream disconnected");
    }

    pub fn subscribe(&self) -> Subscription {
        self.shared.subscribe()
    }

    pub fn messages(&self) -> impl Stream<Item = StreamItem> + Send {
        self.subscribe().into_stream()
    }

    /// Messages of a single kind. Terminal errors are always passed through.
    pub fn messages_of(&self, kind: StreamKind) -> impl Stream<Item = StreamItem> + Send {
        self.messages().filter(move |item| {
            let keep = match item {
                Ok(message) => message.kind == kind,
                Err(_) => true,
            };
            futures::future::ready(keep)
        })
    }

    pub fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.shared.status.subscribe()
    }
}

impl Drop for EventStreamConsumer {
    fn drop(&mut self) {
        if let Some(handle) = lock(&self.task).take() {
            handle.abort();
        }
    }
}

async fn run(config: StreamConfig, http: reqwest::Client, shared: Arc<Shared>) {
    let mut consecutive_failures: u32 = 0;

    loop {
        shared.set_status(if consecutive_failures == 0 {
            ConnectionStatus::Connecting
        } else {
            ConnectionStatus::Reconnecting
        });

        let err = match open(&http, &config.url).await {
            Ok(resp) => {
                consecutive_failures = 0;
                shared.set_status(ConnectionStatus::Live);
                info!(url = %config.url, "event stream live");
                pump(resp, &shared).await
            }
            Err(e) => e,
        };

        consecutive_failures = consecutive_failures.saturating_add(1);
        if let Some(max_retries) = config.max_retries
            && consecutive_failures >= max_retries
        {
            error!(
                attempts = consecutive_failures,
                error = %err,
                "event stream reconnect limit reached; giving up"
            );
            shared.set_status(ConnectionStatus::Failed);
            shared.publish(Err(StreamError::RetriesExhausted {
                attempts: consecutive_failures,
                last: Box::new(err),
            }));
            return;
        }

        warn!(
            attempt = consecutive_failures,
            max_retries = ?config.max_retries,
            delay_ms = config.reconnect_delay.as_millis() as u64,
            error = %err,
            "event stream lost; reconnecting"
        );
        shared.set_status(ConnectionStatus::Reconnecting);
        tokio::time::sleep(config.reconnect_delay).await;
    }
}

async fn open(http: &reqwest::Client, url: &str) -> Result<reqwest::Response, StreamError> {
    let resp = http
        .get(url)
        .header(reqwest::header::ACCEPT, "text/event-stream")
        .header(reqwest::header::CACHE_CONTROL, "no-cache")
        .send()
        .await
        .map_err(|e| StreamError::Connect(e.to_string()))?;

    let status = resp.status();
    if !status.is_success() {
        return Err(StreamError::Status(status.as_u16()));
    }
    Ok(resp)
}

/// Reads frames until the body ends or fails. Always returns the reason it stopped.
async fn pump(resp: reqwest::Response, shared: &Shared) -> StreamError {
    let mut parser = FrameParser::default();
    let mut body = resp.bytes_stream();

    while let Some(chunk) = body.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => return StreamError::Read(e.to_string()),
        };
        let frames = match parser.push(&chunk) {
            Ok(frames) => frames,
            Err(e) => return e,
        };
        for frame in frames {
            match decode_frame(frame) {
                Ok(Some(message)) => shared.publish(Ok(message)),
                Ok(None) => {}
                Err(e) => warn!(error = %e, "dropping malformed stream message"),
            }
        }
    }

    StreamError::Closed
}

/// One dispatched server-sent event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Frame {
    event: Option<String>,
    data: String,
    id: Option<String>,
}

/// Longest line accepted before the connection is treated as broken.
const MAX_LINE_BYTES: usize = 1 << 20;

/// Incremental `text/event-stream` parser. Chunks may split lines anywhere;
/// lines end in `\n`, `\r\n` or a bare `\r`.
#[derive(Debug, Default)]
struct FrameParser {
    buf: BytesMut,
    /// Bytes of `buf` already known to hold no line terminator.
    scanned: usize,
    /// The last line ended in `\r`; a leading `\n` belongs to it.
    skip_lf: bool,
    event: Option<String>,
    data: Vec<String>,
    id: Option<String>,
}

impl FrameParser {
    fn push(&mut self, chunk: &[u8]) -> Result<Vec<Frame>, StreamError> {
        self.buf.extend_from_slice(chunk);
        let mut frames = Vec::new();

        loop {
            if self.skip_lf && !self.buf.is_empty() {
                if self.buf[0] == b'\n' {
                    self.buf.advance(1);
                }
                self.skip_lf = false;
            }

            let Some(offset) = self.buf[self.scanned..]
                .iter()
                .position(|b| *b == b'\n' || *b == b'\r')
            else {
                self.scanned = self.buf.len();
                if self.buf.len() > MAX_LINE_BYTES {
                    return Err(StreamError::Read(format!(
                        "line exceeds {MAX_LINE_BYTES} bytes without a terminator"
                    )));
                }
                return Ok(frames);
            };

            let end = self.scanned + offset;
            if end > MAX_LINE_BYTES {
                return Err(StreamError::Read(format!(
                    "line exceeds {MAX_LINE_BYTES} bytes"
                )));
            }
            let line = self.buf.split_to(end);
            self.skip_lf = self.buf[0] == b'\r';
            self.buf.advance(1);
            self.scanned = 0;

            self.line(&String::from_utf8_lossy(&line), &mut frames);
        }
    }

    fn line(&mut self, line: &str, frames: &mut Vec<Frame>) {
        if line.is_empty() {
            if let Some(frame) = self.dispatch() {
                frames.push(frame);
            }
            return;
        }
        if line.starts_with(':') {
            return;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            "id" => self.id = Some(value.to_string()),
            _ => {}
        }
    }

    fn dispatch(&mut self) -> Option<Frame> {
        let event = self.event.take();
        let id = self.id.take();
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(Frame { event, data, id })
    }
}

/// Turns a frame into a domain message. `Ok(None)` for frames that carry no entity.
fn decode_frame(frame: Frame) -> Result<Option<DomainMessage>, MalformedMessage> {
    let body: serde_json::Value = serde_json::from_str(&frame.data)
        .map_err(|e| MalformedMessage::InvalidJson(e.to_string()))?;

    // Unnamed events carry their kind inside the body: `{"type": .., "data": {..}}`.
    let (kind_name, payload) = match frame.event.as_deref() {
        Some(name) if !name.is_empty() && name != "message" => (name.to_string(), body),
        _ => {
            let Some(name) = body.get("type").and_then(|t| t.as_str()).map(str::to_string) else {
                return Err(MalformedMessage::UnknownKind("message".to_string()));
            };
            let payload = body.get("data").cloned().unwrap_or(body);
            (name, payload)
        }
    };

    if kind_name == CONNECTION_ESTABLISHED {
        debug!("event stream handshake received");
        return Ok(None);
    }

    let kind = kind_name
        .parse::<StreamKind>()
        .map_err(|e| MalformedMessage::UnknownKind(e.0))?;

    if EntityChange::from_payload(kind, &payload).is_none() {
        return Err(MalformedMessage::MissingId {
            kind: kind.to_string(),
        });
    }

    Ok(Some(DomainMessage {
        kind,
        payload,
        event_id: frame.id,
        received_at: Utc::now(),
    }))
}
