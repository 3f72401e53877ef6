use crate::core::dispatcher::{estimate_cost, Dispatcher};
use crate::core::error::{GatewayError, Result};
use crate::core::metrics::now_ms;
use crate::llm::{ChatMessage, StreamEvent, ToolCall, ToolDefinition, Usage};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use uuid::Uuid;

/// Bounded wait applied when `reply` is called without `wait_ms`.
pub const DEFAULT_REPLY_WAIT_MS: u64 = 250;

/// One pending item in a stream's reply queue.
///
/// An empty chunk (all fields unset) is the timeout answer, not an error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReplyChunk {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<ToolCall>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub done: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ReplyChunk {
    pub fn text(content: String) -> Self {
        Self {
            chunk: Some(content),
            ..Self::default()
        }
    }

    pub fn tool(call: ToolCall) -> Self {
        Self {
            tool_call: Some(call),
            ..Self::default()
        }
    }

    pub fn finished(usage: Usage) -> Self {
        Self {
            done: true,
            usage: Some(usage),
            ..Self::default()
        }
    }

    pub fn failed(message: String) -> Self {
        Self {
            done: true,
            error: Some(message),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.chunk.is_none() && self.tool_call.is_none() && !self.done && self.error.is_none()
    }
}

struct StreamState {
    history: Vec<ChatMessage>,
    tools: Vec<ToolDefinition>,
    queue: VecDeque<ReplyChunk>,
    closed: bool,
    generating: bool,
    task: Option<JoinHandle<()>>,
    last_activity: Instant,
}

struct StreamEntry {
    stream_id: String,
    alias: String,
    owner: Option<String>,
    state: Mutex<StreamState>,
    notify: Notify,
}

/// Owns streaming session lifecycle: create, ask, reply, cancel.
///
/// Stream state is owned exclusively per `stream_id`: operations on different
/// streams run fully in parallel, operations on one stream serialize on its
/// state lock. `reply`'s bounded wait is the only suspension point and never
/// blocks another stream.
pub struct StreamManager {
    dispatcher: Arc<Dispatcher>,
    streams: RwLock<HashMap<String, Arc<StreamEntry>>>,
    default_wait: Duration,
}

impl StreamManager {
    pub fn new(dispatcher: Arc<Dispatcher>, default_wait: Duration) -> Self {
        Self {
            dispatcher,
            streams: RwLock::new(HashMap::new()),
            default_wait,
        }
    }

    fn entry(&self, stream_id: &str) -> Result<Arc<StreamEntry>> {
        let streams = self.streams.read().expect("stream map lock poisoned");
        streams
            .get(stream_id)
            .cloned()
            .ok_or_else(|| GatewayError::NotFound(format!("stream '{}'", stream_id)))
    }

    /// Open a new stream bound to `alias`. The alias must resolve now;
    /// resolution does not call any provider.
    pub fn create(&self, alias: &str, owner: Option<String>) -> Result<String> {
        self.dispatcher.routes().resolve(alias)?;

        let stream_id = Uuid::new_v4().to_string();
        let entry = Arc::new(StreamEntry {
            stream_id: stream_id.clone(),
            alias: alias.to_string(),
            owner,
            state: Mutex::new(StreamState {
                history: Vec::new(),
                tools: Vec::new(),
                queue: VecDeque::new(),
                closed: false,
                generating: false,
                task: None,
                last_activity: Instant::now(),
            }),
            notify: Notify::new(),
        });

        let mut streams = self.streams.write().expect("stream map lock poisoned");
        streams.insert(stream_id.clone(), entry);
        tracing::info!("Stream created: id={}, alias='{}'", stream_id, alias);
        Ok(stream_id)
    }

    /// Append a user turn and start generating.
    ///
    /// The tool snapshot is replaced with exactly the supplied list on every
    /// call; an empty list means no tools this turn, whatever earlier turns
    /// carried.
    pub async fn ask(
        &self,
        stream_id: &str,
        message: String,
        tools: Vec<ToolDefinition>,
    ) -> Result<()> {
        let entry = self.entry(stream_id)?;
        let mut state = entry.state.lock().await;

        if state.closed {
            return Err(GatewayError::Validation(format!(
                "stream '{}' is closed",
                stream_id
            )));
        }
        if state.generating {
            return Err(GatewayError::Validation(format!(
                "stream '{}' already has a turn generating",
                stream_id
            )));
        }

        state.tools = tools;
        state.history.push(ChatMessage::user(message));
        state.generating = true;
        state.last_activity = Instant::now();

        let history = state.history.clone();
        let tools = state.tools.clone();
        let task = tokio::spawn(run_generation(
            Arc::clone(&entry),
            Arc::clone(&self.dispatcher),
            history,
            tools,
        ));
        state.task = Some(task);
        Ok(())
    }

    /// Dequeue the next pending chunk, waiting up to `wait_ms` for one to
    /// arrive. An elapsed wait returns an empty chunk, not an error.
    /// Delivering the terminal chunk transitions the stream to closed.
    pub async fn reply(&self, stream_id: &str, wait_ms: Option<u64>) -> Result<ReplyChunk> {
        let entry = self.entry(stream_id)?;
        let wait = wait_ms
            .map(Duration::from_millis)
            .unwrap_or(self.default_wait);
        let deadline = Instant::now() + wait;

        loop {
            {
                let mut state = entry.state.lock().await;
                state.last_activity = Instant::now();
                if let Some(chunk) = state.queue.pop_front() {
                    if chunk.done {
                        state.closed = true;
                        tracing::debug!("Stream closed after terminal chunk: id={}", stream_id);
                    }
                    return Ok(chunk);
                }
                if state.closed {
                    return Ok(ReplyChunk::default());
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(ReplyChunk::default());
            }
            // notify_one stores a permit, so an enqueue racing this wait
            // still wakes the next notified().
            let _ = tokio::time::timeout(remaining, entry.notify.notified()).await;
        }
    }

    /// Close a stream immediately, releasing any in-flight provider call and
    /// the chunk queue. Idempotent: unknown or already-closed streams are a
    /// no-op success.
    pub async fn cancel(&self, stream_id: &str) -> Result<()> {
        let removed = {
            let mut streams = self.streams.write().expect("stream map lock poisoned");
            streams.remove(stream_id)
        };

        if let Some(entry) = removed {
            close_entry(&entry).await;
            tracing::info!("Stream cancelled: id={}", stream_id);
        }
        Ok(())
    }

    /// Cancel every stream owned by `connection_id`.
    pub async fn cancel_owned(&self, connection_id: &str) -> usize {
        let owned: Vec<String> = {
            let streams = self.streams.read().expect("stream map lock poisoned");
            streams
                .values()
                .filter(|e| e.owner.as_deref() == Some(connection_id))
                .map(|e| e.stream_id.clone())
                .collect()
        };
        for stream_id in &owned {
            // Cancel is infallible by contract.
            let _ = self.cancel(stream_id).await;
        }
        owned.len()
    }

    /// Drop streams that have been idle beyond the retention window, plus
    /// closed streams whose queues have drained. Abandoned clients are the
    /// normal producer of both.
    pub async fn reap_idle(&self, max_idle: Duration) {
        let candidates: Vec<Arc<StreamEntry>> = {
            let streams = self.streams.read().expect("stream map lock poisoned");
            streams.values().cloned().collect()
        };

        for entry in candidates {
            let reap = {
                let state = entry.state.lock().await;
                let idle = state.last_activity.elapsed();
                (state.closed && state.queue.is_empty())
                    || (!state.generating && idle > max_idle)
            };
            if reap {
                let removed = {
                    let mut streams = self.streams.write().expect("stream map lock poisoned");
                    streams.remove(&entry.stream_id)
                };
                if let Some(entry) = removed {
                    close_entry(&entry).await;
                    tracing::info!("Stream reaped: id={}", entry.stream_id);
                }
            }
        }
    }

    pub fn stream_count(&self) -> usize {
        self.streams.read().expect("stream map lock poisoned").len()
    }
}

/// Mark an entry closed under its state lock so no chunk can be enqueued
/// afterwards, then kill the generation task.
async fn close_entry(entry: &StreamEntry) {
    let task = {
        let mut state = entry.state.lock().await;
        state.closed = true;
        state.queue.clear();
        state.task.take()
    };
    if let Some(task) = task {
        task.abort();
    }
    entry.notify.notify_waiters();
}

/// Push a chunk unless the stream closed underneath us. Returns false when
/// the generation should stop.
async fn enqueue(entry: &StreamEntry, chunk: ReplyChunk) -> bool {
    let mut state = entry.state.lock().await;
    if state.closed {
        return false;
    }
    state.queue.push_back(chunk);
    entry.notify.notify_one();
    true
}

async fn run_generation(
    entry: Arc<StreamEntry>,
    dispatcher: Arc<Dispatcher>,
    history: Vec<ChatMessage>,
    tools: Vec<ToolDefinition>,
) {
    let (ticket, mut stream) = match dispatcher
        .open_stream(&entry.alias, history, tools)
        .await
    {
        Ok(opened) => opened,
        Err(e) => {
            // Failover already ran and was exhausted; surface it as the
            // terminal chunk.
            finish(&entry, ReplyChunk::failed(e.to_string()), String::new()).await;
            return;
        }
    };

    let mut transcript = String::new();
    while let Some(event) = stream.next().await {
        match event {
            Ok(StreamEvent::Delta { content, tool_call }) => {
                // Text from a step is surfaced before its tool call.
                if let Some(text) = content {
                    transcript.push_str(&text);
                    if !enqueue(&entry, ReplyChunk::text(text)).await {
                        return;
                    }
                }
                if let Some(call) = tool_call {
                    if !enqueue(&entry, ReplyChunk::tool(call)).await {
                        return;
                    }
                }
            }
            Ok(StreamEvent::Done { usage }) => {
                dispatcher.metrics().record_success(
                    &ticket.target.provider_id,
                    &ticket.target.model_id,
                    usage,
                    estimate_cost(ticket.cost.as_ref(), usage),
                    now_ms(),
                );
                finish(&entry, ReplyChunk::finished(usage), transcript).await;
                return;
            }
            Err(e) => {
                // Content has already streamed from this target; switching
                // providers now would splice two transcripts. Terminate.
                tracing::warn!(
                    "Mid-stream failure: stream={}, target={}/{}: {}",
                    entry.stream_id,
                    ticket.target.provider_id,
                    ticket.target.model_id,
                    e
                );
                dispatcher.metrics().record_failure(
                    &ticket.target.provider_id,
                    &ticket.target.model_id,
                    now_ms(),
                );
                finish(&entry, ReplyChunk::failed(e.to_string()), transcript).await;
                return;
            }
        }
    }

    // Provider stream ended without a Done marker; close out with what we
    // have rather than hanging the reader.
    dispatcher.metrics().record_success(
        &ticket.target.provider_id,
        &ticket.target.model_id,
        Usage::default(),
        0.0,
        now_ms(),
    );
    finish(&entry, ReplyChunk::finished(Usage::default()), transcript).await;
}

/// Record the assistant turn and enqueue the terminal chunk.
async fn finish(entry: &StreamEntry, terminal: ReplyChunk, transcript: String) {
    let mut state = entry.state.lock().await;
    state.generating = false;
    state.task = None;
    if state.closed {
        return;
    }
    if !transcript.is_empty() {
        state.history.push(ChatMessage::assistant(transcript));
    }
    state.queue.push_back(terminal);
    entry.notify.notify_one();
}
