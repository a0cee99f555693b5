use std::collections::HashMap;
use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Mutex;
use tokio::time::Instant;
use utoipa::ToSchema;

use workbench_agent_error::WorkbenchError;

/// How long the consumer waits for an event before emitting a keepalive.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// How long the consumer tolerates no events at all before closing the
/// stream as failed.
pub const STREAM_CEILING: Duration = Duration::from_secs(300);

/// Event published by a run worker and relayed to the session's log stream.
///
/// `completed` and `failed` are terminal. A worker emits exactly one
/// terminal event per run, after all of its `progress` events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    #[serde(rename_all = "camelCase")]
    Progress { message: String },
    #[serde(rename_all = "camelCase")]
    Completed {
        reply: String,
        tool_summaries: Vec<String>,
    },
    #[serde(rename_all = "camelCase")]
    Failed { error: String },
}

impl RunEvent {
    /// Wire name of the event, used as the SSE `event:` field.
    pub fn kind(&self) -> &'static str {
        match self {
            RunEvent::Progress { .. } => "progress",
            RunEvent::Completed { .. } => "completed",
            RunEvent::Failed { .. } => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunEvent::Completed { .. } | RunEvent::Failed { .. })
    }
}

struct LogChannel {
    sender: UnboundedSender<RunEvent>,
    receiver: Option<UnboundedReceiver<RunEvent>>,
}

/// Per-session log channels keyed by session id.
///
/// The dispatcher opens a channel before spawning a run worker; the stream
/// consumer claims the receiving half exactly once and discards the channel
/// when it stops reading. Emitting without an open channel drops the event,
/// so workers never block on a missing or disconnected consumer.
#[derive(Default)]
pub struct LogChannelMap {
    channels: Mutex<HashMap<String, LogChannel>>,
}

impl LogChannelMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a fresh channel for the session, replacing any prior one.
    /// A drain claimed from the replaced channel observes a close.
    pub async fn open(&self, session_id: &str) {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.channels.lock().await.insert(
            session_id.to_string(),
            LogChannel {
                sender,
                receiver: Some(receiver),
            },
        );
    }

    /// Best-effort send. Dropped silently when no channel is open or the
    /// consumer is gone.
    pub async fn emit(&self, session_id: &str, event: RunEvent) {
        if let Some(channel) = self.channels.lock().await.get(session_id) {
            let _ = channel.sender.send(event);
        }
    }

    pub async fn emit_progress(&self, session_id: &str, message: impl Into<String>) {
        self.emit(
            session_id,
            RunEvent::Progress {
                message: message.into(),
            },
        )
        .await;
    }

    pub async fn emit_completed(&self, session_id: &str, reply: String, tool_summaries: Vec<String>) {
        self.emit(
            session_id,
            RunEvent::Completed {
                reply,
                tool_summaries,
            },
        )
        .await;
    }

    pub async fn emit_failed(&self, session_id: &str, error: impl Into<String>) {
        self.emit(
            session_id,
            RunEvent::Failed {
                error: error.into(),
            },
        )
        .await;
    }

    /// Takes the receiving half for the session's stream consumer. Each
    /// opened channel can be claimed once.
    pub async fn claim(
        &self,
        session_id: &str,
        config: StreamConfig,
    ) -> Result<EventDrain, WorkbenchError> {
        let mut channels = self.channels.lock().await;
        let channel = channels
            .get_mut(session_id)
            .ok_or_else(|| WorkbenchError::StreamNotFound {
                session_id: session_id.to_string(),
            })?;
        let receiver = channel
            .receiver
            .take()
            .ok_or_else(|| WorkbenchError::StreamClaimed {
                session_id: session_id.to_string(),
            })?;
        Ok(EventDrain::new(receiver, config))
    }

    /// Removes the session's channel. Safe to call whether or not one is
    /// open; later emits for the id are dropped.
    pub async fn discard(&self, session_id: &str) {
        self.channels.lock().await.remove(session_id);
    }
}

/// Timing knobs for a claimed stream.
#[derive(Debug, Clone, Copy)]
pub struct StreamConfig {
    pub keepalive: Duration,
    pub ceiling: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            keepalive: KEEPALIVE_INTERVAL,
            ceiling: STREAM_CEILING,
        }
    }
}

/// One frame of a claimed stream, as seen by the HTTP layer.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamFrame {
    /// No event within the keepalive interval; the connection should be
    /// kept warm with an SSE comment.
    Keepalive,
    Event(RunEvent),
    /// Nothing arrived for the whole ceiling; the stream is over and should
    /// be reported as failed.
    TimedOut,
    /// The channel was replaced or discarded while draining.
    Closed,
}

/// Exclusive reader over one run's events.
///
/// Yields frames until the first terminal event, a timeout, or channel
/// close, then `None` forever. The ceiling deadline resets whenever a real
/// event arrives; keepalives do not reset it.
#[derive(Debug)]
pub struct EventDrain {
    receiver: UnboundedReceiver<RunEvent>,
    keepalive: Duration,
    ceiling: Duration,
    deadline: Instant,
    finished: bool,
}

impl EventDrain {
    fn new(receiver: UnboundedReceiver<RunEvent>, config: StreamConfig) -> Self {
        Self {
            receiver,
            keepalive: config.keepalive,
            ceiling: config.ceiling,
            deadline: Instant::now() + config.ceiling,
            finished: false,
        }
    }

    pub async fn next_frame(&mut self) -> Option<StreamFrame> {
        if self.finished {
            return None;
        }
        let wait = self
            .keepalive
            .min(self.deadline.saturating_duration_since(Instant::now()));
        match tokio::time::timeout(wait, self.receiver.recv()).await {
            Ok(Some(event)) => {
                self.deadline = Instant::now() + self.ceiling;
                if event.is_terminal() {
                    self.finished = true;
                }
                Some(StreamFrame::Event(event))
            }
            Ok(None) => {
                self.finished = true;
                Some(StreamFrame::Closed)
            }
            Err(_) if Instant::now() >= self.deadline => {
                self.finished = true;
                Some(StreamFrame::TimedOut)
            }
            Err(_) => Some(StreamFrame::Keepalive),
        }
    }
}
