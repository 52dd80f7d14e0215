//! Per-run event buffers decoupling producers from the SSE consumer.
//!
//! POST /chat starts the graph before the client's SSE connection exists;
//! early events (`metadata`, `agent_start`) would be lost without a buffer.
//! Each run gets one queue: the producer pushes, exactly one consumer
//! drains. A TTL timer reclaims buffers no consumer ever attaches to.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{EngineError, EngineResult};
use crate::events::Event;

/// Lifecycle of one buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStatus {
    /// Created, no consumer attached yet.
    Pending,
    /// A consumer is draining.
    Streaming,
}

struct StreamContext {
    tx: mpsc::UnboundedSender<Event>,
    /// Taken by the single consumer.
    rx: Option<mpsc::UnboundedReceiver<Event>>,
    status: StreamStatus,
    ttl_task: Option<tokio::task::JoinHandle<()>>,
}

/// What the consumer yields: a buffered event or a keep-alive sentinel.
#[derive(Debug)]
pub enum StreamItem {
    Event(Event),
    /// No event arrived within the heartbeat interval; the SSE layer
    /// writes a comment to keep the TCP connection warm.
    Heartbeat,
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

/// Process-wide registry of per-run event buffers.
pub struct StreamManager {
    streams: Mutex<HashMap<String, StreamContext>>,
    ttl: Duration,
    /// Back-reference for TTL tasks and consumers; set at construction.
    weak_self: Weak<StreamManager>,
}

impl StreamManager {
    /// Create a manager whose unconsumed buffers expire after `ttl`.
    pub fn new(ttl: Duration) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            streams: Mutex::new(HashMap::new()),
            ttl,
            weak_self: weak.clone(),
        })
    }

    /// Create a buffer for a run and start its TTL timer.
    pub fn create(&self, run_id: &str) -> EngineResult<()> {
        let mut streams = self.streams.lock().expect("stream map lock");
        if streams.contains_key(run_id) {
            return Err(EngineError::StreamExists(run_id.to_string()));
        }

        let (tx, rx) = mpsc::unbounded_channel();

        let manager = self.weak_self.clone();
        let rid = run_id.to_string();
        let ttl = self.ttl;
        let ttl_task = tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            if let Some(manager) = manager.upgrade() {
                manager.reclaim_if_pending(&rid);
            }
        });

        streams.insert(
            run_id.to_string(),
            StreamContext {
                tx,
                rx: Some(rx),
                status: StreamStatus::Pending,
                ttl_task: Some(ttl_task),
            },
        );
        debug!(run_id, "stream buffer created");
        Ok(())
    }

    /// Enqueue an event. Returns `false` once the buffer is closed or gone;
    /// the producer uses that to stop generating events while the graph
    /// still runs to completion.
    pub fn push(&self, run_id: &str, event: Event) -> bool {
        let streams = self.streams.lock().expect("stream map lock");
        match streams.get(run_id) {
            Some(context) => context.tx.send(event).is_ok(),
            None => false,
        }
    }

    /// Attach the single consumer: cancels the TTL timer, marks the buffer
    /// streaming, and hands back the drain side.
    pub fn consume(&self, run_id: &str, heartbeat: Duration) -> EngineResult<StreamConsumer> {
        let manager = self
            .weak_self
            .upgrade()
            .ok_or_else(|| EngineError::Internal("stream manager dropped".into()))?;

        let mut streams = self.streams.lock().expect("stream map lock");
        let context = streams
            .get_mut(run_id)
            .ok_or_else(|| EngineError::StreamNotFound(run_id.to_string()))?;

        let rx = context
            .rx
            .take()
            .ok_or_else(|| EngineError::StreamExists(format!("{run_id} already has a consumer")))?;

        if let Some(ttl_task) = context.ttl_task.take() {
            ttl_task.abort();
        }
        context.status = StreamStatus::Streaming;
        debug!(run_id, "stream consumer attached");

        Ok(StreamConsumer {
            run_id: run_id.to_string(),
            rx,
            manager,
            heartbeat,
            finished: false,
        })
    }

    /// Idempotent teardown. Returns whether a buffer was removed.
    pub fn close(&self, run_id: &str) -> bool {
        let mut streams = self.streams.lock().expect("stream map lock");
        match streams.remove(run_id) {
            Some(context) => {
                if let Some(ttl_task) = context.ttl_task {
                    ttl_task.abort();
                }
                debug!(run_id, "stream buffer closed");
                true
            }
            None => false,
        }
    }

    /// Close every buffer (shutdown path).
    pub fn close_all(&self) {
        let mut streams = self.streams.lock().expect("stream map lock");
        for (run_id, context) in streams.drain() {
            if let Some(ttl_task) = context.ttl_task {
                ttl_task.abort();
            }
            debug!(run_id = %run_id, "stream buffer closed at shutdown");
        }
    }

    /// Current buffer status, if the buffer exists.
    pub fn status(&self, run_id: &str) -> Option<StreamStatus> {
        self.streams
            .lock()
            .expect("stream map lock")
            .get(run_id)
            .map(|c| c.status)
    }

    /// Number of live buffers.
    pub fn active_count(&self) -> usize {
        self.streams.lock().expect("stream map lock").len()
    }

    fn reclaim_if_pending(&self, run_id: &str) {
        let mut streams = self.streams.lock().expect("stream map lock");
        if let Some(context) = streams.get(run_id) {
            if context.status == StreamStatus::Pending {
                warn!(run_id, "stream expired before any consumer attached");
                streams.remove(run_id);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Consumer
// ---------------------------------------------------------------------------

/// The single consumer of one run's buffer.
///
/// Yields events in producer order, synthesizing [`StreamItem::Heartbeat`]
/// when nothing arrives within the heartbeat interval. After a terminal
/// event (`complete`/`error`) the next call returns `None` and the buffer
/// is removed. Dropping the consumer also closes the buffer.
pub struct StreamConsumer {
    run_id: String,
    rx: mpsc::UnboundedReceiver<Event>,
    manager: Arc<StreamManager>,
    heartbeat: Duration,
    finished: bool,
}

impl StreamConsumer {
    /// The run this consumer drains.
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Next item, or `None` once the stream has ended.
    pub async fn next(&mut self) -> Option<StreamItem> {
        if self.finished {
            self.manager.close(&self.run_id);
            return None;
        }

        match tokio::time::timeout(self.heartbeat, self.rx.recv()).await {
            Ok(Some(event)) => {
                if event.event_type.is_terminal() {
                    self.finished = true;
                }
                Some(StreamItem::Event(event))
            }
            Ok(None) => {
                // Producer vanished without a terminal event.
                self.finished = true;
                self.manager.close(&self.run_id);
                None
            }
            Err(_) => Some(StreamItem::Heartbeat),
        }
    }
}

impl Drop for StreamConsumer {
    fn drop(&mut self) {
        self.manager.close(&self.run_id);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
