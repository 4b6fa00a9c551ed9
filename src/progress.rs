//! Progress bus: per-submission publish/subscribe for live observers.
//!
//! Observers attach to one submission at any time and only see what is
//! published after they attach. Delivery is best-effort: a slow observer
//! loses messages and a disconnected one is dropped from the registry, but
//! publishing never blocks or fails.

use crate::models::{AnalysisSummary, SubmissionId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::debug;

/// Default per-subscriber buffer.
pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 256;

/// Phase of one agent pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressPhase {
    Started,
    Searching,
    Analyzing,
    Completed,
    Failed,
}

/// Progress of one agent on one submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub submission_id: SubmissionId,
    pub agent_id: String,
    pub agent_name: String,
    pub phase: ProgressPhase,
    /// 0..=100, non-decreasing over a pipeline run.
    pub percent: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Wire message: serializes as `{"type": ..., "payload": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ProgressMessage {
    AnalysisStarted {
        submission_id: SubmissionId,
        agents: Vec<String>,
    },
    AgentProgress(ProgressEvent),
    AnalysisComplete {
        submission_id: SubmissionId,
        execution_time_ms: u64,
        summary: AnalysisSummary,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        failed_agents: Vec<String>,
    },
    Error {
        submission_id: SubmissionId,
        message: String,
    },
}

impl ProgressMessage {
    /// The `type` tag of this message.
    pub fn kind(&self) -> &'static str {
        match self {
            ProgressMessage::AnalysisStarted { .. } => "analysis_started",
            ProgressMessage::AgentProgress(_) => "agent_progress",
            ProgressMessage::AnalysisComplete { .. } => "analysis_complete",
            ProgressMessage::Error { .. } => "error",
        }
    }

    pub fn submission_id(&self) -> &str {
        match self {
            ProgressMessage::AnalysisStarted { submission_id, .. }
            | ProgressMessage::AnalysisComplete { submission_id, .. }
            | ProgressMessage::Error { submission_id, .. } => submission_id,
            ProgressMessage::AgentProgress(event) => &event.submission_id,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

type Registry = Mutex<HashMap<SubmissionId, Vec<Subscriber>>>;

#[derive(Debug)]
struct Subscriber {
    id: u64,
    tx: mpsc::Sender<ProgressMessage>,
}

/// Receiving end held by one observer. Dropping it detaches the observer.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    submission_id: SubmissionId,
    rx: mpsc::Receiver<ProgressMessage>,
    registry: Weak<Registry>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn submission_id(&self) -> &str {
        &self.submission_id
    }

    /// Next message, or `None` once the submission is closed on the bus.
    pub async fn recv(&mut self) -> Option<ProgressMessage> {
        self.rx.recv().await
    }

    /// Next already-delivered message, if any.
    pub fn try_recv(&mut self) -> Option<ProgressMessage> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            remove_subscriber(&mut lock(&registry), &self.submission_id, self.id);
        }
    }
}

fn lock(registry: &Registry) -> MutexGuard<'_, HashMap<SubmissionId, Vec<Subscriber>>> {
    // A panic while holding the lock cannot leave the map half-updated.
    registry.lock().unwrap_or_else(|e| e.into_inner())
}

fn remove_subscriber(
    registry: &mut HashMap<SubmissionId, Vec<Subscriber>>,
    submission_id: &str,
    subscriber_id: u64,
) -> bool {
    let Some(subscribers) = registry.get_mut(submission_id) else {
        return false;
    };

    let before = subscribers.len();
    subscribers.retain(|s| s.id != subscriber_id);
    let removed = subscribers.len() != before;

    if subscribers.is_empty() {
        registry.remove(submission_id);
    }
    removed
}

/// Registry of observers keyed by submission id.
pub struct ProgressBus {
    subscribers: Arc<Registry>,
    next_id: AtomicU64,
    capacity: usize,
}

impl Default for ProgressBus {
    fn default() -> Self {
        Self::new(DEFAULT_SUBSCRIBER_CAPACITY)
    }
}

impl ProgressBus {
    /// A bus whose subscribers buffer at most `capacity` messages each.
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            capacity: capacity.max(1),
        }
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<SubmissionId, Vec<Subscriber>>> {
        lock(&self.subscribers)
    }

    /// Attach a new observer to `submission_id`.
    pub fn subscribe(&self, submission_id: &str) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.capacity);

        self.registry()
            .entry(submission_id.to_string())
            .or_default()
            .push(Subscriber { id, tx });

        debug!("Subscriber {} attached to submission {}", id, submission_id);

        Subscription {
            id,
            submission_id: submission_id.to_string(),
            rx,
            registry: Arc::downgrade(&self.subscribers),
        }
    }

    /// Explicitly detach an observer. Returns whether it was attached.
    pub fn detach(&self, submission_id: &str, subscriber_id: u64) -> bool {
        remove_subscriber(&mut self.registry(), submission_id, subscriber_id)
    }

    /// Deliver `message` to every observer of its submission.
    ///
    /// Returns how many observers received it. Full buffers drop the message;
    /// closed ones are removed.
    pub fn publish(&self, message: ProgressMessage) -> usize {
        let mut registry = self.registry();
        let submission_id = message.submission_id().to_string();

        let Some(subscribers) = registry.get_mut(&submission_id) else {
            return 0;
        };

        let mut delivered = 0;
        subscribers.retain(|subscriber| match subscriber.tx.try_send(message.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                debug!(
                    "Subscriber {} is lagging, dropped {} message",
                    subscriber.id,
                    message.kind()
                );
                true
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Subscriber {} disconnected", subscriber.id);
                false
            }
        });

        if subscribers.is_empty() {
            registry.remove(&submission_id);
        }
        delivered
    }

    /// Drop every observer of `submission_id`; their `recv` returns `None`
    /// after draining what was already delivered.
    pub fn close(&self, submission_id: &str) {
        if self.registry().remove(submission_id).is_some() {
            debug!("Closed progress stream for submission {}", submission_id);
        }
    }

    /// Number of observers currently attached to `submission_id`.
    pub fn subscriber_count(&self, submission_id: &str) -> usize {
        self.registry().get(submission_id).map_or(0, Vec::len)
    }
}
