//! Deduplicated, cancellable work orchestration.
//!
//! Work is keyed by payload fingerprint. The first `attach` for a fingerprint
//! creates a work item and spawns one background computation; later callers
//! join the same item and get their own notify channel. When the last
//! subscriber detaches, the item is cancelled and removed.
//!
//! All map access goes through a single `RwLock`. The background task never
//! holds it while computing, only while committing its result.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use std::time::{Duration, Instant};

use opentelemetry::KeyValue;
use parking_lot::RwLock;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, trace, warn};

pub use tokio::sync::mpsc::error::TryRecvError;

use crate::error::{Error, Result};
use crate::model::{Fingerprint, MessageId, Outcome};
use crate::telemetry::metrics;
use crate::telemetry::work::{record_state_transition, start_work_span};
use crate::work::WorkFunction;

/// Number of times an artificial delay re-checks for cancellation.
pub const CANCEL_CHECKS: u32 = 4;

// ---------------------------------------------------------------------------
// Public surface
// ---------------------------------------------------------------------------

/// The four operations a work backend exposes. Nothing else touches the map.
pub trait Orchestrator: Send + Sync {
    /// Subscribe `requester` to the work for `fingerprint`, starting it if
    /// nobody has yet. Never waits for the computation.
    fn attach(&self, requester: MessageId, fingerprint: &Fingerprint, payload: &str)
    -> Attachment;

    /// Current state of the work for `fingerprint`, or `None` if untracked.
    /// Never subscribes and never starts work.
    fn poll(&self, requester: MessageId, fingerprint: &Fingerprint) -> Option<Snapshot>;

    /// Drop `requester`'s subscription. The last one out cancels the work.
    ///
    /// Untracked fingerprints are a no-op; a tracked fingerprint without this
    /// subscriber is [`Error::NotFound`].
    fn detach(&self, requester: MessageId, fingerprint: &Fingerprint) -> Result<()>;

    /// Cancel and forget every work item and subscription.
    fn clear_all(&self) -> Result<()>;
}

/// How an `attach` call was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachKind {
    /// New work item created and computation spawned.
    Created,
    /// Joined an existing work item as a new subscriber.
    Joined,
    /// Requester was already subscribed; its channel is reused.
    Rejoined,
}

impl AttachKind {
    fn as_str(self) -> &'static str {
        match self {
            AttachKind::Created => "created",
            AttachKind::Joined => "joined",
            AttachKind::Rejoined => "rejoined",
        }
    }
}

/// Result of [`Orchestrator::attach`].
#[derive(Debug, Clone)]
pub struct Attachment {
    pub kind: AttachKind,
    /// Outcome at the time of the call; may still be pending.
    pub outcome: Outcome,
    pub listener: Listener,
}

/// Result of [`Orchestrator::poll`] for a tracked fingerprint.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub outcome: Outcome,
    /// Present only if the polling requester is subscribed.
    pub listener: Option<Listener>,
}

/// Receiving end of a subscriber's notify channel.
///
/// Cloning shares the same underlying channel. Deliveries are best effort:
/// when the buffer is full the update is dropped, so callers should fall
/// back to [`Orchestrator::poll`] for the authoritative value. Once the
/// subscription is released, `recv` yields `None`.
#[derive(Debug, Clone)]
pub struct Listener {
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<Outcome>>>,
}

impl Listener {
    /// Wait for the next update, or `None` once the channel is released.
    pub async fn recv(&self) -> Option<Outcome> {
        self.rx.lock().await.recv().await
    }

    /// Take a buffered update without waiting.
    ///
    /// Reports [`TryRecvError::Empty`] while another clone is waiting in
    /// [`Listener::recv`], even if an update is buffered; that clone gets it.
    pub fn try_recv(&self) -> std::result::Result<Outcome, TryRecvError> {
        match self.rx.try_lock() {
            Ok(mut rx) => rx.try_recv(),
            Err(_) => Err(TryRecvError::Empty),
        }
    }

    /// Whether both handles refer to the same channel.
    pub fn same_channel(&self, other: &Listener) -> bool {
        Arc::ptr_eq(&self.rx, &other.rx)
    }
}

/// Tunables for [`WorkOrchestrator`].
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Artificial delay before a result may be committed.
    pub work_delay: Duration,
    /// Buffer size of each notify channel. Clamped to at least 1.
    pub channel_capacity: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            work_delay: Duration::ZERO,
            channel_capacity: 1,
        }
    }
}

// ---------------------------------------------------------------------------
// Internal state
// ---------------------------------------------------------------------------

struct Subscriber {
    tx: mpsc::Sender<Outcome>,
    listener: Listener,
}

impl Subscriber {
    fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            tx,
            listener: Listener {
                rx: Arc::new(tokio::sync::Mutex::new(rx)),
            },
        }
    }
}

/// One tracked computation. Dropping it releases every subscriber's sender.
struct WorkItem {
    fingerprint: Fingerprint,
    outcome: Outcome,
    subscribers: HashMap<MessageId, Subscriber>,
    cancel: CancellationToken,
}

impl WorkItem {
    /// Signal cancellation and report whether a computation was cut short.
    fn cancel(&self) -> bool {
        self.cancel.cancel();
        !self.outcome.done
    }
}

struct Shared<W> {
    work: Arc<W>,
    items: RwLock<HashMap<Fingerprint, WorkItem>>,
    config: OrchestratorConfig,
    runtime: Handle,
}

// ---------------------------------------------------------------------------
// In-memory orchestrator
// ---------------------------------------------------------------------------

/// In-memory [`Orchestrator`] running one tokio task per work item.
pub struct WorkOrchestrator<W> {
    shared: Arc<Shared<W>>,
}

impl<W> Clone for WorkOrchestrator<W> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<W> std::fmt::Debug for WorkOrchestrator<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkOrchestrator")
            .field("items", &self.shared.items.read().len())
            .field("config", &self.shared.config)
            .finish()
    }
}

impl<W: WorkFunction> WorkOrchestrator<W> {
    /// Create an orchestrator that spawns onto the current tokio runtime.
    ///
    /// # Errors
    ///
    /// [`Error::Runtime`] when called outside a tokio runtime.
    pub fn new(work: W, config: OrchestratorConfig) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|e| Error::Runtime(e.to_string()))?;
        Ok(Self::with_runtime(work, config, runtime))
    }

    /// Create an orchestrator that spawns onto the given runtime.
    pub fn with_runtime(work: W, config: OrchestratorConfig, runtime: Handle) -> Self {
        Self {
            shared: Arc::new(Shared {
                work: Arc::new(work),
                items: RwLock::new(HashMap::new()),
                config,
                runtime,
            }),
        }
    }

    /// Number of tracked work items.
    pub fn len(&self) -> usize {
        self.shared.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of subscribers on the work for `fingerprint`, if tracked.
    pub fn subscriber_count(&self, fingerprint: &Fingerprint) -> Option<usize> {
        self.shared
            .items
            .read()
            .get(fingerprint)
            .map(|item| item.subscribers.len())
    }

    fn spawn(&self, fingerprint: Fingerprint, payload: String, cancel: CancellationToken) {
        let shared = Arc::clone(&self.shared);
        let span = start_work_span(&fingerprint);
        self.shared
            .runtime
            .spawn(execute(shared, fingerprint, payload, cancel, span.clone()).instrument(span));
    }
}

impl<W: WorkFunction> Orchestrator for WorkOrchestrator<W> {
    fn attach(
        &self,
        requester: MessageId,
        fingerprint: &Fingerprint,
        payload: &str,
    ) -> Attachment {
        let capacity = self.shared.config.channel_capacity;

        let (attachment, spawn) = match self.shared.items.write().entry(fingerprint.clone()) {
            Entry::Occupied(mut occupied) => {
                let item = occupied.get_mut();
                let (kind, listener) = match item.subscribers.entry(requester) {
                    Entry::Occupied(existing) => {
                        (AttachKind::Rejoined, existing.get().listener.clone())
                    }
                    Entry::Vacant(slot) => (
                        AttachKind::Joined,
                        slot.insert(Subscriber::new(capacity)).listener.clone(),
                    ),
                };
                let attachment = Attachment {
                    kind,
                    outcome: item.outcome.clone(),
                    listener,
                };
                (attachment, None)
            }
            Entry::Vacant(vacant) => {
                let subscriber = Subscriber::new(capacity);
                let listener = subscriber.listener.clone();
                let cancel = CancellationToken::new();
                vacant.insert(WorkItem {
                    fingerprint: fingerprint.clone(),
                    outcome: Outcome::pending(),
                    subscribers: HashMap::from([(requester, subscriber)]),
                    cancel: cancel.clone(),
                });
                let attachment = Attachment {
                    kind: AttachKind::Created,
                    outcome: Outcome::pending(),
                    listener,
                };
                (attachment, Some(cancel))
            }
        };

        // Spawned after the lock is released; the task only needs it to commit.
        if let Some(cancel) = spawn {
            self.spawn(fingerprint.clone(), payload.to_owned(), cancel);
        }

        debug!(
            %requester,
            %fingerprint,
            kind = attachment.kind.as_str(),
            done = attachment.outcome.done,
            "attached"
        );
        metrics::work_attached().add(1, &[KeyValue::new("result", attachment.kind.as_str())]);

        attachment
    }

    fn poll(&self, requester: MessageId, fingerprint: &Fingerprint) -> Option<Snapshot> {
        let items = self.shared.items.read();
        let item = items.get(fingerprint)?;
        Some(Snapshot {
            outcome: item.outcome.clone(),
            listener: item
                .subscribers
                .get(&requester)
                .map(|sub| sub.listener.clone()),
        })
    }

    fn detach(&self, requester: MessageId, fingerprint: &Fingerprint) -> Result<()> {
        let mut items = self.shared.items.write();

        let Some(item) = items.get_mut(fingerprint) else {
            trace!(%requester, %fingerprint, "detach on untracked work");
            return Ok(());
        };

        if item.subscribers.remove(&requester).is_none() {
            return Err(Error::NotFound(format!(
                "message {requester} is not subscribed to work {fingerprint}"
            )));
        }

        if !item.subscribers.is_empty() {
            debug!(%requester, %fingerprint, "detached");
            return Ok(());
        }

        if let Some(item) = items.remove(fingerprint) {
            if item.cancel() {
                metrics::work_cancelled().add(1, &[KeyValue::new("reason", "detached")]);
            }
            debug!(%requester, fingerprint = %item.fingerprint, "last subscriber left, work removed");
        }

        Ok(())
    }

    fn clear_all(&self) -> Result<()> {
        let drained = std::mem::take(&mut *self.shared.items.write());

        let mut cancelled = 0u64;
        for item in drained.values() {
            if item.cancel() {
                cancelled += 1;
            }
        }
        if cancelled > 0 {
            metrics::work_cancelled().add(cancelled, &[KeyValue::new("reason", "cleared")]);
        }

        debug!(items = drained.len(), cancelled, "cleared all work");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Background task
// ---------------------------------------------------------------------------

async fn execute<W: WorkFunction>(
    shared: Arc<Shared<W>>,
    fingerprint: Fingerprint,
    payload: String,
    cancel: CancellationToken,
    span: tracing::Span,
) {
    let started = Instant::now();

    if !shared.config.work_delay.is_zero()
        && !sit_out_delay(&shared, &fingerprint, &cancel).await
    {
        record_state_transition(&span, "pending", "discarded");
        metrics::work_finished().add(1, &[KeyValue::new("result", "discarded")]);
        return;
    }

    let work = Arc::clone(&shared.work);
    let outcome = match tokio::task::spawn_blocking(move || work.compute(&payload)).await {
        Ok(outcome) if outcome.done => outcome,
        Ok(_) => Outcome::failed("work function returned without a result"),
        Err(e) => {
            warn!(%fingerprint, error = %e, "work function did not complete");
            Outcome::failed(format!("work function did not complete: {e}"))
        }
    };

    let failed = outcome.is_failed();
    let result = if !commit(&shared, &fingerprint, &cancel, outcome) {
        "discarded"
    } else if failed {
        "failed"
    } else {
        "committed"
    };

    let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
    record_state_transition(&span, "pending", result);
    metrics::work_finished().add(1, &[KeyValue::new("result", result)]);
    metrics::work_duration_ms().record(elapsed_ms, &[]);
}

/// Sleep through the configured delay in [`CANCEL_CHECKS`] slices.
/// Returns `false` as soon as the work is cancelled or no longer tracked.
async fn sit_out_delay<W>(
    shared: &Shared<W>,
    fingerprint: &Fingerprint,
    cancel: &CancellationToken,
) -> bool {
    let slice = shared.config.work_delay / CANCEL_CHECKS;
    for _ in 0..CANCEL_CHECKS {
        tokio::select! {
            _ = cancel.cancelled() => return false,
            _ = tokio::time::sleep(slice) => {}
        }
        if !shared.items.read().contains_key(fingerprint) {
            return false;
        }
    }
    true
}

/// Store the outcome and notify subscribers, unless the work was cancelled
/// or removed while computing. The check and the write share one lock.
fn commit<W>(
    shared: &Shared<W>,
    fingerprint: &Fingerprint,
    cancel: &CancellationToken,
    outcome: Outcome,
) -> bool {
    let mut items = shared.items.write();

    if cancel.is_cancelled() {
        debug!(%fingerprint, "work cancelled, result discarded");
        return false;
    }
    let Some(item) = items.get_mut(fingerprint) else {
        debug!(%fingerprint, "work no longer tracked, result discarded");
        return false;
    };

    item.outcome = outcome;
    for (requester, subscriber) in &item.subscribers {
        if subscriber.tx.try_send(item.outcome.clone()).is_err() {
            trace!(%requester, %fingerprint, "notify channel full, update dropped");
        }
    }
    true
}
