//! Direct delivery through the host's download manager
//!
//! A batch is driven by one spawned task that owns all of its state. It
//! keeps at most `concurrency` downloads submitted to the host, reacts to the
//! host's state changes and to the session's cancel signal, and reports
//! through a channel of [`DirectEvent`]s. Only one batch may run per broker.

pub mod host;

pub use host::{
    ConflictPolicy, DownloadHost, HostDownloadRequest, HostId, HostState, HostStateChange,
};

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::MAX_DIRECT_CONCURRENCY;
use crate::core::{BundleError, DownloadItem, Result};

/// Final state of one item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemState {
    Complete,
    Interrupted,
}

/// Progress of a direct batch, in the order the driver observed it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum DirectEvent {
    Start {
        done: usize,
        total: usize,
    },
    Progress {
        file: String,
        bytes_received: Option<u64>,
        total_bytes: Option<u64>,
    },
    Item {
        file: String,
        state: ItemState,
        done: usize,
        total: usize,
    },
    CancelStart,
    CancelDone {
        done: usize,
        total: usize,
    },
    Done {
        done: usize,
        total: usize,
    },
}

impl DirectEvent {
    /// `Done` or `CancelDone`; nothing follows a terminal event
    pub fn is_terminal(&self) -> bool {
        matches!(self, DirectEvent::Done { .. } | DirectEvent::CancelDone { .. })
    }
}

/// Counts for a finished batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectOutcome {
    pub total: usize,
    pub done: usize,
    pub interrupted: usize,
    /// Items dropped from the queue without being submitted
    pub skipped: usize,
    pub cancelled: bool,
}

/// Handle to a running batch
pub struct DirectSession {
    cancel: CancellationToken,
    events: mpsc::UnboundedReceiver<DirectEvent>,
    handle: JoinHandle<DirectOutcome>,
}

impl DirectSession {
    /// Cancel the batch; calling it again has no further effect
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Next event, or `None` once the batch has ended and all events were read
    pub async fn next_event(&mut self) -> Option<DirectEvent> {
        self.events.recv().await
    }

    /// Wait for the batch to end
    pub async fn join(self) -> Result<DirectOutcome> {
        self.handle.await.map_err(|e| BundleError::TaskFailed {
            task: "direct download",
            message: e.to_string(),
        })
    }
}

/// Starts direct batches against one host, one batch at a time
pub struct DirectDownloadBroker {
    host: Arc<dyn DownloadHost>,
    active: Arc<AtomicBool>,
}

impl DirectDownloadBroker {
    pub fn new(host: Arc<dyn DownloadHost>) -> Self {
        Self {
            host,
            active: Arc::new(AtomicBool::new(false)),
        }
    }

    /// True while a batch is running
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Start a batch; must be called from within a tokio runtime
    ///
    /// `host_events` carries the host's state changes for the downloads this
    /// batch submits. `concurrency` is clamped to `1..=6`.
    pub fn start(
        &self,
        items: Vec<DownloadItem>,
        concurrency: usize,
        save_as: bool,
        host_events: mpsc::UnboundedReceiver<HostStateChange>,
    ) -> Result<DirectSession> {
        if items.is_empty() {
            return Err(BundleError::EmptyBatch);
        }
        let guard = BatchGuard::acquire(&self.active)?;

        let total = items.len();
        let max = concurrency.clamp(1, MAX_DIRECT_CONCURRENCY);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let driver = BatchDriver {
            host: self.host.clone(),
            batch: DownloadBatch {
                queue: items.into(),
                active: 0,
                max,
                done: 0,
                interrupted: 0,
                skipped: 0,
                total,
                id_map: HashMap::new(),
                save_as,
                cancelling: false,
            },
            host_events,
            events: events_tx,
            cancel: cancel.clone(),
            guard,
        };

        info!("Starting direct batch of {} items ({} in flight)", total, max);
        let span = info_span!("direct", total, max);
        let handle = tokio::spawn(driver.run().instrument(span));

        Ok(DirectSession {
            cancel,
            events: events_rx,
            handle,
        })
    }
}

/// Marks the broker busy until dropped
struct BatchGuard {
    active: Arc<AtomicBool>,
}

impl BatchGuard {
    fn acquire(active: &Arc<AtomicBool>) -> Result<Self> {
        active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| BundleError::BatchActive)?;
        Ok(Self { active: active.clone() })
    }
}

impl Drop for BatchGuard {
    fn drop(&mut self) {
        self.active.store(false, Ordering::Release);
    }
}

/// Batch state; only the driver touches it
struct DownloadBatch {
    queue: VecDeque<DownloadItem>,
    active: usize,
    max: usize,
    done: usize,
    interrupted: usize,
    skipped: usize,
    total: usize,
    id_map: HashMap<HostId, String>,
    save_as: bool,
    cancelling: bool,
}

impl DownloadBatch {
    fn is_finished(&self) -> bool {
        self.queue.is_empty() && self.active == 0
    }
}

enum Step {
    Cancel,
    Host(Option<HostStateChange>),
}

struct BatchDriver {
    host: Arc<dyn DownloadHost>,
    batch: DownloadBatch,
    host_events: mpsc::UnboundedReceiver<HostStateChange>,
    events: mpsc::UnboundedSender<DirectEvent>,
    cancel: CancellationToken,
    guard: BatchGuard,
}

impl BatchDriver {
    async fn run(mut self) -> DirectOutcome {
        self.emit(DirectEvent::Start {
            done: 0,
            total: self.batch.total,
        });
        self.fill().await;

        while !self.batch.is_finished() {
            let step = tokio::select! {
                biased;
                _ = self.cancel.cancelled(), if !self.batch.cancelling => Step::Cancel,
                change = self.host_events.recv() => Step::Host(change),
            };

            match step {
                Step::Cancel => self.begin_cancel().await,
                Step::Host(Some(change)) => self.on_state_change(change).await,
                Step::Host(None) => self.on_host_gone(),
            }
        }

        self.finish()
    }

    /// Submit queued items until `max` are in flight
    async fn fill(&mut self) {
        while !self.batch.cancelling && self.batch.active < self.batch.max {
            let Some(item) = self.batch.queue.pop_front() else {
                break;
            };

            let request = HostDownloadRequest {
                url: item.url,
                filename: item.filename.clone(),
                conflict: ConflictPolicy::Uniquify,
                save_as: self.batch.save_as,
            };

            match self.host.submit(request).await {
                Some(id) => {
                    debug!("Host accepted {} as {}", item.filename, id);
                    self.batch.id_map.insert(id, item.filename);
                    self.batch.active += 1;
                }
                None => {
                    warn!("Host refused {}", item.filename);
                    self.batch.interrupted += 1;
                    self.emit_item(item.filename, ItemState::Interrupted);
                }
            }
        }
    }

    async fn on_state_change(&mut self, change: HostStateChange) {
        let Some(file) = self.batch.id_map.get(&change.id).cloned() else {
            debug!("Ignoring change for unknown download {}", change.id);
            return;
        };

        match change.state {
            HostState::Complete => {
                self.batch.id_map.remove(&change.id);
                self.batch.active -= 1;
                self.batch.done += 1;
                self.emit_item(file, ItemState::Complete);
                self.fill().await;
            }
            HostState::Interrupted => {
                self.batch.id_map.remove(&change.id);
                self.batch.active -= 1;
                self.batch.interrupted += 1;
                self.emit_item(file, ItemState::Interrupted);
                self.fill().await;
            }
            HostState::InProgress if change.has_byte_counts() => {
                self.emit(DirectEvent::Progress {
                    file,
                    bytes_received: change.bytes_received,
                    total_bytes: change.total_bytes,
                });
            }
            HostState::InProgress => {}
        }
    }

    async fn begin_cancel(&mut self) {
        info!(
            "Cancelling direct batch: {} queued, {} in flight",
            self.batch.queue.len(),
            self.batch.active
        );
        self.batch.cancelling = true;
        self.batch.skipped += self.batch.queue.len();
        self.batch.queue.clear();
        self.emit(DirectEvent::CancelStart);

        let ids: Vec<HostId> = self.batch.id_map.keys().copied().collect();
        for id in ids {
            self.host.cancel(id).await;
        }
    }

    /// No more host notifications will arrive
    fn on_host_gone(&mut self) {
        warn!(
            "Host event channel closed with {} downloads in flight",
            self.batch.active
        );
        let in_flight: Vec<String> = self.batch.id_map.drain().map(|(_, file)| file).collect();
        for file in in_flight {
            self.batch.interrupted += 1;
            self.emit_item(file, ItemState::Interrupted);
        }
        self.batch.active = 0;
        self.batch.skipped += self.batch.queue.len();
        self.batch.queue.clear();
    }

    fn finish(self) -> DirectOutcome {
        let BatchDriver {
            batch, events, guard, ..
        } = self;

        // Release before the terminal event so a listener can start the next batch
        drop(guard);

        let outcome = DirectOutcome {
            total: batch.total,
            done: batch.done,
            interrupted: batch.interrupted,
            skipped: batch.skipped,
            cancelled: batch.cancelling,
        };
        info!(
            "Direct batch finished: {}/{} complete, {} interrupted, {} skipped",
            outcome.done, outcome.total, outcome.interrupted, outcome.skipped
        );

        let terminal = if batch.cancelling {
            DirectEvent::CancelDone {
                done: batch.done,
                total: batch.total,
            }
        } else {
            DirectEvent::Done {
                done: batch.done,
                total: batch.total,
            }
        };
        let _ = events.send(terminal);
        outcome
    }

    fn emit_item(&self, file: String, state: ItemState) {
        self.emit(DirectEvent::Item {
            file,
            state,
            done: self.batch.done,
            total: self.batch.total,
        });
    }

    fn emit(&self, event: DirectEvent) {
        // The session may have been dropped; the batch still runs to completion
        let _ = self.events.send(event);
    }
}
