//! Dispatch orchestrator
//!
//! A single [`MatchingDriver`] task owns every piece of mutable matching
//! state: the loaded dataset, per-row results, selections, the in-flight set
//! and the aggregate status. Callers talk to it only through the cloneable
//! [`MatchingHandle`]; commands are processed one at a time, interleaved with
//! row completions from the driver's own `JoinSet`. There is no other writer,
//! so a pass can never be started twice for the same trigger.
//!
//! Every pass gets a fresh `batch_id`. Row completions carry the id of the
//! pass that issued them; a completion from a superseded pass is discarded.

use chrono::Utc;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tawo_common::columns::{key_for_header, TABLE_COLUMNS};
use tawo_common::events::{DispatchMode, EventBus, RowOutcome, TawoEvent};
use tawo_common::{Dataset, Fingerprint, LineItem};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::db::{self, ScopedStore};
use crate::models::{Candidate, DispatchStatus, MatchResult, RowState, TechnicalAssessment};
use crate::services::export;
use crate::services::feedback_notifier::{CorrectionFeedback, FeedbackSender};
use crate::services::ledger::MatchingLedger;
use crate::services::matching_client::{MatchingError, MatchingTransport, DEFAULT_MATCHING_TIMEOUT_SECS};
use crate::services::payload_builder::{build_payload, FileIdentity};
use crate::services::response_normalizer;
use crate::services::selection::{SelectionState, DEFAULT_WRONG_REASON};

/// Command queue depth
const COMMAND_CAPACITY: usize = 64;

/// Columns that define hierarchy and fingerprint
pub const READ_ONLY_COLUMNS: &[&str] = &["type", "rNoPart", "id"];

/// Dispatch command errors
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("No dataset uploaded")]
    NoDataset,

    #[error("A matching pass is already running")]
    Busy,

    #[error("Row {0} does not exist")]
    RowOutOfRange(usize),

    #[error("Invalid selection: {0}")]
    InvalidSelection(String),

    #[error("A reason is required for row {0} while an alternative is selected")]
    ReasonRequired(usize),

    #[error("Column {0} is read-only")]
    ReadOnlyColumn(String),

    #[error("Unknown column: {0}")]
    UnknownColumn(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Matching driver is not running")]
    DriverGone,
}

/// Orchestrator settings
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Independent timeout of every row request
    pub row_timeout: Duration,
    /// Reason seeded when a non-top candidate is selected
    pub default_wrong_reason: String,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            row_timeout: Duration::from_secs(DEFAULT_MATCHING_TIMEOUT_SECS),
            default_wrong_reason: DEFAULT_WRONG_REASON.to_string(),
        }
    }
}

/// Aggregate view returned by the status endpoint
#[derive(Debug, Clone, Serialize)]
pub struct MatchingSnapshot {
    pub fingerprint: Option<Fingerprint>,
    pub file_name: Option<String>,
    pub status: DispatchStatus,
    /// Rows with a request in flight
    pub sending: Vec<usize>,
    pub rows: Vec<RowState>,
    pub dispatchable: usize,
    pub matched: usize,
    pub fully_sent: bool,
}

/// One row's candidates and selection
#[derive(Debug, Clone, Serialize)]
pub struct RowResultView {
    pub row_index: usize,
    pub rank: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub candidates: Vec<Candidate>,
    pub technical: TechnicalAssessment,
}

/// All rows that have a match result
#[derive(Debug, Clone, Serialize)]
pub struct ResultsView {
    pub fingerprint: Fingerprint,
    pub rows: Vec<RowResultView>,
}

/// Commands accepted by the driver
#[derive(Debug)]
pub enum DriverCommand {
    /// Load the persisted dataset and run the dataset-load transition
    Start {
        reply: oneshot::Sender<Result<MatchingSnapshot, DispatchError>>,
    },
    /// Clear everything for the loaded fingerprint and send every row again
    ResendAll {
        reply: oneshot::Sender<Result<MatchingSnapshot, DispatchError>>,
    },
    /// Send only rows still lacking a result
    ResendMissing {
        reply: oneshot::Sender<Result<MatchingSnapshot, DispatchError>>,
    },
    Select {
        row: usize,
        rank: usize,
        reply: oneshot::Sender<Result<RowResultView, DispatchError>>,
    },
    SetReason {
        row: usize,
        reason: String,
        reply: oneshot::Sender<Result<RowResultView, DispatchError>>,
    },
    /// Persist a freshly uploaded dataset and unload the current one
    ReplaceDataset {
        dataset: Dataset,
        reply: oneshot::Sender<Result<Fingerprint, DispatchError>>,
    },
    EditCell {
        row: usize,
        column: String,
        value: String,
        reply: oneshot::Sender<Result<LineItem, DispatchError>>,
    },
    Snapshot {
        reply: oneshot::Sender<MatchingSnapshot>,
    },
    Results {
        reply: oneshot::Sender<Result<ResultsView, DispatchError>>,
    },
    /// Rows with selected candidates applied
    ExportRows {
        reply: oneshot::Sender<Result<Vec<LineItem>, DispatchError>>,
    },
}

/// Outcome of one row request, produced inside its own task
#[derive(Debug)]
struct RowCompletion {
    batch_id: u64,
    row_index: usize,
    result: Result<Option<MatchResult>, MatchingError>,
}

/// Progress of the running pass
#[derive(Debug, Clone)]
struct PassProgress {
    batch_id: u64,
    mode: DispatchMode,
    matched: usize,
    without_result: usize,
}

#[derive(Debug, Clone)]
struct LoadedDataset {
    dataset: Dataset,
    fingerprint: Fingerprint,
}

/// Cloneable handle to the driver task
#[derive(Clone)]
pub struct MatchingHandle {
    tx: mpsc::Sender<DriverCommand>,
    status_rx: watch::Receiver<DispatchStatus>,
}

impl MatchingHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> DriverCommand,
    ) -> Result<T, DispatchError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| DispatchError::DriverGone)?;
        rx.await.map_err(|_| DispatchError::DriverGone)
    }

    pub async fn start(&self) -> Result<MatchingSnapshot, DispatchError> {
        self.request(|reply| DriverCommand::Start { reply }).await?
    }

    pub async fn resend_all(&self) -> Result<MatchingSnapshot, DispatchError> {
        self.request(|reply| DriverCommand::ResendAll { reply }).await?
    }

    pub async fn resend_missing(&self) -> Result<MatchingSnapshot, DispatchError> {
        self.request(|reply| DriverCommand::ResendMissing { reply }).await?
    }

    pub async fn select(&self, row: usize, rank: usize) -> Result<RowResultView, DispatchError> {
        self.request(|reply| DriverCommand::Select { row, rank, reply }).await?
    }

    pub async fn set_reason(&self, row: usize, reason: String) -> Result<RowResultView, DispatchError> {
        self.request(|reply| DriverCommand::SetReason { row, reason, reply }).await?
    }

    pub async fn replace_dataset(&self, dataset: Dataset) -> Result<Fingerprint, DispatchError> {
        self.request(|reply| DriverCommand::ReplaceDataset { dataset, reply }).await?
    }

    pub async fn edit_cell(&self, row: usize, column: String, value: String) -> Result<LineItem, DispatchError> {
        self.request(|reply| DriverCommand::EditCell {
            row,
            column,
            value,
            reply,
        })
        .await?
    }

    pub async fn snapshot(&self) -> Result<MatchingSnapshot, DispatchError> {
        self.request(|reply| DriverCommand::Snapshot { reply }).await
    }

    pub async fn results(&self) -> Result<ResultsView, DispatchError> {
        self.request(|reply| DriverCommand::Results { reply }).await?
    }

    pub async fn export_rows(&self) -> Result<Vec<LineItem>, DispatchError> {
        self.request(|reply| DriverCommand::ExportRows { reply }).await?
    }

    /// Current aggregate status
    pub fn status(&self) -> DispatchStatus {
        self.status_rx.borrow().clone()
    }

    /// Watch aggregate status changes
    pub fn subscribe_status(&self) -> watch::Receiver<DispatchStatus> {
        self.status_rx.clone()
    }

    /// Wait until no pass is running, returning the settled status
    pub async fn wait_until_settled(&self) -> Result<DispatchStatus, DispatchError> {
        let mut rx = self.status_rx.clone();
        let status = rx
            .wait_for(|status| !status.is_sending())
            .await
            .map_err(|_| DispatchError::DriverGone)?;
        Ok((*status).clone())
    }
}

/// The dispatch state machine
pub struct MatchingDriver {
    store: ScopedStore,
    ledger: MatchingLedger,
    transport: Arc<dyn MatchingTransport>,
    event_bus: EventBus,
    feedback_tx: FeedbackSender,
    config: DispatchConfig,

    status_tx: watch::Sender<DispatchStatus>,
    commands: mpsc::Receiver<DriverCommand>,

    loaded: Option<LoadedDataset>,
    results: BTreeMap<usize, MatchResult>,
    selection: SelectionState,
    done_rows: BTreeSet<usize>,
    fully_sent: bool,
    sending: BTreeSet<usize>,
    in_flight: JoinSet<RowCompletion>,
    pass: Option<PassProgress>,
    next_batch_id: u64,
}

impl MatchingDriver {
    pub fn new(
        store: ScopedStore,
        transport: Arc<dyn MatchingTransport>,
        event_bus: EventBus,
        feedback_tx: FeedbackSender,
        config: DispatchConfig,
    ) -> (Self, MatchingHandle) {
        let (tx, commands) = mpsc::channel(COMMAND_CAPACITY);
        let (status_tx, status_rx) = watch::channel(DispatchStatus::Idle);
        let selection = SelectionState::new(config.default_wrong_reason.clone());

        let driver = Self {
            ledger: MatchingLedger::new(store.clone()),
            store,
            transport,
            event_bus,
            feedback_tx,
            config,
            status_tx,
            commands,
            loaded: None,
            results: BTreeMap::new(),
            selection,
            done_rows: BTreeSet::new(),
            fully_sent: false,
            sending: BTreeSet::new(),
            in_flight: JoinSet::new(),
            pass: None,
            next_batch_id: 1,
        };

        (driver, MatchingHandle { tx, status_rx })
    }

    /// Spawn the driver on the current runtime
    pub fn spawn(
        store: ScopedStore,
        transport: Arc<dyn MatchingTransport>,
        event_bus: EventBus,
        feedback_tx: FeedbackSender,
        config: DispatchConfig,
        shutdown: CancellationToken,
    ) -> MatchingHandle {
        let (driver, handle) = Self::new(store, transport, event_bus, feedback_tx, config);
        tokio::spawn(driver.run(shutdown));
        handle
    }

    /// Driver loop: commands, row completions and shutdown
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!("Matching driver started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Matching driver shutting down");
                    break;
                }

                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => {
                        debug!("All matching handles dropped");
                        break;
                    }
                },

                Some(joined) = self.in_flight.join_next(), if !self.in_flight.is_empty() => {
                    self.on_joined(joined).await;
                }
            }
        }

        self.in_flight.abort_all();
    }

    async fn handle_command(&mut self, command: DriverCommand) {
        match command {
            DriverCommand::Start { reply } => {
                let _ = reply.send(self.start().await);
            }
            DriverCommand::ResendAll { reply } => {
                let _ = reply.send(self.resend_all().await);
            }
            DriverCommand::ResendMissing { reply } => {
                let _ = reply.send(self.resend_missing().await);
            }
            DriverCommand::Select { row, rank, reply } => {
                let _ = reply.send(self.select(row, rank).await);
            }
            DriverCommand::SetReason { row, reason, reply } => {
                let _ = reply.send(self.set_reason(row, &reason).await);
            }
            DriverCommand::ReplaceDataset { dataset, reply } => {
                let _ = reply.send(self.replace_dataset(dataset).await);
            }
            DriverCommand::EditCell {
                row,
                column,
                value,
                reply,
            } => {
                let _ = reply.send(self.edit_cell(row, &column, value).await);
            }
            DriverCommand::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            DriverCommand::Results { reply } => {
                let _ = reply.send(self.results_view());
            }
            DriverCommand::ExportRows { reply } => {
                let result = self.loaded_dataset().map(|loaded| {
                    export::apply_matches(&loaded.dataset.rows, &self.results, &self.selection)
                });
                let _ = reply.send(result);
            }
        }
    }

    // ------------------------------------------------------------------
    // Dataset lifecycle
    // ------------------------------------------------------------------

    /// Dataset-load transition
    ///
    /// Fully sent fingerprint → DONE from persisted state; nothing to send →
    /// mark sent, DONE; otherwise a full pass. Loading the fingerprint that is
    /// already loaded changes nothing.
    async fn start(&mut self) -> Result<MatchingSnapshot, DispatchError> {
        let dataset = db::dataset::load_dataset(&self.store)
            .await
            .map_err(|e| DispatchError::Storage(e.to_string()))?
            .ok_or(DispatchError::NoDataset)?;
        let fingerprint = dataset.fingerprint();

        if self.loaded.as_ref().is_some_and(|l| l.fingerprint == fingerprint) {
            debug!(fingerprint = %fingerprint, "Dataset already loaded");
            return Ok(self.snapshot());
        }

        self.unload();
        let persisted = self.ledger.load_persisted(&fingerprint).await;
        let row_count = dataset.rows.len();
        self.results = persisted
            .results
            .into_iter()
            .filter(|(idx, _)| *idx < row_count)
            .collect();
        let results = &self.results;
        self.selection.restore(persisted.selections, persisted.reasons, |row| {
            results.get(&row).map_or(0, MatchResult::candidate_count)
        });
        self.done_rows = persisted.done_rows;
        self.loaded = Some(LoadedDataset {
            dataset,
            fingerprint: fingerprint.clone(),
        });

        info!(
            fingerprint = %fingerprint,
            rows = row_count,
            restored_results = self.results.len(),
            "Dataset loaded"
        );

        if self.ledger.has_been_fully_sent(&fingerprint).await {
            self.fully_sent = true;
            info!(fingerprint = %fingerprint, "Dataset already sent, restoring results without dispatch");
            self.set_status(DispatchStatus::Done);
            return Ok(self.snapshot());
        }

        let indices = self.dispatchable_indices();
        self.begin_pass(DispatchMode::Full, indices).await;
        Ok(self.snapshot())
    }

    async fn resend_all(&mut self) -> Result<MatchingSnapshot, DispatchError> {
        let fingerprint = self.loaded_dataset()?.fingerprint.clone();

        if self.status_tx.borrow().is_sending() {
            info!(fingerprint = %fingerprint, "Superseding running pass");
        }
        self.cancel_in_flight();

        self.ledger.clear_all(&fingerprint).await;
        self.results.clear();
        self.selection.clear();
        self.done_rows.clear();
        self.fully_sent = false;

        self.event_bus.emit_lossy(TawoEvent::MatchingReset {
            fingerprint: fingerprint.to_string(),
            timestamp: Utc::now(),
        });

        let indices = self.dispatchable_indices();
        self.begin_pass(DispatchMode::Full, indices).await;
        Ok(self.snapshot())
    }

    async fn resend_missing(&mut self) -> Result<MatchingSnapshot, DispatchError> {
        self.loaded_dataset()?;
        if self.status_tx.borrow().is_sending() {
            return Err(DispatchError::Busy);
        }

        let indices: Vec<usize> = self
            .dispatchable_indices()
            .into_iter()
            .filter(|idx| !self.results.contains_key(idx))
            .collect();
        self.begin_pass(DispatchMode::MissingOnly, indices).await;
        Ok(self.snapshot())
    }

    async fn replace_dataset(&mut self, dataset: Dataset) -> Result<Fingerprint, DispatchError> {
        db::dataset::save_dataset(&self.store, &dataset)
            .await
            .map_err(|e| DispatchError::Storage(e.to_string()))?;

        let fingerprint = dataset.fingerprint();
        self.unload();
        self.set_status(DispatchStatus::Idle);

        self.event_bus.emit_lossy(TawoEvent::DatasetUploaded {
            fingerprint: fingerprint.to_string(),
            file_name: dataset.file_name.clone(),
            row_count: dataset.rows.len(),
            timestamp: Utc::now(),
        });
        info!(fingerprint = %fingerprint, rows = dataset.rows.len(), "Dataset replaced");

        Ok(fingerprint)
    }

    /// Edit one cell through the persisted-dataset write path
    async fn edit_cell(&mut self, row: usize, column: &str, value: String) -> Result<LineItem, DispatchError> {
        let key = key_for_header(column)
            .filter(|key| TABLE_COLUMNS.iter().any(|c| c.key == *key) || READ_ONLY_COLUMNS.contains(key))
            .ok_or_else(|| DispatchError::UnknownColumn(column.to_string()))?;
        if READ_ONLY_COLUMNS.contains(&key) {
            return Err(DispatchError::ReadOnlyColumn(key.to_string()));
        }

        let mut dataset = match &self.loaded {
            Some(loaded) => loaded.dataset.clone(),
            None => db::dataset::load_dataset(&self.store)
                .await
                .map_err(|e| DispatchError::Storage(e.to_string()))?
                .ok_or(DispatchError::NoDataset)?,
        };

        let item = dataset.rows.get_mut(row).ok_or(DispatchError::RowOutOfRange(row))?;
        item.set(key, value);
        let updated = item.clone();

        db::dataset::save_dataset(&self.store, &dataset)
            .await
            .map_err(|e| DispatchError::Storage(e.to_string()))?;
        if let Some(loaded) = self.loaded.as_mut() {
            loaded.dataset = dataset;
        }

        debug!(row, column = key, "Cell edited");
        Ok(updated)
    }

    /// Drop in-memory state of the loaded dataset
    fn unload(&mut self) {
        self.cancel_in_flight();
        self.loaded = None;
        self.results.clear();
        self.selection.clear();
        self.done_rows.clear();
        self.fully_sent = false;
    }

    // ------------------------------------------------------------------
    // Pass execution
    // ------------------------------------------------------------------

    /// Start a pass over `indices`
    ///
    /// Every row request runs in its own task with its own timeout; no
    /// throttling. An empty selection settles immediately.
    async fn begin_pass(&mut self, mode: DispatchMode, indices: Vec<usize>) {
        let Some(loaded) = self.loaded.clone() else {
            return;
        };

        let batch_id = self.next_batch_id;
        self.next_batch_id += 1;

        self.cancel_in_flight();
        self.pass = Some(PassProgress {
            batch_id,
            mode,
            matched: 0,
            without_result: 0,
        });
        self.set_status(DispatchStatus::Sending { batch_id, mode });

        info!(
            fingerprint = %loaded.fingerprint,
            batch_id,
            ?mode,
            rows = indices.len(),
            "Dispatch pass started"
        );
        self.event_bus.emit_lossy(TawoEvent::DispatchStarted {
            fingerprint: loaded.fingerprint.to_string(),
            batch_id,
            mode,
            row_count: indices.len(),
            timestamp: Utc::now(),
        });

        let file = FileIdentity {
            id: loaded.fingerprint.to_string(),
            name: loaded.dataset.file_name.clone(),
        };
        let rows = &loaded.dataset.rows;

        for row_index in indices {
            let Some(target) = rows.get(row_index) else {
                continue;
            };
            let payload = build_payload(rows, target, &file, LineItem::is_remark);
            let transport = Arc::clone(&self.transport);
            let timeout = self.config.row_timeout;

            self.sending.insert(row_index);
            self.in_flight.spawn(async move {
                let result = match tokio::time::timeout(timeout, transport.submit(&payload)).await {
                    Ok(Ok(body)) => Ok(response_normalizer::extract(&body)),
                    Ok(Err(e)) => Err(e),
                    Err(_) => Err(MatchingError::Timeout(timeout)),
                };
                RowCompletion {
                    batch_id,
                    row_index,
                    result,
                }
            });
        }

        if self.sending.is_empty() {
            self.finish_pass().await;
        }
    }

    async fn on_joined(&mut self, joined: Result<RowCompletion, JoinError>) {
        match joined {
            Ok(completion) => self.on_row_settled(completion).await,
            Err(e) if e.is_cancelled() => {
                debug!("Row request cancelled");
            }
            Err(e) => {
                error!(error = %e, "Row request task panicked");
                self.fail_pass(format!("Row request task failed: {}", e)).await;
            }
        }
    }

    async fn on_row_settled(&mut self, completion: RowCompletion) {
        let current = self.pass.as_ref().map(|p| p.batch_id);
        if current != Some(completion.batch_id) {
            debug!(
                batch_id = completion.batch_id,
                row = completion.row_index,
                "Discarding result of superseded pass"
            );
            return;
        }
        let Some(fingerprint) = self.loaded.as_ref().map(|l| l.fingerprint.clone()) else {
            return;
        };

        let row_index = completion.row_index;
        self.sending.remove(&row_index);
        self.done_rows.insert(row_index);

        let outcome = match completion.result {
            Ok(Some(result)) => {
                self.results.insert(row_index, result);
                self.selection.reset_row(row_index);
                RowOutcome::Matched
            }
            Ok(None) => {
                warn!(row = row_index, "Matching response had no recognizable result");
                RowOutcome::NoResult
            }
            Err(e) => {
                warn!(row = row_index, error = %e, "Matching request failed");
                RowOutcome::NoResult
            }
        };

        if let Some(pass) = self.pass.as_mut() {
            match outcome {
                RowOutcome::Matched => pass.matched += 1,
                RowOutcome::NoResult => pass.without_result += 1,
            }
        }

        self.ledger
            .persist(
                &fingerprint,
                &self.results,
                self.selection.selections(),
                self.selection.reasons(),
            )
            .await;
        self.ledger.persist_done(&fingerprint, &self.done_rows).await;

        self.event_bus.emit_lossy(TawoEvent::RowSettled {
            fingerprint: fingerprint.to_string(),
            batch_id: completion.batch_id,
            row_index,
            outcome,
            remaining: self.sending.len(),
            timestamp: Utc::now(),
        });

        if self.sending.is_empty() {
            self.finish_pass().await;
        }
    }

    /// All requests of the pass settled
    async fn finish_pass(&mut self) {
        let Some(pass) = self.pass.take() else {
            return;
        };
        let Some(fingerprint) = self.loaded.as_ref().map(|l| l.fingerprint.clone()) else {
            return;
        };

        if pass.mode == DispatchMode::Full {
            self.ledger.mark_fully_sent(&fingerprint).await;
            self.fully_sent = true;
        }
        self.set_status(DispatchStatus::Done);

        info!(
            fingerprint = %fingerprint,
            batch_id = pass.batch_id,
            matched = pass.matched,
            without_result = pass.without_result,
            "Dispatch pass completed"
        );
        self.event_bus.emit_lossy(TawoEvent::DispatchCompleted {
            fingerprint: fingerprint.to_string(),
            batch_id: pass.batch_id,
            mode: pass.mode,
            matched: pass.matched,
            without_result: pass.without_result,
            timestamp: Utc::now(),
        });
    }

    /// Pass-level fatal failure: abort the pass, status ERROR
    async fn fail_pass(&mut self, message: String) {
        let Some(pass) = self.pass.take() else {
            return;
        };
        self.cancel_in_flight();

        let fingerprint = self
            .loaded
            .as_ref()
            .map(|l| l.fingerprint.to_string())
            .unwrap_or_default();
        if let Some(loaded) = &self.loaded {
            self.ledger.persist_done(&loaded.fingerprint, &self.done_rows).await;
        }

        self.set_status(DispatchStatus::Error {
            message: message.clone(),
        });
        self.event_bus.emit_lossy(TawoEvent::DispatchFailed {
            fingerprint,
            batch_id: pass.batch_id,
            message,
            timestamp: Utc::now(),
        });
    }

    /// Abort every in-flight request and forget the running pass
    fn cancel_in_flight(&mut self) {
        if !self.in_flight.is_empty() {
            debug!(in_flight = self.in_flight.len(), "Cancelling in-flight row requests");
        }
        // Dropping the set aborts its tasks; none of them is joined again
        self.in_flight = JoinSet::new();
        self.sending.clear();
        self.pass = None;
    }

    // ------------------------------------------------------------------
    // Selection
    // ------------------------------------------------------------------

    async fn select(&mut self, row: usize, rank: usize) -> Result<RowResultView, DispatchError> {
        let (fingerprint, item) = {
            let loaded = self.loaded_dataset()?;
            let item = loaded.dataset.rows.get(row).cloned();
            (loaded.fingerprint.clone(), item.ok_or(DispatchError::RowOutOfRange(row))?)
        };
        let result = self.results.get(&row);
        let candidate_count = result.map_or(0, MatchResult::candidate_count);

        let change = self.selection.select(row, rank, candidate_count)?;

        if let Some(change) = change {
            let old_match = result.and_then(|r| r.candidate(change.old_rank));
            let corrected_match = result.and_then(|r| r.candidate(change.new_rank));

            let feedback = CorrectionFeedback {
                fingerprint: fingerprint.clone(),
                row_index: row,
                row: item,
                old_match,
                corrected_match,
                reason: change.reason.clone(),
            };
            if self.feedback_tx.send(feedback).is_err() {
                warn!(row, "Feedback notifier not running, correction not reported");
            }

            self.event_bus.emit_lossy(TawoEvent::SelectionChanged {
                fingerprint: fingerprint.to_string(),
                row_index: row,
                old_rank: change.old_rank,
                new_rank: change.new_rank,
                timestamp: Utc::now(),
            });
            info!(row, old_rank = change.old_rank, new_rank = change.new_rank, "Selection changed");
        }

        self.ledger
            .persist_selection(&fingerprint, self.selection.selections(), self.selection.reasons())
            .await;
        Ok(self.row_view(row))
    }

    async fn set_reason(&mut self, row: usize, reason: &str) -> Result<RowResultView, DispatchError> {
        let fingerprint = {
            let loaded = self.loaded_dataset()?;
            if row >= loaded.dataset.rows.len() {
                return Err(DispatchError::RowOutOfRange(row));
            }
            loaded.fingerprint.clone()
        };

        self.selection.set_reason(row, reason)?;
        self.ledger
            .persist_selection(&fingerprint, self.selection.selections(), self.selection.reasons())
            .await;
        Ok(self.row_view(row))
    }

    // ------------------------------------------------------------------
    // Views
    // ------------------------------------------------------------------

    fn loaded_dataset(&self) -> Result<&LoadedDataset, DispatchError> {
        self.loaded.as_ref().ok_or(DispatchError::NoDataset)
    }

    fn dispatchable_indices(&self) -> Vec<usize> {
        self.loaded
            .as_ref()
            .map(|l| l.dataset.dispatchable_indices())
            .unwrap_or_default()
    }

    fn set_status(&self, status: DispatchStatus) {
        debug!(status = status.label(), "Dispatch status changed");
        self.status_tx.send_replace(status);
    }

    fn row_view(&self, row: usize) -> RowResultView {
        let result = self.results.get(&row);
        RowResultView {
            row_index: row,
            rank: self.selection.rank(row),
            reason: self.selection.reason(row).map(str::to_string),
            candidates: result.map(MatchResult::candidates).unwrap_or_default(),
            technical: result.map(|r| r.technical().clone()).unwrap_or_default(),
        }
    }

    fn results_view(&self) -> Result<ResultsView, DispatchError> {
        let loaded = self.loaded_dataset()?;
        Ok(ResultsView {
            fingerprint: loaded.fingerprint.clone(),
            rows: self.results.keys().map(|row| self.row_view(*row)).collect(),
        })
    }

    fn snapshot(&self) -> MatchingSnapshot {
        let status = self.status_tx.borrow().clone();
        let Some(loaded) = &self.loaded else {
            return MatchingSnapshot {
                fingerprint: None,
                file_name: None,
                status,
                sending: Vec::new(),
                rows: Vec::new(),
                dispatchable: 0,
                matched: 0,
                fully_sent: false,
            };
        };

        let rows = loaded
            .dataset
            .rows
            .iter()
            .enumerate()
            .map(|(idx, row)| {
                if row.is_remark() {
                    RowState::Remark
                } else if self.sending.contains(&idx) {
                    RowState::Sending
                } else if self.results.contains_key(&idx) {
                    RowState::Matched
                } else if self.done_rows.contains(&idx) {
                    RowState::NoResult
                } else {
                    RowState::Pending
                }
            })
            .collect();

        MatchingSnapshot {
            fingerprint: Some(loaded.fingerprint.clone()),
            file_name: Some(loaded.dataset.file_name.clone()),
            fully_sent: self.fully_sent,
            status,
            sending: self.sending.iter().copied().collect(),
            rows,
            dispatchable: loaded.dataset.dispatchable_indices().len(),
            matched: self.results.len(),
        }
    }
}
