//! Reload coordinator.
//!
//! One task owns the reload cycle. Triggers (file changes, explicit reload
//! requests) arrive on a bounded channel; bursts of file events are
//! debounced with a resetting timer, and anything that arrives while a cycle
//! runs is folded into exactly one follow-up cycle.
//!
//! A cycle moves through `Scanning`, `Building` and `Swapping`. Nothing the
//! delivery side can see changes before `Swapping`, and `Swapping` either
//! completes or leaves the previous generation in place.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::bundler::Bundler;
use super::cache::{BuildCache, BuildStart};
use super::cancel::CancelToken;
use super::loader::ServerLoader;
use super::scanner::PackageScanner;
use super::state::{Generation, ManagerState};
use super::types::TypeTag;
use crate::config::ManagerConfig;
use crate::error::{ExtensionError, ExtensionWarning, Result, WarningStage};

/// Where the coordinator is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CycleState {
    Idle,
    Scanning,
    Building,
    Swapping,
}

impl fmt::Display for CycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CycleState::Idle => "idle",
            CycleState::Scanning => "scanning",
            CycleState::Building => "building",
            CycleState::Swapping => "swapping",
        };
        f.write_str(s)
    }
}

/// Result of one reload cycle, as reported to the callers it covered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleOutcome {
    /// Generation active after the cycle. Unchanged when the cycle failed.
    pub generation: u64,
    pub warnings: Vec<ExtensionWarning>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl CycleOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Snapshot returned by [`ReloadCoordinator::status`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorStatus {
    pub state: CycleState,
    pub generation: u64,
    pub cycles_completed: u64,
    pub cycles_failed: u64,
    pub triggers_received: u64,
    /// Triggers absorbed into a cycle started by an earlier trigger.
    pub triggers_coalesced: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_outcome: Option<CycleOutcome>,
}

impl Default for CoordinatorStatus {
    fn default() -> Self {
        Self {
            state: CycleState::Idle,
            generation: 0,
            cycles_completed: 0,
            cycles_failed: 0,
            triggers_received: 0,
            triggers_coalesced: 0,
            last_outcome: None,
        }
    }
}

/// Something that asks for a reload.
#[derive(Debug)]
pub enum Trigger {
    /// Files changed under a watched directory. Debounced.
    FsEvent(Vec<PathBuf>),
    /// An explicit reload. The responder, if any, receives the outcome of
    /// the cycle that covers it.
    Explicit(Option<oneshot::Sender<CycleOutcome>>),
    Shutdown,
}

/// Everything a cycle needs. Runs on a blocking thread.
pub struct ReloadPipeline {
    config: ManagerConfig,
    state: Arc<ManagerState>,
    cache: Arc<BuildCache>,
    bundler: Bundler,
    loader: Arc<ServerLoader>,
    status: Arc<RwLock<CoordinatorStatus>>,
}

impl ReloadPipeline {
    pub fn new(
        config: ManagerConfig,
        state: Arc<ManagerState>,
        cache: Arc<BuildCache>,
        bundler: Bundler,
        loader: Arc<ServerLoader>,
    ) -> Self {
        Self {
            config,
            state,
            cache,
            bundler,
            loader,
            status: Arc::new(RwLock::new(CoordinatorStatus::default())),
        }
    }

    fn set_state(&self, state: CycleState) {
        debug!(category = "extensions", state = %state, "Reload cycle state");
        self.status.write().state = state;
    }

    /// Run one full cycle. Returns the id of the published generation and
    /// the warnings collected along the way.
    pub fn run(&self, cancel: &CancelToken) -> Result<(u64, Vec<ExtensionWarning>)> {
        self.set_state(CycleState::Scanning);
        let report = PackageScanner::new(self.config.paths.iter().cloned())
            .with_disabled(self.config.disabled.iter().cloned())
            .scan()?;
        cancel.check()?;

        self.set_state(CycleState::Building);
        let previous = self.state.current();
        let mut warnings = report.warnings;

        for tag in TypeTag::APP {
            cancel.check()?;
            match self.cache.begin_build(tag) {
                BuildStart::Started(guard) => {
                    match self.bundler.build_with_cancel(tag, &report.descriptors, cancel) {
                        Ok(payload) => {
                            warnings.extend(payload.warnings.iter().cloned());
                            guard.complete(payload);
                        }
                        Err(ExtensionError::Cancelled) => return Err(ExtensionError::Cancelled),
                        Err(e) => {
                            warn!(category = "extensions", type_tag = %tag, error = %e, "Build failed, keeping previous payload");
                            warnings.push(ExtensionWarning::new(tag.plural(), WarningStage::Build, e));
                        }
                    }
                }
                BuildStart::InFlight { .. } => {
                    warnings.push(ExtensionWarning::new(
                        tag.plural(),
                        WarningStage::Build,
                        "build already in flight, keeping previous payload",
                    ));
                }
            }
        }

        let staged = self.loader.stage(&report.descriptors, cancel)?;
        warnings.extend(staged.warnings().iter().cloned());
        cancel.check()?;

        self.set_state(CycleState::Swapping);
        let mut payloads = previous.payloads.clone();
        payloads.extend(self.cache.take_staged());
        let server = self.loader.commit(staged)?;

        let next = Generation {
            id: previous.id + 1,
            created_at: Utc::now(),
            descriptors: report.descriptors,
            payloads,
            server,
            warnings: warnings.clone(),
        };
        let id = next.id;
        self.state.publish(next);
        Ok((id, warnings))
    }

    /// Throw away anything a failed cycle staged.
    fn abandon(&self) {
        self.cache.discard_staged();
    }
}

/// Handle to the running coordinator task.
pub struct ReloadCoordinator {
    tx: mpsc::Sender<Trigger>,
    status: Arc<RwLock<CoordinatorStatus>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ReloadCoordinator {
    /// Spawn the coordinator task on the current tokio runtime.
    pub fn spawn(pipeline: ReloadPipeline) -> Self {
        let (tx, rx) = mpsc::channel(pipeline.config.trigger_capacity);
        let status = pipeline.status.clone();
        let task = CoordinatorTask {
            rx,
            debounce: pipeline.config.debounce,
            cycle_timeout: pipeline.config.cycle_timeout,
            pipeline: Arc::new(pipeline),
        };
        let handle = tokio::spawn(task.run());

        Self {
            tx,
            status,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Sender for trigger sources such as the file watcher.
    pub fn trigger_sender(&self) -> mpsc::Sender<Trigger> {
        self.tx.clone()
    }

    /// Request a reload and wait for the cycle that covers it.
    pub async fn reload(&self) -> Result<CycleOutcome> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(Trigger::Explicit(Some(tx)))
            .await
            .map_err(|_| ExtensionError::CoordinatorStopped)?;
        rx.await.map_err(|_| ExtensionError::CoordinatorStopped)
    }

    /// Report changed paths. Never blocks; a full channel already guarantees
    /// a pending cycle.
    pub fn notify_changed(&self, paths: Vec<PathBuf>) {
        if let Err(e) = self.tx.try_send(Trigger::FsEvent(paths)) {
            debug!(category = "extensions", error = %e, "Dropped file trigger");
        }
    }

    pub fn status(&self) -> CoordinatorStatus {
        self.status.read().clone()
    }

    /// Stop the task after the current cycle. Pending waiters are released
    /// with `CoordinatorStopped`.
    pub async fn shutdown(&self) {
        let _ = self.tx.send(Trigger::Shutdown).await;
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(category = "extensions", error = %e, "Reload coordinator task failed");
            }
        }
    }
}

/// Triggers gathered for one cycle.
#[derive(Default)]
struct Batch {
    triggers: u64,
    explicit: bool,
    waiters: Vec<oneshot::Sender<CycleOutcome>>,
    shutdown: bool,
}

impl Batch {
    fn add(&mut self, trigger: Trigger) {
        match trigger {
            Trigger::FsEvent(paths) => {
                debug!(category = "extensions", paths = paths.len(), "File change trigger");
            }
            Trigger::Explicit(waiter) => {
                self.explicit = true;
                self.waiters.extend(waiter);
            }
            Trigger::Shutdown => {
                self.shutdown = true;
                return;
            }
        }
        self.triggers += 1;
    }

    fn drain(&mut self, rx: &mut mpsc::Receiver<Trigger>) {
        while !self.shutdown {
            match rx.try_recv() {
                Ok(trigger) => self.add(trigger),
                Err(_) => break,
            }
        }
    }
}

struct CoordinatorTask {
    rx: mpsc::Receiver<Trigger>,
    debounce: Duration,
    cycle_timeout: Duration,
    pipeline: Arc<ReloadPipeline>,
}

impl CoordinatorTask {
    async fn run(mut self) {
        info!(category = "extensions", debounce = ?self.debounce, timeout = ?self.cycle_timeout, "Reload coordinator started");

        while let Some(first) = self.rx.recv().await {
            let mut batch = Batch::default();
            batch.add(first);

            // File bursts wait for a quiet period. An explicit request ends
            // the wait early.
            while !batch.explicit && !batch.shutdown {
                tokio::select! {
                    next = self.rx.recv() => match next {
                        Some(trigger) => batch.add(trigger),
                        None => break,
                    },
                    _ = tokio::time::sleep(self.debounce) => break,
                }
            }
            batch.drain(&mut self.rx);

            if batch.shutdown {
                break;
            }

            {
                let mut status = self.pipeline.status.write();
                status.triggers_received += batch.triggers;
                status.triggers_coalesced += batch.triggers.saturating_sub(1);
            }

            let outcome = self.execute().await;
            for waiter in batch.waiters {
                let _ = waiter.send(outcome.clone());
            }
        }

        info!(category = "extensions", "Reload coordinator stopped");
    }

    /// Run one cycle on the blocking pool under `cycle_timeout`.
    ///
    /// On timeout the cancel flag is set and the task is awaited before the
    /// outcome is reported. Cancellation is only observed between extensions,
    /// so a slow compile or entry point delays the report until it returns.
    async fn execute(&self) -> CycleOutcome {
        let started_at = Utc::now();
        let started = Instant::now();
        let cancel = CancelToken::new();

        let mut task = {
            let pipeline = self.pipeline.clone();
            let cancel = cancel.clone();
            tokio::task::spawn_blocking(move || pipeline.run(&cancel))
        };

        let result = match tokio::time::timeout(self.cycle_timeout, &mut task).await {
            Ok(joined) => joined.unwrap_or_else(|e| Err(ExtensionError::Swap(format!("cycle task failed: {}", e)))),
            Err(_) => {
                cancel.cancel();
                warn!(category = "extensions", timeout = ?self.cycle_timeout, "Reload cycle timed out, cancelling");
                match task.await {
                    // The cycle passed its last cancellation point and published.
                    Ok(Ok(done)) => Ok(done),
                    _ => Err(ExtensionError::Timeout(self.cycle_timeout)),
                }
            }
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        let mut status = self.pipeline.status.write();
        status.state = CycleState::Idle;

        let outcome = match result {
            Ok((generation, warnings)) => {
                status.cycles_completed += 1;
                status.generation = generation;
                info!(
                    category = "extensions",
                    generation,
                    warnings = warnings.len(),
                    duration_ms,
                    "Reload cycle published"
                );
                CycleOutcome {
                    generation,
                    warnings,
                    error: None,
                    started_at,
                    duration_ms,
                }
            }
            Err(e) => {
                self.pipeline.abandon();
                status.cycles_failed += 1;
                error!(category = "extensions", error = %e, duration_ms, "Reload cycle failed, previous generation kept");
                CycleOutcome {
                    generation: self.pipeline.state.current().id,
                    warnings: Vec::new(),
                    error: Some(e.to_string()),
                    started_at,
                    duration_ms,
                }
            }
        };
        status.last_outcome = Some(outcome.clone());
        outcome
    }
}
