//! Update controller: the state machine driving one update attempt.
//!
//! ```text
//! Idle -> CheckingVersion -> BackingUp -> ApplyingSteps
//!      -> RestartingServices -> Verifying -> Committed | RolledBack | Fatal
//! ```
//!
//! Every transition is reported as a `state_transition` metric event. Any
//! failure after the snapshot restores it; only a failed restore escapes as
//! an error, and then the journal keeps the appliance locked until an
//! operator acknowledges.

mod state;

pub use state::{TickOutcome, UpdateState};

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::backup::{BackupManager, BackupSnapshot};
use crate::config::UpdaterConfig;
use crate::error::{Result, UpdateError};
use crate::manifest::{Fetcher, HttpFetcher, Manifest, ManifestClient};
use crate::metrics::{build_sink, MetricEvent, MetricsSink};
use crate::services::{
    build_orchestrator, compute_restart_set, declared_services, ProcessRunner, ServiceOrchestrator,
};
use crate::state::{JournalEntry, JournalPhase, UpdateJournal, VersionStore};
use crate::steps::StepExecutor;
use crate::verify::Verifier;
use crate::version::Version;

/// Result of a version check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionCheck {
    pub current: Version,
    pub latest: Option<Version>,
    pub update_available: bool,
}

/// Snapshot of persisted updater state for the `status` command.
#[derive(Debug)]
pub struct StatusReport {
    pub installed: Result<Version>,
    pub pending: Result<Option<JournalEntry>>,
    pub snapshots: Vec<BackupSnapshot>,
}

/// Everything an attempt carries from the snapshot onwards.
struct Attempt {
    entry: JournalEntry,
    snapshot: BackupSnapshot,
    started: Instant,
    steps_completed: usize,
    total_steps: usize,
    /// Set once a restart has been issued, even if it failed midway.
    restarted: BTreeSet<String>,
}

/// Drives update attempts.
pub struct UpdateController {
    config: UpdaterConfig,
    client: ManifestClient,
    versions: VersionStore,
    journal: UpdateJournal,
    backups: BackupManager,
    executor: StepExecutor,
    orchestrator: Arc<dyn ServiceOrchestrator>,
    verifier: Verifier,
    metrics: Arc<dyn MetricsSink>,
    state: Mutex<UpdateState>,
    attempt_lock: tokio::sync::Mutex<()>,
}

impl UpdateController {
    pub fn new(
        config: UpdaterConfig,
        fetcher: Arc<dyn Fetcher>,
        orchestrator: Arc<dyn ServiceOrchestrator>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        let client = ManifestClient::new(fetcher, &config.repository);
        let versions = VersionStore::new(config.paths.version_file())
            .with_legacy(config.paths.legacy_version_file());
        let journal = UpdateJournal::new(config.paths.journal_file());
        let backups = BackupManager::new(&config.paths).excluding(config.live_files());
        let executor = StepExecutor::new(client.clone(), &config.paths);
        let verifier = Verifier::new(
            orchestrator.clone(),
            versions.clone(),
            config.paths.compose_file.clone(),
            config.services.excluded.clone(),
            metrics.clone(),
        );
        Self {
            config,
            client,
            versions,
            journal,
            backups,
            executor,
            orchestrator,
            verifier,
            metrics,
            state: Mutex::new(UpdateState::Idle),
            attempt_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Build a controller with the real HTTP fetcher, process runner and the
    /// configured restart strategy and metrics sink.
    pub fn from_config(config: UpdaterConfig) -> Result<Self> {
        let fetcher = Arc::new(HttpFetcher::new(Duration::from_secs(
            config.repository.timeout_secs,
        ))?);
        let runner = Arc::new(ProcessRunner::new(Duration::from_secs(
            config.services.command_timeout_secs,
        )));
        let orchestrator =
            build_orchestrator(&config.services, &config.paths.compose_file, runner);
        let metrics = build_sink(&config.metrics)?;
        crate::log_component!(
            info,
            "controller",
            "Controller configured",
            strategy = orchestrator.name()
        );
        Ok(Self::new(config, fetcher, orchestrator, metrics))
    }

    pub fn config(&self) -> &UpdaterConfig {
        &self.config
    }

    /// Current state.
    pub fn state(&self) -> UpdateState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn transition(&self, to: UpdateState) {
        let from = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::replace(&mut *state, to)
        };
        if from == to {
            return;
        }
        debug!(from = %from, to = %to, "State transition");
        self.metrics.emit(&MetricEvent::StateTransition { from, to });
    }

    // ------------------------------------------------------------------
    // Scheduler
    // ------------------------------------------------------------------

    /// Resume any interrupted attempt, then tick every
    /// `intervals.update_check_secs` until `shutdown` resolves.
    ///
    /// Returns an error only for fatal conditions.
    pub async fn run<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        if let Some(outcome) = self.resume().await? {
            info!("Resumed interrupted update: {}", outcome);
        }

        let period = Duration::from_secs(self.config.intervals.update_check_secs.max(1));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(interval_secs = period.as_secs(), "Update scheduler started");

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Update scheduler stopped");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    match self.tick().await {
                        Ok(outcome) => info!("Update check finished: {}", outcome),
                        Err(e) if e.is_fatal() => {
                            error!(error_kind = e.kind(), "Updater halted: {}", e);
                            return Err(e);
                        }
                        Err(e) => warn!(error_kind = e.kind(), "Update check failed: {}", e),
                    }
                }
            }
        }
    }

    /// One scheduler tick: check for a newer version and apply it.
    pub async fn tick(&self) -> Result<TickOutcome> {
        let Ok(_guard) = self.attempt_lock.try_lock() else {
            debug!("Tick ignored, attempt in flight");
            return Ok(TickOutcome::Busy);
        };
        self.settle_journal().await?;

        self.transition(UpdateState::CheckingVersion);
        let check = self.version_check().await;
        match check.latest {
            Some(target) if check.update_available => {
                self.attempt(check.current, target).await
            }
            latest => {
                info!(current = %check.current, "No update available");
                self.transition(UpdateState::Idle);
                Ok(TickOutcome::NoUpdate {
                    current: check.current,
                    latest,
                })
            }
        }
    }

    /// Apply `target` now, without consulting the published latest version.
    pub async fn apply_update(&self, target: &Version) -> Result<TickOutcome> {
        let Ok(_guard) = self.attempt_lock.try_lock() else {
            return Ok(TickOutcome::Busy);
        };
        self.settle_journal().await?;

        self.transition(UpdateState::CheckingVersion);
        let current = self.versions.current_or_zero();
        let update_available = target.is_newer_than(&current);
        self.metrics.emit(&MetricEvent::VersionCheck {
            current: current.to_string(),
            latest: Some(target.to_string()),
            update_available,
        });
        if !update_available {
            info!(current = %current, target = %target, "Target is not newer; nothing to do");
            self.transition(UpdateState::Idle);
            return Ok(TickOutcome::NoUpdate {
                current,
                latest: Some(target.clone()),
            });
        }
        self.attempt(current, target.clone()).await
    }

    /// Compare the installed and published versions. Emits `version_check`;
    /// never mutates anything.
    pub async fn version_check(&self) -> VersionCheck {
        let current = self.versions.current_or_zero();
        let latest = self.client.latest_version().await;
        let update_available = latest.as_ref().is_some_and(|l| l.is_newer_than(&current));
        self.metrics.emit(&MetricEvent::VersionCheck {
            current: current.to_string(),
            latest: latest.as_ref().map(ToString::to_string),
            update_available,
        });
        VersionCheck {
            current,
            latest,
            update_available,
        }
    }

    // ------------------------------------------------------------------
    // Attempt
    // ------------------------------------------------------------------

    async fn attempt(&self, current: Version, target: Version) -> Result<TickOutcome> {
        let manifest = match self.client.fetch_manifest(&target).await {
            Ok(m) => m,
            Err(e) => {
                warn!(target = %target, error_kind = e.kind(), "Manifest rejected: {}", e);
                return Ok(self.check_failed(target, e.to_string()));
            }
        };
        if manifest.has_unsupported_steps() {
            return Ok(self.check_failed(target, "manifest contains unsupported steps".into()));
        }
        if let Some(required) = &manifest.requires {
            if required > &current {
                let reason = format!("requires {required}, installed {current}");
                warn!(target = %target, "Update rejected: {}", reason);
                self.metrics.emit(&MetricEvent::UpdateCheck {
                    success: false,
                    error: reason,
                });
                self.transition(UpdateState::Idle);
                return Ok(TickOutcome::Rejected {
                    target,
                    required: required.clone(),
                    current,
                });
            }
        }
        if !manifest.rollback_supported {
            warn!(target = %target, "Manifest declares rollback unsupported; failures will still restore the snapshot");
        }

        let attempt_id = uuid::Uuid::new_v4().to_string();
        let span = info_span!("update_attempt", attempt = %attempt_id, from = %current, to = %target);
        self.run_attempt(attempt_id, current, target, manifest)
            .instrument(span)
            .await
    }

    fn check_failed(&self, target: Version, reason: String) -> TickOutcome {
        self.metrics.emit(&MetricEvent::UpdateCheck {
            success: false,
            error: reason.clone(),
        });
        self.transition(UpdateState::Idle);
        TickOutcome::CheckFailed { target, reason }
    }

    async fn run_attempt(
        &self,
        attempt_id: String,
        current: Version,
        target: Version,
        manifest: Manifest,
    ) -> Result<TickOutcome> {
        info!(
            steps = manifest.steps.len(),
            description = manifest.description.as_deref().unwrap_or(""),
            "Starting update"
        );
        let started = Instant::now();

        self.transition(UpdateState::BackingUp);
        let (snapshot, entry) = match self.prepare(&attempt_id, &current, &target) {
            Ok(prepared) => prepared,
            Err(e) => {
                error!(error_kind = e.kind(), "Backup failed, update aborted: {}", e);
                self.metrics.emit(&MetricEvent::SystemBackup {
                    success: false,
                    path: None,
                    error: Some(e.to_string()),
                });
                self.emit_system_update(false, started, 0, manifest.steps.len(), &current, &target, Some(e.to_string()));
                self.transition(UpdateState::Fatal);
                self.transition(UpdateState::Idle);
                return Ok(TickOutcome::Aborted {
                    target,
                    reason: e.to_string(),
                });
            }
        };
        self.metrics.emit(&MetricEvent::SystemBackup {
            success: true,
            path: Some(snapshot.dir().display().to_string()),
            error: None,
        });

        let mut attempt = Attempt {
            entry,
            snapshot,
            started,
            steps_completed: 0,
            total_steps: manifest.steps.len(),
            restarted: BTreeSet::new(),
        };

        match self.apply_and_commit(&mut attempt, &manifest).await {
            Ok(()) => self.finish_committed(&attempt),
            Err(e) => self.roll_back(&mut attempt, e).await,
        }
    }

    /// Snapshot and journal the attempt.
    fn prepare(
        &self,
        attempt_id: &str,
        current: &Version,
        target: &Version,
    ) -> Result<(BackupSnapshot, JournalEntry)> {
        let snapshot = self.backups.snapshot()?;
        let entry = JournalEntry::new(attempt_id, current.clone(), target.clone(), &snapshot.id);
        self.journal
            .save(&entry)
            .map_err(|e| UpdateError::BackupFailed(format!("journal: {e}")))?;
        Ok((snapshot, entry))
    }

    async fn apply_and_commit(&self, attempt: &mut Attempt, manifest: &Manifest) -> Result<()> {
        self.transition(UpdateState::ApplyingSteps);
        let target = attempt.entry.to_version.clone();
        for (i, step) in manifest.steps.iter().enumerate() {
            let number = i + 1;
            let result = self.executor.apply(number, step).await;
            self.metrics.emit(&MetricEvent::UpdateStep {
                success: result.succeeded,
                duration_seconds: result.duration.as_secs_f64(),
                version: target.to_string(),
                step_type: step.type_name().to_string(),
                step_number: number,
                total_steps: attempt.total_steps,
                error: result.error.as_ref().map(ToString::to_string),
            });
            if let Some(e) = result.error {
                return Err(e);
            }
            attempt.steps_completed = number;
            debug!(step = number, "{}", step.describe());
        }

        let declared = declared_services(&self.config.paths.compose_file)
            .map_err(|e| UpdateError::RestartFailed(format!("compose document: {e}")))?;
        let restart_set = compute_restart_set(manifest, &declared, &self.config.services.excluded)?;

        attempt.entry.restart_set = restart_set.iter().cloned().collect();
        attempt.entry.advance(JournalPhase::Committed);
        self.journal.save(&attempt.entry)?;
        self.versions.commit(&target)?;

        self.restart_and_verify(attempt, &restart_set).await
    }

    async fn restart_and_verify(
        &self,
        attempt: &mut Attempt,
        restart_set: &BTreeSet<String>,
    ) -> Result<()> {
        self.transition(UpdateState::RestartingServices);
        attempt.restarted = restart_set.clone();
        info!(services = ?restart_set, strategy = self.orchestrator.name(), "Restarting services");
        self.orchestrator.restart(restart_set).await.map_err(|e| match e {
            err @ (UpdateError::RestartFailed(_) | UpdateError::UnknownService(_)) => err,
            other => UpdateError::RestartFailed(other.to_string()),
        })?;

        self.transition(UpdateState::Verifying);
        self.verifier.report(&attempt.entry.to_version).await
    }

    fn finish_committed(&self, attempt: &Attempt) -> Result<TickOutcome> {
        self.transition(UpdateState::Committed);
        if let Err(e) = self.journal.clear() {
            warn!("Could not clear journal after commit: {}", e);
        }
        let from = attempt.entry.from_version.clone();
        let to = attempt.entry.to_version.clone();
        info!(from = %from, to = %to, "Update committed");
        self.emit_system_update(
            true,
            attempt.started,
            attempt.steps_completed,
            attempt.total_steps,
            &from,
            &to,
            None,
        );
        self.transition(UpdateState::Idle);
        Ok(TickOutcome::Committed { from, to })
    }

    async fn roll_back(&self, attempt: &mut Attempt, cause: UpdateError) -> Result<TickOutcome> {
        if !cause.triggers_rollback() {
            warn!("Unexpected failure after snapshot: {}", cause);
        }
        error!(error_kind = cause.kind(), "Update failed, rolling back: {}", cause);
        self.transition(UpdateState::RolledBack);

        let from = attempt.entry.from_version.clone();
        let to = attempt.entry.to_version.clone();
        let rollback_started = Instant::now();

        if let Err(restore_err) = self.backups.restore(&attempt.snapshot) {
            self.metrics.emit(&MetricEvent::Rollback {
                success: false,
                duration_seconds: rollback_started.elapsed().as_secs_f64(),
                backup_id: attempt.snapshot.id.clone(),
                error: Some(restore_err.to_string()),
            });
            attempt.entry.error = Some(format!("{cause}; {restore_err}"));
            attempt.entry.advance(JournalPhase::Fatal);
            if let Err(e) = self.journal.save(&attempt.entry) {
                error!("Could not record fatal state in journal: {}", e);
            }
            self.emit_system_update(
                false,
                attempt.started,
                attempt.steps_completed,
                attempt.total_steps,
                &from,
                &to,
                Some(restore_err.to_string()),
            );
            self.transition(UpdateState::Fatal);
            error!(backup_id = %attempt.snapshot.id, error_kind = restore_err.kind(), "Restore failed; operator intervention required");
            return Err(restore_err);
        }

        if !attempt.restarted.is_empty() {
            self.restart_restored(&attempt.restarted).await;
        }

        self.metrics.emit(&MetricEvent::Rollback {
            success: true,
            duration_seconds: rollback_started.elapsed().as_secs_f64(),
            backup_id: attempt.snapshot.id.clone(),
            error: None,
        });
        if let Err(e) = self.journal.clear() {
            warn!("Could not clear journal after rollback: {}", e);
        }
        self.emit_system_update(
            false,
            attempt.started,
            attempt.steps_completed,
            attempt.total_steps,
            &from,
            &to,
            Some(cause.to_string()),
        );
        info!(backup_id = %attempt.snapshot.id, version = %from, "Rolled back");
        self.transition(UpdateState::Idle);
        Ok(TickOutcome::RolledBack {
            from,
            to,
            reason: cause.to_string(),
        })
    }

    /// Bring restarted services back up on the restored definitions and
    /// remove those the restored document no longer declares.
    /// Best-effort: the restored files are already in place.
    async fn restart_restored(&self, restarted: &BTreeSet<String>) {
        let declared = match declared_services(&self.config.paths.compose_file) {
            Ok(d) => d,
            Err(e) => {
                warn!("Restored compose document unreadable, services not restarted: {}", e);
                return;
            }
        };

        let orphans: BTreeSet<String> = restarted.difference(&declared).cloned().collect();
        if !orphans.is_empty() {
            info!(services = ?orphans, "Removing services added by the rolled-back update");
            if let Err(e) = self.orchestrator.remove(&orphans).await {
                warn!(services = ?orphans, "Removal after rollback failed: {}", e);
            }
        }

        let set: BTreeSet<String> = restarted.intersection(&declared).cloned().collect();
        if let Err(e) = self.orchestrator.restart(&set).await {
            warn!(services = ?set, "Restart after rollback failed: {}", e);
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn emit_system_update(
        &self,
        success: bool,
        started: Instant,
        steps_completed: usize,
        total_steps: usize,
        from: &Version,
        to: &Version,
        error: Option<String>,
    ) {
        self.metrics.emit(&MetricEvent::SystemUpdate {
            success,
            duration_seconds: started.elapsed().as_secs_f64(),
            steps_completed,
            total_steps,
            from_version: from.to_string(),
            to_version: to.to_string(),
            error,
        });
    }

    // ------------------------------------------------------------------
    // Journal
    // ------------------------------------------------------------------

    /// Resolve an attempt interrupted by a crash or restart.
    ///
    /// An attempt that never committed its version is rolled back. One that
    /// committed is restarted and verified again, then committed or rolled
    /// back. A fatal journal is an error until acknowledged.
    pub async fn resume(&self) -> Result<Option<TickOutcome>> {
        let Ok(_guard) = self.attempt_lock.try_lock() else {
            return Ok(Some(TickOutcome::Busy));
        };
        self.settle_journal().await
    }

    async fn settle_journal(&self) -> Result<Option<TickOutcome>> {
        let Some(entry) = self.journal.load()? else {
            return Ok(None);
        };
        if entry.phase == JournalPhase::Fatal {
            self.transition(UpdateState::Fatal);
            return Err(UpdateError::OperatorIntervention(format!(
                "update {} -> {} left the appliance unrestored ({}); run `hubupdate acknowledge` after repair",
                entry.from_version,
                entry.to_version,
                entry.error.as_deref().unwrap_or("restore failed")
            )));
        }

        let span = info_span!("update_attempt", attempt = %entry.attempt_id, from = %entry.from_version, to = %entry.to_version, resumed = true);
        self.resume_entry(entry).instrument(span).await.map(Some)
    }

    async fn resume_entry(&self, entry: JournalEntry) -> Result<TickOutcome> {
        warn!(phase = ?entry.phase, backup_id = %entry.backup_id, "Found interrupted update");
        let snapshot = match self.backups.load(&entry.backup_id) {
            Ok(s) => s,
            Err(e) => {
                let mut entry = entry;
                entry.error = Some(e.to_string());
                entry.advance(JournalPhase::Fatal);
                if let Err(save_err) = self.journal.save(&entry) {
                    error!("Could not record fatal state in journal: {}", save_err);
                }
                self.transition(UpdateState::Fatal);
                return Err(e);
            }
        };

        let restart_set: BTreeSet<String> = entry.restart_set.iter().cloned().collect();
        let phase = entry.phase;
        let mut attempt = Attempt {
            entry,
            snapshot,
            started: Instant::now(),
            steps_completed: 0,
            total_steps: 0,
            restarted: BTreeSet::new(),
        };

        match phase {
            JournalPhase::Committed => {
                match self.restart_and_verify(&mut attempt, &restart_set).await {
                    Ok(()) => self.finish_committed(&attempt),
                    Err(e) => self.roll_back(&mut attempt, e).await,
                }
            }
            _ => {
                let cause = UpdateError::StepFailed {
                    step: 0,
                    message: "interrupted before the version was committed".into(),
                };
                self.roll_back(&mut attempt, cause).await
            }
        }
    }

    /// Clear a fatal journal after operator repair.
    pub fn acknowledge(&self) -> Result<Option<JournalEntry>> {
        let cleared = self.journal.acknowledge()?;
        if cleared.is_some() {
            self.transition(UpdateState::Idle);
        }
        Ok(cleared)
    }

    /// Installed version, pending journal and available snapshots.
    pub fn status(&self) -> StatusReport {
        StatusReport {
            installed: self.versions.current(),
            pending: self.journal.load(),
            snapshots: self.backups.list().unwrap_or_else(|e| {
                warn!("Could not list snapshots: {}", e);
                Vec::new()
            }),
        }
    }
}
