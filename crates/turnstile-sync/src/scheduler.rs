//! # Scheduler
//!
//! Drives the recurring cycle: fetch every machine concurrently, run one
//! sync pass, then the retention sweep.
//!
//! ## State Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │            start()                      stop()                      │
//! │  Stopped ──────────► Running ──────────────────► Stopped            │
//! │     ▲  no-op if          │  no-op if already stopped                │
//! │     │  already running   │                                          │
//! │     │                    ▼                                          │
//! │     │            driver task: grace wait, then                     │
//! │     └─────────── { dispatch run; sleep period } ◄── shutdown       │
//! │                                                     channel        │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Dispatched fetch and sync tasks are detached: the driver does not
//! wait for them before arming the next run's timer, so a period shorter
//! than a full cycle lets two runs overlap. Every run carries a short
//! tag in its scheduler audit entries and tracing spans, keeping entries
//! from overlapping runs attributable. Stopping prevents new runs only;
//! in-flight work always completes. [`Scheduler::run_once`] is the
//! serialized alternative for manual triggering.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, error, info, info_span, Instrument};
use uuid::Uuid;

use crate::audit::audit;
use crate::device::DeviceClient;
use crate::error::SyncResult;
use crate::fetch::{fetch_machine, FetchOutcome};
use crate::push::{sync_all, SyncOutcome};
use crate::remote::RemoteClient;
use crate::retention::{self, RetentionOutcome};
use turnstile_core::AuditOp;
use turnstile_db::Database;

/// Wait before the first run after start, so a freshly booted service
/// settles before hitting every device at once.
pub const STARTUP_GRACE: Duration = Duration::from_secs(5);

// =============================================================================
// Status
// =============================================================================

/// Scheduler lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Stopped,
    Running,
}

/// Last-known scheduler status, the operator-facing indicator next to
/// the audit log.
#[derive(Debug, Clone)]
pub struct SchedulerStatus {
    pub state: SchedulerState,
    /// When the most recent run was dispatched.
    pub last_run: Option<DateTime<Utc>>,
    /// Projected time of the next run; `None` while stopped.
    pub next_run: Option<DateTime<Utc>>,
}

impl Default for SchedulerStatus {
    fn default() -> Self {
        SchedulerStatus {
            state: SchedulerState::Stopped,
            last_run: None,
            next_run: None,
        }
    }
}

/// Results of one serialized [`Scheduler::run_once`] cycle.
#[derive(Debug)]
pub struct RunReport {
    /// Per-machine fetch results, in machine order.
    pub fetches: Vec<(i64, SyncResult<FetchOutcome>)>,
    pub sync: SyncResult<SyncOutcome>,
    pub retention: SyncResult<RetentionOutcome>,
}

// =============================================================================
// Scheduler
// =============================================================================

/// The recurring run driver.
pub struct Scheduler {
    db: Database,
    device: Arc<dyn DeviceClient>,
    remote: Arc<dyn RemoteClient>,
    status: Arc<RwLock<SchedulerStatus>>,
    shutdown_tx: Option<mpsc::Sender<()>>,
}

impl Scheduler {
    pub fn new(db: Database, device: Arc<dyn DeviceClient>, remote: Arc<dyn RemoteClient>) -> Self {
        Scheduler {
            db,
            device,
            remote,
            status: Arc::new(RwLock::new(SchedulerStatus::default())),
            shutdown_tx: None,
        }
    }

    /// Returns the current status snapshot.
    pub async fn status(&self) -> SchedulerStatus {
        self.status.read().await.clone()
    }

    /// Transitions to Running and spawns the driver task. No-op if
    /// already running.
    pub async fn start(&mut self) {
        if self.shutdown_tx.is_some() {
            debug!("scheduler already running");
            return;
        }

        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        self.shutdown_tx = Some(shutdown_tx);

        let settings = self.db.settings().load().await.unwrap_or_default();
        {
            let mut status = self.status.write().await;
            status.state = SchedulerState::Running;
            status.next_run = Some(Utc::now() + settings.scheduler_period());
        }

        info!(
            period_minutes = settings.scheduler_delay_minutes,
            "scheduler started"
        );
        audit(&self.db, None, AuditOp::Scheduler, "scheduler started").await;

        tokio::spawn(driver(
            self.db.clone(),
            self.device.clone(),
            self.remote.clone(),
            self.status.clone(),
            shutdown_rx,
        ));
    }

    /// Signals the driver to exit at its next opportunity and clears the
    /// projected next run. No-op if already stopped. In-flight fetch and
    /// sync tasks are not cancelled.
    pub async fn stop(&mut self) {
        let Some(shutdown_tx) = self.shutdown_tx.take() else {
            debug!("scheduler already stopped");
            return;
        };

        let _ = shutdown_tx.send(()).await;

        {
            let mut status = self.status.write().await;
            status.state = SchedulerState::Stopped;
            status.next_run = None;
        }

        info!("scheduler stopped");
        audit(&self.db, None, AuditOp::Scheduler, "scheduler stopped").await;
    }

    /// Runs one full serialized cycle: await every machine's fetch, then
    /// one sync pass, then retention. Individual failures are captured
    /// in the report, not propagated.
    pub async fn run_once(&self) -> SyncResult<RunReport> {
        let settings = self.db.settings().load().await?;
        let machines = self.db.machines().all().await?;

        let fetch_results = join_all(machines.iter().map(|machine| async {
            (
                machine.id,
                fetch_machine(&self.db, self.device.as_ref(), machine, &settings).await,
            )
        }))
        .await;

        let sync = sync_all(&self.db, self.remote.as_ref(), &settings).await;
        let retention = retention::run(&self.db, &settings).await;

        Ok(RunReport {
            fetches: fetch_results,
            sync,
            retention,
        })
    }
}

// =============================================================================
// Driver
// =============================================================================

async fn driver(
    db: Database,
    device: Arc<dyn DeviceClient>,
    remote: Arc<dyn RemoteClient>,
    status: Arc<RwLock<SchedulerStatus>>,
    mut shutdown_rx: mpsc::Receiver<()>,
) {
    debug!("scheduler driver starting");

    tokio::select! {
        _ = shutdown_rx.recv() => {
            debug!("scheduler driver exiting before first run");
            return;
        }
        _ = tokio::time::sleep(STARTUP_GRACE) => {}
    }

    loop {
        dispatch_run(&db, &device, &remote, &status).await;

        // Period is re-read every cycle so a settings change applies
        // without a restart.
        let settings = db.settings().load().await.unwrap_or_default();
        let period = settings.scheduler_period();
        {
            let mut status = status.write().await;
            if status.state == SchedulerState::Running {
                status.next_run = Some(Utc::now() + period);
            }
        }

        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = tokio::time::sleep(period) => {}
        }
    }

    debug!("scheduler driver exited");
}

/// Dispatches one run: per-machine fetch tasks and the sync pass are
/// spawned detached (failures are audited inside them); only retention
/// is awaited here.
async fn dispatch_run(
    db: &Database,
    device: &Arc<dyn DeviceClient>,
    remote: &Arc<dyn RemoteClient>,
    status: &Arc<RwLock<SchedulerStatus>>,
) {
    let run_tag = Uuid::new_v4().simple().to_string()[..8].to_string();
    status.write().await.last_run = Some(Utc::now());

    audit(
        db,
        None,
        AuditOp::Scheduler,
        &format!("run {run_tag}: starting"),
    )
    .await;

    let settings = match db.settings().load().await {
        Ok(settings) => settings,
        Err(e) => {
            error!(run = %run_tag, error = %e, "could not load settings, skipping run");
            audit(db, None, AuditOp::Error, &format!("run {run_tag}: {e}")).await;
            return;
        }
    };

    let machines = match db.machines().all().await {
        Ok(machines) => machines,
        Err(e) => {
            error!(run = %run_tag, error = %e, "could not list machines, skipping run");
            audit(db, None, AuditOp::Error, &format!("run {run_tag}: {e}")).await;
            return;
        }
    };

    for machine in machines {
        let db = db.clone();
        let device = device.clone();
        let settings = settings.clone();
        let span = info_span!("fetch", run = %run_tag, machine = machine.id);
        tokio::spawn(
            async move {
                // Failures are audited inside; one machine never affects
                // another.
                let _ = fetch_machine(&db, device.as_ref(), &machine, &settings).await;
            }
            .instrument(span),
        );
    }

    {
        let db = db.clone();
        let remote = remote.clone();
        let settings = settings.clone();
        let span = info_span!("sync", run = %run_tag);
        tokio::spawn(
            async move {
                let _ = sync_all(&db, remote.as_ref(), &settings).await;
            }
            .instrument(span),
        );
    }

    if let Err(e) = retention::run(db, &settings).await {
        error!(run = %run_tag, error = %e, "retention sweep failed");
        audit(
            db,
            None,
            AuditOp::Error,
            &format!("run {run_tag}: retention failed: {e}"),
        )
        .await;
    }

    audit(
        db,
        None,
        AuditOp::Scheduler,
        &format!("run {run_tag}: finished"),
    )
    .await;
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockDevice, MockRemote};
    use turnstile_db::DbConfig;

    async fn scheduler() -> Scheduler {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        Scheduler::new(db, Arc::new(MockDevice::new()), Arc::new(MockRemote::new()))
    }

    #[tokio::test]
    async fn starts_and_stops_with_noop_repeats() {
        let mut scheduler = scheduler().await;
        assert_eq!(scheduler.status().await.state, SchedulerState::Stopped);

        scheduler.start().await;
        scheduler.start().await; // no-op
        let status = scheduler.status().await;
        assert_eq!(status.state, SchedulerState::Running);
        assert!(status.next_run.is_some());

        scheduler.stop().await;
        scheduler.stop().await; // no-op
        let status = scheduler.status().await;
        assert_eq!(status.state, SchedulerState::Stopped);
        assert!(status.next_run.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn driver_dispatches_after_grace_period() {
        let mut scheduler = scheduler().await;
        scheduler.start().await;
        assert!(scheduler.status().await.last_run.is_none());

        // Paused clock: this jumps past the 5s grace and lets the first
        // run dispatch.
        tokio::time::sleep(STARTUP_GRACE + Duration::from_secs(1)).await;

        assert!(scheduler.status().await.last_run.is_some());
        scheduler.stop().await;
    }
}
