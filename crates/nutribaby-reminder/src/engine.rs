//! Reminder scheduler: the periodic loop that drives dispatch ticks.
//!
//! At most one tick runs at a time. A tick that comes due while another is
//! still in flight is dropped, not queued. A failing or panicking tick is
//! logged and the loop keeps going.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use nutribaby_core::{Clock, NutriBabyError, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::dispatch::{Dispatcher, TickContext, TickReport};
use crate::ledger::AuthorizationLedger;

/// One tick: dispatch, then token maintenance.
pub struct TickRunner {
    dispatcher: Dispatcher,
    ledger: Arc<AuthorizationLedger>,
    clock: Arc<dyn Clock>,
    budget: Duration,
}

impl TickRunner {
    pub fn new(
        dispatcher: Dispatcher,
        ledger: Arc<AuthorizationLedger>,
        clock: Arc<dyn Clock>,
        budget: Duration,
    ) -> Self {
        Self {
            dispatcher,
            ledger,
            clock,
            budget,
        }
    }

    pub async fn tick(&self, cancel: CancellationToken) -> Result<TickReport> {
        let started = std::time::Instant::now();
        let now = self.clock.now();
        let ctx = TickContext::new(now, self.budget, cancel);

        let mut report = self.dispatcher.run(&ctx).await?;

        if !ctx.cancel.is_cancelled() {
            match self.ledger.sweep(now).await {
                Ok(sweep) => {
                    report.swept = sweep.expired;
                    report.purged = sweep.purged;
                }
                Err(e) => tracing::warn!("⚠️ Token sweep failed: {e}"),
            }
        }

        if report.candidates > 0 {
            tracing::info!(
                "🔔 Tick done in {}ms: {} due, {} sent, {} failed, {} without token, {} marked",
                started.elapsed().as_millis(),
                report.candidates,
                report.sent,
                report.failed,
                report.skipped_no_token,
                report.marked
            );
        } else {
            tracing::debug!("Tick done in {}ms: nothing due", started.elapsed().as_millis());
        }
        Ok(report)
    }
}

/// Tick counters since construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerStats {
    pub ticks_run: u64,
    pub ticks_failed: u64,
    pub ticks_dropped: u64,
}

#[derive(Default)]
struct Counters {
    run: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

struct LoopState {
    shutdown: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

/// Periodic driver around a [`TickRunner`].
pub struct ReminderScheduler {
    runner: Arc<TickRunner>,
    cadence: Duration,
    tick_lock: Arc<Mutex<()>>,
    counters: Arc<Counters>,
    state: std::sync::Mutex<LoopState>,
}

impl ReminderScheduler {
    pub fn new(runner: TickRunner, cadence: Duration) -> Self {
        Self {
            runner: Arc::new(runner),
            cadence,
            tick_lock: Arc::new(Mutex::new(())),
            counters: Arc::new(Counters::default()),
            state: std::sync::Mutex::new(LoopState {
                shutdown: CancellationToken::new(),
                handle: None,
            }),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, LoopState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn cadence(&self) -> Duration {
        self.cadence
    }

    pub fn is_running(&self) -> bool {
        self.state().handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            ticks_run: self.counters.run.load(Ordering::Relaxed),
            ticks_failed: self.counters.failed.load(Ordering::Relaxed),
            ticks_dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }

    /// Spawn the loop. The first tick fires immediately. No-op if running.
    pub fn start(&self) {
        let mut state = self.state();
        if state.handle.as_ref().is_some_and(|h| !h.is_finished()) {
            tracing::warn!("⚠️ Reminder scheduler already running");
            return;
        }
        let shutdown = CancellationToken::new();
        state.shutdown = shutdown.clone();
        state.handle = Some(tokio::spawn(run_loop(
            self.runner.clone(),
            self.tick_lock.clone(),
            self.counters.clone(),
            self.cadence,
            shutdown,
        )));
    }

    /// Run one tick now. `Ok(None)` if a tick is already in flight.
    pub async fn force_scan(&self) -> Result<Option<TickReport>> {
        let Ok(guard) = self.tick_lock.clone().try_lock_owned() else {
            tracing::info!("⏭️ Force scan skipped: a tick is already running");
            return Ok(None);
        };
        let cancel = {
            let state = self.state();
            if state.shutdown.is_cancelled() {
                CancellationToken::new()
            } else {
                state.shutdown.child_token()
            }
        };
        run_guarded(self.runner.clone(), guard, cancel, self.counters.clone())
            .await
            .map(Some)
    }

    /// Stop the loop, signal the in-flight tick, and wait up to `deadline`
    /// for it to finish. Returns whether it drained in time.
    pub async fn stop(&self, deadline: Duration) -> bool {
        let (shutdown, handle) = {
            let mut state = self.state();
            (state.shutdown.clone(), state.handle.take())
        };
        shutdown.cancel();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        match tokio::time::timeout(deadline, self.tick_lock.lock()).await {
            Ok(_guard) => {
                tracing::info!("⏹️ Reminder scheduler stopped");
                true
            }
            Err(_) => {
                tracing::warn!(
                    "⚠️ In-flight tick did not finish within {}s, abandoning it",
                    deadline.as_secs_f64()
                );
                false
            }
        }
    }
}

async fn run_loop(
    runner: Arc<TickRunner>,
    tick_lock: Arc<Mutex<()>>,
    counters: Arc<Counters>,
    cadence: Duration,
    shutdown: CancellationToken,
) {
    tracing::info!("⏰ Reminder scheduler started (every {}s)", cadence.as_secs());
    let mut interval = tokio::time::interval(cadence);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {
                match tick_lock.clone().try_lock_owned() {
                    Ok(guard) => {
                        let runner = runner.clone();
                        let counters = counters.clone();
                        let cancel = shutdown.child_token();
                        tokio::spawn(async move {
                            let _ = run_guarded(runner, guard, cancel, counters).await;
                        });
                    }
                    Err(_) => {
                        counters.dropped.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!("⏭️ Previous tick still running, dropping this one");
                    }
                }
            }
        }
    }
    tracing::debug!("Reminder scheduler loop exited");
}

/// Run a tick on its own task so a panic is contained. The guard is held
/// until the task ends, however it ends.
async fn run_guarded(
    runner: Arc<TickRunner>,
    guard: OwnedMutexGuard<()>,
    cancel: CancellationToken,
    counters: Arc<Counters>,
) -> Result<TickReport> {
    let task = tokio::spawn(async move {
        let _guard = guard;
        runner.tick(cancel).await
    });
    match task.await {
        Ok(Ok(report)) => {
            counters.run.fetch_add(1, Ordering::Relaxed);
            Ok(report)
        }
        Ok(Err(e)) => {
            counters.failed.fetch_add(1, Ordering::Relaxed);
            tracing::error!("❌ Tick failed: {e}");
            Err(e)
        }
        Err(join) => {
            counters.failed.fetch_add(1, Ordering::Relaxed);
            if join.is_panic() {
                tracing::error!("💥 Tick panicked; scheduler keeps running");
                Err(NutriBabyError::Internal("tick panicked".into()))
            } else {
                Err(NutriBabyError::Internal(format!("tick aborted: {join}")))
            }
        }
    }
}
