//! Stream Supervisor (C8) — the core.
//!
//! A per-device state machine that owns the lock, launches the encoder,
//! observes exit, applies the restart policy, and drives cooperative
//! shutdown (spec.md §4.8). State is a closed tagged enumeration; the
//! transition function is total and rejects anything not in the table
//! below (spec.md §9) — there is no ad-hoc read-then-mutate path.

use std::path::PathBuf;
use std::time::{Duration, Instant, SystemTime};

use tokio::sync::RwLock;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::backoff::Backoff;
use crate::error::{LaunchError, SupervisorError};
use crate::launcher::{forward_stderr_to_log, Launcher, StreamParams};
use crate::lock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SupervisorState {
    Idle,
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed,
}

/// The total transition function from spec.md §4.8. Any `(from, to)` pair
/// not in this table is rejected.
pub fn transition(
    from: SupervisorState,
    to: SupervisorState,
) -> Result<SupervisorState, SupervisorError> {
    use SupervisorState::*;
    let allowed = matches!(
        (from, to),
        (Idle, Starting)
            | (Starting, Running)
            | (Starting, Failed)
            | (Starting, Stopped)
            | (Running, Stopping)
            | (Running, Failed)
            | (Stopping, Stopped)
            | (Failed, Starting)
            | (Failed, Stopped)
    );
    if allowed {
        Ok(to)
    } else {
        Err(SupervisorError::InvalidTransition {
            from: format!("{from:?}"),
            to: format!("{to:?}"),
        })
    }
}

/// `{ deviceName, state, startTime, uptime, attempts, lastError }`
/// (spec.md §3). Single-writer (the owning Supervisor), multi-reader (the
/// Status Reporter and any other observer); readers tolerate stale or torn
/// reads of independent fields but never an earlier value after a later
/// one has been observed, since every field is updated under one write
/// lock per transition.
#[derive(Debug, Clone)]
pub struct Metrics {
    pub device_name: String,
    pub state: SupervisorState,
    pub start_time: Option<SystemTime>,
    pub attempts: u32,
    pub last_error: Option<String>,
}

impl Metrics {
    fn new(device_name: String) -> Self {
        Self {
            device_name,
            state: SupervisorState::Idle,
            start_time: None,
            attempts: 0,
            last_error: None,
        }
    }
}

pub type SharedMetrics = std::sync::Arc<RwLock<Metrics>>;

/// Resolved, per-supervisor operating parameters — immutable for the
/// lifetime of the Supervisor (spec.md §3 `StreamConfig`).
pub struct StreamConfig {
    pub sanitized_name: String,
    pub lock_dir: PathBuf,
    pub encoder_path: PathBuf,
    pub params: StreamParams,
    pub stop_timeout: Duration,
    pub success_threshold: Duration,
}

pub enum RunOutcome {
    /// Cooperative cancellation drove the exit. Not an error (spec.md §7).
    Cancelled,
    /// The Supervisor reached a terminal `Stopped` state carrying an error
    /// (lock contention at start, or attempts exhausted).
    Error(SupervisorError),
}

pub struct Supervisor {
    config: StreamConfig,
    pid: i32,
    state: SupervisorState,
    backoff: Backoff,
    metrics: SharedMetrics,
    cancel: CancellationToken,
    launcher: Launcher,
}

impl Supervisor {
    pub fn new(config: StreamConfig, backoff: Backoff, cancel: CancellationToken) -> Self {
        let metrics = std::sync::Arc::new(RwLock::new(Metrics::new(config.sanitized_name.clone())));
        let launcher = Launcher::new(config.encoder_path.clone());
        Self {
            config,
            pid: std::process::id() as i32,
            state: SupervisorState::Idle,
            backoff,
            metrics,
            cancel,
            launcher,
        }
    }

    pub fn metrics(&self) -> SharedMetrics {
        self.metrics.clone()
    }

    fn lock_path(&self) -> PathBuf {
        lock::lock_path(&self.config.lock_dir, &self.config.sanitized_name)
    }

    async fn enter(&mut self, to: SupervisorState) -> Result<(), SupervisorError> {
        self.state = transition(self.state, to)?;
        let mut m = self.metrics.write().await;
        m.state = self.state;
        Ok(())
    }

    async fn record_attempt(&self, attempts: u32, last_error: Option<String>) {
        let mut m = self.metrics.write().await;
        m.attempts = attempts;
        m.last_error = last_error;
    }

    /// Drives this device's whole lifecycle until a terminal outcome.
    /// Cooperative cancellation is arbitrated ahead of child-exit whenever
    /// both are ready (spec.md §4.8 step 3, §5).
    pub async fn run(mut self) -> RunOutcome {
        if self.enter(SupervisorState::Starting).await.is_err() {
            return RunOutcome::Error(SupervisorError::InvalidTransition {
                from: "Idle".into(),
                to: "Starting".into(),
            });
        }

        let path = self.lock_path();
        if let Err(e) = lock::acquire(&path, &self.config.sanitized_name, self.pid) {
            // Lock was never ours: terminate without touching the file.
            let _ = self.enter(SupervisorState::Failed).await;
            let _ = self.enter(SupervisorState::Stopped).await;
            return RunOutcome::Error(SupervisorError::Lock(e));
        }

        let outcome = self.drive_loop().await;
        outcome
    }

    async fn drive_loop(mut self) -> RunOutcome {
        loop {
            if self.cancel.is_cancelled() {
                let _ = self.enter(SupervisorState::Stopped).await;
                let _ = lock::release(&self.lock_path());
                return RunOutcome::Cancelled;
            }

            match self.launcher.spawn(&self.config.params) {
                Ok(mut child) => {
                    if self.enter(SupervisorState::Running).await.is_err() {
                        let _ = lock::release(&self.lock_path());
                        return RunOutcome::Error(SupervisorError::InvalidTransition {
                            from: "Starting".into(),
                            to: "Running".into(),
                        });
                    }
                    {
                        let mut m = self.metrics.write().await;
                        m.start_time = Some(SystemTime::now());
                    }
                    let run_started = Instant::now();
                    if let Some(stderr) = child.stderr.take() {
                        let sanitized = self.config.sanitized_name.clone();
                        tokio::spawn(forward_stderr_to_log(stderr, sanitized));
                    }

                    match self.await_run(&mut child, run_started).await {
                        AwaitResult::Cancelled => {
                            let outcome = self.graceful_stop(child).await;
                            return outcome;
                        }
                        AwaitResult::Exited(duration) => {
                            match self.handle_exit(duration).await {
                                ExitDecision::Restart => continue,
                                ExitDecision::Stop(outcome) => return outcome,
                            }
                        }
                    }
                }
                Err(e) => match self.handle_spawn_failure(e).await {
                    ExitDecision::Restart => continue,
                    ExitDecision::Stop(outcome) => return outcome,
                },
            }
        }
    }

    async fn await_run(&mut self, child: &mut tokio::process::Child, started: Instant) -> AwaitResult {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => AwaitResult::Cancelled,
            _ = child.wait() => AwaitResult::Exited(started.elapsed()),
        }
    }

    /// Running -> Stopping -> Stopped, with a bounded graceful-termination
    /// window before a hard kill (spec.md §4.8 step 4).
    async fn graceful_stop(&mut self, mut child: tokio::process::Child) -> RunOutcome {
        if self.enter(SupervisorState::Stopping).await.is_err() {
            let _ = lock::release(&self.lock_path());
            return RunOutcome::Cancelled;
        }

        send_terminate(&child);
        if timeout(self.config.stop_timeout, child.wait()).await.is_err() {
            send_kill(&child);
            let _ = child.wait().await;
        }

        let _ = self.enter(SupervisorState::Stopped).await;
        let _ = lock::release(&self.lock_path());
        RunOutcome::Cancelled
    }

    async fn handle_exit(&mut self, duration: Duration) -> ExitDecision {
        if self.enter(SupervisorState::Failed).await.is_err() {
            let _ = lock::release(&self.lock_path());
            return ExitDecision::Stop(RunOutcome::Error(SupervisorError::InvalidTransition {
                from: "Running".into(),
                to: "Failed".into(),
            }));
        }

        if duration >= self.config.success_threshold {
            self.backoff.reset();
        }
        self.settle_after_failure(Some("encoder exited".to_string()))
            .await
    }

    async fn handle_spawn_failure(&mut self, e: LaunchError) -> ExitDecision {
        if self.enter(SupervisorState::Failed).await.is_err() {
            let _ = lock::release(&self.lock_path());
            return ExitDecision::Stop(RunOutcome::Error(SupervisorError::InvalidTransition {
                from: "Starting".into(),
                to: "Failed".into(),
            }));
        }
        self.settle_after_failure(Some(e.to_string())).await
    }

    /// Shared tail of both failure paths. The backoff delay for this
    /// attempt is always taken first (`Backoff::next` both computes it and
    /// advances the attempt counter); only once that sleep has run its
    /// course do we ask whether attempts remain. That ordering is what
    /// makes the attempt count and the cumulative elapsed backoff agree:
    /// the Nth failure still pays its own delay even when it is the one
    /// that turns out to be the last.
    async fn settle_after_failure(&mut self, last_error: Option<String>) -> ExitDecision {
        let delay = self.backoff.next();
        self.record_attempt(self.backoff.attempt(), last_error).await;

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                let _ = self.enter(SupervisorState::Stopped).await;
                let _ = lock::release(&self.lock_path());
                ExitDecision::Stop(RunOutcome::Cancelled)
            }
            _ = tokio::time::sleep(delay) => {
                if self.backoff.exhausted() {
                    let _ = self.enter(SupervisorState::Stopped).await;
                    let _ = lock::release(&self.lock_path());
                    return ExitDecision::Stop(RunOutcome::Error(SupervisorError::Exhausted {
                        attempts: self.backoff.attempt(),
                    }));
                }
                match self.enter(SupervisorState::Starting).await {
                    Ok(()) => ExitDecision::Restart,
                    Err(e) => {
                        let _ = lock::release(&self.lock_path());
                        ExitDecision::Stop(RunOutcome::Error(e))
                    }
                }
            }
        }
    }
}

enum AwaitResult {
    Cancelled,
    Exited(Duration),
}

enum ExitDecision {
    Restart,
    Stop(RunOutcome),
}

#[cfg(unix)]
fn send_terminate(child: &tokio::process::Child) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;
    if let Some(pid) = child.id() {
        let _ = killpg(Pid::from_raw(pid as i32), Signal::SIGTERM);
    }
}

#[cfg(unix)]
fn send_kill(child: &tokio::process::Child) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;
    if let Some(pid) = child.id() {
        let _ = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL);
    }
}

#[cfg(not(unix))]
fn send_terminate(_child: &tokio::process::Child) {}
#[cfg(not(unix))]
fn send_kill(_child: &tokio::process::Child) {}
