//! Watches the local capture path and repairs it by switching cameras.


use crate::context::SessionContext;
use crate::devices::{CameraSwitcher, SwitchTrigger};
use crate::error::{PeerlinkError, Result};
use crate::events::{EventBus, PeerlinkEvent};
use crate::media::{TrackObserver, TrackState};
use crate::peer::{PeerSession, ReplaceOutcome};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecoveryReason {
    /// No playback activity for longer than the freeze threshold
    Frozen,
    /// The local video track ended
    TrackFailed,
}

impl RecoveryReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecoveryReason::Frozen => "frozen",
            RecoveryReason::TrackFailed => "track_failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// New camera attached and the outbound track replaced
    Recovered,
    /// New camera attached; no connected peer to replace the track on yet
    Deferred,
}

#[derive(Debug, Clone, Copy)]
pub struct HealthState {
    pub last_activity: Instant,
    /// Consecutive recovery attempts, reset on success
    pub attempts: u32,
    pub monitoring: bool,
}

/// The single periodic check owned by a monitor
struct CheckTimer {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Detects a frozen or failed local camera and drives recovery through the
/// same switch path a manual toggle uses.
#[derive(Clone)]
pub struct HealthMonitor {
    inner: Arc<MonitorInner>,
}

struct MonitorInner {
    session: PeerSession,
    switcher: Arc<CameraSwitcher>,
    events: EventBus,
    check_interval: Duration,
    freeze_threshold: Duration,
    max_attempts: u32,
    state: Mutex<HealthState>,
    timer: Mutex<Option<CheckTimer>>,
    /// Bumped on every start and stop so a recovery can tell whether it was
    /// superseded while it ran
    epoch: AtomicU64,
}

impl HealthMonitor {
    pub fn new(ctx: &SessionContext, session: PeerSession, switcher: Arc<CameraSwitcher>) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                session,
                switcher,
                events: ctx.events.clone(),
                check_interval: ctx.config.health.check_interval(),
                freeze_threshold: ctx.config.health.freeze_threshold(),
                max_attempts: ctx.config.health.max_recovery_attempts,
                state: Mutex::new(HealthState {
                    last_activity: Instant::now(),
                    attempts: 0,
                    monitoring: false,
                }),
                timer: Mutex::new(None),
                epoch: AtomicU64::new(0),
            }),
        }
    }

    /// Start watching the session's local video track. Returns `false` when
    /// there is nothing to watch (no video, or the session is closed).
    /// Restarting replaces the previous check.
    pub async fn start(&self) -> bool {
        if self.inner.session.is_closed() {
            return false;
        }
        let Some(observer) = self.inner.session.local_video_observer().await else {
            debug!("No local video track, health monitoring not started");
            return false;
        };

        self.cancel_timer();
        let epoch = self.inner.epoch.fetch_add(1, Ordering::AcqRel) + 1;
        {
            let mut state = self.inner.state.lock();
            state.last_activity = Instant::now();
            state.monitoring = true;
        }

        let cancel = self.inner.session.closed_token().child_token();
        let task = tokio::spawn(self.clone().run_checks(observer, cancel.clone()));
        *self.inner.timer.lock() = Some(CheckTimer { cancel, task });

        info!(
            "Health monitoring started (check every {:?}, freeze after {:?}, epoch {})",
            self.inner.check_interval, self.inner.freeze_threshold, epoch
        );
        true
    }

    /// Cancel the periodic check and activity subscription. Idempotent.
    pub fn stop(&self) {
        self.inner.epoch.fetch_add(1, Ordering::AcqRel);
        let was_running = self.cancel_timer();
        self.inner.state.lock().monitoring = false;
        if was_running {
            debug!("Health monitoring stopped");
        }
    }

    /// Clear the attempt counter so automatic recovery is armed again
    pub fn reset(&self) {
        self.inner.state.lock().attempts = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.inner.state.lock().attempts
    }

    pub fn is_monitoring(&self) -> bool {
        self.inner.state.lock().monitoring
    }

    pub fn health_state(&self) -> HealthState {
        *self.inner.state.lock()
    }

    /// One bounded recovery attempt: switch to the next camera and resume
    /// monitoring. Once the attempt budget is spent this does nothing but
    /// report `RecoveryExhausted`; a failed attempt keeps its count and
    /// leaves monitoring stopped.
    pub async fn recover(&self, reason: RecoveryReason) -> Result<RecoveryOutcome> {
        let attempt = {
            let mut state = self.inner.state.lock();
            if state.attempts >= self.inner.max_attempts {
                None
            } else {
                state.attempts += 1;
                Some(state.attempts)
            }
        };

        let Some(attempt) = attempt else {
            let attempts = self.attempts();
            warn!(
                "Camera {} but recovery gave up after {} attempts",
                reason.as_str(),
                attempts
            );
            self.inner
                .events
                .publish(PeerlinkEvent::RecoveryExhausted { attempts });
            return Err(PeerlinkError::RecoveryExhausted { attempts });
        };

        info!(
            "Recovering camera ({}), attempt {}/{}",
            reason.as_str(),
            attempt,
            self.inner.max_attempts
        );
        self.inner
            .events
            .publish(PeerlinkEvent::RecoveryStarted { reason, attempt });

        self.stop();
        let epoch = self.inner.epoch.load(Ordering::Acquire);

        match self.inner.switcher.switch_to_next(SwitchTrigger::Recovery).await {
            Ok(outcome) => {
                self.reset();
                if self.inner.session.is_closed() {
                    return Ok(RecoveryOutcome::Recovered);
                }
                if self.inner.epoch.load(Ordering::Acquire) == epoch {
                    self.start().await;
                } else {
                    debug!("Monitoring was stopped during recovery, not restarting");
                }
                Ok(match outcome.replaced {
                    ReplaceOutcome::Replaced { .. } => RecoveryOutcome::Recovered,
                    ReplaceOutcome::NotConnected => RecoveryOutcome::Deferred,
                })
            }
            Err(e) => {
                warn!("Camera recovery attempt {} failed: {}", attempt, e);
                self.inner
                    .events
                    .publish(PeerlinkEvent::error("health_monitor", &e));
                Err(e)
            }
        }
    }

    fn cancel_timer(&self) -> bool {
        match self.inner.timer.lock().take() {
            Some(timer) => {
                timer.cancel.cancel();
                timer.task.abort();
                true
            }
            None => false,
        }
    }

    fn classify(&self, observer: &TrackObserver) -> Option<RecoveryReason> {
        let last_activity = self.inner.state.lock().last_activity;
        if last_activity.elapsed() > self.inner.freeze_threshold {
            Some(RecoveryReason::Frozen)
        } else if observer.state() == TrackState::Ended {
            Some(RecoveryReason::TrackFailed)
        } else {
            None
        }
    }

    /// Recovery replaces the running check, so it gets its own task
    fn spawn_recovery(&self, reason: RecoveryReason) {
        let monitor = self.clone();
        let recovery: BoxFuture<'static, ()> = Box::pin(async move {
            if let Err(e) = monitor.recover(reason).await {
                debug!("Automatic recovery ended without success: {}", e);
            }
        });
        tokio::spawn(recovery);
    }

    async fn run_checks(self, mut observer: TrackObserver, cancel: CancellationToken) {
        let period = self.inner.check_interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut activity_open = true;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                changed = observer.activity_changed(), if activity_open => match changed {
                    Ok(()) => self.inner.state.lock().last_activity = Instant::now(),
                    Err(_) => activity_open = false,
                },
                _ = ticker.tick() => {
                    if let Some(reason) = self.classify(&observer) {
                        warn!("Local camera looks {}", reason.as_str());
                        self.inner.state.lock().monitoring = false;
                        self.spawn_recovery(reason);
                        return;
                    }
                }
            }
        }
    }
}
