//! Task supervision.
//!
//! The `Supervisor` is responsible for:
//! - starting subscriptions on their own tasks, rate limited per channel
//! - deciding whether a closed subscription reconnects or the channel retires
//! - running live checks (and the captures they start) off the receive path
//! - waiting for every task on shutdown

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use super::live::{LiveTrigger, run_live_check};
use super::reconnect::{ReconnectStats, ReconnectTracker, ReconnectTrackerConfig};
use super::registry::{Disposition, RetireOutcome};
use super::WatchContext;
use crate::domain::LiveState;
use crate::pubsub::{SubscriptionOutcome, Subscriber};

/// Why a connect was requested. Only used for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectReason {
    /// The channel was just added to the watch list.
    Initial,
    /// The previous connection closed.
    Reconnect,
    /// A capture started and the channel must keep being monitored.
    CaptureStarted,
    /// A capture ended.
    CaptureFinished,
    /// A live check gave up without capturing.
    LiveCheckFinished,
}

impl ConnectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::Reconnect => "reconnect",
            Self::CaptureStarted => "capture started",
            Self::CaptureFinished => "capture finished",
            Self::LiveCheckFinished => "live check finished",
        }
    }
}

impl fmt::Display for ConnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Default)]
struct Counters {
    connects_scheduled: AtomicU64,
    subscriptions_opened: AtomicU64,
    live_checks: AtomicU64,
    channels_retired: AtomicU64,
}

/// Snapshot of supervisor activity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorStats {
    pub connects_scheduled: u64,
    pub subscriptions_opened: u64,
    pub live_checks: u64,
    pub channels_retired: u64,
    pub active_tasks: usize,
    pub reconnect: ReconnectStats,
}

struct Inner {
    ctx: WatchContext,
    tracker: Mutex<ReconnectTracker>,
    /// Channels with a connect waiting out its backoff.
    pending: Mutex<HashSet<String>>,
    tasks: TaskTracker,
    counters: Counters,
}

/// Cheap to clone; all clones drive the same set of tasks.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

impl Supervisor {
    pub fn new(ctx: WatchContext, reconnect: ReconnectTrackerConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                ctx,
                tracker: Mutex::new(ReconnectTracker::with_config(reconnect)),
                pending: Mutex::new(HashSet::new()),
                tasks: TaskTracker::new(),
                counters: Counters::default(),
            }),
        }
    }

    pub fn context(&self) -> &WatchContext {
        &self.inner.ctx
    }

    /// Open (or replace) the subscription of `channel_id` on a new task.
    ///
    /// Requests for a channel that already has a connect waiting out its
    /// backoff are merged into that one.
    pub fn schedule_connect(&self, channel_id: &str, reason: ConnectReason) {
        if self.inner.ctx.cancel.is_cancelled() {
            return;
        }
        if !self.inner.pending.lock().insert(channel_id.to_string()) {
            debug!(channel_id, %reason, "Connect already pending");
            return;
        }

        let delay = self.inner.tracker.lock().record_attempt(channel_id);
        self.inner
            .counters
            .connects_scheduled
            .fetch_add(1, Ordering::Relaxed);
        debug!(channel_id, %reason, ?delay, "Connect scheduled");

        let this = self.clone();
        let channel_id = channel_id.to_string();
        self.inner.tasks.spawn(async move {
            if !delay.is_zero() {
                tokio::select! {
                    _ = this.inner.ctx.cancel.cancelled() => {
                        this.inner.pending.lock().remove(&channel_id);
                        return;
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            this.inner.pending.lock().remove(&channel_id);
            this.run_subscription(&channel_id).await;
        });
    }

    async fn run_subscription(&self, channel_id: &str) {
        let ctx = &self.inner.ctx;
        match ctx.registry.disposition(channel_id) {
            Disposition::Unknown => {
                debug!(channel_id, "Channel retired before connecting");
                return;
            }
            Disposition::Idle => {
                self.retire(channel_id).await;
                return;
            }
            Disposition::Watched | Disposition::CapturingOnly => {}
        }

        let mut lease = ctx.registry.claim_subscription(channel_id, &ctx.cancel);
        lease.wait_for_previous().await;
        if lease.is_cancelled() {
            debug!(channel_id, "Subscription superseded before opening");
            return;
        }
        let Some(login) = ctx.registry.login_for(channel_id) else {
            return;
        };

        self.inner
            .counters
            .subscriptions_opened
            .fetch_add(1, Ordering::Relaxed);
        let outcome = Subscriber::new(self.clone(), channel_id, &login, lease)
            .run()
            .await;
        debug!(channel_id, login = %login, ?outcome, "Subscription ended");

        if let SubscriptionOutcome::Closed(_) = outcome {
            self.connect_or_retire(channel_id, ConnectReason::Reconnect)
                .await;
        }
    }

    /// Keep monitoring a channel if anything still needs it, else retire it.
    ///
    /// - watched: connect
    /// - unwatched but capturing: connect unless a subscription is active
    /// - unwatched and idle: retire, unless a subscription is active and the
    ///   stream has not gone down yet; its stream-down handling then finishes
    ///   the cleanup
    pub async fn connect_or_retire(&self, channel_id: &str, reason: ConnectReason) {
        let ctx = &self.inner.ctx;
        let login = ctx.registry.login_for(channel_id);
        let log = login.as_deref().map(|login| ctx.logs.channel(login));

        match ctx.registry.disposition(channel_id) {
            Disposition::Watched => {
                if let Some(log) = &log {
                    match reason {
                        ConnectReason::Reconnect => log.info("Close! Reconnect...").await,
                        other => log.info(&format!("Reconnect ({other})")).await,
                    }
                }
                self.schedule_connect(channel_id, reason);
            }
            Disposition::CapturingOnly => {
                if !ctx.registry.has_subscription(channel_id) {
                    if let Some(log) = &log {
                        log.info("Close! Reconnect while capturing...").await;
                    }
                    self.schedule_connect(channel_id, reason);
                }
            }
            Disposition::Idle => {
                // A subscription that already saw stream-down will not see another.
                let stream_over = ctx.registry.live_state(channel_id) == Some(LiveState::Offline);
                if ctx.registry.has_subscription(channel_id) && !stream_over {
                    debug!(channel_id, "Leaving cleanup to the active subscription");
                    return;
                }
                if let (Some(log), Some(login)) = (&log, &login) {
                    log.info(&format!("Close! And {login} is no Reconnect"))
                        .await;
                }
                self.retire(channel_id).await;
            }
            Disposition::Unknown => {}
        }
    }

    /// Forget a channel that is no longer watched and not capturing.
    ///
    /// Returns `false` if the channel is unknown or still capturing.
    pub async fn retire(&self, channel_id: &str) -> bool {
        let ctx = &self.inner.ctx;
        let login = ctx.registry.login_for(channel_id);
        match ctx.registry.retire(channel_id) {
            RetireOutcome::Retired => {
                self.inner.tracker.lock().forget(channel_id);
                self.inner
                    .counters
                    .channels_retired
                    .fetch_add(1, Ordering::Relaxed);
                let login = login.unwrap_or_else(|| channel_id.to_string());
                info!(channel_id, login = %login, "Channel retired");
                ctx.logs
                    .common(&format!("{login} is Delete Download List!"))
                    .await;
                true
            }
            RetireOutcome::Capturing => {
                debug!(channel_id, "Retire deferred until the capture ends");
                false
            }
            RetireOutcome::Unknown => false,
        }
    }

    /// Check the live status of a channel and capture it, on a new task.
    pub fn spawn_live_check(&self, channel_id: &str, login: &str, trigger: LiveTrigger) {
        self.inner.counters.live_checks.fetch_add(1, Ordering::Relaxed);
        self.inner.tasks.spawn(run_live_check(
            self.clone(),
            channel_id.to_string(),
            login.to_string(),
            trigger,
        ));
    }

    pub fn stats(&self) -> SupervisorStats {
        let counters = &self.inner.counters;
        SupervisorStats {
            connects_scheduled: counters.connects_scheduled.load(Ordering::Relaxed),
            subscriptions_opened: counters.subscriptions_opened.load(Ordering::Relaxed),
            live_checks: counters.live_checks.load(Ordering::Relaxed),
            channels_retired: counters.channels_retired.load(Ordering::Relaxed),
            active_tasks: self.inner.tasks.len(),
            reconnect: self.inner.tracker.lock().stats(),
        }
    }

    /// Cancel every task and wait for them, at most `timeout`.
    ///
    /// Returns `false` if some task was still running at the deadline.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.inner.ctx.cancel.cancel();
        self.inner.tasks.close();
        match tokio::time::timeout(timeout, self.inner.tasks.wait()).await {
            Ok(()) => {
                info!("All watch tasks stopped");
                true
            }
            Err(_) => {
                warn!(
                    remaining = self.inner.tasks.len(),
                    "Watch tasks still running at shutdown deadline"
                );
                false
            }
        }
    }
}
