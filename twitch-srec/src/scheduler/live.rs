//! Live check: confirm a live notification and capture the stream.
//!
//! Per notification the check polls the directory until the channel shows
//! up as live, then hands it to the capture launcher. Both steps are
//! bounded: `max_offline_polls` polls that do not show the channel live,
//! `max_capture_attempts` failed launches. Whatever the exit, the check
//! ends with [`Supervisor::connect_or_retire`].

use std::fmt;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{ConnectReason, Supervisor};
use crate::Error;
use crate::capture::CaptureOutcome;
use crate::config::LiveTriggerPolicy;
use crate::domain::{LiveState, Resolution};

/// The event that started a live check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveTrigger {
    StreamUp,
    Viewcount,
}

impl LiveTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StreamUp => "stream-up",
            Self::Viewcount => "viewcount",
        }
    }

    /// Wait before the first poll.
    pub fn delay(&self, policy: &LiveTriggerPolicy) -> Duration {
        match self {
            Self::StreamUp => policy.stream_up_delay,
            Self::Viewcount => policy.viewcount_delay,
        }
    }
}

impl fmt::Display for LiveTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returns `false` if cancelled first.
async fn sleep_or_cancel(cancel: &CancellationToken, duration: Duration) -> bool {
    if duration.is_zero() {
        return !cancel.is_cancelled();
    }
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

pub(crate) async fn run_live_check(
    supervisor: Supervisor,
    channel_id: String,
    login: String,
    trigger: LiveTrigger,
) {
    let ctx = supervisor.context().clone();
    let policy = &ctx.live;
    let log = ctx.logs.channel(&login);

    debug!(channel_id = %channel_id, login = %login, %trigger, "Live check started");
    if !sleep_or_cancel(&ctx.cancel, trigger.delay(policy)).await {
        return;
    }

    let mut offline_polls = 0u32;
    let mut capture_failures = 0u32;

    let reason = loop {
        if ctx.cancel.is_cancelled() {
            return;
        }

        let polled = match ctx.directory.resolve(&login).await {
            Ok(Resolution::Found(info)) if info.is_live => Ok(info),
            Ok(Resolution::Found(_)) => {
                ctx.registry.set_live_state(&channel_id, LiveState::Offline);
                Err(Error::TransientOffline {
                    login: login.clone(),
                })
            }
            Ok(Resolution::NotFound) => Err(Error::not_found(login.as_str())),
            Err(e) => Err(e),
        };

        let info = match polled {
            Ok(info) => info,
            Err(e) => {
                offline_polls += 1;
                match &e {
                    Error::TransientOffline { .. } => {
                        log.info(&format!(
                            "{login} is Not live! ({offline_polls}/{})",
                            policy.max_offline_polls
                        ))
                        .await;
                    }
                    Error::NotFound { .. } => {
                        log.warn(&format!("{e} ({offline_polls}/{})", policy.max_offline_polls))
                            .await;
                    }
                    _ => {
                        log.warn(&format!("Error! live check of {login}: {e}")).await;
                        ctx.logs
                            .common_error(&format!("live check of {login}"), &e)
                            .await;
                    }
                }
                if offline_polls >= policy.max_offline_polls {
                    break ConnectReason::LiveCheckFinished;
                }
                if !sleep_or_cancel(&ctx.cancel, policy.offline_poll_backoff).await {
                    return;
                }
                continue;
            }
        };

        ctx.registry.set_live_state(&channel_id, LiveState::Live);
        let on_spawned = {
            let supervisor = supervisor.clone();
            let channel_id = channel_id.clone();
            move || supervisor.schedule_connect(&channel_id, ConnectReason::CaptureStarted)
        };

        match ctx.launcher.capture(&info, &ctx.cancel, on_spawned).await {
            Ok(CaptureOutcome::Finished(_)) => break ConnectReason::CaptureFinished,
            Ok(CaptureOutcome::AlreadyCapturing) => {
                log.info(&format!("{login} is already being captured")).await;
                break ConnectReason::LiveCheckFinished;
            }
            Ok(CaptureOutcome::Interrupted) => return,
            Err(e) => {
                capture_failures += 1;
                log.warn(&format!(
                    "{login} download Fail! ({capture_failures}/{}) {e}",
                    policy.max_capture_attempts
                ))
                .await;
                if capture_failures >= policy.max_capture_attempts || !e.is_retryable() {
                    break ConnectReason::LiveCheckFinished;
                }
                if !sleep_or_cancel(&ctx.cancel, policy.offline_poll_backoff).await {
                    return;
                }
            }
        }
    };

    supervisor.connect_or_retire(&channel_id, reason).await;
}
