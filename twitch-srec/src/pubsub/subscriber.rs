//! One PubSub subscription.
//!
//! States: `Connecting → Open → Subscribed → Closed`. A subscription never
//! reconnects by itself; it reports a [`SubscriptionOutcome`] and the
//! supervisor decides what comes next.

use std::fmt;

use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, trace};

use super::protocol::{
    Inbound, ListenRequest, PING, PlaybackKind, channel_id_from_topic, parse_inbound,
};
use super::transport::PubSubConnection;
use crate::Result;
use crate::domain::LiveState;
use crate::logging::ChannelLog;
use crate::scheduler::{LiveTrigger, SubscriptionLease, Supervisor, WatchContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Connecting,
    Open,
    Subscribed,
    Closed,
}

/// Why a connection closed on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    ConnectFailed(String),
    Transport(String),
    /// The server closed the socket.
    RemoteClosed,
    /// The server asked clients to reconnect.
    ServerReconnect,
    ListenRejected(String),
    HeartbeatTimeout,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectFailed(e) => write!(f, "connect failed: {e}"),
            Self::Transport(e) => write!(f, "transport error: {e}"),
            Self::RemoteClosed => f.write_str("closed by server"),
            Self::ServerReconnect => f.write_str("server requested reconnect"),
            Self::ListenRejected(e) => write!(f, "LISTEN rejected: {e}"),
            Self::HeartbeatTimeout => f.write_str("no PONG received"),
        }
    }
}

/// How a subscription ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionOutcome {
    /// Closed without anyone asking; the supervisor decides on a reconnect.
    Closed(CloseReason),
    /// A newer subscription for the channel took over.
    Superseded,
    Shutdown,
    /// Closed to start a live check, which owns the follow-up.
    LiveHandoff(LiveTrigger),
    /// The channel was retired.
    Retired,
}

enum Step {
    Continue,
    Pong,
    Finish(SubscriptionOutcome),
}

enum Wake {
    Cancelled,
    Heartbeat,
    PongOverdue,
    Frame(Option<Result<String>>),
}

async fn until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

pub struct Subscriber {
    supervisor: Supervisor,
    ctx: WatchContext,
    channel_id: String,
    login: String,
    lease: SubscriptionLease,
    log: ChannelLog,
    state: SubscriptionState,
    nonce: Option<String>,
}

impl Subscriber {
    pub fn new(
        supervisor: Supervisor,
        channel_id: &str,
        login: &str,
        lease: SubscriptionLease,
    ) -> Self {
        let ctx = supervisor.context().clone();
        let log = ctx.logs.channel(login);
        Self {
            supervisor,
            ctx,
            channel_id: channel_id.to_string(),
            login: login.to_string(),
            lease,
            log,
            state: SubscriptionState::Connecting,
            nonce: None,
        }
    }

    pub fn state(&self) -> SubscriptionState {
        self.state
    }

    pub async fn run(mut self) -> SubscriptionOutcome {
        let connected = tokio::select! {
            _ = self.lease.cancelled() => None,
            result = self.ctx.connector.connect() => Some(result),
        };
        let mut conn = match connected {
            None => return self.cancelled_outcome(),
            Some(Ok(conn)) => conn,
            Some(Err(e)) => {
                self.log.warn(&format!("Websocket Error! {e}")).await;
                return SubscriptionOutcome::Closed(CloseReason::ConnectFailed(e.to_string()));
            }
        };

        self.state = SubscriptionState::Open;
        self.log
            .info(&format!("ID:{} Connect Success!", self.channel_id))
            .await;

        let outcome = self.drive(conn.as_mut()).await;
        conn.close().await;
        self.state = SubscriptionState::Closed;
        if let SubscriptionOutcome::Closed(reason) = &outcome {
            debug!(channel_id = %self.channel_id, %reason, "PubSub connection closed");
        }
        outcome
    }

    fn cancelled_outcome(&self) -> SubscriptionOutcome {
        if self.ctx.cancel.is_cancelled() {
            SubscriptionOutcome::Shutdown
        } else if self.ctx.registry.login_for(&self.channel_id).is_none() {
            SubscriptionOutcome::Retired
        } else {
            SubscriptionOutcome::Superseded
        }
    }

    async fn drive(&mut self, conn: &mut dyn PubSubConnection) -> SubscriptionOutcome {
        let request = ListenRequest::new(
            vec![self.ctx.pubsub.topic_for(&self.channel_id)],
            self.ctx.pubsub.auth_token.clone(),
        );
        let sent = match request.to_json() {
            Ok(json) => conn.send_text(json).await,
            Err(e) => Err(e),
        };
        if let Err(e) = sent {
            self.log.warn(&format!("Websocket Error! {e}")).await;
            return SubscriptionOutcome::Closed(CloseReason::Transport(e.to_string()));
        }
        self.log
            .info(&format!("Send! {}", request.describe()))
            .await;
        self.nonce = Some(request.nonce().to_string());

        let interval = self.ctx.pubsub.heartbeat_interval;
        let mut heartbeat = tokio::time::interval_at(Instant::now() + interval, interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut pong_deadline: Option<Instant> = None;

        loop {
            let wake = tokio::select! {
                biased;
                _ = self.lease.cancelled() => Wake::Cancelled,
                _ = until(pong_deadline) => Wake::PongOverdue,
                _ = heartbeat.tick() => Wake::Heartbeat,
                frame = conn.recv_text() => Wake::Frame(frame),
            };

            match wake {
                Wake::Cancelled => return self.cancelled_outcome(),
                Wake::Heartbeat => {
                    if let Err(e) = conn.send_text(PING.to_string()).await {
                        self.log.warn(&format!("Websocket Error! {e}")).await;
                        return SubscriptionOutcome::Closed(CloseReason::Transport(e.to_string()));
                    }
                    trace!(channel_id = %self.channel_id, "PING sent");
                    pong_deadline.get_or_insert(Instant::now() + self.ctx.pubsub.pong_timeout);
                }
                Wake::PongOverdue => {
                    self.log
                        .warn(&format!(
                            "Websocket Error! no PONG within {:?}",
                            self.ctx.pubsub.pong_timeout
                        ))
                        .await;
                    return SubscriptionOutcome::Closed(CloseReason::HeartbeatTimeout);
                }
                Wake::Frame(None) => {
                    self.log.info("Close! connection closed by server").await;
                    return SubscriptionOutcome::Closed(CloseReason::RemoteClosed);
                }
                Wake::Frame(Some(Err(e))) => {
                    self.log.warn(&format!("Websocket Error! {e}")).await;
                    return SubscriptionOutcome::Closed(CloseReason::Transport(e.to_string()));
                }
                Wake::Frame(Some(Ok(text))) => {
                    self.log.raw(&text).await;
                    match self.handle_frame(&text).await {
                        Ok(Step::Continue) => {}
                        Ok(Step::Pong) => pong_deadline = None,
                        Ok(Step::Finish(outcome)) => return outcome,
                        // A bad frame is dropped; the connection stays up.
                        Err(e) => self.log.warn(&format!("Error! {e}")).await,
                    }
                }
            }
        }
    }

    async fn handle_frame(&mut self, text: &str) -> Result<Step> {
        match parse_inbound(text)? {
            Inbound::Pong => Ok(Step::Pong),
            Inbound::Reconnect => {
                self.log.info("Server requested reconnect").await;
                Ok(Step::Finish(SubscriptionOutcome::Closed(
                    CloseReason::ServerReconnect,
                )))
            }
            Inbound::Response { nonce, error } => {
                if nonce.is_some() && nonce != self.nonce {
                    debug!(channel_id = %self.channel_id, ?nonce, "Response to unknown nonce");
                    return Ok(Step::Continue);
                }
                if error.is_empty() {
                    self.state = SubscriptionState::Subscribed;
                    self.log
                        .info(&format!("ID:{} LISTEN OK", self.channel_id))
                        .await;
                    Ok(Step::Continue)
                } else {
                    self.log
                        .warn(&format!("LISTEN rejected: {error}"))
                        .await;
                    Ok(Step::Finish(SubscriptionOutcome::Closed(
                        CloseReason::ListenRejected(error),
                    )))
                }
            }
            Inbound::Message { topic, event } => {
                if channel_id_from_topic(&topic) != Some(self.channel_id.as_str()) {
                    self.log
                        .warn(&format!("message for foreign topic {topic} ignored"))
                        .await;
                    return Ok(Step::Continue);
                }
                match event.kind {
                    PlaybackKind::StreamDown => Ok(self.on_stream_down().await),
                    PlaybackKind::StreamUp => Ok(self.on_live(LiveTrigger::StreamUp).await),
                    PlaybackKind::Viewcount => Ok(self.on_live(LiveTrigger::Viewcount).await),
                    PlaybackKind::Other(kind) => {
                        trace!(channel_id = %self.channel_id, kind = %kind, "Playback event ignored");
                        Ok(Step::Continue)
                    }
                }
            }
            Inbound::Other(kind) => {
                debug!(channel_id = %self.channel_id, kind = %kind, "Frame ignored");
                Ok(Step::Continue)
            }
        }
    }

    /// A running capture ends on its own; unwatched channels are retired.
    async fn on_stream_down(&mut self) -> Step {
        let registry = &self.ctx.registry;
        registry.set_live_state(&self.channel_id, LiveState::Offline);

        if registry.mark_stream_ended(&self.login) {
            self.log
                .info(&format!("{} stream down, capture still running", self.login))
                .await;
        } else {
            self.log
                .info(&format!("{} stream down", self.login))
                .await;
        }

        if registry.is_watched(&self.login) {
            return Step::Continue;
        }
        if self.supervisor.retire(&self.channel_id).await {
            Step::Finish(SubscriptionOutcome::Retired)
        } else {
            Step::Continue
        }
    }

    /// Close and hand the channel to a live check, unless it is already
    /// being captured.
    async fn on_live(&mut self, trigger: LiveTrigger) -> Step {
        if self.ctx.registry.is_capturing(&self.login) {
            trace!(login = %self.login, %trigger, "Already capturing");
            return Step::Continue;
        }

        if !self.ctx.registry.is_watched(&self.login) {
            if self.supervisor.retire(&self.channel_id).await {
                return Step::Finish(SubscriptionOutcome::Retired);
            }
            return Step::Continue;
        }

        self.log
            .info(&format!("{} {trigger}! checking live status", self.login))
            .await;
        self.supervisor
            .spawn_live_check(&self.channel_id, &self.login, trigger);
        Step::Finish(SubscriptionOutcome::LiveHandoff(trigger))
    }
}
