//! Shared channel registry.
//!
//! The registry is the single owner of:
//! - the channel id ↔ login mapping (plus the `watched` flag and last live state),
//! - the set of logins currently being captured,
//! - the active subscription slot of every channel id.
//!
//! All state sits behind one mutex and every check-then-act sequence is a
//! single method, so two tasks can never both start a capture for the same
//! login, and a mapping can never be dropped while a capture still refers
//! to it.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Local};
use parking_lot::Mutex;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::{debug, trace};

use crate::domain::{ChannelInfo, LiveState};

#[derive(Debug, Clone)]
struct ChannelEntry {
    login: String,
    watched: bool,
    live_state: LiveState,
}

/// Snapshot of an active capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureRecord {
    pub channel_id: String,
    pub output: PathBuf,
    pub started_at: DateTime<Local>,
    /// A `stream-down` arrived while the capture was still running.
    pub stream_ended: bool,
}

struct SubscriptionSlot {
    generation: u64,
    cancel: CancellationToken,
    closed: CancellationToken,
}

#[derive(Default)]
struct RegistryState {
    channels: HashMap<String, ChannelEntry>,
    ids_by_login: HashMap<String, String>,
    capturing: HashMap<String, CaptureRecord>,
    subscriptions: HashMap<String, SubscriptionSlot>,
    next_generation: u64,
}

impl RegistryState {
    fn is_capturing_id(&self, channel_id: &str) -> bool {
        self.channels
            .get(channel_id)
            .is_some_and(|entry| self.capturing.contains_key(&entry.login))
    }
}

/// What should happen to a channel once nothing is listening for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Still on the watch list.
    Watched,
    /// Removed from the watch list but a capture is still running.
    CapturingOnly,
    /// Removed from the watch list and idle; the mapping can go.
    Idle,
    /// Not registered (already retired).
    Unknown,
}

/// Result of [`ChannelRegistry::retire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetireOutcome {
    Retired,
    /// Refused: a capture still refers to the channel.
    Capturing,
    Unknown,
}

/// Process-wide channel state. See the module docs.
#[derive(Default)]
pub struct ChannelRegistry {
    state: Mutex<RegistryState>,
}

impl ChannelRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register (or re-register) a resolved channel as watched.
    ///
    /// Returns `true` when the channel id was not known before. A login that
    /// now resolves to a different id replaces the old mapping, unless that
    /// old channel is still capturing.
    pub fn register(&self, info: &ChannelInfo) -> bool {
        let mut state = self.state.lock();

        if let Some(old_id) = state.ids_by_login.get(&info.login).cloned() {
            if old_id != info.id && !state.capturing.contains_key(&info.login) {
                state.channels.remove(&old_id);
                if let Some(slot) = state.subscriptions.remove(&old_id) {
                    slot.cancel.cancel();
                }
            }
        }

        state
            .ids_by_login
            .insert(info.login.clone(), info.id.clone());
        match state.channels.get_mut(&info.id) {
            Some(entry) => {
                entry.login = info.login.clone();
                entry.watched = true;
                entry.live_state = info.live_state();
                false
            }
            None => {
                state.channels.insert(
                    info.id.clone(),
                    ChannelEntry {
                        login: info.login.clone(),
                        watched: true,
                        live_state: info.live_state(),
                    },
                );
                true
            }
        }
    }

    pub fn login_for(&self, channel_id: &str) -> Option<String> {
        self.state
            .lock()
            .channels
            .get(channel_id)
            .map(|entry| entry.login.clone())
    }

    pub fn id_for(&self, login: &str) -> Option<String> {
        self.state.lock().ids_by_login.get(login).cloned()
    }

    pub fn channel_count(&self) -> usize {
        self.state.lock().channels.len()
    }

    /// Flip the `watched` flag of a login. Returns `false` if the login is unknown.
    pub fn set_watched(&self, login: &str, watched: bool) -> bool {
        let mut state = self.state.lock();
        let Some(id) = state.ids_by_login.get(login).cloned() else {
            return false;
        };
        match state.channels.get_mut(&id) {
            Some(entry) => {
                entry.watched = watched;
                true
            }
            None => false,
        }
    }

    pub fn is_watched(&self, login: &str) -> bool {
        let state = self.state.lock();
        state
            .ids_by_login
            .get(login)
            .and_then(|id| state.channels.get(id))
            .is_some_and(|entry| entry.watched)
    }

    pub fn set_live_state(&self, channel_id: &str, live_state: LiveState) {
        if let Some(entry) = self.state.lock().channels.get_mut(channel_id) {
            entry.live_state = live_state;
        }
    }

    pub fn live_state(&self, channel_id: &str) -> Option<LiveState> {
        self.state
            .lock()
            .channels
            .get(channel_id)
            .map(|entry| entry.live_state)
    }

    // ---------------------------------------------------------------------
    // Captures
    // ---------------------------------------------------------------------

    /// Atomically mark `login` as capturing.
    ///
    /// Returns `None` if a capture for the login is already active. The
    /// returned guard removes the entry when dropped.
    pub fn try_begin_capture(
        self: &Arc<Self>,
        login: &str,
        channel_id: &str,
        output: PathBuf,
    ) -> Option<CaptureGuard> {
        let mut state = self.state.lock();
        if state.capturing.contains_key(login) {
            return None;
        }
        state.capturing.insert(
            login.to_string(),
            CaptureRecord {
                channel_id: channel_id.to_string(),
                output,
                started_at: Local::now(),
                stream_ended: false,
            },
        );
        debug!(login, channel_id, "Capture registered");
        Some(CaptureGuard {
            registry: Arc::clone(self),
            login: login.to_string(),
            released: false,
        })
    }

    pub fn is_capturing(&self, login: &str) -> bool {
        self.state.lock().capturing.contains_key(login)
    }

    pub fn capture_record(&self, login: &str) -> Option<CaptureRecord> {
        self.state.lock().capturing.get(login).cloned()
    }

    pub fn capturing_logins(&self) -> Vec<String> {
        let mut logins: Vec<String> = self.state.lock().capturing.keys().cloned().collect();
        logins.sort();
        logins
    }

    /// Note that the stream ended while its capture is still running.
    ///
    /// Returns `false` when no capture is active for the login.
    pub fn mark_stream_ended(&self, login: &str) -> bool {
        match self.state.lock().capturing.get_mut(login) {
            Some(record) => {
                record.stream_ended = true;
                true
            }
            None => false,
        }
    }

    fn end_capture(&self, login: &str) -> Option<CaptureRecord> {
        let record = self.state.lock().capturing.remove(login);
        debug!(login, "Capture unregistered");
        record
    }

    // ---------------------------------------------------------------------
    // Lifecycle
    // ---------------------------------------------------------------------

    pub fn disposition(&self, channel_id: &str) -> Disposition {
        let state = self.state.lock();
        match state.channels.get(channel_id) {
            None => Disposition::Unknown,
            Some(entry) if entry.watched => Disposition::Watched,
            Some(_) if state.is_capturing_id(channel_id) => Disposition::CapturingOnly,
            Some(_) => Disposition::Idle,
        }
    }

    /// Delete the mapping of a channel and cancel its subscription.
    ///
    /// Refused while the channel's login is capturing.
    pub fn retire(&self, channel_id: &str) -> RetireOutcome {
        let mut state = self.state.lock();
        if !state.channels.contains_key(channel_id) {
            return RetireOutcome::Unknown;
        }
        if state.is_capturing_id(channel_id) {
            return RetireOutcome::Capturing;
        }

        if let Some(entry) = state.channels.remove(channel_id) {
            if state.ids_by_login.get(&entry.login).map(String::as_str) == Some(channel_id) {
                state.ids_by_login.remove(&entry.login);
            }
        }
        if let Some(slot) = state.subscriptions.remove(channel_id) {
            slot.cancel.cancel();
        }
        debug!(channel_id, "Channel retired");
        RetireOutcome::Retired
    }

    // ---------------------------------------------------------------------
    // Subscriptions
    // ---------------------------------------------------------------------

    /// Claim the subscription slot of a channel, superseding any current holder.
    ///
    /// The previous lease (if any) is cancelled; the new lease must wait for it
    /// with [`SubscriptionLease::wait_for_previous`] before opening a transport.
    pub fn claim_subscription(
        self: &Arc<Self>,
        channel_id: &str,
        parent: &CancellationToken,
    ) -> SubscriptionLease {
        let mut state = self.state.lock();
        state.next_generation += 1;
        let generation = state.next_generation;

        let cancel = parent.child_token();
        let closed = CancellationToken::new();
        let previous = state
            .subscriptions
            .insert(
                channel_id.to_string(),
                SubscriptionSlot {
                    generation,
                    cancel: cancel.clone(),
                    closed: closed.clone(),
                },
            )
            .map(|old| {
                old.cancel.cancel();
                old.closed
            });

        trace!(channel_id, generation, superseded = previous.is_some(), "Subscription claimed");
        SubscriptionLease {
            registry: Arc::clone(self),
            channel_id: channel_id.to_string(),
            generation,
            cancel,
            closed,
            previous,
        }
    }

    /// Whether a subscription currently holds the slot of `channel_id`.
    pub fn has_subscription(&self, channel_id: &str) -> bool {
        self.state
            .lock()
            .subscriptions
            .get(channel_id)
            .is_some_and(|slot| !slot.cancel.is_cancelled())
    }

    /// Generation of the current slot holder.
    pub fn subscription_generation(&self, channel_id: &str) -> Option<u64> {
        self.state
            .lock()
            .subscriptions
            .get(channel_id)
            .map(|slot| slot.generation)
    }

    fn release_subscription(&self, channel_id: &str, generation: u64) {
        let mut state = self.state.lock();
        if state
            .subscriptions
            .get(channel_id)
            .is_some_and(|slot| slot.generation == generation)
        {
            state.subscriptions.remove(channel_id);
        }
    }
}

/// Keeps a login in the capturing set for as long as it lives.
pub struct CaptureGuard {
    registry: Arc<ChannelRegistry>,
    login: String,
    released: bool,
}

impl CaptureGuard {
    pub fn login(&self) -> &str {
        &self.login
    }

    /// Unregister the capture and return its final record.
    pub fn finish(mut self) -> Option<CaptureRecord> {
        self.released = true;
        self.registry.end_capture(&self.login)
    }
}

impl Drop for CaptureGuard {
    fn drop(&mut self) {
        if !self.released {
            self.registry.end_capture(&self.login);
        }
    }
}

/// Exclusive right to hold the PubSub connection of one channel.
///
/// Dropping the lease marks the connection as closed and frees the slot
/// (unless a newer lease already took it).
pub struct SubscriptionLease {
    registry: Arc<ChannelRegistry>,
    channel_id: String,
    generation: u64,
    cancel: CancellationToken,
    closed: CancellationToken,
    previous: Option<CancellationToken>,
}

impl SubscriptionLease {
    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Resolves when this lease is superseded, retired or shut down.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Wait until the connection this lease superseded has closed.
    pub async fn wait_for_previous(&mut self) {
        if let Some(previous) = self.previous.take() {
            previous.cancelled().await;
        }
    }
}

impl Drop for SubscriptionLease {
    fn drop(&mut self) {
        self.closed.cancel();
        self.registry
            .release_subscription(&self.channel_id, self.generation);
    }
}
