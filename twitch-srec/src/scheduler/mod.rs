//! Channel scheduling: shared registry, subscription supervision and live checks.

mod context;
mod live;
mod reconnect;
mod registry;
mod supervisor;

pub use context::WatchContext;
pub use live::LiveTrigger;
pub use reconnect::{ReconnectStats, ReconnectTracker, ReconnectTrackerConfig};
pub use registry::{
    CaptureGuard, CaptureRecord, ChannelRegistry, Disposition, RetireOutcome, SubscriptionLease,
};
pub use supervisor::{ConnectReason, Supervisor, SupervisorStats};
