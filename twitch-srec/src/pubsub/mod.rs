//! PubSub client: wire protocol, transport and per-channel subscriptions.

pub mod protocol;
mod subscriber;
mod transport;

pub use subscriber::{CloseReason, Subscriber, SubscriptionOutcome, SubscriptionState};
pub use transport::{PubSubConnection, PubSubConnector, WsConnector};
