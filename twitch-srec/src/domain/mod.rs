//! Domain types shared by every component.

mod channel;

pub use channel::{ChannelInfo, LiveState, Resolution, channel_url, parse_login};
