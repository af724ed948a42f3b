//! twitch-srec: watch Twitch channels and record them while they are live.
//!
//! The watch list is polled by the [`reconciler`], which resolves logins
//! through the [`directory`] and hands channels to the
//! [`scheduler::Supervisor`]. Each channel keeps one [`pubsub`] subscription;
//! live notifications start a live check that records the stream through
//! [`capture`].

pub mod app;
pub mod capture;
pub mod config;
pub mod directory;
pub mod domain;
pub mod error;
pub mod logging;
pub mod panic_hook;
pub mod pubsub;
pub mod reconciler;
pub mod scheduler;
pub mod utils;

pub use error::{Error, Result};
