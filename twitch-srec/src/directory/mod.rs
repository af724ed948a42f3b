//! Channel directory: login → channel id and live status.

mod gql;

pub use gql::{GqlDirectory, build_query, parse_user_response};

use async_trait::async_trait;

use crate::Result;
use crate::domain::Resolution;

/// Looks channels up on the platform.
///
/// Errors are classified: [`crate::Error::Connectivity`] for network
/// failures, [`crate::Error::Api`] for everything else. Both mean "try again
/// later"; an unknown login is `Ok(Resolution::NotFound)`, not an error.
#[async_trait]
pub trait ChannelDirectory: Send + Sync + 'static {
    async fn resolve(&self, login: &str) -> Result<Resolution>;
}
