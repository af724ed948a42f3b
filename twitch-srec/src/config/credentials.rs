//! Credential file (`token.toml`).
//!
//! ```toml
//! [auth_token]
//! token = ""
//! ```
//!
//! An INI-style `token.ini` next to it is not read; a warning points at it
//! while `token.toml` has no token.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::utils::fs::{create_if_missing, io_error};
use crate::{Error, Result};

/// Public web client id, used when no token is configured.
pub const DEFAULT_CLIENT_ID: &str = "kimne78kx3ncx6brgo4mv6wki5h1ko";

const TEMPLATE: &str = "[auth_token]\ntoken = \"\"\n";

const LEGACY_FILE_NAME: &str = "token.ini";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct AuthTokenSection {
    #[serde(default)]
    token: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    auth_token: AuthTokenSection,
}

impl Credentials {
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            auth_token: AuthTokenSection {
                token: token.into(),
            },
        }
    }

    /// The configured token, if non-empty.
    pub fn token(&self) -> Option<&str> {
        let token = self.auth_token.token.trim();
        (!token.is_empty()).then_some(token)
    }

    pub fn parse(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| Error::config(format!("invalid credential file: {e}")))
    }

    /// Read the credential file, creating an empty one first if it is missing.
    pub async fn load_or_create(path: &Path) -> Result<Self> {
        if create_if_missing(path, TEMPLATE).await? {
            info!(path = %path.display(), "Created empty credential file");
        }
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| io_error("reading credentials", path, e))?;
        let credentials = Self::parse(&contents)?;

        if credentials.token().is_none() {
            if let Some(legacy) = legacy_token_file(path).await {
                warn!(
                    legacy = %legacy.display(),
                    path = %path.display(),
                    "token.ini is not read anymore, copy its token into the credential file"
                );
            }
        }
        Ok(credentials)
    }
}

/// `token.ini` in the directory of `path`, if it exists.
async fn legacy_token_file(path: &Path) -> Option<PathBuf> {
    let legacy = path.with_file_name(LEGACY_FILE_NAME);
    match tokio::fs::try_exists(&legacy).await {
        Ok(true) => Some(legacy),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_empty_token() {
        let credentials = Credentials::parse(TEMPLATE).unwrap();
        assert_eq!(credentials.token(), None);
    }

    #[test]
    fn test_parse_token() {
        let credentials = Credentials::parse("[auth_token]\ntoken = \" abc123 \"\n").unwrap();
        assert_eq!(credentials.token(), Some("abc123"));
    }

    #[test]
    fn test_parse_missing_section() {
        let credentials = Credentials::parse("").unwrap();
        assert_eq!(credentials.token(), None);
    }

    #[test]
    fn test_parse_invalid() {
        assert!(matches!(
            Credentials::parse("token = = ="),
            Err(Error::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_load_or_create() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.toml");

        let credentials = Credentials::load_or_create(&path).await.unwrap();
        assert_eq!(credentials.token(), None);
        assert_eq!(tokio::fs::read_to_string(&path).await.unwrap(), TEMPLATE);

        tokio::fs::write(&path, "[auth_token]\ntoken = \"xyz\"\n")
            .await
            .unwrap();
        let credentials = Credentials::load_or_create(&path).await.unwrap();
        assert_eq!(credentials.token(), Some("xyz"));
    }

    #[tokio::test]
    async fn test_legacy_token_file_detection() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.toml");
        assert_eq!(legacy_token_file(&path).await, None);

        tokio::fs::write(dir.path().join("token.ini"), "[AUTH_TOKEN]\ntoken=abc\n")
            .await
            .unwrap();
        assert_eq!(
            legacy_token_file(&path).await,
            Some(dir.path().join("token.ini"))
        );
        let credentials = Credentials::load_or_create(&path).await.unwrap();
        assert_eq!(credentials.token(), None);
    }
}
