use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{CONTENT_TYPE, HeaderValue};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, trace};

use super::ChannelDirectory;
use crate::config::DirectoryConfig;
use crate::domain::{ChannelInfo, Resolution};
use crate::{Error, Result};

#[derive(Debug, Deserialize)]
struct GqlStream {
    #[serde(default)]
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GqlUser {
    id: String,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    stream: Option<GqlStream>,
}

/// Build the user lookup query for `login`.
///
/// The login is embedded as a JSON string literal, which is also a valid
/// GraphQL string literal, so quotes and backslashes cannot break out.
pub fn build_query(login: &str) -> Value {
    let literal = serde_json::to_string(login).unwrap_or_else(|_| "\"\"".to_string());
    let query = format!(
        r#"query {{
    user(login: {literal}) {{
        id
        displayName
        stream {{
            id
            title
        }}
    }}
}}"#
    );
    serde_json::json!({ "query": query })
}

/// Interpret a directory response body.
///
/// `data.user == null` means the login does not exist; a body without
/// `data.user` at all is an API error.
pub fn parse_user_response(login: &str, body: &str) -> Result<Resolution> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| Error::Api(format!("malformed response for {login}: {e}")))?;

    let Some(user) = value.get("data").and_then(|data| data.get("user")) else {
        let errors = value
            .get("errors")
            .map(Value::to_string)
            .unwrap_or_else(|| "no data.user in response".to_string());
        return Err(Error::Api(format!("lookup of {login} failed: {errors}")));
    };

    if user.is_null() {
        return Ok(Resolution::NotFound);
    }

    let user: GqlUser = serde_json::from_value(user.clone())
        .map_err(|e| Error::Api(format!("unexpected user object for {login}: {e}")))?;

    Ok(Resolution::Found(ChannelInfo {
        id: user.id,
        login: login.to_string(),
        display_name: user.display_name.filter(|n| !n.trim().is_empty()),
        is_live: user.stream.is_some(),
        title: user
            .stream
            .and_then(|s| s.title)
            .filter(|t| !t.trim().is_empty()),
    }))
}

/// Directory client backed by the GraphQL endpoint.
pub struct GqlDirectory {
    client: Client,
    config: DirectoryConfig,
}

impl GqlDirectory {
    pub fn new(client: Client, config: DirectoryConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl ChannelDirectory for GqlDirectory {
    async fn resolve(&self, login: &str) -> Result<Resolution> {
        debug!(login, "Resolving channel");

        let response = self
            .client
            .post(&self.config.endpoint)
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .header("Client-ID", &self.config.client_id)
            .json(&build_query(login))
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        trace!(login, %status, body = %body, "Directory response");

        if !status.is_success() {
            return Err(Error::Api(format!(
                "lookup of {login} returned HTTP {status}"
            )));
        }

        parse_user_response(login, &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_query_embeds_login() {
        let body = build_query("alice");
        let query = body["query"].as_str().unwrap();
        assert!(query.contains(r#"user(login: "alice")"#));
        assert!(query.contains("displayName"));
    }

    #[test]
    fn test_build_query_escapes_quotes() {
        let body = build_query("a\") { id } x(\"");
        let query = body["query"].as_str().unwrap();
        assert!(query.contains(r#"user(login: "a\") { id } x(\"")"#));
    }

    #[test]
    fn test_parse_live_user() {
        let body = r#"{"data":{"user":{"id":"123","displayName":"Alice","stream":{"id":"9","title":"speedrun"}}}}"#;
        let resolution = parse_user_response("alice", body).unwrap();
        assert_eq!(
            resolution,
            Resolution::Found(ChannelInfo {
                id: "123".to_string(),
                login: "alice".to_string(),
                display_name: Some("Alice".to_string()),
                is_live: true,
                title: Some("speedrun".to_string()),
            })
        );
    }

    #[test]
    fn test_parse_offline_user() {
        let body = r#"{"data":{"user":{"id":"123","displayName":"Alice","stream":null}}}"#;
        match parse_user_response("alice", body).unwrap() {
            Resolution::Found(info) => {
                assert_eq!(info.id, "123");
                assert!(!info.is_live);
                assert_eq!(info.title, None);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_parse_unknown_user() {
        let body = r#"{"data":{"user":null}}"#;
        assert_eq!(
            parse_user_response("ghost", body).unwrap(),
            Resolution::NotFound
        );
    }

    #[test]
    fn test_parse_errors_are_api_errors() {
        for body in [
            "not json",
            r#"{"errors":[{"message":"service timeout"}]}"#,
            r#"{"data":{}}"#,
            r#"{"data":{"user":{"displayName":"no id"}}}"#,
        ] {
            assert!(
                matches!(parse_user_response("alice", body), Err(Error::Api(_))),
                "body: {body}"
            );
        }
    }
}
