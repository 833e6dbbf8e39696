//! Credential checks behind the `basic` and `cookie` variants.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;

use super::{http_client, parse_url, AuthzError};
use crate::config::AuthzConfig;

/// What the client presented.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Credential<'a> {
    Basic { user: &'a str, password: &'a str },
    Token { token: &'a str },
}

#[async_trait]
pub trait CredentialChecker: Send + Sync {
    /// `Ok(Some(account))` when valid, `Ok(None)` when rejected.
    async fn check(&self, credential: Credential<'_>) -> Result<Option<String>, AuthzError>;
}

/// Tables from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    users: HashMap<String, String>,
    tokens: HashMap<String, String>,
}

impl StaticCredentials {
    pub fn new(users: HashMap<String, String>, tokens: HashMap<String, String>) -> Self {
        Self { users, tokens }
    }
}

#[async_trait]
impl CredentialChecker for StaticCredentials {
    async fn check(&self, credential: Credential<'_>) -> Result<Option<String>, AuthzError> {
        Ok(match credential {
            Credential::Basic { user, password } => self
                .users
                .get(user)
                .filter(|expected| constant_time_eq(expected.as_bytes(), password.as_bytes()))
                .map(|_| user.to_string()),
            Credential::Token { token } => self.tokens.get(token).cloned(),
        })
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// POSTs the credential as JSON. 2xx is valid, 401/403 invalid, anything
/// else an error.
pub struct RemoteCredentials {
    client: reqwest::Client,
    url: url::Url,
}

#[derive(serde::Deserialize, Default)]
#[serde(default)]
struct CheckResponse {
    account: String,
}

impl RemoteCredentials {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, AuthzError> {
        Ok(Self {
            client: http_client(timeout)?,
            url: parse_url(url)?,
        })
    }
}

#[async_trait]
impl CredentialChecker for RemoteCredentials {
    async fn check(&self, credential: Credential<'_>) -> Result<Option<String>, AuthzError> {
        let response = self
            .client
            .post(self.url.clone())
            .json(&credential)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(AuthzError::Credential(status.as_u16()));
        }

        let body: CheckResponse = response.json().await.unwrap_or_default();
        if !body.account.is_empty() {
            return Ok(Some(body.account));
        }
        Ok(Some(match credential {
            Credential::Basic { user, .. } => user.to_string(),
            Credential::Token { .. } => String::new(),
        }))
    }
}

/// Remote when `credentials_url` is set, otherwise the static tables.
pub fn build_checker(
    config: &AuthzConfig,
    timeout: Duration,
) -> Result<Arc<dyn CredentialChecker>, AuthzError> {
    if config.credentials_url.is_empty() {
        Ok(Arc::new(StaticCredentials::new(
            config.users.clone(),
            config.tokens.clone(),
        )))
    } else {
        Ok(Arc::new(RemoteCredentials::new(&config.credentials_url, timeout)?))
    }
}
