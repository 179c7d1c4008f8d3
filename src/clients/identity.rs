//! Identity service clients

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use super::{Caller, ClientError, IdentityProvider};
use crate::config::IdentityConfig;
use crate::query::UserRef;

/// Header carrying a session token
pub const SESSION_TOKEN_HEADER: &str = "x-tidepool-session-token";

/// Identity service REST client
pub struct HttpIdentityProvider {
    client: Client,
    base_url: String,
    server_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenData {
    #[serde(rename = "userid")]
    user_id: String,
    #[serde(rename = "isserver", default)]
    is_server: bool,
}

#[derive(Debug, Deserialize)]
struct UserData {
    #[serde(rename = "userid")]
    user_id: String,
}

impl HttpIdentityProvider {
    pub fn new(config: &IdentityConfig) -> Result<Self, ClientError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            server_token: config.server_token.clone(),
        })
    }

    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        token: &str,
    ) -> Result<Option<T>, ClientError> {
        let response = self
            .client
            .get(url)
            .header(SESSION_TOKEN_HEADER, token)
            .send()
            .await
            .map_err(ClientError::from_send)?;

        match response.status() {
            s if s.is_success() => Ok(Some(response.json().await?)),
            StatusCode::NOT_FOUND | StatusCode::UNAUTHORIZED => Ok(None),
            status => {
                let text = response.text().await.unwrap_or_default();
                Err(ClientError::ApiError {
                    status: status.as_u16(),
                    message: text,
                })
            }
        }
    }
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    async fn authenticate(&self, token: &str) -> Result<Option<Caller>, ClientError> {
        let url = format!("{}/token/{}", self.base_url, urlencoding::encode(token));
        let presented = self.server_token.as_deref().unwrap_or(token);

        let data: Option<TokenData> = self.get(&url, presented).await?;
        Ok(data.map(|d| Caller {
            user_id: d.user_id,
            is_server: d.is_server,
            token: token.to_string(),
        }))
    }

    async fn lookup_user(
        &self,
        user: &UserRef,
        caller: &Caller,
    ) -> Result<Option<String>, ClientError> {
        let url = format!("{}/user/{}", self.base_url, urlencoding::encode(user.as_str()));
        let presented = self.server_token.as_deref().unwrap_or(&caller.token);

        let data: Option<UserData> = self.get(&url, presented).await?;
        debug!(user = %user, found = data.is_some(), "Identity lookup");
        Ok(data.map(|d| d.user_id))
    }
}

/// Identity provider answering from fixed tables
#[derive(Debug, Default)]
pub struct StaticIdentityProvider {
    tokens: HashMap<String, (String, bool)>,
    users: Vec<(String, Option<String>)>,
}

impl StaticIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &IdentityConfig) -> Self {
        let mut provider = Self::new();
        for t in &config.tokens {
            provider = provider.token(&t.token, &t.user_id, t.is_server);
        }
        for u in &config.users {
            provider = provider.user(&u.user_id, u.email.as_deref());
        }
        provider
    }

    /// Accept `token` as a session for `user_id`
    pub fn token(mut self, token: &str, user_id: &str, is_server: bool) -> Self {
        self.tokens
            .insert(token.to_string(), (user_id.to_string(), is_server));
        self
    }

    /// Register a user, optionally reachable by email
    pub fn user(mut self, user_id: &str, email: Option<&str>) -> Self {
        self.users
            .push((user_id.to_string(), email.map(str::to_string)));
        self
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentityProvider {
    async fn authenticate(&self, token: &str) -> Result<Option<Caller>, ClientError> {
        Ok(self.tokens.get(token).map(|(user_id, is_server)| Caller {
            user_id: user_id.clone(),
            is_server: *is_server,
            token: token.to_string(),
        }))
    }

    async fn lookup_user(
        &self,
        user: &UserRef,
        _caller: &Caller,
    ) -> Result<Option<String>, ClientError> {
        let found = self.users.iter().find(|(id, email)| match user {
            UserRef::ByExternalId(wanted) => id == wanted,
            UserRef::ByEmail(wanted) => email
                .as_deref()
                .is_some_and(|e| e.eq_ignore_ascii_case(wanted)),
        });
        Ok(found.map(|(id, _)| id.clone()))
    }
}
