//! Permission-pair service clients

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;

use super::{Caller, ClientError, PermissionPair, PermissionStore, SESSION_TOKEN_HEADER};
use crate::config::PermissionsConfig;

/// Permission-pair service REST client
pub struct HttpPermissionStore {
    client: Client,
    base_url: String,
    server_token: Option<String>,
}

impl HttpPermissionStore {
    pub fn new(
        config: &PermissionsConfig,
        server_token: Option<String>,
    ) -> Result<Self, ClientError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            server_token,
        })
    }
}

#[async_trait]
impl PermissionStore for HttpPermissionStore {
    async fn private_pair(
        &self,
        user_id: &str,
        scope: &str,
        caller: &Caller,
    ) -> Result<Option<PermissionPair>, ClientError> {
        let url = format!(
            "{}/{}/private/{}",
            self.base_url,
            urlencoding::encode(user_id),
            urlencoding::encode(scope)
        );
        let token = self.server_token.as_deref().unwrap_or(&caller.token);

        let response = self
            .client
            .get(&url)
            .header(SESSION_TOKEN_HEADER, token)
            .send()
            .await
            .map_err(ClientError::from_send)?;

        match response.status() {
            s if s.is_success() => Ok(Some(response.json().await?)),
            StatusCode::NOT_FOUND => Ok(None),
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

/// Permission store answering from a fixed table
#[derive(Debug, Default)]
pub struct StaticPermissionStore {
    pairs: Vec<(String, String, PermissionPair)>,
}

impl StaticPermissionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &PermissionsConfig) -> Self {
        config.pairs.iter().fold(Self::new(), |store, p| {
            store.pair(&p.user_id, &p.scope, &p.id, &p.key)
        })
    }

    /// Store a pair for `user_id` under `scope`
    pub fn pair(mut self, user_id: &str, scope: &str, id: &str, key: &str) -> Self {
        self.pairs.push((
            user_id.to_string(),
            scope.to_string(),
            PermissionPair {
                id: id.to_string(),
                key: key.to_string(),
            },
        ));
        self
    }
}

#[async_trait]
impl PermissionStore for StaticPermissionStore {
    async fn private_pair(
        &self,
        user_id: &str,
        scope: &str,
        _caller: &Caller,
    ) -> Result<Option<PermissionPair>, ClientError> {
        Ok(self
            .pairs
            .iter()
            .find(|(u, s, _)| u == user_id && s == scope)
            .map(|(_, _, pair)| pair.clone()))
    }
}
