//! HTTP GraphQL read-model client.

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, info, instrument};

use crate::domain::{AppError, FetchError, ReadModelClient};

/// Smallest query every graph node answers.
const META_QUERY: &str = "{ _meta { block { number } } }";

#[derive(Debug, Clone)]
pub struct ReadModelClientConfig {
    pub timeout: Duration,
}

impl Default for ReadModelClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
        }
    }
}

/// GraphQL-over-HTTP client for the indexed read model
pub struct HttpReadModelClient {
    http_client: Client,
    url: String,
    api_key: Option<SecretString>,
}

#[derive(Debug, Serialize)]
struct GraphQlRequest<'a> {
    query: &'a str,
    variables: &'a Value,
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    data: Option<Value>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

impl GraphQlResponse {
    fn into_data(self) -> Result<Value, FetchError> {
        if !self.errors.is_empty() {
            let messages: Vec<String> = self.errors.into_iter().map(|e| e.message).collect();
            return Err(FetchError::GraphQl(messages.join("; ")));
        }
        self.data
            .ok_or_else(|| FetchError::Decode("response has neither data nor errors".to_string()))
    }
}

impl HttpReadModelClient {
    pub fn new(url: &str, api_key: Option<SecretString>, config: ReadModelClientConfig) -> Result<Self, AppError> {
        let http_client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        info!(url = %url, authenticated = api_key.is_some(), "Created read model client");
        Ok(Self {
            http_client,
            url: url.to_string(),
            api_key,
        })
    }

    pub fn with_defaults(url: &str, api_key: Option<SecretString>) -> Result<Self, AppError> {
        Self::new(url, api_key, ReadModelClientConfig::default())
    }
}

#[async_trait]
impl ReadModelClient for HttpReadModelClient {
    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), AppError> {
        self.query(META_QUERY, &json!({})).await?;
        Ok(())
    }

    #[instrument(skip(self, variables))]
    async fn query(&self, query: &str, variables: &Value) -> Result<Value, FetchError> {
        let mut request = self
            .http_client
            .post(&self.url)
            .json(&GraphQlRequest { query, variables });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key.expose_secret());
        }

        let response = request
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(FetchError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let body: GraphQlResponse = response
            .json()
            .await
            .map_err(|e| FetchError::Decode(e.to_string()))?;
        debug!("Read model responded");
        body.into_data()
    }
}
