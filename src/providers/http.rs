/*!
 * HTTP relay backend.
 *
 * Talks JSON to a relay service that owns the api key pool and the session
 * channels:
 * - `POST /translate`
 * - `GET /credentials`
 * - `GET /session-channels/capacity`
 * - `POST /session-channels/release`
 */

use std::time::Duration;

use async_trait::async_trait;
use log::{debug, error};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use url::Url;

use crate::app_config::BackendConfig;
use crate::credentials::{Credential, CredentialSource};
use crate::errors::BackendError;
use crate::providers::{TranslateRequest, TranslateResponse, TranslationBackend};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CapacityResponse {
    max_concurrent: usize,
}

/// Client for the relay service
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: Url,
    api_key: String,
}

impl HttpBackend {
    /// Create a client from the backend configuration
    pub fn new(config: &BackendConfig) -> Result<Self, BackendError> {
        let mut endpoint = config.endpoint.trim().to_string();
        if !endpoint.ends_with('/') {
            endpoint.push('/');
        }
        let base_url = Url::parse(&endpoint)
            .map_err(|e| BackendError::RequestFailed(format!("Invalid endpoint '{}': {}", config.endpoint, e)))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| BackendError::ConnectionError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url,
            api_key: config.api_key.clone(),
        })
    }

    fn url(&self, path: &str) -> Result<Url, BackendError> {
        self.base_url
            .join(path)
            .map_err(|e| BackendError::RequestFailed(format!("Invalid path '{}': {}", path, e)))
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        if self.api_key.is_empty() {
            builder
        } else {
            builder.bearer_auth(&self.api_key)
        }
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, BackendError> {
        let response = self.authorize(builder).send().await.map_err(map_transport_error)?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| BackendError::ConnectionError(format!("Failed to read relay response: {}", e)))?;

        if !status.is_success() {
            error!("Relay error ({}): {}", status, body);
            return Err(map_status_error(status, body));
        }

        serde_json::from_str(&body).map_err(|e| BackendError::ParseError(e.to_string()))
    }
}

fn map_transport_error(e: reqwest::Error) -> BackendError {
    if e.is_timeout() || e.is_connect() {
        BackendError::ConnectionError(e.to_string())
    } else {
        BackendError::RequestFailed(e.to_string())
    }
}

fn map_status_error(status: StatusCode, message: String) -> BackendError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => BackendError::AuthenticationError(message),
        StatusCode::TOO_MANY_REQUESTS => BackendError::RateLimitExceeded(message),
        _ => BackendError::ApiError {
            status_code: status.as_u16(),
            message,
        },
    }
}

#[async_trait]
impl TranslationBackend for HttpBackend {
    async fn translate_unit(&self, request: TranslateRequest) -> Result<TranslateResponse, BackendError> {
        debug!(
            "POST translate unit {} via {} channel",
            request.metadata.unit_id, request.channel
        );
        let url = self.url("translate")?;
        self.send(self.client.post(url).json(&request)).await
    }

    async fn max_concurrent_session_channels(&self) -> Result<usize, BackendError> {
        let url = self.url("session-channels/capacity")?;
        let capacity: CapacityResponse = self.send(self.client.get(url)).await?;
        Ok(capacity.max_concurrent)
    }

    async fn release_all_session_channels(&self) -> Result<(), BackendError> {
        let url = self.url("session-channels/release")?;
        let _: serde_json::Value = self.send(self.client.post(url)).await?;
        Ok(())
    }
}

#[async_trait]
impl CredentialSource for HttpBackend {
    async fn list_credentials(&self) -> Result<Vec<Credential>, BackendError> {
        let url = self.url("credentials")?;
        self.send(self.client.get(url)).await
    }
}
