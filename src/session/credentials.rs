//! Broker credential refresh through the DCCS service
//!
//! With `connect_type = "dccs"` the agent never stores broker credentials.
//! Before every connect and reconnect it exchanges its service key for the
//! current broker host, port and login.

use crate::config::{DccsSection, Protocol};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

const PLAIN_PROTOCOL_KEY: &str = "mqtt";
const SECURE_PROTOCOL_KEY: &str = "mqtt+ssl";

/// Broker login obtained from a credential service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerCredentials {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub protocol: Protocol,
}

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("Invalid credential service URL: {0}")]
    InvalidUrl(String),
    #[error("Credential request failed: {0}")]
    Http(String),
    #[error("Credential service returned status {0}")]
    Status(u16),
    #[error("Invalid credential response: {0}")]
    InvalidResponse(String),
    #[error("Credential response has no '{0}' protocol")]
    MissingProtocol(String),
}

/// Source of fresh broker credentials
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn fetch(&self) -> Result<BrokerCredentials, CredentialError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServiceCredentialResponse {
    service_host: String,
    credential: CredentialBody,
}

#[derive(Debug, Deserialize)]
struct CredentialBody {
    protocols: HashMap<String, ProtocolCredential>,
}

#[derive(Debug, Deserialize)]
struct ProtocolCredential {
    port: u16,
    username: String,
    password: String,
    #[serde(default)]
    ssl: bool,
}

/// HTTP client for `GET {url}/v1/serviceCredentials/{key}`
pub struct DccsClient {
    client: Client,
    endpoint: Url,
    use_secure: bool,
}

impl DccsClient {
    pub fn new(dccs: &DccsSection, use_secure: bool) -> Result<Self, CredentialError> {
        let endpoint = Self::endpoint(&dccs.url, &dccs.key)?;
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| CredentialError::Http(e.to_string()))?;
        Ok(Self {
            client,
            endpoint,
            use_secure,
        })
    }

    /// Build the credential endpoint (pure function)
    fn endpoint(base: &str, key: &str) -> Result<Url, CredentialError> {
        let raw = format!("{}/v1/serviceCredentials/{}", base.trim_end_matches('/'), key);
        Url::parse(&raw).map_err(|e| CredentialError::InvalidUrl(format!("{raw}: {e}")))
    }

    /// Pick the broker login out of a service response (pure function)
    fn select_credentials(
        response: ServiceCredentialResponse,
        use_secure: bool,
    ) -> Result<BrokerCredentials, CredentialError> {
        let key = if use_secure {
            SECURE_PROTOCOL_KEY
        } else {
            PLAIN_PROTOCOL_KEY
        };
        let mut protocols = response.credential.protocols;
        let entry = protocols
            .remove(key)
            .ok_or_else(|| CredentialError::MissingProtocol(key.to_string()))?;

        Ok(BrokerCredentials {
            host: response.service_host,
            port: entry.port,
            username: entry.username,
            password: entry.password,
            protocol: if use_secure || entry.ssl {
                Protocol::Tls
            } else {
                Protocol::Tcp
            },
        })
    }
}

#[async_trait]
impl CredentialProvider for DccsClient {
    async fn fetch(&self) -> Result<BrokerCredentials, CredentialError> {
        debug!(endpoint = %self.endpoint, "Requesting broker credentials");
        let response = self
            .client
            .get(self.endpoint.clone())
            .send()
            .await
            .map_err(|e| CredentialError::Http(e.to_string()))?;

        if !response.status().is_success() {
            return Err(CredentialError::Status(response.status().as_u16()));
        }

        let body: ServiceCredentialResponse = response
            .json()
            .await
            .map_err(|e| CredentialError::InvalidResponse(e.to_string()))?;

        let credentials = Self::select_credentials(body, self.use_secure)?;
        info!(
            host = %credentials.host,
            port = credentials.port,
            "Broker credentials refreshed"
        );
        Ok(credentials)
    }
}
