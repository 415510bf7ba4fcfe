//! HTTP client for the local network device registry.
//!
//! The registry is an external service on the local network that knows
//! about devices already joined to the network. Its discoverable list is
//! merged with the radio scan candidates via
//! [`merge_candidates`](halo_types::merge_candidates).
//!
//! # Example
//!
//! ```no_run
//! use halo_core::registry::RegistryClient;
//! use halo_types::merge_candidates;
//!
//! # async fn example(local: Vec<halo_types::ScannedCandidate>) -> Result<(), Box<dyn std::error::Error>> {
//! let client = RegistryClient::new("http://192.168.4.1")?;
//! let remote = client.discoverable_devices().await?;
//! let merged = merge_candidates(&local, &remote);
//! println!("{} candidates", merged.len());
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use reqwest::Client;
use serde::de::DeserializeOwned;

use halo_types::{DeviceRecord, ScannedCandidate};

/// Error type for registry operations.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Registry not reachable at {url}: {source}")]
    NotReachable {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Registry error: {message}")]
    Api { status: u16, message: String },
}

pub type Result<T> = std::result::Result<T, RegistryError>;

/// HTTP client for the network device registry.
#[derive(Debug, Clone)]
pub struct RegistryClient {
    client: Client,
    base_url: String,
}

fn normalize_url(base_url: &str) -> Result<String> {
    let base_url = base_url.trim_end_matches('/').to_string();
    if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
        return Err(RegistryError::InvalidUrl(format!(
            "URL must start with http:// or https://, got: {}",
            base_url
        )));
    }
    Ok(base_url)
}

impl RegistryClient {
    /// Create a client with a 10 second request timeout.
    pub fn new(base_url: &str) -> Result<Self> {
        let base_url = normalize_url(base_url)?;
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(RegistryError::Request)?;
        Ok(Self { client, base_url })
    }

    pub fn with_client(base_url: &str, client: Client) -> Result<Self> {
        Ok(Self {
            client,
            base_url: normalize_url(base_url)?,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Devices the registry can see on the network but which are not paired.
    pub async fn discoverable_devices(&self) -> Result<Vec<ScannedCandidate>> {
        let url = format!("{}/api/devices/discoverable", self.base_url);
        self.get(&url).await
    }

    /// Devices the registry already considers paired.
    pub async fn paired_devices(&self) -> Result<Vec<DeviceRecord>> {
        let url = format!("{}/api/devices/paired", self.base_url);
        self.get(&url).await
    }

    /// Tell the registry about a completed pairing.
    pub async fn register_pairing(&self, record: &DeviceRecord) -> Result<()> {
        let url = format!("{}/api/devices/pair", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(record)
            .send()
            .await
            .map_err(|e| RegistryError::NotReachable {
                url: url.clone(),
                source: e,
            })?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(api_error(response).await)
        }
    }

    async fn get<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| RegistryError::NotReachable {
                url: url.to_string(),
                source: e,
            })?;
        handle_response(response).await
    }
}

async fn handle_response<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    if response.status().is_success() {
        response.json().await.map_err(RegistryError::Request)
    } else {
        Err(api_error(response).await)
    }
}

async fn api_error(response: reqwest::Response) -> RegistryError {
    let status = response.status();
    let message = response
        .json::<serde_json::Value>()
        .await
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(String::from))
        .unwrap_or_else(|| status.to_string());
    RegistryError::Api {
        status: status.as_u16(),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = RegistryClient::new("http://192.168.4.1/").unwrap();
        assert_eq!(client.base_url(), "http://192.168.4.1");
    }

    #[test]
    fn test_invalid_url() {
        let err = RegistryClient::new("192.168.4.1").unwrap_err();
        assert!(matches!(err, RegistryError::InvalidUrl(_)));
    }

    #[tokio::test]
    async fn test_unreachable_registry() {
        let client = RegistryClient::new("http://127.0.0.1:1").unwrap();
        let err = client.paired_devices().await.unwrap_err();
        assert!(matches!(err, RegistryError::NotReachable { .. }));
    }
}
