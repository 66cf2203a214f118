//! Typed HTTP client for the bridge's historical/control surface.

use std::time::Duration;

use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;

use tickbridge_model::{ArchiveEntry, ArchiveStat, HealthReport, ReadMode, StoredSnapshot, Symbol};

use crate::error::{ClientError, Result};

/// HTTP client for the bridge
#[derive(Clone)]
pub struct BridgeApiClient {
    client: Client,
    base_url: String,
    api_version: String,
}

impl std::fmt::Debug for BridgeApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeApiClient")
            .field("base_url", &self.base_url)
            .field("api_version", &self.api_version)
            .finish()
    }
}

#[derive(serde::Deserialize)]
struct ErrorBody {
    error: String,
    message: String,
}

impl BridgeApiClient {
    /// Create a new API client for `base_url`, e.g. `http://10.0.0.5:8172`.
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        let base_url = base_url.into().trim_end_matches('/').to_string();
        debug!("bridge api client for {base_url}");

        Self {
            client,
            base_url,
            api_version: "v1".to_string(),
        }
    }

    /// Build a versioned API URL
    pub fn build_url(&self, path: &str) -> String {
        let path = path.trim_start_matches('/');
        format!("{}/api/{}/{}", self.base_url, self.api_version, path)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// The per-symbol WebSocket stream URL.
    pub fn stream_url(&self, symbol: &Symbol) -> String {
        let ws_base = if let Some(rest) = self.base_url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = self.base_url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            format!("ws://{}", self.base_url)
        };
        format!("{ws_base}/api/{}/stream/{symbol}", self.api_version)
    }

    pub async fn health(&self) -> Result<HealthReport> {
        self.get_json(self.build_url("health")).await
    }

    pub async fn list(&self, path: &str) -> Result<Vec<ArchiveEntry>> {
        #[derive(serde::Deserialize)]
        struct ListBody {
            entries: Vec<ArchiveEntry>,
        }
        let url = format!("{}?path={}", self.build_url("archive/list"), path);
        let body: ListBody = self.get_json(url).await?;
        Ok(body.entries)
    }

    pub async fn stat(&self, path: &str) -> Result<ArchiveStat> {
        let url = format!("{}?path={}", self.build_url("archive/stat"), path);
        self.get_json(url).await
    }

    pub async fn read(
        &self,
        path: &str,
        offset: u64,
        length: u64,
        mode: ReadMode,
    ) -> Result<Vec<u8>> {
        let url = format!(
            "{}?path={}&offset={}&length={}&mode={}",
            self.build_url("archive/read"),
            path,
            offset,
            length,
            mode
        );
        let response = self.client.get(url).send().await?;
        let response = Self::check(response).await?;
        Ok(response.bytes().await?.to_vec())
    }

    /// The bridge's stored snapshot for `symbol`, used by the polling
    /// fallback.
    pub async fn latest(&self, symbol: &Symbol) -> Result<StoredSnapshot> {
        let url = format!("{}?symbol={}", self.build_url("latest"), symbol);
        self.get_json(url).await
    }

    async fn get_json<T: DeserializeOwned>(&self, url: String) -> Result<T> {
        let response = self.client.get(url).send().await?;
        let response = Self::check(response).await?;
        Ok(response.json::<T>().await?)
    }

    /// Turn non-2xx answers into the bridge's stable error kinds.
    async fn check(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        match response.json::<ErrorBody>().await {
            Ok(body) => Err(ClientError::Api {
                kind: body.error,
                message: body.message,
            }),
            Err(_) => Err(ClientError::Api {
                kind: status_kind(status).to_string(),
                message: format!("bridge answered {status}"),
            }),
        }
    }
}

fn status_kind(status: StatusCode) -> &'static str {
    match status {
        StatusCode::FORBIDDEN => "forbidden",
        StatusCode::NOT_FOUND => "not-found",
        StatusCode::PAYLOAD_TOO_LARGE => "too-large",
        _ => "io-error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_versioned_urls() {
        let client = BridgeApiClient::new("http://10.0.0.5:8172/");
        assert_eq!(
            client.build_url("/archive/list"),
            "http://10.0.0.5:8172/api/v1/archive/list"
        );
    }

    #[test]
    fn stream_url_swaps_scheme() {
        let client = BridgeApiClient::new("http://10.0.0.5:8172");
        assert_eq!(
            client.stream_url(&Symbol::from("NQZ25")),
            "ws://10.0.0.5:8172/api/v1/stream/NQZ25"
        );
        let tls = BridgeApiClient::new("https://bridge.mesh:8172");
        assert_eq!(
            tls.stream_url(&Symbol::from("NQZ25")),
            "wss://bridge.mesh:8172/api/v1/stream/NQZ25"
        );
    }
}
