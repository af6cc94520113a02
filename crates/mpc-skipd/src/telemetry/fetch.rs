use mpc_proto::config::TelemetryConfig;
use mpc_proto::protocol::TelemetryError;
use mpc_proto::status::PlaybackSnapshot;
use reqwest::header::{HeaderValue, CACHE_CONTROL};

/// One bounded GET of the status endpoint.
pub struct StatusFetcher {
    client: reqwest::Client,
    config: TelemetryConfig,
}

impl StatusFetcher {
    pub fn new(client: reqwest::Client, config: TelemetryConfig) -> Self {
        Self { client, config }
    }

    pub fn build_client() -> Result<reqwest::Client, TelemetryError> {
        reqwest::Client::builder()
            .user_agent(concat!("mpc-skipd/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TelemetryError::Request(e.to_string()))
    }

    pub fn config(&self) -> &TelemetryConfig {
        &self.config
    }

    /// Fetches and parses the status. The whole exchange, body included, is
    /// aborted after `timeout_ms`.
    pub async fn fetch(&self) -> Result<PlaybackSnapshot, TelemetryError> {
        let exchange = async {
            let response = self
                .client
                .get(&self.config.status_url)
                .header(CACHE_CONTROL, HeaderValue::from_static("no-cache"))
                .send()
                .await
                .map_err(|e| TelemetryError::Request(e.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                return Err(TelemetryError::Http(status.as_u16()));
            }
            response
                .text()
                .await
                .map_err(|e| TelemetryError::Request(e.to_string()))
        };

        let text = tokio::time::timeout(self.config.timeout(), exchange)
            .await
            .map_err(|_| TelemetryError::Timeout(self.config.timeout_ms))??;

        PlaybackSnapshot::parse(&text).ok_or(TelemetryError::Malformed)
    }
}
