//! Tile request execution.

use crate::config::TestConfig;
use crate::error::ConfigError;
use crate::generator::{format_url, TileCoord};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Result of a single tile request attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outcome {
    /// Time from send until the body was fully drained. Zero when no response
    /// was received.
    pub latency: Duration,
    pub success: bool,
    /// HTTP status, or 0 when no response was received.
    pub status: u16,
    pub bytes: u64,
}

impl Outcome {
    pub fn success(latency: Duration, status: u16, bytes: u64) -> Self {
        Self {
            latency,
            success: true,
            status,
            bytes,
        }
    }

    pub fn failure(latency: Duration, status: u16) -> Self {
        Self {
            latency,
            success: false,
            status,
            bytes: 0,
        }
    }

    /// A request that never produced a response.
    pub fn unreachable() -> Self {
        Self::failure(Duration::ZERO, 0)
    }
}

/// Status codes that count as a successful tile fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptPolicy {
    statuses: Vec<u16>,
}

impl AcceptPolicy {
    pub fn new(statuses: impl Into<Vec<u16>>) -> Self {
        Self {
            statuses: statuses.into(),
        }
    }

    pub fn accepts(&self, status: u16) -> bool {
        self.statuses.contains(&status)
    }
}

impl Default for AcceptPolicy {
    /// OK, No Content and Not Found: empty tiles are a normal answer.
    fn default() -> Self {
        Self::new([200, 204, 404])
    }
}

/// Issues tile GETs through one shared connection pool.
///
/// Cloning is cheap; the client, template and policy are read-only and shared
/// by every worker.
#[derive(Clone)]
pub struct TileClient {
    client: reqwest::Client,
    template: Arc<str>,
    policy: Arc<AcceptPolicy>,
}

impl TileClient {
    /// Build the client from a validated config.
    pub fn new(config: &TestConfig) -> Result<Self, ConfigError> {
        let timeout = config.request_timeout()?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .pool_max_idle_per_host(config.threads)
            .default_headers(config.header_map()?)
            .build()?;

        Ok(Self {
            client,
            template: Arc::from(config.url_template.as_str()),
            policy: Arc::new(AcceptPolicy::new(config.accept_status.clone())),
        })
    }

    pub fn url_for(&self, tile: TileCoord) -> String {
        format_url(&self.template, tile)
    }

    /// Fetch one tile and drain its body. Exactly one attempt, never retried.
    pub async fn execute(&self, tile: TileCoord) -> Outcome {
        let url = self.url_for(tile);

        let request = match self.client.get(&url).build() {
            Ok(request) => request,
            Err(e) => {
                debug!(url = %url, error = %e, "Failed to build request");
                return Outcome::unreachable();
            }
        };

        let start = Instant::now();
        let mut response = match self.client.execute(request).await {
            Ok(response) => response,
            Err(e) => {
                debug!(url = %url, error = %e, "Request failed");
                return Outcome::unreachable();
            }
        };

        let status = response.status().as_u16();

        // Read the full body so latency covers the whole transfer
        let mut bytes = 0u64;
        let drained = loop {
            match response.chunk().await {
                Ok(Some(chunk)) => bytes += chunk.len() as u64,
                Ok(None) => break true,
                Err(e) => {
                    debug!(url = %url, status, error = %e, "Failed to read response body");
                    break false;
                }
            }
        };
        let latency = start.elapsed();

        if drained && self.policy.accepts(status) {
            Outcome::success(latency, status, bytes)
        } else {
            debug!(url = %url, status, "Request returned unaccepted status");
            Outcome {
                latency,
                success: false,
                status,
                bytes,
            }
        }
    }
}
