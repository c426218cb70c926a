//! Destination of metric points.

use crate::point::{encode_batch, Point, Precision};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

const PING_TIMEOUT: Duration = Duration::from_secs(10);
const WRITE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to build http client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} answered {status}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },
    #[error("{0}")]
    Other(String),
}

#[async_trait]
pub trait MetricSink: Send + Sync {
    /// Cheap reachability check used once at startup.
    async fn ping(&self) -> Result<(), SinkError>;

    async fn write(
        &self,
        database: &str,
        precision: Precision,
        points: &[Point],
    ) -> Result<(), SinkError>;
}

/// InfluxDB 1.x HTTP API client.
#[derive(Debug, Clone)]
pub struct InfluxSink {
    client: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
}

impl InfluxSink {
    pub fn new(
        base_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self, SinkError> {
        let client = reqwest::Client::builder()
            .timeout(WRITE_TIMEOUT)
            .build()
            .map_err(SinkError::Client)?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            username: username.into(),
            password: password.into(),
        })
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.username.is_empty() {
            request
        } else {
            request.basic_auth(&self.username, Some(&self.password))
        }
    }

    async fn check(url: String, response: reqwest::Response) -> Result<(), SinkError> {
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(SinkError::Status {
            url,
            status: status.as_u16(),
            body: body.trim().to_string(),
        })
    }
}

#[async_trait]
impl MetricSink for InfluxSink {
    async fn ping(&self) -> Result<(), SinkError> {
        let url = format!("{}/ping", self.base_url);
        let response = self
            .authorize(self.client.get(&url))
            .timeout(PING_TIMEOUT)
            .send()
            .await
            .map_err(|source| SinkError::Request {
                url: url.clone(),
                source,
            })?;
        Self::check(url, response).await
    }

    async fn write(
        &self,
        database: &str,
        precision: Precision,
        points: &[Point],
    ) -> Result<(), SinkError> {
        if points.is_empty() {
            return Ok(());
        }

        let url = format!("{}/write", self.base_url);
        let body = encode_batch(points, precision);
        let response = self
            .authorize(self.client.post(&url))
            .query(&[("db", database), ("precision", precision.as_str())])
            .body(body)
            .send()
            .await
            .map_err(|source| SinkError::Request {
                url: url.clone(),
                source,
            })?;
        Self::check(url, response).await?;

        debug!(count = points.len(), database, "wrote points");
        Ok(())
    }
}
