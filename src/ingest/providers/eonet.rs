// src/ingest/providers/eonet.rs
//! NASA EONET events feed.

use anyhow::{Context, Result};
use async_trait::async_trait;
use metrics::{counter, histogram};
use serde::Deserialize;
use std::time::{Duration, Instant};

use crate::config::FeedSettings;
use crate::error::IngestError;
use crate::ingest::types::{FeedSource, RawFeedEvent};

pub const DEFAULT_EONET_URL: &str = "https://eonet.gsfc.nasa.gov/api/v2.1/events";

const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct Envelope {
    events: Vec<RawFeedEvent>,
}

pub struct EonetFeed {
    mode: Mode,
}

enum Mode {
    Fixture(String),
    Http {
        url: String,
        query: Vec<(String, String)>,
        client: reqwest::Client,
        max_retries: u32,
        backoff_base_ms: u64,
    },
}

enum AttemptError {
    Retryable(String),
    Fatal(String),
}

impl EonetFeed {
    /// Serve a fixed JSON body; used by tests and dry runs.
    pub fn from_fixture(body: &str) -> Self {
        Self {
            mode: Mode::Fixture(body.to_string()),
        }
    }

    pub fn from_settings(cfg: &FeedSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("hazard-ingest/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(cfg.timeout_secs.min(10)))
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .context("building feed http client")?;

        let mut query = vec![("status".to_string(), cfg.status.clone())];
        if let Some(days) = cfg.days {
            query.push(("days".into(), days.to_string()));
        }
        if let Some(limit) = cfg.limit {
            query.push(("limit".into(), limit.to_string()));
        }
        if let Some(key) = cfg.api_key.as_deref().filter(|k| !k.is_empty()) {
            query.push(("api_key".into(), key.to_string()));
        }

        Ok(Self {
            mode: Mode::Http {
                url: cfg.url.clone(),
                query,
                client,
                max_retries: cfg.max_retries,
                backoff_base_ms: cfg.backoff_base_ms,
            },
        })
    }

    pub fn parse_events(body: &str) -> Result<Vec<RawFeedEvent>, IngestError> {
        let t0 = Instant::now();
        let env: Envelope =
            serde_json::from_str(body).map_err(|e| IngestError::FeedMalformed(e.to_string()))?;
        histogram!("feed_parse_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
        counter!("ingest_events_total").increment(env.events.len() as u64);
        Ok(env.events)
    }

    async fn fetch_http(
        url: &str,
        query: &[(String, String)],
        client: &reqwest::Client,
        max_retries: u32,
        backoff_base_ms: u64,
    ) -> Result<Vec<RawFeedEvent>, IngestError> {
        let max_attempts = max_retries.saturating_add(1);
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            counter!("feed_requests_total").increment(1);
            let t0 = Instant::now();
            let res = Self::attempt(url, query, client).await;
            histogram!("feed_fetch_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);

            match res {
                Ok(body) => return Self::parse_events(&body),
                Err(AttemptError::Fatal(reason)) => {
                    return Err(IngestError::FeedUnavailable {
                        attempts: attempt,
                        reason,
                    })
                }
                Err(AttemptError::Retryable(reason)) => {
                    if attempt >= max_attempts {
                        return Err(IngestError::FeedUnavailable {
                            attempts: attempt,
                            reason,
                        });
                    }
                    let delay = backoff_delay(backoff_base_ms, attempt);
                    tracing::warn!(
                        target: "ingest",
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        reason = %reason,
                        "feed request failed, retrying"
                    );
                    counter!("feed_retries_total").increment(1);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn attempt(
        url: &str,
        query: &[(String, String)],
        client: &reqwest::Client,
    ) -> Result<String, AttemptError> {
        let resp = client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| AttemptError::Retryable(format!("request: {e}")))?;

        let status = resp.status();
        if status.is_success() {
            return resp
                .text()
                .await
                .map_err(|e| AttemptError::Retryable(format!("body: {e}")));
        }
        let reason = format!("HTTP {status}");
        if status.is_server_error()
            || status == reqwest::StatusCode::REQUEST_TIMEOUT
            || status == reqwest::StatusCode::TOO_MANY_REQUESTS
        {
            Err(AttemptError::Retryable(reason))
        } else {
            Err(AttemptError::Fatal(reason))
        }
    }
}

/// `base << (attempt - 1)`, capped at 30s.
pub fn backoff_delay(base_ms: u64, attempt: u32) -> Duration {
    let shift = attempt.saturating_sub(1).min(20);
    Duration::from_millis(base_ms.saturating_mul(1u64 << shift)).min(MAX_BACKOFF)
}

#[async_trait]
impl FeedSource for EonetFeed {
    async fn fetch(&self) -> Result<Vec<RawFeedEvent>, IngestError> {
        match &self.mode {
            Mode::Fixture(body) => Self::parse_events(body),
            Mode::Http {
                url,
                query,
                client,
                max_retries,
                backoff_base_ms,
            } => Self::fetch_http(url, query, client, *max_retries, *backoff_base_ms).await,
        }
    }

    fn name(&self) -> &'static str {
        "EONET"
    }
}
