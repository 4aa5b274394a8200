//! Posting channels

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::ChannelError;

/// Identifier the channel assigned to a post
pub type PostId = String;

/// External destination for alert text
#[async_trait]
pub trait PostingChannel: Send + Sync {
    /// Channel name for logging
    fn name(&self) -> &'static str;

    async fn post(&self, text: &str) -> Result<PostId, ChannelError>;
}

#[derive(Debug, Deserialize)]
struct CreatePostResponse {
    data: CreatedPost,
}

#[derive(Debug, Deserialize)]
struct CreatedPost {
    id: String,
}

/// Posts `{"text": ...}` to an X API v2 style endpoint with a bearer token
pub struct HttpPostingChannel {
    client: reqwest::Client,
    endpoint: String,
    token: String,
}

impl HttpPostingChannel {
    pub fn new(
        endpoint: impl Into<String>,
        token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ChannelError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ChannelError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            token: token.into(),
        })
    }
}

/// Read the wait hint from a 429 response
///
/// `retry-after` carries seconds; `x-rate-limit-reset` carries the epoch
/// second at which the window reopens.
pub fn retry_after_hint(headers: &reqwest::header::HeaderMap, now_epoch: i64) -> Option<Duration> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<i64>().ok())
    };

    if let Some(secs) = header("retry-after") {
        return Some(Duration::from_secs(secs.max(0) as u64));
    }
    header("x-rate-limit-reset").map(|reset| Duration::from_secs((reset - now_epoch).max(0) as u64))
}

#[async_trait]
impl PostingChannel for HttpPostingChannel {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn post(&self, text: &str) -> Result<PostId, ChannelError> {
        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.token)
            .json(&serde_json::json!({ "text": text }))
            .send()
            .await
            .map_err(|e| ChannelError::Transport(e.to_string()))?;

        let status = resp.status();
        if status.as_u16() == 429 {
            let retry_after = retry_after_hint(resp.headers(), chrono::Utc::now().timestamp());
            return Err(ChannelError::RateLimited { retry_after });
        }

        if status.is_server_error() {
            return Err(ChannelError::Transport(format!("server error {}", status)));
        }

        let body = resp
            .text()
            .await
            .map_err(|e| ChannelError::Transport(e.to_string()))?;

        if !status.is_success() {
            let reason: String = body.chars().take(200).collect();
            return Err(ChannelError::Rejected {
                reason: format!("{}: {}", status, reason),
            });
        }

        match serde_json::from_str::<CreatePostResponse>(&body) {
            Ok(created) => Ok(created.data.id),
            Err(e) => {
                // Accepted by the server; only the id is missing
                warn!("Post accepted but response was unreadable: {}", e);
                Ok(String::from("unknown"))
            }
        }
    }
}

/// Dry-run channel: logs every message instead of posting it
#[derive(Debug, Default)]
pub struct LogChannel {
    posted: AtomicU64,
}

impl LogChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn posted(&self) -> u64 {
        self.posted.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl PostingChannel for LogChannel {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn post(&self, text: &str) -> Result<PostId, ChannelError> {
        let n = self.posted.fetch_add(1, Ordering::Relaxed) + 1;
        info!("[DRY RUN] post #{}:\n{}", n, text);
        debug!(chars = text.chars().count(), "Dry-run post length");
        Ok(format!("dry-run-{}", n))
    }
}
