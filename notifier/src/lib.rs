//! Operator notification channel and liveness push reporter. Both are
//! best-effort collaborators: delivery failures are surfaced to the
//! caller (notify) or logged and swallowed (health), never fatal.

use async_trait::async_trait;
use log::warn;
use serde::Deserialize;
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use url::Url;

/// Hard message-size limit of the bot API.
const MAX_MESSAGE_CHARS: usize = 4096;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("url error: {0}")]
    Url(#[from] url::ParseError),
    #[error("notification rejected: {0}")]
    Rejected(String),
}

/// Best-effort delivery of a multi-line log batch to an operator channel.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, batch: &str) -> Result<(), NotifyError>;
}

/// Fire-and-forget liveness ping to an external monitor.
#[async_trait]
pub trait HealthReporter: Send + Sync {
    async fn report(&self, ok: bool, message: &str);
}

/// Telegram-style bot channel: posts each batch chunk to sendMessage.
pub struct BotNotifier {
    http: reqwest::Client,
    endpoint: Url,
    chat_id: String,
}

#[derive(Debug, Deserialize)]
struct BotResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

impl BotNotifier {
    pub fn new(
        http: reqwest::Client,
        api_base: &str,
        token: &str,
        chat_id: impl Into<String>,
    ) -> Result<Self, NotifyError> {
        let endpoint = Url::parse(&format!(
            "{}/bot{}/sendMessage",
            api_base.trim_end_matches('/'),
            token
        ))?;
        Ok(Self {
            http,
            endpoint,
            chat_id: chat_id.into(),
        })
    }
}

#[async_trait]
impl Notifier for BotNotifier {
    async fn notify(&self, batch: &str) -> Result<(), NotifyError> {
        for chunk in split_batch(batch, MAX_MESSAGE_CHARS) {
            let response: BotResponse = self
                .http
                .post(self.endpoint.clone())
                .json(&json!({ "chat_id": self.chat_id, "text": chunk }))
                .send()
                .await?
                .json()
                .await?;
            if !response.ok {
                return Err(NotifyError::Rejected(
                    response.description.unwrap_or_else(|| "unknown".to_string()),
                ));
            }
        }
        Ok(())
    }
}

/// Used when no operator channel is configured.
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(&self, _batch: &str) -> Result<(), NotifyError> {
        Ok(())
    }
}

/// Pushes `status`/`msg`/`ping` query parameters to a monitor URL, with a
/// monotonically increasing ping counter.
pub struct PushHealthReporter {
    http: reqwest::Client,
    url: Url,
    pings: AtomicU64,
}

impl PushHealthReporter {
    pub fn new(http: reqwest::Client, push_url: &str) -> Result<Self, NotifyError> {
        Ok(Self {
            http,
            url: Url::parse(push_url)?,
            pings: AtomicU64::new(0),
        })
    }

    fn ping_url(&self, ok: bool, message: &str) -> Url {
        let ping = self.pings.fetch_add(1, Ordering::Relaxed);
        let mut url = self.url.clone();
        url.query_pairs_mut()
            .append_pair("status", if ok { "up" } else { "down" })
            .append_pair("msg", message)
            .append_pair("ping", &ping.to_string());
        url
    }
}

#[async_trait]
impl HealthReporter for PushHealthReporter {
    async fn report(&self, ok: bool, message: &str) {
        let url = self.ping_url(ok, message);
        if let Err(err) = self.http.get(url).send().await {
            warn!("health ping failed: {}", err);
        }
    }
}

pub struct NoopHealthReporter;

#[async_trait]
impl HealthReporter for NoopHealthReporter {
    async fn report(&self, _ok: bool, _message: &str) {}
}

/// Split a batch into chunks that fit the message limit, preferring line
/// boundaries and hard-splitting only lines longer than the limit.
fn split_batch(text: &str, limit: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    for line in text.lines() {
        if line.len() > limit {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
            }
            let mut rest = line;
            while rest.len() > limit {
                let mut cut = limit;
                while !rest.is_char_boundary(cut) {
                    cut -= 1;
                }
                chunks.push(rest[..cut].to_string());
                rest = &rest[cut..];
            }
            current.push_str(rest);
            continue;
        }
        let needed = if current.is_empty() {
            line.len()
        } else {
            current.len() + 1 + line.len()
        };
        if needed > limit && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(line);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}
