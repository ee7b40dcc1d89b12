//! Unisat open API: rune transfer events.
//!
//! The event search has no default payload; a failed search is reported to
//! the caller. The event count is an ordinary [`Upstream`] with a static
//! default.

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, USER_AGENT};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use super::{decode_json, FetchError, Upstream};
use crate::models::RawTransferEvent;

pub const DEFAULT_UNISAT_API: &str = "https://open-api.unisat.io";
/// Spaced rune name, percent-encoded by reqwest.
pub const DOG_RUNE_NAME: &str = "DOG•GO•TO•THE•MOON";
const EVENT_PAGE_LIMIT: u32 = 100;
/// Last known DOG event count, served until Unisat answers.
pub const DEFAULT_DOG_EVENT_COUNT: u64 = 2_953_886;

#[derive(Debug, Deserialize)]
struct UnisatEnvelope {
    code: i64,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    data: Option<EventPage>,
}

#[derive(Debug, Deserialize)]
struct EventPage {
    #[serde(default)]
    total: Option<u64>,
    #[serde(default)]
    detail: Vec<Value>,
}

/// GET one page of DOG rune events, newest first.
async fn get_event_page(
    http: &Client,
    base_url: &str,
    token: Option<&str>,
    limit: u32,
    timeout: Duration,
) -> Result<Value, FetchError> {
    let token = token.ok_or_else(|| FetchError::malformed("Unisat API token not configured"))?;
    let url = format!("{}/v1/indexer/runes/event", base_url.trim_end_matches('/'));
    let limit = limit.to_string();
    let request = http
        .get(&url)
        .query(&[("rune", DOG_RUNE_NAME), ("start", "0"), ("limit", limit.as_str())])
        .header(AUTHORIZATION, format!("Bearer {token}"))
        .header(USER_AGENT, concat!("dogdata-backend/", env!("CARGO_PKG_VERSION")))
        .send();
    let response = tokio::time::timeout(timeout, request)
        .await
        .map_err(|_| FetchError::Timeout(timeout))??;
    decode_json(response).await
}

fn open_envelope(body: &Value) -> Result<Option<EventPage>, FetchError> {
    let envelope: UnisatEnvelope =
        serde_json::from_value(body.clone()).map_err(|e| FetchError::malformed(e.to_string()))?;
    if envelope.code != 0 {
        return Err(FetchError::malformed(format!(
            "unisat error {}: {}",
            envelope.code,
            envelope.msg.unwrap_or_default()
        )));
    }
    Ok(envelope.data)
}

pub struct UnisatClient {
    http: Client,
    base_url: String,
    token: Option<String>,
    timeout: Duration,
}

impl UnisatClient {
    pub fn new(http: Client, base_url: String, token: Option<String>, timeout: Duration) -> Self {
        let token = token.filter(|t| !t.trim().is_empty());
        Self { http, base_url, token, timeout }
    }

    /// Latest page of DOG rune events. Entries that do not decode are dropped.
    pub async fn fetch_rune_events(&self) -> Result<Vec<RawTransferEvent>, FetchError> {
        let body = get_event_page(
            &self.http,
            &self.base_url,
            self.token.as_deref(),
            EVENT_PAGE_LIMIT,
            self.timeout,
        )
        .await?;
        parse_event_page(&body)
    }
}

/// Total number of DOG rune events, read from a one-event page.
pub struct RuneEventCountSource {
    base_url: String,
    token: Option<String>,
    timeout: Duration,
}

impl RuneEventCountSource {
    pub fn new(base_url: String, token: Option<String>, timeout: Duration) -> Self {
        let token = token.filter(|t| !t.trim().is_empty());
        Self { base_url, token, timeout }
    }
}

#[async_trait]
impl Upstream for RuneEventCountSource {
    type Payload = Value;

    fn name(&self) -> &'static str {
        "total"
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn fetch(&self, http: &Client) -> Result<Value, FetchError> {
        let body = get_event_page(http, &self.base_url, self.token.as_deref(), 1, self.timeout).await?;
        parse_event_total(&body).map(Value::from)
    }

    fn fallback(&self) -> Value {
        Value::from(DEFAULT_DOG_EVENT_COUNT)
    }
}

pub fn parse_event_total(body: &Value) -> Result<u64, FetchError> {
    open_envelope(body)?
        .and_then(|page| page.total)
        .ok_or_else(|| FetchError::malformed("unisat response has no event total"))
}

/// Where rune transfer events come from.
#[async_trait]
pub trait RuneEventSource: Send + Sync {
    fn is_configured(&self) -> bool;
    async fn rune_events(&self) -> Result<Vec<RawTransferEvent>, FetchError>;
}

#[async_trait]
impl RuneEventSource for UnisatClient {
    fn is_configured(&self) -> bool {
        self.token.is_some()
    }

    async fn rune_events(&self) -> Result<Vec<RawTransferEvent>, FetchError> {
        self.fetch_rune_events().await
    }
}

pub fn parse_event_page(body: &Value) -> Result<Vec<RawTransferEvent>, FetchError> {
    let detail = open_envelope(body)?.map(|d| d.detail).unwrap_or_default();
    let total = detail.len();
    let events: Vec<RawTransferEvent> = detail
        .into_iter()
        .filter_map(|raw| serde_json::from_value(raw).ok())
        .collect();
    if events.len() < total {
        debug!(dropped = total - events.len(), "Skipped undecodable rune events");
    }
    Ok(events)
}
