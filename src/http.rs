//! Remote fetch service with per-URL exponential backoff.
//!
//! Failed endpoints are tracked individually so one dead host cannot
//! stall the loop with repeated connection attempts: after the first
//! failure a URL backs off 1 minute, then 10, then 20, capping at 60.
//! While a URL is in backoff the fetch result carries a
//! `shouldDefer`/`nextRetryMs` pair — the calling component reschedules
//! itself instead of treating the condition as a hard failure.

use std::collections::HashMap;

use log::{debug, warn};
use serde_json::{json, Value};

use crate::ports::HttpFetch;

const INITIAL_BACKOFF_MS: u64 = 60_000; // 1 minute
const MED_BACKOFF_MS: u64 = 600_000; // 10 minutes
const LONG_BACKOFF_MS: u64 = 1_200_000; // 20 minutes
const MAX_BACKOFF_MS: u64 = 3_600_000; // 60 minutes

/// Per-URL failure bookkeeping.
#[derive(Debug, Clone, Copy, Default)]
struct UrlFailure {
    failure_count: u32,
    last_failure_ms: u64,
    next_retry_ms: u64,
}

/// Tracks the backoff ladder per URL.
#[derive(Default)]
pub struct BackoffTracker {
    urls: HashMap<String, UrlFailure>,
}

impl BackoffTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_in_backoff(&self, url: &str, now_ms: u64) -> bool {
        self.urls
            .get(url)
            .is_some_and(|info| now_ms < info.next_retry_ms)
    }

    /// When the URL may be retried; 0 = immediately.
    pub fn next_retry_ms(&self, url: &str) -> u64 {
        self.urls.get(url).map_or(0, |info| info.next_retry_ms)
    }

    pub fn failure_count(&self, url: &str) -> u32 {
        self.urls.get(url).map_or(0, |info| info.failure_count)
    }

    /// Record a failure and advance the ladder.
    pub fn record_failure(&mut self, url: &str, now_ms: u64) {
        let info = self.urls.entry(url.to_string()).or_default();
        info.failure_count += 1;
        info.last_failure_ms = now_ms;
        info.next_retry_ms = now_ms + backoff_for(info.failure_count);
        warn!(
            "backoff: {url} failure #{} — next retry at {} ms",
            info.failure_count, info.next_retry_ms
        );
    }

    /// Reset tracking on a successful fetch.
    pub fn reset(&mut self, url: &str) {
        if self.urls.remove(url).is_some() {
            debug!("backoff: {url} recovered, tracking reset");
        }
    }

    /// Failure statistics for the diagnostics view.
    pub fn stats_json(&self) -> Value {
        let entries: Vec<Value> = self
            .urls
            .iter()
            .map(|(url, info)| {
                json!({
                    "url": url,
                    "failure_count": info.failure_count,
                    "last_failure_ms": info.last_failure_ms,
                    "next_retry_ms": info.next_retry_ms,
                })
            })
            .collect();
        Value::Array(entries)
    }
}

/// Ladder: 1 failure → 1 min, 2 → 10 min, 3 → 20 min, 4+ → 60 min.
fn backoff_for(failure_count: u32) -> u64 {
    match failure_count {
        0 | 1 => INITIAL_BACKOFF_MS,
        2 => MED_BACKOFF_MS,
        3 => LONG_BACKOFF_MS,
        _ => MAX_BACKOFF_MS,
    }
}

// ---------------------------------------------------------------------------
// Remote fetcher
// ---------------------------------------------------------------------------

/// Backoff-aware JSON fetcher. Owned by the orchestrator; components
/// reach it through [`crate::ports::OrchestratorPort::fetch_remote`].
pub struct RemoteFetcher {
    client: Box<dyn HttpFetch>,
    tracker: BackoffTracker,
    default_timeout_ms: u32,
}

impl RemoteFetcher {
    pub fn new(client: Box<dyn HttpFetch>) -> Self {
        Self {
            client,
            tracker: BackoffTracker::new(),
            default_timeout_ms: 5000,
        }
    }

    pub fn set_default_timeout(&mut self, timeout_ms: u32) {
        self.default_timeout_ms = timeout_ms;
    }

    pub fn tracker(&self) -> &BackoffTracker {
        &self.tracker
    }

    /// Fetch a URL and parse the body as JSON.
    ///
    /// Success: the parsed object with `"success": true` merged in.
    /// Failure or active backoff: `{error, shouldDefer, nextRetryMs,
    /// retryInSeconds}` so the caller can reschedule itself.
    pub fn get_json(&mut self, url: &str, timeout_ms: u32, now_ms: u64) -> Value {
        if self.tracker.is_in_backoff(url, now_ms) {
            let next_retry_ms = self.tracker.next_retry_ms(url);
            debug!("fetch deferred, {url} in backoff until {next_retry_ms} ms");
            return defer_result("URL in backoff", next_retry_ms, now_ms);
        }

        let timeout = if timeout_ms > 0 {
            timeout_ms
        } else {
            self.default_timeout_ms
        };

        match self.client.get(url, timeout) {
            Ok(body) => match serde_json::from_str::<Value>(&body) {
                Ok(mut parsed) => {
                    self.tracker.reset(url);
                    if let Some(map) = parsed.as_object_mut() {
                        map.insert("success".into(), json!(true));
                    }
                    parsed
                }
                Err(e) => {
                    // A reachable endpoint with a broken payload is not a
                    // transport failure; no backoff.
                    warn!("fetch {url}: JSON parse failed: {e}");
                    json!({"error": "JSON parse failed"})
                }
            },
            Err(e) => {
                self.tracker.record_failure(url, now_ms);
                let next_retry_ms = self.tracker.next_retry_ms(url);
                warn!("fetch {url} failed: {e}");
                let mut result = defer_result(&e.to_string(), next_retry_ms, now_ms);
                if let crate::error::HttpError::Status(code) = e {
                    result["http_status"] = json!(code);
                }
                result
            }
        }
    }
}

fn defer_result(error: &str, next_retry_ms: u64, now_ms: u64) -> Value {
    json!({
        "error": error,
        "shouldDefer": true,
        "nextRetryMs": next_retry_ms,
        "retryInSeconds": next_retry_ms.saturating_sub(now_ms) / 1000,
    })
}
