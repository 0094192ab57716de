// ===============================
// src/clock.rs
// ===============================
//
// Server time for signing. Fetched fresh before every signed request; there
// is no cache and no fallback to the local clock. If the time call fails, the
// signed call fails with `ClockUnavailable`.
//
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use crate::error::{ClientError, ClientResult};
use crate::metrics;
use crate::models::ServerTime;
use crate::transport::{HttpRequest, HttpTransport, Method};

pub const TIME_PATH: &str = "/fapi/v1/time";

// Skew above this gets a warning (recvWindow default is 5000 ms)
const SKEW_WARN_MS: i64 = 1000;

pub struct ClockSync {
    transport: Arc<dyn HttpTransport>,
    // observed (server - local); i64::MIN = never measured
    last_offset_ms: AtomicI64,
}

impl ClockSync {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self { transport, last_offset_ms: AtomicI64::new(i64::MIN) }
    }

    /// `GET /fapi/v1/time` on `rest_base`. Every failure mode maps to `ClockUnavailable`.
    pub async fn fetch_server_time(&self, rest_base: &str, api_key: Option<&str>) -> ClientResult<i64> {
        match self.try_fetch(rest_base, api_key).await {
            Ok(ts) => Ok(ts),
            Err(e) => {
                metrics::CLOCK_FAILURES.inc();
                warn!(error = %e, "server time unavailable");
                Err(ClientError::ClockUnavailable(e.to_string()))
            }
        }
    }

    async fn try_fetch(&self, rest_base: &str, api_key: Option<&str>) -> ClientResult<i64> {
        let req = HttpRequest {
            method: Method::Get,
            url: format!("{rest_base}{TIME_PATH}"),
            params: String::new(),
            api_key: api_key.filter(|k| !k.is_empty()).map(str::to_string),
        };
        let resp = self.transport.send(req).await?;
        if !resp.is_success() {
            return Err(ClientError::Http { status: resp.status, body: resp.body });
        }
        let t: ServerTime = serde_json::from_str(&resp.body)?;

        let offset = t.server_time - Utc::now().timestamp_millis();
        self.last_offset_ms.store(offset, Ordering::Relaxed);
        if offset.abs() > SKEW_WARN_MS {
            warn!(offset_ms = offset, "local clock skew vs exchange");
        } else {
            debug!(server_time = t.server_time, offset_ms = offset, "server time");
        }
        Ok(t.server_time)
    }

    /// Last measured server-minus-local offset (diagnostics only, never used for signing).
    pub fn last_offset_ms(&self) -> Option<i64> {
        match self.last_offset_ms.load(Ordering::Relaxed) {
            i64::MIN => None,
            v => Some(v),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::HttpResponse;
    use async_trait::async_trait;

    struct Fixed(ClientResult<HttpResponse>);

    #[async_trait]
    impl HttpTransport for Fixed {
        async fn send(&self, req: HttpRequest) -> ClientResult<HttpResponse> {
            assert_eq!(req.path(), TIME_PATH);
            self.0.clone()
        }
    }

    #[tokio::test]
    async fn returns_server_time_and_records_offset() {
        let now = Utc::now().timestamp_millis();
        let clock = ClockSync::new(Arc::new(Fixed(Ok(HttpResponse {
            status: 200,
            body: format!("{{\"serverTime\":{}}}", now + 2500),
        }))));
        assert_eq!(clock.last_offset_ms(), None);
        let ts = clock.fetch_server_time("http://x", None).await.expect("time");
        assert_eq!(ts, now + 2500);
        let off = clock.last_offset_ms().expect("offset");
        assert!((2000..=2600).contains(&off), "offset {off}");
    }

    #[tokio::test]
    async fn failures_are_clock_unavailable() {
        let down = ClockSync::new(Arc::new(Fixed(Err(ClientError::Transport { message: "refused".into(), timed_out: false }))));
        assert!(matches!(down.fetch_server_time("http://x", None).await, Err(ClientError::ClockUnavailable(_))));

        let garbage = ClockSync::new(Arc::new(Fixed(Ok(HttpResponse { status: 200, body: "<html>".into() }))));
        assert!(matches!(garbage.fetch_server_time("http://x", None).await, Err(ClientError::ClockUnavailable(_))));

        let http = ClockSync::new(Arc::new(Fixed(Ok(HttpResponse { status: 503, body: String::new() }))));
        assert!(matches!(http.fetch_server_time("http://x", None).await, Err(ClientError::ClockUnavailable(_))));
    }
}
