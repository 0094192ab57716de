// ===============================
// src/metrics.rs
// ===============================
use once_cell::sync::Lazy;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry,
    TextEncoder,
};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;
use tracing::{error, info};

// Single custom registry (we register everything here)
pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

// -------- REST --------
pub static REST_REQUESTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("rest_requests_total", "REST calls by endpoint and outcome"),
        &["endpoint", "outcome"],
    )
    .unwrap()
});

// Request -> decoded response (milliseconds)
pub static REST_LATENCY: Lazy<Histogram> = Lazy::new(|| {
    Histogram::with_opts(
        HistogramOpts::new("rest_latency_ms", "REST round trip incl. decode (ms)")
            .buckets(vec![25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 30000.0]),
    )
    .unwrap()
});

pub static SIGNATURE_ERRORS: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("signature_errors_total", "-1022 responses").unwrap());

pub static CLOCK_FAILURES: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("clock_sync_failures_total", "server time fetch failures").unwrap());

pub static ACCOUNT_FALLBACKS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("account_fallbacks_total", "account served by a fallback version"),
        &["version"],
    )
    .unwrap()
});

// -------- Orders --------
pub static ORDERS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("orders_total", "open-position orders by type and outcome"),
        &["type", "outcome"],
    )
    .unwrap()
});

pub static TPSL_LEGS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(Opts::new("tpsl_legs_total", "TP/SL legs by leg and outcome"), &["leg", "outcome"])
        .unwrap()
});

// -------- Price stream --------
pub static WS_CONNECTED: Lazy<IntGauge> =
    Lazy::new(|| IntGauge::new("price_ws_connected", "1 if the mark-price stream is connected").unwrap());

pub static WS_RECONNECTS: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("price_ws_reconnects_total", "mark-price stream resubscribes").unwrap());

pub static PRICE_TICKS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(Opts::new("price_ticks_total", "price ticks per symbol"), &["symbol"]).unwrap()
});

pub static PRICE_DROPPED: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("price_frames_dropped_total", "frames without a usable price").unwrap());

pub static PRICE_OVERFLOW: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("price_ticks_overflow_total", "ticks dropped because the dispatcher queue was full").unwrap()
});

pub static CALLBACK_PANICS: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("price_callback_panics_total", "price callbacks that panicked").unwrap());

// ---- Config visibility ----
pub static CONFIG_NETWORK: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(Opts::new("config_network", "active network (label: network)"), &["network"]).unwrap()
});

pub fn init() {
    // Register all metrics to the custom registry; double init is harmless
    for m in [
        REGISTRY.register(Box::new(REST_REQUESTS.clone())),
        REGISTRY.register(Box::new(REST_LATENCY.clone())),
        REGISTRY.register(Box::new(SIGNATURE_ERRORS.clone())),
        REGISTRY.register(Box::new(CLOCK_FAILURES.clone())),
        REGISTRY.register(Box::new(ACCOUNT_FALLBACKS.clone())),
        REGISTRY.register(Box::new(ORDERS.clone())),
        REGISTRY.register(Box::new(TPSL_LEGS.clone())),
        REGISTRY.register(Box::new(WS_CONNECTED.clone())),
        REGISTRY.register(Box::new(WS_RECONNECTS.clone())),
        REGISTRY.register(Box::new(PRICE_TICKS.clone())),
        REGISTRY.register(Box::new(PRICE_DROPPED.clone())),
        REGISTRY.register(Box::new(PRICE_OVERFLOW.clone())),
        REGISTRY.register(Box::new(CALLBACK_PANICS.clone())),
        REGISTRY.register(Box::new(CONFIG_NETWORK.clone())),
    ] {
        let _ = m;
    }
}

// Encode all metrics in Prometheus text format
pub fn encode_metrics() -> Vec<u8> {
    let encoder = TextEncoder::new();
    let families = REGISTRY.gather();
    let mut buf = Vec::new();
    if encoder.encode(&families, &mut buf).is_err() || buf.is_empty() {
        buf.extend_from_slice(b"# no metrics\n");
    }
    buf
}

// Serve one HTTP request (GET / or /metrics), tiny HTTP 1.1 responder
fn handle_client(mut stream: TcpStream) {
    // Read a bit to consume headers (no full parse)
    let mut _req_buf = [0u8; 1024];
    let _ = stream.read(&mut _req_buf);

    let body = encode_metrics();
    let header = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );

    let _ = stream.write_all(header.as_bytes());
    let _ = stream.write_all(&body);
    let _ = stream.flush();
}

// Metrics server on a dedicated OS thread
pub fn serve_metrics(port: u16) {
    thread::spawn(move || {
        let addr = format!("0.0.0.0:{port}");
        let listener = match TcpListener::bind(&addr) {
            Ok(l) => l,
            Err(e) => {
                error!(%addr, error = %e, "metrics bind failed, metrics disabled");
                return;
            }
        };
        info!("metrics listening on http://{addr}/ (and /metrics)");

        for conn in listener.incoming() {
            match conn {
                Ok(stream) => handle_client(stream),
                Err(e) => error!(error = %e, "metrics accept error"),
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registered_metrics_are_encoded() {
        init();
        init();
        SIGNATURE_ERRORS.inc();
        let text = String::from_utf8(encode_metrics()).expect("utf8");
        assert!(text.contains("signature_errors_total"));
    }
}
