// ===============================
// src/stream.rs (mark-price stream)
// ===============================
//
// Satu PriceStream = maksimal satu koneksi WS aktif.
//   subscribe(sym) : hentikan koneksi lama (tunggu sampai selesai), baru buka yang baru
//   gagal baca     : tunggu reconnect_delay (default 3s), lalu subscribe ulang ke
//                    simbol yang diambil dari URL koneksi itu sendiri
//   close()        : close frame 1000, idempotent
//
// Frame tidak pernah diproses callback di task pembaca: tick dikirim lewat mpsc
// (bounded, penuh -> tick dibuang) ke task dispatcher yang memanggil callback +
// broadcast. Callback yang panic di-log, dispatcher tetap jalan.
//
use std::borrow::Cow;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, trace, warn};
use url::Url;

use crate::config::Endpoints;
use crate::credentials::CredentialsProvider;
use crate::error::{ClientError, ClientResult};
use crate::metrics;

pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);
const STOP_TIMEOUT: Duration = Duration::from_secs(2);
const TICK_BROADCAST_CAPACITY: usize = 1024;
const TICK_QUEUE_CAPACITY: usize = 4096;

pub type PriceCallback = Arc<dyn Fn(&str, f64) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceTick {
    pub symbol: String,
    pub price: f64,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Disconnected,
    Connecting,
    Streaming,
    Reconnecting,
}

/// `<ws_base>/ws/<symbol lowercase>@markPrice@1s`
pub fn stream_url(ws_base: &str, symbol: &str) -> String {
    format!("{}/ws/{}@markPrice@1s", ws_base.trim_end_matches('/'), symbol.trim().to_lowercase())
}

/// Symbol between the last `/ws/` and the next `@`, upper-cased. The base
/// itself may carry a path (proxies), so only the final `/ws/` counts.
pub fn symbol_from_stream_url(url: &str) -> Option<String> {
    let url = url.split(|c: char| c == '?' || c == '#').next().unwrap_or(url);
    let start = url.rfind("/ws/")? + 4;
    let rest = &url[start..];
    let end = rest.find('@')?;
    let sym = &rest[..end];
    (!sym.is_empty()).then(|| sym.to_ascii_uppercase())
}

/// `(symbol, price)` from one frame. Price keys in order: "p", "markPrice",
/// "c" as strings, then "p", "markPrice" as numbers. Non-positive -> None.
pub fn parse_price_message(text: &str) -> Option<(String, f64)> {
    let v: Value = serde_json::from_str(text).ok()?;
    let symbol = v.get("s")?.as_str()?.to_string();

    let as_str = |k: &str| v.get(k).and_then(Value::as_str).map(|s| s.trim().parse::<f64>().unwrap_or(0.0));
    let as_num = |k: &str| v.get(k).and_then(Value::as_f64);

    let price = as_str("p")
        .or_else(|| as_str("markPrice"))
        .or_else(|| as_str("c"))
        .or_else(|| as_num("p"))
        .or_else(|| as_num("markPrice"))?;

    (price.is_finite() && price > 0.0).then_some((symbol, price))
}

struct ActiveStream {
    generation: u64,
    url: String,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

struct Dispatch {
    callback: RwLock<Option<PriceCallback>>,
    ticks: broadcast::Sender<PriceTick>,
}

struct Inner {
    endpoints: Endpoints,
    credentials: Arc<dyn CredentialsProvider>,
    reconnect_delay: Duration,
    active: Mutex<Option<ActiveStream>>,
    generation: AtomicU64,
    state_tx: watch::Sender<StreamState>,
    tick_tx: mpsc::Sender<PriceTick>,
}

impl Inner {
    fn stream_url_for(&self, symbol: &str) -> String {
        let testnet = self.credentials.current().use_testnet;
        stream_url(self.endpoints.ws_base(testnet), symbol)
    }

    fn set_state(&self, s: StreamState) {
        self.state_tx.send_replace(s);
    }

    fn handle_frame(&self, text: &str) {
        match parse_price_message(text) {
            Some((symbol, price)) => {
                metrics::PRICE_TICKS.with_label_values(&[&symbol]).inc();
                let tick = PriceTick { symbol, price, received_at: Utc::now() };
                if let Err(mpsc::error::TrySendError::Full(t)) = self.tick_tx.try_send(tick) {
                    // dispatcher tertinggal: buang tick, jangan tahan pembaca
                    metrics::PRICE_OVERFLOW.inc();
                    debug!(symbol = %t.symbol, "tick queue full, dropping tick");
                }
            }
            None => {
                metrics::PRICE_DROPPED.inc();
                trace!(frame = %text, "ignored frame");
            }
        }
    }

    /// After a failure: if this generation still owns the handle, rebuild its
    /// URL from the symbol in the handle's own URL. None = superseded or closed.
    async fn resubscribe_target(&self, generation: u64, shutdown: &mut oneshot::Receiver<()>) -> Option<String> {
        let mut guard = tokio::select! {
            _ = shutdown => return None,
            g = self.active.lock() => g,
        };
        let active = guard.as_mut()?;
        if active.generation != generation {
            debug!(generation, current = active.generation, "stale connection, not resubscribing");
            return None;
        }
        let symbol = symbol_from_stream_url(&active.url)?;
        let url = self.stream_url_for(&symbol);
        active.url = url.clone();
        info!(%symbol, "resubscribing price stream");
        Some(url)
    }
}

async fn stop(prev: ActiveStream) {
    let ActiveStream { shutdown, mut task, url, .. } = prev;
    let _ = shutdown.send(());
    if timeout(STOP_TIMEOUT, &mut task).await.is_err() {
        warn!(%url, "stream task did not stop in time, aborting");
        task.abort();
    }
}

async fn connection_loop(inner: Arc<Inner>, generation: u64, mut url: String, mut shutdown: oneshot::Receiver<()>) {
    loop {
        inner.set_state(StreamState::Connecting);
        info!(%url, "connecting mark-price stream");

        let connected = tokio::select! {
            _ = &mut shutdown => return,
            r = connect_async(url.as_str()) => r,
        };

        match connected {
            Ok((mut ws, _resp)) => {
                inner.set_state(StreamState::Streaming);
                metrics::WS_CONNECTED.set(1);

                let reason = loop {
                    tokio::select! {
                        _ = &mut shutdown => {
                            let frame = CloseFrame { code: CloseCode::Normal, reason: Cow::Borrowed("") };
                            let _ = timeout(STOP_TIMEOUT, ws.close(Some(frame))).await;
                            metrics::WS_CONNECTED.set(0);
                            debug!(%url, "stream closed by owner");
                            return;
                        }
                        frame = ws.next() => match frame {
                            Some(Ok(Message::Text(t))) => inner.handle_frame(&t),
                            Some(Ok(Message::Binary(b))) => match std::str::from_utf8(&b) {
                                Ok(t) => inner.handle_frame(t),
                                Err(_) => metrics::PRICE_DROPPED.inc(),
                            },
                            Some(Ok(Message::Close(f))) => break format!("closed by server: {f:?}"),
                            Some(Ok(_)) => {}
                            Some(Err(e)) => break e.to_string(),
                            None => break "stream ended".to_string(),
                        }
                    }
                };
                metrics::WS_CONNECTED.set(0);
                warn!(%url, %reason, "price stream receive failed");
            }
            Err(e) => warn!(%url, error = %e, "price stream connect failed"),
        }

        inner.set_state(StreamState::Reconnecting);
        tokio::select! {
            _ = &mut shutdown => return,
            _ = sleep(inner.reconnect_delay) => {}
        }

        match inner.resubscribe_target(generation, &mut shutdown).await {
            Some(next) => {
                metrics::WS_RECONNECTS.inc();
                url = next;
            }
            None => return,
        }
    }
}

async fn dispatch_loop(mut rx: mpsc::Receiver<PriceTick>, dispatch: Arc<Dispatch>) {
    while let Some(tick) = rx.recv().await {
        let cb = dispatch.callback.read().ok().and_then(|g| g.clone());
        if let Some(cb) = cb {
            // callback yang panic tidak boleh mematikan dispatcher
            if catch_unwind(AssertUnwindSafe(|| cb(&tick.symbol, tick.price))).is_err() {
                metrics::CALLBACK_PANICS.inc();
                error!(symbol = %tick.symbol, price = tick.price, "price callback panicked");
            }
        }
        let _ = dispatch.ticks.send(tick);
    }
}

/// Owner of the (single) live mark-price connection. Must be created inside a
/// tokio runtime.
pub struct PriceStream {
    inner: Arc<Inner>,
    dispatch: Arc<Dispatch>,
}

impl PriceStream {
    pub fn new(endpoints: Endpoints, credentials: Arc<dyn CredentialsProvider>, reconnect_delay: Duration) -> Self {
        let (state_tx, _) = watch::channel(StreamState::Disconnected);
        let (tick_tx, tick_rx) = mpsc::channel(TICK_QUEUE_CAPACITY);
        let (ticks, _) = broadcast::channel(TICK_BROADCAST_CAPACITY);

        let dispatch = Arc::new(Dispatch { callback: RwLock::new(None), ticks });
        tokio::spawn(dispatch_loop(tick_rx, dispatch.clone()));

        let inner = Arc::new(Inner {
            endpoints,
            credentials,
            reconnect_delay,
            active: Mutex::new(None),
            generation: AtomicU64::new(0),
            state_tx,
            tick_tx,
        });
        Self { inner, dispatch }
    }

    /// Replace the price callback. Invoked on the dispatcher task, never on the reader.
    pub fn on_price<F>(&self, f: F)
    where
        F: Fn(&str, f64) + Send + Sync + 'static,
    {
        if let Ok(mut g) = self.dispatch.callback.write() {
            *g = Some(Arc::new(f));
        }
    }

    pub fn ticks(&self) -> broadcast::Receiver<PriceTick> {
        self.dispatch.ticks.subscribe()
    }

    pub fn state(&self) -> watch::Receiver<StreamState> {
        self.inner.state_tx.subscribe()
    }

    pub async fn current_symbol(&self) -> Option<String> {
        let guard = self.inner.active.lock().await;
        guard.as_ref().and_then(|a| symbol_from_stream_url(&a.url))
    }

    pub async fn is_active(&self) -> bool {
        self.inner.active.lock().await.is_some()
    }

    /// Stops any live connection (and waits for it) before opening the new one.
    pub async fn subscribe(&self, symbol: &str) -> ClientResult<()> {
        let symbol = symbol.trim();
        if symbol.is_empty() {
            return Err(ClientError::Validation("stream symbol is empty".into()));
        }
        let url = self.inner.stream_url_for(symbol);
        Url::parse(&url)?;

        let mut guard = self.inner.active.lock().await;
        if let Some(prev) = guard.take() {
            debug!(url = %prev.url, "replacing price stream");
            stop(prev).await;
        }

        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (shutdown, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(connection_loop(self.inner.clone(), generation, url.clone(), shutdown_rx));
        info!(%symbol, generation, "price stream subscribed");
        *guard = Some(ActiveStream { generation, url, shutdown, task });
        Ok(())
    }

    /// Normal closure (1000) and clear the handle. Second call is a no-op.
    pub async fn close(&self) {
        let mut guard = self.inner.active.lock().await;
        match guard.take() {
            Some(prev) => {
                stop(prev).await;
                info!("price stream closed");
            }
            None => debug!("price stream already closed"),
        }
        self.inner.set_state(StreamState::Disconnected);
    }
}

impl Drop for PriceStream {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.inner.active.try_lock() {
            if let Some(prev) = guard.take() {
                prev.task.abort();
            }
        }
    }
}
