// ===============================
// tests/common/mod.rs
// ===============================
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;

use fapi_trader::config::{ClientConfig, Endpoints};
use fapi_trader::credentials::{Credentials, SharedCredentials};
use fapi_trader::error::{ClientError, ClientResult};
use fapi_trader::rest::RestClient;
use fapi_trader::stream::symbol_from_stream_url;
use fapi_trader::transport::{HttpRequest, HttpResponse, HttpTransport, Method};

pub const API_KEY: &str = "test-api-key";
pub const SECRET: &str = "test-secret";
pub const SERVER_TIME: i64 = 1_700_000_000_000;
pub const REST_BASE: &str = "http://stub.local";

// ---------------------------------------------------------------------------
// Scripted HTTP transport
// ---------------------------------------------------------------------------

/// Routes `(method, path)` to queued responses. The last queued response is
/// repeated. `/fapi/v1/time` answers `SERVER_TIME` unless scripted.
#[derive(Default)]
pub struct StubTransport {
    routes: Mutex<HashMap<(Method, String), VecDeque<ClientResult<HttpResponse>>>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl StubTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn respond(&self, method: Method, path: &str, status: u16, body: Value) {
        self.push(method, path, Ok(HttpResponse { status, body: body.to_string() }));
    }

    /// Raw (non-JSON) body.
    pub fn respond_text(&self, method: Method, path: &str, status: u16, body: &str) {
        self.push(method, path, Ok(HttpResponse { status, body: body.to_string() }));
    }

    pub fn fail(&self, method: Method, path: &str, err: ClientError) {
        self.push(method, path, Err(err));
    }

    fn push(&self, method: Method, path: &str, r: ClientResult<HttpResponse>) {
        self.routes.lock().unwrap().entry((method, path.to_string())).or_default().push_back(r);
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Requests excluding the server-time calls.
    pub fn api_requests(&self) -> Vec<HttpRequest> {
        self.requests().into_iter().filter(|r| r.path() != "/fapi/v1/time").collect()
    }

    pub fn count(&self, path: &str) -> usize {
        self.requests().iter().filter(|r| r.path() == path).count()
    }
}

#[async_trait]
impl HttpTransport for StubTransport {
    async fn send(&self, req: HttpRequest) -> ClientResult<HttpResponse> {
        let key = (req.method, req.path().to_string());
        self.requests.lock().unwrap().push(req);

        let mut routes = self.routes.lock().unwrap();
        match routes.get_mut(&key) {
            Some(q) if q.len() > 1 => q.pop_front().unwrap(),
            Some(q) => q.front().cloned().unwrap(),
            None if key.1 == "/fapi/v1/time" => Ok(HttpResponse {
                status: 200,
                body: json!({ "serverTime": SERVER_TIME }).to_string(),
            }),
            None => Ok(HttpResponse {
                status: 404,
                body: format!("no stub for {} {}", key.0, key.1),
            }),
        }
    }
}

pub fn credentials() -> Arc<SharedCredentials> {
    Arc::new(SharedCredentials::new(Credentials::new(API_KEY, SECRET, true)))
}

pub fn client_with(stub: Arc<StubTransport>, creds: Arc<SharedCredentials>) -> RestClient {
    let config = ClientConfig { endpoints: Endpoints::single(REST_BASE, "ws://unused"), ..Default::default() };
    RestClient::with_transport(config, creds, stub)
}

pub fn client(stub: Arc<StubTransport>) -> RestClient {
    client_with(stub, credentials())
}

/// Split `k=v&...` into pairs, preserving order.
pub fn query_pairs(q: &str) -> Vec<(String, String)> {
    q.split('&')
        .filter(|p| !p.is_empty())
        .map(|p| match p.split_once('=') {
            Some((k, v)) => (k.to_string(), v.to_string()),
            None => (p.to_string(), String::new()),
        })
        .collect()
}

pub fn order_json(symbol: &str, side: &str, order_type: &str, order_id: i64) -> Value {
    json!({
        "orderId": order_id,
        "symbol": symbol,
        "status": "NEW",
        "clientOrderId": format!("cid-{order_id}"),
        "price": "0",
        "avgPrice": "0.00",
        "origQty": "0.010",
        "executedQty": "0",
        "timeInForce": "GTC",
        "type": order_type,
        "reduceOnly": false,
        "closePosition": false,
        "side": side,
        "positionSide": "BOTH",
        "stopPrice": "0",
        "workingType": "CONTRACT_PRICE",
        "updateTime": 1_700_000_000_123i64
    })
}

// ---------------------------------------------------------------------------
// Local mark-price WebSocket server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    Opened(String),
    Closed { path: String, code: Option<u16> },
}

pub struct WsServer {
    pub addr: SocketAddr,
    pub events: mpsc::UnboundedReceiver<ServerEvent>,
}

impl WsServer {
    pub fn ws_base(&self) -> String {
        format!("ws://{}", self.addr)
    }
}

/// Every connection gets one junk frame and one price frame for the symbol in
/// its path. With `drop_after_frame` the socket is then dropped without a
/// close handshake (a receive failure for the client); otherwise it stays
/// open until the client closes.
pub async fn spawn_ws_server(price: &'static str, drop_after_frame: bool) -> WsServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let (tx, events) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let tx = tx.clone();
            tokio::spawn(async move {
                let captured = Arc::new(Mutex::new(String::new()));
                let c2 = captured.clone();
                let cb = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                    *c2.lock().unwrap() = req.uri().path().to_string();
                    Ok(resp)
                };
                let Ok(mut ws) = tokio_tungstenite::accept_hdr_async(stream, cb).await else {
                    return;
                };
                let path = captured.lock().unwrap().clone();
                let _ = tx.send(ServerEvent::Opened(path.clone()));

                let symbol = symbol_from_stream_url(&path).unwrap_or_default();
                let _ = ws.send(Message::Text(json!({"result": null, "id": 1}).to_string())).await;
                let frame = json!({"e": "markPriceUpdate", "s": symbol, "p": price});
                let _ = ws.send(Message::Text(frame.to_string())).await;

                if drop_after_frame {
                    tokio::time::sleep(std::time::Duration::from_millis(30)).await;
                    drop(ws);
                    let _ = tx.send(ServerEvent::Closed { path, code: None });
                    return;
                }

                let code = loop {
                    match ws.next().await {
                        Some(Ok(Message::Close(f))) => break f.map(|f| u16::from(f.code)),
                        Some(Ok(_)) => continue,
                        _ => break None,
                    }
                };
                let _ = tx.send(ServerEvent::Closed { path, code });
            });
        }
    });

    WsServer { addr, events }
}
