// ===============================
// src/rest.rs (signed/public REST executor)
// ===============================
//
// Alur signed request:
//   1) cek credentials (tidak pernah disimpan antar panggilan)
//   2) ambil server time (gagal -> ClockUnavailable, tidak pakai jam lokal)
//   3) baca credentials TERKINI lagi, kanonisasi + tanda tangan (signer.rs)
//   4) kirim via HttpTransport, lalu decode: strict dulu, permissive kalau gagal
//
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Instant;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::account::{self, AccountSnapshot, Position};
use crate::clock::ClockSync;
use crate::config::{ClientConfig, Network};
use crate::credentials::{Credentials, CredentialsProvider};
use crate::error::{ClientError, ClientResult};
use crate::metrics;
use crate::models::{
    CodeMessage, ExchangeInfo, Kline, LeverageAck, MarkPrice, OrderResult, PositionMode, ServerTime,
    SymbolMetadata, Ticker24h,
};
use crate::signer::{QueryParams, SignedQuery};
use crate::transport::{HttpRequest, HttpResponse, HttpTransport, Method, ReqwestTransport};

/// Account versions, tried in this order until one succeeds.
pub const ACCOUNT_ENDPOINTS: [(&str, &str); 3] = [
    ("v2", "/fapi/v2/account"),
    ("v1", "/fapi/v1/account"),
    ("v3", "/fapi/v3/balance"),
];

pub const DEFAULT_KLINE_LIMIT: u32 = 100;

// ---------------------------------------------------------------------------
// Two-tier decoding
// ---------------------------------------------------------------------------

/// Target shape of a REST response. `recover` is the permissive second pass,
/// only implemented for types whose payload is known to drift.
pub trait FromResponse: DeserializeOwned + Send + 'static {
    fn recover(_raw: &Value) -> Option<Self> {
        None
    }
}

macro_rules! strict_only {
    ($($t:ty),* $(,)?) => { $(impl FromResponse for $t {})* };
}

strict_only!(
    Value,
    ServerTime,
    ExchangeInfo,
    MarkPrice,
    Ticker24h,
    Vec<Kline>,
    OrderResult,
    Vec<OrderResult>,
    CodeMessage,
    LeverageAck,
    PositionMode,
);

impl FromResponse for AccountSnapshot {
    fn recover(raw: &Value) -> Option<Self> {
        account::normalize(raw)
    }
}

impl FromResponse for Vec<Position> {
    fn recover(raw: &Value) -> Option<Self> {
        raw.is_array().then(|| account::normalize_positions(raw))
    }
}

fn api_error_in(v: &Value) -> Option<ClientError> {
    let code = v.get("code")?.as_i64()?;
    let msg = v.get("msg")?.as_str()?;
    (code < 0).then(|| ClientError::from_api(code, msg))
}

/// Turn a raw response into `T` or a classified error.
pub fn decode_response<T: FromResponse>(resp: &HttpResponse) -> ClientResult<T> {
    let parsed: Result<Value, _> = serde_json::from_str(&resp.body);

    if !resp.is_success() {
        return Err(parsed
            .ok()
            .as_ref()
            .and_then(api_error_in)
            .unwrap_or_else(|| ClientError::Http { status: resp.status, body: resp.body.clone() }));
    }

    let raw = parsed?;
    if let Some(e) = api_error_in(&raw) {
        return Err(e);
    }

    match serde_json::from_value::<T>(raw.clone()) {
        Ok(v) => Ok(v),
        Err(strict) => match T::recover(&raw) {
            Some(v) => {
                debug!(error = %strict, "strict decode failed, recovered permissively");
                Ok(v)
            }
            None => Err(ClientError::Decode(strict.to_string())),
        },
    }
}

fn parse_ipv4(body: &str) -> Option<String> {
    body.trim().parse::<Ipv4Addr>().ok().map(|ip| ip.to_string())
}

fn outcome_label(r: &ClientResult<impl Sized>) -> &'static str {
    match r {
        Ok(_) => "ok",
        Err(ClientError::Signature { .. }) => "signature",
        Err(ClientError::Api { .. }) => "api",
        Err(ClientError::Http { .. }) => "http",
        Err(ClientError::Decode(_)) => "decode",
        Err(ClientError::Transport { timed_out: true, .. }) => "timeout",
        Err(ClientError::Transport { .. }) => "transport",
        Err(_) => "other",
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Order lookup key: exchange id or the client id it was placed with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderRef {
    Id(i64),
    ClientId(String),
}

impl OrderRef {
    fn apply(&self, params: QueryParams) -> QueryParams {
        match self {
            OrderRef::Id(id) => params.with("orderId", id),
            OrderRef::ClientId(cid) => params.with("origClientOrderId", cid),
        }
    }
}

/// Outcome of the "test connection" probe.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionReport {
    Ok {
        network: Network,
        server_time: i64,
        wallet_balance: String,
    },
    /// -1022: key/secret wrong, IP not allow-listed, or futures not enabled.
    /// `public_ip` is what the exchange sees, for checking the allow-list.
    SignatureRejected { msg: String, public_ip: Option<String> },
    AccountFailed(String),
    Unreachable(String),
}

pub struct RestClient {
    transport: Arc<dyn HttpTransport>,
    credentials: Arc<dyn CredentialsProvider>,
    config: ClientConfig,
    clock: ClockSync,
}

impl RestClient {
    pub fn new(config: ClientConfig, credentials: Arc<dyn CredentialsProvider>) -> ClientResult<Self> {
        let transport: Arc<dyn HttpTransport> = Arc::new(ReqwestTransport::new(config.request_timeout)?);
        Ok(Self::with_transport(config, credentials, transport))
    }

    pub fn with_transport(
        config: ClientConfig,
        credentials: Arc<dyn CredentialsProvider>,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        let clock = ClockSync::new(transport.clone());
        Self { transport, credentials, config, clock }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn clock(&self) -> &ClockSync {
        &self.clock
    }

    pub fn current_credentials(&self) -> Credentials {
        self.credentials.current()
    }

    pub fn network(&self) -> Network {
        Network::from_testnet_flag(self.credentials.current().use_testnet)
    }

    /// REST base for the network the current credentials point at.
    pub fn rest_base(&self) -> String {
        self.config.endpoints.rest_base(self.credentials.current().use_testnet).to_string()
    }

    pub fn ws_base(&self) -> String {
        self.config.endpoints.ws_base(self.credentials.current().use_testnet).to_string()
    }

    pub async fn signed_request<T: FromResponse>(
        &self,
        method: Method,
        path: &str,
        params: QueryParams,
    ) -> ClientResult<T> {
        let creds = self.credentials.current();
        if !creds.is_complete() {
            return Err(ClientError::MissingCredentials);
        }
        let ts = self
            .clock
            .fetch_server_time(self.config.endpoints.rest_base(creds.use_testnet), Some(&creds.api_key))
            .await?;

        // baca ulang: rotasi selama request time harus ikut terpakai
        let creds = self.credentials.current();
        if !creds.is_complete() {
            return Err(ClientError::MissingCredentials);
        }
        let base = self.config.endpoints.rest_base(creds.use_testnet);
        let signed = SignedQuery::build(&creds.secret_key, params, ts, Some(self.config.recv_window_ms));

        let req = HttpRequest {
            method,
            url: format!("{base}{path}"),
            params: signed.to_wire(),
            api_key: Some(creds.api_key),
        };
        self.execute(path, req).await
    }

    pub async fn public_request<T: FromResponse>(
        &self,
        method: Method,
        path: &str,
        params: QueryParams,
    ) -> ClientResult<T> {
        let creds = self.credentials.current();
        let base = self.config.endpoints.rest_base(creds.use_testnet);
        let req = HttpRequest {
            method,
            url: format!("{base}{path}"),
            params: params.to_query(),
            api_key: Some(creds.api_key).filter(|k| !k.is_empty()),
        };
        self.execute(path, req).await
    }

    async fn execute<T: FromResponse>(&self, path: &str, req: HttpRequest) -> ClientResult<T> {
        debug!(method = %req.method, %path, "rest request");
        let t0 = Instant::now();
        let result = match self.transport.send(req).await {
            Ok(resp) => decode_response::<T>(&resp),
            Err(e) => Err(e),
        };
        metrics::REST_LATENCY.observe(t0.elapsed().as_secs_f64() * 1000.0);

        let outcome = outcome_label(&result);
        metrics::REST_REQUESTS.with_label_values(&[path, outcome]).inc();
        if let Err(e) = &result {
            if e.is_signature() {
                metrics::SIGNATURE_ERRORS.inc();
            }
            warn!(%path, outcome, error = %e, "rest request failed");
        }
        result
    }

    // ---------------- account ----------------

    /// v2 account -> v1 account -> v3 balance. First success wins.
    pub async fn account_info(&self) -> ClientResult<AccountSnapshot> {
        let mut attempted = Vec::with_capacity(ACCOUNT_ENDPOINTS.len());
        let mut last = None;

        for (idx, (version, path)) in ACCOUNT_ENDPOINTS.iter().enumerate() {
            attempted.push(version.to_string());
            match self.signed_request::<AccountSnapshot>(Method::Get, path, QueryParams::new()).await {
                Ok(snapshot) => {
                    if idx > 0 {
                        metrics::ACCOUNT_FALLBACKS.with_label_values(&[version]).inc();
                        info!(%version, "account served by fallback endpoint");
                    }
                    return Ok(snapshot);
                }
                Err(ClientError::MissingCredentials) => return Err(ClientError::MissingCredentials),
                Err(e) => {
                    warn!(%version, error = %e, "account endpoint failed, trying next");
                    last = Some(e);
                }
            }
        }

        Err(ClientError::AllEndpointsFailed {
            attempted,
            last: Box::new(last.unwrap_or_else(|| ClientError::Decode("no account endpoint configured".into()))),
        })
    }

    pub async fn positions(&self) -> ClientResult<Vec<Position>> {
        self.signed_request(Method::Get, "/fapi/v2/positionRisk", QueryParams::new()).await
    }

    pub async fn active_positions(&self) -> ClientResult<Vec<Position>> {
        Ok(self.positions().await?.into_iter().filter(Position::is_open).collect())
    }

    pub async fn open_orders(&self, symbol: Option<&str>) -> ClientResult<Vec<OrderResult>> {
        let params = QueryParams::new().with_opt("symbol", symbol);
        self.signed_request(Method::Get, "/fapi/v1/openOrders", params).await
    }

    pub async fn query_order(&self, symbol: &str, order: &OrderRef) -> ClientResult<OrderResult> {
        let params = order.apply(QueryParams::new().with("symbol", symbol));
        self.signed_request(Method::Get, "/fapi/v1/order", params).await
    }

    pub async fn cancel_order(&self, symbol: &str, order: &OrderRef) -> ClientResult<OrderResult> {
        let params = order.apply(QueryParams::new().with("symbol", symbol));
        self.signed_request(Method::Delete, "/fapi/v1/order", params).await
    }

    pub async fn position_mode(&self) -> ClientResult<PositionMode> {
        self.signed_request(Method::Get, "/fapi/v1/positionSide/dual", QueryParams::new()).await
    }

    pub async fn set_position_mode(&self, dual_side: bool) -> ClientResult<CodeMessage> {
        let params = QueryParams::new().with("dualSidePosition", dual_side);
        self.signed_request(Method::Post, "/fapi/v1/positionSide/dual", params).await
    }

    // ---------------- market data ----------------

    pub async fn server_time(&self) -> ClientResult<i64> {
        let creds = self.credentials.current();
        let base = self.config.endpoints.rest_base(creds.use_testnet);
        self.clock.fetch_server_time(base, Some(&creds.api_key)).await
    }

    pub async fn exchange_info(&self) -> ClientResult<ExchangeInfo> {
        self.public_request(Method::Get, "/fapi/v1/exchangeInfo", QueryParams::new()).await
    }

    /// Exchange info reduced to symbols currently `TRADING`.
    pub async fn trading_symbols(&self) -> ClientResult<Vec<SymbolMetadata>> {
        let info = self.exchange_info().await?;
        Ok(info.symbols.into_iter().filter(SymbolMetadata::is_trading).collect())
    }

    pub async fn mark_price(&self, symbol: &str) -> ClientResult<MarkPrice> {
        let params = QueryParams::new().with("symbol", symbol);
        self.public_request(Method::Get, "/fapi/v1/premiumIndex", params).await
    }

    pub async fn klines(&self, symbol: &str, interval: &str, limit: Option<u32>) -> ClientResult<Vec<Kline>> {
        let params = QueryParams::new()
            .with("symbol", symbol)
            .with("interval", interval)
            .with("limit", limit.unwrap_or(DEFAULT_KLINE_LIMIT));
        self.public_request(Method::Get, "/fapi/v1/klines", params).await
    }

    pub async fn ticker_24h(&self, symbol: &str) -> ClientResult<Ticker24h> {
        let params = QueryParams::new().with("symbol", symbol);
        self.public_request(Method::Get, "/fapi/v1/ticker/24hr", params).await
    }

    // ---------------- diagnostics ----------------

    /// Public IPv4 of this host. Services are tried in order; the first
    /// answer that parses as an IPv4 address wins.
    pub async fn public_ip(&self) -> Option<String> {
        for service in &self.config.ip_services {
            let req = HttpRequest { method: Method::Get, url: service.clone(), params: String::new(), api_key: None };
            match self.transport.send(req).await {
                Ok(resp) if resp.is_success() => match parse_ipv4(&resp.body) {
                    Some(ip) => {
                        debug!(%service, %ip, "public ip resolved");
                        return Some(ip);
                    }
                    None => debug!(%service, body = %resp.body.trim(), "not an ipv4 answer, trying next"),
                },
                Ok(resp) => debug!(%service, status = resp.status, "ip service failed, trying next"),
                Err(e) => debug!(%service, error = %e, "ip service failed, trying next"),
            }
        }
        warn!(tried = self.config.ip_services.len(), "public ip lookup failed on every service");
        None
    }

    pub async fn test_connection(&self) -> ConnectionReport {
        let network = self.network();
        let server_time = match self.server_time().await {
            Ok(t) => t,
            Err(e) => return ConnectionReport::Unreachable(e.to_string()),
        };
        match self.account_info().await {
            Ok(snap) => {
                info!(network = network.as_str(), "connection test ok");
                ConnectionReport::Ok { network, server_time, wallet_balance: snap.total_wallet_balance }
            }
            Err(e) if e.is_signature() => {
                let public_ip = self.public_ip().await;
                warn!(
                    public_ip = public_ip.as_deref().unwrap_or("unknown"),
                    "signature rejected: check key/secret, IP allow-list and futures permission"
                );
                ConnectionReport::SignatureRejected { msg: e.to_string(), public_ip }
            }
            Err(e) if e.is_transport() => ConnectionReport::Unreachable(e.to_string()),
            Err(e) => ConnectionReport::AccountFailed(e.to_string()),
        }
    }
}
