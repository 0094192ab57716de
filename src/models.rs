// ===============================
// src/models.rs
// ===============================
//
// Wire + domain types for the futures REST API. Decimals stay strings on the
// wire side (Binance sends "0.00000000"); callers convert when they need math.
//
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::{ClientError, ClientResult};
use crate::signer::QueryParams;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionSide {
    Both,
    Long,
    Short,
}

impl PositionSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionSide::Both => "BOTH",
            PositionSide::Long => "LONG",
            PositionSide::Short => "SHORT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    Limit,
    Market,
    Stop,
    StopMarket,
    TakeProfit,
    TakeProfitMarket,
    TrailingStopMarket,
    LimitMaker,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Limit => "LIMIT",
            OrderType::Market => "MARKET",
            OrderType::Stop => "STOP",
            OrderType::StopMarket => "STOP_MARKET",
            OrderType::TakeProfit => "TAKE_PROFIT",
            OrderType::TakeProfitMarket => "TAKE_PROFIT_MARKET",
            OrderType::TrailingStopMarket => "TRAILING_STOP_MARKET",
            OrderType::LimitMaker => "LIMIT_MAKER",
        }
    }

    /// MARKET and the two "_MARKET" stop variants must not carry timeInForce.
    pub fn rejects_time_in_force(&self) -> bool {
        matches!(self, OrderType::Market | OrderType::StopMarket | OrderType::TakeProfitMarket)
    }

    /// Types that get GTC when opening a position.
    pub fn accepts_time_in_force(&self) -> bool {
        matches!(self, OrderType::Limit | OrderType::Stop | OrderType::TakeProfit)
    }

    /// STOP / TAKE_PROFIT need both price and stopPrice.
    pub fn is_stop_limit(&self) -> bool {
        matches!(self, OrderType::Stop | OrderType::TakeProfit)
    }
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OrderType {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(Value::String(s.trim().to_ascii_uppercase()))
            .map_err(|_| ClientError::Validation(format!("unknown order type: {s}")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimeInForce {
    Gtc,
    Ioc,
    Fok,
    Gtx,
    Gtd,
}

impl TimeInForce {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeInForce::Gtc => "GTC",
            TimeInForce::Ioc => "IOC",
            TimeInForce::Fok => "FOK",
            TimeInForce::Gtx => "GTX",
            TimeInForce::Gtd => "GTD",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkingType {
    MarkPrice,
    ContractPrice,
}

impl WorkingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkingType::MarkPrice => "MARK_PRICE",
            WorkingType::ContractPrice => "CONTRACT_PRICE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarginType {
    #[serde(rename = "ISOLATED")]
    Isolated,
    #[serde(rename = "CROSSED")]
    Crossed,
}

impl MarginType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarginType::Isolated => "ISOLATED",
            MarginType::Crossed => "CROSSED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    #[serde(alias = "EXPIRED_IN_MATCH")]
    Expired,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Filled | OrderStatus::Canceled | OrderStatus::Rejected | OrderStatus::Expired)
    }

    /// One-way progression: NEW may go anywhere, PARTIALLY_FILLED only to
    /// FILLED/CANCELED, terminal states nowhere.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        match self {
            OrderStatus::New => next != OrderStatus::New,
            OrderStatus::PartiallyFilled => matches!(next, OrderStatus::Filled | OrderStatus::Canceled),
            _ => false,
        }
    }
}

/// Trailing stop callback bounds, in percent.
pub const MIN_CALLBACK_RATE: f64 = 0.1;
pub const MAX_CALLBACK_RATE: f64 = 10.0;

/// Parameters of a single `POST /fapi/v1/order`.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub position_side: Option<PositionSide>,
    pub order_type: OrderType,
    pub time_in_force: Option<TimeInForce>,
    pub quantity: Option<f64>,
    pub price: Option<f64>,
    pub stop_price: Option<f64>,
    pub reduce_only: Option<bool>,
    pub close_position: Option<bool>,
    pub working_type: Option<WorkingType>,
    pub new_client_order_id: Option<String>,
    pub activation_price: Option<f64>,
    pub callback_rate: Option<f64>,
    pub new_order_resp_type: Option<String>,
}

impl OrderRequest {
    pub fn new(symbol: impl Into<String>, side: OrderSide, order_type: OrderType) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            position_side: None,
            order_type,
            time_in_force: None,
            quantity: None,
            price: None,
            stop_price: None,
            reduce_only: None,
            close_position: None,
            working_type: None,
            new_client_order_id: None,
            activation_price: None,
            callback_rate: None,
            new_order_resp_type: None,
        }
    }

    pub fn market(symbol: impl Into<String>, side: OrderSide, quantity: f64) -> Self {
        Self::new(symbol, side, OrderType::Market).quantity(quantity)
    }

    pub fn limit(symbol: impl Into<String>, side: OrderSide, quantity: f64, price: f64) -> Self {
        Self::new(symbol, side, OrderType::Limit)
            .quantity(quantity)
            .price(price)
            .time_in_force(TimeInForce::Gtc)
    }

    pub fn quantity(mut self, q: f64) -> Self {
        self.quantity = Some(q);
        self
    }

    pub fn price(mut self, p: f64) -> Self {
        self.price = Some(p);
        self
    }

    pub fn stop_price(mut self, p: f64) -> Self {
        self.stop_price = Some(p);
        self
    }

    pub fn time_in_force(mut self, tif: TimeInForce) -> Self {
        self.time_in_force = Some(tif);
        self
    }

    pub fn position_side(mut self, side: PositionSide) -> Self {
        self.position_side = Some(side);
        self
    }

    pub fn reduce_only(mut self, flag: bool) -> Self {
        self.reduce_only = Some(flag);
        self
    }

    pub fn close_position(mut self, flag: bool) -> Self {
        self.close_position = Some(flag);
        self
    }

    pub fn working_type(mut self, wt: WorkingType) -> Self {
        self.working_type = Some(wt);
        self
    }

    pub fn client_order_id(mut self, id: impl Into<String>) -> Self {
        self.new_client_order_id = Some(id.into());
        self
    }

    pub fn activation_price(mut self, p: f64) -> Self {
        self.activation_price = Some(p);
        self
    }

    /// Trailing distance in percent (TRAILING_STOP_MARKET).
    pub fn callback_rate(mut self, rate: f64) -> Self {
        self.callback_rate = Some(rate);
        self
    }

    /// "ACK" or "RESULT".
    pub fn response_type(mut self, resp_type: impl Into<String>) -> Self {
        self.new_order_resp_type = Some(resp_type.into());
        self
    }

    pub fn validate(&self) -> ClientResult<()> {
        if self.symbol.trim().is_empty() {
            return Err(ClientError::Validation("symbol is empty".into()));
        }
        if self.order_type.rejects_time_in_force() && self.time_in_force.is_some() {
            return Err(ClientError::Validation(format!(
                "{} orders must not carry timeInForce",
                self.order_type
            )));
        }
        if self.order_type.is_stop_limit() && (self.price.is_none() || self.stop_price.is_none()) {
            return Err(ClientError::Validation(format!(
                "{} orders need both price and stopPrice",
                self.order_type
            )));
        }
        if matches!(self.order_type, OrderType::Limit | OrderType::LimitMaker) && self.price.is_none() {
            return Err(ClientError::Validation(format!("{} orders need a price", self.order_type)));
        }
        if self.order_type == OrderType::TrailingStopMarket {
            match self.callback_rate {
                Some(r) if (MIN_CALLBACK_RATE..=MAX_CALLBACK_RATE).contains(&r) => {}
                Some(r) => {
                    return Err(ClientError::Validation(format!(
                        "callbackRate must be within {MIN_CALLBACK_RATE}..={MAX_CALLBACK_RATE}, got {r}"
                    )))
                }
                None => return Err(ClientError::Validation("TRAILING_STOP_MARKET orders need a callbackRate".into())),
            }
        }
        if let Some(t) = self.new_order_resp_type.as_deref() {
            if t != "ACK" && t != "RESULT" {
                return Err(ClientError::Validation(format!("newOrderRespType must be ACK or RESULT, got {t}")));
            }
        }
        for (name, v) in [
            ("quantity", self.quantity),
            ("price", self.price),
            ("stopPrice", self.stop_price),
            ("activationPrice", self.activation_price),
        ] {
            if let Some(v) = v {
                if !v.is_finite() || v <= 0.0 {
                    return Err(ClientError::Validation(format!("{name} must be positive, got {v}")));
                }
            }
        }
        if self.quantity.is_none() && self.close_position != Some(true) {
            return Err(ClientError::Validation("quantity is required unless closePosition=true".into()));
        }
        Ok(())
    }

    /// Wire parameters. Prices must already be rounded to the symbol precision.
    pub fn to_params(&self) -> QueryParams {
        QueryParams::new()
            .with("symbol", &self.symbol)
            .with("side", self.side.as_str())
            .with("type", self.order_type.as_str())
            .with_opt("positionSide", self.position_side.map(|s| s.as_str()))
            .with_opt("timeInForce", self.time_in_force.map(|t| t.as_str()))
            .with_opt("quantity", self.quantity.map(|q| format_decimal(q, 8)))
            .with_opt("price", self.price.map(|p| format_decimal(p, 8)))
            .with_opt("stopPrice", self.stop_price.map(|p| format_decimal(p, 8)))
            .with_opt("reduceOnly", self.reduce_only)
            .with_opt("closePosition", self.close_position)
            .with_opt("workingType", self.working_type.map(|w| w.as_str()))
            .with_opt("newClientOrderId", self.new_client_order_id.as_deref())
            .with_opt("activationPrice", self.activation_price.map(|p| format_decimal(p, 8)))
            .with_opt("callbackRate", self.callback_rate.map(|r| format!("{r:.2}")))
            .with_opt("newOrderRespType", self.new_order_resp_type.as_deref())
    }
}

/// Fixed decimals with trailing zeros trimmed: 0.01 -> "0.01", 50000.0 -> "50000".
pub fn format_decimal(value: f64, max_decimals: usize) -> String {
    let s = format!("{value:.max_decimals$}");
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        s
    }
}

/// Exchange acknowledgement of an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResult {
    pub order_id: i64,
    pub symbol: String,
    pub status: OrderStatus,
    #[serde(default)]
    pub client_order_id: String,
    #[serde(default = "zero")]
    pub price: String,
    #[serde(default = "zero")]
    pub avg_price: String,
    #[serde(default = "zero")]
    pub orig_qty: String,
    #[serde(default = "zero")]
    pub executed_qty: String,
    #[serde(default)]
    pub time_in_force: Option<TimeInForce>,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    #[serde(default)]
    pub reduce_only: bool,
    #[serde(default)]
    pub close_position: bool,
    pub side: OrderSide,
    #[serde(default)]
    pub position_side: Option<PositionSide>,
    #[serde(default = "zero")]
    pub stop_price: String,
    #[serde(default)]
    pub working_type: Option<WorkingType>,
    #[serde(default)]
    pub update_time: i64,
}

fn zero() -> String {
    "0".to_string()
}

/// Per-symbol trading metadata from exchange info.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolMetadata {
    pub symbol: String,
    pub price_precision: u32,
    pub quantity_precision: u32,
    pub status: String,
    #[serde(default)]
    pub base_asset: String,
    #[serde(default)]
    pub quote_asset: String,
}

impl SymbolMetadata {
    pub fn is_trading(&self) -> bool {
        self.status == "TRADING"
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeInfo {
    #[serde(default)]
    pub server_time: i64,
    pub symbols: Vec<SymbolMetadata>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerTime {
    pub server_time: i64,
}

/// `GET /fapi/v1/premiumIndex`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkPrice {
    pub symbol: String,
    #[serde(deserialize_with = "de_decimal_string")]
    pub mark_price: String,
    #[serde(default = "zero", deserialize_with = "de_decimal_string")]
    pub index_price: String,
    #[serde(default = "zero", deserialize_with = "de_decimal_string")]
    pub last_funding_rate: String,
    #[serde(default)]
    pub next_funding_time: i64,
    #[serde(default)]
    pub time: i64,
}

impl MarkPrice {
    pub fn price(&self) -> f64 {
        self.mark_price.parse().unwrap_or(0.0)
    }
}

/// `GET /fapi/v1/ticker/24hr`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticker24h {
    pub symbol: String,
    #[serde(default = "zero")]
    pub price_change: String,
    #[serde(default = "zero")]
    pub price_change_percent: String,
    #[serde(default = "zero")]
    pub last_price: String,
    #[serde(default = "zero")]
    pub high_price: String,
    #[serde(default = "zero")]
    pub low_price: String,
    #[serde(default = "zero")]
    pub volume: String,
    #[serde(default = "zero")]
    pub quote_volume: String,
}

/// One candlestick row (Binance sends these as positional arrays).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "KlineRow")]
pub struct Kline {
    pub open_time: i64,
    pub open: String,
    pub high: String,
    pub low: String,
    pub close: String,
    pub volume: String,
    pub close_time: i64,
    pub quote_volume: String,
    pub trades: u64,
}

#[derive(Deserialize)]
struct KlineRow(i64, String, String, String, String, String, i64, String, u64, Value, Value, Value);

impl From<KlineRow> for Kline {
    fn from(r: KlineRow) -> Self {
        Self {
            open_time: r.0,
            open: r.1,
            high: r.2,
            low: r.3,
            close: r.4,
            volume: r.5,
            close_time: r.6,
            quote_volume: r.7,
            trades: r.8,
        }
    }
}

/// Generic `{code, msg}` body: an acknowledgement when `code` is 200, an error when negative.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CodeMessage {
    pub code: i64,
    pub msg: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeverageAck {
    pub symbol: String,
    pub leverage: u32,
    #[serde(default, deserialize_with = "de_opt_decimal_string")]
    pub max_notional_value: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionMode {
    pub dual_side_position: bool,
}

/// Accepts `"1.5"` or `1.5`, returns the string form.
pub(crate) fn de_decimal_string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    match Value::deserialize(d)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!("expected decimal, got {other}"))),
    }
}

fn de_opt_decimal_string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    match Option::<Value>::deserialize(d)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!("expected decimal, got {other}"))),
    }
}

/// Accepts `"20"` or `20`.
pub(crate) fn de_int_lenient<'de, D: Deserializer<'de>>(d: D) -> Result<u32, D::Error> {
    match Value::deserialize(d)? {
        Value::String(s) => s.trim().parse().map_err(serde::de::Error::custom),
        Value::Number(n) => n
            .as_u64()
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| serde::de::Error::custom(format!("bad integer {n}"))),
        other => Err(serde::de::Error::custom(format!("expected integer, got {other}"))),
    }
}
