// ===============================
// src/orders.rs (order orchestration)
// ===============================
//
// open_position : leverage -> (opsional) margin ISOLATED -> order, berurutan,
//                 berhenti di langkah pertama yang gagal.
// set_tpsl      : TP dan SL dikirim bersamaan lalu di-join; leg yang sudah
//                 masuk TIDAK dibatalkan bila leg lain gagal.
// cancel_all    : -1022 di endpoint utama -> coba sekali di endpoint alternatif.
//
use std::sync::Arc;

use chrono::Utc;
use futures_util::future::join_all;
use rand::Rng;
use tracing::{error, info, warn};

use crate::error::{ClientError, ClientResult, CODE_MARGIN_TYPE_UNCHANGED};
use crate::gateway::{OrderGateway, CANCEL_ALL_ALT_PATH, CANCEL_ALL_PATH};
use crate::metrics;
use crate::models::{
    CodeMessage, MarginType, OrderRequest, OrderResult, OrderSide, OrderType, PositionSide, TimeInForce, WorkingType,
};
use crate::symbols::SymbolCache;

pub const MAX_LEVERAGE: u32 = 125;

/// An order plus the account setup that must precede it.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenPositionRequest {
    pub order: OrderRequest,
    pub leverage: u32,
    pub isolated: bool,
}

impl OpenPositionRequest {
    pub fn new(order: OrderRequest, leverage: u32) -> Self {
        Self { order, leverage, isolated: false }
    }

    pub fn isolated(mut self, flag: bool) -> Self {
        self.isolated = flag;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TpSlLeg {
    pub price: f64,
    pub quantity: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TpSlRequest {
    pub symbol: String,
    /// Direction of the position being protected; legs take the opposite side.
    pub is_long: bool,
    pub position_side: Option<PositionSide>,
    pub take_profit: Option<TpSlLeg>,
    pub stop_loss: Option<TpSlLeg>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegKind {
    TakeProfit,
    StopLoss,
}

impl LegKind {
    pub fn label(&self) -> &'static str {
        match self {
            LegKind::TakeProfit => "take_profit",
            LegKind::StopLoss => "stop_loss",
        }
    }

    fn order_type(&self) -> OrderType {
        match self {
            LegKind::TakeProfit => OrderType::TakeProfitMarket,
            LegKind::StopLoss => OrderType::StopMarket,
        }
    }

    fn id_prefix(&self) -> &'static str {
        match self {
            LegKind::TakeProfit => "tp",
            LegKind::StopLoss => "sl",
        }
    }
}

/// Both legs placed.
#[derive(Debug, Clone, PartialEq)]
pub struct TpSlReport {
    pub take_profit: Option<OrderResult>,
    pub stop_loss: Option<OrderResult>,
}

pub struct Orchestrator {
    gateway: Arc<dyn OrderGateway>,
    symbols: Arc<SymbolCache>,
}

impl Orchestrator {
    pub fn new(gateway: Arc<dyn OrderGateway>, symbols: Arc<SymbolCache>) -> Self {
        Self { gateway, symbols }
    }

    pub fn symbols(&self) -> &SymbolCache {
        &self.symbols
    }

    /// Round price-like fields to the symbol's price precision, quantity to
    /// its quantity precision.
    fn round_prices(&self, mut order: OrderRequest) -> OrderRequest {
        let sym = order.symbol.clone();
        order.quantity = order.quantity.map(|q| self.symbols.round_quantity(&sym, q));
        order.price = order.price.map(|p| self.symbols.round_price(&sym, p));
        order.stop_price = order.stop_price.map(|p| self.symbols.round_price(&sym, p));
        order.activation_price = order.activation_price.map(|p| self.symbols.round_price(&sym, p));
        order
    }

    pub async fn open_position(&self, req: OpenPositionRequest) -> ClientResult<OrderResult> {
        if req.leverage == 0 || req.leverage > MAX_LEVERAGE {
            return Err(ClientError::Validation(format!(
                "leverage must be within 1..={MAX_LEVERAGE}, got {}",
                req.leverage
            )));
        }

        let mut order = self.round_prices(req.order);
        if order.order_type.accepts_time_in_force() && order.time_in_force.is_none() {
            order.time_in_force = Some(TimeInForce::Gtc);
        }
        // reject before touching leverage/margin
        order.validate()?;
        let symbol = order.symbol.clone();
        let type_label = order.order_type.as_str();

        // 1) leverage
        if let Err(e) = self.gateway.set_leverage(&symbol, req.leverage).await {
            error!(%symbol, leverage = req.leverage, error = %e, "set leverage failed, order not sent");
            metrics::ORDERS.with_label_values(&[type_label, "leverage_failed"]).inc();
            return Err(e);
        }
        info!(%symbol, leverage = req.leverage, "leverage set");

        // 2) margin type (isolated only)
        if req.isolated {
            match self.gateway.set_margin_type(&symbol, MarginType::Isolated).await {
                Ok(_) => info!(%symbol, "margin type set to ISOLATED"),
                Err(e) if e.api_code() == Some(CODE_MARGIN_TYPE_UNCHANGED) => {
                    info!(%symbol, "margin type already ISOLATED");
                }
                Err(e) => {
                    error!(%symbol, error = %e, "set margin type failed, order not sent");
                    metrics::ORDERS.with_label_values(&[type_label, "margin_failed"]).inc();
                    return Err(e);
                }
            }
        }

        // 3) order
        match self.gateway.create_order(&order).await {
            Ok(res) => {
                info!(%symbol, order_id = res.order_id, status = ?res.status, "order placed");
                metrics::ORDERS.with_label_values(&[type_label, "ok"]).inc();
                Ok(res)
            }
            Err(e) => {
                error!(%symbol, error = %e, "create order failed");
                metrics::ORDERS.with_label_values(&[type_label, "rejected"]).inc();
                Err(e)
            }
        }
    }

    fn leg_order(&self, req: &TpSlRequest, kind: LegKind, leg: TpSlLeg) -> OrderRequest {
        let side = if req.is_long { OrderSide::Sell } else { OrderSide::Buy };
        let mut order = OrderRequest::new(&req.symbol, side, kind.order_type())
            .stop_price(self.symbols.round_price(&req.symbol, leg.price))
            .quantity(self.symbols.round_quantity(&req.symbol, leg.quantity))
            .working_type(WorkingType::MarkPrice)
            .close_position(false)
            .client_order_id(leg_client_id(kind));
        order.position_side = req.position_side;
        order
    }

    pub async fn set_tpsl(&self, req: TpSlRequest) -> ClientResult<TpSlReport> {
        let legs: Vec<(LegKind, OrderRequest)> = [
            (LegKind::TakeProfit, req.take_profit),
            (LegKind::StopLoss, req.stop_loss),
        ]
        .into_iter()
        .filter_map(|(kind, leg)| leg.map(|l| (kind, self.leg_order(&req, kind, l))))
        .collect();

        if legs.is_empty() {
            return Err(ClientError::Validation("a take-profit or stop-loss price is required".into()));
        }
        for (kind, order) in &legs {
            order
                .validate()
                .map_err(|e| ClientError::Validation(format!("{} leg: {e}", kind.label())))?;
        }

        // fan-out, join on all; completion order does not matter
        let results = join_all(legs.iter().map(|(kind, order)| {
            let gateway = self.gateway.clone();
            async move { (*kind, gateway.create_order(order).await) }
        }))
        .await;

        let mut report = TpSlReport { take_profit: None, stop_loss: None };
        let mut errors = Vec::new();
        for (kind, res) in results {
            match res {
                Ok(order) => {
                    metrics::TPSL_LEGS.with_label_values(&[kind.label(), "ok"]).inc();
                    match kind {
                        LegKind::TakeProfit => report.take_profit = Some(order),
                        LegKind::StopLoss => report.stop_loss = Some(order),
                    }
                }
                Err(e) => {
                    metrics::TPSL_LEGS.with_label_values(&[kind.label(), "failed"]).inc();
                    warn!(symbol = %req.symbol, leg = kind.label(), error = %e, "tp/sl leg failed");
                    errors.push(format!("{}: {e}", kind.label()));
                }
            }
        }

        if errors.is_empty() {
            info!(symbol = %req.symbol, "tp/sl placed");
            return Ok(report);
        }

        let placed: Vec<OrderResult> = report.take_profit.into_iter().chain(report.stop_loss).collect();
        if !placed.is_empty() {
            warn!(symbol = %req.symbol, placed = placed.len(), "tp/sl partially placed, placed legs stay open");
        }
        Err(ClientError::LegsFailed {
            message: format!("set tp/sl failed: {}", errors.join(", ")),
            placed,
        })
    }

    pub async fn cancel_all_orders(&self, symbol: &str) -> ClientResult<CodeMessage> {
        match self.gateway.cancel_all_open_orders(symbol, CANCEL_ALL_PATH).await {
            Ok(ack) => Ok(ack),
            Err(e) if e.is_signature() => {
                warn!(%symbol, alt = CANCEL_ALL_ALT_PATH, "cancel-all signature rejected, retrying alternate endpoint");
                self.gateway.cancel_all_open_orders(symbol, CANCEL_ALL_ALT_PATH).await
            }
            Err(e) => Err(e),
        }
    }
}

fn leg_client_id(kind: LegKind) -> String {
    let n: u32 = rand::thread_rng().gen_range(0..1_000_000);
    format!("{}-{}-{n:06}", kind.id_prefix(), Utc::now().timestamp_millis())
}
