// ===============================
// src/gateway.rs (order gateway)
// ===============================
//
// The four exchange calls the orchestrator sequences. `RestClient` is the
// real implementation; tests plug in a scripted one.
//
use async_trait::async_trait;
use tracing::debug;

use crate::error::ClientResult;
use crate::models::{CodeMessage, LeverageAck, MarginType, OrderRequest, OrderResult};
use crate::rest::RestClient;
use crate::signer::QueryParams;
use crate::transport::Method;

pub const CANCEL_ALL_PATH: &str = "/fapi/v1/allOpenOrders";
/// Second path tried once when the primary is rejected with -1022.
pub const CANCEL_ALL_ALT_PATH: &str = "/fapi/v1/cancelAllOpenOrders";

#[async_trait]
pub trait OrderGateway: Send + Sync {
    async fn set_leverage(&self, symbol: &str, leverage: u32) -> ClientResult<LeverageAck>;
    async fn set_margin_type(&self, symbol: &str, margin: MarginType) -> ClientResult<CodeMessage>;
    async fn create_order(&self, order: &OrderRequest) -> ClientResult<OrderResult>;
    async fn cancel_all_open_orders(&self, symbol: &str, path: &str) -> ClientResult<CodeMessage>;
}

#[async_trait]
impl OrderGateway for RestClient {
    async fn set_leverage(&self, symbol: &str, leverage: u32) -> ClientResult<LeverageAck> {
        let params = QueryParams::new().with("symbol", symbol).with("leverage", leverage);
        self.signed_request(Method::Post, "/fapi/v1/leverage", params).await
    }

    async fn set_margin_type(&self, symbol: &str, margin: MarginType) -> ClientResult<CodeMessage> {
        let params = QueryParams::new().with("symbol", symbol).with("marginType", margin.as_str());
        self.signed_request(Method::Post, "/fapi/v1/marginType", params).await
    }

    async fn create_order(&self, order: &OrderRequest) -> ClientResult<OrderResult> {
        let params = order.to_params();
        debug!(symbol = %order.symbol, order_type = %order.order_type, "create order");
        self.signed_request(Method::Post, "/fapi/v1/order", params).await
    }

    async fn cancel_all_open_orders(&self, symbol: &str, path: &str) -> ClientResult<CodeMessage> {
        let params = QueryParams::new().with("symbol", symbol);
        self.signed_request(Method::Delete, path, params).await
    }
}
