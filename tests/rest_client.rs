// ===============================
// tests/rest_client.rs
// ===============================
mod common;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use common::*;
use fapi_trader::account::Position;
use fapi_trader::config::{ClientConfig, Endpoints};
use fapi_trader::credentials::{Credentials, SharedCredentials};
use fapi_trader::error::{ClientError, ClientResult};
use fapi_trader::rest::{ConnectionReport, OrderRef, RestClient};
use fapi_trader::signer::sign_query;
use fapi_trader::transport::{HttpRequest, HttpResponse, HttpTransport, Method};

fn v3_balance() -> serde_json::Value {
    json!([
        {"accountAlias": "SgsR", "asset": "USDT", "balance": "512.25000000", "crossWalletBalance": "512.25000000",
         "crossUnPnl": "0.00000000", "availableBalance": "500.00000000", "maxWithdrawAmount": "500.00000000"},
        {"accountAlias": "SgsR", "asset": "BNB", "balance": "0.10000000", "availableBalance": "0.10000000"}
    ])
}

#[tokio::test]
async fn account_falls_back_to_v3_balance() {
    let stub = StubTransport::new();
    stub.respond(Method::Get, "/fapi/v2/account", 500, json!({"code": -1000, "msg": "An unknown error occured"}));
    stub.respond(Method::Get, "/fapi/v1/account", 404, json!("gone"));
    stub.respond(Method::Get, "/fapi/v3/balance", 200, v3_balance());
    let client = client(stub.clone());

    let snap = client.account_info().await.expect("v3 fallback");
    assert_eq!(snap.total_wallet_balance, "512.25000000");
    assert_eq!(snap.available_balance, "500.00000000");
    assert_eq!(snap.assets.len(), 2);
    assert!(snap.positions.is_empty());

    let paths: Vec<String> = stub.api_requests().iter().map(|r| r.path().to_string()).collect();
    assert_eq!(paths, vec!["/fapi/v2/account", "/fapi/v1/account", "/fapi/v3/balance"]);
    // server time re-fetched before every signed call
    assert_eq!(stub.count("/fapi/v1/time"), 3);
}

#[tokio::test]
async fn first_successful_version_wins() {
    let stub = StubTransport::new();
    stub.respond(
        Method::Get,
        "/fapi/v2/account",
        200,
        json!({
            "totalWalletBalance": "100.0", "availableBalance": "80.0",
            "totalMarginBalance": "101.0", "totalUnrealizedProfit": "1.0",
            "assets": [{"asset": "USDT", "walletBalance": "100.0", "availableBalance": "80.0"}],
            "positions": [
                {"symbol": "BTCUSDT", "positionAmt": "0.010", "entryPrice": "60000.0", "unrealizedProfit": "1.0", "leverage": "10", "isolated": false, "positionSide": "BOTH"},
                {"symbol": "ETHUSDT", "positionAmt": "0.000", "entryPrice": "0.0", "unrealizedProfit": "0.0", "leverage": "20", "isolated": false, "positionSide": "BOTH"}
            ]
        }),
    );
    let client = client(stub.clone());

    let snap = client.account_info().await.expect("v2");
    assert_eq!(snap.total_wallet_balance, "100.0");
    assert_eq!(snap.active_positions().count(), 1);
    assert_eq!(stub.count("/fapi/v1/account"), 0);
    assert_eq!(stub.count("/fapi/v3/balance"), 0);
}

#[tokio::test]
async fn all_versions_failing_reports_attempts_and_last_error() {
    let stub = StubTransport::new();
    stub.respond(Method::Get, "/fapi/v2/account", 400, json!({"code": -2015, "msg": "Invalid API-key"}));
    stub.respond(Method::Get, "/fapi/v1/account", 400, json!({"code": -2015, "msg": "Invalid API-key"}));
    stub.respond(Method::Get, "/fapi/v3/balance", 401, json!({"code": -1022, "msg": "Signature for this request is not valid."}));
    let client = client(stub);

    match client.account_info().await {
        Err(ClientError::AllEndpointsFailed { attempted, last }) => {
            assert_eq!(attempted, vec!["v2", "v1", "v3"]);
            assert!(matches!(*last, ClientError::Signature { .. }));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn signed_query_is_canonical_and_signature_last() {
    let stub = StubTransport::new();
    stub.respond(Method::Get, "/fapi/v1/order", 200, order_json("BTCUSDT", "BUY", "LIMIT", 7));
    let client = client(stub.clone());

    let order = client.query_order("BTCUSDT", &OrderRef::Id(7)).await.expect("order");
    assert_eq!(order.order_id, 7);

    let req = stub.api_requests().pop().expect("request");
    assert_eq!(req.api_key.as_deref(), Some(API_KEY));
    let pairs = query_pairs(&req.params);
    let (last_key, signature) = pairs.last().cloned().expect("pairs");
    assert_eq!(last_key, "signature");

    let keys: Vec<&str> = pairs[..pairs.len() - 1].iter().map(|(k, _)| k.as_str()).collect();
    assert_eq!(keys, vec!["orderId", "recvWindow", "symbol", "timestamp"]);
    assert!(pairs.contains(&("timestamp".to_string(), SERVER_TIME.to_string())));
    assert!(pairs.contains(&("recvWindow".to_string(), "5000".to_string())));

    let canonical = req.params.trim_end_matches(&format!("&signature={signature}")).to_string();
    assert_eq!(sign_query(SECRET, &canonical), signature);
}

#[tokio::test]
async fn clock_failure_aborts_signed_request() {
    let stub = StubTransport::new();
    stub.fail(Method::Get, "/fapi/v1/time", ClientError::Transport { message: "timed out".into(), timed_out: true });
    let client = client(stub.clone());

    let err = client.positions().await.unwrap_err();
    assert!(matches!(err, ClientError::ClockUnavailable(_)), "{err:?}");
    assert!(stub.api_requests().is_empty(), "no request may be signed with local time");
}

#[tokio::test]
async fn missing_credentials_short_circuit() {
    let stub = StubTransport::new();
    let creds = Arc::new(fapi_trader::SharedCredentials::new(Credentials::new("", "", true)));
    let client = client_with(stub.clone(), creds);

    assert!(matches!(client.account_info().await, Err(ClientError::MissingCredentials)));
    assert!(stub.requests().is_empty());
}

#[tokio::test]
async fn credentials_are_read_at_call_time() {
    let stub = StubTransport::new();
    stub.respond(Method::Get, "/fapi/v1/positionSide/dual", 200, json!({"dualSidePosition": false}));
    let creds = credentials();
    let client = client_with(stub.clone(), creds.clone());

    client.position_mode().await.expect("mode");
    creds.update(Credentials::new("rotated-key", "rotated-secret", true));
    assert_eq!(client.current_credentials().api_key, "rotated-key");
    let mode = client.position_mode().await.expect("mode");
    assert!(!mode.dual_side_position);

    let reqs = stub.api_requests();
    assert_eq!(reqs[0].api_key.as_deref(), Some(API_KEY));
    assert_eq!(reqs[1].api_key.as_deref(), Some("rotated-key"));

    let pairs = query_pairs(&reqs[1].params);
    let sig = pairs.last().map(|(_, v)| v.clone()).expect("sig");
    let canonical = reqs[1].params.trim_end_matches(&format!("&signature={sig}")).to_string();
    assert_eq!(sign_query("rotated-secret", &canonical), sig);
}

/// Rotates the shared credentials while the server-time request is in flight.
struct RotateOnTime {
    stub: Arc<StubTransport>,
    creds: Arc<SharedCredentials>,
}

#[async_trait]
impl HttpTransport for RotateOnTime {
    async fn send(&self, req: HttpRequest) -> ClientResult<HttpResponse> {
        if req.path() == "/fapi/v1/time" {
            self.creds.update(Credentials::new("rotated-key", "rotated-secret", true));
        }
        self.stub.send(req).await
    }
}

#[tokio::test]
async fn rotation_during_time_fetch_signs_with_new_secret() {
    let stub = StubTransport::new();
    stub.respond(Method::Get, "/fapi/v1/positionSide/dual", 200, json!({"dualSidePosition": true}));
    let creds = credentials();
    let transport = Arc::new(RotateOnTime { stub: stub.clone(), creds: creds.clone() });
    let config = ClientConfig { endpoints: Endpoints::single(REST_BASE, "ws://unused"), ..Default::default() };
    let client = RestClient::with_transport(config, creds, transport);

    assert!(client.position_mode().await.expect("mode").dual_side_position);

    let req = stub.api_requests().pop().expect("request");
    assert_eq!(req.api_key.as_deref(), Some("rotated-key"));
    let pairs = query_pairs(&req.params);
    let sig = pairs.last().map(|(_, v)| v.clone()).expect("sig");
    let canonical = req.params.trim_end_matches(&format!("&signature={sig}")).to_string();
    assert_eq!(sign_query("rotated-secret", &canonical), sig);
    assert_ne!(sign_query(SECRET, &canonical), sig);
}

#[tokio::test]
async fn positions_tolerate_shape_drift() {
    let stub = StubTransport::new();
    stub.respond(
        Method::Get,
        "/fapi/v2/positionRisk",
        200,
        json!([
            {"symbol": "BTCUSDT", "positionAmt": "-0.5", "entryPrice": "61000", "markPrice": "60000",
             "unRealizedProfit": "500", "liquidationPrice": "90000", "leverage": "20", "marginType": "isolated",
             "isolatedMargin": "1500", "positionSide": "BOTH", "notional": "-30000", "updateTime": 1},
            {"symbol": "ETHUSDT", "positionAmt": "0.0", "entryPrice": "0.0", "markPrice": "3000", "unRealizedProfit": "0.0",
             "leverage": "10", "marginType": "cross", "positionSide": "BOTH"},
            {"positionAmt": "1"}
        ]),
    );
    let client = client(stub);

    let all: Vec<Position> = client.positions().await.expect("positions");
    assert_eq!(all.len(), 2);
    let active = client.active_positions().await.expect("active");
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].symbol, "BTCUSDT");
    assert_eq!(active[0].leverage, 20);
}

#[tokio::test]
async fn public_calls_are_unsigned() {
    let stub = StubTransport::new();
    stub.respond(
        Method::Get,
        "/fapi/v1/exchangeInfo",
        200,
        json!({
            "serverTime": SERVER_TIME,
            "symbols": [
                {"symbol": "BTCUSDT", "pricePrecision": 2, "quantityPrecision": 3, "status": "TRADING", "baseAsset": "BTC", "quoteAsset": "USDT"},
                {"symbol": "OLDUSDT", "pricePrecision": 4, "quantityPrecision": 0, "status": "SETTLING", "baseAsset": "OLD", "quoteAsset": "USDT"}
            ]
        }),
    );
    stub.respond(
        Method::Get,
        "/fapi/v1/klines",
        200,
        json!([[1499040000000i64, "0.01634790", "0.80000000", "0.01575800", "0.01577100", "148976.11427815",
                1499644799999i64, "2434.19055334", 308, "1756.87402397", "28.46694368", "17928899.62484339"]]),
    );
    let client = client(stub.clone());

    let symbols = client.trading_symbols().await.expect("symbols");
    assert_eq!(symbols.len(), 1);
    assert_eq!(symbols[0].symbol, "BTCUSDT");

    let klines = client.klines("BTCUSDT", "1h", None).await.expect("klines");
    assert_eq!(klines[0].close, "0.01577100");
    assert_eq!(klines[0].trades, 308);

    assert_eq!(stub.count("/fapi/v1/time"), 0);
    let kl = stub.api_requests().pop().expect("klines req");
    assert_eq!(kl.params, "interval=1h&limit=100&symbol=BTCUSDT");
    assert!(!kl.params.contains("signature"));
    assert_eq!(kl.api_key.as_deref(), Some(API_KEY));
}

#[tokio::test]
async fn connection_probe_distinguishes_signature_problems() {
    let stub = StubTransport::new();
    for path in ["/fapi/v2/account", "/fapi/v1/account", "/fapi/v3/balance"] {
        stub.respond(Method::Get, path, 401, json!({"code": -1022, "msg": "Signature for this request is not valid."}));
    }
    // first service answers junk, second errors, third has the address
    stub.respond_text(Method::Get, "/ip-a", 200, "<html>rate limited</html>");
    stub.respond_text(Method::Get, "/ip-b", 503, "unavailable");
    stub.respond_text(Method::Get, "/ip-c", 200, "203.0.113.7\n");
    let config = ClientConfig {
        endpoints: Endpoints::single(REST_BASE, "ws://unused"),
        ip_services: ["/ip-a", "/ip-b", "/ip-c", "/ip-d"].iter().map(|p| format!("{REST_BASE}{p}")).collect(),
        ..Default::default()
    };
    let client = RestClient::with_transport(config, credentials(), stub.clone());
    match client.test_connection().await {
        ConnectionReport::SignatureRejected { public_ip, .. } => assert_eq!(public_ip.as_deref(), Some("203.0.113.7")),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(stub.count("/ip-c"), 1);
    assert_eq!(stub.count("/ip-d"), 0);
    assert!(stub.requests().iter().filter(|r| r.path().starts_with("/ip-")).all(|r| r.api_key.is_none()));

    let down = StubTransport::new();
    down.fail(Method::Get, "/fapi/v1/time", ClientError::Transport { message: "connection refused".into(), timed_out: false });
    let client = common::client(down);
    assert!(matches!(client.test_connection().await, ConnectionReport::Unreachable(_)));
}
