// ===============================
// src/account.rs (account snapshot + normalizer)
// ===============================
//
// Binance answers "give me the account" in several shapes depending on the
// endpoint version:
//   v2/v1 account -> object with assets[] + positions[] (+ totals)
//   v3 balance    -> bare array of balances, no positions
// Field names drift too (walletBalance vs balance, unrealizedProfit vs
// unRealizedProfit, isolated:bool vs marginType). Everything lands in
// `AccountSnapshot`.
//
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::models::de_int_lenient;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetBalance {
    pub asset: String,
    #[serde(alias = "walletBalance")]
    pub balance: String,
    pub cross_wallet_balance: String,
    pub available_balance: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub symbol: String,
    /// Signed: >0 long, <0 short, 0 closed.
    #[serde(rename = "positionAmt")]
    pub position_amt: String,
    pub entry_price: String,
    pub mark_price: String,
    #[serde(rename = "unRealizedProfit", alias = "unrealizedProfit")]
    pub unrealized_profit: String,
    #[serde(default = "zero")]
    pub liquidation_price: String,
    #[serde(deserialize_with = "de_int_lenient")]
    pub leverage: u32,
    pub margin_type: String,
    pub position_side: String,
    #[serde(default = "zero")]
    pub notional: String,
    #[serde(default)]
    pub update_time: i64,
}

impl Position {
    pub fn signed_amount(&self) -> f64 {
        self.position_amt.parse().unwrap_or(0.0)
    }

    pub fn is_open(&self) -> bool {
        self.signed_amount() != 0.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSnapshot {
    pub assets: Vec<AssetBalance>,
    pub positions: Vec<Position>,
    pub total_wallet_balance: String,
    pub available_balance: String,
    pub total_margin_balance: String,
    pub total_unrealized_profit: String,
}

impl AccountSnapshot {
    pub fn active_positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.iter().filter(|p| p.is_open())
    }

    pub fn position(&self, symbol: &str) -> Option<&Position> {
        self.positions.iter().find(|p| p.symbol == symbol)
    }
}

fn zero() -> String {
    "0".to_string()
}

/// Permissive decode of either account shape. `None` means the payload is
/// not an account at all (or a balance array with no usable entry).
pub fn normalize(raw: &Value) -> Option<AccountSnapshot> {
    match raw {
        Value::Object(obj) => from_account_object(obj),
        Value::Array(items) => from_balance_array(items),
        _ => None,
    }
}

fn from_account_object(obj: &Map<String, Value>) -> Option<AccountSnapshot> {
    let looks_like_account = ["assets", "positions", "totalWalletBalance", "availableBalance"]
        .iter()
        .any(|k| obj.contains_key(*k));
    if !looks_like_account {
        return None;
    }

    let assets = obj
        .get("assets")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(asset_from_value).collect())
        .unwrap_or_default();
    let positions = normalize_positions(obj.get("positions").unwrap_or(&Value::Null));

    Some(AccountSnapshot {
        assets,
        positions,
        total_wallet_balance: decimal_or_zero(obj, &["totalWalletBalance"]),
        available_balance: decimal_or_zero(obj, &["availableBalance"]),
        total_margin_balance: decimal_or_zero(obj, &["totalMarginBalance"]),
        total_unrealized_profit: decimal_or_zero(obj, &["totalUnrealizedProfit"]),
    })
}

fn from_balance_array(items: &[Value]) -> Option<AccountSnapshot> {
    let assets: Vec<AssetBalance> = items.iter().filter_map(asset_from_value).collect();
    let first = assets.first()?;
    let total_wallet_balance = first.balance.clone();
    let available_balance = first.available_balance.clone();

    Some(AccountSnapshot {
        assets,
        positions: Vec::new(),
        total_wallet_balance,
        available_balance,
        total_margin_balance: zero(),
        total_unrealized_profit: zero(),
    })
}

/// Positions from an array payload (account.positions or positionRisk).
pub fn normalize_positions(raw: &Value) -> Vec<Position> {
    raw.as_array()
        .map(|items| items.iter().filter_map(position_from_value).collect())
        .unwrap_or_default()
}

fn asset_from_value(v: &Value) -> Option<AssetBalance> {
    let obj = v.as_object()?;
    let asset = obj.get("asset")?.as_str()?.to_string();
    Some(AssetBalance {
        asset,
        balance: decimal(obj, &["balance", "walletBalance"])?,
        cross_wallet_balance: decimal(obj, &["crossWalletBalance"])?,
        available_balance: decimal(obj, &["availableBalance"])?,
    })
}

fn position_from_value(v: &Value) -> Option<Position> {
    let obj = v.as_object()?;
    let symbol = obj.get("symbol")?.as_str()?.to_string();

    let leverage = match obj.get("leverage") {
        None | Some(Value::Null) => 1,
        Some(Value::String(s)) => s.trim().parse().ok()?,
        Some(Value::Number(n)) => n.as_u64().and_then(|x| u32::try_from(x).ok())?,
        Some(_) => return None,
    };

    let margin_type = match (obj.get("marginType").and_then(Value::as_str), obj.get("isolated").and_then(Value::as_bool)) {
        (Some(m), _) => m.to_ascii_lowercase(),
        (None, Some(true)) => "isolated".to_string(),
        _ => "cross".to_string(),
    };

    Some(Position {
        symbol,
        position_amt: decimal(obj, &["positionAmt"])?,
        entry_price: decimal(obj, &["entryPrice"])?,
        mark_price: decimal(obj, &["markPrice"])?,
        unrealized_profit: decimal(obj, &["unRealizedProfit", "unrealizedProfit"])?,
        liquidation_price: decimal(obj, &["liquidationPrice"])?,
        leverage,
        margin_type,
        position_side: obj.get("positionSide").and_then(Value::as_str).unwrap_or("BOTH").to_string(),
        notional: decimal(obj, &["notional"])?,
        update_time: obj.get("updateTime").and_then(Value::as_i64).unwrap_or(0),
    })
}

/// First present key wins. Absent -> "0"; present but not a decimal -> None
/// (the entry is malformed and gets dropped).
fn decimal(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    let Some(v) = keys.iter().find_map(|k| obj.get(*k).filter(|v| !v.is_null())) else {
        return Some(zero());
    };
    match v {
        Value::String(s) if s.trim().parse::<f64>().is_ok() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn decimal_or_zero(obj: &Map<String, Value>, keys: &[&str]) -> String {
    decimal(obj, keys).unwrap_or_else(zero)
}

// ---------------------------------------------------------------------------
// Simplified (numeric) view for display collaborators
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimplifiedPosition {
    pub symbol: String,
    pub position_amount: f64,
    pub entry_price: f64,
    pub mark_price: f64,
    pub unrealized_profit: f64,
    pub leverage: u32,
    pub position_side: String,
    pub is_long: bool,
    pub position_value: f64,
    pub profit_percentage: f64,
}

impl SimplifiedPosition {
    pub fn from_position(p: &Position) -> Self {
        let amount = p.signed_amount();
        let entry = parse_or_zero(&p.entry_price);
        let mark = parse_or_zero(&p.mark_price);
        let profit = parse_or_zero(&p.unrealized_profit);
        Self {
            symbol: p.symbol.clone(),
            position_amount: amount,
            entry_price: entry,
            mark_price: mark,
            unrealized_profit: profit,
            leverage: p.leverage,
            position_side: p.position_side.clone(),
            is_long: amount > 0.0,
            position_value: amount.abs() * mark,
            profit_percentage: profit_percentage(profit, entry, amount),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimplifiedAccount {
    pub total_balance: f64,
    pub available_balance: f64,
    pub unrealized_profit: f64,
    pub margin_balance: f64,
    pub positions: Vec<SimplifiedPosition>,
}

pub fn to_simplified(snapshot: &AccountSnapshot) -> SimplifiedAccount {
    SimplifiedAccount {
        total_balance: parse_or_zero(&snapshot.total_wallet_balance),
        available_balance: parse_or_zero(&snapshot.available_balance),
        unrealized_profit: parse_or_zero(&snapshot.total_unrealized_profit),
        margin_balance: parse_or_zero(&snapshot.total_margin_balance),
        positions: snapshot.active_positions().map(SimplifiedPosition::from_position).collect(),
    }
}

/// profit / (entry * |amount|) * 100, or 0 when the base is zero.
pub fn profit_percentage(profit: f64, entry_price: f64, amount: f64) -> f64 {
    if entry_price == 0.0 || amount == 0.0 {
        return 0.0;
    }
    profit / (entry_price * amount.abs()) * 100.0
}

fn parse_or_zero(s: &str) -> f64 {
    s.trim().parse().unwrap_or(0.0)
}
