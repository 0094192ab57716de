// ===============================
// src/symbols.rs
// ===============================
//
// Symbol metadata cache: loaded once per session from exchangeInfo, read-only
// after that. Symbols without metadata use the default precision table.
//
use ahash::AHashMap;
use once_cell::sync::OnceCell;
use tracing::{info, warn};

use crate::error::ClientResult;
use crate::models::SymbolMetadata;
use crate::rest::RestClient;

/// Precision used when a symbol has no metadata.
///   BTCUSDT -> 1, ETHUSDT -> 2, other USDT pairs with BTC/ETH -> 2,
///   other USDT pairs -> 4, anything else -> 2
pub fn default_price_precision(symbol: &str) -> u32 {
    let s = symbol.to_ascii_uppercase();
    match s.as_str() {
        "BTCUSDT" => 1,
        "ETHUSDT" => 2,
        _ if s.contains("USDT") && (s.contains("BTC") || s.contains("ETH")) => 2,
        _ if s.contains("USDT") => 4,
        _ => 2,
    }
}

pub const DEFAULT_QUANTITY_PRECISION: u32 = 3;

/// Round half away from zero on `value * 10^precision`. Idempotent.
pub fn round_price(value: f64, precision: u32) -> f64 {
    let factor = 10f64.powi(precision as i32);
    (value * factor).round() / factor
}

#[derive(Default)]
pub struct SymbolCache {
    inner: OnceCell<AHashMap<String, SymbolMetadata>>,
}

impl SymbolCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-filled cache (persisted metadata, tests).
    pub fn from_symbols(symbols: impl IntoIterator<Item = SymbolMetadata>) -> Self {
        let cache = Self::new();
        let _ = cache.inner.set(index(symbols));
        cache
    }

    /// Fetch exchange info once. Later calls return immediately.
    pub async fn load(&self, client: &RestClient) -> ClientResult<()> {
        if self.inner.get().is_some() {
            return Ok(());
        }
        let symbols = client.trading_symbols().await?;
        let n = symbols.len();
        if self.inner.set(index(symbols)).is_ok() {
            info!(symbols = n, "symbol metadata loaded");
        }
        Ok(())
    }

    pub fn is_loaded(&self) -> bool {
        self.inner.get().is_some()
    }

    pub fn get(&self, symbol: &str) -> Option<&SymbolMetadata> {
        self.inner.get()?.get(&symbol.to_ascii_uppercase())
    }

    pub fn symbols(&self) -> Vec<&SymbolMetadata> {
        let mut v: Vec<_> = self.inner.get().map(|m| m.values().collect()).unwrap_or_default();
        v.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        v
    }

    pub fn price_precision(&self, symbol: &str) -> u32 {
        match self.get(symbol) {
            Some(m) => m.price_precision,
            None => {
                let p = default_price_precision(symbol);
                warn!(%symbol, precision = p, "no metadata, using default price precision");
                p
            }
        }
    }

    pub fn quantity_precision(&self, symbol: &str) -> u32 {
        self.get(symbol)
            .map(|m| m.quantity_precision)
            .unwrap_or(DEFAULT_QUANTITY_PRECISION)
    }

    pub fn round_price(&self, symbol: &str, value: f64) -> f64 {
        round_price(value, self.price_precision(symbol))
    }

    /// Quantity rounded to the symbol's lot precision (same rule as prices).
    pub fn round_quantity(&self, symbol: &str, value: f64) -> f64 {
        round_price(value, self.quantity_precision(symbol))
    }
}

fn index(symbols: impl IntoIterator<Item = SymbolMetadata>) -> AHashMap<String, SymbolMetadata> {
    symbols.into_iter().map(|m| (m.symbol.to_ascii_uppercase(), m)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("BTCUSDT", 1)]
    #[case("ETHUSDT", 2)]
    #[case("ETHBTCUSDT", 2)]
    #[case("SOLUSDT", 4)]
    #[case("ethusdt", 2)]
    #[case("BTCBUSD", 2)]
    #[case("SOLUSDT_240628", 4)]
    #[case("BTCUSDT_240628", 2)]
    fn default_precision_table(#[case] symbol: &str, #[case] expected: u32) {
        assert_eq!(default_price_precision(symbol), expected);
    }

    #[rstest]
    #[case(60123.456, 1, 60123.5)]
    #[case(3000.125, 2, 3000.13)]
    #[case(0.123456, 4, 0.1235)]
    #[case(-1.25, 1, -1.3)]
    #[case(42.0, 0, 42.0)]
    fn rounding(#[case] value: f64, #[case] precision: u32, #[case] expected: f64) {
        assert!((round_price(value, precision) - expected).abs() < 1e-9);
    }

    #[test]
    fn rounding_is_idempotent() {
        for &v in &[60123.456, 0.00012345, 1234.5678, 99.995, 3.14159265] {
            for p in 0..8 {
                let once = round_price(v, p);
                assert_eq!(round_price(once, p), once, "value {v} precision {p}");
            }
        }
    }

    #[test]
    fn metadata_overrides_defaults() {
        let cache = SymbolCache::from_symbols(vec![SymbolMetadata {
            symbol: "SOLUSDT".into(),
            price_precision: 3,
            quantity_precision: 0,
            status: "TRADING".into(),
            base_asset: "SOL".into(),
            quote_asset: "USDT".into(),
        }]);
        assert!(cache.is_loaded());
        assert_eq!(cache.price_precision("SOLUSDT"), 3);
        assert_eq!(cache.price_precision("solusdt"), 3);
        assert_eq!(cache.price_precision("DOGEUSDT"), 4);
        assert!((cache.round_price("SOLUSDT", 142.12345) - 142.123).abs() < 1e-9);
        assert_eq!(cache.round_quantity("SOLUSDT", 12.6), 13.0);
        assert!((cache.round_quantity("DOGEUSDT", 100.12345) - 100.123).abs() < 1e-9);
    }
}
