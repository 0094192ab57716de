// ===============================
// src/signer.rs
// ===============================
//
// Canonical query building + HMAC-SHA256 signing for Binance futures.
//
// Aturan:
// - parameter diurutkan berdasarkan key (BTreeMap), lalu `key=value` digabung `&`
// - string kosong diganti "0" sebelum ditandatangani (quirk dari klien lama,
//   sengaja dipertahankan karena mengubah signature)
// - `signature=<hex>` SELALU parameter terakhir
//
use std::collections::BTreeMap;
use std::fmt::Display;

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Value substituted for empty-string parameters before signing.
pub const EMPTY_VALUE_SENTINEL: &str = "0";

pub fn sign_query(secret: &str, query: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(query.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Request parameters, kept sorted by key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams(BTreeMap<String, String>);

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl Display) -> Self {
        self.insert(key, value);
        self
    }

    pub fn with_opt<V: Display>(mut self, key: &str, value: Option<V>) -> Self {
        if let Some(v) = value {
            self.insert(key, v);
        }
        self
    }

    pub fn insert(&mut self, key: &str, value: impl Display) {
        self.0.insert(key.to_string(), value.to_string());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Replace every empty value with [`EMPTY_VALUE_SENTINEL`]. Returns the keys touched.
    pub fn substitute_empty(&mut self) -> Vec<String> {
        let mut touched = Vec::new();
        for (k, v) in self.0.iter_mut() {
            if v.is_empty() {
                *v = EMPTY_VALUE_SENTINEL.to_string();
                touched.push(k.clone());
            }
        }
        touched
    }

    /// `k1=v1&k2=v2` in key order, values url-encoded.
    pub fn to_query(&self) -> String {
        self.0
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&")
    }
}

/// A canonical query plus its signature. `to_wire()` is what goes on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedQuery {
    pub canonical: String,
    pub signature: String,
}

impl SignedQuery {
    /// Signs `params` + `timestamp` (+ `recvWindow` when given).
    pub fn build(
        secret: &str,
        mut params: QueryParams,
        timestamp_ms: i64,
        recv_window_ms: Option<u64>,
    ) -> Self {
        params.insert("timestamp", timestamp_ms);
        if let Some(w) = recv_window_ms {
            params.insert("recvWindow", w);
        }
        let touched = params.substitute_empty();
        if !touched.is_empty() {
            tracing::warn!(keys = ?touched, "empty parameter values replaced with \"0\" before signing");
        }
        let canonical = params.to_query();
        let signature = sign_query(secret, &canonical);
        Self { canonical, signature }
    }

    pub fn to_wire(&self) -> String {
        if self.canonical.is_empty() {
            format!("signature={}", self.signature)
        } else {
            format!("{}&signature={}", self.canonical, self.signature)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Vector from the Binance API docs (SIGNED endpoint example).
    const DOC_SECRET: &str = "NhqPtmdSJYdKjVHjA7PZj4Mge3R5YNiP1e3UZjInClVN65XAbvqqM6A7H5fATj0j";
    const DOC_QUERY: &str = "symbol=LTCBTC&side=BUY&type=LIMIT&timeInForce=GTC&quantity=1&price=0.1&recvWindow=5000&timestamp=1499827319559";
    const DOC_SIGNATURE: &str = "c8db56825ae71d6d79447849e617115f4a920fa2acdcab2b053c4b2838bd6b71";

    #[test]
    fn matches_documented_vector() {
        assert_eq!(sign_query(DOC_SECRET, DOC_QUERY), DOC_SIGNATURE);
    }

    #[test]
    fn signing_is_deterministic() {
        let a = sign_query("secret", "symbol=BTCUSDT&timestamp=1");
        let b = sign_query("secret", "symbol=BTCUSDT&timestamp=1");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn signing_is_order_sensitive() {
        let a = sign_query("secret", "side=BUY&symbol=BTCUSDT");
        let b = sign_query("secret", "symbol=BTCUSDT&side=BUY");
        assert_ne!(a, b);
    }

    #[test]
    fn params_are_key_sorted_regardless_of_insertion_order() {
        let a = QueryParams::new().with("symbol", "BTCUSDT").with("leverage", 10);
        let b = QueryParams::new().with("leverage", 10).with("symbol", "BTCUSDT");
        assert_eq!(a.to_query(), "leverage=10&symbol=BTCUSDT");
        assert_eq!(a.to_query(), b.to_query());
    }

    #[test]
    fn timestamp_and_signature_placement() {
        let q = SignedQuery::build("secret", QueryParams::new().with("symbol", "BTCUSDT"), 1_700_000_000_000, Some(5000));
        assert_eq!(q.canonical, "recvWindow=5000&symbol=BTCUSDT&timestamp=1700000000000");
        assert_eq!(q.signature, sign_query("secret", &q.canonical));
        let wire = q.to_wire();
        assert!(wire.starts_with(&q.canonical));
        assert!(wire.ends_with(&format!("&signature={}", q.signature)));
    }

    // Quirk kept on purpose: "" becomes "0" before signing, which changes the signature.
    #[test]
    fn empty_values_are_signed_as_zero() {
        let q = SignedQuery::build("secret", QueryParams::new().with("newClientOrderId", "").with("symbol", "BTCUSDT"), 1, None);
        assert_eq!(q.canonical, "newClientOrderId=0&symbol=BTCUSDT&timestamp=1");

        let kept_empty = sign_query("secret", "newClientOrderId=&symbol=BTCUSDT&timestamp=1");
        assert_ne!(q.signature, kept_empty);
    }

    #[test]
    fn values_are_encoded_before_signing() {
        let q = QueryParams::new().with("note", "a b&c");
        assert_eq!(q.to_query(), "note=a%20b%26c");
    }
}
