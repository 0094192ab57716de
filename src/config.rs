// ===============================
// src/config.rs
// ===============================
/*
=============================================================================
Project : fapi_trader — Binance USDⓈ-M futures trading client in Rust
Module  : config.rs
Version : 0.1.0
Author  : Kukuh Tripamungkas Wicaksono (Kukuh TW)
License : MIT (see LICENSE)

Summary : Signs and sends futures REST calls against server time, normalizes
          drifting account payloads, sequences leverage/margin/order steps,
          fans out TP/SL legs, and keeps one live mark-price stream.
=============================================================================
*/
use std::env;
use std::time::Duration;

use dotenvy::dotenv;

use crate::credentials::{ApiKeySet, ApiProfiles};

/// Futures network (production vs testnet)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Network {
    Mainnet,
    Testnet,
}

impl Network {
    pub fn from_testnet_flag(use_testnet: bool) -> Self {
        if use_testnet { Network::Testnet } else { Network::Mainnet }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Mainnet => "mainnet",
            Network::Testnet => "testnet",
        }
    }

    // Endpoint default per network
    pub fn default_rest_url(&self) -> &'static str {
        match self {
            Network::Mainnet => "https://fapi.binance.com",
            Network::Testnet => "https://testnet.binancefuture.com",
        }
    }

    pub fn default_ws_url(&self) -> &'static str {
        match self {
            Network::Mainnet => "wss://fstream.binance.com",
            Network::Testnet => "wss://fstream.binancefuture.com",
        }
    }
}

/// REST + WS base hosts for both networks. Which pair is used is decided per
/// call from the current credentials' `use_testnet` flag.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoints {
    pub rest_mainnet: String,
    pub rest_testnet: String,
    pub ws_mainnet: String,
    pub ws_testnet: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            rest_mainnet: Network::Mainnet.default_rest_url().to_string(),
            rest_testnet: Network::Testnet.default_rest_url().to_string(),
            ws_mainnet: Network::Mainnet.default_ws_url().to_string(),
            ws_testnet: Network::Testnet.default_ws_url().to_string(),
        }
    }
}

impl Endpoints {
    /// Same host for both networks (tests, proxies).
    pub fn single(rest: &str, ws: &str) -> Self {
        Self {
            rest_mainnet: rest.to_string(),
            rest_testnet: rest.to_string(),
            ws_mainnet: ws.to_string(),
            ws_testnet: ws.to_string(),
        }
    }

    pub fn rest_base(&self, use_testnet: bool) -> &str {
        match Network::from_testnet_flag(use_testnet) {
            Network::Mainnet => self.rest_mainnet.trim_end_matches('/'),
            Network::Testnet => self.rest_testnet.trim_end_matches('/'),
        }
    }

    pub fn ws_base(&self, use_testnet: bool) -> &str {
        match Network::from_testnet_flag(use_testnet) {
            Network::Mainnet => self.ws_mainnet.trim_end_matches('/'),
            Network::Testnet => self.ws_testnet.trim_end_matches('/'),
        }
    }
}

/// Plain-text "what is my IP" services, tried in order.
pub const DEFAULT_IP_SERVICES: [&str; 8] = [
    "https://api.ipify.org",
    "https://ipv4.icanhazip.com",
    "https://ifconfig.me/ip",
    "https://api.ip.sb/ip",
    "https://api4.ipify.org",
    "https://ipinfo.io/ip",
    "https://checkip.amazonaws.com",
    "https://wtfismyip.com/text",
];

/// Knobs for the REST executor.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub endpoints: Endpoints,
    pub recv_window_ms: u64,
    pub request_timeout: Duration,
    /// Used by the connection test to show which IP the exchange sees.
    pub ip_services: Vec<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoints: Endpoints::default(),
            recv_window_ms: 5000,
            request_timeout: Duration::from_secs(30),
            ip_services: DEFAULT_IP_SERVICES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Settings {
    pub client: ClientConfig,
    pub profiles: ApiProfiles,
    pub use_testnet: bool,
    pub ws_reconnect_delay: Duration,

    // files/metrics
    pub metrics_port: Option<u16>,
    pub record_file: Option<String>,
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

fn env_flag(key: &str, default: bool) -> bool {
    match env::var(key).unwrap_or_default().trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => default,
    }
}

fn env_key_set(key_var: &str, secret_var: &str) -> Option<ApiKeySet> {
    let api_key = env::var(key_var).ok().filter(|s| !s.trim().is_empty())?;
    let secret_key = env::var(secret_var).ok().filter(|s| !s.trim().is_empty())?;
    Some(ApiKeySet { api_key: api_key.trim().to_string(), secret_key: secret_key.trim().to_string() })
}

pub fn load() -> Settings {
    // Pastikan .env dibaca (agar BINANCE_API_KEY, dll ter-load)
    let _ = dotenv();

    // testnet on by default
    let use_testnet = env_flag("BINANCE_USE_TESTNET", true);

    let endpoints = Endpoints {
        rest_mainnet: env::var("BINANCE_FUTURES_REST_URL")
            .unwrap_or_else(|_| Network::Mainnet.default_rest_url().to_string()),
        rest_testnet: env::var("BINANCE_FUTURES_TESTNET_REST_URL")
            .unwrap_or_else(|_| Network::Testnet.default_rest_url().to_string()),
        ws_mainnet: env::var("BINANCE_FUTURES_WS_URL")
            .unwrap_or_else(|_| Network::Mainnet.default_ws_url().to_string()),
        ws_testnet: env::var("BINANCE_FUTURES_TESTNET_WS_URL")
            .unwrap_or_else(|_| Network::Testnet.default_ws_url().to_string()),
    };

    let client = ClientConfig {
        endpoints,
        recv_window_ms: env_parse("BINANCE_RECV_WINDOW").unwrap_or(5000),
        request_timeout: Duration::from_secs(env_parse("HTTP_TIMEOUT_SECS").unwrap_or(30)),
        ip_services: env::var("PUBLIC_IP_SERVICES")
            .ok()
            .map(|v| v.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect::<Vec<_>>())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_IP_SERVICES.iter().map(|s| s.to_string()).collect()),
    };

    let profiles = ApiProfiles {
        trading: env_key_set("BINANCE_API_KEY", "BINANCE_API_SECRET"),
        read_only: env_key_set("BINANCE_READONLY_API_KEY", "BINANCE_READONLY_API_SECRET"),
    };

    Settings {
        client,
        profiles,
        use_testnet,
        ws_reconnect_delay: Duration::from_millis(env_parse("WS_RECONNECT_DELAY_MS").unwrap_or(3000)),
        metrics_port: env_parse("METRICS_PORT"),
        record_file: env::var("RECORD_FILE").ok().filter(|s| !s.is_empty()),
    }
}
