// ===============================
// src/credentials.rs
// ===============================
//
// Credentials are mutable shared state. Anything that signs must call
// `current()` at sign time; never keep a copy across calls.
//
use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Clone, PartialEq, Eq, Default)]
pub struct Credentials {
    pub api_key: String,
    pub secret_key: String,
    pub use_testnet: bool,
}

impl Credentials {
    pub fn new(api_key: impl Into<String>, secret_key: impl Into<String>, use_testnet: bool) -> Self {
        Self { api_key: api_key.into(), secret_key: secret_key.into(), use_testnet }
    }

    pub fn is_complete(&self) -> bool {
        !self.api_key.is_empty() && !self.secret_key.is_empty()
    }
}

// never print the secret
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key_len", &self.api_key.len())
            .field("secret_key_len", &self.secret_key.len())
            .field("use_testnet", &self.use_testnet)
            .finish()
    }
}

/// Source of the live credential value, with change notification.
pub trait CredentialsProvider: Send + Sync {
    fn current(&self) -> Credentials;
    fn subscribe(&self) -> watch::Receiver<Credentials>;
}

/// In-process provider backed by a `watch` channel.
#[derive(Clone)]
pub struct SharedCredentials {
    tx: Arc<watch::Sender<Credentials>>,
}

impl SharedCredentials {
    pub fn new(initial: Credentials) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    pub fn update(&self, creds: Credentials) {
        info!(testnet = creds.use_testnet, api_key_len = creds.api_key.len(), "credentials updated");
        self.tx.send_replace(creds);
    }

    pub fn set_testnet(&self, use_testnet: bool) {
        self.tx.send_modify(|c| c.use_testnet = use_testnet);
    }

    /// Swap in the key set for `profile`, keeping the network flag.
    /// Returns false when no usable key set exists.
    pub fn switch_profile(&self, profiles: &ApiProfiles, profile: ApiProfile) -> bool {
        let Some(set) = profiles.resolve(profile) else {
            warn!(?profile, "no api key set configured");
            return false;
        };
        let use_testnet = self.tx.borrow().use_testnet;
        self.update(Credentials::new(set.api_key.clone(), set.secret_key.clone(), use_testnet));
        true
    }
}

impl CredentialsProvider for SharedCredentials {
    fn current(&self) -> Credentials {
        self.tx.borrow().clone()
    }

    fn subscribe(&self) -> watch::Receiver<Credentials> {
        self.tx.subscribe()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApiProfile {
    Trading,
    ReadOnly,
}

#[derive(Clone, PartialEq, Eq)]
pub struct ApiKeySet {
    pub api_key: String,
    pub secret_key: String,
}

impl fmt::Debug for ApiKeySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiKeySet").field("api_key_len", &self.api_key.len()).finish()
    }
}

/// Trading keys plus an optional read-only set.
#[derive(Clone, Debug, Default)]
pub struct ApiProfiles {
    pub trading: Option<ApiKeySet>,
    pub read_only: Option<ApiKeySet>,
}

impl ApiProfiles {
    /// Read-only falls back to the trading set when none is configured.
    pub fn resolve(&self, profile: ApiProfile) -> Option<&ApiKeySet> {
        match profile {
            ApiProfile::Trading => self.trading.as_ref(),
            ApiProfile::ReadOnly => {
                if self.read_only.is_none() {
                    info!("no read-only key set, using trading keys");
                }
                self.read_only.as_ref().or(self.trading.as_ref())
            }
        }
    }

    pub fn initial_credentials(&self, use_testnet: bool) -> Credentials {
        match &self.trading {
            Some(set) => Credentials::new(set.api_key.clone(), set.secret_key.clone(), use_testnet),
            None => Credentials { use_testnet, ..Default::default() },
        }
    }
}
