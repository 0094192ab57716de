// ===============================
// src/lib.rs
// ===============================
pub mod account;
pub mod clock;
pub mod config;
pub mod credentials;
pub mod error;
pub mod gateway;
pub mod metrics;
pub mod models;
pub mod orders;
pub mod recorder;
pub mod rest;
pub mod signer;
pub mod stream;
pub mod symbols;
pub mod transport;

pub use account::{AccountSnapshot, AssetBalance, Position, SimplifiedAccount, SimplifiedPosition};
pub use credentials::{ApiProfile, Credentials, CredentialsProvider, SharedCredentials};
pub use error::{ClientError, ClientResult};
pub use gateway::OrderGateway;
pub use orders::{OpenPositionRequest, Orchestrator, TpSlLeg, TpSlReport, TpSlRequest};
pub use rest::{ConnectionReport, OrderRef, RestClient};
pub use stream::{PriceStream, PriceTick, StreamState};
pub use symbols::SymbolCache;
