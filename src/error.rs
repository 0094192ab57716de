// ===============================
// src/error.rs
// ===============================
use thiserror::Error;

use crate::models::OrderResult;

/// Binance reports a bad HMAC signature (wrong secret, IP allow-list, missing
/// futures permission) with this code.
pub const CODE_BAD_SIGNATURE: i64 = -1022;
/// "No need to change margin type."
pub const CODE_MARGIN_TYPE_UNCHANGED: i64 = -4046;

pub type ClientResult<T> = Result<T, ClientError>;

#[derive(Debug, Clone, Error)]
pub enum ClientError {
    #[error("transport error: {message}")]
    Transport { message: String, timed_out: bool },

    #[error("http status {status}: {body}")]
    Http { status: u16, body: String },

    #[error("decode error: {0}")]
    Decode(String),

    #[error("api error {code}: {msg}")]
    Api { code: i64, msg: String },

    #[error("signature rejected (-1022): {msg}")]
    Signature { msg: String },

    #[error("server time unavailable: {0}")]
    ClockUnavailable(String),

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("api key or secret not configured")]
    MissingCredentials,

    #[error("all endpoint versions failed (tried {}): {last}", attempted.join(", "))]
    AllEndpointsFailed {
        attempted: Vec<String>,
        last: Box<ClientError>,
    },

    #[error("{message}")]
    LegsFailed {
        message: String,
        placed: Vec<OrderResult>,
    },
}

impl ClientError {
    /// Build from a `{code, msg}` payload; -1022 gets its own kind.
    pub fn from_api(code: i64, msg: impl Into<String>) -> Self {
        let msg = msg.into();
        if code == CODE_BAD_SIGNATURE {
            ClientError::Signature { msg }
        } else {
            ClientError::Api { code, msg }
        }
    }

    pub fn is_signature(&self) -> bool {
        match self {
            ClientError::Signature { .. } => true,
            ClientError::AllEndpointsFailed { last, .. } => last.is_signature(),
            _ => false,
        }
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, ClientError::Transport { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ClientError::Transport { timed_out: true, .. })
    }

    /// Exchange error code, if the failure came from the exchange.
    pub fn api_code(&self) -> Option<i64> {
        match self {
            ClientError::Api { code, .. } => Some(*code),
            ClientError::Signature { .. } => Some(CODE_BAD_SIGNATURE),
            ClientError::AllEndpointsFailed { last, .. } => last.api_code(),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        ClientError::Transport {
            timed_out: e.is_timeout(),
            message: e.to_string(),
        }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(e: serde_json::Error) -> Self {
        ClientError::Decode(e.to_string())
    }
}

impl From<url::ParseError> for ClientError {
    fn from(e: url::ParseError) -> Self {
        ClientError::Validation(format!("bad url: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_signature_code_is_its_own_kind() {
        let e = ClientError::from_api(-1022, "Signature for this request is not valid.");
        assert!(e.is_signature());
        assert_eq!(e.api_code(), Some(-1022));

        let e = ClientError::from_api(-2019, "Margin is insufficient.");
        assert!(!e.is_signature());
        assert!(matches!(e, ClientError::Api { code: -2019, .. }));
    }

    #[test]
    fn fallback_error_keeps_versions_and_last_cause() {
        let e = ClientError::AllEndpointsFailed {
            attempted: vec!["v2".into(), "v1".into(), "v3".into()],
            last: Box::new(ClientError::from_api(-1022, "bad sig")),
        };
        let text = e.to_string();
        assert!(text.contains("v2, v1, v3"));
        assert!(text.contains("bad sig"));
        assert!(e.is_signature());
    }
}
