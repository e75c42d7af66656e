//! The single error type used across the SDK.
//!
//! Every fallible operation returns [Error]: a kind tag, a stable numeric
//! code, a human readable message and (where available) a remediation
//! suggestion plus structured details. Construct errors through the per-kind
//! factory functions rather than building the struct by hand.

use std::collections::BTreeMap;

/// Stable RPC error codes carried in error envelopes.
pub mod codes {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;
    pub const UNAUTHORIZED: i32 = -32000;
    pub const INVALID_SIGNATURE: i32 = -32003;
    pub const INVALID_TRANSITION: i32 = -32005;
    pub const TIMEOUT: i32 = -32008;
    pub const CONNECTION_CLOSED: i32 = -32010;
    pub const CHAIN_ERROR: i32 = -32020;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed params or shape. Local, never retried.
    Validation,
    /// Bad signature, unauthorized caller or failed challenge.
    Authentication,
    /// Transport-level failure; rejects in-flight requests.
    Connection,
    /// Request-level timeout after exhausting retries.
    Timeout,
    /// Invalid channel-state transition. Never retried.
    State,
    /// On-chain contract call reverted or misbehaved.
    Contract,
    /// Transaction submission failure.
    Transaction,
    /// Token balance/allowance failure.
    Token,
    /// Error envelope received from the counterparty.
    Rpc,
    Internal,
}

impl ErrorKind {
    /// Default wire code for errors of this kind.
    pub fn code(self) -> i32 {
        match self {
            ErrorKind::Validation => codes::INVALID_PARAMS,
            ErrorKind::Authentication => codes::UNAUTHORIZED,
            ErrorKind::Connection => codes::CONNECTION_CLOSED,
            ErrorKind::Timeout => codes::TIMEOUT,
            ErrorKind::State => codes::INVALID_TRANSITION,
            ErrorKind::Contract | ErrorKind::Transaction | ErrorKind::Token => codes::CHAIN_ERROR,
            ErrorKind::Rpc => codes::INTERNAL_ERROR,
            ErrorKind::Internal => codes::INTERNAL_ERROR,
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct Error {
    pub kind: ErrorKind,
    pub code: i32,
    pub message: String,
    pub suggestion: Option<String>,
    pub details: BTreeMap<String, String>,
}

impl Error {
    fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Error {
            kind,
            code: kind.code(),
            message: message.into(),
            suggestion: None,
            details: BTreeMap::new(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Authentication, message)
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Connection, message)
    }

    pub fn timeout(attempts: u32) -> Self {
        Self::new(
            ErrorKind::Timeout,
            format!("request timed out after {} attempts", attempts),
        )
        .with_detail("attempts", attempts.to_string())
    }

    pub fn state(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::State, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn method_not_found(method: &str) -> Self {
        let mut e = Self::new(ErrorKind::Rpc, format!("method not found: {}", method));
        e.code = codes::METHOD_NOT_FOUND;
        e
    }

    pub fn invalid_signature() -> Self {
        let mut e = Self::new(ErrorKind::Authentication, "invalid signature");
        e.code = codes::INVALID_SIGNATURE;
        e
    }

    /// An error envelope received from the counterparty, with its wire code.
    pub fn rpc(code: i32, message: impl Into<String>) -> Self {
        let mut e = Self::new(ErrorKind::Rpc, message);
        e.code = code;
        e
    }

    /// Categorize a chain-interface failure by sniffing its message, so the
    /// caller gets an actionable suggestion instead of a raw revert string.
    pub fn from_chain_message(message: &str) -> Self {
        let lower = message.to_lowercase();
        if lower.contains("allowance") {
            Self::new(ErrorKind::Token, message)
                .with_suggestion("approve the custody contract to spend the token first")
        } else if lower.contains("balance") || lower.contains("insufficient funds") {
            Self::new(ErrorKind::Token, message)
                .with_suggestion("deposit or acquire enough tokens before retrying")
        } else if lower.contains("revert") {
            Self::new(ErrorKind::Contract, message)
                .with_suggestion("the adjudicator rejected the submitted state; resync the channel")
        } else {
            Self::new(ErrorKind::Transaction, message)
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    /// True when the failure text points at a stale or rejected JWT, in which
    /// case the cached token must be discarded and the full challenge flow
    /// retried once.
    pub fn is_jwt_related(&self) -> bool {
        let lower = self.message.to_lowercase();
        lower.contains("jwt")
            || lower.contains("token")
            || lower.contains("expired")
            || lower.contains("invalid")
    }
}

pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_message_categorization() {
        let e = Error::from_chain_message("ERC20: transfer amount exceeds allowance");
        assert_eq!(e.kind, ErrorKind::Token);
        assert!(e.suggestion.is_some());

        let e = Error::from_chain_message("execution reverted: invalid state");
        assert_eq!(e.kind, ErrorKind::Contract);

        let e = Error::from_chain_message("nonce too low");
        assert_eq!(e.kind, ErrorKind::Transaction);
    }

    #[test]
    fn timeout_carries_attempts() {
        let e = Error::timeout(4);
        assert_eq!(e.kind, ErrorKind::Timeout);
        assert_eq!(e.details.get("attempts").map(String::as_str), Some("4"));
    }

    #[test]
    fn jwt_detection() {
        assert!(Error::authentication("jwt expired").is_jwt_related());
        assert!(Error::rpc(-32000, "invalid token").is_jwt_related());
        assert!(!Error::authentication("challenge mismatch").is_jwt_related());
    }
}
