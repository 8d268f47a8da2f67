//! Error types for the bridge step pipeline

use thiserror::Error;

/// Main error type for the bridge
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Wallet connection error for {chain}: {message}")]
    Connection { chain: String, message: String },

    #[error("Wallet on {chain} is connected to {actual}, expected {expected}")]
    NetworkMismatch {
        chain: String,
        expected: String,
        actual: String,
    },

    #[error("Estimation error: {0}")]
    Estimation(String),

    #[error("Invalid amount '{0}'")]
    InvalidAmount(String),

    #[error("Insufficient balance: have {have}, need {need}")]
    InsufficientBalance { have: String, need: String },

    #[error("Unsupported currency pair {from} -> {to}")]
    UnsupportedPair { from: String, to: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Chain query error on {chain}: {message}")]
    Chain { chain: String, message: String },

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Wallet error: {0}")]
    Wallet(String),

    #[error("Timeout waiting for {operation}")]
    Timeout { operation: String },

    #[error("Stale result discarded")]
    StaleResultDiscarded,

    #[error("{what} not found")]
    NotFound { what: String },

    #[error("Step {step_id} is executing")]
    StepBusy { step_id: u64 },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BridgeError {
    /// Discarded estimates are not errors from the user's point of view
    pub fn is_user_visible(&self) -> bool {
        !matches!(self, BridgeError::StaleResultDiscarded)
    }

    /// Check if error belongs to the estimation family
    pub fn is_estimation_failure(&self) -> bool {
        matches!(
            self,
            BridgeError::Estimation(_)
                | BridgeError::InvalidAmount(_)
                | BridgeError::InsufficientBalance { .. }
                | BridgeError::UnsupportedPair { .. }
                | BridgeError::Http(_)
                | BridgeError::Chain { .. }
                | BridgeError::Connection { .. }
        )
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        BridgeError::NotFound { what: what.into() }
    }

    pub fn chain(chain: impl Into<String>, message: impl ToString) -> Self {
        BridgeError::Chain {
            chain: chain.into(),
            message: message.to_string(),
        }
    }
}

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;
