//! Layered error types for the observation core.
//!
//! This module provides a hierarchical error system:
//!
//! - [`DomainError`] - Host-fault and validation errors (gouging, bad keys)
//! - [`InfraError`] - Infrastructure errors (database, RPC, DNS, config)
//! - [`AppError`] - Application-level errors combining domain and infra
//!
//! # Error Philosophy
//!
//! - Domain errors count against the host (failed scans/benchmarks record
//!   the message and feed the interval back-off)
//! - Infrastructure errors are operator-side and never penalize a host
//! - Shutdown cancellation is an error in shape only: workers detect it via
//!   [`AppError::is_cancellation`] and suppress persistence

use thiserror::Error;

// ═══════════════════════════════════════════════════════════════════════════════
// DOMAIN ERRORS
// ═══════════════════════════════════════════════════════════════════════════════

/// Domain-level errors representing host faults and invalid input.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DomainError {
    /// A host price or term exceeds the current limits.
    #[error("gouging: {0}")]
    Gouging(String),

    /// Host is not accepting contracts.
    #[error("host is not accepting contracts")]
    NotAcceptingContracts,

    /// No host row exists for the given key.
    #[error("host not found: {0}")]
    HostNotFound(String),

    /// The announced network address is unusable.
    #[error("invalid net address: {0}")]
    InvalidNetAddress(String),

    /// A public key could not be parsed.
    #[error("invalid public key: {0}")]
    InvalidHostKey(String),

    /// A currency value could not be parsed.
    #[error("invalid currency value: {0}")]
    InvalidCurrency(String),

    /// The host answered a benchmark RPC with a protocol violation.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// The host refused contract formation.
    #[error("contract refused: {0}")]
    ContractRefused(String),
}

// ═══════════════════════════════════════════════════════════════════════════════
// INFRASTRUCTURE ERRORS
// ═══════════════════════════════════════════════════════════════════════════════

/// Infrastructure-level errors from external systems.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum InfraError {
    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// RPC transport error (chain daemon, RHP session, wallet).
    #[error("RPC error: {0}")]
    Rpc(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// DNS resolution failure for a host net address.
    #[error("resolution error: {0}")]
    Resolution(String),

    /// JSON serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP client error (exchange rate, geolocation).
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Operation exceeded its deadline.
    #[error("operation timed out: {0}")]
    Timeout(String),

    /// Configuration file error.
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Invariant violation inside the infrastructure layer (corrupt row,
    /// impossible state).
    #[error("internal error: {0}")]
    Internal(String),
}

// ═══════════════════════════════════════════════════════════════════════════════
// APPLICATION ERRORS
// ═══════════════════════════════════════════════════════════════════════════════

/// Application-level errors combining domain and infrastructure errors.
///
/// This is the primary error type used throughout the application.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AppError {
    /// Host-fault or validation error.
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// Infrastructure error.
    #[error(transparent)]
    Infra(#[from] InfraError),

    /// The renter wallet could not cover a benchmark cost. Operator-side:
    /// aborts the attempt without counting against the host.
    #[error("insufficient balance: {0}")]
    InsufficientBalance(String),

    /// Configuration error outside the config crate (CLI overrides, paths).
    #[error("configuration error: {0}")]
    Config(String),

    /// Startup wiring failure.
    #[error("initialization error: {0}")]
    Initialization(String),

    /// Graceful shutdown requested.
    #[error("operation canceled: shutdown requested")]
    ShutdownRequested,
}

impl AppError {
    /// Whether this error is a shutdown cancellation.
    ///
    /// Workers suppress persistence when the error chain carries the
    /// `"canceled"` marker, so a probe cut short by shutdown never records
    /// a failure against the host.
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::ShutdownRequested) || self.to_string().contains("canceled")
    }

    /// Whether this error is an operator-side funding problem rather than a
    /// host fault.
    #[must_use]
    pub const fn is_insufficient_balance(&self) -> bool {
        matches!(self, Self::InsufficientBalance(_))
    }
}

/// Type alias for application Results.
pub type Result<T> = std::result::Result<T, AppError>;

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_error_display() {
        let err = DomainError::Gouging("storage price 5 SC exceeds limit 2 SC".into());
        assert!(err.to_string().contains("storage price"));
    }

    #[test]
    fn app_error_from_domain() {
        let app: AppError = DomainError::NotAcceptingContracts.into();
        assert!(matches!(
            app,
            AppError::Domain(DomainError::NotAcceptingContracts)
        ));
    }

    #[test]
    fn cancellation_is_detected_from_message() {
        let err = AppError::Infra(InfraError::Rpc("stream canceled by peer".into()));
        assert!(err.is_cancellation());

        let err = AppError::ShutdownRequested;
        assert!(err.is_cancellation());

        let err = AppError::Infra(InfraError::Resolution("no such host".into()));
        assert!(!err.is_cancellation());
    }

    #[test]
    fn insufficient_balance_is_not_a_host_fault() {
        let err = AppError::InsufficientBalance("need 2 SC, have 1 SC".into());
        assert!(err.is_insufficient_balance());
        assert!(!err.is_cancellation());
    }
}
