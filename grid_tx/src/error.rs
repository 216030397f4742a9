// SPDX-License-Identifier: MIT OR Apache-2.0
//! Error types for grid_tx.

use thiserror::Error;

/// Result type for grid_tx operations.
pub type Result<T> = std::result::Result<T, TxError>;

/// Errors that can occur while building or mutating transaction state.
#[derive(Debug, Error)]
pub enum TxError {
    /// No variant family matches the configured capabilities.
    #[error(
        "unsupported combination (deadlock_detection, recovery, two_phase_commit) = \
         ({deadlock_detection}, {recovery}, {two_phase_commit})"
    )]
    UnsupportedCombination {
        deadlock_detection: bool,
        recovery: bool,
        two_phase_commit: bool,
    },

    /// Invalid configuration value.
    #[error("configuration error: {0}")]
    Config(String),

    /// Internal id was already attached to the identity.
    #[error("internal id already assigned to {0}")]
    InternalIdAlreadySet(String),

    /// Coin toss was already attached to the identity.
    #[error("coin toss already assigned to {0}")]
    CoinTossAlreadySet(String),

    /// Identity template was already materialized.
    #[error("identity already assigned: {0}")]
    IdentityAlreadyAssigned(String),

    /// Identity or payload does not match the expected variant.
    #[error("incompatible identity: {0}")]
    IncompatibleIdentity(String),

    /// Recovery flags used on a transaction kind that does not track them.
    #[error("recovery not enabled: {0}")]
    RecoveryDisabled(String),

    /// Attempt to clear a monotonic flag.
    #[error("{flag} flag cannot be reset once set")]
    FlagReset { flag: &'static str },

    /// State transition not valid.
    #[error("invalid state transition: {0}")]
    InvalidTransition(String),

    /// Transaction already reached a terminal state.
    #[error("transaction already completed: {0}")]
    TransactionCompleted(String),

    /// Factory was already wired to a membership notifier.
    #[error("transaction factory already started")]
    AlreadyStarted,

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<bincode::Error> for TxError {
    fn from(err: bincode::Error) -> Self {
        TxError::Serialization(err.to_string())
    }
}
