use crate::fixed_point::MathError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable classification of a rejected operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    ConfigurationInvalid,
    Unauthorized,
    AlreadyEnrolled,
    CycleDetected,
    NotEnrolled,
    InvalidAccount,
    InvalidAmount,
    InsufficientStake,
    InsufficientBalance,
    TooEarly,
    TransferLimitExceeded,
    Math,
}

/// Errors surfaced by the economy engines.
///
/// Every variant aborts the triggering operation as a whole. The payload is
/// the human-readable reason shown to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuotaError {
    #[error("invalid configuration: {0}")]
    ConfigurationInvalid(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("already enrolled: {0}")]
    AlreadyEnrolled(String),

    #[error("referral cycle detected: {0}")]
    CycleDetected(String),

    #[error("not enrolled: {0}")]
    NotEnrolled(String),

    #[error("invalid account: {0}")]
    InvalidAccount(String),

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("insufficient stake: requested {requested}, staked {staked}")]
    InsufficientStake { requested: u128, staked: u128 },

    #[error("insufficient balance: requested {requested}, available {available}")]
    InsufficientBalance { requested: u128, available: u128 },

    #[error("too early: next rebase allowed at {next_allowed}, now {now}")]
    TooEarly { now: u64, next_allowed: u64 },

    #[error("transfer above daily limit: requested {requested}, remaining {remaining}")]
    TransferLimitExceeded { requested: u128, remaining: u128 },

    #[error("arithmetic failure: {0}")]
    Math(#[from] MathError),
}

impl QuotaError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            QuotaError::ConfigurationInvalid(_) => ErrorKind::ConfigurationInvalid,
            QuotaError::Unauthorized(_) => ErrorKind::Unauthorized,
            QuotaError::AlreadyEnrolled(_) => ErrorKind::AlreadyEnrolled,
            QuotaError::CycleDetected(_) => ErrorKind::CycleDetected,
            QuotaError::NotEnrolled(_) => ErrorKind::NotEnrolled,
            QuotaError::InvalidAccount(_) => ErrorKind::InvalidAccount,
            QuotaError::InvalidAmount(_) => ErrorKind::InvalidAmount,
            QuotaError::InsufficientStake { .. } => ErrorKind::InsufficientStake,
            QuotaError::InsufficientBalance { .. } => ErrorKind::InsufficientBalance,
            QuotaError::TooEarly { .. } => ErrorKind::TooEarly,
            QuotaError::TransferLimitExceeded { .. } => ErrorKind::TransferLimitExceeded,
            QuotaError::Math(_) => ErrorKind::Math,
        }
    }

    pub fn config(reason: impl Into<String>) -> Self {
        QuotaError::ConfigurationInvalid(reason.into())
    }

    pub fn invalid_amount(reason: impl Into<String>) -> Self {
        QuotaError::InvalidAmount(reason.into())
    }
}

pub type Result<T> = std::result::Result<T, QuotaError>;
