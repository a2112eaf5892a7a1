use crate::self_check::Violation;
use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Caller misuse of the cursor provider. Never retried.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invariant violation: {0}")]
    InvariantViolation(Violation),

    #[error(transparent)]
    DomainValidation(#[from] DomainValidationError),

    #[error("Participant '{0}' not found")]
    ParticipantNotFound(String),

    #[error("Amount {0} does not fit the ledger")]
    AmountOutOfRange(Decimal),

    #[error("Timestamp {0}us is out of range")]
    TimestampOutOfRange(i64),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Request-level rejections from the tip endpoint. Recoverable; they never
/// touch server-side state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainValidationError {
    #[error("'{amount}' is not a valid donation amount (min={min}, max={max})")]
    InvalidAmount {
        amount: String,
        min: String,
        max: String,
    },

    #[error("{0} doesn't accept donations.")]
    NotAcceptingDonations(String),

    #[error("You can't donate to yourself.")]
    SelfTip,
}

pub type LedgerResult<T> = Result<T, LedgerError>;
