use miette::Diagnostic;
use thiserror::Error;

/// Every failure the engine can surface.
///
/// Errors are grouped the way callers reason about them: identity, validation,
/// state, authorization and delegation. All of them abort the operation that
/// produced them without persisting anything.
#[derive(Error, Diagnostic, Debug)]
pub enum PaymentError {
    // Identity
    #[error("invalid username: {0:?}")]
    #[diagnostic(
        code(namepay::identity::invalid_identifier),
        help("usernames are 3-20 chars: a lowercase letter, then lowercase letters, digits or single underscores, not ending in '_'")
    )]
    InvalidIdentifier(String),
    #[error("username already claimed: {0}")]
    #[diagnostic(code(namepay::identity::already_claimed))]
    AlreadyClaimed(String),
    #[error("username not found: {0}")]
    #[diagnostic(code(namepay::identity::not_found))]
    UsernameNotFound(String),
    #[error("caller is not the controller of {0}")]
    #[diagnostic(code(namepay::identity::not_controller))]
    NotController(String),
    #[error("recipient must not be the zero address")]
    #[diagnostic(code(namepay::identity::invalid_recipient))]
    InvalidRecipient,
    #[error("controller must not be the zero address")]
    #[diagnostic(code(namepay::identity::invalid_controller))]
    InvalidController,
    #[error("authorization expired at {deadline} (now {now})")]
    #[diagnostic(code(namepay::identity::expired_authorization))]
    ExpiredAuthorization { deadline: u64, now: u64 },
    #[error("authorization signature rejected")]
    #[diagnostic(code(namepay::identity::invalid_authorization))]
    InvalidAuthorization,

    // Validation
    #[error("amount must be greater than zero")]
    #[diagnostic(code(namepay::validation::zero_amount))]
    ZeroAmount,
    #[error("flow rate must be greater than zero")]
    #[diagnostic(code(namepay::validation::zero_flow_rate))]
    ZeroFlowRate,
    #[error("token must not be the zero address")]
    #[diagnostic(code(namepay::validation::zero_token))]
    ZeroToken,
    #[error("first payment date {first_payment_date} must be after {now}")]
    #[diagnostic(code(namepay::validation::invalid_first_payment_date))]
    InvalidFirstPaymentDate { first_payment_date: u64, now: u64 },
    #[error("{kind} capacity of {limit} reached for {username}")]
    #[diagnostic(code(namepay::validation::capacity_exceeded))]
    CapacityExceeded {
        username: String,
        kind: &'static str,
        limit: usize,
    },
    #[error("an active stream with the same token and flow rate already exists: {0}")]
    #[diagnostic(code(namepay::validation::duplicate_stream))]
    DuplicateStream(String),
    #[error("flow rate is unchanged")]
    #[diagnostic(code(namepay::validation::flow_rate_unchanged))]
    FlowRateUnchanged,
    #[error("arithmetic overflow while computing {0}")]
    #[diagnostic(code(namepay::validation::arithmetic_overflow))]
    ArithmeticOverflow(&'static str),

    // State
    #[error("stream not found: {0}")]
    #[diagnostic(code(namepay::state::stream_not_found))]
    StreamNotFound(String),
    #[error("stream is not active: {0}")]
    #[diagnostic(code(namepay::state::stream_not_active))]
    StreamNotActive(String),
    #[error("stream {id} is {actual}, expected {expected}")]
    #[diagnostic(code(namepay::state::stream_state_mismatch))]
    StreamStateMismatch {
        id: String,
        expected: &'static str,
        actual: &'static str,
    },
    #[error("schedule not found: {0}")]
    #[diagnostic(code(namepay::state::schedule_not_found))]
    ScheduleNotFound(String),
    #[error("schedule is not active: {0}")]
    #[diagnostic(code(namepay::state::schedule_not_active))]
    ScheduleNotActive(String),
    #[error("payment not due until {next_payout} (now {now})")]
    #[diagnostic(code(namepay::state::payment_not_due))]
    PaymentNotDue { next_payout: u64, now: u64 },
    #[error("stream already pays the current recipient: {0}")]
    #[diagnostic(code(namepay::state::migration_not_required))]
    MigrationNotRequired(String),

    // Authorization
    #[error("caller {caller} lacks {permission} on {resource}")]
    #[diagnostic(code(namepay::authorization::unauthorized))]
    Unauthorized {
        caller: String,
        permission: &'static str,
        resource: String,
    },
    /// Another mutation holds the orchestrator. Raised both for nested
    /// entry and for a concurrent caller; concurrent callers must serialize
    /// their mutations and retry.
    #[error("orchestrator is busy with another mutation")]
    #[diagnostic(
        code(namepay::authorization::reentrancy),
        help("mutations are sequential; serialize callers and retry")
    )]
    Reentrancy,

    // Delegation
    #[error("delegated instruction batch failed: {0}")]
    #[diagnostic(code(namepay::delegation::failed))]
    DelegationFailed(String),

    // Ambient
    #[error("storage error: {0}")]
    #[diagnostic(code(namepay::storage))]
    Storage(String),
    #[error("serialization error: {0}")]
    #[diagnostic(code(namepay::serialization))]
    Serialization(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    #[diagnostic(code(namepay::config))]
    Config(String),
    #[error("CSV error: {0}")]
    #[diagnostic(code(namepay::csv))]
    Csv(#[from] csv::Error),
    #[error("IO error: {0}")]
    #[diagnostic(code(namepay::io))]
    Io(#[from] std::io::Error),
}

#[cfg(feature = "storage-rocksdb")]
impl From<rocksdb::Error> for PaymentError {
    fn from(err: rocksdb::Error) -> Self {
        PaymentError::Storage(err.into_string())
    }
}

pub type Result<T> = std::result::Result<T, PaymentError>;
