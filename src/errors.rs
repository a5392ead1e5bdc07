use thiserror::Error;

/// Classified failures surfaced to the dashboard. Provider and contract
/// errors are translated into these at each component boundary; nothing
/// reaches the caller unclassified.
#[derive(Error, Debug)]
pub enum VoteError {
    #[error("no wallet provider available")]
    ProviderUnavailable,
    #[error("user rejected the request")]
    UserRejected,
    #[error("wallet is not connected")]
    NotConnected,
    #[error("ledger read failed: {0}")]
    LedgerRead(String),
    #[error("another vote submission is in progress")]
    SubmissionInProgress,
    #[error("account has already voted")]
    AlreadyVoted,
    #[error("unknown candidate id: {0}")]
    InvalidCandidate(u32),
    #[error("contract reverted: {0}")]
    ContractReverted(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("timed out waiting for confirmation")]
    ConfirmationTimeout,
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("{0}")]
    Unknown(String),
}

pub type Result<T> = std::result::Result<T, VoteError>;
