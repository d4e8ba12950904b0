use solana_sdk::signature::Signature;
use thiserror::Error;

/// Rejected user input. Never fatal: the workflow engine re-prompts on it.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("input cannot be empty")]
    Empty,
    #[error("'{0}' is not a number")]
    NotANumber(String),
    #[error("amount must be greater than 0")]
    Zero,
    #[error("amount exceeds your balance of {available}")]
    ExceedsBalance { available: String },
    #[error("amount exceeds the total of {limit}")]
    ExceedsLimit { limit: String },
    #[error("too many decimal places (token has {decimals})")]
    TooPrecise { decimals: u8 },
    #[error("value must be between {min} and {max}")]
    OutOfRange { min: String, max: String },
    #[error("'{0}' is not a known token symbol or address")]
    UnknownToken(String),
    #[error("'{0}' cannot be resolved on the ledger")]
    Unresolvable(String),
    #[error("you don't have any {0} to sell")]
    NoBalance(String),
    #[error("selected token to {side} is not available for DCA")]
    NotDcaEligible { side: &'static str },
    #[error("buy and sell tokens must differ")]
    SameToken,
    #[error("'{0}' is not a valid address")]
    InvalidAddress(String),
    #[error("invalid private key")]
    InvalidPrivateKey,
    #[error("select at most {0} entries")]
    TooManySelected(usize),
    #[error("connection to RPC failed, enter a valid RPC URL")]
    RpcUnreachable,
    #[error("{0}")]
    Other(String),
}

/// Failure of a workflow run that is not a re-promptable input error.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    #[error("terminal error: {0}")]
    Terminal(#[from] std::io::Error),
    #[error(transparent)]
    Upstream(#[from] anyhow::Error),
}

impl From<ResolveError> for WorkflowError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::NotFound(mint) => WorkflowError::Invalid(ValidationError::Unresolvable(mint)),
            ResolveError::Ledger(err) => WorkflowError::Upstream(err),
        }
    }
}

impl From<SubmissionError> for WorkflowError {
    fn from(err: SubmissionError) -> Self {
        WorkflowError::Upstream(anyhow::Error::new(err))
    }
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("token {0} not found")]
    NotFound(String),
    #[error("ledger query failed: {0:#}")]
    Ledger(#[from] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error("aggregator request failed: {0:#}")]
    Build(anyhow::Error),
    #[error("transaction payload could not be decoded: {0}")]
    Decode(String),
    #[error("transaction rejected: {0:#}")]
    Rejected(anyhow::Error),
    #[error("no confirmation for {signature} after {secs}s")]
    ConfirmationTimeout { signature: Signature, secs: u64 },
}
