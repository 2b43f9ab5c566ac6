use thiserror::Error;

/// Classified outcome of a single remote action invocation.
///
/// The classification drives the executor's per-target failure policy:
/// `Transient` and `TargetInvalid` are swallowed at the target boundary,
/// `AuthInvalid` aborts the whole job.
#[derive(Error, Debug, Clone)]
pub enum ActionError {
    /// Network/timeout/rate-limit failure. The target is skipped; retry, if
    /// any, belongs to the broker's redelivery, not per-target looping.
    #[error("transient failure: {0}")]
    Transient(String),

    /// The account's credentials were rejected by the remote service.
    /// Fatal for the whole job, not just one target.
    #[error("credentials rejected: {0}")]
    AuthInvalid(String),

    /// The specific target is unusable (deleted, private, blocked).
    #[error("target invalid: {0}")]
    TargetInvalid(String),
}

/// Errors returned by the quota ledger.
#[derive(Error, Debug)]
pub enum QuotaError {
    /// The daily limit for this action kind is exhausted. An expected
    /// stopping condition, not a job failure.
    #[error("daily limit reached for {kind}: {count}/{limit}")]
    Exceeded { kind: String, limit: u32, count: u32 },

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}
