use thiserror::Error;

/// Errors surfaced to callers of the transactional object-store layer.
///
/// Three kinds only, matching the contract the Lock Manager and Transaction
/// Context are built against: a deadlock victim, an operation against a
/// transaction that cannot accept it, and a failure propagated verbatim from
/// the backing store.
#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("Deadlock detected")]
    Deadlock,

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Backing store error: {0}")]
    BackingFailure(String),
}

pub type Result<T> = std::result::Result<T, Error>;
