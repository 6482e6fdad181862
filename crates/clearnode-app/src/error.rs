use clearnode_core::{Address, CoreError, Decimal, SessionId};
use clearnode_ledger::LedgerError;
use clearnode_store::StoreError;

/// App-session errors.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("invalid app definition: {0}")]
    InvalidDefinition(String),

    #[error("invalid parameters: {0}")]
    InvalidParams(String),

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("quorum not met: signed weight {signed}, required {required}")]
    QuorumNotMet { signed: u64, required: u64 },

    #[error("signer {0} is not a participant or a delegate of one")]
    UnknownSigner(Address),

    #[error("missing signature from participant {0}")]
    MissingSignature(Address),

    #[error("session key {0} is expired")]
    SessionKeyExpired(Address),

    #[error("{0} is not a participant of the app session")]
    NotParticipant(Address),

    #[error("app session {0} not found")]
    NotFound(SessionId),

    #[error("app session {0} already exists")]
    AlreadyExists(SessionId),

    #[error("app session {0} is closed")]
    SessionNotOpen(SessionId),

    #[error("app session version conflict: expected {expected}, found {found}")]
    VersionConflict { expected: u64, found: u64 },

    #[error("allocations for {asset} sum to {allocated}, session holds {expected}")]
    ConservationViolated {
        asset: String,
        expected: Decimal,
        allocated: Decimal,
    },

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AppError {
    /// Map a store CAS failure onto the session-level conflict error.
    pub(crate) fn from_store(err: StoreError) -> Self {
        match err {
            StoreError::VersionConflict {
                expected, found, ..
            } => Self::VersionConflict { expected, found },
            other => Self::Store(other),
        }
    }
}
