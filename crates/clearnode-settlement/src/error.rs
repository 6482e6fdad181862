use clearnode_core::{ChannelId, ChannelStatus, CoreError, U256};
use clearnode_crypto::CryptoError;
use clearnode_ledger::LedgerError;
use clearnode_store::StoreError;

/// Settlement-layer errors.
#[derive(Debug, thiserror::Error)]
pub enum SettlementError {
    #[error("invalid parameters: {0}")]
    InvalidParams(String),

    #[error("channel not found: {0}")]
    NotFound(ChannelId),

    #[error("channel {channel_id} is {status}, expected open")]
    ChannelNotOpen {
        channel_id: ChannelId,
        status: ChannelStatus,
    },

    #[error("missing signature from channel wallet {0}")]
    MissingSignature(String),

    #[error("insufficient unified balance: available {available}, required {required} raw units")]
    InsufficientBalance { available: U256, required: U256 },

    #[error("resulting channel amount would be negative")]
    NegativeChannelAmount,

    #[error("balance exceeds channel {0} amount; resize the channel first")]
    ResizeRequired(ChannelId),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
