use clearnode_core::{Address, ChannelId, CoreError, Decimal};
use clearnode_store::StoreError;

/// Ledger-layer errors.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("invalid parameters: {0}")]
    InvalidParams(String),

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("insufficient {asset} balance: available {available}, required {required}")]
    InsufficientBalance {
        asset: String,
        available: Decimal,
        required: Decimal,
    },

    #[error("wallet {wallet} has challenged channel {channel_id}; settle the dispute first")]
    ChallengedChannel {
        wallet: Address,
        channel_id: ChannelId,
    },

    #[error("session key {0} is expired")]
    SessionKeyExpired(Address),

    #[error("session key {signer} has no allowance for {asset}")]
    NoAllowance { signer: Address, asset: String },

    #[error("session key {signer} allowance exceeded for {asset}: cap {allowance}, spent {spent}, requested {requested}")]
    AllowanceExceeded {
        signer: Address,
        asset: String,
        allowance: Decimal,
        spent: Decimal,
        requested: Decimal,
    },

    #[error("signer {0} is already bound to another wallet")]
    SignerInUse(Address),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
