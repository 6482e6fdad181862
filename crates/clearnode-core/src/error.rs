use crate::channel::ChannelStatus;

/// Core domain errors.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("invalid channel status transition from {from} to {to}")]
    InvalidStateTransition {
        from: ChannelStatus,
        to: ChannelStatus,
    },

    #[error("validation failed: {0}")]
    ValidationError(String),

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("amount out of range: {0}")]
    AmountOutOfRange(String),
}
