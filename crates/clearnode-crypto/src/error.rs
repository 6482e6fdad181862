/// Cryptographic errors.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    #[error("signer recovery failed")]
    RecoveryFailed,

    #[error("signing failed: {0}")]
    SigningFailed(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}
