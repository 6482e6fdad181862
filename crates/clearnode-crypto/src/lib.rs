pub mod error;
pub mod hashing;
pub mod keys;
pub mod signing;

pub use error::CryptoError;
pub use hashing::{keccak256, Hash};
pub use keys::KeyPair;
pub use signing::{recover_address, recover_message_signer, sign_hash, sign_message, Signature};
