use sha3::{Digest, Keccak256};

/// Keccak-256 digest (32 bytes).
pub type Hash = [u8; 32];

/// Hash arbitrary data using Keccak-256.
pub fn keccak256(data: &[u8]) -> Hash {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    let result = hasher.finalize();
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    hash
}
