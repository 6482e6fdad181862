use clearnode_core::Address;
use k256::ecdsa::{RecoveryId, Signature as EcdsaSignature, VerifyingKey};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::error::CryptoError;
use crate::hashing::{keccak256, Hash};
use crate::keys::{address_of, KeyPair};

/// 65-byte recoverable ECDSA signature: `r || s || v`, with `v` in {27, 28}.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature([u8; 65]);

impl Signature {
    /// Raw bytes.
    pub fn to_bytes(&self) -> [u8; 65] {
        self.0
    }

    /// Parse from 65 raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let arr: [u8; 65] = bytes.try_into().map_err(|_| {
            CryptoError::InvalidSignature(format!("expected 65 bytes, got {}", bytes.len()))
        })?;
        Ok(Self(arr))
    }

    /// `0x`-prefixed hex.
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    /// Decode from hex, with or without a `0x` prefix.
    pub fn from_hex(hex_str: &str) -> Result<Self, CryptoError> {
        let stripped = hex_str.strip_prefix("0x").unwrap_or(hex_str);
        let bytes = hex::decode(stripped)
            .map_err(|e| CryptoError::InvalidSignature(format!("invalid hex: {}", e)))?;
        Self::from_bytes(&bytes)
    }

    /// Recovery byte normalised to 0 or 1.
    fn recovery_byte(&self) -> u8 {
        let v = self.0[64];
        if v >= 27 {
            v - 27
        } else {
            v
        }
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({})", self.to_hex())
    }
}

impl Serialize for Signature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Signature::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Sign a 32-byte digest. The signature is low-S normalised.
pub fn sign_hash(hash: &Hash, keypair: &KeyPair) -> Result<Signature, CryptoError> {
    let (sig, recid) = keypair
        .signing_key()
        .sign_prehash_recoverable(hash)
        .map_err(|e| CryptoError::SigningFailed(e.to_string()))?;
    let mut bytes = [0u8; 65];
    bytes[..64].copy_from_slice(&sig.to_bytes());
    bytes[64] = recid.to_byte() + 27;
    Ok(Signature(bytes))
}

/// Sign the keccak-256 digest of a message.
pub fn sign_message(message: &[u8], keypair: &KeyPair) -> Result<Signature, CryptoError> {
    sign_hash(&keccak256(message), keypair)
}

/// Recover the signer address of a signature over a 32-byte digest.
pub fn recover_address(hash: &Hash, signature: &Signature) -> Result<Address, CryptoError> {
    let recid = RecoveryId::from_byte(signature.recovery_byte())
        .ok_or_else(|| CryptoError::InvalidSignature("invalid recovery id".into()))?;
    let sig = EcdsaSignature::from_slice(&signature.0[..64])
        .map_err(|e| CryptoError::InvalidSignature(e.to_string()))?;
    let key = VerifyingKey::recover_from_prehash(hash, &sig, recid)
        .map_err(|_| CryptoError::RecoveryFailed)?;
    Ok(address_of(&key))
}

/// Recover the signer of a signature over the keccak-256 digest of a message.
pub fn recover_message_signer(message: &[u8], signature: &Signature) -> Result<Address, CryptoError> {
    recover_address(&keccak256(message), signature)
}
