use clearnode_core::{AppDefinition, SessionId, U256};
use clearnode_crypto::keccak256;

use crate::error::AppError;

/// Check participant, weight, nonce and quorum consistency.
pub fn validate_definition(definition: &AppDefinition) -> Result<(), AppError> {
    if definition.protocol.trim().is_empty() {
        return Err(AppError::InvalidDefinition("protocol is required".into()));
    }
    definition
        .validate()
        .map_err(|e| AppError::InvalidDefinition(e.to_string()))
}

/// Session id: keccak-256 of the word-packed definition.
///
/// Packs the protocol (length-prefixed), every participant, every weight,
/// quorum, challenge and nonce. The application name is not part of the id.
pub fn derive_session_id(definition: &AppDefinition) -> SessionId {
    let mut buf = Vec::with_capacity(32 * (6 + 2 * definition.participants.len()));
    buf.extend_from_slice(&word(U256::from(definition.protocol.len())));
    buf.extend_from_slice(definition.protocol.as_bytes());

    buf.extend_from_slice(&word(U256::from(definition.participants.len())));
    for participant in &definition.participants {
        let mut w = [0u8; 32];
        w[12..].copy_from_slice(participant.as_bytes());
        buf.extend_from_slice(&w);
    }
    buf.extend_from_slice(&word(U256::from(definition.weights.len())));
    for weight in &definition.weights {
        buf.extend_from_slice(&int_word(*weight));
    }
    buf.extend_from_slice(&word(U256::from(definition.quorum)));
    buf.extend_from_slice(&word(U256::from(definition.challenge)));
    buf.extend_from_slice(&word(U256::from(definition.nonce)));

    SessionId(keccak256(&buf))
}

fn word(value: U256) -> [u8; 32] {
    let mut w = [0u8; 32];
    value.to_big_endian(&mut w);
    w
}

fn int_word(value: i64) -> [u8; 32] {
    let fill = if value < 0 { 0xff } else { 0x00 };
    let mut w = [fill; 32];
    w[24..].copy_from_slice(&value.to_be_bytes());
    w
}
