//! Channel state encoding.
//!
//! A state is packed as a sequence of 32-byte words the way the custody
//! contract hashes it: channel id, intent, version, keccak of the state data,
//! then one `(destination, token, amount)` triple per allocation. The broker
//! signs the keccak-256 digest of that packing.

use clearnode_core::{Address, ChannelId, RawDelta, U256};
use clearnode_crypto::{keccak256, Hash};
use serde::{Deserialize, Serialize};

/// Purpose of a channel state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateIntent {
    Operate,
    Initialize,
    Resize,
    Finalize,
}

impl StateIntent {
    pub fn code(&self) -> u8 {
        match self {
            Self::Operate => 0,
            Self::Initialize => 1,
            Self::Resize => 2,
            Self::Finalize => 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateAllocation {
    pub destination: Address,
    pub token: Address,
    pub amount: U256,
}

/// A channel state proposed for on-chain submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelState {
    pub channel_id: ChannelId,
    pub intent: StateIntent,
    pub version: u64,
    pub data: Vec<u8>,
    pub allocations: Vec<StateAllocation>,
}

impl ChannelState {
    /// Word-packed encoding of the state.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(32 * (5 + 3 * self.allocations.len()));
        out.extend_from_slice(self.channel_id.as_bytes());
        out.extend_from_slice(&uint_word(U256::from(self.intent.code())));
        out.extend_from_slice(&uint_word(U256::from(self.version)));
        out.extend_from_slice(&keccak256(&self.data));
        out.extend_from_slice(&uint_word(U256::from(self.allocations.len())));
        for allocation in &self.allocations {
            out.extend_from_slice(&address_word(&allocation.destination));
            out.extend_from_slice(&address_word(&allocation.token));
            out.extend_from_slice(&uint_word(allocation.amount));
        }
        out
    }

    /// Digest the broker signs.
    pub fn hash(&self) -> Hash {
        keccak256(&self.encode())
    }
}

/// State data of a resize: `int256 resize_amount ‖ int256 allocate_amount`.
pub fn resize_data(resize_amount: &RawDelta, allocate_amount: &RawDelta) -> Vec<u8> {
    let mut out = Vec::with_capacity(64);
    out.extend_from_slice(&resize_amount.to_word());
    out.extend_from_slice(&allocate_amount.to_word());
    out
}

fn uint_word(value: U256) -> [u8; 32] {
    let mut word = [0u8; 32];
    value.to_big_endian(&mut word);
    word
}

fn address_word(address: &Address) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(address.as_bytes());
    word
}
