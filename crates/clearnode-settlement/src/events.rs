use clearnode_core::{Address, ChannelId, RawDelta, U256};
use serde::{Deserialize, Serialize};

/// One allocation of a channel state as emitted by the custody contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventAllocation {
    pub destination: Address,
    pub token: Address,
    pub amount: U256,
}

/// A channel was opened on chain by a wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelCreated {
    pub chain_id: u64,
    pub channel_id: ChannelId,
    pub wallet: Address,
    /// `[wallet signer, broker]`.
    pub participants: Vec<Address>,
    pub adjudicator: Address,
    pub challenge: u64,
    pub nonce: u64,
    /// Initial allocations, aligned with `participants`.
    pub allocations: Vec<EventAllocation>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelJoined {
    pub chain_id: u64,
    pub channel_id: ChannelId,
    pub index: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelResized {
    pub chain_id: u64,
    pub channel_id: ChannelId,
    pub delta: RawDelta,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelChallenged {
    pub chain_id: u64,
    pub channel_id: ChannelId,
    /// Version of the state the challenge was raised with.
    pub state_version: u64,
    /// Unix time the challenge period ends.
    #[serde(default)]
    pub expiration: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelClosed {
    pub chain_id: u64,
    pub channel_id: ChannelId,
    /// Amount paid out to the wallet's side by the final state.
    pub final_allocation: U256,
}

/// Decoded custody-contract event, delivered in per-chain order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CustodyEvent {
    Created(ChannelCreated),
    Joined(ChannelJoined),
    Resized(ChannelResized),
    Challenged(ChannelChallenged),
    Closed(ChannelClosed),
}

impl CustodyEvent {
    pub fn channel_id(&self) -> &ChannelId {
        match self {
            Self::Created(e) => &e.channel_id,
            Self::Joined(e) => &e.channel_id,
            Self::Resized(e) => &e.channel_id,
            Self::Challenged(e) => &e.channel_id,
            Self::Closed(e) => &e.channel_id,
        }
    }

    pub fn chain_id(&self) -> u64 {
        match self {
            Self::Created(e) => e.chain_id,
            Self::Joined(e) => e.chain_id,
            Self::Resized(e) => e.chain_id,
            Self::Challenged(e) => e.chain_id,
            Self::Closed(e) => e.chain_id,
        }
    }

    /// Short event name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Created(_) => "created",
            Self::Joined(_) => "joined",
            Self::Resized(_) => "resized",
            Self::Challenged(_) => "challenged",
            Self::Closed(_) => "closed",
        }
    }
}
