use chrono::{DateTime, Utc};
use primitive_types::U256;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::CoreError;
use crate::types::{Address, ChannelId};

/// Lifecycle status of a custody channel mirror.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelStatus {
    /// Created on chain, waiting for the broker to join.
    Joining,
    /// Both parties joined; funds are in the unified balance.
    Open,
    /// A dispute is in progress on chain.
    Challenged,
    /// Closed on chain. Final state.
    Closed,
}

impl ChannelStatus {
    /// Whether this is the terminal status.
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

impl fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Joining => write!(f, "joining"),
            Self::Open => write!(f, "open"),
            Self::Challenged => write!(f, "challenged"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Custody events that drive channel status transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CustodyTransition {
    Joined,
    Resized,
    Challenged,
    Closed,
}

/// Channel status transitions driven by custody-contract events.
///
/// Valid transitions:
/// - Joining → Open (Joined)
/// - Open → Open (Resized)
/// - Joining → Challenged (Challenged)
/// - Open → Challenged (Challenged)
/// - Challenged → Challenged (Challenged, with a newer state)
/// - Joining | Open | Challenged → Closed (Closed)
///
/// `Created` is not a transition: it inserts the row in `Joining`.
pub struct ChannelStateMachine;

impl ChannelStateMachine {
    /// Attempt a status transition for an event.
    pub fn transition(
        current: ChannelStatus,
        event: CustodyTransition,
    ) -> Result<ChannelStatus, CoreError> {
        let next = match (current, event) {
            (ChannelStatus::Joining, CustodyTransition::Joined) => ChannelStatus::Open,

            (ChannelStatus::Open, CustodyTransition::Resized) => ChannelStatus::Open,

            (ChannelStatus::Joining, CustodyTransition::Challenged)
            | (ChannelStatus::Open, CustodyTransition::Challenged)
            | (ChannelStatus::Challenged, CustodyTransition::Challenged) => {
                ChannelStatus::Challenged
            }

            (ChannelStatus::Joining, CustodyTransition::Closed)
            | (ChannelStatus::Open, CustodyTransition::Closed)
            | (ChannelStatus::Challenged, CustodyTransition::Closed) => ChannelStatus::Closed,

            _ => {
                let target = match event {
                    CustodyTransition::Joined | CustodyTransition::Resized => ChannelStatus::Open,
                    CustodyTransition::Challenged => ChannelStatus::Challenged,
                    CustodyTransition::Closed => ChannelStatus::Closed,
                };
                return Err(CoreError::InvalidStateTransition {
                    from: current,
                    to: target,
                });
            }
        };

        tracing::debug!(
            from = %current,
            to = %next,
            event = ?event,
            "channel status transition"
        );

        Ok(next)
    }

    /// Check if a transition is valid without performing it.
    pub fn can_transition(current: ChannelStatus, event: CustodyTransition) -> bool {
        Self::transition(current, event).is_ok()
    }
}

/// Mirror of one on-chain custody channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub channel_id: ChannelId,
    /// Wallet whose unified balance the channel funds.
    pub wallet: Address,
    /// Address signing channel states on the wallet's behalf.
    pub participant: Address,
    pub status: ChannelStatus,
    pub token: Address,
    pub chain_id: u64,
    /// Integer amount currently locked in custody for this channel.
    pub raw_amount: U256,
    /// Compare-and-swap counter, bumped on every state-changing custody event.
    pub version: u64,
    pub nonce: u64,
    pub challenge_seconds: u64,
    pub adjudicator: Address,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
