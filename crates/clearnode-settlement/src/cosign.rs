use clearnode_core::{AccountId, Address, Asset, Channel, ChannelId, ChannelStatus, RawDelta, U256};
use clearnode_crypto::{sign_hash, KeyPair, Signature};
use clearnode_ledger::{ensure_no_challenged_channels, AssetRegistry, Ledger};
use clearnode_store::StoreTx;
use serde::Serialize;
use std::sync::Arc;

use crate::error::SettlementError;
use crate::state::{resize_data, ChannelState, StateAllocation, StateIntent};

/// Request to move funds between the unified balance and a channel.
#[derive(Debug, Clone)]
pub struct ResizeRequest {
    pub channel_id: ChannelId,
    /// Raw units moved from the unified balance into the channel (negative moves them out).
    pub allocate_amount: Option<RawDelta>,
    /// Raw units deposited to (positive) or withdrawn from (negative) custody.
    pub resize_amount: Option<RawDelta>,
    pub funds_destination: Address,
    /// Addresses that validly signed the request.
    pub signers: Vec<Address>,
}

/// Request for a final state releasing the channel.
#[derive(Debug, Clone)]
pub struct CloseRequest {
    pub channel_id: ChannelId,
    pub funds_destination: Address,
    pub signers: Vec<Address>,
}

/// A broker-signed state the client submits on chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SettlementProposal {
    pub channel_id: ChannelId,
    pub intent: StateIntent,
    pub version: u64,
    /// Hex-encoded state data.
    pub state_data: String,
    pub allocations: Vec<StateAllocation>,
    /// Hex keccak-256 digest of the encoded state.
    pub state_hash: String,
    pub server_signature: Signature,
}

/// Produces resize and close proposals. Never writes to the store.
pub struct ChannelCoSigner {
    broker: Arc<KeyPair>,
    assets: Arc<AssetRegistry>,
}

impl ChannelCoSigner {
    pub fn new(broker: Arc<KeyPair>, assets: Arc<AssetRegistry>) -> Self {
        Self { broker, assets }
    }

    /// Address of the broker key.
    pub fn broker_address(&self) -> Address {
        self.broker.address()
    }

    /// Propose a resize of an open channel.
    pub fn request_resize(
        &self,
        tx: &StoreTx<'_>,
        request: &ResizeRequest,
    ) -> Result<SettlementProposal, SettlementError> {
        let channel = self.load_open_channel(tx, &request.channel_id, &request.signers)?;

        let zero = RawDelta::Increase(U256::zero());
        let allocate = request.allocate_amount.unwrap_or(zero);
        let resize = request.resize_amount.unwrap_or(zero);
        if allocate.is_zero() && resize.is_zero() {
            return Err(SettlementError::InvalidParams(
                "resize and allocate amounts are both zero".into(),
            ));
        }
        if request.funds_destination.is_zero() {
            return Err(SettlementError::InvalidParams("funds destination is required".into()));
        }

        let asset = self.assets.get(tx, channel.chain_id, &channel.token)?;
        let available = self.unified_raw_balance(tx, &channel, &asset)?;

        let mut new_amount = RawDelta::Increase(channel.raw_amount).checked_add(&allocate)?;
        if let RawDelta::Increase(required) = new_amount {
            if available < required {
                return Err(SettlementError::InsufficientBalance {
                    available,
                    required,
                });
            }
        }
        new_amount = new_amount.checked_add(&resize)?;
        let new_amount = match new_amount {
            RawDelta::Increase(v) => v,
            RawDelta::Decrease(v) if v.is_zero() => U256::zero(),
            RawDelta::Decrease(_) => return Err(SettlementError::NegativeChannelAmount),
        };

        let state = ChannelState {
            channel_id: channel.channel_id,
            intent: StateIntent::Resize,
            version: channel.version + 1,
            data: resize_data(&resize, &allocate),
            allocations: vec![
                StateAllocation {
                    destination: request.funds_destination,
                    token: channel.token,
                    amount: new_amount,
                },
                StateAllocation {
                    destination: self.broker.address(),
                    token: channel.token,
                    amount: U256::zero(),
                },
            ],
        };

        tracing::info!(
            channel_id = %channel.channel_id,
            wallet = %channel.wallet,
            version = state.version,
            new_amount = %new_amount,
            "resize state co-signed"
        );
        self.sign(state)
    }

    /// Propose the final state of an open channel.
    pub fn request_close(
        &self,
        tx: &StoreTx<'_>,
        request: &CloseRequest,
    ) -> Result<SettlementProposal, SettlementError> {
        let channel = self.load_open_channel(tx, &request.channel_id, &request.signers)?;
        if request.funds_destination.is_zero() {
            return Err(SettlementError::InvalidParams("funds destination is required".into()));
        }

        let asset = self.assets.get(tx, channel.chain_id, &channel.token)?;
        let available = self.unified_raw_balance(tx, &channel, &asset)?;
        if available > channel.raw_amount {
            return Err(SettlementError::ResizeRequired(channel.channel_id));
        }

        let state = ChannelState {
            channel_id: channel.channel_id,
            intent: StateIntent::Finalize,
            version: channel.version + 1,
            data: Vec::new(),
            allocations: vec![
                StateAllocation {
                    destination: request.funds_destination,
                    token: channel.token,
                    amount: available,
                },
                StateAllocation {
                    destination: self.broker.address(),
                    token: channel.token,
                    amount: channel.raw_amount - available,
                },
            ],
        };

        tracing::info!(
            channel_id = %channel.channel_id,
            wallet = %channel.wallet,
            version = state.version,
            payout = %available,
            "close state co-signed"
        );
        self.sign(state)
    }

    fn load_open_channel(
        &self,
        tx: &StoreTx<'_>,
        channel_id: &ChannelId,
        signers: &[Address],
    ) -> Result<Channel, SettlementError> {
        let channel = tx
            .get_channel(channel_id)?
            .ok_or(SettlementError::NotFound(*channel_id))?;
        if channel.status != ChannelStatus::Open {
            return Err(SettlementError::ChannelNotOpen {
                channel_id: *channel_id,
                status: channel.status,
            });
        }
        if !signers.contains(&channel.wallet) {
            return Err(SettlementError::MissingSignature(channel.wallet.to_hex()));
        }
        ensure_no_challenged_channels(tx, &channel.wallet)?;
        Ok(channel)
    }

    /// Main-bucket balance of the channel's asset in raw units; negative balances count as zero.
    fn unified_raw_balance(
        &self,
        tx: &StoreTx<'_>,
        channel: &Channel,
        asset: &Asset,
    ) -> Result<U256, SettlementError> {
        let balance = Ledger::new(tx).balance(
            &channel.wallet,
            &AccountId::from(&channel.wallet),
            &asset.symbol,
        )?;
        if balance.is_sign_negative() {
            return Ok(U256::zero());
        }
        Ok(asset.to_raw(balance)?)
    }

    fn sign(&self, state: ChannelState) -> Result<SettlementProposal, SettlementError> {
        let hash = state.hash();
        let server_signature = sign_hash(&hash, &self.broker)?;
        Ok(SettlementProposal {
            channel_id: state.channel_id,
            intent: state.intent,
            version: state.version,
            state_data: format!("0x{}", hex::encode(&state.data)),
            allocations: state.allocations,
            state_hash: format!("0x{}", hex::encode(hash)),
            server_signature,
        })
    }
}
