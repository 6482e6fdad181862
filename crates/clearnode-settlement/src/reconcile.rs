use chrono::Utc;
use clearnode_core::{
    AccountId, Address, Asset, Channel, ChannelStateMachine, ChannelStatus, CustodyTransition,
    Decimal, Notifier, RawDelta, TransactionKind, U256,
};
use clearnode_ledger::{record_transaction, AssetRegistry, Ledger, SessionKeyRegistry};
use clearnode_store::{Store, StoreTx};
use std::sync::Arc;

use crate::error::SettlementError;
use crate::events::{
    ChannelChallenged, ChannelClosed, ChannelCreated, ChannelJoined, ChannelResized, CustodyEvent,
};

/// Result of dispatching one custody event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciled {
    /// The event was applied; carries the channel row as committed.
    Applied(Channel),
    /// The event was dropped without side effects.
    Ignored(&'static str),
}

/// Side effects to publish once the event's transaction has committed.
struct Effects {
    channel: Channel,
    balance_changed: bool,
}

/// Applies custody events to the channel mirror and the ledger.
///
/// Each event runs in its own store transaction. Events naming a channel the
/// node does not know, or that the channel's status cannot accept, are
/// logged and dropped with no writes.
pub struct ChannelReconciler {
    broker: Address,
    assets: Arc<AssetRegistry>,
    session_keys: Arc<SessionKeyRegistry>,
    notifier: Arc<dyn Notifier>,
}

impl ChannelReconciler {
    /// Create a reconciler for channels co-owned by `broker`.
    pub fn new(
        broker: Address,
        assets: Arc<AssetRegistry>,
        session_keys: Arc<SessionKeyRegistry>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            broker,
            assets,
            session_keys,
            notifier,
        }
    }

    /// Apply one event atomically and publish notifications after commit.
    pub fn handle(&self, store: &Store, event: &CustodyEvent) -> Result<Reconciled, SettlementError> {
        let tx = store.begin();
        let outcome = match event {
            CustodyEvent::Created(e) => self.on_created(&tx, e)?,
            CustodyEvent::Joined(e) => self.on_joined(&tx, e)?,
            CustodyEvent::Resized(e) => self.on_resized(&tx, e)?,
            CustodyEvent::Challenged(e) => self.on_challenged(&tx, e)?,
            CustodyEvent::Closed(e) => self.on_closed(&tx, e)?,
        };

        let effects = match outcome {
            Ok(effects) => effects,
            Err(reason) => {
                tracing::warn!(
                    event = event.name(),
                    chain_id = event.chain_id(),
                    channel_id = %event.channel_id(),
                    reason,
                    "custody event dropped"
                );
                tx.rollback()?;
                return Ok(Reconciled::Ignored(reason));
            }
        };
        tx.commit()?;

        let channel = effects.channel;
        tracing::info!(
            event = event.name(),
            channel_id = %channel.channel_id,
            wallet = %channel.wallet,
            status = %channel.status,
            version = channel.version,
            raw_amount = %channel.raw_amount,
            "custody event applied"
        );

        if matches!(event, CustodyEvent::Created(_)) {
            self.session_keys
                .bind_custody_signer(channel.participant, channel.wallet);
        }
        if effects.balance_changed {
            self.notifier.balance_updated(&channel.wallet);
        }
        self.notifier.channel_updated(&channel);
        Ok(Reconciled::Applied(channel))
    }

    fn asset_of(&self, tx: &StoreTx<'_>, channel: &Channel) -> Result<Asset, SettlementError> {
        Ok(self.assets.get(tx, channel.chain_id, &channel.token)?)
    }

    fn on_created(
        &self,
        tx: &StoreTx<'_>,
        e: &ChannelCreated,
    ) -> Result<Result<Effects, &'static str>, SettlementError> {
        if tx.get_channel_for_update(&e.channel_id)?.is_some() {
            return Ok(Err("channel already exists"));
        }
        if e.participants.len() < 2 {
            return Ok(Err("fewer than two participants"));
        }
        if e.participants[1] != self.broker {
            return Ok(Err("broker is not a participant"));
        }
        let Some(initial) = e.allocations.first() else {
            return Ok(Err("no initial allocation"));
        };
        let Some(asset) = self.assets.find(tx, e.chain_id, &initial.token)? else {
            return Ok(Err("token not in asset registry"));
        };

        let now = Utc::now();
        let channel = Channel {
            channel_id: e.channel_id,
            wallet: e.wallet,
            participant: e.participants[0],
            status: ChannelStatus::Joining,
            token: initial.token,
            chain_id: e.chain_id,
            raw_amount: initial.amount,
            version: 0,
            nonce: e.nonce,
            challenge_seconds: e.challenge,
            adjudicator: e.adjudicator,
            created_at: now,
            updated_at: now,
        };
        tx.insert_channel(&channel)?;

        let amount = asset.to_decimal(initial.amount)?;
        Ledger::new(tx).record(
            &channel.wallet,
            &AccountId::from(&channel.channel_id),
            &asset.symbol,
            amount,
            None,
        )?;

        Ok(Ok(Effects {
            channel,
            balance_changed: false,
        }))
    }

    fn on_joined(
        &self,
        tx: &StoreTx<'_>,
        e: &ChannelJoined,
    ) -> Result<Result<Effects, &'static str>, SettlementError> {
        let Some(mut channel) = tx.get_channel_for_update(&e.channel_id)? else {
            return Ok(Err("unknown channel"));
        };
        let Ok(status) = ChannelStateMachine::transition(channel.status, CustodyTransition::Joined)
        else {
            return Ok(Err("channel cannot accept join"));
        };
        let asset = self.asset_of(tx, &channel)?;

        let ledger = Ledger::new(tx);
        let escrow = AccountId::from(&channel.channel_id);
        let main = AccountId::from(&channel.wallet);
        let held = ledger.balance_for_update(&channel.wallet, &escrow, &asset.symbol)?;
        ledger.move_funds(
            &channel.wallet,
            &escrow,
            &channel.wallet,
            &main,
            &asset.symbol,
            held,
            None,
        )?;
        if !held.is_zero() {
            record_transaction(tx, TransactionKind::Deposit, &escrow, &main, &asset.symbol, held)?;
        }

        let expected = channel.version;
        channel.status = status;
        channel.updated_at = Utc::now();
        tx.update_channel(&channel, expected)?;

        Ok(Ok(Effects {
            channel,
            balance_changed: !held.is_zero(),
        }))
    }

    fn on_resized(
        &self,
        tx: &StoreTx<'_>,
        e: &ChannelResized,
    ) -> Result<Result<Effects, &'static str>, SettlementError> {
        let Some(mut channel) = tx.get_channel_for_update(&e.channel_id)? else {
            return Ok(Err("unknown channel"));
        };
        let Ok(status) = ChannelStateMachine::transition(channel.status, CustodyTransition::Resized)
        else {
            return Ok(Err("channel is not open"));
        };
        let asset = self.asset_of(tx, &channel)?;

        let raw_amount = e.delta.apply(channel.raw_amount)?;
        let amount = asset.delta_to_decimal(&e.delta)?;
        let main = AccountId::from(&channel.wallet);
        let escrow = AccountId::from(&channel.channel_id);

        let ledger = Ledger::new(tx);
        ledger.record(&channel.wallet, &main, &asset.symbol, amount, None)?;
        match e.delta {
            RawDelta::Increase(_) if !amount.is_zero() => {
                record_transaction(tx, TransactionKind::Deposit, &escrow, &main, &asset.symbol, amount)?;
            }
            RawDelta::Decrease(_) if !amount.is_zero() => {
                record_transaction(
                    tx,
                    TransactionKind::Withdrawal,
                    &main,
                    &escrow,
                    &asset.symbol,
                    -amount,
                )?;
                let after = ledger.balance(&channel.wallet, &main, &asset.symbol)?;
                if after.is_sign_negative() && !after.is_zero() {
                    tracing::warn!(
                        wallet = %channel.wallet,
                        asset = %asset.symbol,
                        balance = %after,
                        "unified balance negative after on-chain resize"
                    );
                }
            }
            _ => {}
        }

        let expected = channel.version;
        channel.status = status;
        channel.raw_amount = raw_amount;
        channel.version += 1;
        channel.updated_at = Utc::now();
        tx.update_channel(&channel, expected)?;

        Ok(Ok(Effects {
            channel,
            balance_changed: !amount.is_zero(),
        }))
    }

    fn on_challenged(
        &self,
        tx: &StoreTx<'_>,
        e: &ChannelChallenged,
    ) -> Result<Result<Effects, &'static str>, SettlementError> {
        let Some(mut channel) = tx.get_channel_for_update(&e.channel_id)? else {
            return Ok(Err("unknown channel"));
        };
        if !ChannelStateMachine::can_transition(channel.status, CustodyTransition::Challenged) {
            return Ok(Err("channel cannot be challenged"));
        }
        if e.state_version < channel.version {
            return Ok(Err("challenge older than stored state"));
        }
        if channel.status == ChannelStatus::Challenged && e.state_version == channel.version {
            return Ok(Err("challenge already applied"));
        }

        let expected = channel.version;
        channel.status = ChannelStatus::Challenged;
        channel.version = e.state_version;
        channel.updated_at = Utc::now();
        tx.update_channel(&channel, expected)?;

        Ok(Ok(Effects {
            channel,
            balance_changed: false,
        }))
    }

    fn on_closed(
        &self,
        tx: &StoreTx<'_>,
        e: &ChannelClosed,
    ) -> Result<Result<Effects, &'static str>, SettlementError> {
        let Some(mut channel) = tx.get_channel_for_update(&e.channel_id)? else {
            return Ok(Err("unknown channel"));
        };
        if channel.status.is_final() {
            return Ok(Err("channel already closed"));
        }
        let Ok(status) = ChannelStateMachine::transition(channel.status, CustodyTransition::Closed)
        else {
            return Ok(Err("channel cannot be closed"));
        };
        let asset = self.asset_of(tx, &channel)?;

        let ledger = Ledger::new(tx);
        let main = AccountId::from(&channel.wallet);
        let escrow = AccountId::from(&channel.channel_id);

        // Escrow still holds the deposit when the broker never joined.
        let held = ledger.balance_for_update(&channel.wallet, &escrow, &asset.symbol)?;
        let (account, amount) = if !held.is_zero() {
            (escrow.clone(), held)
        } else {
            (main.clone(), asset.to_decimal(e.final_allocation)?)
        };
        ledger.record(&channel.wallet, &account, &asset.symbol, -amount, None)?;
        if !amount.is_zero() {
            record_transaction(
                tx,
                TransactionKind::Withdrawal,
                &account,
                &escrow,
                &asset.symbol,
                amount,
            )?;
        }

        let expected = channel.version;
        channel.status = status;
        channel.raw_amount = U256::zero();
        channel.version += 1;
        channel.updated_at = Utc::now();
        tx.update_channel(&channel, expected)?;

        Ok(Ok(Effects {
            channel,
            balance_changed: amount != Decimal::ZERO,
        }))
    }
}
