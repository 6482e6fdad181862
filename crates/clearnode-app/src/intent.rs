use clearnode_core::{AccountId, Address, AppAllocation, AppSession, Decimal, TransactionKind};
use clearnode_ledger::{
    ensure_no_challenged_channels, record_transaction, Ledger, SessionKeyRegistry,
};
use clearnode_store::StoreTx;
use std::collections::{BTreeMap, HashSet};

use crate::error::AppError;
use crate::quorum::ResolvedSigners;

/// A state change requested on an open app session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    /// Raise participants' shares from their unified balances.
    Deposit(Vec<AppAllocation>),
    /// Lower participants' shares back into their unified balances.
    Withdraw(Vec<AppAllocation>),
    /// Redistribute the session's funds among participants.
    Operate(Vec<AppAllocation>),
    /// Pay the session out to participants' unified balances and close it.
    Close(Vec<AppAllocation>),
}

impl Intent {
    /// Parse a submitted intent name. `Close` is not submittable by name.
    pub fn from_name(name: &str, allocations: Vec<AppAllocation>) -> Result<Self, AppError> {
        match name.to_ascii_lowercase().as_str() {
            "deposit" => Ok(Self::Deposit(allocations)),
            "withdraw" => Ok(Self::Withdraw(allocations)),
            "operate" => Ok(Self::Operate(allocations)),
            other => Err(AppError::InvalidParams(format!("unknown intent {:?}", other))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Deposit(_) => "deposit",
            Self::Withdraw(_) => "withdraw",
            Self::Operate(_) => "operate",
            Self::Close(_) => "close",
        }
    }

    pub fn allocations(&self) -> &[AppAllocation] {
        match self {
            Self::Deposit(a) | Self::Withdraw(a) | Self::Operate(a) | Self::Close(a) => a,
        }
    }
}

/// What an intent needs besides the session itself.
pub(crate) struct IntentContext<'t, 'a> {
    pub tx: &'t StoreTx<'a>,
    pub registry: &'t SessionKeyRegistry,
    pub signers: &'t ResolvedSigners,
}

/// Apply an intent's ledger effects. Returns wallets whose unified balance changed.
///
/// The caller has already locked the session row, checked its status and
/// version, and verified quorum.
pub(crate) fn apply(
    intent: &Intent,
    ctx: &IntentContext<'_, '_>,
    session: &AppSession,
) -> Result<Vec<Address>, AppError> {
    validate_allocations(session, intent.allocations())?;
    match intent {
        Intent::Deposit(allocations) => deposit(ctx, session, allocations),
        Intent::Withdraw(allocations) => withdraw(ctx, session, allocations),
        Intent::Operate(allocations) => operate(ctx, session, allocations),
        Intent::Close(allocations) => close(ctx, session, allocations),
    }
}

/// Participants must belong to the session, amounts must be non-negative and
/// each `(participant, asset)` may appear once.
pub(crate) fn validate_allocations(
    session: &AppSession,
    allocations: &[AppAllocation],
) -> Result<(), AppError> {
    let mut seen = HashSet::new();
    for allocation in allocations {
        if !session.is_participant(&allocation.participant) {
            return Err(AppError::NotParticipant(allocation.participant));
        }
        if allocation.asset.is_empty() {
            return Err(AppError::InvalidParams("allocation asset is required".into()));
        }
        if allocation.amount.is_sign_negative() && !allocation.amount.is_zero() {
            return Err(AppError::InvalidAmount(format!(
                "allocation of {} {} for {} is negative",
                allocation.amount, allocation.asset, allocation.participant
            )));
        }
        if !seen.insert((allocation.participant, allocation.asset.to_lowercase())) {
            return Err(AppError::InvalidParams(format!(
                "duplicate allocation of {} for {}",
                allocation.asset, allocation.participant
            )));
        }
    }
    Ok(())
}

/// Debit a participant's unified balance into its session bucket.
///
/// Requires the participant's signature, no challenged channel, enough
/// balance, and headroom on the signing session key if one was used.
pub(crate) fn fund_from_unified(
    ctx: &IntentContext<'_, '_>,
    session_account: &AccountId,
    participant: &Address,
    asset: &str,
    amount: Decimal,
) -> Result<(), AppError> {
    let signer = ctx
        .signers
        .signer_for(participant)
        .ok_or(AppError::MissingSignature(*participant))?;
    ensure_no_challenged_channels(ctx.tx, participant)?;

    let ledger = Ledger::new(ctx.tx);
    let main = AccountId::from(participant);
    ledger.ensure_available(participant, &main, asset, amount)?;
    let attributed = ctx.registry.validate_spending(ctx.tx, &signer, asset, amount)?;

    ledger.move_funds(participant, &main, participant, session_account, asset, amount, attributed)?;
    record_transaction(ctx.tx, TransactionKind::AppDeposit, &main, session_account, asset, amount)?;
    if let Some(key) = attributed {
        ctx.registry.record_spend(ctx.tx, &key, asset)?;
    }
    Ok(())
}

fn deposit(
    ctx: &IntentContext<'_, '_>,
    session: &AppSession,
    allocations: &[AppAllocation],
) -> Result<Vec<Address>, AppError> {
    let ledger = Ledger::new(ctx.tx);
    let account = AccountId::from(&session.session_id);

    let mut deltas = Vec::with_capacity(allocations.len());
    let mut total = Decimal::ZERO;
    for allocation in allocations {
        let current = ledger.balance(&allocation.participant, &account, &allocation.asset)?;
        let delta = allocation.amount - current;
        if delta.is_sign_negative() && !delta.is_zero() {
            return Err(AppError::InvalidAmount(format!(
                "deposit cannot lower {}'s {} allocation from {} to {}",
                allocation.participant, allocation.asset, current, allocation.amount
            )));
        }
        total += delta;
        deltas.push((allocation, delta));
    }
    if total <= Decimal::ZERO {
        return Err(AppError::InvalidParams("deposit does not increase any allocation".into()));
    }

    let mut changed = Vec::new();
    for (allocation, delta) in deltas {
        if delta.is_zero() {
            continue;
        }
        fund_from_unified(ctx, &account, &allocation.participant, &allocation.asset, delta)?;
        changed.push(allocation.participant);
    }
    Ok(changed)
}

fn withdraw(
    ctx: &IntentContext<'_, '_>,
    session: &AppSession,
    allocations: &[AppAllocation],
) -> Result<Vec<Address>, AppError> {
    let ledger = Ledger::new(ctx.tx);
    let account = AccountId::from(&session.session_id);

    let mut deltas = Vec::with_capacity(allocations.len());
    let mut total = Decimal::ZERO;
    for allocation in allocations {
        let current = ledger.balance(&allocation.participant, &account, &allocation.asset)?;
        let delta = allocation.amount - current;
        if delta.is_sign_positive() && !delta.is_zero() {
            return Err(AppError::InvalidAmount(format!(
                "withdraw cannot raise {}'s {} allocation from {} to {}",
                allocation.participant, allocation.asset, current, allocation.amount
            )));
        }
        total += delta;
        deltas.push((allocation, delta));
    }
    if total >= Decimal::ZERO {
        return Err(AppError::InvalidParams("withdraw does not lower any allocation".into()));
    }

    let mut changed = Vec::new();
    for (allocation, delta) in deltas {
        if delta.is_zero() {
            continue;
        }
        let amount = -delta;
        let main = AccountId::from(&allocation.participant);
        ledger.move_funds(
            &allocation.participant,
            &account,
            &allocation.participant,
            &main,
            &allocation.asset,
            amount,
            None,
        )?;
        record_transaction(
            ctx.tx,
            TransactionKind::AppWithdrawal,
            &account,
            &main,
            &allocation.asset,
            amount,
        )?;
        changed.push(allocation.participant);
    }
    Ok(changed)
}

fn operate(
    ctx: &IntentContext<'_, '_>,
    session: &AppSession,
    allocations: &[AppAllocation],
) -> Result<Vec<Address>, AppError> {
    let ledger = Ledger::new(ctx.tx);
    let account = AccountId::from(&session.session_id);
    let before = session_totals(&ledger, session)?;
    check_conservation(&before, allocations)?;

    for allocation in allocations {
        let current =
            ledger.balance_for_update(&allocation.participant, &account, &allocation.asset)?;
        ledger.record(
            &allocation.participant,
            &account,
            &allocation.asset,
            allocation.amount - current,
            None,
        )?;
    }

    let after = session_totals(&ledger, session)?;
    if after != before {
        let asset = before
            .iter()
            .find(|(asset, total)| after.get(*asset) != Some(*total))
            .map(|(asset, _)| asset.clone())
            .or_else(|| after.keys().find(|a| !before.contains_key(*a)).cloned())
            .unwrap_or_default();
        return Err(AppError::ConservationViolated {
            expected: before.get(&asset).copied().unwrap_or(Decimal::ZERO),
            allocated: after.get(&asset).copied().unwrap_or(Decimal::ZERO),
            asset,
        });
    }
    Ok(Vec::new())
}

fn close(
    ctx: &IntentContext<'_, '_>,
    session: &AppSession,
    allocations: &[AppAllocation],
) -> Result<Vec<Address>, AppError> {
    let ledger = Ledger::new(ctx.tx);
    let account = AccountId::from(&session.session_id);
    let before = session_totals(&ledger, session)?;
    check_conservation(&before, allocations)?;

    for participant in &session.participants {
        for balance in ledger.balances_for(participant, &account)? {
            ledger.record(participant, &account, &balance.asset, -balance.amount, None)?;
        }
    }

    let mut changed = Vec::new();
    for allocation in allocations {
        if allocation.amount.is_zero() {
            continue;
        }
        let main = AccountId::from(&allocation.participant);
        ledger.record(&allocation.participant, &main, &allocation.asset, allocation.amount, None)?;
        record_transaction(
            ctx.tx,
            TransactionKind::AppWithdrawal,
            &account,
            &main,
            &allocation.asset,
            allocation.amount,
        )?;
        if !changed.contains(&allocation.participant) {
            changed.push(allocation.participant);
        }
    }
    Ok(changed)
}

/// Per-asset total of a session across all participant buckets. Zero totals are omitted.
pub(crate) fn session_totals(
    ledger: &Ledger<'_, '_>,
    session: &AppSession,
) -> Result<BTreeMap<String, Decimal>, AppError> {
    let account = AccountId::from(&session.session_id);
    let mut totals = BTreeMap::new();
    for participant in &session.participants {
        for balance in ledger.balances_for(participant, &account)? {
            *totals.entry(balance.asset).or_insert(Decimal::ZERO) += balance.amount;
        }
    }
    totals.retain(|_, v| !v.is_zero());
    Ok(totals)
}

/// Allocations must sum, per asset, to the session's current total.
///
/// Zero allocations of an asset the session does not hold are ignored;
/// any other allocation of such an asset is a violation.
pub(crate) fn check_conservation(
    before: &BTreeMap<String, Decimal>,
    allocations: &[AppAllocation],
) -> Result<(), AppError> {
    let mut allocated: BTreeMap<String, Decimal> = BTreeMap::new();
    for allocation in allocations {
        *allocated
            .entry(allocation.asset.to_lowercase())
            .or_insert(Decimal::ZERO) += allocation.amount;
    }

    for (asset, sum) in &allocated {
        if !before.contains_key(asset) && !sum.is_zero() {
            return Err(AppError::ConservationViolated {
                asset: asset.clone(),
                expected: Decimal::ZERO,
                allocated: *sum,
            });
        }
    }
    for (asset, total) in before {
        let sum = allocated.get(asset).copied().unwrap_or(Decimal::ZERO);
        if sum != *total {
            return Err(AppError::ConservationViolated {
                asset: asset.clone(),
                expected: *total,
                allocated: sum,
            });
        }
    }
    Ok(())
}
