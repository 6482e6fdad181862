use chrono::Utc;
use clearnode_core::{
    AccountId, Address, AppAllocation, AppDefinition, AppSession, AppSessionStatus, Balance,
    Notifier, SessionId,
};
use clearnode_ledger::SessionKeyRegistry;
use clearnode_store::{Store, StoreError, StoreTx};
use std::sync::Arc;

use crate::definition::{derive_session_id, validate_definition};
use crate::error::AppError;
use crate::intent::{self, fund_from_unified, validate_allocations, Intent, IntentContext};
use crate::quorum::resolve_signers;

/// Open a new app session funded from participants' unified balances.
#[derive(Debug, Clone)]
pub struct CreateAppSession {
    pub definition: AppDefinition,
    pub allocations: Vec<AppAllocation>,
    pub session_data: Option<String>,
    /// Recovered signers of the request.
    pub signers: Vec<Address>,
}

/// Apply a deposit, withdraw or operate intent to an open session.
#[derive(Debug, Clone)]
pub struct SubmitAppState {
    pub session_id: SessionId,
    pub intent: Intent,
    /// Version the caller last observed; the write fails if it moved.
    pub expected_version: u64,
    pub session_data: Option<String>,
    pub signers: Vec<Address>,
}

/// Pay an open session out to participants and close it.
#[derive(Debug, Clone)]
pub struct CloseAppSession {
    pub session_id: SessionId,
    pub expected_version: u64,
    pub allocations: Vec<AppAllocation>,
    pub session_data: Option<String>,
    pub signers: Vec<Address>,
}

/// Creates app sessions and applies intents to them.
pub struct AppSessionEngine {
    session_keys: Arc<SessionKeyRegistry>,
    notifier: Arc<dyn Notifier>,
}

impl AppSessionEngine {
    pub fn new(session_keys: Arc<SessionKeyRegistry>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            session_keys,
            notifier,
        }
    }

    /// Create a session at version 1 and lock the initial allocations.
    ///
    /// Quorum is not required. Every participant with a positive allocation
    /// must have signed, directly or through a delegate.
    pub fn create(&self, store: &Store, req: CreateAppSession) -> Result<AppSession, AppError> {
        validate_definition(&req.definition)?;
        let session_id = derive_session_id(&req.definition);
        let session = AppSession::open(session_id, &req.definition, req.session_data);
        validate_allocations(&session, &req.allocations)?;

        let tx = store.begin();
        if tx.get_app_session_for_update(&session_id)?.is_some() {
            return Err(AppError::AlreadyExists(session_id));
        }
        let signers = resolve_signers(&tx, &self.session_keys, &session, &req.signers)?;
        let ctx = IntentContext {
            tx: &tx,
            registry: &self.session_keys,
            signers: &signers,
        };

        let account = AccountId::from(&session_id);
        let mut funded = Vec::new();
        for allocation in &req.allocations {
            if allocation.amount.is_zero() {
                continue;
            }
            fund_from_unified(
                &ctx,
                &account,
                &allocation.participant,
                &allocation.asset,
                allocation.amount,
            )?;
            if !funded.contains(&allocation.participant) {
                funded.push(allocation.participant);
            }
        }

        tx.insert_app_session(&session).map_err(|e| match e {
            StoreError::AlreadyExists { .. } => AppError::AlreadyExists(session_id),
            other => AppError::Store(other),
        })?;
        tx.commit()?;

        tracing::info!(
            session_id = %session_id,
            application = %session.application,
            participants = session.participants.len(),
            "app session created"
        );
        for wallet in &funded {
            self.notifier.balance_updated(wallet);
        }
        self.notifier.app_session_updated(&session);
        Ok(session)
    }

    /// Apply a deposit, withdraw or operate intent.
    pub fn submit(&self, store: &Store, req: SubmitAppState) -> Result<AppSession, AppError> {
        if matches!(req.intent, Intent::Close(_)) {
            return Err(AppError::InvalidParams(
                "sessions are closed with closeAppSession".into(),
            ));
        }
        self.transition(
            store,
            &req.session_id,
            req.expected_version,
            &req.intent,
            req.session_data,
            &req.signers,
        )
    }

    /// Distribute the session's funds to participants' unified balances and close it.
    pub fn close(&self, store: &Store, req: CloseAppSession) -> Result<AppSession, AppError> {
        let intent = Intent::Close(req.allocations);
        self.transition(
            store,
            &req.session_id,
            req.expected_version,
            &intent,
            req.session_data,
            &req.signers,
        )
    }

    fn transition(
        &self,
        store: &Store,
        session_id: &SessionId,
        expected_version: u64,
        intent: &Intent,
        session_data: Option<String>,
        signers: &[Address],
    ) -> Result<AppSession, AppError> {
        let tx = store.begin();
        let mut session = tx
            .get_app_session_for_update(session_id)?
            .ok_or(AppError::NotFound(*session_id))?;
        if session.status != AppSessionStatus::Open {
            return Err(AppError::SessionNotOpen(*session_id));
        }
        if session.version != expected_version {
            return Err(AppError::VersionConflict {
                expected: expected_version,
                found: session.version,
            });
        }

        let resolved = resolve_signers(&tx, &self.session_keys, &session, signers)?;
        resolved.ensure_quorum(&session)?;

        let ctx = IntentContext {
            tx: &tx,
            registry: &self.session_keys,
            signers: &resolved,
        };
        let changed = intent::apply(intent, &ctx, &session)?;

        session.version += 1;
        session.updated_at = Utc::now();
        if session_data.is_some() {
            session.session_data = session_data;
        }
        if matches!(intent, Intent::Close(_)) {
            session.status = AppSessionStatus::Closed;
        }
        tx.update_app_session(&session, expected_version)
            .map_err(AppError::from_store)?;
        tx.commit()?;

        tracing::info!(
            session_id = %session_id,
            intent = intent.name(),
            version = session.version,
            "app session updated"
        );
        for wallet in &changed {
            self.notifier.balance_updated(wallet);
        }
        match intent {
            Intent::Close(_) if changed.is_empty() => {}
            _ => self.notifier.app_session_updated(&session),
        }
        Ok(session)
    }

    /// Sessions a wallet participates in, or every session, optionally by status.
    pub fn app_sessions(
        &self,
        tx: &StoreTx<'_>,
        participant: Option<&Address>,
        status: Option<AppSessionStatus>,
    ) -> Result<Vec<AppSession>, AppError> {
        let mut sessions = match participant {
            Some(wallet) => tx.app_sessions_for_participant(wallet)?,
            None => tx.all_app_sessions()?,
        };
        if let Some(status) = status {
            sessions.retain(|s| s.status == status);
        }
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(sessions)
    }

    pub fn app_definition(
        &self,
        tx: &StoreTx<'_>,
        session_id: &SessionId,
    ) -> Result<AppDefinition, AppError> {
        tx.get_app_session(session_id)?
            .map(|s| s.definition())
            .ok_or(AppError::NotFound(*session_id))
    }

    /// Current per-participant allocations held by a session.
    pub fn allocations(
        &self,
        tx: &StoreTx<'_>,
        session_id: &SessionId,
    ) -> Result<Vec<AppAllocation>, AppError> {
        let session = tx
            .get_app_session(session_id)?
            .ok_or(AppError::NotFound(*session_id))?;
        let account = AccountId::from(session_id);
        let mut out = Vec::new();
        for participant in &session.participants {
            for (asset, amount) in tx.balances_in_bucket(participant, &account)? {
                if !amount.is_zero() {
                    out.push(AppAllocation::new(*participant, asset, amount));
                }
            }
        }
        Ok(out)
    }

    /// Per-asset totals held by a session.
    pub fn balances(
        &self,
        tx: &StoreTx<'_>,
        session_id: &SessionId,
    ) -> Result<Vec<Balance>, AppError> {
        let session = tx
            .get_app_session(session_id)?
            .ok_or(AppError::NotFound(*session_id))?;
        let ledger = clearnode_ledger::Ledger::new(tx);
        Ok(intent::session_totals(&ledger, &session)?
            .into_iter()
            .map(|(asset, amount)| Balance { asset, amount })
            .collect())
    }
}
