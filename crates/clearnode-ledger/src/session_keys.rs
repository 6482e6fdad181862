use chrono::{DateTime, Utc};
use clearnode_core::{Address, Allowance, Decimal, SessionKey};
use clearnode_store::StoreTx;
use dashmap::DashMap;
use std::collections::HashSet;

use crate::error::LedgerError;
use crate::ledger::Ledger;

/// How a signer address relates to the wallet it acts for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignerKind {
    /// Signs channel states for the wallet; exempt from spend caps.
    Custody,
    /// Delegated key bounded by per-asset allowances.
    SessionKey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignerBinding {
    pub wallet: Address,
    pub kind: SignerKind,
}

/// Parameters of a session key registration.
#[derive(Debug, Clone)]
pub struct NewSessionKey {
    pub wallet: Address,
    pub signer: Address,
    pub app_name: String,
    pub app_address: Option<Address>,
    pub scope: String,
    pub allowances: Vec<Allowance>,
    pub expires_at: DateTime<Utc>,
}

/// Session-key registry.
///
/// Keeps two process-wide read-through caches (signer → binding and
/// signer → session key) in front of the store. The caches are rebuilt by
/// [`SessionKeyRegistry::load`] at startup and must be refreshed through the
/// `apply_*` / [`SessionKeyRegistry::invalidate`] hooks after a commit; they
/// carry no transactional guarantee.
pub struct SessionKeyRegistry {
    bindings: DashMap<Address, SignerBinding>,
    keys: DashMap<Address, SessionKey>,
}

impl SessionKeyRegistry {
    /// Create a registry with empty caches.
    pub fn new() -> Self {
        Self {
            bindings: DashMap::new(),
            keys: DashMap::new(),
        }
    }

    /// Rebuild both caches from storage.
    pub fn load(&self, tx: &StoreTx<'_>) -> Result<(), LedgerError> {
        self.bindings.clear();
        self.keys.clear();

        let keys = tx.all_session_keys()?;
        for key in &keys {
            self.cache_key(key.clone());
        }
        let channels = tx.all_channels()?;
        for channel in &channels {
            self.bind_custody_signer(channel.participant, channel.wallet);
        }

        tracing::info!(
            session_keys = keys.len(),
            bindings = self.bindings.len(),
            "session key registry loaded"
        );
        Ok(())
    }

    /// Record a channel participant as a direct signer for its wallet.
    pub fn bind_custody_signer(&self, signer: Address, wallet: Address) {
        if signer == wallet {
            return;
        }
        self.bindings.insert(
            signer,
            SignerBinding {
                wallet,
                kind: SignerKind::Custody,
            },
        );
    }

    /// Drop cached state for a signer; the next read goes to storage.
    pub fn invalidate(&self, signer: &Address) {
        self.keys.remove(signer);
        if let Some(binding) = self.bindings.get(signer).map(|b| *b) {
            if binding.kind == SignerKind::SessionKey {
                self.bindings.remove(signer);
            }
        }
    }

    /// Publish a committed registration to the caches.
    pub fn apply_added(&self, key: &SessionKey, replaced: Option<&SessionKey>) {
        if let Some(old) = replaced {
            self.invalidate(&old.signer);
        }
        self.cache_key(key.clone());
    }

    /// Publish a committed revocation to the caches.
    pub fn apply_revoked(&self, key: &SessionKey) {
        self.invalidate(&key.signer);
    }

    fn cache_key(&self, key: SessionKey) {
        if !matches!(self.bindings.get(&key.signer).map(|b| b.kind), Some(SignerKind::Custody)) {
            self.bindings.insert(
                key.signer,
                SignerBinding {
                    wallet: key.wallet,
                    kind: SignerKind::SessionKey,
                },
            );
        }
        self.keys.insert(key.signer, key);
    }

    /// The session key registered for a signer, if any.
    pub fn session_key(
        &self,
        tx: &StoreTx<'_>,
        signer: &Address,
    ) -> Result<Option<SessionKey>, LedgerError> {
        if let Some(key) = self.keys.get(signer) {
            return Ok(Some(key.clone()));
        }
        let found = tx.get_session_key(signer)?;
        if let Some(key) = &found {
            self.cache_key(key.clone());
        }
        Ok(found)
    }

    /// How a signer is bound to a wallet, if it is bound at all.
    pub fn binding(
        &self,
        tx: &StoreTx<'_>,
        signer: &Address,
    ) -> Result<Option<SignerBinding>, LedgerError> {
        if let Some(binding) = self.bindings.get(signer) {
            return Ok(Some(*binding));
        }
        Ok(self.session_key(tx, signer)?.map(|key| SignerBinding {
            wallet: key.wallet,
            kind: SignerKind::SessionKey,
        }))
    }

    /// Wallet a delegated or custody signer acts for. Unbound addresses resolve to `None`.
    pub fn resolve_wallet(
        &self,
        tx: &StoreTx<'_>,
        signer: &Address,
    ) -> Result<Option<Address>, LedgerError> {
        Ok(self.binding(tx, signer)?.map(|b| b.wallet))
    }

    /// Register a session key, replacing any prior key for the same `(wallet, app)`.
    ///
    /// Returns the stored key and the one it replaced. Call
    /// [`SessionKeyRegistry::apply_added`] once the transaction commits.
    pub fn add_session_key(
        &self,
        tx: &StoreTx<'_>,
        request: NewSessionKey,
    ) -> Result<(SessionKey, Option<SessionKey>), LedgerError> {
        let now = Utc::now();
        if request.expires_at <= now {
            return Err(LedgerError::InvalidParams(format!(
                "session key expiry {} is in the past",
                request.expires_at
            )));
        }
        if request.signer == request.wallet {
            return Err(LedgerError::InvalidParams(
                "session key signer must differ from the wallet".into(),
            ));
        }
        if request.app_name.trim().is_empty() {
            return Err(LedgerError::InvalidParams("application name is required".into()));
        }
        let allowances = normalize_allowances(request.allowances)?;

        if let Some(binding) = self.bindings.get(&request.signer).map(|b| *b) {
            if binding.kind == SignerKind::Custody {
                return Err(LedgerError::SignerInUse(request.signer));
            }
        }
        if let Some(existing) = tx.get_session_key(&request.signer)? {
            if existing.wallet != request.wallet || existing.app_name != request.app_name {
                return Err(LedgerError::SignerInUse(request.signer));
            }
        }

        let replaced = tx.session_key_for_app(&request.wallet, &request.app_name)?;
        if let Some(old) = &replaced {
            tx.delete_session_key(old)?;
        }

        let key = SessionKey {
            signer: request.signer,
            wallet: request.wallet,
            app_name: request.app_name,
            app_address: request.app_address,
            allowances,
            used_allowances: Vec::new(),
            scope: request.scope,
            expires_at: request.expires_at,
            created_at: now,
        };
        tx.put_session_key(&key)?;

        tracing::info!(
            wallet = %key.wallet,
            signer = %key.signer,
            app = %key.app_name,
            expires_at = %key.expires_at,
            replaced = replaced.is_some(),
            "session key added"
        );
        Ok((key, replaced))
    }

    /// Delete a session key. Only its wallet or the key itself may revoke it.
    pub fn revoke(
        &self,
        tx: &StoreTx<'_>,
        requester: &Address,
        signer: &Address,
    ) -> Result<SessionKey, LedgerError> {
        let key = tx
            .get_session_key(signer)?
            .ok_or_else(|| LedgerError::NotFound(format!("session key {}", signer)))?;
        if *requester != key.wallet && *requester != key.signer {
            return Err(LedgerError::Unauthorized(format!(
                "{} may not revoke session key {}",
                requester, signer
            )));
        }
        tx.delete_session_key(&key)?;
        tracing::info!(wallet = %key.wallet, signer = %signer, "session key revoked");
        Ok(key)
    }

    /// Session keys registered by a wallet.
    pub fn keys_for_wallet(
        &self,
        tx: &StoreTx<'_>,
        wallet: &Address,
    ) -> Result<Vec<SessionKey>, LedgerError> {
        Ok(tx.session_keys_for_wallet(wallet)?)
    }

    /// Check that a signer may spend `requested` of `asset`.
    ///
    /// Returns the address debits must be attributed to: the signer when it
    /// is a session key, `None` for direct signers, which are never capped.
    pub fn validate_spending(
        &self,
        tx: &StoreTx<'_>,
        signer: &Address,
        asset: &str,
        requested: Decimal,
    ) -> Result<Option<Address>, LedgerError> {
        if let Some(binding) = self.bindings.get(signer).map(|b| *b) {
            if binding.kind == SignerKind::Custody {
                return Ok(None);
            }
        }
        let key = match self.session_key(tx, signer)? {
            Some(key) => key,
            None => return Ok(None),
        };
        if key.is_expired() {
            return Err(LedgerError::SessionKeyExpired(*signer));
        }
        let allowance = key.allowance_for(asset).ok_or_else(|| LedgerError::NoAllowance {
            signer: *signer,
            asset: asset.to_lowercase(),
        })?;
        let spent = Ledger::new(tx).spent_by(signer, asset)?;
        if spent + requested > allowance {
            return Err(LedgerError::AllowanceExceeded {
                signer: *signer,
                asset: asset.to_lowercase(),
                allowance,
                spent,
                requested,
            });
        }
        Ok(Some(*signer))
    }

    /// Refresh the cached used-allowance figure of a session key after a spend.
    pub fn record_spend(
        &self,
        tx: &StoreTx<'_>,
        signer: &Address,
        asset: &str,
    ) -> Result<(), LedgerError> {
        let Some(mut key) = tx.get_session_key(signer)? else {
            return Ok(());
        };
        let spent = Ledger::new(tx).spent_by(signer, asset)?;
        key.set_used(asset, spent);
        tx.put_session_key(&key)?;
        self.keys.remove(signer);
        Ok(())
    }
}

impl Default for SessionKeyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn normalize_allowances(allowances: Vec<Allowance>) -> Result<Vec<Allowance>, LedgerError> {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(allowances.len());
    for allowance in allowances {
        let asset = allowance.asset.to_lowercase();
        if asset.is_empty() {
            return Err(LedgerError::InvalidParams("allowance asset is required".into()));
        }
        if allowance.amount.is_sign_negative() && !allowance.amount.is_zero() {
            return Err(LedgerError::InvalidAmount(format!(
                "allowance for {} is negative",
                asset
            )));
        }
        if !seen.insert(asset.clone()) {
            return Err(LedgerError::InvalidParams(format!(
                "duplicate allowance for {}",
                asset
            )));
        }
        out.push(Allowance {
            asset,
            amount: allowance.amount,
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use clearnode_core::AccountId;
    use clearnode_store::testing::TempStore;

    const WALLET: Address = Address([1u8; 20]);
    const SIGNER: Address = Address([5u8; 20]);

    fn request(app: &str, cap: i64) -> NewSessionKey {
        NewSessionKey {
            wallet: WALLET,
            signer: SIGNER,
            app_name: app.into(),
            app_address: None,
            scope: "app.create".into(),
            allowances: vec![Allowance {
                asset: "USDC".into(),
                amount: Decimal::from(cap),
            }],
            expires_at: Utc::now() + Duration::hours(1),
        }
    }

    #[test]
    fn test_add_and_resolve() {
        let store = TempStore::new();
        let registry = SessionKeyRegistry::new();
        let tx = store.begin();
        let (key, replaced) = registry.add_session_key(&tx, request("chess", 100)).unwrap();
        assert!(replaced.is_none());
        assert_eq!(key.allowances[0].asset, "usdc");
        tx.commit().unwrap();
        registry.apply_added(&key, None);

        let tx = store.begin();
        assert_eq!(registry.resolve_wallet(&tx, &SIGNER).unwrap(), Some(WALLET));
        assert_eq!(registry.resolve_wallet(&tx, &Address([7u8; 20])).unwrap(), None);
    }

    #[test]
    fn test_past_expiry_rejected() {
        let store = TempStore::new();
        let registry = SessionKeyRegistry::new();
        let tx = store.begin();
        let mut req = request("chess", 100);
        req.expires_at = Utc::now() - Duration::seconds(1);
        assert!(matches!(
            registry.add_session_key(&tx, req),
            Err(LedgerError::InvalidParams(_))
        ));
    }

    #[test]
    fn test_new_key_replaces_prior_for_same_app() {
        let store = TempStore::new();
        let registry = SessionKeyRegistry::new();
        let tx = store.begin();
        registry.add_session_key(&tx, request("chess", 100)).unwrap();

        let mut second = request("chess", 50);
        second.signer = Address([6u8; 20]);
        let (_, replaced) = registry.add_session_key(&tx, second).unwrap();
        assert_eq!(replaced.map(|k| k.signer), Some(SIGNER));
        assert!(tx.get_session_key(&SIGNER).unwrap().is_none());
        assert_eq!(registry.keys_for_wallet(&tx, &WALLET).unwrap().len(), 1);
    }

    #[test]
    fn test_signer_cannot_serve_two_wallets() {
        let store = TempStore::new();
        let registry = SessionKeyRegistry::new();
        let tx = store.begin();
        registry.add_session_key(&tx, request("chess", 100)).unwrap();
        let mut other = request("chess", 100);
        other.wallet = Address([2u8; 20]);
        assert!(matches!(
            registry.add_session_key(&tx, other),
            Err(LedgerError::SignerInUse(_))
        ));
    }

    #[test]
    fn test_spending_cap_enforced() {
        let store = TempStore::new();
        let registry = SessionKeyRegistry::new();
        let tx = store.begin();
        registry.add_session_key(&tx, request("chess", 100)).unwrap();
        let ledger = Ledger::new(&tx);
        let main = AccountId::from(&WALLET);
        ledger.record(&WALLET, &main, "usdc", Decimal::from(500), None).unwrap();

        let attributed = registry
            .validate_spending(&tx, &SIGNER, "usdc", Decimal::from(60))
            .unwrap();
        assert_eq!(attributed, Some(SIGNER));
        ledger.record(&WALLET, &main, "usdc", Decimal::from(-60), attributed).unwrap();
        registry.record_spend(&tx, &SIGNER, "usdc").unwrap();
        assert_eq!(
            tx.get_session_key(&SIGNER).unwrap().unwrap().used_allowances[0].amount,
            Decimal::from(60)
        );

        assert!(registry.validate_spending(&tx, &SIGNER, "usdc", Decimal::from(40)).is_ok());
        assert!(matches!(
            registry.validate_spending(&tx, &SIGNER, "usdc", Decimal::from(41)),
            Err(LedgerError::AllowanceExceeded { .. })
        ));
        assert!(matches!(
            registry.validate_spending(&tx, &SIGNER, "eth", Decimal::ONE),
            Err(LedgerError::NoAllowance { .. })
        ));
    }

    #[test]
    fn test_expired_key_cannot_spend() {
        let store = TempStore::new();
        let registry = SessionKeyRegistry::new();
        let tx = store.begin();
        let key = SessionKey {
            signer: SIGNER,
            wallet: WALLET,
            app_name: "chess".into(),
            app_address: None,
            allowances: vec![Allowance {
                asset: "usdc".into(),
                amount: Decimal::from(100),
            }],
            used_allowances: vec![],
            scope: "all".into(),
            expires_at: Utc::now() - Duration::minutes(1),
            created_at: Utc::now() - Duration::hours(1),
        };
        tx.put_session_key(&key).unwrap();
        assert!(matches!(
            registry.validate_spending(&tx, &SIGNER, "usdc", Decimal::ONE),
            Err(LedgerError::SessionKeyExpired(_))
        ));
    }

    #[test]
    fn test_custody_signer_is_exempt() {
        let store = TempStore::new();
        let registry = SessionKeyRegistry::new();
        let custody = Address([8u8; 20]);
        registry.bind_custody_signer(custody, WALLET);
        let tx = store.begin();
        assert_eq!(
            registry
                .validate_spending(&tx, &custody, "usdc", Decimal::from(1_000_000))
                .unwrap(),
            None
        );
        assert_eq!(registry.resolve_wallet(&tx, &custody).unwrap(), Some(WALLET));
    }

    #[test]
    fn test_revoke_requires_owner() {
        let store = TempStore::new();
        let registry = SessionKeyRegistry::new();
        let tx = store.begin();
        let (key, _) = registry.add_session_key(&tx, request("chess", 100)).unwrap();
        registry.apply_added(&key, None);

        assert!(matches!(
            registry.revoke(&tx, &Address([3u8; 20]), &SIGNER),
            Err(LedgerError::Unauthorized(_))
        ));
        let revoked = registry.revoke(&tx, &WALLET, &SIGNER).unwrap();
        registry.apply_revoked(&revoked);
        assert!(registry.session_key(&tx, &SIGNER).unwrap().is_none());
        assert!(registry.revoke(&tx, &WALLET, &SIGNER).is_err());
    }

    #[test]
    fn test_load_rebuilds_caches() {
        let store = TempStore::new();
        let tx = store.begin();
        SessionKeyRegistry::new()
            .add_session_key(&tx, request("chess", 100))
            .unwrap();
        tx.commit().unwrap();

        let registry = SessionKeyRegistry::new();
        let tx = store.begin();
        registry.load(&tx).unwrap();
        assert_eq!(
            registry.binding(&tx, &SIGNER).unwrap(),
            Some(SignerBinding {
                wallet: WALLET,
                kind: SignerKind::SessionKey
            })
        );
    }
}
