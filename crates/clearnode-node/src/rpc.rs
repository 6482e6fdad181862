//! Signed RPC envelope and method dispatch.
//!
//! A request is `{"req": [id, method, params, timestamp], "sig": [..]}`. Each
//! signature is a 65-byte recoverable signature over the keccak-256 digest of
//! the JSON-encoded `req` array; the recovered addresses are the request's
//! signers. The first signer identifies the caller: a wallet, or a custody
//! signer or session key resolving to one. Responses use the same envelope
//! under `res` and carry the broker's signature.

use chrono::{DateTime, Utc};
use clearnode_app::{
    AppError, AppSessionEngine, CloseAppSession, CreateAppSession, Intent, SubmitAppState,
};
use clearnode_core::{
    AccountId, Address, Allowance, AppAllocation, AppDefinition, AppSessionStatus, Balance,
    ChannelId, ChannelStatus, CoreError, Notifier, RawDelta, SessionId, TransactionKind,
};
use clearnode_crypto::{keccak256, recover_address, sign_hash, CryptoError, Hash, KeyPair, Signature};
use clearnode_ledger::{
    transfer, AssetRegistry, Ledger, LedgerError, NewSessionKey, SessionKeyRegistry,
    TransactionFilter, TransactionLog, TransferRequest,
};
use clearnode_settlement::{ChannelCoSigner, CloseRequest, ResizeRequest, SettlementError};
use clearnode_store::{Store, StoreError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::api::ErrorResponse;

/// `[request_id, method, params, timestamp_ms]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcPayload(pub u64, pub String, pub Value, pub u64);

impl RpcPayload {
    pub fn new(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self(id, method.into(), params, Utc::now().timestamp_millis().max(0) as u64)
    }

    pub fn id(&self) -> u64 {
        self.0
    }

    pub fn method(&self) -> &str {
        &self.1
    }

    pub fn params(&self) -> &Value {
        &self.2
    }

    /// Digest the envelope signatures cover.
    pub fn digest(&self) -> Result<Hash, serde_json::Error> {
        Ok(keccak256(&serde_json::to_vec(self)?))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub req: RpcPayload,
    #[serde(default)]
    pub sig: Vec<Signature>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub res: RpcPayload,
    pub sig: Vec<Signature>,
}

impl RpcResponse {
    /// The error message if this is an error response.
    pub fn error(&self) -> Option<&str> {
        if self.res.method() != "error" {
            return None;
        }
        self.res.params().get("error").and_then(Value::as_str)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("unknown method: {0}")]
    UnknownMethod(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("invalid params: {0}")]
    Params(#[from] serde_json::Error),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    App(#[from] AppError),

    #[error(transparent)]
    Settlement(#[from] SettlementError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// The authenticated side of a request.
struct Caller {
    /// Wallet the first signer acts for.
    wallet: Address,
    /// Every recovered signer, in signature order.
    signers: Vec<Address>,
}

impl Caller {
    fn primary(&self) -> Address {
        self.signers[0]
    }
}

// --- Parameter types ---

#[derive(Deserialize, Default)]
#[serde(default)]
struct AccountParams {
    account_id: Option<String>,
    asset: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct TransactionParams {
    account_id: Option<String>,
    asset: Option<String>,
    tx_type: Option<TransactionKind>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct ChannelQuery {
    participant: Option<Address>,
    status: Option<ChannelStatus>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct AppSessionQuery {
    participant: Option<Address>,
    status: Option<AppSessionStatus>,
}

#[derive(Deserialize)]
struct AppSessionRef {
    app_session_id: SessionId,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct AssetQuery {
    chain_id: Option<u64>,
}

#[derive(Deserialize)]
struct CreateAppSessionParams {
    definition: AppDefinition,
    #[serde(default)]
    allocations: Vec<AppAllocation>,
    #[serde(default)]
    session_data: Option<String>,
}

#[derive(Deserialize)]
struct SubmitAppStateParams {
    app_session_id: SessionId,
    intent: String,
    expected_version: u64,
    allocations: Vec<AppAllocation>,
    #[serde(default)]
    session_data: Option<String>,
}

#[derive(Deserialize)]
struct CloseAppSessionParams {
    app_session_id: SessionId,
    expected_version: u64,
    allocations: Vec<AppAllocation>,
    #[serde(default)]
    session_data: Option<String>,
}

#[derive(Deserialize)]
struct ResizeParams {
    channel_id: ChannelId,
    #[serde(default)]
    allocate_amount: Option<String>,
    #[serde(default)]
    resize_amount: Option<String>,
    funds_destination: Address,
}

#[derive(Deserialize)]
struct CloseChannelParams {
    channel_id: ChannelId,
    funds_destination: Address,
}

#[derive(Deserialize)]
struct AddSessionKeyParams {
    session_key: Address,
    application: String,
    #[serde(default)]
    app_address: Option<Address>,
    #[serde(default = "default_scope")]
    scope: String,
    #[serde(default)]
    allowances: Vec<Allowance>,
    expires_at: DateTime<Utc>,
}

fn default_scope() -> String {
    "app".into()
}

#[derive(Deserialize)]
struct RevokeSessionKeyParams {
    session_key: Address,
}

#[derive(Deserialize)]
struct TransferParams {
    destination: Address,
    allocations: Vec<Balance>,
}

/// Routes RPC methods onto the ledger, app-session and settlement services.
pub struct RpcDispatcher {
    store: Arc<Store>,
    broker: Arc<KeyPair>,
    assets: Arc<AssetRegistry>,
    session_keys: Arc<SessionKeyRegistry>,
    apps: AppSessionEngine,
    cosigner: ChannelCoSigner,
    notifier: Arc<dyn Notifier>,
}

impl RpcDispatcher {
    pub fn new(
        store: Arc<Store>,
        broker: Arc<KeyPair>,
        assets: Arc<AssetRegistry>,
        session_keys: Arc<SessionKeyRegistry>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            apps: AppSessionEngine::new(session_keys.clone(), notifier.clone()),
            cosigner: ChannelCoSigner::new(broker.clone(), assets.clone()),
            store,
            broker,
            assets,
            session_keys,
            notifier,
        }
    }

    /// Execute a request and return the signed response. Failures become error responses.
    pub fn handle(&self, request: RpcRequest) -> RpcResponse {
        let id = request.req.id();
        let method = request.req.method().to_string();
        let payload = match self.dispatch(&request) {
            Ok(result) => {
                tracing::debug!(request_id = id, method = %method, "rpc request served");
                RpcPayload::new(id, method, result)
            }
            Err(err) => {
                tracing::warn!(request_id = id, method = %method, error = %err, "rpc request failed");
                let body = ErrorResponse {
                    error: err.to_string(),
                };
                RpcPayload::new(id, "error", json!(body))
            }
        };
        self.sign_response(payload)
    }

    fn sign_response(&self, res: RpcPayload) -> RpcResponse {
        let signature = res
            .digest()
            .map_err(|e| CryptoError::SigningFailed(e.to_string()))
            .and_then(|digest| sign_hash(&digest, &self.broker));
        let sig = match signature {
            Ok(sig) => vec![sig],
            Err(err) => {
                tracing::error!(request_id = res.id(), error = %err, "failed to sign response");
                Vec::new()
            }
        };
        RpcResponse { res, sig }
    }

    fn dispatch(&self, request: &RpcRequest) -> Result<Value, RpcError> {
        let params = request.req.params();
        match request.req.method() {
            "ping" => Ok(json!("pong")),
            "getConfig" => self.get_config(),
            "getAssets" => self.get_assets(parse(params)?),
            "getAppDefinition" => self.get_app_definition(parse(params)?),
            "getAppSessions" => self.get_app_sessions(parse(params)?),
            "getChannels" => self.get_channels(parse(params)?),
            "getLedgerTransactions" => self.get_ledger_transactions(parse(params)?),
            "getLedgerBalances" => self.get_ledger_balances(&self.caller(request)?, parse(params)?),
            "getLedgerEntries" => self.get_ledger_entries(&self.caller(request)?, parse(params)?),
            "getSessionKeys" => self.get_session_keys(&self.caller(request)?),
            "addSessionKey" => self.add_session_key(&self.caller(request)?, parse(params)?),
            "revokeSessionKey" => self.revoke_session_key(&self.caller(request)?, parse(params)?),
            "transfer" => self.transfer(&self.caller(request)?, parse(params)?),
            "createAppSession" => self.create_app_session(&self.caller(request)?, parse(params)?),
            "submitAppState" => self.submit_app_state(&self.caller(request)?, parse(params)?),
            "closeAppSession" => self.close_app_session(&self.caller(request)?, parse(params)?),
            "requestResize" => self.request_resize(&self.caller(request)?, parse(params)?),
            "requestClose" => self.request_close(&self.caller(request)?, parse(params)?),
            other => Err(RpcError::UnknownMethod(other.to_string())),
        }
    }

    fn caller(&self, request: &RpcRequest) -> Result<Caller, RpcError> {
        let signers = recover_signers(request)?;
        let Some(first) = signers.first().copied() else {
            return Err(RpcError::Unauthorized("request is not signed".into()));
        };
        let tx = self.store.begin();
        let wallet = self.session_keys.resolve_wallet(&tx, &first)?.unwrap_or(first);
        Ok(Caller { wallet, signers })
    }

    // --- Queries ---

    fn get_config(&self) -> Result<Value, RpcError> {
        let tx = self.store.begin();
        let assets = self.assets.list(&tx, None)?;
        let mut chains: Vec<u64> = assets.iter().map(|a| a.chain_id).collect();
        chains.sort_unstable();
        chains.dedup();
        Ok(json!({
            "broker_address": self.broker.address(),
            "chain_ids": chains,
        }))
    }

    fn get_assets(&self, p: AssetQuery) -> Result<Value, RpcError> {
        let tx = self.store.begin();
        Ok(serde_json::to_value(self.assets.list(&tx, p.chain_id)?)?)
    }

    fn get_app_definition(&self, p: AppSessionRef) -> Result<Value, RpcError> {
        let tx = self.store.begin();
        Ok(serde_json::to_value(self.apps.app_definition(&tx, &p.app_session_id)?)?)
    }

    fn get_app_sessions(&self, p: AppSessionQuery) -> Result<Value, RpcError> {
        let tx = self.store.begin();
        let sessions = self.apps.app_sessions(&tx, p.participant.as_ref(), p.status)?;
        Ok(serde_json::to_value(sessions)?)
    }

    fn get_channels(&self, p: ChannelQuery) -> Result<Value, RpcError> {
        let tx = self.store.begin();
        let mut channels = match &p.participant {
            Some(wallet) => tx.channels_for_wallet(wallet)?,
            None => tx.all_channels()?,
        };
        if let Some(status) = p.status {
            channels.retain(|c| c.status == status);
        }
        channels.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(serde_json::to_value(channels)?)
    }

    fn get_ledger_transactions(&self, p: TransactionParams) -> Result<Value, RpcError> {
        let tx = self.store.begin();
        let filter = TransactionFilter {
            account: p.account_id.map(AccountId::new),
            asset: p.asset,
            kind: p.tx_type,
        };
        Ok(serde_json::to_value(TransactionLog::query(&tx, &filter)?)?)
    }

    /// Balances of the caller's main bucket, or of an app session when `account_id` names one.
    fn get_ledger_balances(&self, caller: &Caller, p: AccountParams) -> Result<Value, RpcError> {
        let tx = self.store.begin();
        if let Some(account) = &p.account_id {
            if let Ok(session_id) = account.parse::<SessionId>() {
                if tx.get_app_session(&session_id)?.is_some() {
                    return Ok(serde_json::to_value(self.apps.balances(&tx, &session_id)?)?);
                }
            }
        }
        let account = p
            .account_id
            .map(AccountId::new)
            .unwrap_or_else(|| AccountId::from(&caller.wallet));
        let balances = Ledger::new(&tx).balances_for(&caller.wallet, &account)?;
        Ok(serde_json::to_value(balances)?)
    }

    fn get_ledger_entries(&self, caller: &Caller, p: AccountParams) -> Result<Value, RpcError> {
        let tx = self.store.begin();
        let account = p.account_id.map(AccountId::new);
        let entries =
            Ledger::new(&tx).entries(&caller.wallet, account.as_ref(), p.asset.as_deref())?;
        Ok(serde_json::to_value(entries)?)
    }

    fn get_session_keys(&self, caller: &Caller) -> Result<Value, RpcError> {
        let tx = self.store.begin();
        Ok(serde_json::to_value(self.session_keys.keys_for_wallet(&tx, &caller.wallet)?)?)
    }

    // --- Session keys and transfers ---

    fn add_session_key(&self, caller: &Caller, p: AddSessionKeyParams) -> Result<Value, RpcError> {
        if caller.primary() != caller.wallet {
            return Err(RpcError::Unauthorized(
                "session keys must be registered by the wallet itself".into(),
            ));
        }
        let tx = self.store.begin();
        let (key, replaced) = self.session_keys.add_session_key(
            &tx,
            NewSessionKey {
                wallet: caller.wallet,
                signer: p.session_key,
                app_name: p.application,
                app_address: p.app_address,
                scope: p.scope,
                allowances: p.allowances,
                expires_at: p.expires_at,
            },
        )?;
        tx.commit()?;
        self.session_keys.apply_added(&key, replaced.as_ref());
        Ok(serde_json::to_value(key)?)
    }

    fn revoke_session_key(
        &self,
        caller: &Caller,
        p: RevokeSessionKeyParams,
    ) -> Result<Value, RpcError> {
        let tx = self.store.begin();
        let key = self.session_keys.revoke(&tx, &caller.primary(), &p.session_key)?;
        tx.commit()?;
        self.session_keys.apply_revoked(&key);
        Ok(json!({ "session_key": key.signer }))
    }

    fn transfer(&self, caller: &Caller, p: TransferParams) -> Result<Value, RpcError> {
        let request = TransferRequest {
            from: caller.wallet,
            to: p.destination,
            signer: caller.primary(),
            allocations: p.allocations,
        };
        let tx = self.store.begin();
        let transactions = transfer(&tx, &self.session_keys, &request)?;
        tx.commit()?;
        self.notifier.balance_updated(&request.from);
        self.notifier.balance_updated(&request.to);
        Ok(serde_json::to_value(transactions)?)
    }

    // --- App sessions ---

    fn create_app_session(
        &self,
        caller: &Caller,
        p: CreateAppSessionParams,
    ) -> Result<Value, RpcError> {
        let session = self.apps.create(
            &self.store,
            CreateAppSession {
                definition: p.definition,
                allocations: p.allocations,
                session_data: p.session_data,
                signers: caller.signers.clone(),
            },
        )?;
        Ok(serde_json::to_value(session)?)
    }

    fn submit_app_state(
        &self,
        caller: &Caller,
        p: SubmitAppStateParams,
    ) -> Result<Value, RpcError> {
        let session = self.apps.submit(
            &self.store,
            SubmitAppState {
                session_id: p.app_session_id,
                intent: Intent::from_name(&p.intent, p.allocations)?,
                expected_version: p.expected_version,
                session_data: p.session_data,
                signers: caller.signers.clone(),
            },
        )?;
        Ok(serde_json::to_value(session)?)
    }

    fn close_app_session(
        &self,
        caller: &Caller,
        p: CloseAppSessionParams,
    ) -> Result<Value, RpcError> {
        let session = self.apps.close(
            &self.store,
            CloseAppSession {
                session_id: p.app_session_id,
                expected_version: p.expected_version,
                allocations: p.allocations,
                session_data: p.session_data,
                signers: caller.signers.clone(),
            },
        )?;
        Ok(serde_json::to_value(session)?)
    }

    // --- Channel settlement ---

    fn request_resize(&self, caller: &Caller, p: ResizeParams) -> Result<Value, RpcError> {
        let request = ResizeRequest {
            channel_id: p.channel_id,
            allocate_amount: p.allocate_amount.as_deref().map(str::parse::<RawDelta>).transpose()?,
            resize_amount: p.resize_amount.as_deref().map(str::parse::<RawDelta>).transpose()?,
            funds_destination: p.funds_destination,
            signers: caller.signers.clone(),
        };
        let tx = self.store.begin();
        let proposal = self.cosigner.request_resize(&tx, &request)?;
        Ok(serde_json::to_value(proposal)?)
    }

    fn request_close(&self, caller: &Caller, p: CloseChannelParams) -> Result<Value, RpcError> {
        let request = CloseRequest {
            channel_id: p.channel_id,
            funds_destination: p.funds_destination,
            signers: caller.signers.clone(),
        };
        let tx = self.store.begin();
        let proposal = self.cosigner.request_close(&tx, &request)?;
        Ok(serde_json::to_value(proposal)?)
    }
}

/// Decode params given either as an object or as a one-element array holding it.
fn parse<T: DeserializeOwned>(params: &Value) -> Result<T, RpcError> {
    let value = match params {
        Value::Null => json!({}),
        Value::Array(items) if items.len() == 1 => items[0].clone(),
        Value::Array(items) if items.is_empty() => json!({}),
        other => other.clone(),
    };
    Ok(serde_json::from_value(value)?)
}

/// Addresses that signed the request payload, in signature order.
pub fn recover_signers(request: &RpcRequest) -> Result<Vec<Address>, RpcError> {
    let digest = request.req.digest()?;
    request
        .sig
        .iter()
        .map(|sig| recover_address(&digest, sig).map_err(RpcError::from))
        .collect()
}
