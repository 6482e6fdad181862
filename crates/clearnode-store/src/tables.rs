//! Typed table accessors on [`StoreTx`].

use clearnode_core::{
    AccountId, Address, AppSession, Asset, Channel, ChannelId, Decimal, LedgerEntry,
    LedgerTransaction, SessionId, SessionKey,
};

use crate::error::StoreError;
use crate::keys;
use crate::store::*;

impl<'a> StoreTx<'a> {
    // ---- assets ----

    /// Insert an asset row. Existing rows are left untouched; returns whether it was inserted.
    pub fn put_asset_if_absent(&self, asset: &Asset) -> Result<bool, StoreError> {
        let key = keys::asset_key(asset.chain_id, &asset.token);
        if self.get_raw_for_update(CF_ASSETS, &key)?.is_some() {
            return Ok(false);
        }
        self.put_json(CF_ASSETS, &key, asset)?;
        Ok(true)
    }

    pub fn get_asset(&self, chain_id: u64, token: &Address) -> Result<Option<Asset>, StoreError> {
        self.get_json(CF_ASSETS, &keys::asset_key(chain_id, token))
    }

    /// All assets, optionally restricted to one chain.
    pub fn list_assets(&self, chain_id: Option<u64>) -> Result<Vec<Asset>, StoreError> {
        match chain_id {
            Some(id) => self.scan_json(CF_ASSETS, &id.to_be_bytes()),
            None => self.scan_json(CF_ASSETS, &[]),
        }
    }

    // ---- channels ----

    /// Insert a new channel row and its wallet index entry.
    pub fn insert_channel(&self, channel: &Channel) -> Result<(), StoreError> {
        let key = channel.channel_id.as_bytes();
        if self.get_raw_for_update(CF_CHANNELS, key)?.is_some() {
            return Err(StoreError::AlreadyExists {
                table: CF_CHANNELS,
                key: channel.channel_id.to_hex(),
            });
        }
        self.put_json(CF_CHANNELS, key, channel)?;
        self.put_raw(
            CF_CHANNELS_BY_WALLET,
            &keys::wallet_channel_key(&channel.wallet, &channel.channel_id),
            &[],
        )
    }

    pub fn get_channel(&self, channel_id: &ChannelId) -> Result<Option<Channel>, StoreError> {
        self.get_json(CF_CHANNELS, channel_id.as_bytes())
    }

    /// Read a channel and lock its row until the transaction ends.
    pub fn get_channel_for_update(
        &self,
        channel_id: &ChannelId,
    ) -> Result<Option<Channel>, StoreError> {
        self.get_json_for_update(CF_CHANNELS, channel_id.as_bytes())
    }

    /// Overwrite a channel row if its stored version still equals `expected_version`.
    pub fn update_channel(&self, channel: &Channel, expected_version: u64) -> Result<(), StoreError> {
        let key = channel.channel_id.as_bytes();
        let stored: Channel =
            self.get_json_for_update(CF_CHANNELS, key)?
                .ok_or_else(|| StoreError::NotFound {
                    table: CF_CHANNELS,
                    key: channel.channel_id.to_hex(),
                })?;
        if stored.version != expected_version {
            return Err(StoreError::VersionConflict {
                table: CF_CHANNELS,
                key: channel.channel_id.to_hex(),
                expected: expected_version,
                found: stored.version,
            });
        }
        self.put_json(CF_CHANNELS, key, channel)
    }

    /// Channels funded by a wallet, in channel id order.
    pub fn channels_for_wallet(&self, wallet: &Address) -> Result<Vec<Channel>, StoreError> {
        let mut out = Vec::new();
        for (key, _) in self.scan_prefix(CF_CHANNELS_BY_WALLET, wallet.as_bytes())? {
            let id = ChannelId::from_slice(&key[Address::LEN..])
                .map_err(|_| StoreError::CorruptKey(CF_CHANNELS_BY_WALLET))?;
            if let Some(channel) = self.get_channel(&id)? {
                out.push(channel);
            }
        }
        Ok(out)
    }

    pub fn all_channels(&self) -> Result<Vec<Channel>, StoreError> {
        self.scan_json(CF_CHANNELS, &[])
    }

    // ---- app sessions ----

    /// Insert a new app session and index it under every participant.
    pub fn insert_app_session(&self, session: &AppSession) -> Result<(), StoreError> {
        let key = session.session_id.as_bytes();
        if self.get_raw_for_update(CF_APP_SESSIONS, key)?.is_some() {
            return Err(StoreError::AlreadyExists {
                table: CF_APP_SESSIONS,
                key: session.session_id.to_hex(),
            });
        }
        self.put_json(CF_APP_SESSIONS, key, session)?;
        for participant in &session.participants {
            self.put_raw(
                CF_APP_SESSIONS_BY_PARTICIPANT,
                &keys::participant_session_key(participant, &session.session_id),
                &[],
            )?;
        }
        Ok(())
    }

    pub fn get_app_session(&self, session_id: &SessionId) -> Result<Option<AppSession>, StoreError> {
        self.get_json(CF_APP_SESSIONS, session_id.as_bytes())
    }

    pub fn get_app_session_for_update(
        &self,
        session_id: &SessionId,
    ) -> Result<Option<AppSession>, StoreError> {
        self.get_json_for_update(CF_APP_SESSIONS, session_id.as_bytes())
    }

    /// Overwrite an app session if its stored version still equals `expected_version`.
    pub fn update_app_session(
        &self,
        session: &AppSession,
        expected_version: u64,
    ) -> Result<(), StoreError> {
        let key = session.session_id.as_bytes();
        let stored: AppSession = self
            .get_json_for_update(CF_APP_SESSIONS, key)?
            .ok_or_else(|| StoreError::NotFound {
                table: CF_APP_SESSIONS,
                key: session.session_id.to_hex(),
            })?;
        if stored.version != expected_version {
            return Err(StoreError::VersionConflict {
                table: CF_APP_SESSIONS,
                key: session.session_id.to_hex(),
                expected: expected_version,
                found: stored.version,
            });
        }
        self.put_json(CF_APP_SESSIONS, key, session)
    }

    pub fn app_sessions_for_participant(
        &self,
        wallet: &Address,
    ) -> Result<Vec<AppSession>, StoreError> {
        let mut out = Vec::new();
        for (key, _) in self.scan_prefix(CF_APP_SESSIONS_BY_PARTICIPANT, wallet.as_bytes())? {
            let id = SessionId::from_slice(&key[Address::LEN..])
                .map_err(|_| StoreError::CorruptKey(CF_APP_SESSIONS_BY_PARTICIPANT))?;
            if let Some(session) = self.get_app_session(&id)? {
                out.push(session);
            }
        }
        Ok(out)
    }

    pub fn all_app_sessions(&self) -> Result<Vec<AppSession>, StoreError> {
        self.scan_json(CF_APP_SESSIONS, &[])
    }

    // ---- ledger entries and balances ----

    /// Allocate the next ledger entry id.
    pub fn next_entry_id(&self) -> u64 {
        self.store().next_entry_id()
    }

    /// Append an entry and its bucket/signer index rows.
    pub fn insert_entry(&self, entry: &LedgerEntry) -> Result<(), StoreError> {
        let id = keys::id_key(entry.id);
        self.put_json(CF_LEDGER_ENTRIES, &id, entry)?;
        self.put_raw(
            CF_ENTRIES_BY_BUCKET,
            &keys::bucket_entry_key(&entry.owner, &entry.account_id, &entry.asset, entry.id),
            &[],
        )?;
        if let Some(signer) = &entry.session_key {
            self.put_raw(
                CF_ENTRIES_BY_SIGNER,
                &keys::signer_entry_key(signer, &entry.asset, entry.id),
                &[],
            )?;
        }
        Ok(())
    }

    pub fn get_entry(&self, id: u64) -> Result<Option<LedgerEntry>, StoreError> {
        self.get_json(CF_LEDGER_ENTRIES, &keys::id_key(id))
    }

    /// Entries of a wallet, optionally narrowed to one account and one asset, in id order.
    pub fn entries(
        &self,
        owner: &Address,
        account: Option<&AccountId>,
        asset: Option<&str>,
    ) -> Result<Vec<LedgerEntry>, StoreError> {
        let prefix = match (account, asset) {
            (Some(account), Some(asset)) => keys::bucket_prefix(owner, account, asset),
            (Some(account), None) => keys::bucket_account_prefix(owner, account),
            (None, _) => keys::owner_prefix(owner),
        };
        let mut out = Vec::new();
        for (key, _) in self.scan_prefix(CF_ENTRIES_BY_BUCKET, &prefix)? {
            let id = keys::decode_id(&key).ok_or(StoreError::CorruptKey(CF_ENTRIES_BY_BUCKET))?;
            let entry = self.get_entry(id)?.ok_or_else(|| StoreError::NotFound {
                table: CF_LEDGER_ENTRIES,
                key: id.to_string(),
            })?;
            if asset.map_or(true, |a| entry.asset == a) {
                out.push(entry);
            }
        }
        out.sort_by_key(|e| e.id);
        Ok(out)
    }

    /// Entries attributed to a session-key signer for one asset.
    pub fn entries_by_signer(
        &self,
        signer: &Address,
        asset: &str,
    ) -> Result<Vec<LedgerEntry>, StoreError> {
        let mut out = Vec::new();
        for (key, _) in self.scan_prefix(CF_ENTRIES_BY_SIGNER, &keys::signer_prefix(signer, asset))? {
            let id = keys::decode_id(&key).ok_or(StoreError::CorruptKey(CF_ENTRIES_BY_SIGNER))?;
            if let Some(entry) = self.get_entry(id)? {
                out.push(entry);
            }
        }
        Ok(out)
    }

    /// Materialized balance of one bucket.
    pub fn get_balance(
        &self,
        owner: &Address,
        account: &AccountId,
        asset: &str,
    ) -> Result<Decimal, StoreError> {
        Ok(self
            .get_json(CF_BALANCES, &keys::balance_key(owner, account, asset))?
            .unwrap_or(Decimal::ZERO))
    }

    /// Materialized balance of one bucket, locking the row until the transaction ends.
    pub fn get_balance_for_update(
        &self,
        owner: &Address,
        account: &AccountId,
        asset: &str,
    ) -> Result<Decimal, StoreError> {
        Ok(self
            .get_json_for_update(CF_BALANCES, &keys::balance_key(owner, account, asset))?
            .unwrap_or(Decimal::ZERO))
    }

    pub fn put_balance(
        &self,
        owner: &Address,
        account: &AccountId,
        asset: &str,
        amount: Decimal,
    ) -> Result<(), StoreError> {
        self.put_json(CF_BALANCES, &keys::balance_key(owner, account, asset), &amount)
    }

    /// Every `(asset, amount)` materialized for one bucket, in asset order.
    pub fn balances_in_bucket(
        &self,
        owner: &Address,
        account: &AccountId,
    ) -> Result<Vec<(String, Decimal)>, StoreError> {
        let mut out = Vec::new();
        for (key, value) in self.scan_prefix(CF_BALANCES, &keys::bucket_account_prefix(owner, account))? {
            let (_, asset) =
                keys::split_balance_key(&key).ok_or(StoreError::CorruptKey(CF_BALANCES))?;
            let amount: Decimal = serde_json::from_slice(&value)?;
            out.push((asset, amount));
        }
        Ok(out)
    }

    // ---- ledger transactions ----

    pub fn next_transaction_id(&self) -> u64 {
        self.store().next_transaction_id()
    }

    /// Append an audit row and index it under both of its accounts.
    pub fn insert_transaction(&self, tx: &LedgerTransaction) -> Result<(), StoreError> {
        self.put_json(CF_LEDGER_TRANSACTIONS, &keys::id_key(tx.id), tx)?;
        self.put_raw(
            CF_TRANSACTIONS_BY_ACCOUNT,
            &keys::account_transaction_key(&tx.from_account, tx.id),
            &[],
        )?;
        if tx.to_account != tx.from_account {
            self.put_raw(
                CF_TRANSACTIONS_BY_ACCOUNT,
                &keys::account_transaction_key(&tx.to_account, tx.id),
                &[],
            )?;
        }
        Ok(())
    }

    pub fn get_transaction(&self, id: u64) -> Result<Option<LedgerTransaction>, StoreError> {
        self.get_json(CF_LEDGER_TRANSACTIONS, &keys::id_key(id))
    }

    /// Audit rows naming an account on either side, in id order.
    pub fn transactions_for_account(
        &self,
        account: &AccountId,
    ) -> Result<Vec<LedgerTransaction>, StoreError> {
        let mut out = Vec::new();
        for (key, _) in self.scan_prefix(CF_TRANSACTIONS_BY_ACCOUNT, &keys::account_prefix(account))? {
            let id =
                keys::decode_id(&key).ok_or(StoreError::CorruptKey(CF_TRANSACTIONS_BY_ACCOUNT))?;
            if let Some(tx) = self.get_transaction(id)? {
                out.push(tx);
            }
        }
        Ok(out)
    }

    pub fn all_transactions(&self) -> Result<Vec<LedgerTransaction>, StoreError> {
        self.scan_json(CF_LEDGER_TRANSACTIONS, &[])
    }

    // ---- session keys ----

    /// Store a session key and its `(wallet, app)` index row.
    pub fn put_session_key(&self, key: &SessionKey) -> Result<(), StoreError> {
        self.put_json(CF_SESSION_KEYS, key.signer.as_bytes(), key)?;
        self.put_raw(
            CF_SESSION_KEYS_BY_APP,
            &keys::app_key(&key.wallet, &key.app_name),
            key.signer.as_bytes(),
        )
    }

    pub fn get_session_key(&self, signer: &Address) -> Result<Option<SessionKey>, StoreError> {
        self.get_json(CF_SESSION_KEYS, signer.as_bytes())
    }

    /// The key registered for a `(wallet, app)` pair, locking the index row.
    pub fn session_key_for_app(
        &self,
        wallet: &Address,
        app_name: &str,
    ) -> Result<Option<SessionKey>, StoreError> {
        match self.get_raw_for_update(CF_SESSION_KEYS_BY_APP, &keys::app_key(wallet, app_name))? {
            Some(signer) => {
                let signer = Address::from_slice(&signer)
                    .map_err(|_| StoreError::CorruptKey(CF_SESSION_KEYS_BY_APP))?;
                self.get_session_key(&signer)
            }
            None => Ok(None),
        }
    }

    pub fn delete_session_key(&self, key: &SessionKey) -> Result<(), StoreError> {
        self.delete(CF_SESSION_KEYS, key.signer.as_bytes())?;
        let app_key = keys::app_key(&key.wallet, &key.app_name);
        if self.get_raw(CF_SESSION_KEYS_BY_APP, &app_key)?.as_deref() == Some(key.signer.as_bytes()) {
            self.delete(CF_SESSION_KEYS_BY_APP, &app_key)?;
        }
        Ok(())
    }

    pub fn session_keys_for_wallet(&self, wallet: &Address) -> Result<Vec<SessionKey>, StoreError> {
        let mut out = Vec::new();
        for (_, signer) in self.scan_prefix(CF_SESSION_KEYS_BY_APP, &keys::app_wallet_prefix(wallet))? {
            let signer = Address::from_slice(&signer)
                .map_err(|_| StoreError::CorruptKey(CF_SESSION_KEYS_BY_APP))?;
            if let Some(key) = self.get_session_key(&signer)? {
                out.push(key);
            }
        }
        Ok(out)
    }

    pub fn all_session_keys(&self) -> Result<Vec<SessionKey>, StoreError> {
        self.scan_json(CF_SESSION_KEYS, &[])
    }
}
