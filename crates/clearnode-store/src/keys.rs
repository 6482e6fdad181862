//! Key encodings for tables and secondary indexes.
//!
//! Composite string keys use `\0` as a separator; numeric ids are appended
//! big-endian so lexicographic order matches insertion order.

use clearnode_core::{AccountId, Address, ChannelId, SessionId};

const SEP: u8 = 0;

pub(crate) fn id_key(id: u64) -> [u8; 8] {
    id.to_be_bytes()
}

/// Decode a big-endian `u64` from the last eight bytes of a key.
pub(crate) fn decode_id(key: &[u8]) -> Option<u64> {
    if key.len() < 8 {
        return None;
    }
    let tail: [u8; 8] = key[key.len() - 8..].try_into().ok()?;
    Some(u64::from_be_bytes(tail))
}

pub(crate) fn asset_key(chain_id: u64, token: &Address) -> Vec<u8> {
    let mut key = Vec::with_capacity(28);
    key.extend_from_slice(&chain_id.to_be_bytes());
    key.extend_from_slice(token.as_bytes());
    key
}

pub(crate) fn wallet_channel_key(wallet: &Address, channel_id: &ChannelId) -> Vec<u8> {
    let mut key = Vec::with_capacity(52);
    key.extend_from_slice(wallet.as_bytes());
    key.extend_from_slice(channel_id.as_bytes());
    key
}

pub(crate) fn participant_session_key(wallet: &Address, session_id: &SessionId) -> Vec<u8> {
    let mut key = Vec::with_capacity(52);
    key.extend_from_slice(wallet.as_bytes());
    key.extend_from_slice(session_id.as_bytes());
    key
}

/// `owner \0 account \0 asset`, the materialized balance row of one bucket.
pub(crate) fn balance_key(owner: &Address, account: &AccountId, asset: &str) -> Vec<u8> {
    let mut key = bucket_account_prefix(owner, account);
    key.extend_from_slice(asset.as_bytes());
    key
}

/// `owner \0`, every bucket of a wallet.
pub(crate) fn owner_prefix(owner: &Address) -> Vec<u8> {
    let mut key = owner.to_hex().into_bytes();
    key.push(SEP);
    key
}

/// `owner \0 account \0`, every asset of one account bucket.
pub(crate) fn bucket_account_prefix(owner: &Address, account: &AccountId) -> Vec<u8> {
    let mut key = owner_prefix(owner);
    key.extend_from_slice(account.as_str().as_bytes());
    key.push(SEP);
    key
}

/// `owner \0 account \0 asset \0`, entries of one bucket.
pub(crate) fn bucket_prefix(owner: &Address, account: &AccountId, asset: &str) -> Vec<u8> {
    let mut key = balance_key(owner, account, asset);
    key.push(SEP);
    key
}

pub(crate) fn bucket_entry_key(
    owner: &Address,
    account: &AccountId,
    asset: &str,
    id: u64,
) -> Vec<u8> {
    let mut key = bucket_prefix(owner, account, asset);
    key.extend_from_slice(&id_key(id));
    key
}

/// Split a balance key back into `(account, asset)`.
pub(crate) fn split_balance_key(key: &[u8]) -> Option<(AccountId, String)> {
    let mut parts = key.split(|b| *b == SEP);
    let _owner = parts.next()?;
    let account = std::str::from_utf8(parts.next()?).ok()?;
    let asset = std::str::from_utf8(parts.next()?).ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some((AccountId::new(account), asset.to_string()))
}

pub(crate) fn signer_prefix(signer: &Address, asset: &str) -> Vec<u8> {
    let mut key = signer.to_hex().into_bytes();
    key.push(SEP);
    key.extend_from_slice(asset.as_bytes());
    key.push(SEP);
    key
}

pub(crate) fn signer_entry_key(signer: &Address, asset: &str, id: u64) -> Vec<u8> {
    let mut key = signer_prefix(signer, asset);
    key.extend_from_slice(&id_key(id));
    key
}

pub(crate) fn account_prefix(account: &AccountId) -> Vec<u8> {
    let mut key = account.as_str().as_bytes().to_vec();
    key.push(SEP);
    key
}

pub(crate) fn account_transaction_key(account: &AccountId, id: u64) -> Vec<u8> {
    let mut key = account_prefix(account);
    key.extend_from_slice(&id_key(id));
    key
}

pub(crate) fn app_key(wallet: &Address, app_name: &str) -> Vec<u8> {
    let mut key = wallet.to_hex().into_bytes();
    key.push(SEP);
    key.extend_from_slice(app_name.as_bytes());
    key
}

pub(crate) fn app_wallet_prefix(wallet: &Address) -> Vec<u8> {
    let mut key = wallet.to_hex().into_bytes();
    key.push(SEP);
    key
}
