use clearnode_core::{Address, Asset};
use clearnode_store::StoreTx;
use dashmap::DashMap;

use crate::error::LedgerError;

/// Asset registry with a process-wide cache.
///
/// Rows are immutable once stored, so cached entries never go stale.
pub struct AssetRegistry {
    cache: DashMap<(u64, Address), Asset>,
}

impl AssetRegistry {
    /// Create an empty registry cache.
    pub fn new() -> Self {
        Self {
            cache: DashMap::new(),
        }
    }

    /// Insert an asset unless `(token, chain_id)` is already registered.
    ///
    /// Returns the stored row, which may be the pre-existing one.
    pub fn register(&self, tx: &StoreTx<'_>, asset: Asset) -> Result<Asset, LedgerError> {
        if tx.put_asset_if_absent(&asset)? {
            tracing::info!(asset = %asset, "asset registered");
            return Ok(asset);
        }
        self.get(tx, asset.chain_id, &asset.token)
    }

    /// Look up an asset by token and chain, failing if unknown.
    pub fn get(&self, tx: &StoreTx<'_>, chain_id: u64, token: &Address) -> Result<Asset, LedgerError> {
        self.find(tx, chain_id, token)?.ok_or_else(|| {
            LedgerError::NotFound(format!("asset {} on chain {}", token, chain_id))
        })
    }

    /// Look up an asset by token and chain.
    pub fn find(
        &self,
        tx: &StoreTx<'_>,
        chain_id: u64,
        token: &Address,
    ) -> Result<Option<Asset>, LedgerError> {
        if let Some(asset) = self.cache.get(&(chain_id, *token)) {
            return Ok(Some(asset.clone()));
        }
        let found = tx.get_asset(chain_id, token)?;
        if let Some(asset) = &found {
            self.cache.insert((chain_id, *token), asset.clone());
        }
        Ok(found)
    }

    /// All registered assets, optionally restricted to one chain.
    pub fn list(&self, tx: &StoreTx<'_>, chain_id: Option<u64>) -> Result<Vec<Asset>, LedgerError> {
        Ok(tx.list_assets(chain_id)?)
    }
}

impl Default for AssetRegistry {
    fn default() -> Self {
        Self::new()
    }
}
