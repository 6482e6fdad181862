use clearnode_core::{Address, ChannelStatus};
use clearnode_store::StoreTx;

use crate::error::LedgerError;

/// Fail if any channel of the wallet is under dispute.
///
/// A challenged channel freezes all off-chain settlement for its wallet.
pub fn ensure_no_challenged_channels(tx: &StoreTx<'_>, wallet: &Address) -> Result<(), LedgerError> {
    if let Some(channel) = tx
        .channels_for_wallet(wallet)?
        .into_iter()
        .find(|c| c.status == ChannelStatus::Challenged)
    {
        tracing::warn!(
            wallet = %wallet,
            channel_id = %channel.channel_id,
            "request rejected: wallet has a challenged channel"
        );
        return Err(LedgerError::ChallengedChannel {
            wallet: *wallet,
            channel_id: channel.channel_id,
        });
    }
    Ok(())
}
