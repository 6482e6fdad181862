use clearnode_core::{Address, AppSession};
use clearnode_ledger::{SessionKeyRegistry, SignerKind};
use clearnode_store::StoreTx;
use std::collections::HashMap;

use crate::error::AppError;

/// Request signers mapped onto the session participants they act for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedSigners {
    /// participant wallet -> address that signed for it
    by_participant: HashMap<Address, Address>,
    /// Summed weight of distinct participants that signed.
    pub weight: u64,
}

impl ResolvedSigners {
    /// Address that signed on behalf of a participant, if any.
    pub fn signer_for(&self, participant: &Address) -> Option<Address> {
        self.by_participant.get(participant).copied()
    }

    /// Fail unless the signed weight reaches the session quorum.
    pub fn ensure_quorum(&self, session: &AppSession) -> Result<(), AppError> {
        if self.weight < session.quorum {
            tracing::debug!(
                session_id = %session.session_id,
                signed = self.weight,
                required = session.quorum,
                "quorum not met"
            );
            return Err(AppError::QuorumNotMet {
                signed: self.weight,
                required: session.quorum,
            });
        }
        Ok(())
    }
}

/// Map every signer onto a participant.
///
/// A signer counts for a participant when it is the participant itself, a
/// custody signer bound to it, or an unexpired session key of it scoped to
/// the session's application. Any other signer fails the request. A
/// participant's weight is counted once however many of its signers appear.
pub fn resolve_signers(
    tx: &StoreTx<'_>,
    registry: &SessionKeyRegistry,
    session: &AppSession,
    signers: &[Address],
) -> Result<ResolvedSigners, AppError> {
    let mut resolved = ResolvedSigners::default();

    for signer in signers {
        let participant = if session.is_participant(signer) {
            *signer
        } else {
            resolve_delegate(tx, registry, session, signer)?
        };

        if resolved.by_participant.contains_key(&participant) {
            // A direct signature takes precedence over a delegate's.
            if participant == *signer {
                resolved.by_participant.insert(participant, *signer);
            }
            continue;
        }
        let weight = session.weight_of(&participant).unwrap_or(0).max(0) as u64;
        resolved.weight += weight;
        resolved.by_participant.insert(participant, *signer);
    }
    Ok(resolved)
}

fn resolve_delegate(
    tx: &StoreTx<'_>,
    registry: &SessionKeyRegistry,
    session: &AppSession,
    signer: &Address,
) -> Result<Address, AppError> {
    let binding = registry
        .binding(tx, signer)?
        .filter(|b| session.is_participant(&b.wallet))
        .ok_or(AppError::UnknownSigner(*signer))?;

    if binding.kind == SignerKind::SessionKey {
        let key = registry
            .session_key(tx, signer)?
            .ok_or(AppError::UnknownSigner(*signer))?;
        if key.app_name != session.application {
            return Err(AppError::UnknownSigner(*signer));
        }
        if key.is_expired() {
            return Err(AppError::SessionKeyExpired(*signer));
        }
    }
    Ok(binding.wallet)
}
