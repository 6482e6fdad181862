use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use crate::error::CoreError;
use crate::types::{Address, SessionId};

/// Parameters that define an app session; its digest is the session ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppDefinition {
    /// Application protocol identifier.
    pub protocol: String,
    /// Application name that session keys must be scoped to.
    #[serde(default)]
    pub application: String,
    /// Participating wallets, in signing order.
    pub participants: Vec<Address>,
    /// Signature weight of each participant, aligned with `participants`.
    pub weights: Vec<i64>,
    /// Minimum summed signer weight required to authorize an intent.
    pub quorum: u64,
    /// Challenge period in seconds.
    #[serde(default)]
    pub challenge: u64,
    /// Caller-chosen nonce making the definition unique.
    pub nonce: u64,
}

impl AppDefinition {
    /// Validate participant/weight/quorum consistency.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.participants.len() < 2 {
            return Err(CoreError::ValidationError(
                "app session needs at least two participants".into(),
            ));
        }
        if self.weights.len() != self.participants.len() {
            return Err(CoreError::ValidationError(format!(
                "{} weights for {} participants",
                self.weights.len(),
                self.participants.len()
            )));
        }
        if self.nonce == 0 {
            return Err(CoreError::ValidationError("nonce must be non-zero".into()));
        }
        if let Some(w) = self.weights.iter().find(|w| **w < 0) {
            return Err(CoreError::ValidationError(format!(
                "participant weight {} is negative",
                w
            )));
        }
        let unique: HashSet<&Address> = self.participants.iter().collect();
        if unique.len() != self.participants.len() {
            return Err(CoreError::ValidationError("duplicate participant".into()));
        }
        let total: u64 = self.weights.iter().map(|w| *w as u64).sum();
        if self.quorum > total {
            return Err(CoreError::ValidationError(format!(
                "quorum {} exceeds total weight {}",
                self.quorum, total
            )));
        }
        Ok(())
    }
}

/// Lifecycle status of an app session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppSessionStatus {
    Open,
    /// Final state.
    Closed,
}

impl fmt::Display for AppSessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// A multi-party virtual ledger session.
///
/// Balances are not stored here: they live in the ledger under
/// `account = session_id`, one bucket per participant wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppSession {
    pub session_id: SessionId,
    pub protocol: String,
    pub application: String,
    pub participants: Vec<Address>,
    pub weights: Vec<i64>,
    pub quorum: u64,
    pub nonce: u64,
    pub challenge_seconds: u64,
    /// Starts at 1, incremented on every successful intent.
    pub version: u64,
    pub status: AppSessionStatus,
    /// Opaque application state supplied by participants.
    pub session_data: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AppSession {
    /// Build a freshly opened session from its definition.
    pub fn open(
        session_id: SessionId,
        definition: &AppDefinition,
        session_data: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            protocol: definition.protocol.clone(),
            application: definition.application.clone(),
            participants: definition.participants.clone(),
            weights: definition.weights.clone(),
            quorum: definition.quorum,
            nonce: definition.nonce,
            challenge_seconds: definition.challenge,
            version: 1,
            status: AppSessionStatus::Open,
            session_data,
            created_at: now,
            updated_at: now,
        }
    }

    /// Reconstruct the definition this session was created from.
    pub fn definition(&self) -> AppDefinition {
        AppDefinition {
            protocol: self.protocol.clone(),
            application: self.application.clone(),
            participants: self.participants.clone(),
            weights: self.weights.clone(),
            quorum: self.quorum,
            challenge: self.challenge_seconds,
            nonce: self.nonce,
        }
    }

    /// Signature weight of a participant, if it is one.
    pub fn weight_of(&self, wallet: &Address) -> Option<i64> {
        self.participants
            .iter()
            .position(|p| p == wallet)
            .map(|i| self.weights[i])
    }

    pub fn is_participant(&self, wallet: &Address) -> bool {
        self.participants.contains(wallet)
    }
}

/// One participant's share of one asset in an app session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppAllocation {
    pub participant: Address,
    pub asset: String,
    pub amount: Decimal,
}

impl AppAllocation {
    pub fn new(participant: Address, asset: impl Into<String>, amount: Decimal) -> Self {
        Self {
            participant,
            asset: asset.into().to_lowercase(),
            amount,
        }
    }
}
