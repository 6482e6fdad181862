//! Clearnode core types
//!
//! Shared domain vocabulary for the clearing node: addresses and identifiers,
//! the asset registry row with raw/decimal conversion, the channel mirror and
//! its status state machine, app sessions, ledger rows and session keys.

pub mod error;
pub mod types;
pub mod asset;
pub mod channel;
pub mod app_session;
pub mod ledger;
pub mod session_key;
pub mod notify;

pub use error::CoreError;
pub use types::{AccountId, Address, ChannelId, RawDelta, SessionId};
pub use asset::Asset;
pub use channel::{Channel, ChannelStateMachine, ChannelStatus, CustodyTransition};
pub use app_session::{AppAllocation, AppDefinition, AppSession, AppSessionStatus};
pub use ledger::{Balance, LedgerEntry, LedgerTransaction, TransactionKind};
pub use session_key::{Allowance, SessionKey};
pub use notify::{Notifier, NoopNotifier};

pub use primitive_types::U256;
pub use rust_decimal::Decimal;
