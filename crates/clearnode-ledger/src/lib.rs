//! Clearnode ledger
//!
//! The double-entry accounting primitive and the services built directly on
//! it: the ledger-transaction audit log, the asset registry, the session-key
//! registry with spend caps, the challenged-channel freeze guard and
//! off-chain transfers. Every operation runs inside a caller-supplied
//! [`StoreTx`](clearnode_store::StoreTx).

pub mod error;
pub mod ledger;
pub mod transactions;
pub mod assets;
pub mod session_keys;
pub mod guards;
pub mod transfer;

pub use error::LedgerError;
pub use ledger::Ledger;
pub use transactions::{record_transaction, transaction_hash, TransactionFilter, TransactionLog};
pub use assets::AssetRegistry;
pub use session_keys::{NewSessionKey, SessionKeyRegistry, SignerBinding, SignerKind};
pub use guards::ensure_no_challenged_channels;
pub use transfer::{transfer, TransferRequest};
