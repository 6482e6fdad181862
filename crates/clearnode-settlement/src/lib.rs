//! Clearnode settlement
//!
//! Keeps the channel mirror in step with the custody contract and produces
//! broker-signed resize and close states for clients to submit on chain.
//!
//! - [`events`]: decoded custody events
//! - [`reconcile`]: event-driven channel state machine and ledger effects
//! - [`state`]: channel state encoding and hashing
//! - [`cosign`]: read-only resize/close proposal flows

pub mod error;
pub mod events;
pub mod reconcile;
pub mod state;
pub mod cosign;

pub use error::SettlementError;
pub use events::{
    ChannelChallenged, ChannelClosed, ChannelCreated, ChannelJoined, ChannelResized,
    CustodyEvent, EventAllocation,
};
pub use reconcile::{ChannelReconciler, Reconciled};
pub use state::{ChannelState, StateAllocation, StateIntent};
pub use cosign::{ChannelCoSigner, CloseRequest, ResizeRequest, SettlementProposal};
