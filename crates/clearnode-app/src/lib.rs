//! Clearnode app sessions
//!
//! Multi-party virtual ledgers. Participants lock funds from their unified
//! balance into a session and reallocate them under a weighted-quorum
//! signature policy. Every intent is applied in one store transaction that
//! compare-and-swaps the session version the caller observed.

pub mod error;
pub mod definition;
pub mod quorum;
pub mod intent;
pub mod engine;

pub use error::AppError;
pub use definition::{derive_session_id, validate_definition};
pub use quorum::{resolve_signers, ResolvedSigners};
pub use intent::Intent;
pub use engine::{AppSessionEngine, CloseAppSession, CreateAppSession, SubmitAppState};
