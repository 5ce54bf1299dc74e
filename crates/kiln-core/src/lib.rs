//! Stateful build orchestration for kiln.
//!
//! Wraps the external build engine's per-build units in a state machine that
//! records durable checkpoints through the state manager: unchanged inputs
//! skip entirely, interrupted builds resume from the last checkpoint, and
//! failures land in a recorded, resumable state.

pub mod concurrency;
pub mod lifecycle;
pub mod wrapper;

pub use concurrency::{install_signal_handler, shutdown_requested};
pub use lifecycle::validate_transition;
pub use wrapper::{CachedArtifact, StatefulBuild};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("state error: {0}")]
    State(#[from] kiln_state::StateError),
    #[error("engine error: {0}")]
    Engine(#[from] kiln_engine::EngineError),
    #[error("invalid build state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
}
