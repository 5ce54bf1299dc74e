//! Build-engine collaborator surface for kiln.
//!
//! The durable state layer treats the engine that actually provisions
//! instances and runs steps as an external capability set: `unit` defines
//! the `BuildUnit` and `Artifact` traits the stateful wrapper drives, `exec`
//! is the plan-driven local engine the CLI ships with, and `mock` is the
//! scriptable unit the tests use.

pub mod exec;
pub mod mock;
pub mod unit;

pub use exec::{BuildPlan, ExecUnit, StepPlan, UnitPlan};
pub use mock::MockUnit;
pub use unit::{Artifact, BuildUnit, InstanceDetails, RunContext, StepSpec};

use thiserror::Error;

/// Version label the engine writes into the state document.
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("build plan error: {0}")]
    Plan(String),
    #[error("instance creation failed: {0}")]
    Instance(String),
    #[error("cannot reconnect to instance {id}: {message}")]
    Reconnect { id: String, message: String },
    #[error("step '{step}' failed: {message}")]
    Step { step: String, message: String },
    #[error("interrupted by shutdown request")]
    Interrupted,
    #[error("plan serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
