use crate::EngineError;
use chrono::Utc;
use kiln_state::{ArtifactRecord, InstanceRecord};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Identity of one provisioner or post-processor, as the engine declares it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StepSpec {
    pub step_type: String,
    #[serde(default)]
    pub name: String,
}

impl StepSpec {
    pub fn new(step_type: impl Into<String>, name: impl Into<String>) -> Self {
        StepSpec {
            step_type: step_type.into(),
            name: name.into(),
        }
    }

    /// Label used in progress output: the name when present, else the type.
    pub fn label(&self) -> &str {
        if self.name.is_empty() {
            &self.step_type
        } else {
            &self.name
        }
    }
}

/// Per-invocation context handed to every engine call.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub build_name: String,
}

/// What the engine knows about an instance it just provisioned: identity and
/// connection metadata, mirroring [`InstanceRecord`] minus the bookkeeping
/// the state layer owns (`created_at` is stamped at recording time).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstanceDetails {
    pub id: String,
    pub builder_id: String,
    pub provider: String,
    pub region: String,
    pub public_ip: Option<String>,
    pub private_ip: Option<String>,
    pub remote_user: Option<String>,
    pub remote_port: Option<u16>,
    pub remote_key_path: Option<String>,
    pub metadata: BTreeMap<String, serde_json::Value>,
    pub keep_on_failure: bool,
}

impl InstanceDetails {
    /// Convert into the durable record, stamping the creation time.
    pub fn into_record(self) -> InstanceRecord {
        InstanceRecord {
            id: self.id,
            builder_id: self.builder_id,
            provider: self.provider,
            region: self.region,
            public_ip: self.public_ip,
            private_ip: self.private_ip,
            remote_user: self.remote_user,
            remote_port: self.remote_port,
            remote_key_path: self.remote_key_path,
            metadata: self.metadata,
            created_at: Utc::now(),
            keep_on_failure: self.keep_on_failure,
        }
    }
}

/// One build's worth of engine capability.
///
/// The stateful wrapper owns sequencing and durability; the unit only knows
/// how to create (or reattach to) its instance, execute a single step by
/// index, and report the artifacts of a finished build. Step indexes refer
/// to the orders returned by `provisioners` / `post_processors`.
pub trait BuildUnit {
    fn name(&self) -> &str;

    /// Engine kind, recorded as the build's `type`.
    fn unit_type(&self) -> &str;

    fn provisioners(&self) -> Vec<StepSpec>;

    fn post_processors(&self) -> Vec<StepSpec> {
        Vec::new()
    }

    /// Provision the instance this build runs on. `None` means the engine
    /// has no instance notion for this unit (purely local work). The
    /// returned details carry `keep_on_failure`, which decides whether a
    /// failed build preserves the instance for resumption.
    fn create_instance(&mut self, ctx: &RunContext)
        -> Result<Option<InstanceDetails>, EngineError>;

    /// Reattach to a previously recorded instance. An error here makes the
    /// wrapper discard the instance and start over.
    fn reconnect(&mut self, ctx: &RunContext, instance: &InstanceRecord)
        -> Result<(), EngineError>;

    fn run_provisioner(&mut self, ctx: &RunContext, index: usize) -> Result<(), EngineError>;

    fn run_post_processor(&mut self, _ctx: &RunContext, _index: usize) -> Result<(), EngineError> {
        Ok(())
    }

    /// The finished build's outputs.
    fn artifacts(&mut self, ctx: &RunContext) -> Result<Vec<ArtifactRecord>, EngineError>;
}

/// What a reported artifact can do. Artifacts reconstructed from state are
/// inert: they report identity and files, and destruction is a no-op.
pub trait Artifact {
    fn id(&self) -> &str;
    fn builder_id(&self) -> &str;
    fn files(&self) -> &[String];
    fn destroy(&mut self) -> Result<(), EngineError> {
        Ok(())
    }
}
