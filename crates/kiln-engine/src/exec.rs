//! Plan-driven local engine.
//!
//! A build plan is a JSON file mapping named builds to argv steps executed
//! on the local machine. It is the concrete engine the CLI ships with; the
//! wrapper drives it through the same `BuildUnit` capability it would use
//! for a remote provisioning engine.

use crate::unit::{BuildUnit, InstanceDetails, RunContext, StepSpec};
use crate::EngineError;
use kiln_state::{ArtifactRecord, InstanceRecord};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::process::Command;
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BuildPlan {
    pub builds: Vec<UnitPlan>,
    /// Resolved variables fed into change detection.
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
    /// Auxiliary source files whose content affects the build.
    #[serde(default)]
    pub sources: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UnitPlan {
    pub name: String,
    #[serde(rename = "type", default = "default_unit_type")]
    pub unit_type: String,
    #[serde(default)]
    pub provisioners: Vec<StepPlan>,
    #[serde(default)]
    pub post_processors: Vec<StepPlan>,
    #[serde(default)]
    pub artifacts: Vec<ArtifactPlan>,
    #[serde(default = "default_keep_on_failure")]
    pub keep_on_failure: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepPlan {
    #[serde(rename = "type", default = "default_step_type")]
    pub step_type: String,
    #[serde(default)]
    pub name: String,
    pub command: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArtifactPlan {
    pub id: String,
    #[serde(rename = "type", default = "default_artifact_type")]
    pub artifact_type: String,
    #[serde(default)]
    pub files: Vec<String>,
}

fn default_unit_type() -> String {
    "exec".to_owned()
}

fn default_step_type() -> String {
    "shell".to_owned()
}

fn default_artifact_type() -> String {
    "file".to_owned()
}

fn default_keep_on_failure() -> bool {
    true
}

impl BuildPlan {
    pub fn parse(content: &str) -> Result<Self, EngineError> {
        let plan: BuildPlan =
            serde_json::from_str(content).map_err(|e| EngineError::Plan(e.to_string()))?;
        let mut seen = std::collections::BTreeSet::new();
        for build in &plan.builds {
            if build.name.is_empty() {
                return Err(EngineError::Plan("build with empty name".to_owned()));
            }
            if !seen.insert(build.name.as_str()) {
                return Err(EngineError::Plan(format!(
                    "duplicate build name '{}'",
                    build.name
                )));
            }
        }
        Ok(plan)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// One runnable unit per plan build, in plan order.
    pub fn units(&self) -> Vec<ExecUnit> {
        self.builds.iter().cloned().map(ExecUnit::new).collect()
    }
}

/// A plan build executed via local processes.
pub struct ExecUnit {
    plan: UnitPlan,
}

impl ExecUnit {
    pub fn new(plan: UnitPlan) -> Self {
        ExecUnit { plan }
    }

    fn run_command(&self, spec: &StepSpec, argv: &[String]) -> Result<(), EngineError> {
        let (program, args) = argv.split_first().ok_or_else(|| {
            EngineError::Plan(format!("step '{}' has an empty command", spec.label()))
        })?;

        debug!("running step '{}': {argv:?}", spec.label());
        let output = Command::new(program).args(args).output().map_err(|e| {
            EngineError::Step {
                step: spec.label().to_owned(),
                message: format!("failed to spawn {program}: {e}"),
            }
        })?;

        if !output.stdout.is_empty() {
            debug!(
                "step '{}' stdout: {}",
                spec.label(),
                String::from_utf8_lossy(&output.stdout).trim_end()
            );
        }

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let detail = stderr.trim();
            let message = match output.status.code() {
                Some(code) if detail.is_empty() => format!("exit status {code}"),
                Some(code) => format!("exit status {code}: {detail}"),
                None => format!("terminated by signal: {detail}"),
            };
            Err(EngineError::Step {
                step: spec.label().to_owned(),
                message,
            })
        }
    }
}

fn step_specs(plans: &[StepPlan]) -> Vec<StepSpec> {
    plans
        .iter()
        .map(|p| StepSpec::new(p.step_type.clone(), p.name.clone()))
        .collect()
}

impl BuildUnit for ExecUnit {
    fn name(&self) -> &str {
        &self.plan.name
    }

    fn unit_type(&self) -> &str {
        &self.plan.unit_type
    }

    fn provisioners(&self) -> Vec<StepSpec> {
        step_specs(&self.plan.provisioners)
    }

    fn post_processors(&self) -> Vec<StepSpec> {
        step_specs(&self.plan.post_processors)
    }

    fn create_instance(
        &mut self,
        _ctx: &RunContext,
    ) -> Result<Option<InstanceDetails>, EngineError> {
        Ok(Some(InstanceDetails {
            id: format!("exec-{}", uuid::Uuid::new_v4()),
            builder_id: format!("exec.{}", self.plan.name),
            provider: "exec".to_owned(),
            metadata: BTreeMap::from([(
                "pid".to_owned(),
                serde_json::json!(std::process::id()),
            )]),
            keep_on_failure: self.plan.keep_on_failure,
            ..InstanceDetails::default()
        }))
    }

    fn reconnect(&mut self, _ctx: &RunContext, instance: &InstanceRecord) -> Result<(), EngineError> {
        // Local execution has nothing to reattach to; any instance this
        // engine minted is usable again as long as it is actually ours.
        if instance.provider != "exec" {
            return Err(EngineError::Reconnect {
                id: instance.id.clone(),
                message: format!("instance belongs to provider '{}'", instance.provider),
            });
        }
        Ok(())
    }

    fn run_provisioner(&mut self, _ctx: &RunContext, index: usize) -> Result<(), EngineError> {
        let step = self.plan.provisioners.get(index).cloned().ok_or_else(|| {
            EngineError::Plan(format!("provisioner index {index} out of range"))
        })?;
        let spec = StepSpec::new(step.step_type.clone(), step.name.clone());
        self.run_command(&spec, &step.command)
    }

    fn run_post_processor(&mut self, _ctx: &RunContext, index: usize) -> Result<(), EngineError> {
        let step = self.plan.post_processors.get(index).cloned().ok_or_else(|| {
            EngineError::Plan(format!("post-processor index {index} out of range"))
        })?;
        let spec = StepSpec::new(step.step_type.clone(), step.name.clone());
        self.run_command(&spec, &step.command)
    }

    fn artifacts(&mut self, _ctx: &RunContext) -> Result<Vec<ArtifactRecord>, EngineError> {
        Ok(self
            .plan
            .artifacts
            .iter()
            .map(|a| ArtifactRecord {
                id: a.id.clone(),
                builder_id: format!("exec.{}", self.plan.name),
                artifact_type: a.artifact_type.clone(),
                files: a.files.clone(),
                metadata: BTreeMap::new(),
                hash: None,
            })
            .collect())
    }
}
