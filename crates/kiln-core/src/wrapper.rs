//! The stateful build wrapper.
//!
//! Drives one engine unit through the build state machine, writing a durable
//! checkpoint at every boundary: record creation, instance registration, the
//! edge of every step, and both terminal statuses. On re-entry it decides
//! between skip (complete, inputs unchanged), resume (instance on record),
//! and a fresh build.

use crate::concurrency::shutdown_requested;
use crate::lifecycle::validate_transition;
use crate::CoreError;
use chrono::Utc;
use kiln_engine::{Artifact, BuildUnit, EngineError, RunContext, StepSpec};
use kiln_state::{
    ArtifactRecord, BuildRecord, BuildStatus, Manager, StepRecord, StepStatus,
};
use tracing::{debug, info, warn};

/// An artifact reported from the durable record. Inert: identity and file
/// list only, destruction is a no-op.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedArtifact {
    id: String,
    builder_id: String,
    files: Vec<String>,
}

impl From<&ArtifactRecord> for CachedArtifact {
    fn from(record: &ArtifactRecord) -> Self {
        CachedArtifact {
            id: record.id.clone(),
            builder_id: record.builder_id.clone(),
            files: record.files.clone(),
        }
    }
}

impl Artifact for CachedArtifact {
    fn id(&self) -> &str {
        &self.id
    }

    fn builder_id(&self) -> &str {
        &self.builder_id
    }

    fn files(&self) -> &[String] {
        &self.files
    }
}

impl std::fmt::Display for CachedArtifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.id, self.builder_id)
    }
}

fn cached_artifacts(record: &BuildRecord) -> Vec<CachedArtifact> {
    record.artifacts.iter().map(CachedArtifact::from).collect()
}

fn transition(record: &mut BuildRecord, to: BuildStatus) -> Result<(), CoreError> {
    validate_transition(record.status, to)?;
    record.status = to;
    Ok(())
}

fn step_mut<'r>(record: &'r mut BuildRecord, phase: &Phase, index: usize) -> &'r mut StepRecord {
    match phase {
        Phase::Provisioner => &mut record.provisioners[index],
        Phase::PostProcessor => &mut record.post_processors[index],
    }
}

fn pending_step(spec: &StepSpec) -> StepRecord {
    StepRecord {
        step_type: spec.step_type.clone(),
        name: spec.name.clone(),
        status: StepStatus::Pending,
        error: None,
        started_at: None,
        ended_at: None,
    }
}

/// Wraps an engine unit and a live manager session for one build.
pub struct StatefulBuild<'a, U: BuildUnit> {
    manager: &'a mut Manager,
    unit: &'a mut U,
}

enum Phase {
    Provisioner,
    PostProcessor,
}

impl<'a, U: BuildUnit> StatefulBuild<'a, U> {
    pub fn new(manager: &'a mut Manager, unit: &'a mut U) -> Self {
        StatefulBuild { manager, unit }
    }

    /// Run the build to a terminal status, or report cached artifacts.
    ///
    /// `inputs_changed` is the document-level change verdict the caller
    /// computed before overwriting the template record; a complete build is
    /// only skipped when it is false.
    pub fn run(&mut self, inputs_changed: bool) -> Result<Vec<CachedArtifact>, CoreError> {
        let name = self.unit.name().to_owned();
        let ctx = RunContext {
            build_name: name.clone(),
        };

        let existing = self.manager.document()?.get_build(&name).cloned();

        if let Some(record) = existing {
            if record.is_complete() {
                if !inputs_changed {
                    info!("build '{name}' is up to date, reporting recorded artifacts");
                    return Ok(cached_artifacts(&record));
                }
                info!("inputs changed, rebuilding '{name}' from scratch");
            } else if record.has_instance() {
                if record.provisioners.len() != self.unit.provisioners().len() {
                    warn!(
                        "build '{name}' recorded {} provisioners but the engine declares {}, starting fresh",
                        record.provisioners.len(),
                        self.unit.provisioners().len()
                    );
                } else if self.try_reconnect(&ctx, &record) {
                    return self.resume(&ctx, record);
                }
                // Reconnect refused: the instance is unusable. Fall through
                // to a fresh build, which re-initializes the record.
            }
        }

        self.fresh(&ctx, &name)
    }

    fn try_reconnect(&mut self, ctx: &RunContext, record: &BuildRecord) -> bool {
        let Some(instance) = record.instance.as_ref() else {
            return false;
        };
        info!(
            "found existing instance {} for build '{}', attempting resume",
            instance.id, record.name
        );
        match self.unit.reconnect(ctx, instance) {
            Ok(()) => true,
            Err(e) => {
                warn!("resume failed ({e}), starting fresh");
                false
            }
        }
    }

    fn fresh(&mut self, ctx: &RunContext, name: &str) -> Result<Vec<CachedArtifact>, CoreError> {
        let mut record = BuildRecord {
            name: name.to_owned(),
            build_type: self.unit.unit_type().to_owned(),
            status: BuildStatus::Pending,
            instance: None,
            provisioners: self.unit.provisioners().iter().map(pending_step).collect(),
            post_processors: self
                .unit
                .post_processors()
                .iter()
                .map(pending_step)
                .collect(),
            artifacts: Vec::new(),
            error: None,
            started_at: Some(Utc::now()),
            completed_at: None,
        };
        self.sync(&record)?;
        self.manager.save()?;

        // The creating status must be durable before the engine call: the
        // instance creation is irreversible, so the record has to say we
        // went in before we actually do.
        transition(&mut record, BuildStatus::Creating)?;
        self.sync(&record)?;
        self.manager.save()?;

        match self.unit.create_instance(ctx) {
            Ok(Some(details)) => {
                debug!("recorded instance {} for build '{name}'", details.id);
                record.instance = Some(details.into_record());
            }
            Ok(None) => {}
            Err(e) => return self.fail(record, e),
        }
        transition(&mut record, BuildStatus::Provisioning)?;
        self.sync(&record)?;
        self.manager.save()?;

        self.drive(ctx, record)
    }

    fn resume(
        &mut self,
        ctx: &RunContext,
        mut record: BuildRecord,
    ) -> Result<Vec<CachedArtifact>, CoreError> {
        // Steps still marked running were interrupted before their outcome
        // was recorded; treat them as failed so they re-run.
        for step in record
            .provisioners
            .iter_mut()
            .chain(record.post_processors.iter_mut())
        {
            if step.status == StepStatus::Running {
                step.status = StepStatus::Failed;
                step.error = Some("interrupted before completion was recorded".to_owned());
            }
        }

        match record.status {
            BuildStatus::Provisioning | BuildStatus::PostProcessing => {}
            BuildStatus::Pending => {
                transition(&mut record, BuildStatus::Creating)?;
                transition(&mut record, BuildStatus::Provisioning)?;
            }
            _ => transition(&mut record, BuildStatus::Provisioning)?,
        }
        record.error = None;
        record.completed_at = None;
        self.sync(&record)?;
        self.manager.save()?;

        info!(
            "resuming build '{}' from step {}",
            record.name,
            record.next_pending_step()
        );
        self.drive(ctx, record)
    }

    /// Run every step that still needs work, then finish. Shared by the
    /// fresh and resume paths; the record's step statuses say where to
    /// pick up.
    fn drive(
        &mut self,
        ctx: &RunContext,
        mut record: BuildRecord,
    ) -> Result<Vec<CachedArtifact>, CoreError> {
        if let Some(e) = self.run_steps(ctx, &mut record, Phase::Provisioner)? {
            return self.fail(record, e);
        }

        if record.status != BuildStatus::PostProcessing {
            transition(&mut record, BuildStatus::PostProcessing)?;
            self.sync(&record)?;
        }
        if let Some(e) = self.run_steps(ctx, &mut record, Phase::PostProcessor)? {
            return self.fail(record, e);
        }

        match self.unit.artifacts(ctx) {
            Ok(artifacts) => {
                transition(&mut record, BuildStatus::Complete)?;
                record.completed_at = Some(Utc::now());
                record.error = None;
                record.artifacts = artifacts;
                self.sync(&record)?;
                self.manager.save()?;
                info!("build '{}' complete", record.name);
                Ok(cached_artifacts(&record))
            }
            Err(e) => self.fail(record, e),
        }
    }

    /// Run every step of one phase that still needs work.
    ///
    /// `Ok(Some(e))` is an engine failure the caller records as the build's
    /// terminal state; `Err` is a state-layer failure and propagates as-is.
    fn run_steps(
        &mut self,
        ctx: &RunContext,
        record: &mut BuildRecord,
        phase: Phase,
    ) -> Result<Option<EngineError>, CoreError> {
        let count = match phase {
            Phase::Provisioner => record.provisioners.len(),
            Phase::PostProcessor => record.post_processors.len(),
        };

        for index in 0..count {
            let status = match phase {
                Phase::Provisioner => record.provisioners[index].status,
                Phase::PostProcessor => record.post_processors[index].status,
            };
            if matches!(status, StepStatus::Complete | StepStatus::Skipped) {
                debug!("step {index} already {status}, skipping");
                continue;
            }

            // Durable boundary: everything up to here (including the
            // previous step's completion) hits disk before this step runs.
            self.manager.flush()?;

            if shutdown_requested() {
                return Ok(Some(EngineError::Interrupted));
            }

            {
                let step = step_mut(record, &phase, index);
                step.status = StepStatus::Running;
                // failed -> running clears the previous error
                step.error = None;
                step.started_at = Some(Utc::now());
            }
            self.sync(record)?;

            let outcome = match phase {
                Phase::Provisioner => self.unit.run_provisioner(ctx, index),
                Phase::PostProcessor => self.unit.run_post_processor(ctx, index),
            };

            let step = step_mut(record, &phase, index);
            step.ended_at = Some(Utc::now());
            match outcome {
                Ok(()) => {
                    step.status = StepStatus::Complete;
                    self.sync(record)?;
                }
                Err(e) => {
                    step.status = StepStatus::Failed;
                    step.error = Some(e.to_string());
                    return Ok(Some(e));
                }
            }
        }
        Ok(None)
    }

    /// Terminal failure: record the error, decide the instance's fate, and
    /// make it all durable before surfacing the engine error.
    fn fail(
        &mut self,
        mut record: BuildRecord,
        err: EngineError,
    ) -> Result<Vec<CachedArtifact>, CoreError> {
        transition(&mut record, BuildStatus::Failed)?;
        record.error = Some(err.to_string());
        if let Some(instance) = record.instance.as_ref() {
            if !instance.keep_on_failure {
                debug!("discarding instance {} (keep_on_failure unset)", instance.id);
                record.instance = None;
            }
        }
        self.sync(&record)?;
        self.manager.save()?;
        Err(CoreError::Engine(err))
    }

    fn sync(&mut self, record: &BuildRecord) -> Result<(), kiln_state::StateError> {
        self.manager
            .document_mut()?
            .set_build(&record.name, record.clone());
        Ok(())
    }
}
