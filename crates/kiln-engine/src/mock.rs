//! Scriptable in-memory unit for exercising the stateful wrapper.

use crate::unit::{BuildUnit, InstanceDetails, RunContext, StepSpec};
use crate::EngineError;
use kiln_state::{ArtifactRecord, InstanceRecord};
use std::collections::BTreeMap;

/// A build unit whose behavior is scripted up front: which step fails,
/// whether instance creation or reconnection works, and whether the unit
/// has an instance at all. Counters record what the wrapper asked for.
pub struct MockUnit {
    name: String,
    steps: usize,
    post_steps: usize,
    fail_provisioner: Option<(usize, String)>,
    fail_post_processor: Option<(usize, String)>,
    fail_create: Option<String>,
    fail_reconnect: Option<String>,
    no_instance: bool,
    keep_on_failure: bool,

    pub created_instances: usize,
    pub reconnects: usize,
    pub provisioner_runs: Vec<usize>,
    pub post_processor_runs: Vec<usize>,
    pub artifact_requests: usize,
}

impl MockUnit {
    pub fn new(name: &str, steps: usize) -> Self {
        MockUnit {
            name: name.to_owned(),
            steps,
            post_steps: 0,
            fail_provisioner: None,
            fail_post_processor: None,
            fail_create: None,
            fail_reconnect: None,
            no_instance: false,
            keep_on_failure: true,
            created_instances: 0,
            reconnects: 0,
            provisioner_runs: Vec::new(),
            post_processor_runs: Vec::new(),
            artifact_requests: 0,
        }
    }

    pub fn with_post_processors(mut self, count: usize) -> Self {
        self.post_steps = count;
        self
    }

    pub fn failing_provisioner(mut self, index: usize, message: &str) -> Self {
        self.fail_provisioner = Some((index, message.to_owned()));
        self
    }

    pub fn failing_post_processor(mut self, index: usize, message: &str) -> Self {
        self.fail_post_processor = Some((index, message.to_owned()));
        self
    }

    pub fn failing_creation(mut self, message: &str) -> Self {
        self.fail_create = Some(message.to_owned());
        self
    }

    pub fn failing_reconnect(mut self, message: &str) -> Self {
        self.fail_reconnect = Some(message.to_owned());
        self
    }

    pub fn without_instance(mut self) -> Self {
        self.no_instance = true;
        self
    }

    pub fn discarding_instance_on_failure(mut self) -> Self {
        self.keep_on_failure = false;
        self
    }

    fn specs(&self, prefix: &str, count: usize) -> Vec<StepSpec> {
        (0..count)
            .map(|i| StepSpec::new("mock-shell", format!("{prefix}-{i}")))
            .collect()
    }
}

impl BuildUnit for MockUnit {
    fn name(&self) -> &str {
        &self.name
    }

    fn unit_type(&self) -> &str {
        "mock"
    }

    fn provisioners(&self) -> Vec<StepSpec> {
        self.specs("step", self.steps)
    }

    fn post_processors(&self) -> Vec<StepSpec> {
        self.specs("post", self.post_steps)
    }

    fn create_instance(
        &mut self,
        _ctx: &RunContext,
    ) -> Result<Option<InstanceDetails>, EngineError> {
        if let Some(message) = &self.fail_create {
            return Err(EngineError::Instance(message.clone()));
        }
        if self.no_instance {
            return Ok(None);
        }
        self.created_instances += 1;
        Ok(Some(InstanceDetails {
            id: format!("mock-{}-{}", self.name, self.created_instances),
            builder_id: format!("mock.{}", self.name),
            provider: "mock".to_owned(),
            region: "local".to_owned(),
            keep_on_failure: self.keep_on_failure,
            ..InstanceDetails::default()
        }))
    }

    fn reconnect(&mut self, _ctx: &RunContext, instance: &InstanceRecord) -> Result<(), EngineError> {
        if let Some(message) = &self.fail_reconnect {
            return Err(EngineError::Reconnect {
                id: instance.id.clone(),
                message: message.clone(),
            });
        }
        self.reconnects += 1;
        Ok(())
    }

    fn run_provisioner(&mut self, _ctx: &RunContext, index: usize) -> Result<(), EngineError> {
        self.provisioner_runs.push(index);
        if let Some((fail_index, message)) = &self.fail_provisioner {
            if *fail_index == index {
                return Err(EngineError::Step {
                    step: format!("step-{index}"),
                    message: message.clone(),
                });
            }
        }
        Ok(())
    }

    fn run_post_processor(&mut self, _ctx: &RunContext, index: usize) -> Result<(), EngineError> {
        self.post_processor_runs.push(index);
        if let Some((fail_index, message)) = &self.fail_post_processor {
            if *fail_index == index {
                return Err(EngineError::Step {
                    step: format!("post-{index}"),
                    message: message.clone(),
                });
            }
        }
        Ok(())
    }

    fn artifacts(&mut self, _ctx: &RunContext) -> Result<Vec<ArtifactRecord>, EngineError> {
        self.artifact_requests += 1;
        Ok(vec![ArtifactRecord {
            id: format!("{}-artifact", self.name),
            builder_id: format!("mock.{}", self.name),
            artifact_type: "mock".to_owned(),
            files: vec![format!("out/{}.img", self.name)],
            metadata: BTreeMap::new(),
            hash: None,
        }])
    }
}
