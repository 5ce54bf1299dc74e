use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Schema version written to every state file. A reader that finds any other
/// value must refuse to load (`CorruptState`).
pub const STATE_VERSION: u32 = 1;

/// The complete builder state file.
///
/// Mappings are `BTreeMap` so that serialization is deterministic and the
/// fingerprint iterates keys in sorted order regardless of insertion order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StateDocument {
    pub version: u32,
    pub serial: u64,
    /// Minted once at creation, preserved through every save. Distinguishes
    /// unrelated state files that happen to share a path.
    pub lineage: String,
    pub builder_version: String,
    #[serde(default)]
    pub engine_version: String,
    pub template: TemplateRecord,
    pub builds: BTreeMap<String, BuildRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run: Option<RunInfo>,
}

/// The template and the resolved inputs it was last run with.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TemplateRecord {
    pub path: String,
    #[serde(default)]
    pub hash: String,
    pub variables: BTreeMap<String, String>,
    /// Auxiliary source files that affect the build: path -> content hash.
    pub files: BTreeMap<String, String>,
}

/// A single build's durable record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BuildRecord {
    pub name: String,
    #[serde(rename = "type")]
    pub build_type: String,
    pub status: BuildStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<InstanceRecord>,
    pub provisioners: Vec<StepRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub post_processors: Vec<StepRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<ArtifactRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// One provisioner or post-processor execution unit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepRecord {
    #[serde(rename = "type")]
    pub step_type: String,
    #[serde(default)]
    pub name: String,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

/// The engine-provisioned instance a build ran (or is running) on.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstanceRecord {
    pub id: String,
    pub builder_id: String,
    pub provider: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub region: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_key_path: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub keep_on_failure: bool,
}

/// An artifact produced by a completed build.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArtifactRecord {
    pub id: String,
    pub builder_id: String,
    #[serde(rename = "type", default)]
    pub artifact_type: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

/// Start and completion of the most recent session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunInfo {
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
    Pending,
    Creating,
    Provisioning,
    PostProcessing,
    Complete,
    Failed,
}

impl std::fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuildStatus::Pending => write!(f, "pending"),
            BuildStatus::Creating => write!(f, "creating"),
            BuildStatus::Provisioning => write!(f, "provisioning"),
            BuildStatus::PostProcessing => write!(f, "post_processing"),
            BuildStatus::Complete => write!(f, "complete"),
            BuildStatus::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Complete,
    Failed,
    Skipped,
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepStatus::Pending => write!(f, "pending"),
            StepStatus::Running => write!(f, "running"),
            StepStatus::Complete => write!(f, "complete"),
            StepStatus::Failed => write!(f, "failed"),
            StepStatus::Skipped => write!(f, "skipped"),
        }
    }
}

impl StateDocument {
    /// A fresh document for a state path that has no file yet.
    pub fn new(template_path: &str) -> Self {
        StateDocument {
            version: STATE_VERSION,
            serial: 1,
            lineage: uuid::Uuid::new_v4().to_string(),
            builder_version: env!("CARGO_PKG_VERSION").to_owned(),
            engine_version: String::new(),
            template: TemplateRecord {
                path: template_path.to_owned(),
                ..TemplateRecord::default()
            },
            builds: BTreeMap::new(),
            last_run: None,
        }
    }

    pub fn get_build(&self, name: &str) -> Option<&BuildRecord> {
        self.builds.get(name)
    }

    pub fn set_build(&mut self, name: &str, build: BuildRecord) {
        self.builds.insert(name.to_owned(), build);
    }

    /// Removes and returns the named build, `None` if absent.
    pub fn remove_build(&mut self, name: &str) -> Option<BuildRecord> {
        self.builds.remove(name)
    }

    /// Content hash over the template hash, variables, and file hashes.
    ///
    /// The mappings are `BTreeMap`, so iteration is already key-sorted and
    /// the result does not depend on insertion order. Each entry is tagged
    /// and NUL-separated so adjacent keys and values cannot alias.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(b"template:");
        hasher.update(self.template.hash.as_bytes());
        for (k, v) in &self.template.variables {
            hasher.update(b"\0var:");
            hasher.update(k.as_bytes());
            hasher.update(b"\0");
            hasher.update(v.as_bytes());
        }
        for (path, hash) in &self.template.files {
            hasher.update(b"\0file:");
            hasher.update(path.as_bytes());
            hasher.update(b"\0");
            hasher.update(hash.as_bytes());
        }
        format!("sha256:{:x}", hasher.finalize())
    }
}

impl BuildRecord {
    pub fn is_complete(&self) -> bool {
        self.status == BuildStatus::Complete
    }

    pub fn has_instance(&self) -> bool {
        self.instance.as_ref().is_some_and(|i| !i.id.is_empty())
    }

    pub fn step_complete(&self, index: usize) -> bool {
        self.provisioners
            .get(index)
            .is_some_and(|s| s.status == StepStatus::Complete)
    }

    /// Index of the first provisioner still needing work (`pending` or
    /// `failed`), or `provisioners.len()` if none.
    pub fn next_pending_step(&self) -> usize {
        self.provisioners
            .iter()
            .position(|s| matches!(s.status, StepStatus::Pending | StepStatus::Failed))
            .unwrap_or(self.provisioners.len())
    }
}
