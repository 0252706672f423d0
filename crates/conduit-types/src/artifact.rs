use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactOwner {
    pub run_id: String,
    pub step_id: String,
    pub tool_name: String,
}

/// Content-addressed by SHA-256 of its bytes. Creation is idempotent: submitting the same
/// bytes again returns the existing id rather than creating a duplicate record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub mime_type: String,
    pub file_name: String,
    pub size: u64,
    pub storage_path: String,
    pub created_by: ArtifactOwner,
    pub metadata: Option<Value>,
    #[serde(default)]
    pub parent_artifacts: Vec<String>,
}
