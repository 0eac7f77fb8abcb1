use crate::ids::{FormId, FormVersionId, SubmissionId, WorkspaceId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub field_id: String,
    pub value: serde_json::Value,
}

impl Answer {
    pub fn new(field_id: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            field_id: field_id.into(),
            value,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionSource {
    #[default]
    Public,
    Authenticated,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SubmissionMeta {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    #[serde(default)]
    pub source: SubmissionSource,
}

/// An accepted submission. `workspace_id` and `form_version_id` are copied
/// from the form when the submission is admitted and never change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub id: SubmissionId,
    pub workspace_id: WorkspaceId,
    pub form_id: FormId,
    pub form_version_id: FormVersionId,
    pub answers: Vec<Answer>,
    pub meta: SubmissionMeta,
    pub created_at: u64,
}

impl Submission {
    pub fn answer(&self, field_id: &str) -> Option<&serde_json::Value> {
        self.answers
            .iter()
            .find(|answer| answer.field_id == field_id)
            .map(|answer| &answer.value)
    }
}
