use crate::error::ConsistencyError;
use crate::ids::{FormId, FormVersionId, UserId, WorkspaceId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormStatus {
    Draft,
    Published,
    Archived,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    ShortText,
    LongText,
    Email,
    Number,
    Date,
    MultipleChoice,
    Checkbox,
    Dropdown,
    Rating,
    YesNo,
    Phone,
    Url,
}

impl FieldKind {
    pub fn has_choices(self) -> bool {
        matches!(
            self,
            FieldKind::MultipleChoice | FieldKind::Checkbox | FieldKind::Dropdown
        )
    }

    pub fn is_text(self) -> bool {
        matches!(
            self,
            FieldKind::ShortText
                | FieldKind::LongText
                | FieldKind::Email
                | FieldKind::Date
                | FieldKind::Phone
                | FieldKind::Url
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    pub id: String,
    pub kind: FieldKind,
    pub title: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub choices: Vec<String>,
}

impl FieldDef {
    pub fn new(id: impl Into<String>, kind: FieldKind, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            title: title.into(),
            required: false,
            choices: Vec::new(),
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_choices<I, S>(mut self, choices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.choices = choices.into_iter().map(Into::into).collect();
        self
    }
}

/// Checks a field set before it is frozen into a version.
pub fn validate_fields(fields: &[FieldDef]) -> Result<(), ConsistencyError> {
    let mut seen = HashSet::new();
    for field in fields {
        if field.id.trim().is_empty() {
            return Err(ConsistencyError::InvalidFieldDefinition(
                "field id must not be empty".into(),
            ));
        }
        if !seen.insert(field.id.as_str()) {
            return Err(ConsistencyError::InvalidFieldDefinition(format!(
                "duplicate field id '{}'",
                field.id
            )));
        }
        if field.kind.has_choices() && field.choices.is_empty() {
            return Err(ConsistencyError::InvalidFieldDefinition(format!(
                "field '{}' needs at least one choice",
                field.id
            )));
        }
        if !field.kind.has_choices() && !field.choices.is_empty() {
            return Err(ConsistencyError::InvalidFieldDefinition(format!(
                "field '{}' does not take choices",
                field.id
            )));
        }
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Form {
    pub id: FormId,
    pub workspace_id: WorkspaceId,
    pub name: String,
    pub status: FormStatus,
    pub draft_version_id: Option<FormVersionId>,
    pub published_version_id: Option<FormVersionId>,
    pub created_by: UserId,
    pub created_at: u64,
    pub updated_at: u64,
}

/// Frozen form definition. Never updated once stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormVersion {
    pub id: FormVersionId,
    pub form_id: FormId,
    pub version_number: u32,
    pub fields: Vec<FieldDef>,
    pub created_by: UserId,
    pub created_at: u64,
}

impl FormVersion {
    pub fn field(&self, id: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|field| field.id == id)
    }
}
