use super::model::{Answer, Submission, SubmissionMeta};
use crate::error::{AuthError, ConsistencyError, FormVaultError, ResourceType};
use crate::forms::model::{FieldDef, FieldKind, Form, FormVersion};
use crate::ids::{FormId, SubmissionId, WorkspaceId};
use crate::storage::{Connection, now_micros};
use serde_json::Value;
use std::collections::HashSet;

/// Checks answers against the field set of one frozen version.
///
/// Order: duplicate answers, unknown fields, missing required fields, then
/// per-kind value checks.
pub fn validate_answers(version: &FormVersion, answers: &[Answer]) -> Result<(), ConsistencyError> {
    let mut seen = HashSet::new();
    for answer in answers {
        if !seen.insert(answer.field_id.as_str()) {
            return Err(ConsistencyError::DuplicateAnswer {
                field_id: answer.field_id.clone(),
            });
        }
    }
    for answer in answers {
        if version.field(&answer.field_id).is_none() {
            return Err(ConsistencyError::UnknownField {
                field_id: answer.field_id.clone(),
            });
        }
    }
    for field in version.fields.iter().filter(|field| field.required) {
        let present = answers
            .iter()
            .find(|answer| answer.field_id == field.id)
            .is_some_and(|answer| !is_blank(&answer.value));
        if !present {
            return Err(ConsistencyError::MissingRequiredField {
                field_id: field.id.clone(),
            });
        }
    }
    for answer in answers {
        if is_blank(&answer.value) {
            continue;
        }
        if let Some(field) = version.field(&answer.field_id) {
            check_value(field, &answer.value).map_err(|reason| {
                ConsistencyError::InvalidAnswer {
                    field_id: field.id.clone(),
                    reason,
                }
            })?;
        }
    }
    Ok(())
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(text) => text.trim().is_empty(),
        _ => false,
    }
}

fn check_value(field: &FieldDef, value: &Value) -> Result<(), String> {
    match field.kind {
        FieldKind::Email => match value.as_str() {
            Some(text) if text.contains('@') => Ok(()),
            Some(_) => Err("not an email address".into()),
            None => Err("expected a string".into()),
        },
        kind if kind.is_text() => value
            .as_str()
            .map(|_| ())
            .ok_or_else(|| "expected a string".into()),
        FieldKind::Number | FieldKind::Rating => value
            .as_f64()
            .map(|_| ())
            .ok_or_else(|| "expected a number".into()),
        FieldKind::YesNo => value
            .as_bool()
            .map(|_| ())
            .ok_or_else(|| "expected true or false".into()),
        FieldKind::MultipleChoice | FieldKind::Dropdown => match value.as_str() {
            Some(choice) if field.choices.iter().any(|c| c == choice) => Ok(()),
            Some(choice) => Err(format!("'{choice}' is not one of the choices")),
            None => Err("expected a choice".into()),
        },
        FieldKind::Checkbox => {
            let items = value
                .as_array()
                .ok_or_else(|| "expected a list of choices".to_string())?;
            for item in items {
                match item.as_str() {
                    Some(choice) if field.choices.iter().any(|c| c == choice) => {}
                    _ => return Err(format!("{item} is not one of the choices")),
                }
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Admits a submission on whatever connection the caller holds.
///
/// The published pointer is read once, here; the submission binds to that
/// version even if a newer one is published before commit. When
/// `caller_workspace` is present it must equal the form's workspace.
pub(crate) fn admit(
    conn: &mut Connection,
    form_id: FormId,
    answers: Vec<Answer>,
    meta: SubmissionMeta,
    caller_workspace: Option<WorkspaceId>,
) -> Result<Submission, FormVaultError> {
    let form = conn
        .get::<Form>(&form_id)?
        .ok_or_else(|| FormVaultError::not_found(ResourceType::Form, form_id))?;
    let version_id = form
        .published_version_id
        .ok_or(ConsistencyError::FormNotPublished { form_id })?;
    if let Some(workspace_id) = caller_workspace {
        if workspace_id != form.workspace_id {
            return Err(AuthError::ScopeDenied.into());
        }
    }
    let version = conn
        .get::<FormVersion>(&version_id)?
        .ok_or_else(|| FormVaultError::not_found(ResourceType::FormVersion, version_id))?;
    validate_answers(&version, &answers)?;

    let submission = Submission {
        id: SubmissionId::new(),
        workspace_id: form.workspace_id,
        form_id,
        form_version_id: version.id,
        answers,
        meta,
        created_at: now_micros(),
    };
    conn.insert(submission.clone())?;
    Ok(submission)
}
