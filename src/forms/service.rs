use super::model::{FieldDef, Form, FormStatus, FormVersion, validate_fields};
use crate::error::{ConsistencyError, FormVaultError, ResourceType};
use crate::ids::{FormId, FormVersionId};
use crate::permission::Role;
use crate::session::ScopedSession;
use crate::storage::now_micros;
use tracing::info;

fn validate_name(name: &str) -> Result<String, FormVaultError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(FormVaultError::Validation("form name must not be empty".into()));
    }
    Ok(name.to_string())
}

fn ensure_not_archived(form: &Form) -> Result<(), FormVaultError> {
    if form.status == FormStatus::Archived {
        return Err(ConsistencyError::FormArchived { form_id: form.id }.into());
    }
    Ok(())
}

pub fn get_form(session: &ScopedSession, form_id: FormId) -> Result<Form, FormVaultError> {
    session
        .connection()
        .get::<Form>(&form_id)?
        .ok_or_else(|| FormVaultError::not_found(ResourceType::Form, form_id))
}

pub fn list_forms(session: &ScopedSession) -> Result<Vec<Form>, FormVaultError> {
    let mut forms = session.connection().select_all::<Form>()?;
    forms.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
    Ok(forms)
}

pub fn get_version(
    session: &ScopedSession,
    version_id: FormVersionId,
) -> Result<FormVersion, FormVaultError> {
    session
        .connection()
        .get::<FormVersion>(&version_id)?
        .ok_or_else(|| FormVaultError::not_found(ResourceType::FormVersion, version_id))
}

/// Versions of a form in `version_number` order.
pub fn list_versions(
    session: &ScopedSession,
    form_id: FormId,
) -> Result<Vec<FormVersion>, FormVaultError> {
    let form = get_form(session, form_id)?;
    Ok(session.connection().versions_of(form.id)?)
}

/// Inserts a form together with its version 1 draft.
fn insert_form(
    session: &mut ScopedSession,
    name: String,
    fields: Vec<FieldDef>,
) -> Result<Form, FormVaultError> {
    let scope = session.scope().clone();
    let now = now_micros();
    let form = Form {
        id: FormId::new(),
        workspace_id: scope.workspace_id(),
        name,
        status: FormStatus::Draft,
        draft_version_id: None,
        published_version_id: None,
        created_by: scope.user_id(),
        created_at: now,
        updated_at: now,
    };
    let version = FormVersion {
        id: FormVersionId::new(),
        form_id: form.id,
        version_number: 1,
        fields,
        created_by: scope.user_id(),
        created_at: now,
    };
    let with_draft = Form {
        draft_version_id: Some(version.id),
        ..form.clone()
    };
    let conn = session.connection_mut();
    conn.insert(form.clone())?;
    conn.insert(version)?;
    conn.update(form, with_draft.clone())?;
    Ok(with_draft)
}

pub fn create_form(session: &mut ScopedSession, name: &str) -> Result<Form, FormVaultError> {
    session.scope().require_role(Role::Editor)?;
    let name = validate_name(name)?;
    let form = insert_form(session, name, Vec::new())?;
    info!(form_id = %form.id, workspace_id = %form.workspace_id, "form created");
    Ok(form)
}

pub fn rename_form(
    session: &mut ScopedSession,
    form_id: FormId,
    name: &str,
) -> Result<Form, FormVaultError> {
    session.scope().require_role(Role::Editor)?;
    let name = validate_name(name)?;
    let current = get_form(session, form_id)?;
    let renamed = Form {
        name,
        updated_at: now_micros(),
        ..current.clone()
    };
    session.connection_mut().update(current, renamed.clone())?;
    Ok(renamed)
}

/// Freezes `fields` into a new version and points the draft at it. Existing
/// versions, including the published one, are never touched.
pub fn create_version(
    session: &mut ScopedSession,
    form_id: FormId,
    fields: Vec<FieldDef>,
) -> Result<FormVersion, FormVaultError> {
    session.scope().require_role(Role::Editor)?;
    let form = get_form(session, form_id)?;
    ensure_not_archived(&form)?;
    validate_fields(&fields)?;

    let next_number = session
        .connection()
        .versions_of(form_id)?
        .last()
        .map_or(1, |latest| latest.version_number + 1);
    let now = now_micros();
    let version = FormVersion {
        id: FormVersionId::new(),
        form_id,
        version_number: next_number,
        fields,
        created_by: session.scope().user_id(),
        created_at: now,
    };
    let repointed = Form {
        draft_version_id: Some(version.id),
        updated_at: now,
        ..form.clone()
    };
    let conn = session.connection_mut();
    conn.insert(version.clone())?;
    conn.update(form, repointed)?;
    Ok(version)
}

/// Points `published_version_id` at the current draft with a single
/// compare-and-swap statement.
pub fn publish(session: &mut ScopedSession, form_id: FormId) -> Result<Form, FormVaultError> {
    session.scope().require_role(Role::Editor)?;
    let form = get_form(session, form_id)?;
    ensure_not_archived(&form)?;
    let draft_id = form
        .draft_version_id
        .ok_or(ConsistencyError::NoDraft { form_id })?;
    let draft = get_version(session, draft_id)?;
    if draft.fields.is_empty() {
        return Err(ConsistencyError::EmptyDraft { form_id }.into());
    }
    session
        .connection_mut()
        .publish_draft(form_id, draft_id, now_micros())?;
    let published = get_form(session, form_id)?;
    info!(
        form_id = %form_id,
        version_id = %draft_id,
        version_number = draft.version_number,
        "form published"
    );
    Ok(published)
}

/// Clears the published pointer. Versions and submissions are retained.
pub fn unpublish(session: &mut ScopedSession, form_id: FormId) -> Result<Form, FormVaultError> {
    session.scope().require_role(Role::Editor)?;
    let current = get_form(session, form_id)?;
    ensure_not_archived(&current)?;
    if current.published_version_id.is_none() {
        return Err(ConsistencyError::FormNotPublished { form_id }.into());
    }
    let unpublished = Form {
        status: FormStatus::Draft,
        published_version_id: None,
        updated_at: now_micros(),
        ..current.clone()
    };
    session
        .connection_mut()
        .update(current, unpublished.clone())?;
    Ok(unpublished)
}

pub fn archive(session: &mut ScopedSession, form_id: FormId) -> Result<Form, FormVaultError> {
    session.scope().require_role(Role::Admin)?;
    let current = get_form(session, form_id)?;
    ensure_not_archived(&current)?;
    let archived = Form {
        status: FormStatus::Archived,
        published_version_id: None,
        updated_at: now_micros(),
        ..current.clone()
    };
    session.connection_mut().update(current, archived.clone())?;
    info!(form_id = %form_id, "form archived");
    Ok(archived)
}

/// New form in the same workspace whose version 1 copies the source draft.
pub fn duplicate_form(
    session: &mut ScopedSession,
    form_id: FormId,
    new_name: &str,
) -> Result<Form, FormVaultError> {
    session.scope().require_role(Role::Editor)?;
    let name = validate_name(new_name)?;
    let source = get_form(session, form_id)?;
    let fields = match source.draft_version_id {
        Some(draft_id) => get_version(session, draft_id)?.fields,
        None => Vec::new(),
    };
    insert_form(session, name, fields)
}
