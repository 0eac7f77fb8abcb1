use super::admission::admit;
use super::model::{Answer, Submission, SubmissionMeta, SubmissionSource};
use crate::error::{FormVaultError, ResourceType};
use crate::forms::service::{get_form, get_version};
use crate::ids::{FormId, FormVersionId, SubmissionId};
use crate::permission::Role;
use crate::session::{ScopedSession, ServiceSession};
use tracing::info;

/// Authenticated submission inside the caller's workspace.
pub fn accept(
    session: &mut ScopedSession,
    form_id: FormId,
    answers: Vec<Answer>,
    meta: SubmissionMeta,
) -> Result<Submission, FormVaultError> {
    let workspace_id = session.scope().workspace_id();
    let meta = SubmissionMeta {
        source: SubmissionSource::Authenticated,
        ..meta
    };
    let submission = admit(
        session.connection_mut(),
        form_id,
        answers,
        meta,
        Some(workspace_id),
    )?;
    info!(
        submission_id = %submission.id,
        form_id = %form_id,
        version_id = %submission.form_version_id,
        "submission accepted"
    );
    Ok(submission)
}

/// Anonymous submission on the service session. The published-version check
/// and answer validation in [`admit`] are the whole authorization here.
pub fn accept_public(
    session: &mut ServiceSession,
    form_id: FormId,
    answers: Vec<Answer>,
    meta: SubmissionMeta,
) -> Result<Submission, FormVaultError> {
    let meta = SubmissionMeta {
        source: SubmissionSource::Public,
        ..meta
    };
    let submission = admit(session.connection_mut(), form_id, answers, meta, None)?;
    info!(
        submission_id = %submission.id,
        form_id = %form_id,
        workspace_id = %submission.workspace_id,
        version_id = %submission.form_version_id,
        "public submission accepted"
    );
    Ok(submission)
}

pub fn get_submission(
    session: &ScopedSession,
    submission_id: SubmissionId,
) -> Result<Submission, FormVaultError> {
    session
        .connection()
        .get::<Submission>(&submission_id)?
        .ok_or_else(|| FormVaultError::not_found(ResourceType::Submission, submission_id))
}

fn newest_first(mut submissions: Vec<Submission>) -> Vec<Submission> {
    submissions.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
    submissions
}

pub fn list_for_form(
    session: &ScopedSession,
    form_id: FormId,
) -> Result<Vec<Submission>, FormVaultError> {
    let form = get_form(session, form_id)?;
    let rows = session
        .connection()
        .select::<Submission>(|s| s.form_id == form.id)?;
    Ok(newest_first(rows))
}

pub fn list_for_version(
    session: &ScopedSession,
    version_id: FormVersionId,
) -> Result<Vec<Submission>, FormVaultError> {
    let version = get_version(session, version_id)?;
    let rows = session
        .connection()
        .select::<Submission>(|s| s.form_version_id == version.id)?;
    Ok(newest_first(rows))
}

pub fn list_for_workspace(session: &ScopedSession) -> Result<Vec<Submission>, FormVaultError> {
    let rows = session.connection().select_all::<Submission>()?;
    Ok(newest_first(rows))
}

pub fn delete_submission(
    session: &mut ScopedSession,
    submission_id: SubmissionId,
) -> Result<(), FormVaultError> {
    session.scope().require_role(Role::Admin)?;
    let submission = get_submission(session, submission_id)?;
    session.connection_mut().delete(submission)?;
    info!(submission_id = %submission_id, "submission deleted");
    Ok(())
}
