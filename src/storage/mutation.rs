use super::connection::ConnectionRole;
use super::policy::{PolicySet, SETTING_USER_ID};
use super::schema::{Mutability, Record, RowView, TableName, TableRow, Tables};
use super::settings::SessionSettings;
use crate::error::StorageError;
use crate::forms::model::{Form, FormStatus};
use crate::ids::{FormId, FormVersionId};
use crate::permission::Role;
use crate::workspaces::{Membership, Workspace};
use tracing::{error, warn};

/// One logged statement. Statements are applied to the transaction's working
/// copy when issued and re-applied, with every check repeated, at commit.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    Insert(Record),
    /// Optimistic update: fails with `Conflict` unless the stored row still
    /// equals `before`.
    Update { before: Record, after: Record },
    Delete(Record),
    /// Compare-and-swap of the published pointer onto `expected_draft`.
    PublishDraft {
        form_id: FormId,
        expected_draft: FormVersionId,
        at: u64,
    },
    /// The one statement allowed without a workspace binding: creates a
    /// workspace together with the bound user's owner membership.
    BootstrapWorkspace {
        workspace: Workspace,
        owner: Membership,
    },
}

/// When a statement is being applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Stage {
    /// Issued against the transaction's working copy.
    Statement,
    /// Replayed on the latest committed state.
    Commit,
}

/// Who is executing a statement, and at which stage.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Access<'a> {
    pub role: ConnectionRole,
    pub settings: &'a SessionSettings,
    pub policies: &'a PolicySet,
    pub stage: Stage,
}

impl Access<'_> {
    fn bypasses_policies(&self) -> bool {
        self.role == ConnectionRole::Service
    }

    pub fn ensure_bound(&self, table: TableName) -> Result<(), StorageError> {
        if self.bypasses_policies() {
            return Ok(());
        }
        let Some(policy) = self.policies.get(table) else {
            return Ok(());
        };
        for setting in policy.requires {
            if self.settings.get(setting).is_none() {
                error!(
                    table = %table,
                    setting = *setting,
                    "protected table accessed without a bound scope"
                );
                return Err(StorageError::ScopeNotBound { table });
            }
        }
        Ok(())
    }

    pub fn can_see(&self, tables: &Tables, table: TableName, row: &dyn RowView) -> bool {
        if self.bypasses_policies() {
            return true;
        }
        match self.policies.get(table) {
            Some(policy) => self.policies.eval(&policy.using, tables, self.settings, row),
            None => false,
        }
    }

    pub fn check_new_row(
        &self,
        tables: &Tables,
        table: TableName,
        row: &dyn RowView,
    ) -> Result<(), StorageError> {
        if self.bypasses_policies() {
            return Ok(());
        }
        let allowed = match self.policies.get(table) {
            Some(policy) => self
                .policies
                .eval(policy.check_expr(), tables, self.settings, row),
            None => false,
        };
        if allowed {
            Ok(())
        } else {
            warn!(table = %table, "row rejected by row-level policy");
            Err(StorageError::PolicyViolation { table })
        }
    }
}

pub(crate) fn apply_mutation(
    tables: &mut Tables,
    mutation: &Mutation,
    access: Access<'_>,
) -> Result<(), StorageError> {
    match mutation {
        Mutation::Insert(record) => match record {
            Record::Workspace(row) => insert_row(tables, row.clone(), access),
            Record::Membership(row) => insert_row(tables, row.clone(), access),
            Record::Form(row) => {
                guard_published_pointer(None, row)?;
                insert_row(tables, row.clone(), access)
            }
            Record::FormVersion(row) => insert_row(tables, row.clone(), access),
            Record::Submission(row) => insert_row(tables, row.clone(), access),
        },
        Mutation::Update { before, after } => match (before, after) {
            (Record::Workspace(b), Record::Workspace(a)) => {
                update_row(tables, b, a.clone(), access)
            }
            (Record::Membership(b), Record::Membership(a)) => {
                update_row(tables, b, a.clone(), access)
            }
            (Record::Form(b), Record::Form(a)) => {
                guard_published_pointer(b.published_version_id, a)?;
                update_row(tables, b, a.clone(), access)
            }
            (Record::FormVersion(b), Record::FormVersion(a)) => {
                update_row(tables, b, a.clone(), access)
            }
            (Record::Submission(b), Record::Submission(a)) => {
                update_row(tables, b, a.clone(), access)
            }
            _ => Err(StorageError::Conflict(format!(
                "update images span tables {} and {}",
                before.table(),
                after.table()
            ))),
        },
        Mutation::Delete(record) => match record {
            Record::Workspace(row) => delete_row(tables, row, access),
            Record::Membership(row) => delete_row(tables, row, access),
            Record::Form(row) => delete_row(tables, row, access),
            Record::FormVersion(row) => delete_row(tables, row, access),
            Record::Submission(row) => delete_row(tables, row, access),
        },
        Mutation::PublishDraft {
            form_id,
            expected_draft,
            at,
        } => publish_draft(tables, *form_id, *expected_draft, *at, access),
        Mutation::BootstrapWorkspace { workspace, owner } => {
            bootstrap_workspace(tables, workspace, owner, access)
        }
    }
}

/// `published_version_id` is only ever pointed at a version by
/// `PublishDraft`; plain inserts and updates may keep or clear it.
fn guard_published_pointer(
    before: Option<FormVersionId>,
    after: &Form,
) -> Result<(), StorageError> {
    match after.published_version_id {
        Some(target) if before != Some(target) => {
            warn!(form_id = %after.id, version_id = %target, "published pointer moved outside publish");
            Err(StorageError::Conflict(format!(
                "published version of form {} can only change through publish",
                after.id
            )))
        }
        _ => Ok(()),
    }
}

fn key_label<T: TableRow>(key: &T::Key) -> String {
    format!("{key:?}")
}

fn insert_row<T: TableRow>(tables: &mut Tables, row: T, access: Access<'_>) -> Result<(), StorageError> {
    access.ensure_bound(T::TABLE)?;
    let key = row.key();
    if T::rows(tables).contains_key(&key) {
        return Err(StorageError::DuplicateKey {
            table: T::TABLE,
            key: key_label::<T>(&key),
        });
    }
    access.check_new_row(tables, T::TABLE, &row)?;
    check_references(tables, &row.clone().into(), access.stage)?;
    T::rows_mut(tables).insert(key, row);
    Ok(())
}

fn visible_row<'t, T: TableRow>(
    tables: &'t Tables,
    key: &T::Key,
    access: Access<'_>,
) -> Result<&'t T, StorageError> {
    T::rows(tables)
        .get(key)
        .filter(|row| access.can_see(tables, T::TABLE, *row))
        .ok_or_else(|| StorageError::RowNotFound {
            table: T::TABLE,
            key: key_label::<T>(key),
        })
}

fn update_row<T: TableRow>(
    tables: &mut Tables,
    before: &T,
    after: T,
    access: Access<'_>,
) -> Result<(), StorageError> {
    access.ensure_bound(T::TABLE)?;
    let key = before.key();
    if T::MUTABILITY != Mutability::Mutable {
        return Err(StorageError::ImmutableRow {
            table: T::TABLE,
            key: key_label::<T>(&key),
        });
    }
    if after.key() != key {
        return Err(StorageError::Conflict(format!(
            "primary key of {} row cannot change",
            T::TABLE
        )));
    }
    let current = visible_row::<T>(tables, &key, access)?;
    if current != before {
        return Err(StorageError::Conflict(format!(
            "{} row {} changed concurrently",
            T::TABLE,
            key_label::<T>(&key)
        )));
    }
    access.check_new_row(tables, T::TABLE, &after)?;
    check_references(tables, &after.clone().into(), access.stage)?;
    T::rows_mut(tables).insert(key, after);
    Ok(())
}

fn delete_row<T: TableRow>(tables: &mut Tables, row: &T, access: Access<'_>) -> Result<(), StorageError> {
    access.ensure_bound(T::TABLE)?;
    let key = row.key();
    if T::MUTABILITY == Mutability::ImmutableRetained {
        return Err(StorageError::ImmutableRow {
            table: T::TABLE,
            key: key_label::<T>(&key),
        });
    }
    let current = visible_row::<T>(tables, &key, access)?;
    if current != row {
        return Err(StorageError::Conflict(format!(
            "{} row {} changed concurrently",
            T::TABLE,
            key_label::<T>(&key)
        )));
    }
    T::rows_mut(tables).remove(&key);
    Ok(())
}

fn publish_draft(
    tables: &mut Tables,
    form_id: FormId,
    expected_draft: FormVersionId,
    at: u64,
    access: Access<'_>,
) -> Result<(), StorageError> {
    access.ensure_bound(TableName::Forms)?;
    let form = visible_row::<Form>(tables, &form_id, access)?.clone();
    if form.status == FormStatus::Archived {
        return Err(StorageError::Conflict(format!("form {form_id} is archived")));
    }
    if form.draft_version_id != Some(expected_draft) {
        return Err(StorageError::Conflict(format!(
            "draft of form {form_id} moved before publish"
        )));
    }
    let version = tables
        .form_versions
        .get(&expected_draft)
        .filter(|version| version.form_id == form_id)
        .ok_or_else(|| StorageError::InvalidReference {
            table: TableName::Forms,
            detail: format!("draft version {expected_draft} does not belong to form {form_id}"),
        })?;
    if version.fields.is_empty() {
        return Err(StorageError::Conflict(format!(
            "draft version {expected_draft} has no fields"
        )));
    }
    let published = Form {
        published_version_id: Some(expected_draft),
        status: FormStatus::Published,
        updated_at: at,
        ..form
    };
    access.check_new_row(tables, TableName::Forms, &published)?;
    tables.forms.insert(form_id, published);
    Ok(())
}

fn bootstrap_workspace(
    tables: &mut Tables,
    workspace: &Workspace,
    owner: &Membership,
    access: Access<'_>,
) -> Result<(), StorageError> {
    access.ensure_bound(TableName::Workspaces)?;
    if !access.bypasses_policies() {
        let bound_user = access.settings.get(SETTING_USER_ID);
        if bound_user != Some(*owner.user_id.as_uuid())
            || owner.workspace_id != workspace.id
            || owner.role != Role::Owner
        {
            warn!(workspace_id = %workspace.id, "workspace bootstrap rejected");
            return Err(StorageError::PolicyViolation {
                table: TableName::Memberships,
            });
        }
    }
    if tables.workspaces.contains_key(&workspace.id) {
        return Err(StorageError::DuplicateKey {
            table: TableName::Workspaces,
            key: workspace.id.to_string(),
        });
    }
    let member_key = (owner.workspace_id, owner.user_id);
    if tables.memberships.contains_key(&member_key) {
        return Err(StorageError::DuplicateKey {
            table: TableName::Memberships,
            key: format!("{member_key:?}"),
        });
    }
    tables.workspaces.insert(workspace.id, workspace.clone());
    tables.memberships.insert(member_key, owner.clone());
    Ok(())
}

/// Referential checks. Like foreign keys they read raw rows, not the
/// policy-filtered view, so they only run once the row passed its policy.
///
/// A submission must name the form's published version when it is issued.
/// At commit it only has to name a version of the form, so a publish that
/// committed in between does not fail it.
fn check_references(tables: &Tables, record: &Record, stage: Stage) -> Result<(), StorageError> {
    let invalid = |table: TableName, detail: String| StorageError::InvalidReference { table, detail };
    match record {
        Record::Workspace(_) => Ok(()),
        Record::Membership(row) => {
            if tables.workspaces.contains_key(&row.workspace_id) {
                Ok(())
            } else {
                Err(invalid(
                    TableName::Memberships,
                    format!("workspace {} does not exist", row.workspace_id),
                ))
            }
        }
        Record::Form(row) => {
            if !tables.workspaces.contains_key(&row.workspace_id) {
                return Err(invalid(
                    TableName::Forms,
                    format!("workspace {} does not exist", row.workspace_id),
                ));
            }
            for pointer in [row.draft_version_id, row.published_version_id]
                .into_iter()
                .flatten()
            {
                let owned = tables
                    .form_versions
                    .get(&pointer)
                    .is_some_and(|version| version.form_id == row.id);
                if !owned {
                    return Err(invalid(
                        TableName::Forms,
                        format!("version {pointer} does not belong to form {}", row.id),
                    ));
                }
            }
            Ok(())
        }
        Record::FormVersion(row) => {
            if tables.forms.contains_key(&row.form_id) {
                Ok(())
            } else {
                Err(invalid(
                    TableName::FormVersions,
                    format!("form {} does not exist", row.form_id),
                ))
            }
        }
        Record::Submission(row) => {
            let form = tables.forms.get(&row.form_id).ok_or_else(|| {
                invalid(
                    TableName::Submissions,
                    format!("form {} does not exist", row.form_id),
                )
            })?;
            if form.workspace_id != row.workspace_id {
                return Err(invalid(
                    TableName::Submissions,
                    format!("workspace does not match form {}", row.form_id),
                ));
            }
            let version_ok = tables
                .form_versions
                .get(&row.form_version_id)
                .is_some_and(|version| version.form_id == row.form_id);
            if !version_ok {
                return Err(invalid(
                    TableName::Submissions,
                    format!(
                        "version {} does not belong to form {}",
                        row.form_version_id, row.form_id
                    ),
                ));
            }
            let published = form.published_version_id == Some(row.form_version_id);
            if stage == Stage::Statement && !published {
                return Err(invalid(
                    TableName::Submissions,
                    format!(
                        "version {} is not the published version of form {}",
                        row.form_version_id, row.form_id
                    ),
                ));
            }
            Ok(())
        }
    }
}
