use crate::forms::model::{Form, FormVersion};
use crate::ids::{FormId, FormVersionId, SubmissionId, UserId, WorkspaceId};
use crate::submissions::model::Submission;
use crate::workspaces::{Membership, Workspace};
use im::OrdMap;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TableName {
    Workspaces,
    Memberships,
    Forms,
    FormVersions,
    Submissions,
}

impl TableName {
    pub const ALL: [TableName; 5] = [
        TableName::Workspaces,
        TableName::Memberships,
        TableName::Forms,
        TableName::FormVersions,
        TableName::Submissions,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TableName::Workspaces => "workspaces",
            TableName::Memberships => "workspace_members",
            TableName::Forms => "forms",
            TableName::FormVersions => "form_versions",
            TableName::Submissions => "submissions",
        }
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutability {
    Mutable,
    /// No updates; deletes allowed.
    Immutable,
    /// No updates and no deletes.
    ImmutableRetained,
}

/// Column access used by the policy evaluator. Policies only compare
/// identifier columns, so that is all a row exposes.
pub trait RowView {
    fn column(&self, name: &str) -> Option<Uuid>;
}

pub trait TableRow: RowView + Clone + PartialEq + Into<Record> {
    type Key: Ord + Clone + fmt::Debug;
    const TABLE: TableName;
    const MUTABILITY: Mutability;

    fn key(&self) -> Self::Key;
    fn rows(tables: &Tables) -> &OrdMap<Self::Key, Self>;
    fn rows_mut(tables: &mut Tables) -> &mut OrdMap<Self::Key, Self>;
}

/// Committed or working table contents. Cloning is cheap: every map is a
/// persistent structure that shares nodes with its source.
#[derive(Debug, Clone, Default)]
pub struct Tables {
    pub(crate) workspaces: OrdMap<WorkspaceId, Workspace>,
    pub(crate) memberships: OrdMap<(WorkspaceId, UserId), Membership>,
    pub(crate) forms: OrdMap<FormId, Form>,
    pub(crate) form_versions: OrdMap<FormVersionId, FormVersion>,
    pub(crate) submissions: OrdMap<SubmissionId, Submission>,
}

impl Tables {
    /// Looks a row up by its single-column id. Membership rows have a
    /// composite key and are never a policy parent.
    pub(crate) fn row_view(&self, table: TableName, id: Uuid) -> Option<&dyn RowView> {
        match table {
            TableName::Workspaces => self
                .workspaces
                .get(&WorkspaceId::from_uuid(id))
                .map(|row| row as &dyn RowView),
            TableName::Forms => self
                .forms
                .get(&FormId::from_uuid(id))
                .map(|row| row as &dyn RowView),
            TableName::FormVersions => self
                .form_versions
                .get(&FormVersionId::from_uuid(id))
                .map(|row| row as &dyn RowView),
            TableName::Submissions => self
                .submissions
                .get(&SubmissionId::from_uuid(id))
                .map(|row| row as &dyn RowView),
            TableName::Memberships => None,
        }
    }

    pub(crate) fn is_member(&self, workspace_id: Uuid, user_id: Uuid) -> bool {
        self.memberships.contains_key(&(
            WorkspaceId::from_uuid(workspace_id),
            UserId::from_uuid(user_id),
        ))
    }

    pub fn row_count(&self, table: TableName) -> usize {
        match table {
            TableName::Workspaces => self.workspaces.len(),
            TableName::Memberships => self.memberships.len(),
            TableName::Forms => self.forms.len(),
            TableName::FormVersions => self.form_versions.len(),
            TableName::Submissions => self.submissions.len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Workspace(Workspace),
    Membership(Membership),
    Form(Form),
    FormVersion(FormVersion),
    Submission(Submission),
}

impl Record {
    pub fn table(&self) -> TableName {
        match self {
            Record::Workspace(_) => TableName::Workspaces,
            Record::Membership(_) => TableName::Memberships,
            Record::Form(_) => TableName::Forms,
            Record::FormVersion(_) => TableName::FormVersions,
            Record::Submission(_) => TableName::Submissions,
        }
    }
}

macro_rules! table_row {
    ($row:ty, $variant:ident, $key:ty, $table:expr, $mutability:expr, $field:ident, |$this:ident| $key_expr:expr) => {
        impl From<$row> for Record {
            fn from(row: $row) -> Self {
                Record::$variant(row)
            }
        }

        impl TableRow for $row {
            type Key = $key;
            const TABLE: TableName = $table;
            const MUTABILITY: Mutability = $mutability;

            fn key(&self) -> Self::Key {
                let $this = self;
                $key_expr
            }

            fn rows(tables: &Tables) -> &OrdMap<Self::Key, Self> {
                &tables.$field
            }

            fn rows_mut(tables: &mut Tables) -> &mut OrdMap<Self::Key, Self> {
                &mut tables.$field
            }
        }
    };
}

table_row!(
    Workspace,
    Workspace,
    WorkspaceId,
    TableName::Workspaces,
    Mutability::Mutable,
    workspaces,
    |row| row.id
);
table_row!(
    Membership,
    Membership,
    (WorkspaceId, UserId),
    TableName::Memberships,
    Mutability::Mutable,
    memberships,
    |row| (row.workspace_id, row.user_id)
);
table_row!(
    Form,
    Form,
    FormId,
    TableName::Forms,
    Mutability::Mutable,
    forms,
    |row| row.id
);
table_row!(
    FormVersion,
    FormVersion,
    FormVersionId,
    TableName::FormVersions,
    Mutability::ImmutableRetained,
    form_versions,
    |row| row.id
);
table_row!(
    Submission,
    Submission,
    SubmissionId,
    TableName::Submissions,
    Mutability::Immutable,
    submissions,
    |row| row.id
);

impl RowView for Workspace {
    fn column(&self, name: &str) -> Option<Uuid> {
        match name {
            "id" => Some(*self.id.as_uuid()),
            "created_by" => Some(*self.created_by.as_uuid()),
            _ => None,
        }
    }
}

impl RowView for Membership {
    fn column(&self, name: &str) -> Option<Uuid> {
        match name {
            "workspace_id" => Some(*self.workspace_id.as_uuid()),
            "user_id" => Some(*self.user_id.as_uuid()),
            _ => None,
        }
    }
}

impl RowView for Form {
    fn column(&self, name: &str) -> Option<Uuid> {
        match name {
            "id" => Some(*self.id.as_uuid()),
            "workspace_id" => Some(*self.workspace_id.as_uuid()),
            "draft_version_id" => self.draft_version_id.map(|id| *id.as_uuid()),
            "published_version_id" => self.published_version_id.map(|id| *id.as_uuid()),
            _ => None,
        }
    }
}

impl RowView for FormVersion {
    fn column(&self, name: &str) -> Option<Uuid> {
        match name {
            "id" => Some(*self.id.as_uuid()),
            "form_id" => Some(*self.form_id.as_uuid()),
            _ => None,
        }
    }
}

impl RowView for Submission {
    fn column(&self, name: &str) -> Option<Uuid> {
        match name {
            "id" => Some(*self.id.as_uuid()),
            "workspace_id" => Some(*self.workspace_id.as_uuid()),
            "form_id" => Some(*self.form_id.as_uuid()),
            "form_version_id" => Some(*self.form_version_id.as_uuid()),
            _ => None,
        }
    }
}
