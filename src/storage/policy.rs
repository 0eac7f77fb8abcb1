use super::schema::{RowView, TableName, Tables};
use super::settings::SessionSettings;
use std::collections::BTreeMap;
use std::fmt;

pub const SETTING_USER_ID: &str = "app.user_id";
pub const SETTING_WORKSPACE_ID: &str = "app.workspace_id";

/// Row predicate evaluated by the engine. Every comparison reads trusted
/// session settings; nothing a statement supplies can appear here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyExpr {
    /// `row.column = current_setting(setting)`; false when the setting is unset.
    ColumnEqSetting {
        column: &'static str,
        setting: &'static str,
    },
    /// A membership row exists for `(row.column, app.user_id)`.
    MemberOf { column: &'static str },
    /// The row referenced by `row.column` in `table` passes that table's
    /// read policy.
    ParentVisible {
        column: &'static str,
        table: TableName,
    },
    And(Vec<PolicyExpr>),
    Or(Vec<PolicyExpr>),
}

impl PolicyExpr {
    pub fn eq_setting(column: &'static str, setting: &'static str) -> Self {
        PolicyExpr::ColumnEqSetting { column, setting }
    }

    pub fn member_of(column: &'static str) -> Self {
        PolicyExpr::MemberOf { column }
    }
}

impl fmt::Display for PolicyExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyExpr::ColumnEqSetting { column, setting } => {
                write!(f, "{column} = current_setting('{setting}')")
            }
            PolicyExpr::MemberOf { column } => write!(
                f,
                "EXISTS(workspace_members WHERE workspace_id = {column} AND user_id = current_setting('{SETTING_USER_ID}'))"
            ),
            PolicyExpr::ParentVisible { column, table } => {
                write!(f, "VISIBLE({table} WHERE id = {column})")
            }
            PolicyExpr::And(parts) => write_joined(f, parts, " AND "),
            PolicyExpr::Or(parts) => write_joined(f, parts, " OR "),
        }
    }
}

fn write_joined(f: &mut fmt::Formatter<'_>, parts: &[PolicyExpr], sep: &str) -> fmt::Result {
    f.write_str("(")?;
    for (idx, part) in parts.iter().enumerate() {
        if idx > 0 {
            f.write_str(sep)?;
        }
        write!(f, "{part}")?;
    }
    f.write_str(")")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TablePolicy {
    pub name: &'static str,
    /// Settings that must be bound before the table may be touched at all.
    pub requires: &'static [&'static str],
    /// Read filter, also applied to the existing row of an update or delete.
    pub using: PolicyExpr,
    /// Check on new row images. Falls back to `using` when absent.
    pub with_check: Option<PolicyExpr>,
}

impl TablePolicy {
    pub fn check_expr(&self) -> &PolicyExpr {
        self.with_check.as_ref().unwrap_or(&self.using)
    }
}

/// Row-level policies installed on the engine. A table without a policy is
/// deny-all for authenticated connections.
#[derive(Debug, Clone, Default)]
pub struct PolicySet {
    policies: BTreeMap<TableName, TablePolicy>,
}

impl PolicySet {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn standard() -> Self {
        let both = &[SETTING_USER_ID, SETTING_WORKSPACE_ID];
        let tenant_scoped = PolicyExpr::And(vec![
            PolicyExpr::eq_setting("workspace_id", SETTING_WORKSPACE_ID),
            PolicyExpr::member_of("workspace_id"),
        ]);

        let mut set = Self::empty();
        set.install(
            TableName::Workspaces,
            TablePolicy {
                name: "workspace_member_access",
                requires: &[SETTING_USER_ID],
                using: PolicyExpr::member_of("id"),
                with_check: Some(PolicyExpr::And(vec![
                    PolicyExpr::eq_setting("id", SETTING_WORKSPACE_ID),
                    PolicyExpr::member_of("id"),
                ])),
            },
        );
        set.install(
            TableName::Memberships,
            TablePolicy {
                name: "membership_access",
                requires: &[SETTING_USER_ID],
                using: PolicyExpr::Or(vec![
                    PolicyExpr::eq_setting("user_id", SETTING_USER_ID),
                    tenant_scoped.clone(),
                ]),
                with_check: Some(tenant_scoped.clone()),
            },
        );
        set.install(
            TableName::Forms,
            TablePolicy {
                name: "form_workspace_isolation",
                requires: both,
                using: tenant_scoped.clone(),
                with_check: None,
            },
        );
        set.install(
            TableName::FormVersions,
            TablePolicy {
                name: "form_version_via_form",
                requires: both,
                using: PolicyExpr::ParentVisible {
                    column: "form_id",
                    table: TableName::Forms,
                },
                with_check: None,
            },
        );
        set.install(
            TableName::Submissions,
            TablePolicy {
                name: "submission_workspace_isolation",
                requires: both,
                using: tenant_scoped,
                with_check: None,
            },
        );
        set
    }

    pub fn install(&mut self, table: TableName, policy: TablePolicy) {
        self.policies.insert(table, policy);
    }

    pub fn get(&self, table: TableName) -> Option<&TablePolicy> {
        self.policies.get(&table)
    }

    pub fn iter(&self) -> impl Iterator<Item = (TableName, &TablePolicy)> {
        self.policies.iter().map(|(table, policy)| (*table, policy))
    }

    /// Evaluates `expr` for `row`. Unbound settings and missing columns
    /// evaluate to false.
    pub(crate) fn eval(
        &self,
        expr: &PolicyExpr,
        tables: &Tables,
        settings: &SessionSettings,
        row: &dyn RowView,
    ) -> bool {
        match expr {
            PolicyExpr::ColumnEqSetting { column, setting } => {
                match (row.column(column), settings.get(setting)) {
                    (Some(value), Some(bound)) => value == bound,
                    _ => false,
                }
            }
            PolicyExpr::MemberOf { column } => {
                match (row.column(column), settings.get(SETTING_USER_ID)) {
                    (Some(workspace), Some(user)) => tables.is_member(workspace, user),
                    _ => false,
                }
            }
            PolicyExpr::ParentVisible { column, table } => {
                let Some(parent_id) = row.column(column) else {
                    return false;
                };
                let (Some(parent), Some(policy)) =
                    (tables.row_view(*table, parent_id), self.get(*table))
                else {
                    return false;
                };
                self.eval(&policy.using, tables, settings, parent)
            }
            PolicyExpr::And(parts) => parts
                .iter()
                .all(|part| self.eval(part, tables, settings, row)),
            PolicyExpr::Or(parts) => parts
                .iter()
                .any(|part| self.eval(part, tables, settings, row)),
        }
    }
}
