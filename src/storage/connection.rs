use super::engine::Engine;
use super::mutation::{Access, Mutation, Stage, apply_mutation};
use super::schema::{TableRow, Tables};
use super::settings::SessionSettings;
use crate::error::StorageError;
use crate::forms::model::FormVersion;
use crate::ids::{FormId, FormVersionId};
use crate::workspaces::{Membership, Workspace};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionRole {
    /// Subject to every row-level policy.
    Authenticated,
    /// Bypasses row-level policies. Key, reference and mutability rules
    /// still apply.
    Service,
}

#[derive(Debug)]
struct Transaction {
    working: Tables,
    log: Vec<Mutation>,
}

/// One engine connection. Owned exclusively by whoever borrowed it from the
/// pool.
#[derive(Debug)]
pub struct Connection {
    id: u64,
    role: ConnectionRole,
    settings: SessionSettings,
    tx: Option<Transaction>,
    engine: Arc<Engine>,
}

impl Connection {
    pub(crate) fn new(id: u64, role: ConnectionRole, engine: Arc<Engine>) -> Self {
        Self {
            id,
            role,
            settings: SessionSettings::default(),
            tx: None,
            engine,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn role(&self) -> ConnectionRole {
        self.role
    }

    /// Trusted setting control channel. Never reachable from statements.
    pub(crate) fn set_config(&mut self, name: &str, value: &str) -> Result<(), StorageError> {
        self.settings.set(name, value)
    }

    pub fn current_setting(&self, name: &str) -> Option<Uuid> {
        self.settings.get(name)
    }

    pub(crate) fn is_clean(&self) -> bool {
        self.tx.is_none() && self.settings.is_empty()
    }

    pub(crate) fn reset(&mut self) {
        self.tx = None;
        self.settings.clear();
    }

    pub(crate) fn begin(&mut self) {
        if self.tx.is_none() {
            self.tx = Some(Transaction {
                working: self.engine.snapshot(),
                log: Vec::new(),
            });
        }
    }

    pub(crate) fn commit(&mut self) -> Result<u64, StorageError> {
        let tx = self.tx.take().ok_or(StorageError::NoTransaction)?;
        let access = Access {
            role: self.role,
            settings: &self.settings,
            policies: self.engine.policies(),
            stage: Stage::Commit,
        };
        self.engine.commit(&tx.log, access)
    }

    pub(crate) fn rollback(&mut self) {
        self.tx = None;
    }

    fn read_view(&self) -> Result<(&Tables, Access<'_>), StorageError> {
        let tx = self.tx.as_ref().ok_or(StorageError::NoTransaction)?;
        let access = Access {
            role: self.role,
            settings: &self.settings,
            policies: self.engine.policies(),
            stage: Stage::Statement,
        };
        Ok((&tx.working, access))
    }

    /// Rows of `T` visible to this connection that satisfy `filter`.
    pub fn select<T: TableRow>(
        &self,
        filter: impl Fn(&T) -> bool,
    ) -> Result<Vec<T>, StorageError> {
        let (tables, access) = self.read_view()?;
        access.ensure_bound(T::TABLE)?;
        Ok(T::rows(tables)
            .values()
            .filter(|row| access.can_see(tables, T::TABLE, *row) && filter(row))
            .cloned()
            .collect())
    }

    pub fn select_all<T: TableRow>(&self) -> Result<Vec<T>, StorageError> {
        self.select::<T>(|_| true)
    }

    /// Invisible rows and missing rows are both `None`.
    pub fn get<T: TableRow>(&self, key: &T::Key) -> Result<Option<T>, StorageError> {
        let (tables, access) = self.read_view()?;
        access.ensure_bound(T::TABLE)?;
        Ok(T::rows(tables)
            .get(key)
            .filter(|row| access.can_see(tables, T::TABLE, *row))
            .cloned())
    }

    pub fn insert<T: TableRow>(&mut self, row: T) -> Result<(), StorageError> {
        self.execute(Mutation::Insert(row.into()))
    }

    pub fn update<T: TableRow>(&mut self, before: T, after: T) -> Result<(), StorageError> {
        self.execute(Mutation::Update {
            before: before.into(),
            after: after.into(),
        })
    }

    pub fn delete<T: TableRow>(&mut self, row: T) -> Result<(), StorageError> {
        self.execute(Mutation::Delete(row.into()))
    }

    pub fn publish_draft(
        &mut self,
        form_id: FormId,
        expected_draft: FormVersionId,
        at: u64,
    ) -> Result<(), StorageError> {
        self.execute(Mutation::PublishDraft {
            form_id,
            expected_draft,
            at,
        })
    }

    pub(crate) fn bootstrap_workspace(
        &mut self,
        workspace: Workspace,
        owner: Membership,
    ) -> Result<(), StorageError> {
        self.execute(Mutation::BootstrapWorkspace { workspace, owner })
    }

    /// Applies to the working copy and logs for commit. A failed statement
    /// leaves the working copy untouched.
    fn execute(&mut self, mutation: Mutation) -> Result<(), StorageError> {
        let tx = self.tx.as_mut().ok_or(StorageError::NoTransaction)?;
        let access = Access {
            role: self.role,
            settings: &self.settings,
            policies: self.engine.policies(),
            stage: Stage::Statement,
        };
        let mut working = tx.working.clone();
        apply_mutation(&mut working, &mutation, access)?;
        tx.working = working;
        tx.log.push(mutation);
        Ok(())
    }

    pub(crate) fn versions_of(&self, form_id: FormId) -> Result<Vec<FormVersion>, StorageError> {
        let mut versions = self.select::<FormVersion>(|version| version.form_id == form_id)?;
        versions.sort_by_key(|version| version.version_number);
        Ok(versions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forms::model::{FieldDef, FieldKind, Form, FormStatus};
    use crate::ids::{SubmissionId, UserId, WorkspaceId};
    use crate::permission::Role;
    use crate::storage::policy::{SETTING_USER_ID, SETTING_WORKSPACE_ID};
    use crate::storage::schema::TableName;
    use crate::submissions::{Submission, SubmissionMeta};

    fn bound(engine: &Arc<Engine>, user: UserId, workspace: Option<WorkspaceId>) -> Connection {
        let mut conn = Connection::new(1, ConnectionRole::Authenticated, Arc::clone(engine));
        conn.set_config(SETTING_USER_ID, &user.to_string())
            .expect("bind user");
        if let Some(workspace) = workspace {
            conn.set_config(SETTING_WORKSPACE_ID, &workspace.to_string())
                .expect("bind workspace");
        }
        conn.begin();
        conn
    }

    fn bootstrap(engine: &Arc<Engine>, owner: UserId) -> WorkspaceId {
        let workspace = Workspace {
            id: WorkspaceId::new(),
            name: "acme".into(),
            created_by: owner,
            created_at: 1,
        };
        let id = workspace.id;
        let mut conn = bound(engine, owner, None);
        conn.bootstrap_workspace(
            workspace,
            Membership {
                workspace_id: id,
                user_id: owner,
                role: Role::Owner,
                created_at: 1,
            },
        )
        .expect("bootstrap");
        conn.commit().expect("commit");
        id
    }

    fn form(workspace_id: WorkspaceId, user: UserId) -> Form {
        Form {
            id: FormId::new(),
            workspace_id,
            name: "survey".into(),
            status: FormStatus::Draft,
            draft_version_id: None,
            published_version_id: None,
            created_by: user,
            created_at: 1,
            updated_at: 1,
        }
    }

    #[test]
    fn statements_require_a_transaction() {
        let engine = Engine::with_standard_policies();
        let conn = Connection::new(1, ConnectionRole::Authenticated, engine);
        assert!(matches!(
            conn.select_all::<Workspace>(),
            Err(StorageError::NoTransaction)
        ));
    }

    #[test]
    fn unbound_connection_cannot_touch_protected_tables() {
        let engine = Engine::with_standard_policies();
        let mut conn = Connection::new(1, ConnectionRole::Authenticated, engine);
        conn.begin();
        assert!(matches!(
            conn.select_all::<Form>(),
            Err(StorageError::ScopeNotBound {
                table: TableName::Forms
            })
        ));
    }

    #[test]
    fn user_only_binding_cannot_read_tenant_tables() {
        let engine = Engine::with_standard_policies();
        let user = UserId::new();
        bootstrap(&engine, user);
        let conn = bound(&engine, user, None);
        assert_eq!(conn.select_all::<Workspace>().expect("workspaces").len(), 1);
        assert!(matches!(
            conn.select_all::<Form>(),
            Err(StorageError::ScopeNotBound { .. })
        ));
    }

    #[test]
    fn writes_outside_the_bound_workspace_are_rejected() {
        let engine = Engine::with_standard_policies();
        let user = UserId::new();
        let mine = bootstrap(&engine, user);
        let theirs = bootstrap(&engine, UserId::new());

        let mut conn = bound(&engine, user, Some(mine));
        conn.insert(form(mine, user)).expect("own workspace");
        assert!(matches!(
            conn.insert(form(theirs, user)),
            Err(StorageError::PolicyViolation {
                table: TableName::Forms
            })
        ));
        conn.commit().expect("commit");
    }

    #[test]
    fn working_copy_is_private_until_commit() {
        let engine = Engine::with_standard_policies();
        let user = UserId::new();
        let ws = bootstrap(&engine, user);

        let mut writer = bound(&engine, user, Some(ws));
        writer.insert(form(ws, user)).expect("insert");
        assert_eq!(writer.select_all::<Form>().expect("own writes").len(), 1);

        let reader = bound(&engine, user, Some(ws));
        assert!(reader.select_all::<Form>().expect("reader").is_empty());

        writer.rollback();
        let after = bound(&engine, user, Some(ws));
        assert!(after.select_all::<Form>().expect("after rollback").is_empty());
    }

    #[test]
    fn versions_are_immutable_even_for_service_connections() {
        let engine = Engine::with_standard_policies();
        let user = UserId::new();
        let ws = bootstrap(&engine, user);
        let mut conn = bound(&engine, user, Some(ws));
        let form = form(ws, user);
        let form_id = form.id;
        conn.insert(form).expect("form");
        let version = FormVersion {
            id: FormVersionId::new(),
            form_id,
            version_number: 1,
            fields: vec![FieldDef::new("name", FieldKind::ShortText, "Name")],
            created_by: user,
            created_at: 1,
        };
        conn.insert(version.clone()).expect("version");
        conn.commit().expect("commit");

        let mut service = Connection::new(2, ConnectionRole::Service, Arc::clone(&engine));
        service.begin();
        let mut changed = version.clone();
        changed.fields.clear();
        assert!(matches!(
            service.update(version.clone(), changed),
            Err(StorageError::ImmutableRow { .. })
        ));
        assert!(matches!(
            service.delete(version),
            Err(StorageError::ImmutableRow { .. })
        ));
    }

    fn version(form_id: FormId, user: UserId, number: u32, fields: Vec<FieldDef>) -> FormVersion {
        FormVersion {
            id: FormVersionId::new(),
            form_id,
            version_number: number,
            fields,
            created_by: user,
            created_at: 1,
        }
    }

    fn submission(form: &Form, version_id: FormVersionId) -> Submission {
        Submission {
            id: SubmissionId::new(),
            workspace_id: form.workspace_id,
            form_id: form.id,
            form_version_id: version_id,
            answers: Vec::new(),
            meta: SubmissionMeta::default(),
            created_at: 2,
        }
    }

    #[test]
    fn published_pointer_moves_only_through_publish() {
        let engine = Engine::with_standard_policies();
        let user = UserId::new();
        let ws = bootstrap(&engine, user);
        let mut conn = bound(&engine, user, Some(ws));

        let created = form(ws, user);
        let empty = version(created.id, user, 1, Vec::new());
        let filled = version(
            created.id,
            user,
            2,
            vec![FieldDef::new("name", FieldKind::ShortText, "Name")],
        );
        conn.insert(created.clone()).expect("form");
        conn.insert(empty.clone()).expect("empty version");
        conn.insert(filled.clone()).expect("filled version");
        let drafted = Form {
            draft_version_id: Some(filled.id),
            ..created.clone()
        };
        conn.update(created, drafted.clone()).expect("point draft");

        let forced = Form {
            published_version_id: Some(empty.id),
            status: FormStatus::Published,
            ..drafted.clone()
        };
        assert!(matches!(
            conn.update(drafted.clone(), forced.clone()),
            Err(StorageError::Conflict(_))
        ));
        let smuggled = Form {
            id: FormId::new(),
            ..forced
        };
        assert!(matches!(conn.insert(smuggled), Err(StorageError::Conflict(_))));

        conn.publish_draft(drafted.id, filled.id, 2).expect("publish");
        conn.commit().expect("commit");

        let mut service = Connection::new(2, ConnectionRole::Service, Arc::clone(&engine));
        service.begin();
        let published = service
            .get::<Form>(&drafted.id)
            .expect("read")
            .expect("form");
        assert_eq!(published.published_version_id, Some(filled.id));
        let rewound = Form {
            published_version_id: Some(empty.id),
            ..published.clone()
        };
        assert!(matches!(
            service.update(published, rewound),
            Err(StorageError::Conflict(_))
        ));
    }

    #[test]
    fn submissions_must_name_the_published_version_when_issued() {
        let engine = Engine::with_standard_policies();
        let user = UserId::new();
        let ws = bootstrap(&engine, user);
        let mut conn = bound(&engine, user, Some(ws));
        let created = form(ws, user);
        let fields = vec![FieldDef::new("name", FieldKind::ShortText, "Name")];
        let v1 = version(created.id, user, 1, fields.clone());
        let v2 = version(created.id, user, 2, fields);
        conn.insert(created.clone()).expect("form");
        conn.insert(v1.clone()).expect("v1");
        conn.insert(v2.clone()).expect("v2");
        let drafted = Form {
            draft_version_id: Some(v1.id),
            ..created.clone()
        };
        conn.update(created, drafted.clone()).expect("draft v1");
        assert!(matches!(
            conn.insert(submission(&drafted, v1.id)),
            Err(StorageError::InvalidReference {
                table: TableName::Submissions,
                ..
            })
        ));
        conn.publish_draft(drafted.id, v1.id, 2).expect("publish v1");
        conn.commit().expect("commit");

        // Issued against v1 while it is published.
        let mut early = bound(&engine, user, Some(ws));
        early
            .insert(submission(&drafted, v1.id))
            .expect("submission on the published version");

        let mut publisher = bound(&engine, user, Some(ws));
        let current = publisher
            .get::<Form>(&drafted.id)
            .expect("read")
            .expect("form");
        let redrafted = Form {
            draft_version_id: Some(v2.id),
            ..current.clone()
        };
        publisher.update(current, redrafted).expect("draft v2");
        publisher.publish_draft(drafted.id, v2.id, 3).expect("publish v2");
        publisher.commit().expect("commit v2");

        early.commit().expect("v1 still belongs to the form at commit");

        let mut late = Connection::new(3, ConnectionRole::Service, Arc::clone(&engine));
        late.begin();
        assert!(matches!(
            late.insert(submission(&drafted, v1.id)),
            Err(StorageError::InvalidReference { .. })
        ));
        late.insert(submission(&drafted, v2.id))
            .expect("submission on the new version");
        late.commit().expect("commit");
    }

    #[test]
    fn reset_clears_settings_and_transaction() {
        let engine = Engine::with_standard_policies();
        let mut conn = bound(&engine, UserId::new(), Some(WorkspaceId::new()));
        assert!(!conn.is_clean());
        conn.reset();
        assert!(conn.is_clean());
        assert_eq!(conn.current_setting(SETTING_USER_ID), None);
    }
}
