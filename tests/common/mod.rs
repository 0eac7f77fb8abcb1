#![allow(dead_code)]

use formvault::FormVault;
use formvault::config::FormVaultConfig;
use formvault::forms::{self, FieldDef, FieldKind, Form, FormVersion};
use formvault::identity::Principal;
use formvault::ids::{UserId, WorkspaceId};
use formvault::permission::Role;
use formvault::scope::Scope;
use formvault::workspaces::{self, Workspace};

pub fn vault() -> FormVault {
    vault_with(FormVaultConfig::development())
}

pub fn vault_with(config: FormVaultConfig) -> FormVault {
    FormVault::open(config).expect("open vault")
}

pub struct Tenant {
    pub user: UserId,
    pub token: String,
    pub principal: Principal,
}

pub fn user(vault: &FormVault, email: &str) -> Tenant {
    let user = UserId::new();
    let token = vault
        .identity()
        .issue_access_token(user, email)
        .expect("issue token");
    let principal = vault.authenticate(Some(&token)).expect("authenticate");
    Tenant {
        user,
        token,
        principal,
    }
}

pub async fn create_workspace(vault: &FormVault, owner: &Tenant, name: &str) -> Workspace {
    let name = name.to_string();
    vault
        .run_identity(&owner.principal, move |session| {
            workspaces::create_workspace(session, &name)
        })
        .await
        .expect("create workspace")
}

pub async fn scope_for(vault: &FormVault, tenant: &Tenant, workspace_id: WorkspaceId) -> Scope {
    let header = workspace_id.to_string();
    vault
        .authorize(Some(&tenant.token), Some(&header), true)
        .await
        .expect("authorize")
        .into_scope()
        .expect("scoped authorization")
}

/// Fresh user owning a fresh workspace, returned with its owner scope.
pub async fn tenant(vault: &FormVault, email: &str) -> (Tenant, Scope) {
    let owner = user(vault, email);
    let workspace = create_workspace(vault, &owner, &format!("{email} workspace")).await;
    let scope = scope_for(vault, &owner, workspace.id).await;
    (owner, scope)
}

pub async fn add_member(vault: &FormVault, owner: &Scope, member: &Tenant, role: Role) -> Scope {
    let member_id = member.user;
    vault
        .run_scoped(owner, move |session| {
            workspaces::add_member(session, member_id, role)
        })
        .await
        .expect("add member");
    scope_for(vault, member, owner.workspace_id()).await
}

pub fn name_field() -> Vec<FieldDef> {
    vec![FieldDef::new("name", FieldKind::ShortText, "Name").required()]
}

/// Form whose published version holds `fields`.
pub async fn published_form(vault: &FormVault, scope: &Scope, fields: Vec<FieldDef>) -> (Form, FormVersion) {
    vault
        .run_scoped(scope, move |session| {
            let form = forms::create_form(session, "Contact")?;
            let version = forms::create_version(session, form.id, fields)?;
            let form = forms::publish(session, form.id)?;
            Ok((form, version))
        })
        .await
        .expect("publish form")
}
