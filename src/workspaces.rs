use crate::error::{FormVaultError, ResourceType};
use crate::ids::{UserId, WorkspaceId};
use crate::permission::Role;
use crate::session::{IdentitySession, ScopedSession};
use crate::storage::now_micros;
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workspace {
    pub id: WorkspaceId,
    pub name: String,
    pub created_by: UserId,
    pub created_at: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    pub workspace_id: WorkspaceId,
    pub user_id: UserId,
    pub role: Role,
    pub created_at: u64,
}

fn validate_name(name: &str) -> Result<String, FormVaultError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(FormVaultError::Validation(
            "workspace name must not be empty".into(),
        ));
    }
    Ok(name.to_string())
}

/// Creates a workspace with the caller as its owner. This is the one
/// operation that runs without a workspace scope.
pub fn create_workspace(
    session: &mut IdentitySession,
    name: &str,
) -> Result<Workspace, FormVaultError> {
    let name = validate_name(name)?;
    let user_id = session.principal().user_id();
    let now = now_micros();
    let workspace = Workspace {
        id: WorkspaceId::new(),
        name,
        created_by: user_id,
        created_at: now,
    };
    let owner = Membership {
        workspace_id: workspace.id,
        user_id,
        role: Role::Owner,
        created_at: now,
    };
    session
        .connection_mut()
        .bootstrap_workspace(workspace.clone(), owner)?;
    info!(workspace_id = %workspace.id, user_id = %user_id, "workspace created");
    Ok(workspace)
}

pub fn list_workspaces(session: &IdentitySession) -> Result<Vec<Workspace>, FormVaultError> {
    let mut workspaces = session.connection().select_all::<Workspace>()?;
    workspaces.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
    Ok(workspaces)
}

pub fn get_workspace(session: &ScopedSession) -> Result<Workspace, FormVaultError> {
    let id = session.scope().workspace_id();
    session
        .connection()
        .get::<Workspace>(&id)?
        .ok_or_else(|| FormVaultError::not_found(ResourceType::Workspace, id))
}

pub fn rename_workspace(
    session: &mut ScopedSession,
    name: &str,
) -> Result<Workspace, FormVaultError> {
    session.scope().require_role(Role::Admin)?;
    let name = validate_name(name)?;
    let current = get_workspace(session)?;
    let renamed = Workspace {
        name,
        ..current.clone()
    };
    session.connection_mut().update(current, renamed.clone())?;
    Ok(renamed)
}

pub fn list_members(session: &ScopedSession) -> Result<Vec<Membership>, FormVaultError> {
    let workspace_id = session.scope().workspace_id();
    let mut members = session
        .connection()
        .select::<Membership>(|m| m.workspace_id == workspace_id)?;
    members.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.user_id.cmp(&b.user_id)));
    Ok(members)
}

fn get_member(session: &ScopedSession, user_id: UserId) -> Result<Membership, FormVaultError> {
    let key = (session.scope().workspace_id(), user_id);
    session
        .connection()
        .get::<Membership>(&key)?
        .ok_or_else(|| FormVaultError::not_found(ResourceType::Membership, user_id))
}

/// Granting or revoking ownership needs an owner; everything else an admin.
fn require_grant(session: &ScopedSession, from: Option<Role>, to: Role) -> Result<(), FormVaultError> {
    session.scope().require_role(Role::Admin)?;
    if to == Role::Owner || from == Some(Role::Owner) {
        session.scope().require_role(Role::Owner)?;
    }
    Ok(())
}

fn ensure_other_owner(session: &ScopedSession, leaving: UserId) -> Result<(), FormVaultError> {
    let remaining = list_members(session)?
        .into_iter()
        .filter(|m| m.role == Role::Owner && m.user_id != leaving)
        .count();
    if remaining == 0 {
        return Err(FormVaultError::Conflict(
            "workspace must have at least one owner".into(),
        ));
    }
    Ok(())
}

pub fn add_member(
    session: &mut ScopedSession,
    user_id: UserId,
    role: Role,
) -> Result<Membership, FormVaultError> {
    require_grant(session, None, role)?;
    let workspace_id = session.scope().workspace_id();
    if session
        .connection()
        .get::<Membership>(&(workspace_id, user_id))?
        .is_some()
    {
        return Err(FormVaultError::Conflict(
            "user is already a member of this workspace".into(),
        ));
    }
    let membership = Membership {
        workspace_id,
        user_id,
        role,
        created_at: now_micros(),
    };
    session.connection_mut().insert(membership.clone())?;
    info!(workspace_id = %workspace_id, user_id = %user_id, role = %role, "member added");
    Ok(membership)
}

pub fn update_member_role(
    session: &mut ScopedSession,
    user_id: UserId,
    role: Role,
) -> Result<Membership, FormVaultError> {
    let current = get_member(session, user_id)?;
    require_grant(session, Some(current.role), role)?;
    if current.role == Role::Owner && role != Role::Owner {
        ensure_other_owner(session, user_id)?;
    }
    let updated = Membership {
        role,
        ..current.clone()
    };
    session.connection_mut().update(current, updated.clone())?;
    Ok(updated)
}

/// Admins may remove anyone below owner; any member may remove themself.
pub fn remove_member(session: &mut ScopedSession, user_id: UserId) -> Result<(), FormVaultError> {
    let current = get_member(session, user_id)?;
    if user_id != session.scope().user_id() {
        require_grant(session, Some(current.role), current.role)?;
    }
    if current.role == Role::Owner {
        ensure_other_owner(session, user_id)?;
    }
    session.connection_mut().delete(current)?;
    info!(
        workspace_id = %session.scope().workspace_id(),
        user_id = %user_id,
        "member removed"
    );
    Ok(())
}
