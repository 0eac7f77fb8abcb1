use crate::error::{AuthError, FormVaultError};
use crate::identity::Principal;
use crate::ids::{UserId, WorkspaceId};
use crate::permission::Role;
use crate::session::IdentitySession;
use crate::workspaces::Membership;
use tracing::warn;

/// An authorized `(user, workspace)` pair for one request. Produced only by
/// [`resolve_scope`]; it is bound onto exactly one storage session and never
/// persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    user_id: UserId,
    workspace_id: WorkspaceId,
    role: Role,
}

impl Scope {
    pub(crate) fn new(user_id: UserId, workspace_id: WorkspaceId, role: Role) -> Self {
        Self {
            user_id,
            workspace_id,
            role,
        }
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn workspace_id(&self) -> WorkspaceId {
        self.workspace_id
    }

    /// Role held when the scope was resolved.
    pub fn role(&self) -> Role {
        self.role
    }

    pub fn require_role(&self, required: Role) -> Result<(), FormVaultError> {
        if self.role.can(required) {
            Ok(())
        } else {
            Err(FormVaultError::PermissionDenied(format!(
                "{required} role required"
            )))
        }
    }
}

/// Validates the caller-declared workspace against the principal's
/// memberships. The lookup runs on an identity-bound session, so it sees only
/// the principal's own membership rows.
pub fn resolve_scope(
    session: &mut IdentitySession,
    requested_workspace: Option<&str>,
) -> Result<Scope, FormVaultError> {
    let principal = session.principal().clone();
    let Some(raw) = requested_workspace.map(str::trim).filter(|raw| !raw.is_empty()) else {
        warn!(
            cause = AuthError::MissingScope.log_cause(),
            user_id = %principal.user_id(),
            "workspace scope missing"
        );
        return Err(AuthError::MissingScope.into());
    };
    let Ok(workspace_id) = raw.parse::<WorkspaceId>() else {
        return Err(deny(&principal, raw));
    };
    let membership = session
        .connection()
        .get::<Membership>(&(workspace_id, principal.user_id()))?;
    match membership {
        Some(membership) => Ok(Scope::new(
            principal.user_id(),
            workspace_id,
            membership.role,
        )),
        None => Err(deny(&principal, raw)),
    }
}

fn deny(principal: &Principal, requested: &str) -> FormVaultError {
    warn!(
        cause = AuthError::ScopeDenied.log_cause(),
        user_id = %principal.user_id(),
        requested_workspace = requested,
        "workspace scope denied"
    );
    AuthError::ScopeDenied.into()
}
