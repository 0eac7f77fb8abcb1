//! Session handles. The three kinds are distinct types so a privileged
//! handle can never stand in for a scoped one.

use crate::error::FormVaultError;
use crate::identity::Principal;
use crate::scope::Scope;
use crate::storage::{Connection, PooledConnection, SETTING_USER_ID, SETTING_WORKSPACE_ID};
use uuid::Uuid;

/// Authenticated connection with both `app.user_id` and `app.workspace_id`
/// bound. Every statement issued through it is filtered to the bound
/// workspace by the engine.
///
/// `commit` consumes the session. Dropping it without committing rolls the
/// transaction back; either way the connection goes back to the pool with
/// its settings cleared.
#[derive(Debug)]
pub struct ScopedSession {
    conn: PooledConnection,
    scope: Scope,
}

impl ScopedSession {
    pub(crate) fn bind(mut conn: PooledConnection, scope: Scope) -> Result<Self, FormVaultError> {
        conn.set_config(SETTING_USER_ID, &scope.user_id().to_string())?;
        conn.set_config(SETTING_WORKSPACE_ID, &scope.workspace_id().to_string())?;
        conn.begin();
        Ok(Self { conn, scope })
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn current_setting(&self, name: &str) -> Option<Uuid> {
        self.conn.current_setting(name)
    }

    pub fn connection_id(&self) -> u64 {
        self.conn.id()
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    pub fn commit(mut self) -> Result<u64, FormVaultError> {
        Ok(self.conn.commit()?)
    }

    pub fn rollback(mut self) {
        self.conn.rollback();
    }
}

/// Authenticated connection with only `app.user_id` bound. Used before a
/// workspace is chosen: scope resolution, listing and creating workspaces.
#[derive(Debug)]
pub struct IdentitySession {
    conn: PooledConnection,
    principal: Principal,
}

impl IdentitySession {
    pub(crate) fn bind(
        mut conn: PooledConnection,
        principal: Principal,
    ) -> Result<Self, FormVaultError> {
        conn.set_config(SETTING_USER_ID, &principal.user_id().to_string())?;
        conn.begin();
        Ok(Self { conn, principal })
    }

    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub(crate) fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    pub fn commit(mut self) -> Result<u64, FormVaultError> {
        Ok(self.conn.commit()?)
    }

    pub fn rollback(mut self) {
        self.conn.rollback();
    }
}

/// Service-pool connection: no settings, no row-level policies. The only
/// operation that accepts it is public submission admission, which performs
/// its own authorization first.
#[derive(Debug)]
pub struct ServiceSession {
    conn: PooledConnection,
}

impl ServiceSession {
    pub(crate) fn open(mut conn: PooledConnection) -> Self {
        conn.begin();
        Self { conn }
    }

    pub(crate) fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    pub fn commit(mut self) -> Result<u64, FormVaultError> {
        Ok(self.conn.commit()?)
    }

    pub fn rollback(mut self) {
        self.conn.rollback();
    }
}
