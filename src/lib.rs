pub mod config;
pub mod error;
pub mod forms;
pub mod gate;
pub mod identity;
pub mod ids;
#[cfg(test)]
mod lib_tests;
pub mod permission;
pub mod scope;
pub mod session;
pub mod storage;
pub mod submissions;
pub mod workspaces;

use crate::config::FormVaultConfig;
use crate::error::{FormVaultError, StorageError};
use crate::gate::{Authorization, RequestCredentials};
use crate::identity::{IdentityResolver, Principal};
use crate::ids::FormId;
use crate::scope::Scope;
use crate::session::{IdentitySession, ScopedSession, ServiceSession};
use crate::storage::{ConnectionPool, Engine, PolicySet, PoolKind, PoolStatus};
use crate::submissions::{Answer, Submission, SubmissionMeta};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Process-wide service instance: the engine, both connection pools and the
/// identity resolver. Created at process start, drained by [`shutdown`].
///
/// [`shutdown`]: FormVault::shutdown
pub struct FormVault {
    config: FormVaultConfig,
    identity: IdentityResolver,
    engine: Arc<Engine>,
    authenticated: Arc<ConnectionPool>,
    service: Option<Arc<ConnectionPool>>,
}

impl std::fmt::Debug for FormVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FormVault")
            .field("authenticated", &self.authenticated.status())
            .field("service", &self.service.as_ref().map(|pool| pool.status()))
            .finish()
    }
}

impl FormVault {
    pub fn open(config: FormVaultConfig) -> Result<Self, FormVaultError> {
        config.validate()?;
        info!(
            token_secret_len = config.secret().map_or(0, <[u8]>::len),
            access_token_ttl_secs = config.access_token_ttl_secs,
            refresh_token_ttl_secs = config.refresh_token_ttl_secs,
            token_leeway_secs = config.token_leeway_secs,
            authenticated_pool_size = config.authenticated_pool_size,
            service_pool_size = config.service_pool_size,
            service_sessions_enabled = config.service_sessions_enabled,
            pool_acquire_timeout_ms = config.pool_acquire_timeout_ms,
            "opening formvault"
        );
        let identity = IdentityResolver::from_config(&config)?;
        let engine = Engine::with_standard_policies();
        let authenticated = ConnectionPool::new(
            PoolKind::Authenticated,
            config.authenticated_pool_size,
            config.pool_acquire_timeout(),
            &engine,
        );
        let service = config.service_sessions_enabled.then(|| {
            ConnectionPool::new(
                PoolKind::Service,
                config.service_pool_size,
                config.pool_acquire_timeout(),
                &engine,
            )
        });
        Ok(Self {
            config,
            identity,
            engine,
            authenticated,
            service,
        })
    }

    pub fn config(&self) -> &FormVaultConfig {
        &self.config
    }

    pub fn identity(&self) -> &IdentityResolver {
        &self.identity
    }

    pub fn policies(&self) -> &PolicySet {
        self.engine.policies()
    }

    pub fn committed_seq(&self) -> u64 {
        self.engine.committed_seq()
    }

    pub fn authenticate(&self, credential: Option<&str>) -> Result<Principal, FormVaultError> {
        Ok(self.identity.resolve(credential)?)
    }

    /// Bearer credential, then workspace membership. With
    /// `requires_scope == false` the workspace header is ignored and the bare
    /// principal is returned.
    pub async fn authorize(
        &self,
        credential: Option<&str>,
        workspace_header: Option<&str>,
        requires_scope: bool,
    ) -> Result<Authorization, FormVaultError> {
        let principal = self.authenticate(credential)?;
        if !requires_scope {
            return Ok(Authorization::Unscoped(principal));
        }
        let scope = self.resolve_scope(principal, workspace_header).await?;
        Ok(Authorization::Scoped(scope))
    }

    pub async fn authorize_request(
        &self,
        request: &RequestCredentials,
        requires_scope: bool,
    ) -> Result<Authorization, FormVaultError> {
        self.authorize(
            request.bearer.as_deref(),
            request.workspace.as_deref(),
            requires_scope,
        )
        .await
    }

    pub async fn resolve_scope(
        &self,
        principal: Principal,
        workspace_header: Option<&str>,
    ) -> Result<Scope, FormVaultError> {
        let mut session = self.begin_identity(principal).await?;
        let scope = scope::resolve_scope(&mut session, workspace_header)?;
        session.rollback();
        Ok(scope)
    }

    pub async fn begin_scoped(&self, scope: &Scope) -> Result<ScopedSession, FormVaultError> {
        let conn = self.authenticated.acquire().await?;
        ScopedSession::bind(conn, scope.clone())
    }

    /// Runs `work` on a freshly bound scoped session. Commits on `Ok`, rolls
    /// back on `Err`; the connection returns to the pool clean either way.
    pub async fn run_scoped<T, F>(&self, scope: &Scope, work: F) -> Result<T, FormVaultError>
    where
        F: FnOnce(&mut ScopedSession) -> Result<T, FormVaultError>,
    {
        let mut session = self.begin_scoped(scope).await?;
        match work(&mut session) {
            Ok(value) => {
                session.commit().inspect_err(report_failure)?;
                Ok(value)
            }
            Err(err) => {
                report_failure(&err);
                session.rollback();
                Err(err)
            }
        }
    }

    pub async fn begin_identity(
        &self,
        principal: Principal,
    ) -> Result<IdentitySession, FormVaultError> {
        let conn = self.authenticated.acquire().await?;
        IdentitySession::bind(conn, principal)
    }

    pub async fn run_identity<T, F>(
        &self,
        principal: &Principal,
        work: F,
    ) -> Result<T, FormVaultError>
    where
        F: FnOnce(&mut IdentitySession) -> Result<T, FormVaultError>,
    {
        let mut session = self.begin_identity(principal.clone()).await?;
        match work(&mut session) {
            Ok(value) => {
                session.commit().inspect_err(report_failure)?;
                Ok(value)
            }
            Err(err) => {
                report_failure(&err);
                session.rollback();
                Err(err)
            }
        }
    }

    /// Runs `work` on a service session. [`ServiceSession`] exposes no data
    /// operations of its own; public submission admission is the only
    /// operation that accepts one.
    pub async fn run_privileged<T, F>(&self, work: F) -> Result<T, FormVaultError>
    where
        F: FnOnce(&mut ServiceSession) -> Result<T, FormVaultError>,
    {
        let pool = self
            .service
            .as_ref()
            .ok_or(StorageError::ServiceSessionUnavailable)?;
        let mut session = ServiceSession::open(pool.acquire().await?);
        match work(&mut session) {
            Ok(value) => {
                session.commit().inspect_err(report_failure)?;
                Ok(value)
            }
            Err(err) => {
                report_failure(&err);
                session.rollback();
                Err(err)
            }
        }
    }

    /// Anonymous submission to a published form.
    pub async fn submit_public(
        &self,
        form_id: FormId,
        answers: Vec<Answer>,
        meta: SubmissionMeta,
    ) -> Result<Submission, FormVaultError> {
        self.run_privileged(|session| {
            submissions::accept_public(session, form_id, answers, meta)
        })
        .await
    }

    pub fn pool_status(&self, kind: PoolKind) -> Option<PoolStatus> {
        match kind {
            PoolKind::Authenticated => Some(self.authenticated.status()),
            PoolKind::Service => self.service.as_ref().map(|pool| pool.status()),
        }
    }

    /// Closes both pools and waits, up to the acquire timeout, for borrowed
    /// connections to come back.
    pub async fn shutdown(&self) -> Result<(), FormVaultError> {
        let pools: Vec<&Arc<ConnectionPool>> =
            std::iter::once(&self.authenticated).chain(self.service.as_ref()).collect();
        for pool in &pools {
            pool.close();
        }
        let drained = async {
            for pool in &pools {
                pool.drained().await;
            }
        };
        match tokio::time::timeout(self.config.pool_acquire_timeout(), drained).await {
            Ok(()) => info!("formvault shut down"),
            Err(_) => {
                let busy: usize = pools.iter().map(|pool| pool.status().in_use).sum();
                warn!(in_use = busy, "shutdown finished with connections still borrowed");
            }
        }
        Ok(())
    }
}

fn report_failure(err: &FormVaultError) {
    if err.is_defect() {
        error!(code = err.code_str(), error = %err, "storage binding defect; operation aborted");
    }
}
