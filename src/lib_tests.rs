use super::FormVault;
use crate::config::FormVaultConfig;
use crate::error::{AuthError, FormVaultError, StorageError};
use crate::gate::Authorization;
use crate::ids::{FormId, UserId};
use crate::storage::{PoolKind, SETTING_USER_ID, SETTING_WORKSPACE_ID};
use crate::submissions::SubmissionMeta;
use crate::workspaces;
use std::time::{Duration, Instant};

fn open_dev() -> FormVault {
    FormVault::open(FormVaultConfig::development()).expect("open vault")
}

#[test]
fn open_rejects_invalid_config() {
    let err = FormVault::open(FormVaultConfig::default()).expect_err("missing secret");
    assert!(matches!(err, FormVaultError::InvalidConfig { .. }));
}

#[test]
fn pools_follow_config() {
    let vault = FormVault::open(FormVaultConfig::development().with_pool_sizes(3, 2))
        .expect("open vault");
    let auth = vault
        .pool_status(PoolKind::Authenticated)
        .expect("authenticated pool");
    assert_eq!((auth.size, auth.idle, auth.in_use), (3, 3, 0));
    let service = vault.pool_status(PoolKind::Service).expect("service pool");
    assert_eq!(service.size, 2);

    let vault = FormVault::open(FormVaultConfig::development().with_service_sessions(false))
        .expect("open vault");
    assert!(vault.pool_status(PoolKind::Service).is_none());
}

#[tokio::test]
async fn unscoped_authorization_ignores_workspace_header() {
    let vault = open_dev();
    let user = UserId::new();
    let token = vault
        .identity()
        .issue_access_token(user, "solo@example.com")
        .expect("token");
    let auth = vault
        .authorize(Some(&token), Some("not-a-workspace"), false)
        .await
        .expect("authorize");
    assert!(matches!(auth, Authorization::Unscoped(ref p) if p.user_id() == user));
}

#[tokio::test]
async fn identity_session_binds_only_the_user() {
    let vault = open_dev();
    let user = UserId::new();
    let token = vault
        .identity()
        .issue_access_token(user, "solo@example.com")
        .expect("token");
    let principal = vault.authenticate(Some(&token)).expect("principal");
    let session = vault.begin_identity(principal).await.expect("identity session");
    assert_eq!(
        session.connection().current_setting(SETTING_USER_ID),
        Some(*user.as_uuid())
    );
    assert_eq!(session.connection().current_setting(SETTING_WORKSPACE_ID), None);
}

#[tokio::test]
async fn scope_resolution_uses_and_returns_a_connection() {
    let vault = open_dev();
    let user = UserId::new();
    let token = vault
        .identity()
        .issue_access_token(user, "owner@example.com")
        .expect("token");
    let principal = vault.authenticate(Some(&token)).expect("principal");
    let workspace = vault
        .run_identity(&principal, |session| {
            workspaces::create_workspace(session, "Acme")
        })
        .await
        .expect("create workspace");

    let id = workspace.id.to_string();
    let auth = vault
        .authorize(Some(&token), Some(&id), true)
        .await
        .expect("authorize");
    let scope = auth.into_scope().expect("scoped");
    assert_eq!(scope.workspace_id(), workspace.id);

    let status = vault
        .pool_status(PoolKind::Authenticated)
        .expect("authenticated pool");
    assert_eq!(status.in_use, 0);

    let err = vault
        .authorize(Some(&token), None, true)
        .await
        .expect_err("missing scope");
    assert!(matches!(err, FormVaultError::Auth(AuthError::MissingScope)));
}

#[tokio::test]
async fn privileged_path_can_be_disabled() {
    let vault = FormVault::open(FormVaultConfig::development().with_service_sessions(false))
        .expect("open vault");
    let err = vault
        .submit_public(FormId::new(), Vec::new(), SubmissionMeta::default())
        .await
        .expect_err("service sessions disabled");
    assert!(matches!(
        err,
        FormVaultError::Storage(StorageError::ServiceSessionUnavailable)
    ));
    assert_eq!(err.http_status(), 503);
}

#[tokio::test]
async fn shutdown_closes_both_pools() {
    let vault = open_dev();
    vault.shutdown().await.expect("shutdown");
    let user = UserId::new();
    let token = vault
        .identity()
        .issue_access_token(user, "late@example.com")
        .expect("token");
    let principal = vault.authenticate(Some(&token)).expect("principal");
    let err = vault
        .begin_identity(principal)
        .await
        .expect_err("closed pool");
    assert!(matches!(
        err,
        FormVaultError::Storage(StorageError::PoolClosed {
            pool: PoolKind::Authenticated
        })
    ));
    let err = vault
        .submit_public(FormId::new(), Vec::new(), SubmissionMeta::default())
        .await
        .expect_err("closed service pool");
    assert!(matches!(
        err,
        FormVaultError::Storage(StorageError::PoolClosed {
            pool: PoolKind::Service
        })
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_returns_once_borrowed_sessions_come_back() {
    let vault = FormVault::open(
        FormVaultConfig::development().with_pool_acquire_timeout_ms(30_000),
    )
    .expect("open vault");
    let user = UserId::new();
    let token = vault
        .identity()
        .issue_access_token(user, "holder@example.com")
        .expect("token");
    let principal = vault.authenticate(Some(&token)).expect("principal");
    let session = vault.begin_identity(principal).await.expect("session");

    let holder = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(session);
    });
    let started = Instant::now();
    vault.shutdown().await.expect("shutdown");
    assert!(started.elapsed() < Duration::from_secs(5));

    let status = vault
        .pool_status(PoolKind::Authenticated)
        .expect("authenticated pool");
    assert!(status.closed);
    assert_eq!(status.in_use, 0);
    holder.await.expect("holder task");
}
