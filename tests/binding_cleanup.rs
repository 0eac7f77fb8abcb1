mod common;

use common::{tenant, vault_with};
use formvault::config::FormVaultConfig;
use formvault::error::{FormVaultError, StorageError};
use formvault::forms;
use formvault::storage::{PoolKind, SETTING_USER_ID, SETTING_WORKSPACE_ID};
use std::sync::Arc;
use std::time::Duration;

fn single_connection() -> FormVaultConfig {
    FormVaultConfig::development()
        .with_pool_sizes(1, 1)
        .with_pool_acquire_timeout_ms(200)
}

fn assert_pool_idle(vault: &formvault::FormVault) {
    let status = vault
        .pool_status(PoolKind::Authenticated)
        .expect("authenticated pool");
    assert_eq!(status.in_use, 0);
    assert_eq!(status.idle, status.size);
}

#[tokio::test]
async fn reused_connection_never_carries_the_previous_scope() {
    let vault = vault_with(single_connection());
    let (alice, alice_scope) = tenant(&vault, "alice@example.com").await;
    let (bob, bob_scope) = tenant(&vault, "bob@example.com").await;

    let mut connection_ids = Vec::new();
    for round in 0..10 {
        let (scope, user) = if round % 2 == 0 {
            (&alice_scope, alice.user)
        } else {
            (&bob_scope, bob.user)
        };
        let session = vault.begin_scoped(scope).await.expect("begin scoped");
        assert_eq!(session.current_setting(SETTING_USER_ID), Some(*user.as_uuid()));
        assert_eq!(
            session.current_setting(SETTING_WORKSPACE_ID),
            Some(*scope.workspace_id().as_uuid())
        );
        connection_ids.push(session.connection_id());
        session.rollback();
    }
    connection_ids.dedup();
    assert_eq!(connection_ids.len(), 1);

    let identity = vault
        .begin_identity(alice.principal.clone())
        .await
        .expect("identity session");
    assert_eq!(identity.connection().current_setting(SETTING_WORKSPACE_ID), None);
    identity.rollback();
    assert_pool_idle(&vault);
}

#[tokio::test]
async fn failed_work_unit_rolls_back() {
    let vault = vault_with(single_connection());
    let (_owner, scope) = tenant(&vault, "owner@example.com").await;

    let err = vault
        .run_scoped::<(), _>(&scope, |session| {
            forms::create_form(session, "Half done")?;
            Err(FormVaultError::Validation("handler gave up".into()))
        })
        .await
        .expect_err("work unit fails");
    assert!(matches!(err, FormVaultError::Validation(_)));
    assert_pool_idle(&vault);

    let listed = vault
        .run_scoped(&scope, |session| forms::list_forms(session))
        .await
        .expect("list forms");
    assert!(listed.is_empty());
}

#[tokio::test]
async fn dropped_session_discards_staged_writes() {
    let vault = vault_with(single_connection());
    let (_owner, scope) = tenant(&vault, "owner@example.com").await;

    let mut session = vault.begin_scoped(&scope).await.expect("begin scoped");
    forms::create_form(&mut session, "Never committed").expect("staged form");
    drop(session);
    assert_pool_idle(&vault);

    let listed = vault
        .run_scoped(&scope, |session| forms::list_forms(session))
        .await
        .expect("list forms");
    assert!(listed.is_empty());
}

#[tokio::test]
async fn panicking_work_unit_returns_a_clean_connection() {
    let vault = Arc::new(vault_with(single_connection()));
    let (_owner, scope) = tenant(&vault, "owner@example.com").await;

    let task = {
        let vault = Arc::clone(&vault);
        let scope = scope.clone();
        tokio::spawn(async move {
            vault
                .run_scoped::<(), _>(&scope, |session| {
                    forms::create_form(session, "Ghost")?;
                    panic!("handler crashed mid-transaction");
                })
                .await
        })
    };
    let err = task.await.expect_err("task panicked");
    assert!(err.is_panic());
    assert_pool_idle(&vault);

    let listed = vault
        .run_scoped(&scope, |session| forms::list_forms(session))
        .await
        .expect("list forms after panic");
    assert!(listed.is_empty());
}

#[tokio::test]
async fn aborted_request_releases_its_connection() {
    let vault = Arc::new(vault_with(single_connection()));
    let (_owner, scope) = tenant(&vault, "owner@example.com").await;
    let (staged_tx, staged_rx) = tokio::sync::oneshot::channel();

    let task = {
        let vault = Arc::clone(&vault);
        let scope = scope.clone();
        tokio::spawn(async move {
            let mut session = vault.begin_scoped(&scope).await.expect("begin scoped");
            forms::create_form(&mut session, "Abandoned").expect("staged form");
            let _ = staged_tx.send(());
            tokio::time::sleep(Duration::from_secs(60)).await;
            session.commit().expect("never reached");
        })
    };
    staged_rx.await.expect("write staged");
    task.abort();
    let err = task.await.expect_err("task aborted");
    assert!(err.is_cancelled());
    assert_pool_idle(&vault);

    let listed = vault
        .run_scoped(&scope, |session| forms::list_forms(session))
        .await
        .expect("list forms after abort");
    assert!(listed.is_empty());
}

#[tokio::test]
async fn exhausted_pool_times_out() {
    let vault = vault_with(single_connection());
    let (_owner, scope) = tenant(&vault, "owner@example.com").await;

    let held = vault.begin_scoped(&scope).await.expect("first session");
    let err = vault
        .begin_scoped(&scope)
        .await
        .expect_err("pool exhausted");
    assert!(matches!(
        err,
        FormVaultError::Storage(StorageError::PoolTimeout {
            pool: PoolKind::Authenticated,
            ..
        })
    ));
    assert_eq!(err.http_status(), 503);
    assert_eq!(err.public_message(), "service unavailable");

    held.rollback();
    let again = vault.begin_scoped(&scope).await.expect("after release");
    again.rollback();
    assert_pool_idle(&vault);
}
