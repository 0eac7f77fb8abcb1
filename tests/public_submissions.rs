mod common;

use common::{name_field, published_form, tenant, vault, vault_with};
use formvault::config::FormVaultConfig;
use formvault::error::{ConsistencyError, FormVaultError, StorageError};
use formvault::forms::{self, FieldDef, FieldKind};
use formvault::ids::FormId;
use formvault::submissions::{self, Answer, SubmissionMeta, SubmissionSource};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::Barrier;

fn meta() -> SubmissionMeta {
    SubmissionMeta {
        ip_address: Some("203.0.113.7".into()),
        user_agent: Some("integration-test".into()),
        ..SubmissionMeta::default()
    }
}

#[tokio::test]
async fn public_submission_lands_in_the_form_workspace() {
    let vault = vault();
    let (_alice, scope) = tenant(&vault, "alice@example.com").await;
    let (form, version) = published_form(&vault, &scope, name_field()).await;

    let submission = vault
        .submit_public(form.id, vec![Answer::new("name", json!("Visitor"))], meta())
        .await
        .expect("public submission");
    assert_eq!(submission.workspace_id, scope.workspace_id());
    assert_eq!(submission.form_version_id, version.id);
    assert_eq!(submission.meta.source, SubmissionSource::Public);
    assert_eq!(submission.meta.ip_address.as_deref(), Some("203.0.113.7"));

    let submission_id = submission.id;
    let stored = vault
        .run_scoped(&scope, move |session| submissions::get_submission(session, submission_id))
        .await
        .expect("owner reads submission");
    assert_eq!(stored, submission);
}

#[tokio::test]
async fn draft_only_form_refuses_public_submissions() {
    let vault = vault();
    let (_alice, scope) = tenant(&vault, "alice@example.com").await;
    let draft = vault
        .run_scoped(&scope, |session| {
            let form = forms::create_form(session, "Draft only")?;
            forms::create_version(session, form.id, name_field())?;
            Ok(form)
        })
        .await
        .expect("draft form");

    let err = vault
        .submit_public(draft.id, vec![Answer::new("name", json!("Visitor"))], meta())
        .await
        .expect_err("draft form");
    assert!(matches!(
        err,
        FormVaultError::Consistency(ConsistencyError::FormNotPublished { .. })
    ));
    assert_eq!(err.http_status(), 404);
}

#[tokio::test]
async fn unknown_form_is_not_found() {
    let vault = vault();
    let err = vault
        .submit_public(FormId::new(), Vec::new(), meta())
        .await
        .expect_err("unknown form");
    assert!(matches!(err, FormVaultError::NotFound { .. }));
    assert_eq!(err.public_message(), "not found");
}

#[tokio::test]
async fn public_answers_are_validated() {
    let vault = vault();
    let (_alice, scope) = tenant(&vault, "alice@example.com").await;
    let fields = vec![
        FieldDef::new("name", FieldKind::ShortText, "Name").required(),
        FieldDef::new("rating", FieldKind::Rating, "Rating"),
    ];
    let (form, _) = published_form(&vault, &scope, fields).await;

    let err = vault
        .submit_public(
            form.id,
            vec![
                Answer::new("name", json!("Visitor")),
                Answer::new("referrer", json!("ads")),
            ],
            meta(),
        )
        .await
        .expect_err("unknown field");
    assert!(matches!(
        err,
        FormVaultError::Consistency(ConsistencyError::UnknownField { ref field_id })
            if field_id == "referrer"
    ));

    let err = vault
        .submit_public(
            form.id,
            vec![
                Answer::new("name", json!("Visitor")),
                Answer::new("rating", json!("five")),
            ],
            meta(),
        )
        .await
        .expect_err("rating must be numeric");
    assert!(matches!(
        err,
        FormVaultError::Consistency(ConsistencyError::InvalidAnswer { .. })
    ));
    assert_eq!(err.http_status(), 422);
}

#[tokio::test]
async fn disabled_service_sessions_refuse_public_traffic() {
    let vault = vault_with(FormVaultConfig::development().with_service_sessions(false));
    let (_alice, scope) = tenant(&vault, "alice@example.com").await;
    let (form, _) = published_form(&vault, &scope, name_field()).await;

    let err = vault
        .submit_public(form.id, vec![Answer::new("name", json!("Visitor"))], meta())
        .await
        .expect_err("service sessions disabled");
    assert!(matches!(
        err,
        FormVaultError::Storage(StorageError::ServiceSessionUnavailable)
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn submissions_racing_a_publish_bind_to_a_whole_version() {
    let vault = Arc::new(vault());
    let (_alice, scope) = tenant(&vault, "alice@example.com").await;
    let (form, v1) = published_form(&vault, &scope, name_field()).await;
    let form_id = form.id;

    let v2 = vault
        .run_scoped(&scope, move |session| {
            let fields = vec![
                FieldDef::new("name", FieldKind::ShortText, "Name").required(),
                FieldDef::new("company", FieldKind::ShortText, "Company"),
            ];
            forms::create_version(session, form_id, fields)
        })
        .await
        .expect("draft v2");

    let barrier = Arc::new(Barrier::new(9));
    let mut submitters = Vec::new();
    for i in 0..8 {
        let vault = Arc::clone(&vault);
        let barrier = Arc::clone(&barrier);
        submitters.push(tokio::spawn(async move {
            barrier.wait().await;
            vault
                .submit_public(
                    form_id,
                    vec![Answer::new("name", json!(format!("visitor-{i}")))],
                    SubmissionMeta::default(),
                )
                .await
        }));
    }
    let publisher = {
        let vault = Arc::clone(&vault);
        let scope = scope.clone();
        let barrier = Arc::clone(&barrier);
        tokio::spawn(async move {
            barrier.wait().await;
            vault
                .run_scoped(&scope, move |session| forms::publish(session, form_id))
                .await
        })
    };

    let published = publisher
        .await
        .expect("publisher task")
        .expect("publish v2");
    assert_eq!(published.published_version_id, Some(v2.id));

    for submitter in submitters {
        let submission = submitter
            .await
            .expect("submitter task")
            .expect("public submission");
        assert!(
            submission.form_version_id == v1.id || submission.form_version_id == v2.id,
            "submission bound to unexpected version {}",
            submission.form_version_id
        );
    }

    let (on_v1, on_v2) = vault
        .run_scoped(&scope, move |session| {
            let v1_rows = submissions::list_for_version(session, v1.id)?;
            let v2_rows = submissions::list_for_version(session, v2.id)?;
            Ok((v1_rows.len(), v2_rows.len()))
        })
        .await
        .expect("count submissions");
    assert_eq!(on_v1 + on_v2, 8);
}
