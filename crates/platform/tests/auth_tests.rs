//! Integration tests for credential resolution and the authorization gate.

mod common;

use common::{obj, MASTER_KEY};
use serde_json::json;
use strata_core::{ApiKeyKind, Scope};
use strata_platform::{NewApiKey, NewSession};
use strata_store::query::DocumentQuery;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

fn scopes(names: &[&str]) -> Vec<Scope> {
    names.iter().map(|s| Scope::parse(s).unwrap()).collect()
}

#[tokio::test]
async fn test_project_key_scope_and_project_mismatch_scenario() {
    let t = common::TestPlatform::new().await;
    let project_p = t.create_project("p").await;
    let project_q = t.create_project("q").await;
    t.create_users_collection(project_p).await;
    t.create_users_collection(project_q).await;

    let key = t
        .platform
        .create_api_key(
            MASTER_KEY,
            NewApiKey {
                kind: ApiKeyKind::Project,
                project_id: Some(project_p),
                scopes: scopes(&["documents:read"]),
                expires_in_secs: None,
                description: None,
            },
        )
        .await
        .expect("create key failed");

    // documents:read on P works.
    t.platform
        .list_documents(
            &key.secret,
            project_p,
            "users",
            DocumentQuery::default(),
            &CancellationToken::new(),
        )
        .await
        .expect("read on own project should work");

    // documents:write on P is denied: read never implies write.
    let err = t
        .platform
        .create_document(&key.secret, project_p, "users", obj(json!({"email": "a@x.com"})))
        .await
        .expect_err("write should be denied");
    assert_eq!(err.kind(), "forbidden");

    // documents:read on Q is denied despite the action being granted:
    // the credential is scoped to a different project.
    let err = t
        .platform
        .list_documents(
            &key.secret,
            project_q,
            "users",
            DocumentQuery::default(),
            &CancellationToken::new(),
        )
        .await
        .expect_err("cross-project read should be denied");
    assert_eq!(err.kind(), "forbidden");
}

#[tokio::test]
async fn test_admin_key_reaches_any_project() {
    let t = common::TestPlatform::new().await;
    let project_p = t.create_project("p").await;
    let project_q = t.create_project("q").await;
    t.create_users_collection(project_p).await;
    t.create_users_collection(project_q).await;

    let key = t
        .platform
        .create_api_key(
            MASTER_KEY,
            NewApiKey {
                kind: ApiKeyKind::Admin,
                project_id: None,
                scopes: scopes(&["documents:read", "documents:write"]),
                expires_in_secs: None,
                description: Some("cross-project worker".to_string()),
            },
        )
        .await
        .expect("create key failed");

    for project in [project_p, project_q] {
        t.platform
            .create_document(
                &key.secret,
                project,
                "users",
                obj(json!({"email": format!("{project}@x.com")})),
            )
            .await
            .expect("admin write should work");
    }
}

#[tokio::test]
async fn test_unknown_and_malformed_credentials_rejected() {
    let t = common::TestPlatform::new().await;

    let err = t
        .platform
        .list_projects("not-a-real-credential")
        .await
        .expect_err("unknown credential should fail");
    assert_eq!(err.kind(), "invalid_credential");

    let err = t
        .platform
        .list_projects("")
        .await
        .expect_err("empty credential should fail");
    assert_eq!(err.kind(), "invalid_credential");
}

#[tokio::test]
async fn test_revoked_api_key_rejected() {
    let t = common::TestPlatform::new().await;
    let project = t.create_project("p").await;

    let key = t
        .platform
        .create_api_key(
            MASTER_KEY,
            NewApiKey {
                kind: ApiKeyKind::Project,
                project_id: Some(project),
                scopes: scopes(&["collections:read"]),
                expires_in_secs: None,
                description: None,
            },
        )
        .await
        .expect("create key failed");

    t.platform
        .list_collections(&key.secret, project)
        .await
        .expect("key should work before revocation");

    t.platform
        .revoke_api_key(MASTER_KEY, key.record.api_key_id)
        .await
        .expect("revoke failed");

    let err = t
        .platform
        .list_collections(&key.secret, project)
        .await
        .expect_err("revoked key should fail");
    assert_eq!(err.kind(), "invalid_credential");
}

#[tokio::test]
async fn test_expired_session_rejected() {
    let t = common::TestPlatform::new().await;
    let project = t.create_project("p").await;

    let session = t
        .platform
        .create_session(
            MASTER_KEY,
            NewSession {
                principal_id: Uuid::new_v4(),
                project_id: Some(project),
                scopes: scopes(&["collections:read"]),
                ttl_secs: Some(0),
                one_time: false,
            },
        )
        .await
        .expect("create session failed");

    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    let err = t
        .platform
        .list_collections(&session.token, project)
        .await
        .expect_err("expired session should fail");
    assert_eq!(err.kind(), "invalid_credential");
}

#[tokio::test]
async fn test_session_revocation_is_logout() {
    let t = common::TestPlatform::new().await;
    let project = t.create_project("p").await;

    let session = t
        .platform
        .create_session(
            MASTER_KEY,
            NewSession {
                principal_id: Uuid::new_v4(),
                project_id: Some(project),
                scopes: scopes(&["collections:read"]),
                ttl_secs: None,
                one_time: false,
            },
        )
        .await
        .expect("create session failed");

    t.platform
        .list_collections(&session.token, project)
        .await
        .expect("session should work before logout");

    t.platform
        .revoke_session(MASTER_KEY, session.record.session_id)
        .await
        .expect("revoke failed");

    let err = t
        .platform
        .list_collections(&session.token, project)
        .await
        .expect_err("revoked session should fail");
    assert_eq!(err.kind(), "invalid_credential");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_one_time_session_single_winner_under_concurrency() {
    let t = common::TestPlatform::new().await;
    let project = t.create_project("p").await;

    let session = t
        .platform
        .create_session(
            MASTER_KEY,
            NewSession {
                principal_id: Uuid::new_v4(),
                project_id: Some(project),
                scopes: scopes(&["projects:read"]),
                ttl_secs: None,
                one_time: true,
            },
        )
        .await
        .expect("create session failed");

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let platform = t.platform.clone();
            let token = session.token.clone();
            tokio::spawn(async move { platform.get_project(&token, project).await })
        })
        .collect();

    let mut successes = 0;
    for task in tasks {
        if task.await.expect("task panicked").is_ok() {
            successes += 1;
        }
    }
    // At most one caller observes success; the consumption check-and-mark
    // is atomic with the lookup.
    assert_eq!(successes, 1);

    // And the token stays dead for all later attempts.
    let err = t
        .platform
        .get_project(&session.token, project)
        .await
        .expect_err("consumed session should fail");
    assert_eq!(err.kind(), "invalid_credential");
}

#[tokio::test]
async fn test_scope_escalation_via_minting_is_blocked() {
    let t = common::TestPlatform::new().await;
    let project = t.create_project("p").await;

    // A project key holding only api_keys:write for its project.
    let key = t
        .platform
        .create_api_key(
            MASTER_KEY,
            NewApiKey {
                kind: ApiKeyKind::Project,
                project_id: Some(project),
                scopes: scopes(&["api_keys:write"]),
                expires_in_secs: None,
                description: None,
            },
        )
        .await
        .expect("create key failed");

    // It cannot mint a key with scopes it does not hold.
    let err = t
        .platform
        .create_api_key(
            &key.secret,
            NewApiKey {
                kind: ApiKeyKind::Project,
                project_id: Some(project),
                scopes: scopes(&["documents:write"]),
                expires_in_secs: None,
                description: None,
            },
        )
        .await
        .expect_err("escalation should be blocked");
    assert_eq!(err.kind(), "forbidden");

    // And never a master key.
    let err = t
        .platform
        .create_api_key(
            &key.secret,
            NewApiKey {
                kind: ApiKeyKind::Master,
                project_id: None,
                scopes: vec![Scope::Master],
                expires_in_secs: None,
                description: None,
            },
        )
        .await
        .expect_err("minting master should be blocked");
    assert_eq!(err.kind(), "forbidden");
}

#[tokio::test]
async fn test_project_scoped_key_cannot_list_all_projects() {
    let t = common::TestPlatform::new().await;
    let project = t.create_project("p").await;

    let key = t
        .platform
        .create_api_key(
            MASTER_KEY,
            NewApiKey {
                kind: ApiKeyKind::Project,
                project_id: Some(project),
                scopes: scopes(&["projects:read"]),
                expires_in_secs: None,
                description: None,
            },
        )
        .await
        .expect("create key failed");

    // It can read its own project...
    t.platform
        .get_project(&key.secret, project)
        .await
        .expect("own project read should work");

    // ...but not the global listing.
    let err = t
        .platform
        .list_projects(&key.secret)
        .await
        .expect_err("global listing should be denied");
    assert_eq!(err.kind(), "forbidden");
}

#[tokio::test]
async fn test_key_usage_is_recorded_best_effort() {
    let t = common::TestPlatform::new().await;
    let project = t.create_project("p").await;

    let key = t
        .platform
        .create_api_key(
            MASTER_KEY,
            NewApiKey {
                kind: ApiKeyKind::Project,
                project_id: Some(project),
                scopes: scopes(&["collections:read"]),
                expires_in_secs: None,
                description: None,
            },
        )
        .await
        .expect("create key failed");

    t.platform
        .list_collections(&key.secret, project)
        .await
        .expect("list failed");

    // Usage is recorded off the request path; give the task a moment.
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    let keys = t
        .platform
        .list_api_keys(MASTER_KEY, Some(project))
        .await
        .expect("list keys failed");
    let record = keys
        .iter()
        .find(|k| k.api_key_id == key.record.api_key_id)
        .expect("key not found");
    assert!(record.usage_count >= 1);
    assert!(record.last_used_at.is_some());
}
