//! Integration tests for project lifecycle and tenant isolation.

mod common;

use common::{obj, MASTER_KEY};
use serde_json::json;
use strata_store::models::UpdateProject;
use strata_store::query::DocumentQuery;
use strata_store::repos::ProjectRepo;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_projects_are_isolated_stores() {
    let t = common::TestPlatform::new().await;
    let project_a = t.create_project("tenant-a").await;
    let project_b = t.create_project("tenant-b").await;
    t.create_users_collection(project_a).await;
    t.create_users_collection(project_b).await;

    // Same collection name, same unique value, different projects: both
    // succeed because each project owns a separate database.
    for project in [project_a, project_b] {
        t.platform
            .create_document(MASTER_KEY, project, "users", obj(json!({"email": "a@x.com"})))
            .await
            .expect("create failed");
    }

    // Each project sees exactly its own document.
    for project in [project_a, project_b] {
        let docs = t
            .platform
            .list_documents(
                MASTER_KEY,
                project,
                "users",
                DocumentQuery::default(),
                &CancellationToken::new(),
            )
            .await
            .expect("list failed");
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].project_id, project);
    }
}

#[tokio::test]
async fn test_duplicate_project_name_rejected() {
    let t = common::TestPlatform::new().await;
    t.create_project("acme").await;

    let err = t
        .platform
        .create_project(
            MASTER_KEY,
            strata_store::models::CreateProject {
                name: "acme".to_string(),
                settings: serde_json::Map::new(),
            },
        )
        .await
        .expect_err("duplicate name should fail");
    assert_eq!(err.kind(), "duplicate_name");
}

#[tokio::test]
async fn test_suspended_project_refuses_data_operations() {
    let t = common::TestPlatform::new().await;
    let project = t.create_project("acme").await;
    t.create_users_collection(project).await;

    t.platform
        .update_project(
            MASTER_KEY,
            project,
            UpdateProject {
                status: Some("suspended".to_string()),
                ..Default::default()
            },
        )
        .await
        .expect("suspend failed");

    // Authenticated but not authorized while suspended.
    let err = t
        .platform
        .create_document(MASTER_KEY, project, "users", obj(json!({"email": "a@x.com"})))
        .await
        .expect_err("suspended project should refuse writes");
    assert_eq!(err.kind(), "forbidden");

    // The project record itself stays readable for administration.
    let row = t
        .platform
        .get_project(MASTER_KEY, project)
        .await
        .expect("get failed");
    assert_eq!(row.status, "suspended");

    // Reactivation restores service.
    t.platform
        .update_project(
            MASTER_KEY,
            project,
            UpdateProject {
                status: Some("active".to_string()),
                ..Default::default()
            },
        )
        .await
        .expect("reactivate failed");
    t.platform
        .create_document(MASTER_KEY, project, "users", obj(json!({"email": "a@x.com"})))
        .await
        .expect("write after reactivation failed");
}

#[tokio::test]
async fn test_delete_project_removes_store_and_rejects_operations() {
    let t = common::TestPlatform::new().await;
    let project = t.create_project("acme").await;
    t.create_users_collection(project).await;
    t.platform
        .create_document(MASTER_KEY, project, "users", obj(json!({"email": "a@x.com"})))
        .await
        .expect("create failed");

    let db_path = t.platform.config().project_db_path(project);
    assert!(db_path.exists());

    t.platform
        .delete_project(MASTER_KEY, project)
        .await
        .expect("delete failed");

    // The backing store is gone and data operations report not-found.
    assert!(!db_path.exists());
    let err = t
        .platform
        .list_documents(
            MASTER_KEY,
            project,
            "users",
            DocumentQuery::default(),
            &CancellationToken::new(),
        )
        .await
        .expect_err("deleted project should refuse operations");
    assert_eq!(err.kind(), "not_found");

    // The record survives as a tombstone for administration.
    let row = t
        .platform
        .get_project(MASTER_KEY, project)
        .await
        .expect("get failed");
    assert_eq!(row.status, "deleted");
}

#[tokio::test]
async fn test_one_project_outage_does_not_affect_others() {
    let t = common::TestPlatform::new().await;
    let project_a = t.create_project("tenant-a").await;
    let project_b = t.create_project("tenant-b").await;
    t.create_users_collection(project_a).await;
    t.create_users_collection(project_b).await;

    // Simulate project A's storage going away behind the pool's back by
    // deleting it; B keeps working.
    t.platform
        .delete_project(MASTER_KEY, project_a)
        .await
        .expect("delete failed");

    t.platform
        .create_document(MASTER_KEY, project_b, "users", obj(json!({"email": "b@x.com"})))
        .await
        .expect("project B should be unaffected");
}

#[tokio::test]
async fn test_update_project_cannot_sidestep_deletion() {
    let t = common::TestPlatform::new().await;
    let project = t.create_project("acme").await;

    let err = t
        .platform
        .update_project(
            MASTER_KEY,
            project,
            UpdateProject {
                status: Some("deleted".to_string()),
                ..Default::default()
            },
        )
        .await
        .expect_err("status=deleted via update should be rejected");
    assert_eq!(err.kind(), "validation");
}

#[tokio::test]
async fn test_project_settings_round_trip() {
    let t = common::TestPlatform::new().await;

    let mut settings = serde_json::Map::new();
    settings.insert("theme".to_string(), json!("dark"));
    settings.insert("quota_mb".to_string(), json!(512));

    let created = t
        .platform
        .create_project(
            MASTER_KEY,
            strata_store::models::CreateProject {
                name: "acme".to_string(),
                settings: settings.clone(),
            },
        )
        .await
        .expect("create failed");
    assert_eq!(created.settings().unwrap(), settings);

    // Settings are an opaque map; updates replace them wholesale.
    let mut updated = settings.clone();
    updated.insert("theme".to_string(), json!("light"));
    let row = t
        .platform
        .update_project(
            MASTER_KEY,
            created.project_id,
            UpdateProject {
                settings: Some(updated.clone()),
                ..Default::default()
            },
        )
        .await
        .expect("update failed");
    assert_eq!(row.settings().unwrap(), updated);
}

#[tokio::test]
async fn test_recreated_project_name_gets_fresh_store() {
    let t = common::TestPlatform::new().await;
    let project = t.create_project("acme").await;
    t.create_users_collection(project).await;
    t.platform
        .delete_project(MASTER_KEY, project)
        .await
        .expect("delete failed");

    // The tombstoned record still holds the name; a new tenant needs a new
    // name, and gets an empty store.
    let err = t
        .platform
        .create_project(
            MASTER_KEY,
            strata_store::models::CreateProject {
                name: "acme".to_string(),
                settings: serde_json::Map::new(),
            },
        )
        .await
        .expect_err("tombstoned name should still collide");
    assert_eq!(err.kind(), "duplicate_name");

    let fresh = t.create_project("acme-2").await;
    let collections = t
        .platform
        .list_collections(MASTER_KEY, fresh)
        .await
        .expect("list failed");
    assert!(collections.is_empty());
}

#[tokio::test]
async fn test_list_projects_via_repo_matches_facade() {
    let t = common::TestPlatform::new().await;
    t.create_project("a").await;
    t.create_project("b").await;

    let via_facade = t
        .platform
        .list_projects(MASTER_KEY)
        .await
        .expect("facade list failed");
    let via_repo = t
        .platform
        .main_store()
        .list_projects()
        .await
        .expect("repo list failed");

    assert_eq!(via_facade.len(), 2);
    assert_eq!(via_facade.len(), via_repo.len());
}
