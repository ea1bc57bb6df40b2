//! Common test utilities and fixtures.

// Not every test binary touches every helper.
#![allow(dead_code)]

use serde_json::{Map, Value};
use std::sync::Arc;
use strata_core::{FieldDefinition, FieldType, PlatformConfig};
use strata_platform::Platform;
use strata_store::models::{CreateCollection, CreateProject};
use tempfile::TempDir;
use uuid::Uuid;

/// The secret matching `MasterKeyConfig::for_testing()`.
pub const MASTER_KEY: &str = "test-master-key";

/// A platform over a temp directory that cleans up on drop.
pub struct TestPlatform {
    pub platform: Arc<Platform>,
    _temp_dir: TempDir,
}

impl TestPlatform {
    /// Open a fresh platform with the test master key.
    pub async fn new() -> Self {
        // RUST_LOG=debug makes test failures traceable.
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();

        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let config = PlatformConfig::for_testing(temp_dir.path());
        let platform = Platform::open(config).await.expect("Failed to open platform");
        Self {
            platform: Arc::new(platform),
            _temp_dir: temp_dir,
        }
    }

    /// Create a project as the master key and return its id.
    pub async fn create_project(&self, name: &str) -> Uuid {
        self.platform
            .create_project(
                MASTER_KEY,
                CreateProject {
                    name: name.to_string(),
                    settings: Map::new(),
                },
            )
            .await
            .expect("Failed to create project")
            .project_id
    }

    /// Create the standard `users` collection:
    /// `{email: string required unique, age: integer, active: boolean = true}`.
    pub async fn create_users_collection(&self, project_id: Uuid) {
        self.platform
            .create_collection(MASTER_KEY, project_id, users_collection())
            .await
            .expect("Failed to create users collection");
    }
}

/// The standard `users` collection definition.
pub fn users_collection() -> CreateCollection {
    CreateCollection {
        name: "users".to_string(),
        fields: vec![
            FieldDefinition::new("email", FieldType::String)
                .required()
                .unique(),
            FieldDefinition::new("age", FieldType::Integer),
            FieldDefinition::new("active", FieldType::Boolean)
                .with_default(Value::Bool(true)),
        ],
        indexes: vec![],
        open_schema: false,
    }
}

/// Build a JSON object map from a `serde_json::json!` literal.
pub fn obj(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => panic!("expected a JSON object"),
    }
}
