//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Platform configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlatformConfig {
    /// Root directory for all database files. The main database lives at
    /// `<data_dir>/main.db`, project databases under `<data_dir>/projects/`.
    pub data_dir: PathBuf,
    /// SQLite busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// Connection acquire timeout in milliseconds. Bounds how long `acquire`
    /// on an unreachable backing store may block.
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
    /// Default session lifetime in seconds.
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,
    /// Master key bootstrap. Required for a usable deployment: without it the
    /// platform starts with no credential able to create projects.
    #[serde(default)]
    pub master_key: Option<MasterKeyConfig>,
}

fn default_busy_timeout_ms() -> u64 {
    crate::DEFAULT_BUSY_TIMEOUT_MS
}

fn default_acquire_timeout_ms() -> u64 {
    crate::DEFAULT_ACQUIRE_TIMEOUT_MS
}

fn default_session_ttl_secs() -> u64 {
    crate::DEFAULT_SESSION_TTL_SECS
}

impl PlatformConfig {
    /// Configuration rooted at `data_dir` with defaults everywhere else.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            busy_timeout_ms: default_busy_timeout_ms(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
            session_ttl_secs: default_session_ttl_secs(),
            master_key: None,
        }
    }

    /// Create a test configuration with the test master key.
    ///
    /// **For testing only.** The matching secret is `test-master-key`.
    pub fn for_testing(data_dir: impl Into<PathBuf>) -> Self {
        let mut config = Self::new(data_dir);
        config.master_key = Some(MasterKeyConfig::for_testing());
        config
    }

    /// Path of the main database file.
    pub fn main_db_path(&self) -> PathBuf {
        self.data_dir.join("main.db")
    }

    /// Path of a project's database file.
    pub fn project_db_path(&self, project_id: Uuid) -> PathBuf {
        self.data_dir
            .join("projects")
            .join(format!("{}.db", project_id.simple()))
    }

    /// Validate configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        if self.acquire_timeout_ms == 0 {
            return Err("acquire_timeout_ms must be greater than zero".to_string());
        }
        if let Some(master) = &self.master_key {
            master.validate()?;
        }
        Ok(())
    }
}

/// Master key configuration.
///
/// The master key provides initial access to create projects and further
/// credentials. Only its SHA-256 hash is configured; if the hash changes
/// between restarts, the previous master key record is revoked and replaced.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MasterKeyConfig {
    /// Pre-computed hash of the master key (SHA-256 hex, 64 characters).
    /// Generate with: `echo -n "your-secret-key" | sha256sum`
    pub key_hash: String,
    /// Description for the master key record.
    pub description: Option<String>,
}

impl MasterKeyConfig {
    /// Create a test configuration with a known key hash.
    ///
    /// **For testing only.** The hash is the SHA-256 of `test-master-key`.
    pub fn for_testing() -> Self {
        Self {
            key_hash: "94fc76f664e808de8653e045387d082caa15dd8092ec07f3d9f6c1d82056c97d"
                .to_string(),
            description: Some("Test master key".to_string()),
        }
    }

    /// Validate the configured hash shape.
    pub fn validate(&self) -> Result<(), String> {
        if self.key_hash.len() != 64 || !self.key_hash.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err("master key_hash must be a 64-character SHA-256 hex digest".to_string());
        }
        Ok(())
    }
}
