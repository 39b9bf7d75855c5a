//! Common test utilities for integration tests.

#![allow(dead_code)]

use std::path::PathBuf;

use anyhow::Result;
use satchel_session::{SessionStore, StoreConfig};
use tempfile::TempDir;

pub const SECRET: &str = "integration-secret";

/// Install a log subscriber once, honouring `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A store over a database file in its own temporary directory.
pub struct TestStore {
    pub store: SessionStore,
    pub path: PathBuf,
    /// Keeps the directory alive for the lifetime of the store.
    pub temp_dir: TempDir,
}

impl TestStore {
    pub fn open() -> Result<Self> {
        Self::open_with(StoreConfig::new(SECRET))
    }

    pub fn open_with(config: StoreConfig) -> Result<Self> {
        init_tracing();
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("sessions.db");
        let store = SessionStore::open(&path, config)?;
        Ok(Self {
            store,
            path,
            temp_dir,
        })
    }

    /// Open a second store over the same file.
    pub fn reopen(&self, config: StoreConfig) -> Result<SessionStore> {
        Ok(SessionStore::open(&self.path, config)?)
    }
}
