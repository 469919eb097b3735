// crates/server/src/jobs/secret_store.rs
//! Per-job in-memory secret sets.
//!
//! Written once at job creation, read by every mask of that job's output,
//! removed exactly once when the job reaches a terminal state or is
//! canceled. Never persisted.

use std::collections::HashMap;
use std::sync::Mutex;

pub struct SecretStore {
    inner: Mutex<HashMap<String, Vec<String>>>,
}

impl SecretStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    pub fn insert(&self, job_id: &str, secrets: Vec<String>) {
        if secrets.is_empty() {
            return;
        }
        match self.inner.lock() {
            Ok(mut map) => {
                map.insert(job_id.to_string(), secrets);
            }
            Err(e) => tracing::error!("secret store lock poisoned on insert: {e}"),
        }
    }

    pub fn get(&self, job_id: &str) -> Vec<String> {
        match self.inner.lock() {
            Ok(map) => map.get(job_id).cloned().unwrap_or_default(),
            Err(e) => {
                tracing::error!("secret store lock poisoned on get: {e}");
                Vec::new()
            }
        }
    }

    pub fn remove(&self, job_id: &str) {
        match self.inner.lock() {
            Ok(mut map) => {
                map.remove(job_id);
            }
            Err(e) => tracing::error!("secret store lock poisoned on remove: {e}"),
        }
    }
}

impl Default for SecretStore {
    fn default() -> Self {
        Self::new()
    }
}
