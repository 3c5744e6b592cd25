use std::env;

use serde_json::{Map, Value};

use trailguard_application::ConfigSnapshotSource;

/// Configuration snapshot source reading a fixed set of environment
/// variables.
///
/// Only non-secret keys belong here; the snapshot is diffed and captured
/// verbatim by the system monitor.
#[derive(Debug, Clone)]
pub struct EnvSnapshotSource {
    keys: Vec<String>,
}

impl EnvSnapshotSource {
    /// Creates a source observing the given environment variables.
    #[must_use]
    pub fn new(keys: Vec<String>) -> Self {
        Self { keys }
    }
}

impl ConfigSnapshotSource for EnvSnapshotSource {
    fn snapshot(&self) -> Map<String, Value> {
        let mut snapshot = Map::new();
        for key in &self.keys {
            if let Ok(value) = env::var(key.as_str()) {
                snapshot.insert(key.clone(), Value::String(value));
            }
        }
        snapshot
    }
}
