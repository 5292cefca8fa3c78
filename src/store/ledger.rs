//! Forward ledger — idempotent per-(source, destination) delivery record.
//!
//! Keyed by `"{canonical source}_to_{canonical destination}"`. Each key holds
//! the set of delivered message ids, a running count, and a last-update
//! timestamp. Append-only per key.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::RwLock;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::channel::normalize_channel_id;
use crate::error::StoreError;

/// Persisted record for one source→destination pair.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelRecord {
    pub forwarded_messages: Vec<String>,
    pub total_count: u64,
    pub last_update: String,
    /// In-memory shadow of `forwarded_messages` for O(1) membership.
    #[serde(skip)]
    id_set: HashSet<String>,
}

impl ChannelRecord {
    fn rebuild_index(&mut self) {
        self.id_set = self.forwarded_messages.iter().cloned().collect();
    }
}

/// Persisted idempotence ledger.
pub struct ForwardLedger {
    path: PathBuf,
    state: RwLock<HashMap<String, ChannelRecord>>,
}

/// Ledger key for a source/destination pair.
pub fn ledger_key(source: &str, destination: &str) -> String {
    format!(
        "{}_to_{}",
        normalize_channel_id(source),
        normalize_channel_id(destination)
    )
}

impl ForwardLedger {
    /// Load the ledger from disk. A missing or malformed file starts empty
    /// with a warning rather than failing the run.
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut state = match tokio::fs::read_to_string(&path).await {
            Ok(body) if !body.trim().is_empty() => {
                match serde_json::from_str::<HashMap<String, ChannelRecord>>(&body) {
                    Ok(map) => map,
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "Malformed ledger file, starting empty");
                        HashMap::new()
                    }
                }
            }
            Ok(_) => HashMap::new(),
            Err(_) => HashMap::new(),
        };
        for record in state.values_mut() {
            record.rebuild_index();
        }
        debug!(path = %path.display(), pairs = state.len(), "Forward ledger loaded");
        Self {
            path,
            state: RwLock::new(state),
        }
    }

    /// O(1) membership test for a (source, destination, message id) triple.
    pub fn already_forwarded(&self, source: &str, destination: &str, msg_id: &str) -> bool {
        let key = ledger_key(source, destination);
        self.state
            .read()
            .expect("ledger lock poisoned")
            .get(&key)
            .is_some_and(|r| r.id_set.contains(msg_id))
    }

    /// Record a delivery: insert the id, bump the count, stamp the time, and
    /// persist the full state. Recording an already-present id is a no-op.
    /// Durable before this returns.
    pub async fn record(
        &self,
        source: &str,
        destination: &str,
        msg_id: &str,
    ) -> Result<(), StoreError> {
        let key = ledger_key(source, destination);
        {
            let mut state = self.state.write().expect("ledger lock poisoned");
            let record = state.entry(key).or_default();
            if !record.id_set.insert(msg_id.to_string()) {
                return Ok(());
            }
            record.forwarded_messages.push(msg_id.to_string());
            record.total_count += 1;
            record.last_update = Utc::now().to_rfc3339();
        }
        self.flush().await
    }

    /// Rewrite the persisted file from the in-memory state.
    pub async fn flush(&self) -> Result<(), StoreError> {
        let snapshot = self.state.read().expect("ledger lock poisoned").clone();
        super::write_json(&self.path, &snapshot).await
    }

    /// Total deliveries recorded for one pair.
    pub fn count(&self, source: &str, destination: &str) -> u64 {
        let key = ledger_key(source, destination);
        self.state
            .read()
            .expect("ledger lock poisoned")
            .get(&key)
            .map_or(0, |r| r.total_count)
    }
}
