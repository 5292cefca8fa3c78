//! Content-fingerprint deduplication store.
//!
//! A persisted membership set keyed by a digest of the message's canonical
//! content representation. Append-only: entries are never removed or updated
//! once inserted.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::message::{Message, MessageContent};

/// Compute the content fingerprint for a message.
///
/// Media digests over the platform-native media id, text over the
/// whitespace/case-normalized body, and empty content over the message id so
/// two distinct empty messages never collide.
pub fn fingerprint(message: &Message) -> String {
    let input = match &message.content {
        MessageContent::Media { kind, native_id, .. } => {
            format!("{}:{}", kind.label(), native_id)
        }
        MessageContent::Text(text) => format!("text:{}", normalize_text(text)),
        MessageContent::Empty => format!("empty:{}", message.id),
    };
    format!("{:x}", Sha256::digest(input.as_bytes()))
}

/// Trim, collapse internal whitespace runs to one space, lowercase.
fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// One persisted dedup entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupEntry {
    /// Seconds since the epoch at first sighting.
    pub timestamp: f64,
    /// Where the content was first seen, for operators reading the file.
    pub source: String,
}

/// Persisted fingerprint membership store.
pub struct DedupStore {
    path: PathBuf,
    enabled: bool,
    entries: RwLock<HashMap<String, DedupEntry>>,
}

impl DedupStore {
    /// Load the store from disk. A missing or malformed file starts empty
    /// with a warning rather than failing the run.
    pub async fn load(path: impl Into<PathBuf>, enabled: bool) -> Self {
        let path = path.into();
        let entries = match tokio::fs::read_to_string(&path).await {
            Ok(body) if !body.trim().is_empty() => {
                match serde_json::from_str::<HashMap<String, DedupEntry>>(&body) {
                    Ok(map) => map,
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "Malformed dedup file, starting empty");
                        HashMap::new()
                    }
                }
            }
            Ok(_) => HashMap::new(),
            Err(_) => HashMap::new(),
        };
        debug!(path = %path.display(), entries = entries.len(), "Dedup store loaded");
        Self {
            path,
            enabled,
            entries: RwLock::new(entries),
        }
    }

    /// Pure membership test. Always false when deduplication is disabled.
    pub fn is_duplicate(&self, fp: &str) -> bool {
        if !self.enabled {
            return false;
        }
        self.entries.read().expect("dedup lock poisoned").contains_key(fp)
    }

    /// Insert and persist a fingerprint. Inserting an existing fingerprint is
    /// a no-op, not an error. Durable before this returns.
    pub async fn record(&self, fp: &str, source: &str) -> Result<(), StoreError> {
        if !self.enabled {
            return Ok(());
        }
        {
            let mut entries = self.entries.write().expect("dedup lock poisoned");
            if entries.contains_key(fp) {
                return Ok(());
            }
            entries.insert(
                fp.to_string(),
                DedupEntry {
                    timestamp: Utc::now().timestamp_millis() as f64 / 1000.0,
                    source: source.to_string(),
                },
            );
        }
        self.flush().await
    }

    /// Rewrite the persisted file from the in-memory state.
    pub async fn flush(&self) -> Result<(), StoreError> {
        let snapshot = self.entries.read().expect("dedup lock poisoned").clone();
        super::write_json(&self.path, &snapshot).await
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("dedup lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MediaKind;

    fn text_msg(id: &str, text: &str) -> Message {
        Message::text(id, "-1001", text)
    }

    #[test]
    fn whitespace_and_case_normalize_to_same_fingerprint() {
        let a = fingerprint(&text_msg("1", "Hello World"));
        let b = fingerprint(&text_msg("2", "hello   world"));
        assert_eq!(a, b);
    }

    #[test]
    fn different_text_different_fingerprint() {
        let a = fingerprint(&text_msg("1", "hello world"));
        let b = fingerprint(&text_msg("2", "hello worlds"));
        assert_ne!(a, b);
    }

    #[test]
    fn media_fingerprint_uses_native_id_not_caption() {
        let a = fingerprint(
            &Message::media("1", "-1001", MediaKind::Photo, "p42").with_caption("first post"),
        );
        let b = fingerprint(
            &Message::media("2", "-1002", MediaKind::Photo, "p42").with_caption("repost!"),
        );
        assert_eq!(a, b);
    }

    #[test]
    fn media_kind_distinguishes_same_native_id() {
        let a = fingerprint(&Message::media("1", "-1001", MediaKind::Photo, "42"));
        let b = fingerprint(&Message::media("1", "-1001", MediaKind::Video, "42"));
        assert_ne!(a, b);
    }

    #[test]
    fn distinct_empty_messages_never_collide() {
        let a = fingerprint(&Message::empty("100", "-1001"));
        let b = fingerprint(&Message::empty("101", "-1001"));
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn record_is_idempotent_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dedup.json");
        let store = DedupStore::load(&path, true).await;

        store.record("abc123", "chan(-1001)").await.unwrap();
        store.record("abc123", "chan(-1002)").await.unwrap();
        assert_eq!(store.len(), 1);
        assert!(store.is_duplicate("abc123"));

        // Reload from disk and confirm durability.
        let reloaded = DedupStore::load(&path, true).await;
        assert!(reloaded.is_duplicate("abc123"));
        assert_eq!(reloaded.len(), 1);
    }

    #[tokio::test]
    async fn disabled_store_reports_nothing_as_duplicate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dedup.json");
        let store = DedupStore::load(&path, false).await;
        store.record("abc", "src").await.unwrap();
        assert!(!store.is_duplicate("abc"));
    }

    #[tokio::test]
    async fn malformed_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dedup.json");
        tokio::fs::write(&path, "{not json").await.unwrap();
        let store = DedupStore::load(&path, true).await;
        assert!(store.is_empty());
    }
}
