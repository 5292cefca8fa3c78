//! Persistence layer — human-readable JSON files, fully rewritten on every
//! mutation. Simplicity and crash-consistency over write amplification: state
//! is durable before the mutating call returns.

pub mod dedup;
pub mod ledger;

pub use dedup::{DedupStore, fingerprint};
pub use ledger::{ForwardLedger, ledger_key};

use std::path::Path;

use serde::Serialize;

use crate::error::StoreError;

/// Serialize `value` and rewrite `path` with it.
pub(crate) async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let body =
        serde_json::to_string_pretty(value).map_err(|source| StoreError::Serialize {
            path: path.display().to_string(),
            source,
        })?;
    tokio::fs::write(path, body)
        .await
        .map_err(|source| StoreError::Write {
            path: path.display().to_string(),
            source,
        })
}
