//! Error types for tg-relay.

use std::time::Duration;

/// Top-level error type for the relay service.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Client error: {0}")]
    Client(#[from] ClientError),
}

/// Configuration-related errors. All fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },

    #[error("Invalid configuration: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("Invalid filter pattern {pattern:?}: {source}")]
    BadPattern {
        pattern: String,
        source: regex::Error,
    },

    #[error("No enabled accounts in the pool")]
    NoEnabledAccounts,
}

/// Persistence errors for the ledger and dedup store.
///
/// Non-fatal at runtime: the in-memory state stays authoritative and the
/// next successful write restores durability.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Failed to write {path}: {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to serialize state for {path}: {source}")]
    Serialize {
        path: String,
        source: serde_json::Error,
    },
}

/// Platform client errors outside the per-message delivery path.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Connect failed for account {account}: {reason}")]
    ConnectFailed { account: String, reason: String },

    #[error("Entity resolution failed for {raw:?}: {reason}")]
    ResolveFailed { raw: String, reason: String },
}

/// Typed delivery signals from the platform client.
///
/// The delivery engine branches on these: rate limits wait-and-retry outside
/// the retry budget, permission denials abandon immediately, everything else
/// gets bounded retries.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("Rate limited, server requires a {retry_after:?} wait")]
    RateLimited { retry_after: Duration },

    #[error("Permission denied for destination {destination}")]
    PermissionDenied { destination: String },

    #[error("Authentication failed: {reason}")]
    AuthFailed { reason: String },

    #[error("Connection lost: {reason}")]
    ConnectionLost { reason: String },

    #[error("Send failed: {reason}")]
    Other { reason: String },
}

/// Result type alias for the relay.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_error_display_includes_wait() {
        let e = SendError::RateLimited {
            retry_after: Duration::from_secs(30),
        };
        assert!(e.to_string().contains("30"));
    }

    #[test]
    fn validation_error_joins_all_problems() {
        let e = ConfigError::Validation(vec!["no accounts".into(), "no source channels".into()]);
        let s = e.to_string();
        assert!(s.contains("no accounts"));
        assert!(s.contains("no source channels"));
    }
}
