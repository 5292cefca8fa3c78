//! Channel identity normalization.
//!
//! Heterogeneous channel identifiers (bare numeric ids, `-100`-prefixed ids,
//! `@handles`, invite links) are collapsed into one canonical key form that
//! the ledger and dedup store use for persistence. Handles and links stay
//! opaque here; the platform client resolves them to numeric ids before
//! first use.

/// Canonical prefix for supergroup/channel ids.
const CANONICAL_PREFIX: &str = "-100";

/// Normalize a raw channel identifier into the canonical key form.
///
/// - Already `-100`-prefixed → unchanged.
/// - Bare positive numeric id → `-100` prefix applied.
/// - Anything else (handle, link, malformed) → returned as an opaque key.
///
/// Never fails; malformed input is re-resolved by the platform client.
pub fn normalize_channel_id(raw: &str) -> String {
    let raw = raw.trim();
    if raw.starts_with(CANONICAL_PREFIX) {
        return raw.to_string();
    }
    if let Ok(n) = raw.parse::<i64>() {
        if n > 0 {
            return format!("{CANONICAL_PREFIX}{n}");
        }
    }
    raw.to_string()
}

/// A resolved channel: the raw identifier it was configured as, the canonical
/// id used as the persistence key, and a display name for logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelEntity {
    pub raw: String,
    pub canonical_id: String,
    pub display_name: String,
}

impl ChannelEntity {
    pub fn new(raw: impl Into<String>, canonical_id: impl Into<String>) -> Self {
        let raw = raw.into();
        let canonical_id = canonical_id.into();
        Self {
            display_name: raw.clone(),
            raw,
            canonical_id,
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_form_unchanged() {
        assert_eq!(normalize_channel_id("-1001234567890"), "-1001234567890");
    }

    #[test]
    fn bare_positive_id_gets_prefix() {
        assert_eq!(normalize_channel_id("1234567890"), "-1001234567890");
    }

    #[test]
    fn negative_non_canonical_id_is_opaque() {
        assert_eq!(normalize_channel_id("-12345"), "-12345");
    }

    #[test]
    fn handle_is_opaque() {
        assert_eq!(normalize_channel_id("@some_channel"), "@some_channel");
    }

    #[test]
    fn link_is_opaque() {
        assert_eq!(
            normalize_channel_id("https://t.me/some_channel"),
            "https://t.me/some_channel"
        );
    }

    #[test]
    fn whitespace_is_trimmed() {
        assert_eq!(normalize_channel_id("  42 "), "-10042");
    }

    #[test]
    fn zero_is_opaque() {
        assert_eq!(normalize_channel_id("0"), "0");
    }
}
