//! Ad filter — keyword, pattern, link-count, and length heuristics.

use regex::Regex;

use crate::config::AdFilterConfig;
use crate::error::ConfigError;

/// Built-in link pattern. Links are counted, not matched-to-drop; configured
/// patterns are the drop-on-match set.
const LINK_PATTERN: &str = r"https?://[^\s]+";

/// First-stage filter for promotional content.
pub struct AdFilter {
    enabled: bool,
    /// Lowercased keywords, matched as case-insensitive substrings.
    keywords: Vec<String>,
    /// Non-link patterns; any match drops the message.
    patterns: Vec<Regex>,
    link_re: Regex,
    min_message_length: usize,
    max_links_per_message: usize,
}

impl AdFilter {
    /// Build from configuration. Fails on an invalid configured pattern.
    pub fn from_config(cfg: &AdFilterConfig) -> Result<Self, ConfigError> {
        let patterns = cfg
            .patterns
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|source| ConfigError::BadPattern {
                    pattern: p.clone(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            enabled: cfg.enabled,
            keywords: cfg.keywords.iter().map(|k| k.to_lowercase()).collect(),
            patterns,
            link_re: Regex::new(LINK_PATTERN).expect("built-in link pattern is valid"),
            min_message_length: cfg.min_message_length,
            max_links_per_message: cfg.max_links_per_message,
        })
    }

    /// Evaluate the text. Returns a reason when the message should be dropped
    /// as an ad, `None` otherwise. Media presence exempts only the
    /// short-text check.
    pub fn matches(&self, text: &str, has_media: bool) -> Option<&'static str> {
        if !self.enabled || text.is_empty() {
            return None;
        }

        let lower = text.to_lowercase();
        if self.keywords.iter().any(|k| lower.contains(k.as_str())) {
            return Some("keyword");
        }

        if self.patterns.iter().any(|p| p.is_match(text)) {
            return Some("pattern");
        }

        if self.link_re.find_iter(text).count() > self.max_links_per_message {
            return Some("too many links");
        }

        if text.trim().chars().count() < self.min_message_length && !has_media {
            return Some("too short");
        }

        None
    }
}
