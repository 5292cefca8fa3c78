//! Content-quality filter — meaningless-word, repetition, and symbol-ratio
//! heuristics.
//!
//! Media presence is an unconditional override: a message carrying media is
//! never dropped by this stage, whatever its caption looks like.

use std::collections::{HashMap, HashSet};

use crate::config::QualityFilterConfig;

/// CJK punctuation that counts as meaningful rather than as symbols.
const CJK_PUNCTUATION: &str = "，。！？；：“”‘’（）【】《》";

/// Share of the text the most frequent character must exceed before the
/// repeat-run check drops a message.
const REPEAT_DOMINANCE: f64 = 0.6;

/// Second-stage filter for low-signal content.
pub struct QualityFilter {
    enabled: bool,
    /// Lowercased words compared against the trimmed, lowercased text.
    meaningless_words: HashSet<String>,
    max_repeat_chars: usize,
    min_meaningful_length: usize,
    max_symbol_ratio: f64,
}

impl QualityFilter {
    pub fn from_config(cfg: &QualityFilterConfig) -> Self {
        Self {
            enabled: cfg.enabled,
            meaningless_words: cfg
                .meaningless_words
                .iter()
                .map(|w| w.to_lowercase())
                .collect(),
            max_repeat_chars: cfg.max_repeat_chars,
            min_meaningful_length: cfg.min_meaningful_length,
            max_symbol_ratio: cfg.max_symbol_ratio,
        }
    }

    /// Evaluate the text. Returns a reason when the message should be dropped
    /// as low-quality, `None` otherwise.
    pub fn matches(&self, text: &str, has_media: bool) -> Option<&'static str> {
        if !self.enabled || has_media {
            return None;
        }
        let text = text.trim();
        if text.is_empty() {
            return None;
        }

        if self.meaningless_words.contains(&text.to_lowercase()) {
            return Some("meaningless word");
        }

        let chars: Vec<char> = text.chars().collect();
        let total = chars.len();

        if total > 1 {
            let mut counts: HashMap<char, usize> = HashMap::new();
            for &c in &chars {
                *counts.entry(c).or_insert(0) += 1;
            }
            let max_count = counts.values().copied().max().unwrap_or(0);
            if max_count > self.max_repeat_chars
                && max_count as f64 / total as f64 > REPEAT_DOMINANCE
            {
                return Some("repeated characters");
            }
        }

        let symbol_count = chars
            .iter()
            .filter(|c| !c.is_ascii() && !CJK_PUNCTUATION.contains(**c))
            .count();
        if symbol_count as f64 / total as f64 > self.max_symbol_ratio {
            return Some("symbol ratio");
        }

        let meaningful = chars
            .iter()
            .filter(|c| c.is_alphanumeric() || CJK_PUNCTUATION.contains(**c))
            .count();
        if meaningful < self.min_meaningful_length {
            return Some("too little meaningful content");
        }

        let distinct: HashSet<char> = chars.iter().filter(|c| !c.is_whitespace()).copied().collect();
        if distinct.len() <= 1 && total > 1 {
            return Some("single repeated character");
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter() -> QualityFilter {
        QualityFilter::from_config(&QualityFilterConfig {
            enabled: true,
            meaningless_words: vec!["ok".into(), "嗯".into(), "+1".into()],
            max_repeat_chars: 3,
            min_meaningful_length: 5,
            max_symbol_ratio: 0.5,
        })
    }

    #[test]
    fn meaningless_word_case_insensitive() {
        let f = filter();
        assert_eq!(f.matches("OK", false), Some("meaningless word"));
        assert_eq!(f.matches("  ok  ", false), Some("meaningless word"));
    }

    #[test]
    fn media_overrides_every_condition() {
        let f = filter();
        assert_eq!(f.matches("ok", true), None);
        assert_eq!(f.matches("aaaaaaaa", true), None);
        assert_eq!(f.matches("😂😂😂😂", true), None);
    }

    #[test]
    fn repeated_character_run_drops() {
        let f = filter();
        // 8 of 8 chars the same: over max_repeat_chars and over 60% share.
        assert_eq!(f.matches("hhhhhhhh", false), Some("repeated characters"));
    }

    #[test]
    fn repeats_below_dominance_pass_the_repeat_check() {
        let f = filter();
        // 'l' appears 8 times out of 25 — over the repeat count but under 60%.
        assert_eq!(f.matches("hello all, well well done", false), None);
    }

    #[test]
    fn emoji_heavy_text_drops() {
        let f = filter();
        // Distinct emoji, so the repeat check stays quiet and the symbol
        // ratio is what fires.
        assert_eq!(f.matches("go 😂😀😁😅😆😇", false), Some("symbol ratio"));
    }

    #[test]
    fn repeated_emoji_run_drops_as_repetition() {
        let f = filter();
        assert_eq!(f.matches("go 😂😂😂😂😂😂", false), Some("repeated characters"));
    }

    #[test]
    fn cjk_punctuation_not_counted_as_symbols() {
        let f = filter();
        // Ideographs are non-ASCII, so under the default ratio the symbol
        // check fires. With a permissive ratio the punctuation exemption and
        // alphanumeric ideographs let the sentence through.
        let res = f.matches("今天的会议改到明天，请大家注意。", false);
        assert_eq!(res, Some("symbol ratio"));
        let lenient = QualityFilter::from_config(&QualityFilterConfig {
            enabled: true,
            meaningless_words: vec![],
            max_repeat_chars: 3,
            min_meaningful_length: 5,
            max_symbol_ratio: 1.0,
        });
        assert_eq!(lenient.matches("今天的会议改到明天，请大家注意。", false), None);
    }

    #[test]
    fn too_little_meaningful_content_drops() {
        let f = filter();
        assert_eq!(f.matches("a - b!", false), Some("too little meaningful content"));
    }

    #[test]
    fn single_distinct_char_across_whitespace_drops() {
        let lenient = QualityFilter::from_config(&QualityFilterConfig {
            enabled: true,
            meaningless_words: vec![],
            max_repeat_chars: 100,
            min_meaningful_length: 1,
            max_symbol_ratio: 1.0,
        });
        assert_eq!(
            lenient.matches("a a a a", false),
            Some("single repeated character")
        );
    }

    #[test]
    fn normal_sentence_passes() {
        let f = filter();
        assert_eq!(f.matches("The 14:30 departure is delayed", false), None);
    }

    #[test]
    fn disabled_filter_passes_everything() {
        let f = QualityFilter::from_config(&QualityFilterConfig {
            enabled: false,
            meaningless_words: vec!["ok".into()],
            max_repeat_chars: 1,
            min_meaningful_length: 100,
            max_symbol_ratio: 0.0,
        });
        assert_eq!(f.matches("ok", false), None);
    }
}
