//! Message classification pipeline.
//!
//! Two sequential stages, each independently toggleable by configuration:
//! 1. Ad filter — keyword/pattern/link-count/length heuristics.
//! 2. Content-quality filter — meaningless-word, repetition, and symbol-ratio
//!    heuristics, all overridden by media presence.
//!
//! Classification never raises; anything the heuristics cannot judge passes
//! through rather than crashing the event loop.

pub mod ad;
pub mod quality;

pub use ad::AdFilter;
pub use quality::QualityFilter;

use tracing::debug;

use crate::message::Message;

/// Classification verdict. Only `Pass` proceeds to delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    DropAd,
    DropQuality,
    /// No text and no media — service messages and the like.
    DropEmpty,
}

impl Verdict {
    pub fn label(&self) -> &'static str {
        match self {
            Verdict::Pass => "pass",
            Verdict::DropAd => "drop_ad",
            Verdict::DropQuality => "drop_quality",
            Verdict::DropEmpty => "drop_empty",
        }
    }
}

/// The two-stage filter pipeline.
pub struct Classifier {
    ad: AdFilter,
    quality: QualityFilter,
}

impl Classifier {
    pub fn new(ad: AdFilter, quality: QualityFilter) -> Self {
        Self { ad, quality }
    }

    /// Classify a message. Ad stage runs first; the quality stage only runs
    /// if the ad stage passed.
    pub fn classify(&self, message: &Message) -> Verdict {
        let has_media = message.has_media();
        let text = message.visible_text().unwrap_or("");

        if text.trim().is_empty() && !has_media {
            return Verdict::DropEmpty;
        }

        if let Some(reason) = self.ad.matches(text, has_media) {
            debug!(id = %message.id, reason, "Message matched ad filter");
            return Verdict::DropAd;
        }

        if let Some(reason) = self.quality.matches(text, has_media) {
            debug!(id = %message.id, reason, "Message matched quality filter");
            return Verdict::DropQuality;
        }

        Verdict::Pass
    }
}
