//! Message model.
//!
//! Messages are transient: received per event, classified, delivered, and
//! dropped. Only derived fingerprints and ids are persisted. Content is a
//! tagged variant produced once at ingestion so the classifier and
//! fingerprint logic pattern-match instead of probing attributes.

/// Media kind carried by a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Photo,
    Document,
    Video,
    Audio,
    Other,
}

impl MediaKind {
    /// Stable label used in the fingerprint input.
    pub fn label(&self) -> &'static str {
        match self {
            MediaKind::Photo => "photo",
            MediaKind::Document => "doc",
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
            MediaKind::Other => "media",
        }
    }
}

/// Message content as seen by the classifier and the dedup store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageContent {
    Text(String),
    Media {
        kind: MediaKind,
        /// Platform-native id of the media object, stable across re-posts.
        native_id: String,
        caption: Option<String>,
    },
    Empty,
}

/// A single inbound message event.
#[derive(Debug, Clone)]
pub struct Message {
    /// Platform message id, unique within the source channel.
    pub id: String,
    /// Canonical id of the source channel.
    pub source: String,
    pub content: MessageContent,
    /// Part of a media album; albums get the longer inter-message delay.
    pub grouped: bool,
}

impl Message {
    pub fn text(id: impl Into<String>, source: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            content: MessageContent::Text(text.into()),
            grouped: false,
        }
    }

    pub fn media(
        id: impl Into<String>,
        source: impl Into<String>,
        kind: MediaKind,
        native_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            content: MessageContent::Media {
                kind,
                native_id: native_id.into(),
                caption: None,
            },
            grouped: false,
        }
    }

    pub fn empty(id: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            content: MessageContent::Empty,
            grouped: false,
        }
    }

    pub fn with_caption(mut self, caption: impl Into<String>) -> Self {
        if let MessageContent::Media { caption: c, .. } = &mut self.content {
            *c = Some(caption.into());
        }
        self
    }

    pub fn with_grouped(mut self, grouped: bool) -> Self {
        self.grouped = grouped;
        self
    }

    pub fn has_media(&self) -> bool {
        matches!(self.content, MessageContent::Media { .. })
    }

    /// Visible text: the body for text messages, the caption for media.
    pub fn visible_text(&self) -> Option<&str> {
        match &self.content {
            MessageContent::Text(t) => Some(t.as_str()),
            MessageContent::Media { caption, .. } => caption.as_deref(),
            MessageContent::Empty => None,
        }
    }
}
