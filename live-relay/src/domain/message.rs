//! Outbound chat messages.

use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::subscriber::{Destination, DestinationKind};

/// Placeholder that splits one piece of content into several messages.
pub const NEXT_PLACEHOLDER: &str = "{next}";

/// A message produced by a handler and consumed exactly once by the delivery scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub platform: String,
    pub kind: DestinationKind,
    /// Account or group number, depending on `kind`.
    pub target: i64,
    /// Content, possibly containing placeholders.
    pub content: String,
    /// Per-platform sequence number, assigned by the scheduler at send time.
    #[serde(default)]
    pub sequence: Option<u64>,
    pub timestamp: DateTime<Utc>,
}

impl OutboundMessage {
    /// Build messages from `content`, splitting on `{next}` and dropping empty parts.
    pub fn create(
        platform: impl Into<String>,
        kind: DestinationKind,
        target: i64,
        content: &str,
    ) -> Vec<Self> {
        Self::create_at(platform, kind, target, content, Utc::now())
    }

    pub fn create_at(
        platform: impl Into<String>,
        kind: DestinationKind,
        target: i64,
        content: &str,
        timestamp: DateTime<Utc>,
    ) -> Vec<Self> {
        let platform = platform.into();
        content
            .split(NEXT_PLACEHOLDER)
            .filter(|part| !part.is_empty())
            .map(|part| Self {
                platform: platform.clone(),
                kind,
                target,
                content: part.to_string(),
                sequence: None,
                timestamp,
            })
            .collect()
    }

    /// Messages addressed to `destination`.
    pub fn for_destination(destination: &Destination, content: &str) -> Vec<Self> {
        Self::create(
            destination.platform.clone(),
            destination.kind,
            destination.id,
            content,
        )
    }

    /// Text used in logs, with placeholders rendered as short markers.
    pub fn display(&self) -> String {
        if self.content.trim().is_empty() {
            return String::new();
        }

        let p = patterns();
        let text = p.face.replace_all(&self.content, "[emoji]");
        let text = text.replace("{at=all}", "@all ");
        let text = p.at.replace_all(&text, "@$1");
        p.image.replace_all(&text, "[image]").into_owned()
    }
}

struct Patterns {
    face: Regex,
    at: Regex,
    image: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        face: Regex::new(r"\{face=.+?\}").unwrap(),
        at: Regex::new(r"\{at=(.*?)\}").unwrap(),
        image: Regex::new(r"\{image_(?:url|path|base64)=.*?\}").unwrap(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_splits_on_next() {
        let messages = OutboundMessage::create("qq", DestinationKind::Group, 1, "a{next}{next}b{next}");
        let contents: Vec<_> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["a", "b"]);
        assert!(messages.iter().all(|m| m.sequence.is_none()));
        assert_eq!(messages[0].timestamp, messages[1].timestamp);
    }

    #[test]
    fn test_create_empty_content() {
        assert!(OutboundMessage::create("qq", DestinationKind::Group, 1, "").is_empty());
    }

    #[test]
    fn test_display_placeholders() {
        let msg = &OutboundMessage::create(
            "qq",
            DestinationKind::Group,
            1,
            "{at=all}live! {at=42}{face=12} {image_url=http://x/y.png}{image_base64=AAAA}",
        )[0];
        assert_eq!(msg.display(), "@all live! @42[emoji] [image][image]");
    }

    #[test]
    fn test_display_blank() {
        let msg = &OutboundMessage::create("qq", DestinationKind::Group, 1, "   ")[0];
        assert_eq!(msg.display(), "");
    }
}
