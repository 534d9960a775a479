//! Inbound live events.
//!
//! Events are produced by platform connectors and consumed by the router.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Streamer that an event originates from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamerInfo {
    pub uid: i64,
    pub uname: Option<String>,
    pub room_id: Option<i64>,
    pub face: Option<String>,
}

impl StreamerInfo {
    pub fn new(uid: i64) -> Self {
        Self {
            uid,
            uname: None,
            room_id: None,
            face: None,
        }
    }
}

/// Viewer taking part in an interaction event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserInfo {
    pub uid: i64,
    pub uname: String,
    pub face: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GiftInfo {
    pub id: i64,
    pub name: String,
    /// Unit price, when the platform reports one.
    pub price: Option<f64>,
    pub count: u32,
    pub url: Option<String>,
}

impl GiftInfo {
    /// Total value of the gift, `price * count`.
    pub fn value(&self) -> Option<f64> {
        self.price.map(|p| p * f64::from(self.count))
    }
}

/// Type of a live event. Its [`as_str`](EventKind::as_str) form is the
/// event-type id that bindings refer to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    LiveOn,
    LiveOff,
    Connected,
    Disconnected,
    Danmu,
    PaidGift,
    FreeGift,
    RandomGift,
    SuperChat,
    Membership,
    Follow,
    Share,
    Like,
    LikeUpdate,
    EnterRoom,
    Emoji,
}

impl EventKind {
    pub const ALL: [EventKind; 16] = [
        Self::LiveOn,
        Self::LiveOff,
        Self::Connected,
        Self::Disconnected,
        Self::Danmu,
        Self::PaidGift,
        Self::FreeGift,
        Self::RandomGift,
        Self::SuperChat,
        Self::Membership,
        Self::Follow,
        Self::Share,
        Self::Like,
        Self::LikeUpdate,
        Self::EnterRoom,
        Self::Emoji,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LiveOn => "live_on",
            Self::LiveOff => "live_off",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Danmu => "danmu",
            Self::PaidGift => "paid_gift",
            Self::FreeGift => "free_gift",
            Self::RandomGift => "random_gift",
            Self::SuperChat => "super_chat",
            Self::Membership => "membership",
            Self::Follow => "follow",
            Self::Share => "share",
            Self::Like => "like",
            Self::LikeUpdate => "like_update",
            Self::EnterRoom => "enter_room",
            Self::Emoji => "emoji",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == s)
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event-specific data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LiveEventPayload {
    LiveOn,
    LiveOff,
    Connected,
    Disconnected,
    Danmu {
        sender: UserInfo,
        content: String,
        /// Content with emoticons and markup stripped.
        content_text: String,
    },
    PaidGift {
        sender: UserInfo,
        gift: GiftInfo,
    },
    FreeGift {
        sender: UserInfo,
        gift: GiftInfo,
    },
    RandomGift {
        sender: UserInfo,
        gift: GiftInfo,
        /// Value of the item drawn from the box.
        value: f64,
    },
    SuperChat {
        sender: UserInfo,
        content: String,
        value: f64,
    },
    Membership {
        sender: UserInfo,
        name: String,
        months: u32,
        value: f64,
    },
    Follow {
        sender: UserInfo,
    },
    Share {
        sender: UserInfo,
    },
    Like {
        sender: UserInfo,
    },
    LikeUpdate {
        count: u64,
    },
    EnterRoom {
        sender: UserInfo,
    },
    Emoji {
        sender: UserInfo,
        name: String,
        url: Option<String>,
    },
}

/// An event raised by a live-streaming source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveEvent {
    /// Source platform (e.g. `bilibili`).
    pub platform: String,
    pub source: StreamerInfo,
    pub timestamp: DateTime<Utc>,
    pub payload: LiveEventPayload,
}

impl LiveEvent {
    pub fn new(platform: impl Into<String>, source: StreamerInfo, payload: LiveEventPayload) -> Self {
        Self {
            platform: platform.into(),
            source,
            timestamp: Utc::now(),
            payload,
        }
    }

    pub fn kind(&self) -> EventKind {
        match &self.payload {
            LiveEventPayload::LiveOn => EventKind::LiveOn,
            LiveEventPayload::LiveOff => EventKind::LiveOff,
            LiveEventPayload::Connected => EventKind::Connected,
            LiveEventPayload::Disconnected => EventKind::Disconnected,
            LiveEventPayload::Danmu { .. } => EventKind::Danmu,
            LiveEventPayload::PaidGift { .. } => EventKind::PaidGift,
            LiveEventPayload::FreeGift { .. } => EventKind::FreeGift,
            LiveEventPayload::RandomGift { .. } => EventKind::RandomGift,
            LiveEventPayload::SuperChat { .. } => EventKind::SuperChat,
            LiveEventPayload::Membership { .. } => EventKind::Membership,
            LiveEventPayload::Follow { .. } => EventKind::Follow,
            LiveEventPayload::Share { .. } => EventKind::Share,
            LiveEventPayload::Like { .. } => EventKind::Like,
            LiveEventPayload::LikeUpdate { .. } => EventKind::LikeUpdate,
            LiveEventPayload::EnterRoom { .. } => EventKind::EnterRoom,
            LiveEventPayload::Emoji { .. } => EventKind::Emoji,
        }
    }

    /// Event-type id matched against bindings.
    pub fn event_type(&self) -> &'static str {
        self.kind().as_str()
    }

    /// Viewer associated with the event, if any.
    pub fn sender(&self) -> Option<&UserInfo> {
        match &self.payload {
            LiveEventPayload::Danmu { sender, .. }
            | LiveEventPayload::PaidGift { sender, .. }
            | LiveEventPayload::FreeGift { sender, .. }
            | LiveEventPayload::RandomGift { sender, .. }
            | LiveEventPayload::SuperChat { sender, .. }
            | LiveEventPayload::Membership { sender, .. }
            | LiveEventPayload::Follow { sender }
            | LiveEventPayload::Share { sender }
            | LiveEventPayload::Like { sender }
            | LiveEventPayload::EnterRoom { sender }
            | LiveEventPayload::Emoji { sender, .. } => Some(sender),
            _ => None,
        }
    }

    /// Human-readable text carried by the event, if any.
    pub fn content(&self) -> Option<String> {
        match &self.payload {
            LiveEventPayload::Danmu { content, .. } | LiveEventPayload::SuperChat { content, .. } => {
                Some(content.clone())
            }
            LiveEventPayload::PaidGift { gift, .. }
            | LiveEventPayload::FreeGift { gift, .. }
            | LiveEventPayload::RandomGift { gift, .. } => {
                Some(format!("{} x{}", gift.name, gift.count))
            }
            LiveEventPayload::Membership { name, months, .. } => Some(format!("{name} x{months}")),
            LiveEventPayload::Emoji { name, .. } => Some(name.clone()),
            LiveEventPayload::LikeUpdate { count } => Some(count.to_string()),
            _ => None,
        }
    }
}
