//! Typed domain objects as delivered by the remote aggregation service.
//!
//! These are the inputs of the materialization pipeline. The API client that
//! fetches them is an external collaborator; everything here derives
//! `Deserialize` against the service's camelCase JSON so the client (and the
//! CLI) can hand them over without an intermediate representation.
//!
//! All timestamps are epoch milliseconds.

use serde::{Deserialize, Serialize};

/// Visual URL the service uses when an entry has no picture.
pub const EMPTY_VISUAL_URL: &str = "none";

// ============================================================================
// Feeds
// ============================================================================

/// Lifecycle state of a feed on the remote side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedState {
    Subscribed,
    Unsubscribed,
    Unknown,
}

impl FeedState {
    /// Text stored in `feeds.state`.
    pub fn as_str(self) -> &'static str {
        match self {
            FeedState::Subscribed => "subscribed",
            FeedState::Unsubscribed => "unsubscribed",
            FeedState::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Feed {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub website: Option<String>,
    #[serde(default)]
    pub velocity: Option<f64>,
    #[serde(default)]
    pub state: Option<FeedState>,
    /// Favicon URL; stored as a reference into `files`.
    #[serde(default, alias = "iconUrl")]
    pub favicon: Option<String>,
}

impl Feed {
    /// A feed known only by id and title, e.g. one synthesized from an entry's origin.
    pub fn bare(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            website: None,
            velocity: None,
            state: None,
            favicon: None,
        }
    }
}

/// A feed the user is subscribed to.
///
/// Composed of the base [`Feed`] fields plus the subscription-specific ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    #[serde(flatten)]
    pub feed: Feed,
    #[serde(default, alias = "sortid")]
    pub sort_id: Option<String>,
    #[serde(default)]
    pub updated: Option<i64>,
    #[serde(default)]
    pub categories: Vec<Category>,
}

// ============================================================================
// Labels
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: String,
    #[serde(default)]
    pub label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: String,
    #[serde(default)]
    pub label: Option<String>,
}

// ============================================================================
// Entries
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Ltr,
    Rtl,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Ltr => "ltr",
            Direction::Rtl => "rtl",
        }
    }
}

/// Text body (content or summary) with its writing direction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Content {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub direction: Option<Direction>,
}

/// The stream an entry was published in, e.g. `feed/http://example.com/rss`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Origin {
    pub stream_id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub html_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Visual {
    pub url: String,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub content_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enclosure {
    #[serde(default)]
    pub href: Option<String>,
    #[serde(default)]
    pub length: Option<i64>,
    #[serde(default, rename = "type")]
    pub mime: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub content: Option<Content>,
    #[serde(default)]
    pub summary: Option<Content>,
    pub crawled: i64,
    #[serde(default)]
    pub recrawled: Option<i64>,
    pub published: i64,
    #[serde(default)]
    pub updated: Option<i64>,
    pub unread: bool,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub engagement: Option<i64>,
    /// Deprecated by the service, still stored when present.
    #[serde(default)]
    pub engagement_rate: Option<f64>,
    pub origin_id: String,
    pub fingerprint: String,
    pub origin: Origin,
    #[serde(default)]
    pub visual: Option<Visual>,
    #[serde(default, rename = "enclosure")]
    pub enclosures: Vec<Enclosure>,
    #[serde(default)]
    pub tags: Vec<Tag>,
    #[serde(default)]
    pub categories: Vec<Category>,
}
