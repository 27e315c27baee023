//! Entity conversion: domain objects to flat store records.
//!
//! Every function here is pure. Optional source fields map to `None`, which
//! the applier treats as "leave the stored value alone", never as "clear".

use thiserror::Error;

use super::EntityKind;
use crate::model::{
    Category, Content, Direction, Entry, Feed, FeedState, Origin, Subscription, Tag,
    EMPTY_VISUAL_URL,
};

/// Separator for list-valued text columns (keywords, enclosure MIME types).
pub const LIST_SEPARATOR: char = '\t';

// ============================================================================
// Error Types
// ============================================================================

/// A source object that cannot be turned into a record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConversionError {
    #[error("malformed stream id {stream_id:?}: expected '<type>/<id>'")]
    MalformedStreamId { stream_id: String },

    #[error("{kind} has an empty identity")]
    EmptyIdentity { kind: EntityKind },

    #[error("fingerprint {fingerprint:?} is already stored for entry {stored_id:?}")]
    FingerprintTaken {
        fingerprint: String,
        stored_id: String,
    },
}

/// A top-level source object dropped from a batch, with the reason.
///
/// `kind` and `identity` name the object that was rejected (a subscription's
/// feed or an entry), not necessarily the nested record that failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("rejected {kind} {identity:?}: {reason}")]
pub struct Rejection {
    pub kind: EntityKind,
    pub identity: String,
    #[source]
    pub reason: ConversionError,
}

// ============================================================================
// Records
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub url: String,
    pub mime: Option<String>,
    pub retries: Option<i64>,
    /// Epoch ms; the applier substitutes the write time when absent.
    pub created: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeedRecord {
    pub id: String,
    /// `None` when the source did not carry a title: an existing row keeps
    /// its title, a new row gets the feed id.
    pub title: Option<String>,
    pub website: Option<String>,
    pub velocity: Option<f64>,
    pub state: Option<FeedState>,
    pub favicon: Option<String>,
    pub sort_id: Option<String>,
    pub updated: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryRecord {
    pub id: String,
    pub label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagRecord {
    pub id: String,
    pub label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedCategoryRecord {
    pub feed_id: String,
    pub category_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryTagRecord {
    pub entry_id: String,
    pub tag_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EntryRecord {
    pub id: String,
    pub title: String,
    pub author: Option<String>,
    pub content: Option<String>,
    pub content_direction: Option<Direction>,
    pub summary: Option<String>,
    pub summary_direction: Option<Direction>,
    pub crawled: i64,
    pub recrawled: Option<i64>,
    pub published: i64,
    pub updated: Option<i64>,
    pub visual_url: Option<String>,
    pub unread: bool,
    pub keywords: Option<String>,
    pub engagement: Option<i64>,
    pub engagement_rate: Option<f64>,
    pub origin_id: String,
    pub fingerprint: String,
    pub origin_stream_id: String,
    pub origin_title: Option<String>,
    pub origin_feed_id: String,
    pub enclosure_mimes: Option<String>,
}

// ============================================================================
// Helpers
// ============================================================================

fn require_identity(kind: EntityKind, id: &str) -> Result<(), ConversionError> {
    if id.trim().is_empty() {
        return Err(ConversionError::EmptyIdentity { kind });
    }
    Ok(())
}

/// Joins values with [`LIST_SEPARATOR`], skipping empty ones.
///
/// Returns `None` when nothing is left so the column is omitted entirely.
pub fn join_list<'a, I>(values: I) -> Option<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut joined = String::new();
    for value in values.into_iter().filter(|v| !v.is_empty()) {
        if !joined.is_empty() {
            joined.push(LIST_SEPARATOR);
        }
        joined.push_str(value);
    }
    (!joined.is_empty()).then_some(joined)
}

/// Text and direction of a content slot. The direction is only kept when
/// there is text to go with it.
fn content_parts(content: Option<&Content>) -> (Option<String>, Option<Direction>) {
    match content {
        Some(Content {
            content: Some(text),
            direction,
        }) => (Some(text.clone()), *direction),
        _ => (None, None),
    }
}

/// Stream prefix the service puts in front of feed ids.
pub const FEED_STREAM_PREFIX: &str = "feed/";

/// Store id of a subscribed feed: the service's `feed/<id>` form is
/// reduced to `<id>` so subscriptions and entry origins share one row.
pub fn subscription_feed_id(id: &str) -> &str {
    id.strip_prefix(FEED_STREAM_PREFIX)
        .filter(|rest| !rest.is_empty())
        .unwrap_or(id)
}

/// Extracts the feed id from a stream id: everything after the first `/`.
///
/// `feed/http://example.com/rss` yields `http://example.com/rss`.
pub fn feed_id_from_stream(stream_id: &str) -> Result<&str, ConversionError> {
    match stream_id.split_once('/') {
        Some((_, id)) if !id.is_empty() => Ok(id),
        _ => Err(ConversionError::MalformedStreamId {
            stream_id: stream_id.to_owned(),
        }),
    }
}

impl Origin {
    /// Synthesizes the degenerate feed an entry was published in.
    ///
    /// Only id and title are known; the title falls back to the feed id
    /// because `feeds.title` is required.
    pub fn to_feed(&self) -> Result<Feed, ConversionError> {
        let id = feed_id_from_stream(&self.stream_id)?;
        let title = self.title.clone().unwrap_or_else(|| id.to_owned());
        Ok(Feed::bare(id, title))
    }
}

/// Feed record for an entry's origin. Unlike [`Origin::to_feed`] the title
/// stays unknown when the origin has none.
pub fn convert_origin(origin: &Origin) -> Result<FeedRecord, ConversionError> {
    let mut record = convert_feed(&origin.to_feed()?)?;
    record.title = origin.title.clone();
    Ok(record)
}

// ============================================================================
// Converters
// ============================================================================

pub fn convert_feed(feed: &Feed) -> Result<FeedRecord, ConversionError> {
    require_identity(EntityKind::Feed, &feed.id)?;
    Ok(FeedRecord {
        id: feed.id.clone(),
        title: Some(feed.title.clone()),
        website: feed.website.clone(),
        velocity: feed.velocity,
        state: feed.state,
        favicon: feed.favicon.clone().filter(|url| !url.is_empty()),
        sort_id: None,
        updated: None,
    })
}

pub fn convert_subscription(subscription: &Subscription) -> Result<FeedRecord, ConversionError> {
    let mut record = convert_feed(&subscription.feed)?;
    record.id = subscription_feed_id(&record.id).to_owned();
    record.sort_id = subscription.sort_id.clone();
    record.updated = subscription.updated;
    Ok(record)
}

pub fn convert_category(category: &Category) -> Result<CategoryRecord, ConversionError> {
    require_identity(EntityKind::Category, &category.id)?;
    Ok(CategoryRecord {
        id: category.id.clone(),
        label: category.label.clone(),
    })
}

pub fn convert_tag(tag: &Tag) -> Result<TagRecord, ConversionError> {
    require_identity(EntityKind::Tag, &tag.id)?;
    Ok(TagRecord {
        id: tag.id.clone(),
        label: tag.label.clone(),
    })
}

pub fn feed_category(feed_id: &str, category_id: &str) -> FeedCategoryRecord {
    FeedCategoryRecord {
        feed_id: feed_id.to_owned(),
        category_id: category_id.to_owned(),
    }
}

pub fn entry_tag(entry_id: &str, tag_id: &str) -> EntryTagRecord {
    EntryTagRecord {
        entry_id: entry_id.to_owned(),
        tag_id: tag_id.to_owned(),
    }
}

/// Visual URL of an entry, ignoring the service's "no picture" placeholder.
fn visual_url(entry: &Entry) -> Option<&str> {
    entry
        .visual
        .as_ref()
        .map(|visual| visual.url.as_str())
        .filter(|url| !url.is_empty() && *url != EMPTY_VISUAL_URL)
}

pub fn convert_entry(entry: &Entry) -> Result<EntryRecord, ConversionError> {
    require_identity(EntityKind::Entry, &entry.id)?;
    let origin_feed_id = feed_id_from_stream(&entry.origin.stream_id)?;
    let (content, content_direction) = content_parts(entry.content.as_ref());
    let (summary, summary_direction) = content_parts(entry.summary.as_ref());

    Ok(EntryRecord {
        id: entry.id.clone(),
        title: entry.title.clone(),
        author: entry.author.clone(),
        content,
        content_direction,
        summary,
        summary_direction,
        crawled: entry.crawled,
        recrawled: entry.recrawled,
        published: entry.published,
        updated: entry.updated,
        visual_url: visual_url(entry).map(str::to_owned),
        unread: entry.unread,
        keywords: join_list(entry.keywords.iter().map(String::as_str)),
        engagement: entry.engagement,
        engagement_rate: entry.engagement_rate,
        origin_id: entry.origin_id.clone(),
        fingerprint: entry.fingerprint.clone(),
        origin_stream_id: entry.origin.stream_id.clone(),
        origin_title: entry.origin.title.clone(),
        origin_feed_id: origin_feed_id.to_owned(),
        enclosure_mimes: join_list(
            entry
                .enclosures
                .iter()
                .filter_map(|enclosure| enclosure.mime.as_deref()),
        ),
    })
}

/// File rows referenced by a feed (its favicon).
pub fn feed_files(feed: &Feed) -> Vec<FileRecord> {
    feed.favicon
        .iter()
        .filter(|url| !url.is_empty())
        .map(|url| FileRecord {
            url: url.clone(),
            mime: None,
            retries: None,
            created: None,
        })
        .collect()
}

/// File rows referenced by an entry: its visual, then every enclosure with a link.
pub fn entry_files(entry: &Entry) -> Vec<FileRecord> {
    let visual = entry.visual.as_ref().and_then(|visual| {
        visual_url(entry).map(|url| FileRecord {
            url: url.to_owned(),
            mime: visual.content_type.clone(),
            retries: None,
            created: None,
        })
    });

    let enclosures = entry.enclosures.iter().filter_map(|enclosure| {
        enclosure
            .href
            .as_deref()
            .filter(|href| !href.is_empty())
            .map(|href| FileRecord {
                url: href.to_owned(),
                mime: enclosure.mime.clone(),
                retries: None,
                created: None,
            })
    });

    visual.into_iter().chain(enclosures).collect()
}
