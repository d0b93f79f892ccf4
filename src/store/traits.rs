//! Storage contract for the structured local cache.

use chrono::{DateTime, NaiveDate, Utc};
use color_eyre::{eyre::eyre, Result};
use std::str::FromStr;

use crate::model::{ContentRecord, PageSnapshotRecord};

/// Secondary indexes over cached content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentIndex {
  /// Exact match on `content_type`
  ContentType,
  /// Calendar day (UTC, `YYYY-MM-DD`) of `published_at`
  PublishedOn,
}

impl FromStr for ContentIndex {
  type Err = color_eyre::Report;

  fn from_str(s: &str) -> Result<Self> {
    match s {
      "content-type" | "contentType" | "type" => Ok(Self::ContentType),
      "published-on" | "publishedAt" | "published" => Ok(Self::PublishedOn),
      other => Err(eyre!("Unknown index: {}", other)),
    }
  }
}

impl ContentIndex {
  /// Records from `records` matching `value`, in their given order.
  pub fn select<'a, I>(self, records: I, value: &str) -> Result<Vec<ContentRecord>>
  where
    I: IntoIterator<Item = &'a ContentRecord>,
  {
    let records = records.into_iter();
    Ok(match self {
      Self::ContentType => records.filter(|r| r.content_type == value).cloned().collect(),
      Self::PublishedOn => {
        let (start, end) = day_range(value)?;
        records
          .filter(|r| r.published_at >= start && r.published_at < end)
          .cloned()
          .collect()
      }
    })
  }
}

/// Half-open `[start, end)` range covering one UTC day.
pub(crate) fn day_range(value: &str) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
  let day = NaiveDate::parse_from_str(value, "%Y-%m-%d")
    .map_err(|e| eyre!("Invalid publication date '{}': {}", value, e))?;
  let start = day
    .and_hms_opt(0, 0, 0)
    .ok_or_else(|| eyre!("Invalid publication date '{}'", value))?
    .and_utc();
  Ok((start, start + chrono::Duration::days(1)))
}

/// Backend for the structured local cache.
///
/// Implementations serialize their own operations; every method is a
/// complete unit of work. Batch writes are atomic: on error nothing from
/// the batch is visible.
pub trait ContentStore: Send + Sync {
  /// Insert or wholly replace each record by `id`.
  fn upsert_many(&self, items: &[ContentRecord]) -> Result<()>;

  /// Make `collection` contain exactly `items`, in order, stamped `synced_at`.
  ///
  /// Records that left the collection and belong to no other collection are
  /// deleted. Returns the number of deleted records.
  fn replace_collection(
    &self,
    collection: &str,
    items: &[ContentRecord],
    synced_at: DateTime<Utc>,
  ) -> Result<usize>;

  /// Every cached record, unordered.
  fn get_all(&self) -> Result<Vec<ContentRecord>>;

  /// Members of a collection in the order last fetched.
  fn get_collection(&self, collection: &str) -> Result<Vec<ContentRecord>>;

  /// When the collection was last reconciled.
  fn collection_synced_at(&self, collection: &str) -> Result<Option<DateTime<Utc>>>;

  fn get_by_index(&self, index: ContentIndex, value: &str) -> Result<Vec<ContentRecord>>;

  fn put_page_snapshot(&self, path: &str, content: &str, cached_at: DateTime<Utc>) -> Result<()>;

  fn get_page_snapshot(&self, path: &str) -> Result<Option<PageSnapshotRecord>>;

  fn page_snapshot_paths(&self) -> Result<Vec<String>>;

  /// Drop all content, snapshots and sync metadata.
  fn clear(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::fixtures::typed;

  #[test]
  fn test_index_names_parse() {
    assert_eq!("type".parse::<ContentIndex>().unwrap(), ContentIndex::ContentType);
    assert_eq!(
      "publishedAt".parse::<ContentIndex>().unwrap(),
      ContentIndex::PublishedOn
    );
    assert!("author".parse::<ContentIndex>().is_err());
  }

  #[test]
  fn test_day_range_spans_one_day() {
    let (start, end) = day_range("2024-05-01").unwrap();
    assert_eq!(start.to_rfc3339(), "2024-05-01T00:00:00+00:00");
    assert_eq!(end.to_rfc3339(), "2024-05-02T00:00:00+00:00");
    assert!(day_range("May 1st").is_err());
  }

  #[test]
  fn test_select_keeps_order_and_rejects_bad_days() {
    let records = vec![typed("w2", "warning", 3), typed("n1", "news", 1), typed("w1", "warning", 1)];

    let warnings = ContentIndex::ContentType.select(&records, "warning").unwrap();
    let ids: Vec<&str> = warnings.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, ["w2", "w1"]);

    let day = ContentIndex::PublishedOn.select(&records, "2024-05-01").unwrap();
    assert_eq!(day.len(), 2);
    assert!(ContentIndex::PublishedOn.select(&records, "yesterday").is_err());
  }
}
