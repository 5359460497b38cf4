//! [`FactSearchManager`] — the search entry point.
//!
//! Ties criteria, shard selection and the compilers to an [`IndexBackend`]
//! and decodes the results.

use std::{collections::BTreeMap, num::NonZeroUsize, sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  aggregation::{
    self, FACTS_COUNT, FACTS_COUNT_PER_TYPE, MAX_LAST_ADDED, MAX_LAST_SEEN,
    OBJECTS_COUNT, UNIQUE_FACT_TYPES, UNIQUE_OBJECTS,
  },
  backend::{IndexBackend, IndexOutcome, SearchRequest},
  criteria::{ObjectStatisticsCriteria, SearchCriteria},
  document::IndexedFactDocument,
  index::IndexSelector,
  mapping, query,
  scroll::ScrollingResultIterator,
  Result,
};

// ─── Settings ────────────────────────────────────────────────────────────────

/// 1000 hits per scroll page.
pub const DEFAULT_SCROLL_PAGE_SIZE: NonZeroUsize = NonZeroUsize::MIN.saturating_add(999);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
  /// A short page ends scrolling, so a page can never be empty.
  pub scroll_page_size:       NonZeroUsize,
  pub scroll_keep_alive_secs: u64,
  /// Make indexed documents searchable before `index_fact` returns.
  pub immediate_visibility:   bool,
}

impl Default for SearchSettings {
  fn default() -> Self {
    Self {
      scroll_page_size:       DEFAULT_SCROLL_PAGE_SIZE,
      scroll_keep_alive_secs: 60,
      immediate_visibility:   false,
    }
  }
}

// ─── Results ─────────────────────────────────────────────────────────────────

/// A bounded result with the total number of matches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult<T> {
  /// Total number of matches; `-1` when unknown. Inexact when a facts-count
  /// filter was applied, since it is taken before bucket selection.
  pub count:  i64,
  pub limit:  usize,
  pub values: Vec<T>,
}

impl<T> SearchResult<T> {
  pub fn empty(limit: usize) -> Self { Self { count: 0, limit, values: Vec::new() } }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactStatistic {
  pub fact_type_id:         Uuid,
  pub fact_count:           i64,
  /// Epoch milliseconds; `-1` when unknown.
  pub last_added_timestamp: i64,
  pub last_seen_timestamp:  i64,
}

pub type ObjectStatistics = BTreeMap<Uuid, Vec<FactStatistic>>;

// ─── Manager ─────────────────────────────────────────────────────────────────

pub struct FactSearchManager<B> {
  backend:  Arc<B>,
  selector: IndexSelector,
  settings: SearchSettings,
}

impl<B> Clone for FactSearchManager<B> {
  fn clone(&self) -> Self {
    Self {
      backend:  Arc::clone(&self.backend),
      selector: self.selector.clone(),
      settings: self.settings.clone(),
    }
  }
}

impl<B: IndexBackend> FactSearchManager<B> {
  pub fn new(backend: Arc<B>, selector: IndexSelector, settings: SearchSettings) -> Self {
    Self { backend, selector, settings }
  }

  pub fn backend(&self) -> &Arc<B> { &self.backend }

  pub fn selector(&self) -> &IndexSelector { &self.selector }

  fn keep_alive(&self) -> Duration { Duration::from_secs(self.settings.scroll_keep_alive_secs) }

  // ── Setup ─────────────────────────────────────────────────────────────────

  /// Install the lifecycle policy, the shared mapping and the index templates.
  /// Run once before the first search or ingestion against a new cluster;
  /// repeating it is harmless. Templates only apply to shards created later.
  pub async fn ensure_templates(&self) -> Result<()> {
    for template in mapping::index_templates(&self.selector) {
      let name = template.name.clone();
      let written = self.backend.put_template(template).await?;
      tracing::debug!(%name, written, "ensured index configuration");
    }
    Ok(())
  }

  // ── Ingestion ─────────────────────────────────────────────────────────────

  /// Index `document` into the daily shard of its `lastSeenTimestamp`, or
  /// into the time-global shard when flagged so.
  pub async fn index_fact(&self, document: IndexedFactDocument) -> Result<IndexedFactDocument> {
    let last_seen = chrono::DateTime::from_timestamp_millis(document.last_seen_timestamp)
      .unwrap_or_default();
    let index = self.selector.target_index(last_seen, document.is_time_global());
    let id = document.id;

    let outcome = self
      .backend
      .index_document(index.clone(), document.clone(), self.settings.immediate_visibility)
      .await?;
    match outcome {
      IndexOutcome::Created => tracing::debug!(%id, %index, "indexed fact"),
      IndexOutcome::Updated => tracing::debug!(%id, %index, "re-indexed existing fact"),
    }
    Ok(document)
  }

  pub async fn get_fact(&self, id: Uuid, index: &str) -> Result<Option<IndexedFactDocument>> {
    let document = self.backend.get_document(index.to_owned(), id).await?;
    if document.is_none() {
      tracing::warn!(%id, index, "could not fetch fact, not indexed?");
    }
    Ok(document)
  }

  // ── Search ────────────────────────────────────────────────────────────────

  /// Open a cursor over the ids of all Facts matching `criteria`.
  pub async fn search_facts(&self, criteria: &SearchCriteria) -> Result<ScrollingResultIterator<B>> {
    let (start, end) = criteria.index_window();
    let request = SearchRequest {
      indices:      self.selector.select(start, end),
      query:        query::compile(criteria),
      aggregations: aggregation::compile_facts_count(),
      size:         self.settings.scroll_page_size.get(),
      scroll:       Some(self.keep_alive()),
    };
    tracing::debug!(shards = request.indices.len(), "searching facts");

    let response = self.backend.search(request).await?;
    if response.total_shards == 0 {
      tracing::warn!("search for facts did not hit any shards");
      return Ok(ScrollingResultIterator::empty());
    }

    let count = response.aggregations.count(FACTS_COUNT);
    Ok(ScrollingResultIterator::open(
      Arc::clone(&self.backend),
      response,
      count,
      self.settings.scroll_page_size,
      self.keep_alive(),
    ))
  }

  /// Unique Objects bound to the Facts matching `criteria`.
  pub async fn search_objects(&self, criteria: &SearchCriteria) -> Result<SearchResult<Uuid>> {
    let (start, end) = criteria.index_window();
    let request = SearchRequest {
      indices:      self.selector.select(start, end),
      query:        query::compile(criteria),
      aggregations: aggregation::compile_object_aggregation(criteria),
      size:         0,
      scroll:       None,
    };

    let response = self.backend.search(request).await?;
    if response.total_shards == 0 {
      tracing::warn!("search for objects did not hit any shards");
      return Ok(SearchResult::empty(criteria.limit));
    }

    let count = response.aggregations.count(OBJECTS_COUNT);
    let values: Vec<Uuid> = match response.aggregations.buckets(UNIQUE_OBJECTS) {
      Some(buckets) => buckets.iter().filter_map(|b| parse_key(&b.key)).collect(),
      None => {
        tracing::warn!("could not retrieve result values when searching for objects");
        Vec::new()
      }
    };

    tracing::debug!(returned = values.len(), count, "retrieved objects");
    Ok(SearchResult { count, limit: criteria.limit, values })
  }

  /// Per-Fact-type statistics for each requested Object.
  pub async fn calculate_object_statistics(
    &self,
    criteria: &ObjectStatisticsCriteria,
  ) -> Result<ObjectStatistics> {
    if criteria.object_ids.is_empty() {
      return Ok(ObjectStatistics::new());
    }

    let request = SearchRequest {
      indices:      self.selector.select(criteria.start, criteria.end),
      query:        query::compile_statistics(criteria),
      aggregations: aggregation::compile_statistics_aggregation(criteria),
      size:         0,
      scroll:       None,
    };

    let response = self.backend.search(request).await?;
    if response.total_shards == 0 {
      tracing::warn!("calculation of object statistics did not hit any shards");
      return Ok(ObjectStatistics::new());
    }

    let Some(object_buckets) = response.aggregations.buckets(UNIQUE_OBJECTS) else {
      tracing::warn!("could not retrieve results when calculating statistics for objects");
      return Ok(ObjectStatistics::new());
    };

    let mut statistics = ObjectStatistics::new();
    for object_bucket in object_buckets {
      let Some(object_id) = parse_key(&object_bucket.key) else { continue };
      let Some(type_buckets) = object_bucket.aggregations.buckets(UNIQUE_FACT_TYPES) else {
        continue;
      };

      for type_bucket in type_buckets {
        let Some(fact_type_id) = parse_key(&type_bucket.key) else { continue };
        statistics.entry(object_id).or_default().push(FactStatistic {
          fact_type_id,
          fact_count: type_bucket.aggregations.count(FACTS_COUNT_PER_TYPE),
          last_added_timestamp: type_bucket.aggregations.max_timestamp(MAX_LAST_ADDED),
          last_seen_timestamp: type_bucket.aggregations.max_timestamp(MAX_LAST_SEEN),
        });
      }
    }

    tracing::debug!(objects = statistics.len(), "retrieved object statistics");
    Ok(statistics)
  }
}

fn parse_key(key: &str) -> Option<Uuid> {
  let parsed = Uuid::parse_str(key).ok();
  if parsed.is_none() {
    tracing::warn!(key, "ignoring bucket with a non-uuid key");
  }
  parsed
}
