//! The index backend abstraction.
//!
//! A backend executes compiled [`Query`]/[`Aggregation`] trees against a set
//! of named shards. Missing shards are skipped, never an error.

use std::{future::Future, time::Duration};

use uuid::Uuid;

use crate::{
  aggregation::{Aggregates, Aggregations},
  document::IndexedFactDocument,
  mapping::IndexTemplate,
  query::Query,
  Result,
};

#[derive(Debug, Clone)]
pub struct SearchRequest {
  pub indices:      Vec<String>,
  pub query:        Query,
  pub aggregations: Aggregations,
  /// Number of hits to return; `0` for aggregation-only searches.
  pub size:         usize,
  /// Open a scroll cursor kept alive for this long.
  pub scroll:       Option<Duration>,
}

#[derive(Debug, Clone, Default)]
pub struct SearchResponse {
  /// Number of shards the search ran against; `0` when none exist.
  pub total_shards: u64,
  /// Ids of the matching documents in this page.
  pub hits:         Vec<Uuid>,
  pub scroll_id:    Option<String>,
  pub aggregations: Aggregates,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexOutcome {
  Created,
  Updated,
}

pub trait IndexBackend: Send + Sync + 'static {
  fn search(
    &self,
    request: SearchRequest,
  ) -> impl Future<Output = Result<SearchResponse>> + Send + '_;

  /// Fetch the next page of an open cursor, extending its expiry.
  fn scroll(
    &self,
    scroll_id: String,
    keep_alive: Duration,
  ) -> impl Future<Output = Result<SearchResponse>> + Send + '_;

  /// Release a cursor. Returns whether the backend freed it.
  fn clear_scroll(
    &self,
    scroll_id: String,
  ) -> impl Future<Output = Result<bool>> + Send + '_;

  /// Store `document` under its id in `index`. `refresh` makes it visible to
  /// searches before returning.
  fn index_document(
    &self,
    index: String,
    document: IndexedFactDocument,
    refresh: bool,
  ) -> impl Future<Output = Result<IndexOutcome>> + Send + '_;

  fn get_document(
    &self,
    index: String,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<IndexedFactDocument>>> + Send + '_;

  /// Install `template`. Lifecycle policies are left alone unless the
  /// installed one has a lower internal version. Returns whether anything
  /// was written.
  fn put_template(
    &self,
    template: IndexTemplate,
  ) -> impl Future<Output = Result<bool>> + Send + '_;
}
