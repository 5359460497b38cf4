//! [`LoomService`] — the read API over the primary store, the Fact index
//! and the traversal engine.
//!
//! The index answers *which* Facts and Objects match; the primary store is
//! the system of record for their content. Every Fact returned by a search is
//! re-read from the store and re-checked against the caller's scope before it
//! is handed out.

use std::{sync::Arc, time::Duration};

use loom_core::{
  access::AccessScope,
  fact::Fact,
  object::Object,
  retraction::RetractionResolver,
  store::ObjectFactStore,
};
use loom_graph::{TraversalExecutor, TraversalSettings, TraversalValue, TraverseParams};
use loom_search::{
  FactSearchManager, SearchResult,
  backend::IndexBackend,
  criteria::{ObjectStatisticsCriteria, SearchCriteria},
  document::IndexedFactDocument,
  manager::ObjectStatistics,
  scroll::ScrollingResultIterator,
};
use uuid::Uuid;

use crate::{Error, Result};

/// Fact searches return at most this many Facts unless configured otherwise.
pub const DEFAULT_MAX_FACT_RESULTS: usize = 10_000;

pub struct LoomService<S, B> {
  store:            Arc<S>,
  search:           FactSearchManager<B>,
  traversal:        TraversalSettings,
  max_fact_results: usize,
}

impl<S, B> Clone for LoomService<S, B> {
  fn clone(&self) -> Self {
    Self {
      store:            Arc::clone(&self.store),
      search:           self.search.clone(),
      traversal:        self.traversal.clone(),
      max_fact_results: self.max_fact_results,
    }
  }
}

impl<S: ObjectFactStore, B: IndexBackend> LoomService<S, B> {
  pub fn new(store: Arc<S>, search: FactSearchManager<B>, traversal: TraversalSettings) -> Self {
    Self { store, search, traversal, max_fact_results: DEFAULT_MAX_FACT_RESULTS }
  }

  /// Cap on the Facts a single search returns; `0` removes the cap.
  pub fn with_max_fact_results(mut self, max: usize) -> Self {
    self.max_fact_results = max;
    self
  }

  /// The limit a Fact search runs with: the requested one, the system
  /// maximum when none was requested, never above the maximum.
  fn fact_limit(&self, requested: usize) -> usize {
    match (requested, self.max_fact_results) {
      (requested, 0) => requested,
      (0, max) => max,
      (requested, max) => requested.min(max),
    }
  }

  pub fn store(&self) -> &Arc<S> { &self.store }

  /// The underlying search manager, e.g. for ingestion.
  pub fn fact_search_manager(&self) -> &FactSearchManager<B> { &self.search }

  // ── Search ────────────────────────────────────────────────────────────────

  /// Facts matching `criteria`, read lazily: the primary store is consulted
  /// one index page at a time as the result set is consumed.
  pub async fn search_facts<'a>(
    &'a self,
    criteria: &'a SearchCriteria,
  ) -> Result<FactResultSet<'a, S, B>> {
    let cursor = self.search.search_facts(criteria).await?;
    Ok(FactResultSet {
      store: &*self.store,
      criteria,
      count: cursor.count(),
      limit: self.fact_limit(criteria.limit),
      returned: 0,
      cursor,
      retractions: RetractionResolver::new(&*self.store, &criteria.access),
    })
  }

  /// Objects bound to the Facts matching `criteria`.
  pub async fn search_objects(&self, criteria: &SearchCriteria) -> Result<SearchResult<Object>> {
    let ids = self.search.search_objects(criteria).await?;

    let mut values = Vec::with_capacity(ids.values.len());
    for id in ids.values {
      match self.store.get_object(id).await.map_err(Error::store)? {
        Some(object) => values.push(object),
        None => tracing::warn!(%id, "indexed object is missing from the primary store"),
      }
    }
    Ok(SearchResult { count: ids.count, limit: ids.limit, values })
  }

  pub async fn object_statistics(
    &self,
    criteria: &ObjectStatisticsCriteria,
  ) -> Result<ObjectStatistics> {
    Ok(self.search.calculate_object_statistics(criteria).await?)
  }

  // ── Traversal ─────────────────────────────────────────────────────────────

  /// Run `query` from `seeds` with the configured time limit.
  pub async fn traverse(
    &self,
    scope: &AccessScope,
    seeds: &[Uuid],
    query: &str,
    params: &TraverseParams,
  ) -> Result<Vec<TraversalValue>> {
    self
      .traverse_within(scope, seeds, query, params, self.traversal.time_limit())
      .await
  }

  pub async fn traverse_within(
    &self,
    scope: &AccessScope,
    seeds: &[Uuid],
    query: &str,
    params: &TraverseParams,
    time_limit: Duration,
  ) -> Result<Vec<TraversalValue>> {
    let executor = TraversalExecutor::new(&*self.store, self.traversal.clone());
    Ok(executor.execute_within(scope, seeds, query, params, time_limit).await?)
  }

  // ── Ingestion ─────────────────────────────────────────────────────────────

  /// Project the stored Fact `fact_id` with its type and bound Objects and
  /// (re-)index it.
  pub async fn index_fact(&self, fact_id: Uuid) -> Result<IndexedFactDocument> {
    let fact = self
      .store
      .get_fact(fact_id)
      .await
      .map_err(Error::store)?
      .ok_or(loom_core::Error::FactNotFound(fact_id))?;
    let fact_type = self
      .store
      .get_fact_type(fact.type_id)
      .await
      .map_err(Error::store)?
      .ok_or(loom_core::Error::FactTypeNotFound(fact.type_id))?;

    let mut objects = Vec::new();
    for object_id in fact.bound_object_ids() {
      let object = self
        .store
        .get_object(object_id)
        .await
        .map_err(Error::store)?
        .ok_or(loom_core::Error::ObjectNotFound(object_id))?;
      let object_type = self
        .store
        .get_object_type(object.type_id)
        .await
        .map_err(Error::store)?
        .ok_or(loom_core::Error::ObjectTypeNotFound(object.type_id))?;
      objects.push((object, object_type));
    }

    let document = IndexedFactDocument::project(&fact, &fact_type, &objects);
    Ok(self.search.index_fact(document).await?)
  }
}

// ─── Fact results ────────────────────────────────────────────────────────────

/// The Facts of one search, fetched from the primary store batch by batch.
///
/// Every Fact is re-checked against the caller's scope and, unless the search
/// asked for them, retracted Facts are dropped. `count` is the index's count
/// of matches and does not change when Facts are dropped. The index cursor is
/// released once the limit is reached, on error, or when the set is dropped.
pub struct FactResultSet<'a, S, B: IndexBackend> {
  store:       &'a S,
  criteria:    &'a SearchCriteria,
  cursor:      ScrollingResultIterator<B>,
  retractions: RetractionResolver<'a, S>,
  count:       i64,
  /// `0` when unbounded.
  limit:       usize,
  returned:    usize,
}

impl<S: ObjectFactStore, B: IndexBackend> FactResultSet<'_, S, B> {
  pub fn count(&self) -> i64 { self.count }

  pub fn limit(&self) -> usize { self.limit }

  fn limit_reached(&self) -> bool { self.limit > 0 && self.returned >= self.limit }

  /// The next non-empty batch of Facts, `None` once the search is exhausted.
  pub async fn next_batch(&mut self) -> Result<Option<Vec<Fact>>> {
    while !self.cursor.is_finished() && !self.limit_reached() {
      let batch = self.cursor.next().await;
      let facts = match self.resolve(batch.values).await {
        Ok(facts) => facts,
        Err(error) => {
          self.cursor.close();
          return Err(error);
        }
      };
      if self.limit_reached() {
        self.cursor.close();
      }
      if !facts.is_empty() {
        return Ok(Some(facts));
      }
    }
    Ok(None)
  }

  /// Consume the remaining batches.
  pub async fn collect(mut self) -> Result<SearchResult<Fact>> {
    let mut values = Vec::new();
    while let Some(batch) = self.next_batch().await? {
      values.extend(batch);
    }
    tracing::debug!(count = self.count, returned = values.len(), "searched facts");
    Ok(SearchResult { count: self.count, limit: self.limit, values })
  }

  async fn resolve(&mut self, ids: Vec<Uuid>) -> Result<Vec<Fact>> {
    let mut facts = Vec::with_capacity(ids.len());
    for id in ids {
      if self.limit_reached() {
        break;
      }
      let Some(fact) = self.store.get_fact(id).await.map_err(Error::store)? else {
        tracing::warn!(%id, "indexed fact is missing from the primary store");
        continue;
      };
      if !self.criteria.access.can_read_fact(&fact) {
        tracing::warn!(%id, "index returned a fact the caller cannot read");
        continue;
      }
      if !self.criteria.include_retracted
        && self.retractions.is_fact_retracted(&fact).await.map_err(Error::store)?
      {
        continue;
      }
      facts.push(fact);
      self.returned += 1;
    }
    Ok(facts)
  }
}
