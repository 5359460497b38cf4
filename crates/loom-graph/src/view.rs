//! [`GraphView`] — the lazily materialised graph of one traversal.
//!
//! Vertices are Objects, edges are the Facts bound to them that the caller
//! may read. Nothing is loaded up front: adjacency is fetched from the
//! primary store the first time a vertex is expanded and then kept in a
//! per-traversal arena. The arena never outlives the traversal, so nothing
//! scope-dependent leaks between callers.

use std::{
  collections::HashMap,
  sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicUsize, Ordering},
  },
};

use chrono::{DateTime, Utc};
use loom_core::{
  access::AccessScope,
  fact::Fact,
  object::{FactType, Object, ObjectType},
  retraction::RetractionResolver,
  store::ObjectFactStore,
};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use uuid::Uuid;

use crate::language::Direction;

// ─── Parameters ──────────────────────────────────────────────────────────────

/// Per-call restrictions on which Facts become edges.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraverseParams {
  pub include_retracted: bool,
  /// Only Facts whose `timestamp` is at or after this instant.
  pub after:             Option<DateTime<Utc>>,
  /// Only Facts whose `timestamp` is at or before this instant.
  pub before:            Option<DateTime<Utc>>,
  /// Maximum number of returned values.
  pub limit:             Option<usize>,
}

impl TraverseParams {
  fn in_time_range(&self, fact: &Fact) -> bool {
    self.after.is_none_or(|after| fact.timestamp >= after)
      && self.before.is_none_or(|before| fact.timestamp <= before)
  }
}

// ─── Edges ───────────────────────────────────────────────────────────────────

/// A Fact seen from one of its Objects.
///
/// `out_vertex → in_vertex` follows the Fact's orientation, flipped for a
/// bidirectional Fact reached from its destination. A one-legged Fact is a
/// self-loop on its Object with no far end: `in_vertex` is `None`.
#[derive(Debug, Clone)]
pub struct Edge {
  pub fact:       Arc<Fact>,
  pub label:      Arc<str>,
  pub out_vertex: Uuid,
  pub in_vertex:  Option<Uuid>,
  /// The vertex the edge was reached from.
  pub via:        Uuid,
}

impl Edge {
  /// The endpoint opposite to `via`.
  pub fn other_vertex(&self) -> Option<Uuid> {
    if self.via == self.out_vertex { self.in_vertex } else { Some(self.out_vertex) }
  }
}

// ─── Errors ──────────────────────────────────────────────────────────────────

/// Why evaluation stopped. Mapped onto [`crate::Error`] by the executor, which
/// knows the query text and the time limit.
#[derive(Debug)]
pub(crate) enum Interrupt {
  Deadline,
  Runtime(String),
  Store(Box<dyn std::error::Error + Send + Sync>),
  Internal(String),
}

pub(crate) type Eval<T> = std::result::Result<T, Interrupt>;

/// Elements processed between two yields to the runtime.
const YIELD_EVERY: usize = 256;

// ─── View ────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct Arena {
  objects:      HashMap<Uuid, Option<Arc<Object>>>,
  object_types: HashMap<Uuid, Arc<str>>,
  fact_types:   HashMap<Uuid, Arc<str>>,
  /// Visible Facts bound to each expanded vertex.
  adjacency:    HashMap<Uuid, Arc<[Arc<Fact>]>>,
}

pub struct GraphView<'a, S> {
  store:       &'a S,
  scope:       &'a AccessScope,
  params:      &'a TraverseParams,
  retractions: RetractionResolver<'a, S>,
  /// `None` when the time limit is too large to represent.
  deadline:    Option<Instant>,
  ticks:       AtomicUsize,
  arena:       Mutex<Arena>,
}

impl<'a, S: ObjectFactStore> GraphView<'a, S> {
  pub fn new(
    store: &'a S,
    scope: &'a AccessScope,
    params: &'a TraverseParams,
    deadline: Option<Instant>,
  ) -> Self {
    Self {
      store,
      scope,
      params,
      retractions: RetractionResolver::new(store, scope),
      deadline,
      ticks: AtomicUsize::new(0),
      arena: Mutex::new(Arena::default()),
    }
  }

  pub fn scope(&self) -> &AccessScope { self.scope }

  fn arena(&self) -> std::sync::MutexGuard<'_, Arena> {
    self.arena.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Fail once the deadline has passed. Called before every store read.
  pub(crate) fn check_deadline(&self) -> Eval<()> {
    match self.deadline {
      Some(deadline) if Instant::now() >= deadline => Err(Interrupt::Deadline),
      _ => Ok(()),
    }
  }

  /// Account for one unit of in-memory work: fail past the deadline and
  /// periodically yield, so a traversal over cached adjacency still gives an
  /// enclosing timer the chance to fire.
  pub(crate) async fn pace(&self) -> Eval<()> {
    self.check_deadline()?;
    if self.ticks.fetch_add(1, Ordering::Relaxed) % YIELD_EVERY == YIELD_EVERY - 1 {
      tokio::task::yield_now().await;
    }
    Ok(())
  }

  fn store_error(error: S::Error) -> Interrupt { Interrupt::Store(Box::new(error)) }

  // ── Vertices ──────────────────────────────────────────────────────────────

  /// The Object behind vertex `id`, `None` if the store does not know it.
  pub(crate) async fn object(&self, id: Uuid) -> Eval<Option<Arc<Object>>> {
    if let Some(known) = self.arena().objects.get(&id) {
      return Ok(known.clone());
    }
    self.check_deadline()?;
    let object = self.store.get_object(id).await.map_err(Self::store_error)?.map(Arc::new);
    self.arena().objects.insert(id, object.clone());
    Ok(object)
  }

  /// Object type name of vertex `id`; its label.
  pub(crate) async fn vertex_label(&self, id: Uuid) -> Eval<Option<Arc<str>>> {
    let Some(object) = self.object(id).await? else { return Ok(None) };
    if let Some(name) = self.arena().object_types.get(&object.type_id) {
      return Ok(Some(Arc::clone(name)));
    }
    self.check_deadline()?;
    let object_type: ObjectType = self
      .store
      .get_object_type(object.type_id)
      .await
      .map_err(Self::store_error)?
      .ok_or_else(|| {
        Interrupt::Internal(format!(
          "object type {} of object {id} not found",
          object.type_id
        ))
      })?;
    let name: Arc<str> = object_type.name.into();
    self.arena().object_types.insert(object.type_id, Arc::clone(&name));
    Ok(Some(name))
  }

  // ── Edges ─────────────────────────────────────────────────────────────────

  async fn fact_type_name(&self, fact: &Fact) -> Eval<Arc<str>> {
    if let Some(name) = self.arena().fact_types.get(&fact.type_id) {
      return Ok(Arc::clone(name));
    }
    self.check_deadline()?;
    let fact_type: FactType = self
      .store
      .get_fact_type(fact.type_id)
      .await
      .map_err(Self::store_error)?
      .ok_or_else(|| {
        Interrupt::Internal(format!(
          "fact type {} of fact {} not found",
          fact.type_id, fact.fact_id
        ))
      })?;
    let name: Arc<str> = fact_type.name.into();
    self.arena().fact_types.insert(fact.type_id, Arc::clone(&name));
    Ok(name)
  }

  /// Whether `fact` is retracted for the caller of this traversal.
  pub(crate) async fn is_retracted(&self, fact: &Fact) -> Eval<bool> {
    self.check_deadline()?;
    self.retractions.is_fact_retracted(fact).await.map_err(Self::store_error)
  }

  /// Facts bound to `vertex` that may become edges: readable, inside the
  /// requested time range and, unless asked otherwise, not retracted.
  async fn visible_facts(&self, vertex: Uuid) -> Eval<Arc<[Arc<Fact>]>> {
    if let Some(facts) = self.arena().adjacency.get(&vertex) {
      return Ok(Arc::clone(facts));
    }
    self.check_deadline()?;
    let bound = self.store.get_facts_bound_to(vertex).await.map_err(Self::store_error)?;

    let mut visible = Vec::with_capacity(bound.len());
    for fact in bound {
      self.pace().await?;
      if !self.scope.can_read_fact(&fact) || !self.params.in_time_range(&fact) {
        continue;
      }
      if !self.params.include_retracted && self.is_retracted(&fact).await? {
        continue;
      }
      visible.push(Arc::new(fact));
    }

    tracing::trace!(%vertex, edges = visible.len(), "expanded vertex");
    let visible: Arc<[Arc<Fact>]> = visible.into();
    self.arena().adjacency.insert(vertex, Arc::clone(&visible));
    Ok(visible)
  }

  /// Edges of `vertex` in `direction` whose label is one of `labels` (any
  /// label when empty). A Fact appears at most once per call.
  pub(crate) async fn edges(
    &self,
    vertex: Uuid,
    direction: Direction,
    labels: &[String],
  ) -> Eval<Vec<Edge>> {
    let facts = self.visible_facts(vertex).await?;
    let mut edges = Vec::new();
    for fact in facts.iter() {
      self.pace().await?;
      let Some(edge) = self.orient(fact, vertex, direction).await? else { continue };
      if labels.is_empty() || labels.iter().any(|l| l.as_str() == &*edge.label) {
        edges.push(edge);
      }
    }
    Ok(edges)
  }

  async fn orient(
    &self,
    fact: &Arc<Fact>,
    vertex: Uuid,
    direction: Direction,
  ) -> Eval<Option<Edge>> {
    let is_source = fact.source_object_id == Some(vertex);
    let is_destination = fact.destination_object_id == Some(vertex);

    let (out_vertex, in_vertex) = match (fact.source_object_id, fact.destination_object_id) {
      // One-legged: a self-loop, visible in every direction.
      (Some(_), None) | (None, Some(_)) => (vertex, None),
      (Some(source), Some(destination)) => {
        let outgoing = is_source || (fact.bidirectional && is_destination);
        let incoming = is_destination || (fact.bidirectional && is_source);
        let wanted = match direction {
          Direction::Out => outgoing,
          Direction::In => incoming,
          Direction::Both => outgoing || incoming,
        };
        if !wanted {
          return Ok(None);
        }
        // Reached from its destination, a bidirectional Fact is walked
        // backwards when going out, and vice versa.
        let flip = fact.bidirectional
          && match direction {
            Direction::Out => !is_source,
            Direction::In => !is_destination,
            Direction::Both => false,
          };
        if flip { (destination, Some(source)) } else { (source, Some(destination)) }
      }
      (None, None) => return Ok(None),
    };

    Ok(Some(Edge {
      fact: Arc::clone(fact),
      label: self.fact_type_name(fact).await?,
      out_vertex,
      in_vertex,
      via: vertex,
    }))
  }
}
