//! [`MemoryIndex`] — an in-process [`IndexBackend`].
//!
//! Documents are kept as JSON and the compiled [`Query`] and [`Aggregation`]
//! trees are evaluated directly against them, with the same semantics the
//! Elasticsearch rendering has. Keyword matching approximates
//! `simple_query_string` with the default `OR` operator: a document matches
//! when any query term equals one of its tokens (`term*` matches by prefix).
//!
//! Documents indexed without `refresh` stay invisible to searches until
//! [`MemoryIndex::refresh`] is called, mirroring a near-real-time index.

use std::{
  collections::{BTreeMap, HashMap, HashSet, VecDeque},
  time::Duration,
};

use serde_json::Value;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{
  aggregation::{AggregateResult, Aggregates, Aggregation, Aggregations, TermsBucket},
  backend::{IndexBackend, IndexOutcome, SearchRequest, SearchResponse},
  document::IndexedFactDocument,
  mapping::{IndexTemplate, TemplateKind},
  query::Query,
  Error, Result,
};

/// Sub-fields indexing a string value with different analyzers.
const MULTI_FIELDS: [&str; 3] = ["text", "ip", "domain"];

type Shard = BTreeMap<Uuid, Value>;

#[derive(Default)]
struct State {
  visible:     BTreeMap<String, Shard>,
  unrefreshed: BTreeMap<String, Shard>,
  scrolls:     HashMap<String, Scroll>,
  next_scroll: u64,
  /// Installed configuration by REST path.
  templates:   BTreeMap<String, IndexTemplate>,
}

struct Scroll {
  remaining: VecDeque<Uuid>,
  page_size: usize,
}

#[derive(Default)]
pub struct MemoryIndex {
  state: Mutex<State>,
}

impl MemoryIndex {
  pub fn new() -> Self { Self::default() }

  /// Make every indexed document visible to searches.
  pub async fn refresh(&self) {
    let mut state = self.state.lock().await;
    let pending = std::mem::take(&mut state.unrefreshed);
    for (index, docs) in pending {
      state.visible.entry(index).or_default().extend(docs);
    }
  }

  /// Names of the shards holding at least one document.
  pub async fn index_names(&self) -> Vec<String> {
    let state = self.state.lock().await;
    let mut names: Vec<String> = state
      .visible
      .keys()
      .chain(state.unrefreshed.keys())
      .cloned()
      .collect();
    names.sort();
    names.dedup();
    names
  }

  /// Number of open scroll cursors.
  pub async fn open_scrolls(&self) -> usize { self.state.lock().await.scrolls.len() }

  /// The configuration installed under `path`, e.g. `_index_template/x`.
  pub async fn template(&self, path: &str) -> Option<IndexTemplate> {
    self.state.lock().await.templates.get(path).cloned()
  }
}

impl IndexBackend for MemoryIndex {
  async fn search(&self, request: SearchRequest) -> Result<SearchResponse> {
    let mut state = self.state.lock().await;

    let shards: Vec<&Shard> = request
      .indices
      .iter()
      .filter_map(|name| state.visible.get(name))
      .collect();
    let total_shards = shards.len() as u64;

    let matching: Vec<Ctx<'_>> = shards
      .iter()
      .flat_map(|shard| shard.values())
      .map(Ctx::root)
      .filter(|ctx| matches(&request.query, *ctx))
      .collect();

    let aggregations = aggregate(&request.aggregations, &matching);
    let mut ids: VecDeque<Uuid> = matching.iter().filter_map(|ctx| document_id(ctx.doc)).collect();

    let take = request.size.min(ids.len());
    let page: Vec<Uuid> = ids.drain(..take).collect();
    let scroll_id = match request.scroll {
      Some(_) => {
        state.next_scroll += 1;
        let id = format!("memory-scroll-{}", state.next_scroll);
        state.scrolls.insert(id.clone(), Scroll {
          remaining: ids,
          page_size: request.size,
        });
        Some(id)
      }
      None => None,
    };

    Ok(SearchResponse { total_shards, hits: page, scroll_id, aggregations })
  }

  async fn scroll(&self, scroll_id: String, _keep_alive: Duration) -> Result<SearchResponse> {
    let mut state = self.state.lock().await;
    let scroll = state
      .scrolls
      .get_mut(&scroll_id)
      .ok_or_else(|| Error::Backend(format!("no search context found for id {scroll_id}")))?;

    let take = scroll.page_size.min(scroll.remaining.len());
    let hits = scroll.remaining.drain(..take).collect();
    Ok(SearchResponse {
      total_shards: 1,
      hits,
      scroll_id: Some(scroll_id),
      aggregations: Aggregates::default(),
    })
  }

  async fn clear_scroll(&self, scroll_id: String) -> Result<bool> {
    Ok(self.state.lock().await.scrolls.remove(&scroll_id).is_some())
  }

  async fn index_document(
    &self,
    index: String,
    document: IndexedFactDocument,
    refresh: bool,
  ) -> Result<IndexOutcome> {
    let id = document.id;
    let json = serde_json::to_value(&document)?;
    let mut state = self.state.lock().await;

    let existed = state.visible.get(&index).is_some_and(|s| s.contains_key(&id))
      || state.unrefreshed.get(&index).is_some_and(|s| s.contains_key(&id));

    if refresh {
      if let Some(pending) = state.unrefreshed.get_mut(&index) {
        pending.remove(&id);
      }
      state.visible.entry(index).or_default().insert(id, json);
    } else {
      state.unrefreshed.entry(index).or_default().insert(id, json);
    }

    Ok(if existed { IndexOutcome::Updated } else { IndexOutcome::Created })
  }

  async fn put_template(&self, template: IndexTemplate) -> Result<bool> {
    let mut state = self.state.lock().await;
    let path = template.path();
    if template.kind == TemplateKind::LifecyclePolicy
      && let Some(installed) = state.templates.get(&path)
      && installed.internal_version() >= template.internal_version()
    {
      return Ok(false);
    }
    state.templates.insert(path, template);
    Ok(true)
  }

  async fn get_document(&self, index: String, id: Uuid) -> Result<Option<IndexedFactDocument>> {
    let state = self.state.lock().await;
    // Realtime get: unrefreshed documents are returned too.
    let found = state
      .unrefreshed
      .get(&index)
      .and_then(|s| s.get(&id))
      .or_else(|| state.visible.get(&index).and_then(|s| s.get(&id)));
    found
      .map(|json| serde_json::from_value(json.clone()).map_err(Error::from))
      .transpose()
  }
}

fn document_id(doc: &Value) -> Option<Uuid> {
  doc.get("id").and_then(Value::as_str).and_then(|s| Uuid::parse_str(s).ok())
}

// ─── Query evaluation ────────────────────────────────────────────────────────

/// A root document, optionally focused on one of its nested Objects.
#[derive(Clone, Copy)]
struct Ctx<'a> {
  doc:    &'a Value,
  nested: Option<&'a Value>,
}

impl<'a> Ctx<'a> {
  fn root(doc: &'a Value) -> Self { Self { doc, nested: None } }

  fn field_values(self, field: &str) -> Vec<&'a Value> {
    match (self.nested, field.strip_prefix("objects.")) {
      (Some(object), Some(rest)) => lookup(object, rest),
      _ => lookup(self.doc, field),
    }
  }
}

/// All non-null values at a dotted path, with arrays flattened. A trailing
/// multi-field segment resolves to the string it indexes.
fn lookup<'a>(value: &'a Value, path: &str) -> Vec<&'a Value> {
  let segments: Vec<&str> = path.split('.').collect();
  let mut current = vec![value];

  for (i, segment) in segments.iter().enumerate() {
    let last = i + 1 == segments.len();
    let mut next = Vec::new();
    for value in current {
      match value {
        Value::Object(map) => match map.get(*segment) {
          Some(Value::Array(items)) => next.extend(items.iter().filter(|v| !v.is_null())),
          Some(Value::Null) | None => {}
          Some(child) => next.push(child),
        },
        Value::String(_) if last && MULTI_FIELDS.contains(segment) => next.push(value),
        _ => {}
      }
    }
    current = next;
  }
  current
}

fn matches(query: &Query, ctx: Ctx<'_>) -> bool {
  match query {
    Query::MatchAll => true,
    Query::Term { field, value } => {
      ctx.field_values(field).into_iter().any(|v| value_eq(v, value))
    }
    Query::Terms { field, values } => ctx
      .field_values(field)
      .into_iter()
      .any(|v| values.iter().any(|q| value_eq(v, q))),
    Query::Range { field, gte, lte } => {
      let gte = gte.as_ref().and_then(Value::as_f64);
      let lte = lte.as_ref().and_then(Value::as_f64);
      ctx.field_values(field).into_iter().filter_map(Value::as_f64).any(|n| {
        gte.is_none_or(|g| n >= g) && lte.is_none_or(|l| n <= l)
      })
    }
    Query::SimpleQueryString { field, query } => ctx
      .field_values(field)
      .into_iter()
      .filter_map(Value::as_str)
      .any(|text| keyword_matches(text, query)),
    Query::Nested { path, query } => match ctx.nested {
      Some(_) => matches(query, ctx),
      None => nested_elements(ctx.doc, path)
        .any(|object| matches(query, Ctx { doc: ctx.doc, nested: Some(object) })),
    },
    Query::Bool(b) => {
      b.filter.iter().all(|q| matches(q, ctx))
        && !b.must_not.iter().any(|q| matches(q, ctx))
        && (b.should.is_empty() || b.should.iter().any(|q| matches(q, ctx)))
    }
  }
}

fn nested_elements<'a>(doc: &'a Value, path: &str) -> impl Iterator<Item = &'a Value> {
  doc
    .get(path)
    .and_then(Value::as_array)
    .into_iter()
    .flatten()
}

fn value_eq(doc_value: &Value, query_value: &Value) -> bool {
  match (doc_value.as_f64(), query_value.as_f64()) {
    (Some(a), Some(b)) => a == b,
    _ => doc_value == query_value,
  }
}

fn keyword_matches(text: &str, keywords: &str) -> bool {
  let text = text.to_lowercase();
  let tokens: Vec<&str> = text
    .split(|c: char| !(c.is_alphanumeric() || matches!(c, '.' | '-' | ':' | '_')))
    .filter(|t| !t.is_empty())
    .collect();

  keywords
    .split_whitespace()
    .map(|term| {
      term
        .trim_matches(|c| matches!(c, '+' | '-' | '|' | '"' | '(' | ')'))
        .to_lowercase()
    })
    .filter(|term| !term.is_empty())
    .any(|term| match term.strip_suffix('*') {
      Some(prefix) => tokens.iter().any(|t| t.starts_with(prefix)),
      None => text == term || tokens.contains(&term.as_str()),
    })
}

fn key_string(value: &Value) -> String {
  match value {
    Value::String(s) => s.clone(),
    other => other.to_string(),
  }
}

// ─── Aggregation evaluation ──────────────────────────────────────────────────

fn aggregate(aggregations: &Aggregations, ctxs: &[Ctx<'_>]) -> Aggregates {
  Aggregates(
    aggregations
      .iter()
      .filter_map(|(name, agg)| aggregate_one(agg, ctxs).map(|r| (name.clone(), r)))
      .collect(),
  )
}

fn aggregate_one(aggregation: &Aggregation, ctxs: &[Ctx<'_>]) -> Option<AggregateResult> {
  let single = |inner: Vec<Ctx<'_>>, aggregations: &Aggregations| AggregateResult::SingleBucket {
    doc_count:    inner.len() as u64,
    aggregations: aggregate(aggregations, &inner),
  };

  Some(match aggregation {
    Aggregation::Nested { path, aggregations } => {
      let inner = ctxs
        .iter()
        .flat_map(|ctx| {
          nested_elements(ctx.doc, path).map(|object| Ctx { doc: ctx.doc, nested: Some(object) })
        })
        .collect();
      single(inner, aggregations)
    }
    Aggregation::ReverseNested { aggregations } => {
      let mut seen = HashSet::new();
      let parents = ctxs
        .iter()
        .filter(|ctx| seen.insert(std::ptr::from_ref(ctx.doc)))
        .map(|ctx| Ctx::root(ctx.doc))
        .collect();
      single(parents, aggregations)
    }
    Aggregation::Filter { query, aggregations } => {
      let inner = ctxs.iter().copied().filter(|ctx| matches(query, *ctx)).collect();
      single(inner, aggregations)
    }
    Aggregation::Cardinality { field, .. } => {
      let distinct: HashSet<String> = ctxs
        .iter()
        .flat_map(|ctx| ctx.field_values(field))
        .map(key_string)
        .collect();
      AggregateResult::Cardinality { value: distinct.len() as i64 }
    }
    Aggregation::Max { field } => AggregateResult::Max {
      value: ctxs
        .iter()
        .flat_map(|ctx| ctx.field_values(field))
        .filter_map(Value::as_f64)
        .reduce(f64::max),
    },
    Aggregation::Terms { field, size, aggregations } => terms(field, *size, aggregations, ctxs),
    Aggregation::BucketSelector(_) => return None,
  })
}

fn terms(
  field: &str,
  size: usize,
  aggregations: &Aggregations,
  ctxs: &[Ctx<'_>],
) -> AggregateResult {
  let mut groups: BTreeMap<String, Vec<Ctx<'_>>> = BTreeMap::new();
  for ctx in ctxs {
    let keys: HashSet<String> = ctx.field_values(field).into_iter().map(key_string).collect();
    for key in keys {
      groups.entry(key).or_default().push(*ctx);
    }
  }

  let mut grouped: Vec<(String, Vec<Ctx<'_>>)> = groups.into_iter().collect();
  // Largest bucket first, ties broken by key.
  grouped.sort_by(|a, b| b.1.len().cmp(&a.1.len()).then_with(|| a.0.cmp(&b.0)));
  grouped.truncate(size);

  let selectors: Vec<_> = aggregations
    .values()
    .filter_map(|agg| match agg {
      Aggregation::BucketSelector(selector) => Some(selector),
      _ => None,
    })
    .collect();

  let buckets = grouped
    .into_iter()
    .map(|(key, members)| TermsBucket {
      key,
      doc_count: members.len() as u64,
      aggregations: aggregate(aggregations, &members),
    })
    .filter(|bucket| {
      selectors.iter().all(|selector| {
        // Buckets without a value are skipped by the selector, not dropped.
        bucket
          .aggregations
          .resolve_path(&selector.count_path)
          .is_none_or(|count| selector.accepts(count))
      })
    })
    .collect();

  AggregateResult::Terms { buckets }
}
