//! The structured filter tree and the compiler producing it from
//! [`SearchCriteria`].
//!
//! [`Query`] is backend-neutral. [`Query::to_json`] renders the
//! Elasticsearch DSL; [`crate::memory::MemoryIndex`] evaluates the same tree
//! in-process.

use std::collections::BTreeSet;

use loom_core::{access::AccessScope, fact::{AccessMode, FactFlag}};
use serde_json::{Value, json};

use crate::criteria::{
  FieldStrategy, KeywordFieldStrategy, MatchStrategy, NumberFieldStrategy,
  ObjectStatisticsCriteria, SearchCriteria, TimeFieldStrategy, positive_millis,
  resolve_fields,
};

/// Path of the nested bound-Object documents.
pub const OBJECTS_PATH: &str = "objects";

// ─── Query model ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Query {
  MatchAll,
  Term { field: String, value: Value },
  /// Matches when the field holds any of `values`. An empty set matches
  /// nothing.
  Terms { field: String, values: Vec<Value> },
  Range { field: String, gte: Option<Value>, lte: Option<Value> },
  /// Lenient full-text match of `query` against one field.
  SimpleQueryString { field: String, query: String },
  Nested { path: String, query: Box<Query> },
  Bool(BoolQuery),
}

/// Conjunction of `filter`, excluding `must_not`, and requiring at least one
/// `should` when any is present.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoolQuery {
  pub filter:   Vec<Query>,
  pub should:   Vec<Query>,
  pub must_not: Vec<Query>,
}

impl BoolQuery {
  pub fn filter(mut self, query: Query) -> Self {
    self.filter.push(query);
    self
  }

  pub fn should(mut self, query: Query) -> Self {
    self.should.push(query);
    self
  }

  pub fn build(self) -> Query { Query::Bool(self) }
}

impl Query {
  pub fn term(field: &str, value: impl Into<Value>) -> Self {
    Self::Term { field: field.to_owned(), value: value.into() }
  }

  pub fn terms<V: Into<Value>>(
    field: &str,
    values: impl IntoIterator<Item = V>,
  ) -> Self {
    Self::Terms {
      field:  field.to_owned(),
      values: values.into_iter().map(Into::into).collect(),
    }
  }

  pub fn range(field: &str, gte: Option<Value>, lte: Option<Value>) -> Self {
    Self::Range { field: field.to_owned(), gte, lte }
  }

  pub fn nested(path: &str, query: Query) -> Self {
    Self::Nested { path: path.to_owned(), query: Box::new(query) }
  }

  /// Render as Elasticsearch query DSL.
  pub fn to_json(&self) -> Value {
    match self {
      Self::MatchAll => json!({ "match_all": {} }),
      Self::Term { field, value } => json!({ "term": { field: value } }),
      Self::Terms { field, values } => json!({ "terms": { field: values } }),
      Self::Range { field, gte, lte } => {
        let mut bounds = serde_json::Map::new();
        if let Some(gte) = gte {
          bounds.insert("gte".into(), gte.clone());
        }
        if let Some(lte) = lte {
          bounds.insert("lte".into(), lte.clone());
        }
        json!({ "range": { field: bounds } })
      }
      Self::SimpleQueryString { field, query } => json!({
        "simple_query_string": {
          "query": query,
          "fields": [field],
          "lenient": true,
        }
      }),
      Self::Nested { path, query } => json!({
        "nested": {
          "path": path,
          "query": query.to_json(),
          "score_mode": "none",
        }
      }),
      Self::Bool(b) => {
        let render = |qs: &[Query]| qs.iter().map(Query::to_json).collect::<Vec<_>>();
        let mut body = serde_json::Map::new();
        if !b.filter.is_empty() {
          body.insert("filter".into(), Value::Array(render(&b.filter)));
        }
        if !b.should.is_empty() {
          body.insert("should".into(), Value::Array(render(&b.should)));
          body.insert("minimum_should_match".into(), json!(1));
        }
        if !b.must_not.is_empty() {
          body.insert("must_not".into(), Value::Array(render(&b.must_not)));
        }
        json!({ "bool": body })
      }
    }
  }
}

fn uuid_values<'a>(ids: impl IntoIterator<Item = &'a uuid::Uuid>) -> Vec<Value> {
  ids.into_iter().map(|id| Value::String(id.to_string())).collect()
}

// ─── Access control ──────────────────────────────────────────────────────────

/// Query form of [`loom_core::access::can_read`].
pub fn access_control_query(scope: &AccessScope) -> Query {
  let in_acl = || Query::terms("acl", uuid_values(&scope.current_user_identities));

  BoolQuery::default()
    .should(Query::term("accessMode", AccessMode::Public.as_str()))
    .should(
      BoolQuery::default()
        .filter(Query::term("accessMode", AccessMode::Explicit.as_str()))
        .filter(in_acl())
        .build(),
    )
    .should(
      BoolQuery::default()
        .filter(Query::term("accessMode", AccessMode::RoleBased.as_str()))
        .filter(
          BoolQuery::default()
            .should(in_acl())
            .should(Query::terms(
              "organizationID",
              uuid_values(&scope.available_organization_ids),
            ))
            .build(),
        )
        .build(),
    )
    .build()
}

// ─── Fact query ──────────────────────────────────────────────────────────────

/// Compile `criteria` into the Fact-document filter. Empty criteria compile
/// to the access-control clause alone.
pub fn compile(criteria: &SearchCriteria) -> Query {
  let mut root = BoolQuery::default();
  apply_simple_filters(criteria, &mut root);
  apply_keywords(criteria, &mut root);
  apply_time(criteria, &mut root);
  apply_number(criteria, &mut root);
  root.filter.push(access_control_query(&criteria.access));
  root.build()
}

fn apply_simple_filters(criteria: &SearchCriteria, root: &mut BoolQuery) {
  let mut terms = |field: &str, values: Vec<Value>| {
    if !values.is_empty() {
      root.filter.push(Query::terms(field, values));
    }
  };
  terms("id", uuid_values(&criteria.fact_ids));
  terms("typeID", uuid_values(&criteria.fact_type_ids));
  terms("value", criteria.fact_values.iter().cloned().map(Value::from).collect());
  terms("inReferenceTo", uuid_values(&criteria.in_reference_to));
  terms("organizationID", uuid_values(&criteria.organization_ids));
  terms("sourceID", uuid_values(&criteria.origin_ids));

  for object_filter in object_filters(criteria) {
    root.filter.push(Query::nested(OBJECTS_PATH, object_filter));
  }

  if let Some(binding) = criteria.fact_binding {
    root.filter.push(Query::term("objectCount", binding.object_count()));
  }
}

/// Exact-match filters on the bound Objects, relative to the nested
/// document.
fn object_filters(criteria: &SearchCriteria) -> Vec<Query> {
  let mut filters = Vec::new();
  if !criteria.object_ids.is_empty() {
    filters.push(Query::terms("objects.id", uuid_values(&criteria.object_ids)));
  }
  if !criteria.object_type_ids.is_empty() {
    filters.push(Query::terms(
      "objects.typeID",
      uuid_values(&criteria.object_type_ids),
    ));
  }
  if !criteria.object_values.is_empty() {
    filters.push(Query::terms(
      "objects.value",
      criteria.object_values.iter().cloned().map(Value::from),
    ));
  }
  filters
}

fn apply_keywords(criteria: &SearchCriteria, root: &mut BoolQuery) {
  let Some(keywords) = criteria.keywords() else { return };
  let fields = resolve_fields(&criteria.keyword_fields, KeywordFieldStrategy::All);
  root.filter.push(field_strategy(&fields, criteria.keyword_match, |field| {
    keyword_query(field, keywords, true)
  }));
}

fn keyword_query(field: &str, keywords: &str, wrap_nested: bool) -> Query {
  let query = Query::SimpleQueryString {
    field: field.to_owned(),
    query: keywords.to_owned(),
  };
  if wrap_nested && field.starts_with("objects.") {
    Query::nested(OBJECTS_PATH, query)
  } else {
    query
  }
}

fn apply_time(criteria: &SearchCriteria, root: &mut BoolQuery) {
  let Some(time) = &criteria.time else { return };
  let (start, end) = time.millis();
  if start.is_none() && end.is_none() {
    return;
  }

  let fields = resolve_fields(&time.fields, TimeFieldStrategy::All);
  let daily = field_strategy(&fields, time.match_strategy, |field| {
    Query::range(field, start.map(Value::from), end.map(Value::from))
  });

  // The time-global shard only honours the end bound, on `timestamp`.
  let mut time_global = BoolQuery::default()
    .filter(Query::term("flags", flag_name(FactFlag::TimeGlobalIndex)));
  if let Some(end) = end {
    time_global = time_global.filter(Query::range("timestamp", None, Some(end.into())));
  }

  root.filter.push(
    BoolQuery::default()
      .should(daily)
      .should(time_global.build())
      .build(),
  );
}

fn apply_number(criteria: &SearchCriteria, root: &mut BoolQuery) {
  let Some(number) = &criteria.number else { return };
  if number.min.is_none() && number.max.is_none() {
    return;
  }

  let fields = resolve_fields(&number.fields, NumberFieldStrategy::All);
  root.filter.push(field_strategy(&fields, number.match_strategy, |field| {
    Query::range(field, number.min.map(Value::from), number.max.map(Value::from))
  }));
}

/// Replicate a per-field clause across `fields`, requiring all of them or
/// any one of them.
fn field_strategy(
  fields: &BTreeSet<&'static str>,
  strategy: MatchStrategy,
  mut per_field: impl FnMut(&str) -> Query,
) -> Query {
  let mut query = BoolQuery::default();
  for &field in fields {
    match strategy {
      MatchStrategy::All => query.filter.push(per_field(field)),
      MatchStrategy::Any => query.should.push(per_field(field)),
    }
  }
  query.build()
}

/// Name used for a flag in index documents.
pub fn flag_name(flag: FactFlag) -> &'static str {
  match flag {
    FactFlag::RetractedHint => "RetractedHint",
    FactFlag::TimeGlobalIndex => "TimeGlobalIndex",
  }
}

// ─── Object-level query ──────────────────────────────────────────────────────

/// Filter applied to nested Object documents inside the Object search
/// aggregation. Clauses address the nested document directly.
pub fn compile_objects(criteria: &SearchCriteria) -> Query {
  let mut root = BoolQuery::default();
  root.filter.extend(object_filters(criteria));

  let strategies = KeywordFieldStrategy::object_strategies(&criteria.keyword_fields);
  match criteria.keywords() {
    Some(keywords) if !strategies.is_empty() => {
      let fields: BTreeSet<&'static str> = strategies
        .iter()
        .flat_map(|s| s.fields().iter().copied())
        .collect();
      root.filter.push(field_strategy(&fields, criteria.keyword_match, |field| {
        keyword_query(field, keywords, false)
      }));
    }
    _ => {}
  }

  root.build()
}

// ─── Statistics query ────────────────────────────────────────────────────────

pub fn compile_statistics(criteria: &ObjectStatisticsCriteria) -> Query {
  let mut root = BoolQuery::default().filter(access_control_query(&criteria.access));
  let start = positive_millis(criteria.start);
  let end = positive_millis(criteria.end);
  if start.is_some() || end.is_some() {
    root = root.filter(Query::range(
      "lastSeenTimestamp",
      start.map(Value::from),
      end.map(Value::from),
    ));
  }
  root.build()
}
