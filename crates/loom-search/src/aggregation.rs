//! Aggregation trees and their results.
//!
//! Requests are built as an [`Aggregation`] tree keyed by name; responses come
//! back as [`Aggregates`], a map of the same names to [`AggregateResult`]s.
//! Values that cannot be resolved are reported as `-1` with a warning rather
//! than failing the whole request.

use std::collections::BTreeMap;

use serde_json::{Value, json};

use crate::{
  criteria::{ObjectStatisticsCriteria, SearchCriteria},
  query::{self, OBJECTS_PATH, Query},
};

/// Precision threshold for every cardinality aggregation and the maximum
/// number of terms buckets. Counts below it are exact.
pub const MAX_RESULT_WINDOW: usize = 10_000;

pub const FACTS_COUNT: &str = "FactsCountAggregation";
pub const NESTED_OBJECTS: &str = "NestedObjectsAggregation";
pub const FILTER_OBJECTS: &str = "FilterObjectsAggregation";
pub const OBJECTS_COUNT: &str = "ObjectsCountAggregation";
pub const UNIQUE_OBJECTS: &str = "UniqueObjectsAggregation";
pub const REVERSED_FACTS: &str = "ReversedFactsAggregation";
pub const MIN_MAX_FACTS_FILTERED: &str = "MinMaxFactsFilteredAggregation";
pub const UNIQUE_FACT_TYPES: &str = "UniqueFactTypesAggregation";
pub const FACTS_COUNT_PER_TYPE: &str = "FactsCountPerTypeAggregation";
pub const MAX_LAST_ADDED: &str = "MaxLastAddedTimestampAggregation";
pub const MAX_LAST_SEEN: &str = "MaxLastSeenTimestampAggregation";

// ─── Request model ───────────────────────────────────────────────────────────

pub type Aggregations = BTreeMap<String, Aggregation>;

#[derive(Debug, Clone, PartialEq)]
pub enum Aggregation {
  /// Step into the nested documents under `path`.
  Nested { path: String, aggregations: Aggregations },
  /// Step back from nested documents to their parents.
  ReverseNested { aggregations: Aggregations },
  Filter { query: Query, aggregations: Aggregations },
  Cardinality { field: String, precision_threshold: usize },
  Max { field: String },
  Terms { field: String, size: usize, aggregations: Aggregations },
  /// Pipeline aggregation dropping buckets of the enclosing terms
  /// aggregation.
  BucketSelector(BucketSelector),
}

/// Keeps a bucket iff `min <= value(count_path) <= max`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketSelector {
  /// `>`-separated path to a numeric value inside the bucket.
  pub count_path: String,
  pub min:        i64,
  pub max:        i64,
}

impl BucketSelector {
  pub fn accepts(&self, count: i64) -> bool { self.min <= count && count <= self.max }

  pub fn script(&self) -> String {
    format!("params.count >= {} && params.count <= {}", self.min, self.max)
  }
}

impl Aggregation {
  pub fn cardinality(field: &str) -> Self {
    Self::Cardinality {
      field:               field.to_owned(),
      precision_threshold: MAX_RESULT_WINDOW,
    }
  }

  /// Render as an Elasticsearch aggregation body.
  pub fn to_json(&self) -> Value {
    let (mut body, children) = match self {
      Self::Nested { path, aggregations } => {
        (json!({ "nested": { "path": path } }), Some(aggregations))
      }
      Self::ReverseNested { aggregations } => {
        (json!({ "reverse_nested": {} }), Some(aggregations))
      }
      Self::Filter { query, aggregations } => {
        (json!({ "filter": query.to_json() }), Some(aggregations))
      }
      Self::Cardinality { field, precision_threshold } => (
        json!({
          "cardinality": { "field": field, "precision_threshold": precision_threshold }
        }),
        None,
      ),
      Self::Max { field } => (json!({ "max": { "field": field } }), None),
      Self::Terms { field, size, aggregations } => (
        json!({ "terms": { "field": field, "size": size } }),
        Some(aggregations),
      ),
      Self::BucketSelector(selector) => (
        json!({
          "bucket_selector": {
            "buckets_path": { "count": selector.count_path },
            "script": selector.script(),
          }
        }),
        None,
      ),
    };

    if let Some(children) = children.filter(|c| !c.is_empty()) {
      body["aggs"] = aggregations_to_json(children);
    }
    body
  }
}

pub fn aggregations_to_json(aggregations: &Aggregations) -> Value {
  Value::Object(
    aggregations
      .iter()
      .map(|(name, agg)| (name.clone(), agg.to_json()))
      .collect(),
  )
}

fn single(name: &str, aggregation: Aggregation) -> Aggregations {
  BTreeMap::from([(name.to_owned(), aggregation)])
}

// ─── Compilers ───────────────────────────────────────────────────────────────

/// Top-level count of unique Facts; daily shards may hold duplicates.
pub fn compile_facts_count() -> Aggregations {
  single(FACTS_COUNT, Aggregation::cardinality("id"))
}

/// Buckets of unique Objects bound to the matching Facts, with the total
/// number of such Objects.
pub fn compile_object_aggregation(criteria: &SearchCriteria) -> Aggregations {
  let size = match criteria.limit {
    0 => MAX_RESULT_WINDOW,
    limit => limit.min(MAX_RESULT_WINDOW),
  };

  let mut unique_objects = Aggregations::new();
  if criteria.has_facts_count_filter() {
    unique_objects.insert(
      REVERSED_FACTS.to_owned(),
      Aggregation::ReverseNested { aggregations: compile_facts_count() },
    );
    unique_objects.insert(
      MIN_MAX_FACTS_FILTERED.to_owned(),
      Aggregation::BucketSelector(BucketSelector {
        count_path: format!("{REVERSED_FACTS}>{FACTS_COUNT}"),
        min:        criteria.min_facts_count.unwrap_or(0),
        max:        criteria.max_facts_count.unwrap_or(i64::from(i32::MAX)),
      }),
    );
  }

  let mut filtered = Aggregations::new();
  filtered.insert(OBJECTS_COUNT.to_owned(), Aggregation::cardinality("objects.id"));
  filtered.insert(UNIQUE_OBJECTS.to_owned(), Aggregation::Terms {
    field:        "objects.id".into(),
    size,
    aggregations: unique_objects,
  });

  single(NESTED_OBJECTS, Aggregation::Nested {
    path:         OBJECTS_PATH.into(),
    aggregations: single(FILTER_OBJECTS, Aggregation::Filter {
      query:        query::compile_objects(criteria),
      aggregations: filtered,
    }),
  })
}

/// Per Object and Fact type: number of Facts, last added and last seen.
pub fn compile_statistics_aggregation(
  criteria: &ObjectStatisticsCriteria,
) -> Aggregations {
  let per_type = BTreeMap::from([
    (FACTS_COUNT_PER_TYPE.to_owned(), Aggregation::cardinality("id")),
    (MAX_LAST_ADDED.to_owned(), Aggregation::Max { field: "timestamp".into() }),
    (MAX_LAST_SEEN.to_owned(), Aggregation::Max {
      field: "lastSeenTimestamp".into(),
    }),
  ]);

  let reversed = single(UNIQUE_FACT_TYPES, Aggregation::Terms {
    field:        "typeID".into(),
    size:         MAX_RESULT_WINDOW,
    aggregations: per_type,
  });

  let unique_objects = single(UNIQUE_OBJECTS, Aggregation::Terms {
    field:        "objects.id".into(),
    size:         criteria.object_ids.len(),
    aggregations: single(REVERSED_FACTS, Aggregation::ReverseNested {
      aggregations: reversed,
    }),
  });

  single(NESTED_OBJECTS, Aggregation::Nested {
    path:         OBJECTS_PATH.into(),
    aggregations: single(FILTER_OBJECTS, Aggregation::Filter {
      query:        Query::terms(
        "objects.id",
        criteria.object_ids.iter().map(|id| id.to_string()),
      ),
      aggregations: unique_objects,
    }),
  })
}

// ─── Results ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Aggregates(pub BTreeMap<String, AggregateResult>);

#[derive(Debug, Clone, PartialEq)]
pub enum AggregateResult {
  Cardinality { value: i64 },
  /// `None` when no document had the field.
  Max { value: Option<f64> },
  Terms { buckets: Vec<TermsBucket> },
  /// Nested, reverse-nested and filter results.
  SingleBucket { doc_count: u64, aggregations: Aggregates },
}

#[derive(Debug, Clone, PartialEq)]
pub struct TermsBucket {
  pub key:          String,
  pub doc_count:    u64,
  pub aggregations: Aggregates,
}

impl Aggregates {
  pub fn get(&self, name: &str) -> Option<&AggregateResult> { self.0.get(name) }

  /// Find `name` here or inside any single-bucket result, depth first.
  pub fn find(&self, name: &str) -> Option<&AggregateResult> {
    if let Some(found) = self.0.get(name) {
      return Some(found);
    }
    self.0.values().find_map(|result| match result {
      AggregateResult::SingleBucket { aggregations, .. } => aggregations.find(name),
      _ => None,
    })
  }

  /// The cardinality value of `name`, or `-1` if it is missing or of
  /// another shape.
  pub fn count(&self, name: &str) -> i64 {
    match self.find(name) {
      Some(AggregateResult::Cardinality { value }) => *value,
      _ => {
        tracing::warn!(aggregation = name, "could not retrieve count from aggregation");
        -1
      }
    }
  }

  /// The rounded max value of `name` (a direct child), or `-1`.
  pub fn max_timestamp(&self, name: &str) -> i64 {
    match self.get(name) {
      Some(AggregateResult::Max { value: Some(value) }) => value.round() as i64,
      Some(AggregateResult::Max { value: None }) => -1,
      _ => {
        tracing::warn!(aggregation = name, "could not retrieve maximum timestamp");
        -1
      }
    }
  }

  /// Buckets of the terms result `name`, searched recursively.
  pub fn buckets(&self, name: &str) -> Option<&[TermsBucket]> {
    match self.find(name) {
      Some(AggregateResult::Terms { buckets }) => Some(buckets),
      _ => None,
    }
  }

  /// Resolve a `>`-separated path to a numeric value, descending through
  /// single-bucket results.
  pub fn resolve_path(&self, path: &str) -> Option<i64> {
    let mut current = self;
    let mut segments = path.split('>').peekable();
    while let Some(segment) = segments.next() {
      let result = current.get(segment)?;
      if segments.peek().is_none() {
        return match result {
          AggregateResult::Cardinality { value } => Some(*value),
          AggregateResult::Max { value } => value.map(|v| v.round() as i64),
          AggregateResult::SingleBucket { doc_count, .. } => i64::try_from(*doc_count).ok(),
          AggregateResult::Terms { .. } => None,
        };
      }
      match result {
        AggregateResult::SingleBucket { aggregations, .. } => current = aggregations,
        _ => return None,
      }
    }
    None
  }
}

#[cfg(test)]
mod tests {
  use std::collections::BTreeSet;

  use loom_core::access::AccessScope;
  use uuid::Uuid;

  use super::*;

  fn card(value: i64) -> AggregateResult { AggregateResult::Cardinality { value } }

  fn bucket(aggs: Vec<(&str, AggregateResult)>) -> AggregateResult {
    AggregateResult::SingleBucket {
      doc_count:    1,
      aggregations: Aggregates(
        aggs.into_iter().map(|(k, v)| (k.to_owned(), v)).collect(),
      ),
    }
  }

  #[test]
  fn find_descends_into_single_buckets() {
    let aggs = Aggregates(BTreeMap::from([(
      NESTED_OBJECTS.to_owned(),
      bucket(vec![(FILTER_OBJECTS, bucket(vec![(OBJECTS_COUNT, card(7))]))]),
    )]));
    assert_eq!(aggs.count(OBJECTS_COUNT), 7);
  }

  #[test]
  fn missing_or_mistyped_count_is_minus_one() {
    let aggs = Aggregates(BTreeMap::from([(
      OBJECTS_COUNT.to_owned(),
      AggregateResult::Max { value: Some(1.0) },
    )]));
    assert_eq!(aggs.count(OBJECTS_COUNT), -1);
    assert_eq!(Aggregates::default().count(FACTS_COUNT), -1);
  }

  #[test]
  fn resolve_bucket_path() {
    let aggs = Aggregates(BTreeMap::from([(
      REVERSED_FACTS.to_owned(),
      bucket(vec![(FACTS_COUNT, card(3))]),
    )]));
    assert_eq!(aggs.resolve_path("ReversedFactsAggregation>FactsCountAggregation"), Some(3));
    assert_eq!(aggs.resolve_path("ReversedFactsAggregation>Nope"), None);
  }

  #[test]
  fn bucket_selector_only_with_bounds() {
    let mut criteria = SearchCriteria::new(AccessScope::default());
    let plain = aggregations_to_json(&compile_object_aggregation(&criteria));
    let terms = &plain[NESTED_OBJECTS]["aggs"][FILTER_OBJECTS]["aggs"][UNIQUE_OBJECTS];
    assert_eq!(terms["terms"]["size"], MAX_RESULT_WINDOW);
    assert!(terms.get("aggs").is_none());

    criteria.limit = 25;
    criteria.min_facts_count = Some(2);
    let filtered = aggregations_to_json(&compile_object_aggregation(&criteria));
    let terms = &filtered[NESTED_OBJECTS]["aggs"][FILTER_OBJECTS]["aggs"][UNIQUE_OBJECTS];
    assert_eq!(terms["terms"]["size"], 25);
    assert_eq!(
      terms["aggs"][MIN_MAX_FACTS_FILTERED]["bucket_selector"]["script"],
      format!("params.count >= 2 && params.count <= {}", i32::MAX)
    );
  }

  #[test]
  fn statistics_terms_sized_to_input() {
    let criteria = ObjectStatisticsCriteria {
      object_ids: BTreeSet::from([Uuid::new_v4(), Uuid::new_v4()]),
      ..ObjectStatisticsCriteria::default()
    };
    let json = aggregations_to_json(&compile_statistics_aggregation(&criteria));
    let terms = &json[NESTED_OBJECTS]["aggs"][FILTER_OBJECTS]["aggs"][UNIQUE_OBJECTS];
    assert_eq!(terms["terms"]["size"], 2);
    assert_eq!(
      terms["aggs"][REVERSED_FACTS]["aggs"][UNIQUE_FACT_TYPES]["terms"]["field"],
      "typeID"
    );
  }
}
