//! Traversal tests against an in-memory `SqliteStore`.

use std::time::Duration;

use chrono::{TimeDelta, Utc};
use loom_core::{
  access::AccessScope,
  fact::{AccessMode, Fact, NewFact, RetractOptions},
  object::{FactType, IndexOption, Object, ObjectType},
  store::{ObjectFactStore, ObjectFactWriter},
};
use loom_store_sqlite::SqliteStore;
use serde_json::json;
use uuid::Uuid;

use crate::{Error, TraversalExecutor, TraversalSettings, TraversalValue, TraverseParams};

// ─── Fixture ─────────────────────────────────────────────────────────────────

/// `ip` 1.1.1.1 resolves (Public) to example.org and (RoleBased) to
/// other.org; the two domains are related (Public, bidirectional) and the ip
/// carries a one-legged Public `tag`.
struct Fixture {
  store:   SqliteStore,
  org:     Uuid,
  origin:  Uuid,
  ip:      Object,
  example: Object,
  other:   Object,
  public:  Fact,
  private: Fact,
  related: Fact,
  tag:     Fact,
}

async fn fact_type(store: &SqliteStore, name: &str) -> FactType {
  store
    .add_fact_type(FactType { id: Uuid::new_v4(), name: name.into() })
    .await
    .unwrap()
}

async fn object_type(store: &SqliteStore, name: &str) -> ObjectType {
  store
    .add_object_type(ObjectType {
      id:           Uuid::new_v4(),
      name:         name.into(),
      index_option: IndexOption::Daily,
    })
    .await
    .unwrap()
}

async fn fixture() -> Fixture {
  let store = SqliteStore::open_in_memory().await.expect("in-memory store");
  let org = Uuid::new_v4();
  let origin = Uuid::new_v4();

  let ip_type = object_type(&store, "ip").await;
  let domain_type = object_type(&store, "domain").await;
  let resolve = fact_type(&store, "resolve").await;
  let related_type = fact_type(&store, "related").await;
  let tag_type = fact_type(&store, "tag").await;

  let ip = store.resolve_object(ip_type.id, "1.1.1.1".into()).await.unwrap();
  let example = store
    .resolve_object(domain_type.id, "example.org".into())
    .await
    .unwrap();
  let other = store
    .resolve_object(domain_type.id, "other.org".into())
    .await
    .unwrap();

  let fact = |type_id: Uuid, mode: AccessMode| {
    let mut input = NewFact::new(type_id, org, origin);
    input.access_mode = mode;
    input
  };

  let mut input = fact(resolve.id, AccessMode::Public);
  input.source_object_id = Some(ip.object_id);
  input.destination_object_id = Some(example.object_id);
  let public = store.record_fact(input).await.unwrap();

  let mut input = fact(resolve.id, AccessMode::RoleBased);
  input.source_object_id = Some(ip.object_id);
  input.destination_object_id = Some(other.object_id);
  let private = store.record_fact(input).await.unwrap();

  let mut input = fact(related_type.id, AccessMode::Public);
  input.source_object_id = Some(example.object_id);
  input.destination_object_id = Some(other.object_id);
  input.bidirectional = true;
  let related = store.record_fact(input).await.unwrap();

  let mut input = fact(tag_type.id, AccessMode::Public);
  input.value = Some("scanner".into());
  input.source_object_id = Some(ip.object_id);
  let tag = store.record_fact(input).await.unwrap();

  Fixture { store, org, origin, ip, example, other, public, private, related, tag }
}

impl Fixture {
  fn member(&self) -> AccessScope { AccessScope::new([Uuid::new_v4()], [self.org]) }

  async fn run(
    &self,
    scope: &AccessScope,
    seed: &Object,
    query: &str,
  ) -> crate::Result<Vec<TraversalValue>> {
    self.run_with(scope, seed, query, &TraverseParams::default()).await
  }

  async fn run_with(
    &self,
    scope: &AccessScope,
    seed: &Object,
    query: &str,
    params: &TraverseParams,
  ) -> crate::Result<Vec<TraversalValue>> {
    TraversalExecutor::new(&self.store, TraversalSettings::default())
      .execute(scope, &[seed.object_id], query, params)
      .await
  }
}

fn object_values(values: &[TraversalValue]) -> Vec<&str> {
  let mut out: Vec<&str> = values
    .iter()
    .filter_map(TraversalValue::as_object)
    .map(|o| o.value.as_str())
    .collect();
  out.sort();
  out
}

fn fact_ids(values: &[TraversalValue]) -> Vec<Uuid> {
  let mut out: Vec<Uuid> = values
    .iter()
    .filter_map(TraversalValue::as_fact)
    .map(|f| f.fact_id)
    .collect();
  out.sort();
  out
}

fn sorted(mut ids: Vec<Uuid>) -> Vec<Uuid> {
  ids.sort();
  ids
}

// ─── Access control ──────────────────────────────────────────────────────────

#[tokio::test]
async fn no_read_access_is_an_empty_result() {
  let store = SqliteStore::open_in_memory().await.unwrap();
  let ip_type = object_type(&store, "ip").await;
  let domain_type = object_type(&store, "domain").await;
  let resolve = fact_type(&store, "resolve").await;
  let a = store.resolve_object(ip_type.id, "1.1.1.1".into()).await.unwrap();
  let b = store
    .resolve_object(domain_type.id, "example.org".into())
    .await
    .unwrap();

  let mut input = NewFact::new(resolve.id, Uuid::new_v4(), Uuid::new_v4());
  input.access_mode = AccessMode::Explicit;
  input.source_object_id = Some(a.object_id);
  input.destination_object_id = Some(b.object_id);
  store.record_fact(input).await.unwrap();

  let values = TraversalExecutor::new(&store, TraversalSettings::default())
    .execute(&AccessScope::default(), &[a.object_id], "g.outE()", &TraverseParams::default())
    .await
    .unwrap();
  assert!(values.is_empty());
}

#[tokio::test]
async fn edges_follow_read_access() {
  let f = fixture().await;

  let outsider = AccessScope::default();
  let values = f.run(&outsider, &f.ip, "g.out('resolve')").await.unwrap();
  assert_eq!(object_values(&values), vec!["example.org"]);

  let values = f.run(&f.member(), &f.ip, "g.out('resolve')").await.unwrap();
  assert_eq!(object_values(&values), vec!["example.org", "other.org"]);

  let values = f.run(&f.member(), &f.ip, "g.outE('resolve')").await.unwrap();
  assert_eq!(fact_ids(&values), sorted(vec![f.public.fact_id, f.private.fact_id]));
}

// ─── Orientation ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn in_walks_towards_the_source() {
  let f = fixture().await;
  let values = f.run(&f.member(), &f.other, "g.in('resolve')").await.unwrap();
  assert_eq!(object_values(&values), vec!["1.1.1.1"]);

  // Not outgoing from the destination.
  let values = f.run(&f.member(), &f.other, "g.out('resolve')").await.unwrap();
  assert!(values.is_empty());
}

#[tokio::test]
async fn bidirectional_facts_go_both_ways() {
  let f = fixture().await;
  let scope = AccessScope::default();

  let from_source = f.run(&scope, &f.example, "g.out('related')").await.unwrap();
  assert_eq!(object_values(&from_source), vec!["other.org"]);

  let from_destination = f.run(&scope, &f.other, "g.out('related')").await.unwrap();
  assert_eq!(object_values(&from_destination), vec!["example.org"]);

  let incoming = f.run(&scope, &f.other, "g.in('related')").await.unwrap();
  assert_eq!(object_values(&incoming), vec!["example.org"]);

  let edges = f.run(&scope, &f.other, "g.outE('related')").await.unwrap();
  assert_eq!(fact_ids(&edges), vec![f.related.fact_id]);

  let edge = f
    .run(&scope, &f.other, "g.outE('related').inV()")
    .await
    .unwrap();
  assert_eq!(object_values(&edge), vec!["example.org"]);
}

#[tokio::test]
async fn one_legged_fact_is_a_self_loop_without_far_end() {
  let f = fixture().await;
  let scope = AccessScope::default();

  assert!(f.run(&scope, &f.ip, "g.out('tag')").await.unwrap().is_empty());
  assert!(f.run(&scope, &f.ip, "g.in('tag')").await.unwrap().is_empty());

  let edges = f.run(&scope, &f.ip, "g.inE('tag')").await.unwrap();
  assert_eq!(fact_ids(&edges), vec![f.tag.fact_id]);

  let anchor = f.run(&scope, &f.ip, "g.outE('tag').outV()").await.unwrap();
  assert_eq!(object_values(&anchor), vec!["1.1.1.1"]);
  assert!(
    f.run(&scope, &f.ip, "g.outE('tag').otherV()")
      .await
      .unwrap()
      .is_empty()
  );
}

// ─── Retraction and time range ───────────────────────────────────────────────

#[tokio::test]
async fn retracted_edges_are_hidden_unless_requested() {
  let f = fixture().await;
  f.store
    .retract(f.public.fact_id, RetractOptions::new(f.org, f.origin))
    .await
    .unwrap();
  let scope = AccessScope::default();

  let values = f.run(&scope, &f.ip, "g.out('resolve')").await.unwrap();
  assert!(values.is_empty());

  let params = TraverseParams { include_retracted: true, ..TraverseParams::default() };
  let values = f
    .run_with(&scope, &f.ip, "g.outE('resolve').values('isRetracted')", &params)
    .await
    .unwrap();
  assert_eq!(values, vec![TraversalValue::Literal(json!(true))]);
}

#[tokio::test]
async fn time_range_restricts_edges() {
  let f = fixture().await;
  let scope = f.member();

  let future = TraverseParams {
    after: Some(Utc::now() + TimeDelta::hours(1)),
    ..TraverseParams::default()
  };
  assert!(
    f.run_with(&scope, &f.ip, "g.outE()", &future)
      .await
      .unwrap()
      .is_empty()
  );

  let past = TraverseParams {
    after: Some(Utc::now() - TimeDelta::hours(1)),
    before: Some(Utc::now() + TimeDelta::hours(1)),
    ..TraverseParams::default()
  };
  let values = f.run_with(&scope, &f.ip, "g.outE()", &past).await.unwrap();
  assert_eq!(values.len(), 3);
}

// ─── Steps ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn filters_and_projections() {
  let f = fixture().await;
  let scope = f.member();

  let values = f
    .run(&scope, &f.ip, "g.out().has('value', 'other.org').values('value')")
    .await
    .unwrap();
  assert_eq!(values, vec![TraversalValue::Literal(json!("other.org"))]);

  let values = f
    .run(&scope, &f.ip, "g.outE().hasLabel('tag').values('value')")
    .await
    .unwrap();
  assert_eq!(values, vec![TraversalValue::Literal(json!("scanner"))]);

  let values = f
    .run(&scope, &f.ip, "g.outE().has('accessMode', 'RoleBased').id()")
    .await
    .unwrap();
  assert_eq!(values, vec![TraversalValue::Literal(json!(f.private.fact_id))]);

  let values = f.run(&scope, &f.ip, "g.outE().hasNot('value').count()").await.unwrap();
  assert_eq!(values, vec![TraversalValue::Literal(json!(2))]);

  let values = f.run(&scope, &f.ip, "g.out().label().dedup()").await.unwrap();
  assert_eq!(values, vec![TraversalValue::Literal(json!("domain"))]);
}

#[tokio::test]
async fn two_hops_and_dedup() {
  let f = fixture().await;
  let scope = f.member();

  // ip → {example, other} → related → {other, example}
  let values = f.run(&scope, &f.ip, "g.out('resolve').both('related')").await.unwrap();
  assert_eq!(values.len(), 2);

  let values = f
    .run(&scope, &f.ip, "g.out('resolve').both('related').in('resolve').dedup()")
    .await
    .unwrap();
  assert_eq!(object_values(&values), vec!["1.1.1.1"]);

  let values = f.run(&scope, &f.ip, "g.bothE().otherV().limit(1)").await.unwrap();
  assert_eq!(values.len(), 1);
}

#[tokio::test]
async fn result_limit_and_unknown_seeds() {
  let f = fixture().await;
  let scope = f.member();

  let params = TraverseParams { limit: Some(1), ..TraverseParams::default() };
  let values = f.run_with(&scope, &f.ip, "g.outE()", &params).await.unwrap();
  assert_eq!(values.len(), 1);

  let values = TraversalExecutor::new(&f.store, TraversalSettings::default())
    .execute(&scope, &[Uuid::new_v4()], "g.out()", &TraverseParams::default())
    .await
    .unwrap();
  assert!(values.is_empty());

  // A bare `g` returns the seeds themselves.
  let values = f.run(&scope, &f.example, "g").await.unwrap();
  assert_eq!(values, vec![TraversalValue::Object(f.example.clone())]);
}

// ─── Failures ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn bad_queries_carry_the_query_text() {
  let f = fixture().await;
  let scope = f.member();

  for query in ["g.addE('resolve')", "g.out(", "g.outE().out()", "g.count().id()"] {
    match f.run(&scope, &f.ip, query).await {
      Err(Error::BadQuery { query: q, .. }) => assert_eq!(q, query),
      other => panic!("{query}: expected BadQuery, got {other:?}"),
    }
  }
}

#[tokio::test]
async fn too_many_traversers_is_a_bad_query() {
  let f = fixture().await;
  let settings = TraversalSettings { max_traversers: 1, ..TraversalSettings::default() };
  let result = TraversalExecutor::new(&f.store, settings)
    .execute(&f.member(), &[f.ip.object_id], "g.outE()", &TraverseParams::default())
    .await;
  assert!(matches!(result, Err(Error::BadQuery { reason, .. }) if reason.contains("exceeded")));
}

/// Delegates to a `SqliteStore`, delaying every adjacency lookup.
struct SlowStore {
  inner: SqliteStore,
  delay: Duration,
}

impl ObjectFactStore for SlowStore {
  type Error = loom_store_sqlite::Error;

  async fn get_object(&self, id: Uuid) -> Result<Option<Object>, Self::Error> {
    self.inner.get_object(id).await
  }

  async fn get_object_by_value(
    &self,
    type_id: Uuid,
    value: &str,
  ) -> Result<Option<Object>, Self::Error> {
    self.inner.get_object_by_value(type_id, value).await
  }

  async fn get_object_type(&self, id: Uuid) -> Result<Option<ObjectType>, Self::Error> {
    self.inner.get_object_type(id).await
  }

  async fn get_fact_type(&self, id: Uuid) -> Result<Option<FactType>, Self::Error> {
    self.inner.get_fact_type(id).await
  }

  async fn get_fact(&self, id: Uuid) -> Result<Option<Fact>, Self::Error> {
    self.inner.get_fact(id).await
  }

  async fn find_retractions_of(&self, fact_id: Uuid) -> Result<Vec<Fact>, Self::Error> {
    self.inner.find_retractions_of(fact_id).await
  }

  async fn get_facts_bound_to(&self, object_id: Uuid) -> Result<Vec<Fact>, Self::Error> {
    tokio::time::sleep(self.delay).await;
    self.inner.get_facts_bound_to(object_id).await
  }
}

#[tokio::test]
async fn slow_traversal_times_out() {
  let f = fixture().await;
  let seed = f.ip.object_id;
  let slow = SlowStore { inner: f.store, delay: Duration::from_millis(500) };

  let result = TraversalExecutor::new(&slow, TraversalSettings::default())
    .execute_within(
      &AccessScope::default(),
      &[seed],
      "g.out().out()",
      &TraverseParams::default(),
      Duration::from_millis(50),
    )
    .await;

  match result {
    Err(Error::Timeout { query, limit }) => {
      assert_eq!(query, "g.out().out()");
      assert_eq!(limit, Duration::from_millis(50));
    }
    other => panic!("expected Timeout, got {other:?}"),
  }
}

/// `width` distinct Public `resolve` Facts from one ip to one domain.
async fn fan_out(width: usize) -> (SqliteStore, Object) {
  let store = SqliteStore::open_in_memory().await.unwrap();
  let ip_type = object_type(&store, "ip").await;
  let domain_type = object_type(&store, "domain").await;
  let resolve = fact_type(&store, "resolve").await;
  let ip = store.resolve_object(ip_type.id, "1.1.1.1".into()).await.unwrap();
  let domain = store
    .resolve_object(domain_type.id, "example.org".into())
    .await
    .unwrap();

  let (org, origin) = (Uuid::new_v4(), Uuid::new_v4());
  for i in 0..width {
    let mut input = NewFact::new(resolve.id, org, origin);
    input.access_mode = AccessMode::Public;
    input.value = Some(i.to_string());
    input.source_object_id = Some(ip.object_id);
    input.destination_object_id = Some(domain.object_id);
    store.record_fact(input).await.unwrap();
  }
  (store, ip)
}

#[tokio::test]
async fn wide_traversal_over_cached_edges_times_out() {
  let (store, ip) = fan_out(300).await;
  // Two vertices, so every hop after the first is served from the arena.
  let settings = TraversalSettings { max_traversers: 2_000_000, ..TraversalSettings::default() };
  let limit = Duration::from_millis(5);

  let started = std::time::Instant::now();
  let result = TraversalExecutor::new(&store, settings)
    .execute_within(
      &AccessScope::default(),
      &[ip.object_id],
      "g.both().both().both()",
      &TraverseParams::default(),
      limit,
    )
    .await;

  assert!(matches!(result, Err(Error::Timeout { .. })), "got {result:?}");
  assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn cap_applies_within_a_step() {
  let (store, ip) = fan_out(50).await;
  let settings = TraversalSettings { max_traversers: 10, ..TraversalSettings::default() };
  let result = TraversalExecutor::new(&store, settings)
    .execute(&AccessScope::default(), &[ip.object_id], "g.out()", &TraverseParams::default())
    .await;
  assert!(matches!(result, Err(Error::BadQuery { reason, .. }) if reason.contains("10 traversers")));
}

#[tokio::test]
async fn unrepresentable_time_limit_means_no_deadline() {
  let f = fixture().await;
  let values = TraversalExecutor::new(&f.store, TraversalSettings::default())
    .execute_within(
      &f.member(),
      &[f.ip.object_id],
      "g.out('resolve')",
      &TraverseParams::default(),
      Duration::MAX,
    )
    .await
    .unwrap();
  assert_eq!(object_values(&values), vec!["example.org", "other.org"]);
}
