//! End-to-end tests of the compilers against `MemoryIndex`.

use std::{collections::BTreeSet, num::NonZeroUsize, sync::Arc};

use chrono::{TimeDelta, Utc};
use loom_core::{
  access::{AccessScope, can_read},
  fact::{AccessMode, FactFlag},
};
use serde_json::json;
use uuid::Uuid;

use crate::{
  backend::IndexBackend,
  criteria::{ObjectStatisticsCriteria, SearchCriteria, TimeRange},
  document::{IndexedFactDocument, ObjectDocument},
  index::IndexSelector,
  mapping::{self, POLICY_INTERNAL_VERSION},
  memory::MemoryIndex,
  FactSearchManager, SearchSettings,
};

fn manager(page_size: usize) -> FactSearchManager<MemoryIndex> {
  FactSearchManager::new(
    Arc::new(MemoryIndex::new()),
    IndexSelector::default(),
    SearchSettings {
      scroll_page_size: NonZeroUsize::new(page_size).expect("non-zero page size"),
      immediate_visibility: true,
      ..SearchSettings::default()
    },
  )
}

fn object(value: &str) -> ObjectDocument {
  ObjectDocument { id: Uuid::new_v4(), type_id: Uuid::new_v4(), value: value.into() }
}

fn document(type_id: Uuid, objects: Vec<ObjectDocument>) -> IndexedFactDocument {
  let now = Utc::now().timestamp_millis();
  IndexedFactDocument {
    id: Uuid::new_v4(),
    type_id,
    type_name: "observed".into(),
    value: None,
    in_reference_to: None,
    organization_id: Uuid::new_v4(),
    origin_id: Uuid::new_v4(),
    access_mode: AccessMode::Public,
    trust: 0.8,
    confidence: 1.0,
    certainty: 0.8,
    timestamp: now,
    last_seen_timestamp: now,
    acl: vec![],
    flags: vec![],
    object_count: objects.len() as u8,
    objects,
  }
}

fn public_scope() -> AccessScope { AccessScope::default() }

// ─── Access control ──────────────────────────────────────────────────────────

#[tokio::test]
async fn access_query_agrees_with_predicate() {
  let m = manager(100);
  let user = Uuid::new_v4();
  let org = Uuid::new_v4();
  let scope = AccessScope::new([user], [org]);

  let mut expected = BTreeSet::new();
  for mode in [AccessMode::Public, AccessMode::RoleBased, AccessMode::Explicit] {
    for (acl, organization_id) in [
      (vec![user], Uuid::new_v4()),
      (vec![Uuid::new_v4()], org),
      (vec![Uuid::new_v4()], Uuid::new_v4()),
      (vec![], org),
    ] {
      let mut doc = document(Uuid::new_v4(), vec![object("x")]);
      doc.access_mode = mode;
      doc.acl = acl.clone();
      doc.organization_id = organization_id;
      if can_read(mode, &acl, organization_id, &scope) {
        expected.insert(doc.id);
      }
      m.index_fact(doc).await.unwrap();
    }
  }

  let mut facts = m.search_facts(&SearchCriteria::new(scope)).await.unwrap();
  let found: BTreeSet<Uuid> = facts.collect_remaining().await.into_iter().collect();
  assert_eq!(found, expected);
  assert_eq!(facts.count(), expected.len() as i64);
}

// ─── Fact search ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn full_pages_need_one_extra_fetch() {
  let m = manager(2);
  for _ in 0..4 {
    m.index_fact(document(Uuid::new_v4(), vec![object("x")])).await.unwrap();
  }

  let mut facts = m.search_facts(&SearchCriteria::new(public_scope())).await.unwrap();
  assert_eq!(facts.count(), 4);

  let first = facts.next().await;
  let second = facts.next().await;
  let third = facts.next().await;
  assert_eq!((first.values.len(), first.finished), (2, false));
  assert_eq!((second.values.len(), second.finished), (2, false));
  assert!(third.values.is_empty());
  assert!(third.finished);

  // The cursor is released in the background.
  for _ in 0..10 {
    if m.backend().open_scrolls().await == 0 {
      break;
    }
    tokio::task::yield_now().await;
  }
  assert_eq!(m.backend().open_scrolls().await, 0);
}

#[tokio::test]
async fn failed_fetch_ends_scrolling() {
  let m = manager(1);
  for _ in 0..3 {
    m.index_fact(document(Uuid::new_v4(), vec![object("x")])).await.unwrap();
  }

  let mut facts = m.search_facts(&SearchCriteria::new(public_scope())).await.unwrap();
  let first = facts.next().await;
  assert_eq!(first.values.len(), 1);

  // Expire every cursor behind the iterator's back.
  for n in 1..=10 {
    m.backend().clear_scroll(format!("memory-scroll-{n}")).await.unwrap();
  }

  let next = facts.next().await;
  assert!(next.values.is_empty());
  assert!(next.finished);
  assert!(facts.next().await.finished);
}

#[tokio::test]
async fn no_shards_is_an_empty_result() {
  let m = manager(10);
  let criteria = SearchCriteria::new(public_scope());

  let mut facts = m.search_facts(&criteria).await.unwrap();
  assert_eq!(facts.count(), 0);
  assert!(facts.next().await.finished);

  let objects = m.search_objects(&criteria).await.unwrap();
  assert_eq!(objects.count, 0);
  assert!(objects.values.is_empty());

  let stats = m
    .calculate_object_statistics(&ObjectStatisticsCriteria {
      object_ids: BTreeSet::from([Uuid::new_v4()]),
      ..ObjectStatisticsCriteria::default()
    })
    .await
    .unwrap();
  assert!(stats.is_empty());
}

#[tokio::test]
async fn duplicates_across_daily_shards_count_once() {
  let m = manager(10);
  let doc = document(Uuid::new_v4(), vec![object("x")]);
  let mut yesterday = doc.clone();
  yesterday.last_seen_timestamp -= TimeDelta::days(1).num_milliseconds();
  m.index_fact(yesterday).await.unwrap();
  m.index_fact(doc.clone()).await.unwrap();

  let mut facts = m.search_facts(&SearchCriteria::new(public_scope())).await.unwrap();
  assert_eq!(facts.count(), 1);
  assert_eq!(facts.collect_remaining().await, vec![doc.id]);
}

#[tokio::test]
async fn time_global_shard_ignores_start_bound() {
  let m = manager(10);
  let mut doc = document(Uuid::new_v4(), vec![object("threat-actor")]);
  doc.flags.push(FactFlag::TimeGlobalIndex);
  doc.timestamp -= TimeDelta::days(400).num_milliseconds();
  doc.last_seen_timestamp = doc.timestamp;
  m.index_fact(doc.clone()).await.unwrap();

  let now = Utc::now();
  let mut criteria = SearchCriteria::new(public_scope());
  criteria.time = Some(TimeRange::between(Some(now - TimeDelta::days(1)), Some(now)));
  let mut facts = m.search_facts(&criteria).await.unwrap();
  assert_eq!(facts.collect_remaining().await, vec![doc.id]);

  // An end bound before the Fact was added excludes it.
  criteria.time = Some(TimeRange::between(None, Some(now - TimeDelta::days(500))));
  let mut facts = m.search_facts(&criteria).await.unwrap();
  assert!(facts.collect_remaining().await.is_empty());
}

#[tokio::test]
async fn keyword_search_on_object_values() {
  let m = manager(10);
  let matching = document(Uuid::new_v4(), vec![object("example.org")]);
  m.index_fact(matching.clone()).await.unwrap();
  m.index_fact(document(Uuid::new_v4(), vec![object("other.net")])).await.unwrap();

  let mut criteria = SearchCriteria::new(public_scope());
  criteria.keywords = Some("example.org".into());
  let mut facts = m.search_facts(&criteria).await.unwrap();
  assert_eq!(facts.collect_remaining().await, vec![matching.id]);
}

#[tokio::test]
async fn unrefreshed_documents_are_not_searchable() {
  let m = FactSearchManager::new(
    Arc::new(MemoryIndex::new()),
    IndexSelector::default(),
    SearchSettings::default(),
  );
  let doc = document(Uuid::new_v4(), vec![object("x")]);
  m.index_fact(doc.clone()).await.unwrap();

  let criteria = SearchCriteria::new(public_scope());
  let mut facts = m.search_facts(&criteria).await.unwrap();
  assert!(facts.collect_remaining().await.is_empty());

  let index = m
    .selector()
    .target_index(Utc::now(), false);
  assert_eq!(m.get_fact(doc.id, &index).await.unwrap(), Some(doc.clone()));

  m.backend().refresh().await;
  let mut facts = m.search_facts(&criteria).await.unwrap();
  assert_eq!(facts.collect_remaining().await, vec![doc.id]);
}

// ─── Object search ───────────────────────────────────────────────────────────

#[tokio::test]
async fn object_search_returns_matching_objects_only() {
  let m = manager(10);
  let ip = object("1.1.1.1");
  let domain = object("example.org");
  m.index_fact(document(Uuid::new_v4(), vec![ip.clone(), domain.clone()]))
    .await
    .unwrap();

  let mut criteria = SearchCriteria::new(public_scope());
  criteria.object_values.insert("1.1.1.1".into());
  let result = m.search_objects(&criteria).await.unwrap();
  assert_eq!(result.count, 1);
  assert_eq!(result.values, vec![ip.id]);
}

#[tokio::test]
async fn bucket_selector_filters_by_fact_count() {
  let m = manager(10);
  let type_id = Uuid::new_v4();
  let objects = [object("one"), object("three"), object("five")];
  for (object, facts) in objects.iter().zip([1, 3, 5]) {
    for _ in 0..facts {
      m.index_fact(document(type_id, vec![object.clone()])).await.unwrap();
    }
  }

  let mut criteria = SearchCriteria::new(public_scope());
  criteria.min_facts_count = Some(2);
  criteria.max_facts_count = Some(4);
  let result = m.search_objects(&criteria).await.unwrap();

  assert_eq!(result.values, vec![objects[1].id]);
  // Counted before bucket selection.
  assert_eq!(result.count, 3);
}

#[tokio::test]
async fn object_search_limit_caps_buckets() {
  let m = manager(10);
  for n in 0..5 {
    m.index_fact(document(Uuid::new_v4(), vec![object(&format!("o{n}"))]))
      .await
      .unwrap();
  }

  let mut criteria = SearchCriteria::new(public_scope());
  criteria.limit = 2;
  let result = m.search_objects(&criteria).await.unwrap();
  assert_eq!(result.values.len(), 2);
  assert_eq!(result.count, 5);
  assert_eq!(result.limit, 2);
}

// ─── Statistics ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn statistics_per_object_and_fact_type() {
  let m = manager(10);
  let subject = object("1.1.1.1");
  let unrelated = object("2.2.2.2");
  let (resolve, seen_in) = (Uuid::new_v4(), Uuid::new_v4());

  let mut older = document(resolve, vec![subject.clone()]);
  older.timestamp -= 5_000;
  let newer = document(resolve, vec![subject.clone()]);
  m.index_fact(older).await.unwrap();
  m.index_fact(newer.clone()).await.unwrap();
  m.index_fact(document(seen_in, vec![subject.clone()])).await.unwrap();
  m.index_fact(document(seen_in, vec![unrelated])).await.unwrap();

  let mut hidden = document(seen_in, vec![subject.clone()]);
  hidden.access_mode = AccessMode::Explicit;
  m.index_fact(hidden).await.unwrap();

  let stats = m
    .calculate_object_statistics(&ObjectStatisticsCriteria {
      object_ids: BTreeSet::from([subject.id]),
      ..ObjectStatisticsCriteria::default()
    })
    .await
    .unwrap();

  assert_eq!(stats.len(), 1);
  let per_type = &stats[&subject.id];
  assert_eq!(per_type.len(), 2);

  let resolve_stats = per_type.iter().find(|s| s.fact_type_id == resolve).unwrap();
  assert_eq!(resolve_stats.fact_count, 2);
  assert_eq!(resolve_stats.last_added_timestamp, newer.timestamp);
  assert_eq!(resolve_stats.last_seen_timestamp, newer.last_seen_timestamp);

  let seen_in_stats = per_type.iter().find(|s| s.fact_type_id == seen_in).unwrap();
  assert_eq!(seen_in_stats.fact_count, 1);
}

// ─── Setup ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn templates_install_the_shared_mapping() {
  let m = manager(10);
  m.ensure_templates().await.unwrap();

  let base = m
    .backend()
    .template("_component_template/loom-base-template")
    .await
    .unwrap();
  let properties = &base.body["template"]["mappings"]["properties"];
  assert_eq!(properties["objects"]["type"], "nested");
  assert_eq!(properties["accessMode"]["type"], "keyword");

  for path in ["_index_template/loom-daily-template", "_index_template/loom-time-global-template"] {
    let template = m.backend().template(path).await.unwrap();
    assert_eq!(template.body["composed_of"], json!(["loom-base-template"]));
  }

  // Installing again leaves a current policy alone; a newer one replaces it.
  let mut policy = mapping::index_templates(m.selector()).remove(0);
  assert!(!m.backend().put_template(policy.clone()).await.unwrap());
  policy.body["policy"]["_meta"]["internalVersion"] = json!(POLICY_INTERNAL_VERSION + 1);
  assert!(m.backend().put_template(policy).await.unwrap());
  m.ensure_templates().await.unwrap();
  let installed = m
    .backend()
    .template("_ilm/policy/loom-daily-retention-policy")
    .await
    .unwrap();
  assert_eq!(installed.internal_version(), Some(POLICY_INTERNAL_VERSION + 1));
}

#[test]
fn zero_page_size_is_rejected() {
  let settings = serde_json::from_value::<SearchSettings>(json!({ "scroll_page_size": 0 }));
  assert!(settings.is_err());

  let settings: SearchSettings = serde_json::from_value(json!({ "scroll_page_size": 3 })).unwrap();
  assert_eq!(settings.scroll_page_size.get(), 3);
}

#[tokio::test]
async fn single_hit_pages_terminate() {
  let m = manager(1);
  m.index_fact(document(Uuid::new_v4(), vec![object("x")])).await.unwrap();

  let mut facts = m.search_facts(&SearchCriteria::new(public_scope())).await.unwrap();
  let drained = tokio::time::timeout(std::time::Duration::from_secs(2), facts.collect_remaining())
    .await
    .expect("scrolling terminates");
  assert_eq!(drained.len(), 1);
}

#[tokio::test]
async fn dropping_an_open_cursor_releases_it() {
  let m = manager(1);
  for _ in 0..3 {
    m.index_fact(document(Uuid::new_v4(), vec![object("x")])).await.unwrap();
  }

  let mut facts = m.search_facts(&SearchCriteria::new(public_scope())).await.unwrap();
  assert!(!facts.next().await.finished);
  assert_eq!(m.backend().open_scrolls().await, 1);

  drop(facts);
  for _ in 0..10 {
    if m.backend().open_scrolls().await == 0 {
      break;
    }
    tokio::task::yield_now().await;
  }
  assert_eq!(m.backend().open_scrolls().await, 0);
}
