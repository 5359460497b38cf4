//! Integration tests for `SqliteStore` against an in-memory database.

use loom_core::{
  access::AccessScope,
  fact::{AccessMode, FactFlag, NewFact, RetractOptions},
  object::{FactType, IndexOption, Object, ObjectType},
  retraction::RetractionResolver,
  store::{ObjectFactStore, ObjectFactWriter},
};
use uuid::Uuid;

use crate::SqliteStore;

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory()
    .await
    .expect("in-memory store")
}

struct Fixture {
  store:   SqliteStore,
  org:     Uuid,
  origin:  Uuid,
  resolve: FactType,
  ip:      Object,
  domain:  Object,
}

async fn fixture() -> Fixture {
  let s = store().await;

  let ip_type = s
    .add_object_type(ObjectType {
      id:           Uuid::new_v4(),
      name:         "ip".into(),
      index_option: IndexOption::Daily,
    })
    .await
    .unwrap();
  let domain_type = s
    .add_object_type(ObjectType {
      id:           Uuid::new_v4(),
      name:         "domain".into(),
      index_option: IndexOption::Daily,
    })
    .await
    .unwrap();
  let resolve = s
    .add_fact_type(FactType { id: Uuid::new_v4(), name: "resolve".into() })
    .await
    .unwrap();

  let ip = s.resolve_object(ip_type.id, "1.1.1.1".into()).await.unwrap();
  let domain = s
    .resolve_object(domain_type.id, "example.org".into())
    .await
    .unwrap();

  Fixture {
    store: s,
    org: Uuid::new_v4(),
    origin: Uuid::new_v4(),
    resolve,
    ip,
    domain,
  }
}

impl Fixture {
  fn resolve_fact(&self, mode: AccessMode) -> NewFact {
    let mut input = NewFact::new(self.resolve.id, self.org, self.origin);
    input.source_object_id = Some(self.ip.object_id);
    input.destination_object_id = Some(self.domain.object_id);
    input.access_mode = mode;
    input
  }
}

// ─── Types & objects ─────────────────────────────────────────────────────────

#[tokio::test]
async fn retraction_type_exists_after_open() {
  let s = store().await;
  let fetched = s.get_fact_type(FactType::RETRACTION_ID).await.unwrap();
  assert_eq!(fetched, Some(FactType::retraction()));

  let by_name = s
    .get_fact_type_by_name(FactType::RETRACTION_NAME)
    .await
    .unwrap();
  assert!(by_name.is_some_and(|t| t.is_retraction()));
}

#[tokio::test]
async fn resolve_object_is_idempotent() {
  let f = fixture().await;
  let again = f
    .store
    .resolve_object(f.ip.type_id, "1.1.1.1".into())
    .await
    .unwrap();
  assert_eq!(again, f.ip);

  let by_value = f
    .store
    .get_object_by_value(f.ip.type_id, "1.1.1.1")
    .await
    .unwrap();
  assert_eq!(by_value, Some(f.ip.clone()));
}

#[tokio::test]
async fn resolve_object_unknown_type_fails() {
  let s = store().await;
  let err = s
    .resolve_object(Uuid::new_v4(), "x".into())
    .await
    .unwrap_err();
  assert!(matches!(
    err,
    crate::Error::Core(loom_core::Error::ObjectTypeNotFound(_))
  ));
}

#[tokio::test]
async fn get_object_missing_returns_none() {
  let s = store().await;
  assert!(s.get_object(Uuid::new_v4()).await.unwrap().is_none());
}

// ─── Fact recording ──────────────────────────────────────────────────────────

#[tokio::test]
async fn record_and_get_fact() {
  let f = fixture().await;
  let fact = f
    .store
    .record_fact(f.resolve_fact(AccessMode::Public))
    .await
    .unwrap();

  assert_eq!(fact.timestamp, fact.last_seen_timestamp);
  assert_eq!(fact.source_object_id, Some(f.ip.object_id));
  assert!(fact.flags.is_empty());

  let fetched = f.store.get_fact(fact.fact_id).await.unwrap();
  assert_eq!(fetched, Some(fact));
}

#[tokio::test]
async fn resubmission_refreshes_last_seen_only() {
  let f = fixture().await;
  let first = f
    .store
    .record_fact(f.resolve_fact(AccessMode::RoleBased))
    .await
    .unwrap();
  let second = f
    .store
    .record_fact(f.resolve_fact(AccessMode::RoleBased))
    .await
    .unwrap();
  let third = f
    .store
    .record_fact(f.resolve_fact(AccessMode::RoleBased))
    .await
    .unwrap();

  assert_eq!(second.fact_id, first.fact_id);
  assert_eq!(third.fact_id, first.fact_id);
  assert_eq!(third.timestamp, first.timestamp);
  assert!(second.last_seen_timestamp > first.last_seen_timestamp);
  assert!(third.last_seen_timestamp > second.last_seen_timestamp);
  assert!(third.last_seen_timestamp >= third.timestamp);

  let bound = f.store.get_facts_bound_to(f.ip.object_id).await.unwrap();
  assert_eq!(bound.len(), 1);
}

#[tokio::test]
async fn different_access_mode_is_a_new_fact() {
  let f = fixture().await;
  let a = f
    .store
    .record_fact(f.resolve_fact(AccessMode::Public))
    .await
    .unwrap();
  let b = f
    .store
    .record_fact(f.resolve_fact(AccessMode::Explicit))
    .await
    .unwrap();
  assert_ne!(a.fact_id, b.fact_id);
}

#[tokio::test]
async fn meta_fact_without_reference_is_rejected() {
  let f = fixture().await;
  let input = NewFact::new(f.resolve.id, f.org, f.origin);
  let err = f.store.record_fact(input).await.unwrap_err();
  assert!(matches!(
    err,
    crate::Error::Core(loom_core::Error::InvalidBinding(_))
  ));
}

#[tokio::test]
async fn unknown_fact_type_is_rejected() {
  let f = fixture().await;
  let mut input = f.resolve_fact(AccessMode::Public);
  input.type_id = Uuid::new_v4();
  let err = f.store.record_fact(input).await.unwrap_err();
  assert!(matches!(
    err,
    crate::Error::Core(loom_core::Error::FactTypeNotFound(_))
  ));
}

#[tokio::test]
async fn meta_fact_must_be_as_restrictive_as_referenced() {
  let f = fixture().await;
  let target = f
    .store
    .record_fact(f.resolve_fact(AccessMode::Explicit))
    .await
    .unwrap();

  let mut meta = NewFact::new(f.resolve.id, f.org, f.origin);
  meta.in_reference_to = Some(target.fact_id);
  meta.access_mode = AccessMode::RoleBased;
  let err = f.store.record_fact(meta.clone()).await.unwrap_err();
  assert!(matches!(
    err,
    crate::Error::Core(loom_core::Error::AccessModeTooPermissive { .. })
  ));

  meta.access_mode = AccessMode::Explicit;
  f.store.record_fact(meta).await.unwrap();
  let metas = f.store.find_meta_facts(target.fact_id).await.unwrap();
  assert_eq!(metas.len(), 1);
}

#[tokio::test]
async fn time_global_object_sets_flag() {
  let f = fixture().await;
  let threat_actor = f
    .store
    .add_object_type(ObjectType {
      id:           Uuid::new_v4(),
      name:         "threatActor".into(),
      index_option: IndexOption::TimeGlobal,
    })
    .await
    .unwrap();
  let actor = f
    .store
    .resolve_object(threat_actor.id, "sofacy".into())
    .await
    .unwrap();

  let mut input = NewFact::new(f.resolve.id, f.org, f.origin);
  input.source_object_id = Some(actor.object_id);
  let fact = f.store.record_fact(input).await.unwrap();
  assert!(fact.has_flag(FactFlag::TimeGlobalIndex));
}

// ─── Access grants ───────────────────────────────────────────────────────────

#[tokio::test]
async fn grant_access_is_idempotent() {
  let f = fixture().await;
  let fact = f
    .store
    .record_fact(f.resolve_fact(AccessMode::Explicit))
    .await
    .unwrap();
  let subject = Uuid::new_v4();

  f.store.grant_access(fact.fact_id, subject).await.unwrap();
  let granted = f.store.grant_access(fact.fact_id, subject).await.unwrap();
  assert_eq!(granted.acl, vec![subject]);

  let stored = f.store.get_fact(fact.fact_id).await.unwrap().unwrap();
  assert_eq!(stored.acl, vec![subject]);
}

#[tokio::test]
async fn grant_access_on_public_fact_fails() {
  let f = fixture().await;
  let fact = f
    .store
    .record_fact(f.resolve_fact(AccessMode::Public))
    .await
    .unwrap();
  let err = f
    .store
    .grant_access(fact.fact_id, Uuid::new_v4())
    .await
    .unwrap_err();
  assert!(matches!(err, crate::Error::Core(loom_core::Error::PublicFact(_))));
}

// ─── Retraction ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn retract_sets_hint_and_records_retraction() {
  let f = fixture().await;
  let fact = f
    .store
    .record_fact(f.resolve_fact(AccessMode::Public))
    .await
    .unwrap();

  let retraction = f
    .store
    .retract(fact.fact_id, RetractOptions::new(f.org, f.origin))
    .await
    .unwrap();
  assert!(retraction.is_retraction());
  assert_eq!(retraction.in_reference_to, Some(fact.fact_id));
  assert_eq!(retraction.access_mode, AccessMode::Public);

  let stored = f.store.get_fact(fact.fact_id).await.unwrap().unwrap();
  assert!(stored.has_flag(FactFlag::RetractedHint));

  let found = f.store.find_retractions_of(fact.fact_id).await.unwrap();
  assert_eq!(found.len(), 1);
}

#[tokio::test]
async fn retract_missing_fact_fails() {
  let f = fixture().await;
  let err = f
    .store
    .retract(Uuid::new_v4(), RetractOptions::new(f.org, f.origin))
    .await
    .unwrap_err();
  assert!(matches!(err, crate::Error::Core(loom_core::Error::FactNotFound(_))));
}

#[tokio::test]
async fn unhinted_fact_is_never_retracted() {
  let f = fixture().await;
  let fact = f
    .store
    .record_fact(f.resolve_fact(AccessMode::Public))
    .await
    .unwrap();
  let scope = AccessScope::default();
  let resolver = RetractionResolver::new(&f.store, &scope);

  assert!(!resolver.is_fact_retracted(&fact).await.unwrap());
  assert!(!resolver.is_retracted(fact.fact_id, Some(false)).await.unwrap());
}

#[tokio::test]
async fn retraction_is_relative_to_the_caller() {
  let f = fixture().await;
  let fact = f
    .store
    .record_fact(f.resolve_fact(AccessMode::Public))
    .await
    .unwrap();

  let insider = Uuid::new_v4();
  let mut options = RetractOptions::new(f.org, f.origin);
  options.access_mode = Some(AccessMode::Explicit);
  options.acl = vec![insider];
  f.store.retract(fact.fact_id, options).await.unwrap();
  let fact = f.store.get_fact(fact.fact_id).await.unwrap().unwrap();

  let outsider_scope = AccessScope::new([Uuid::new_v4()], []);
  let outsider = RetractionResolver::new(&f.store, &outsider_scope);
  assert!(!outsider.is_fact_retracted(&fact).await.unwrap());

  let insider_scope = AccessScope::new([insider], []);
  let resolver = RetractionResolver::new(&f.store, &insider_scope);
  assert!(resolver.is_fact_retracted(&fact).await.unwrap());
}

#[tokio::test]
async fn retracted_retraction_does_not_count() {
  let f = fixture().await;
  let fact = f
    .store
    .record_fact(f.resolve_fact(AccessMode::Public))
    .await
    .unwrap();
  let retraction = f
    .store
    .retract(fact.fact_id, RetractOptions::new(f.org, f.origin))
    .await
    .unwrap();
  f.store
    .retract(retraction.fact_id, RetractOptions::new(f.org, f.origin))
    .await
    .unwrap();

  let fact = f.store.get_fact(fact.fact_id).await.unwrap().unwrap();
  let scope = AccessScope::default();
  let resolver = RetractionResolver::new(&f.store, &scope);
  assert!(!resolver.is_fact_retracted(&fact).await.unwrap());
}

#[tokio::test]
async fn retraction_is_monotonic_for_a_reader() {
  let f = fixture().await;
  let fact = f
    .store
    .record_fact(f.resolve_fact(AccessMode::RoleBased))
    .await
    .unwrap();
  f.store
    .retract(fact.fact_id, RetractOptions::new(f.org, f.origin))
    .await
    .unwrap();

  let scope = AccessScope::new([], [f.org]);
  let fact = f.store.get_fact(fact.fact_id).await.unwrap().unwrap();
  assert!(
    RetractionResolver::new(&f.store, &scope)
      .is_fact_retracted(&fact)
      .await
      .unwrap()
  );

  // Re-submitting the retracted fact must not revive it.
  f.store
    .record_fact(f.resolve_fact(AccessMode::RoleBased))
    .await
    .unwrap();
  let fact = f.store.get_fact(fact.fact_id).await.unwrap().unwrap();
  assert!(
    RetractionResolver::new(&f.store, &scope)
      .is_fact_retracted(&fact)
      .await
      .unwrap()
  );
}
