//! Index mappings and lifecycle configuration.
//!
//! Every shard shares one mapping, installed as a component template that the
//! daily and the time-global index templates are composed of. Daily shards
//! additionally carry a lifecycle policy deleting them once they fall out of
//! the search horizon.

use serde_json::{Value, json};

use crate::{aggregation::MAX_RESULT_WINDOW, index::IndexSelector};

/// Bumped whenever the lifecycle policy below changes. A policy is only
/// uploaded when the installed one carries a lower version, since replacing
/// it triggers work on every managed shard.
pub const POLICY_INTERNAL_VERSION: i64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateKind {
  LifecyclePolicy,
  ComponentTemplate,
  IndexTemplate,
}

/// One piece of index configuration, uploaded by name.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexTemplate {
  pub kind: TemplateKind,
  pub name: String,
  pub body: Value,
}

impl IndexTemplate {
  /// REST path the template is stored under.
  pub fn path(&self) -> String {
    let endpoint = match self.kind {
      TemplateKind::LifecyclePolicy => "_ilm/policy",
      TemplateKind::ComponentTemplate => "_component_template",
      TemplateKind::IndexTemplate => "_index_template",
    };
    format!("{endpoint}/{}", self.name)
  }

  /// `_meta.internalVersion` of a lifecycle policy.
  pub fn internal_version(&self) -> Option<i64> {
    self.body.pointer("/policy/_meta/internalVersion").and_then(Value::as_i64)
  }
}

/// Everything a cluster needs before the first document is indexed, in
/// upload order: policy, shared mapping, then the two index templates.
pub fn index_templates(selector: &IndexSelector) -> Vec<IndexTemplate> {
  let prefix = &selector.prefix;
  let policy = format!("{prefix}daily-retention-policy");
  let base = format!("{prefix}base-template");

  vec![
    IndexTemplate {
      kind: TemplateKind::LifecyclePolicy,
      name: policy.clone(),
      body: retention_policy(selector.horizon_days),
    },
    IndexTemplate {
      kind: TemplateKind::ComponentTemplate,
      name: base.clone(),
      body: json!({ "template": { "settings": base_settings(), "mappings": fact_mapping() } }),
    },
    IndexTemplate {
      kind: TemplateKind::IndexTemplate,
      name: format!("{prefix}daily-template"),
      body: json!({
        "index_patterns": [format!("{}*", selector.daily_index_prefix())],
        "composed_of": [base],
        "priority": 100,
        "template": { "settings": { "index": { "lifecycle": { "name": policy } } } },
      }),
    },
    IndexTemplate {
      kind: TemplateKind::IndexTemplate,
      name: format!("{prefix}time-global-template"),
      body: json!({
        "index_patterns": [selector.time_global_index()],
        "composed_of": [base],
        "priority": 100,
      }),
    },
  ]
}

fn retention_policy(horizon_days: i64) -> Value {
  json!({
    "policy": {
      "_meta": { "internalVersion": POLICY_INTERNAL_VERSION },
      "phases": {
        "hot": { "min_age": "0ms", "actions": {} },
        "delete": {
          "min_age": format!("{}d", horizon_days.max(1) + 1),
          "actions": { "delete": {} },
        },
      },
    },
  })
}

fn base_settings() -> Value {
  json!({
    "index": { "max_result_window": MAX_RESULT_WINDOW },
    "analysis": {
      "analyzer": {
        "domain": {
          "type": "custom",
          "tokenizer": "domain_labels",
          "filter": ["lowercase"],
        },
      },
      "tokenizer": {
        // example.org → example.org, org
        "domain_labels": { "type": "path_hierarchy", "delimiter": ".", "reverse": true },
      },
    },
  })
}

/// An exact keyword with `text`, `ip` and `domain` sub-fields for keyword
/// search.
fn searchable_value() -> Value {
  json!({
    "type": "keyword",
    "ignore_above": 8191,
    "fields": {
      "text": { "type": "text" },
      "ip": { "type": "ip", "ignore_malformed": true },
      "domain": { "type": "text", "analyzer": "domain" },
    },
  })
}

fn keyword() -> Value { json!({ "type": "keyword" }) }

fn epoch_millis() -> Value { json!({ "type": "date", "format": "epoch_millis" }) }

/// Mapping of [`IndexedFactDocument`](crate::document::IndexedFactDocument).
pub fn fact_mapping() -> Value {
  json!({
    "dynamic": "strict",
    "properties": {
      "id": keyword(),
      "typeID": keyword(),
      "typeName": keyword(),
      "value": searchable_value(),
      "inReferenceTo": keyword(),
      "organizationID": keyword(),
      "sourceID": keyword(),
      "accessMode": keyword(),
      "trust": { "type": "float" },
      "confidence": { "type": "float" },
      "certainty": { "type": "float" },
      "timestamp": epoch_millis(),
      "lastSeenTimestamp": epoch_millis(),
      "acl": keyword(),
      "flags": keyword(),
      "objectCount": { "type": "short" },
      "objects": {
        "type": "nested",
        "properties": {
          "id": keyword(),
          "typeID": keyword(),
          "value": searchable_value(),
        },
      },
    },
  })
}

#[cfg(test)]
mod tests {
  use chrono::Utc;
  use loom_core::{
    fact::{AccessMode, Fact},
    object::{FactType, IndexOption, Object, ObjectType},
  };
  use uuid::Uuid;

  use super::*;
  use crate::document::IndexedFactDocument;

  fn selector() -> IndexSelector {
    IndexSelector { prefix: "loom-".into(), ..IndexSelector::default() }
  }

  #[test]
  fn templates_are_uploaded_in_dependency_order() {
    let templates = index_templates(&selector());
    let paths: Vec<String> = templates.iter().map(IndexTemplate::path).collect();
    assert_eq!(paths, vec![
      "_ilm/policy/loom-daily-retention-policy",
      "_component_template/loom-base-template",
      "_index_template/loom-daily-template",
      "_index_template/loom-time-global-template",
    ]);
    assert_eq!(templates[0].internal_version(), Some(POLICY_INTERNAL_VERSION));
    assert_eq!(templates[1].internal_version(), None);
  }

  #[test]
  fn index_templates_match_shard_names() {
    let selector = selector();
    let templates = index_templates(&selector);

    let daily = &templates[2].body;
    assert_eq!(daily["index_patterns"], json!(["loom-daily-*"]));
    assert_eq!(daily["composed_of"], json!(["loom-base-template"]));
    assert_eq!(
      daily["template"]["settings"]["index"]["lifecycle"]["name"],
      "loom-daily-retention-policy"
    );
    let today = selector.daily_index(Utc::now().date_naive());
    assert!(today.starts_with("loom-daily-"));

    let global = &templates[3].body;
    assert_eq!(global["index_patterns"], json!([selector.time_global_index()]));
    assert!(global["template"].is_null());
  }

  #[test]
  fn retention_outlives_the_horizon() {
    let policy = &index_templates(&selector())[0].body;
    assert_eq!(policy["policy"]["phases"]["delete"]["min_age"], "91d");
  }

  #[test]
  fn mapping_supports_nested_and_exact_queries() {
    let mapping = fact_mapping();
    let properties = &mapping["properties"];
    assert_eq!(properties["objects"]["type"], "nested");
    for field in ["id", "typeID", "accessMode", "acl", "organizationID", "sourceID"] {
      assert_eq!(properties[field]["type"], "keyword", "{field}");
    }
    for sub in ["text", "ip", "domain"] {
      assert!(properties["value"]["fields"][sub].is_object());
      assert!(properties["objects"]["properties"]["value"]["fields"][sub].is_object());
    }
    assert_eq!(base_settings()["index"]["max_result_window"], MAX_RESULT_WINDOW);
  }

  #[test]
  fn mapping_covers_every_document_field() {
    let object_type = ObjectType {
      id:           Uuid::new_v4(),
      name:         "ip".into(),
      index_option: IndexOption::Daily,
    };
    let object = Object {
      object_id: Uuid::new_v4(),
      type_id:   object_type.id,
      value:     "1.1.1.1".into(),
    };
    let now = Utc::now();
    let fact = Fact {
      fact_id:               Uuid::new_v4(),
      type_id:               Uuid::new_v4(),
      value:                 Some("v".into()),
      in_reference_to:       None,
      organization_id:       Uuid::new_v4(),
      origin_id:             Uuid::new_v4(),
      trust:                 0.5,
      confidence:            0.5,
      access_mode:           AccessMode::Public,
      timestamp:             now,
      last_seen_timestamp:   now,
      source_object_id:      Some(object.object_id),
      destination_object_id: None,
      bidirectional:         false,
      acl:                   Vec::new(),
      flags:                 Vec::new(),
    };
    let fact_type = FactType { id: fact.type_id, name: "tag".into() };
    let document = IndexedFactDocument::project(&fact, &fact_type, &[(object, object_type)]);

    let mapping = fact_mapping();
    let json = serde_json::to_value(&document).unwrap();
    for key in json.as_object().unwrap().keys() {
      assert!(mapping["properties"].get(key).is_some(), "unmapped field {key}");
    }
    for key in json["objects"][0].as_object().unwrap().keys() {
      assert!(
        mapping["properties"]["objects"]["properties"].get(key).is_some(),
        "unmapped object field {key}"
      );
    }
  }
}
