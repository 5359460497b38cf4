//! [`ElasticBackend`] — [`IndexBackend`] over the Elasticsearch REST API.
//!
//! Searches are sent with `typed_keys=true` so aggregation results can be
//! decoded into [`AggregateResult`] without knowing the request.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use uuid::Uuid;

use crate::{
  aggregation::{AggregateResult, Aggregates, TermsBucket, aggregations_to_json},
  backend::{IndexBackend, IndexOutcome, SearchRequest, SearchResponse},
  document::IndexedFactDocument,
  mapping::{IndexTemplate, TemplateKind},
  Error, Result,
};

/// Cheap to clone; the inner [`reqwest::Client`] is `Arc`-based.
#[derive(Clone)]
pub struct ElasticBackend {
  client:   Client,
  base_url: String,
}

impl ElasticBackend {
  pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
    let client = Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|source| Error::Transport {
        context: "failed to build HTTP client".into(),
        source,
      })?;
    Ok(Self { client, base_url: base_url.into() })
  }

  fn url(&self, path: &str) -> String {
    format!("{}/{}", self.base_url.trim_end_matches('/'), path.trim_start_matches('/'))
  }

  async fn send(
    &self,
    request: reqwest::RequestBuilder,
    context: &str,
  ) -> Result<reqwest::Response> {
    request.send().await.map_err(|source| Error::Transport {
      context: format!("{context} failed"),
      source,
    })
  }

  async fn json<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
    context: &str,
  ) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
      let body = response.text().await.unwrap_or_default();
      return Err(Error::Backend(format!("{context} → {status}: {body}")));
    }
    response.json().await.map_err(|source| Error::Transport {
      context: format!("deserialising {context} response"),
      source,
    })
  }
}

fn keep_alive(duration: Duration) -> String { format!("{}s", duration.as_secs().max(1)) }

impl IndexBackend for ElasticBackend {
  async fn search(&self, request: SearchRequest) -> Result<SearchResponse> {
    let path = format!("{}/_search", request.indices.join(","));
    let mut params = vec![
      ("allow_no_indices", "true".to_owned()),
      ("ignore_unavailable", "true".to_owned()),
      ("expand_wildcards", "none".to_owned()),
      ("typed_keys", "true".to_owned()),
    ];
    if let Some(scroll) = request.scroll {
      params.push(("scroll", keep_alive(scroll)));
    }

    let mut body = json!({
      "size": request.size,
      "_source": false,
      "query": request.query.to_json(),
    });
    if request.size == 0 {
      body["track_total_hits"] = json!(false);
    }
    if !request.aggregations.is_empty() {
      body["aggs"] = aggregations_to_json(&request.aggregations);
    }

    let response = self
      .send(self.client.post(self.url(&path)).query(&params).json(&body), "POST _search")
      .await?;
    let raw: RawSearchResponse = Self::json(response, "POST _search").await?;
    raw.into_response()
  }

  async fn scroll(&self, scroll_id: String, keep: Duration) -> Result<SearchResponse> {
    let body = json!({ "scroll": keep_alive(keep), "scroll_id": scroll_id });
    let response = self
      .send(self.client.post(self.url("_search/scroll")).json(&body), "POST _search/scroll")
      .await?;
    let raw: RawSearchResponse = Self::json(response, "POST _search/scroll").await?;
    raw.into_response()
  }

  async fn clear_scroll(&self, scroll_id: String) -> Result<bool> {
    let body = json!({ "scroll_id": [scroll_id] });
    let response = self
      .send(self.client.delete(self.url("_search/scroll")).json(&body), "DELETE _search/scroll")
      .await?;
    // An already expired cursor is reported as 404.
    if response.status() == StatusCode::NOT_FOUND {
      return Ok(false);
    }
    let raw: RawClearScroll = Self::json(response, "DELETE _search/scroll").await?;
    Ok(raw.succeeded)
  }

  async fn index_document(
    &self,
    index: String,
    document: IndexedFactDocument,
    refresh: bool,
  ) -> Result<IndexOutcome> {
    let path = format!("{index}/_doc/{}", document.id);
    let response = self
      .send(
        self
          .client
          .put(self.url(&path))
          .query(&[("refresh", refresh.to_string())])
          .json(&document),
        "PUT _doc",
      )
      .await?;
    let raw: RawIndexResponse = Self::json(response, "PUT _doc").await?;
    match raw.result.as_str() {
      "created" => Ok(IndexOutcome::Created),
      "updated" | "noop" => Ok(IndexOutcome::Updated),
      other => Err(Error::MalformedResponse(format!("unexpected index result {other:?}"))),
    }
  }

  async fn get_document(&self, index: String, id: Uuid) -> Result<Option<IndexedFactDocument>> {
    let path = format!("{index}/_doc/{id}");
    let response = self.send(self.client.get(self.url(&path)), "GET _doc").await?;
    if response.status() == StatusCode::NOT_FOUND {
      return Ok(None);
    }
    let raw: RawGetResponse = Self::json(response, "GET _doc").await?;
    Ok(if raw.found { raw.source } else { None })
  }

  async fn put_template(&self, template: IndexTemplate) -> Result<bool> {
    let path = template.path();
    if template.kind == TemplateKind::LifecyclePolicy {
      let installed = self.installed_policy_version(&template.name, &path).await?;
      let wanted = template.internal_version().unwrap_or(0);
      if installed.is_some_and(|installed| installed >= wanted) {
        tracing::debug!(policy = %template.name, ?installed, "lifecycle policy is current");
        return Ok(false);
      }
    }

    let context = format!("PUT {path}");
    let response = self
      .send(self.client.put(self.url(&path)).json(&template.body), &context)
      .await?;
    let _: Value = Self::json(response, &context).await?;
    tracing::info!(%path, "installed index configuration");
    Ok(true)
  }
}

impl ElasticBackend {
  /// Internal version of the installed policy; `None` when there is none.
  async fn installed_policy_version(&self, name: &str, path: &str) -> Result<Option<i64>> {
    let context = format!("GET {path}");
    let response = self.send(self.client.get(self.url(path)), &context).await?;
    if response.status() == StatusCode::NOT_FOUND {
      tracing::info!(policy = name, "lifecycle policy not installed");
      return Ok(None);
    }
    let body: Value = Self::json(response, &context).await?;
    Ok(Some(policy_version(&body, name)))
  }
}

/// `internalVersion` from a `GET _ilm/policy/<name>` response, `-1` when the
/// installed policy carries none.
fn policy_version(response: &Value, name: &str) -> i64 {
  response
    .get(name)
    .and_then(|policy| policy.pointer("/policy/_meta/internalVersion"))
    .and_then(Value::as_i64)
    .unwrap_or(-1)
}

// ─── Wire types ──────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct RawSearchResponse {
  #[serde(rename = "_scroll_id")]
  scroll_id:    Option<String>,
  #[serde(rename = "_shards")]
  shards:       RawShards,
  #[serde(default)]
  hits:         RawHits,
  #[serde(default)]
  aggregations: Map<String, Value>,
}

#[derive(Deserialize)]
struct RawShards {
  total: u64,
}

#[derive(Deserialize, Default)]
struct RawHits {
  #[serde(default)]
  hits: Vec<RawHit>,
}

#[derive(Deserialize)]
struct RawHit {
  #[serde(rename = "_id")]
  id: String,
}

#[derive(Deserialize)]
struct RawClearScroll {
  #[serde(default)]
  succeeded: bool,
}

#[derive(Deserialize)]
struct RawIndexResponse {
  result: String,
}

#[derive(Deserialize)]
struct RawGetResponse {
  found:  bool,
  #[serde(rename = "_source")]
  source: Option<IndexedFactDocument>,
}

impl RawSearchResponse {
  fn into_response(self) -> Result<SearchResponse> {
    let hits = self
      .hits
      .hits
      .into_iter()
      .map(|hit| {
        Uuid::parse_str(&hit.id)
          .map_err(|e| Error::MalformedResponse(format!("hit id {:?}: {e}", hit.id)))
      })
      .collect::<Result<Vec<_>>>()?;

    Ok(SearchResponse {
      total_shards: self.shards.total,
      hits,
      scroll_id: self.scroll_id,
      aggregations: parse_aggregates(&self.aggregations)?,
    })
  }
}

// ─── Typed-keys aggregation decoding ─────────────────────────────────────────

/// Decode every `type#name` entry of `map`; keys without a `#` are plain
/// bucket properties and are skipped.
pub(crate) fn parse_aggregates(map: &Map<String, Value>) -> Result<Aggregates> {
  let mut out = std::collections::BTreeMap::new();
  for (key, value) in map {
    let Some((kind, name)) = key.split_once('#') else { continue };
    out.insert(name.to_owned(), parse_aggregate(kind, value)?);
  }
  Ok(Aggregates(out))
}

fn parse_aggregate(kind: &str, value: &Value) -> Result<AggregateResult> {
  let malformed = |what: &str| Error::MalformedResponse(format!("{kind} aggregation: {what}"));
  let object = value.as_object().ok_or_else(|| malformed("not an object"))?;

  Ok(match kind {
    "cardinality" => AggregateResult::Cardinality {
      value: object
        .get("value")
        .and_then(Value::as_i64)
        .ok_or_else(|| malformed("missing value"))?,
    },
    "max" => AggregateResult::Max {
      value: object.get("value").and_then(Value::as_f64),
    },
    "sterms" | "lterms" | "dterms" | "umterms" => {
      let buckets = object
        .get("buckets")
        .and_then(Value::as_array)
        .ok_or_else(|| malformed("missing buckets"))?;
      AggregateResult::Terms {
        buckets: buckets
          .iter()
          .map(|bucket| parse_bucket(bucket).ok_or_else(|| malformed("bad bucket")))
          .collect::<Result<Vec<_>>>()?
          .into_iter()
          .map(|(key, doc_count, map)| {
            Ok(TermsBucket { key, doc_count, aggregations: parse_aggregates(map)? })
          })
          .collect::<Result<Vec<_>>>()?,
      }
    }
    "nested" | "reverse_nested" | "filter" => AggregateResult::SingleBucket {
      doc_count:    object.get("doc_count").and_then(Value::as_u64).unwrap_or(0),
      aggregations: parse_aggregates(object)?,
    },
    other => {
      return Err(Error::MalformedResponse(format!("unsupported aggregation type {other:?}")));
    }
  })
}

fn parse_bucket(bucket: &Value) -> Option<(String, u64, &Map<String, Value>)> {
  let map = bucket.as_object()?;
  let key = match map.get("key")? {
    Value::String(s) => s.clone(),
    other => other.to_string(),
  };
  let doc_count = map.get("doc_count").and_then(Value::as_u64).unwrap_or(0);
  Some((key, doc_count, map))
}
