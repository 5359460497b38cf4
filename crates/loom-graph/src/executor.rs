//! [`TraversalExecutor`] — evaluates a compiled [`Pipeline`] over a fresh
//! [`GraphView`] under a deadline.

use std::{collections::HashSet, sync::Arc, time::Duration};

use loom_core::{access::AccessScope, object::Object, store::ObjectFactStore};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::time::Instant;
use uuid::Uuid;

use crate::{
  Error, Result,
  language::{self, Literal, Pipeline, Step},
  value::TraversalValue,
  view::{Edge, Eval, GraphView, Interrupt, TraverseParams},
};

// ─── Settings ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraversalSettings {
  pub time_limit_secs: u64,
  /// Upper bound on the traversers alive after any step.
  pub max_traversers:  usize,
}

impl Default for TraversalSettings {
  fn default() -> Self { Self { time_limit_secs: 120, max_traversers: 100_000 } }
}

impl TraversalSettings {
  pub fn time_limit(&self) -> Duration { Duration::from_secs(self.time_limit_secs) }
}

// ─── Traversers ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum Element {
  Vertex(Uuid),
  Edge(Edge),
  Literal(Value),
}

impl Element {
  fn kind(&self) -> &'static str {
    match self {
      Self::Vertex(_) => "vertex",
      Self::Edge(_) => "edge",
      Self::Literal(_) => "value",
    }
  }
}

fn needs(step: &str, wanted: &str, got: &Element) -> Interrupt {
  Interrupt::Runtime(format!("{step}() expects a {wanted}, got a {}", got.kind()))
}

// ─── Executor ────────────────────────────────────────────────────────────────

pub struct TraversalExecutor<'a, S> {
  store:    &'a S,
  settings: TraversalSettings,
}

impl<'a, S: ObjectFactStore> TraversalExecutor<'a, S> {
  pub fn new(store: &'a S, settings: TraversalSettings) -> Self { Self { store, settings } }

  /// Run `query` from `seeds` on behalf of `scope`, using the configured
  /// time limit.
  pub async fn execute(
    &self,
    scope: &AccessScope,
    seeds: &[Uuid],
    query: &str,
    params: &TraverseParams,
  ) -> Result<Vec<TraversalValue>> {
    self
      .execute_within(scope, seeds, query, params, self.settings.time_limit())
      .await
  }

  /// Run `query` from `seeds`, giving up after `time_limit`.
  ///
  /// Edges the caller cannot read never enter the graph, so a caller without
  /// access to anything gets an empty result rather than an error.
  pub async fn execute_within(
    &self,
    scope: &AccessScope,
    seeds: &[Uuid],
    query: &str,
    params: &TraverseParams,
    time_limit: Duration,
  ) -> Result<Vec<TraversalValue>> {
    let pipeline = language::compile(query)
      .map_err(|reason| Error::BadQuery { query: query.to_owned(), reason })?;

    let deadline = Instant::now().checked_add(time_limit);
    let view = GraphView::new(self.store, scope, params, deadline);
    let evaluation = Evaluator { view: &view, max_traversers: self.settings.max_traversers }
      .run(&pipeline, seeds);

    let outcome = match tokio::time::timeout(time_limit, evaluation).await {
      Ok(outcome) => outcome,
      Err(_) => Err(Interrupt::Deadline),
    };

    let mut values = outcome.map_err(|interrupt| match interrupt {
      Interrupt::Deadline => {
        tracing::warn!(query, ?time_limit, "traversal timed out");
        Error::Timeout { query: query.to_owned(), limit: time_limit }
      }
      Interrupt::Runtime(reason) => Error::BadQuery { query: query.to_owned(), reason },
      Interrupt::Store(source) => Error::Store(source),
      Interrupt::Internal(reason) => Error::Internal(reason),
    })?;

    if let Some(limit) = params.limit {
      values.truncate(limit);
    }
    tracing::debug!(query, seeds = seeds.len(), returned = values.len(), "traversal finished");
    Ok(values)
  }
}

// ─── Evaluation ──────────────────────────────────────────────────────────────

struct Evaluator<'v, 'a, S> {
  view:           &'v GraphView<'a, S>,
  max_traversers: usize,
}

impl<S: ObjectFactStore> Evaluator<'_, '_, S> {
  async fn run(self, pipeline: &Pipeline, seeds: &[Uuid]) -> Eval<Vec<TraversalValue>> {
    let mut traversers = Vec::with_capacity(seeds.len());
    for &seed in seeds {
      self.view.pace().await?;
      if self.view.object(seed).await?.is_some() {
        traversers.push(Element::Vertex(seed));
      } else {
        tracing::debug!(%seed, "ignoring unknown seed object");
      }
    }

    for step in &pipeline.steps {
      self.view.check_deadline()?;
      traversers = self.apply(step, traversers).await?;
    }

    self.convert(traversers).await
  }

  /// Push onto the output of a step, failing as soon as it outgrows the
  /// traverser cap.
  fn emit(&self, output: &mut Vec<Element>, element: Element) -> Eval<()> {
    if output.len() >= self.max_traversers {
      return Err(Interrupt::Runtime(format!(
        "traversal exceeded {} traversers",
        self.max_traversers
      )));
    }
    output.push(element);
    Ok(())
  }

  async fn apply(&self, step: &Step, input: Vec<Element>) -> Eval<Vec<Element>> {
    let mut output = Vec::new();
    match step {
      Step::Vertices { direction, labels } => {
        for element in &input {
          self.view.pace().await?;
          let Element::Vertex(vertex) = element else {
            return Err(needs("out/in/both", "vertex", element));
          };
          for edge in self.view.edges(*vertex, *direction, labels).await? {
            if let Some(other) = edge.other_vertex() {
              self.emit(&mut output, Element::Vertex(other))?;
            }
          }
        }
      }
      Step::Edges { direction, labels } => {
        for element in &input {
          self.view.pace().await?;
          let Element::Vertex(vertex) = element else {
            return Err(needs("outE/inE/bothE", "vertex", element));
          };
          for edge in self.view.edges(*vertex, *direction, labels).await? {
            self.emit(&mut output, Element::Edge(edge))?;
          }
        }
      }
      Step::OutV | Step::InV | Step::BothV | Step::OtherV => {
        for element in &input {
          self.view.pace().await?;
          let Element::Edge(edge) = element else {
            return Err(needs("outV/inV/bothV/otherV", "edge", element));
          };
          let vertices = match step {
            Step::OutV => vec![Some(edge.out_vertex)],
            Step::InV => vec![edge.in_vertex],
            Step::BothV => vec![Some(edge.out_vertex), edge.in_vertex],
            _ => vec![edge.other_vertex()],
          };
          for vertex in vertices.into_iter().flatten() {
            self.emit(&mut output, Element::Vertex(vertex))?;
          }
        }
      }
      Step::HasLabel(labels) => {
        for element in input {
          self.view.pace().await?;
          let label = self.label(&element).await?;
          if label.is_some_and(|l| labels.iter().any(|wanted| *wanted == l)) {
            output.push(element);
          }
        }
      }
      Step::Has { key, value } => {
        for element in input {
          self.view.pace().await?;
          let property = self.property(&element, key).await?;
          let keep = match (&property, value) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(property), Some(wanted)) => literal_matches(property, wanted),
          };
          if keep {
            output.push(element);
          }
        }
      }
      Step::HasNot(key) => {
        for element in input {
          self.view.pace().await?;
          if self.property(&element, key).await?.is_none() {
            output.push(element);
          }
        }
      }
      Step::Values(keys) => {
        for element in &input {
          let keys: Vec<&str> = if keys.is_empty() {
            property_keys(element).to_vec()
          } else {
            keys.iter().map(String::as_str).collect()
          };
          for key in keys {
            self.view.pace().await?;
            if let Some(value) = self.property(element, key).await? {
              self.emit(&mut output, Element::Literal(value))?;
            }
          }
        }
      }
      Step::Id => {
        for element in &input {
          self.view.pace().await?;
          let id = match element {
            Element::Vertex(id) => *id,
            Element::Edge(edge) => edge.fact.fact_id,
            Element::Literal(_) => return Err(needs("id", "vertex or edge", element)),
          };
          output.push(Element::Literal(json!(id)));
        }
      }
      Step::Label => {
        for element in &input {
          self.view.pace().await?;
          if let Element::Literal(_) = element {
            return Err(needs("label", "vertex or edge", element));
          }
          output.extend(self.label(element).await?.map(|l| Element::Literal(json!(l))));
        }
      }
      Step::Dedup => {
        let mut seen = HashSet::new();
        for element in input {
          self.view.pace().await?;
          let identity = match &element {
            Element::Vertex(id) => format!("v:{id}"),
            Element::Edge(edge) => format!("e:{}", edge.fact.fact_id),
            Element::Literal(value) => format!("l:{value}"),
          };
          if seen.insert(identity) {
            output.push(element);
          }
        }
      }
      Step::Limit(n) => {
        output = input;
        output.truncate(*n);
      }
      Step::Count => output.push(Element::Literal(json!(input.len()))),
    }
    Ok(output)
  }

  async fn label(&self, element: &Element) -> Eval<Option<String>> {
    Ok(match element {
      Element::Vertex(id) => self.view.vertex_label(*id).await?.map(|l| l.to_string()),
      Element::Edge(edge) => Some(edge.label.to_string()),
      Element::Literal(_) => None,
    })
  }

  async fn property(&self, element: &Element, key: &str) -> Eval<Option<Value>> {
    match element {
      Element::Vertex(id) => {
        let Some(object) = self.view.object(*id).await? else { return Ok(None) };
        Ok(match key {
          "id" => Some(json!(object.object_id)),
          "value" => Some(json!(object.value)),
          "type" => self.view.vertex_label(*id).await?.map(|l| json!(&*l)),
          _ => None,
        })
      }
      Element::Edge(edge) => {
        let fact = &edge.fact;
        Ok(match key {
          "id" => Some(json!(fact.fact_id)),
          "value" => fact.value.as_ref().map(|v| json!(v)),
          "type" => Some(json!(&*edge.label)),
          "accessMode" => Some(json!(fact.access_mode.as_str())),
          "organizationID" => Some(json!(fact.organization_id)),
          "originID" => Some(json!(fact.origin_id)),
          "trust" => Some(json!(fact.trust)),
          "confidence" => Some(json!(fact.confidence)),
          "certainty" => Some(json!(fact.certainty())),
          "timestamp" => Some(json!(fact.timestamp.timestamp_millis())),
          "lastSeenTimestamp" => Some(json!(fact.last_seen_timestamp.timestamp_millis())),
          "isBidirectional" => Some(json!(fact.bidirectional)),
          "isRetracted" => {
            let retracted = self.view.is_retracted(fact).await?;
            Some(json!(retracted))
          }
          _ => None,
        })
      }
      Element::Literal(_) => Ok(None),
    }
  }

  /// Vertices become Objects, edges Facts. Edges the caller cannot read are
  /// dropped without error.
  async fn convert(&self, elements: Vec<Element>) -> Eval<Vec<TraversalValue>> {
    let mut values = Vec::with_capacity(elements.len());
    for element in elements {
      self.view.pace().await?;
      match element {
        Element::Vertex(id) => {
          if let Some(object) = self.view.object(id).await? {
            values.push(TraversalValue::Object(Object::clone(&object)));
          }
        }
        Element::Edge(edge) => {
          if self.view.scope().can_read_fact(&edge.fact) {
            values.push(TraversalValue::Fact(Arc::unwrap_or_clone(edge.fact)));
          }
        }
        Element::Literal(value) => values.push(TraversalValue::Literal(value)),
      }
    }
    Ok(values)
  }
}

const VERTEX_KEYS: &[&str] = &["id", "type", "value"];
const EDGE_KEYS: &[&str] = &[
  "id",
  "type",
  "value",
  "accessMode",
  "organizationID",
  "originID",
  "trust",
  "confidence",
  "certainty",
  "timestamp",
  "lastSeenTimestamp",
  "isBidirectional",
  "isRetracted",
];

fn property_keys(element: &Element) -> &'static [&'static str] {
  match element {
    Element::Vertex(_) => VERTEX_KEYS,
    Element::Edge(_) => EDGE_KEYS,
    Element::Literal(_) => &[],
  }
}

/// Strings compare exactly, numbers numerically; a string argument also
/// matches a property rendered the same way, e.g. a uuid or a boolean.
fn literal_matches(property: &Value, wanted: &Literal) -> bool {
  match (property, wanted) {
    (Value::String(s), Literal::Str(w)) => s == w,
    (Value::Number(n), Literal::Int(w)) => n.as_f64() == Some(*w as f64),
    (other, Literal::Str(w)) => other.to_string() == *w,
    (Value::String(s), Literal::Int(w)) => s.parse::<i64>().ok() == Some(*w),
    _ => false,
  }
}
