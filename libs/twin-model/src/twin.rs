//! Twins and the twin graph snapshot
//!
//! A twin is a model-typed node in the building/equipment graph. Capability
//! twins carry a trend id (the live time-series stream); calculated points
//! carry a value expression instead of (or as well as) a measured stream.
//!
//! The graph is an immutable snapshot built once per generation pass and
//! shared read-only across parallel actors.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// A node in the twin graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Twin {
    /// Twin id, unique across the graph
    pub id: String,

    /// Display name (defaults to the id)
    pub name: String,

    /// Model type, e.g. `dtmi:acme:ZoneAirTemperatureSensor;1`
    pub model_id: String,

    /// Time-series stream identifier for capability twins
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trend_id: Option<Uuid>,

    /// Expression deriving this twin's value from other twins
    /// (present only on calculated points)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_expression: Option<String>,

    /// Unit of measure, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

impl Twin {
    pub fn new(id: impl Into<String>, model_id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            model_id: model_id.into(),
            trend_id: None,
            value_expression: None,
            unit: None,
        }
    }

    pub fn with_trend_id(mut self, trend_id: Uuid) -> Self {
        self.trend_id = Some(trend_id);
        self
    }

    pub fn with_value_expression(mut self, expression: impl Into<String>) -> Self {
        self.value_expression = Some(expression.into());
        self
    }

    /// A calculated point derives its value rather than measuring it
    pub fn is_calculated_point(&self) -> bool {
        self.value_expression.is_some()
    }
}

/// Immutable snapshot of the twin graph
///
/// Relations run parent -> children ("contains"/"isCapabilityOf" flattened):
/// an equipment twin points at the capability and calculated-point twins
/// that sit under it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TwinGraph {
    twins: HashMap<String, Twin>,
    children: HashMap<String, Vec<String>>,
    parent: HashMap<String, String>,
}

impl TwinGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_twin(&mut self, twin: Twin) {
        self.twins.insert(twin.id.clone(), twin);
    }

    /// Relate a child twin to its parent equipment. The child twin must be
    /// added separately (order does not matter).
    pub fn add_relation(&mut self, parent_id: &str, child_id: &str) {
        self.children
            .entry(parent_id.to_string())
            .or_default()
            .push(child_id.to_string());
        self.parent
            .insert(child_id.to_string(), parent_id.to_string());
    }

    pub fn twin(&self, id: &str) -> Option<&Twin> {
        self.twins.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.twins.contains_key(id)
    }

    pub fn twins(&self) -> impl Iterator<Item = &Twin> {
        self.twins.values()
    }

    pub fn len(&self) -> usize {
        self.twins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.twins.is_empty()
    }

    /// All twins of an exact model type. Iteration order is map order -
    /// callers must not rely on it (set semantics).
    pub fn twins_of_model<'a>(&'a self, model_id: &'a str) -> impl Iterator<Item = &'a Twin> {
        self.twins.values().filter(move |t| t.model_id == model_id)
    }

    pub fn children_of(&self, id: &str) -> &[String] {
        self.children.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn parent_of(&self, id: &str) -> Option<&str> {
        self.parent.get(id).map(String::as_str)
    }

    /// The neighborhood a point reference can resolve against: the twin's
    /// own children, its parent, and its siblings under that parent.
    pub fn neighborhood(&self, id: &str) -> Vec<&Twin> {
        let mut out: Vec<&Twin> = Vec::new();
        for child in self.children_of(id) {
            if let Some(t) = self.twin(child) {
                out.push(t);
            }
        }
        if let Some(parent) = self.parent_of(id) {
            if let Some(t) = self.twin(parent) {
                out.push(t);
            }
            for sibling in self.children_of(parent) {
                if sibling != id {
                    if let Some(t) = self.twin(sibling) {
                        out.push(t);
                    }
                }
            }
        }
        out
    }

    /// Twins of `model_id` reachable from `context_id` via a chain of model
    /// path segments, e.g. `[TerminalUnit;1].[ZoneAirTemperatureSensor;1]`.
    /// An empty path searches the context twin's neighborhood directly.
    pub fn resolve_model_path(
        &self,
        context_id: &str,
        via: &[String],
        model_id: &str,
    ) -> Vec<&Twin> {
        let mut frontier: Vec<String> = vec![context_id.to_string()];

        for segment in via {
            let mut next: Vec<String> = Vec::new();
            for id in &frontier {
                for twin in self.neighborhood(id) {
                    if twin.model_id == *segment && !next.contains(&twin.id) {
                        next.push(twin.id.clone());
                    }
                }
            }
            frontier = next;
            if frontier.is_empty() {
                return Vec::new();
            }
        }

        let mut out: Vec<&Twin> = Vec::new();
        for id in &frontier {
            for twin in self.neighborhood(id) {
                if twin.model_id == model_id && !out.iter().any(|t| t.id == twin.id) {
                    out.push(twin);
                }
            }
        }
        out
    }
}

/// A point reference presented to users, qualified when names collide
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedPoint {
    pub id: String,
    pub name: String,
    /// Parent chain, nearest first
    pub parents: Vec<String>,
}

impl NamedPoint {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            parents: Vec::new(),
        }
    }

    /// Rewrite colliding display names to qualified paths. Points sharing
    /// a name gain parent segments (nearest first) until the names diverge
    /// or the parent chain runs out; `bracketed` wraps each segment in
    /// `[...]`.
    pub fn resolve_ambiguities(points: &mut [NamedPoint], bracketed: bool) {
        fn qualified(point: &NamedPoint, depth: usize, bracketed: bool) -> String {
            if depth == 0 {
                return point.name.clone();
            }
            let mut segments: Vec<&str> =
                point.parents.iter().take(depth).map(String::as_str).collect();
            segments.reverse();
            segments.push(&point.name);
            if bracketed {
                segments
                    .iter()
                    .map(|s| format!("[{}]", s))
                    .collect::<Vec<_>>()
                    .join(".")
            } else {
                segments.join(".")
            }
        }

        let mut depths = vec![0usize; points.len()];
        loop {
            let names: Vec<String> = points
                .iter()
                .zip(&depths)
                .map(|(p, &d)| qualified(p, d, bracketed))
                .collect();
            let mut counts: HashMap<&str, usize> = HashMap::new();
            for name in &names {
                *counts.entry(name).or_insert(0) += 1;
            }
            let mut grew = false;
            for (i, point) in points.iter().enumerate() {
                if counts[names[i].as_str()] > 1 && depths[i] < point.parents.len() {
                    depths[i] += 1;
                    grew = true;
                }
            }
            if !grew {
                for (point, name) in points.iter_mut().zip(names) {
                    point.name = name;
                }
                return;
            }
        }
    }
}
