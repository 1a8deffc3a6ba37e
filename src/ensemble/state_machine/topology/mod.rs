pub mod edge;

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use serde::{Deserialize, Serialize};
use edge::{Edge, StateId};
use crate::SercaError;

/// Declarative reaction graph: for every state an ordered list of outgoing edges.
///
/// The order of a state's edges is the order its cumulative probabilities are
/// stacked in, so it decides which branch wins a draw and must be kept stable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Topology {
    name: String,
    labels: Vec<String>,
    branches: Vec<Vec<Edge>>,
}

impl Topology {

    /// Builds a topology from `(label, edges)` pairs, one per state in index order.
    /// Fails if the graph is empty or an edge points past the last state.
    pub fn new(name: &str, states: Vec<(&str, Vec<Edge>)>) -> Result<Self, SercaError> {
        if states.is_empty() {
            return Err(SercaError::Config(format!("topology {} has no states", name)));
        }

        let state_count = states.len();
        let mut labels = Vec::with_capacity(state_count);
        let mut branches = Vec::with_capacity(state_count);

        for (state, (label, edges)) in states.into_iter().enumerate() {
            for edge in &edges {
                if edge.get_target() >= state_count {
                    return Err(SercaError::UnknownState {
                        state: edge.get_target(),
                        states: state_count,
                        context: format!("edge {} out of state {} in {}", edge.get_rate_key(), state, name),
                    });
                }
            }
            labels.push(label.to_string());
            branches.push(edges);
        }

        return Ok(Self { name: name.to_string(), labels, branches });
    }

    pub fn get_name(&self) -> &str {
        &self.name
    }

    /// Number of discrete states N; valid states are [0, N)
    pub fn get_state_count(&self) -> usize {
        self.branches.len()
    }

    /// Returns the conformation label of a state, e.g. `E'.Ca2`
    pub fn get_label(&self, state: StateId) -> Option<&str> {
        self.labels.get(state).map(String::as_str)
    }

    pub fn get_labels(&self) -> &[String] {
        &self.labels
    }

    /// Returns the ordered outgoing edges of a state
    pub fn get_branches(&self, state: StateId) -> &[Edge] {
        self.branches.get(state).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Every rate constant name referenced by some edge
    pub fn rate_keys(&self) -> BTreeSet<&str> {
        self.branches.iter()
            .flatten()
            .map(Edge::get_rate_key)
            .collect()
    }

    /// Unit string of a rate constant, taken from the first edge it drives
    pub fn rate_units(&self, key: &str) -> Option<&'static str> {
        self.branches.iter()
            .flatten()
            .find(|edge| edge.get_rate_key() == key)
            .map(|edge| edge.get_kind().rate_units())
    }

    /// Marks the states reachable from `start` along edges accepted by `passable`.
    pub fn reachable_from<F>(&self, start: StateId, passable: F) -> Vec<bool>
    where
        F: Fn(StateId, &Edge) -> bool,
    {
        let mut reached = vec![false; self.get_state_count()];
        if start >= reached.len() {
            return reached;
        }

        let mut frontier = VecDeque::from([start]);
        reached[start] = true;
        while let Some(state) = frontier.pop_front() {
            for edge in self.get_branches(state) {
                let target = edge.get_target();
                if !reached[target] && passable(state, edge) {
                    reached[target] = true;
                    frontier.push_back(target);
                }
            }
        }

        return reached;
    }
}

/// Rate constants keyed by edge name (`k_S0_S1`, ...).
/// Values are s^-1 for unimolecular edges and M^-1 s^-1 for gated ones.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RateTable {
    rates: BTreeMap<String, f64>,
}

impl RateTable {

    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: &str, value: f64) {
        self.rates.insert(key.to_string(), value);
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        self.rates.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.rates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.rates.iter().map(|(key, value)| (key.as_str(), *value))
    }

    /// Returns a copy with `keys[i]` set to `values[i]`; the two slices are zipped.
    pub fn with_overrides(&self, keys: &[String], values: &[f64]) -> Self {
        let mut overridden = self.clone();
        for (key, value) in keys.iter().zip(values) {
            overridden.insert(key, *value);
        }
        overridden
    }

    /// Fails with the first rate the topology needs but this table lacks.
    pub fn check_covers(&self, topology: &Topology) -> Result<(), SercaError> {
        for key in topology.rate_keys() {
            if !self.rates.contains_key(key) {
                return Err(SercaError::MissingRate {
                    rate: key.to_string(),
                    topology: topology.get_name().to_string(),
                });
            }
        }
        Ok(())
    }
}

impl FromIterator<(String, f64)> for RateTable {
    fn from_iter<I: IntoIterator<Item = (String, f64)>>(iter: I) -> Self {
        Self { rates: iter.into_iter().collect() }
    }
}
