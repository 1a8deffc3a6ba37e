use serde::{Deserialize, Serialize};
use super::super::environment::Species;

/// Index of one enzyme conformation within a topology.
pub type StateId = usize;

/// How the per-step probability of an edge is formed.
/// - Unimolecular
///     - `rate * dt`, rate in s^-1
/// - ConcentrationGated
///     - `rate * [species] * dt`, rate in M^-1 s^-1 (pseudo-first-order)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EdgeKind {
    Unimolecular,
    ConcentrationGated(Species),
}

impl EdgeKind {
    /// Unit string of the rate constant feeding this edge
    pub fn rate_units(&self) -> &'static str {
        match self {
            EdgeKind::Unimolecular => "s^-1",
            EdgeKind::ConcentrationGated(_) => "M^-1 s^-1",
        }
    }
}

/// A single directed transition out of a state, naming the rate constant that drives it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    target: StateId,
    kind: EdgeKind,
    rate: String,
}

impl Edge {

    pub fn new(target: StateId, kind: EdgeKind, rate: &str) -> Self {
        return Self { target, kind, rate: rate.to_string() };
    }

    /// Shorthand for an edge whose probability is `rate * dt`
    pub fn unimolecular(target: StateId, rate: &str) -> Self {
        return Self::new(target, EdgeKind::Unimolecular, rate);
    }

    /// Shorthand for an edge whose probability is `rate * [species] * dt`
    pub fn gated(target: StateId, species: Species, rate: &str) -> Self {
        return Self::new(target, EdgeKind::ConcentrationGated(species), rate);
    }

    /// Returns the state this edge leads to
    pub fn get_target(&self) -> StateId {
        return self.target;
    }

    /// Returns the probability formula used by this edge
    pub fn get_kind(&self) -> EdgeKind {
        return self.kind;
    }

    /// Returns the name of the rate constant in the rate table
    pub fn get_rate_key(&self) -> &str {
        return &self.rate;
    }
}
