//! Reaction-graph variants of the pump cycle, each with literature rate constants,
//! the rates fitted by default and the bound-state weights of each readout.
//!
//! Rate keys name the edge they drive: `k_S3_S4` is the transition from state 3 to state 4.

use std::fmt::Display;
use serde::{Deserialize, Serialize};
use crate::ensemble::state_machine::environment::{Environment, Species};
use crate::ensemble::state_machine::topology::edge::{Edge, StateId};
use crate::ensemble::state_machine::topology::{RateTable, Topology};
use crate::residual::reference::{calcium_binding, phosphate_binding};
use crate::residual::{BoundStateWeights, Experiment};
use crate::swarm::FreeParameter;
use crate::SercaError;

const INESI: &str = "Inesi, Methods Enzymol 157:154-190 (1988)";
const SIDE_PATH: &str = "nucleotide side path, set equal to the analogous main-cycle step";

/// Which steady-state quantity is compared against which published curve.
/// - Calcium
///     - bound calcium per pump over the 16-point cytosolic calcium grid
/// - Phosphate
///     - phosphoenzyme fraction over the 13-point phosphate grid, formed in the absence of calcium
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Readout {
    Calcium,
    Phosphate,
}

impl Display for Readout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Readout::Calcium => write!(f, "calcium_binding"),
            Readout::Phosphate => write!(f, "phosphate_binding"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelVariant {
    /// 13-state cycle with the ADP-sensitive and ADP-insensitive phosphoenzyme branches
    Inesi13,
    /// 12-state cycle with a single phosphoryl-transfer path
    Linear12,
    /// Inesi13 plus nucleotide binding before calcium (E.ATP, E.ATP.Ca, E'.ATP.Ca)
    Nucleotide16,
}

impl Display for ModelVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ModelVariant::Inesi13 => "inesi13",
            ModelVariant::Linear12 => "linear12",
            ModelVariant::Nucleotide16 => "nucleotide16",
        };
        write!(f, "{}", name)
    }
}

/// A literature rate constant and where it came from
#[derive(Debug, Clone, PartialEq)]
pub struct LiteratureRate {
    pub key: String,
    pub value: f64,
    pub note: &'static str,
}

fn key(from: StateId, to: StateId) -> String {
    format!("k_S{}_S{}", from, to)
}

fn uni(from: StateId, to: StateId) -> Edge {
    Edge::unimolecular(to, &key(from, to))
}

fn gated(from: StateId, to: StateId, species: Species) -> Edge {
    Edge::gated(to, species, &key(from, to))
}

fn rate(from: StateId, to: StateId, value: f64, note: &'static str) -> LiteratureRate {
    LiteratureRate { key: key(from, to), value, note }
}

impl ModelVariant {
    pub const ALL: [ModelVariant; 3] = [ModelVariant::Inesi13, ModelVariant::Linear12, ModelVariant::Nucleotide16];

    pub fn state_count(&self) -> usize {
        match self {
            ModelVariant::Inesi13 => 13,
            ModelVariant::Linear12 => 12,
            ModelVariant::Nucleotide16 => 16,
        }
    }

    /// Ordered per-state edges; the order is the branch order of the cumulative draw
    pub fn topology(&self) -> Result<Topology, SercaError> {
        use Species::*;
        let name = self.to_string();
        match self {
            ModelVariant::Inesi13 => Topology::new(&name, vec![
                ("E", vec![gated(0, 1, CytosolicCalcium), gated(0, 12, Phosphate)]),
                ("E.Ca", vec![uni(1, 2), uni(1, 0)]),
                ("E'.Ca", vec![gated(2, 3, CytosolicCalcium), uni(2, 1)]),
                ("E'.Ca2", vec![gated(3, 4, MgAtp), uni(3, 2)]),
                ("E'.ATP.Ca2", vec![uni(4, 5), uni(4, 3)]),
                ("E'~P.ADP.Ca2", vec![uni(5, 6), uni(5, 8), uni(5, 4)]),
                ("*E'-P.ADP.Ca2", vec![uni(6, 7), uni(6, 5)]),
                ("*E'-P.Ca2", vec![uni(7, 9), gated(7, 6, MgAdp), uni(7, 8)]),
                ("E'~P.Ca2", vec![uni(8, 7), uni(8, 5)]),
                ("*E-P.Ca2", vec![uni(9, 10), gated(9, 7, LumenalCalcium)]),
                ("*E-P.Ca", vec![uni(10, 11), uni(10, 9)]),
                ("*E-P", vec![uni(11, 12), gated(11, 10, LumenalCalcium)]),
                ("*E-Pi", vec![uni(12, 0), uni(12, 11)]),
            ]),
            ModelVariant::Linear12 => Topology::new(&name, vec![
                ("E", vec![gated(0, 1, CytosolicCalcium), gated(0, 11, Phosphate)]),
                ("E.Ca", vec![uni(1, 2), uni(1, 0)]),
                ("E'.Ca", vec![gated(2, 3, CytosolicCalcium), uni(2, 1)]),
                ("E'.Ca2", vec![gated(3, 4, MgAtp), uni(3, 2)]),
                ("E'.ATP.Ca2", vec![uni(4, 5), uni(4, 3)]),
                ("E'~P.ADP.Ca2", vec![uni(5, 6), uni(5, 4)]),
                ("E'~P.Ca2", vec![uni(6, 7), gated(6, 5, MgAdp)]),
                ("*E'-P.Ca2", vec![uni(7, 8), uni(7, 6)]),
                ("*E-P.Ca2", vec![uni(8, 9), gated(8, 7, LumenalCalcium)]),
                ("*E-P.Ca", vec![uni(9, 10), uni(9, 8)]),
                ("*E-P", vec![uni(10, 11), gated(10, 9, LumenalCalcium)]),
                ("*E-Pi", vec![uni(11, 0), uni(11, 10)]),
            ]),
            ModelVariant::Nucleotide16 => Topology::new(&name, vec![
                ("E", vec![gated(0, 1, CytosolicCalcium), gated(0, 12, Phosphate), gated(0, 13, MgAtp)]),
                ("E.Ca", vec![uni(1, 2), uni(1, 0), gated(1, 14, MgAtp)]),
                ("E'.Ca", vec![gated(2, 3, CytosolicCalcium), uni(2, 1), gated(2, 15, MgAtp)]),
                ("E'.Ca2", vec![gated(3, 4, MgAtp), uni(3, 2)]),
                ("E'.ATP.Ca2", vec![uni(4, 5), uni(4, 3), uni(4, 15)]),
                ("E'~P.ADP.Ca2", vec![uni(5, 6), uni(5, 8), uni(5, 4)]),
                ("*E'-P.ADP.Ca2", vec![uni(6, 7), uni(6, 5)]),
                ("*E'-P.Ca2", vec![uni(7, 9), gated(7, 6, MgAdp), uni(7, 8)]),
                ("E'~P.Ca2", vec![uni(8, 7), uni(8, 5)]),
                ("*E-P.Ca2", vec![uni(9, 10), gated(9, 7, LumenalCalcium)]),
                ("*E-P.Ca", vec![uni(10, 11), uni(10, 9)]),
                ("*E-P", vec![uni(11, 12), gated(11, 10, LumenalCalcium)]),
                ("*E-Pi", vec![uni(12, 0), uni(12, 11)]),
                ("E.ATP", vec![gated(13, 14, CytosolicCalcium), uni(13, 0)]),
                ("E.ATP.Ca", vec![uni(14, 15), uni(14, 13), uni(14, 1)]),
                ("E'.ATP.Ca", vec![gated(15, 4, CytosolicCalcium), uni(15, 14), uni(15, 2)]),
            ]),
        }
    }

    /// Literature values of every rate the topology references
    pub fn literature_rates(&self) -> Vec<LiteratureRate> {
        // calcium binding and phosphorylation, shared by every variant
        let mut rates = vec![
            rate(0, 1, 4e7, INESI),
            rate(1, 0, 450.0, INESI),
            rate(1, 2, 120.0, INESI),
            rate(2, 1, 25.0, INESI),
            rate(2, 3, 1e8, INESI),
            rate(3, 2, 16.0, INESI),
            rate(3, 4, 6e7, INESI),
            rate(4, 3, 30.0, INESI),
            rate(4, 5, 200.0, INESI),
            rate(5, 4, 350.0, INESI),
        ];

        match self {
            ModelVariant::Inesi13 | ModelVariant::Nucleotide16 => {
                rates.extend([
                    rate(5, 6, 800.0, INESI),
                    rate(6, 5, 200.0, INESI),
                    rate(6, 7, 500.0, INESI),
                    rate(7, 6, 4e6, INESI),
                    rate(5, 8, 6.0, INESI),
                    rate(8, 5, 1.25e3, INESI),
                    rate(8, 7, 1.0, INESI),
                    rate(7, 8, 10.0, INESI),
                    rate(7, 9, 500.0, INESI),
                    rate(9, 7, 5e5, INESI),
                    rate(9, 10, 20.0, INESI),
                    rate(10, 9, 20.0, INESI),
                    rate(10, 11, 600.0, INESI),
                    rate(11, 10, 6e4, INESI),
                    rate(11, 12, 60.0, INESI),
                    rate(12, 11, 60.0, INESI),
                    rate(12, 0, 600.0, INESI),
                    rate(0, 12, 1.5e4, INESI),
                ]);
            }
            ModelVariant::Linear12 => {
                rates.extend([
                    rate(5, 6, 800.0, INESI),
                    rate(6, 5, 4e6, INESI),
                    rate(6, 7, 500.0, INESI),
                    rate(7, 6, 10.0, INESI),
                    rate(7, 8, 500.0, INESI),
                    rate(8, 7, 5e5, INESI),
                    rate(8, 9, 20.0, INESI),
                    rate(9, 8, 20.0, INESI),
                    rate(9, 10, 600.0, INESI),
                    rate(10, 9, 6e4, INESI),
                    rate(10, 11, 60.0, INESI),
                    rate(11, 10, 60.0, INESI),
                    rate(11, 0, 600.0, INESI),
                    rate(0, 11, 1.5e4, INESI),
                ]);
            }
        }

        if let ModelVariant::Nucleotide16 = self {
            rates.extend([
                rate(0, 13, 6e7, SIDE_PATH),
                rate(13, 0, 30.0, SIDE_PATH),
                rate(1, 14, 6e7, SIDE_PATH),
                rate(14, 1, 30.0, SIDE_PATH),
                rate(2, 15, 6e7, SIDE_PATH),
                rate(15, 2, 30.0, SIDE_PATH),
                rate(13, 14, 4e7, SIDE_PATH),
                rate(14, 13, 450.0, SIDE_PATH),
                rate(14, 15, 120.0, SIDE_PATH),
                rate(15, 14, 25.0, SIDE_PATH),
                rate(15, 4, 1e8, SIDE_PATH),
                rate(4, 15, 16.0, SIDE_PATH),
            ]);
        }

        return rates;
    }

    pub fn rate_table(&self) -> RateTable {
        self.literature_rates()
            .into_iter()
            .map(|rate| (rate.key, rate.value))
            .collect()
    }

    /// Rates fitted by default: both cytosolic calcium binding steps plus two steps of the
    /// lumenal half of the cycle, bounded 0.1x to 10x around their literature values
    pub fn free_parameters(&self) -> Vec<FreeParameter> {
        let table = self.rate_table();
        let keys: [(StateId, StateId); 4] = match self {
            ModelVariant::Inesi13 | ModelVariant::Nucleotide16 => [(0, 1), (2, 3), (7, 9), (10, 11)],
            ModelVariant::Linear12 => [(0, 1), (2, 3), (7, 8), (9, 10)],
        };
        keys.iter()
            .map(|(from, to)| {
                let name = key(*from, *to);
                let reference = table.get(&name).unwrap_or_default();
                FreeParameter::around(&name, reference)
            })
            .collect()
    }

    /// Bound states and their multiplicities for one readout
    pub fn weights(&self, readout: Readout) -> BoundStateWeights {
        let weights: Vec<(StateId, f64)> = match (self, readout) {
            (ModelVariant::Inesi13, Readout::Calcium) => [1, 2, 10].iter().map(|s| (*s, 1.0))
                .chain((3..=9).map(|s| (s, 2.0)))
                .collect(),
            (ModelVariant::Linear12, Readout::Calcium) => [1, 2, 9].iter().map(|s| (*s, 1.0))
                .chain((3..=8).map(|s| (s, 2.0)))
                .collect(),
            (ModelVariant::Nucleotide16, Readout::Calcium) => [1, 2, 10, 14, 15].iter().map(|s| (*s, 1.0))
                .chain((3..=9).map(|s| (s, 2.0)))
                .collect(),
            (ModelVariant::Inesi13, Readout::Phosphate) | (ModelVariant::Nucleotide16, Readout::Phosphate) => {
                (5..=12).map(|s| (s, 1.0)).collect()
            }
            (ModelVariant::Linear12, Readout::Phosphate) => (5..=11).map(|s| (s, 1.0)).collect(),
        };
        BoundStateWeights::new(weights)
    }

    /// The published curve of a readout paired with this variant's weights.
    /// Phosphate sweeps run with no cytosolic calcium so the enzyme stays in the E state.
    pub fn experiment(&self, readout: Readout, base: Environment) -> Experiment {
        match readout {
            Readout::Calcium => Experiment::new(
                &readout.to_string(),
                Species::CytosolicCalcium,
                calcium_binding(),
                self.weights(readout),
                base,
            ),
            Readout::Phosphate => Experiment::new(
                &readout.to_string(),
                Species::Phosphate,
                phosphate_binding(),
                self.weights(readout),
                base.with(Species::CytosolicCalcium, 0.0),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ensemble::state_machine::StateMachine;

    #[test]
    fn literature_rates_cover_every_topology_exactly() {
        for variant in ModelVariant::ALL {
            let topology = variant.topology().unwrap();
            assert_eq!(topology.get_state_count(), variant.state_count());

            let table = variant.rate_table();
            table.check_covers(&topology).unwrap();
            let needed = topology.rate_keys();
            assert_eq!(table.len(), needed.len(), "{} carries unused rates", variant);
            assert_eq!(variant.literature_rates().len(), table.len(), "{} repeats a rate", variant);
        }
    }

    #[test]
    fn literature_rates_give_a_clean_machine_at_the_default_step() {
        for variant in ModelVariant::ALL {
            let topology = variant.topology().unwrap();
            let machine = StateMachine::compile(&topology, &variant.rate_table(), &Environment::default(), 1e-7).unwrap();
            let diagnostics = machine.diagnose(&topology);
            assert!(diagnostics.is_clean(), "{}: {:?}", variant, diagnostics);
        }
    }

    #[test]
    fn free_parameters_bracket_their_literature_values() {
        for variant in ModelVariant::ALL {
            let parameters = variant.free_parameters();
            assert_eq!(parameters.len(), 4);
            for parameter in parameters {
                assert!(parameter.reference > 0.0, "{} has no literature value", parameter.name);
                assert!(parameter.lower < parameter.reference && parameter.reference < parameter.upper);
            }
        }
    }

    #[test]
    fn weights_fit_inside_each_topology() {
        for variant in ModelVariant::ALL {
            let topology = variant.topology().unwrap();
            for readout in [Readout::Calcium, Readout::Phosphate] {
                variant.weights(readout).check(&topology).unwrap();
            }
        }
        let calcium = ModelVariant::Inesi13.weights(Readout::Calcium);
        let total: f64 = calcium.get_weights().iter().map(|(_, weight)| weight).sum();
        assert_eq!(total, 3.0 + 14.0);
    }

    #[test]
    fn phosphate_experiment_removes_cytosolic_calcium() {
        let experiment = ModelVariant::Inesi13.experiment(Readout::Phosphate, Environment::default());
        assert_eq!(experiment.get_analyte(), Species::Phosphate);
        assert_eq!(experiment.environment_at(1e-5).cytosolic_calcium, 0.0);
        assert_eq!(experiment.environment_at(1e-5).phosphate, 1e-5);
    }
}
