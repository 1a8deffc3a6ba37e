use rand::Rng;
use environment::Environment;
use topology::edge::{EdgeKind, StateId};
use topology::{RateTable, Topology};
use crate::SercaError;

pub mod environment;
pub mod topology;

/// Compiled transition rule for one run: per state, the outgoing targets paired with
/// cumulative branch probabilities in the topology's fixed edge order.
///
/// Rates, concentrations and dt are constant for a run, so the products are folded
/// once here and each timestep is only a threshold scan over one random draw.
/// Cumulative sums above 1 are kept as-is; later branches then lose probability mass,
/// which is why `diagnose` reports saturated states.
#[derive(Debug, Clone, PartialEq)]
pub struct StateMachine {
    topology_name: String,
    thresholds: Vec<Vec<(StateId, f64)>>,
}

/// Structural findings about a compiled machine.
/// - saturated
///     - states whose cumulative outgoing probability reaches 1 within one step
/// - dead_ends
///     - states reachable from state 0 that can never be left
/// - unreachable
///     - states no trajectory started in state 0 can ever visit
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Diagnostics {
    pub saturated: Vec<(StateId, f64)>,
    pub dead_ends: Vec<StateId>,
    pub unreachable: Vec<StateId>,
}

impl Diagnostics {
    pub fn is_clean(&self) -> bool {
        self.saturated.is_empty() && self.dead_ends.is_empty() && self.unreachable.is_empty()
    }

    /// Folds the findings of another condition into these. A state counts as saturated
    /// or a dead end if it is one anywhere, and as unreachable only if it is unreachable everywhere.
    pub fn merge(&mut self, other: &Diagnostics) {
        for (state, total) in &other.saturated {
            match self.saturated.iter_mut().find(|(known, _)| known == state) {
                Some((_, worst)) => *worst = worst.max(*total),
                None => self.saturated.push((*state, *total)),
            }
        }
        for state in &other.dead_ends {
            if !self.dead_ends.contains(state) {
                self.dead_ends.push(*state);
            }
        }
        self.unreachable.retain(|state| other.unreachable.contains(state));
        self.saturated.sort_by_key(|(state, _)| *state);
        self.dead_ends.sort_unstable();
    }

    /// Emits one warning per finding
    pub fn log_warnings(&self, topology: &Topology) {
        let label = |state: StateId| topology.get_label(state).unwrap_or("?").to_string();
        for (state, total) in &self.saturated {
            log::warn!(
                "{}: state {} ({}) has cumulative step probability {:.3} >= 1, later branches are under-sampled; reduce dt",
                topology.get_name(), state, label(*state), total
            );
        }
        for state in &self.dead_ends {
            log::warn!(
                "{}: state {} ({}) is reachable but has no outgoing probability, trajectories entering it stay trapped",
                topology.get_name(), state, label(*state)
            );
        }
        for state in &self.unreachable {
            log::warn!(
                "{}: state {} ({}) is unreachable from state 0 under the current rates",
                topology.get_name(), state, label(*state)
            );
        }
    }
}

impl StateMachine {

    /// Folds `rate * dt` or `rate * concentration * dt` for every edge into cumulative thresholds.
    ///
    /// Configuration problems surface here, before any timestep runs: a non-positive dt,
    /// a missing rate, a negative or non-finite rate, or a negative concentration.
    pub fn compile(
        topology: &Topology,
        rates: &RateTable,
        environment: &Environment,
        dt: f64,
    ) -> Result<Self, SercaError> {
        if !(dt.is_finite() && dt > 0.0) {
            return Err(SercaError::Config(format!("timestep size must be positive, got {}", dt)));
        }
        rates.check_covers(topology)?;

        let mut thresholds = Vec::with_capacity(topology.get_state_count());
        for state in 0..topology.get_state_count() {
            let mut cumulative = 0.0;
            let mut branches = Vec::with_capacity(topology.get_branches(state).len());

            for edge in topology.get_branches(state) {
                let key = edge.get_rate_key();
                let rate = rates.get(key).unwrap_or_default();
                if !(rate.is_finite() && rate >= 0.0) {
                    return Err(SercaError::InvalidRate { rate: key.to_string(), value: rate });
                }

                let probability = match edge.get_kind() {
                    EdgeKind::Unimolecular => rate * dt,
                    EdgeKind::ConcentrationGated(species) => {
                        let concentration = environment.concentration(species);
                        if !(concentration.is_finite() && concentration >= 0.0) {
                            return Err(SercaError::Config(format!(
                                "concentration of {} must be non-negative, got {}", species, concentration
                            )));
                        }
                        rate * concentration * dt
                    }
                };

                cumulative += probability;
                branches.push((edge.get_target(), cumulative));
            }
            thresholds.push(branches);
        }

        return Ok(Self { topology_name: topology.get_name().to_string(), thresholds });
    }

    pub fn get_topology_name(&self) -> &str {
        &self.topology_name
    }

    pub fn get_state_count(&self) -> usize {
        self.thresholds.len()
    }

    /// Chooses the successor of `state` for a uniform draw in [0, 1).
    /// The first branch whose cumulative probability exceeds the draw wins; otherwise the state is kept.
    #[inline]
    pub fn next_state(&self, state: StateId, draw: f64) -> StateId {
        if let Some(branches) = self.thresholds.get(state) {
            for (target, threshold) in branches {
                if draw < *threshold {
                    return *target;
                }
            }
        }
        state
    }

    /// Draws one uniform number from `rng` and advances `state` by one timestep
    #[inline]
    pub fn step<R: Rng + ?Sized>(&self, state: StateId, rng: &mut R) -> StateId {
        self.next_state(state, rng.gen::<f64>())
    }

    /// Per-branch (not cumulative) probabilities of leaving `state` in one step
    pub fn branch_probabilities(&self, state: StateId) -> Vec<(StateId, f64)> {
        let mut previous = 0.0;
        self.thresholds.get(state)
            .map(|branches| branches.iter()
                .map(|(target, cumulative)| {
                    let probability = cumulative - previous;
                    previous = *cumulative;
                    (*target, probability)
                })
                .collect())
            .unwrap_or_default()
    }

    /// Total probability of leaving `state` in one step
    pub fn exit_probability(&self, state: StateId) -> f64 {
        self.thresholds.get(state)
            .and_then(|branches| branches.last())
            .map(|(_, cumulative)| *cumulative)
            .unwrap_or(0.0)
    }

    /// Looks for saturated, dead-end and unreachable states under the compiled probabilities.
    pub fn diagnose(&self, topology: &Topology) -> Diagnostics {
        let mut diagnostics = Diagnostics::default();

        for state in 0..self.get_state_count() {
            let total = self.exit_probability(state);
            if total >= 1.0 {
                diagnostics.saturated.push((state, total));
            }
        }

        let live = |from: StateId, target: StateId| {
            self.branch_probabilities(from).iter().any(|(to, p)| *to == target && *p > 0.0)
        };
        let reached = topology.reachable_from(0, |from, edge| live(from, edge.get_target()));

        for (state, is_reached) in reached.iter().enumerate() {
            if !is_reached {
                diagnostics.unreachable.push(state);
            } else if self.exit_probability(state) <= 0.0 {
                diagnostics.dead_ends.push(state);
            }
        }

        return diagnostics;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use environment::Species;
    use topology::edge::Edge;
    use rand::{rngs::StdRng, SeedableRng};

    fn two_edge_machine(forward: f64, backward: f64) -> (Topology, StateMachine) {
        let topology = Topology::new("pair", vec![
            ("left", vec![Edge::unimolecular(1, "k_fwd"), Edge::unimolecular(2, "k_rev")]),
            ("mid", vec![Edge::unimolecular(0, "k_back")]),
            ("right", vec![Edge::unimolecular(0, "k_back")]),
        ]).unwrap();
        let mut rates = RateTable::new();
        rates.insert("k_fwd", forward);
        rates.insert("k_rev", backward);
        rates.insert("k_back", 0.5);
        let machine = StateMachine::compile(&topology, &rates, &Environment::default(), 1.0).unwrap();
        (topology, machine)
    }

    #[test]
    fn thresholds_follow_edge_order() {
        let (_, machine) = two_edge_machine(0.2, 0.3);
        assert_eq!(machine.next_state(0, 0.0), 1);
        assert_eq!(machine.next_state(0, 0.19), 1);
        assert_eq!(machine.next_state(0, 0.2), 2);
        assert_eq!(machine.next_state(0, 0.49), 2);
        assert_eq!(machine.next_state(0, 0.5), 0);
        assert_eq!(machine.next_state(0, 0.999), 0);
    }

    #[test]
    fn gated_edges_scale_with_concentration() {
        let topology = Topology::new("gate", vec![
            ("E", vec![Edge::gated(1, Species::CytosolicCalcium, "k_on")]),
            ("E.Ca", vec![Edge::unimolecular(0, "k_off")]),
        ]).unwrap();
        let mut rates = RateTable::new();
        rates.insert("k_on", 4e7);
        rates.insert("k_off", 450.0);
        let environment = Environment::default().with(Species::CytosolicCalcium, 1e-6);

        let machine = StateMachine::compile(&topology, &rates, &environment, 1e-7).unwrap();
        assert!((machine.exit_probability(0) - 4e7 * 1e-6 * 1e-7).abs() < 1e-15);
        assert!((machine.exit_probability(1) - 450.0 * 1e-7).abs() < 1e-15);
    }

    #[test]
    fn empirical_frequencies_match_branch_probabilities() {
        let (_, machine) = two_edge_machine(0.15, 0.25);
        let mut rng = StdRng::seed_from_u64(11);
        let draws = 200_000;
        let mut counts = [0usize; 3];
        for _ in 0..draws {
            counts[machine.step(0, &mut rng)] += 1;
        }
        let frequency = |count: usize| count as f64 / draws as f64;
        assert!((frequency(counts[1]) - 0.15).abs() < 0.005);
        assert!((frequency(counts[2]) - 0.25).abs() < 0.005);
        assert!((frequency(counts[0]) - 0.60).abs() < 0.005);
    }

    #[test]
    fn successors_stay_within_the_state_space() {
        let (_, machine) = two_edge_machine(0.7, 0.6);
        for state in 0..machine.get_state_count() {
            for step in 0..=1000 {
                let draw = step as f64 / 1001.0;
                assert!(machine.next_state(state, draw) < machine.get_state_count());
            }
        }
    }

    #[test]
    fn saturated_states_are_reported_not_renormalized() {
        let (topology, machine) = two_edge_machine(0.7, 0.6);
        let diagnostics = machine.diagnose(&topology);
        assert_eq!(diagnostics.saturated.len(), 1);
        assert_eq!(diagnostics.saturated[0].0, 0);
        // draws past the first threshold all land on the second branch, none stay
        assert_eq!(machine.next_state(0, 0.95), 2);
    }

    #[test]
    fn zero_rate_exit_is_a_dead_end() {
        let topology = Topology::new("trap", vec![
            ("open", vec![Edge::unimolecular(1, "k_in")]),
            ("trap", vec![Edge::unimolecular(0, "k_out")]),
            ("island", vec![Edge::unimolecular(0, "k_island")]),
        ]).unwrap();
        let mut rates = RateTable::new();
        rates.insert("k_in", 10.0);
        rates.insert("k_out", 0.0);
        rates.insert("k_island", 10.0);

        let machine = StateMachine::compile(&topology, &rates, &Environment::default(), 1e-3).unwrap();
        let diagnostics = machine.diagnose(&topology);
        assert_eq!(diagnostics.dead_ends, vec![1]);
        assert_eq!(diagnostics.unreachable, vec![2]);
        assert!(!diagnostics.is_clean());
    }

    #[test]
    fn merged_findings_keep_the_worst_saturation() {
        let mut low = Diagnostics {
            saturated: vec![(2, 1.5)],
            dead_ends: vec![4],
            unreachable: vec![5, 6],
        };
        let high = Diagnostics {
            saturated: vec![(0, 12.0), (2, 3.0)],
            dead_ends: vec![1],
            unreachable: vec![6],
        };
        low.merge(&high);
        assert_eq!(low.saturated, vec![(0, 12.0), (2, 3.0)]);
        assert_eq!(low.dead_ends, vec![1, 4]);
        assert_eq!(low.unreachable, vec![6]);
    }

    #[test]
    fn negative_rates_are_rejected() {
        let topology = Topology::new("neg", vec![
            ("a", vec![Edge::unimolecular(1, "k_ab")]),
            ("b", vec![Edge::unimolecular(0, "k_ba")]),
        ]).unwrap();
        let mut rates = RateTable::new();
        rates.insert("k_ab", -3.0);
        rates.insert("k_ba", 1.0);
        let result = StateMachine::compile(&topology, &rates, &Environment::default(), 1e-3);
        assert!(matches!(result, Err(SercaError::InvalidRate { .. })));

        rates.insert("k_ab", 3.0);
        let result = StateMachine::compile(&topology, &rates, &Environment::default(), 0.0);
        assert!(matches!(result, Err(SercaError::Config(_))));
    }
}
