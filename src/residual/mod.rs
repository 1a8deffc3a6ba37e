pub mod reference;

use std::fmt::Display;
use std::sync::Arc;
use crate::ensemble::state_machine::environment::{Environment, Species};
use crate::ensemble::state_machine::topology::edge::StateId;
use crate::ensemble::state_machine::topology::{RateTable, Topology};
use crate::ensemble::state_machine::{Diagnostics, StateMachine};
use crate::ensemble::{derive_seed, EnsemblePool, EnsembleSimulator, SimulationConfig};
use crate::swarm::Objective;
use crate::SercaError;

/// Ordered (condition, response) pairs; conditions are analyte concentrations in M.
#[derive(Debug, Clone, PartialEq)]
pub struct DoseResponseCurve {
    conditions: Vec<f64>,
    values: Vec<f64>,
}

impl DoseResponseCurve {

    pub fn new(conditions: Vec<f64>, values: Vec<f64>) -> Result<Self, SercaError> {
        if conditions.len() != values.len() {
            return Err(SercaError::GridMismatch { grid: conditions.len(), reference: values.len() });
        }
        Ok(Self { conditions, values })
    }

    pub fn from_points(points: &[(f64, f64)]) -> Self {
        Self {
            conditions: points.iter().map(|(condition, _)| *condition).collect(),
            values: points.iter().map(|(_, value)| *value).collect(),
        }
    }

    pub fn get_conditions(&self) -> &[f64] {
        &self.conditions
    }

    pub fn get_values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn points(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.conditions.iter().copied().zip(self.values.iter().copied())
    }

    /// Divides every value by the curve's own maximum, so the largest becomes exactly 1.0.
    /// An all-zero (or non-positive) curve has nothing to scale by and is an error.
    pub fn normalize(&self) -> Result<Self, SercaError> {
        let maximum = self.values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if !(maximum.is_finite() && maximum > 0.0) {
            return Err(SercaError::ZeroMaximum { points: self.values.len() });
        }
        Ok(Self {
            conditions: self.conditions.clone(),
            values: self.values.iter().map(|value| value / maximum).collect(),
        })
    }
}

/// Which states count as ligand-bound and how many ligands each holds.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundStateWeights {
    weights: Vec<(StateId, f64)>,
}

impl BoundStateWeights {

    pub fn new(weights: Vec<(StateId, f64)>) -> Self {
        Self { weights }
    }

    pub fn get_weights(&self) -> &[(StateId, f64)] {
        &self.weights
    }

    /// Fails on a weight that names a state the topology does not have
    pub fn check(&self, topology: &Topology) -> Result<(), SercaError> {
        for (state, _) in &self.weights {
            if *state >= topology.get_state_count() {
                return Err(SercaError::UnknownState {
                    state: *state,
                    states: topology.get_state_count(),
                    context: format!("bound-state weight for {}", topology.get_name()),
                });
            }
        }
        Ok(())
    }

    /// Weighted sum of steady-state fractions over the bound states
    pub fn bound_fraction(&self, steady_state: &[f64]) -> f64 {
        self.weights.iter()
            .map(|(state, weight)| steady_state.get(*state).copied().unwrap_or(0.0) * weight)
            .sum()
    }
}

/// sqrt(sum((reference - simulated)^2)); both curves must already be normalized.
pub fn residual(reference: &[f64], simulated: &[f64]) -> Result<f64, SercaError> {
    if reference.len() != simulated.len() {
        return Err(SercaError::GridMismatch { grid: simulated.len(), reference: reference.len() });
    }
    let value = reference.iter()
        .zip(simulated)
        .map(|(expected, actual)| (expected - actual).powi(2))
        .sum::<f64>()
        .sqrt();
    if !value.is_finite() {
        return Err(SercaError::NonFiniteResidual(value));
    }
    return Ok(value);
}

/// One published binding curve together with how to read it off a simulation.
/// - analyte
///     - the species swept over the reference grid
/// - base
///     - concentrations of everything else during the sweep
#[derive(Debug, Clone, PartialEq)]
pub struct Experiment {
    name: String,
    analyte: Species,
    reference: DoseResponseCurve,
    weights: BoundStateWeights,
    base: Environment,
}

impl Experiment {

    pub fn new(
        name: &str,
        analyte: Species,
        reference: DoseResponseCurve,
        weights: BoundStateWeights,
        base: Environment,
    ) -> Self {
        Self { name: name.to_string(), analyte, reference, weights, base }
    }

    pub fn get_name(&self) -> &str {
        &self.name
    }

    pub fn get_analyte(&self) -> Species {
        self.analyte
    }

    pub fn get_reference(&self) -> &DoseResponseCurve {
        &self.reference
    }

    pub fn get_weights(&self) -> &BoundStateWeights {
        &self.weights
    }

    pub fn get_base(&self) -> &Environment {
        &self.base
    }

    /// Environment at one grid point
    pub fn environment_at(&self, condition: f64) -> Environment {
        self.base.with(self.analyte, condition)
    }
}

/// Everything one experiment's sweep produced, kept for reporting.
#[derive(Debug, Clone, PartialEq)]
pub struct ExperimentFit {
    pub name: String,
    pub analyte: Species,
    pub raw: DoseResponseCurve,
    pub normalized: DoseResponseCurve,
    pub reference: DoseResponseCurve,
    pub steady_states: Vec<Vec<f64>>,
    pub residual: f64,
}

impl Display for ExperimentFit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({} sweep, {} points): residual {:.6}", self.name, self.analyte, self.reference.len(), self.residual)
    }
}

/// Sweeps each experiment's grid through the ensemble simulator and scores the result.
/// Clones share one ensemble pool of `config.threads` threads.
#[derive(Debug, Clone)]
pub struct ResidualEvaluator {
    topology: Topology,
    experiments: Vec<Experiment>,
    config: SimulationConfig,
    pool: EnsemblePool,
}

impl ResidualEvaluator {

    /// Checks everything that can be checked without rates: the simulation shape,
    /// that there is something to fit, and that every weight names a real state.
    pub fn new(
        topology: Topology,
        experiments: Vec<Experiment>,
        config: SimulationConfig,
    ) -> Result<Self, SercaError> {
        config.validate()?;
        if experiments.is_empty() {
            return Err(SercaError::EmptyWorkload("no experiments to fit against".to_string()));
        }
        for experiment in &experiments {
            if experiment.reference.is_empty() {
                return Err(SercaError::EmptyWorkload(format!("experiment {} has an empty grid", experiment.name)));
            }
            experiment.weights.check(&topology)?;
        }
        let pool = EnsemblePool::new(config.threads);
        Ok(Self { topology, experiments, config, pool })
    }

    pub fn get_topology(&self) -> &Topology {
        &self.topology
    }

    pub fn get_experiments(&self) -> &[Experiment] {
        &self.experiments
    }

    pub fn get_config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn get_pool(&self) -> &EnsemblePool {
        &self.pool
    }

    /// Compiles `rates` at every grid point and logs the merged structural warnings, one set per experiment.
    /// Gated probabilities grow with the analyte, so saturation usually shows first at the top of the grid.
    pub fn diagnose(&self, rates: &RateTable) -> Result<Vec<Diagnostics>, SercaError> {
        let mut all = Vec::with_capacity(self.experiments.len());
        for experiment in &self.experiments {
            let mut merged: Option<Diagnostics> = None;
            for condition in experiment.reference.get_conditions() {
                let machine = StateMachine::compile(&self.topology, rates, &experiment.environment_at(*condition), self.config.dt)?;
                let found = machine.diagnose(&self.topology);
                merged = Some(match merged {
                    Some(mut diagnostics) => {
                        diagnostics.merge(&found);
                        diagnostics
                    }
                    None => found,
                });
            }
            let diagnostics = merged.unwrap_or_default();
            if !diagnostics.is_clean() {
                log::warn!("{}: structural findings over the {}-point grid", experiment.name, experiment.reference.len());
            }
            diagnostics.log_warnings(&self.topology);
            all.push(diagnostics);
        }
        Ok(all)
    }

    /// Runs one experiment's full sweep.
    /// Grid point `i` of experiment `e` simulates with seed `derive_seed(derive_seed(seed, e), i)`.
    pub fn simulate_experiment(
        &self,
        index: usize,
        rates: &RateTable,
        seed: u64,
    ) -> Result<ExperimentFit, SercaError> {
        let experiment = self.experiments.get(index).ok_or_else(|| SercaError::Config(
            format!("no experiment {} (have {})", index, self.experiments.len())
        ))?;
        let experiment_seed = derive_seed(seed, index as u64);

        let mut raw = Vec::with_capacity(experiment.reference.len());
        let mut steady_states = Vec::with_capacity(experiment.reference.len());
        for (point, condition) in experiment.reference.get_conditions().iter().enumerate() {
            let machine = StateMachine::compile(&self.topology, rates, &experiment.environment_at(*condition), self.config.dt)?;
            let simulator = EnsembleSimulator::from_machine(Arc::new(machine), self.config.clone())?
                .with_pool(self.pool.clone());
            let result = simulator.run(derive_seed(experiment_seed, point as u64))?;

            let bound = experiment.weights.bound_fraction(result.get_steady_state());
            log::debug!("{} [{}]={:e}: bound fraction {:.5}", experiment.name, experiment.analyte, condition, bound);
            raw.push(bound);
            steady_states.push(result.get_steady_state().to_vec());
        }

        let raw = DoseResponseCurve::new(experiment.reference.get_conditions().to_vec(), raw)?;
        let normalized = raw.normalize()?;
        let residual = residual(experiment.reference.get_values(), normalized.get_values())?;

        return Ok(ExperimentFit {
            name: experiment.name.clone(),
            analyte: experiment.analyte,
            raw,
            normalized,
            reference: experiment.reference.clone(),
            steady_states,
            residual,
        });
    }

    /// Every experiment's sweep, in order
    pub fn evaluate_detailed(&self, rates: &RateTable, seed: u64) -> Result<Vec<ExperimentFit>, SercaError> {
        (0..self.experiments.len())
            .map(|index| self.simulate_experiment(index, rates, seed))
            .collect()
    }

    /// Sum of the per-experiment residuals; smaller is better
    pub fn evaluate_rates(&self, rates: &RateTable, seed: u64) -> Result<f64, SercaError> {
        let mut total = 0.0;
        for fit in self.evaluate_detailed(rates, seed)? {
            total += fit.residual;
        }
        if !total.is_finite() {
            return Err(SercaError::NonFiniteResidual(total));
        }
        Ok(total)
    }
}

/// Swarm objective: a position is a vector of free rate constants written over a base table.
#[derive(Debug, Clone)]
pub struct RateObjective {
    evaluator: ResidualEvaluator,
    base: RateTable,
    names: Vec<String>,
}

impl RateObjective {

    /// Fails if the base table plus the free names does not cover the topology
    pub fn new(evaluator: ResidualEvaluator, base: RateTable, names: Vec<String>) -> Result<Self, SercaError> {
        let mut covered = base.clone();
        for name in &names {
            if covered.get(name).is_none() {
                covered.insert(name, 0.0);
            }
        }
        covered.check_covers(evaluator.get_topology())?;
        Ok(Self { evaluator, base, names })
    }

    pub fn get_evaluator(&self) -> &ResidualEvaluator {
        &self.evaluator
    }

    pub fn get_names(&self) -> &[String] {
        &self.names
    }

    /// The full rate table a position stands for
    pub fn rates_at(&self, position: &[f64]) -> Result<RateTable, SercaError> {
        if position.len() != self.names.len() {
            return Err(SercaError::Config(format!(
                "position has {} components but {} rates are free", position.len(), self.names.len()
            )));
        }
        for (name, value) in self.names.iter().zip(position) {
            if !(value.is_finite() && *value >= 0.0) {
                return Err(SercaError::InvalidRate { rate: name.clone(), value: *value });
            }
        }
        Ok(self.base.with_overrides(&self.names, position))
    }
}

impl Objective for RateObjective {
    fn evaluate(&self, position: &[f64], seed: u64) -> Result<f64, SercaError> {
        let rates = self.rates_at(position)?;
        self.evaluator.evaluate_rates(&rates, seed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ensemble::state_machine::topology::edge::Edge;

    fn binding_topology() -> Topology {
        Topology::new("binder", vec![
            ("E", vec![Edge::gated(1, Species::CytosolicCalcium, "k_on")]),
            ("E.Ca", vec![Edge::unimolecular(0, "k_off")]),
        ]).unwrap()
    }

    fn binding_rates() -> RateTable {
        let mut rates = RateTable::new();
        rates.insert("k_on", 1e9);
        rates.insert("k_off", 1000.0);
        rates
    }

    fn quick_config() -> SimulationConfig {
        SimulationConfig {
            molecules: 300,
            timesteps: 10_000,
            dt: 1e-5,
            bin_width: 100,
            window_bins: 50,
            threads: 1,
        }
    }

    fn binding_experiment(reference: DoseResponseCurve) -> Experiment {
        Experiment::new(
            "binding",
            Species::CytosolicCalcium,
            reference,
            BoundStateWeights::new(vec![(1, 1.0)]),
            Environment::default(),
        )
    }

    #[test]
    fn normalized_curve_peaks_at_exactly_one() {
        let curve = DoseResponseCurve::new(vec![1.0, 2.0, 3.0], vec![0.2, 0.8, 0.4]).unwrap();
        let normalized = curve.normalize().unwrap();
        assert_eq!(normalized.get_values().iter().copied().fold(0.0, f64::max), 1.0);
        assert_eq!(normalized.get_values()[0], 0.25);
    }

    #[test]
    fn all_zero_curve_cannot_be_normalized() {
        let curve = DoseResponseCurve::new(vec![1.0, 2.0], vec![0.0, 0.0]).unwrap();
        assert!(matches!(curve.normalize(), Err(SercaError::ZeroMaximum { points: 2 })));
    }

    #[test]
    fn mismatched_grid_is_a_configuration_error() {
        assert!(matches!(
            DoseResponseCurve::new(vec![1.0, 2.0], vec![1.0]),
            Err(SercaError::GridMismatch { grid: 2, reference: 1 })
        ));
        assert!(residual(&[1.0, 0.5], &[1.0]).is_err());
    }

    #[test]
    fn residual_is_the_euclidean_distance() {
        assert_eq!(residual(&[0.5, 1.0], &[0.5, 1.0]).unwrap(), 0.0);
        assert!((residual(&[0.0, 1.0], &[0.3, 0.6]).unwrap() - 0.5).abs() < 1e-12);
        assert!(matches!(residual(&[f64::NAN], &[1.0]), Err(SercaError::NonFiniteResidual(_))));
    }

    #[test]
    fn weights_sum_multiplicities() {
        let weights = BoundStateWeights::new(vec![(1, 1.0), (2, 2.0)]);
        assert!((weights.bound_fraction(&[0.5, 0.25, 0.25]) - 0.75).abs() < 1e-12);
        let too_far = BoundStateWeights::new(vec![(7, 1.0)]);
        assert!(matches!(too_far.check(&binding_topology()), Err(SercaError::UnknownState { state: 7, .. })));
    }

    #[test]
    fn residual_is_zero_against_its_own_output() {
        let grid = vec![1e-7, 1e-6, 1e-5];
        let placeholder = DoseResponseCurve::new(grid.clone(), vec![1.0; 3]).unwrap();
        let evaluator = ResidualEvaluator::new(
            binding_topology(), vec![binding_experiment(placeholder)], quick_config(),
        ).unwrap();
        let simulated = evaluator.simulate_experiment(0, &binding_rates(), 5).unwrap();

        let evaluator = ResidualEvaluator::new(
            binding_topology(), vec![binding_experiment(simulated.normalized.clone())], quick_config(),
        ).unwrap();
        assert_eq!(evaluator.evaluate_rates(&binding_rates(), 5).unwrap(), 0.0);

        // more calcium, more binding
        let values = simulated.normalized.get_values();
        assert!(values[0] < values[1] && values[1] <= values[2]);
    }

    #[test]
    fn clones_share_the_ensemble_pool_across_threads() {
        let grid = vec![1e-7, 1e-6, 1e-5];
        let reference = DoseResponseCurve::new(grid, vec![0.1, 0.5, 1.0]).unwrap();
        let serial = ResidualEvaluator::new(
            binding_topology(), vec![binding_experiment(reference.clone())], quick_config(),
        ).unwrap();
        let expected = serial.evaluate_rates(&binding_rates(), 8).unwrap();

        let parallel = ResidualEvaluator::new(
            binding_topology(), vec![binding_experiment(reference)], SimulationConfig { threads: 2, ..quick_config() },
        ).unwrap();
        assert_eq!(parallel.get_pool().get_threads(), 2);
        let handles: Vec<_> = (0..3).map(|_| {
            let evaluator = parallel.clone();
            std::thread::spawn(move || evaluator.evaluate_rates(&binding_rates(), 8).unwrap())
        }).collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), expected);
        }
    }

    #[test]
    fn rate_objective_rejects_negative_rates() {
        let reference = DoseResponseCurve::new(vec![1e-6], vec![1.0]).unwrap();
        let evaluator = ResidualEvaluator::new(
            binding_topology(), vec![binding_experiment(reference)], quick_config(),
        ).unwrap();
        let mut base = RateTable::new();
        base.insert("k_off", 1000.0);
        let objective = RateObjective::new(evaluator, base, vec!["k_on".to_string()]).unwrap();

        assert!(matches!(objective.evaluate(&[-1.0], 1), Err(SercaError::InvalidRate { .. })));
        assert!(objective.evaluate(&[1e9, 2.0], 1).is_err());
        assert!(objective.rates_at(&[2e9]).unwrap().get("k_on") == Some(2e9));
    }

    #[test]
    fn saturation_at_the_top_of_the_grid_is_reported() {
        // exit probability is 0.1 at 1e-7 M but 1000 at 1e-3 M
        let reference = DoseResponseCurve::new(vec![1e-7, 1e-3], vec![0.5, 1.0]).unwrap();
        let config = SimulationConfig { dt: 1e-2, ..quick_config() };
        let evaluator = ResidualEvaluator::new(
            binding_topology(), vec![binding_experiment(reference)], config,
        ).unwrap();
        let mut rates = RateTable::new();
        rates.insert("k_on", 1e8);
        rates.insert("k_off", 10.0);

        let diagnostics = evaluator.diagnose(&rates).unwrap();
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].saturated.len(), 1);
        let (state, total) = diagnostics[0].saturated[0];
        assert_eq!(state, 0);
        assert!((total - 1000.0).abs() < 1e-6, "exit probability {}", total);
        assert!(diagnostics[0].unreachable.is_empty());
    }

    #[test]
    fn empty_experiment_list_is_rejected() {
        let result = ResidualEvaluator::new(binding_topology(), vec![], quick_config());
        assert!(matches!(result, Err(SercaError::EmptyWorkload(_))));
    }
}
