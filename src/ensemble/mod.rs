pub mod occupancy;
pub mod state_machine;

use std::ops::Range;
use std::sync::{mpsc::channel, Arc, Mutex};
use rand::{rngs::StdRng, SeedableRng};
use serde::{Deserialize, Serialize};
use threadpool::ThreadPool;
use occupancy::{OccupancyHistogram, Retention};
use state_machine::environment::Environment;
use state_machine::topology::{RateTable, Topology};
use state_machine::StateMachine;
use crate::SercaError;

/// Immutable parameters of one ensemble run.
/// - molecules
///     - ensemble size M, every molecule starts in state 0
/// - timesteps
///     - steps T advanced per molecule
/// - dt
///     - timestep size in seconds
/// - bin_width
///     - a histogram bin is sampled every B steps
/// - window_bins
///     - trailing bins W averaged into the steady state
/// - threads
///     - molecule chunks run concurrently on this many pool threads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub molecules: usize,
    pub timesteps: usize,
    pub dt: f64,
    pub bin_width: usize,
    pub window_bins: usize,
    pub threads: usize,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            molecules: 10_000,
            timesteps: 100_001,
            dt: 1e-7,
            bin_width: 1_000,
            window_bins: 10,
            threads: 1,
        }
    }
}

impl SimulationConfig {

    /// Number of bins the time axis resolves
    pub fn total_bins(&self) -> usize {
        if self.bin_width == 0 { 0 } else { self.timesteps / self.bin_width }
    }

    /// Rejects every shape that would make the steady-state average undefined
    pub fn validate(&self) -> Result<(), SercaError> {
        if self.molecules == 0 {
            return Err(SercaError::EmptyWorkload("ensemble needs at least one molecule".to_string()));
        }
        if self.timesteps == 0 {
            return Err(SercaError::EmptyWorkload("simulation needs at least one timestep".to_string()));
        }
        if !(self.dt.is_finite() && self.dt > 0.0) {
            return Err(SercaError::Config(format!("timestep size must be positive, got {}", self.dt)));
        }
        if self.bin_width == 0 {
            return Err(SercaError::Config("bin width must be at least one step".to_string()));
        }
        if self.window_bins == 0 || self.window_bins > self.total_bins() {
            return Err(SercaError::WindowOutOfRange {
                window: self.window_bins,
                available: self.total_bins(),
                timesteps: self.timesteps,
                bin_width: self.bin_width,
            });
        }
        Ok(())
    }
}

/// Output of one ensemble run: the summed histogram and its trailing-window average
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationResult {
    histogram: OccupancyHistogram,
    steady_state: Vec<f64>,
    dt: f64,
}

impl SimulationResult {
    pub fn get_histogram(&self) -> &OccupancyHistogram {
        &self.histogram
    }

    /// Steady-state occupation fraction of every state, each in [0, 1]
    pub fn get_steady_state(&self) -> &[f64] {
        &self.steady_state
    }

    /// Rows of (time in s, per-state molecule counts) for every retained bin
    pub fn time_course(&self) -> Vec<(f64, Vec<u64>)> {
        self.histogram.retained_bins()
            .filter_map(|bin| self.histogram.counts_in_bin(bin)
                .map(|counts| (self.histogram.bin_time(bin, self.dt), counts.to_vec())))
            .collect()
    }
}

/// SplitMix64 step: maps (seed, stream) to an independent 64 bit seed.
///
/// Every molecule seeds its own generator from this, so results do not depend on
/// how molecules are split across threads.
pub fn derive_seed(seed: u64, stream: u64) -> u64 {
    let mut z = seed.wrapping_add(stream.wrapping_add(1).wrapping_mul(0x9E37_79B9_7F4A_7C15));
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Worker threads shared by every ensemble run that holds a clone.
///
/// Clones hand out the same pool, so a whole fit starts its molecule threads once.
#[derive(Debug, Clone)]
pub struct EnsemblePool {
    threads: usize,
    pool: Arc<Mutex<ThreadPool>>,
}

impl EnsemblePool {

    pub fn new(threads: usize) -> Self {
        let threads = threads.max(1);
        let pool = threadpool::Builder::new()
            .num_threads(threads)
            .thread_name("SercaEnsembleThread".to_string())
            .build();
        Self { threads, pool: Arc::new(Mutex::new(pool)) }
    }

    pub fn get_threads(&self) -> usize {
        self.threads
    }

    /// A handle submitting to the shared threads
    fn handle(&self) -> Result<ThreadPool, SercaError> {
        self.pool.lock()
            .map(|pool| pool.clone())
            .map_err(|_| SercaError::WorkerLost("ensemble pool lock poisoned".to_string()))
    }
}

/// Runs M independent trajectories of one compiled machine and bins their occupancy.
pub struct EnsembleSimulator {
    machine: Arc<StateMachine>,
    config: SimulationConfig,
    pool: Option<EnsemblePool>,
}

impl EnsembleSimulator {

    /// Compiles `topology` under `rates` and `environment`; all configuration errors surface here
    pub fn new(
        topology: &Topology,
        rates: &RateTable,
        environment: &Environment,
        config: SimulationConfig,
    ) -> Result<Self, SercaError> {
        config.validate()?;
        let machine = StateMachine::compile(topology, rates, environment, config.dt)?;
        Ok(Self { machine: Arc::new(machine), config, pool: None })
    }

    pub fn from_machine(machine: Arc<StateMachine>, config: SimulationConfig) -> Result<Self, SercaError> {
        config.validate()?;
        Ok(Self { machine, config, pool: None })
    }

    /// Runs molecule chunks on `pool` instead of starting threads for this run alone
    pub fn with_pool(mut self, pool: EnsemblePool) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn get_machine(&self) -> &StateMachine {
        &self.machine
    }

    pub fn get_config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Keeps only the trailing window; enough for a steady state
    pub fn run(&self, seed: u64) -> Result<SimulationResult, SercaError> {
        self.run_with_retention(seed, Retention::Trailing(self.config.window_bins))
    }

    /// Keeps every bin, for time-course exports
    pub fn run_full(&self, seed: u64) -> Result<SimulationResult, SercaError> {
        self.run_with_retention(seed, Retention::Full)
    }

    pub fn run_with_retention(&self, seed: u64, retention: Retention) -> Result<SimulationResult, SercaError> {
        let template = OccupancyHistogram::new(
            self.machine.get_state_count(),
            self.config.timesteps,
            self.config.bin_width,
            retention,
        )?;

        let chunks = self.config.threads.clamp(1, self.config.molecules);
        let histogram = if chunks == 1 {
            Self::simulate_molecules(&self.machine, template, 0..self.config.molecules, self.config.timesteps, seed)
        } else {
            self.run_chunked(template, chunks, seed)?
        };

        let steady_state = histogram.steady_state(self.config.window_bins, self.config.molecules)?;
        log::debug!(
            "{}: {} molecules x {} steps done, steady state {:?}",
            self.machine.get_topology_name(), self.config.molecules, self.config.timesteps, steady_state
        );

        return Ok(SimulationResult {
            histogram,
            steady_state,
            dt: self.config.dt,
        });
    }

    /// Splits the ensemble into contiguous molecule ranges, one pool job each, and sums their histograms.
    ///
    /// The shared pool may be serving other runs at the same time, so completion is
    /// counted on this run's own channel rather than by joining the pool.
    fn run_chunked(
        &self,
        template: OccupancyHistogram,
        chunks: usize,
        seed: u64,
    ) -> Result<OccupancyHistogram, SercaError> {
        let pool = match &self.pool {
            Some(shared) => shared.handle()?,
            None => EnsemblePool::new(chunks).handle()?,
        };
        let (chunk_sender, chunk_reciever) = channel();

        let molecules = self.config.molecules;
        for chunk in 0..chunks {
            let range = chunk * molecules / chunks..(chunk + 1) * molecules / chunks;
            let machine = Arc::clone(&self.machine);
            let histogram = template.clone();
            let timesteps = self.config.timesteps;
            let sender = chunk_sender.clone();
            pool.execute(move || {
                let counts = Self::simulate_molecules(&machine, histogram, range, timesteps, seed);
                // the gather below reports a dropped chunk
                let _ = sender.send(counts);
            });
        }
        drop(chunk_sender);

        let mut total = template;
        let mut received = 0;
        for counts in chunk_reciever.iter() {
            total.merge(&counts)?;
            received += 1;
        }

        if received != chunks {
            log::warn!("{} ensemble threads panicked so far", pool.panic_count());
            return Err(SercaError::WorkerLost(format!(
                "{} of {} molecule chunks returned", received, chunks
            )));
        }
        return Ok(total);
    }

    /// Advances each molecule in `molecules` through every timestep, recording its state at each sampling step.
    fn simulate_molecules(
        machine: &StateMachine,
        mut histogram: OccupancyHistogram,
        molecules: Range<usize>,
        timesteps: usize,
        seed: u64,
    ) -> OccupancyHistogram {
        for molecule in molecules {
            let mut rng = StdRng::seed_from_u64(derive_seed(seed, molecule as u64));
            let mut state = 0;
            for step in 0..timesteps {
                state = machine.step(state, &mut rng);
                if let Some(bin) = histogram.sampling_bin(step) {
                    histogram.record(bin, state);
                }
            }
        }
        histogram
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use state_machine::environment::Species;
    use state_machine::topology::edge::Edge;

    fn toggle() -> (Topology, RateTable) {
        let topology = Topology::new("toggle", vec![
            ("free", vec![Edge::gated(1, Species::CytosolicCalcium, "k_on")]),
            ("bound", vec![Edge::unimolecular(0, "k_off")]),
        ]).unwrap();
        let mut rates = RateTable::new();
        rates.insert("k_on", 1e9);
        rates.insert("k_off", 1000.0);
        (topology, rates)
    }

    fn small_config(threads: usize) -> SimulationConfig {
        SimulationConfig {
            molecules: 400,
            timesteps: 20_000,
            dt: 1e-5,
            bin_width: 100,
            window_bins: 100,
            threads,
        }
    }

    #[test]
    fn every_bin_holds_the_whole_ensemble() {
        let (topology, rates) = toggle();
        let config = small_config(3);
        let simulator = EnsembleSimulator::new(&topology, &rates, &Environment::default(), config.clone()).unwrap();
        let result = simulator.run_full(7).unwrap();

        let totals = result.get_histogram().bin_totals();
        assert_eq!(totals.len(), config.total_bins());
        assert!(totals.iter().all(|total| *total == config.molecules as u64));
        let sum: f64 = result.get_steady_state().iter().sum();
        assert!((sum - 1.0).abs() < 1e-12);
    }

    #[test]
    fn steady_state_matches_the_two_state_equilibrium() {
        // on = 1e9 * 1e-6 = 1000 s^-1 against off = 1000 s^-1: half bound
        let (topology, rates) = toggle();
        let simulator = EnsembleSimulator::new(&topology, &rates, &Environment::default(), small_config(1)).unwrap();
        let fractions = simulator.run(3).unwrap().get_steady_state().to_vec();
        assert!((fractions[1] - 0.5).abs() < 0.05, "bound fraction {}", fractions[1]);
    }

    #[test]
    fn thread_count_does_not_change_a_seeded_result() {
        let (topology, rates) = toggle();
        let environment = Environment::default();
        let serial = EnsembleSimulator::new(&topology, &rates, &environment, small_config(1)).unwrap();
        let parallel = EnsembleSimulator::new(&topology, &rates, &environment, small_config(4)).unwrap();
        assert_eq!(serial.run(99).unwrap(), parallel.run(99).unwrap());
    }

    #[test]
    fn one_pool_serves_concurrent_runs() {
        let (topology, rates) = toggle();
        let environment = Environment::default();
        let serial = EnsembleSimulator::new(&topology, &rates, &environment, small_config(1))
            .unwrap()
            .run(11)
            .unwrap();

        let pool = EnsemblePool::new(3);
        let handles: Vec<_> = (0..4).map(|_| {
            let simulator = EnsembleSimulator::new(&topology, &rates, &environment, small_config(3))
                .unwrap()
                .with_pool(pool.clone());
            std::thread::spawn(move || simulator.run(11).unwrap())
        }).collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), serial);
        }
        assert_eq!(pool.get_threads(), 3);
    }

    #[test]
    fn oversized_window_is_rejected_before_simulating() {
        let (topology, rates) = toggle();
        let mut config = small_config(1);
        config.timesteps = 500;
        let result = EnsembleSimulator::new(&topology, &rates, &Environment::default(), config);
        assert!(matches!(result, Err(SercaError::WindowOutOfRange { window: 100, available: 5, .. })));

        let mut config = small_config(1);
        config.molecules = 0;
        assert!(matches!(config.validate(), Err(SercaError::EmptyWorkload(_))));
    }

    #[test]
    fn derived_seeds_differ_per_stream() {
        let seeds: std::collections::HashSet<u64> = (0..1000).map(|stream| derive_seed(42, stream)).collect();
        assert_eq!(seeds.len(), 1000);
        assert_eq!(derive_seed(42, 5), derive_seed(42, 5));
        assert_ne!(derive_seed(42, 5), derive_seed(43, 5));
    }
}
