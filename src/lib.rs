//! # Description
//! Stochastic kinetics engine for the SERCA calcium pump. Each enzyme molecule walks a
//! discrete-state reaction cycle with fixed-timestep Monte Carlo; ensembles of molecules
//! give steady-state occupancies, which are scored against published binding curves.
//! A particle swarm searches the free rate constants for the best fit, evaluating its
//! particles in contiguous partitions on a worker pool.
//!
//! # Usage
//! - `models` picks a reaction graph and its literature rates
//! - `residual::ResidualEvaluator` turns a rate table into a residual
//! - `Builder` wraps any `swarm::Objective` into a `SwarmEngine`
//! - `report` re-runs the best fit and writes the CSV exports
//!
//! # Progress
//! `Builder::build` returns a receiver of `SwarmResponse` events
//! - Minimal
//!     - one event per completed iteration and a final one with the global best
//! - Full (`verbose`)
//!     - additionally one event per evaluated particle

pub mod config;
pub mod ensemble;
pub mod models;
pub mod report;
pub mod residual;
pub mod swarm;

use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};
use threadpool::ThreadPool;
use ensemble::derive_seed;
use swarm::partition::{self, PartitionReport};
use swarm::{FreeParameter, GlobalBest, IterationRecord, Objective, Particle, SwarmConfig, SwarmState};

/// Salt separating evaluation seeds from particle initialization seeds
const EVALUATION_STREAM: u64 = 0xE7A1_0A7E;

/// Serca Error Types
#[derive(Debug, thiserror::Error)]
pub enum SercaError {
    // configuration, rejected before any simulation
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("rate {rate} is required by topology {topology} but missing from the rate table")]
    MissingRate { rate: String, topology: String },
    #[error("rate {rate} must be finite and non-negative, got {value}")]
    InvalidRate { rate: String, value: f64 },
    #[error("state {state} is outside the {states} states of the model ({context})")]
    UnknownState { state: usize, states: usize, context: String },
    #[error("steady-state window of {window} bins needs more history: {timesteps} steps at bin width {bin_width} give {available} bins")]
    WindowOutOfRange { window: usize, available: usize, timesteps: usize, bin_width: usize },
    #[error("condition grid has {grid} points but the reference curve has {reference}")]
    GridMismatch { grid: usize, reference: usize },
    #[error("nothing to do: {0}")]
    EmptyWorkload(String),

    // numerical degeneracy, aborts one evaluation
    #[error("cannot normalize a {points}-point curve whose maximum is zero")]
    ZeroMaximum { points: usize },
    #[error("residual evaluated to {0}")]
    NonFiniteResidual(f64),

    // orchestration
    #[error("worker {worker} reported particles {start}..{end} that another worker already owns")]
    PartitionOverlap { worker: usize, start: usize, end: usize },
    #[error("particles {start}..{end} were not reported (worker {worker})")]
    PartitionGap { worker: usize, start: usize, end: usize },
    #[error("worker lost: {0}")]
    WorkerLost(String),
    #[error("none of the {particles} initial particles could be evaluated")]
    NoValidEvaluation { particles: usize },

    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

type ParticleID = usize;
type Iteration = usize;
/// Serca Response types
#[derive(Debug, Clone)]
pub enum SwarmResponse {
    ParticleEvaluated(Iteration, ParticleID, Vec<f64>, Option<f64>),
    IterationComplete(IterationRecord),
    Finished(GlobalBest),
}

#[derive(Clone)]
pub enum SwarmReturn {
    Full(Sender<SwarmResponse>),
    Minimal(Sender<SwarmResponse>),
}

/// This is a builder object containing defaults and methods for constructing a SwarmEngine Object.
///
/// # Usage
/// ```ignore
/// let (engine, responses) = Builder::new(objective, parameters).particles(20).iterations(10).build()?;
/// ```
pub struct Builder {
    // set externally
    objective: Arc<dyn Objective>,
    parameters: Vec<FreeParameter>,
    config: SwarmConfig,

    // constructed internally
    runtime_return: SwarmReturn,
    runtime_reciever: Receiver<SwarmResponse>,
}

impl Builder {
    /// Builds a new SwarmEngine instance for `objective` over `parameters` with default values
    ///
    /// particles = 100
    /// iterations = 100
    /// inertia = 1.0 falling to 0.3
    /// c1 = c2 = 1.05
    /// workers = available cores
    /// runtime = unlimited
    /// return verbosity = minimal
    ///
    pub fn new(objective: Arc<dyn Objective>, parameters: Vec<FreeParameter>) -> Self {
        let (runtime_sender, runtime_reciever) = channel();
        Self {
            objective,
            parameters,
            config: SwarmConfig::default(),
            runtime_return: SwarmReturn::Minimal(runtime_sender),
            runtime_reciever,
        }
    }

    /// Replaces every coefficient at once
    pub fn config(mut self, config: SwarmConfig) -> Self {
        self.config = config;
        self
    }

    pub fn particles(mut self, count: usize) -> Self {
        self.config.particles = count;
        self
    }

    pub fn iterations(mut self, count: usize) -> Self {
        self.config.iterations = count;
        self
    }

    /// Sets the number of particle partitions evaluated concurrently
    pub fn workers(mut self, count: usize) -> Self {
        self.config.workers = count;
        self
    }

    pub fn inertia(mut self, w_max: f64, w_min: f64) -> Self {
        self.config.w_max = w_max;
        self.config.w_min = w_min;
        self
    }

    pub fn coefficients(mut self, c1: f64, c2: f64) -> Self {
        self.config.c1 = c1;
        self.config.c2 = c2;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = seed;
        self
    }

    /// Sets the maximum runtime in seconds, checked between generations
    pub fn runtime(mut self, time: u64) -> Self {
        self.config.max_runtime = Some(time);
        self
    }

    /// Keeps particles inside their bounds after every move
    pub fn clamp(mut self) -> Self {
        self.config.clamp_to_bounds = true;
        self
    }

    /// Toggles return verbosity between minimal and full
    pub fn verbose(mut self) -> Self {
        self.runtime_return = match self.runtime_return {
            SwarmReturn::Minimal(sender) => SwarmReturn::Full(sender),
            SwarmReturn::Full(sender) => SwarmReturn::Minimal(sender),
        };
        self
    }

    /// Consumes builder object and outputs a swarm engine object
    pub fn build(self) -> Result<(SwarmEngine, Receiver<SwarmResponse>), SercaError> {
        self.config.validate()?;
        if self.parameters.is_empty() {
            return Err(SercaError::EmptyWorkload("no free parameters to fit".to_string()));
        }
        for parameter in &self.parameters {
            parameter.validate()?;
        }

        let computation_threads = threadpool::Builder::new()
            .num_threads(self.config.workers)
            .thread_name("SercaSwarmThread".to_string())
            .build();

        let runtime = SwarmEngine {
            objective: self.objective,
            parameters: self.parameters,
            config: self.config,
            computation_threads,
            runtime_return: self.runtime_return,
        };

        return Ok((runtime, self.runtime_reciever));
    }
}

/// Result of a completed (or runtime-limited) swarm run
#[derive(Debug, Clone)]
pub struct SwarmOutcome {
    pub global_best: GlobalBest,
    pub history: Vec<IterationRecord>,
    pub particles: Vec<Particle>,
    pub completed_iterations: usize,
    pub stopped_early: bool,
}

/// Main backend runtime object: the PSO driver and its worker pool
pub struct SwarmEngine {
    // set externally
    objective: Arc<dyn Objective>,
    parameters: Vec<FreeParameter>,
    config: SwarmConfig,

    // constructed internally
    computation_threads: ThreadPool,
    runtime_return: SwarmReturn,
}

impl SwarmEngine {

    pub fn get_config(&self) -> &SwarmConfig {
        &self.config
    }

    pub fn get_parameters(&self) -> &[FreeParameter] {
        &self.parameters
    }

    /// Evaluates the initial swarm, then runs the fixed iteration budget.
    ///
    /// Every generation scatters contiguous particle slices to the workers, waits for
    /// all of them, reassembles the swarm and only then updates the bests.
    pub fn run(&self) -> Result<SwarmOutcome, SercaError> {
        let started = Instant::now();
        let mut state = SwarmState::initialize(&self.parameters, &self.config);
        log::info!(
            "initialized {} particles over {} parameters, {} workers",
            self.config.particles, self.parameters.len(), self.config.workers
        );

        self.generation(&mut state, 0, self.config.w_max, None, started)?;

        let mut completed_iterations = 0;
        let mut stopped_early = false;
        for iteration in 0..self.config.iterations {
            if let Some(limit) = self.config.max_runtime {
                if started.elapsed() >= Duration::from_secs(limit) {
                    log::warn!(
                        "forced termination after {} of {} iterations because max time was reached, returned best may not be converged",
                        completed_iterations, self.config.iterations
                    );
                    stopped_early = true;
                    break;
                }
            }

            let inertia = self.config.inertia(iteration);
            let global_best = state.get_global_best().map(|best| Arc::new(best.position.clone()));
            self.generation(&mut state, iteration + 1, inertia, global_best, started)?;
            completed_iterations += 1;
        }

        let (particles, global_best, history) = state.into_parts();
        let global_best = global_best.ok_or(SercaError::NoValidEvaluation { particles: self.config.particles })?;
        self.respond(SwarmResponse::Finished(global_best.clone()));

        return Ok(SwarmOutcome { global_best, history, particles, completed_iterations, stopped_early });
    }

    /// One scatter, evaluate, gather and update round
    fn generation(
        &self,
        state: &mut SwarmState,
        iteration: usize,
        inertia: f64,
        global_best: Option<Arc<Vec<f64>>>,
        started: Instant,
    ) -> Result<(), SercaError> {
        let particles = state.take_particles();
        let total = particles.len();
        let ranges = partition::ranges(total, self.config.workers);
        let slices = partition::scatter(particles, &ranges);

        let (computation_sender, computation_reciever) = channel();
        for (worker, (range, slice)) in ranges.iter().cloned().zip(slices).enumerate() {
            let objective = Arc::clone(&self.objective);
            let config = self.config.clone();
            let bounds = if self.config.clamp_to_bounds { Some(self.parameters.clone()) } else { None };
            let global_best = global_best.clone();
            let sender = computation_sender.clone();

            self.computation_threads.execute(move || {
                let items = Self::evaluate_slice(
                    objective.as_ref(),
                    slice,
                    iteration,
                    inertia,
                    &config,
                    global_best.as_deref().map(Vec::as_slice),
                    bounds.as_deref(),
                );
                // a dropped report shows up as a lost worker below
                let _ = sender.send(PartitionReport { worker, range, items });
            });
        }
        drop(computation_sender);

        // every worker has to report before any best is touched
        let reports: Vec<_> = computation_reciever.iter().collect();
        if reports.len() != ranges.len() {
            return Err(SercaError::WorkerLost(format!(
                "{} of {} partitions returned in iteration {}", reports.len(), ranges.len(), iteration
            )));
        }
        let evaluated = partition::assemble(reports, total)?;

        for (particle, residual) in &evaluated {
            if let Some(value) = residual {
                log::info!(
                    "iteration {} particle {}: {} residual {:.6}",
                    iteration, particle.get_id(), self.describe(particle.get_position()), value
                );
            }
            if let SwarmReturn::Full(sender) = &self.runtime_return {
                let _ = sender.send(SwarmResponse::ParticleEvaluated(
                    iteration, particle.get_id(), particle.get_position().to_vec(), *residual,
                ));
            }
        }

        let record = state.absorb(iteration, inertia, evaluated, started.elapsed().as_secs_f64())?.clone();
        log::info!(
            "iteration {} (w = {:.3}): global best {:.6}, {} failed evaluations",
            record.iteration, record.inertia, record.global_best, record.failed_evaluations
        );
        self.respond(SwarmResponse::IterationComplete(record));
        Ok(())
    }

    /// Moves (unless this is the initial generation) and evaluates every particle of one slice
    fn evaluate_slice(
        objective: &dyn Objective,
        particles: Vec<Particle>,
        iteration: usize,
        inertia: f64,
        config: &SwarmConfig,
        global_best: Option<&[f64]>,
        bounds: Option<&[FreeParameter]>,
    ) -> Vec<(Particle, Option<f64>)> {
        particles.into_iter()
            .map(|mut particle| {
                if let Some(best) = global_best {
                    particle.accelerate(inertia, config, best, bounds);
                }
                let seed = derive_seed(
                    derive_seed(config.seed ^ EVALUATION_STREAM, iteration as u64),
                    particle.get_id() as u64,
                );
                let residual = match objective.evaluate(particle.get_position(), seed) {
                    Ok(value) => Some(value),
                    Err(error) => {
                        log::warn!("iteration {} particle {} evaluation failed: {}", iteration, particle.get_id(), error);
                        None
                    }
                };
                (particle, residual)
            })
            .collect()
    }

    fn describe(&self, position: &[f64]) -> String {
        self.parameters.iter()
            .zip(position)
            .map(|(parameter, value)| format!("{}={:e}", parameter.name, value))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn respond(&self, response: SwarmResponse) {
        match &self.runtime_return {
            SwarmReturn::Minimal(sender) | SwarmReturn::Full(sender) => {
                // the frontend may have stopped listening
                let _ = sender.send(response);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use swarm::FnObjective;

    fn parabola_1d() -> Arc<dyn Objective> {
        Arc::new(FnObjective(|x: &[f64]| -> f64 { (x[0] - 1.0).powi(2) }))
    }

    fn parabola_2d() -> Arc<dyn Objective> {
        Arc::new(FnObjective(|x: &[f64]| -> f64 { (x[0] - 1.0).powi(2) + (x[1] + 2.0).powi(2) }))
    }

    fn square(dimensions: usize) -> Vec<FreeParameter> {
        (0..dimensions).map(|d| FreeParameter::new(&format!("x{}", d), -5.0, 5.0, 0.0)).collect()
    }

    #[test]
    fn swarm_finds_the_parabola_minimum() {
        let (engine, _) = Builder::new(parabola_1d(), square(1))
            .particles(10)
            .iterations(5)
            .workers(2)
            .seed(17)
            .build()
            .unwrap();
        let outcome = engine.run().unwrap();
        assert!((outcome.global_best.position[0] - 1.0).abs() < 0.3, "{:?}", outcome.global_best);
        assert_eq!(outcome.history.len(), 6);
        assert_eq!(outcome.completed_iterations, 5);
        assert!(!outcome.stopped_early);
    }

    #[test]
    fn global_best_never_gets_worse() {
        let (engine, responses) = Builder::new(parabola_2d(), square(2))
            .particles(12)
            .iterations(8)
            .workers(3)
            .seed(5)
            .build()
            .unwrap();
        let outcome = engine.run().unwrap();

        let bests: Vec<f64> = outcome.history.iter().map(|record| record.global_best).collect();
        assert!(bests.windows(2).all(|pair| pair[1] <= pair[0]), "{:?}", bests);
        assert_eq!(*bests.last().unwrap(), outcome.global_best.residual);

        let events: Vec<SwarmResponse> = responses.try_iter().collect();
        assert_eq!(events.len(), 9 + 1);
        assert!(matches!(events.last(), Some(SwarmResponse::Finished(_))));
    }

    #[test]
    fn worker_count_does_not_change_a_seeded_run() {
        let run = |workers: usize| {
            let (engine, _) = Builder::new(parabola_2d(), square(2))
                .particles(9)
                .iterations(4)
                .workers(workers)
                .seed(99)
                .build()
                .unwrap();
            engine.run().unwrap().global_best
        };
        assert_eq!(run(1), run(4));
    }

    #[test]
    fn verbose_runs_report_every_particle() {
        let (engine, responses) = Builder::new(parabola_1d(), square(1))
            .particles(4)
            .iterations(2)
            .workers(2)
            .verbose()
            .build()
            .unwrap();
        engine.run().unwrap();
        let evaluated = responses.try_iter()
            .filter(|event| matches!(event, SwarmResponse::ParticleEvaluated(..)))
            .count();
        assert_eq!(evaluated, 4 * 3);
    }

    #[test]
    fn failed_evaluations_are_skipped_not_scored() {
        // positive half fails, so the minimum at 1.0 is unreachable
        let objective: Arc<dyn Objective> = Arc::new(FnObjective(|x: &[f64]| -> f64 {
            if x[0] > 0.0 { f64::NAN } else { (x[0] - 1.0).powi(2) }
        }));
        let (engine, _) = Builder::new(objective, square(1))
            .particles(10)
            .iterations(3)
            .workers(2)
            .seed(3)
            .build()
            .unwrap();
        let outcome = engine.run().unwrap();
        assert!(outcome.global_best.position[0] <= 0.0);
        assert!(outcome.global_best.residual >= 1.0);
    }

    #[test]
    fn all_failing_swarm_reports_no_valid_evaluation() {
        let objective: Arc<dyn Objective> = Arc::new(FnObjective(|_: &[f64]| -> f64 { f64::INFINITY }));
        let (engine, _) = Builder::new(objective, square(1)).particles(3).iterations(1).workers(1).build().unwrap();
        assert!(matches!(engine.run(), Err(SercaError::NoValidEvaluation { particles: 3 })));
    }

    #[test]
    fn zero_runtime_stops_after_the_initial_generation() {
        let (engine, _) = Builder::new(parabola_1d(), square(1))
            .particles(4)
            .iterations(50)
            .workers(1)
            .runtime(0)
            .build()
            .unwrap();
        let outcome = engine.run().unwrap();
        assert!(outcome.stopped_early);
        assert_eq!(outcome.completed_iterations, 0);
        assert_eq!(outcome.history.len(), 1);
    }

    #[test]
    fn clamped_swarm_stays_in_bounds() {
        let far_away: Arc<dyn Objective> = Arc::new(FnObjective(|x: &[f64]| -> f64 { (x[0] - 100.0).powi(2) }));
        let (engine, _) = Builder::new(far_away, square(1))
            .particles(6)
            .iterations(6)
            .workers(2)
            .clamp()
            .build()
            .unwrap();
        let outcome = engine.run().unwrap();
        assert!(outcome.particles.iter().all(|particle| particle.get_position()[0] <= 5.0));
        assert!(outcome.global_best.position[0] <= 5.0);
    }

    #[test]
    fn builder_rejects_empty_swarms() {
        assert!(Builder::new(parabola_1d(), square(1)).particles(0).build().is_err());
        assert!(Builder::new(parabola_1d(), vec![]).build().is_err());
        assert!(Builder::new(parabola_1d(), vec![FreeParameter::new("x", 2.0, 1.0, 1.5)]).build().is_err());
    }
}
