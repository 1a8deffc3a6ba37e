pub mod partition;

use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use crate::ensemble::derive_seed;
use crate::SercaError;

/// Black-box function the swarm minimizes.
///
/// `seed` selects the random stream of a stochastic objective; deterministic ones ignore it.
/// An `Err` marks the evaluation as failed, it is never scored.
pub trait Objective: Send + Sync {
    fn evaluate(&self, position: &[f64], seed: u64) -> Result<f64, SercaError>;
}

/// Wraps a plain closure as a deterministic objective
pub struct FnObjective<F>(pub F);

impl<F> Objective for FnObjective<F>
where
    F: Fn(&[f64]) -> f64 + Send + Sync,
{
    fn evaluate(&self, position: &[f64], _seed: u64) -> Result<f64, SercaError> {
        let value = (self.0)(position);
        if !value.is_finite() {
            return Err(SercaError::NonFiniteResidual(value));
        }
        Ok(value)
    }
}

/// One fitted dimension: a named rate with its search bounds and literature value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FreeParameter {
    pub name: String,
    pub lower: f64,
    pub upper: f64,
    pub reference: f64,
}

impl FreeParameter {

    pub fn new(name: &str, lower: f64, upper: f64, reference: f64) -> Self {
        Self { name: name.to_string(), lower, upper, reference }
    }

    /// Bounds of 0.1x to 10x around a reference value
    pub fn around(name: &str, reference: f64) -> Self {
        Self::new(name, reference * 0.1, reference * 10.0, reference)
    }

    pub fn span(&self) -> f64 {
        self.upper - self.lower
    }

    pub fn validate(&self) -> Result<(), SercaError> {
        if !(self.lower.is_finite() && self.upper.is_finite() && self.lower < self.upper) {
            return Err(SercaError::Config(format!(
                "free parameter {} needs finite bounds with lower < upper, got [{}, {}]",
                self.name, self.lower, self.upper
            )));
        }
        Ok(())
    }
}

/// PSO coefficients and budget.
/// - w_max, w_min
///     - inertia falls linearly from w_max on the first iteration to w_min on the last
/// - c1, c2
///     - cognitive (personal best) and social (global best) pulls
/// - workers
///     - particle partitions evaluated concurrently each generation
/// - max_runtime
///     - optional wall-clock cap in seconds, checked between generations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwarmConfig {
    pub particles: usize,
    pub iterations: usize,
    pub w_max: f64,
    pub w_min: f64,
    pub c1: f64,
    pub c2: f64,
    pub workers: usize,
    pub seed: u64,
    pub clamp_to_bounds: bool,
    pub max_runtime: Option<u64>,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            particles: 100,
            iterations: 100,
            w_max: 1.0,
            w_min: 0.3,
            c1: 1.05,
            c2: 1.05,
            workers: std::thread::available_parallelism().map(|threads| threads.get()).unwrap_or(1),
            seed: 2023,
            clamp_to_bounds: false,
            max_runtime: None,
        }
    }
}

impl SwarmConfig {

    pub fn validate(&self) -> Result<(), SercaError> {
        if self.particles == 0 {
            return Err(SercaError::EmptyWorkload("swarm needs at least one particle".to_string()));
        }
        if self.workers == 0 {
            return Err(SercaError::Config("swarm needs at least one worker".to_string()));
        }
        for (name, value) in [("w_max", self.w_max), ("w_min", self.w_min), ("c1", self.c1), ("c2", self.c2)] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(SercaError::Config(format!("{} must be finite and non-negative, got {}", name, value)));
            }
        }
        Ok(())
    }

    /// Inertia weight for zero-based `iteration`
    pub fn inertia(&self, iteration: usize) -> f64 {
        let last = self.iterations.saturating_sub(1).max(1) as f64;
        let progress = (iteration as f64 / last).min(1.0);
        self.w_max - (self.w_max - self.w_min) * progress
    }
}

/// One candidate rate vector with its own random stream.
#[derive(Debug, Clone)]
pub struct Particle {
    id: usize,
    position: Vec<f64>,
    velocity: Vec<f64>,
    best_position: Vec<f64>,
    best_residual: f64,
    residual: Option<f64>,
    rng: StdRng,
}

impl Particle {

    /// Position uniform in each parameter's bounds, velocity uniform in [0, span/4]
    pub fn random(id: usize, parameters: &[FreeParameter], seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(derive_seed(seed, id as u64));
        let position: Vec<f64> = parameters.iter()
            .map(|parameter| rng.gen_range(parameter.lower..parameter.upper))
            .collect();
        let velocity = parameters.iter()
            .map(|parameter| rng.gen::<f64>() * 0.25 * parameter.span())
            .collect();

        Self {
            id,
            best_position: position.clone(),
            position,
            velocity,
            best_residual: f64::INFINITY,
            residual: None,
            rng,
        }
    }

    pub fn get_id(&self) -> usize {
        self.id
    }

    pub fn get_position(&self) -> &[f64] {
        &self.position
    }

    pub fn get_velocity(&self) -> &[f64] {
        &self.velocity
    }

    pub fn get_best_position(&self) -> &[f64] {
        &self.best_position
    }

    /// Infinity until the particle has one successful evaluation
    pub fn get_best_residual(&self) -> f64 {
        self.best_residual
    }

    /// Residual of the latest evaluation, None if it failed
    pub fn get_residual(&self) -> Option<f64> {
        self.residual
    }

    /// `v = w*v + c1*r1*(pbest - x) + c2*r2*(gbest - x)` then `x += v`, fresh r1, r2 per dimension.
    pub fn accelerate(
        &mut self,
        inertia: f64,
        config: &SwarmConfig,
        global_best: &[f64],
        bounds: Option<&[FreeParameter]>,
    ) {
        for dimension in 0..self.position.len() {
            let r1: f64 = self.rng.gen();
            let r2: f64 = self.rng.gen();
            let x = self.position[dimension];
            let cognitive = config.c1 * r1 * (self.best_position[dimension] - x);
            let social = config.c2 * r2 * (global_best.get(dimension).copied().unwrap_or(x) - x);

            self.velocity[dimension] = inertia * self.velocity[dimension] + cognitive + social;
            self.position[dimension] = x + self.velocity[dimension];

            if let Some(parameter) = bounds.and_then(|bounds| bounds.get(dimension)) {
                self.position[dimension] = self.position[dimension].clamp(parameter.lower, parameter.upper);
            }
        }
    }

    /// Stores an evaluation; a success no worse than the personal best replaces it
    pub fn accept(&mut self, residual: Option<f64>) {
        self.residual = residual;
        if let Some(value) = residual {
            if value <= self.best_residual {
                self.best_residual = value;
                self.best_position = self.position.clone();
            }
        }
    }
}

/// Swarm-wide best position and residual
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GlobalBest {
    pub position: Vec<f64>,
    pub residual: f64,
}

/// One line of the optimization history; iteration 0 is the initial evaluation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IterationRecord {
    pub iteration: usize,
    pub inertia: f64,
    pub iteration_best: Option<f64>,
    pub global_best: f64,
    pub failed_evaluations: usize,
    pub elapsed_seconds: f64,
}

/// Particles plus the global best, updated once per generation.
#[derive(Debug, Clone)]
pub struct SwarmState {
    particles: Vec<Particle>,
    global_best: Option<GlobalBest>,
    history: Vec<IterationRecord>,
}

impl SwarmState {

    pub fn initialize(parameters: &[FreeParameter], config: &SwarmConfig) -> Self {
        let particles = (0..config.particles)
            .map(|id| Particle::random(id, parameters, config.seed))
            .collect();
        Self { particles, global_best: None, history: Vec::new() }
    }

    pub fn get_particles(&self) -> &[Particle] {
        &self.particles
    }

    pub fn get_global_best(&self) -> Option<&GlobalBest> {
        self.global_best.as_ref()
    }

    pub fn get_history(&self) -> &[IterationRecord] {
        &self.history
    }

    /// Moves the particles out for scattering to workers
    pub fn take_particles(&mut self) -> Vec<Particle> {
        std::mem::take(&mut self.particles)
    }

    /// Folds one evaluated generation back in.
    ///
    /// The iteration's minimum replaces the global best when it is no worse; then every
    /// particle updates its personal best. Failed evaluations take part in neither.
    /// The initial generation with no successful evaluation at all is an error.
    pub fn absorb(
        &mut self,
        iteration: usize,
        inertia: f64,
        evaluated: Vec<(Particle, Option<f64>)>,
        elapsed_seconds: f64,
    ) -> Result<&IterationRecord, SercaError> {
        let mut failed_evaluations = 0;
        let mut iteration_best: Option<(usize, f64)> = None;
        for (index, (_, residual)) in evaluated.iter().enumerate() {
            match residual {
                Some(value) => {
                    if iteration_best.map_or(true, |(_, best)| *value < best) {
                        iteration_best = Some((index, *value));
                    }
                }
                None => failed_evaluations += 1,
            }
        }

        if let Some((index, value)) = iteration_best {
            let improves = self.global_best.as_ref().map_or(true, |best| value <= best.residual);
            if improves {
                self.global_best = Some(GlobalBest { position: evaluated[index].0.get_position().to_vec(), residual: value });
            }
        }
        let global_best = match &self.global_best {
            Some(best) => best.residual,
            None => return Err(SercaError::NoValidEvaluation { particles: evaluated.len() }),
        };

        self.particles = evaluated.into_iter()
            .map(|(mut particle, residual)| {
                particle.accept(residual);
                particle
            })
            .collect();

        self.history.push(IterationRecord {
            iteration,
            inertia,
            iteration_best: iteration_best.map(|(_, value)| value),
            global_best,
            failed_evaluations,
            elapsed_seconds,
        });
        return self.history.last().ok_or(SercaError::NoValidEvaluation { particles: 0 });
    }

    pub fn into_parts(self) -> (Vec<Particle>, Option<GlobalBest>, Vec<IterationRecord>) {
        (self.particles, self.global_best, self.history)
    }
}
