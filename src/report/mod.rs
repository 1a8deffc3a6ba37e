//! Final re-run of the best parameters and the CSV exports of a fitting run.

use std::path::{Path, PathBuf};
use chrono::Local;
use serde::Serialize;
use crate::ensemble::state_machine::environment::Species;
use crate::ensemble::state_machine::topology::{RateTable, Topology};
use crate::ensemble::{derive_seed, EnsembleSimulator, SimulationConfig, SimulationResult};
use crate::models::LiteratureRate;
use crate::residual::{ExperimentFit, ResidualEvaluator};
use crate::swarm::{FreeParameter, GlobalBest, IterationRecord};
use crate::SercaError;

/// Cytosolic calcium of the diagnostic time-course run (M)
pub const DIAGNOSTIC_CALCIUM: f64 = 1e-6;

/// Row of `best_fit_curve.csv`
#[derive(Debug, Clone, Serialize)]
pub struct CurveRecord {
    pub experiment: String,
    pub condition_molar: f64,
    pub raw_bound: f64,
    pub normalized: f64,
    pub reference: f64,
}

/// Row of `steady_state.csv`
#[derive(Debug, Clone, Serialize)]
pub struct SteadyStateRecord {
    pub experiment: String,
    pub condition_molar: f64,
    pub state: usize,
    pub label: String,
    pub fraction: f64,
}

/// Everything the final run of the best parameters produced
#[derive(Debug, Clone)]
pub struct BestRun {
    pub rates: RateTable,
    pub fits: Vec<ExperimentFit>,
    pub total_residual: f64,
    pub labels: Vec<String>,
    pub time_course: SimulationResult,
}

/// Re-runs the evaluator once with fixed rates, keeping per-state detail for plotting.
pub struct BestRunReporter<'a> {
    evaluator: &'a ResidualEvaluator,
    diagnostic_bin_width: usize,
}

impl<'a> BestRunReporter<'a> {

    pub fn new(evaluator: &'a ResidualEvaluator, diagnostic_bin_width: usize) -> Self {
        Self { evaluator, diagnostic_bin_width }
    }

    /// Sweeps every experiment and adds one full time course at 1 uM cytosolic calcium.
    pub fn run(&self, rates: &RateTable, seed: u64) -> Result<BestRun, SercaError> {
        self.evaluator.diagnose(rates)?;
        let fits = self.evaluator.evaluate_detailed(rates, seed)?;
        let total_residual = fits.iter().map(|fit| fit.residual).sum();
        for fit in &fits {
            log::info!("best run {}", fit);
        }

        let config = self.diagnostic_config()?;
        let environment = self.evaluator.get_experiments()
            .first()
            .map(|experiment| *experiment.get_base())
            .unwrap_or_default()
            .with(Species::CytosolicCalcium, DIAGNOSTIC_CALCIUM);
        let simulator = EnsembleSimulator::new(self.evaluator.get_topology(), rates, &environment, config)?
            .with_pool(self.evaluator.get_pool().clone());
        let time_course = simulator.run_full(derive_seed(seed, u64::MAX))?;

        return Ok(BestRun {
            rates: rates.clone(),
            fits,
            total_residual,
            labels: self.evaluator.get_topology().get_labels().to_vec(),
            time_course,
        });
    }

    /// Same run shape with finer bins; the steady-state window covers the same stretch of time
    fn diagnostic_config(&self) -> Result<SimulationConfig, SercaError> {
        let base = self.evaluator.get_config();
        let mut config = base.clone();
        config.bin_width = self.diagnostic_bin_width;
        let window_steps = base.window_bins * base.bin_width;
        config.window_bins = (window_steps / self.diagnostic_bin_width.max(1)).clamp(1, config.total_bins().max(1));
        config.validate()?;
        Ok(config)
    }
}

impl BestRun {

    /// Writes the curve, steady-state and time-course tables into `dir`
    pub fn export(&self, dir: &Path) -> Result<(), SercaError> {
        export_best_fit(&dir.join("best_fit_curve.csv"), &self.fits)?;
        export_steady_states(&dir.join("steady_state.csv"), &self.fits, &self.labels)?;
        export_time_course(&dir.join("time_states.csv"), &self.time_course, &self.labels)?;
        Ok(())
    }
}

/// Creates `base/run_<timestamp>` and returns it
pub fn timestamped_dir(base: &Path) -> Result<PathBuf, SercaError> {
    let timestamp = Local::now().format("%Y%m%d_%H%M%S");
    let dir = base.join(format!("run_{}", timestamp));
    std::fs::create_dir_all(&dir)?;
    log::info!("exporting to {}", dir.display());
    Ok(dir)
}

pub fn export_history(path: &Path, history: &[IterationRecord]) -> Result<(), SercaError> {
    let mut writer = csv::Writer::from_path(path)?;
    for record in history {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn export_best_fit(path: &Path, fits: &[ExperimentFit]) -> Result<(), SercaError> {
    let mut writer = csv::Writer::from_path(path)?;
    for fit in fits {
        let rows = fit.raw.points()
            .zip(fit.normalized.get_values())
            .zip(fit.reference.get_values());
        for (((condition, raw), normalized), reference) in rows {
            writer.serialize(CurveRecord {
                experiment: fit.name.clone(),
                condition_molar: condition,
                raw_bound: raw,
                normalized: *normalized,
                reference: *reference,
            })?;
        }
    }
    writer.flush()?;
    Ok(())
}

pub fn export_steady_states(path: &Path, fits: &[ExperimentFit], labels: &[String]) -> Result<(), SercaError> {
    let mut writer = csv::Writer::from_path(path)?;
    for fit in fits {
        for (condition, fractions) in fit.raw.get_conditions().iter().zip(&fit.steady_states) {
            for (state, fraction) in fractions.iter().enumerate() {
                writer.serialize(SteadyStateRecord {
                    experiment: fit.name.clone(),
                    condition_molar: *condition,
                    state,
                    label: labels.get(state).cloned().unwrap_or_default(),
                    fraction: *fraction,
                })?;
            }
        }
    }
    writer.flush()?;
    Ok(())
}

/// One row per sampled bin: time then the molecule count of every state
pub fn export_time_course(path: &Path, result: &SimulationResult, labels: &[String]) -> Result<(), SercaError> {
    let mut writer = csv::Writer::from_path(path)?;
    let mut header = vec!["time_s".to_string()];
    header.extend(labels.iter().cloned());
    writer.write_record(&header)?;

    for (time, counts) in result.time_course() {
        let mut row = vec![format!("{:e}", time)];
        row.extend(counts.iter().map(u64::to_string));
        writer.write_record(&row)?;
    }
    writer.flush()?;
    Ok(())
}

/// One line per fitted rate: value and units, then the literature value and provenance
pub fn summary_lines(
    parameters: &[FreeParameter],
    best: &GlobalBest,
    literature: &[LiteratureRate],
    topology: &Topology,
) -> Vec<String> {
    parameters.iter()
        .zip(&best.position)
        .map(|(parameter, value)| {
            let units = topology.rate_units(&parameter.name).unwrap_or("unused");
            match literature.iter().find(|rate| rate.key == parameter.name) {
                Some(rate) => format!(
                    "{} = {:e} {} (literature {:e}, {})", parameter.name, value, units, rate.value, rate.note
                ),
                None => format!("{} = {:e} {} (reference {:e})", parameter.name, value, units, parameter.reference),
            }
        })
        .collect()
}

/// Logs the global best and every fitted rate
pub fn log_summary(parameters: &[FreeParameter], best: &GlobalBest, literature: &[LiteratureRate], topology: &Topology) {
    log::info!("global best residual {:.6}", best.residual);
    for line in summary_lines(parameters, best, literature, topology) {
        log::info!("{}", line);
    }
}
