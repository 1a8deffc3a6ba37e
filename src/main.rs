use std::path::PathBuf;
use std::sync::Arc;
use anyhow::{Context, Result};
use serca_swarm::config::RunConfig;
use serca_swarm::report::{self, BestRunReporter};
use serca_swarm::residual::{RateObjective, ResidualEvaluator};
use serca_swarm::Builder;

/// Parse command line arguments: config path, and whether to only write the defaults
fn parse_args() -> (PathBuf, Option<PathBuf>) {
    let args: Vec<String> = std::env::args().collect();
    let mut config_path = PathBuf::from("serca.json");
    let mut write_default = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                if let Some(path) = args.get(i + 1) {
                    config_path = PathBuf::from(path);
                    i += 1;
                }
            }
            "--write-default" => {
                if let Some(path) = args.get(i + 1) {
                    write_default = Some(PathBuf::from(path));
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("serca_swarm: fit SERCA rate constants to binding curves");
                println!();
                println!("Usage: serca_swarm [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -c, --config PATH        Run configuration (default: serca.json, reference run if absent)");
                println!("  --write-default PATH     Write the reference configuration to PATH and exit");
                println!("  --help, -h               Show this help");
                std::process::exit(0);
            }
            other => log::warn!("ignoring unknown argument {}", other),
        }
        i += 1;
    }

    (config_path, write_default)
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let (config_path, write_default) = parse_args();
    if let Some(path) = write_default {
        RunConfig::default().save(&path).with_context(|| format!("writing {}", path.display()))?;
        log::info!("reference configuration written to {}", path.display());
        return Ok(());
    }

    let config = RunConfig::load_or_default(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    config.validate().context("configuration rejected")?;

    let topology = config.model.topology()?;
    let experiments = config.readouts.iter()
        .map(|readout| config.model.experiment(*readout, config.environment))
        .collect();
    let evaluator = ResidualEvaluator::new(topology, experiments, config.simulation.clone())?;
    let rates = config.rate_table();
    log::info!(
        "model {} ({} states, {} rates), {} molecules x {} steps of {:e} s",
        config.model,
        evaluator.get_topology().get_state_count(),
        rates.len(),
        config.simulation.molecules,
        config.simulation.timesteps,
        config.simulation.dt
    );
    log::info!("environment {}", config.environment);
    evaluator.diagnose(&rates)?;

    let parameters = config.get_free_parameters();
    let names = parameters.iter().map(|parameter| parameter.name.clone()).collect();
    let objective = Arc::new(RateObjective::new(evaluator.clone(), rates, names)?);

    let (engine, _responses) = Builder::new(objective.clone(), parameters.clone())
        .config(config.swarm.clone())
        .build()?;
    let outcome = engine.run().context("swarm run failed")?;
    if outcome.stopped_early {
        log::warn!("stopped after {} iterations", outcome.completed_iterations);
    }
    report::log_summary(
        &parameters,
        &outcome.global_best,
        &config.model.literature_rates(),
        evaluator.get_topology(),
    );

    let best_rates = objective.rates_at(&outcome.global_best.position)?;
    let best = BestRunReporter::new(&evaluator, config.diagnostic_bin_width)
        .run(&best_rates, config.swarm.seed)
        .context("best-fit re-run failed")?;
    log::info!("best-fit re-run residual {:.6}", best.total_residual);

    let dir = report::timestamped_dir(&config.export_dir)?;
    report::export_history(&dir.join("iterations_vs_global_best.csv"), &outcome.history)?;
    best.export(&dir)?;
    config.save(&dir.join("config.json"))?;
    log::info!("exports written to {}", dir.display());

    Ok(())
}
