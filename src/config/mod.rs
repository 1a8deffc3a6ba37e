use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};
use crate::ensemble::state_machine::environment::Environment;
use crate::ensemble::state_machine::topology::RateTable;
use crate::ensemble::SimulationConfig;
use crate::models::{ModelVariant, Readout};
use crate::swarm::{FreeParameter, SwarmConfig};
use crate::SercaError;

/// Everything one fitting run needs, loadable from a JSON file.
/// Missing fields fall back to the reference run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub model: ModelVariant,
    pub readouts: Vec<Readout>,
    pub environment: Environment,
    /// Replace literature values of fixed rates
    pub rate_overrides: BTreeMap<String, f64>,
    /// Fitted rates; `None` uses the model's defaults
    pub free_parameters: Option<Vec<FreeParameter>>,
    pub simulation: SimulationConfig,
    pub swarm: SwarmConfig,
    /// Diagnostic time-course run written next to the exports
    pub diagnostic_bin_width: usize,
    pub export_dir: PathBuf,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            model: ModelVariant::Inesi13,
            readouts: vec![Readout::Calcium],
            environment: Environment::default(),
            rate_overrides: BTreeMap::new(),
            free_parameters: None,
            simulation: SimulationConfig::default(),
            swarm: SwarmConfig::default(),
            diagnostic_bin_width: 100,
            export_dir: PathBuf::from("exports"),
        }
    }
}

impl RunConfig {

    /// Reads `path` if it exists, otherwise logs and returns the defaults.
    /// A file that exists but does not parse is an error.
    pub fn load_or_default(path: &Path) -> Result<Self, SercaError> {
        if !path.exists() {
            log::info!("no config at {}, using the reference run", path.display());
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)?;
        let config: RunConfig = serde_json::from_str(&text)?;
        log::info!("loaded config from {}", path.display());
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), SercaError> {
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text)?;
        Ok(())
    }

    pub fn get_free_parameters(&self) -> Vec<FreeParameter> {
        self.free_parameters.clone().unwrap_or_else(|| self.model.free_parameters())
    }

    /// Literature rates of the model with the overrides applied
    pub fn rate_table(&self) -> RateTable {
        let mut rates = self.model.rate_table();
        for (key, value) in &self.rate_overrides {
            rates.insert(key, *value);
        }
        rates
    }

    /// Rejects every configuration error before any simulation runs.
    pub fn validate(&self) -> Result<(), SercaError> {
        self.simulation.validate()?;
        self.swarm.validate()?;
        if self.readouts.is_empty() {
            return Err(SercaError::EmptyWorkload("no readout selected".to_string()));
        }
        if self.diagnostic_bin_width == 0 {
            return Err(SercaError::Config("diagnostic bin width must be at least one step".to_string()));
        }

        let topology = self.model.topology()?;
        let rates = self.rate_table();
        rates.check_covers(&topology)?;
        for (key, value) in rates.iter() {
            if !(value.is_finite() && value >= 0.0) {
                return Err(SercaError::InvalidRate { rate: key.to_string(), value });
            }
        }

        let parameters = self.get_free_parameters();
        if parameters.is_empty() {
            return Err(SercaError::EmptyWorkload("no free parameters to fit".to_string()));
        }
        let known = topology.rate_keys();
        for parameter in &parameters {
            parameter.validate()?;
            if !known.contains(parameter.name.as_str()) {
                return Err(SercaError::MissingRate {
                    rate: parameter.name.clone(),
                    topology: topology.get_name().to_string(),
                });
            }
        }

        for readout in &self.readouts {
            self.model.weights(*readout).check(&topology)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_describe_the_reference_run() {
        let config = RunConfig::default();
        assert_eq!(config.simulation.molecules, 10_000);
        assert_eq!(config.simulation.timesteps, 100_001);
        assert_eq!(config.simulation.dt, 1e-7);
        assert_eq!(config.swarm.particles, 100);
        assert_eq!((config.swarm.w_max, config.swarm.w_min), (1.0, 0.3));
        assert_eq!((config.swarm.c1, config.swarm.c2), (1.05, 1.05));
        config.validate().unwrap();
    }

    #[test]
    fn partial_files_fill_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.json");
        std::fs::write(&path, r#"{ "model": "Linear12", "swarm": { "particles": 8 }, "rate_overrides": { "k_S1_S0": 500.0 } }"#).unwrap();

        let config = RunConfig::load_or_default(&path).unwrap();
        assert_eq!(config.model, ModelVariant::Linear12);
        assert_eq!(config.swarm.particles, 8);
        assert_eq!(config.swarm.iterations, 100);
        assert_eq!(config.rate_table().get("k_S1_S0"), Some(500.0));
        config.validate().unwrap();
    }

    #[test]
    fn missing_file_means_defaults_but_broken_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = RunConfig::load_or_default(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config, RunConfig::default());

        let broken = dir.path().join("broken.json");
        std::fs::write(&broken, "{ not json").unwrap();
        assert!(matches!(RunConfig::load_or_default(&broken), Err(SercaError::Json(_))));
    }

    #[test]
    fn saved_config_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("saved.json");
        let mut config = RunConfig::default();
        config.readouts = vec![Readout::Calcium, Readout::Phosphate];
        config.save(&path).unwrap();
        assert_eq!(RunConfig::load_or_default(&path).unwrap(), config);
    }

    #[test]
    fn validation_catches_bad_runs() {
        let mut config = RunConfig::default();
        config.simulation.window_bins = 500;
        assert!(matches!(config.validate(), Err(SercaError::WindowOutOfRange { .. })));

        let mut config = RunConfig::default();
        config.free_parameters = Some(vec![FreeParameter::new("k_S99_S0", 1.0, 2.0, 1.5)]);
        assert!(matches!(config.validate(), Err(SercaError::MissingRate { .. })));

        let mut config = RunConfig::default();
        config.rate_overrides.insert("k_S1_S0".to_string(), -1.0);
        assert!(matches!(config.validate(), Err(SercaError::InvalidRate { .. })));

        let mut config = RunConfig::default();
        config.readouts.clear();
        assert!(config.validate().is_err());
    }
}
