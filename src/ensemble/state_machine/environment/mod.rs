use std::fmt::Display;
use serde::{Deserialize, Serialize};

/// Reactant species whose concentration can gate a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Species {
    CytosolicCalcium,
    LumenalCalcium,
    MgAtp,
    MgAdp,
    Phosphate,
}

impl Species {
    pub const ALL: [Species; 5] = [
        Species::CytosolicCalcium,
        Species::LumenalCalcium,
        Species::MgAtp,
        Species::MgAdp,
        Species::Phosphate,
    ];
}

impl Display for Species {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Species::CytosolicCalcium => "Ca_cyt",
            Species::LumenalCalcium => "Ca_sr",
            Species::MgAtp => "MgATP",
            Species::MgAdp => "MgADP",
            Species::Phosphate => "Pi",
        };
        write!(f, "{}", name)
    }
}

/// Molar concentrations the ensemble is bathed in for one simulation run.
/// The analyte of an experiment is swept over its grid while the rest stay fixed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Environment {
    pub cytosolic_calcium: f64,
    pub lumenal_calcium: f64,
    pub mg_atp: f64,
    pub mg_adp: f64,
    pub phosphate: f64,
}

impl Default for Environment {
    /// Cofactor levels used throughout the reference fits; cytosolic calcium at 1 uM.
    fn default() -> Self {
        Self {
            cytosolic_calcium: 1e-6,
            lumenal_calcium: 1.3e-3,
            mg_atp: 5e-3,
            mg_adp: 36e-6,
            phosphate: 1e-3,
        }
    }
}

impl Environment {
    /// Returns the concentration of a species in M
    pub fn concentration(&self, species: Species) -> f64 {
        match species {
            Species::CytosolicCalcium => self.cytosolic_calcium,
            Species::LumenalCalcium => self.lumenal_calcium,
            Species::MgAtp => self.mg_atp,
            Species::MgAdp => self.mg_adp,
            Species::Phosphate => self.phosphate,
        }
    }

    /// Returns a copy with one species set to a new concentration
    pub fn with(mut self, species: Species, value: f64) -> Self {
        match species {
            Species::CytosolicCalcium => self.cytosolic_calcium = value,
            Species::LumenalCalcium => self.lumenal_calcium = value,
            Species::MgAtp => self.mg_atp = value,
            Species::MgAdp => self.mg_adp = value,
            Species::Phosphate => self.phosphate = value,
        }
        self
    }
}

impl Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut formatted_string = String::new();
        for species in Species::ALL {
            formatted_string.push_str(&format!("{}={:e},", species, self.concentration(species)));
        }
        write!(f, "{}", formatted_string.trim_end_matches(','))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_only_touches_the_named_species() {
        let base = Environment::default();
        let swept = base.with(Species::Phosphate, 2e-6);
        assert_eq!(swept.concentration(Species::Phosphate), 2e-6);
        for species in Species::ALL.iter().filter(|s| **s != Species::Phosphate) {
            assert_eq!(swept.concentration(*species), base.concentration(*species));
        }
    }

    #[test]
    fn display_lists_every_species() {
        let text = Environment::default().to_string();
        assert!(text.starts_with("Ca_cyt=1e-6"));
        assert_eq!(text.split(',').count(), 5);
    }
}
