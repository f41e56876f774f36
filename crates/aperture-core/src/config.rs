use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::blind::Budgets;
use crate::consts::DEFAULT_PASSES;
use crate::deconv::DeconvolutionConfig;
use crate::error::{ApertureError, Result};
use crate::estimator::EstimatorConfig;
use crate::psf::{ModelKind, OpticsConfig, ParameterGroup};

/// How data weights are obtained.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum WeightingMode {
    /// Every voxel weighs one.
    #[default]
    Uniform,
    /// Variance-map weights computed from the data. Not available.
    Auto,
}

impl std::fmt::Display for WeightingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Uniform => write!(f, "uniform"),
            Self::Auto => write!(f, "auto"),
        }
    }
}

/// Complete configuration of a blind deconvolution run.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BlindConfig {
    pub optics: OpticsConfig,
    pub model: ModelKind,
    pub estimator: EstimatorConfig,
    pub deconvolution: DeconvolutionConfig,
    pub passes: usize,
    /// Iterations per group, in the order defocus, phase, modulus.
    pub budgets: Budgets,
    pub weights: WeightingMode,
}

impl Default for BlindConfig {
    fn default() -> Self {
        Self {
            optics: OpticsConfig::default(),
            model: ModelKind::default(),
            estimator: EstimatorConfig::default(),
            deconvolution: DeconvolutionConfig::default(),
            passes: DEFAULT_PASSES,
            budgets: Budgets::new(10, 0, 0),
            weights: WeightingMode::default(),
        }
    }
}

impl BlindConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| ApertureError::Config(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| ApertureError::Config(e.to_string()))
    }

    /// Check every section before any work starts.
    pub fn validate(&self) -> Result<()> {
        self.optics.validate()?;
        self.estimator.validate()?;
        self.deconvolution.validate()?;
        if self.passes == 0 {
            return Err(ApertureError::Config("at least one pass is required".into()));
        }
        if self.weights == WeightingMode::Auto {
            return Err(ApertureError::Unsupported(
                "automatic variance-map weighting".into(),
            ));
        }
        if let ModelKind::Gaussian { .. } = self.model {
            for group in [ParameterGroup::Phase, ParameterGroup::Modulus] {
                if self.budgets.get(group) > 0 {
                    return Err(ApertureError::Config(format!(
                        "the Gaussian model has no {group} parameters; set its budget to 0"
                    )));
                }
            }
        }
        Ok(())
    }
}
