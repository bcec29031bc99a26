//! Runtime configuration: diagnostics sinks, seeding and default tolerances.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::compare::Tolerance;
use crate::random;
use crate::{Result, RuntimeError};

pub const ENV_INSTRUMENT_FILE: &str = "XURA_RT_INSTRUMENT_FILE";
pub const ENV_SEED: &str = "XURA_RT_SEED";
pub const ENV_RTOL: &str = "XURA_RT_RTOL";
pub const ENV_ATOL: &str = "XURA_RT_ATOL";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// File the `%i` print sink appends to; stdout when unset.
    #[serde(default)]
    pub instrument_file: Option<PathBuf>,
    /// Seed for the process-wide generator, applied by [`RuntimeConfig::apply`].
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default = "default_rtol")]
    pub rtol: f64,
    #[serde(default = "default_atol")]
    pub atol: f64,
}

fn default_rtol() -> f64 { Tolerance::default().rtol }
fn default_atol() -> f64 { Tolerance::default().atol }

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            instrument_file: None,
            seed: None,
            rtol: default_rtol(),
            atol: default_atol(),
        }
    }
}

impl RuntimeConfig {
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| RuntimeError::Config(e.to_string()))
    }

    /// Read the `XURA_RT_*` variables. Unset or unparsable values keep their defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(path) = lookup(ENV_INSTRUMENT_FILE).filter(|p| !p.is_empty()) {
            config.instrument_file = Some(PathBuf::from(path));
        }
        if let Some(seed) = lookup(ENV_SEED).and_then(|s| s.trim().parse().ok()) {
            config.seed = Some(seed);
        }
        if let Some(rtol) = lookup(ENV_RTOL).and_then(|s| s.trim().parse().ok()) {
            config.rtol = rtol;
        }
        if let Some(atol) = lookup(ENV_ATOL).and_then(|s| s.trim().parse().ok()) {
            config.atol = atol;
        }
        config
    }

    pub fn tolerance(&self) -> Tolerance {
        Tolerance::new(self.rtol, self.atol)
    }

    /// Seed the process-wide generator if a seed is configured.
    pub fn apply(&self) {
        if let Some(seed) = self.seed {
            random::define_seed(seed);
        }
    }

    /// Writer behind the `%i` print marker.
    pub fn instrument_sink(&self) -> io::Result<Box<dyn Write>> {
        match &self.instrument_file {
            Some(path) => {
                let file = OpenOptions::new().create(true).append(true).open(path)?;
                Ok(Box::new(io::BufWriter::new(file)))
            }
            None => Ok(Box::new(io::stdout())),
        }
    }
}
