use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::constants::{
    DEFAULT_BLUR_STRENGTH, DEFAULT_FLOW_EPSILON, DEFAULT_FLOW_ITERATIONS, DEFAULT_FLOW_WINDOW,
    DEFAULT_MIN_EIGENVALUE, DEFAULT_PYRAMID_LEVELS, DEFAULT_SAMPLE_INTERVAL, MAX_BLUR_STRENGTH,
    MIN_BLUR_STRENGTH,
};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// What the producer does when a keyframe is still waiting to be processed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyframeHandoff {
    /// Replace the pending keyframe; the replaced keyframe is dropped and reported.
    #[default]
    LatestOnly,
    /// Block the producer until the worker has taken the pending keyframe and
    /// drained its gap from the buffer.
    Wait,
}

/// Optical-flow tuning knobs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowParams {
    pub window_size: usize,
    pub max_levels: usize,
    pub max_iterations: usize,
    pub epsilon: f64,
    pub min_eigenvalue: f64,
}

impl FlowParams {
    pub fn half_window(&self) -> usize {
        self.window_size / 2
    }
}

impl Default for FlowParams {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_FLOW_WINDOW,
            max_levels: DEFAULT_PYRAMID_LEVELS,
            max_iterations: DEFAULT_FLOW_ITERATIONS,
            epsilon: DEFAULT_FLOW_EPSILON,
            min_eigenvalue: DEFAULT_MIN_EIGENVALUE,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub sample_interval: usize,
    pub blur_strength: u32,
    pub flow: FlowParams,
    pub handoff: KeyframeHandoff,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_interval: DEFAULT_SAMPLE_INTERVAL,
            blur_strength: DEFAULT_BLUR_STRENGTH,
            flow: FlowParams::default(),
            handoff: KeyframeHandoff::default(),
        }
    }
}

impl EngineConfig {
    /// Loads a JSON config; missing fields take their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let json = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&json).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Room for every skipframe since the previous keyframe, twice over.
    pub fn buffer_capacity(&self) -> usize {
        2 * self.sample_interval
    }

    pub fn clamped_blur_strength(&self) -> u32 {
        self.blur_strength.clamp(MIN_BLUR_STRENGTH, MAX_BLUR_STRENGTH)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_interval == 0 {
            return Err(ConfigError::Invalid("sample_interval must be >= 1".into()));
        }
        let flow = &self.flow;
        if flow.window_size < 3 || flow.window_size % 2 == 0 {
            return Err(ConfigError::Invalid(format!(
                "flow.window_size must be an odd integer >= 3, got {}",
                flow.window_size
            )));
        }
        if flow.max_levels == 0 {
            return Err(ConfigError::Invalid("flow.max_levels must be >= 1".into()));
        }
        if flow.max_iterations == 0 {
            return Err(ConfigError::Invalid(
                "flow.max_iterations must be >= 1".into(),
            ));
        }
        if flow.epsilon.is_nan() || flow.epsilon <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "flow.epsilon must be positive, got {}",
                flow.epsilon
            )));
        }
        if flow.min_eigenvalue.is_nan() || flow.min_eigenvalue < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "flow.min_eigenvalue must be non-negative, got {}",
                flow.min_eigenvalue
            )));
        }
        Ok(())
    }
}
