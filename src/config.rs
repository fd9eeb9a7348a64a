use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::{error::ConfigError, params::Controls, render::NormalizationPolicy};

/// Design constants of the signal chain plus the controls to start with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SonarConfig {
    /// m/s, air at room temperature
    pub speed_of_sound: f32,
    /// occupied bandwidth is `guard_factor * bandwidth`
    pub guard_factor: f32,
    /// ceiling on the coherent processing interval, seconds
    pub max_cpi: f32,
    /// time constant of the slow clutter map, seconds
    pub clutter_time_constant: f32,
    /// granularity of the center frequency control, Hz
    pub center_frequency_step: f32,
    /// per-block decay of the input peak estimate
    pub peak_decay: f32,
    /// data cube frames per second handed to the display
    pub frame_rate: f32,
    pub normalization: NormalizationPolicy,
    pub controls: Controls,
}

impl Default for SonarConfig {
    fn default() -> Self {
        Self {
            speed_of_sound: 343.0,
            guard_factor: 1.3,
            max_cpi: 0.4,
            clutter_time_constant: 0.1,
            center_frequency_step: 500.0,
            peak_decay: 0.001,
            frame_rate: 4.0,
            normalization: NormalizationPolicy::PerFrame,
            controls: Controls::default(),
        }
    }
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<SonarConfig, ConfigError> {
    let config_str = fs::read_to_string(path)?;
    Ok(serde_yaml::from_str(&config_str)?)
}

pub fn save_config<P: AsRef<Path>>(config: &SonarConfig, path: P) -> Result<(), ConfigError> {
    let yaml = serde_yaml::to_string(config)?;
    fs::write(path, yaml)?;
    Ok(())
}
