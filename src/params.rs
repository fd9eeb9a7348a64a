//! Radar parameter derivation.
//!
//! [`derive`] maps the user controls and the device sample rate to every
//! parameter the signal chain needs. It keeps no state: each control change
//! recomputes the whole set from scratch.

use log::debug;
use serde::{Deserialize, Serialize};

use crate::{config::SonarConfig, error::ParameterError, ClutterFilterMode};

pub const BANDWIDTH_INDEX_MIN: i32 = -8;
pub const BANDWIDTH_INDEX_MAX: i32 = 8;
pub const PULSE_LENGTH_INDEX_MAX: u32 = 4;
const PULSE_LENGTH_BASE: usize = 256;

/// Raw values of the user controls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Controls {
    /// `bandwidth = round(40 * 2^(index/4)) * 100` Hz
    pub bandwidth_index: i32,
    /// Requested chirp center frequency in Hz, clamped to the guard band
    pub center_frequency: f32,
    /// `pulse_length = 256 * 2^index` samples
    pub pulse_length_index: u32,
    pub pulses_integrated: usize,
    pub apply_window: bool,
    pub clutter_filter: ClutterFilterMode,
    pub range_offset: bool,
}

impl Default for Controls {
    fn default() -> Self {
        Self {
            bandwidth_index: 0,
            center_frequency: 17000.0,
            pulse_length_index: 1,
            pulses_integrated: 21,
            apply_window: true,
            clutter_filter: ClutterFilterMode::None,
            range_offset: false,
        }
    }
}

pub fn bandwidth_for_index(index: i32) -> f32 {
    let index = index.clamp(BANDWIDTH_INDEX_MIN, BANDWIDTH_INDEX_MAX);
    (40.0 * f32::powf(2.0, index as f32 / 4.0)).round() * 100.0
}

pub fn pulse_length_for_index(index: u32) -> usize {
    PULSE_LENGTH_BASE << index.min(PULSE_LENGTH_INDEX_MAX)
}

/// Read-only sensor characteristics shown next to the display.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DerivedMetrics {
    pub range_resolution: f32,
    pub wavelength: f32,
    /// coherent processing interval, seconds
    pub cpi: f32,
    pub doppler_resolution: f32,
    pub velocity_resolution: f32,
    pub pulse_repetition_frequency: f32,
    pub range_ambiguity: f32,
    pub velocity_ambiguity: f32,
    pub integration_gain_db: f32,
    /// range error per unit of radial velocity caused by the chirp slope
    pub range_velocity_coupling: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RadarParameters {
    pub sample_rate: f32,
    pub center_frequency: f32,
    pub bandwidth: f32,
    /// index actually used, lowered if the requested bandwidth did not fit
    pub bandwidth_index: i32,
    pub pulse_length: usize,
    /// index actually used, lowered if one pulse outlasted the CPI ceiling
    pub pulse_length_index: u32,
    pub pulses_integrated: usize,
    /// upper bound on `pulses_integrated` imposed by the CPI ceiling
    pub max_pulses_integrated: usize,
    pub decimation: usize,
    pub apply_window: bool,
    pub clutter_filter: ClutterFilterMode,
    pub range_offset: bool,
    /// valid center frequencies for the current bandwidth, inclusive
    pub center_frequency_range: (f32, f32),
    pub clutter_alpha: f32,
    pub metrics: DerivedMetrics,
}

impl RadarParameters {
    /// Range cells per pulse after decimation
    pub fn n_fast(&self) -> usize {
        self.pulse_length.div_ceil(self.decimation)
    }

    pub fn n_slow(&self) -> usize {
        self.pulses_integrated
    }

    pub fn normalized_carrier(&self) -> f32 {
        self.center_frequency / self.sample_rate
    }

    /// The slow-time taper is only meaningful with a center tap to peak on.
    pub fn tapers_slow_time(&self) -> bool {
        self.apply_window && self.pulses_integrated >= 3
    }

    pub fn range_of_bin(&self, fast: usize) -> f32 {
        fast as f32 * self.metrics.range_resolution
    }

    /// Zero Doppler sits on the center row of the shifted spectrum.
    pub fn velocity_of_row(&self, slow: usize) -> f32 {
        let center = (self.pulses_integrated / 2) as f32;
        (slow as f32 - center) * self.metrics.velocity_resolution
    }
}

/// Step-aligned center frequencies keeping `fc -/+ guard*B/2` strictly
/// inside `(0, fs/2)`. `None` when no step fits.
fn center_frequency_range(bandwidth: f32, sample_rate: f32, config: &SonarConfig) -> Option<(f32, f32)> {
    let step = config.center_frequency_step;
    let half_span = config.guard_factor * bandwidth / 2.0;
    let low = ((half_span / step).floor() + 1.0) * step;
    let high = (((sample_rate / 2.0 - half_span) / step).ceil() - 1.0) * step;
    (low <= high).then_some((low, high))
}

pub fn derive(controls: &Controls, sample_rate: f32, config: &SonarConfig) -> Result<RadarParameters, ParameterError> {
    if !sample_rate.is_finite() || sample_rate <= 0.0 {
        return Err(ParameterError::InvalidSampleRate(sample_rate));
    }

    let requested_index = controls.bandwidth_index.clamp(BANDWIDTH_INDEX_MIN, BANDWIDTH_INDEX_MAX);
    let (bandwidth_index, bandwidth, fc_range) = (BANDWIDTH_INDEX_MIN..=requested_index)
        .rev()
        .find_map(|index| {
            let bandwidth = bandwidth_for_index(index);
            center_frequency_range(bandwidth, sample_rate, config).map(|range| (index, bandwidth, range))
        })
        .ok_or(ParameterError::SampleRateTooLow {
            sample_rate,
            min_bandwidth: bandwidth_for_index(BANDWIDTH_INDEX_MIN),
        })?;
    if bandwidth_index != requested_index {
        debug!("bandwidth index lowered from {requested_index} to {bandwidth_index} for fs = {sample_rate}");
    }

    let center_frequency = if controls.center_frequency.is_finite() {
        controls.center_frequency.clamp(fc_range.0, fc_range.1)
    } else {
        fc_range.0
    };
    let decimation = ((sample_rate / (bandwidth * config.guard_factor)).floor() as usize).max(1);
    // a single pulse must already fit the CPI ceiling
    let requested_pulse_index = controls.pulse_length_index.min(PULSE_LENGTH_INDEX_MAX);
    let (pulse_length_index, pulse_length) = (0..=requested_pulse_index)
        .rev()
        .map(|index| (index, pulse_length_for_index(index)))
        .find(|&(_, length)| length as f32 / sample_rate <= config.max_cpi)
        .ok_or(ParameterError::PulseExceedsCpi {
            pulse_length: pulse_length_for_index(0),
            sample_rate,
            max_cpi: config.max_cpi,
        })?;
    if pulse_length_index != requested_pulse_index {
        debug!("pulse length index lowered from {requested_pulse_index} to {pulse_length_index} for fs = {sample_rate}");
    }

    let max_pulses_integrated = ((config.max_cpi * sample_rate / pulse_length as f32).floor() as usize).max(1);
    let mut pulses_integrated = if controls.apply_window {
        controls.pulses_integrated.clamp(3.min(max_pulses_integrated), max_pulses_integrated)
    } else {
        controls.pulses_integrated.clamp(1, max_pulses_integrated)
    };
    if controls.apply_window && pulses_integrated % 2 == 0 {
        pulses_integrated -= 1;
    }

    let c = config.speed_of_sound;
    let pulse_duration = pulse_length as f32 / sample_rate;
    let wavelength = c / center_frequency;
    let cpi = pulse_duration * pulses_integrated as f32;
    let doppler_resolution = 1.0 / cpi;
    let metrics = DerivedMetrics {
        range_resolution: (c / sample_rate) * decimation as f32,
        wavelength,
        cpi,
        doppler_resolution,
        velocity_resolution: doppler_resolution * wavelength,
        pulse_repetition_frequency: sample_rate / pulse_length as f32,
        range_ambiguity: pulse_duration * c,
        velocity_ambiguity: (0.5 / pulse_duration) * wavelength,
        integration_gain_db: 10.0 * f32::log10(bandwidth * cpi),
        range_velocity_coupling: (center_frequency / bandwidth) * pulse_duration,
    };

    let clutter_alpha = (pulse_length as f32 / (sample_rate * config.clutter_time_constant)).min(1.0);

    Ok(RadarParameters {
        sample_rate,
        center_frequency,
        bandwidth,
        bandwidth_index,
        pulse_length,
        pulse_length_index,
        pulses_integrated,
        max_pulses_integrated,
        decimation,
        apply_window: controls.apply_window,
        clutter_filter: controls.clutter_filter,
        range_offset: controls.range_offset,
        center_frequency_range: fc_range,
        clutter_alpha,
        metrics,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference_controls() -> Controls {
        Controls {
            bandwidth_index: 0,
            center_frequency: 17000.0,
            pulse_length_index: 1,
            pulses_integrated: 20,
            apply_window: false,
            clutter_filter: ClutterFilterMode::None,
            range_offset: false,
        }
    }

    #[test]
    fn test_bandwidth_scale() {
        assert_eq!(bandwidth_for_index(-8), 1000.0);
        assert_eq!(bandwidth_for_index(-4), 2000.0);
        assert_eq!(bandwidth_for_index(0), 4000.0);
        assert_eq!(bandwidth_for_index(1), 4800.0);
        assert_eq!(bandwidth_for_index(8), 16000.0);
        assert_eq!(bandwidth_for_index(100), 16000.0);
        for i in BANDWIDTH_INDEX_MIN..BANDWIDTH_INDEX_MAX {
            assert!(bandwidth_for_index(i) < bandwidth_for_index(i + 1));
        }
    }

    #[test]
    fn test_reference_configuration() {
        let config = SonarConfig::default();
        let p = derive(&reference_controls(), 44100.0, &config).unwrap();
        assert_eq!(p.bandwidth, 4000.0);
        assert_eq!(p.pulse_length, 512);
        assert_eq!(p.decimation, 8);
        assert_eq!(p.n_fast(), 64);
        assert_eq!(p.n_slow(), 20);
        assert!((p.metrics.cpi - 0.2322).abs() < 1e-3);
        assert!((p.metrics.range_resolution - 0.0622).abs() < 1e-4);
        assert!((p.metrics.wavelength - 343.0 / 17000.0).abs() < 1e-6);
        assert!((p.metrics.pulse_repetition_frequency - 86.13).abs() < 0.01);
        assert!((p.metrics.range_ambiguity - 3.982).abs() < 1e-3);
        assert!((p.metrics.velocity_ambiguity - 0.8690).abs() < 1e-3);
        assert!((p.metrics.integration_gain_db - 29.68).abs() < 0.01);
        assert!((p.metrics.range_velocity_coupling - 0.04934).abs() < 1e-4);
        assert!((p.normalized_carrier() - 17000.0 / 44100.0).abs() < 1e-6);
        assert!((p.clutter_alpha - 512.0 / 4410.0).abs() < 1e-6);
    }

    #[test]
    fn test_derivation_is_idempotent() {
        let config = SonarConfig::default();
        let controls = Controls::default();
        let a = derive(&controls, 48000.0, &config).unwrap();
        let b = derive(&controls, 48000.0, &config).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_guard_band_holds_for_every_control() {
        let config = SonarConfig::default();
        for fs in [8000.0, 22050.0, 44100.0, 48000.0, 96000.0] {
            for bandwidth_index in BANDWIDTH_INDEX_MIN..=BANDWIDTH_INDEX_MAX {
                for center_frequency in [0.0, 1000.0, 17000.0, 30000.0] {
                    let controls = Controls { bandwidth_index, center_frequency, ..Controls::default() };
                    let p = derive(&controls, fs, &config).unwrap();
                    let half_span = p.bandwidth / 2.0 * 1.3;
                    assert!(p.center_frequency - half_span > 0.0);
                    assert!(p.center_frequency + half_span < fs / 2.0);
                    assert!(p.decimation >= 1);
                }
            }
        }
    }

    #[test]
    fn test_bandwidth_lowered_to_fit_sample_rate() {
        let config = SonarConfig::default();
        let controls = Controls { bandwidth_index: 8, ..Controls::default() };
        let p = derive(&controls, 8000.0, &config).unwrap();
        assert!(p.bandwidth_index < 8);
        assert!(p.bandwidth * 1.3 < 4000.0);
    }

    #[test]
    fn test_sample_rate_errors() {
        let config = SonarConfig::default();
        assert_eq!(
            derive(&Controls::default(), 0.0, &config),
            Err(ParameterError::InvalidSampleRate(0.0))
        );
        assert!(matches!(
            derive(&Controls::default(), 2000.0, &config),
            Err(ParameterError::SampleRateTooLow { .. })
        ));
    }

    const SAMPLE_RATES: [f32; 5] = [8000.0, 22050.0, 44100.0, 48000.0, 96000.0];

    #[test]
    fn test_windowed_pulse_count_is_odd() {
        let config = SonarConfig::default();
        for fs in SAMPLE_RATES {
            for pulses_integrated in 0..60 {
                for pulse_length_index in 0..=PULSE_LENGTH_INDEX_MAX {
                    let controls = Controls { pulses_integrated, pulse_length_index, apply_window: true, ..Controls::default() };
                    let p = derive(&controls, fs, &config).unwrap();
                    assert_eq!(p.pulses_integrated % 2, 1);
                    assert!(p.metrics.cpi <= config.max_cpi + 1e-6);
                }
            }
        }
    }

    #[test]
    fn test_cpi_ceiling() {
        let config = SonarConfig::default();
        let controls = Controls { pulses_integrated: 1000, apply_window: false, ..reference_controls() };
        let p = derive(&controls, 44100.0, &config).unwrap();
        assert_eq!(p.max_pulses_integrated, 34);
        assert_eq!(p.pulses_integrated, 34);

        for fs in SAMPLE_RATES {
            for pulses_integrated in [1, 1000] {
                for pulse_length_index in 0..=PULSE_LENGTH_INDEX_MAX {
                    let controls = Controls { pulses_integrated, pulse_length_index, apply_window: false, ..reference_controls() };
                    let p = derive(&controls, fs, &config).unwrap();
                    assert!(p.pulses_integrated >= 1);
                    assert!(p.pulses_integrated <= p.max_pulses_integrated);
                    assert!(p.metrics.cpi <= config.max_cpi + 1e-6);
                }
            }
        }
    }

    #[test]
    fn test_pulse_length_lowered_to_fit_cpi() {
        let config = SonarConfig::default();
        let controls = Controls { pulse_length_index: 4, pulses_integrated: 1, apply_window: false, ..reference_controls() };
        let p = derive(&controls, 8000.0, &config).unwrap();
        assert_eq!(p.pulse_length_index, 3);
        assert_eq!(p.pulse_length, 2048);
        assert!(p.metrics.cpi <= config.max_cpi);

        let tight = SonarConfig { max_cpi: 0.05, ..SonarConfig::default() };
        let p = derive(&controls, 44100.0, &tight).unwrap();
        assert_eq!(p.pulse_length, 2048);
        assert_eq!(p.n_slow(), 1);

        let too_tight = SonarConfig { max_cpi: 0.001, ..SonarConfig::default() };
        assert!(matches!(
            derive(&controls, 44100.0, &too_tight),
            Err(ParameterError::PulseExceedsCpi { pulse_length: 256, .. })
        ));
    }

    #[test]
    fn test_axis_helpers() {
        let config = SonarConfig::default();
        let controls = Controls { pulses_integrated: 21, apply_window: true, ..reference_controls() };
        let p = derive(&controls, 44100.0, &config).unwrap();
        assert_eq!(p.velocity_of_row(10), 0.0);
        assert!((p.velocity_of_row(11) - p.metrics.velocity_resolution).abs() < 1e-6);
        assert!((p.range_of_bin(2) - 2.0 * p.metrics.range_resolution).abs() < 1e-6);
    }
}
