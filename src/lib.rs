use std::{fmt, str::FromStr};

use ndarray::Array2;
use realfft::RealFftPlanner;
use rustfft::{num_complex::Complex32, FftPlanner};
use serde::{Deserialize, Serialize};
use wasm_bindgen::prelude::*;

use log::{debug, error};

pub mod bridge;
pub mod chirp;
pub mod config;
pub mod controller;
pub mod correlator;
pub mod error;
pub mod logging;
pub mod mailbox;
pub mod params;
pub mod render;
pub mod simulation;
pub mod window;

#[cfg(feature = "native-audio")]
pub mod audio;

mod clutterfilter;
mod doppler_processing;
mod matchedfilter;

use clutterfilter::{create_filter, ClutterFilter, ClutterMap};
use correlator::CorrelatorInit;
use doppler_processing::{RangeDopplerProcessor, SLOW_TIME_AXIS};
use error::ParameterError;
use matchedfilter::MatchedFilter;

pub use bridge::{AudioBackend, AudioSession, BridgeState, CancelHandle, StreamingBridge};
pub use config::SonarConfig;
pub use controller::SonarController;
pub use params::{Controls, RadarParameters};
pub use render::{NormalizationPolicy, RangeDopplerRenderer};

#[wasm_bindgen]
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClutterFilterMode {
    None,
    RemoveZero,
    TwoPulse,
    Slow,
}

impl Default for ClutterFilterMode {
    fn default() -> Self {
        ClutterFilterMode::None
    }
}

impl FromStr for ClutterFilterMode {
    type Err = ParameterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(ClutterFilterMode::None),
            "two-pulse" => Ok(ClutterFilterMode::TwoPulse),
            "slow" => Ok(ClutterFilterMode::Slow),
            "remove-zero" => Ok(ClutterFilterMode::RemoveZero),
            other => Err(ParameterError::UnknownClutterFilter(other.to_string())),
        }
    }
}

impl fmt::Display for ClutterFilterMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ClutterFilterMode::None => "none",
            ClutterFilterMode::TwoPulse => "two-pulse",
            ClutterFilterMode::Slow => "slow",
            ClutterFilterMode::RemoveZero => "remove-zero",
        };
        f.write_str(name)
    }
}

/// Cuts a stream of arbitrarily sized blocks into whole pulses.
struct PulseAssembler {
    pending: Vec<f32>,
    pulse_length: usize,
}

impl PulseAssembler {
    fn new(pulse_length: usize) -> Self {
        Self {
            pending: Vec::with_capacity(pulse_length),
            pulse_length,
        }
    }

    /// Calls `on_pulse` for every pulse completed by `samples`, in order, and
    /// returns how many there were. The pulse buffer may be clobbered.
    fn push<F: FnMut(&mut [f32])>(&mut self, mut samples: &[f32], mut on_pulse: F) -> usize {
        let mut completed = 0;
        while !samples.is_empty() {
            let take = (self.pulse_length - self.pending.len()).min(samples.len());
            self.pending.extend_from_slice(&samples[..take]);
            samples = &samples[take..];
            if self.pending.len() == self.pulse_length {
                on_pulse(&mut self.pending);
                self.pending.clear();
                completed += 1;
            }
        }
        completed
    }
}

/*
    pulses ----> matched_filter -----+----> clutter_filter ----> range_doppler ----> data cube
                                     |                              ^
                                     |                              | (strongest cell)
                                     +-------> clutter_map ---------+
*/
#[wasm_bindgen]
pub struct Sonar {
    pulses: PulseAssembler,
    output: Array2<Complex32>,
    range_doppler: RangeDopplerProcessor,
    matched_filter: MatchedFilter,
    clutter_filter: Box<dyn ClutterFilter>,
    clutter_map: ClutterMap,

    /// if true, fast time axis is circularly shifted to position the direct path at 0
    track_offset: bool,
    remove_zero: bool,
}

#[wasm_bindgen]
impl Sonar {
    /// Rejects an empty impulse or slow-time window, which leave no pulse to
    /// assemble or no Doppler bin to fill.
    pub fn new(
        impulse: &[f32],
        normalized_f_carrier: f32,
        decimation: usize,
        slow_time_window: &[f32],
        clutter_alpha: f32,
        filter_option: ClutterFilterMode,
        track_offset: bool,
    ) -> Result<Sonar, String> {
        logging::init();

        if impulse.is_empty() || slow_time_window.is_empty() {
            let message = format!(
                "impulse ({} samples) and slow-time window ({} taps) must not be empty",
                impulse.len(),
                slow_time_window.len()
            );
            error!("{message}");
            return Err(message);
        }
        Ok(Self::build(
            impulse,
            normalized_f_carrier,
            decimation,
            slow_time_window,
            clutter_alpha,
            filter_option,
            track_offset,
        ))
    }

    /// Feeds one block of microphone samples; returns true if it completed at
    /// least one pulse.
    pub fn handle_input(&mut self, samples: &[f32]) -> bool {
        let Self {
            pulses,
            range_doppler,
            matched_filter,
            clutter_filter,
            clutter_map,
            track_offset,
            ..
        } = self;

        let completed = pulses.push(samples, |pulse| {
            let compressed = range_doppler.pulse_slot();
            matched_filter.compress(pulse, compressed);
            clutter_map.update(compressed);
            clutter_filter.process_inplace(compressed);
            range_doppler.commit_pulse();

            if *track_offset {
                range_doppler.set_fast_time_shift(clutter_map.strongest_cell());
            }
        });
        completed > 0
    }

    pub fn get_data_cube(&mut self) -> Vec<f32> {
        let mut cube = Vec::with_capacity(self.output.len());
        self.data_cube_into(&mut cube);
        cube
    }

    pub fn n_fast(&self) -> usize {
        self.range_doppler.n_fast()
    }

    pub fn n_slow(&self) -> usize {
        self.range_doppler.n_slow()
    }
}

impl Sonar {
    fn build(
        impulse: &[f32],
        normalized_f_carrier: f32,
        decimation: usize,
        slow_time_window: &[f32],
        clutter_alpha: f32,
        filter_option: ClutterFilterMode,
        track_offset: bool,
    ) -> Self {
        let mut real_planner = RealFftPlanner::new();
        let mut complex_planner = FftPlanner::new();

        let decimation = decimation.max(1);
        let n_slow = slow_time_window.len();
        let n_fast = impulse.len().div_ceil(decimation);
        debug!("correlator: {n_fast} range cells x {n_slow} pulses, clutter filter {filter_option}");

        Sonar {
            pulses: PulseAssembler::new(impulse.len()),
            output: Array2::zeros((n_slow, n_fast)),
            range_doppler: RangeDopplerProcessor::new(slow_time_window, n_fast, &mut complex_planner),
            matched_filter: MatchedFilter::new(
                impulse,
                normalized_f_carrier,
                decimation,
                &mut complex_planner,
                &mut real_planner,
            ),
            clutter_filter: create_filter(filter_option, n_fast, clutter_alpha),
            clutter_map: ClutterMap::new(n_fast, clutter_alpha),
            remove_zero: filter_option == ClutterFilterMode::RemoveZero,
            track_offset,
        }
    }

    pub fn from_init(init: &CorrelatorInit) -> Self {
        Self::build(
            &init.waveform,
            init.normalized_carrier,
            init.decimation,
            &init.slow_time_window,
            init.clutter_alpha,
            init.clutter_filter,
            init.range_offset,
        )
    }

    /// Magnitude of the range-Doppler map, written without reallocating once
    /// `output` has grown to the cube size.
    pub fn data_cube_into(&mut self, output: &mut Vec<f32>) {
        self.range_doppler.range_doppler(&mut self.output);

        if self.remove_zero {
            let zero_doppler = self.range_doppler.n_slow() / 2;
            self.output
                .index_axis_mut(SLOW_TIME_AXIS, zero_doppler)
                .fill(Complex32::ZERO);
        }
        output.clear();
        output.extend(self.output.iter().map(|x| x.norm()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::SonarConfig, params};

    #[test]
    fn test_pulse_assembler() {
        let mut assembler = PulseAssembler::new(512);
        let chunk1: Vec<f32> = (0..128).map(|x| (x * 10 + 1) as f32).collect();
        let chunk2: Vec<f32> = (0..128).map(|x| (x * 10 + 2) as f32).collect();
        let chunk3: Vec<f32> = (0..(256 + 10)).map(|x| (x * 10 + 3) as f32).collect();
        let chunk4: Vec<f32> = (0..128).map(|x| (x * 10 + 4) as f32).collect();
        let chunk5: Vec<f32> = (0..128 * 3).map(|x| (x * 10 + 5) as f32).collect();

        let mut pulses: Vec<Vec<f32>> = Vec::new();
        let mut push = |assembler: &mut PulseAssembler, chunk: &[f32]| {
            assembler.push(chunk, |pulse| pulses.push(pulse.to_vec()))
        };
        assert_eq!(push(&mut assembler, &chunk1), 0);
        assert_eq!(push(&mut assembler, &chunk2), 0);
        assert_eq!(push(&mut assembler, &chunk3), 1);
        assert_eq!(assembler.pending.len(), 10);
        assert_eq!(push(&mut assembler, &chunk4), 0);
        assert_eq!(push(&mut assembler, &chunk5), 1);
        assert_eq!(assembler.pending.len(), 10);

        assert_eq!(pulses.len(), 2);
        assert_eq!(pulses[0][0..128], chunk1);
        assert_eq!(pulses[0][128..256], chunk2);
        assert_eq!(pulses[0][256..512], chunk3[0..256]);
        assert_eq!(pulses[1][0..10], chunk3[256..256 + 10]);
        assert_eq!(pulses[1][10..128 + 10], chunk4);
        assert_eq!(pulses[1][128 + 10..512], chunk5[0..128 * 3 - 10]);
    }

    #[test]
    fn test_pulse_assembler_large_block() {
        let mut assembler = PulseAssembler::new(256);
        let block = vec![1.0; 256 * 3 + 5];
        assert_eq!(assembler.push(&block, |pulse| assert_eq!(pulse.len(), 256)), 3);
        assert_eq!(assembler.pending.len(), 5);
        assert_eq!(assembler.pending.capacity(), 256);
    }

    #[test]
    fn test_empty_impulse_or_window_rejected() {
        let window = [0.5, 1.0, 0.5];
        assert!(Sonar::new(&[], 0.3, 8, &window, 0.1, ClutterFilterMode::None, true).is_err());
        assert!(Sonar::new(&[0.0; 64], 0.3, 8, &[], 0.1, ClutterFilterMode::None, true).is_err());

        let mut sonar = Sonar::new(&[0.0; 64], 0.3, 0, &window, 0.1, ClutterFilterMode::Slow, true).unwrap();
        assert_eq!((sonar.n_fast(), sonar.n_slow()), (64, 3));
        assert!(sonar.handle_input(&[0.25; 64]));
        assert_eq!(sonar.get_data_cube().len(), 64 * 3);
    }

    #[test]
    fn test_clutter_filter_names() {
        for mode in [
            ClutterFilterMode::None,
            ClutterFilterMode::TwoPulse,
            ClutterFilterMode::Slow,
            ClutterFilterMode::RemoveZero,
        ] {
            assert_eq!(mode.to_string().parse::<ClutterFilterMode>(), Ok(mode));
        }
        assert_eq!(
            "three-pulse".parse::<ClutterFilterMode>(),
            Err(ParameterError::UnknownClutterFilter("three-pulse".into()))
        );
    }

    /// Correlator fed with `pulses` periods of the chirp as heard over the
    /// given (delay, gain) paths.
    fn run_correlator(controls: params::Controls, paths: &[(usize, f32)], pulses: usize) -> (Vec<f32>, usize, usize) {
        let p = params::derive(&controls, 44100.0, &SonarConfig::default()).unwrap();
        let init = CorrelatorInit::from_parameters(&p).unwrap();
        let mut sonar = Sonar::from_init(&init);
        let chirp = &init.waveform;
        let n = chirp.len();
        let heard: Vec<f32> = (0..n * pulses)
            .map(|t| paths.iter().map(|&(delay, gain)| gain * chirp[(t + n - delay) % n]).sum::<f32>())
            .collect();
        for block in heard.chunks(128) {
            sonar.handle_input(block);
        }
        (sonar.get_data_cube(), sonar.n_fast(), sonar.n_slow())
    }

    fn strongest(cube: &[f32], n_fast: usize) -> (usize, usize) {
        let i = cube
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();
        (i / n_fast, i % n_fast)
    }

    fn reference_controls() -> params::Controls {
        params::Controls {
            pulses_integrated: 9,
            apply_window: true,
            ..params::Controls::default()
        }
    }

    #[test]
    fn test_stationary_echo_in_range_doppler_map() {
        let (cube, n_fast, n_slow) = run_correlator(reference_controls(), &[(40, 0.5)], 12);
        assert_eq!((n_fast, n_slow), (64, 9));
        assert_eq!(cube.len(), 64 * 9);
        assert_eq!(strongest(&cube, n_fast), (4, 5));
    }

    #[test]
    fn test_remove_zero_blanks_zero_doppler() {
        let controls = params::Controls {
            clutter_filter: ClutterFilterMode::RemoveZero,
            ..reference_controls()
        };
        let (cube, n_fast, _) = run_correlator(controls, &[(40, 0.5)], 12);
        assert!(cube[4 * n_fast..5 * n_fast].iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_range_offset_moves_direct_path_to_zero() {
        let controls = params::Controls {
            range_offset: true,
            ..reference_controls()
        };
        // direct path in cell 2, echo in cell 25
        let (cube, n_fast, _) = run_correlator(controls, &[(16, 1.0), (200, 0.3)], 12);
        assert_eq!(strongest(&cube, n_fast), (4, 0));
        let zero_doppler = &cube[4 * n_fast..5 * n_fast];
        assert!(zero_doppler[23] > zero_doppler[22] && zero_doppler[23] > zero_doppler[24]);
    }

    #[test]
    fn test_two_pulse_canceller_suppresses_stationary_echo() {
        let controls = params::Controls {
            clutter_filter: ClutterFilterMode::TwoPulse,
            ..reference_controls()
        };
        let (filtered, _, _) = run_correlator(controls, &[(40, 0.5)], 12);
        let (unfiltered, _, _) = run_correlator(reference_controls(), &[(40, 0.5)], 12);
        let peak = |cube: &[f32]| cube.iter().copied().fold(0.0f32, f32::max);
        assert!(peak(&filtered) < 1e-3 * peak(&unfiltered));
    }
}
