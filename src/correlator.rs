//! Boundary between the audio capture path and the correlator.
//!
//! A correlator is built from exactly one [`CorrelatorInit`] message, so no
//! sample block can reach it before it is configured. Afterwards it only sees
//! sample blocks, in arrival order, and is asked for data cube snapshots.

use std::sync::Arc;

use crate::{chirp, chirp::Waveform, error::WindowError, params::RadarParameters, window, ClutterFilterMode, Sonar};

#[derive(Debug, Clone, PartialEq)]
pub struct CorrelatorInit {
    pub waveform: Waveform,
    /// `fc / sample_rate`, in `(0, 0.5)`
    pub normalized_carrier: f32,
    pub decimation: usize,
    pub slow_time_window: Arc<[f32]>,
    /// in `(0, 1]`
    pub clutter_alpha: f32,
    pub clutter_filter: ClutterFilterMode,
    pub range_offset: bool,
}

impl CorrelatorInit {
    /// Synthesizes the chirp and the slow-time taper for a parameter set.
    pub fn from_parameters(params: &RadarParameters) -> Result<Self, WindowError> {
        let waveform = chirp::synthesize(params.sample_rate, params.pulse_length, params.center_frequency, params.bandwidth)?;
        let slow_time_window = if params.tapers_slow_time() {
            window::hann_symmetric(params.n_slow())?
        } else {
            window::rect(params.n_slow())?
        };
        Ok(Self {
            waveform,
            normalized_carrier: params.normalized_carrier(),
            decimation: params.decimation,
            slow_time_window: slow_time_window.into(),
            clutter_alpha: params.clutter_alpha,
            clutter_filter: params.clutter_filter,
            range_offset: params.range_offset,
        })
    }

    pub fn n_fast(&self) -> usize {
        self.waveform.len().div_ceil(self.decimation)
    }

    pub fn n_slow(&self) -> usize {
        self.slow_time_window.len()
    }
}

/// A running correlator. Calls come from the real-time audio thread and must
/// not block.
pub trait Correlator: Send {
    fn push_block(&mut self, samples: &[f32]);

    /// Replaces the contents of `output` with the current `n_fast * n_slow`
    /// data cube, slow-time major.
    fn write_data_cube(&mut self, output: &mut Vec<f32>);

    fn n_fast(&self) -> usize;

    fn n_slow(&self) -> usize;
}

pub trait CorrelatorFactory: Send + Sync {
    fn create(&self, init: &CorrelatorInit) -> Box<dyn Correlator>;
}

/// Builds the in-crate [`Sonar`] correlator.
#[derive(Debug, Default, Clone, Copy)]
pub struct SonarFactory;

impl CorrelatorFactory for SonarFactory {
    fn create(&self, init: &CorrelatorInit) -> Box<dyn Correlator> {
        Box::new(Sonar::from_init(init))
    }
}

impl Correlator for Sonar {
    fn push_block(&mut self, samples: &[f32]) {
        self.handle_input(samples);
    }

    fn write_data_cube(&mut self, output: &mut Vec<f32>) {
        self.data_cube_into(output);
    }

    fn n_fast(&self) -> usize {
        Sonar::n_fast(self)
    }

    fn n_slow(&self) -> usize {
        Sonar::n_slow(self)
    }
}
