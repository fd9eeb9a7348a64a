use itertools::zip_eq;
use log::error;
use realfft::{RealFftPlanner, RealToComplex};
use rustfft::{num_complex::Complex32, Fft, FftPlanner};
use std::{f32::consts::PI, sync::Arc};

/// Pulse compression by circular cross-correlation with the transmitted chirp.
///
/// Only the positive half of the spectrum is kept before the inverse
/// transform, so the correlation comes out analytic; it is then mixed down by
/// the carrier and decimated to one sample per range cell.
pub struct MatchedFilter {
    decimation: usize,
    reference_spectrum: Vec<Complex32>,
    forward: Arc<dyn RealToComplex<f32>>,
    inverse: Arc<dyn Fft<f32>>,
    spectrum: Vec<Complex32>,
    scratch: Vec<Complex32>,
    /// `exp(-j*2*pi*f*n)` at the decimated sample positions only
    downmix: Vec<Complex32>,
}

impl MatchedFilter {
    pub fn new(
        reference: &[f32],
        normalized_carrier: f32,
        decimation: usize,
        complex_planner: &mut FftPlanner<f32>,
        real_planner: &mut RealFftPlanner<f32>,
    ) -> Self {
        let pulse_length = reference.len();
        let forward = real_planner.plan_fft_forward(pulse_length);
        let inverse = complex_planner.plan_fft_inverse(pulse_length);

        let scratch_len = inverse
            .get_inplace_scratch_len()
            .max(forward.get_scratch_len());
        let mut scratch = vec![Complex32::ZERO; scratch_len];

        let mut reference_spectrum = forward.make_output_vec();
        let mut reference_copy = reference.to_vec();
        if let Err(e) = forward.process_with_scratch(
            &mut reference_copy,
            &mut reference_spectrum,
            &mut scratch[..forward.get_scratch_len()],
        ) {
            error!("reference spectrum: {e}");
        }
        for bin in reference_spectrum.iter_mut() {
            *bin = bin.conj();
        }

        let downmix = (0..pulse_length)
            .step_by(decimation)
            .map(|n| Complex32::cis(-2.0 * PI * (n as f32) * normalized_carrier))
            .collect();

        Self {
            decimation,
            reference_spectrum,
            spectrum: vec![Complex32::ZERO; pulse_length],
            scratch,
            forward,
            inverse,
            downmix,
        }
    }

    /// Range cells produced per pulse
    pub fn output_length(&self) -> usize {
        self.downmix.len()
    }

    /// Compresses one pulse worth of samples into `output`. `pulse` is used as
    /// scratch space and left in an unspecified state.
    pub fn compress(&mut self, pulse: &mut [f32], output: &mut [Complex32]) {
        let half = self.forward.complex_len();
        self.spectrum.fill(Complex32::ZERO);
        if let Err(e) = self.forward.process_with_scratch(
            pulse,
            &mut self.spectrum[..half],
            &mut self.scratch[..self.forward.get_scratch_len()],
        ) {
            error!("pulse compression: {e}");
            output.fill(Complex32::ZERO);
            return;
        }

        for (bin, reference) in zip_eq(&mut self.spectrum[..half], &self.reference_spectrum) {
            *bin *= *reference;
        }

        let inplace_scratch = self.inverse.get_inplace_scratch_len();
        self.inverse
            .process_with_scratch(&mut self.spectrum, &mut self.scratch[..inplace_scratch]);

        let correlation = self.spectrum.iter().step_by(self.decimation);
        for ((out, x), mix) in zip_eq(zip_eq(output.iter_mut(), correlation), &self.downmix) {
            *out = x * mix;
        }
    }
}
