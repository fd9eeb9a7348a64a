use std::{iter::zip, sync::Arc};

use itertools::zip_eq;
use ndarray::{Array2, Axis};
use rustfft::{num_complex::Complex32, Fft, FftPlanner};

pub const SLOW_TIME_AXIS: Axis = Axis(0);
pub const FAST_TIME_AXIS: Axis = Axis(1);

/// Writes `input` with its two halves swapped so that the zero-frequency bin
/// lands on index `n / 2`.
#[inline]
fn fftshift_into<'a, A: 'a + Copy, I: IntoIterator<Item = &'a mut A>>(input: &[A], output: I) {
    let mut output = output.into_iter();
    let split = input.len().div_ceil(2);
    for (x, out) in zip(&input[split..], &mut output) {
        *out = *x;
    }
    for (x, out) in zip_eq(&input[..split], &mut output) {
        *out = *x;
    }
}

/// Ring of the last `n_slow` compressed pulses, turned into a range-Doppler
/// map on demand by a tapered FFT along slow time.
pub struct RangeDopplerProcessor {
    next_pulse: usize,
    fast_time_shift: usize,
    /// `(n_slow, n_fast)`; row `next_pulse` holds the oldest pulse
    pulses: Array2<Complex32>,
    slow_time_window: Vec<f32>,
    fft_buffer: Vec<Complex32>,
    fft_scratch: Vec<Complex32>,
    slow_time_fft: Arc<dyn Fft<f32>>,
}

impl RangeDopplerProcessor {
    pub fn new(slow_time_window: &[f32], n_fast: usize, fft_planner: &mut FftPlanner<f32>) -> Self {
        let n_slow = slow_time_window.len();
        let slow_time_fft = fft_planner.plan_fft_forward(n_slow);
        Self {
            next_pulse: 0,
            fast_time_shift: 0,
            pulses: Array2::zeros((n_slow, n_fast)),
            slow_time_window: slow_time_window.to_vec(),
            fft_buffer: vec![Complex32::ZERO; n_slow],
            fft_scratch: vec![Complex32::ZERO; slow_time_fft.get_inplace_scratch_len()],
            slow_time_fft,
        }
    }

    pub fn n_slow(&self) -> usize {
        self.pulses.len_of(SLOW_TIME_AXIS)
    }

    pub fn n_fast(&self) -> usize {
        self.pulses.len_of(FAST_TIME_AXIS)
    }

    /// Row the next compressed pulse is written into, overwriting the oldest.
    pub fn pulse_slot(&mut self) -> &mut [Complex32] {
        self.pulses
            .index_axis_mut(SLOW_TIME_AXIS, self.next_pulse)
            .into_slice()
            .expect("rows of a standard layout array are contiguous")
    }

    pub fn commit_pulse(&mut self) {
        self.next_pulse = (self.next_pulse + 1) % self.n_slow();
    }

    /// Rotates the fast-time axis so that range cell `shift` appears first.
    pub fn set_fast_time_shift(&mut self, shift: usize) {
        self.fast_time_shift = shift % self.n_fast();
    }

    /// Fills `output` (`(n_slow, n_fast)`) with the Doppler spectrum of every
    /// range cell, zero Doppler on row `n_slow / 2`.
    pub fn range_doppler(&mut self, output: &mut Array2<Complex32>) {
        let n_slow = self.n_slow();
        let n_fast = self.n_fast();
        let Self {
            next_pulse,
            fast_time_shift,
            pulses,
            slow_time_window,
            fft_buffer,
            fft_scratch,
            slow_time_fft,
        } = self;

        for (cell, history) in pulses.axis_iter(FAST_TIME_AXIS).enumerate() {
            // oldest pulse first, so the taper is aligned with time
            for (k, (dst, w)) in zip_eq(fft_buffer.iter_mut(), slow_time_window.iter()).enumerate() {
                *dst = history[(*next_pulse + k) % n_slow] * *w;
            }
            slow_time_fft.process_with_scratch(fft_buffer, fft_scratch);

            let column = (cell + n_fast - *fast_time_shift) % n_fast;
            fftshift_into(fft_buffer.as_slice(), output.index_axis_mut(FAST_TIME_AXIS, column));
        }
    }
}
