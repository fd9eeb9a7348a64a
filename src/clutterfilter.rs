use itertools::zip_eq;
use rustfft::num_complex::{Complex32, ComplexFloat};

use crate::ClutterFilterMode;

/// Exponentially averaged range profile, `map <- (1 - alpha) * map + alpha * pulse`.
pub struct ClutterMap {
    estimate: Vec<Complex32>,
    alpha: f32,
}

impl ClutterMap {
    pub fn new(n_fast: usize, alpha: f32) -> Self {
        Self {
            estimate: vec![Complex32::ZERO; n_fast],
            alpha,
        }
    }

    pub fn update(&mut self, pulse: &[Complex32]) {
        for (x, m) in zip_eq(pulse, &mut self.estimate) {
            *m = (1.0 - self.alpha) * *m + self.alpha * *x;
        }
    }

    /// Range cell of the strongest stationary return, normally the direct
    /// speaker-to-microphone path.
    pub fn strongest_cell(&self) -> usize {
        self.estimate
            .iter()
            .enumerate()
            .fold((0, f32::NEG_INFINITY), |(best, best_abs), (n, x)| {
                let x_abs = x.abs();
                if x_abs > best_abs {
                    (n, x_abs)
                } else {
                    (best, best_abs)
                }
            })
            .0
    }
}

/// Suppresses stationary returns in a compressed pulse before Doppler processing.
pub trait ClutterFilter: Send {
    fn process_inplace(&mut self, pulse: &mut [Complex32]);
}

pub struct PassThrough;

impl ClutterFilter for PassThrough {
    fn process_inplace(&mut self, _pulse: &mut [Complex32]) {}
}

/// `y[n] = x[n] - x[n-1]` per range cell.
pub struct TwoPulseCanceller {
    previous: Vec<Complex32>,
}

impl TwoPulseCanceller {
    pub fn new(n_fast: usize) -> Self {
        Self {
            previous: vec![Complex32::ZERO; n_fast],
        }
    }
}

impl ClutterFilter for TwoPulseCanceller {
    fn process_inplace(&mut self, pulse: &mut [Complex32]) {
        for (x, prev) in zip_eq(pulse, &mut self.previous) {
            let current = *x;
            *x -= *prev;
            *prev = current;
        }
    }
}

/// Subtracts a slowly adapting clutter map from every pulse.
pub struct LeakyIntegratorFilter {
    map: ClutterMap,
}

impl LeakyIntegratorFilter {
    pub fn new(n_fast: usize, alpha: f32) -> Self {
        Self {
            map: ClutterMap::new(n_fast, alpha),
        }
    }
}

impl ClutterFilter for LeakyIntegratorFilter {
    fn process_inplace(&mut self, pulse: &mut [Complex32]) {
        self.map.update(pulse);
        for (x, m) in zip_eq(pulse, &self.map.estimate) {
            *x -= *m;
        }
    }
}

/// `RemoveZero` works on the Doppler spectrum instead, so it passes pulses through.
pub fn create_filter(mode: ClutterFilterMode, n_fast: usize, alpha: f32) -> Box<dyn ClutterFilter> {
    match mode {
        ClutterFilterMode::None | ClutterFilterMode::RemoveZero => Box::new(PassThrough),
        ClutterFilterMode::TwoPulse => Box::new(TwoPulseCanceller::new(n_fast)),
        ClutterFilterMode::Slow => Box::new(LeakyIntegratorFilter::new(n_fast, alpha)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stationary_pulse() -> Vec<Complex32> {
        vec![
            Complex32::new(0.1, 0.0),
            Complex32::new(2.0, -1.0),
            Complex32::new(0.0, 0.5),
        ]
    }

    #[test]
    fn test_two_pulse_cancels_stationary_returns() {
        let mut filter = create_filter(ClutterFilterMode::TwoPulse, 3, 0.1);
        let mut first = stationary_pulse();
        filter.process_inplace(&mut first);
        assert_eq!(first, stationary_pulse());

        let mut second = stationary_pulse();
        filter.process_inplace(&mut second);
        assert!(second.iter().all(|x| x.abs() < 1e-6));
    }

    #[test]
    fn test_leaky_integrator_converges() {
        let mut filter = create_filter(ClutterFilterMode::Slow, 3, 0.2);
        let mut residual = f32::INFINITY;
        for _ in 0..100 {
            let mut pulse = stationary_pulse();
            filter.process_inplace(&mut pulse);
            let energy: f32 = pulse.iter().map(|x| x.norm_sqr()).sum();
            assert!(energy <= residual + 1e-9);
            residual = energy;
        }
        assert!(residual < 1e-6);
    }

    #[test]
    fn test_pass_through_modes() {
        for mode in [ClutterFilterMode::None, ClutterFilterMode::RemoveZero] {
            let mut filter = create_filter(mode, 3, 0.2);
            let mut pulse = stationary_pulse();
            filter.process_inplace(&mut pulse);
            assert_eq!(pulse, stationary_pulse());
        }
    }

    #[test]
    fn test_clutter_map_tracks_strongest_cell() {
        let mut map = ClutterMap::new(3, 0.5);
        assert_eq!(map.strongest_cell(), 0);
        map.update(&stationary_pulse());
        assert_eq!(map.strongest_cell(), 1);
    }
}
