use std::{f32::consts::PI, ops::Deref, sync::Arc};

use crate::{error::WindowError, window};

/// One period of the transmitted pulse, shared read-only between playback and
/// the correlator.
#[derive(Clone, Debug, PartialEq)]
pub struct Waveform(Arc<[f32]>);

impl Waveform {
    pub fn samples(&self) -> &[f32] {
        &self.0
    }
}

impl Deref for Waveform {
    type Target = [f32];

    fn deref(&self) -> &[f32] {
        &self.0
    }
}

impl From<Vec<f32>> for Waveform {
    fn from(samples: Vec<f32>) -> Self {
        Self(samples.into())
    }
}

/// LFM chirp sweeping `fc - bandwidth/2 .. fc + bandwidth/2` over `pulse_length`
/// samples, Hann tapered.
///
/// The phase argument of the logarithm stays positive only while the lower
/// sweep edge is above DC; [`crate::params::derive`] keeps it there.
pub fn synthesize(
    sample_rate: f32,
    pulse_length: usize,
    fc: f32,
    bandwidth: f32,
) -> Result<Waveform, WindowError> {
    let taper = window::hann(pulse_length)?;
    let f0 = fc - bandwidth / 2.0;
    let f1 = fc + bandwidth / 2.0;
    let duration = pulse_length as f32 / sample_rate;
    debug_assert!(bandwidth > 0.0 && f0 > 0.0, "chirp sweep must stay above DC");

    let sweep = (2.0 * PI * (-f0 * f1 * duration)) / bandwidth;
    let samples = taper
        .iter()
        .enumerate()
        .map(|(i, win)| {
            let phase = sweep * f32::ln(1.0 - (bandwidth / (f1 * duration)) * (i as f32 / sample_rate));
            f32::sin(phase) * win
        })
        .collect::<Vec<_>>();
    Ok(samples.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chirp_is_finite_and_bounded() {
        for &(fs, n, fc, bw) in &[
            (44100.0, 512, 17000.0, 4000.0),
            (48000.0, 256, 3000.0, 1000.0),
            (48000.0, 4096, 12000.0, 16000.0),
            (44100.0, 2048, 19000.0, 2000.0),
        ] {
            let chirp = synthesize(fs, n, fc, bw).unwrap();
            assert_eq!(chirp.len(), n);
            assert!(chirp.iter().all(|x| x.is_finite() && x.abs() <= 1.0));
        }
    }

    #[test]
    fn test_chirp_starts_silent() {
        let chirp = synthesize(44100.0, 512, 17000.0, 4000.0).unwrap();
        assert_eq!(chirp[0], 0.0);
        let energy: f32 = chirp.iter().map(|x| x * x).sum();
        assert!(energy > 50.0);
    }

    #[test]
    fn test_chirp_sweeps_upwards() {
        // count zero crossings in the first and last quarter of an untapered
        // region: the upper edge of the sweep crosses zero more often
        let chirp = synthesize(48000.0, 4096, 8000.0, 8000.0).unwrap();
        let crossings = |s: &[f32]| s.windows(2).filter(|w| w[0].signum() != w[1].signum()).count();
        let early = crossings(&chirp[512..1024]);
        let late = crossings(&chirp[3072..3584]);
        assert!(late > early, "early {early}, late {late}");
    }

    #[test]
    fn test_single_sample_pulse_rejected() {
        assert_eq!(synthesize(44100.0, 1, 17000.0, 4000.0), Err(WindowError::DegenerateHann));
    }
}
