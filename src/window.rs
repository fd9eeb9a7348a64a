use std::f32::consts::PI;

use crate::error::WindowError;

/// Periodic Hann taper, `w[i] = 0.5 * (1 - cos(2*pi*i/n))`.
///
/// This is the form the transmitted chirp is shaped with: the pulse is played
/// back in a loop, so the taper repeats with period `n`. A single tap would be
/// zero, which is rejected; single-pulse processing uses [`rect`].
pub fn hann(n: usize) -> Result<Vec<f32>, WindowError> {
    match n {
        0 => Err(WindowError::EmptyWindow),
        1 => Err(WindowError::DegenerateHann),
        _ => Ok((0..n)
            .map(|i| 0.5 * (1.0 - f32::cos(2.0 * PI * (i as f32) / (n as f32))))
            .collect()),
    }
}

/// Symmetric Hann taper with zero end points, `w[i] = 0.5 * (1 - cos(2*pi*i/(n-1)))`.
///
/// For odd `n` the center tap `(n-1)/2` is exactly 1. Used across slow time.
pub fn hann_symmetric(n: usize) -> Result<Vec<f32>, WindowError> {
    match n {
        0 => Err(WindowError::EmptyWindow),
        1 => Err(WindowError::DegenerateHann),
        _ => {
            let span = (n - 1) as f32;
            Ok((0..n)
                .map(|i| 0.5 * (1.0 - f32::cos(2.0 * PI * (i as f32) / span)))
                .collect())
        }
    }
}

pub fn rect(n: usize) -> Result<Vec<f32>, WindowError> {
    if n == 0 {
        return Err(WindowError::EmptyWindow);
    }
    Ok(vec![1.0; n])
}
