//! Range-Doppler image rendering.
//!
//! The image is `n_fast` pixels wide and `n_slow` pixels high, RGBA, with data
//! cube cell `i` on pixel `i`. Intensity goes to the red channel.

use log::{error, info};
use serde::{Deserialize, Serialize};
use wasm_bindgen::prelude::*;

/// How cell values are scaled to the 8-bit intensity range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormalizationPolicy {
    /// Every frame is scaled by its own maximum: best contrast, no
    /// comparability between frames.
    PerFrame,
    /// Frames are scaled by a reference that follows new maxima at once and
    /// otherwise decays by `decay` per frame.
    DecayingPeak { decay: f32 },
}

const RED: usize = 0;
const ALPHA: usize = 3;

#[wasm_bindgen]
pub struct RangeDopplerRenderer {
    n_fast: usize,
    n_slow: usize,
    pixels: Vec<u8>,
    policy: NormalizationPolicy,
    reference: f32,
}

#[wasm_bindgen]
impl RangeDopplerRenderer {
    #[wasm_bindgen(constructor)]
    pub fn new() -> Self {
        Self::with_policy(NormalizationPolicy::PerFrame)
    }

    /// Reallocates the image; drawing before the first call is a no-op.
    pub fn set_dimensions(&mut self, n_fast: usize, n_slow: usize) {
        if (n_fast, n_slow) == (self.n_fast, self.n_slow) {
            return;
        }
        info!("range-Doppler display resized to {n_fast}x{n_slow}");
        self.n_fast = n_fast;
        self.n_slow = n_slow;
        self.pixels = vec![0; n_fast * n_slow * 4];
        self.reference = 0.0;
    }

    /// Draws a frame and returns its maximum, or `None` if the frame does not
    /// match the current dimensions (the image is left untouched).
    pub fn draw(&mut self, frame: &[f32]) -> Option<f32> {
        let cells = self.n_fast * self.n_slow;
        if cells == 0 || frame.len() != cells {
            error!(
                "length of the frame ({}) doesn't match required dimensions {}x{} = {}",
                frame.len(),
                self.n_fast,
                self.n_slow,
                cells
            );
            return None;
        }

        let max = frame.iter().copied().fold(0.0f32, f32::max);
        let scale = match self.policy {
            NormalizationPolicy::PerFrame => max,
            NormalizationPolicy::DecayingPeak { decay } => {
                self.reference = max.max(self.reference * (1.0 - decay));
                self.reference
            }
        };

        for (pixel, &value) in self.pixels.chunks_exact_mut(4).zip(frame) {
            pixel[RED] = if scale > 0.0 {
                (255.0 * (value / scale).clamp(0.0, 1.0)).round() as u8
            } else {
                0
            };
            pixel[ALPHA] = 255;
        }
        Some(max)
    }

    pub fn width(&self) -> usize {
        self.n_fast
    }

    pub fn height(&self) -> usize {
        self.n_slow
    }

    /// Copy of the RGBA buffer for `ImageData`.
    pub fn image(&self) -> Vec<u8> {
        self.pixels.clone()
    }
}

impl Default for RangeDopplerRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl RangeDopplerRenderer {
    pub fn with_policy(policy: NormalizationPolicy) -> Self {
        Self {
            n_fast: 0,
            n_slow: 0,
            pixels: Vec::new(),
            policy,
            reference: 0.0,
        }
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn intensity(&self, fast: usize, slow: usize) -> u8 {
        self.pixels[(slow * self.n_fast + fast) * 4 + RED]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silent_frame_is_dark() {
        let mut renderer = RangeDopplerRenderer::new();
        renderer.set_dimensions(4, 3);
        assert_eq!(renderer.draw(&[0.0; 12]), Some(0.0));
        for pixel in renderer.pixels().chunks_exact(4) {
            assert_eq!(pixel[RED], 0);
            assert_eq!(pixel[ALPHA], 255);
        }
    }

    #[test]
    fn test_per_frame_scaling() {
        let mut renderer = RangeDopplerRenderer::new();
        renderer.set_dimensions(4, 2);
        let mut frame = [1.0; 8];
        frame[5] = 4.0;
        frame[2] = 2.0;
        assert_eq!(renderer.draw(&frame), Some(4.0));
        assert_eq!(renderer.intensity(1, 1), 255);
        assert_eq!(renderer.intensity(2, 0), 128);
        assert_eq!(renderer.intensity(0, 0), 64);
        assert_eq!(renderer.width(), 4);
        assert_eq!(renderer.height(), 2);
    }

    #[test]
    fn test_malformed_frame_is_dropped() {
        let mut renderer = RangeDopplerRenderer::new();
        renderer.set_dimensions(2, 2);
        renderer.draw(&[1.0, 0.0, 0.0, 0.0]).unwrap();
        let before = renderer.image();
        assert_eq!(renderer.draw(&[1.0; 5]), None);
        assert_eq!(renderer.image(), before);
        assert_eq!(renderer.pixels().len(), 16);
    }

    #[test]
    fn test_draw_before_dimensions() {
        let mut renderer = RangeDopplerRenderer::new();
        assert_eq!(renderer.draw(&[]), None);
        assert!(renderer.pixels().is_empty());
    }

    #[test]
    fn test_decaying_peak_keeps_frames_comparable() {
        let mut renderer = RangeDopplerRenderer::with_policy(NormalizationPolicy::DecayingPeak { decay: 0.5 });
        renderer.set_dimensions(2, 1);
        renderer.draw(&[8.0, 0.0]).unwrap();
        assert_eq!(renderer.intensity(0, 0), 255);

        // reference decayed to 4.0, a quieter frame is not stretched to full scale
        assert_eq!(renderer.draw(&[2.0, 0.0]), Some(2.0));
        assert_eq!(renderer.intensity(0, 0), 128);

        // a louder frame resets the reference
        renderer.draw(&[0.0, 10.0]).unwrap();
        assert_eq!(renderer.intensity(1, 0), 255);
    }
}
