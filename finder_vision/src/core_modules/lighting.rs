// THEORY:
// The `LightingAdapter` is the matcher's slow-moving memory of scene illumination.
// Cameras drift: dusk, a lamp switching on, auto-exposure. A fingerprint captured
// in daylight should still match the same subject under warmer or dimmer light.
//
// It learns a per-channel offset between the fingerprint's average color and the
// frame's average color with an exponential moving average, so a single odd frame
// barely moves it while a sustained change is absorbed within a few dozen frames.
// The offset is then added to every pixel of a working copy of the frame before any
// comparison runs. The caller's buffer is never written.

use crate::core_modules::extractors::average_color_sampled;
use crate::core_modules::frame::{Frame, FrameView};
use crate::core_modules::pixel::pixel::{CHANNELS, Rgb, clamp_channel};

/// Weight of the newest observation in the moving average.
pub const LIGHTING_SMOOTHING: f64 = 0.1;
/// Every `LIGHTING_SAMPLE_STRIDE`-th pixel feeds the frame average.
pub const LIGHTING_SAMPLE_STRIDE: usize = 4;

/// Smoothed RGB offset from observed frames toward the fingerprint's lighting.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LightingAdapter {
    offset: [f64; 3],
}

impl LightingAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn offset(&self) -> [f64; 3] {
        self.offset
    }

    pub fn reset(&mut self) {
        self.offset = [0.0; 3];
    }

    /// Folds one frame's lighting into the running offset.
    pub fn update(&mut self, target: &Rgb, frame: &FrameView<'_>) {
        let observed = average_color_sampled(frame, LIGHTING_SAMPLE_STRIDE).channels_f64();
        let target = target.channels_f64();
        for channel in 0..3 {
            let delta = target[channel] - observed[channel];
            self.offset[channel] += LIGHTING_SMOOTHING * (delta - self.offset[channel]);
        }
    }

    /// An owned copy of `frame` with the offset added to every color channel.
    pub fn apply(&self, frame: &FrameView<'_>) -> Frame {
        let mut adjusted = frame.to_frame();
        if self.offset.iter().all(|o| o.abs() < f64::EPSILON) {
            return adjusted;
        }
        for pixel in adjusted.data_mut().chunks_exact_mut(CHANNELS) {
            for (channel, offset) in self.offset.iter().enumerate() {
                pixel[channel] = clamp_channel(pixel[channel] as f64 + offset);
            }
        }
        adjusted
    }
}
