// THEORY (Single-Pixel Color Primitives):
// The `Pixel` module is the most fundamental unit of the fingerprinting engine. It
// holds the raw RGBA data of one pixel and the color value types (`Rgb`, `Hsl`)
// that every higher layer speaks in. Everything here is computed from a single
// color alone; anything that needs a second color (distances, brightness
// normalization toward a target) lives in `SmartPixel`.
//
// What lives here:
// - `Pixel`: raw RGBA bytes straight out of a frame buffer, plus the validity rule
//   shared by every extractor (alpha below 128 is treated as transparent).
// - `Rgb`: the serializable three-channel value used for averages, histogram
//   bucket representatives and k-means centroids.
// - `Hsl`: hue in degrees [0, 360), saturation and lightness as percentages.
//
// Key principles:
// 1) Single-pixel scope: nothing here reads neighbors or history.
// 2) Value types are `Copy`; the hot extraction loops never allocate per pixel.

pub mod pixel {
    use serde::{Deserialize, Serialize};

    pub type Channel = u8;
    pub type Hue = f64;
    pub type Saturation = f64;
    pub type Lightness = f64;

    /// Number of bytes per pixel in every buffer this crate consumes.
    pub const CHANNELS: usize = 4;

    /// Pixels with alpha below this value are excluded from all statistics.
    pub const MIN_VALID_ALPHA: Channel = 128;

    /// The neutral color returned when a region holds no valid pixels.
    pub const NEUTRAL_GRAY: Rgb = Rgb { r: 128, g: 128, b: 128 };

    /// A "dumb" data container representing a single RGBA pixel.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Pixel {
        /// The red channel value (0-255).
        pub red: Channel,
        /// The green channel value (0-255).
        pub green: Channel,
        /// The blue channel value (0-255).
        pub blue: Channel,
        /// The alpha (transparency) channel value (0-255).
        pub alpha: Channel,
    }

    impl Pixel {
        pub fn new(red: Channel, green: Channel, blue: Channel, alpha: Channel) -> Self {
            Self { red, green, blue, alpha }
        }

        /// Whether this pixel takes part in color statistics.
        #[inline]
        pub fn is_valid(&self) -> bool {
            self.alpha >= MIN_VALID_ALPHA
        }

        #[inline]
        pub fn rgb(&self) -> Rgb {
            Rgb::new(self.red, self.green, self.blue)
        }

        /// Sum of the three color channels.
        #[inline]
        pub fn sum(&self) -> u32 {
            self.red as u32 + self.green as u32 + self.blue as u32
        }
    }

    impl From<&[u8]> for Pixel {
        /// Reads the first four bytes as RGBA. Missing bytes read as zero.
        fn from(bytes: &[u8]) -> Self {
            let byte = |i: usize| bytes.get(i).copied().unwrap_or_default();
            Pixel::new(byte(0), byte(1), byte(2), byte(3))
        }
    }

    /// An 8-bit-per-channel RGB color.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct Rgb {
        pub r: Channel,
        pub g: Channel,
        pub b: Channel,
    }

    impl Rgb {
        pub const fn new(r: Channel, g: Channel, b: Channel) -> Self {
            Self { r, g, b }
        }

        /// Builds a color from floating point channels, rounding and clamping to 0..=255.
        pub fn from_f64(r: f64, g: f64, b: f64) -> Self {
            Self {
                r: clamp_channel(r),
                g: clamp_channel(g),
                b: clamp_channel(b),
            }
        }

        #[inline]
        pub fn channels_f64(&self) -> [f64; 3] {
            [self.r as f64, self.g as f64, self.b as f64]
        }

        /// Converts this color to HSL. See [`rgb_to_hsl`].
        pub fn to_hsl(&self) -> Hsl {
            rgb_to_hsl(self.r, self.g, self.b)
        }
    }

    /// A color in HSL space.
    #[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
    pub struct Hsl {
        /// Hue angle in degrees [0, 360).
        pub h: Hue,
        /// Saturation as a percentage (0-100).
        pub s: Saturation,
        /// Lightness as a percentage (0-100).
        pub l: Lightness,
    }

    /// Rounds and clamps a floating point channel value into the byte range.
    #[inline]
    pub fn clamp_channel(value: f64) -> Channel {
        if value.is_nan() {
            return 0;
        }
        value.round().clamp(0.0, 255.0) as Channel
    }

    /// Standard RGB to HSL conversion.
    ///
    /// - Hue is the angle on the color wheel in degrees [0, 360); achromatic colors report 0.
    /// - Saturation and lightness are percentages (0-100).
    pub fn rgb_to_hsl(r: Channel, g: Channel, b: Channel) -> Hsl {
        let red = r as f64 / 255.0;
        let green = g as f64 / 255.0;
        let blue = b as f64 / 255.0;

        let maximum_channel = red.max(green.max(blue));
        let minimum_channel = red.min(green.min(blue));
        let lightness = (maximum_channel + minimum_channel) * 0.5;
        let chroma = maximum_channel - minimum_channel;

        if chroma <= 1e-9 {
            return Hsl { h: 0.0, s: 0.0, l: lightness * 100.0 };
        }

        let saturation = chroma / (1.0 - (2.0 * lightness - 1.0).abs());

        let (base_difference, sector_offset) = if maximum_channel == red {
            ((green - blue) / chroma, 0.0)
        } else if maximum_channel == green {
            ((blue - red) / chroma, 2.0)
        } else {
            ((red - green) / chroma, 4.0)
        };

        let mut hue_degrees = (base_difference + sector_offset) * 60.0;
        if hue_degrees < 0.0 {
            hue_degrees += 360.0;
        }
        if hue_degrees >= 360.0 {
            hue_degrees -= 360.0;
        }

        Hsl {
            h: hue_degrees,
            s: saturation * 100.0,
            l: lightness * 100.0,
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        fn assert_hsl(actual: Hsl, h: f64, s: f64, l: f64) {
            assert!((actual.h - h).abs() < 1e-6, "hue {} != {}", actual.h, h);
            assert!((actual.s - s).abs() < 1e-6, "saturation {} != {}", actual.s, s);
            assert!((actual.l - l).abs() < 1e-6, "lightness {} != {}", actual.l, l);
        }

        #[test]
        fn primaries_convert_to_expected_hues() {
            assert_hsl(rgb_to_hsl(255, 0, 0), 0.0, 100.0, 50.0);
            assert_hsl(rgb_to_hsl(0, 255, 0), 120.0, 100.0, 50.0);
            assert_hsl(rgb_to_hsl(0, 0, 255), 240.0, 100.0, 50.0);
        }

        #[test]
        fn achromatic_colors_have_no_hue_or_saturation() {
            assert_hsl(rgb_to_hsl(255, 255, 255), 0.0, 0.0, 100.0);
            assert_hsl(rgb_to_hsl(0, 0, 0), 0.0, 0.0, 0.0);
        }

        #[test]
        fn magenta_wraps_into_last_sector() {
            let hsl = rgb_to_hsl(255, 0, 255);
            assert!((hsl.h - 300.0).abs() < 1e-6);
        }

        #[test]
        fn transparent_pixels_are_invalid() {
            assert!(!Pixel::new(10, 10, 10, 127).is_valid());
            assert!(Pixel::new(10, 10, 10, 128).is_valid());
        }

        #[test]
        fn short_byte_slices_read_as_zero() {
            let pixel = Pixel::from(&[1u8, 2][..]);
            assert_eq!(pixel, Pixel::new(1, 2, 0, 0));
        }

        #[test]
        fn clamp_channel_rounds_and_saturates() {
            assert_eq!(clamp_channel(-4.0), 0);
            assert_eq!(clamp_channel(254.6), 255);
            assert_eq!(clamp_channel(300.0), 255);
            assert_eq!(clamp_channel(f64::NAN), 0);
        }
    }
}
