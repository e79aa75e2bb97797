// THEORY:
// The `smart_pixel` module holds the comparative color primitives. Where `Pixel`
// knows only about itself, everything here takes two colors and quantifies the
// relationship between them.
//
// Multiple "lenses" for difference, each used by a different layer:
// - `color_distance`: plain Euclidean distance in RGB. Cheap and symmetric, used by
//   k-means assignment, background subtraction and histogram bucket matching.
// - `perceptual_color_distance`: the "red-mean" weighted Euclidean distance. The
//   green channel carries the most weight and the red/blue weights slide with the
//   mean red level, approximating human sensitivity. Used for dominant-color and
//   average-color similarity.
// - `normalize_brightness`: pulls a color toward a target HSL lightness, used when
//   comparing colors captured under different lighting.

pub mod smart_pixel {
    use crate::core_modules::pixel::pixel::{Lightness, Rgb, rgb_to_hsl};

    pub type ColorDistance = f64;

    /// The largest possible `color_distance` (black to white), sqrt(3 * 255^2).
    pub const MAX_COLOR_DISTANCE: ColorDistance = 441.672_955_930_063_7;

    /// Euclidean distance between two colors in RGB space (0.0 to ~441.67).
    #[inline]
    pub fn color_distance(a: &Rgb, b: &Rgb) -> ColorDistance {
        let dr = a.r as f64 - b.r as f64;
        let dg = a.g as f64 - b.g as f64;
        let db = a.b as f64 - b.b as f64;
        (dr * dr + dg * dg + db * db).sqrt()
    }

    /// Red-mean weighted Euclidean distance.
    ///
    /// Weights are `2 + rmean/256` for red, `4` for green and `2 + (255 - rmean)/256`
    /// for blue, where `rmean` is the mean red level of the two colors.
    #[inline]
    pub fn perceptual_color_distance(a: &Rgb, b: &Rgb) -> ColorDistance {
        let red_mean = (a.r as f64 + b.r as f64) / 2.0;
        let dr = a.r as f64 - b.r as f64;
        let dg = a.g as f64 - b.g as f64;
        let db = a.b as f64 - b.b as f64;

        let red_weight = 2.0 + red_mean / 256.0;
        let green_weight = 4.0;
        let blue_weight = 2.0 + (255.0 - red_mean) / 256.0;

        (red_weight * dr * dr + green_weight * dg * dg + blue_weight * db * db).sqrt()
    }

    /// Rescales `color` so its HSL lightness moves toward `target_lightness` (0-100).
    ///
    /// Every channel is multiplied by `target / current` and clamped. Pure black has
    /// no lightness to scale and is returned unchanged.
    pub fn normalize_brightness(color: &Rgb, target_lightness: Lightness) -> Rgb {
        let current = rgb_to_hsl(color.r, color.g, color.b).l;
        if current <= f64::EPSILON {
            return *color;
        }
        let factor = target_lightness.max(0.0) / current;
        let [r, g, b] = color.channels_f64();
        Rgb::from_f64(r * factor, g * factor, b * factor)
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        const SAMPLES: [Rgb; 6] = [
            Rgb::new(0, 0, 0),
            Rgb::new(255, 255, 255),
            Rgb::new(255, 165, 0),
            Rgb::new(12, 200, 99),
            Rgb::new(128, 128, 128),
            Rgb::new(0, 0, 255),
        ];

        #[test]
        fn distance_to_self_is_zero() {
            for color in SAMPLES {
                assert_eq!(color_distance(&color, &color), 0.0);
                assert_eq!(perceptual_color_distance(&color, &color), 0.0);
            }
        }

        #[test]
        fn distances_are_symmetric() {
            for a in SAMPLES {
                for b in SAMPLES {
                    assert_eq!(color_distance(&a, &b), color_distance(&b, &a));
                    assert_eq!(
                        perceptual_color_distance(&a, &b),
                        perceptual_color_distance(&b, &a)
                    );
                }
            }
        }

        #[test]
        fn black_to_white_is_the_maximum_distance() {
            let d = color_distance(&Rgb::new(0, 0, 0), &Rgb::new(255, 255, 255));
            assert!((d - MAX_COLOR_DISTANCE).abs() < 1e-9);
        }

        #[test]
        fn green_differences_weigh_more_than_blue() {
            let base = Rgb::new(100, 100, 100);
            let green_shift = Rgb::new(100, 130, 100);
            let blue_shift = Rgb::new(100, 100, 130);
            assert!(
                perceptual_color_distance(&base, &green_shift)
                    > perceptual_color_distance(&base, &blue_shift)
            );
        }

        #[test]
        fn normalize_brightness_moves_toward_target() {
            let dim = Rgb::new(40, 60, 20);
            let brightened = normalize_brightness(&dim, 50.0);
            assert!(brightened.to_hsl().l > dim.to_hsl().l);

            let clamped = normalize_brightness(&Rgb::new(200, 250, 100), 100.0);
            assert_eq!(clamped.g, 255);
        }

        #[test]
        fn normalize_brightness_leaves_black_alone() {
            let black = Rgb::new(0, 0, 0);
            assert_eq!(normalize_brightness(&black, 80.0), black);
        }
    }
}
