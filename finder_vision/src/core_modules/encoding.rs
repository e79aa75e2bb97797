// THEORY:
// `encoding` is the only place that touches encoded image formats. Fingerprints
// carry small reference thumbnails and match results may carry a frame snapshot;
// both are opaque strings to the engine, stored as PNG data URLs so any consumer
// (a browser, the subject store) can display them without knowing this crate.
//
// It also decodes reference images coming from files or raw encoded bytes into
// `image::DynamicImage`, which the fingerprint builder rescales before extraction.

pub mod encoding {
    use crate::core_modules::frame::FrameView;
    use crate::error::{VisionError, VisionResult};
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use image::{DynamicImage, ImageEncoder, RgbaImage};
    use std::path::Path;

    pub const PNG_DATA_URL_PREFIX: &str = "data:image/png;base64,";

    /// Encodes a raw RGBA buffer as a PNG data URL.
    pub fn encode_png_data_url(frame: &FrameView<'_>) -> VisionResult<String> {
        let mut png = Vec::new();
        let encoder = image::codecs::png::PngEncoder::new(&mut png);
        encoder.write_image(
            frame.data(),
            frame.width(),
            frame.height(),
            image::ExtendedColorType::Rgba8,
        )?;

        let mut url = String::with_capacity(PNG_DATA_URL_PREFIX.len() + png.len() * 4 / 3 + 4);
        url.push_str(PNG_DATA_URL_PREFIX);
        STANDARD.encode_string(&png, &mut url);
        Ok(url)
    }

    /// Encodes a downscaled copy of `image` (at most `size` on each side) as a PNG data URL.
    pub fn encode_thumbnail(image: &DynamicImage, size: u32) -> VisionResult<String> {
        let thumbnail = image.thumbnail(size.max(1), size.max(1)).to_rgba8();
        let view = FrameView::new(thumbnail.width(), thumbnail.height(), thumbnail.as_raw())?;
        encode_png_data_url(&view)
    }

    /// Decodes a PNG data URL produced by [`encode_png_data_url`] back into RGBA pixels.
    pub fn decode_png_data_url(url: &str) -> VisionResult<RgbaImage> {
        let payload = url
            .strip_prefix(PNG_DATA_URL_PREFIX)
            .ok_or_else(|| VisionError::Encode("not a PNG data URL".to_string()))?;
        let bytes = STANDARD
            .decode(payload)
            .map_err(|e| VisionError::Encode(format!("invalid base64 payload: {e}")))?;
        Ok(decode_image(&bytes)?.to_rgba8())
    }

    /// Decodes an encoded image (PNG, JPEG, ...) from memory.
    pub fn decode_image(bytes: &[u8]) -> VisionResult<DynamicImage> {
        Ok(image::load_from_memory(bytes)?)
    }

    /// Loads an image from disk.
    pub fn load_image(path: impl AsRef<Path>) -> VisionResult<DynamicImage> {
        Ok(image::open(path)?)
    }

    /// Wraps an owned RGBA buffer as a `DynamicImage`.
    pub fn rgba_to_image(frame: &FrameView<'_>) -> VisionResult<DynamicImage> {
        let buffer = RgbaImage::from_raw(frame.width(), frame.height(), frame.data().to_vec())
            .ok_or_else(|| {
                VisionError::invalid_buffer(frame.pixel_count() * 4, frame.data().len())
            })?;
        Ok(DynamicImage::ImageRgba8(buffer))
    }
}
