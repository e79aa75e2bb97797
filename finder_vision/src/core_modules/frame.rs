// THEORY:
// The `frame` module is the bridge between raw caller-provided bytes and the
// analysis layers. It replaces ad-hoc index math scattered through the extractors
// with two small types:
//
// 1.  **`FrameView`**: a validated, borrowed view over a row-major RGBA buffer. It is
//     only ever held for the duration of one call; nothing in the engine keeps a
//     caller's buffer alive past the call that received it.
// 2.  **`Frame`**: an owned copy. The matcher stores its "previous frame" as a
//     `Frame` so it never aliases caller memory, and region extraction (the tiles of
//     the region scan) produces owned `Frame`s as well.
//
// `PixelRect` describes a rectangle in pixel coordinates and `MatchRegion` is the
// serializable form handed to consumers (bounding box plus center).

use crate::core_modules::pixel::pixel::{CHANNELS, Pixel};
use crate::error::{VisionError, VisionResult};
use serde::{Deserialize, Serialize};

/// A rectangle in source-frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Clips this rectangle to a `width` x `height` frame.
    pub fn clipped(&self, width: u32, height: u32) -> PixelRect {
        let x = self.x.min(width);
        let y = self.y.min(height);
        PixelRect {
            x,
            y,
            width: self.width.min(width - x),
            height: self.height.min(height - y),
        }
    }
}

/// The localized area of a frame that best matched a fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub center_x: f64,
    pub center_y: f64,
}

impl From<PixelRect> for MatchRegion {
    fn from(rect: PixelRect) -> Self {
        Self {
            x: rect.x,
            y: rect.y,
            width: rect.width,
            height: rect.height,
            center_x: rect.x as f64 + rect.width as f64 / 2.0,
            center_y: rect.y as f64 + rect.height as f64 / 2.0,
        }
    }
}

impl MatchRegion {
    /// Whether the point lies inside the bounding box.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.x as f64
            && y >= self.y as f64
            && x < (self.x + self.width) as f64
            && y < (self.y + self.height) as f64
    }
}

fn expected_len(width: u32, height: u32) -> usize {
    width as usize * height as usize * CHANNELS
}

/// A borrowed, validated view over a row-major RGBA buffer.
#[derive(Debug, Clone, Copy)]
pub struct FrameView<'a> {
    width: u32,
    height: u32,
    data: &'a [u8],
}

impl<'a> FrameView<'a> {
    /// Wraps `data` as a `width` x `height` RGBA frame.
    ///
    /// Fails when the buffer is not exactly `width * height * 4` bytes long.
    pub fn new(width: u32, height: u32, data: &'a [u8]) -> VisionResult<Self> {
        let expected = expected_len(width, height);
        if data.len() != expected {
            return Err(VisionError::invalid_buffer(expected, data.len()));
        }
        Ok(Self { width, height, data })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Reads the pixel at `(x, y)`. Callers must stay in bounds.
    #[inline]
    pub fn pixel(&self, x: u32, y: u32) -> Pixel {
        let offset = (y as usize * self.width as usize + x as usize) * CHANNELS;
        Pixel::from(&self.data[offset..offset + CHANNELS])
    }

    /// Reads the pixel at a linear (row-major) pixel index.
    #[inline]
    pub fn pixel_at_index(&self, index: usize) -> Pixel {
        let offset = index * CHANNELS;
        Pixel::from(&self.data[offset..offset + CHANNELS])
    }

    /// Iterates every pixel in row-major order.
    pub fn pixels(&self) -> impl Iterator<Item = Pixel> + 'a {
        self.data.chunks_exact(CHANNELS).map(Pixel::from)
    }

    /// Copies the pixels under `rect` (clipped to this frame) into an owned frame.
    pub fn sub_region(&self, rect: PixelRect) -> Frame {
        let rect = rect.clipped(self.width, self.height);
        let mut data = Vec::with_capacity(rect.area() as usize * CHANNELS);
        let row_bytes = rect.width as usize * CHANNELS;
        for row in rect.y..rect.y + rect.height {
            let start = (row as usize * self.width as usize + rect.x as usize) * CHANNELS;
            data.extend_from_slice(&self.data[start..start + row_bytes]);
        }
        Frame {
            width: rect.width,
            height: rect.height,
            data,
        }
    }

    /// Deep-copies this view into an owned frame.
    pub fn to_frame(&self) -> Frame {
        Frame {
            width: self.width,
            height: self.height,
            data: self.data.to_vec(),
        }
    }
}

/// An owned RGBA frame.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Frame {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl Frame {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> VisionResult<Self> {
        let expected = expected_len(width, height);
        if data.len() != expected {
            return Err(VisionError::invalid_buffer(expected, data.len()));
        }
        Ok(Self { width, height, data })
    }

    /// A frame filled with a single RGBA color.
    pub fn filled(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let data = rgba
            .iter()
            .copied()
            .cycle()
            .take(expected_len(width, height))
            .collect();
        Self { width, height, data }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    pub fn view(&self) -> FrameView<'_> {
        FrameView {
            width: self.width,
            height: self.height,
            data: &self.data,
        }
    }

    /// Overwrites this frame with a copy of `view`, reusing the allocation when the
    /// sizes already agree.
    pub fn copy_from(&mut self, view: &FrameView<'_>) {
        if self.data.len() != view.data.len() {
            self.data.resize(view.data.len(), 0);
        }
        self.data.copy_from_slice(view.data);
        self.width = view.width;
        self.height = view.height;
    }

    /// Paints `rect` (clipped) with a single RGBA color.
    pub fn fill_rect(&mut self, rect: PixelRect, rgba: [u8; 4]) {
        let rect = rect.clipped(self.width, self.height);
        for row in rect.y..rect.y + rect.height {
            for col in rect.x..rect.x + rect.width {
                let offset = (row as usize * self.width as usize + col as usize) * CHANNELS;
                self.data[offset..offset + CHANNELS].copy_from_slice(&rgba);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_buffers_of_the_wrong_length() {
        let data = vec![0u8; 10];
        let err = FrameView::new(2, 2, &data).unwrap_err();
        assert!(matches!(
            err,
            VisionError::InvalidBuffer { expected: 16, actual: 10 }
        ));
    }

    #[test]
    fn empty_frames_are_valid_views() {
        let view = FrameView::new(0, 0, &[]).expect("empty view");
        assert!(view.is_empty());
        assert_eq!(view.pixels().count(), 0);
    }

    #[test]
    fn sub_region_copies_the_requested_rows() {
        let mut frame = Frame::filled(4, 4, [0, 0, 0, 255]);
        frame.fill_rect(PixelRect::new(2, 1, 2, 2), [255, 0, 0, 255]);

        let region = frame.view().sub_region(PixelRect::new(2, 1, 2, 2));
        assert_eq!((region.width(), region.height()), (2, 2));
        assert!(region.view().pixels().all(|p| p.red == 255 && p.green == 0));
    }

    #[test]
    fn sub_region_is_clipped_to_the_frame() {
        let frame = Frame::filled(4, 4, [9, 9, 9, 255]);
        let region = frame.view().sub_region(PixelRect::new(3, 3, 10, 10));
        assert_eq!((region.width(), region.height()), (1, 1));
    }

    #[test]
    fn copy_from_takes_ownership_of_a_copy() {
        let source = vec![7u8; 16];
        let mut stored = Frame::default();
        {
            let view = FrameView::new(2, 2, &source).unwrap();
            stored.copy_from(&view);
        }
        assert_eq!(stored.data(), source.as_slice());
        assert_eq!((stored.width(), stored.height()), (2, 2));
    }

    #[test]
    fn match_region_center_is_the_box_midpoint() {
        let region = MatchRegion::from(PixelRect::new(10, 20, 30, 40));
        assert_eq!(region.center_x, 25.0);
        assert_eq!(region.center_y, 40.0);
        assert!(region.contains(25.0, 40.0));
        assert!(!region.contains(40.0, 40.0));
    }
}
