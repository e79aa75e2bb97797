// THEORY:
// The `GridManager` owns the spatial layout of the region scan. It slices a frame
// into a `grid_size` x `grid_size` grid of cells and is the single place that knows
// how those cells map back to pixel coordinates.
//
// Key architectural principles:
// 1.  **Cells cover every pixel**: cell boundaries come from `cell_span`, so uneven
//     frame sizes are split without dropping the last rows or columns.
// 2.  **Overlapping tiles**: the matcher does not compare single cells. It compares
//     2x2-cell tiles stepped one cell at a time, so a subject straddling a cell
//     boundary is still seen whole by at least one tile.
// 3.  **Motion mask**: given the previous and current frame, each cell is marked as
//     moving when its sampled mean channel difference exceeds a small threshold. A
//     tile inherits motion from any of its cells. The mask is a cheap prioritizer:
//     motionless tiles can be skipped entirely.
// 4.  **Decoupling**: the matcher asks for tiles and a mask and never does index math
//     of its own.

use crate::core_modules::extractors::cell_span;
use crate::core_modules::frame::{FrameView, PixelRect};

/// Every `MOTION_SAMPLE_STRIDE`-th pixel of a cell is compared.
pub const MOTION_SAMPLE_STRIDE: u32 = 4;
/// Mean per-channel difference above which a cell counts as moving.
pub const MOTION_THRESHOLD: f64 = 10.0;
/// Tiles span this many cells along each axis.
pub const TILE_CELLS: u32 = 2;

/// One candidate region of the scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tile {
    pub rect: PixelRect,
    pub has_motion: bool,
}

/// Per-cell motion flags for one pair of frames, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MotionMask {
    grid_size: u32,
    cells: Vec<bool>,
}

impl MotionMask {
    pub fn grid_size(&self) -> u32 {
        self.grid_size
    }

    pub fn is_moving(&self, cell_x: u32, cell_y: u32) -> bool {
        self.cells
            .get((cell_y * self.grid_size + cell_x) as usize)
            .copied()
            .unwrap_or(false)
    }

    pub fn moving_cells(&self) -> usize {
        self.cells.iter().filter(|&&moving| moving).count()
    }
}

/// The cell grid laid over one frame size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridManager {
    image_width: u32,
    image_height: u32,
    grid_size: u32,
}

impl GridManager {
    /// A `grid_size` x `grid_size` grid over a frame. A zero grid is treated as one cell.
    pub fn new(image_width: u32, image_height: u32, grid_size: u32) -> Self {
        Self {
            image_width,
            image_height,
            grid_size: grid_size.max(1),
        }
    }

    pub fn grid_size(&self) -> u32 {
        self.grid_size
    }

    /// Tiles per axis: one per adjacent pair of cells, at least one.
    pub fn tiles_per_axis(&self) -> u32 {
        (self.grid_size - 1).max(1)
    }

    /// Pixel bounds of the cell at `(cell_x, cell_y)`.
    pub fn cell_rect(&self, cell_x: u32, cell_y: u32) -> PixelRect {
        let (x0, x1) = cell_span(self.image_width, self.grid_size, cell_x);
        let (y0, y1) = cell_span(self.image_height, self.grid_size, cell_y);
        PixelRect::new(x0, y0, x1 - x0, y1 - y0)
    }

    fn tile_cells(&self, tile_index: u32) -> (u32, u32) {
        let last = (tile_index + TILE_CELLS).min(self.grid_size);
        (tile_index, last)
    }

    /// Enumerates every tile in row-major order, flagged from `mask` when one is given.
    ///
    /// Without a mask (or with a mask built for another grid) every tile is flagged as
    /// moving so nothing gets skipped.
    pub fn tiles(&self, mask: Option<&MotionMask>) -> Vec<Tile> {
        let mask = mask.filter(|m| m.grid_size == self.grid_size);
        let per_axis = self.tiles_per_axis();
        let mut tiles = Vec::with_capacity((per_axis * per_axis) as usize);

        for tile_y in 0..per_axis {
            let (cy0, cy1) = self.tile_cells(tile_y);
            for tile_x in 0..per_axis {
                let (cx0, cx1) = self.tile_cells(tile_x);
                let top_left = self.cell_rect(cx0, cy0);
                let bottom_right = self.cell_rect(cx1 - 1, cy1 - 1);
                let rect = PixelRect::new(
                    top_left.x,
                    top_left.y,
                    bottom_right.x + bottom_right.width - top_left.x,
                    bottom_right.y + bottom_right.height - top_left.y,
                );

                let has_motion = match mask {
                    Some(mask) => (cy0..cy1)
                        .any(|cy| (cx0..cx1).any(|cx| mask.is_moving(cx, cy))),
                    None => true,
                };
                tiles.push(Tile { rect, has_motion });
            }
        }
        tiles
    }

    /// Compares two frames cell by cell.
    ///
    /// Returns `None` when either frame does not have this grid's dimensions.
    pub fn motion_mask(
        &self,
        previous: &FrameView<'_>,
        current: &FrameView<'_>,
    ) -> Option<MotionMask> {
        let dims = (self.image_width, self.image_height);
        let same_size = |frame: &FrameView<'_>| (frame.width(), frame.height()) == dims;
        if !same_size(previous) || !same_size(current) {
            return None;
        }

        let mut cells = Vec::with_capacity((self.grid_size * self.grid_size) as usize);
        for cell_y in 0..self.grid_size {
            for cell_x in 0..self.grid_size {
                let rect = self.cell_rect(cell_x, cell_y);
                cells.push(cell_difference(previous, current, rect) > MOTION_THRESHOLD);
            }
        }
        Some(MotionMask {
            grid_size: self.grid_size,
            cells,
        })
    }
}

/// Mean of `(|dr| + |dg| + |db|) / 3` over every `MOTION_SAMPLE_STRIDE`-th pixel of `rect`.
fn cell_difference(previous: &FrameView<'_>, current: &FrameView<'_>, rect: PixelRect) -> f64 {
    let mut total = 0.0;
    let mut samples = 0u64;
    let mut index = 0u32;
    for y in rect.y..rect.y + rect.height {
        for x in rect.x..rect.x + rect.width {
            if index % MOTION_SAMPLE_STRIDE == 0 {
                let a = previous.pixel(x, y);
                let b = current.pixel(x, y);
                let delta = a.red.abs_diff(b.red) as f64
                    + a.green.abs_diff(b.green) as f64
                    + a.blue.abs_diff(b.blue) as f64;
                total += delta / 3.0;
                samples += 1;
            }
            index += 1;
        }
    }
    if samples == 0 { 0.0 } else { total / samples as f64 }
}
