//! Per-frame grid reconstruction.
//!
//! A frame is split into `grid_size x grid_size` cells. Every cell is filled
//! with a copy of the whole frame shrunk to cell size, either as-is or with
//! its colors inverted, whichever is closer to the cell's original pixels.

use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};

/// The two candidate fills for a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellFill {
    Normal,
    Inverted,
}

/// Integer cell geometry for one frame size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellGrid {
    pub grid_size: u32,
    pub cell_width: u32,
    pub cell_height: u32,
}

/// Top-left corner of one cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cell {
    pub row: u32,
    pub col: u32,
    pub x: u32,
    pub y: u32,
}

impl CellGrid {
    pub fn new(width: u32, height: u32, grid_size: u32) -> Self {
        let (cell_width, cell_height) = if grid_size == 0 {
            (0, 0)
        } else {
            (width / grid_size, height / grid_size)
        };
        Self {
            grid_size,
            cell_width,
            cell_height,
        }
    }

    /// A grid whose cells have no area; no cell is ever written.
    pub fn is_degenerate(&self) -> bool {
        self.cell_width == 0 || self.cell_height == 0
    }

    /// Width covered by whole cells. Columns at or beyond this stay black.
    pub fn covered_width(&self) -> u32 {
        self.cell_width * self.grid_size
    }

    /// Height covered by whole cells. Rows at or beyond this stay black.
    pub fn covered_height(&self) -> u32 {
        self.cell_height * self.grid_size
    }

    /// Cells in row-major order.
    pub fn cells(&self) -> impl Iterator<Item = Cell> + '_ {
        let n = if self.is_degenerate() { 0 } else { self.grid_size };
        (0..n).flat_map(move |row| {
            (0..n).map(move |col| Cell {
                row,
                col,
                x: col * self.cell_width,
                y: row * self.cell_height,
            })
        })
    }
}

/// Strictly smaller normal error wins; ties go to the inverted fill.
pub fn choose_fill(error_normal: f64, error_inverted: f64) -> CellFill {
    if error_normal < error_inverted {
        CellFill::Normal
    } else {
        CellFill::Inverted
    }
}

/// Per-channel `255 - v`.
pub fn invert(img: &RgbImage) -> RgbImage {
    let mut out = img.clone();
    for px in out.pixels_mut() {
        *px = Rgb([255 - px[0], 255 - px[1], 255 - px[2]]);
    }
    out
}

/// Source indices and weights contributing to each destination index when
/// `src_len` samples are area-averaged down to `dst_len`.
fn area_weights(src_len: u32, dst_len: u32) -> Vec<Vec<(usize, f64)>> {
    let scale = src_len as f64 / dst_len as f64;
    (0..dst_len)
        .map(|d| {
            let start = d as f64 * scale;
            let end = start + scale;
            let first = start.floor() as u32;
            let last = (end.ceil() as u32).min(src_len);
            (first..last)
                .filter_map(|s| {
                    let overlap = end.min(s as f64 + 1.0) - start.max(s as f64);
                    (overlap > 1e-9).then(|| (s as usize, overlap / scale))
                })
                .collect()
        })
        .collect()
}

/// Resize by pixel-area averaging: each output pixel is the mean of the
/// source area it covers, with fractional coverage at the edges.
pub fn area_downscale(src: &RgbImage, width: u32, height: u32) -> RgbImage {
    if width == 0 || height == 0 {
        return RgbImage::new(width, height);
    }
    let (sw, sh) = src.dimensions();
    if (sw, sh) == (width, height) {
        return src.clone();
    }

    let xw = area_weights(sw, width);
    let yw = area_weights(sh, height);
    let raw = src.as_raw();
    let stride = sw as usize * 3;

    // Horizontal pass: sh rows of `width` pixels.
    let mut horiz = vec![0f64; sh as usize * width as usize * 3];
    for y in 0..sh as usize {
        let row = &raw[y * stride..(y + 1) * stride];
        for (dx, weights) in xw.iter().enumerate() {
            let out = &mut horiz[(y * width as usize + dx) * 3..][..3];
            for &(sx, w) in weights {
                for c in 0..3 {
                    out[c] += row[sx * 3 + c] as f64 * w;
                }
            }
        }
    }

    let mut dst = RgbImage::new(width, height);
    for (dy, weights) in yw.iter().enumerate() {
        for dx in 0..width as usize {
            let mut acc = [0f64; 3];
            for &(sy, w) in weights {
                let px = &horiz[(sy * width as usize + dx) * 3..][..3];
                for c in 0..3 {
                    acc[c] += px[c] * w;
                }
            }
            dst.put_pixel(
                dx as u32,
                dy as u32,
                Rgb(acc.map(|v| v.round().clamp(0.0, 255.0) as u8)),
            );
        }
    }
    dst
}

/// Sum of squared differences between a `candidate`-sized window of `frame`
/// at (`x`, `y`) and `candidate`.
fn window_error(frame: &RgbImage, x: u32, y: u32, candidate: &RgbImage) -> f64 {
    let (cw, ch) = candidate.dimensions();
    let frame_stride = frame.width() as usize * 3;
    let cand_stride = cw as usize * 3;
    let frame_raw = frame.as_raw();
    let cand_raw = candidate.as_raw();

    let mut sum = 0f64;
    for row in 0..ch as usize {
        let start = (y as usize + row) * frame_stride + x as usize * 3;
        let target = &frame_raw[start..start + cand_stride];
        let cand = &cand_raw[row * cand_stride..(row + 1) * cand_stride];
        for (&a, &b) in target.iter().zip(cand) {
            let d = a as f64 - b as f64;
            sum += d * d;
        }
    }
    sum
}

/// Errors of the normal and inverted candidates against the cell at `cell`.
pub fn cell_errors(
    frame: &RgbImage,
    grid: &CellGrid,
    cell: Cell,
    downscaled: &RgbImage,
    inverted: &RgbImage,
) -> (f64, f64) {
    let (w, h) = frame.dimensions();
    if cell.x + grid.cell_width <= w && cell.y + grid.cell_height <= h {
        return (
            window_error(frame, cell.x, cell.y, downscaled),
            window_error(frame, cell.x, cell.y, inverted),
        );
    }

    // A cell running past the frame edge is cropped and stretched back to size.
    let region = imageops::crop_imm(
        frame,
        cell.x,
        cell.y,
        w.saturating_sub(cell.x),
        h.saturating_sub(cell.y),
    )
    .to_image();
    let region = imageops::resize(&region, grid.cell_width, grid.cell_height, FilterType::Triangle);
    (
        window_error(&region, 0, 0, downscaled),
        window_error(&region, 0, 0, inverted),
    )
}

/// Per-frame state: the two candidate fills and the choice made for each cell.
///
/// Built fresh for every frame and dropped once the frame is rendered.
#[derive(Debug, Clone)]
pub struct FramePlan {
    pub width: u32,
    pub height: u32,
    pub grid: CellGrid,
    pub downscaled: RgbImage,
    pub inverted: RgbImage,
    /// One decision per cell in row-major order; empty for a degenerate grid.
    pub decisions: Vec<CellFill>,
}

impl FramePlan {
    pub fn new(frame: &RgbImage, grid_size: u32) -> Self {
        let (width, height) = frame.dimensions();
        let grid = CellGrid::new(width, height, grid_size);
        if grid.is_degenerate() {
            return Self {
                width,
                height,
                grid,
                downscaled: RgbImage::new(0, 0),
                inverted: RgbImage::new(0, 0),
                decisions: Vec::new(),
            };
        }

        let downscaled = area_downscale(frame, grid.cell_width, grid.cell_height);
        let inverted = invert(&downscaled);
        let decisions = grid
            .cells()
            .map(|cell| {
                let (normal, inv) = cell_errors(frame, &grid, cell, &downscaled, &inverted);
                choose_fill(normal, inv)
            })
            .collect();

        Self {
            width,
            height,
            grid,
            downscaled,
            inverted,
            decisions,
        }
    }

    pub fn fill(&self, decision: CellFill) -> &RgbImage {
        match decision {
            CellFill::Normal => &self.downscaled,
            CellFill::Inverted => &self.inverted,
        }
    }

    /// Assemble the output frame. Uncovered pixels stay black.
    pub fn render(&self) -> RgbImage {
        let mut output = RgbImage::new(self.width, self.height);
        for (cell, decision) in self.grid.cells().zip(&self.decisions) {
            imageops::replace(&mut output, self.fill(*decision), cell.x as i64, cell.y as i64);
        }
        output
    }
}

/// Build the mosaic for one frame.
///
/// The result has the frame's dimensions. Pixels outside whole-cell coverage
/// are black, and a degenerate grid (cells narrower or shorter than one
/// pixel) yields an all-black frame.
pub fn transform_frame(frame: &RgbImage, grid_size: u32) -> RgbImage {
    FramePlan::new(frame, grid_size).render()
}
