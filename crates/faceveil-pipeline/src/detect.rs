//! Multiscale sliding-window cascade scan.
//!
//! For every window side from `min_size` up to `max_size`, square
//! windows are placed on a grid with stride `side * shift_factor` and
//! run through the cascade. Most windows fail one of the first stages,
//! which keeps the scan close to linear in the number of windows.
//!
//! Window centers start at `side/2 + 1` from each edge, so every pixel
//! a tree can sample (offsets reach at most half a side) lies inside
//! the image.

use image::GrayImage;
use tracing::debug;

use crate::cascade::CascadeModel;
use crate::scoring::StageScoring;
use crate::types::{Detection, PipelineError, ScanConfig};

/// Borrowed, row-major grayscale grid the detector samples from.
#[derive(Debug, Clone, Copy)]
pub struct ImageParams<'a> {
    pixels: &'a [u8],
    width: u32,
    height: u32,
    stride: usize,
}

impl<'a> ImageParams<'a> {
    /// Wrap a raw intensity buffer.
    ///
    /// Returns `None` if `stride < width` or the buffer is too short
    /// for `height` rows of `stride` bytes (the last row only needs
    /// `width` bytes).
    #[must_use]
    pub fn new(pixels: &'a [u8], width: u32, height: u32, stride: usize) -> Option<Self> {
        let w = usize::try_from(width).ok()?;
        let h = usize::try_from(height).ok()?;
        if stride < w {
            return None;
        }
        let needed = match h {
            0 => 0,
            _ => (h - 1).checked_mul(stride)?.checked_add(w)?,
        };
        (pixels.len() >= needed).then_some(Self {
            pixels,
            width,
            height,
            stride,
        })
    }

    /// View a [`GrayImage`] (tightly packed, stride = width).
    #[must_use]
    pub fn from_gray(image: &'a GrayImage) -> Self {
        Self {
            pixels: image.as_raw(),
            width: image.width(),
            height: image.height(),
            stride: image.width() as usize,
        }
    }

    /// Grid width in pixels.
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Grid height in pixels.
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// Intensity at `center + offset * scale / 256` (both axes), with
    /// the center already multiplied by 256.
    fn sample(&self, row256: i64, col256: i64, scale: i64, dr: i8, dc: i8) -> Option<u8> {
        let row = (row256 + i64::from(dr) * scale) >> 8;
        let col = (col256 + i64::from(dc) * scale) >> 8;
        let row = u32::try_from(row).ok().filter(|&r| r < self.height)?;
        let col = u32::try_from(col).ok().filter(|&c| c < self.width)?;
        self.pixels
            .get(row as usize * self.stride + col as usize)
            .copied()
    }
}

/// Run the cascade on one window centered at `(row, col)` with side
/// `scale`.
///
/// Returns the window's score if it survives every stage and `None` as
/// soon as a stage rejects it. Samples falling outside the grid also
/// reject the window.
#[must_use]
pub fn classify(
    model: &CascadeModel,
    image: &ImageParams<'_>,
    row: u32,
    col: u32,
    scale: u32,
) -> Option<f32> {
    let row256 = i64::from(row) * 256;
    let col256 = i64::from(col) * 256;
    let scale = i64::from(scale);
    let scoring = model.scoring();

    let mut sum = 0.0f32;
    let mut last_threshold = 0.0f32;
    for stage in model.stages() {
        for index in 0..stage.tree_count() {
            let (nodes, leaves) = model.tree(stage, index);
            let mut idx = 1usize;
            for _ in 0..stage.depth() {
                let node = nodes.get(idx - 1)?;
                let p1 = image.sample(row256, col256, scale, node.r1, node.c1)?;
                let p2 = image.sample(row256, col256, scale, node.r2, node.c2)?;
                let right = i16::from(p1) - i16::from(p2) <= node.threshold;
                idx = 2 * idx + usize::from(right);
            }
            sum += leaves.get(idx - leaves.len())?;
        }
        if !scoring.stage_passes(sum, stage.threshold()) {
            return None;
        }
        last_threshold = stage.threshold();
    }
    Some(scoring.final_score(sum, last_threshold))
}

/// Scan the whole grid at every window size and collect survivors.
///
/// Order is scale ascending, then row, then column.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidScanConfig`] if `config` violates
/// its invariants; nothing is scanned in that case.
pub fn scan(
    model: &CascadeModel,
    image: &ImageParams<'_>,
    config: &ScanConfig,
) -> Result<Vec<Detection>, PipelineError> {
    config.validate()?;

    let mut detections = Vec::new();
    let mut scales = 0usize;
    for scale in window_sizes(config) {
        let Some((rows, cols)) = centers(image.width, image.height, scale) else {
            // Sizes only grow from here.
            break;
        };
        scales += 1;
        let step = stride(scale, config.shift_factor);
        for row in rows.step_by(step) {
            for col in cols.clone().step_by(step) {
                if let Some(score) = classify(model, image, row, col, scale) {
                    detections.push(Detection {
                        row,
                        col,
                        scale,
                        score,
                    });
                }
            }
        }
    }

    debug!(
        width = image.width,
        height = image.height,
        scales,
        detections = detections.len(),
        "cascade scan complete"
    );
    Ok(detections)
}

/// Window sides visited by a scan, ascending.
///
/// Each size is `floor(previous * scale_factor)`, bumped by one when
/// the factor is too small to make progress on its own.
pub fn window_sizes(config: &ScanConfig) -> impl Iterator<Item = u32> + use<> {
    let (min, max, factor) = (config.min_size, config.max_size, config.scale_factor);
    std::iter::successors((min <= max).then_some(min), move |&size| {
        let next = next_size(size, factor);
        (next > size && next <= max).then_some(next)
    })
}

/// Number of windows a scan of a `width` x `height` grid evaluates.
#[must_use]
pub fn window_count(width: u32, height: u32, config: &ScanConfig) -> u64 {
    window_sizes(config)
        .map_while(|scale| {
            let (rows, cols) = centers(width, height, scale)?;
            let step = stride(scale, config.shift_factor);
            Some(rows.step_by(step).count() as u64 * cols.step_by(step).count() as u64)
        })
        .sum()
}

/// Number of window sizes that fit a `width` x `height` grid.
#[must_use]
pub fn scale_count(width: u32, height: u32, config: &ScanConfig) -> usize {
    window_sizes(config)
        .take_while(|&scale| centers(width, height, scale).is_some())
        .count()
}

/// Inclusive ranges of valid window centers, or `None` if a window of
/// side `scale` does not fit.
fn centers(
    width: u32,
    height: u32,
    scale: u32,
) -> Option<(std::ops::RangeInclusive<u32>, std::ops::RangeInclusive<u32>)> {
    let offset = scale / 2 + 1;
    let last_row = height.checked_sub(offset).filter(|&r| r >= offset)?;
    let last_col = width.checked_sub(offset).filter(|&c| c >= offset)?;
    Some((offset..=last_row, offset..=last_col))
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn stride(scale: u32, shift_factor: f64) -> usize {
    ((f64::from(scale) * shift_factor).floor() as usize).max(1)
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn next_size(size: u32, factor: f64) -> u32 {
    let grown = (f64::from(size) * factor).floor();
    let grown = if grown >= f64::from(u32::MAX) {
        u32::MAX
    } else {
        grown as u32
    };
    grown.max(size.saturating_add(1))
}
