//! Shared types for the faceveil detection and anonymization pipeline.

use serde::{Deserialize, Serialize};

use crate::cascade::CascadeError;

/// Re-export `GrayImage` so downstream crates can reference
/// intermediate raster data without depending on `image` directly.
pub use image::GrayImage;

/// Re-export `RgbaImage` so downstream crates can reference the
/// decoded and composited images without depending on `image` directly.
pub use image::RgbaImage;

/// Image dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

/// One window that survived every cascade stage.
///
/// `row` and `col` are the window center, `scale` its side length.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Center Y in pixels.
    pub row: u32,
    /// Center X in pixels.
    pub col: u32,
    /// Window side length in pixels.
    pub scale: u32,
    /// Accumulated confidence. Summed over members after clustering.
    pub score: f32,
}

impl Detection {
    /// Square box `center ± scale/2` in floating point, as
    /// `(top, left, bottom, right)`.
    #[must_use]
    pub fn bounds(&self) -> (f64, f64, f64, f64) {
        let half = f64::from(self.scale) / 2.0;
        let r = f64::from(self.row);
        let c = f64::from(self.col);
        (r - half, c - half, r + half, c + half)
    }

    /// Intersection-over-union of the two detections' square boxes.
    #[must_use]
    pub fn iou(&self, other: &Self) -> f64 {
        let (t1, l1, b1, r1) = self.bounds();
        let (t2, l2, b2, r2) = other.bounds();

        let over_rows = (b1.min(b2) - t1.max(t2)).max(0.0);
        let over_cols = (r1.min(r2) - l1.max(l2)).max(0.0);
        let intersection = over_rows * over_cols;

        let s1 = f64::from(self.scale);
        let s2 = f64::from(other.scale);
        let union = s1.mul_add(s1, s2 * s2) - intersection;
        if union <= 0.0 {
            return 0.0;
        }
        intersection / union
    }
}

/// Axis-aligned face rectangle in pixel coordinates.
///
/// Half-open: `left..right` columns and `top..bottom` rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FaceBox {
    /// First column inside the box.
    pub left: u32,
    /// First row inside the box.
    pub top: u32,
    /// One past the last column inside the box.
    pub right: u32,
    /// One past the last row inside the box.
    pub bottom: u32,
}

impl FaceBox {
    /// Box width in pixels.
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.right.saturating_sub(self.left)
    }

    /// Box height in pixels.
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.bottom.saturating_sub(self.top)
    }

    /// Returns `true` if the box covers no pixels.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    /// Returns `true` if pixel `(x, y)` lies inside the box.
    #[must_use]
    pub const fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.left && x < self.right && y >= self.top && y < self.bottom
    }
}

/// Encoding used for the composited output image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OutputFormat {
    /// Lossless PNG.
    Png,
    /// JPEG at [`PipelineConfig::jpeg_quality`].
    #[default]
    Jpeg,
}

/// Sliding-window scan configuration.
///
/// Bounds the window sizes explored and the step/scale increments.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Smallest window side in pixels.
    pub min_size: u32,
    /// Largest window side in pixels.
    pub max_size: u32,
    /// Window stride as a fraction of the window side.
    pub shift_factor: f64,
    /// Growth factor between consecutive window sizes.
    pub scale_factor: f64,
}

impl ScanConfig {
    /// Default smallest window side.
    pub const DEFAULT_MIN_SIZE: u32 = 20;
    /// Default largest window side.
    pub const DEFAULT_MAX_SIZE: u32 = 2000;
    /// Default stride fraction.
    pub const DEFAULT_SHIFT_FACTOR: f64 = 0.1;
    /// Default scale growth factor.
    pub const DEFAULT_SCALE_FACTOR: f64 = 1.1;

    /// Check the scan invariants.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidScanConfig`] if `min_size` is zero
    /// or exceeds `max_size`, if `shift_factor` is outside `(0, 1]`, or
    /// if `scale_factor` is not greater than 1.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.min_size == 0 {
            return Err(PipelineError::InvalidScanConfig(
                "min_size must be positive".to_owned(),
            ));
        }
        if self.min_size > self.max_size {
            return Err(PipelineError::InvalidScanConfig(format!(
                "min_size ({}) exceeds max_size ({})",
                self.min_size, self.max_size,
            )));
        }
        if !(self.shift_factor > 0.0 && self.shift_factor <= 1.0) {
            return Err(PipelineError::InvalidScanConfig(format!(
                "shift_factor must be in (0, 1], got {}",
                self.shift_factor,
            )));
        }
        if !(self.scale_factor.is_finite() && self.scale_factor > 1.0) {
            return Err(PipelineError::InvalidScanConfig(format!(
                "scale_factor must be greater than 1, got {}",
                self.scale_factor,
            )));
        }
        Ok(())
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            min_size: Self::DEFAULT_MIN_SIZE,
            max_size: Self::DEFAULT_MAX_SIZE,
            shift_factor: Self::DEFAULT_SHIFT_FACTOR,
            scale_factor: Self::DEFAULT_SCALE_FACTOR,
        }
    }
}

/// Configuration for the detection and anonymization pipeline.
///
/// Defaults match the parameters the detector was tuned with. Call
/// [`validate`](Self::validate) (the pipeline entry points do) before
/// scanning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Sliding-window scan parameters.
    #[serde(flatten)]
    pub scan: ScanConfig,

    /// Minimum IoU for two raw detections to join the same cluster.
    pub iou_threshold: f64,

    /// Clustered detections must score strictly above this to count
    /// as a face.
    pub quality_threshold: f32,
    /// Blur radius as a fraction of the face box width, in `[0, 1]`.
    /// Blur radius as a fraction of the face box width.
    pub blur_fraction: f64,

    /// Encoding of the composited image.
    pub output_format: OutputFormat,

    /// JPEG quality (1-100), used when `output_format` is JPEG.
    pub jpeg_quality: u8,
}

impl PipelineConfig {
    /// Default clustering IoU threshold.
    pub const DEFAULT_IOU_THRESHOLD: f64 = 0.18;
    /// Default face quality threshold.
    pub const DEFAULT_QUALITY_THRESHOLD: f32 = 5.0;
    /// Default blur radius fraction.
    pub const DEFAULT_BLUR_FRACTION: f64 = 0.1;
    /// Default JPEG quality.
    pub const DEFAULT_JPEG_QUALITY: u8 = 100;

    /// Check every invariant of the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidScanConfig`] describing the first
    /// violated invariant.
    pub fn validate(&self) -> Result<(), PipelineError> {
        self.scan.validate()?;
        if !(self.iou_threshold > 0.0 && self.iou_threshold <= 1.0) {
            return Err(PipelineError::InvalidScanConfig(format!(
                "iou_threshold must be in (0, 1], got {}",
                self.iou_threshold,
            )));
        }
        if !self.quality_threshold.is_finite() {
            return Err(PipelineError::InvalidScanConfig(
                "quality_threshold must be finite".to_owned(),
            ));
        }
        if !(0.0..=1.0).contains(&self.blur_fraction) {
            return Err(PipelineError::InvalidScanConfig(format!(
                "blur_fraction must be in [0, 1], got {}",
                self.blur_fraction,
            )));
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(PipelineError::InvalidScanConfig(format!(
                "jpeg_quality must be in 1..=100, got {}",
                self.jpeg_quality,
            )));
        }
        Ok(())
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            scan: ScanConfig::default(),
            iou_threshold: Self::DEFAULT_IOU_THRESHOLD,
            quality_threshold: Self::DEFAULT_QUALITY_THRESHOLD,
            blur_fraction: Self::DEFAULT_BLUR_FRACTION,
            output_format: OutputFormat::default(),
            jpeg_quality: Self::DEFAULT_JPEG_QUALITY,
        }
    }
}

/// Faces found in an image together with the anonymized raster.
#[derive(Debug, Clone)]
pub struct Anonymized {
    /// Accepted face boxes, clamped to the image.
    pub faces: Vec<FaceBox>,
    /// Copy of the source with every face box blurred.
    pub image: RgbaImage,
}

/// Pipeline output: face boxes and, when requested, the encoded
/// anonymized image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectionResult {
    /// Accepted face boxes, clamped to the image.
    pub faces: Vec<FaceBox>,
    /// Encoded composited image, if one was produced.
    pub image: Option<Vec<u8>>,
    /// Source image dimensions in pixels.
    pub dimensions: Dimensions,
}

/// Errors that can occur during pipeline processing.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Failed to decode the input image.
    #[error("failed to decode image: {0}")]
    ImageDecode(#[from] image::ImageError),

    /// The input image bytes were empty.
    #[error("input image data is empty")]
    EmptyInput,

    /// Failed to encode the composited image.
    #[error("failed to encode image: {0}")]
    ImageEncode(String),

    /// The cascade resource could not be parsed.
    #[error("cascade model is corrupt: {0}")]
    Cascade(#[from] CascadeError),

    /// Scan or threshold configuration is invalid.
    #[error("invalid scan configuration: {0}")]
    InvalidScanConfig(String),
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn det(row: u32, col: u32, scale: u32) -> Detection {
        Detection {
            row,
            col,
            scale,
            score: 1.0,
        }
    }

    // --- Detection tests ---

    #[test]
    fn iou_identical_is_one() {
        let d = det(50, 50, 20);
        assert!((d.iou(&d) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn iou_disjoint_is_zero() {
        let a = det(10, 10, 10);
        let b = det(100, 100, 10);
        assert!(a.iou(&b).abs() < f64::EPSILON);
    }

    #[test]
    fn iou_half_shift() {
        // Two 10x10 boxes offset by 5 columns: intersection 50, union 150.
        let a = det(10, 10, 10);
        let b = det(10, 15, 10);
        assert!((a.iou(&b) - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn iou_is_symmetric() {
        let a = det(30, 40, 24);
        let b = det(35, 38, 30);
        assert!((a.iou(&b) - b.iou(&a)).abs() < 1e-12);
    }

    // --- FaceBox tests ---

    #[test]
    fn face_box_extent() {
        let b = FaceBox {
            left: 10,
            top: 20,
            right: 40,
            bottom: 30,
        };
        assert_eq!(b.width(), 30);
        assert_eq!(b.height(), 10);
        assert!(!b.is_empty());
        assert!(b.contains(10, 20));
        assert!(!b.contains(40, 20));
        assert!(!b.contains(10, 30));
    }

    #[test]
    fn face_box_zero_width_is_empty() {
        let b = FaceBox {
            left: 5,
            top: 0,
            right: 5,
            bottom: 10,
        };
        assert!(b.is_empty());
    }

    // --- Config tests ---

    #[test]
    fn pipeline_config_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.scan.min_size, 20);
        assert_eq!(config.scan.max_size, 2000);
        assert!((config.scan.shift_factor - 0.1).abs() < f64::EPSILON);
        assert!((config.scan.scale_factor - 1.1).abs() < f64::EPSILON);
        assert!((config.iou_threshold - 0.18).abs() < f64::EPSILON);
        assert!((config.quality_threshold - 5.0).abs() < f32::EPSILON);
        assert!((config.blur_fraction - 0.1).abs() < f64::EPSILON);
        assert_eq!(config.output_format, OutputFormat::Jpeg);
        assert_eq!(config.jpeg_quality, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn min_size_above_max_size_rejected() {
        let config = PipelineConfig {
            scan: ScanConfig {
                min_size: 300,
                max_size: 200,
                ..ScanConfig::default()
            },
            ..PipelineConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(PipelineError::InvalidScanConfig(_))
        ));
    }

    #[test]
    fn zero_min_size_rejected() {
        let scan = ScanConfig {
            min_size: 0,
            ..ScanConfig::default()
        };
        assert!(scan.validate().is_err());
    }

    #[test]
    fn shift_factor_bounds() {
        for bad in [0.0, -0.5, 1.5, f64::NAN] {
            let scan = ScanConfig {
                shift_factor: bad,
                ..ScanConfig::default()
            };
            assert!(scan.validate().is_err(), "shift_factor {bad} accepted");
        }
        let scan = ScanConfig {
            shift_factor: 1.0,
            ..ScanConfig::default()
        };
        assert!(scan.validate().is_ok());
    }

    #[test]
    fn scale_factor_must_exceed_one() {
        for bad in [1.0, 0.9, f64::INFINITY, f64::NAN] {
            let scan = ScanConfig {
                scale_factor: bad,
                ..ScanConfig::default()
            };
            assert!(scan.validate().is_err(), "scale_factor {bad} accepted");
        }
    }

    #[test]
    fn iou_threshold_bounds() {
        for bad in [0.0, 1.01, -0.2] {
            let config = PipelineConfig {
                iou_threshold: bad,
                ..PipelineConfig::default()
            };
            assert!(config.validate().is_err(), "iou_threshold {bad} accepted");
        }
    }

    #[test]
    fn blur_fraction_bounds() {
        for bad in [-0.1, 1.5, f64::INFINITY, f64::NAN] {
            let config = PipelineConfig {
                blur_fraction: bad,
                ..PipelineConfig::default()
            };
            assert!(config.validate().is_err(), "blur_fraction {bad} accepted");
        }
        for good in [0.0, 1.0] {
            let config = PipelineConfig {
                blur_fraction: good,
                ..PipelineConfig::default()
            };
            assert!(config.validate().is_ok(), "blur_fraction {good} rejected");
        }
    }

    #[test]
    fn jpeg_quality_zero_rejected() {
        let config = PipelineConfig {
            jpeg_quality: 0,
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn error_invalid_scan_config_display() {
        let err = PipelineError::InvalidScanConfig("min_size must be positive".to_owned());
        assert_eq!(
            err.to_string(),
            "invalid scan configuration: min_size must be positive",
        );
    }

    #[test]
    fn pipeline_config_serde_flattens_scan() {
        let config = PipelineConfig::default();
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["min_size"], 20);
        assert_eq!(json["output_format"], "Jpeg");
        let back: PipelineConfig = serde_json::from_value(json).unwrap();
        assert_eq!(config, back);
    }
}
