//! Incremental pipeline: advance stage-by-stage, inspecting each
//! intermediate result before continuing.
//!
//! Unlike [`crate::process`] which runs the entire pipeline in one
//! call, [`Pipeline`] lets the caller drive execution one step at a time:
//!
//! ```rust
//! # use faceveil_pipeline::{CascadeModel, Pipeline, PipelineConfig, PipelineError};
//! # fn run(png: Vec<u8>, model: &CascadeModel) -> Result<(), PipelineError> {
//! let config = PipelineConfig::default();
//! let blurred = Pipeline::new(png, config)
//!     .decode()?
//!     .grayscale()
//!     .scan(model)?
//!     .cluster()
//!     .gate()
//!     .blur();
//!
//! let result = blurred.encode()?;
//! # Ok(())
//! # }
//! ```
//!
//! Each stage method consumes `self` and returns the next pipeline state
//! (or `Result` for fallible stages), carrying everything later stages
//! still need. The configuration is validated when decoding starts, so
//! an invalid config never reaches the scan.

use tracing::{debug, info};

use crate::diagnostics::StageMetrics;
use crate::types::{
    Anonymized, Detection, DetectionResult, Dimensions, FaceBox, GrayImage, PipelineConfig,
    PipelineError, RgbaImage,
};
use crate::{CascadeModel, ImageParams};

// ───────────────────────── Stage 0: Pending ──────────────────────────

/// Pipeline state before any processing has occurred.
///
/// Call [`decode`](Self::decode) to advance to the next stage.
#[must_use = "pipeline stages are consumed by advancing, call .decode() to continue"]
pub struct Pending {
    config: PipelineConfig,
    source: Vec<u8>,
}

impl Pending {
    /// The raw source image bytes.
    #[must_use]
    pub fn source(&self) -> &[u8] {
        &self.source
    }

    /// Validate the configuration, decode the source image and advance
    /// to the [`Decoded`] stage.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidScanConfig`] if the configuration
    /// is invalid, [`PipelineError::EmptyInput`] if the source bytes are
    /// empty and [`PipelineError::ImageDecode`] if the image format is
    /// unrecognized or the data is corrupt.
    pub fn decode(self) -> Result<Decoded, PipelineError> {
        self.config.validate()?;
        let source_len = self.source.len();
        let original = crate::grayscale::decode(&self.source)?;
        debug!(
            width = original.width(),
            height = original.height(),
            source_len,
            "decoded image"
        );
        Ok(Decoded {
            config: self.config,
            original,
            source_len,
        })
    }
}

// ───────────────────────── Stage 1: Decoded ──────────────────────────

/// Pipeline state after decoding the source image to RGBA.
#[must_use = "pipeline stages are consumed by advancing, call .grayscale() to continue"]
pub struct Decoded {
    config: PipelineConfig,
    original: RgbaImage,
    source_len: usize,
}

impl Decoded {
    /// The decoded RGBA image.
    #[must_use]
    pub const fn original(&self) -> &RgbaImage {
        &self.original
    }

    /// Image dimensions in pixels.
    #[must_use]
    pub fn dimensions(&self) -> Dimensions {
        dimensions_of(&self.original)
    }

    /// Derive the luma grid the detector reads.
    pub fn grayscale(self) -> Grayscaled {
        let gray = crate::grayscale::to_grayscale(&self.original);
        Grayscaled {
            config: self.config,
            original: self.original,
            gray,
        }
    }
}

// ───────────────────────── Stage 2: Grayscaled ───────────────────────

/// Pipeline state after grayscale conversion.
#[must_use = "pipeline stages are consumed by advancing, call .scan() to continue"]
pub struct Grayscaled {
    config: PipelineConfig,
    original: RgbaImage,
    gray: GrayImage,
}

impl Grayscaled {
    /// The luma grid.
    #[must_use]
    pub const fn gray(&self) -> &GrayImage {
        &self.gray
    }

    /// Run the multiscale cascade scan.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidScanConfig`] if the scan
    /// configuration is invalid.
    pub fn scan(self, model: &CascadeModel) -> Result<Scanned, PipelineError> {
        let params = ImageParams::from_gray(&self.gray);
        let raw = crate::detect::scan(model, &params, &self.config.scan)?;
        let windows = crate::detect::window_count(
            self.gray.width(),
            self.gray.height(),
            &self.config.scan,
        );
        Ok(Scanned {
            config: self.config,
            original: self.original,
            raw,
            windows,
        })
    }
}

// ───────────────────────── Stage 3: Scanned ──────────────────────────

/// Pipeline state after the scan: every window that passed the cascade.
#[must_use = "pipeline stages are consumed by advancing, call .cluster() to continue"]
pub struct Scanned {
    config: PipelineConfig,
    original: RgbaImage,
    raw: Vec<Detection>,
    windows: u64,
}

impl Scanned {
    /// Raw detections in scan order.
    #[must_use]
    pub fn raw(&self) -> &[Detection] {
        &self.raw
    }

    /// Number of windows the scan evaluated.
    #[must_use]
    pub const fn windows(&self) -> u64 {
        self.windows
    }

    /// Merge overlapping detections.
    pub fn cluster(self) -> Clustered {
        let clustered = crate::cluster::cluster_detections(&self.raw, self.config.iou_threshold);
        Clustered {
            config: self.config,
            original: self.original,
            raw_count: self.raw.len(),
            clustered,
        }
    }
}

// ───────────────────────── Stage 4: Clustered ────────────────────────

/// Pipeline state after clustering.
#[must_use = "pipeline stages are consumed by advancing, call .gate() to continue"]
pub struct Clustered {
    config: PipelineConfig,
    original: RgbaImage,
    raw_count: usize,
    clustered: Vec<Detection>,
}

impl Clustered {
    /// One detection per cluster, with summed scores.
    #[must_use]
    pub fn clustered(&self) -> &[Detection] {
        &self.clustered
    }

    /// Keep confident clusters and convert them to face boxes.
    pub fn gate(self) -> Gated {
        let faces = crate::face::accepted_faces(
            &self.clustered,
            self.config.quality_threshold,
            dimensions_of(&self.original),
        );
        info!(faces = faces.len(), "faces detected");
        Gated {
            config: self.config,
            original: self.original,
            candidates: self.clustered.len(),
            faces,
        }
    }
}

// ───────────────────────── Stage 5: Gated ────────────────────────────

/// Pipeline state after the quality gate: the final face boxes.
#[must_use = "pipeline stages are consumed by advancing, call .blur() to continue"]
pub struct Gated {
    config: PipelineConfig,
    original: RgbaImage,
    candidates: usize,
    faces: Vec<FaceBox>,
}

impl Gated {
    /// Accepted face boxes.
    #[must_use]
    pub fn faces(&self) -> &[FaceBox] {
        &self.faces
    }

    /// Stop here and keep only the boxes.
    #[must_use]
    pub fn into_faces(self) -> Vec<FaceBox> {
        self.faces
    }

    /// Blur every face box. The decoded image becomes the canvas.
    pub fn blur(self) -> Blurred {
        let mut canvas = self.original;
        crate::blur::blur_faces_in_place(&mut canvas, &self.faces, self.config.blur_fraction);
        Blurred {
            config: self.config,
            canvas,
            faces: self.faces,
        }
    }
}

// ───────────────────────── Stage 6: Blurred ──────────────────────────

/// Final pipeline state: faces plus the anonymized canvas.
#[must_use = "call .encode() or .into_anonymized() to take the result"]
pub struct Blurred {
    config: PipelineConfig,
    canvas: RgbaImage,
    faces: Vec<FaceBox>,
}

impl Blurred {
    /// Accepted face boxes.
    #[must_use]
    pub fn faces(&self) -> &[FaceBox] {
        &self.faces
    }

    /// The anonymized image.
    #[must_use]
    pub const fn canvas(&self) -> &RgbaImage {
        &self.canvas
    }

    /// Take the faces and canvas without encoding.
    #[must_use]
    pub fn into_anonymized(self) -> Anonymized {
        Anonymized {
            faces: self.faces,
            image: self.canvas,
        }
    }

    /// Encode the canvas in the configured output format.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::ImageEncode`] if the encoder fails.
    pub fn encode(self) -> Result<DetectionResult, PipelineError> {
        let image = crate::grayscale::encode(
            &self.canvas,
            self.config.output_format,
            self.config.jpeg_quality,
        )?;
        Ok(DetectionResult {
            dimensions: dimensions_of(&self.canvas),
            faces: self.faces,
            image: Some(image),
        })
    }
}

fn dimensions_of(image: &RgbaImage) -> Dimensions {
    Dimensions {
        width: image.width(),
        height: image.height(),
    }
}

// ───────────────────────── Stage metadata ────────────────────────────

/// Implemented by every stage that has done work, so diagnostics can
/// name it and collect its metrics uniformly.
pub trait PipelineStage {
    /// Human-readable name of this stage (e.g. `"decode"`, `"scan"`).
    const NAME: &str;

    /// Metrics describing the work done to reach this state.
    fn metrics(&self) -> StageMetrics;
}

impl PipelineStage for Decoded {
    const NAME: &str = "decode";

    fn metrics(&self) -> StageMetrics {
        StageMetrics::Decode {
            input_bytes: self.source_len,
            width: self.original.width(),
            height: self.original.height(),
            pixel_count: u64::from(self.original.width()) * u64::from(self.original.height()),
        }
    }
}

impl PipelineStage for Grayscaled {
    const NAME: &str = "grayscale";

    fn metrics(&self) -> StageMetrics {
        StageMetrics::Grayscale {
            width: self.gray.width(),
            height: self.gray.height(),
        }
    }
}

impl PipelineStage for Scanned {
    const NAME: &str = "scan";

    fn metrics(&self) -> StageMetrics {
        StageMetrics::Scan {
            scales: crate::detect::scale_count(
                self.original.width(),
                self.original.height(),
                &self.config.scan,
            ),
            windows: self.windows,
            raw_detections: self.raw.len(),
        }
    }
}

impl PipelineStage for Clustered {
    const NAME: &str = "cluster";

    fn metrics(&self) -> StageMetrics {
        StageMetrics::Cluster {
            iou_threshold: self.config.iou_threshold,
            input_count: self.raw_count,
            cluster_count: self.clustered.len(),
        }
    }
}

impl PipelineStage for Gated {
    const NAME: &str = "gate";

    fn metrics(&self) -> StageMetrics {
        StageMetrics::Gate {
            quality_threshold: self.config.quality_threshold,
            candidate_count: self.candidates,
            face_count: self.faces.len(),
        }
    }
}

impl PipelineStage for Blurred {
    const NAME: &str = "blur";

    fn metrics(&self) -> StageMetrics {
        StageMetrics::Blur {
            blur_fraction: self.config.blur_fraction,
            face_count: self.faces.len(),
            blurred_pixels: self
                .faces
                .iter()
                .map(|f| u64::from(f.width()) * u64::from(f.height()))
                .sum(),
        }
    }
}

/// Entry point for the step-by-step pipeline.
///
/// Each stage method consumes the current state and returns the next,
/// making it a compile-time error to skip stages or call them out of
/// order.
pub struct Pipeline;

impl Pipeline {
    /// Create a new pipeline from source image bytes and config.
    ///
    /// No processing is performed until [`.decode()`](Pending::decode).
    #[allow(clippy::new_ret_no_self)]
    pub const fn new(image_bytes: Vec<u8>, config: PipelineConfig) -> Pending {
        Pending {
            config,
            source: image_bytes,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::cascade::{CascadeBuilder, Node, Tree};
    use crate::scoring::ScoringKind;
    use crate::types::OutputFormat;

    /// Left half black, right half white.
    fn sharp_edge_png(width: u32, height: u32) -> Vec<u8> {
        let img = RgbaImage::from_fn(width, height, |x, _y| {
            if x < width / 2 {
                image::Rgba([0, 0, 0, 255])
            } else {
                image::Rgba([255, 255, 255, 255])
            }
        });
        crate::grayscale::encode(&img, OutputFormat::Png, 100).unwrap()
    }

    /// Accepts every window with score 10.
    fn accept_all() -> CascadeModel {
        CascadeBuilder::new(ScoringKind::Sum)
            .stage(0.0, vec![Tree::stump(Node::new(0, 0, 0, 0), 10.0, 10.0)])
            .build()
            .unwrap()
    }

    /// Rejects every window.
    fn reject_all() -> CascadeModel {
        CascadeBuilder::new(ScoringKind::Sum)
            .stage(1.0, vec![Tree::stump(Node::new(0, 0, 0, 0), 0.0, 0.0)])
            .build()
            .unwrap()
    }

    fn png_config() -> PipelineConfig {
        PipelineConfig {
            output_format: OutputFormat::Png,
            ..PipelineConfig::default()
        }
    }

    #[test]
    fn pending_exposes_source_bytes() {
        let png = sharp_edge_png(20, 20);
        let expected_len = png.len();
        let pending = Pipeline::new(png, PipelineConfig::default());
        assert_eq!(pending.source().len(), expected_len);
    }

    #[test]
    fn decode_empty_input_returns_error() {
        let result = Pipeline::new(vec![], PipelineConfig::default()).decode();
        assert!(matches!(result, Err(PipelineError::EmptyInput)));
    }

    #[test]
    fn decode_corrupt_input_returns_error() {
        let result = Pipeline::new(vec![0xFF, 0x00], PipelineConfig::default()).decode();
        assert!(matches!(result, Err(PipelineError::ImageDecode(_))));
    }

    #[test]
    fn invalid_config_rejected_before_decode() {
        let config = PipelineConfig {
            iou_threshold: 0.0,
            ..PipelineConfig::default()
        };
        let result = Pipeline::new(vec![], config).decode();
        assert!(matches!(result, Err(PipelineError::InvalidScanConfig(_))));
    }

    #[test]
    fn decoded_exposes_original() {
        let decoded = Pipeline::new(sharp_edge_png(20, 30), PipelineConfig::default())
            .decode()
            .unwrap();
        assert_eq!(
            decoded.dimensions(),
            Dimensions {
                width: 20,
                height: 30
            }
        );
        assert_eq!(decoded.original().get_pixel(19, 0).0, [255, 255, 255, 255]);
    }

    #[test]
    fn grayscaled_exposes_luma() {
        let gray = Pipeline::new(sharp_edge_png(20, 20), PipelineConfig::default())
            .decode()
            .unwrap()
            .grayscale();
        assert_eq!(gray.gray().get_pixel(0, 0).0[0], 0);
        assert_eq!(gray.gray().get_pixel(19, 0).0[0], 255);
    }

    #[test]
    fn reject_all_model_finds_nothing() {
        let png = sharp_edge_png(40, 40);
        let gated = Pipeline::new(png, png_config())
            .decode()
            .unwrap()
            .grayscale()
            .scan(&reject_all())
            .unwrap()
            .cluster()
            .gate();
        assert!(gated.faces().is_empty());
    }

    #[test]
    fn accept_all_model_reports_every_window() {
        let png = sharp_edge_png(40, 40);
        let scanned = Pipeline::new(png, png_config())
            .decode()
            .unwrap()
            .grayscale()
            .scan(&accept_all())
            .unwrap();
        assert_eq!(scanned.raw().len() as u64, scanned.windows());
        assert!(scanned.windows() > 0);

        let clustered = scanned.cluster();
        assert!(!clustered.clustered().is_empty());
        assert!(clustered.clustered().len() < clustered.raw_count);
    }

    #[test]
    fn blurred_stage_blurs_decoded_image_in_place() {
        let png = sharp_edge_png(40, 40);
        let decoded = crate::grayscale::decode(&png).unwrap();
        let blurred = Pipeline::new(png, png_config())
            .decode()
            .unwrap()
            .grayscale()
            .scan(&accept_all())
            .unwrap()
            .cluster()
            .gate()
            .blur();
        assert!(!blurred.faces().is_empty());
        assert_ne!(*blurred.canvas(), decoded);
        let expected =
            crate::blur::blur_faces(&decoded, blurred.faces(), png_config().blur_fraction);
        assert_eq!(*blurred.canvas(), expected);
    }

    #[test]
    fn encode_produces_decodable_png() {
        let png = sharp_edge_png(24, 24);
        let result = Pipeline::new(png.clone(), png_config())
            .decode()
            .unwrap()
            .grayscale()
            .scan(&reject_all())
            .unwrap()
            .cluster()
            .gate()
            .blur()
            .encode()
            .unwrap();
        assert!(result.faces.is_empty());
        let image = result.image.unwrap();
        assert_eq!(
            crate::grayscale::decode(&image).unwrap(),
            crate::grayscale::decode(&png).unwrap()
        );
    }

    #[test]
    fn stage_metrics_report_counts() {
        let gated = Pipeline::new(sharp_edge_png(40, 40), png_config())
            .decode()
            .unwrap()
            .grayscale()
            .scan(&accept_all())
            .unwrap()
            .cluster()
            .gate();
        assert!(matches!(
            gated.metrics(),
            StageMetrics::Gate {
                candidate_count,
                face_count,
                ..
            } if candidate_count == face_count && face_count > 0
        ));
        assert_eq!(Gated::NAME, "gate");
    }
}
