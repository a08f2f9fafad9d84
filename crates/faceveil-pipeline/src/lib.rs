//! faceveil-pipeline: face detection and anonymization (sans-IO).
//!
//! Finds faces in a still image with a binary-cascade detector and
//! blurs them out:
//! decode -> grayscale -> multiscale scan -> overlap clustering ->
//! quality gate -> region blur -> encode.
//!
//! This crate has **no I/O dependencies**: it operates on in-memory
//! byte slices and returns structured data. Reading files, loading the
//! cascade resource and writing output live in `faceveil-cli`.

pub mod blur;
pub mod cascade;
pub mod cluster;
pub mod detect;
pub mod diagnostics;
pub mod face;
pub mod grayscale;
pub mod mark;
pub mod pipeline;
pub mod scoring;
pub mod types;

pub use cascade::{CascadeBuilder, CascadeError, CascadeModel, Node, SharedCascade, Tree};
pub use detect::ImageParams;
pub use pipeline::Pipeline;
pub use scoring::{ScoringKind, StageScoring};
pub use types::{
    Anonymized, Detection, DetectionResult, Dimensions, FaceBox, GrayImage, OutputFormat,
    PipelineConfig, PipelineError, RgbaImage, ScanConfig,
};

/// Detect faces in a decoded image and blur them.
///
/// Returns the accepted face boxes together with an owned copy of
/// `image` in which every box has been blurred. Pixels outside the
/// boxes are unchanged. An image without faces comes back identical.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidScanConfig`] if `config` is invalid.
pub fn detect_and_blur(
    image: &RgbaImage,
    model: &CascadeModel,
    config: &PipelineConfig,
) -> Result<Anonymized, PipelineError> {
    let faces = detect_faces(image, model, config)?;
    let image = blur::blur_faces(image, &faces, config.blur_fraction);
    Ok(Anonymized { faces, image })
}

/// Detect faces in a decoded image without modifying it.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidScanConfig`] if `config` is invalid.
pub fn detect_faces(
    image: &RgbaImage,
    model: &CascadeModel,
    config: &PipelineConfig,
) -> Result<Vec<FaceBox>, PipelineError> {
    config.validate()?;
    let dimensions = Dimensions {
        width: image.width(),
        height: image.height(),
    };

    let gray = grayscale::to_grayscale(image);
    let raw = detect::scan(model, &ImageParams::from_gray(&gray), &config.scan)?;
    let clustered = cluster::cluster_detections(&raw, config.iou_threshold);
    let faces = face::accepted_faces(&clustered, config.quality_threshold, dimensions);

    tracing::info!(
        width = dimensions.width,
        height = dimensions.height,
        faces = faces.len(),
        "face detection complete"
    );
    Ok(faces)
}

/// Run the full pipeline on encoded image bytes.
///
/// # Pipeline steps
///
/// 1. Validate the config and decode the image
/// 2. Grayscale conversion (Rec. 709 luma)
/// 3. Multiscale cascade scan
/// 4. Overlap clustering
/// 5. Quality gate and box clamping
/// 6. Stack blur of every accepted box
/// 7. Encode in the configured output format
///
/// # Errors
///
/// Returns [`PipelineError::EmptyInput`] if `image_bytes` is empty,
/// [`PipelineError::ImageDecode`] if the format is unrecognized,
/// [`PipelineError::InvalidScanConfig`] if `config` is invalid and
/// [`PipelineError::ImageEncode`] if the output cannot be encoded.
pub fn process(
    image_bytes: &[u8],
    model: &CascadeModel,
    config: &PipelineConfig,
) -> Result<DetectionResult, PipelineError> {
    Pipeline::new(image_bytes.to_vec(), config.clone())
        .decode()?
        .grayscale()
        .scan(model)?
        .cluster()
        .gate()
        .blur()
        .encode()
}

/// Decode and detect only: face boxes without a blurred image.
///
/// # Errors
///
/// Same as [`process`], minus encoding errors.
pub fn process_faces(
    image_bytes: &[u8],
    model: &CascadeModel,
    config: &PipelineConfig,
) -> Result<DetectionResult, PipelineError> {
    let decoded = Pipeline::new(image_bytes.to_vec(), config.clone()).decode()?;
    let dimensions = decoded.dimensions();
    let faces = decoded
        .grayscale()
        .scan(model)?
        .cluster()
        .gate()
        .into_faces();
    Ok(DetectionResult {
        faces,
        image: None,
        dimensions,
    })
}
