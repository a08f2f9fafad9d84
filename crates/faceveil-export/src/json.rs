//! JSON response serializer.
//!
//! Shape:
//!
//! ```json
//! {
//!   "faces": [{ "left": 57, "top": 57, "right": 143, "bottom": 143 }],
//!   "width": 200,
//!   "height": 200,
//!   "image": "<base64>"
//! }
//! ```
//!
//! `image` is present only when the result carries an encoded image.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use faceveil_pipeline::{DetectionResult, FaceBox};
use serde::{Deserialize, Serialize};

use crate::{ExportError, OutputMode};

/// Serialized form of a [`DetectionResult`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FacesResponse {
    /// Accepted face boxes.
    pub faces: Vec<FaceBox>,
    /// Source image width in pixels.
    pub width: u32,
    /// Source image height in pixels.
    pub height: u32,
    /// Standard base64 of the encoded anonymized image.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl FacesResponse {
    /// Build the response, attaching the image only if `with_image`.
    #[must_use]
    pub fn new(result: &DetectionResult, with_image: bool) -> Self {
        Self {
            faces: result.faces.clone(),
            width: result.dimensions.width,
            height: result.dimensions.height,
            image: with_image
                .then_some(result.image.as_deref())
                .flatten()
                .map(|bytes| STANDARD.encode(bytes)),
        }
    }
}

/// Serialize a result to JSON, including the image when present.
///
/// # Errors
///
/// Returns [`ExportError::Json`] if serialization fails.
pub fn to_json(result: &DetectionResult) -> Result<String, ExportError> {
    Ok(serde_json::to_string(&FacesResponse::new(result, true))?)
}

/// Produce the response body for `mode`.
///
/// # Errors
///
/// Returns [`ExportError::MissingImage`] if `mode` needs an image and
/// `result` has none, or [`ExportError::Json`] if serialization fails.
pub fn render(result: &DetectionResult, mode: OutputMode) -> Result<Vec<u8>, ExportError> {
    match mode {
        OutputMode::Image => result
            .image
            .clone()
            .ok_or(ExportError::MissingImage(mode)),
        OutputMode::Json => Ok(serde_json::to_vec(&FacesResponse::new(result, false))?),
        OutputMode::JsonImage => {
            if result.image.is_none() {
                return Err(ExportError::MissingImage(mode));
            }
            Ok(to_json(result)?.into_bytes())
        }
    }
}
