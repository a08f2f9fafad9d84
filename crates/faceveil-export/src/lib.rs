//! faceveil-export: Pure response serializers (sans-IO)
//!
//! Turns a [`DetectionResult`](faceveil_pipeline::DetectionResult) into
//! the bytes a caller sends back: the encoded image itself, or a JSON
//! document listing the faces with the image attached as base64.

pub mod json;
pub mod mode;

pub use json::{FacesResponse, render, to_json};
pub use mode::OutputMode;

/// Errors produced while serializing a response.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    /// The output mode string is not one of `json`, `image`, `json_image`.
    #[error("unknown output mode {0:?}, expected json, image or json_image")]
    UnknownOutputMode(String),

    /// The requested mode needs an image but the result carries none.
    #[error("output mode {0} requires an encoded image")]
    MissingImage(OutputMode),

    /// JSON serialization failed.
    #[error("failed to serialize response: {0}")]
    Json(#[from] serde_json::Error),
}
