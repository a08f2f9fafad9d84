//! Quality gate: turn clustered detections into clamped face boxes.

use tracing::debug;

use crate::types::{Detection, Dimensions, FaceBox};

/// Box `center ± scale/2` of a detection, clamped to the image.
///
/// Half the scale is taken with integer division, so odd scales lose
/// a pixel on each side.
#[must_use]
pub fn face_box(detection: &Detection, dimensions: Dimensions) -> FaceBox {
    let half = i64::from(detection.scale / 2);
    let row = i64::from(detection.row);
    let col = i64::from(detection.col);
    let clamp = |v: i64, max: u32| u32::try_from(v.clamp(0, i64::from(max))).unwrap_or(max);

    FaceBox {
        left: clamp(col - half, dimensions.width),
        top: clamp(row - half, dimensions.height),
        right: clamp(col + half, dimensions.width),
        bottom: clamp(row + half, dimensions.height),
    }
}

/// Keep detections scoring strictly above `quality_threshold` and
/// convert them to clamped boxes.
///
/// Boxes left with no area after clamping are dropped.
#[must_use]
pub fn accepted_faces(
    detections: &[Detection],
    quality_threshold: f32,
    dimensions: Dimensions,
) -> Vec<FaceBox> {
    let faces: Vec<FaceBox> = detections
        .iter()
        .filter(|d| d.score > quality_threshold)
        .map(|d| face_box(d, dimensions))
        .filter(|b| !b.is_empty())
        .collect();

    debug!(
        candidates = detections.len(),
        accepted = faces.len(),
        quality_threshold,
        "quality gate applied"
    );
    faces
}
