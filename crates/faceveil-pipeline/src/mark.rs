//! Face outlines for inspecting detections.

use image::Rgba;
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

use crate::types::{FaceBox, RgbaImage};

/// Default outline color (opaque red).
pub const OUTLINE_COLOR: Rgba<u8> = Rgba([255, 0, 0, 255]);

/// Copy of `image` with a one-pixel hollow rectangle drawn along the
/// inside edge of every face box.
///
/// Boxes with no area are skipped.
#[must_use = "returns the marked image"]
pub fn outline_faces(image: &RgbaImage, faces: &[FaceBox], color: Rgba<u8>) -> RgbaImage {
    let mut canvas = image.clone();
    for face in faces.iter().filter(|f| !f.is_empty()) {
        let (Ok(x), Ok(y)) = (i32::try_from(face.left), i32::try_from(face.top)) else {
            continue;
        };
        let rect = Rect::at(x, y).of_size(face.width(), face.height());
        draw_hollow_rect_mut(&mut canvas, rect, color);
    }
    canvas
}
