//! Shared fixtures: synthetic images and hand-built cascades.

#![allow(dead_code, clippy::unwrap_used)]

use faceveil_pipeline::{
    CascadeBuilder, CascadeModel, Node, OutputFormat, RgbaImage, ScoringKind, Tree,
};

/// Side of the square scenario image.
pub const SIDE: u32 = 200;
/// Radius of the bright disk in the scenario image.
pub const DISK_RADIUS: u32 = 40;

/// Black `SIDE` x `SIDE` image with a white disk centered at (100, 100).
pub fn disk_image() -> RgbaImage {
    disk_at(SIDE, SIDE, 100, 100, DISK_RADIUS)
}

/// Black image with a white disk of `radius` centered at (`cx`, `cy`).
pub fn disk_at(width: u32, height: u32, cx: u32, cy: u32, radius: u32) -> RgbaImage {
    let r2 = u64::from(radius) * u64::from(radius);
    RgbaImage::from_fn(width, height, |x, y| {
        let dx = u64::from(x.abs_diff(cx));
        let dy = u64::from(y.abs_diff(cy));
        if dx * dx + dy * dy <= r2 {
            image::Rgba([255, 255, 255, 255])
        } else {
            image::Rgba([0, 0, 0, 255])
        }
    })
}

/// Uniformly black image.
pub fn blank_image(width: u32, height: u32) -> RgbaImage {
    RgbaImage::from_pixel(width, height, image::Rgba([0, 0, 0, 255]))
}

/// Diagonal color ramp with no flat regions.
pub fn textured_image(width: u32, height: u32) -> RgbaImage {
    RgbaImage::from_fn(width, height, |x, y| {
        let v = ((x * 13 + y * 29) % 256) as u8;
        image::Rgba([v, v.wrapping_mul(3), 255 - v, 255])
    })
}

/// Stump that scores +2 when the sample at `inner` is brighter than the
/// sample at `outer`, -2 otherwise.
fn ring_stump(inner: (i8, i8), outer: (i8, i8)) -> Tree {
    Tree::stump(Node::new(inner.0, inner.1, outer.0, outer.1), 2.0, -2.0)
}

/// One stage of four stumps looking for a bright blob whose edge sits
/// between 115/256 and 125/256 of the window side from the center, in
/// all four directions. All four must agree.
///
/// On [`disk_image`] with the default scan only the window of side 86
/// centered on the disk passes.
pub fn disk_model() -> CascadeModel {
    CascadeBuilder::new(ScoringKind::Sum)
        .stage(
            7.0,
            vec![
                ring_stump((-115, 0), (-125, 0)),
                ring_stump((115, 0), (125, 0)),
                ring_stump((0, -115), (0, -125)),
                ring_stump((0, 115), (0, 125)),
            ],
        )
        .build()
        .unwrap()
}

/// Accepts every window with score 10.
pub fn accept_all_model() -> CascadeModel {
    CascadeBuilder::new(ScoringKind::Sum)
        .stage(0.0, vec![Tree::stump(Node::default(), 10.0, 10.0)])
        .build()
        .unwrap()
}

/// Encode an image losslessly.
pub fn png(image: &RgbaImage) -> Vec<u8> {
    faceveil_pipeline::grayscale::encode(image, OutputFormat::Png, 100).unwrap()
}
