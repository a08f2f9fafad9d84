//! Region blur: anonymize face boxes with a stack blur.
//!
//! [`stack_blur_rgba`] is a two-pass (horizontal, then vertical)
//! approximation of a Gaussian. Each pass slides a triangular kernel
//! of radius `r` along a line while maintaining three running sums
//! (total, incoming half, outgoing half), so every output pixel costs a
//! constant number of additions no matter how large the radius is.
//! Lines are extended by repeating their edge pixels. The kernel
//! weights sum to `(r + 1)^2` and the division is exact, so flat
//! regions come out unchanged.
//!
//! [`blur_faces`] applies it to each face box of an owned copy of the
//! image and writes the result back over exactly the box's pixels.
//! [`blur_faces_in_place`] does the same on a canvas the caller owns.

use image::imageops;
use tracing::{debug, warn};

use crate::types::{FaceBox, RgbaImage};

/// RGBA channels blurred per pixel.
const CHANNELS: usize = 4;

/// Blur radius for a box of `width` pixels: `round(width * fraction)`,
/// at least 1.
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn blur_radius(width: u32, fraction: f64) -> u32 {
    let radius = (f64::from(width) * fraction).round();
    if radius >= f64::from(u32::MAX) {
        return u32::MAX;
    }
    (radius as u32).max(1)
}

/// Stack blur every channel of `image` with the given radius.
///
/// A radius of zero returns the image unchanged. Radii beyond the
/// longer side of the image are clamped to it, which bounds the per-line
/// setup work by the line length.
#[must_use = "returns the blurred image"]
pub fn stack_blur_rgba(image: &RgbaImage, radius: u32) -> RgbaImage {
    let mut out = image.clone();
    if radius == 0 || image.width() == 0 || image.height() == 0 {
        return out;
    }

    let width = image.width() as usize;
    let height = image.height() as usize;
    let radius = (radius as usize).min(width.max(height));
    let buf: &mut [u8] = &mut out;

    let mut blur = LineBlur::new(radius);
    for y in 0..height {
        blur.run(buf, width, |x| (y * width + x) * CHANNELS);
    }
    for x in 0..width {
        blur.run(buf, height, |y| (y * width + x) * CHANNELS);
    }
    out
}

/// Blur each face box of a copy of `image`.
///
/// The radius of each box is [`blur_radius`] of its width. Boxes are
/// processed in order, each one reading the canvas as left by the
/// previous ones. Boxes with no area are skipped. Pixels outside every
/// box are copied unchanged.
#[must_use = "returns the anonymized image"]
pub fn blur_faces(image: &RgbaImage, faces: &[FaceBox], fraction: f64) -> RgbaImage {
    let mut canvas = image.clone();
    blur_faces_in_place(&mut canvas, faces, fraction);
    canvas
}

/// [`blur_faces`] on a canvas owned by the caller.
pub fn blur_faces_in_place(canvas: &mut RgbaImage, faces: &[FaceBox], fraction: f64) {
    for face in faces {
        let face = clamp_to(face, canvas.width(), canvas.height());
        if face.is_empty() {
            warn!(?face, "skipping face box with no area");
            continue;
        }

        let region =
            imageops::crop_imm(&*canvas, face.left, face.top, face.width(), face.height())
                .to_image();
        let radius = blur_radius(face.width(), fraction);
        let blurred = stack_blur_rgba(&region, radius);
        imageops::replace(
            &mut *canvas,
            &blurred,
            i64::from(face.left),
            i64::from(face.top),
        );
        debug!(?face, radius, "blurred face region");
    }
}

/// `face` restricted to a `width` x `height` image.
fn clamp_to(face: &FaceBox, width: u32, height: u32) -> FaceBox {
    FaceBox {
        left: face.left.min(width),
        top: face.top.min(height),
        right: face.right.min(width),
        bottom: face.bottom.min(height),
    }
}

/// Reusable state for blurring one line of pixels.
struct LineBlur {
    radius: usize,
    /// Ring buffer of the `2r + 1` pixels under the kernel.
    stack: Vec<[u64; CHANNELS]>,
    /// Blurred copy of the current line.
    line: Vec<[u8; CHANNELS]>,
}

impl LineBlur {
    fn new(radius: usize) -> Self {
        Self {
            radius,
            stack: vec![[0; CHANNELS]; 2 * radius + 1],
            line: Vec::new(),
        }
    }

    /// Blur the `len` pixels whose byte offsets are `index(0..len)`.
    fn run(&mut self, buf: &mut [u8], len: usize, index: impl Fn(usize) -> usize) {
        let r = self.radius;
        let div = 2 * r + 1;
        let weight_sum = (r as u64 + 1) * (r as u64 + 1);
        let last = len - 1;
        let pixel = |buf: &[u8], i: usize| -> [u64; CHANNELS] {
            let at = index(i.min(last));
            std::array::from_fn(|c| u64::from(buf[at + c]))
        };

        let mut sum = [0u64; CHANNELS];
        let mut sum_in = [0u64; CHANNELS];
        let mut sum_out = [0u64; CHANNELS];

        // Left half (and center): the first pixel repeated, weights 1..=r+1.
        let first = pixel(buf, 0);
        for (i, slot) in self.stack.iter_mut().take(r + 1).enumerate() {
            *slot = first;
            let weight = i as u64 + 1;
            for c in 0..CHANNELS {
                sum[c] += first[c] * weight;
                sum_out[c] += first[c];
            }
        }
        // Right half: weights r..=1.
        for i in 1..=r {
            let p = pixel(buf, i);
            self.stack[r + i] = p;
            let weight = (r + 1 - i) as u64;
            for c in 0..CHANNELS {
                sum[c] += p[c] * weight;
                sum_in[c] += p[c];
            }
        }

        self.line.clear();
        let mut oldest = 0;
        let mut center = r;
        for x in 0..len {
            #[allow(clippy::cast_possible_truncation)]
            self.line
                .push(std::array::from_fn(|c| (sum[c] / weight_sum) as u8));

            // Drop the outgoing half's weight and the oldest pixel.
            let incoming = pixel(buf, x + r + 1);
            for c in 0..CHANNELS {
                sum[c] -= sum_out[c];
                sum_out[c] -= self.stack[oldest][c];
                sum_in[c] += incoming[c];
                sum[c] += sum_in[c];
            }
            self.stack[oldest] = incoming;
            oldest = (oldest + 1) % div;

            // The pixel right of center crosses over to the outgoing half.
            center = (center + 1) % div;
            let crossing = self.stack[center];
            for c in 0..CHANNELS {
                sum_out[c] += crossing[c];
                sum_in[c] -= crossing[c];
            }
        }

        for (i, value) in self.line.iter().enumerate() {
            let at = index(i);
            buf[at..at + CHANNELS].copy_from_slice(value);
        }
    }
}
