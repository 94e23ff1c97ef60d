//! Face cropping and eye-based rotational alignment.
//!
//! Crops the detection box out of the source image and rotates the crop about
//! the midpoint between the eyes so that the eye line becomes horizontal.

use crate::types::{BoundingBox, Detection, Landmarks};
use image::{Rgb, RgbImage};

/// Slice the bounding box region out of `image`.
///
/// Box coordinates are truncated to integers and clamped to the image bounds,
/// so a box partially outside the image yields the overlapping region and a
/// box entirely outside yields an empty crop. Returns the crop and its origin
/// in source coordinates.
pub fn crop_face(image: &RgbImage, bbox: &BoundingBox) -> (RgbImage, (u32, u32)) {
    let (w, h) = image.dimensions();

    let x0 = clamp_coord(bbox.x as i64, w);
    let y0 = clamp_coord(bbox.y as i64, h);
    let x1 = clamp_coord(bbox.x as i64 + bbox.width as i64, w).max(x0);
    let y1 = clamp_coord(bbox.y as i64 + bbox.height as i64, h).max(y0);

    let crop = image::imageops::crop_imm(image, x0, y0, x1 - x0, y1 - y0).to_image();
    (crop, (x0, y0))
}

fn clamp_coord(v: i64, limit: u32) -> u32 {
    v.clamp(0, limit as i64) as u32
}

/// Rotate `crop` so the eyes are level.
///
/// `landmarks` must be in the crop's coordinate frame. If either eye is
/// missing the crop is returned unchanged: alignment never fails.
pub fn align_face(crop: &RgbImage, landmarks: &Landmarks) -> RgbImage {
    let Some((left, right)) = landmarks.eyes() else {
        return crop.clone();
    };
    if crop.width() == 0 || crop.height() == 0 {
        return crop.clone();
    }

    let angle = (right.1 - left.1).atan2(right.0 - left.0).to_degrees();
    let center = ((left.0 + right.0) / 2.0, (left.1 + right.1) / 2.0);
    let matrix = rotation_matrix(center, angle);
    warp_affine(crop, &matrix)
}

/// Crop a detection out of `image` and align it.
pub fn crop_and_align(image: &RgbImage, detection: &Detection) -> RgbImage {
    let (crop, (ox, oy)) = crop_face(image, &detection.bbox);
    let landmarks = detection.landmarks.relative_to(ox as f32, oy as f32);
    align_face(&crop, &landmarks)
}

/// 2×3 matrix rotating by `angle_deg` (counter-clockwise on screen) about
/// `center`, unit scale:
/// ```text
/// |  a  b  (1-a)cx - b cy |
/// | -b  a  b cx + (1-a)cy |
/// ```
/// with a = cos θ, b = sin θ.
fn rotation_matrix(center: (f32, f32), angle_deg: f32) -> [f32; 6] {
    let theta = angle_deg.to_radians();
    let (a, b) = (theta.cos(), theta.sin());
    let (cx, cy) = center;
    [
        a,
        b,
        (1.0 - a) * cx - b * cy,
        -b,
        a,
        b * cx + (1.0 - a) * cy,
    ]
}

/// Apply a 2×3 affine warp, output the same size as the input.
///
/// Uses bilinear interpolation. Out-of-bounds pixels are filled with 0 (black).
fn warp_affine(src: &RgbImage, matrix: &[f32; 6]) -> RgbImage {
    let (width, height) = src.dimensions();
    let (a, b, tx) = (matrix[0], matrix[1], matrix[2]);
    let (c, d, ty) = (matrix[3], matrix[4], matrix[5]);

    let det = a * d - b * c;
    if det.abs() < 1e-12 {
        return RgbImage::new(width, height);
    }
    let inv_det = 1.0 / det;

    let sample = |x: i32, y: i32, ch: usize| -> f32 {
        if x >= 0 && (x as u32) < width && y >= 0 && (y as u32) < height {
            src.get_pixel(x as u32, y as u32)[ch] as f32
        } else {
            0.0
        }
    };

    RgbImage::from_fn(width, height, |ox, oy| {
        // Map output pixel back to source: src = M_inv * (dst - t)
        let dx = ox as f32 - tx;
        let dy = oy as f32 - ty;
        let sx = (d * dx - b * dy) * inv_det;
        let sy = (-c * dx + a * dy) * inv_det;

        let x0 = sx.floor() as i32;
        let y0 = sy.floor() as i32;
        let fx = sx - x0 as f32;
        let fy = sy - y0 as f32;

        let mut px = [0u8; 3];
        for (ch, out) in px.iter_mut().enumerate() {
            let val = sample(x0, y0, ch) * (1.0 - fx) * (1.0 - fy)
                + sample(x0 + 1, y0, ch) * fx * (1.0 - fy)
                + sample(x0, y0 + 1, ch) * (1.0 - fx) * fy
                + sample(x0 + 1, y0 + 1, ch) * fx * fy;
            *out = val.round().clamp(0.0, 255.0) as u8;
        }
        Rgb(px)
    })
}
