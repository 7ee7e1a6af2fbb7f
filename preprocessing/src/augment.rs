use ndarray::{Array2, s};
use rand::Rng;

use crate::resize::resize_planar;

/// Random perturbations applied to planar training images.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AugmentConfig {
    /// Maximum absolute rotation in degrees.
    pub rotation_range: f32,
    /// Zoom factors are drawn from `[1 - zoom_range, 1 + zoom_range]`.
    pub zoom_range: f32,
    /// Mirror left to right with probability one half.
    pub flip_horizontal: bool,
}

impl Default for AugmentConfig {
    fn default() -> Self {
        Self {
            rotation_range: 10.,
            zoom_range: 0.1,
            flip_horizontal: true,
        }
    }
}

/// Applies a random rotation, zoom and horizontal flip to an image.
///
/// The output always has the input's shape; uncovered pixels are zero.
///
/// # Arguments
/// * `image` - The image to perturb.
/// * `config` - The perturbation ranges.
/// * `rng` - The random source.
///
/// # Returns
/// The augmented image.
pub fn augment<R: Rng>(image: &Array2<f32>, config: &AugmentConfig, rng: &mut R) -> Array2<f32> {
    let mut image = image.clone();

    if config.rotation_range > 0. {
        let angle = rng.random_range(-config.rotation_range..=config.rotation_range);
        image = rotate(&image, angle);
    }

    if config.zoom_range > 0. {
        let factor = rng.random_range(1. - config.zoom_range..=1. + config.zoom_range);
        image = zoom(&image, factor);
    }

    if config.flip_horizontal && rng.random_bool(0.5) {
        image = image.slice(s![.., ..;-1]).to_owned();
    }

    image
}

/// Rotates counter-clockwise about the integer centre `(h / 2, w / 2)`.
///
/// # Arguments
/// * `image` - The image to rotate.
/// * `degrees` - The rotation angle.
///
/// # Returns
/// The rotated image, sampled bilinearly with zero fill.
pub fn rotate(image: &Array2<f32>, degrees: f32) -> Array2<f32> {
    let (h, w) = image.dim();
    let (cy, cx) = ((h / 2) as f32, (w / 2) as f32);
    let (sin, cos) = degrees.to_radians().sin_cos();

    Array2::from_shape_fn((h, w), |(y, x)| {
        let (dx, dy) = (x as f32 - cx, y as f32 - cy);
        let sx = cos * dx - sin * dy + cx;
        let sy = sin * dx + cos * dy + cy;
        bilinear(image, sy, sx)
    })
}

/// Rescales by `factor` and crops or zero pads back to the original size,
/// keeping the content centred.
///
/// # Arguments
/// * `image` - The image to zoom.
/// * `factor` - Values above one zoom in.
///
/// # Returns
/// An image with the same shape as the input.
pub fn zoom(image: &Array2<f32>, factor: f32) -> Array2<f32> {
    let (h, w) = image.dim();
    let new_h = ((h as f32 * factor) as usize).max(1);
    let new_w = ((w as f32 * factor) as usize).max(1);

    let Ok(scaled) = resize_planar(image, new_h, new_w) else {
        return image.clone();
    };

    let (src_y, dst_y, len_y) = overlap(new_h, h);
    let (src_x, dst_x, len_x) = overlap(new_w, w);

    let mut out = Array2::zeros((h, w));
    out.slice_mut(s![dst_y..dst_y + len_y, dst_x..dst_x + len_x])
        .assign(&scaled.slice(s![src_y..src_y + len_y, src_x..src_x + len_x]));
    out
}

/// Offsets into the scaled and the original axis plus the shared length.
fn overlap(scaled: usize, original: usize) -> (usize, usize, usize) {
    if scaled >= original {
        ((scaled - original) / 2, 0, original)
    } else {
        (0, (original - scaled) / 2, scaled)
    }
}

fn bilinear(image: &Array2<f32>, y: f32, x: f32) -> f32 {
    let (h, w) = image.dim();
    let (y0, x0) = (y.floor(), x.floor());
    let (ty, tx) = (y - y0, x - x0);

    let at = |yy: f32, xx: f32| {
        if yy < 0. || xx < 0. || yy >= h as f32 || xx >= w as f32 {
            0.
        } else {
            image[[yy as usize, xx as usize]]
        }
    };

    let top = at(y0, x0) * (1. - tx) + at(y0, x0 + 1.) * tx;
    let bottom = at(y0 + 1., x0) * (1. - tx) + at(y0 + 1., x0 + 1.) * tx;
    top * (1. - ty) + bottom * ty
}

#[cfg(test)]
mod tests {
    use ndarray::array;
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    #[test]
    fn zero_rotation_is_identity() {
        let image = array![[1., 2., 3.], [4., 5., 6.]];
        assert_eq!(rotate(&image, 0.), image);
    }

    #[test]
    fn quarter_turn_moves_pixels_around_the_centre() {
        let mut image = Array2::zeros((3, 3));
        image[[1, 2]] = 1.;

        let rotated = rotate(&image, 90.);

        // the pixel right of the centre ends up above it
        assert!((rotated[[0, 1]] - 1.).abs() < 1e-5);
        assert!(rotated[[1, 2]].abs() < 1e-5);
    }

    #[test]
    fn zoom_out_pads_with_zeros() {
        let image = Array2::from_elem((10, 10), 1.);
        let zoomed = zoom(&image, 0.8);

        assert_eq!(zoomed.dim(), (10, 10));
        assert_eq!(zoomed[[0, 0]], 0.);
        assert_eq!(zoomed[[5, 5]], 1.);
        assert_eq!(zoomed.sum(), 64.);
    }

    #[test]
    fn zoom_in_crops_the_centre() {
        let image = Array2::from_shape_fn((4, 4), |(y, x)| (y * 4 + x) as f32);
        let zoomed = zoom(&image, 2.);

        assert_eq!(zoomed.dim(), (4, 4));
        let original_centre = image.slice(s![1..3, 1..3]).mean().unwrap();
        assert!((zoomed.mean().unwrap() - original_centre).abs() < 1.);
    }

    #[test]
    fn augmented_image_keeps_shape_and_range() {
        let mut rng = StdRng::seed_from_u64(7);
        let image = Array2::from_shape_fn((16, 12), |(y, x)| ((y + x) % 5) as f32 / 4.);

        for _ in 0..10 {
            let out = augment(&image, &AugmentConfig::default(), &mut rng);
            assert_eq!(out.dim(), (16, 12));
            assert!(out.iter().all(|&v| (-1e-6..=1. + 1e-6).contains(&v)));
        }
    }

    #[test]
    fn disabled_augmentation_is_identity() {
        let mut rng = StdRng::seed_from_u64(0);
        let image = array![[0.1, 0.2], [0.3, 0.4]];
        let config = AugmentConfig {
            rotation_range: 0.,
            zoom_range: 0.,
            flip_horizontal: false,
        };

        assert_eq!(augment(&image, &config, &mut rng), image);
    }
}
