use ndarray::{Array, Array2, Array3, ArrayView, Axis, RemoveAxis, Zip};

use crate::error::{PreprocessErr, Result};

/// Resizes an image with bilinear interpolation.
///
/// # Arguments
/// * `image` - The `height × width` image.
/// * `height` - The output height.
/// * `width` - The output width.
///
/// # Returns
/// The resized image.
pub fn resize_planar(image: &Array2<f32>, height: usize, width: usize) -> Result<Array2<f32>> {
    resize(image.view(), &[height, width])
}

/// Resizes a volume with trilinear interpolation.
///
/// # Arguments
/// * `volume` - The `height × width × depth` volume.
/// * `dims` - The output `(height, width, depth)`.
///
/// # Returns
/// The resized volume.
pub fn resize_volume(volume: &Array3<f32>, dims: (usize, usize, usize)) -> Result<Array3<f32>> {
    resize(volume.view(), &[dims.0, dims.1, dims.2])
}

/// Linear interpolation applied one axis at a time.
fn resize<D: RemoveAxis>(src: ArrayView<f32, D>, dims: &[usize]) -> Result<Array<f32, D>> {
    if dims.len() != src.ndim() {
        return Err(PreprocessErr::InvalidShape(format!(
            "can't resize a rank {} array to {dims:?}",
            src.ndim()
        )));
    }

    if dims.contains(&0) || src.shape().contains(&0) {
        return Err(PreprocessErr::InvalidShape(format!(
            "can't resize {:?} to {dims:?}",
            src.shape()
        )));
    }

    let mut out = src.to_owned();
    for (axis, &len) in dims.iter().enumerate() {
        if out.len_of(Axis(axis)) != len {
            out = resize_axis(&out, Axis(axis), len);
        }
    }

    Ok(out)
}

fn resize_axis<D: RemoveAxis>(src: &Array<f32, D>, axis: Axis, len: usize) -> Array<f32, D> {
    let mut shape = src.raw_dim();
    shape[axis.index()] = len;
    let mut out = Array::zeros(shape);

    let taps = sample_taps(src.len_of(axis), len);
    for (k, (lo, hi, t)) in taps.into_iter().enumerate() {
        let lo = src.index_axis(axis, lo);
        let hi = src.index_axis(axis, hi);

        Zip::from(out.index_axis_mut(axis, k))
            .and(&lo)
            .and(&hi)
            .for_each(|dst, &a, &b| *dst = a + (b - a) * t);
    }

    out
}

/// Source neighbours and blend weight for every output position, with pixel
/// centres aligned and edges clamped.
pub(crate) fn sample_taps(src_len: usize, dst_len: usize) -> Vec<(usize, usize, f32)> {
    let scale = src_len as f32 / dst_len as f32;
    let last = src_len - 1;

    (0..dst_len)
        .map(|k| {
            let x = ((k as f32 + 0.5) * scale - 0.5).clamp(0., last as f32);
            let lo = x.floor() as usize;
            let hi = (lo + 1).min(last);
            (lo, hi, x - lo as f32)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    #[test]
    fn same_size_is_identity() {
        let image = array![[1., 2.], [3., 4.]];
        assert_eq!(resize_planar(&image, 2, 2).unwrap(), image);
    }

    #[test]
    fn upsampling_interpolates_between_centres() {
        let image = array![[0., 4.]];
        let out = resize_planar(&image, 1, 4).unwrap();

        // taps land at -0.25, 0.25, 0.75 and 1.25, clamped at the edges
        assert_eq!(out, array![[0., 1., 3., 4.]]);
    }

    #[test]
    fn downsampling_averages_pairs() {
        let image = array![[0., 2., 4., 6.]];
        let out = resize_planar(&image, 1, 2).unwrap();
        assert_eq!(out, array![[1., 5.]]);
    }

    #[test]
    fn constant_volume_stays_constant() {
        let volume = Array3::from_elem((5, 3, 7), 2.5);
        let out = resize_volume(&volume, (4, 6, 2)).unwrap();

        assert_eq!(out.dim(), (4, 6, 2));
        assert!(out.iter().all(|&v| (v - 2.5).abs() < 1e-6));
    }

    #[test]
    fn zero_target_fails() {
        let image = Array2::<f32>::zeros((2, 2));
        assert!(resize_planar(&image, 0, 2).is_err());
    }
}
