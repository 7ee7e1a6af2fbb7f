use ndarray::{Array, Dimension};

const LOWER_PERCENTILE: f32 = 5.;
const UPPER_PERCENTILE: f32 = 95.;
const EPSILON: f32 = 1e-8;

/// Clips outliers to the 5th and 95th percentiles and rescales to `[0, 1]`.
///
/// The percentiles are taken over the finite values only, non finite values
/// end up at 0.
///
/// # Arguments
/// * `data` - The intensities to normalize in place.
pub fn normalize<D: Dimension>(data: &mut Array<f32, D>) {
    let mut sorted: Vec<f32> = data.iter().copied().filter(|x| x.is_finite()).collect();
    if sorted.is_empty() {
        data.fill(0.);
        return;
    }

    sorted.sort_by(f32::total_cmp);

    let low = percentile(&sorted, LOWER_PERCENTILE);
    let high = percentile(&sorted, UPPER_PERCENTILE);
    data.mapv_inplace(|x| if x.is_finite() { x.max(low).min(high) } else { low });

    let (min, max) = data
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(min, max), &x| {
            (min.min(x), max.max(x))
        });

    let range = max - min + EPSILON;
    data.mapv_inplace(|x| {
        let v = (x - min) / range;
        if v.is_finite() { v.clamp(0., 1.) } else { 0. }
    });
}

/// Linear interpolation between the closest ranks of an ascending slice.
///
/// # Arguments
/// * `sorted` - A non empty ascending slice.
/// * `p` - The percentile in `[0, 100]`.
///
/// # Returns
/// The `p`-th percentile.
pub fn percentile(sorted: &[f32], p: f32) -> f32 {
    let rank = p / 100. * (sorted.len() - 1) as f32;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f32)
}

#[cfg(test)]
mod tests {
    use ndarray::{Array1, Array2, array};

    use super::*;

    #[test]
    fn percentile_interpolates() {
        let sorted: Vec<f32> = (0..=10).map(|x| x as f32).collect();
        assert_eq!(percentile(&sorted, 50.), 5.);
        assert!((percentile(&sorted, 5.) - 0.5).abs() < 1e-6);
        assert!((percentile(&sorted, 95.) - 9.5).abs() < 1e-6);
        assert_eq!(percentile(&[3.], 95.), 3.);
    }

    #[test]
    fn outliers_are_clipped_before_rescaling() {
        let mut data: Array1<f32> = (0..21).map(|x| x as f32).collect();
        data[20] = 1000.;
        normalize(&mut data);

        // p5 = 1 and p95 = 19 on this data
        assert_eq!(data[0], 0.);
        assert_eq!(data[1], 0.);
        assert!((data[10] - 0.5).abs() < 1e-6);
        assert!((data[20] - 1.).abs() < 1e-6);
        assert!(data.iter().all(|&x| (0. ..=1.).contains(&x)));
    }

    #[test]
    fn nan_voxels_are_ignored_by_the_percentiles() {
        let mut data: Array1<f32> = (0..100)
            .map(|x| if x % 10 == 0 { f32::NAN } else { x as f32 })
            .collect();
        normalize(&mut data);

        assert!(data.iter().all(|&x| (0. ..=1.).contains(&x)));
        assert_eq!(data[0], 0.);
        assert_eq!(data[50], 0.);
        assert!((data[99] - 1.).abs() < 1e-6);
    }

    #[test]
    fn infinite_and_all_nan_inputs_stay_in_range() {
        let mut data = array![f32::NEG_INFINITY, 1., 2., 3., f32::INFINITY];
        normalize(&mut data);
        assert!(data.iter().all(|&x| (0. ..=1.).contains(&x)));
        assert_eq!(data[4], 0.);

        let mut data = Array1::from_elem(8, f32::NAN);
        normalize(&mut data);
        assert!(data.iter().all(|&x| x == 0.));
    }

    #[test]
    fn constant_input_maps_to_zero() {
        let mut data = Array2::from_elem((3, 3), 7.);
        normalize(&mut data);
        assert!(data.iter().all(|&x| x == 0.));
    }

    #[test]
    fn empty_input_is_left_alone() {
        let mut data = Array1::<f32>::zeros(0);
        normalize(&mut data);
        assert!(data.is_empty());

        let mut data = array![[255., 0.], [0., 255.]];
        normalize(&mut data);
        assert!(data.iter().all(|&x| (0. ..=1.).contains(&x)));
    }
}
