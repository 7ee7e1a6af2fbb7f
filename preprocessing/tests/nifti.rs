use std::{fs::File, io::Write, path::Path};

use flate2::{Compression, write::GzEncoder};
use preprocessing::{Preprocessor, Scan, TargetShape, load_scan};

const HEADER_SIZE: usize = 348;
const VOX_OFFSET: usize = 352;
const FLOAT32: i16 = 16;

/// A single file NIfTI-1 image of little endian f32 voxels.
///
/// `voxels` are in file order, the first axis varying fastest.
fn nifti_bytes(dims: &[u16], voxels: &[f32]) -> Vec<u8> {
    assert_eq!(dims.iter().map(|&d| d as usize).product::<usize>(), voxels.len());

    let mut header = vec![0u8; HEADER_SIZE];
    let mut put = |at: usize, bytes: &[u8]| header[at..at + bytes.len()].copy_from_slice(bytes);

    put(0, &(HEADER_SIZE as i32).to_le_bytes());
    put(40, &(dims.len() as i16).to_le_bytes());
    for (i, &d) in dims.iter().enumerate() {
        put(42 + 2 * i, &(d as i16).to_le_bytes());
    }
    put(70, &FLOAT32.to_le_bytes());
    put(72, &32i16.to_le_bytes());
    for i in 0..8 {
        put(76 + 4 * i, &1f32.to_le_bytes());
    }
    put(108, &(VOX_OFFSET as f32).to_le_bytes());
    put(112, &1f32.to_le_bytes());
    put(344, b"n+1\0");

    let mut bytes = header;
    bytes.extend([0u8; VOX_OFFSET - HEADER_SIZE]);
    bytes.extend(voxels.iter().flat_map(|v| v.to_le_bytes()));
    bytes
}

fn write_nifti(path: &Path, dims: &[u16], voxels: &[f32]) {
    let bytes = nifti_bytes(dims, voxels);
    let file = File::create(path).unwrap();

    if path.extension().is_some_and(|e| e == "gz") {
        let mut encoder = GzEncoder::new(file, Compression::default());
        encoder.write_all(&bytes).unwrap();
        encoder.finish().unwrap();
    } else {
        let mut file = file;
        file.write_all(&bytes).unwrap();
    }
}

/// `i + 10 j + 100 k + 1000 t` at every voxel of a volume of `dims`.
fn coded_voxels(dims: &[u16]) -> Vec<f32> {
    let n: usize = dims.iter().map(|&d| d as usize).product();
    (0..n)
        .map(|mut flat| {
            let mut value = 0.;
            let mut scale = 1.;
            for &d in dims {
                value += (flat % d as usize) as f32 * scale;
                flat /= d as usize;
                scale *= 10.;
            }
            value
        })
        .collect()
}

fn volume_of(path: &Path) -> ndarray::Array3<f32> {
    match load_scan(path).unwrap() {
        Scan::Volumetric(volume) => volume,
        scan => panic!("expected a volume, got {} dimensions", scan.ndim()),
    }
}

#[test]
fn volume_keeps_its_axes_and_values() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("brain.nii");
    let dims = [4, 3, 2];
    write_nifti(&path, &dims, &coded_voxels(&dims));

    let volume = volume_of(&path);
    assert_eq!(volume.shape(), &[4, 3, 2]);
    assert_eq!(volume[[0, 0, 0]], 0.);
    assert_eq!(volume[[3, 0, 0]], 3.);
    assert_eq!(volume[[0, 2, 0]], 20.);
    assert_eq!(volume[[3, 2, 1]], 123.);
}

#[test]
fn gzipped_volume_reads_like_the_plain_one() {
    let dir = tempfile::tempdir().unwrap();
    let dims = [4, 3, 2];
    let voxels = coded_voxels(&dims);

    let plain = dir.path().join("brain.nii");
    let gzipped = dir.path().join("brain.nii.gz");
    write_nifti(&plain, &dims, &voxels);
    write_nifti(&gzipped, &dims, &voxels);

    assert_eq!(volume_of(&gzipped), volume_of(&plain));
}

#[test]
fn two_dimensional_file_is_planar() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("slice.nii");
    let dims = [5, 4];
    write_nifti(&path, &dims, &coded_voxels(&dims));

    let Scan::Planar(image) = load_scan(&path).unwrap() else {
        panic!("expected a planar scan");
    };
    assert_eq!(image.dim(), (5, 4));
    assert_eq!(image[[4, 3]], 34.);
}

#[test]
fn time_series_keeps_its_first_frame() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("series.nii.gz");
    let dims = [3, 3, 2, 4];
    write_nifti(&path, &dims, &coded_voxels(&dims));

    let volume = volume_of(&path);
    assert_eq!(volume.shape(), &[3, 3, 2]);
    // frame t adds 1000 t to every voxel
    assert!(volume.iter().all(|&v| v < 1000.));
    assert_eq!(volume[[2, 2, 1]], 122.);
}

#[test]
fn volume_fits_a_volumetric_target() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("brain.nii.gz");
    let dims = [8, 6, 4];
    write_nifti(&path, &dims, &coded_voxels(&dims));

    let target = TargetShape::Volumetric {
        height: 6,
        width: 5,
        depth: 3,
    };
    let mut preprocessor = Preprocessor::new(target, Some(0));
    let tensor = preprocessor.try_preprocess(&path, false).unwrap();

    assert_eq!(tensor.shape(), &[6, 5, 3, 1]);
    assert!(tensor.iter().all(|&v| (0. ..=1.).contains(&v)));
}

#[test]
fn volume_fits_a_planar_target_through_its_central_slice() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("brain.nii");
    let dims = [8, 6, 5];
    write_nifti(&path, &dims, &coded_voxels(&dims));

    let target = TargetShape::Planar {
        height: 8,
        width: 6,
    };
    let mut preprocessor = Preprocessor::new(target, Some(0)).with_normalize(false);
    let tensor = preprocessor.try_preprocess(&path, false).unwrap();

    assert_eq!(tensor.shape(), &[8, 6, 1]);
    // same size, so the slice k = 2 comes through untouched
    assert_eq!(tensor[[7, 5, 0]], 7. + 50. + 200.);
    assert_eq!(tensor[[0, 0, 0]], 200.);
}

#[test]
fn masked_background_does_not_break_normalization() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("masked.nii");
    let dims = [6, 6, 4];
    let voxels: Vec<f32> = coded_voxels(&dims)
        .into_iter()
        .enumerate()
        .map(|(i, v)| if i % 5 == 0 { f32::NAN } else { v })
        .collect();
    write_nifti(&path, &dims, &voxels);

    let target = TargetShape::Volumetric {
        height: 6,
        width: 6,
        depth: 4,
    };
    let mut preprocessor = Preprocessor::new(target, Some(0));
    let tensor = preprocessor.preprocess(&path, false).unwrap();

    assert_eq!(tensor.shape(), &[6, 6, 4, 1]);
    assert!(tensor.iter().all(|&v| (0. ..=1.).contains(&v)));
}
