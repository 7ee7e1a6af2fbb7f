use std::path::Path;

use ndarray::{Array2, Array3};
use nifti::{NiftiObject, NiftiVolume, RandomAccessNiftiVolume, ReaderOptions};

use crate::error::{PreprocessErr, Result};

/// A decoded scan before any reshaping.
#[derive(Debug, Clone, PartialEq)]
pub enum Scan {
    /// A `height × width` image.
    Planar(Array2<f32>),
    /// A `height × width × depth` volume.
    Volumetric(Array3<f32>),
}

impl Scan {
    /// Returns the number of spatial dimensions of the scan.
    pub fn ndim(&self) -> usize {
        match self {
            Scan::Planar(_) => 2,
            Scan::Volumetric(_) => 3,
        }
    }

    /// Returns the spatial shape of the scan.
    pub fn shape(&self) -> &[usize] {
        match self {
            Scan::Planar(image) => image.shape(),
            Scan::Volumetric(volume) => volume.shape(),
        }
    }
}

/// The shape every preprocessed tensor is fitted to, without the channel axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetShape {
    Planar {
        height: usize,
        width: usize,
    },
    Volumetric {
        height: usize,
        width: usize,
        depth: usize,
    },
}

impl TargetShape {
    /// Builds a target shape from a channel-last input shape such as `[224, 224, 1]`
    /// or `[128, 128, 128, 1]`.
    ///
    /// # Arguments
    /// * `shape` - The input shape including the trailing channel axis.
    ///
    /// # Returns
    /// The matching target shape or an error if the shape is not `h,w,1` or `h,w,d,1`.
    pub fn from_input_shape(shape: &[usize]) -> Result<Self> {
        let target = match *shape {
            [height, width, 1] => TargetShape::Planar { height, width },
            [height, width, depth, 1] => TargetShape::Volumetric {
                height,
                width,
                depth,
            },
            _ => {
                return Err(PreprocessErr::InvalidShape(format!(
                    "expected h,w,1 or h,w,d,1 but got {shape:?}"
                )));
            }
        };

        if target.dims().contains(&0) {
            return Err(PreprocessErr::InvalidShape(format!(
                "zero sized axis in {shape:?}"
            )));
        }

        Ok(target)
    }

    /// Returns the number of spatial dimensions.
    pub fn ndim(&self) -> usize {
        self.dims().len()
    }

    /// Returns the spatial extents.
    pub fn dims(&self) -> Vec<usize> {
        match *self {
            TargetShape::Planar { height, width } => vec![height, width],
            TargetShape::Volumetric {
                height,
                width,
                depth,
            } => vec![height, width, depth],
        }
    }

    /// Returns the channel-last shape of a preprocessed tensor.
    pub fn input_shape(&self) -> Vec<usize> {
        let mut shape = self.dims();
        shape.push(1);
        shape
    }
}

/// The file formats a scan can be read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanFormat {
    Jpeg,
    Png,
    Nifti,
}

impl ScanFormat {
    /// Guesses the format of a file from its name, case insensitive.
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?.to_ascii_lowercase();

        if name.ends_with(".nii") || name.ends_with(".nii.gz") {
            Some(ScanFormat::Nifti)
        } else if name.ends_with(".jpg") || name.ends_with(".jpeg") {
            Some(ScanFormat::Jpeg)
        } else if name.ends_with(".png") {
            Some(ScanFormat::Png)
        } else {
            None
        }
    }
}

/// Reads a scan from disk.
///
/// Raster images are decoded to 8-bit grayscale. NIfTI volumes keep their
/// voxel values except for non finite ones, which are read as 0. Volumes with
/// more than three dimensions keep the first 3-D frame.
///
/// # Arguments
/// * `path` - The file to read.
///
/// # Returns
/// The decoded scan or an error if the format is unknown or the file can't be decoded.
pub fn load_scan(path: &Path) -> Result<Scan> {
    let format = ScanFormat::from_path(path)
        .ok_or_else(|| PreprocessErr::UnsupportedFormat(path.to_path_buf()))?;

    let scan = match format {
        ScanFormat::Nifti => load_nifti(path)?,
        ScanFormat::Jpeg | ScanFormat::Png => load_raster(path)?,
    };

    if scan.shape().contains(&0) {
        return Err(PreprocessErr::EmptyScan(path.to_path_buf()));
    }

    Ok(scan)
}

fn load_raster(path: &Path) -> Result<Scan> {
    let image = image::open(path)?.to_luma8();
    let (w, h) = image.dimensions();

    let pixels = Array2::from_shape_fn((h as usize, w as usize), |(y, x)| {
        image.get_pixel(x as u32, y as u32)[0] as f32
    });

    Ok(Scan::Planar(pixels))
}

fn load_nifti(path: &Path) -> Result<Scan> {
    let object = ReaderOptions::new().read_file(path)?;
    let volume = object.volume();
    let dims: Vec<usize> = volume.dim().iter().map(|&d| d as usize).collect();

    match dims.len() {
        0 | 1 => Err(PreprocessErr::InvalidShape(format!(
            "{} has {} dimension(s)",
            path.display(),
            dims.len()
        ))),
        2 => {
            let mut coords = [0u16; 2];
            let mut data = Array2::zeros((dims[0], dims[1]));
            for ((i, j), v) in data.indexed_iter_mut() {
                coords[0] = i as u16;
                coords[1] = j as u16;
                *v = finite_or_zero(volume.get_f32(&coords)?);
            }
            Ok(Scan::Planar(data))
        }
        n => {
            let mut coords = vec![0u16; n];
            let mut data = Array3::zeros((dims[0], dims[1], dims[2]));
            for ((i, j, k), v) in data.indexed_iter_mut() {
                coords[0] = i as u16;
                coords[1] = j as u16;
                coords[2] = k as u16;
                *v = finite_or_zero(volume.get_f32(&coords)?);
            }
            Ok(Scan::Volumetric(data))
        }
    }
}

fn finite_or_zero(v: f32) -> f32 {
    if v.is_finite() { v } else { 0. }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_is_guessed_from_the_file_name() {
        assert_eq!(
            ScanFormat::from_path(Path::new("a/brain.NII.gz")),
            Some(ScanFormat::Nifti)
        );
        assert_eq!(
            ScanFormat::from_path(Path::new("brain.nii")),
            Some(ScanFormat::Nifti)
        );
        assert_eq!(
            ScanFormat::from_path(Path::new("x.JPEG")),
            Some(ScanFormat::Jpeg)
        );
        assert_eq!(
            ScanFormat::from_path(Path::new("x.png")),
            Some(ScanFormat::Png)
        );
        assert_eq!(ScanFormat::from_path(Path::new("x.gz")), None);
        assert_eq!(ScanFormat::from_path(Path::new("notes.txt")), None);
    }

    #[test]
    fn target_shape_from_input_shape() {
        assert_eq!(
            TargetShape::from_input_shape(&[224, 224, 1]).unwrap(),
            TargetShape::Planar {
                height: 224,
                width: 224
            }
        );

        let volumetric = TargetShape::from_input_shape(&[8, 6, 4, 1]).unwrap();
        assert_eq!(volumetric.dims(), vec![8, 6, 4]);
        assert_eq!(volumetric.input_shape(), vec![8, 6, 4, 1]);

        assert!(TargetShape::from_input_shape(&[224, 224, 3]).is_err());
        assert!(TargetShape::from_input_shape(&[224]).is_err());
        assert!(TargetShape::from_input_shape(&[0, 224, 1]).is_err());
    }

    #[test]
    fn unsupported_extension_fails() {
        let err = load_scan(Path::new("scan.bmp")).unwrap_err();
        assert!(matches!(err, PreprocessErr::UnsupportedFormat(_)));
    }

    #[test]
    fn raster_is_read_as_grayscale() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.png");

        let mut image = image::GrayImage::new(3, 2);
        image.put_pixel(2, 1, image::Luma([200]));
        image.save(&path).unwrap();

        let Scan::Planar(pixels) = load_scan(&path).unwrap() else {
            panic!("expected a planar scan");
        };

        assert_eq!(pixels.dim(), (2, 3));
        assert_eq!(pixels[[1, 2]], 200.);
        assert_eq!(pixels[[0, 0]], 0.);
    }
}
