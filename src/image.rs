use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use ndarray::{Array3, Array4, ArrayD, Axis, s};

use crate::affine::Affine;
use crate::enums::DataType;
use crate::error::{ParseWarning, Result};
use crate::header::{GeneralInfo, InfoValue, ParHeader};
use crate::proxy::{Region, ScaledArrayProxy};
use crate::schema::FormatVersion;
use crate::volume::VolumeKey;
use crate::volume_loader::FilePair;

/// A PAR/REC dataset: parsed header, world transform and lazy pixel data.
#[derive(Debug)]
pub struct ParRecImage {
    pub(crate) header: Arc<ParHeader>,
    pub(crate) affine: Affine,
    pub(crate) zooms: [f64; 3],
    pub(crate) proxy: ScaledArrayProxy,
    pub(crate) volume_labels: Vec<VolumeKey>,
    pub(crate) warnings: Vec<ParseWarning>,
    pub(crate) files: Option<FilePair>,
}

impl ParRecImage {
    pub fn version(&self) -> FormatVersion {
        self.header.version
    }

    pub fn header(&self) -> &ParHeader {
        &self.header
    }

    pub fn general_info(&self) -> &GeneralInfo {
        &self.header.general_info
    }

    /// Row-major voxel to RAS+ millimetre transform.
    pub fn affine(&self) -> &Affine {
        &self.affine
    }

    /// `(x, y, slices)` for a single volume, `(x, y, slices, volumes)` otherwise.
    pub fn shape(&self) -> Vec<usize> {
        let [nx, ny, nz, nv] = self.proxy.shape();
        if nv == 1 {
            vec![nx, ny, nz]
        } else {
            vec![nx, ny, nz, nv]
        }
    }

    pub fn dtype(&self) -> DataType {
        self.proxy.dtype()
    }

    /// Voxel sizes in mm; a fourth entry holds the repetition time in seconds
    /// (or 1.0 when the header has none) for multi-volume images.
    pub fn zooms(&self) -> Vec<f64> {
        let mut zooms = self.zooms.to_vec();
        if self.shape().len() == 4 {
            let repetition = self
                .general_info()
                .get("repetition_time")
                .and_then(InfoValue::as_floats)
                .and_then(|values| values.first().copied())
                .map_or(1.0, |ms| ms / 1000.0);
            zooms.push(repetition);
        }
        zooms
    }

    /// Discriminators of each volume, in volume order.
    pub fn volume_labels(&self) -> &[VolumeKey] {
        &self.volume_labels
    }

    pub fn warnings(&self) -> &[ParseWarning] {
        &self.warnings
    }

    pub fn files(&self) -> Option<&FilePair> {
        self.files.as_ref()
    }

    /// The lazy array behind [`ParRecImage::read_region`].
    pub fn dataobj(&self) -> &ScaledArrayProxy {
        &self.proxy
    }

    pub fn read_region(&self, region: &Region) -> Result<Array4<f64>> {
        self.proxy.read_region(region)
    }

    pub fn read_volume(&self, volume: usize, slices: Range<usize>) -> Result<Array3<f64>> {
        self.proxy.read(volume, slices)
    }

    /// Read and scale every slice, shaped as [`ParRecImage::shape`].
    pub fn get_data(&self) -> Result<ArrayD<f64>> {
        let [_, _, nz, nv] = self.proxy.shape();
        let data = self.proxy.read_region(&Region {
            volumes: 0..nv,
            slices: 0..nz,
        })?;
        Ok(if nv == 1 {
            data.index_axis_move(Axis(3), 0).into_dyn()
        } else {
            data.into_dyn()
        })
    }

    /// Stored samples without rescaling, shaped as [`ParRecImage::shape`].
    pub fn get_unscaled_data(&self) -> Result<ArrayD<u16>> {
        let [nx, ny, nz, nv] = self.proxy.shape();
        let mut data = Array4::<u16>::zeros((nx, ny, nz, nv));
        for volume in 0..nv {
            let stack = self.proxy.read_unscaled(volume, 0..nz)?;
            data.slice_mut(s![.., .., .., volume]).assign(&stack);
        }
        Ok(if nv == 1 {
            data.index_axis_move(Axis(3), 0).into_dyn()
        } else {
            data.into_dyn()
        })
    }

    /// b-value and gradient direction (ap, fh, rl) per volume, for headers
    /// that carry diffusion columns.
    pub fn diffusion_table(&self) -> Option<Vec<(f64, [f64; 3])>> {
        let records = &self.header.records;
        self.proxy
            .volumes()
            .iter()
            .map(|volume| {
                let record = volume.record(records, 0)?;
                Some((record.diffusion_b_factor, record.diffusion?))
            })
            .collect()
    }
}

impl fmt::Display for ParRecImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "PAR/REC image {}", self.version())?;
        if let Some(files) = &self.files {
            writeln!(f, "  header: {}", files.header.display())?;
            writeln!(f, "  data:   {}", files.data.display())?;
        }
        writeln!(f, "  shape:  {:?}", self.shape())?;
        writeln!(f, "  zooms:  {:?}", self.zooms())?;
        writeln!(f, "  dtype:  {} (stored {:?})", self.dtype(), self.proxy.stored_dtype())?;
        writeln!(f, "  affine:")?;
        for row in self.affine.chunks(4) {
            writeln!(
                f,
                "    [{:>10.4} {:>10.4} {:>10.4} {:>10.4}]",
                row[0], row[1], row[2], row[3]
            )?;
        }
        for warning in &self.warnings {
            writeln!(f, "  warning: {warning}")?;
        }
        Ok(())
    }
}
