//! Lazy access to REC pixel data.
//!
//! Nothing is read when the proxy is built. Every read seeks to the blocks of
//! the requested slices only and scales each slice with its own rescale
//! parameters. Reads are not cached.

use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::ops::Range;
use std::sync::{Arc, Mutex, PoisonError};

use ndarray::{Array2, Array3, Array4, s};
use rayon::prelude::*;
use tracing::trace;

use crate::enums::{DataType, ScalingMode};
use crate::error::{ParRecError, Result};
use crate::header::{ParHeader, SliceRecord};
use crate::volume::Volume;

/// Per-slice linear scaling taken from a slice row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SliceScaling {
    pub rescale_slope: f64,
    pub rescale_intercept: f64,
    pub scale_slope: f64,
}

impl SliceScaling {
    pub fn of(record: &SliceRecord) -> Self {
        Self {
            rescale_slope: record.rescale_slope,
            rescale_intercept: record.rescale_intercept,
            scale_slope: record.scale_slope,
        }
    }

    #[inline]
    pub fn displayed(&self, raw: f64) -> f64 {
        raw * self.rescale_slope + self.rescale_intercept
    }

    #[inline]
    pub fn floating_point(&self, raw: f64) -> f64 {
        self.displayed(raw) / (self.rescale_slope * self.scale_slope)
    }

    #[inline]
    pub fn apply(&self, mode: ScalingMode, raw: f64) -> f64 {
        match mode {
            ScalingMode::Raw => raw,
            ScalingMode::Displayed => self.displayed(raw),
            ScalingMode::FloatingPoint => self.floating_point(raw),
        }
    }
}

/// Sub-array request: volume and slice index ranges, both 0-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    pub volumes: Range<usize>,
    pub slices: Range<usize>,
}

#[derive(Debug)]
pub struct ScaledArrayProxy {
    file: Mutex<File>,
    header: Arc<ParHeader>,
    volumes: Vec<Volume>,
    shape: [usize; 4],
    scaling: ScalingMode,
}

impl ScaledArrayProxy {
    /// `volumes` must all have the same number of slices.
    pub fn new(
        file: File,
        header: Arc<ParHeader>,
        volumes: Vec<Volume>,
        scaling: ScalingMode,
    ) -> Self {
        let (nx, ny) = volumes
            .first()
            .and_then(|volume| volume.record(&header.records, 0))
            .map(|record| {
                (
                    record.recon_resolution[0] as usize,
                    record.recon_resolution[1] as usize,
                )
            })
            .unwrap_or((0, 0));
        let n_slices = volumes.first().map_or(0, Volume::len);
        let shape = [nx, ny, n_slices, volumes.len()];
        Self {
            file: Mutex::new(file),
            header,
            volumes,
            shape,
            scaling,
        }
    }

    /// `(x, y, slices, volumes)`.
    pub fn shape(&self) -> [usize; 4] {
        self.shape
    }

    pub fn volumes(&self) -> &[Volume] {
        &self.volumes
    }

    pub fn scaling(&self) -> ScalingMode {
        self.scaling
    }

    pub fn dtype(&self) -> DataType {
        DataType::Float64
    }

    /// Storage type of the REC samples.
    pub fn stored_dtype(&self) -> Option<DataType> {
        self.header
            .records
            .first()
            .and_then(|record| DataType::from_bits(record.bits_per_pixel))
    }

    fn volume(&self, index: usize) -> Result<&Volume> {
        self.volumes
            .get(index)
            .ok_or(ParRecError::VolumeOutOfRange {
                index,
                count: self.volumes.len(),
            })
    }

    fn slice_records(&self, volume: usize, slices: &Range<usize>) -> Result<Vec<&SliceRecord>> {
        let volume = self.volume(volume)?;
        if slices.start > slices.end || slices.end > volume.len() {
            return Err(ParRecError::SliceOutOfRange {
                start: slices.start,
                end: slices.end,
                count: volume.len(),
            });
        }
        Ok(volume.slices[slices.clone()]
            .iter()
            .map(|&position| &self.header.records[position])
            .collect())
    }

    /// Read one slice's stored samples, x fastest.
    fn read_samples(&self, record: &SliceRecord) -> Result<Vec<u16>> {
        let sample_size = DataType::from_bits(record.bits_per_pixel)
            .ok_or(ParRecError::UnsupportedBitDepth(record.bits_per_pixel))?
            .byte_size();
        let n_pixels = record.recon_resolution[0] as usize * record.recon_resolution[1] as usize;
        let slice_bytes = (n_pixels * sample_size) as u64;
        let offset = record.index_in_rec as u64 * slice_bytes;
        let required = offset + slice_bytes;

        let mut samples = vec![0u16; n_pixels];
        {
            let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
            let available = file.metadata()?.len();
            let truncated = || ParRecError::TruncatedData {
                slice: record.slice_number,
                required,
                available,
            };
            if available < required {
                return Err(truncated());
            }
            file.seek(SeekFrom::Start(offset))?;
            let read = match sample_size {
                2 => file.read_exact(bytemuck::cast_slice_mut::<u16, u8>(&mut samples)),
                _ => {
                    let mut bytes = vec![0u8; n_pixels];
                    let read = file.read_exact(&mut bytes);
                    samples
                        .iter_mut()
                        .zip(&bytes)
                        .for_each(|(sample, &byte)| *sample = u16::from(byte));
                    read
                }
            };
            read.map_err(|err| match err.kind() {
                ErrorKind::UnexpectedEof => truncated(),
                _ => ParRecError::Io(err),
            })?;
        }
        if sample_size == 2 {
            samples.iter_mut().for_each(|sample| *sample = u16::from_le(*sample));
        }
        trace!(slice = record.slice_number, offset, "read REC slice");
        Ok(samples)
    }

    /// Lay out per-slice buffers as `(x, y, slice)`.
    fn stack<T, F>(&self, records: &[&SliceRecord], decode: F) -> Result<Array3<T>>
    where
        T: Clone + Default + Send,
        F: Fn(&SliceRecord, Vec<u16>) -> Vec<T> + Sync,
    {
        let [nx, ny, _, _] = self.shape;
        let slices = records
            .par_iter()
            .map(|&record| {
                let samples = self.read_samples(record)?;
                Ok(decode(record, samples))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut stack = Array3::<T>::from_elem((nx, ny, slices.len()), T::default());
        for (z, pixels) in slices.into_iter().enumerate() {
            // REC rows are y-major, so the (y, x) buffer is transposed into place
            let image = Array2::from_shape_vec((ny, nx), pixels)
                .map_err(|err| ParRecError::header(err.to_string()))?;
            stack.slice_mut(s![.., .., z]).assign(&image.reversed_axes());
        }
        Ok(stack)
    }

    /// Scaled slices `slices` of volume `volume` as `(x, y, slices)`.
    pub fn read(&self, volume: usize, slices: Range<usize>) -> Result<Array3<f64>> {
        let records = self.slice_records(volume, &slices)?;
        let mode = self.scaling;
        self.stack(&records, |record, samples| {
            let scaling = SliceScaling::of(record);
            samples
                .into_iter()
                .map(|raw| scaling.apply(mode, f64::from(raw)))
                .collect()
        })
    }

    /// One scaled slice as `(x, y)`.
    pub fn read_slice(&self, volume: usize, slice: usize) -> Result<Array2<f64>> {
        let end = slice.checked_add(1).ok_or(ParRecError::SliceOutOfRange {
            start: slice,
            end: slice,
            count: self.shape[2],
        })?;
        let stack = self.read(volume, slice..end)?;
        Ok(stack.index_axis_move(ndarray::Axis(2), 0))
    }

    /// Stored samples without any scaling.
    pub fn read_unscaled(&self, volume: usize, slices: Range<usize>) -> Result<Array3<u16>> {
        let records = self.slice_records(volume, &slices)?;
        self.stack(&records, |_, samples| samples)
    }

    /// Scaled region as `(x, y, slices, volumes)`.
    pub fn read_region(&self, region: &Region) -> Result<Array4<f64>> {
        let [nx, ny, n_slices, n_volumes] = self.shape;
        if region.volumes.end > n_volumes {
            return Err(ParRecError::VolumeOutOfRange {
                index: region.volumes.end - 1,
                count: n_volumes,
            });
        }
        if region.slices.start > region.slices.end || region.slices.end > n_slices {
            return Err(ParRecError::SliceOutOfRange {
                start: region.slices.start,
                end: region.slices.end,
                count: n_slices,
            });
        }

        let mut out = Array4::<f64>::zeros((nx, ny, region.slices.len(), region.volumes.len()));
        for (t, volume) in region.volumes.clone().enumerate() {
            let stack = self.read(volume, region.slices.clone())?;
            out.slice_mut(s![.., .., .., t]).assign(&stack);
        }
        Ok(out)
    }
}
