use std::collections::HashMap;
use std::fmt;

use tracing::{debug, warn};

use crate::error::{ParRecError, ParseWarning, Result};
use crate::header::SliceRecord;

/// Non-spatial discriminators shared by all slices of one volume.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VolumeKey {
    pub echo_number: u32,
    pub dynamic_scan_number: u32,
    pub cardiac_phase_number: u32,
    pub image_type_mr: i32,
    pub scanning_sequence: i32,
    pub diffusion_b_value_number: Option<u32>,
    pub gradient_orientation_number: Option<u32>,
    pub label_type: Option<u32>,
    pub contrast_type: Option<String>,
    pub anisotropy_type: Option<String>,
}

impl VolumeKey {
    pub fn of(record: &SliceRecord) -> Self {
        Self {
            echo_number: record.echo_number,
            dynamic_scan_number: record.dynamic_scan_number,
            cardiac_phase_number: record.cardiac_phase_number,
            image_type_mr: record.image_type_mr,
            scanning_sequence: record.scanning_sequence,
            diffusion_b_value_number: record.diffusion_b_value_number,
            gradient_orientation_number: record.gradient_orientation_number,
            label_type: record.label_type,
            contrast_type: record.contrast_type.clone(),
            anisotropy_type: record.anisotropy_type.clone(),
        }
    }
}

impl fmt::Display for VolumeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "(echo {}, dynamic {}, phase {}, type {}, sequence {}",
            self.echo_number,
            self.dynamic_scan_number,
            self.cardiac_phase_number,
            self.image_type_mr,
            self.scanning_sequence
        )?;
        if let Some(b) = self.diffusion_b_value_number {
            write!(f, ", b-value {b}")?;
        }
        if let Some(gradient) = self.gradient_orientation_number {
            write!(f, ", gradient {gradient}")?;
        }
        if let Some(label) = self.label_type {
            write!(f, ", label {label}")?;
        }
        if let Some(contrast) = &self.contrast_type {
            write!(f, ", contrast {contrast}")?;
        }
        if let Some(anisotropy) = &self.anisotropy_type {
            write!(f, ", anisotropy {anisotropy}")?;
        }
        f.write_str(")")
    }
}

/// A 3D stack: positions into the parsed record list, in slice order.
#[derive(Debug, Clone, PartialEq)]
pub struct Volume {
    pub key: VolumeKey,
    pub slices: Vec<usize>,
}

impl Volume {
    pub fn len(&self) -> usize {
        self.slices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }

    pub fn records<'a>(
        &'a self,
        records: &'a [SliceRecord],
    ) -> impl Iterator<Item = &'a SliceRecord> + 'a {
        self.slices.iter().map(move |&position| &records[position])
    }

    pub fn record<'a>(&self, records: &'a [SliceRecord], slice: usize) -> Option<&'a SliceRecord> {
        self.slices.get(slice).map(|&position| &records[position])
    }

    fn validate(&self, records: &[SliceRecord]) -> Result<()> {
        let mut expected = 1u32;
        let mut missing = Vec::new();
        for record in self.records(records) {
            let slice = record.slice_number;
            if slice < expected {
                return Err(ParRecError::DuplicateSlice {
                    key: self.key.clone(),
                    slice,
                });
            }
            missing.extend(expected..slice);
            expected = slice + 1;
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ParRecError::IncompleteVolume {
                key: self.key.clone(),
                missing,
            })
        }
    }
}

/// Group slice records into volumes.
///
/// Volumes come out in the order their key is first seen, each sorted by
/// slice number, so the result does not depend on whether the header lists
/// rows volume by volume or interleaved.
///
/// # Errors
///
/// [`ParRecError::DuplicateSlice`] when a slice number repeats within a
/// volume and [`ParRecError::IncompleteVolume`] when slice numbers do not form
/// `1..=N`.
pub fn assemble_volumes(records: &[SliceRecord]) -> Result<Vec<Volume>> {
    let mut index: HashMap<VolumeKey, usize> = HashMap::new();
    let mut volumes: Vec<Volume> = Vec::new();

    for (position, record) in records.iter().enumerate() {
        let key = VolumeKey::of(record);
        let slot = *index.entry(key.clone()).or_insert_with(|| {
            volumes.push(Volume {
                key,
                slices: Vec::new(),
            });
            volumes.len() - 1
        });
        volumes[slot].slices.push(position);
    }

    for volume in &mut volumes {
        volume
            .slices
            .sort_by_key(|&position| records[position].slice_number);
        volume.validate(records)?;
    }

    debug!(volumes = volumes.len(), "assembled volumes");
    Ok(volumes)
}

/// Make every volume the same length.
///
/// A volume shorter than the longest one is an error naming the missing
/// trailing slices, or, with `permit_truncated`, is dropped with a warning.
pub fn equalize_volumes(
    volumes: Vec<Volume>,
    permit_truncated: bool,
) -> Result<(Vec<Volume>, Vec<ParseWarning>)> {
    let n_slices = volumes.iter().map(Volume::len).max().unwrap_or(0);
    let mut warnings = Vec::new();
    let mut kept = Vec::with_capacity(volumes.len());

    for volume in volumes {
        if volume.len() == n_slices {
            kept.push(volume);
            continue;
        }
        if !permit_truncated {
            return Err(ParRecError::IncompleteVolume {
                missing: (volume.len() as u32 + 1..=n_slices as u32).collect(),
                key: volume.key,
            });
        }
        let warning = ParseWarning::TruncatedVolume {
            key: volume.key,
            slices: volume.slices.len(),
        };
        warn!("{warning}");
        warnings.push(warning);
    }

    Ok((kept, warnings))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(slice: u32, dynamic: u32) -> SliceRecord {
        SliceRecord {
            slice_number: slice,
            echo_number: 1,
            dynamic_scan_number: dynamic,
            cardiac_phase_number: 1,
            ..SliceRecord::default()
        }
    }

    fn slice_numbers(volume: &Volume, records: &[SliceRecord]) -> Vec<u32> {
        volume.records(records).map(|r| r.slice_number).collect()
    }

    #[test]
    fn test_interleaved_rows_are_grouped_and_sorted() {
        let records = vec![
            record(2, 1),
            record(2, 2),
            record(1, 2),
            record(3, 1),
            record(1, 1),
            record(3, 2),
        ];
        let volumes = assemble_volumes(&records).unwrap();
        assert_eq!(volumes.len(), 2);
        assert_eq!(volumes[0].key.dynamic_scan_number, 1);
        assert_eq!(volumes[1].key.dynamic_scan_number, 2);
        for volume in &volumes {
            assert_eq!(slice_numbers(volume, &records), vec![1, 2, 3]);
        }
    }

    #[test]
    fn test_first_seen_key_order() {
        let records = vec![record(1, 3), record(1, 1), record(1, 2)];
        let volumes = assemble_volumes(&records).unwrap();
        let dynamics: Vec<_> = volumes.iter().map(|v| v.key.dynamic_scan_number).collect();
        assert_eq!(dynamics, vec![3, 1, 2]);
    }

    #[test]
    fn test_gap_names_missing_slice() {
        let records = vec![record(1, 1), record(2, 1), record(4, 1), record(6, 1)];
        match assemble_volumes(&records).unwrap_err() {
            ParRecError::IncompleteVolume { missing, .. } => assert_eq!(missing, vec![3, 5]),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_missing_first_slice() {
        let records = vec![record(2, 1), record(3, 1)];
        assert!(matches!(
            assemble_volumes(&records).unwrap_err(),
            ParRecError::IncompleteVolume { missing, .. } if missing == vec![1]
        ));
    }

    #[test]
    fn test_duplicate_slice() {
        let records = vec![record(1, 1), record(2, 1), record(2, 1)];
        assert!(matches!(
            assemble_volumes(&records).unwrap_err(),
            ParRecError::DuplicateSlice { slice: 2, .. }
        ));
    }

    #[test]
    fn test_label_type_separates_volumes() {
        let mut control = record(1, 1);
        control.label_type = Some(1);
        let mut label = record(1, 1);
        label.label_type = Some(2);
        let volumes = assemble_volumes(&[control, label]).unwrap();
        assert_eq!(volumes.len(), 2);
    }

    #[test]
    fn test_key_display_names_contrast_and_anisotropy() {
        let mut isotropic = record(1, 1);
        isotropic.contrast_type = Some("DIFFUSION".to_string());
        isotropic.anisotropy_type = Some("isotropic".to_string());
        let mut anisotropic = isotropic.clone();
        anisotropic.anisotropy_type = Some("anisotropic".to_string());

        let a = VolumeKey::of(&isotropic).to_string();
        let b = VolumeKey::of(&anisotropic).to_string();
        assert_ne!(a, b);
        assert!(a.contains("contrast DIFFUSION"), "{a}");
        assert!(a.contains("anisotropy isotropic"), "{a}");
        assert_eq!(
            VolumeKey::of(&record(1, 2)).to_string(),
            "(echo 1, dynamic 2, phase 1, type 0, sequence 0)"
        );
    }

    #[test]
    fn test_short_volume_is_incomplete() {
        let records = vec![record(1, 1), record(2, 1), record(1, 2)];
        let volumes = assemble_volumes(&records).unwrap();
        match equalize_volumes(volumes, false).unwrap_err() {
            ParRecError::IncompleteVolume { key, missing } => {
                assert_eq!(key.dynamic_scan_number, 2);
                assert_eq!(missing, vec![2]);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_short_volume_dropped_when_permitted() {
        let records = vec![record(1, 1), record(2, 1), record(1, 2)];
        let volumes = assemble_volumes(&records).unwrap();
        let (kept, warnings) = equalize_volumes(volumes, true).unwrap();
        assert_eq!(kept.len(), 1);
        assert!(matches!(
            warnings.as_slice(),
            [ParseWarning::TruncatedVolume { slices: 1, .. }]
        ));
    }
}
