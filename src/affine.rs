//! Voxel-to-world transform of a PAR/REC image.
//!
//! Header geometry lives in the scanner's (ap, fh, rl) frame, which read as a
//! point is PSL: x towards posterior, y towards superior, z towards left.
//! Voxel axes are first permuted into PSL according to the slice
//! orientation, scaled by the voxel size, rotated by the angulation
//! `Rx(ap) * Ry(fh) * Rz(rl)` and finally mapped to RAS+.
//!
//! The off-centre is the centre of the voxel grid: voxel index
//! `(shape - 1) / 2` lands on it, so voxel `(0, 0, 0)` is the centre of the
//! first voxel, not its corner.

use tracing::warn;

use crate::enums::SliceOrientation;
use crate::error::{ParRecError, ParseWarning, Result};
use crate::header::SliceRecord;
use crate::volume::Volume;

/// Row-major 4x4 matrix.
pub type Affine = [f64; 16];

type Mat3 = [[f64; 3]; 3];

const PSL_TO_RAS: Mat3 = [[0.0, 0.0, -1.0], [-1.0, 0.0, 0.0], [0.0, 1.0, 0.0]];

pub const DEFAULT_TOLERANCE: f64 = 0.05;

fn mat_mul(a: &Mat3, b: &Mat3) -> Mat3 {
    let mut out = [[0.0; 3]; 3];
    for (row, out_row) in out.iter_mut().enumerate() {
        for (col, value) in out_row.iter_mut().enumerate() {
            *value = (0..3).map(|k| a[row][k] * b[k][col]).sum();
        }
    }
    out
}

fn mat_vec(a: &Mat3, v: [f64; 3]) -> [f64; 3] {
    [0, 1, 2].map(|row| a[row][0] * v[0] + a[row][1] * v[1] + a[row][2] * v[2])
}

fn column(a: &Mat3, col: usize) -> [f64; 3] {
    [a[0][col], a[1][col], a[2][col]]
}

/// Voxel axes to PSL for each slice orientation.
fn orientation_to_psl(orientation: SliceOrientation) -> Mat3 {
    match orientation {
        // i -> L, j -> P, k -> S
        SliceOrientation::Transverse => [[0.0, 1.0, 0.0], [0.0, 0.0, 1.0], [1.0, 0.0, 0.0]],
        // i -> P, j -> -S, k -> -L
        SliceOrientation::Sagittal => [[1.0, 0.0, 0.0], [0.0, -1.0, 0.0], [0.0, 0.0, -1.0]],
        // i -> L, j -> -S, k -> P
        SliceOrientation::Coronal => [[0.0, 0.0, 1.0], [0.0, -1.0, 0.0], [1.0, 0.0, 0.0]],
    }
}

/// `Rx(ap) * Ry(fh) * Rz(rl)`, angles in degrees.
pub fn angulation_rotation(angulation: [f64; 3]) -> [[f64; 3]; 3] {
    let [ap, fh, rl] = angulation.map(f64::to_radians);
    let (sx, cx) = ap.sin_cos();
    let (sy, cy) = fh.sin_cos();
    let (sz, cz) = rl.sin_cos();
    let rx = [[1.0, 0.0, 0.0], [0.0, cx, -sx], [0.0, sx, cx]];
    let ry = [[cy, 0.0, sy], [0.0, 1.0, 0.0], [-sy, 0.0, cy]];
    let rz = [[cz, -sz, 0.0], [sz, cz, 0.0], [0.0, 0.0, 1.0]];
    mat_mul(&mat_mul(&rx, &ry), &rz)
}

/// Voxel sizes: in-plane pixel spacing and slice thickness plus gap.
pub fn zooms(record: &SliceRecord) -> [f64; 3] {
    [
        record.pixel_spacing[0],
        record.pixel_spacing[1],
        record.slice_thickness + record.slice_gap,
    ]
}

fn slice_orientation(record: &SliceRecord) -> Result<SliceOrientation> {
    SliceOrientation::from_code(record.slice_orientation).ok_or_else(|| {
        ParRecError::header(format!(
            "line {}: unknown slice orientation code {}",
            record.line, record.slice_orientation
        ))
    })
}

/// Linear part in PSL: columns are the voxel axes.
fn voxel_to_psl(record: &SliceRecord) -> Result<Mat3> {
    let permute = orientation_to_psl(slice_orientation(record)?);
    let [zx, zy, zz] = zooms(record);
    let zoom = [[zx, 0.0, 0.0], [0.0, zy, 0.0], [0.0, 0.0, zz]];
    Ok(mat_mul(
        &angulation_rotation(record.angulation),
        &mat_mul(&permute, &zoom),
    ))
}

/// Affine of a voxel grid whose centre sits at `centre` (ap, fh, rl).
///
/// `shape` is `(x, y, slices)`.
pub fn affine_from_centre(
    record: &SliceRecord,
    shape: [usize; 3],
    centre: [f64; 3],
) -> Result<Affine> {
    let linear_psl = voxel_to_psl(record)?;
    let centre_voxel = shape.map(|n| (n as f64 - 1.0) / 2.0);
    let shift = mat_vec(&linear_psl, centre_voxel);
    let origin_psl = [0, 1, 2].map(|axis| centre[axis] - shift[axis]);

    let linear = mat_mul(&PSL_TO_RAS, &linear_psl);
    let origin = mat_vec(&PSL_TO_RAS, origin_psl);

    let mut affine = [0.0; 16];
    for row in 0..3 {
        affine[row * 4..row * 4 + 3].copy_from_slice(&linear[row]);
        affine[row * 4 + 3] = origin[row];
    }
    affine[15] = 1.0;
    Ok(affine)
}

/// How a header reports per-slice off-centres.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffcentreConvention {
    /// Every row repeats the centre of the whole stack.
    StackCentre,
    /// Each row gives the centre of its own slice.
    PerSlice,
}

fn within(a: &[f64], b: &[f64], tolerance: f64) -> bool {
    a.iter().zip(b).all(|(x, y)| (x - y).abs() <= tolerance)
}

/// Builds the affine from a representative slice and checks that every other
/// slice shares its geometry.
#[derive(Debug, Clone, Copy)]
pub struct AffineBuilder {
    pub tolerance: f64,
    pub strict: bool,
}

impl Default for AffineBuilder {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
            strict: true,
        }
    }
}

struct Mismatch {
    slice: u32,
    volume: usize,
    field: &'static str,
}

impl Mismatch {
    /// Fields that change how REC blocks are decoded; lenient mode never
    /// accepts these.
    fn breaks_layout(&self) -> bool {
        matches!(self.field, "recon resolution" | "bits per pixel")
    }

    fn into_error(self) -> ParRecError {
        ParRecError::InconsistentGeometry {
            slice: self.slice,
            volume: self.volume,
            field: self.field,
        }
    }
}

impl AffineBuilder {
    pub fn new(tolerance: f64, strict: bool) -> Self {
        Self { tolerance, strict }
    }

    /// Affine of the image made of `volumes`, using the first slice of the
    /// first volume as reference.
    ///
    /// # Errors
    ///
    /// [`ParRecError::InconsistentGeometry`] naming the first slice whose
    /// geometry differs from the reference. Without `strict` only recon
    /// resolution and bit depth differences fail; the rest become warnings.
    /// [`ParRecError::HeaderParseError`] for an unknown orientation code.
    pub fn build(
        &self,
        volumes: &[Volume],
        records: &[SliceRecord],
    ) -> Result<(Affine, Vec<ParseWarning>)> {
        let first = volumes
            .first()
            .and_then(|volume| volume.record(records, 0))
            .ok_or_else(|| ParRecError::header("no slices to derive geometry from"))?;
        let n_slices = volumes[0].len();
        let step = column(&voxel_to_psl(first)?, 2);

        let convention = self.offcentre_convention(first, step, volumes, records);
        let mut mismatches = self.find_mismatches(first, step, convention, volumes, records);
        let fatal = if self.strict {
            (!mismatches.is_empty()).then_some(0)
        } else {
            mismatches.iter().position(Mismatch::breaks_layout)
        };
        if let Some(index) = fatal {
            return Err(mismatches.swap_remove(index).into_error());
        }

        let warnings = mismatches
            .into_iter()
            .map(|mismatch| {
                let warning = ParseWarning::InconsistentGeometry {
                    slice: mismatch.slice,
                    field: mismatch.field,
                };
                warn!(volume = mismatch.volume, "{warning}");
                warning
            })
            .collect();

        let centre = match convention {
            OffcentreConvention::StackCentre => first.offcentre,
            OffcentreConvention::PerSlice => {
                let offset = (n_slices as f64 - 1.0) / 2.0 - (first.slice_number as f64 - 1.0);
                [0, 1, 2].map(|axis| first.offcentre[axis] + offset * step[axis])
            }
        };
        let shape = [
            first.recon_resolution[0] as usize,
            first.recon_resolution[1] as usize,
            n_slices,
        ];
        let affine = affine_from_centre(first, shape, centre)?;
        Ok((affine, warnings))
    }

    fn expected_offcentre(reference: &SliceRecord, step: [f64; 3], slice: u32) -> [f64; 3] {
        let distance = slice as f64 - reference.slice_number as f64;
        [0, 1, 2].map(|axis| reference.offcentre[axis] + distance * step[axis])
    }

    /// Per-slice when more slices sit where the slice step predicts than on
    /// the reference centre. Rows sharing the reference slice number are not
    /// counted, a tie is read as a repeated stack centre.
    pub fn offcentre_convention(
        &self,
        reference: &SliceRecord,
        step: [f64; 3],
        volumes: &[Volume],
        records: &[SliceRecord],
    ) -> OffcentreConvention {
        let (mut stack, mut per_slice) = (0usize, 0usize);
        for record in volumes.iter().flat_map(|volume| volume.records(records)) {
            if record.slice_number == reference.slice_number {
                continue;
            }
            let expected = Self::expected_offcentre(reference, step, record.slice_number);
            if within(&record.offcentre, &reference.offcentre, self.tolerance) {
                stack += 1;
            } else if within(&record.offcentre, &expected, self.tolerance) {
                per_slice += 1;
            }
        }
        if per_slice > stack {
            OffcentreConvention::PerSlice
        } else {
            OffcentreConvention::StackCentre
        }
    }

    /// First differing field of every slice that disagrees with `reference`.
    fn find_mismatches(
        &self,
        reference: &SliceRecord,
        step: [f64; 3],
        convention: OffcentreConvention,
        volumes: &[Volume],
        records: &[SliceRecord],
    ) -> Vec<Mismatch> {
        let tolerance = self.tolerance;
        let mut mismatches = Vec::new();
        for (index, volume) in volumes.iter().enumerate() {
            for record in volume.records(records) {
                let expected = match convention {
                    OffcentreConvention::StackCentre => reference.offcentre,
                    OffcentreConvention::PerSlice => {
                        Self::expected_offcentre(reference, step, record.slice_number)
                    }
                };
                let field = if record.recon_resolution != reference.recon_resolution {
                    Some("recon resolution")
                } else if record.bits_per_pixel != reference.bits_per_pixel {
                    Some("bits per pixel")
                } else if record.slice_orientation != reference.slice_orientation {
                    Some("slice orientation")
                } else if !within(&record.angulation, &reference.angulation, tolerance) {
                    Some("angulation")
                } else if !within(&record.pixel_spacing, &reference.pixel_spacing, tolerance) {
                    Some("pixel spacing")
                } else if (record.slice_thickness - reference.slice_thickness).abs() > tolerance {
                    Some("slice thickness")
                } else if (record.slice_gap - reference.slice_gap).abs() > tolerance {
                    Some("slice gap")
                } else if !within(&record.offcentre, &expected, tolerance) {
                    Some("off-centre")
                } else {
                    None
                };
                if let Some(field) = field {
                    mismatches.push(Mismatch {
                        slice: record.slice_number,
                        volume: index,
                        field,
                    });
                }
            }
        }
        mismatches
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::assemble_volumes;

    const EPS: f64 = 1e-9;

    fn record(orientation: SliceOrientation, angulation: [f64; 3]) -> SliceRecord {
        SliceRecord {
            slice_number: 1,
            echo_number: 1,
            dynamic_scan_number: 1,
            cardiac_phase_number: 1,
            bits_per_pixel: 16,
            recon_resolution: [4, 4],
            angulation,
            pixel_spacing: [1.0, 1.0],
            slice_thickness: 1.0,
            slice_orientation: orientation.code(),
            ..SliceRecord::default()
        }
    }

    fn linear(affine: &Affine) -> [[f64; 3]; 3] {
        [0, 1, 2].map(|row| [affine[row * 4], affine[row * 4 + 1], affine[row * 4 + 2]])
    }

    fn assert_close(actual: &[f64], expected: &[f64]) {
        assert_eq!(actual.len(), expected.len());
        for (a, e) in actual.iter().zip(expected) {
            assert!((a - e).abs() < EPS, "{actual:?} != {expected:?}");
        }
    }

    fn apply(affine: &Affine, voxel: [f64; 3]) -> [f64; 3] {
        [0, 1, 2].map(|row| {
            (0..3).map(|col| affine[row * 4 + col] * voxel[col]).sum::<f64>() + affine[row * 4 + 3]
        })
    }

    #[test]
    fn test_transverse_reference_point() {
        let mut slice = record(SliceOrientation::Transverse, [0.0; 3]);
        slice.pixel_spacing = [2.0, 2.0];
        slice.slice_thickness = 4.0;
        slice.slice_gap = 1.0;
        let affine = affine_from_centre(&slice, [4, 4, 3], [10.0, 20.0, 30.0]).unwrap();
        assert_close(
            &affine,
            &[
                -2.0, 0.0, 0.0, -27.0, //
                0.0, -2.0, 0.0, -7.0, //
                0.0, 0.0, 5.0, 15.0, //
                0.0, 0.0, 0.0, 1.0,
            ],
        );
        // grid centre lands on the off-centre, (R, A, S) = (-rl, -ap, fh)
        assert_close(&apply(&affine, [1.5, 1.5, 1.0]), &[-30.0, -10.0, 20.0]);
    }

    #[test]
    fn test_orientation_permutations() {
        let sagittal = affine_from_centre(&record(SliceOrientation::Sagittal, [0.0; 3]), [1, 1, 1], [0.0; 3]).unwrap();
        assert_close(
            &linear(&sagittal).concat(),
            &[0.0, 0.0, 1.0, -1.0, 0.0, 0.0, 0.0, -1.0, 0.0],
        );
        let coronal = affine_from_centre(&record(SliceOrientation::Coronal, [0.0; 3]), [1, 1, 1], [0.0; 3]).unwrap();
        assert_close(
            &linear(&coronal).concat(),
            &[-1.0, 0.0, 0.0, 0.0, 0.0, -1.0, 0.0, -1.0, 0.0],
        );
    }

    #[test]
    fn test_angulation_about_rl() {
        let slice = record(SliceOrientation::Transverse, [0.0, 0.0, 90.0]);
        let affine = affine_from_centre(&slice, [1, 1, 1], [0.0; 3]).unwrap();
        // j (posterior) turns superior, k (superior) turns anterior
        assert_close(
            &linear(&affine).concat(),
            &[-1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 1.0, 0.0],
        );
    }

    #[test]
    fn test_angulation_about_ap() {
        let slice = record(SliceOrientation::Transverse, [90.0, 0.0, 0.0]);
        let affine = affine_from_centre(&slice, [1, 1, 1], [0.0; 3]).unwrap();
        // i (left) turns inferior, k (superior) turns left
        assert_close(
            &linear(&affine).concat(),
            &[0.0, 0.0, -1.0, 0.0, -1.0, 0.0, -1.0, 0.0, 0.0],
        );
    }

    #[test]
    fn test_angulation_about_fh() {
        let slice = record(SliceOrientation::Transverse, [0.0, 90.0, 0.0]);
        let affine = affine_from_centre(&slice, [1, 1, 1], [0.0; 3]).unwrap();
        // i (left) turns posterior, j (posterior) turns right
        assert_close(
            &linear(&affine).concat(),
            &[0.0, 1.0, 0.0, -1.0, 0.0, 0.0, 0.0, 0.0, 1.0],
        );
    }

    #[test]
    fn test_rotation_order() {
        let combined = angulation_rotation([30.0, 20.0, 10.0]);
        let expected = mat_mul(
            &mat_mul(
                &angulation_rotation([30.0, 0.0, 0.0]),
                &angulation_rotation([0.0, 20.0, 0.0]),
            ),
            &angulation_rotation([0.0, 0.0, 10.0]),
        );
        assert_close(&combined.concat(), &expected.concat());
        let reversed = mat_mul(
            &angulation_rotation([0.0, 0.0, 10.0]),
            &angulation_rotation([30.0, 20.0, 0.0]),
        );
        assert!((combined[0][1] - reversed[0][1]).abs() > 1e-3);
    }

    #[test]
    fn test_unknown_orientation() {
        let mut slice = record(SliceOrientation::Transverse, [0.0; 3]);
        slice.slice_orientation = 7;
        assert!(matches!(
            affine_from_centre(&slice, [1, 1, 1], [0.0; 3]).unwrap_err(),
            ParRecError::HeaderParseError(_)
        ));
    }

    fn sample_stack(n: u32, offcentres: impl Fn(u32) -> [f64; 3]) -> Vec<SliceRecord> {
        (1..=n)
            .map(|slice| SliceRecord {
                slice_number: slice,
                echo_number: 1,
                dynamic_scan_number: 1,
                cardiac_phase_number: 1,
                bits_per_pixel: 16,
                recon_resolution: [64, 64],
                angulation: [-1.98, 0.55, 0.02],
                offcentre: offcentres(slice),
                pixel_spacing: [1.912, 1.912],
                slice_thickness: 10.0,
                slice_gap: 2.33,
                slice_orientation: SliceOrientation::Transverse.code(),
                ..SliceRecord::default()
            })
            .collect()
    }

    #[test]
    fn test_sample_affine_is_deterministic() {
        let records = sample_stack(9, |_| [-18.79, -33.29, -16.06]);
        let volumes = assemble_volumes(&records).unwrap();
        let builder = AffineBuilder::default();
        let (first, warnings) = builder.build(&volumes, &records).unwrap();
        let (second, _) = builder.build(&volumes, &records).unwrap();
        assert!(warnings.is_empty());
        assert_eq!(first.map(f64::to_bits), second.map(f64::to_bits));
        let expected = [
            -1.9107703982, 0.0183657010, 0.4259680922, 73.9668755948, //
            -0.0183536005, -1.9119117919, 0.0043037836, 79.5761447272, //
            0.0660577827, 0.0000328868, 12.3226390299, -84.6624122079, //
            0.0, 0.0, 0.0, 1.0,
        ];
        for (actual, expected) in first.iter().zip(expected) {
            assert!((actual - expected).abs() < 1e-8, "{first:?}");
        }
        // stack centre convention: the grid centre maps to the off-centre
        assert_close(
            &apply(&first, [31.5, 31.5, 4.0]),
            &[16.06, 18.79, -33.29],
        );
        // slice axis length is thickness + gap
        let slice_axis = [first[2], first[6], first[10]];
        let length = slice_axis.iter().map(|v| v * v).sum::<f64>().sqrt();
        assert!((length - 12.33).abs() < EPS);
    }

    #[test]
    fn test_per_slice_offcentres_are_consistent() {
        let reference = sample_stack(1, |_| [-18.79, -33.29, -16.06]).remove(0);
        let step = column(&voxel_to_psl(&reference).unwrap(), 2);
        let records = sample_stack(5, |slice| {
            AffineBuilder::expected_offcentre(&reference, step, slice)
        });
        let volumes = assemble_volumes(&records).unwrap();
        let builder = AffineBuilder::default();
        assert_eq!(
            builder.offcentre_convention(&records[0], step, &volumes, &records),
            OffcentreConvention::PerSlice
        );
        let (affine, _) = builder.build(&volumes, &records).unwrap();
        // voxel (.., .., k) lies on slice k + 1's reported centre
        let centre = apply(&affine, [31.5, 31.5, 3.0]);
        let [ap, fh, rl] = records[3].offcentre;
        assert!(within(&centre, &[-rl, -ap, fh], 1e-6));
    }

    #[test]
    fn test_mutated_offcentre_names_slice() {
        let mut records = sample_stack(9, |_| [-18.79, -33.29, -16.06]);
        records[4].offcentre[0] += 5.0;
        let volumes = assemble_volumes(&records).unwrap();
        match AffineBuilder::default().build(&volumes, &records).unwrap_err() {
            ParRecError::InconsistentGeometry { slice, field, .. } => {
                assert_eq!(slice, 5);
                assert_eq!(field, "off-centre");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_per_slice_offcentre_reset_to_reference_names_slice() {
        let reference = sample_stack(1, |_| [-18.79, -33.29, -16.06]).remove(0);
        let step = column(&voxel_to_psl(&reference).unwrap(), 2);
        let mut records = sample_stack(5, |slice| {
            AffineBuilder::expected_offcentre(&reference, step, slice)
        });
        records[3].offcentre = records[0].offcentre;
        let volumes = assemble_volumes(&records).unwrap();
        assert!(matches!(
            AffineBuilder::default().build(&volumes, &records).unwrap_err(),
            ParRecError::InconsistentGeometry {
                slice: 4,
                field: "off-centre",
                ..
            }
        ));
    }

    #[test]
    fn test_stack_centre_slice_moved_along_step_names_slice() {
        let mut records = sample_stack(9, |_| [-18.79, -33.29, -16.06]);
        let step = column(&voxel_to_psl(&records[0]).unwrap(), 2);
        records[4].offcentre = AffineBuilder::expected_offcentre(&records[0], step, 5);
        let volumes = assemble_volumes(&records).unwrap();
        let builder = AffineBuilder::default();
        assert_eq!(
            builder.offcentre_convention(&records[0], step, &volumes, &records),
            OffcentreConvention::StackCentre
        );
        assert!(matches!(
            builder.build(&volumes, &records).unwrap_err(),
            ParRecError::InconsistentGeometry { slice: 5, .. }
        ));
    }

    #[test]
    fn test_lenient_geometry_rejects_layout_changes() {
        let mut records = sample_stack(3, |_| [0.0; 3]);
        records[1].slice_gap = 4.0;
        // same pixel count, different layout
        records[2].recon_resolution = [32, 128];
        let volumes = assemble_volumes(&records).unwrap();
        assert!(matches!(
            AffineBuilder::new(DEFAULT_TOLERANCE, false)
                .build(&volumes, &records)
                .unwrap_err(),
            ParRecError::InconsistentGeometry {
                slice: 3,
                field: "recon resolution",
                ..
            }
        ));

        let mut records = sample_stack(2, |_| [0.0; 3]);
        records[1].bits_per_pixel = 8;
        let volumes = assemble_volumes(&records).unwrap();
        assert!(matches!(
            AffineBuilder::new(DEFAULT_TOLERANCE, false)
                .build(&volumes, &records)
                .unwrap_err(),
            ParRecError::InconsistentGeometry {
                slice: 2,
                field: "bits per pixel",
                ..
            }
        ));
    }

    #[test]
    fn test_lenient_geometry_warns() {
        let mut records = sample_stack(3, |_| [0.0; 3]);
        records[2].slice_gap = 4.0;
        let volumes = assemble_volumes(&records).unwrap();
        let (_, warnings) = AffineBuilder::new(DEFAULT_TOLERANCE, false)
            .build(&volumes, &records)
            .unwrap();
        assert_eq!(
            warnings,
            vec![ParseWarning::InconsistentGeometry {
                slice: 3,
                field: "slice gap"
            }]
        );
    }
}
