//! Version-dependent layouts of the PAR header.
//!
//! Each [`FormatVersion`] maps to a [`Schema`]: the recognised general
//! information keys with their value kinds, and the ordered columns of one
//! slice row. Tables are data only; adding a version means adding entries
//! here.

use std::fmt;

use crate::error::{ParRecError, ParseWarning, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FormatVersion {
    V3,
    V4,
    V41,
    V42,
}

impl FormatVersion {
    pub const ALL: [Self; 4] = [Self::V3, Self::V4, Self::V41, Self::V42];

    pub const fn earliest() -> Self {
        Self::V3
    }

    pub const fn latest() -> Self {
        Self::V42
    }

    pub const fn tag(self) -> &'static str {
        match self {
            Self::V3 => "V3",
            Self::V4 => "V4",
            Self::V41 => "V4.1",
            Self::V42 => "V4.2",
        }
    }

    const fn number(self) -> (u32, u32) {
        match self {
            Self::V3 => (3, 0),
            Self::V4 => (4, 0),
            Self::V41 => (4, 1),
            Self::V42 => (4, 2),
        }
    }

    /// Resolve a tag such as `V4.2`.
    ///
    /// A well-formed tag newer than every known version resolves to
    /// [`FormatVersion::latest`] together with a warning; anything else that
    /// is not an exact match fails with [`ParRecError::UnsupportedVersion`].
    pub fn from_tag(tag: &str) -> Result<(Self, Option<ParseWarning>)> {
        let unsupported = || ParRecError::UnsupportedVersion(tag.to_string());
        let digits = tag
            .trim()
            .strip_prefix(['V', 'v'])
            .ok_or_else(unsupported)?;
        let (major, minor) = match digits.split_once('.') {
            Some((major, minor)) => (major, minor),
            None => (digits, "0"),
        };
        let major: u32 = major.parse().map_err(|_| unsupported())?;
        let minor: u32 = minor.parse().map_err(|_| unsupported())?;

        if let Some(version) = Self::ALL.into_iter().find(|v| v.number() == (major, minor)) {
            return Ok((version, None));
        }

        let latest = Self::latest();
        if (major, minor) > latest.number() {
            let warning = ParseWarning::NewerVersionFallback {
                found: tag.trim().to_string(),
                used: latest.tag().to_string(),
            };
            return Ok((latest, Some(warning)));
        }
        Err(unsupported())
    }
}

impl fmt::Display for FormatVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Value kind of a general information entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfoKind {
    Int,
    Float,
    IntList,
    FloatList,
    Text,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InfoSpec {
    /// Header label, lowercase with whitespace runs collapsed.
    pub label: &'static str,
    pub name: &'static str,
    pub kind: InfoKind,
}

const fn info(label: &'static str, name: &'static str, kind: InfoKind) -> InfoSpec {
    InfoSpec { label, name, kind }
}

const GENERAL_COMMON: &[InfoSpec] = &[
    info("patient name", "patient_name", InfoKind::Text),
    info("examination name", "exam_name", InfoKind::Text),
    info("protocol name", "protocol_name", InfoKind::Text),
    info("examination date/time", "exam_date", InfoKind::Text),
    info("acquisition nr", "acq_nr", InfoKind::Int),
    info("reconstruction nr", "recon_nr", InfoKind::Int),
    info("scan duration [sec]", "scan_duration", InfoKind::Float),
    info("max. number of cardiac phases", "max_cardiac_phases", InfoKind::Int),
    info("max. number of echoes", "max_echoes", InfoKind::Int),
    info("max. number of slices/locations", "max_slices", InfoKind::Int),
    info("max. number of dynamics", "max_dynamics", InfoKind::Int),
    info("max. number of mixes", "max_mixes", InfoKind::Int),
    info("patient position", "patient_position", InfoKind::Text),
    info("preparation direction", "prep_direction", InfoKind::Text),
    info("technique", "tech", InfoKind::Text),
    info("scan resolution (x, y)", "scan_resolution", InfoKind::IntList),
    info("scan mode", "scan_mode", InfoKind::Text),
    info("repetition time [ms]", "repetition_time", InfoKind::FloatList),
    info("fov (ap,fh,rl) [mm]", "fov", InfoKind::FloatList),
    info("water fat shift [pixels]", "water_fat_shift", InfoKind::Float),
    info("angulation midslice(ap,fh,rl)[degr]", "angulation", InfoKind::FloatList),
    info("off centre midslice(ap,fh,rl) [mm]", "off_center", InfoKind::FloatList),
    info("flow compensation <0=no 1=yes> ?", "flow_compensation", InfoKind::Int),
    info("presaturation <0=no 1=yes> ?", "presaturation", InfoKind::Int),
    info("phase encoding velocity [cm/sec]", "phase_enc_velocity", InfoKind::FloatList),
    info("mtc <0=no 1=yes> ?", "mtc", InfoKind::Int),
    info("spir <0=no 1=yes> ?", "spir", InfoKind::Int),
    info("epi factor <0,1=no epi>", "epi_factor", InfoKind::Int),
    info("dynamic scan <0=no 1=yes> ?", "dyn_scan", InfoKind::Int),
    info("diffusion <0=no 1=yes> ?", "diffusion", InfoKind::Int),
    info("diffusion echo time [ms]", "diffusion_echo_time", InfoKind::Float),
];

// V3 keeps these acquisition-wide instead of per slice.
const GENERAL_V3: &[InfoSpec] = &[
    info("scan percentage", "scan_percentage", InfoKind::Int),
    info("recon resolution (x, y)", "recon_resolution", InfoKind::IntList),
    info("image pixel size [8 or 16 bits]", "pixel_size", InfoKind::Int),
    info("slice thickness [mm]", "slice_thickness", InfoKind::Float),
    info("slice gap [mm]", "slice_gap", InfoKind::Float),
    info("number of averages", "num_averages", InfoKind::Int),
    info("radial/phase encoding velocity [cm/sec]", "phase_enc_velocity", InfoKind::FloatList),
];

const GENERAL_V41: &[InfoSpec] = &[
    info("max. number of diffusion values", "max_diffusion_values", InfoKind::Int),
    info("max. number of gradient orients", "max_gradient_orient", InfoKind::Int),
];

const GENERAL_V42: &[InfoSpec] = &[info(
    "number of label types <0=no asl>",
    "nr_label_types",
    InfoKind::Int,
)];

/// The general information keys recognised by one version.
#[derive(Debug, Clone, Copy)]
pub struct GeneralInfoSpec {
    parts: &'static [&'static [InfoSpec]],
}

impl GeneralInfoSpec {
    pub fn entries(&self) -> impl Iterator<Item = &'static InfoSpec> + '_ {
        self.parts.iter().flat_map(|part| part.iter())
    }

    /// Look up a raw header label, ignoring case and spacing.
    pub fn lookup(&self, label: &str) -> Option<&'static InfoSpec> {
        let label = normalize_label(label);
        self.entries().find(|spec| spec.label == label)
    }
}

pub(crate) fn normalize_label(label: &str) -> String {
    label
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Columns of a slice row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    SliceNumber,
    EchoNumber,
    DynamicScanNumber,
    CardiacPhaseNumber,
    ImageTypeMr,
    ScanningSequence,
    IndexInRecFile,
    ImagePixelSize,
    ScanPercentage,
    ReconResolution,
    RescaleIntercept,
    RescaleSlope,
    ScaleSlope,
    WindowCenter,
    WindowWidth,
    ImageAngulation,
    ImageOffcentre,
    SliceThickness,
    SliceGap,
    ImageDisplayOrientation,
    SliceOrientation,
    FmriStatusIndication,
    ImageTypeEdEs,
    PixelSpacing,
    EchoTime,
    DynScanBeginTime,
    TriggerTime,
    DiffusionBFactor,
    NumberOfAverages,
    ImageFlipAngle,
    CardiacFrequency,
    MinimumRrInterval,
    MaximumRrInterval,
    TurboFactor,
    InversionDelay,
    DiffusionBValueNumber,
    GradientOrientationNumber,
    ContrastType,
    DiffusionAnisotropyType,
    Diffusion,
    LabelType,
}

impl Field {
    pub const fn label(self) -> &'static str {
        match self {
            Self::SliceNumber => "slice number",
            Self::EchoNumber => "echo number",
            Self::DynamicScanNumber => "dynamic scan number",
            Self::CardiacPhaseNumber => "cardiac phase number",
            Self::ImageTypeMr => "image_type_mr",
            Self::ScanningSequence => "scanning sequence",
            Self::IndexInRecFile => "index in REC file",
            Self::ImagePixelSize => "image pixel size",
            Self::ScanPercentage => "scan percentage",
            Self::ReconResolution => "recon resolution",
            Self::RescaleIntercept => "rescale intercept",
            Self::RescaleSlope => "rescale slope",
            Self::ScaleSlope => "scale slope",
            Self::WindowCenter => "window center",
            Self::WindowWidth => "window width",
            Self::ImageAngulation => "image angulation",
            Self::ImageOffcentre => "image offcentre",
            Self::SliceThickness => "slice thickness",
            Self::SliceGap => "slice gap",
            Self::ImageDisplayOrientation => "image_display_orientation",
            Self::SliceOrientation => "slice orientation",
            Self::FmriStatusIndication => "fmri_status_indication",
            Self::ImageTypeEdEs => "image_type_ed_es",
            Self::PixelSpacing => "pixel spacing",
            Self::EchoTime => "echo_time",
            Self::DynScanBeginTime => "dyn_scan_begin_time",
            Self::TriggerTime => "trigger_time",
            Self::DiffusionBFactor => "diffusion_b_factor",
            Self::NumberOfAverages => "number of averages",
            Self::ImageFlipAngle => "image_flip_angle",
            Self::CardiacFrequency => "cardiac frequency",
            Self::MinimumRrInterval => "minimum RR-interval",
            Self::MaximumRrInterval => "maximum RR-interval",
            Self::TurboFactor => "TURBO factor",
            Self::InversionDelay => "inversion delay",
            Self::DiffusionBValueNumber => "diffusion b value number",
            Self::GradientOrientationNumber => "gradient orientation number",
            Self::ContrastType => "contrast type",
            Self::DiffusionAnisotropyType => "diffusion anisotropy type",
            Self::Diffusion => "diffusion",
            Self::LabelType => "label type",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Int,
    Float,
    Text,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub field: Field,
    pub kind: FieldKind,
    /// Number of whitespace separated tokens the field occupies.
    pub width: usize,
}

const fn col(field: Field, kind: FieldKind, width: usize) -> FieldSpec {
    FieldSpec { field, kind, width }
}

const V3_COLUMNS: &[FieldSpec] = &[
    col(Field::SliceNumber, FieldKind::Int, 1),
    col(Field::EchoNumber, FieldKind::Int, 1),
    col(Field::DynamicScanNumber, FieldKind::Int, 1),
    col(Field::CardiacPhaseNumber, FieldKind::Int, 1),
    col(Field::ImageTypeMr, FieldKind::Int, 1),
    col(Field::ScanningSequence, FieldKind::Int, 1),
    col(Field::IndexInRecFile, FieldKind::Int, 1),
    col(Field::RescaleIntercept, FieldKind::Float, 1),
    col(Field::RescaleSlope, FieldKind::Float, 1),
    col(Field::ScaleSlope, FieldKind::Float, 1),
    col(Field::WindowCenter, FieldKind::Float, 1),
    col(Field::WindowWidth, FieldKind::Float, 1),
    col(Field::ImageAngulation, FieldKind::Float, 3),
    col(Field::ImageOffcentre, FieldKind::Float, 3),
    col(Field::ImageDisplayOrientation, FieldKind::Int, 1),
    col(Field::SliceOrientation, FieldKind::Int, 1),
    col(Field::FmriStatusIndication, FieldKind::Int, 1),
    col(Field::ImageTypeEdEs, FieldKind::Int, 1),
    col(Field::PixelSpacing, FieldKind::Float, 2),
    col(Field::EchoTime, FieldKind::Float, 1),
    col(Field::DynScanBeginTime, FieldKind::Float, 1),
    col(Field::TriggerTime, FieldKind::Float, 1),
    col(Field::DiffusionBFactor, FieldKind::Float, 1),
    col(Field::ImageFlipAngle, FieldKind::Float, 1),
];

const V4_COLUMNS: &[FieldSpec] = &[
    col(Field::SliceNumber, FieldKind::Int, 1),
    col(Field::EchoNumber, FieldKind::Int, 1),
    col(Field::DynamicScanNumber, FieldKind::Int, 1),
    col(Field::CardiacPhaseNumber, FieldKind::Int, 1),
    col(Field::ImageTypeMr, FieldKind::Int, 1),
    col(Field::ScanningSequence, FieldKind::Int, 1),
    col(Field::IndexInRecFile, FieldKind::Int, 1),
    col(Field::ImagePixelSize, FieldKind::Int, 1),
    col(Field::ScanPercentage, FieldKind::Int, 1),
    col(Field::ReconResolution, FieldKind::Int, 2),
    col(Field::RescaleIntercept, FieldKind::Float, 1),
    col(Field::RescaleSlope, FieldKind::Float, 1),
    col(Field::ScaleSlope, FieldKind::Float, 1),
    col(Field::WindowCenter, FieldKind::Float, 1),
    col(Field::WindowWidth, FieldKind::Float, 1),
    col(Field::ImageAngulation, FieldKind::Float, 3),
    col(Field::ImageOffcentre, FieldKind::Float, 3),
    col(Field::SliceThickness, FieldKind::Float, 1),
    col(Field::SliceGap, FieldKind::Float, 1),
    col(Field::ImageDisplayOrientation, FieldKind::Int, 1),
    col(Field::SliceOrientation, FieldKind::Int, 1),
    col(Field::FmriStatusIndication, FieldKind::Int, 1),
    col(Field::ImageTypeEdEs, FieldKind::Int, 1),
    col(Field::PixelSpacing, FieldKind::Float, 2),
    col(Field::EchoTime, FieldKind::Float, 1),
    col(Field::DynScanBeginTime, FieldKind::Float, 1),
    col(Field::TriggerTime, FieldKind::Float, 1),
    col(Field::DiffusionBFactor, FieldKind::Float, 1),
    col(Field::NumberOfAverages, FieldKind::Int, 1),
    col(Field::ImageFlipAngle, FieldKind::Float, 1),
    col(Field::CardiacFrequency, FieldKind::Int, 1),
    col(Field::MinimumRrInterval, FieldKind::Int, 1),
    col(Field::MaximumRrInterval, FieldKind::Int, 1),
    col(Field::TurboFactor, FieldKind::Int, 1),
    col(Field::InversionDelay, FieldKind::Float, 1),
];

const V41_COLUMNS: &[FieldSpec] = &[
    col(Field::DiffusionBValueNumber, FieldKind::Int, 1),
    col(Field::GradientOrientationNumber, FieldKind::Int, 1),
    col(Field::ContrastType, FieldKind::Text, 1),
    col(Field::DiffusionAnisotropyType, FieldKind::Text, 1),
    col(Field::Diffusion, FieldKind::Float, 3),
];

const V42_COLUMNS: &[FieldSpec] = &[col(Field::LabelType, FieldKind::Int, 1)];

/// Ordered columns of one slice row.
#[derive(Debug, Clone, Copy)]
pub struct SliceRecordSpec {
    parts: &'static [&'static [FieldSpec]],
}

impl SliceRecordSpec {
    pub fn fields(&self) -> impl Iterator<Item = &'static FieldSpec> + '_ {
        self.parts.iter().flat_map(|part| part.iter())
    }

    /// Number of whitespace tokens in one row.
    pub fn token_count(&self) -> usize {
        self.fields().map(|spec| spec.width).sum()
    }

    pub fn contains(&self, field: Field) -> bool {
        self.fields().any(|spec| spec.field == field)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Schema {
    pub version: FormatVersion,
    pub general_info: GeneralInfoSpec,
    pub slice_record: SliceRecordSpec,
}

const GENERAL_INFO_V3: &[&[InfoSpec]] = &[GENERAL_COMMON, GENERAL_V3];
const GENERAL_INFO_V4: &[&[InfoSpec]] = &[GENERAL_COMMON];
const GENERAL_INFO_V41: &[&[InfoSpec]] = &[GENERAL_COMMON, GENERAL_V41];
const GENERAL_INFO_V42: &[&[InfoSpec]] = &[GENERAL_COMMON, GENERAL_V41, GENERAL_V42];

const SLICE_RECORD_V3: &[&[FieldSpec]] = &[V3_COLUMNS];
const SLICE_RECORD_V4: &[&[FieldSpec]] = &[V4_COLUMNS];
const SLICE_RECORD_V41: &[&[FieldSpec]] = &[V4_COLUMNS, V41_COLUMNS];
const SLICE_RECORD_V42: &[&[FieldSpec]] = &[V4_COLUMNS, V41_COLUMNS, V42_COLUMNS];

/// Schema tables for a version.
pub fn schema_for(version: FormatVersion) -> Schema {
    let (general, columns) = match version {
        FormatVersion::V3 => (GENERAL_INFO_V3, SLICE_RECORD_V3),
        FormatVersion::V4 => (GENERAL_INFO_V4, SLICE_RECORD_V4),
        FormatVersion::V41 => (GENERAL_INFO_V41, SLICE_RECORD_V41),
        FormatVersion::V42 => (GENERAL_INFO_V42, SLICE_RECORD_V42),
    };
    Schema {
        version,
        general_info: GeneralInfoSpec { parts: general },
        slice_record: SliceRecordSpec { parts: columns },
    }
}

/// Schema tables for a textual version tag.
pub fn schema_for_tag(tag: &str) -> Result<(Schema, Option<ParseWarning>)> {
    let (version, warning) = FormatVersion::from_tag(tag)?;
    Ok((schema_for(version), warning))
}
