//! PAR header parsing.
//!
//! A PAR file is line oriented: `#` comments (one of which carries the
//! export tool version), `.`-prefixed general information entries of the
//! form `label : value`, and one whitespace separated row per acquired
//! slice. The column layout of a row depends on the [`FormatVersion`].

use std::{fs, path::Path};

use tracing::{debug, warn};

use crate::{
    error::{ParRecError, ParseWarning, Result},
    schema::{
        Field, FieldKind, FieldSpec, FormatVersion, GeneralInfoSpec, InfoKind, SliceRecordSpec,
        schema_for,
    },
};

const VERSION_MARKER: &str = "image export tool";
const END_MARKER: &str = "end of data description file";

/// Typed value of a general information entry.
#[derive(Debug, Clone, PartialEq)]
pub enum InfoValue {
    Int(i64),
    Float(f64),
    IntList(Vec<i64>),
    FloatList(Vec<f64>),
    Text(String),
}

impl InfoValue {
    fn parse(kind: InfoKind, raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let value = match kind {
            InfoKind::Int => Self::Int(raw.parse().ok()?),
            InfoKind::Float => Self::Float(raw.parse().ok()?),
            InfoKind::IntList => Self::IntList(
                raw.split_whitespace()
                    .map(str::parse)
                    .collect::<std::result::Result<_, _>>()
                    .ok()?,
            ),
            InfoKind::FloatList => Self::FloatList(
                raw.split_whitespace()
                    .map(str::parse)
                    .collect::<std::result::Result<_, _>>()
                    .ok()?,
            ),
            InfoKind::Text => Self::Text(raw.to_string()),
        };
        Some(value)
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(value) => Some(*value),
            Self::Int(value) => Some(*value as f64),
            _ => None,
        }
    }

    pub fn as_ints(&self) -> Option<&[i64]> {
        match self {
            Self::IntList(values) => Some(values),
            _ => None,
        }
    }

    pub fn as_floats(&self) -> Option<&[f64]> {
        match self {
            Self::FloatList(values) => Some(values),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value),
            _ => None,
        }
    }
}

/// General information section, in header order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeneralInfo {
    entries: Vec<(String, InfoValue)>,
}

impl GeneralInfo {
    pub fn get(&self, key: &str) -> Option<&InfoValue> {
        self.entries
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &InfoValue)> {
        self.entries.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn insert(&mut self, key: String, value: InfoValue) {
        match self.entries.iter_mut().find(|(name, _)| *name == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    fn parse_entry(
        &mut self,
        spec: &GeneralInfoSpec,
        line_no: usize,
        key: &str,
        raw: &str,
    ) -> Result<()> {
        let Some(info) = spec.lookup(key) else {
            // vendor extension, kept verbatim
            self.insert(key.trim().to_string(), InfoValue::Text(raw.trim().to_string()));
            return Ok(());
        };
        let value = InfoValue::parse(info.kind, raw).ok_or_else(|| {
            ParRecError::header(format!(
                "line {line_no}: cannot read {:?} as {:?} for `{}`",
                raw.trim(),
                info.kind,
                key.trim()
            ))
        })?;
        self.insert(info.name.to_string(), value);
        Ok(())
    }

    fn required_int(&self, key: &str) -> Result<i64> {
        self.get(key)
            .and_then(InfoValue::as_int)
            .ok_or_else(|| ParRecError::header(format!("missing general info entry `{key}`")))
    }

    fn required_float(&self, key: &str) -> Result<f64> {
        self.get(key)
            .and_then(InfoValue::as_float)
            .ok_or_else(|| ParRecError::header(format!("missing general info entry `{key}`")))
    }
}

/// One slice row of the header.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SliceRecord {
    /// 1-based line of the row in the header.
    pub line: usize,
    pub slice_number: u32,
    pub echo_number: u32,
    pub dynamic_scan_number: u32,
    pub cardiac_phase_number: u32,
    pub image_type_mr: i32,
    pub scanning_sequence: i32,
    pub index_in_rec: u32,
    pub bits_per_pixel: u16,
    pub scan_percentage: f64,
    pub recon_resolution: [u32; 2],
    pub rescale_intercept: f64,
    pub rescale_slope: f64,
    pub scale_slope: f64,
    pub window_center: f64,
    pub window_width: f64,
    /// Degrees about (ap, fh, rl).
    pub angulation: [f64; 3],
    /// Millimetres along (ap, fh, rl).
    pub offcentre: [f64; 3],
    pub slice_thickness: f64,
    pub slice_gap: f64,
    pub display_orientation: i32,
    pub slice_orientation: i32,
    pub fmri_status: i32,
    pub image_type_ed_es: i32,
    pub pixel_spacing: [f64; 2],
    pub echo_time: f64,
    pub dyn_scan_begin_time: f64,
    pub trigger_time: f64,
    pub diffusion_b_factor: f64,
    pub averages: u32,
    pub flip_angle: f64,
    pub cardiac_frequency: Option<i32>,
    pub min_rr_interval: Option<i32>,
    pub max_rr_interval: Option<i32>,
    pub turbo_factor: Option<i32>,
    pub inversion_delay: Option<f64>,
    pub diffusion_b_value_number: Option<u32>,
    pub gradient_orientation_number: Option<u32>,
    pub contrast_type: Option<String>,
    pub anisotropy_type: Option<String>,
    /// Gradient direction (ap, fh, rl).
    pub diffusion: Option<[f64; 3]>,
    pub label_type: Option<u32>,
}

#[derive(Debug, Clone, Copy)]
enum Scalar<'a> {
    Int(i64),
    Float(f64),
    Text(&'a str),
}

impl<'a> Scalar<'a> {
    fn coerce(kind: FieldKind, token: &'a str) -> std::result::Result<Self, String> {
        match kind {
            FieldKind::Int => token
                .parse()
                .map(Self::Int)
                .map_err(|_| format!("{token:?} is not an integer")),
            FieldKind::Float => token
                .parse()
                .map(Self::Float)
                .map_err(|_| format!("{token:?} is not a number")),
            FieldKind::Text => Ok(Self::Text(token)),
        }
    }

    fn int(self) -> std::result::Result<i64, String> {
        match self {
            Self::Int(value) => Ok(value),
            other => Err(format!("expected integer, got {other:?}")),
        }
    }

    fn uint(self) -> std::result::Result<u32, String> {
        let value = self.int()?;
        u32::try_from(value).map_err(|_| format!("{value} is out of range"))
    }

    fn code(self) -> std::result::Result<i32, String> {
        let value = self.int()?;
        i32::try_from(value).map_err(|_| format!("{value} is out of range"))
    }

    fn float(self) -> std::result::Result<f64, String> {
        match self {
            Self::Float(value) => Ok(value),
            Self::Int(value) => Ok(value as f64),
            Self::Text(text) => Err(format!("expected number, got {text:?}")),
        }
    }

    fn text(self) -> String {
        match self {
            Self::Text(text) => text.to_string(),
            Self::Int(value) => value.to_string(),
            Self::Float(value) => value.to_string(),
        }
    }
}

fn floats<const N: usize>(values: &[Scalar<'_>]) -> std::result::Result<[f64; N], String> {
    let mut out = [0.0; N];
    for (slot, value) in out.iter_mut().zip(values) {
        *slot = value.float()?;
    }
    Ok(out)
}

impl SliceRecord {
    fn assign(&mut self, field: Field, values: &[Scalar<'_>]) -> std::result::Result<(), String> {
        let first = values[0];
        match field {
            Field::SliceNumber => self.slice_number = first.uint()?,
            Field::EchoNumber => self.echo_number = first.uint()?,
            Field::DynamicScanNumber => self.dynamic_scan_number = first.uint()?,
            Field::CardiacPhaseNumber => self.cardiac_phase_number = first.uint()?,
            Field::ImageTypeMr => self.image_type_mr = first.code()?,
            Field::ScanningSequence => self.scanning_sequence = first.code()?,
            Field::IndexInRecFile => self.index_in_rec = first.uint()?,
            Field::ImagePixelSize => {
                self.bits_per_pixel = u16::try_from(first.int()?)
                    .map_err(|_| format!("{first:?} is not a bit depth"))?
            }
            Field::ScanPercentage => self.scan_percentage = first.float()?,
            Field::ReconResolution => {
                self.recon_resolution = [first.uint()?, values[1].uint()?];
            }
            Field::RescaleIntercept => self.rescale_intercept = first.float()?,
            Field::RescaleSlope => self.rescale_slope = first.float()?,
            Field::ScaleSlope => self.scale_slope = first.float()?,
            Field::WindowCenter => self.window_center = first.float()?,
            Field::WindowWidth => self.window_width = first.float()?,
            Field::ImageAngulation => self.angulation = floats(values)?,
            Field::ImageOffcentre => self.offcentre = floats(values)?,
            Field::SliceThickness => self.slice_thickness = first.float()?,
            Field::SliceGap => self.slice_gap = first.float()?,
            Field::ImageDisplayOrientation => self.display_orientation = first.code()?,
            Field::SliceOrientation => self.slice_orientation = first.code()?,
            Field::FmriStatusIndication => self.fmri_status = first.code()?,
            Field::ImageTypeEdEs => self.image_type_ed_es = first.code()?,
            Field::PixelSpacing => self.pixel_spacing = floats(values)?,
            Field::EchoTime => self.echo_time = first.float()?,
            Field::DynScanBeginTime => self.dyn_scan_begin_time = first.float()?,
            Field::TriggerTime => self.trigger_time = first.float()?,
            Field::DiffusionBFactor => self.diffusion_b_factor = first.float()?,
            Field::NumberOfAverages => self.averages = first.uint()?,
            Field::ImageFlipAngle => self.flip_angle = first.float()?,
            Field::CardiacFrequency => self.cardiac_frequency = Some(first.code()?),
            Field::MinimumRrInterval => self.min_rr_interval = Some(first.code()?),
            Field::MaximumRrInterval => self.max_rr_interval = Some(first.code()?),
            Field::TurboFactor => self.turbo_factor = Some(first.code()?),
            Field::InversionDelay => self.inversion_delay = Some(first.float()?),
            Field::DiffusionBValueNumber => self.diffusion_b_value_number = Some(first.uint()?),
            Field::GradientOrientationNumber => {
                self.gradient_orientation_number = Some(first.uint()?)
            }
            Field::ContrastType => self.contrast_type = Some(first.text()),
            Field::DiffusionAnisotropyType => self.anisotropy_type = Some(first.text()),
            Field::Diffusion => self.diffusion = Some(floats(values)?),
            Field::LabelType => self.label_type = Some(first.uint()?),
        }
        Ok(())
    }

    fn parse_row(
        line_no: usize,
        line: &str,
        spec: &SliceRecordSpec,
        template: &SliceRecord,
    ) -> Result<Self> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let expected = spec.token_count();
        if tokens.len() != expected {
            return Err(ParRecError::record(
                line_no,
                format!("expected {expected} values, found {}", tokens.len()),
            ));
        }

        let mut record = SliceRecord {
            line: line_no,
            ..template.clone()
        };
        let mut rest = tokens.as_slice();
        for &FieldSpec { field, kind, width } in spec.fields() {
            let (chunk, tail) = rest.split_at(width);
            rest = tail;
            chunk
                .iter()
                .map(|token| Scalar::coerce(kind, token))
                .collect::<std::result::Result<Vec<_>, _>>()
                .and_then(|values| record.assign(field, &values))
                .map_err(|message| {
                    ParRecError::record(line_no, format!("{}: {message}", field.label()))
                })?;
        }
        Ok(record)
    }

    /// Values V3 keeps in the general information section.
    fn v3_template(info: &GeneralInfo) -> Result<Self> {
        let recon = info
            .get("recon_resolution")
            .and_then(InfoValue::as_ints)
            .filter(|values| values.len() == 2)
            .ok_or_else(|| ParRecError::header("missing general info entry `recon_resolution`"))?;
        let to_u32 = |value: i64, key: &str| {
            u32::try_from(value)
                .map_err(|_| ParRecError::header(format!("`{key}` value {value} is out of range")))
        };
        let bits = info.required_int("pixel_size")?;

        Ok(SliceRecord {
            bits_per_pixel: u16::try_from(bits).map_err(|_| {
                ParRecError::header(format!("`pixel_size` value {bits} is out of range"))
            })?,
            scan_percentage: info.required_float("scan_percentage")?,
            recon_resolution: [
                to_u32(recon[0], "recon_resolution")?,
                to_u32(recon[1], "recon_resolution")?,
            ],
            slice_thickness: info.required_float("slice_thickness")?,
            slice_gap: info.required_float("slice_gap")?,
            averages: to_u32(info.required_int("num_averages")?, "num_averages")?,
            ..SliceRecord::default()
        })
    }
}

/// Everything read from a PAR file.
#[derive(Debug, Clone, PartialEq)]
pub struct ParHeader {
    pub version: FormatVersion,
    pub general_info: GeneralInfo,
    pub records: Vec<SliceRecord>,
    pub warnings: Vec<ParseWarning>,
}

impl ParHeader {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        // PAR files are usually latin-1; non-ASCII only occurs in free text
        let bytes = fs::read(path.as_ref())?;
        parse_header(&String::from_utf8_lossy(&bytes))
    }

    pub fn max_slices(&self) -> Option<i64> {
        self.general_info.get("max_slices").and_then(InfoValue::as_int)
    }
}

fn is_end_marker(comment: &str) -> bool {
    comment.to_ascii_lowercase().contains(END_MARKER)
}

fn is_version_tag(token: &str) -> bool {
    let mut chars = token.chars();
    matches!(chars.next(), Some('V' | 'v')) && chars.next().is_some_and(|c| c.is_ascii_digit())
}

fn detect_version(text: &str) -> Result<(FormatVersion, Option<ParseWarning>)> {
    for line in text.lines() {
        let Some(comment) = line.trim().strip_prefix('#') else {
            continue;
        };
        if is_end_marker(comment) {
            break;
        }
        let lower = comment.to_ascii_lowercase();
        let Some(pos) = lower.find(VERSION_MARKER) else {
            continue;
        };
        let tail = &comment[pos + VERSION_MARKER.len()..];
        if let Some(tag) = tail.split_whitespace().find(|token| is_version_tag(token)) {
            let (version, warning) = FormatVersion::from_tag(tag)?;
            if let Some(warning) = &warning {
                warn!("{warning}");
            }
            return Ok((version, warning));
        }
    }

    let assumed = FormatVersion::earliest();
    let warning = ParseWarning::MissingVersion {
        assumed: assumed.tag().to_string(),
    };
    warn!("{warning}");
    Ok((assumed, Some(warning)))
}

/// Parse the text of a PAR file.
///
/// # Errors
///
/// [`ParRecError::UnsupportedVersion`] for an unknown version tag,
/// [`ParRecError::MalformedRecord`] for a slice row that does not match the
/// version's columns and [`ParRecError::HeaderParseError`] for anything else
/// structurally wrong, including a header without slice rows.
pub fn parse_header(text: &str) -> Result<ParHeader> {
    let (version, version_warning) = detect_version(text)?;
    let schema = schema_for(version);

    let mut general_info = GeneralInfo::default();
    let mut rows = Vec::new();
    for (index, raw) in text.lines().enumerate() {
        let line_no = index + 1;
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(comment) = line.strip_prefix('#') {
            if is_end_marker(comment) {
                break;
            }
            continue;
        }
        if let Some(entry) = line.strip_prefix('.') {
            let (key, value) = entry.split_once(':').ok_or_else(|| {
                ParRecError::header(format!("line {line_no}: general info entry without `:`"))
            })?;
            general_info.parse_entry(&schema.general_info, line_no, key, value)?;
            continue;
        }
        rows.push((line_no, line));
    }

    if rows.is_empty() {
        return Err(ParRecError::header("no slice rows found"));
    }

    let template = match version {
        FormatVersion::V3 => SliceRecord::v3_template(&general_info)?,
        _ => SliceRecord::default(),
    };
    let records = rows
        .into_iter()
        .map(|(line_no, line)| {
            SliceRecord::parse_row(line_no, line, &schema.slice_record, &template)
        })
        .collect::<Result<Vec<_>>>()?;

    debug!(
        version = %version,
        general_info = general_info.len(),
        records = records.len(),
        "parsed PAR header"
    );

    Ok(ParHeader {
        version,
        general_info,
        records,
        warnings: version_warning.into_iter().collect(),
    })
}
