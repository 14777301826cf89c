use std::path::PathBuf;

use thiserror::Error;

use crate::volume::VolumeKey;

pub type Result<T> = std::result::Result<T, ParRecError>;

#[derive(Debug, Error)]
pub enum ParRecError {
    #[error("Unsupported PAR version: {0}")]
    UnsupportedVersion(String),

    #[error("Header parse error: {0}")]
    HeaderParseError(String),

    #[error("Malformed slice record at line {line}: {message}")]
    MalformedRecord { line: usize, message: String },

    #[error("Incomplete volume {key}: missing slice(s) {missing:?}")]
    IncompleteVolume { key: VolumeKey, missing: Vec<u32> },

    #[error("Duplicate slice {slice} in volume {key}")]
    DuplicateSlice { key: VolumeKey, slice: u32 },

    #[error("Inconsistent geometry at slice {slice} (volume {volume}): {field} differs")]
    InconsistentGeometry {
        slice: u32,
        volume: usize,
        field: &'static str,
    },

    #[error("Truncated REC data at slice {slice}: need {required} bytes, file has {available}")]
    TruncatedData {
        slice: u32,
        required: u64,
        available: u64,
    },

    #[error("Unsupported bit depth: {0}")]
    UnsupportedBitDepth(u16),

    #[error("No companion file found for {0}")]
    MissingCompanion(PathBuf),

    #[error("Volume index {index} out of range ({count} volumes)")]
    VolumeOutOfRange { index: usize, count: usize },

    #[error("Slice range {start}..{end} out of range ({count} slices)")]
    SliceOutOfRange {
        start: usize,
        end: usize,
        count: usize,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ParRecError {
    pub(crate) fn header(message: impl Into<String>) -> Self {
        Self::HeaderParseError(message.into())
    }

    pub(crate) fn record(line: usize, message: impl Into<String>) -> Self {
        Self::MalformedRecord {
            line,
            message: message.into(),
        }
    }
}

/// Non-fatal findings carried alongside a parsed header or loaded image.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseWarning {
    /// No version tag in the header; the earliest version was assumed.
    MissingVersion { assumed: String },
    /// The header names a version newer than any known table.
    NewerVersionFallback { found: String, used: String },
    /// General info announces a different slice count than the records hold.
    SliceCountMismatch { announced: i64, found: usize },
    /// A volume was dropped because it was shorter than the others.
    TruncatedVolume { key: VolumeKey, slices: usize },
    /// Geometry differed but strict checking was disabled.
    InconsistentGeometry { slice: u32, field: &'static str },
}

impl std::fmt::Display for ParseWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingVersion { assumed } => {
                write!(f, "no version tag found, assuming {assumed}")
            }
            Self::NewerVersionFallback { found, used } => {
                write!(f, "version {found} is newer than known versions, parsing as {used}")
            }
            Self::SliceCountMismatch { announced, found } => {
                write!(f, "header announces {announced} slices, found {found}")
            }
            Self::TruncatedVolume { key, slices } => {
                write!(f, "dropped truncated volume {key} with {slices} slices")
            }
            Self::InconsistentGeometry { slice, field } => {
                write!(f, "slice {slice}: {field} differs from reference slice")
            }
        }
    }
}
