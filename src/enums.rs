/// Slice orientation code stored in each slice row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceOrientation {
    Transverse,
    Sagittal,
    Coronal,
}

impl SliceOrientation {
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(Self::Transverse),
            2 => Some(Self::Sagittal),
            3 => Some(Self::Coronal),
            _ => None,
        }
    }

    pub const fn code(self) -> i32 {
        match self {
            Self::Transverse => 1,
            Self::Sagittal => 2,
            Self::Coronal => 3,
        }
    }
}

/// How stored REC samples are turned into array values.
///
/// With `PV` the stored pixel value, `RS`/`RI` the rescale slope and
/// intercept and `SS` the scale slope of the slice:
///  - `Raw`: `PV`
///  - `Displayed`: `DV = PV * RS + RI`
///  - `FloatingPoint`: `FP = DV / (RS * SS)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScalingMode {
    Raw,
    #[default]
    Displayed,
    FloatingPoint,
}

/// Element type of an array handed out by the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    UInt8,
    UInt16,
    Float64,
}

impl DataType {
    pub fn from_bits(bits: u16) -> Option<Self> {
        match bits {
            8 => Some(Self::UInt8),
            16 => Some(Self::UInt16),
            _ => None,
        }
    }

    pub const fn byte_size(self) -> usize {
        match self {
            Self::UInt8 => 1,
            Self::UInt16 => 2,
            Self::Float64 => 8,
        }
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::UInt8 => "u8",
            Self::UInt16 => "u16",
            Self::Float64 => "f64",
        };
        f.write_str(name)
    }
}
