use crate::{
    affine::{AffineBuilder, DEFAULT_TOLERANCE, zooms},
    enums::ScalingMode,
    error::{ParRecError, ParseWarning, Result},
    header::{ParHeader, parse_header},
    image::ParRecImage,
    proxy::ScaledArrayProxy,
    volume::{assemble_volumes, equalize_volumes},
};

use std::{
    fs::{self, File},
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::{debug, warn};

/// Options applied while loading an image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadOptions {
    pub scaling: ScalingMode,
    /// Drop volumes with fewer slices than the rest instead of failing.
    pub permit_truncated: bool,
    /// Fail on per-slice geometry differences instead of warning.
    pub strict_geometry: bool,
    /// Tolerance in mm and degrees for geometry comparisons.
    pub geometry_tolerance: f64,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            scaling: ScalingMode::default(),
            permit_truncated: false,
            strict_geometry: true,
            geometry_tolerance: DEFAULT_TOLERANCE,
        }
    }
}

impl LoadOptions {
    pub fn scaling(mut self, scaling: ScalingMode) -> Self {
        self.scaling = scaling;
        self
    }

    pub fn permit_truncated(mut self, permit: bool) -> Self {
        self.permit_truncated = permit;
        self
    }

    pub fn strict_geometry(mut self, strict: bool) -> Self {
        self.strict_geometry = strict;
        self
    }

    pub fn geometry_tolerance(mut self, tolerance: f64) -> Self {
        self.geometry_tolerance = tolerance;
        self
    }
}

/// Header and data file of one dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePair {
    pub header: PathBuf,
    pub data: PathBuf,
}

pub struct VolumeLoader;

impl VolumeLoader {
    /// Load an image from either its `.PAR` or its `.REC` file.
    ///
    /// # Errors
    ///
    /// Returns [`ParRecError::MissingCompanion`] if the other file of the
    /// pair does not exist, and any parse, assembly or geometry error of the
    /// header.
    pub fn load(path: impl AsRef<Path>, options: LoadOptions) -> Result<ParRecImage> {
        let files = Self::find_companion(path)?;
        Self::load_from_file_paths(&files.header, &files.data, options)
    }

    /// Load an image from explicit header and data paths.
    pub fn load_from_file_paths(
        header_path: impl AsRef<Path>,
        data_path: impl AsRef<Path>,
        options: LoadOptions,
    ) -> Result<ParRecImage> {
        let header = ParHeader::from_file(header_path.as_ref())?;
        let data = File::open(data_path.as_ref())?;
        let mut image = Self::load_from_header(header, data, options)?;
        image.files = Some(FilePair {
            header: header_path.as_ref().to_path_buf(),
            data: data_path.as_ref().to_path_buf(),
        });
        Ok(image)
    }

    /// Load an image from header text and an open data file.
    pub fn load_from_text(text: &str, data: File, options: LoadOptions) -> Result<ParRecImage> {
        Self::load_from_header(parse_header(text)?, data, options)
    }

    /// Assemble volumes, derive the affine and wrap the data file.
    ///
    /// No pixel data is read here.
    pub fn load_from_header(
        header: ParHeader,
        data: File,
        options: LoadOptions,
    ) -> Result<ParRecImage> {
        let mut warnings = header.warnings.clone();

        let volumes = assemble_volumes(&header.records)?;
        let (volumes, truncated) = equalize_volumes(volumes, options.permit_truncated)?;
        warnings.extend(truncated);

        let n_slices = volumes.first().map_or(0, |volume| volume.len());
        if let Some(announced) = header
            .max_slices()
            .filter(|&announced| announced != n_slices as i64)
        {
            let warning = ParseWarning::SliceCountMismatch {
                announced,
                found: n_slices,
            };
            warn!("{warning}");
            warnings.push(warning);
        }

        let builder = AffineBuilder::new(options.geometry_tolerance, options.strict_geometry);
        let (affine, geometry) = builder.build(&volumes, &header.records)?;
        warnings.extend(geometry);

        let first = volumes
            .first()
            .and_then(|volume| volume.record(&header.records, 0))
            .ok_or_else(|| ParRecError::header("no complete volume"))?;
        let zooms = zooms(first);
        let volume_labels = volumes.iter().map(|volume| volume.key.clone()).collect();

        debug!(
            version = %header.version,
            volumes = volumes.len(),
            slices = n_slices,
            "loaded PAR/REC image"
        );

        let header = Arc::new(header);
        let proxy = ScaledArrayProxy::new(data, Arc::clone(&header), volumes, options.scaling);
        Ok(ParRecImage {
            header,
            affine,
            zooms,
            proxy,
            volume_labels,
            warnings,
            files: None,
        })
    }

    /// Resolve the `.PAR`/`.REC` pair from either file name.
    ///
    /// The extension case of the given file is tried first, then the other
    /// case.
    pub fn find_companion(path: impl AsRef<Path>) -> Result<FilePair> {
        let path = path.as_ref();
        let missing = || ParRecError::MissingCompanion(path.to_path_buf());
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .ok_or_else(missing)?;

        let (other, is_header) = if extension.eq_ignore_ascii_case("par") {
            ("rec", true)
        } else if extension.eq_ignore_ascii_case("rec") {
            ("par", false)
        } else {
            return Err(missing());
        };
        let preferred = if extension.chars().all(|c| c.is_ascii_uppercase()) {
            [other.to_ascii_uppercase(), other.to_string()]
        } else {
            [other.to_string(), other.to_ascii_uppercase()]
        };

        let companion = preferred
            .iter()
            .map(|ext| path.with_extension(ext))
            .find(|candidate| fs::metadata(candidate).is_ok_and(|meta| meta.is_file()))
            .ok_or_else(missing)?;

        let (header, data) = if is_header {
            (path.to_path_buf(), companion)
        } else {
            (companion, path.to_path_buf())
        };
        Ok(FilePair { header, data })
    }
}
