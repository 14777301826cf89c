//! # PAR/REC-volume library
//!
//! This crate serves a high-level API for reading Philips PAR/REC exports as
//! spatially-correct volumes.

//!
//! A dataset is a pair of files: a text header (`.PAR`) describing the
//! acquisition and every acquired slice, and a raw data file (`.REC`) with
//! one block of pixels per slice. Loading parses the header, groups the slice
//! rows into 3D volumes (one per echo, dynamic, cardiac phase, diffusion
//! direction, label type, ...) and derives the voxel-to-world affine. Pixel
//! data stays on disk until a region is requested; each slice is then
//! scaled with its own rescale parameters. Slices of one request are decoded
//! in parallel using rayon. Supported header versions:
//!  - V3
//!  - V4
//!  - V4.1 (diffusion columns)
//!  - V4.2 (arterial spin labelling)
//!
//!  Headers are assumed to describe one stack geometry:
//!   - Same slice orientation, angulation and voxel size for every slice
//!   - 8 or 16 bit little-endian samples
//!   - Off-centres either repeating the stack centre or giving each slice's
//!     own centre
//!
//! # Roadmap
//!
//!  - Per-slice varying geometry
//!  - Memory mapped REC access
//!
//! # Examples
//!
//! ## Reading a volume from a PAR/REC pair
//!
//! Load the dataset, then read the centre slice of the first volume as
//! floating point values.
//!
//! ```no_run
//! # use parrec_volume::{LoadOptions, ScalingMode, VolumeLoader};
//! let image = VolumeLoader::load(
//!     "scan.PAR",
//!     LoadOptions::default().scaling(ScalingMode::FloatingPoint),
//! )
//! .expect("should have loaded PAR/REC pair");
//! let centre = image.shape()[2] / 2;
//! let slice = image
//!     .read_volume(0, centre..centre + 1)
//!     .expect("should have read centre slice");
//! println!("{:?} {:?}", slice.dim(), image.affine());
//! ```

pub mod affine;
pub mod enums;
pub mod error;
pub mod header;
pub mod image;
pub mod proxy;
pub mod schema;
pub mod volume;
pub mod volume_loader;

pub use affine::Affine;
pub use enums::{DataType, ScalingMode, SliceOrientation};
pub use error::{ParRecError, ParseWarning, Result};
pub use header::{GeneralInfo, InfoValue, ParHeader, SliceRecord, parse_header};
pub use image::ParRecImage;
pub use proxy::{Region, ScaledArrayProxy};
pub use schema::{FormatVersion, Schema, schema_for};
pub use volume::{Volume, VolumeKey, assemble_volumes};
pub use volume_loader::{FilePair, LoadOptions, VolumeLoader};
