//! Image sources: format adapters exposing a plate or a single image.

use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use serde::Serialize;

use crate::pixel::{ImageData, PixelType};

pub mod assemble;
pub mod catalog;
pub mod database;
pub mod memory;

pub use database::DatabaseSource;
pub use memory::MemorySource;

/// Which part of the current well (or image) to return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldSelection {
    Whole,
    All,
    Index(usize),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExperimentInfo {
    pub name: String,
    pub creator: String,
    pub created: NaiveDateTime,
    pub acquisitions: Vec<AcquisitionInfo>,
    /// Distinct timepoint ids, ascending.
    pub time_points: Vec<i64>,
    /// Distinct resolution levels, ascending.
    pub levels: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AcquisitionInfo {
    pub name: String,
    pub description: Option<String>,
    pub created: NaiveDateTime,
    pub modified: NaiveDateTime,
}

/// Plate-wide sensor and site geometry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlateGeometry {
    pub sensor_size_x: u64,
    pub sensor_size_y: u64,
    pub objective: Option<String>,
    pub pixel_size_um: f64,
    pub sensor_bits: u32,
    pub sites_x: u64,
    pub sites_y: u64,
    pub sites_z: u64,
}

impl PlateGeometry {
    pub fn num_fields(&self) -> usize {
        (self.sites_x * self.sites_y * self.sites_z) as usize
    }

    /// Grid position `(x, y, z)` of a field index.
    pub fn field_position(&self, field: usize) -> (u64, u64, u64) {
        let field = field as u64;
        let x = field % self.sites_x;
        let y = (field / self.sites_x) % self.sites_y;
        let z = field / (self.sites_x * self.sites_y);
        (x, y, z)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelInfo {
    pub id: i64,
    pub label: String,
    /// Hex RGB without a leading marker, e.g. `"00FF00"`.
    pub color: String,
    pub emission_nm: Option<f64>,
    pub excitation_nm: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WellInfo {
    /// Normalized label, e.g. `"B2"`.
    pub label: String,
    pub zone_id: i64,
    /// Stage position in micrometers.
    pub position_um: Option<(f64, f64)>,
}

/// One physical pixel record in the tile index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TileRecord {
    pub zone_id: i64,
    pub level: i64,
    pub time_point: i64,
    pub channel_id: i64,
    /// Position in the well canvas, `[x, y, z]`.
    pub coord: [u64; 3],
    pub size: [u64; 3],
    pub bits_per_pixel: u32,
    pub offset: u64,
}

impl TileRecord {
    pub fn end(&self) -> [u64; 3] {
        [
            self.coord[0] + self.size[0],
            self.coord[1] + self.size[1],
            self.coord[2] + self.size[2],
        ]
    }

    pub fn num_samples(&self) -> u64 {
        self.size.iter().product()
    }

    /// True if the spatial boxes of both tiles share at least one voxel.
    pub fn overlaps(&self, other: &TileRecord) -> bool {
        let (a, b) = (self.end(), other.end());
        (0..3).all(|i| self.coord[i] < b[i] && other.coord[i] < a[i])
    }
}

/// Canvas extent of a well, the union of its tile extents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WellBounds {
    pub x: u64,
    pub y: u64,
    pub z: u64,
}

impl WellBounds {
    pub fn from_tiles<'a>(tiles: impl IntoIterator<Item = &'a TileRecord>) -> Self {
        tiles.into_iter().fold(
            WellBounds { x: 0, y: 0, z: 0 },
            |bounds, tile| {
                let end = tile.end();
                WellBounds {
                    x: bounds.x.max(end[0]),
                    y: bounds.y.max(end[1]),
                    z: bounds.z.max(end[2]),
                }
            },
        )
    }

    pub fn contains(&self, tile: &TileRecord) -> bool {
        let end = tile.end();
        end[0] <= self.x && end[1] <= self.y && end[2] <= self.z
    }
}

/// Per-axis physical quantities keyed by axis letter (`'x'`, `'y'`, ...).
pub type AxisValues = BTreeMap<char, f64>;

/// Capability contract of every input format adapter.
///
/// Plate-only accessors default to [`crate::Error::Unsupported`] so that
/// single-image sources only implement what they have.
pub trait ImageSource {
    /// Read and cache source-wide metadata. Must be called before anything else.
    fn init_metadata(&mut self) -> crate::Result<()>;

    /// True if the source is a plate of wells rather than a single image.
    fn is_screen(&self) -> bool;

    fn name(&self) -> String;

    /// Axis letters of the arrays returned by [`ImageSource::get_image`], e.g. `"tczyx"`.
    fn dim_order(&self) -> String;

    fn pixel_type(&self) -> PixelType;

    /// Physical pixel size in micrometers; missing axes are unit-less.
    fn pixel_size_um(&self) -> AxisValues;

    /// Stage position in micrometers of a well, or of the image if `None`.
    fn position_um(&self, well: Option<&str>) -> crate::Result<AxisValues>;

    fn channels(&self) -> Vec<ChannelInfo>;

    fn nchannels(&self) -> usize;

    /// Make `well` the current well, replacing any previous one.
    fn select_well(&mut self, well: &str) -> crate::Result<()>;

    /// Arrays of the current well, or of the image for single-image sources.
    fn get_image(&self, selection: FieldSelection) -> crate::Result<Vec<ImageData>>;

    /// Convenience for a single field of the current well.
    fn field_image(&self, field: usize) -> crate::Result<ImageData> {
        self.get_image(FieldSelection::Index(field))?
            .pop()
            .ok_or_else(|| crate::Error::not_found(format!("field {field}")))
    }

    fn rows(&self) -> crate::Result<Vec<String>> {
        Err(crate::Error::unsupported("rows of a non-plate source"))
    }

    fn columns(&self) -> crate::Result<Vec<String>> {
        Err(crate::Error::unsupported("columns of a non-plate source"))
    }

    /// Imaged well labels in plate order.
    fn wells(&self) -> crate::Result<Vec<String>> {
        Err(crate::Error::unsupported("wells of a non-plate source"))
    }

    /// Field paths within a well, `"0"`, `"1"`, ...
    fn fields(&self) -> crate::Result<Vec<String>> {
        Err(crate::Error::unsupported("fields of a non-plate source"))
    }

    fn acquisitions(&self) -> crate::Result<Vec<AcquisitionInfo>> {
        Err(crate::Error::unsupported("acquisitions of a non-plate source"))
    }
}
