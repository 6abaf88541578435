//! Plate source over a relational tile index plus per-timepoint blob files.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use super::assemble::{CanvasLayout, OverlapPolicy, assemble};
use super::catalog::Catalog;
use super::{
    AcquisitionInfo, AxisValues, ChannelInfo, ExperimentInfo, FieldSelection, ImageSource,
    PlateGeometry, TileRecord, WellBounds, WellInfo,
};
use crate::pixel::{ImageData, PixelType};
use crate::well::{compare_columns, compare_rows, normalize_well_label, split_well_label};

/// Axis order of every array this source returns.
pub const DIM_ORDER: &str = "tczyx";

/// Source-wide metadata, read once by [`ImageSource::init_metadata`].
#[derive(Debug, Clone)]
pub struct PlateMetadata {
    pub experiment: ExperimentInfo,
    pub geometry: PlateGeometry,
    pub channels: Vec<ChannelInfo>,
    pub rows: Vec<String>,
    pub columns: Vec<String>,
    /// Imaged wells in plate order.
    pub wells: Vec<WellInfo>,
    /// Canvas bounds per zone id at the selected level.
    pub bounds: BTreeMap<i64, WellBounds>,
    /// Extent of one field, the same for every well of the plate.
    pub field_shape: WellBounds,
    pub bits_per_pixel: u32,
    pub pixel_type: PixelType,
    /// Resolution level read from the index.
    pub level: i64,
}

impl PlateMetadata {
    fn well(&self, label: &str) -> crate::Result<&WellInfo> {
        let normalized = normalize_well_label(label)?;
        self.wells
            .iter()
            .find(|w| w.label == normalized)
            .ok_or_else(|| {
                let available: Vec<&str> = self.wells.iter().map(|w| w.label.as_str()).collect();
                crate::Error::not_found(format!(
                    "well {label}; available wells: {}",
                    available.join(", ")
                ))
            })
    }

    /// Origin and shape of field `field` in a `(t, c, z, y, x)` canvas.
    fn field_region(&self, canvas: &[usize], field: usize) -> (Vec<usize>, Vec<usize>) {
        let (fx, fy, fz) = self.geometry.field_position(field);
        let size = self.field_shape;
        let origin = vec![
            0,
            0,
            (fz * size.z) as usize,
            (fy * size.y) as usize,
            (fx * size.x) as usize,
        ];
        let shape = vec![
            canvas[0],
            canvas[1],
            size.z as usize,
            size.y as usize,
            size.x as usize,
        ];
        (origin, shape)
    }

    /// Upper bound of the uncompressed plate size in bytes.
    ///
    /// Assumes every imaged well is fully covered by sensor frames, so
    /// partially imaged wells make this an overestimate.
    pub fn max_data_size(&self) -> u64 {
        let frame = self.geometry.sensor_size_x * self.geometry.sensor_size_y;
        frame
            * self.wells.len() as u64
            * self.geometry.num_fields() as u64
            * self.channels.len() as u64
            * self.experiment.time_points.len() as u64
            * self.pixel_type.size() as u64
    }
}

/// The currently assembled well. Replaced, never accumulated.
#[derive(Debug)]
struct CurrentWell {
    well: WellInfo,
    tiles: Vec<TileRecord>,
    data: ImageData,
}

/// Plate source reading an `experiment.db` index and its `images-<t>.db` blobs.
#[derive(Debug)]
pub struct DatabaseSource {
    catalog: Catalog,
    overlap_policy: OverlapPolicy,
    requested_level: Option<i64>,
    metadata: Option<PlateMetadata>,
    current: Option<CurrentWell>,
}

impl DatabaseSource {
    pub fn open(path: impl AsRef<Path>) -> crate::Result<Self> {
        Ok(Self {
            catalog: Catalog::open(path)?,
            overlap_policy: OverlapPolicy::default(),
            requested_level: None,
            metadata: None,
            current: None,
        })
    }

    pub fn with_overlap_policy(mut self, policy: OverlapPolicy) -> Self {
        self.overlap_policy = policy;
        self
    }

    /// Read `level` instead of the finest level in the index.
    pub fn with_level(mut self, level: i64) -> Self {
        self.requested_level = Some(level);
        self
    }

    pub fn path(&self) -> &Path {
        self.catalog.path()
    }

    pub fn metadata(&self) -> crate::Result<&PlateMetadata> {
        self.metadata.as_ref().ok_or_else(|| {
            crate::Error::configuration("source metadata read before init_metadata")
        })
    }

    /// Label of the currently selected well.
    pub fn current_well(&self) -> Option<&str> {
        self.current.as_ref().map(|c| c.well.label.as_str())
    }

    /// Tiles of the current well.
    pub fn current_tiles(&self) -> &[TileRecord] {
        self.current.as_ref().map_or(&[], |c| c.tiles.as_slice())
    }

    /// Tiles of `well`, optionally narrowed to one channel and/or timepoint.
    ///
    /// An empty combination is reported and returned as an empty list.
    pub fn well_tiles(
        &self,
        well: &str,
        channel: Option<i64>,
        time_point: Option<i64>,
    ) -> crate::Result<Vec<TileRecord>> {
        let metadata = self.metadata()?;
        let info = metadata.well(well)?;
        let tiles: Vec<TileRecord> = self
            .catalog
            .tiles(info.zone_id, metadata.level)?
            .into_iter()
            .filter(|t| channel.is_none_or(|c| t.channel_id == c))
            .filter(|t| time_point.is_none_or(|tp| t.time_point == tp))
            .collect();
        if tiles.is_empty() {
            log::warn!(
                "no tiles for well {} (channel {channel:?}, timepoint {time_point:?}, level {})",
                info.label,
                metadata.level
            );
        }
        Ok(tiles)
    }

    /// Imaged wells holding tiles, per timepoint.
    pub fn well_matrix(&self) -> crate::Result<Vec<(i64, Vec<String>)>> {
        let metadata = self.metadata()?;
        metadata
            .experiment
            .time_points
            .iter()
            .map(|&time_point| {
                let zones = self.catalog.zones_at_time_point(time_point)?;
                let wells = metadata
                    .wells
                    .iter()
                    .filter(|w| zones.contains(&w.zone_id))
                    .map(|w| w.label.clone())
                    .collect();
                Ok((time_point, wells))
            })
            .collect()
    }

    fn current(&self) -> crate::Result<&CurrentWell> {
        self.current
            .as_ref()
            .ok_or_else(|| crate::Error::not_found("no well selected"))
    }
}

/// Field extent per axis: the widest well divided into its sites, and at
/// least one sensor frame when every tile is a whole frame.
fn plate_field_shape(
    geometry: &PlateGeometry,
    bounds: &BTreeMap<i64, WellBounds>,
    sensor_frames: bool,
) -> WellBounds {
    let spacing = |extent: fn(&WellBounds) -> u64, sites: u64| {
        bounds
            .values()
            .map(|b| extent(b).div_ceil(sites))
            .max()
            .unwrap_or(0)
            .max(1)
    };
    let mut shape = WellBounds {
        x: spacing(|b| b.x, geometry.sites_x),
        y: spacing(|b| b.y, geometry.sites_y),
        z: spacing(|b| b.z, geometry.sites_z),
    };
    if sensor_frames {
        shape.x = shape.x.max(geometry.sensor_size_x);
        shape.y = shape.y.max(geometry.sensor_size_y);
    }
    shape
}

impl ImageSource for DatabaseSource {
    fn init_metadata(&mut self) -> crate::Result<()> {
        log::info!("reading experiment index {}", self.catalog.path().display());
        let experiment = self.catalog.experiment()?;
        let geometry = self.catalog.plate_geometry()?;
        let channels = self.catalog.channels()?;

        let mut rows = BTreeSet::new();
        let mut columns = BTreeSet::new();
        for label in self.catalog.well_labels()? {
            let (row, column) = split_well_label(&label, true)?;
            rows.insert(row);
            columns.insert(column);
        }
        let mut rows: Vec<String> = rows.into_iter().collect();
        rows.sort_by(|a, b| compare_rows(a, b));
        let mut columns: Vec<String> = columns.into_iter().collect();
        columns.sort_by(|a, b| compare_columns(a, b));

        let wells = self.catalog.imaged_wells()?;
        let bits_per_pixel = self.catalog.bits_per_pixel()?;
        let pixel_type = PixelType::from_bit_depth(bits_per_pixel)?;

        let level = match self.requested_level {
            Some(level) if experiment.levels.contains(&level) => level,
            Some(level) => {
                return Err(crate::Error::not_found(format!(
                    "resolution level {level}; available levels: {:?}",
                    experiment.levels
                )));
            }
            None => *experiment
                .levels
                .first()
                .ok_or_else(|| crate::Error::not_found("resolution levels in the index"))?,
        };
        let bounds = self.catalog.well_bounds(level)?;
        let sensor_frames = self.catalog.tiles_are_sensor_frames(
            level,
            geometry.sensor_size_x,
            geometry.sensor_size_y,
        )?;
        let field_shape = plate_field_shape(&geometry, &bounds, sensor_frames);

        let metadata = PlateMetadata {
            experiment,
            geometry,
            channels,
            rows,
            columns,
            wells,
            bounds,
            field_shape,
            bits_per_pixel,
            pixel_type,
            level,
        };
        log::info!(
            "experiment {:?}: {} imaged wells, {} fields, {} channels, {} timepoints, {}-bit samples as {:?}",
            metadata.experiment.name,
            metadata.wells.len(),
            metadata.geometry.num_fields(),
            metadata.channels.len(),
            metadata.experiment.time_points.len(),
            metadata.bits_per_pixel,
            metadata.pixel_type
        );
        log::debug!("field shape {:?}", metadata.field_shape);
        log::info!(
            "maximum data size {}",
            crate::writer::format_bytes(metadata.max_data_size())
        );
        self.metadata = Some(metadata);
        self.current = None;
        Ok(())
    }

    fn is_screen(&self) -> bool {
        true
    }

    fn name(&self) -> String {
        let name = self
            .metadata
            .as_ref()
            .map(|m| m.experiment.name.clone())
            .unwrap_or_default();
        if !name.is_empty() {
            return name;
        }
        self.catalog
            .path()
            .parent()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    fn dim_order(&self) -> String {
        DIM_ORDER.to_string()
    }

    fn pixel_type(&self) -> PixelType {
        self.metadata
            .as_ref()
            .map_or(PixelType::U16, |m| m.pixel_type)
    }

    fn pixel_size_um(&self) -> AxisValues {
        let mut sizes = AxisValues::new();
        if let Some(m) = &self.metadata {
            sizes.insert('x', m.geometry.pixel_size_um);
            sizes.insert('y', m.geometry.pixel_size_um);
        }
        sizes
    }

    fn position_um(&self, well: Option<&str>) -> crate::Result<AxisValues> {
        let mut position = AxisValues::new();
        if let Some(label) = well
            && let Some((x, y)) = self.metadata()?.well(label)?.position_um
        {
            position.insert('x', x);
            position.insert('y', y);
        }
        Ok(position)
    }

    fn channels(&self) -> Vec<ChannelInfo> {
        self.metadata
            .as_ref()
            .map(|m| m.channels.clone())
            .unwrap_or_default()
    }

    fn nchannels(&self) -> usize {
        self.metadata.as_ref().map_or(0, |m| m.channels.len())
    }

    fn select_well(&mut self, well: &str) -> crate::Result<()> {
        // Release the previous canvas before allocating the next one.
        self.current = None;

        let metadata = self.metadata()?;
        let info = metadata.well(well)?.clone();
        let tiles = self.catalog.tiles(info.zone_id, metadata.level)?;
        if tiles.is_empty() {
            return Err(crate::Error::not_found(format!(
                "tiles for well {} at level {}",
                info.label, metadata.level
            )));
        }
        let bounds = metadata
            .bounds
            .get(&info.zone_id)
            .copied()
            .unwrap_or_else(|| WellBounds::from_tiles(&tiles));
        let channel_ids: Vec<i64> = metadata.channels.iter().map(|c| c.id).collect();
        let layout = CanvasLayout {
            time_points: &metadata.experiment.time_points,
            channels: &channel_ids,
            bounds,
        };
        log::debug!(
            "assembling well {} from {} tiles into {:?}",
            info.label,
            tiles.len(),
            layout.shape()
        );

        let path = self.catalog.path();
        let policy = self.overlap_policy;
        let data = match metadata.pixel_type {
            PixelType::U8 => ImageData::U8(assemble(&tiles, &layout, path, policy)?),
            PixelType::U16 => ImageData::U16(assemble(&tiles, &layout, path, policy)?),
            PixelType::U32 => ImageData::U32(assemble(&tiles, &layout, path, policy)?),
            PixelType::U64 => ImageData::U64(assemble(&tiles, &layout, path, policy)?),
            PixelType::F32 => {
                return Err(crate::Error::integrity(
                    "floating point samples in a tile index",
                ));
            }
        };
        self.current = Some(CurrentWell {
            well: info,
            tiles,
            data,
        });
        Ok(())
    }

    fn get_image(&self, selection: FieldSelection) -> crate::Result<Vec<ImageData>> {
        let current = self.current()?;
        let metadata = self.metadata()?;
        let num_fields = metadata.geometry.num_fields();
        let field = |index: usize| {
            let (origin, shape) = metadata.field_region(current.data.shape(), index);
            current.data.region(&origin, &shape)
        };
        match selection {
            FieldSelection::Whole => Ok(vec![current.data.clone()]),
            FieldSelection::All => (0..num_fields).map(field).collect(),
            FieldSelection::Index(index) if index < num_fields => Ok(vec![field(index)?]),
            FieldSelection::Index(index) => Err(crate::Error::not_found(format!(
                "field {index} in well {}; the plate has {num_fields} fields",
                current.well.label
            ))),
        }
    }

    fn rows(&self) -> crate::Result<Vec<String>> {
        Ok(self.metadata()?.rows.clone())
    }

    fn columns(&self) -> crate::Result<Vec<String>> {
        Ok(self.metadata()?.columns.clone())
    }

    fn wells(&self) -> crate::Result<Vec<String>> {
        Ok(self
            .metadata()?
            .wells
            .iter()
            .map(|w| w.label.clone())
            .collect())
    }

    fn fields(&self) -> crate::Result<Vec<String>> {
        Ok((0..self.metadata()?.geometry.num_fields())
            .map(|f| f.to_string())
            .collect())
    }

    fn acquisitions(&self) -> crate::Result<Vec<AcquisitionInfo>> {
        Ok(self.metadata()?.experiment.acquisitions.clone())
    }
}
