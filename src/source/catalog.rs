//! Reader for the relational experiment index (`experiment.db`).
//!
//! Every query returns typed records; optional columns (third spatial axis,
//! well stage coordinates) are detected once from the table schema.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use rusqlite::types::Value;
use rusqlite::{Connection, OpenFlags, Row, params};

use super::{
    AcquisitionInfo, ChannelInfo, ExperimentInfo, PlateGeometry, TileRecord, WellBounds, WellInfo,
};
use crate::ticks::ticks_to_datetime;
use crate::well::{compare_wells, normalize_well_label};

const TILE_TABLE: &str = "SourceImageBase";

/// Read-only handle on an experiment index.
#[derive(Debug)]
pub struct Catalog {
    conn: Connection,
    path: PathBuf,
    /// Column expressions for the tile z coordinate and z size.
    tile_z: (&'static str, &'static str),
}

/// Tile row with raw integer columns, before range checks.
struct RawTile {
    zone_id: i64,
    level: i64,
    time_point: i64,
    channel_id: i64,
    coord: [i64; 3],
    size: [i64; 3],
    bits_per_pixel: i64,
    offset: i64,
}

impl RawTile {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            zone_id: row.get("ZoneIndex")?,
            level: row.get("level")?,
            time_point: row.get("TimeSeriesElementId")?,
            channel_id: row.get("ChannelId")?,
            coord: [row.get("CoordX")?, row.get("CoordY")?, row.get("CoordZ")?],
            size: [row.get("SizeX")?, row.get("SizeY")?, row.get("SizeZ")?],
            bits_per_pixel: row.get("BitsPerPixel")?,
            offset: row.get("ImageIndex")?,
        })
    }
}

impl TryFrom<RawTile> for TileRecord {
    type Error = crate::Error;

    fn try_from(raw: RawTile) -> Result<Self, Self::Error> {
        let coord = [
            unsigned(raw.coord[0], "CoordX")?,
            unsigned(raw.coord[1], "CoordY")?,
            unsigned(raw.coord[2], "CoordZ")?,
        ];
        let size = [
            unsigned(raw.size[0], "SizeX")?,
            unsigned(raw.size[1], "SizeY")?,
            unsigned(raw.size[2], "SizeZ")?,
        ];
        if size.contains(&0) {
            return Err(crate::Error::integrity(format!(
                "empty tile of size {size:?} in zone {}",
                raw.zone_id
            )));
        }
        let bits_per_pixel = u32::try_from(raw.bits_per_pixel).map_err(|_| {
            crate::Error::integrity(format!("invalid BitsPerPixel {}", raw.bits_per_pixel))
        })?;
        Ok(TileRecord {
            zone_id: raw.zone_id,
            level: raw.level,
            time_point: raw.time_point,
            channel_id: raw.channel_id,
            coord,
            size,
            bits_per_pixel,
            offset: unsigned(raw.offset, "ImageIndex")?,
        })
    }
}

fn unsigned(value: i64, column: &str) -> crate::Result<u64> {
    u64::try_from(value)
        .map_err(|_| crate::Error::integrity(format!("negative {column} value {value}")))
}

/// Render a loosely typed column as text.
fn value_to_string(value: Value) -> Option<String> {
    match value {
        Value::Text(s) if !s.is_empty() => Some(s),
        Value::Integer(i) => Some(i.to_string()),
        Value::Real(f) => Some(f.to_string()),
        _ => None,
    }
}

/// Strip the leading marker from a stored color, e.g. `"#00FF00"` -> `"00FF00"`.
///
/// Colors stored with an alpha byte (`"#FF00FF00"`) keep their RGB part.
pub fn strip_color_marker(color: &str) -> String {
    let hex = color.trim_start_matches(|c: char| !c.is_ascii_hexdigit());
    if hex.len() == 8 {
        hex[2..].to_string()
    } else {
        hex.to_string()
    }
}

impl Catalog {
    /// Open the index file read-only.
    pub fn open(path: impl AsRef<Path>) -> crate::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open_with_flags(
            &path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        let mut catalog = Self {
            conn,
            path,
            tile_z: ("0", "1"),
        };
        let columns = catalog.columns(TILE_TABLE)?;
        if columns.is_empty() {
            return Err(crate::Error::not_found(format!(
                "no {TILE_TABLE} table in {}",
                catalog.path.display()
            )));
        }
        if columns.contains("CoordZ") && columns.contains("SizeZ") {
            catalog.tile_z = ("CoordZ", "SizeZ");
        }
        Ok(catalog)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Column names of `table`; empty if the table does not exist.
    fn columns(&self, table: &str) -> crate::Result<HashSet<String>> {
        let mut stmt = self.conn.prepare(&format!("PRAGMA table_info({table})"))?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<Result<HashSet<_>, _>>()?;
        Ok(names)
    }

    fn distinct_tile_column(&self, column: &str) -> crate::Result<Vec<i64>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT DISTINCT {column} FROM {TILE_TABLE} ORDER BY {column} ASC"
        ))?;
        let values = stmt
            .query_map([], |row| row.get::<_, i64>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(values)
    }

    pub fn time_points(&self) -> crate::Result<Vec<i64>> {
        self.distinct_tile_column("TimeSeriesElementId")
    }

    pub fn levels(&self) -> crate::Result<Vec<i64>> {
        self.distinct_tile_column("level")
    }

    pub fn experiment(&self) -> crate::Result<ExperimentInfo> {
        let (ticks, creator, name) = self.conn.query_row(
            "SELECT DateCreated, Creator, Name FROM ExperimentBase LIMIT 1",
            [],
            |row| {
                Ok((
                    row.get::<_, i64>("DateCreated")?,
                    row.get::<_, Option<String>>("Creator")?,
                    row.get::<_, Option<String>>("Name")?,
                ))
            },
        )?;
        Ok(ExperimentInfo {
            name: name.unwrap_or_default(),
            creator: creator.unwrap_or_default(),
            created: ticks_to_datetime(ticks)?,
            acquisitions: self.acquisitions()?,
            time_points: self.time_points()?,
            levels: self.levels()?,
        })
    }

    pub fn acquisitions(&self) -> crate::Result<Vec<AcquisitionInfo>> {
        let mut stmt = self
            .conn
            .prepare("SELECT Name, Description, DateCreated, DateModified FROM AcquisitionExp")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, Option<String>>("Name")?,
                    row.get::<_, Option<String>>("Description")?,
                    row.get::<_, i64>("DateCreated")?,
                    row.get::<_, i64>("DateModified")?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter()
            .map(|(name, description, created, modified)| {
                Ok(AcquisitionInfo {
                    name: name.unwrap_or_default(),
                    description: description.filter(|d| !d.is_empty()),
                    created: ticks_to_datetime(created)?,
                    modified: ticks_to_datetime(modified)?,
                })
            })
            .collect()
    }

    pub fn plate_geometry(&self) -> crate::Result<PlateGeometry> {
        let sites_z = if self
            .columns("AutomaticZonesParametersExp")?
            .contains("SitesZ")
        {
            "SitesZ"
        } else {
            "1"
        };
        let sql = format!(
            "SELECT SensorSizeYPixels, SensorSizeXPixels, Objective, PixelSizeUm, SensorBitness, \
             SitesX, SitesY, {sites_z} AS SitesZ \
             FROM AcquisitionExp, AutomaticZonesParametersExp LIMIT 1"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query([])?;
        let row = rows
            .next()?
            .ok_or_else(|| crate::Error::not_found("plate geometry (acquisition parameters)"))?;
        let sites = |column: &str| -> crate::Result<u64> {
            let value = unsigned(row.get::<_, i64>(column)?, column)?;
            Ok(value.max(1))
        };
        let sensor_bits = row.get::<_, i64>("SensorBitness")?;
        Ok(PlateGeometry {
            sensor_size_x: unsigned(row.get("SensorSizeXPixels")?, "SensorSizeXPixels")?,
            sensor_size_y: unsigned(row.get("SensorSizeYPixels")?, "SensorSizeYPixels")?,
            objective: value_to_string(row.get::<_, Value>("Objective")?),
            pixel_size_um: row.get("PixelSizeUm")?,
            sensor_bits: u32::try_from(sensor_bits).map_err(|_| {
                crate::Error::integrity(format!("invalid SensorBitness {sensor_bits}"))
            })?,
            sites_x: sites("SitesX")?,
            sites_y: sites("SitesY")?,
            sites_z: sites("SitesZ")?,
        })
    }

    /// Declared channels ordered by channel number.
    pub fn channels(&self) -> crate::Result<Vec<ChannelInfo>> {
        let mut stmt = self.conn.prepare(
            "SELECT Emission, Excitation, Dye, ChannelNumber, Color \
             FROM ImagechannelExp ORDER BY ChannelNumber ASC",
        )?;
        let channels = stmt
            .query_map([], |row| {
                let id: i64 = row.get("ChannelNumber")?;
                let dye: Option<String> = row.get("Dye")?;
                let color: Option<String> = row.get("Color")?;
                Ok(ChannelInfo {
                    id,
                    label: dye
                        .filter(|d| !d.is_empty())
                        .unwrap_or_else(|| format!("Channel {id}")),
                    color: color
                        .map(|c| strip_color_marker(&c))
                        .unwrap_or_else(|| "FFFFFF".to_string()),
                    emission_nm: row.get("Emission")?,
                    excitation_nm: row.get("Excitation")?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(channels)
    }

    /// Every well label on the plate, imaged or not, as stored.
    pub fn well_labels(&self) -> crate::Result<Vec<String>> {
        let mut stmt = self.conn.prepare("SELECT DISTINCT Name FROM Well")?;
        let labels = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(labels)
    }

    /// Imaged wells with normalized labels, in plate order.
    pub fn imaged_wells(&self) -> crate::Result<Vec<WellInfo>> {
        let columns = self.columns("Well")?;
        let position = if columns.contains("CoordX") && columns.contains("CoordY") {
            "CoordX, CoordY"
        } else {
            "NULL AS CoordX, NULL AS CoordY"
        };
        let mut stmt = self.conn.prepare(&format!(
            "SELECT Name, ZoneIndex, {position} FROM Well WHERE HasImages = 1"
        ))?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>("Name")?,
                    row.get::<_, i64>("ZoneIndex")?,
                    row.get::<_, Option<f64>>("CoordX")?,
                    row.get::<_, Option<f64>>("CoordY")?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        let mut wells = rows
            .into_iter()
            .map(|(name, zone_id, x, y)| {
                Ok(WellInfo {
                    label: normalize_well_label(&name)?,
                    zone_id,
                    position_um: x.zip(y),
                })
            })
            .collect::<crate::Result<Vec<_>>>()?;
        wells.sort_by(|a, b| compare_wells(&a.label, &b.label));
        Ok(wells)
    }

    /// Widest sample bit depth present in the tile index.
    pub fn bits_per_pixel(&self) -> crate::Result<u32> {
        let bits: Option<i64> = self.conn.query_row(
            &format!("SELECT MAX(BitsPerPixel) FROM {TILE_TABLE}"),
            [],
            |row| row.get(0),
        )?;
        let bits = bits.ok_or_else(|| crate::Error::not_found("tiles in the index"))?;
        u32::try_from(bits)
            .map_err(|_| crate::Error::integrity(format!("invalid BitsPerPixel {bits}")))
    }

    /// Canvas bounds of every zone that has tiles at `level`.
    pub fn well_bounds(&self, level: i64) -> crate::Result<BTreeMap<i64, WellBounds>> {
        let (z, sz) = self.tile_z;
        let mut stmt = self.conn.prepare(&format!(
            "SELECT ZoneIndex, MAX(CoordX + SizeX), MAX(CoordY + SizeY), MAX({z} + {sz}) \
             FROM {TILE_TABLE} WHERE level = ?1 GROUP BY ZoneIndex"
        ))?;
        let rows = stmt
            .query_map(params![level], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter()
            .map(|(zone, x, y, z)| {
                Ok((
                    zone,
                    WellBounds {
                        x: unsigned(x, "CoordX + SizeX")?,
                        y: unsigned(y, "CoordY + SizeY")?,
                        z: unsigned(z, "CoordZ + SizeZ")?,
                    },
                ))
            })
            .collect()
    }

    /// True if every tile at `level` is one whole sensor frame on the frame grid.
    pub fn tiles_are_sensor_frames(
        &self,
        level: i64,
        sensor_x: u64,
        sensor_y: u64,
    ) -> crate::Result<bool> {
        if sensor_x == 0 || sensor_y == 0 {
            return Ok(false);
        }
        let misaligned: i64 = self.conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM {TILE_TABLE} WHERE level = ?1 \
                 AND (SizeX != ?2 OR SizeY != ?3 OR CoordX % ?2 != 0 OR CoordY % ?3 != 0)"
            ),
            params![level, sensor_x as i64, sensor_y as i64],
            |row| row.get(0),
        )?;
        Ok(misaligned == 0)
    }

    /// All tiles of a zone at `level`, ordered by x then y.
    pub fn tiles(&self, zone_id: i64, level: i64) -> crate::Result<Vec<TileRecord>> {
        let (z, sz) = self.tile_z;
        let mut stmt = self.conn.prepare(&format!(
            "SELECT ZoneIndex, level, TimeSeriesElementId, ChannelId, \
             CoordX, CoordY, {z} AS CoordZ, SizeX, SizeY, {sz} AS SizeZ, BitsPerPixel, ImageIndex \
             FROM {TILE_TABLE} WHERE ZoneIndex = ?1 AND level = ?2 \
             ORDER BY CoordX ASC, CoordY ASC"
        ))?;
        let raw = stmt
            .query_map(params![zone_id, level], RawTile::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        raw.into_iter().map(TileRecord::try_from).collect()
    }

    /// Zones holding at least one tile for `time_point`.
    pub fn zones_at_time_point(&self, time_point: i64) -> crate::Result<HashSet<i64>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT DISTINCT ZoneIndex FROM {TILE_TABLE} WHERE TimeSeriesElementId = ?1"
        ))?;
        let zones = stmt
            .query_map(params![time_point], |row| row.get::<_, i64>(0))?
            .collect::<Result<HashSet<_>, _>>()?;
        Ok(zones)
    }
}
