#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use rusqlite::{Connection, params};
use tempfile::TempDir;

/// Ticks of 2024-12-09 10:30:15 UTC.
pub const CREATED_TICKS: i64 = 621_355_968_000_000_000 + 1_733_740_215 * 10_000_000;

const SCHEMA: &str = "
CREATE TABLE ExperimentBase (DateCreated INTEGER, Creator TEXT, Name TEXT);
CREATE TABLE AcquisitionExp (
    Name TEXT, Description TEXT, DateCreated INTEGER, DateModified INTEGER,
    SensorSizeXPixels INTEGER, SensorSizeYPixels INTEGER, Objective TEXT,
    PixelSizeUm REAL, SensorBitness INTEGER
);
CREATE TABLE AutomaticZonesParametersExp (SitesX INTEGER, SitesY INTEGER);
CREATE TABLE ImagechannelExp (
    ChannelNumber INTEGER, Emission REAL, Excitation REAL, Dye TEXT, Color TEXT
);
CREATE TABLE Well (
    Name TEXT, ZoneIndex INTEGER, HasImages INTEGER, CoordX REAL, CoordY REAL
);
CREATE TABLE SourceImageBase (
    ZoneIndex INTEGER, level INTEGER, TimeSeriesElementId INTEGER, ChannelId INTEGER,
    CoordX INTEGER, CoordY INTEGER, SizeX INTEGER, SizeY INTEGER,
    BitsPerPixel INTEGER, ImageIndex INTEGER
);
";

const Z_COLUMNS: &str = "
ALTER TABLE SourceImageBase ADD COLUMN CoordZ INTEGER;
ALTER TABLE SourceImageBase ADD COLUMN SizeZ INTEGER;
ALTER TABLE AutomaticZonesParametersExp ADD COLUMN SitesZ INTEGER;
";

/// Deterministic sample value of a canvas pixel.
pub fn pattern(zone: i64, time_point: i64, channel: i64, x: u64, y: u64) -> u64 {
    (zone as u64) * 4096 + (time_point as u64) * 1024 + (channel as u64) * 256 + y * 16 + x
}

/// [`pattern`] of a pixel in plane `z`.
pub fn pattern_3d(zone: i64, time_point: i64, channel: i64, x: u64, y: u64, z: u64) -> u64 {
    pattern(zone, time_point, channel, x, y) + z * 8192
}

/// A synthetic experiment index plus blob files in a temporary directory.
pub struct Experiment {
    _dir: TempDir,
    pub root: PathBuf,
    pub index: PathBuf,
}

pub struct ExperimentBuilder {
    dir: TempDir,
    root: PathBuf,
    conn: Connection,
    blobs: BTreeMap<i64, Vec<u8>>,
}

impl ExperimentBuilder {
    /// New experiment in a directory called `name`, with `(sites_x, sites_y)` fields
    /// and channels given as `(number, dye, color)`.
    pub fn new(name: &str, sites: (u64, u64), channels: &[(i64, &str, &str)]) -> Self {
        Self::create(name, (sites.0, sites.1, None), channels)
    }

    /// Like [`ExperimentBuilder::new`], with the optional z columns in the
    /// index and `sites_z` fields along z. Tiles must be added with
    /// [`ExperimentBuilder::tile_3d`].
    pub fn new_3d(name: &str, sites: (u64, u64, u64), channels: &[(i64, &str, &str)]) -> Self {
        Self::create(name, (sites.0, sites.1, Some(sites.2)), channels)
    }

    fn create(name: &str, sites: (u64, u64, Option<u64>), channels: &[(i64, &str, &str)]) -> Self {
        env_logger::try_init().ok();
        let dir = tempfile::tempdir().expect("create temp dir");
        let root = dir.path().join(name);
        std::fs::create_dir_all(&root).expect("create experiment dir");
        let conn = Connection::open(root.join("experiment.db")).expect("create index");
        conn.execute_batch(SCHEMA).expect("create schema");
        if sites.2.is_some() {
            conn.execute_batch(Z_COLUMNS).expect("add z columns");
        }
        conn.execute(
            "INSERT INTO ExperimentBase VALUES (?1, 'tester', ?2)",
            params![CREATED_TICKS, name],
        )
        .expect("insert experiment");
        conn.execute(
            "INSERT INTO AcquisitionExp VALUES ('run 1', '', ?1, ?2, 8, 8, '20x', 0.5, 16)",
            params![CREATED_TICKS, CREATED_TICKS + 36_000_000_000],
        )
        .expect("insert acquisition");
        conn.execute(
            "INSERT INTO AutomaticZonesParametersExp (SitesX, SitesY) VALUES (?1, ?2)",
            params![sites.0 as i64, sites.1 as i64],
        )
        .expect("insert sites");
        if let Some(sites_z) = sites.2 {
            conn.execute(
                "UPDATE AutomaticZonesParametersExp SET SitesZ = ?1",
                params![sites_z as i64],
            )
            .expect("set sites z");
        }
        for &(number, dye, color) in channels {
            conn.execute(
                "INSERT INTO ImagechannelExp VALUES (?1, 520.0, 488.0, ?2, ?3)",
                params![number, dye, color],
            )
            .expect("insert channel");
        }
        Self {
            dir,
            root,
            conn,
            blobs: BTreeMap::new(),
        }
    }

    pub fn well(self, label: &str, zone: i64, imaged: bool, position: Option<(f64, f64)>) -> Self {
        self.conn
            .execute(
                "INSERT INTO Well VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    label,
                    zone,
                    imaged as i64,
                    position.map(|p| p.0),
                    position.map(|p| p.1)
                ],
            )
            .expect("insert well");
        self
    }

    /// Tile at `(x, y)` of size `(w, h)` with samples from [`pattern`], stored
    /// in `ceil(bits / 8)` little-endian bytes.
    pub fn tile(
        self,
        zone: i64,
        time_point: i64,
        channel: i64,
        (x, y): (u64, u64),
        (w, h): (u64, u64),
        bits: u32,
    ) -> Self {
        self.insert_tile(zone, time_point, channel, [x, y, 0], [w, h, 1], bits, false)
    }

    /// Tile at `(x, y, z)` of size `(w, h, d)` with samples from
    /// [`pattern_3d`], stored plane by plane.
    pub fn tile_3d(
        self,
        zone: i64,
        time_point: i64,
        channel: i64,
        (x, y, z): (u64, u64, u64),
        (w, h, d): (u64, u64, u64),
        bits: u32,
    ) -> Self {
        self.insert_tile(zone, time_point, channel, [x, y, z], [w, h, d], bits, true)
    }

    #[allow(clippy::too_many_arguments)]
    fn insert_tile(
        mut self,
        zone: i64,
        time_point: i64,
        channel: i64,
        coord: [u64; 3],
        size: [u64; 3],
        bits: u32,
        with_z: bool,
    ) -> Self {
        let width = bits.div_ceil(8) as usize;
        let blob = self.blobs.entry(time_point).or_default();
        let offset = blob.len() as i64;
        for plane in coord[2]..coord[2] + size[2] {
            for row in coord[1]..coord[1] + size[1] {
                for column in coord[0]..coord[0] + size[0] {
                    let value = pattern_3d(zone, time_point, channel, column, row, plane);
                    blob.extend_from_slice(&value.to_le_bytes()[..width]);
                }
            }
        }
        let [x, y, z] = coord.map(|n| n as i64);
        let [w, h, d] = size.map(|n| n as i64);
        if with_z {
            self.conn
                .execute(
                    "INSERT INTO SourceImageBase (ZoneIndex, level, TimeSeriesElementId, ChannelId, \
                     CoordX, CoordY, CoordZ, SizeX, SizeY, SizeZ, BitsPerPixel, ImageIndex) \
                     VALUES (?1, 0, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                    params![zone, time_point, channel, x, y, z, w, h, d, bits as i64, offset],
                )
                .expect("insert tile");
        } else {
            self.conn
                .execute(
                    "INSERT INTO SourceImageBase (ZoneIndex, level, TimeSeriesElementId, ChannelId, \
                     CoordX, CoordY, SizeX, SizeY, BitsPerPixel, ImageIndex) \
                     VALUES (?1, 0, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    params![zone, time_point, channel, x, y, w, h, bits as i64, offset],
                )
                .expect("insert tile");
        }
        self
    }

    /// Run raw SQL against the index, e.g. to corrupt it.
    pub fn sql(self, sql: &str) -> Self {
        self.conn.execute_batch(sql).expect("run sql");
        self
    }

    pub fn finish(self) -> Experiment {
        for (time_point, blob) in &self.blobs {
            std::fs::write(self.root.join(format!("images-{time_point}.db")), blob)
                .expect("write blob");
        }
        drop(self.conn);
        Experiment {
            index: self.root.join("experiment.db"),
            root: self.root,
            _dir: self.dir,
        }
    }
}

impl Experiment {
    pub fn blob(&self, time_point: i64) -> PathBuf {
        self.root.join(format!("images-{time_point}.db"))
    }
}

/// Two imaged wells (B2 at zone 1, C10 at zone 2), one unimaged well,
/// 2 channels, 2 timepoints, a 2×2 field grid, each well an 8×8 canvas of
/// four 4×4 tiles per channel and timepoint, 12-bit samples.
pub fn plate() -> Experiment {
    let mut builder = ExperimentBuilder::new(
        "Plate 1",
        (2, 2),
        &[(1, "DAPI", "#0000FF"), (2, "GFP", "#00FF00")],
    )
    .well("B02", 1, true, Some((1000.0, 2000.0)))
    .well("C10", 2, true, None)
    .well("A01", 3, false, None);
    for zone in [1, 2] {
        for time_point in [0, 1] {
            for channel in [1, 2] {
                for (x, y) in [(0, 0), (4, 0), (0, 4), (4, 4)] {
                    builder = builder.tile(zone, time_point, channel, (x, y), (4, 4), 12);
                }
            }
        }
    }
    builder.finish()
}

pub fn output_dir() -> TempDir {
    tempfile::tempdir().expect("create output dir")
}

pub fn read_json(path: &Path) -> serde_json::Value {
    let text = std::fs::read_to_string(path)
        .unwrap_or_else(|e| panic!("read {}: {e}", path.display()));
    serde_json::from_str(&text).expect("valid json")
}
