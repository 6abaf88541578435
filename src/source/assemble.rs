//! Reassembly of a dense well canvas from scattered tiles.
//!
//! Pixel payloads live in one blob file per timepoint, next to the index
//! file. Each tile points at a contiguous run of little-endian samples,
//! row-major within a plane and plane-major for 3D tiles.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use ndarray::{ArrayD, IxDyn, Slice};
use serde::{Deserialize, Serialize};

use super::{TileRecord, WellBounds};
use crate::pixel::Sample;

/// What to do when two tiles of the same channel and timepoint overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlapPolicy {
    /// Later tiles overwrite earlier pixels; each overlap is logged.
    #[default]
    Overwrite,
    /// Overlapping tiles are an integrity error.
    Reject,
}

/// Axis layout of an assembled canvas, `(t, c, z, y, x)`.
#[derive(Debug, Clone, Copy)]
pub struct CanvasLayout<'a> {
    pub time_points: &'a [i64],
    pub channels: &'a [i64],
    pub bounds: WellBounds,
}

impl CanvasLayout<'_> {
    pub fn shape(&self) -> [usize; 5] {
        [
            self.time_points.len(),
            self.channels.len(),
            self.bounds.z as usize,
            self.bounds.y as usize,
            self.bounds.x as usize,
        ]
    }
}

/// Blob file holding the pixels of `time_point`, next to the index file.
pub fn blob_path(index_path: &Path, time_point: i64) -> PathBuf {
    let dir = index_path.parent().unwrap_or_else(|| Path::new("."));
    dir.join(format!("images-{time_point}.db"))
}

/// Bytes per stored sample for a bit depth.
pub fn stored_sample_width(bits_per_pixel: u32) -> usize {
    bits_per_pixel.div_ceil(8) as usize
}

struct Placement<'t> {
    tile: &'t TileRecord,
    t: usize,
    c: usize,
}

/// Resolve every tile to canvas indices, enforcing the canvas invariants.
fn place<'t, T: Sample>(
    tiles: &'t [TileRecord],
    layout: &CanvasLayout<'_>,
    policy: OverlapPolicy,
) -> crate::Result<Vec<Placement<'t>>> {
    let mut placed: Vec<Placement<'t>> = Vec::with_capacity(tiles.len());
    for tile in tiles {
        let c = layout
            .channels
            .iter()
            .position(|&id| id == tile.channel_id)
            .ok_or_else(|| {
                crate::Error::integrity(format!(
                    "tile in zone {} refers to undeclared channel {}",
                    tile.zone_id, tile.channel_id
                ))
            })?;
        let t = layout
            .time_points
            .iter()
            .position(|&id| id == tile.time_point)
            .ok_or_else(|| {
                crate::Error::integrity(format!(
                    "tile in zone {} refers to unknown timepoint {}",
                    tile.zone_id, tile.time_point
                ))
            })?;
        if !layout.bounds.contains(tile) {
            return Err(crate::Error::integrity(format!(
                "tile at {:?} of size {:?} exceeds canvas {:?}",
                tile.coord, tile.size, layout.bounds
            )));
        }
        let width = stored_sample_width(tile.bits_per_pixel);
        if width == 0 || width > size_of::<T>() {
            return Err(crate::Error::integrity(format!(
                "{}-bit tile does not fit {:?} pixels",
                tile.bits_per_pixel,
                T::PIXEL_TYPE
            )));
        }
        for other in placed.iter().filter(|p| p.t == t && p.c == c) {
            if other.tile.overlaps(tile) {
                match policy {
                    OverlapPolicy::Overwrite => log::warn!(
                        "tile at {:?} overwrites tile at {:?} (zone {}, channel {}, timepoint {})",
                        tile.coord,
                        other.tile.coord,
                        tile.zone_id,
                        tile.channel_id,
                        tile.time_point
                    ),
                    OverlapPolicy::Reject => {
                        return Err(crate::Error::integrity(format!(
                            "tile at {:?} overlaps tile at {:?} (zone {}, channel {}, timepoint {})",
                            tile.coord,
                            other.tile.coord,
                            tile.zone_id,
                            tile.channel_id,
                            tile.time_point
                        )));
                    }
                }
            }
        }
        placed.push(Placement { tile, t, c });
    }
    Ok(placed)
}

fn read_tile<T: Sample>(file: &mut File, tile: &TileRecord) -> crate::Result<ArrayD<T>> {
    let width = stored_sample_width(tile.bits_per_pixel);
    let mut bytes = vec![0u8; tile.num_samples() as usize * width];
    file.seek(SeekFrom::Start(tile.offset))?;
    file.read_exact(&mut bytes)?;
    let samples: Vec<T> = bytes.chunks_exact(width).map(T::from_le_slice).collect();
    let [sx, sy, sz] = tile.size.map(|n| n as usize);
    ArrayD::from_shape_vec(IxDyn(&[1, 1, sz, sy, sx]), samples)
        .map_err(|e| crate::Error::integrity(format!("tile reshape failed: {e}")))
}

/// Composite `tiles` into a zero-initialised `(t, c, z, y, x)` canvas.
///
/// Blob files are opened once per timepoint and closed before the next one.
/// A missing or short blob file is fatal.
pub fn assemble<T: Sample>(
    tiles: &[TileRecord],
    layout: &CanvasLayout<'_>,
    index_path: &Path,
    policy: OverlapPolicy,
) -> crate::Result<ArrayD<T>> {
    let placements = place::<T>(tiles, layout, policy)?;
    let mut canvas = ArrayD::from_elem(IxDyn(&layout.shape()), T::default());

    let mut by_time_point: BTreeMap<i64, Vec<&Placement<'_>>> = BTreeMap::new();
    for placement in &placements {
        by_time_point
            .entry(placement.tile.time_point)
            .or_default()
            .push(placement);
    }

    for (time_point, placements) in by_time_point {
        let path = blob_path(index_path, time_point);
        let mut file = File::open(&path).map_err(|e| {
            std::io::Error::new(e.kind(), format!("{}: {e}", path.display()))
        })?;
        log::debug!(
            "reading {} tiles from {}",
            placements.len(),
            path.display()
        );
        for placement in placements {
            let tile = placement.tile;
            let data = read_tile::<T>(&mut file, tile).map_err(|e| match e {
                crate::Error::Io(io) => crate::Error::Io(std::io::Error::new(
                    io.kind(),
                    format!(
                        "{} at offset {}: {io}",
                        path.display(),
                        tile.offset
                    ),
                )),
                other => other,
            })?;
            let [x, y, z] = tile.coord.map(|n| n as usize);
            let [sx, sy, sz] = tile.size.map(|n| n as usize);
            let (t, c) = (placement.t, placement.c);
            canvas
                .slice_each_axis_mut(|ax| match ax.axis.index() {
                    0 => Slice::from(t..t + 1),
                    1 => Slice::from(c..c + 1),
                    2 => Slice::from(z..z + sz),
                    3 => Slice::from(y..y + sy),
                    _ => Slice::from(x..x + sx),
                })
                .assign(&data);
        }
    }
    Ok(canvas)
}
