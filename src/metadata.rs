//! NGFF (OME-Zarr) attribute documents and the builders that derive them
//! from an image source.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::format::SchemaVersion;
use crate::pixel::PixelType;
use crate::source::{AcquisitionInfo, AxisValues, ChannelInfo};
use crate::ticks::to_epoch_millis;
use crate::well::{split_well_label, well_path};

/// Axis type as understood by NGFF viewers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AxisKind {
    Time,
    Channel,
    Space,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Axis {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: AxisKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "type")]
pub enum CoordinateTransformation {
    Scale { scale: Vec<f64> },
    Translation { translation: Vec<f64> },
}

/// One pyramid level of a multiscale image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    /// Array path relative to the image group, `"0"`, `"1"`, ...
    pub path: String,
    #[serde(rename = "coordinateTransformations")]
    pub coordinate_transformations: Vec<CoordinateTransformation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Multiscale {
    pub name: String,
    pub axes: Vec<Axis>,
    pub datasets: Vec<Dataset>,
}

/// Display range of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Window {
    pub start: f64,
    pub end: f64,
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OmeroChannel {
    pub label: String,
    /// Hex RGB without a leading `#`.
    pub color: String,
    pub active: bool,
    pub window: Window,
}

/// Per-channel rendering hints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Omero {
    pub channels: Vec<OmeroChannel>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedEntry {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlateWell {
    /// `row/column`, e.g. `"B/2"`.
    pub path: String,
    pub row_index: usize,
    pub column_index: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlateAcquisition {
    pub id: usize,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Milliseconds since the Unix epoch.
    pub starttime: i64,
    pub endtime: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plate {
    pub name: String,
    pub rows: Vec<NamedEntry>,
    pub columns: Vec<NamedEntry>,
    pub wells: Vec<PlateWell>,
    pub field_count: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub acquisitions: Vec<PlateAcquisition>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WellImage {
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Well {
    pub images: Vec<WellImage>,
}

/// Producer stamp on the root group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Creator {
    pub name: String,
    pub version: String,
}

impl Default for Creator {
    fn default() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// NGFF attributes of one group, before schema versioning.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NgffAttributes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multiscales: Option<Vec<Multiscale>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub omero: Option<Omero>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plate: Option<Plate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub well: Option<Well>,
}

impl NgffAttributes {
    /// Attribute map in the layout of `schema`.
    ///
    /// 0.4 stamps `version` inside each NGFF object; 0.5 nests everything
    /// under a single `ome` key carrying the version once.
    pub fn to_attributes(&self, schema: SchemaVersion) -> crate::Result<Map<String, Value>> {
        let Value::Object(mut map) = serde_json::to_value(self)? else {
            return Err(crate::Error::integrity("NGFF attributes are not an object"));
        };
        let version = Value::from(schema.as_str());
        match schema {
            SchemaVersion::V04 => {
                for value in map.values_mut() {
                    match value {
                        Value::Array(items) => items.iter_mut().for_each(|item| {
                            if let Value::Object(o) = item {
                                o.insert("version".into(), version.clone());
                            }
                        }),
                        Value::Object(o) => {
                            o.insert("version".into(), version.clone());
                        }
                        _ => {}
                    }
                }
                Ok(map)
            }
            SchemaVersion::V05 => {
                let mut ome = Map::new();
                ome.insert("version".into(), version);
                ome.extend(map);
                let mut out = Map::new();
                out.insert("ome".into(), Value::Object(ome));
                Ok(out)
            }
        }
    }
}

/// Axes for a dimension order such as `"tczyx"`.
pub fn create_axes_metadata(dim_order: &str) -> Vec<Axis> {
    dim_order
        .chars()
        .map(|name| {
            let (kind, unit) = match name {
                't' => (AxisKind::Time, Some("millisecond")),
                'c' => (AxisKind::Channel, None),
                _ => (AxisKind::Space, Some("micrometer")),
            };
            Axis {
                name: name.to_string(),
                kind,
                unit: unit.map(str::to_string),
            }
        })
        .collect()
}

fn is_halved(axis: char) -> bool {
    matches!(axis, 'x' | 'y')
}

/// Transformations of pyramid level `level`.
///
/// X and Y are scaled by `2^level`, both in pixel size and in translation.
/// Other axes keep their source pixel size (1 if unknown) and no offset. The
/// translation entry is omitted when it would be all zero.
pub fn create_transformation_metadata(
    dim_order: &str,
    pixel_size_um: &AxisValues,
    position_um: &AxisValues,
    level: u32,
) -> Vec<CoordinateTransformation> {
    let factor = f64::from(1u32 << level.min(31));
    let scale = dim_order
        .chars()
        .map(|axis| {
            let size = pixel_size_um.get(&axis).copied().unwrap_or(1.0);
            if is_halved(axis) { size * factor } else { size }
        })
        .collect();
    let translation: Vec<f64> = dim_order
        .chars()
        .map(|axis| match position_um.get(&axis) {
            Some(&p) if is_halved(axis) => p * factor,
            _ => 0.0,
        })
        .collect();

    let mut transformations = vec![CoordinateTransformation::Scale { scale }];
    if translation.iter().any(|&t| t != 0.0) {
        transformations.push(CoordinateTransformation::Translation { translation });
    }
    transformations
}

const RGB: [(&str, &str); 3] = [("Red", "FF0000"), ("Green", "00FF00"), ("Blue", "0000FF")];

/// Rendering hints for `nchannels` channels of `pixel_type`.
///
/// Three-channel data with fewer than three declared channels is treated as
/// RGB; other undeclared channels get a generic label in white.
pub fn create_channel_metadata(
    channels: &[ChannelInfo],
    nchannels: usize,
    pixel_type: PixelType,
) -> Omero {
    let (min, max) = pixel_type.window();
    let window = Window {
        start: min,
        end: max,
        min,
        max,
    };
    let rgb = nchannels == 3 && channels.len() < 3;
    let channels = (0..nchannels)
        .map(|index| {
            let (label, color) = match channels.get(index) {
                Some(c) if !rgb => (c.label.clone(), c.color.clone()),
                _ if rgb => (RGB[index].0.to_string(), RGB[index].1.to_string()),
                _ => (format!("Channel {index}"), "FFFFFF".to_string()),
            };
            OmeroChannel {
                label,
                color,
                active: true,
                window,
            }
        })
        .collect();
    Omero { channels }
}

/// Plate document for the imaged `wells`, with row/column indices into
/// `rows` and `columns`.
pub fn create_plate_metadata(
    name: &str,
    rows: &[String],
    columns: &[String],
    wells: &[String],
    field_count: usize,
    acquisitions: &[AcquisitionInfo],
) -> crate::Result<Plate> {
    let wells = wells
        .iter()
        .map(|label| {
            let (row, column) = split_well_label(label, true)?;
            let index = |names: &[String], name: &str| {
                names.iter().position(|n| n == name).ok_or_else(|| {
                    crate::Error::integrity(format!("well {label} outside the plate layout"))
                })
            };
            Ok(PlateWell {
                path: well_path(label)?,
                row_index: index(rows, &row)?,
                column_index: index(columns, &column)?,
            })
        })
        .collect::<crate::Result<Vec<_>>>()?;
    let acquisitions = acquisitions
        .iter()
        .enumerate()
        .map(|(id, a)| PlateAcquisition {
            id,
            name: a.name.clone(),
            description: a.description.clone(),
            starttime: to_epoch_millis(&a.created),
            endtime: to_epoch_millis(&a.modified),
        })
        .collect();
    let named = |names: &[String]| {
        names
            .iter()
            .map(|n| NamedEntry { name: n.clone() })
            .collect()
    };
    Ok(Plate {
        name: name.to_string(),
        rows: named(rows),
        columns: named(columns),
        wells,
        field_count,
        acquisitions,
    })
}

pub fn create_well_metadata(fields: &[String]) -> Well {
    Well {
        images: fields
            .iter()
            .map(|f| WellImage { path: f.clone() })
            .collect(),
    }
}
