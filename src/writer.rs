//! Multiscale OME-Zarr writer over any [`ImageSource`].

use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::codec::{ChunkPolicy, Compression};
use crate::format::ZarrFormat;
use crate::metadata::{
    Creator, Dataset, Multiscale, NgffAttributes, Omero, create_axes_metadata,
    create_channel_metadata, create_plate_metadata, create_transformation_metadata,
    create_well_metadata,
};
use crate::pixel::ImageData;
use crate::pyramid::{NearestScaler, Scaler, ScalerConfig};
use crate::source::{AxisValues, FieldSelection, ImageSource};
use crate::storage::NgffStore;
use crate::well::{split_well_label, well_path};

/// Writer settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterConfig {
    pub format: ZarrFormat,
    pub chunking: ChunkPolicy,
    pub compression: Compression,
    pub scaler: ScalerConfig,
}

impl WriterConfig {
    pub fn validate(&self) -> crate::Result<()> {
        self.chunking.validate()?;
        self.compression.validate()
    }
}

/// Human-readable byte count, e.g. `"1.5 MB"`.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["KB", "MB", "GB", "TB", "PB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}

fn join_path(parent: &str, child: &str) -> String {
    if parent.is_empty() {
        child.to_string()
    } else {
        format!("{parent}/{child}")
    }
}

/// One multiscale image to be written.
struct ImageGroup<'a> {
    path: &'a str,
    name: &'a str,
    dim_order: &'a str,
    pixel_size_um: &'a AxisValues,
    position_um: &'a AxisValues,
    omero: &'a Omero,
}

pub struct OmeZarrWriter {
    config: WriterConfig,
    scaler: Box<dyn Scaler>,
    creator: Creator,
}

impl OmeZarrWriter {
    /// Fails with a configuration error before any I/O if `config` is invalid.
    pub fn new(config: WriterConfig) -> crate::Result<Self> {
        config.validate()?;
        let scaler = Box::new(NearestScaler::new(config.scaler));
        Ok(Self {
            config,
            scaler,
            creator: Creator::default(),
        })
    }

    pub fn config(&self) -> &WriterConfig {
        &self.config
    }

    /// Write `source` to `dest`, returning the uncompressed bytes written.
    ///
    /// Plates become a row/column/field hierarchy; other sources become a
    /// single multiscale image at the root.
    pub fn write(&self, dest: &Path, source: &mut dyn ImageSource) -> crate::Result<u64> {
        let store = NgffStore::create(dest, self.config.format)?;
        log::info!(
            "writing {} as NGFF {} to {}",
            source.name(),
            self.config.format.schema().as_str(),
            dest.display()
        );
        let total = if source.is_screen() {
            self.write_plate(&store, source)?
        } else {
            self.write_single_image(&store, source)?
        };
        log::info!("wrote {} to {}", format_bytes(total), dest.display());
        Ok(total)
    }

    fn attributes(
        &self,
        attributes: &NgffAttributes,
        root: bool,
    ) -> crate::Result<Map<String, Value>> {
        let mut map = attributes.to_attributes(self.config.format.schema())?;
        if root {
            map.insert("_creator".into(), serde_json::to_value(&self.creator)?);
        }
        Ok(map)
    }

    fn write_plate(&self, store: &NgffStore, source: &mut dyn ImageSource) -> crate::Result<u64> {
        let name = source.name();
        let rows = source.rows()?;
        let columns = source.columns()?;
        let wells = source.wells()?;
        let fields = source.fields()?;
        let acquisitions = source.acquisitions()?;

        let plate = create_plate_metadata(
            &name,
            &rows,
            &columns,
            &wells,
            fields.len(),
            &acquisitions,
        )?;
        let root = NgffAttributes {
            plate: Some(plate),
            ..Default::default()
        };
        store.write_group("", self.attributes(&root, true)?)?;

        let dim_order = source.dim_order();
        let pixel_size_um = source.pixel_size_um();
        let omero = create_channel_metadata(
            &source.channels(),
            source.nchannels(),
            source.pixel_type(),
        );
        let well_attributes = self.attributes(
            &NgffAttributes {
                well: Some(create_well_metadata(&fields)),
                ..Default::default()
            },
            false,
        )?;

        let mut total = 0;
        let mut written_rows = BTreeSet::new();
        for well in &wells {
            let (row, _) = split_well_label(well, true)?;
            if written_rows.insert(row.clone()) {
                store.write_group(&row, Map::new())?;
            }
            let well_group = well_path(well)?;
            store.write_group(&well_group, well_attributes.clone())?;

            log::info!("well {well}");
            source.select_well(well)?;
            let position_um = source.position_um(Some(well.as_str()))?;
            for (index, field) in fields.iter().enumerate() {
                let image = source.field_image(index)?;
                let path = join_path(&well_group, field);
                total += self.write_multiscale(
                    store,
                    &ImageGroup {
                        path: &path,
                        name: field,
                        dim_order: &dim_order,
                        pixel_size_um: &pixel_size_um,
                        position_um: &position_um,
                        omero: &omero,
                    },
                    image,
                    false,
                )?;
            }
        }
        Ok(total)
    }

    fn write_single_image(
        &self,
        store: &NgffStore,
        source: &mut dyn ImageSource,
    ) -> crate::Result<u64> {
        let name = source.name();
        let mut dim_order = source.dim_order();
        let mut image = source
            .get_image(FieldSelection::Whole)?
            .pop()
            .ok_or_else(|| crate::Error::not_found(format!("image data of {name}")))?;
        if dim_order.len() > 1 && dim_order.ends_with('c') {
            image = image.move_axis_to_front(dim_order.len() - 1)?;
            dim_order = format!("c{}", &dim_order[..dim_order.len() - 1]);
        }
        let omero = create_channel_metadata(
            &source.channels(),
            source.nchannels(),
            source.pixel_type(),
        );
        let pixel_size_um = source.pixel_size_um();
        let position_um = source.position_um(None)?;
        self.write_multiscale(
            store,
            &ImageGroup {
                path: "",
                name: &name,
                dim_order: &dim_order,
                pixel_size_um: &pixel_size_um,
                position_um: &position_um,
                omero: &omero,
            },
            image,
            true,
        )
    }

    /// Write every pyramid level of `image`, then the image group document.
    fn write_multiscale(
        &self,
        store: &NgffStore,
        group: &ImageGroup<'_>,
        image: ImageData,
        root: bool,
    ) -> crate::Result<u64> {
        if group.dim_order.chars().count() != image.ndim() {
            return Err(crate::Error::integrity(format!(
                "axis order {:?} does not match a {}-dimensional image at /{}",
                group.dim_order,
                image.ndim(),
                group.path
            )));
        }
        let mut total = 0;
        let mut datasets = Vec::new();
        let mut level = 0;
        let mut current = image;
        loop {
            let path = level.to_string();
            total += store.write_array(
                &join_path(group.path, &path),
                &current,
                group.dim_order,
                &self.config.chunking,
                &self.config.compression,
            )?;
            datasets.push(Dataset {
                path,
                coordinate_transformations: create_transformation_metadata(
                    group.dim_order,
                    group.pixel_size_um,
                    group.position_um,
                    level,
                ),
            });
            match self.scaler.next_level(&current, group.dim_order, level)? {
                Some(next) => {
                    current = next;
                    level += 1;
                }
                None => break,
            }
        }

        let attributes = NgffAttributes {
            multiscales: Some(vec![Multiscale {
                name: group.name.to_string(),
                axes: create_axes_metadata(group.dim_order),
                datasets,
            }]),
            omero: Some(group.omero.clone()),
            ..Default::default()
        };
        store.write_group(group.path, self.attributes(&attributes, root)?)?;
        Ok(total)
    }
}
