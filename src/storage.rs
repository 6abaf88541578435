use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use ndarray::ArrayD;
use serde::Serialize;
use serde_json::{Map, Value};
use zarrs::array::Array;
use zarrs::filesystem::FilesystemStore;
use zarrs::group::GroupMetadataV3;
use zarrs::storage::{StoreKey, WritableStorageTraits};

use crate::codec::{ChunkPolicy, Compression, ZarrayMetadata, zarr_json_metadata};
use crate::format::{ArrayFormatGeneration, ZarrFormat};
use crate::pixel::{ImageData, Sample, with_array};

/// A filesystem Zarr hierarchy written in one format generation.
///
/// Group and array documents are serialized here and written as whole
/// objects; chunk payloads go through [`zarrs::array::Array`].
pub struct NgffStore {
    root: PathBuf,
    inner: Arc<FilesystemStore>,
    format: ZarrFormat,
}

#[derive(Serialize)]
struct ZarrGroupV2 {
    zarr_format: u8,
}

impl NgffStore {
    /// Create (or reuse) the directory at `root`.
    pub fn create(root: impl AsRef<Path>, format: ZarrFormat) -> crate::Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        let inner = FilesystemStore::new(&root).map_err(crate::Error::wrap)?;
        Ok(Self {
            root,
            inner: Arc::new(inner),
            format,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn format(&self) -> ZarrFormat {
        self.format
    }

    /// Key of the metadata object `name` in the node at `path`.
    ///
    /// `path` is relative to the root and empty for the root itself.
    fn metadata_key(&self, path: &str, name: &str) -> crate::Result<StoreKey> {
        let path = path.trim_matches('/');
        let key = if path.is_empty() {
            name.to_string()
        } else {
            format!("{path}/{name}")
        };
        StoreKey::new(key).map_err(crate::Error::wrap)
    }

    fn set_json(&self, key: &StoreKey, value: &impl Serialize) -> crate::Result<()> {
        let bytes = serde_json::to_vec_pretty(value)?;
        self.inner
            .set(key, Bytes::from(bytes))
            .map_err(crate::Error::wrap)
    }

    /// Write the group documents of `path` with `attributes`.
    pub fn write_group(&self, path: &str, attributes: Map<String, Value>) -> crate::Result<()> {
        match self.format.generation() {
            ArrayFormatGeneration::Legacy => {
                self.set_json(
                    &self.metadata_key(path, ".zgroup")?,
                    &ZarrGroupV2 { zarr_format: 2 },
                )?;
                if !attributes.is_empty() {
                    self.set_json(&self.metadata_key(path, ".zattrs")?, &attributes)?;
                }
            }
            ArrayFormatGeneration::Sharded => {
                let group = GroupMetadataV3::default().with_attributes(attributes);
                self.set_json(&self.metadata_key(path, "zarr.json")?, &group)?;
            }
        }
        log::debug!("wrote group /{path}");
        Ok(())
    }

    /// Write the array metadata document of `path` for `image`.
    fn create_array(
        &self,
        path: &str,
        image: &ImageData,
        dim_order: &str,
        policy: &ChunkPolicy,
        compression: &Compression,
    ) -> crate::Result<()> {
        let shape: Vec<u64> = image.shape().iter().map(|&n| n as u64).collect();
        match self.format.generation() {
            ArrayFormatGeneration::Legacy => {
                let metadata = ZarrayMetadata::new(&shape, image.pixel_type(), policy, compression);
                self.set_json(&self.metadata_key(path, ".zarray")?, &metadata)
            }
            ArrayFormatGeneration::Sharded => {
                let metadata =
                    zarr_json_metadata(&shape, image.pixel_type(), policy, compression, dim_order)?;
                self.set_json(&self.metadata_key(path, "zarr.json")?, &metadata)
            }
        }
    }

    /// Write `image` as the array at `path`, returning the uncompressed bytes written.
    pub fn write_array(
        &self,
        path: &str,
        image: &ImageData,
        dim_order: &str,
        policy: &ChunkPolicy,
        compression: &Compression,
    ) -> crate::Result<u64> {
        self.create_array(path, image, dim_order, policy, compression)?;
        if image.shape().contains(&0) {
            return Ok(0);
        }
        let array = Array::open(self.inner.clone(), &format!("/{}", path.trim_matches('/')))
            .map_err(crate::Error::wrap)?;
        with_array!(image, a => store_elements(&array, a))?;
        log::debug!("wrote array /{path} {:?}", image.shape());
        Ok(image.nbytes())
    }
}

fn store_elements<T: Sample>(
    array: &Array<FilesystemStore>,
    data: &ArrayD<T>,
) -> crate::Result<()> {
    let data = data.as_standard_layout();
    let elements = data
        .as_slice()
        .ok_or_else(|| crate::Error::integrity("image is not contiguous"))?;
    array
        .store_array_subset(&array.subset_all(), elements)
        .map_err(crate::Error::wrap)
}
