//! Chunking policy, compression, and the Zarr array metadata they produce.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use zarrs::array::{ArrayMetadataV3, FillValueMetadata, data_type};
use zarrs::metadata::v3::MetadataV3;

use crate::pixel::PixelType;

/// Chunk compression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "type")]
pub enum Compression {
    Raw,
    Gzip {
        /// Must be in the range 0..=9.
        #[serde(default = "default_gzip_level")]
        level: u32,
    },
    Zstd {
        /// Must be in the range -7..=22.
        #[serde(default = "default_zstd_level")]
        level: i32,
    },
}

fn default_gzip_level() -> u32 {
    6
}

fn default_zstd_level() -> i32 {
    5
}

impl Default for Compression {
    fn default() -> Self {
        Self::Zstd {
            level: default_zstd_level(),
        }
    }
}

#[derive(Serialize)]
struct GzipConfiguration {
    level: u32,
}

#[derive(Serialize)]
struct ZstdConfiguration {
    level: i32,
    checksum: bool,
}

#[derive(Serialize)]
struct BytesConfiguration {
    endian: &'static str,
}

#[derive(Serialize)]
struct ChunkShapeConfiguration<'a> {
    chunk_shape: &'a [u64],
}

#[derive(Serialize)]
struct ShardingConfiguration<'a> {
    chunk_shape: &'a [u64],
    codecs: Vec<MetadataV3>,
    index_codecs: Vec<MetadataV3>,
    index_location: &'static str,
}

impl Compression {
    pub fn validate(&self) -> crate::Result<()> {
        match *self {
            Self::Gzip { level } if level > 9 => Err(crate::Error::configuration(format!(
                "invalid gzip compression level {level}"
            ))),
            Self::Zstd { level } if !(-7..=22).contains(&level) => Err(
                crate::Error::configuration(format!("invalid zstd compression level {level}")),
            ),
            _ => Ok(()),
        }
    }

    /// The `compressor` object of a V2 `.zarray` document.
    pub fn to_v2_compressor(&self) -> Option<Value> {
        match *self {
            Self::Raw => None,
            Self::Gzip { level } => Some(serde_json::json!({ "id": "gzip", "level": level })),
            Self::Zstd { level } => Some(serde_json::json!({ "id": "zstd", "level": level })),
        }
    }

    /// The bytes-to-bytes codec of a V3 codec chain, if any.
    pub fn to_v3_codec(&self) -> crate::Result<Option<MetadataV3>> {
        let codec = match *self {
            Self::Raw => return Ok(None),
            Self::Gzip { level } => MetadataV3::new_with_serializable_configuration(
                "gzip".to_string(),
                &GzipConfiguration { level },
            )?,
            Self::Zstd { level } => MetadataV3::new_with_serializable_configuration(
                "zstd".to_string(),
                &ZstdConfiguration {
                    level,
                    checksum: false,
                },
            )?,
        };
        Ok(Some(codec))
    }
}

/// Per-axis chunk sizes derived from array extents.
///
/// Axes longer than `threshold` are tiled with `chunk` (and `shard` for
/// sharded arrays); short axes such as channels get a chunk size of one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkPolicy {
    pub threshold: u64,
    pub chunk: u64,
    pub shard: u64,
}

impl Default for ChunkPolicy {
    fn default() -> Self {
        Self {
            threshold: 10,
            chunk: 1000,
            shard: 10000,
        }
    }
}

impl ChunkPolicy {
    pub fn validate(&self) -> crate::Result<()> {
        if self.chunk == 0 || self.shard == 0 || self.shard % self.chunk != 0 {
            return Err(crate::Error::configuration(format!(
                "shard size {} must be a non-zero multiple of chunk size {}",
                self.shard, self.chunk
            )));
        }
        Ok(())
    }

    pub fn chunk_shape(&self, shape: &[u64]) -> Vec<u64> {
        shape
            .iter()
            .map(|&n| if n > self.threshold { self.chunk } else { 1 })
            .collect()
    }

    /// Shard extents, capped at the array extent rounded up to whole chunks.
    pub fn shard_shape(&self, shape: &[u64]) -> Vec<u64> {
        shape
            .iter()
            .map(|&n| {
                if n > self.threshold {
                    self.shard.min(n.div_ceil(self.chunk) * self.chunk)
                } else {
                    1
                }
            })
            .collect()
    }
}

/// A Zarr V2 `.zarray` document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZarrayMetadata {
    pub zarr_format: u8,
    pub shape: Vec<u64>,
    pub chunks: Vec<u64>,
    pub dtype: String,
    pub compressor: Option<Value>,
    pub fill_value: Value,
    pub order: String,
    pub filters: Option<Vec<Value>>,
    pub dimension_separator: String,
}

impl ZarrayMetadata {
    pub fn new(
        shape: &[u64],
        pixel_type: PixelType,
        policy: &ChunkPolicy,
        compression: &Compression,
    ) -> Self {
        Self {
            zarr_format: 2,
            shape: shape.to_vec(),
            chunks: policy.chunk_shape(shape),
            dtype: pixel_type.v2_dtype().to_string(),
            compressor: compression.to_v2_compressor(),
            fill_value: Value::from(0),
            order: "C".to_string(),
            filters: None,
            dimension_separator: "/".to_string(),
        }
    }
}

fn convert_data_type(pixel_type: PixelType) -> MetadataV3 {
    let data_type = match pixel_type {
        PixelType::U8 => data_type::uint8(),
        PixelType::U16 => data_type::uint16(),
        PixelType::U32 => data_type::uint32(),
        PixelType::U64 => data_type::uint64(),
        PixelType::F32 => data_type::float32(),
    };
    let data_type_name = data_type
        .name_v3()
        .map_or_else(|| pixel_type.name().to_string(), Cow::into_owned);
    let data_type_configuration = data_type.configuration_v3();
    if data_type_configuration.is_empty() {
        MetadataV3::new(data_type_name)
    } else {
        MetadataV3::new_with_configuration(data_type_name, data_type_configuration)
    }
}

fn regular_chunk_grid(chunk_shape: &[u64]) -> crate::Result<MetadataV3> {
    Ok(MetadataV3::new_with_serializable_configuration(
        "regular".to_string(),
        &ChunkShapeConfiguration { chunk_shape },
    )?)
}

fn bytes_codec() -> crate::Result<MetadataV3> {
    Ok(MetadataV3::new_with_serializable_configuration(
        "bytes".to_string(),
        &BytesConfiguration { endian: "little" },
    )?)
}

/// A Zarr V3 array `zarr.json` document with one `sharding_indexed` codec.
///
/// The outer grid is the shard shape; the shard holds inner chunks encoded
/// with `bytes` and `compression`, and a crc32c-checked index at its end.
pub fn zarr_json_metadata(
    shape: &[u64],
    pixel_type: PixelType,
    policy: &ChunkPolicy,
    compression: &Compression,
    dimension_names: &str,
) -> crate::Result<Value> {
    let chunk_shape = policy.chunk_shape(shape);
    let shard_shape = policy.shard_shape(shape);

    let mut inner_codecs = vec![bytes_codec()?];
    inner_codecs.extend(compression.to_v3_codec()?);
    let sharding = MetadataV3::new_with_serializable_configuration(
        "sharding_indexed".to_string(),
        &ShardingConfiguration {
            chunk_shape: &chunk_shape,
            codecs: inner_codecs,
            index_codecs: vec![bytes_codec()?, MetadataV3::new("crc32c".to_string())],
            index_location: "end",
        },
    )?;

    let metadata = ArrayMetadataV3::new(
        shape.to_vec(),
        regular_chunk_grid(&shard_shape)?,
        convert_data_type(pixel_type),
        FillValueMetadata::Number(serde_json::Number::from(0)),
        vec![sharding],
    );
    let mut document = serde_json::to_value(&metadata)?;
    if let Value::Object(map) = &mut document {
        let names: Vec<String> = dimension_names.chars().map(String::from).collect();
        map.insert("dimension_names".into(), serde_json::to_value(names)?);
    }
    Ok(document)
}
