//! Format selection: which on-disk generation and metadata schema to write,
//! and which adapter reads a given input.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// On-disk array layout generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArrayFormatGeneration {
    Legacy,
    Sharded,
}

/// Version of the NGFF metadata schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchemaVersion {
    #[serde(rename = "0.4")]
    V04,
    #[serde(rename = "0.5")]
    V05,
}

impl SchemaVersion {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::V04 => "0.4",
            Self::V05 => "0.5",
        }
    }
}

/// A validated (generation, schema) pair: `Legacy` with `0.4` or `Sharded`
/// with `0.5`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ZarrFormatParts", into = "ZarrFormatParts")]
pub struct ZarrFormat {
    generation: ArrayFormatGeneration,
    schema: SchemaVersion,
}

#[derive(Serialize, Deserialize)]
struct ZarrFormatParts {
    generation: ArrayFormatGeneration,
    schema: SchemaVersion,
}

impl ZarrFormat {
    pub const V2: Self = Self {
        generation: ArrayFormatGeneration::Legacy,
        schema: SchemaVersion::V04,
    };

    pub const V3: Self = Self {
        generation: ArrayFormatGeneration::Sharded,
        schema: SchemaVersion::V05,
    };

    pub fn new(generation: ArrayFormatGeneration, schema: SchemaVersion) -> crate::Result<Self> {
        match (generation, schema) {
            (ArrayFormatGeneration::Legacy, SchemaVersion::V04) => Ok(Self::V2),
            (ArrayFormatGeneration::Sharded, SchemaVersion::V05) => Ok(Self::V3),
            (g, s) => Err(crate::Error::configuration(format!(
                "{g:?} arrays cannot carry NGFF {} metadata",
                s.as_str()
            ))),
        }
    }

    pub const fn generation(&self) -> ArrayFormatGeneration {
        self.generation
    }

    pub const fn schema(&self) -> SchemaVersion {
        self.schema
    }

    pub const fn is_sharded(&self) -> bool {
        matches!(self.generation, ArrayFormatGeneration::Sharded)
    }
}

impl Default for ZarrFormat {
    fn default() -> Self {
        Self::V2
    }
}

impl TryFrom<ZarrFormatParts> for ZarrFormat {
    type Error = crate::Error;

    fn try_from(value: ZarrFormatParts) -> Result<Self, Self::Error> {
        Self::new(value.generation, value.schema)
    }
}

impl From<ZarrFormat> for ZarrFormatParts {
    fn from(value: ZarrFormat) -> Self {
        Self {
            generation: value.generation,
            schema: value.schema,
        }
    }
}

/// Output selected by a conversion request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    OmeZarr(ZarrFormat),
    /// Tiled-pixel container; accepted as a token, not written by this crate.
    OmeTiff,
}

impl OutputFormat {
    /// Suffix of the output artifact name.
    pub const fn extension(&self) -> &'static str {
        match self {
            Self::OmeZarr(_) => ".ome.zarr",
            Self::OmeTiff => ".ome.tiff",
        }
    }
}

impl Default for OutputFormat {
    fn default() -> Self {
        Self::OmeZarr(ZarrFormat::default())
    }
}

impl FromStr for OutputFormat {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "omezarr" | "omezarr2" | "zarr" | "zarr2" => Ok(Self::OmeZarr(ZarrFormat::V2)),
            "omezarr3" | "zarr3" => Ok(Self::OmeZarr(ZarrFormat::V3)),
            "ometiff" | "tiff" | "tif" => Ok(Self::OmeTiff),
            other => Err(crate::Error::configuration(format!(
                "unknown output format {other:?}; expected omezarr2, omezarr3 or ometiff"
            ))),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OmeZarr(z) if z.is_sharded() => f.write_str("omezarr3"),
            Self::OmeZarr(_) => f.write_str("omezarr2"),
            Self::OmeTiff => f.write_str("ometiff"),
        }
    }
}

/// Input adapters known to the conversion dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    /// Relational tile index (`*.db`) with per-timepoint blob files.
    Database,
    Tiff,
    /// Vendor plate directories with an XML manifest.
    XmlPlate,
}

impl InputFormat {
    pub fn detect(path: &Path) -> crate::Result<Self> {
        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        match extension.as_str() {
            "db" => Ok(Self::Database),
            "tif" | "tiff" => Ok(Self::Tiff),
            "xml" => Ok(Self::XmlPlate),
            _ if path.is_dir() => Ok(Self::XmlPlate),
            _ => Err(crate::Error::configuration(format!(
                "unrecognised input {}",
                path.display()
            ))),
        }
    }
}
