pub mod codec;
pub mod convert;
mod error;
pub mod format;
pub mod metadata;
pub mod pixel;
pub mod pyramid;
pub mod source;
pub mod storage;
pub mod ticks;
pub mod well;
pub mod writer;

pub use zarrs;

pub use convert::{ConversionResult, convert};
pub use error::{Error, Result};
pub use source::{DatabaseSource, FieldSelection, ImageSource, MemorySource};
pub use writer::{OmeZarrWriter, WriterConfig};
