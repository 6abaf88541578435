//! Pixel types and dense image arrays.

use ndarray::{ArrayD, IxDyn, Slice};
use serde::{Deserialize, Serialize};

/// Pixel container type of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelType {
    U8,
    U16,
    U32,
    U64,
    F32,
}

impl PixelType {
    /// Round a sample bit depth up to the next byte-aligned unsigned container.
    ///
    /// 12-bit samples land in `U16`, 24-bit samples in `U32`.
    pub fn from_bit_depth(bits: u32) -> crate::Result<Self> {
        match bits {
            1..=8 => Ok(Self::U8),
            9..=16 => Ok(Self::U16),
            17..=32 => Ok(Self::U32),
            33..=64 => Ok(Self::U64),
            n => Err(crate::Error::integrity(format!(
                "unrepresentable pixel bit depth {n}"
            ))),
        }
    }

    /// Container size in bytes.
    pub const fn size(&self) -> usize {
        match self {
            Self::U8 => 1,
            Self::U16 => 2,
            Self::U32 | Self::F32 => 4,
            Self::U64 => 8,
        }
    }

    /// Full representable intensity range; `[0, 1]` for floating point samples.
    pub fn window(&self) -> (f64, f64) {
        match self {
            Self::U8 => (0.0, u8::MAX as f64),
            Self::U16 => (0.0, u16::MAX as f64),
            Self::U32 => (0.0, u32::MAX as f64),
            Self::U64 => (0.0, u64::MAX as f64),
            Self::F32 => (0.0, 1.0),
        }
    }

    /// Zarr V3 data type name.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::U8 => "uint8",
            Self::U16 => "uint16",
            Self::U32 => "uint32",
            Self::U64 => "uint64",
            Self::F32 => "float32",
        }
    }

    /// Zarr V2 (numpy typestr) data type, little-endian.
    pub const fn v2_dtype(&self) -> &'static str {
        match self {
            Self::U8 => "|u1",
            Self::U16 => "<u2",
            Self::U32 => "<u4",
            Self::U64 => "<u8",
            Self::F32 => "<f4",
        }
    }
}

/// A sample type an [`ImageData`] can hold.
pub trait Sample: Copy + Default + zarrs::array::Element + 'static {
    const PIXEL_TYPE: PixelType;

    /// Decode one little-endian sample of at most `size_of::<Self>()` bytes.
    fn from_le_slice(bytes: &[u8]) -> Self;

    fn wrap(array: ArrayD<Self>) -> ImageData;
}

macro_rules! impl_unsigned_sample {
    ($t:ty, $variant:ident) => {
        impl Sample for $t {
            const PIXEL_TYPE: PixelType = PixelType::$variant;

            fn from_le_slice(bytes: &[u8]) -> Self {
                bytes
                    .iter()
                    .rev()
                    .fold(0u64, |acc, &b| (acc << 8) | u64::from(b)) as $t
            }

            fn wrap(array: ArrayD<Self>) -> ImageData {
                ImageData::$variant(array)
            }
        }
    };
}

impl_unsigned_sample!(u8, U8);
impl_unsigned_sample!(u16, U16);
impl_unsigned_sample!(u32, U32);
impl_unsigned_sample!(u64, U64);

impl Sample for f32 {
    const PIXEL_TYPE: PixelType = PixelType::F32;

    fn from_le_slice(bytes: &[u8]) -> Self {
        let mut buf = [0u8; 4];
        let n = bytes.len().min(4);
        buf[..n].copy_from_slice(&bytes[..n]);
        f32::from_le_bytes(buf)
    }

    fn wrap(array: ArrayD<Self>) -> ImageData {
        ImageData::F32(array)
    }
}

/// A dense n-dimensional image of a single pixel type.
#[derive(Debug, Clone, PartialEq)]
pub enum ImageData {
    U8(ArrayD<u8>),
    U16(ArrayD<u16>),
    U32(ArrayD<u32>),
    U64(ArrayD<u64>),
    F32(ArrayD<f32>),
}

/// Run `$body` with `$array` bound to the typed array inside an [`ImageData`].
macro_rules! with_array {
    ($data:expr, $array:ident => $body:expr) => {
        match $data {
            $crate::pixel::ImageData::U8($array) => $body,
            $crate::pixel::ImageData::U16($array) => $body,
            $crate::pixel::ImageData::U32($array) => $body,
            $crate::pixel::ImageData::U64($array) => $body,
            $crate::pixel::ImageData::F32($array) => $body,
        }
    };
}
pub(crate) use with_array;

fn rewrap<T: Sample>(array: ArrayD<T>) -> ImageData {
    T::wrap(array)
}

fn padded_region<T: Sample>(array: &ArrayD<T>, origin: &[usize], shape: &[usize]) -> ArrayD<T> {
    let mut region = ArrayD::from_elem(IxDyn(shape), T::default());
    let covered: Vec<usize> = shape
        .iter()
        .zip(origin)
        .zip(array.shape())
        .map(|((&n, &start), &len)| n.min(len.saturating_sub(start)))
        .collect();
    if covered.contains(&0) {
        return region;
    }
    region
        .slice_each_axis_mut(|ax| Slice::from(0..covered[ax.axis.index()]))
        .assign(&array.slice_each_axis(|ax| {
            let i = ax.axis.index();
            Slice::from(origin[i]..origin[i] + covered[i])
        }));
    region
}

impl ImageData {
    pub fn pixel_type(&self) -> PixelType {
        match self {
            Self::U8(_) => PixelType::U8,
            Self::U16(_) => PixelType::U16,
            Self::U32(_) => PixelType::U32,
            Self::U64(_) => PixelType::U64,
            Self::F32(_) => PixelType::F32,
        }
    }

    pub fn shape(&self) -> &[usize] {
        with_array!(self, a => a.shape())
    }

    pub fn ndim(&self) -> usize {
        self.shape().len()
    }

    /// Uncompressed size in bytes.
    pub fn nbytes(&self) -> u64 {
        let n: usize = self.shape().iter().product();
        (n * self.pixel_type().size()) as u64
    }

    /// Copy out `shape` samples starting at `origin`. Samples beyond the
    /// image are zero.
    pub fn region(&self, origin: &[usize], shape: &[usize]) -> crate::Result<ImageData> {
        if origin.len() != self.ndim() || shape.len() != self.ndim() {
            return Err(crate::Error::integrity(format!(
                "region of rank {} on a {}-dimensional image",
                shape.len(),
                self.ndim()
            )));
        }
        Ok(with_array!(self, a => rewrap(padded_region(a, origin, shape))))
    }

    /// Move `axis` to position 0, keeping the order of the remaining axes.
    pub fn move_axis_to_front(self, axis: usize) -> crate::Result<ImageData> {
        let ndim = self.ndim();
        if axis >= ndim {
            return Err(crate::Error::integrity(format!(
                "axis {axis} out of range for a {ndim}-dimensional image"
            )));
        }
        let order: Vec<usize> = std::iter::once(axis)
            .chain((0..ndim).filter(|&i| i != axis))
            .collect();
        Ok(with_array!(self, a => rewrap(
            a.permuted_axes(order).as_standard_layout().into_owned()
        )))
    }
}
