//! Resolution pyramids: each level halves the two planar axes of the one before.

use ndarray::Slice;
use serde::{Deserialize, Serialize};

use crate::pixel::{ImageData, Sample, with_array};

/// Produces successive pyramid levels and decides when to stop.
pub trait Scaler {
    /// Level `level + 1` computed from `image` (level `level`), or `None`
    /// once no further level should be written.
    fn next_level(
        &self,
        image: &ImageData,
        dim_order: &str,
        level: u32,
    ) -> crate::Result<Option<ImageData>>;
}

/// Stop condition of a pyramid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScalerConfig {
    /// Number of levels beyond full resolution.
    pub max_layer: u32,
    /// Smallest x or y extent a level may have.
    pub min_size: u64,
}

impl Default for ScalerConfig {
    fn default() -> Self {
        Self {
            max_layer: 4,
            min_size: 1,
        }
    }
}

/// Nearest-neighbour halving: keeps every second sample along x and y.
#[derive(Debug, Clone, Copy, Default)]
pub struct NearestScaler {
    config: ScalerConfig,
}

impl NearestScaler {
    pub fn new(config: ScalerConfig) -> Self {
        Self { config }
    }
}

fn halve<T: Sample>(array: &ndarray::ArrayD<T>, planar: &[usize]) -> ImageData {
    T::wrap(
        array
            .slice_each_axis(|ax| {
                if planar.contains(&ax.axis.index()) {
                    Slice::new(0, None, 2)
                } else {
                    Slice::from(..)
                }
            })
            .to_owned(),
    )
}

impl Scaler for NearestScaler {
    fn next_level(
        &self,
        image: &ImageData,
        dim_order: &str,
        level: u32,
    ) -> crate::Result<Option<ImageData>> {
        if level >= self.config.max_layer {
            return Ok(None);
        }
        let planar: Vec<usize> = dim_order
            .chars()
            .enumerate()
            .filter(|(_, axis)| matches!(axis, 'x' | 'y'))
            .map(|(index, _)| index)
            .collect();
        if planar.is_empty() {
            return Ok(None);
        }
        let shape = image.shape();
        if let Some(&index) = planar.iter().find(|&&index| index >= shape.len()) {
            return Err(crate::Error::integrity(format!(
                "dimension order {dim_order:?} names axis {index} of a {}-dimensional image",
                shape.len()
            )));
        }
        let extents: Vec<u64> = planar.iter().map(|&i| shape[i] as u64).collect();
        if extents.iter().all(|&n| n <= 1) {
            return Ok(None);
        }
        if extents.iter().any(|&n| n.div_ceil(2) < self.config.min_size) {
            return Ok(None);
        }
        log::debug!("downsampling level {level} of shape {shape:?}");
        Ok(Some(with_array!(image, a => halve(a, &planar))))
    }
}
