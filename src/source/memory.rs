//! Single-image source over an array already in memory.

use super::{AxisValues, ChannelInfo, FieldSelection, ImageSource};
use crate::pixel::{ImageData, PixelType};

/// A non-plate image, e.g. a decoded single file.
#[derive(Debug, Clone)]
pub struct MemorySource {
    name: String,
    dim_order: String,
    data: ImageData,
    pixel_size_um: AxisValues,
    position_um: AxisValues,
    channels: Vec<ChannelInfo>,
}

impl MemorySource {
    /// `dim_order` names the axes of `data`, one letter per axis.
    pub fn new(
        name: impl Into<String>,
        dim_order: impl Into<String>,
        data: ImageData,
    ) -> crate::Result<Self> {
        let dim_order = dim_order.into();
        if dim_order.chars().count() != data.ndim() {
            return Err(crate::Error::configuration(format!(
                "dimension order {dim_order:?} for a {}-dimensional image",
                data.ndim()
            )));
        }
        Ok(Self {
            name: name.into(),
            dim_order,
            data,
            pixel_size_um: AxisValues::new(),
            position_um: AxisValues::new(),
            channels: Vec::new(),
        })
    }

    pub fn with_pixel_size_um(mut self, sizes: AxisValues) -> Self {
        self.pixel_size_um = sizes;
        self
    }

    pub fn with_position_um(mut self, position: AxisValues) -> Self {
        self.position_um = position;
        self
    }

    pub fn with_channels(mut self, channels: Vec<ChannelInfo>) -> Self {
        self.channels = channels;
        self
    }
}

impl ImageSource for MemorySource {
    fn init_metadata(&mut self) -> crate::Result<()> {
        Ok(())
    }

    fn is_screen(&self) -> bool {
        false
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn dim_order(&self) -> String {
        self.dim_order.clone()
    }

    fn pixel_type(&self) -> PixelType {
        self.data.pixel_type()
    }

    fn pixel_size_um(&self) -> AxisValues {
        self.pixel_size_um.clone()
    }

    fn position_um(&self, _well: Option<&str>) -> crate::Result<AxisValues> {
        Ok(self.position_um.clone())
    }

    fn channels(&self) -> Vec<ChannelInfo> {
        self.channels.clone()
    }

    fn nchannels(&self) -> usize {
        self.dim_order
            .find('c')
            .map_or(1, |axis| self.data.shape()[axis])
    }

    fn select_well(&mut self, well: &str) -> crate::Result<()> {
        Err(crate::Error::unsupported(format!(
            "well {well} of single image {}",
            self.name
        )))
    }

    fn get_image(&self, _selection: FieldSelection) -> crate::Result<Vec<ImageData>> {
        Ok(vec![self.data.clone()])
    }
}

#[cfg(test)]
mod tests {
    use ndarray::{ArrayD, IxDyn};

    use super::*;

    #[test]
    fn channel_count_follows_channel_axis() {
        let data = ImageData::U8(ArrayD::zeros(IxDyn(&[5, 6, 3])));
        let source = MemorySource::new("rgb", "yxc", data).unwrap();
        assert_eq!(source.nchannels(), 3);
        assert!(!source.is_screen());
    }

    #[test]
    fn mismatched_dim_order_is_rejected() {
        let data = ImageData::U16(ArrayD::zeros(IxDyn(&[5, 6])));
        assert!(matches!(
            MemorySource::new("img", "zyx", data),
            Err(crate::Error::Configuration(_))
        ));
    }
}
