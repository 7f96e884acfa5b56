//! Inertial measurement samples

/// One IMU reading: a fixed number of axis values in channel order.
///
/// The arity is agreed out of band (see `LinkConfig::imu_axes`); samples carry
/// no timestamp, so delivery order is the only ordering.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ImuSample {
    values: Vec<f32>,
}

impl ImuSample {
    pub fn new(values: impl Into<Vec<f32>>) -> Self {
        Self { values: values.into() }
    }

    /// Axis values in channel order
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Number of axes
    pub fn axes(&self) -> usize {
        self.values.len()
    }

    pub fn into_values(self) -> Vec<f32> {
        self.values
    }
}

impl From<Vec<f32>> for ImuSample {
    fn from(values: Vec<f32>) -> Self {
        Self { values }
    }
}

impl<const N: usize> From<[f32; N]> for ImuSample {
    fn from(values: [f32; N]) -> Self {
        Self { values: values.to_vec() }
    }
}
