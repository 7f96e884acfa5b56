//! Motor current telemetry and motor command values

/// Byte order of a [`MotorCurrentSample`]'s byte view.
pub const MOTOR_CURRENT_BYTE_ORDER: ByteOrder = ByteOrder::LittleEndian;

/// Declared byte order for reinterpreting packed scalars.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    LittleEndian,
    BigEndian,
}

impl ByteOrder {
    /// Compose eight bytes into a `u64` under this byte order.
    pub const fn compose(self, bytes: [u8; 8]) -> u64 {
        match self {
            ByteOrder::LittleEndian => u64::from_le_bytes(bytes),
            ByteOrder::BigEndian => u64::from_be_bytes(bytes),
        }
    }

    /// Split a `u64` into eight bytes under this byte order.
    pub const fn decompose(self, value: u64) -> [u8; 8] {
        match self {
            ByteOrder::LittleEndian => value.to_le_bytes(),
            ByteOrder::BigEndian => value.to_be_bytes(),
        }
    }
}

/// One motor current reading as packed by the robot.
///
/// The robot packs per-channel current readings into a single `u64`. This
/// type keeps the wire value untouched and offers its byte layout under
/// [`MOTOR_CURRENT_BYTE_ORDER`]; no unit conversion happens here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MotorCurrentSample {
    raw: u64,
}

impl MotorCurrentSample {
    /// Reinterpret a wire value.
    pub const fn from_raw(raw: u64) -> Self {
        Self { raw }
    }

    /// Rebuild a sample from its byte view.
    pub const fn from_bytes(bytes: [u8; 8]) -> Self {
        Self { raw: MOTOR_CURRENT_BYTE_ORDER.compose(bytes) }
    }

    /// The 64-bit value exactly as carried on the wire
    pub const fn raw(&self) -> u64 {
        self.raw
    }

    /// Byte view under [`MOTOR_CURRENT_BYTE_ORDER`].
    pub const fn bytes(&self) -> [u8; 8] {
        MOTOR_CURRENT_BYTE_ORDER.decompose(self.raw)
    }

    /// Single byte lane of the byte view, or `None` past the eighth lane.
    pub fn lane(&self, index: usize) -> Option<u8> {
        self.bytes().get(index).copied()
    }
}

impl From<u64> for MotorCurrentSample {
    fn from(raw: u64) -> Self {
        Self::from_raw(raw)
    }
}

/// Desired actuation for the robot's motor channels.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MotorCommand {
    values: Vec<f32>,
}

impl MotorCommand {
    pub fn new(values: impl Into<Vec<f32>>) -> Self {
        Self { values: values.into() }
    }

    /// All channels at zero.
    pub fn stop(channels: usize) -> Self {
        Self { values: vec![0.0; channels] }
    }

    /// Per-channel values in channel order
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn channels(&self) -> usize {
        self.values.len()
    }
}

impl<const N: usize> From<[f32; N]> for MotorCommand {
    fn from(values: [f32; N]) -> Self {
        Self { values: values.to_vec() }
    }
}
