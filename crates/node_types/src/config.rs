//! Configuration types shared by the driver and the daemon

use serde::{Deserialize, Serialize};

/// Number of chunks in the acquisition ring.
pub const NUM_BUFFERS: usize = 3;

/// Number of samples held by one ring chunk.
pub const REC_ADC_CHUNK: usize = 256;

/// Largest channel count of any supported device.
pub const MAX_CHANNELS: usize = 4;

/// Supported members of the ADS131M0x family.
///
/// The variant fixes the channel count, which in turn fixes every SPI frame
/// length on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceVariant {
    /// Two-channel ADS131M02
    #[default]
    M02,
    /// Four-channel ADS131M04
    M04,
}

impl DeviceVariant {
    /// Number of converter channels exposed by this device.
    pub const fn channel_count(self) -> usize {
        match self {
            DeviceVariant::M02 => 2,
            DeviceVariant::M04 => 4,
        }
    }

    /// Length in bytes of one device frame: status word, one word per channel
    /// and the CRC word, each 24 bits wide.
    pub const fn frame_len(self) -> usize {
        3 * (self.channel_count() + 2)
    }
}

/// What the producer does when the chunk it wants to rotate into has not been
/// drained by the writer yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverrunPolicy {
    /// Keep the undrained chunk intact and drop incoming samples until the
    /// writer releases it. Every dropped sample is counted as an overrun.
    #[default]
    Refuse,
    /// Rotate into the undrained chunk anyway and overwrite it. Every such
    /// rotation is counted so data loss stays observable.
    Overwrite,
}
