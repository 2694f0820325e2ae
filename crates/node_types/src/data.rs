use serde::{Deserialize, Serialize};

use crate::config::MAX_CHANNELS;

/// One decoded conversion result read from the ADC.
///
/// The struct is `Copy` and fixed-size so the data-ready handler can produce
/// it without touching the allocator. Only the first `channel_count` entries
/// of `channel_values` are meaningful.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdcSample {
    /// Device STATUS word returned in the first word of the frame.
    pub status: u16,
    channel_values: [i32; MAX_CHANNELS],
    channel_count: u8,
}

impl AdcSample {
    /// Builds a sample from already sign-extended channel values.
    ///
    /// Values past `MAX_CHANNELS` are ignored.
    pub fn new(status: u16, values: &[i32]) -> Self {
        let count = values.len().min(MAX_CHANNELS);
        let mut channel_values = [0i32; MAX_CHANNELS];
        channel_values[..count].copy_from_slice(&values[..count]);
        Self {
            status,
            channel_values,
            channel_count: count as u8,
        }
    }

    /// The decoded value of every channel, in channel order.
    pub fn channels(&self) -> &[i32] {
        &self.channel_values[..self.channel_count as usize]
    }

    /// The decoded value of `channel`, if the device has it.
    pub fn channel(&self, channel: usize) -> Option<i32> {
        self.channels().get(channel).copied()
    }

    pub fn channel_count(&self) -> usize {
        self.channel_count as usize
    }
}
