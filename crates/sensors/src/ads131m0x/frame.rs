//! SPI frame layout.
//!
//! Every frame is a sequence of 24-bit words: a command/response word, one
//! word per channel and a CRC word. A register access clocks two frames
//! back to back; the device answers a command in the frame that follows it,
//! so the response word of a register exchange sits at the start of the
//! second frame.

use node_types::{AdcSample, DeviceVariant, MAX_CHANNELS};

use super::helpers::ch_sample_to_raw;
use super::registers::{ADDR_FIELD_MASK, ADDR_FIELD_SHIFT, CMD_READ_REG, CMD_WRITE_REG};

/// Longest register exchange of any supported variant.
pub const MAX_EXCHANGE_LEN: usize = 2 * DeviceVariant::M04.frame_len();

const WORD_LEN: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLayout {
    variant: DeviceVariant,
}

impl FrameLayout {
    pub const fn new(variant: DeviceVariant) -> Self {
        Self { variant }
    }

    pub const fn variant(&self) -> DeviceVariant {
        self.variant
    }

    /// Bytes in one device frame.
    pub const fn frame_len(&self) -> usize {
        self.variant.frame_len()
    }

    /// Bytes clocked for one register read or write.
    pub const fn exchange_len(&self) -> usize {
        2 * self.frame_len()
    }

    /// Fills `tx` with a single-register write of `value` to `address`.
    ///
    /// `tx` must be at least [`exchange_len`](Self::exchange_len) long.
    pub fn encode_write(&self, tx: &mut [u8], address: u8, value: u16) {
        let tx = &mut tx[..self.exchange_len()];
        tx.fill(0);
        put_word(tx, 0, command_word(CMD_WRITE_REG, address));
        put_word(tx, WORD_LEN, value);
    }

    /// Fills `tx` with a single-register read of `address`.
    pub fn encode_read(&self, tx: &mut [u8], address: u8) {
        let tx = &mut tx[..self.exchange_len()];
        tx.fill(0);
        put_word(tx, 0, command_word(CMD_READ_REG, address));
    }

    /// Fills `tx` with a one-word command such as RESET or STANDBY.
    pub fn encode_command(&self, tx: &mut [u8], command: u16) {
        let tx = &mut tx[..self.exchange_len()];
        tx.fill(0);
        put_word(tx, 0, command);
    }

    /// The response word of a register exchange.
    pub fn response_word(&self, rx: &[u8]) -> u16 {
        let offset = self.frame_len();
        ((rx[offset] as u16) << 8) | rx[offset + 1] as u16
    }

    /// Decodes one sample frame: status word followed by the channel words.
    pub fn decode_sample(&self, rx: &[u8]) -> AdcSample {
        let channels = self.variant.channel_count();
        let status = ((rx[0] as u16) << 8) | rx[1] as u16;
        let mut values = [0i32; MAX_CHANNELS];
        for (i, value) in values.iter_mut().take(channels).enumerate() {
            let at = WORD_LEN * (i + 1);
            *value = ch_sample_to_raw(rx[at], rx[at + 1], rx[at + 2]);
        }
        AdcSample::new(status, &values[..channels])
    }
}

/// Address carried in the address field of a command or acknowledgment word.
pub fn echoed_address(word: u16) -> u8 {
    ((word & ADDR_FIELD_MASK) >> ADDR_FIELD_SHIFT) as u8
}

/// RREG/WREG command word for a single register.
pub fn command_word(opcode: u16, address: u8) -> u16 {
    opcode | (((address as u16) << ADDR_FIELD_SHIFT) & ADDR_FIELD_MASK)
}

fn put_word(buf: &mut [u8], at: usize, word: u16) {
    buf[at] = (word >> 8) as u8;
    buf[at + 1] = word as u8;
    buf[at + 2] = 0;
}
