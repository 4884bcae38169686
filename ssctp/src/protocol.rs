//! # Wire Encoding
//!
//! Every byte on the link is either a command or 7 bits of payload:
//!
//! ## Byte Format
//!
//! ```text
//! ┌───┬───────────────────────────┐
//! │ 1 │  command code (0..=127)   │   command byte
//! ├───┼───────────────────────────┤
//! │ 0 │  7 payload bits           │   data byte
//! └───┴───────────────────────────┘
//!   7   6                       0
//! ```
//!
//! Multi-byte values are split into 7-bit groups, least significant group
//! first. A value is always preceded (once) by a data command declaring its
//! type and width.
//!
//! ## Command Classes
//!
//! - **Data** `0..=8`: declares the type of the values that follow
//! - **Control** `9..=117`: triggers an action, built-in or user defined
//! - **Error** `118..=127`: one-way status report to the peer

use serde::{Deserialize, Serialize};

/// Bit that marks a command byte
pub const COMMAND_FLAG: u8 = 1 << 7;

/// Mask for the 7 payload bits of a byte
pub const PAYLOAD_MASK: u8 = 0x7F;

/// Number of payload bits carried by one data byte
pub const BITS_PER_BYTE: u32 = 7;

/// Largest code that fits in a single command byte
pub const MAX_DIRECT_CODE: u16 = 127;

/// Extended command codes are limited to 14 bits (two data bytes)
pub const EXTENDED_CODE_MASK: u16 = (1 << 14) - 1;

/// Widest integer width in bytes
pub const MAX_INT_WIDTH: u8 = 5;

// Data commands
pub const CMD_HALT: u8 = 0;
pub const CMD_BYTE1: u8 = 1;
pub const CMD_BYTE2: u8 = 2;
pub const CMD_BYTE3: u8 = 3;
pub const CMD_BYTE4: u8 = 4;
pub const CMD_BYTE5: u8 = 5;
pub const CMD_FLOAT: u8 = 6;
pub const CMD_DOUBLE: u8 = 7;
pub const CMD_LONGLONG: u8 = 8;

// Built-in control commands
pub const CMD_CLEAR: u8 = 9;
pub const CMD_VERIFY: u8 = 10;
pub const CMD_EXTCMD: u8 = 11;
pub const CMD_ASYNC: u8 = 12;
pub const CMD_ASYNCEND: u8 = 13;

/// First code available to applications
pub const CMD_USER_FIRST: u8 = 14;

/// First code of the error range
pub const ERROR_FIRST: u8 = 118;

/// Error and status codes reported to the peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum ErrorCode {
    /// Positive acknowledgement
    #[error("ok")]
    Ok = 118,
    /// Transmit sink ran out of room mid-command; the command was retracted
    #[error("transmit buffer overrun")]
    Overrun = 122,
    /// Peer expected more bytes of a value (never emitted by this engine)
    #[error("data truncated")]
    Truncated = 123,
    /// Receive buffers were full when another value arrived
    #[error("receive buffer overflow")]
    Overflow = 124,
    /// VERIFY checksum mismatch
    #[error("data corrupt")]
    DataCorrupt = 125,
    /// Unsupported or unimplemented command code
    #[error("unknown command")]
    UnknownCommand = 126,
    /// Control command with missing or mistyped arguments
    #[error("invalid command")]
    InvalidCommand = 127,
}

impl ErrorCode {
    /// The wire command code
    #[inline]
    pub const fn code(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for ErrorCode {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            118 => Ok(Self::Ok),
            122 => Ok(Self::Overrun),
            123 => Ok(Self::Truncated),
            124 => Ok(Self::Overflow),
            125 => Ok(Self::DataCorrupt),
            126 => Ok(Self::UnknownCommand),
            127 => Ok(Self::InvalidCommand),
            _ => Err(()),
        }
    }
}

impl From<ErrorCode> for u16 {
    fn from(code: ErrorCode) -> Self {
        code as u16
    }
}

/// Classification of a command code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CommandClass {
    /// Declares the type of following values
    Data,
    /// Built-in or application command
    Control,
    /// One-way status report
    Error,
}

impl CommandClass {
    /// Classify a command code. Codes above 127 are always control commands.
    pub const fn of(code: u16) -> Self {
        if is_data(code) {
            Self::Data
        } else if is_error(code) {
            Self::Error
        } else {
            Self::Control
        }
    }
}

/// Whether `code` is a data (type declaration) command
#[inline]
pub const fn is_data(code: u16) -> bool {
    code <= CMD_LONGLONG as u16
}

/// Whether `code` is an error/status code
#[inline]
pub const fn is_error(code: u16) -> bool {
    code >= ERROR_FIRST as u16 && code <= MAX_DIRECT_CODE
}

/// Whether processing `code` clears the rolling checksum
#[inline]
pub const fn clears_checksum(code: u16) -> bool {
    !(is_data(code) || is_error(code))
}

/// Number of data bytes carried by one value of data command `code`
///
/// `None` for HALT and non-data commands.
pub const fn data_size(code: u8) -> Option<u8> {
    match code {
        CMD_BYTE1..=CMD_BYTE5 => Some(code),
        CMD_FLOAT => Some(5),
        CMD_DOUBLE | CMD_LONGLONG => Some(10),
        _ => None,
    }
}

/// Whether `byte` is a command byte
#[inline]
pub const fn is_command_byte(byte: u8) -> bool {
    byte & COMMAND_FLAG != 0
}

/// Encode a single-byte command code
#[inline]
pub const fn command_byte(code: u8) -> u8 {
    COMMAND_FLAG | (code & PAYLOAD_MASK)
}

/// Smallest integer width (in data bytes) that carries `value` without loss
pub const fn width_for(value: u32) -> u8 {
    let mut width = 1;
    while width < MAX_INT_WIDTH && (value as u64) >> (BITS_PER_BYTE * width as u32) != 0 {
        width += 1;
    }
    width
}

/// Split `value` into `width` data bytes, least significant group first
pub fn septets(mut value: u64, width: u8) -> impl Iterator<Item = u8> {
    (0..width).map(move |_| {
        let byte = (value as u8) & PAYLOAD_MASK;
        value >>= BITS_PER_BYTE;
        byte
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_classes() {
        assert_eq!(CommandClass::of(0), CommandClass::Data);
        assert_eq!(CommandClass::of(8), CommandClass::Data);
        assert_eq!(CommandClass::of(9), CommandClass::Control);
        assert_eq!(CommandClass::of(117), CommandClass::Control);
        assert_eq!(CommandClass::of(118), CommandClass::Error);
        assert_eq!(CommandClass::of(127), CommandClass::Error);
        assert_eq!(CommandClass::of(220), CommandClass::Control);
    }

    #[test]
    fn test_checksum_clearing_commands() {
        assert!(!clears_checksum(CMD_BYTE2 as u16));
        assert!(!clears_checksum(ErrorCode::Ok.into()));
        assert!(clears_checksum(CMD_CLEAR as u16));
        assert!(clears_checksum(20));
    }

    #[test]
    fn test_data_sizes() {
        assert_eq!(data_size(CMD_HALT), None);
        assert_eq!(data_size(CMD_BYTE3), Some(3));
        assert_eq!(data_size(CMD_FLOAT), Some(5));
        assert_eq!(data_size(CMD_DOUBLE), Some(10));
        assert_eq!(data_size(CMD_CLEAR), None);
    }

    #[test]
    fn test_error_code_conversion() {
        assert_eq!(ErrorCode::try_from(125), Ok(ErrorCode::DataCorrupt));
        assert_eq!(ErrorCode::try_from(118), Ok(ErrorCode::Ok));
        assert!(ErrorCode::try_from(120).is_err());
        assert_eq!(command_byte(ErrorCode::Overrun.code()), 0xFA);
    }

    #[test]
    fn test_width_for() {
        assert_eq!(width_for(0), 1);
        assert_eq!(width_for(127), 1);
        assert_eq!(width_for(128), 2);
        assert_eq!(width_for((1 << 14) - 1), 2);
        assert_eq!(width_for(1 << 21), 4);
        assert_eq!(width_for(u32::MAX), 5);
    }

    #[test]
    fn test_septets() {
        let mut bytes = [0u8; 3];
        for (slot, byte) in bytes.iter_mut().zip(septets(300, 3)) {
            *slot = byte;
        }
        assert_eq!(bytes, [0x2C, 0x02, 0]);
    }
}
