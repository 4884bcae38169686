//! Construction-time configuration for receivers and transmitters.

use serde::{Deserialize, Serialize};

use crate::protocol::{CMD_BYTE1, CMD_BYTE5, CMD_FLOAT, CMD_HALT, MAX_INT_WIDTH};

/// Invalid configuration values
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// Integer width outside `1..=5`
    #[error("maximum integer width {0} is outside 1..=5")]
    IntWidth(u8),
    /// Value budget is zero or exceeds the stack capacity
    #[error("value capacity {requested} is outside 1..={stack}")]
    Capacity { requested: usize, stack: usize },
}

/// Value types a receiver accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Capabilities {
    /// Accept FLOAT values
    pub float: bool,
    /// Widest accepted integer, in data bytes
    pub max_int_width: u8,
}

impl Capabilities {
    /// Whether a receiver with these capabilities accepts data command `code`
    pub const fn supports(&self, code: u8) -> bool {
        match code {
            CMD_HALT => true,
            CMD_BYTE1..=CMD_BYTE5 => code <= self.max_int_width,
            CMD_FLOAT => self.float,
            _ => false,
        }
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        // 16-bit integers on the reference target: three bytes cover them.
        Self {
            float: true,
            max_int_width: 3,
        }
    }
}

/// Receiver configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ReceiverConfig {
    pub capabilities: Capabilities,
    /// Integer values held per session
    pub int_capacity: usize,
    /// Float values held per session
    pub float_capacity: usize,
}

impl ReceiverConfig {
    /// Defaults sized for a stack of `stack` entries
    pub fn for_stack(stack: usize) -> Self {
        Self {
            capabilities: Capabilities::default(),
            int_capacity: stack,
            float_capacity: stack,
        }
    }

    /// Check the configuration against a stack of `stack` entries
    pub fn validate(&self, stack: usize) -> Result<(), ConfigError> {
        let width = self.capabilities.max_int_width;
        if width == 0 || width > MAX_INT_WIDTH {
            return Err(ConfigError::IntWidth(width));
        }
        for requested in [self.int_capacity, self.float_capacity] {
            if requested == 0 || requested > stack {
                return Err(ConfigError::Capacity { requested, stack });
            }
        }
        Ok(())
    }
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self::for_stack(crate::stack::STACK_SIZE)
    }
}

/// Transmitter configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TransmitterConfig {
    /// Allow sending FLOAT values
    pub float: bool,
    /// Report errors and acknowledgements to the peer
    pub send_errors: bool,
}

impl Default for TransmitterConfig {
    fn default() -> Self {
        Self {
            float: true,
            send_errors: true,
        }
    }
}

/// Configuration for both directions of an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    pub receiver: ReceiverConfig,
    pub transmitter: TransmitterConfig,
}

impl Config {
    /// Defaults sized for a stack of `stack` entries
    pub fn for_stack(stack: usize) -> Self {
        Self {
            receiver: ReceiverConfig::for_stack(stack),
            transmitter: TransmitterConfig::default(),
        }
    }
}
