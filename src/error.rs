//! Error types for the Hobgoblin core.
//!
//! Nothing here is fatal: every error either becomes a Harp error reply
//! addressed to the register that caused it, or is logged and skipped.

use core::fmt;

/// Errors raised while serving register requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// Write aimed at a register the host may only read
    ReadOnlyRegister(u8),
    /// No register lives at this address
    UnknownRegister(u8),
    /// Payload type does not match the register
    PayloadTypeMismatch {
        /// Register address
        address: u8,
        /// Type code the register carries
        expected: u8,
        /// Type code found in the request
        got: u8,
    },
    /// Payload length does not match the register width
    PayloadLength {
        /// Register address
        address: u8,
        /// Register width in bytes
        expected: usize,
        /// Bytes found in the request
        got: usize,
    },
    /// PWM frequency of zero
    ZeroFrequency,
    /// PWM frequency the divider and counter cannot reach
    FrequencyOutOfRange(u32),
    /// Pulse train with a zero period
    ZeroPeriod,
    /// Pulse train mask wider than the digital outputs
    MaskOutOfRange(u32),
    /// Every alarm slot is in use
    AlarmPoolExhausted,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadOnlyRegister(address) => {
                write!(f, "register {address} is read-only")
            }
            Self::UnknownRegister(address) => write!(f, "no register at address {address}"),
            Self::PayloadTypeMismatch {
                address,
                expected,
                got,
            } => write!(
                f,
                "register {address}: payload type 0x{got:02X}, expected 0x{expected:02X}"
            ),
            Self::PayloadLength {
                address,
                expected,
                got,
            } => write!(f, "register {address}: {got} payload bytes, expected {expected}"),
            Self::ZeroFrequency => write!(f, "PWM frequency must not be zero"),
            Self::FrequencyOutOfRange(hz) => write!(f, "PWM frequency {hz} Hz out of range"),
            Self::ZeroPeriod => write!(f, "pulse period must not be zero"),
            Self::MaskOutOfRange(mask) => write!(f, "output mask 0x{mask:X} out of range"),
            Self::AlarmPoolExhausted => write!(f, "no free alarm slot"),
        }
    }
}

/// Result alias used across the crate.
pub type Result<T> = core::result::Result<T, Error>;
