//! Hobgoblin: Harp digital/analog I/O peripheral for RP2040.
//!
//! The library holds everything that does not touch silicon: the register
//! map, the pulse-train engine, the continuous sampling pipeline, the
//! events coordinator and the Harp framing. Hardware reaches it through the
//! [`board::Board`] and [`board::ContinuousCapture`] ports, which the
//! firmware binary implements on top of `rp2040-hal`.
#![cfg_attr(not(test), no_std)]

#[macro_use]
mod fmt;

pub mod alarm;
pub mod board;
pub mod coordinator;
pub mod device;
pub mod error;
pub mod harp;
pub mod pulse;
pub mod pwm;
pub mod registers;
pub mod sampler;

#[cfg(test)]
mod sim;

pub use alarm::{AlarmId, AlarmPool, AlarmTarget, Fired};
pub use board::{Board, ContinuousCapture};
pub use coordinator::{Coordinator, CoordinatorState, Transition};
pub use device::{Device, Event, EventSink};
pub use error::{Error, Result};
pub use harp::{MessageType, Parsed, PayloadType, Reply, Request};
pub use pulse::{PulseEngine, TrainParams};
pub use pwm::PwmSettings;
pub use registers::RegisterMap;
pub use sampler::{SampleConsumer, SampleItem, SampleProducer, SampleQueue, Sampler};

/// First GPIO driven by the digital outputs.
pub const DO0_PIN: u32 = 15;
/// Number of digital outputs, one per bit of an output mask.
pub const DIGITAL_OUTPUTS: usize = 8;
/// GPIOs sampled as digital inputs, in register bit order.
pub const DI_PINS: [u32; 5] = [2, 3, 12, 13, 14];
/// GPIO carrying the PWM output (slice 0, channel A).
pub const PWM_PIN: u32 = 0;

/// Analog channels converted round-robin (GPIO26..GPIO28).
pub const ANALOG_CHANNELS: usize = 3;
/// Significant bits of one conversion result.
pub const ADC_RESOLUTION_MASK: u16 = 0x0fff;
/// Period of the drain timer that snapshots the analog buffer.
pub const DRAIN_PERIOD_US: u32 = 1_000;
/// Samples the hand-off queue holds before the producer blocks.
pub const HANDOFF_DEPTH: usize = 2;

/// Pulse trains that may run at the same time, on distinct masks.
pub const MAX_TRAINS: usize = 32;
/// Concurrent software alarms multiplexed onto one hardware alarm.
///
/// A train holds two (tick and pulse end), so the odd slot left over is
/// always free for the drain timer.
pub const ALARM_SLOTS: usize = 2 * MAX_TRAINS + 1;
/// Replies buffered between the device and the host link.
pub const OUTBOX_DEPTH: usize = 32;
/// Abort requests issued before giving up on an idle capture.
pub const ABORT_ATTEMPTS: u32 = 1_000;

/// Harp address of the first application register.
pub const APP_REG_START_ADDRESS: u8 = 32;
