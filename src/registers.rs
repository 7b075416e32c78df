//! Register map shared with the Harp dispatcher.
//!
//! Every register has a fixed address, width and payload type. Payloads
//! are little-endian; multi-word registers are arrays of one type.

use crate::harp::{Payload, PayloadType};
use crate::*;

pub const OPERATION_CTRL: u8 = 10;

pub const DI_STATE: u8 = APP_REG_START_ADDRESS;
pub const DO_SET: u8 = APP_REG_START_ADDRESS + 1;
pub const DO_CLEAR: u8 = APP_REG_START_ADDRESS + 2;
pub const DO_TOGGLE: u8 = APP_REG_START_ADDRESS + 3;
pub const DO_STATE: u8 = APP_REG_START_ADDRESS + 4;
pub const START_PULSE_TRAIN: u8 = APP_REG_START_ADDRESS + 5;
pub const STOP_PULSE_TRAIN: u8 = APP_REG_START_ADDRESS + 6;
pub const ANALOG_DATA: u8 = APP_REG_START_ADDRESS + 7;
pub const PWM_CONFIG: u8 = APP_REG_START_ADDRESS + 8;
pub const PWM_STOP: u8 = APP_REG_START_ADDRESS + 9;

/// Operation mode field of `OPERATION_CTRL`.
pub const OP_MODE_MASK: u8 = 0b11;
pub const OP_MODE_STANDBY: u8 = 0;
pub const OP_MODE_ACTIVE: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Access {
    ReadOnly,
    ReadWrite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RegisterInfo {
    pub address: u8,
    pub payload_type: PayloadType,
    /// Width in bytes
    pub len: usize,
    pub access: Access,
}

impl RegisterInfo {
    const fn new(address: u8, payload_type: PayloadType, count: usize, access: Access) -> Self {
        Self {
            address,
            payload_type,
            len: payload_type.size() * count,
            access,
        }
    }

    pub fn lookup(address: u8) -> Option<Self> {
        use Access::*;
        use PayloadType::*;

        let info = match address {
            OPERATION_CTRL => Self::new(address, U8, 1, ReadWrite),
            DI_STATE => Self::new(address, U8, 1, ReadOnly),
            DO_SET | DO_CLEAR | DO_TOGGLE | DO_STATE => Self::new(address, U8, 1, ReadWrite),
            START_PULSE_TRAIN => Self::new(address, U32, 4, ReadWrite),
            STOP_PULSE_TRAIN => Self::new(address, U8, 1, ReadWrite),
            ANALOG_DATA => Self::new(address, U16, ANALOG_CHANNELS, ReadOnly),
            PWM_CONFIG => Self::new(address, U32, 2, ReadWrite),
            PWM_STOP => Self::new(address, U8, 1, ReadWrite),
            _ => return None,
        };
        Some(info)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RegisterMap {
    pub operation_ctrl: u8,
    pub di_state: u8,
    pub do_set: u8,
    pub do_clear: u8,
    pub do_toggle: u8,
    pub do_state: u8,
    /// `[output_mask, width_us, period_us, count]`
    pub start_train: [u32; 4],
    pub stop_train: u8,
    pub analog: [u16; ANALOG_CHANNELS],
    /// `[frequency_hz, duty_percent]`
    pub pwm_config: [u32; 2],
    pub pwm_stop: u8,
}

impl RegisterMap {
    /// Serializes the register at `address`.
    pub fn read(&self, address: u8) -> Result<Payload> {
        let mut out = Payload::new();
        match address {
            OPERATION_CTRL => push(&mut out, &[self.operation_ctrl]),
            DI_STATE => push(&mut out, &[self.di_state]),
            DO_SET => push(&mut out, &[self.do_set]),
            DO_CLEAR => push(&mut out, &[self.do_clear]),
            DO_TOGGLE => push(&mut out, &[self.do_toggle]),
            DO_STATE => push(&mut out, &[self.do_state]),
            START_PULSE_TRAIN => {
                for word in self.start_train {
                    push(&mut out, &word.to_le_bytes());
                }
            }
            STOP_PULSE_TRAIN => push(&mut out, &[self.stop_train]),
            ANALOG_DATA => {
                for value in self.analog {
                    push(&mut out, &value.to_le_bytes());
                }
            }
            PWM_CONFIG => {
                for word in self.pwm_config {
                    push(&mut out, &word.to_le_bytes());
                }
            }
            PWM_STOP => push(&mut out, &[self.pwm_stop]),
            _ => return Err(Error::UnknownRegister(address)),
        }
        Ok(out)
    }

    /// Copies a payload into the register at `address`.
    ///
    /// Access rights are the dispatcher's business; only the width is
    /// checked here.
    pub fn write(&mut self, address: u8, payload: &[u8]) -> Result<()> {
        let info = RegisterInfo::lookup(address).ok_or(Error::UnknownRegister(address))?;
        if payload.len() != info.len {
            return Err(Error::PayloadLength {
                address,
                expected: info.len,
                got: payload.len(),
            });
        }

        match address {
            OPERATION_CTRL => self.operation_ctrl = payload[0],
            DI_STATE => self.di_state = payload[0],
            DO_SET => self.do_set = payload[0],
            DO_CLEAR => self.do_clear = payload[0],
            DO_TOGGLE => self.do_toggle = payload[0],
            DO_STATE => self.do_state = payload[0],
            START_PULSE_TRAIN => words(payload, &mut self.start_train),
            STOP_PULSE_TRAIN => self.stop_train = payload[0],
            ANALOG_DATA => {
                for (value, chunk) in self.analog.iter_mut().zip(payload.chunks_exact(2)) {
                    *value = u16::from_le_bytes([chunk[0], chunk[1]]);
                }
            }
            PWM_CONFIG => words(payload, &mut self.pwm_config),
            PWM_STOP => self.pwm_stop = payload[0],
            _ => unreachable!(),
        }
        Ok(())
    }

    pub fn events_enabled(&self) -> bool {
        self.operation_ctrl & OP_MODE_MASK == OP_MODE_ACTIVE
    }
}

fn push(out: &mut Payload, bytes: &[u8]) {
    // Registers are at most MAX_PAYLOAD wide.
    let _ = out.extend_from_slice(bytes);
}

fn words(payload: &[u8], dst: &mut [u32]) {
    for (word, chunk) in dst.iter_mut().zip(payload.chunks_exact(4)) {
        *word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn widths_follow_the_register_table() {
        let width = |address| RegisterInfo::lookup(address).unwrap().len;
        assert_eq!(width(DI_STATE), 1);
        assert_eq!(width(START_PULSE_TRAIN), 16);
        assert_eq!(width(ANALOG_DATA), 6);
        assert_eq!(width(PWM_CONFIG), 8);
        assert!(RegisterInfo::lookup(APP_REG_START_ADDRESS + 10).is_none());
        assert!(RegisterInfo::lookup(0).is_none());
    }

    #[test]
    fn start_train_words_are_little_endian() {
        let mut regs = RegisterMap::default();
        let mut payload = [0u8; 16];
        payload[0] = 0x01;
        payload[4..8].copy_from_slice(&100u32.to_le_bytes());
        payload[8..12].copy_from_slice(&1_000u32.to_le_bytes());
        payload[12..16].copy_from_slice(&(-1i32).to_le_bytes());

        regs.write(START_PULSE_TRAIN, &payload).unwrap();
        assert_eq!(regs.start_train, [1, 100, 1_000, u32::MAX]);
        assert_eq!(regs.read(START_PULSE_TRAIN).unwrap().as_slice(), &payload);
    }

    #[test]
    fn wrong_width_leaves_register_untouched() {
        let mut regs = RegisterMap::default();
        assert_eq!(
            regs.write(PWM_CONFIG, &[1, 2, 3]),
            Err(Error::PayloadLength {
                address: PWM_CONFIG,
                expected: 8,
                got: 3
            })
        );
        assert_eq!(regs.pwm_config, [0, 0]);
    }

    #[test]
    fn operation_mode_gates_events() {
        let mut regs = RegisterMap::default();
        assert!(!regs.events_enabled());
        regs.write(OPERATION_CTRL, &[OP_MODE_ACTIVE]).unwrap();
        assert!(regs.events_enabled());
        regs.write(OPERATION_CTRL, &[0x80 | OP_MODE_STANDBY]).unwrap();
        assert!(!regs.events_enabled());
    }
}
