use crate::*;

/// Largest integer part of the 8.4 fractional clock divider.
const MAX_DIVIDER: u32 = 255;
/// Counter wraps after `top + 1` cycles.
const MAX_PERIOD_CYCLES: u32 = u16::MAX as u32 + 1;

/// Counter configuration for one PWM output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PwmSettings {
    /// Integer clock divider, 1..=255
    pub divider: u8,
    /// Counter wraps to zero after reaching this value
    pub top: u16,
    /// Output is high while the counter is below this value
    pub level: u16,
    /// Duty cycle after clamping
    pub duty_percent: u32,
}

impl PwmSettings {
    /// Picks the smallest divider that lets one period fit the 16-bit
    /// counter, which keeps the duty resolution as fine as possible.
    ///
    /// Duty cycles above 100% are clamped.
    pub fn compute(clock_hz: u32, frequency_hz: u32, duty_percent: u32) -> Result<Self> {
        if frequency_hz == 0 {
            return Err(Error::ZeroFrequency);
        }
        let duty_percent = duty_percent.min(100);

        let cycles = clock_hz / frequency_hz;
        if cycles < 2 {
            return Err(Error::FrequencyOutOfRange(frequency_hz));
        }
        let divider = cycles.div_ceil(MAX_PERIOD_CYCLES).max(1);
        if divider > MAX_DIVIDER {
            return Err(Error::FrequencyOutOfRange(frequency_hz));
        }

        let period = cycles / divider;
        let level = ((period as u64 * duty_percent as u64 + 50) / 100).min(u16::MAX as u64);

        Ok(Self {
            divider: divider as u8,
            top: (period - 1) as u16,
            level: level as u16,
            duty_percent,
        })
    }

    /// Counter cycles per PWM period.
    pub fn period_cycles(&self) -> u32 {
        self.top as u32 + 1
    }

    /// Fraction of the period the output spends high.
    pub fn duty_fraction(&self) -> f32 {
        self.level as f32 / self.period_cycles() as f32
    }

    /// Output frequency actually produced.
    pub fn frequency_hz(&self, clock_hz: u32) -> u32 {
        clock_hz / (self.divider as u32 * self.period_cycles())
    }
}
