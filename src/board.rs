//! Hardware ports the core depends on.
//!
//! Output and input masks are logical: bit 0 is DO0/DI0. Implementations
//! shift them onto the physical pins.

use crate::pwm::PwmSettings;

pub trait Board {
    /// Monotonic device time in microseconds.
    fn now_us(&self) -> u64;

    fn set_outputs(&mut self, mask: u8);
    fn clear_outputs(&mut self, mask: u8);
    fn toggle_outputs(&mut self, mask: u8);
    /// Drives every digital output to the matching bit of `state`.
    fn write_outputs(&mut self, state: u8);
    fn outputs(&self) -> u8;

    fn inputs(&self) -> u8;
    /// Enables or disables edge interrupts on all digital inputs.
    fn set_input_interrupts(&mut self, enabled: bool);

    /// Arms the hardware alarm backing the alarm pool, or disarms it on `None`.
    fn arm_alarm(&mut self, deadline: Option<u64>);

    /// Clock feeding the PWM counter.
    fn pwm_clock_hz(&self) -> u32;
    fn apply_pwm(&mut self, settings: &PwmSettings);
    fn stop_pwm(&mut self);
}

/// Free-running converter drained into a fixed buffer by a self-retriggering
/// pair of transfer channels.
///
/// Aborting is a request: the channels may still be finishing a transfer,
/// so callers poll [`ContinuousCapture::is_idle`] and repeat.
pub trait ContinuousCapture {
    /// Sets up round-robin conversion and the chained transfer channels.
    fn configure(&mut self);
    /// Selects the first channel, arms the chain and starts free-running conversion.
    fn start(&mut self);
    fn request_abort(&mut self);
    fn is_idle(&self) -> bool;
    /// Stops conversion and empties the converter's result queue.
    fn stop_conversion(&mut self);
    /// Raw buffer contents, channel padding bits included.
    fn snapshot(&self) -> [u16; crate::ANALOG_CHANNELS];
}
