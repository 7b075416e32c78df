use crate::*;
use embedded_hal::pwm::SetDutyCycle;
use hal::gpio::{DynPinId, FunctionSioInput, FunctionSioOutput, Interrupt, Pin, PullDown};
use hal::pwm::{FreeRunning, Pwm0, Slice};
use hal::timer::{Alarm, Alarm0, Instant, Timer};
use hobgoblin::board::Board;
use hobgoblin::pwm::PwmSettings;
use hobgoblin::{DI_PINS, DO0_PIN};

pub mod capture;
pub mod link;

pub type InputPin = Pin<DynPinId, FunctionSioInput, PullDown>;
pub type OutputPin = Pin<DynPinId, FunctionSioOutput, PullDown>;
pub type PwmSlice = Slice<Pwm0, FreeRunning>;

const DO_MASK: u32 = 0xff << DO0_PIN;

/// The Hobgoblin board: SIO-driven outputs, edge-interrupt inputs,
/// TIMER alarm 0 and PWM slice 0.
pub struct Rp2040Board {
    timer: Timer,
    alarm: Alarm0,
    inputs: [InputPin; 5],
    _outputs: [OutputPin; 8],
    pwm: PwmSlice,
    pwm_clock_hz: u32,
}

impl Rp2040Board {
    pub fn new(
        timer: Timer,
        mut alarm: Alarm0,
        inputs: [InputPin; 5],
        outputs: [OutputPin; 8],
        pwm: PwmSlice,
        pwm_clock_hz: u32,
    ) -> Self {
        alarm.enable_interrupt();
        Self {
            timer,
            alarm,
            inputs,
            _outputs: outputs,
            pwm,
            pwm_clock_hz,
        }
    }

    /// Acknowledges the alarm interrupt.
    pub fn ack_alarm(&mut self) {
        self.alarm.clear_interrupt();
    }

    /// Acknowledges every pending input edge.
    pub fn ack_input_edges(&mut self) {
        for pin in self.inputs.iter_mut() {
            pin.clear_interrupt(Interrupt::EdgeHigh);
            pin.clear_interrupt(Interrupt::EdgeLow);
        }
    }

    fn sio(&self) -> &pac::sio::RegisterBlock {
        unsafe { &*pac::SIO::ptr() }
    }
}

impl Board for Rp2040Board {
    fn now_us(&self) -> u64 {
        self.timer.get_counter().ticks()
    }

    fn set_outputs(&mut self, mask: u8) {
        self.sio()
            .gpio_out_set()
            .write(|w| unsafe { w.bits((mask as u32) << DO0_PIN) });
    }

    fn clear_outputs(&mut self, mask: u8) {
        self.sio()
            .gpio_out_clr()
            .write(|w| unsafe { w.bits((mask as u32) << DO0_PIN) });
    }

    fn toggle_outputs(&mut self, mask: u8) {
        self.sio()
            .gpio_out_xor()
            .write(|w| unsafe { w.bits((mask as u32) << DO0_PIN) });
    }

    fn write_outputs(&mut self, state: u8) {
        let state = (state as u32) << DO0_PIN;
        let sio = self.sio();
        sio.gpio_out_set().write(|w| unsafe { w.bits(state) });
        sio.gpio_out_clr()
            .write(|w| unsafe { w.bits(!state & DO_MASK) });
    }

    fn outputs(&self) -> u8 {
        ((self.sio().gpio_out().read().bits() & DO_MASK) >> DO0_PIN) as u8
    }

    fn inputs(&self) -> u8 {
        let raw = self.sio().gpio_in().read().bits();
        DI_PINS
            .iter()
            .enumerate()
            .fold(0, |acc, (bit, pin)| acc | (((raw >> pin) & 1) as u8) << bit)
    }

    fn set_input_interrupts(&mut self, enabled: bool) {
        for pin in self.inputs.iter_mut() {
            pin.clear_interrupt(Interrupt::EdgeHigh);
            pin.clear_interrupt(Interrupt::EdgeLow);
            pin.set_interrupt_enabled(Interrupt::EdgeHigh, enabled);
            pin.set_interrupt_enabled(Interrupt::EdgeLow, enabled);
        }
    }

    fn arm_alarm(&mut self, deadline: Option<u64>) {
        match deadline {
            Some(deadline) => {
                let refused = self.alarm.schedule_at(Instant::from_ticks(deadline)).is_err();
                if refused || self.now_us() >= deadline {
                    // Deadline already behind us: run the handler now.
                    pac::NVIC::pend(pac::Interrupt::TIMER_IRQ_0);
                }
            }
            None => {
                self.alarm.cancel().ok();
            }
        }
    }

    fn pwm_clock_hz(&self) -> u32 {
        self.pwm_clock_hz
    }

    fn apply_pwm(&mut self, settings: &PwmSettings) {
        self.pwm.disable();
        self.pwm.set_div_int(settings.divider);
        self.pwm.set_div_frac(0);
        self.pwm.set_top(settings.top);
        self.pwm.channel_a.set_duty_cycle(settings.level).ok();
        self.pwm.set_counter(0);
        self.pwm.enable();
    }

    fn stop_pwm(&mut self) {
        self.pwm.channel_a.set_duty_cycle(0).ok();
        self.pwm.disable();
    }
}
