//! Simulated hardware for host tests.

use crate::*;

#[derive(Debug, Default)]
pub struct SimBoard {
    pub now: u64,
    pub outputs: u8,
    pub inputs: u8,
    pub input_interrupts: bool,
    pub alarm: Option<u64>,
    pub pwm: Option<PwmSettings>,
}

impl SimBoard {
    pub const PWM_CLOCK_HZ: u32 = 125_000_000;
}

impl Board for SimBoard {
    fn now_us(&self) -> u64 {
        self.now
    }

    fn set_outputs(&mut self, mask: u8) {
        self.outputs |= mask;
    }

    fn clear_outputs(&mut self, mask: u8) {
        self.outputs &= !mask;
    }

    fn toggle_outputs(&mut self, mask: u8) {
        self.outputs ^= mask;
    }

    fn write_outputs(&mut self, state: u8) {
        self.outputs = state;
    }

    fn outputs(&self) -> u8 {
        self.outputs
    }

    fn inputs(&self) -> u8 {
        self.inputs
    }

    fn set_input_interrupts(&mut self, enabled: bool) {
        self.input_interrupts = enabled;
    }

    fn arm_alarm(&mut self, deadline: Option<u64>) {
        self.alarm = deadline;
    }

    fn pwm_clock_hz(&self) -> u32 {
        Self::PWM_CLOCK_HZ
    }

    fn apply_pwm(&mut self, settings: &PwmSettings) {
        self.pwm = Some(*settings);
    }

    fn stop_pwm(&mut self) {
        self.pwm = None;
    }
}

/// Capture whose buffer tests write directly.
#[derive(Debug, Default)]
pub struct SimCapture {
    pub configured: bool,
    pub buffer: [u16; ANALOG_CHANNELS],
    /// Abort requests still needed before the channels report idle.
    pub busy_for: u32,
    pub aborts: u32,
    pub converting: bool,
}

impl ContinuousCapture for SimCapture {
    fn configure(&mut self) {
        self.configured = true;
    }

    fn start(&mut self) {
        self.converting = true;
    }

    fn request_abort(&mut self) {
        self.aborts += 1;
        self.busy_for = self.busy_for.saturating_sub(1);
    }

    fn is_idle(&self) -> bool {
        self.busy_for == 0
    }

    fn stop_conversion(&mut self) {
        self.converting = false;
    }

    fn snapshot(&self) -> [u16; ANALOG_CHANNELS] {
        self.buffer
    }
}

/// Drives a [`Device`] on a simulated clock, the way the firmware's
/// interrupt handlers and idle loop would.
pub struct Harness<'a> {
    pub device: Device<SimBoard, SimCapture>,
    producer: SampleProducer<'a>,
    consumer: SampleConsumer<'a>,
    replies: Vec<Reply>,
}

impl<'a> Harness<'a> {
    pub fn new(queue: &'a mut SampleQueue) -> Self {
        let (producer, consumer) = queue.split();
        Self {
            device: Device::new(SimBoard::default(), SimCapture::default()),
            producer,
            consumer,
            replies: Vec::new(),
        }
    }

    pub fn request(&mut self, request: Request) {
        self.device.handle_request(&request);
        self.collect();
    }

    /// One main-loop iteration.
    pub fn tick(&mut self) {
        self.device.update(&mut self.consumer);
        self.collect();
    }

    pub fn reset(&mut self) {
        self.device.reset(&mut self.consumer);
        self.collect();
    }

    /// Fires every alarm due up to `until`, running the main loop after
    /// each hardware alarm interrupt.
    pub fn run_until(&mut self, until: u64) {
        self.fire_until(until, true);
    }

    /// Fires alarms up to `until` without letting the main loop run.
    pub fn advance_alarms_only(&mut self, until: u64) {
        self.fire_until(until, false);
    }

    /// Replies and events raised so far, oldest first.
    pub fn take_replies(&mut self) -> Vec<Reply> {
        self.collect();
        core::mem::take(&mut self.replies)
    }

    fn fire_until(&mut self, until: u64, main_loop: bool) {
        while let Some(deadline) = self.device.board().alarm.filter(|d| *d <= until) {
            let board = self.device.board_mut();
            board.now = board.now.max(deadline);
            self.device.on_alarm(&mut self.producer);
            if main_loop {
                self.device.update(&mut self.consumer);
            }
            self.collect();
        }
        let board = self.device.board_mut();
        board.now = board.now.max(until);
    }

    fn collect(&mut self) {
        while let Some(reply) = self.device.pop_reply() {
            self.replies.push(reply);
        }
    }
}
