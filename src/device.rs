//! The single owned device context.
//!
//! Interrupt handlers and the main loop both reach the engines through
//! [`Device`]; the firmware shares it between rtic tasks.

use crate::harp::{MessageType, Payload, PayloadType, Reply, Request};
use crate::registers::*;
use crate::*;
use heapless::Deque;

/// Asynchronous notifications raised by the engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Event {
    DigitalInput { state: u8, at: u64 },
    PulseStarted { mask: u8, at: u64 },
    PulseEnded { mask: u8, at: u64 },
    /// Shared by natural completion and cancellation.
    TrainStopped { mask: u8, at: u64 },
    AnalogData(SampleItem),
}

pub trait EventSink {
    fn emit(&mut self, event: Event);
}

/// Replies waiting for the host link.
#[derive(Default)]
struct Outbox {
    replies: Deque<Reply, OUTBOX_DEPTH>,
}

impl Outbox {
    fn push(&mut self, reply: Reply) {
        if let Err(reply) = self.replies.push_back(reply) {
            warn!("outbox full, reply to {=u8} dropped", reply.address);
        }
    }
}

/// Turns events into register updates and event replies.
struct Reporter<'a> {
    registers: &'a mut RegisterMap,
    outbox: &'a mut Outbox,
}

impl EventSink for Reporter<'_> {
    fn emit(&mut self, event: Event) {
        let (address, at) = match event {
            Event::DigitalInput { state, at } => {
                self.registers.di_state = state;
                (DI_STATE, at)
            }
            Event::PulseStarted { mask, at } => {
                self.registers.do_set = mask;
                (DO_SET, at)
            }
            Event::PulseEnded { mask, at } => {
                self.registers.do_clear = mask;
                (DO_CLEAR, at)
            }
            Event::TrainStopped { mask, at } => {
                self.registers.stop_train = mask;
                (STOP_PULSE_TRAIN, at)
            }
            Event::AnalogData(sample) => {
                self.registers.analog = sample.channels;
                (ANALOG_DATA, sample.timestamp)
            }
        };
        trace!("event {}", event);

        let Some(info) = RegisterInfo::lookup(address) else {
            return;
        };
        let payload = self.registers.read(address).unwrap_or_default();
        self.outbox
            .push(Reply::new(MessageType::Event, address, info.payload_type, payload, at));
    }
}

pub struct Device<B, C> {
    board: B,
    registers: RegisterMap,
    alarms: AlarmPool,
    trains: PulseEngine,
    sampler: Sampler<C>,
    coordinator: Coordinator,
    outbox: Outbox,
}

impl<B: Board, C: ContinuousCapture> Device<B, C> {
    pub fn new(board: B, capture: C) -> Self {
        Self {
            board,
            registers: RegisterMap::default(),
            alarms: AlarmPool::new(),
            trains: PulseEngine::new(),
            sampler: Sampler::new(capture),
            coordinator: Coordinator::new(),
            outbox: Outbox::default(),
        }
    }

    pub fn board(&self) -> &B {
        &self.board
    }

    pub fn board_mut(&mut self) -> &mut B {
        &mut self.board
    }

    pub fn registers(&self) -> &RegisterMap {
        &self.registers
    }

    pub fn sampler(&self) -> &Sampler<C> {
        &self.sampler
    }

    pub fn capture(&self) -> &C {
        self.sampler.capture()
    }

    pub fn capture_mut(&mut self) -> &mut C {
        self.sampler.capture_mut()
    }

    pub fn trains(&self) -> &PulseEngine {
        &self.trains
    }

    pub fn coordinator_state(&self) -> CoordinatorState {
        self.coordinator.state()
    }

    pub fn events_enabled(&self) -> bool {
        self.registers.events_enabled()
    }

    /// Next reply for the host, oldest first.
    pub fn pop_reply(&mut self) -> Option<Reply> {
        self.outbox.replies.pop_front()
    }

    /// Device reset: everything idle, every register zeroed.
    pub fn reset(&mut self, consumer: &mut SampleConsumer<'_>) {
        self.trains.reset(&mut self.alarms);
        self.sampler.stop(&mut self.alarms, consumer);
        self.alarms.clear();
        self.board.stop_pwm();
        self.board.set_input_interrupts(false);
        self.board.write_outputs(0);
        self.coordinator.reset();
        self.registers = RegisterMap::default();
        self.outbox.replies.clear();
        self.sync_alarm();
        info!("device reset");
    }

    /// One main-loop iteration.
    ///
    /// Runs the coordinator first so that nothing captured before a disable
    /// is reported after it, then publishes at most one queued sample.
    ///
    /// While active, a sampler that lost its drain timer is restarted. That
    /// happens when events were switched off and back on between two
    /// iterations and a drain ran in the gap.
    pub fn update(&mut self, consumer: &mut SampleConsumer<'_>) {
        match self.coordinator.evaluate(self.registers.events_enabled()) {
            Some(Transition::Activate) => {
                info!("events enabled");
                self.board.set_input_interrupts(true);
                self.start_sampler();
            }
            Some(Transition::Deactivate) => {
                info!("events disabled");
                self.board.set_input_interrupts(false);
                self.sampler.stop(&mut self.alarms, consumer);
                let mut reporter = Reporter {
                    registers: &mut self.registers,
                    outbox: &mut self.outbox,
                };
                self.trains
                    .stop_all(&mut self.alarms, &mut self.board, &mut reporter);
            }
            None if self.coordinator.state() == CoordinatorState::Active
                && !self.sampler.is_draining() =>
            {
                debug!("sampler restart");
                self.sampler.stop(&mut self.alarms, consumer);
                self.start_sampler();
            }
            None => {}
        }

        if let Some(sample) = consumer.dequeue() {
            self.reporter().emit(Event::AnalogData(sample));
        }
        self.sync_alarm();
    }

    /// Hardware alarm handler: runs every alarm due by now.
    pub fn on_alarm(&mut self, producer: &mut SampleProducer<'_>) {
        loop {
            let now = self.board.now_us();
            let Some(fired) = self.alarms.pop_due(now) else {
                break;
            };
            let mut reporter = Reporter {
                registers: &mut self.registers,
                outbox: &mut self.outbox,
            };
            match fired.target {
                AlarmTarget::TrainTick(mask) => {
                    let repeat = self.trains.on_tick(
                        mask,
                        fired.id,
                        &mut self.alarms,
                        &mut self.board,
                        &mut reporter,
                    );
                    self.alarms.complete(fired, repeat);
                }
                AlarmTarget::PulseEnd(mask) => {
                    self.trains.on_pulse_end(
                        mask,
                        fired.id,
                        &mut self.alarms,
                        &mut self.board,
                        &mut reporter,
                    );
                }
                AlarmTarget::Drain => {
                    let enabled = self.registers.events_enabled();
                    let repeat = self.sampler.on_drain(fired.id, enabled, now, producer);
                    self.alarms.complete(fired, repeat);
                }
            }
            self.registers.do_state = self.board.outputs();
        }
        self.sync_alarm();
    }

    /// Digital input edge handler.
    pub fn on_input_edge(&mut self) {
        let state = self.board.inputs();
        let at = self.board.now_us();
        self.reporter().emit(Event::DigitalInput { state, at });
    }

    /// Serves one host request, queueing exactly one reply for it.
    pub fn handle_request(&mut self, request: &Request) {
        let now = self.board.now_us();
        let result = match request.kind {
            MessageType::Read => self.read(request),
            MessageType::Write => self.write(request),
            MessageType::Event => Err(Error::UnknownRegister(request.address)),
        };

        let reply = match result {
            Ok(info) => {
                let payload = self.registers.read(info.address).unwrap_or_default();
                Reply::new(request.kind, info.address, info.payload_type, payload, now)
            }
            Err(err) => {
                warn!("request to {=u8} refused: {}", request.address, err);
                let payload = self.registers.read(request.address).unwrap_or_default();
                Reply::error(request.kind, request.address, request.payload_type, payload, now)
            }
        };
        self.outbox.push(reply);
        self.sync_alarm();
    }

    fn read(&mut self, request: &Request) -> Result<RegisterInfo> {
        RegisterInfo::lookup(request.address).ok_or(Error::UnknownRegister(request.address))
    }

    fn write(&mut self, request: &Request) -> Result<RegisterInfo> {
        let address = request.address;
        let info = RegisterInfo::lookup(address).ok_or(Error::UnknownRegister(address))?;
        if info.access == Access::ReadOnly {
            return Err(Error::ReadOnlyRegister(address));
        }
        if PayloadType::from_code(request.payload_type) != Some(info.payload_type) {
            return Err(Error::PayloadTypeMismatch {
                address,
                expected: info.payload_type.code(),
                got: request.payload_type,
            });
        }

        let previous = self.registers.read(address)?;
        self.registers.write(address, &request.payload)?;
        if let Err(err) = self.apply_write(address) {
            // Only the target goes back; side effects already raised stay.
            self.registers.write(address, &previous)?;
            self.registers.do_state = self.board.outputs();
            return Err(err);
        }
        Ok(info)
    }

    fn start_sampler(&mut self) {
        let now = self.board.now_us();
        if let Err(err) = self.sampler.start(&mut self.alarms, now) {
            error!("sampler start failed: {}", err);
        }
    }

    /// Carries out the hardware side of a write already copied into the map.
    fn apply_write(&mut self, address: u8) -> Result<()> {
        match address {
            OPERATION_CTRL => {
                debug!("operation control {=u8:#x}", self.registers.operation_ctrl);
            }
            DO_SET => self.board.set_outputs(self.registers.do_set),
            DO_CLEAR => self.board.clear_outputs(self.registers.do_clear),
            DO_TOGGLE => self.board.toggle_outputs(self.registers.do_toggle),
            DO_STATE => self.board.write_outputs(self.registers.do_state),
            START_PULSE_TRAIN => {
                let params = TrainParams::from_words(self.registers.start_train)?;
                let mut reporter = Reporter {
                    registers: &mut self.registers,
                    outbox: &mut self.outbox,
                };
                self.trains
                    .start(params, &mut self.alarms, &mut self.board, &mut reporter)?;
            }
            STOP_PULSE_TRAIN => {
                let mask = self.registers.stop_train;
                let mut reporter = Reporter {
                    registers: &mut self.registers,
                    outbox: &mut self.outbox,
                };
                self.trains
                    .stop(mask, &mut self.alarms, &mut self.board, &mut reporter);
                self.registers.stop_train = mask;
            }
            PWM_CONFIG => {
                let [frequency_hz, duty_percent] = self.registers.pwm_config;
                let settings = PwmSettings::compute(self.board.pwm_clock_hz(), frequency_hz, duty_percent)?;
                self.board.apply_pwm(&settings);
                self.registers.pwm_config[1] = settings.duty_percent;
                debug!("pwm {=u32} Hz {=u32}%", frequency_hz, settings.duty_percent);
            }
            PWM_STOP => self.board.stop_pwm(),
            _ => return Err(Error::ReadOnlyRegister(address)),
        }
        self.registers.do_state = self.board.outputs();
        Ok(())
    }

    fn reporter(&mut self) -> Reporter<'_> {
        Reporter {
            registers: &mut self.registers,
            outbox: &mut self.outbox,
        }
    }

    fn sync_alarm(&mut self) {
        self.board.arm_alarm(self.alarms.next_deadline());
    }
}

#[cfg(test)]
impl EventSink for std::vec::Vec<Event> {
    fn emit(&mut self, event: Event) {
        self.push(event);
    }
}
