//! Software pulse trains on the digital outputs.
//!
//! Each output mask owns one slot. A train is a periodic tick alarm that
//! raises the outputs, plus a reserved pulse-end alarm that every tick
//! re-arms `width_us` later to lower them again. Ticks are paced from their
//! scheduled time, so long trains do not drift. When pulses overlap the
//! end moves out with each tick and the outputs simply stay high.
//!
//! Both alarms are taken when the train starts, so a running train never
//! needs another slot and cannot be dropped for lack of one.

use crate::*;

/// Slots indexed directly by the output mask byte.
const TRAIN_SLOTS: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TrainParams {
    pub mask: u8,
    pub width_us: u32,
    pub period_us: u32,
    /// Pulses left to emit; zero or negative repeats until stopped.
    pub count: i32,
}

impl TrainParams {
    /// Decodes the `[mask, width, period, count]` words of the start register.
    pub fn from_words([mask, width_us, period_us, count]: [u32; 4]) -> Result<Self> {
        let mask = u8::try_from(mask).map_err(|_| Error::MaskOutOfRange(mask))?;
        if period_us == 0 {
            return Err(Error::ZeroPeriod);
        }
        Ok(Self {
            mask,
            width_us,
            period_us,
            count: count as i32,
        })
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct PulseTrain {
    width_us: u32,
    remaining: i32,
    tick: Option<AlarmId>,
    /// Reserved pulse-end alarm, held for the life of the train.
    pulse_end: Option<AlarmId>,
    /// Count exhausted; the train ends with its last pulse.
    finishing: bool,
}

pub struct PulseEngine {
    trains: [PulseTrain; TRAIN_SLOTS],
}

impl Default for PulseEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PulseEngine {
    pub const fn new() -> Self {
        Self {
            trains: [PulseTrain {
                width_us: 0,
                remaining: 0,
                tick: None,
                pulse_end: None,
                finishing: false,
            }; TRAIN_SLOTS],
        }
    }

    pub fn is_active(&self, mask: u8) -> bool {
        self.trains[mask as usize].tick.is_some()
    }

    pub fn active(&self) -> usize {
        self.trains.iter().filter(|train| train.tick.is_some()).count()
    }

    /// Arms the train for `params.mask`, stopping the one already running there.
    ///
    /// The first pulse starts right away. Fails without side effects beyond
    /// that stop when the alarm pool cannot host both of the train's alarms.
    pub fn start<B: Board>(
        &mut self,
        params: TrainParams,
        alarms: &mut AlarmPool,
        board: &mut B,
        sink: &mut impl EventSink,
    ) -> Result<()> {
        self.stop(params.mask, alarms, board, sink);

        let tick = alarms.schedule_periodic(
            board.now_us(),
            0,
            params.period_us,
            AlarmTarget::TrainTick(params.mask),
        )?;
        let end = match alarms.reserve(AlarmTarget::PulseEnd(params.mask)) {
            Ok(end) => end,
            Err(err) => {
                alarms.cancel(tick);
                return Err(err);
            }
        };
        self.trains[params.mask as usize] = PulseTrain {
            width_us: params.width_us,
            remaining: params.count,
            tick: Some(tick),
            pulse_end: Some(end),
            finishing: false,
        };
        debug!(
            "train {=u8:#x}: {=u32}/{=u32} us x {=i32}",
            params.mask,
            params.width_us,
            params.period_us,
            params.count
        );
        Ok(())
    }

    /// Stops the train at `mask`. Returns `false`, silently, if none was running.
    pub fn stop<B: Board>(
        &mut self,
        mask: u8,
        alarms: &mut AlarmPool,
        board: &mut B,
        sink: &mut impl EventSink,
    ) -> bool {
        let train = &mut self.trains[mask as usize];
        let Some(tick) = train.tick else {
            return false;
        };

        alarms.cancel(tick);
        if let Some(end) = train.pulse_end {
            // A pulse in flight is cut short.
            if alarms.is_armed(end) {
                board.clear_outputs(mask);
            }
            alarms.cancel(end);
        }
        *train = PulseTrain::default();

        sink.emit(Event::TrainStopped {
            mask,
            at: board.now_us(),
        });
        true
    }

    /// Stops every running train, each with its own stop notification.
    pub fn stop_all<B: Board>(&mut self, alarms: &mut AlarmPool, board: &mut B, sink: &mut impl EventSink) {
        for mask in 0..=u8::MAX {
            self.stop(mask, alarms, board, sink);
        }
    }

    /// Forgets every train without notifications.
    pub fn reset(&mut self, alarms: &mut AlarmPool) {
        for train in self.trains.iter_mut() {
            if let Some(tick) = train.tick {
                alarms.cancel(tick);
            }
            if let Some(end) = train.pulse_end {
                alarms.cancel(end);
            }
            *train = PulseTrain::default();
        }
    }

    /// Periodic tick: starts one pulse. Returns whether the tick repeats.
    pub fn on_tick<B: Board>(
        &mut self,
        mask: u8,
        id: AlarmId,
        alarms: &mut AlarmPool,
        board: &mut B,
        sink: &mut impl EventSink,
    ) -> bool {
        let train = &mut self.trains[mask as usize];
        if train.tick != Some(id) {
            return false;
        }

        let now = board.now_us();
        let mut repeat = true;
        if train.remaining > 0 {
            train.remaining -= 1;
            if train.remaining == 0 {
                repeat = false;
                train.finishing = true;
            }
        }

        if let Some(end) = train.pulse_end {
            alarms.rearm(end, now, train.width_us);
        }

        board.set_outputs(mask);
        sink.emit(Event::PulseStarted { mask, at: now });
        repeat
    }

    /// Pulse-end alarm: ends the pulse, and the train if that was its last one.
    pub fn on_pulse_end<B: Board>(
        &mut self,
        mask: u8,
        id: AlarmId,
        alarms: &mut AlarmPool,
        board: &mut B,
        sink: &mut impl EventSink,
    ) {
        let train = &mut self.trains[mask as usize];
        if train.pulse_end != Some(id) {
            return;
        }

        let now = board.now_us();
        board.clear_outputs(mask);
        sink.emit(Event::PulseEnded { mask, at: now });

        if train.finishing {
            alarms.cancel(id);
            *train = PulseTrain::default();
            sink.emit(Event::TrainStopped { mask, at: now });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimBoard;

    fn run(
        engine: &mut PulseEngine,
        alarms: &mut AlarmPool,
        board: &mut SimBoard,
        events: &mut Vec<Event>,
        until: u64,
    ) {
        while let Some(deadline) = alarms.next_deadline().filter(|d| *d <= until) {
            board.now = board.now.max(deadline);
            let fired = alarms.pop_due(board.now).unwrap();
            match fired.target {
                AlarmTarget::TrainTick(mask) => {
                    let repeat = engine.on_tick(mask, fired.id, alarms, board, events);
                    alarms.complete(fired, repeat);
                }
                AlarmTarget::PulseEnd(mask) => {
                    engine.on_pulse_end(mask, fired.id, alarms, board, events)
                }
                AlarmTarget::Drain => unreachable!(),
            }
        }
        board.now = until;
    }

    fn params(mask: u8, width_us: u32, period_us: u32, count: i32) -> TrainParams {
        TrainParams {
            mask,
            width_us,
            period_us,
            count,
        }
    }

    #[test]
    fn decodes_start_register_words() {
        assert_eq!(
            TrainParams::from_words([0x81, 10, 20, u32::MAX]),
            Ok(params(0x81, 10, 20, -1))
        );
        assert_eq!(
            TrainParams::from_words([0x100, 10, 20, 1]),
            Err(Error::MaskOutOfRange(0x100))
        );
        assert_eq!(TrainParams::from_words([1, 10, 0, 1]), Err(Error::ZeroPeriod));
    }

    #[test]
    fn outputs_follow_the_pulse() {
        let mut engine = PulseEngine::new();
        let mut alarms = AlarmPool::new();
        let mut board = SimBoard::default();
        let mut events = Vec::new();

        engine
            .start(params(0x05, 100, 1_000, 2), &mut alarms, &mut board, &mut events)
            .unwrap();
        run(&mut engine, &mut alarms, &mut board, &mut events, 50);
        assert_eq!(board.outputs, 0x05);
        run(&mut engine, &mut alarms, &mut board, &mut events, 500);
        assert_eq!(board.outputs, 0x00);
        run(&mut engine, &mut alarms, &mut board, &mut events, 1_050);
        assert_eq!(board.outputs, 0x05);
        run(&mut engine, &mut alarms, &mut board, &mut events, 5_000);
        assert_eq!(board.outputs, 0x00);
        assert!(!engine.is_active(0x05));
    }

    #[test]
    fn overlapping_pulses_finish_on_the_last_end() {
        let mut engine = PulseEngine::new();
        let mut alarms = AlarmPool::new();
        let mut board = SimBoard::default();
        let mut events = Vec::new();

        // Width longer than the period is accepted as configured.
        engine
            .start(params(0x02, 150, 100, 2), &mut alarms, &mut board, &mut events)
            .unwrap();
        run(&mut engine, &mut alarms, &mut board, &mut events, 200);
        assert_eq!(board.outputs, 0x02);
        run(&mut engine, &mut alarms, &mut board, &mut events, 1_000);

        assert_eq!(
            events,
            [
                Event::PulseStarted { mask: 0x02, at: 0 },
                Event::PulseStarted { mask: 0x02, at: 100 },
                Event::PulseEnded { mask: 0x02, at: 250 },
                Event::TrainStopped { mask: 0x02, at: 250 },
            ]
        );
        assert_eq!(board.outputs, 0);
        assert_eq!(alarms.free(), ALARM_SLOTS);
    }

    #[test]
    fn endless_overlapping_train_keeps_running() {
        let mut engine = PulseEngine::new();
        let mut alarms = AlarmPool::new();
        let mut board = SimBoard::default();
        let mut events = Vec::new();

        engine
            .start(params(0x01, 10_000, 100, 0), &mut alarms, &mut board, &mut events)
            .unwrap();
        run(&mut engine, &mut alarms, &mut board, &mut events, 5_000);

        assert!(engine.is_active(0x01));
        assert_eq!(board.outputs, 0x01);
        assert_eq!(alarms.free(), ALARM_SLOTS - 2);
        assert!(!events
            .iter()
            .any(|event| matches!(event, Event::TrainStopped { .. })));
        let started = events
            .iter()
            .filter(|event| matches!(event, Event::PulseStarted { .. }))
            .count();
        assert_eq!(started, 51);
    }

    #[test]
    fn stop_mid_pulse_lowers_outputs_and_silences_pending_end() {
        let mut engine = PulseEngine::new();
        let mut alarms = AlarmPool::new();
        let mut board = SimBoard::default();
        let mut events = Vec::new();

        engine
            .start(params(0x10, 300, 1_000, 0), &mut alarms, &mut board, &mut events)
            .unwrap();
        run(&mut engine, &mut alarms, &mut board, &mut events, 100);
        assert!(engine.stop(0x10, &mut alarms, &mut board, &mut events));
        assert_eq!(board.outputs, 0);

        run(&mut engine, &mut alarms, &mut board, &mut events, 10_000);
        assert_eq!(
            events,
            [
                Event::PulseStarted { mask: 0x10, at: 0 },
                Event::TrainStopped { mask: 0x10, at: 100 },
            ]
        );
        assert_eq!(alarms.next_deadline(), None);
    }

    #[test]
    fn reset_is_silent() {
        let mut engine = PulseEngine::new();
        let mut alarms = AlarmPool::new();
        let mut board = SimBoard::default();
        let mut events = Vec::new();

        engine
            .start(params(0x01, 10, 100, 0), &mut alarms, &mut board, &mut events)
            .unwrap();
        engine
            .start(params(0x02, 10, 100, 0), &mut alarms, &mut board, &mut events)
            .unwrap();
        engine.reset(&mut alarms);

        assert_eq!(engine.active(), 0);
        assert!(events.is_empty());
        assert_eq!(alarms.next_deadline(), None);
    }

    #[test]
    fn full_pool_refuses_the_start_and_running_trains_survive() {
        let mut engine = PulseEngine::new();
        let mut alarms = AlarmPool::new();
        let mut board = SimBoard::default();
        let mut events = Vec::new();

        engine
            .start(params(0x01, 10, 100, 0), &mut alarms, &mut board, &mut events)
            .unwrap();
        // Leave a single slot: enough for a tick, not for its pulse end.
        while alarms.free() > 1 {
            alarms.schedule_once(0, 1_000_000, AlarmTarget::Drain).unwrap();
        }

        assert_eq!(
            engine.start(params(0x02, 10, 100, 0), &mut alarms, &mut board, &mut events),
            Err(Error::AlarmPoolExhausted)
        );
        assert!(!engine.is_active(0x02));
        assert_eq!(alarms.free(), 1);

        run(&mut engine, &mut alarms, &mut board, &mut events, 450);
        assert!(engine.is_active(0x01));
        assert!(!events
            .iter()
            .any(|event| matches!(event, Event::TrainStopped { .. })));
    }

    #[test]
    fn every_mask_up_to_the_limit_can_run() {
        let mut engine = PulseEngine::new();
        let mut alarms = AlarmPool::new();
        let mut board = SimBoard::default();
        let mut events = Vec::new();

        for mask in 1..=MAX_TRAINS as u8 {
            engine
                .start(params(mask, 10, 1_000, 0), &mut alarms, &mut board, &mut events)
                .unwrap();
        }
        assert_eq!(engine.active(), MAX_TRAINS);
        // The drain timer still finds its slot.
        assert!(alarms.schedule_once(0, 1_000_000, AlarmTarget::Drain).is_ok());

        run(&mut engine, &mut alarms, &mut board, &mut events, 3_000);
        assert_eq!(engine.active(), MAX_TRAINS);
    }
}
