use crate::*;
use heapless::spsc::{Consumer, Producer, Queue};

/// Hand-off queue between the drain timer and the main loop.
///
/// `heapless` keeps one slot free, hence the `+ 1`.
pub type SampleQueue = Queue<SampleItem, { HANDOFF_DEPTH + 1 }>;
pub type SampleProducer<'a> = Producer<'a, SampleItem, { HANDOFF_DEPTH + 1 }>;
pub type SampleConsumer<'a> = Consumer<'a, SampleItem, { HANDOFF_DEPTH + 1 }>;

/// One snapshot of every analog channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SampleItem {
    /// Capture time in device microseconds.
    pub timestamp: u64,
    /// 12-bit conversion results, channel 0 first.
    pub channels: [u16; ANALOG_CHANNELS],
}

/// Struct representing the Sampler responsible for continuous acquisition.
pub struct Sampler<C> {
    /// Converter and transfer channels filling the analog buffer.
    capture: C,
    /// Drain timer, `None` while the pipeline is stopped or self-cancelled.
    drain: Option<AlarmId>,
    /// Whether the capture hardware is running.
    running: bool,
}

impl<C: ContinuousCapture> Sampler<C> {
    /// Creates a new instance of the Sampler.
    ///
    /// # Arguments
    ///
    /// * `capture` - Capture hardware; configured here, started by [`Sampler::start`].
    ///
    /// # Returns
    ///
    /// A new, stopped `Sampler` instance.
    pub fn new(mut capture: C) -> Self {
        capture.configure();
        Self {
            capture,
            drain: None,
            running: false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Whether the drain timer is armed. A running capture without one
    /// delivers nothing.
    pub fn is_draining(&self) -> bool {
        self.drain.is_some()
    }

    pub fn capture(&self) -> &C {
        &self.capture
    }

    pub fn capture_mut(&mut self) -> &mut C {
        &mut self.capture
    }

    /// Starts continuous acquisition and arms the drain timer.
    ///
    /// Only the drain timer is re-armed if the capture is already running.
    ///
    /// # Arguments
    ///
    /// * `alarms` - Alarm pool hosting the drain timer.
    /// * `now` - Current device time in microseconds.
    pub fn start(&mut self, alarms: &mut AlarmPool, now: u64) -> Result<()> {
        if self.drain.is_some() {
            return Ok(());
        }
        let drain = alarms.schedule_periodic(now, DRAIN_PERIOD_US, DRAIN_PERIOD_US, AlarmTarget::Drain)?;
        self.drain = Some(drain);
        if !self.running {
            self.capture.start();
            self.running = true;
        }
        info!("sampler started, drain every {=u32} us", DRAIN_PERIOD_US);
        Ok(())
    }

    /// Stops acquisition and discards everything captured so far.
    ///
    /// Abort requests are not guaranteed to land at once, so both transfer
    /// channels are aborted again until they report idle. A stale transfer
    /// left in flight would write into the next session's buffer.
    ///
    /// # Arguments
    ///
    /// * `alarms` - Alarm pool hosting the drain timer.
    /// * `consumer` - Main-loop end of the hand-off queue, flushed here.
    pub fn stop(&mut self, alarms: &mut AlarmPool, consumer: &mut SampleConsumer<'_>) {
        if let Some(drain) = self.drain.take() {
            alarms.cancel(drain);
        }

        let mut attempts = 0;
        loop {
            self.capture.request_abort();
            attempts += 1;
            if self.capture.is_idle() {
                break;
            }
            if attempts >= ABORT_ATTEMPTS {
                warn!("capture still busy after {=u32} aborts", attempts);
                break;
            }
        }
        if attempts > 1 {
            debug!("capture idle after {=u32} aborts", attempts);
        }

        self.capture.stop_conversion();
        while consumer.dequeue().is_some() {}

        if self.running {
            info!("sampler stopped");
        }
        self.running = false;
    }

    /// Drain timer callback: snapshots the analog buffer into the hand-off queue.
    ///
    /// # Arguments
    ///
    /// * `id` - The alarm that fired; anything but the current drain timer is stale.
    /// * `events_enabled` - Host flag; once cleared the timer cancels itself.
    /// * `now` - Capture timestamp.
    /// * `producer` - Interrupt end of the hand-off queue.
    ///
    /// # Returns
    ///
    /// Whether the drain timer keeps repeating.
    pub fn on_drain(
        &mut self,
        id: AlarmId,
        events_enabled: bool,
        now: u64,
        producer: &mut SampleProducer<'_>,
    ) -> bool {
        if self.drain != Some(id) {
            return false;
        }
        if !events_enabled {
            self.drain = None;
            return false;
        }

        let channels = self.capture.snapshot().map(|raw| raw & ADC_RESOLUTION_MASK);
        push_blocking(
            producer,
            SampleItem {
                timestamp: now,
                channels,
            },
        );
        true
    }
}

/// Enqueues `item`, spinning while the queue is full.
///
/// A full queue means the main loop is behind; samples are never dropped.
/// This is sound only while the drain period stays far above one main-loop
/// iteration: on a single core the spinning interrupt keeps the consumer
/// from running, so a persistently full queue would never drain.
pub fn push_blocking(producer: &mut SampleProducer<'_>, mut item: SampleItem) {
    loop {
        match producer.enqueue(item) {
            Ok(()) => return,
            Err(rejected) => {
                item = rejected;
                core::hint::spin_loop();
            }
        }
    }
}
