use crate::*;
use hal::dma::{Channel, CH0, CH1};
use hobgoblin::board::ContinuousCapture;
use hobgoblin::ANALOG_CHANNELS;

/// DREQ number of the ADC FIFO.
const DREQ_ADC: u8 = 36;
/// Transfer request selector for unpaced transfers.
const TREQ_PERMANENT: u8 = 0x3f;
/// Round-robin mask for AIN0..AIN2 (GPIO26..GPIO28).
const ROUND_ROBIN: u8 = (1 << ANALOG_CHANNELS) - 1;
/// First GPIO wired to the ADC.
const ADC_PIN_BASE: usize = 26;
/// 48 MHz / (1 + 999) = 48 kS/s shared by all channels.
const ADC_CLOCK_DIVIDER: u16 = 999;
/// EN bit of a channel control register.
const CTRL_EN: u32 = 1;

/// Free-running ADC drained by two chained DMA channels.
///
/// Channel 0 copies one round of conversions from the ADC FIFO into the
/// buffer, then chains to channel 1, which writes the buffer address back
/// into channel 0's write-address trigger alias. The buffer therefore
/// always holds the latest round without CPU involvement.
pub struct DmaCapture {
    adc: pac::ADC,
    _ch0: Channel<CH0>,
    _ch1: Channel<CH1>,
    buffer: &'static mut [u16; ANALOG_CHANNELS],
    /// Word read by channel 1: the buffer address.
    reload: &'static mut u32,
}

impl DmaCapture {
    /// Creates a new capture over `adc` and DMA channels 0 and 1.
    ///
    /// # Arguments
    ///
    /// * `adc` - ADC block, taken out of reset here.
    /// * `ch0` - Transfer channel copying conversions.
    /// * `ch1` - Control channel retriggering `ch0`.
    /// * `buffer` - Destination of every conversion round.
    /// * `reload` - Scratch word holding the buffer address.
    /// * `resets` - Reset controller.
    pub fn new(
        adc: pac::ADC,
        ch0: Channel<CH0>,
        ch1: Channel<CH1>,
        buffer: &'static mut [u16; ANALOG_CHANNELS],
        reload: &'static mut u32,
        resets: &mut pac::RESETS,
    ) -> Self {
        resets.reset().modify(|_, w| w.adc().set_bit());
        resets.reset().modify(|_, w| w.adc().clear_bit());
        while resets.reset_done().read().adc().bit_is_clear() {}

        // Analog inputs: digital input buffer off, output driver off, no pulls.
        let pads = unsafe { &*pac::PADS_BANK0::ptr() };
        for pin in ADC_PIN_BASE..ADC_PIN_BASE + ANALOG_CHANNELS {
            pads.gpio(pin).modify(|_, w| {
                w.ie()
                    .clear_bit()
                    .od()
                    .set_bit()
                    .pue()
                    .clear_bit()
                    .pde()
                    .clear_bit()
            });
        }

        Self {
            adc,
            _ch0: ch0,
            _ch1: ch1,
            buffer,
            reload,
        }
    }

    fn drain_fifo(&self) {
        while self.adc.fcs().read().level().bits() > 0 {
            self.adc.fifo().read();
        }
    }
}

fn dma() -> &'static pac::dma::RegisterBlock {
    unsafe { &*pac::DMA::ptr() }
}

/// Flips a channel's EN bit through the non-triggering control alias.
fn set_channel_enabled(channel: usize, enabled: bool) {
    let ch = dma().ch(channel);
    let ctrl = ch.ch_ctrl_trig().read().bits();
    let ctrl = if enabled { ctrl | CTRL_EN } else { ctrl & !CTRL_EN };
    ch.ch_al1_ctrl().write(|w| unsafe { w.bits(ctrl) });
}

impl ContinuousCapture for DmaCapture {
    fn configure(&mut self) {
        self.adc.cs().write(|w| w.en().set_bit());
        while self.adc.cs().read().ready().bit_is_clear() {}

        self.adc
            .div()
            .write(|w| unsafe { w.int().bits(ADC_CLOCK_DIVIDER) });
        self.adc
            .fcs()
            .write(|w| unsafe { w.en().set_bit().dreq_en().set_bit().thresh().bits(1) });

        let buffer = self.buffer.as_ptr() as u32;
        *self.reload = buffer;
        let reload = &*self.reload as *const u32 as u32;
        let fifo = self.adc.fifo().as_ptr() as u32;
        let trigger = dma().ch(0).ch_al2_write_addr_trig().as_ptr() as u32;

        // Written with EN clear, so neither control write starts a transfer.
        let ch0 = dma().ch(0);
        ch0.ch_read_addr().write(|w| unsafe { w.bits(fifo) });
        ch0.ch_write_addr().write(|w| unsafe { w.bits(buffer) });
        ch0.ch_trans_count()
            .write(|w| unsafe { w.bits(ANALOG_CHANNELS as u32) });
        ch0.ch_ctrl_trig().write(|w| unsafe {
            w.data_size()
                .size_halfword()
                .incr_read()
                .clear_bit()
                .incr_write()
                .set_bit()
                .treq_sel()
                .bits(DREQ_ADC)
                .chain_to()
                .bits(1)
                .en()
                .clear_bit()
        });

        let ch1 = dma().ch(1);
        ch1.ch_read_addr().write(|w| unsafe { w.bits(reload) });
        ch1.ch_write_addr().write(|w| unsafe { w.bits(trigger) });
        ch1.ch_trans_count().write(|w| unsafe { w.bits(1) });
        ch1.ch_ctrl_trig().write(|w| unsafe {
            w.data_size()
                .size_word()
                .incr_read()
                .clear_bit()
                .incr_write()
                .clear_bit()
                .treq_sel()
                .bits(TREQ_PERMANENT)
                // Chaining to itself means no chaining.
                .chain_to()
                .bits(1)
                .en()
                .clear_bit()
        });
    }

    fn start(&mut self) {
        // Round-robin restarts at AIN0, so results land in channel order.
        self.drain_fifo();

        dma()
            .ch(0)
            .ch_trans_count()
            .write(|w| unsafe { w.bits(ANALOG_CHANNELS as u32) });
        dma().ch(1).ch_trans_count().write(|w| unsafe { w.bits(1) });
        set_channel_enabled(0, true);
        set_channel_enabled(1, true);
        // Channel 1 writes the buffer address into channel 0's trigger
        // alias, which arms channel 0 and closes the loop.
        dma()
            .multi_chan_trigger()
            .write(|w| unsafe { w.multi_chan_trigger().bits(1 << 1) });

        self.adc.cs().modify(|_, w| unsafe {
            w.ainsel()
                .bits(0)
                .rrobin()
                .bits(ROUND_ROBIN)
                .start_many()
                .set_bit()
        });
    }

    fn request_abort(&mut self) {
        // A disabled channel ignores the chain trigger an abort can raise.
        set_channel_enabled(0, false);
        set_channel_enabled(1, false);
        dma().chan_abort().write(|w| unsafe { w.chan_abort().bits(0b11) });
    }

    fn is_idle(&self) -> bool {
        dma().chan_abort().read().chan_abort().bits() & 0b11 == 0
            && dma().ch(0).ch_ctrl_trig().read().busy().bit_is_clear()
            && dma().ch(1).ch_ctrl_trig().read().busy().bit_is_clear()
    }

    fn stop_conversion(&mut self) {
        self.adc.cs().modify(|_, w| w.start_many().clear_bit());
        while self.adc.cs().read().ready().bit_is_clear() {}
        self.drain_fifo();
    }

    fn snapshot(&self) -> [u16; ANALOG_CHANNELS] {
        let mut out = [0; ANALOG_CHANNELS];
        for (value, slot) in out.iter_mut().zip(self.buffer.iter()) {
            *value = unsafe { core::ptr::read_volatile(slot) };
        }
        out
    }
}
