#![no_std]
#![no_main]

extern crate panic_probe;
extern crate rp2040_hal as hal;
extern crate rtic;

mod rp2040;

use defmt_rtt as _;

use cortex_m::singleton;
use hal::dma::DMAExt;
use hal::gpio::*;
use hal::pac;
use hal::usb::UsbBus;
use hal::Clock;
use hobgoblin::*;
use rp2040::capture::DmaCapture;
use rp2040::link::HostLink;
use rp2040::Rp2040Board;
use usb_device::{class_prelude::*, prelude::*};
use usbd_serial::SerialPort;

pub const XTAL_FREQ_HZ: u32 = 12_000_000_u32;

#[cfg(not(feature = "generic-bootloader"))]
#[used]
#[no_mangle]
#[link_section = ".boot2"]
pub static BOOT2: [u8; 256] = rp2040_boot2::BOOT_LOADER_W25Q080;

#[cfg(feature = "generic-bootloader")]
#[used]
#[no_mangle]
#[link_section = ".boot2"]
pub static BOOT2: [u8; 256] = rp2040_boot2::BOOT_LOADER_GENERIC_03H;

#[rtic::app(device = pac, peripherals = true)]
mod app {
    use super::*;
    use rtic::mutex_prelude::*;

    #[shared]
    struct Shared {
        device: Device<Rp2040Board, DmaCapture>,
        link: HostLink,
    }

    #[local]
    struct Local {
        producer: SampleProducer<'static>,
        consumer: SampleConsumer<'static>,
    }

    #[init(local = [queue: SampleQueue = SampleQueue::new()])]
    fn init(ctx: init::Context) -> (Shared, Local) {
        unsafe {
            hal::sio::spinlock_reset();
        }

        let mut resets = ctx.device.RESETS;
        let mut watchdog = hal::Watchdog::new(ctx.device.WATCHDOG);
        let clocks = hal::clocks::init_clocks_and_plls(
            XTAL_FREQ_HZ,
            ctx.device.XOSC,
            ctx.device.CLOCKS,
            ctx.device.PLL_SYS,
            ctx.device.PLL_USB,
            &mut resets,
            &mut watchdog,
        )
        .ok()
        .unwrap();

        let usb_regs = ctx.device.USBCTRL_REGS;
        let usb_dpram = ctx.device.USBCTRL_DPRAM;
        let usb_bus = UsbBus::new(usb_regs, usb_dpram, clocks.usb_clock, true, &mut resets);
        let usb_bus: &'static UsbBusAllocator<UsbBus> =
            singleton!(: UsbBusAllocator<UsbBus> = UsbBusAllocator::new(usb_bus)).unwrap();

        let serial = SerialPort::new(usb_bus);
        let usb_dev = UsbDeviceBuilder::new(usb_bus, UsbVidPid(0x2e8a, 0x000a))
            .strings(&[StringDescriptors::default()
                .manufacturer("Allen Institute")
                .product("Hobgoblin")
                .serial_number("_hobgoblin_")])
            .unwrap()
            .device_class(2)
            .build();

        let sio = hal::Sio::new(ctx.device.SIO);
        let pins = Pins::new(
            ctx.device.IO_BANK0,
            ctx.device.PADS_BANK0,
            sio.gpio_bank0,
            &mut resets,
        );

        let inputs = [
            pins.gpio2.into_pull_down_input().into_dyn_pin(),
            pins.gpio3.into_pull_down_input().into_dyn_pin(),
            pins.gpio12.into_pull_down_input().into_dyn_pin(),
            pins.gpio13.into_pull_down_input().into_dyn_pin(),
            pins.gpio14.into_pull_down_input().into_dyn_pin(),
        ];
        let outputs = [
            pins.gpio15.into_push_pull_output_in_state(PinState::Low).into_dyn_pin(),
            pins.gpio16.into_push_pull_output_in_state(PinState::Low).into_dyn_pin(),
            pins.gpio17.into_push_pull_output_in_state(PinState::Low).into_dyn_pin(),
            pins.gpio18.into_push_pull_output_in_state(PinState::Low).into_dyn_pin(),
            pins.gpio19.into_push_pull_output_in_state(PinState::Low).into_dyn_pin(),
            pins.gpio20.into_push_pull_output_in_state(PinState::Low).into_dyn_pin(),
            pins.gpio21.into_push_pull_output_in_state(PinState::Low).into_dyn_pin(),
            pins.gpio22.into_push_pull_output_in_state(PinState::Low).into_dyn_pin(),
        ];

        let slices = hal::pwm::Slices::new(ctx.device.PWM, &mut resets);
        let mut pwm = slices.pwm0;
        pwm.channel_a.output_to(pins.gpio0);

        let mut timer = hal::Timer::new(ctx.device.TIMER, &mut resets, &clocks);
        let alarm = timer.alarm_0().unwrap();
        let board = Rp2040Board::new(
            timer,
            alarm,
            inputs,
            outputs,
            pwm,
            clocks.system_clock.freq().to_Hz(),
        );

        let dma = ctx.device.DMA.split(&mut resets);
        let buffer = singleton!(: [u16; ANALOG_CHANNELS] = [0; ANALOG_CHANNELS]).unwrap();
        let reload = singleton!(: u32 = 0).unwrap();
        let capture = DmaCapture::new(ctx.device.ADC, dma.ch0, dma.ch1, buffer, reload, &mut resets);

        let device = Device::new(board, capture);
        let link = HostLink::new(usb_dev, serial);
        let (producer, consumer) = ctx.local.queue.split();

        defmt::info!("hobgoblin up");
        (Shared { device, link }, Local { producer, consumer })
    }

    #[idle(shared = [device, link], local = [consumer])]
    fn idle(mut ctx: idle::Context) -> ! {
        let consumer = ctx.local.consumer;
        ctx.shared.device.lock(|device| device.reset(consumer));

        loop {
            ctx.shared.device.lock(|device| device.update(consumer));
            (&mut ctx.shared.device, &mut ctx.shared.link).lock(|device, link| link.flush(device));
        }
    }

    #[task(binds = USBCTRL_IRQ, shared = [device, link])]
    fn usb_irq(mut ctx: usb_irq::Context) {
        (&mut ctx.shared.device, &mut ctx.shared.link).lock(|device, link| link.poll_serial(device));
    }

    #[task(binds = TIMER_IRQ_0, priority = 2, shared = [device], local = [producer])]
    fn alarm_irq(mut ctx: alarm_irq::Context) {
        let producer = ctx.local.producer;
        ctx.shared.device.lock(|device| {
            device.board_mut().ack_alarm();
            device.on_alarm(producer);
        });
    }

    #[task(binds = IO_IRQ_BANK0, priority = 2, shared = [device])]
    fn input_irq(mut ctx: input_irq::Context) {
        ctx.shared.device.lock(|device| {
            device.board_mut().ack_input_edges();
            device.on_input_edge();
        });
    }
}
