use crate::*;
use hobgoblin::harp::{self, Frame, Parsed};
use hobgoblin::{Board, ContinuousCapture, Device};
use usb_device::UsbError;

/// Harp host link over USB CDC serial.
pub struct HostLink {
    serial: SerialPort<'static, UsbBus>,
    usb_dev: UsbDevice<'static, UsbBus>,
    needle: usize,
    scratch: [u8; 64],
    /// Encoded reply and how much of it already went out.
    pending: Option<(Frame, usize)>,
}

impl HostLink {
    pub fn new(usb_dev: UsbDevice<'static, UsbBus>, serial: SerialPort<'static, UsbBus>) -> Self {
        Self {
            serial,
            usb_dev,
            needle: 0,
            scratch: [0; 64],
            pending: None,
        }
    }

    /// Services the USB stack and feeds complete requests to `device`.
    pub fn poll_serial<B: Board, C: ContinuousCapture>(&mut self, device: &mut Device<B, C>) {
        if !self.usb_dev.poll(&mut [&mut self.serial]) {
            return;
        }
        match self.serial.read(&mut self.scratch[self.needle..]) {
            Ok(n) if n > 0 => self.needle += n,
            _ => return,
        }

        loop {
            match harp::parse(&self.scratch[..self.needle]) {
                Parsed::Incomplete => break,
                Parsed::Skip(n, err) => {
                    defmt::warn!("malformed frame: {}", err);
                    self.drain_rx(n);
                }
                Parsed::Frame(request, n) => {
                    self.drain_rx(n);
                    defmt::trace!("request {} to {=u8}", request.kind, request.address);
                    device.handle_request(&request);
                }
            }
        }
        self.flush(device);
    }

    /// Writes queued replies until the endpoint stops taking bytes.
    pub fn flush<B: Board, C: ContinuousCapture>(&mut self, device: &mut Device<B, C>) {
        if self.usb_dev.state() != UsbDeviceState::Configured {
            // Nobody listening.
            self.pending = None;
            while device.pop_reply().is_some() {}
            return;
        }

        loop {
            if self.pending.is_none() {
                self.pending = device.pop_reply().map(|reply| (reply.encode(), 0));
            }
            let Some((frame, sent)) = self.pending.as_mut() else {
                return;
            };
            match self.serial.write(&frame[*sent..]) {
                Ok(0) | Err(UsbError::WouldBlock) => return,
                Ok(n) => {
                    *sent += n;
                    if *sent == frame.len() {
                        self.pending = None;
                    }
                }
                Err(_) => {
                    self.pending = None;
                    return;
                }
            }
        }
    }

    fn drain_rx(&mut self, n: usize) {
        self.needle -= n;
        self.scratch.copy_within(n.., 0);
    }
}
