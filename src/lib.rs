//! AT89Sxx serial ISP loader.
//!
//! Host side of an in-system-programming setup where an Arduino-class
//! bridge bit-bangs the target's programming pins. This crate parses an
//! Intel HEX image, checks it fits the target ROM, and streams it over the
//! serial link one byte at a time using the bridge's single-byte command
//! protocol. The bridge never acknowledges writes; fixed delays are the
//! only timing mechanism.

use core::fmt::Debug;
use core::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[macro_use]
extern crate log;

#[macro_use(block)]
extern crate nb;

extern crate embedded_hal;
use embedded_hal::blocking::delay::DelayMs;
use embedded_hal::serial::Write;

pub mod device;
pub mod fit;
pub mod image;
pub mod protocol;

#[cfg(feature = "linux")]
pub mod linux;

use crate::image::MemoryImage;
use crate::protocol::*;

/// Session failures. `E` is the transport's error type.
#[derive(Clone, PartialEq, Debug, thiserror::Error)]
pub enum Error<E> {
    /// Transport failure outside the write loop
    #[error("serial transport error: {0:?}")]
    Serial(E),

    /// Transport failure while streaming the image. The session stops
    /// immediately; bytes already written stay written.
    #[error("programming aborted at address {address:#06x}: {cause:?}")]
    Aborted { address: u16, cause: E },

    /// Cancellation observed between written bytes. The target was
    /// released before this was returned.
    #[error("programming cancelled at address {address:#06x}")]
    Cancelled { address: u16 },
}

impl<E> From<E> for Error<E> {
    fn from(e: E) -> Self {
        Self::Serial(e)
    }
}

/// Shared cancellation flag, polled between written bytes (never
/// mid-byte). Cloning hands out another handle to the same flag.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Protocol timing configuration.
///
/// Defaults match the bridge firmware's calibration; the progress callback
/// runs inside these windows and must not block.
#[derive(Clone, PartialEq, Debug)]
#[cfg_attr(feature = "structopt", derive(structopt::StructOpt))]
pub struct Options {
    /// Delay after each command/value pair in the write loop (ms)
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "10"))]
    pub write_delay_ms: u32,

    /// Chip erase cycle time (ms)
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "500"))]
    pub erase_delay_ms: u32,

    /// Settle time around reset and program-enable transitions (ms)
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "2"))]
    pub enable_delay_ms: u32,

    /// Settle time after releasing reset at the end of a session (ms)
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "100"))]
    pub release_delay_ms: u32,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            write_delay_ms: WRITE_DELAY_MS,
            erase_delay_ms: ERASE_DELAY_MS,
            enable_delay_ms: ENABLE_DELAY_MS,
            release_delay_ms: RELEASE_DELAY_MS,
        }
    }
}

/// ISP session driver.
///
/// Owns the serial handle exclusively for the session's duration. The
/// protocol is strictly linear and write-only: no response is read back,
/// no step is retried.
pub struct Programmer<P, D, E> {
    options: Options,
    port: P,
    delay: D,
    cancel: CancelToken,
    _err: PhantomData<E>,
}

impl<P, D, E> Programmer<P, D, E>
where
    P: Write<u8, Error = E>,
    D: DelayMs<u32>,
    E: Debug,
{
    /// Create a new programmer instance
    pub fn new(port: P, delay: D, options: Options) -> Self {
        Self {
            options,
            port,
            delay,
            cancel: CancelToken::new(),
            _err: PhantomData,
        }
    }

    /// Handle for cooperative cancellation of a running session
    pub fn cancel_handle(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Run the full programming session: identify, erase, enter program
    /// mode, stream the image, release the target.
    ///
    /// `on_update` is invoked once per written byte with the fraction of
    /// the image completed so far (first call 1/N, last call 1.0). The
    /// image must already have been checked against the target ROM; no
    /// size validation happens here.
    pub fn program<F>(&mut self, image: &MemoryImage, mut on_update: F) -> Result<(), Error<E>>
    where
        F: FnMut(f32),
    {
        self.identify()?;
        self.erase()?;
        self.enter_program_mode()?;
        self.write_image(image, &mut on_update)?;
        self.release()
    }

    /// Pulse the signature readout. The bridge replies with two ID bytes
    /// that this client does not consume; the pulse doubles as a wake-up.
    pub fn identify(&mut self) -> Result<(), Error<E>> {
        debug!("Pulsing device signature readout");

        self.send(RESET_HIGH)?;
        self.send(PROG_ENABLE)?;
        self.send(READ_ID_MSB)?;
        self.send(READ_ID_LSB)?;
        self.send(RESET_LOW)?;
        self.delay.delay_ms(self.options.enable_delay_ms);

        Ok(())
    }

    /// Erase the target flash and wait out the erase cycle
    pub fn erase(&mut self) -> Result<(), Error<E>> {
        debug!("Erasing target flash");

        self.send(RESET_HIGH)?;
        self.send(PROG_ENABLE)?;
        self.send(ERASE_CHIP)?;
        self.send(RESET_LOW)?;
        self.delay.delay_ms(self.options.erase_delay_ms);

        Ok(())
    }

    /// Hold the target in reset with programming enabled
    pub fn enter_program_mode(&mut self) -> Result<(), Error<E>> {
        debug!("Entering program mode");

        self.send(RESET_HIGH)?;
        self.delay.delay_ms(self.options.enable_delay_ms);
        self.send(PROG_ENABLE)?;
        self.delay.delay_ms(self.options.enable_delay_ms);

        Ok(())
    }

    /// Stream the image in ascending address order.
    ///
    /// The address sent to the bridge is the real parsed address of each
    /// byte, so sparse images land where the HEX file put them.
    pub fn write_image<F>(&mut self, image: &MemoryImage, on_update: &mut F) -> Result<(), Error<E>>
    where
        F: FnMut(f32),
    {
        let total = image.byte_count();
        let mut written = 0usize;

        info!("Writing {} bytes", total);

        for (address, data) in image.iter() {
            if self.cancel.is_cancelled() {
                info!("Cancellation requested, releasing target");
                self.release()?;
                return Err(Error::Cancelled { address });
            }

            self.write_byte(address, data)?;

            written += 1;
            on_update(written as f32 / total as f32);
        }

        Ok(())
    }

    /// Let the last write settle, then release reset so the target runs
    pub fn release(&mut self) -> Result<(), Error<E>> {
        debug!("Releasing target");

        self.delay.delay_ms(self.options.write_delay_ms);
        self.send(RESET_LOW)?;
        self.delay.delay_ms(self.options.release_delay_ms);

        Ok(())
    }

    /// Program one byte: address low/high, data, then the write strobe.
    /// The bridge runs its own write-and-settle cycle after the strobe, so
    /// no trailing delay is needed.
    fn write_byte(&mut self, address: u16, data: u8) -> Result<(), Error<E>> {
        trace!("Write {:#06x} <- {:#04x}", address, data);

        self.send_pair(ADDR_LSB, address as u8, address)?;
        self.send_pair(ADDR_MSB, (address >> 8) as u8, address)?;
        self.send_pair(CONTENT, data, address)?;
        self.send_raw(WRITE_PROG)
            .map_err(|cause| Error::Aborted { address, cause })
    }

    /// Send a command byte and its value byte, then wait the write delay
    fn send_pair(&mut self, command: u8, value: u8, address: u16) -> Result<(), Error<E>> {
        self.send_raw(command)
            .and_then(|_| self.send_raw(value))
            .map_err(|cause| Error::Aborted { address, cause })?;
        self.delay.delay_ms(self.options.write_delay_ms);

        Ok(())
    }

    fn send(&mut self, byte: u8) -> Result<(), Error<E>> {
        Ok(self.send_raw(byte)?)
    }

    fn send_raw(&mut self, byte: u8) -> Result<(), E> {
        block!(self.port.write(byte))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Records every byte; optionally fails once `limit` writes went out
    #[derive(Default)]
    struct MockPort {
        written: Vec<u8>,
        fail_after: Option<usize>,
    }

    impl Write<u8> for MockPort {
        type Error = &'static str;

        fn write(&mut self, word: u8) -> nb::Result<(), Self::Error> {
            if let Some(limit) = self.fail_after {
                if self.written.len() >= limit {
                    return Err(nb::Error::Other("injected fault"));
                }
            }
            self.written.push(word);
            Ok(())
        }

        fn flush(&mut self) -> nb::Result<(), Self::Error> {
            Ok(())
        }
    }

    struct NoDelay;

    impl DelayMs<u32> for NoDelay {
        fn delay_ms(&mut self, _ms: u32) {}
    }

    fn image(pairs: &[(u16, u8)]) -> MemoryImage {
        pairs.iter().copied().collect()
    }

    fn programmer(port: MockPort) -> Programmer<MockPort, NoDelay, &'static str> {
        Programmer::new(port, NoDelay, Options::default())
    }

    /// Everything up to and including program-mode entry
    const PREAMBLE: [u8; 11] = [
        RESET_HIGH, PROG_ENABLE, READ_ID_MSB, READ_ID_LSB, RESET_LOW, // identify
        RESET_HIGH, PROG_ENABLE, ERASE_CHIP, RESET_LOW, // erase
        RESET_HIGH, PROG_ENABLE, // enter program mode
    ];

    fn expected_stream(pairs: &[(u16, u8)]) -> Vec<u8> {
        let mut bytes = PREAMBLE.to_vec();
        for &(address, data) in pairs {
            bytes.extend_from_slice(&[
                ADDR_LSB,
                address as u8,
                ADDR_MSB,
                (address >> 8) as u8,
                CONTENT,
                data,
                WRITE_PROG,
            ]);
        }
        bytes.push(RESET_LOW);
        bytes
    }

    #[test]
    fn emits_the_exact_wire_sequence() {
        let pairs = [(0x0000, 0xAA), (0x0001, 0xBB), (0x00FF, 0xCC)];
        let mut p = programmer(MockPort::default());

        p.program(&image(&pairs), |_| {}).unwrap();

        assert_eq!(p.port.written, expected_stream(&pairs));
    }

    #[test]
    fn streams_in_ascending_address_order() {
        // Construction order is descending; the wire order must not be
        let pairs = [(0x00FF, 0xCC), (0x0001, 0xBB), (0x0000, 0xAA)];
        let mut p = programmer(MockPort::default());

        p.program(&image(&pairs), |_| {}).unwrap();

        let sorted = [(0x0000, 0xAA), (0x0001, 0xBB), (0x00FF, 0xCC)];
        assert_eq!(p.port.written, expected_stream(&sorted));
    }

    #[test]
    fn reports_progress_once_per_byte() {
        let pairs = [(0x0000, 0xAA), (0x0001, 0xBB), (0x00FF, 0xCC)];
        let mut p = programmer(MockPort::default());
        let mut fractions = Vec::new();

        p.program(&image(&pairs), |f| fractions.push(f)).unwrap();

        assert_eq!(fractions, vec![1.0 / 3.0, 2.0 / 3.0, 1.0]);
    }

    #[test]
    fn write_failure_aborts_immediately() {
        // Preamble is 11 writes; fail inside the second byte's frame
        let mut port = MockPort::default();
        port.fail_after = Some(PREAMBLE.len() + 7 + 2);
        let mut p = programmer(port);
        let mut calls = 0;

        let err = p
            .program(&image(&[(0x0000, 0xAA), (0x0001, 0xBB)]), |_| calls += 1)
            .unwrap_err();

        assert_eq!(
            err,
            Error::Aborted {
                address: 0x0001,
                cause: "injected fault",
            }
        );
        // Nothing goes out after the fault: no release sequence either
        assert_eq!(p.port.written.len(), PREAMBLE.len() + 7 + 2);
        assert_eq!(calls, 1);
    }

    #[test]
    fn setup_failure_is_a_serial_error() {
        let mut port = MockPort::default();
        port.fail_after = Some(2);
        let mut p = programmer(port);

        let err = p.identify().unwrap_err();
        assert_eq!(err, Error::Serial("injected fault"));
    }

    #[test]
    fn cancellation_still_releases_the_target() {
        let mut p = programmer(MockPort::default());
        p.cancel_handle().cancel();
        let mut calls = 0;

        let err = p
            .program(&image(&[(0x0000, 0xAA), (0x0001, 0xBB)]), |_| calls += 1)
            .unwrap_err();

        assert_eq!(err, Error::Cancelled { address: 0x0000 });
        assert_eq!(calls, 0);

        // Preamble went out, then only the release byte
        let mut expected = PREAMBLE.to_vec();
        expected.push(RESET_LOW);
        assert_eq!(p.port.written, expected);
    }

    #[test]
    fn oversized_image_never_touches_the_port() {
        let big: MemoryImage = (0..=4096u16).map(|a| (a, 0xFF)).collect();
        let profile = device::lookup("AT89S51").unwrap();
        let verdict = fit::evaluate(big.byte_count(), profile);

        // The caller contract: no session is constructed on overflow
        assert!(!verdict.fits());

        let port = MockPort::default();
        assert!(port.written.is_empty());
    }

    #[test]
    fn empty_image_still_runs_the_full_handshake() {
        let mut p = programmer(MockPort::default());
        let mut calls = 0;

        p.program(&MemoryImage::default(), |_| calls += 1).unwrap();

        assert_eq!(calls, 0);
        assert_eq!(p.port.written, expected_stream(&[]));
    }
}
