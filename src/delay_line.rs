use core::cell::RefCell;

use embedded_hal::blocking::delay::DelayUs;
use embedded_hal::digital::v2::OutputPin;

use crate::error::{Error, UsageError};
use crate::serial::SerialInterface;

/// One programmable delay chip on a shared [`SerialInterface`].
///
/// The chip cannot be read back, so the cached value is the only record of what it holds.
pub struct DelayLine<'bus, Pin, D>
    where Pin: OutputPin,
          D: DelayUs<u32>,
{
    bus: &'bus RefCell<SerialInterface<Pin, D>>,
    latch: Pin,
    current: u8,
}

impl<'bus, Pin, D, E> DelayLine<'bus, Pin, D>
    where Pin: OutputPin<Error = E>,
          D: DelayUs<u32>,
{
    pub fn new(bus: &'bus RefCell<SerialInterface<Pin, D>>, latch: Pin) -> Self {
        Self {
            bus,
            latch,
            current: 0,
        }
    }

    /// Close this device's latch so it ignores traffic meant for its neighbours.
    pub fn initialize(&mut self) -> Result<(), E> {
        self.latch.set_low()
    }

    /// Stream `value` into the chip. The cached value only changes once the whole byte has
    /// been clocked in and the latch closed.
    pub fn write(&mut self, value: u8) -> Result<(), Error<E>> {
        let mut bus = self.bus.try_borrow_mut().map_err(|_| {
            log::warn!("delay line write refused: serial bus busy");
            Error::from(UsageError::SerialBusBusy)
        })?;
        let mut latched = bus.claim(&mut self.latch).map_err(Error::Pin)?;
        latched.stream(value).map_err(Error::Pin)?;
        latched.release().map_err(Error::Pin)?;
        self.current = value;
        log::debug!("delay line set to {}", value);
        Ok(())
    }

    /// Add `delta` with 8-bit wraparound and write the result.
    pub fn increment(&mut self, delta: u8) -> Result<u8, Error<E>> {
        let value = self.current.wrapping_add(delta);
        self.write(value)?;
        Ok(value)
    }

    /// Subtract `delta` with 8-bit wraparound and write the result.
    pub fn decrement(&mut self, delta: u8) -> Result<u8, Error<E>> {
        let value = self.current.wrapping_sub(delta);
        self.write(value)?;
        Ok(value)
    }

    pub fn read(&self) -> u8 {
        self.current
    }
}
