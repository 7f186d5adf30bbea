use embedded_hal::blocking::delay::DelayUs;
use embedded_hal::digital::v2::OutputPin;

use crate::delay::SERIAL_HALF_CLOCK_US;

/// Two-wire clock + data bus shared by every delay line.
///
/// Devices on the bus ignore traffic unless their own latch pin is high, so the only way to
/// put bits on the wire is through [`SerialInterface::claim`], which opens one latch for the
/// lifetime of the returned guard.
pub struct SerialInterface<Pin, D>
    where Pin: OutputPin,
          D: DelayUs<u32>,
{
    clock: Pin,
    data: Pin,
    delay: D,
}

impl<Pin, D> SerialInterface<Pin, D>
    where Pin: OutputPin,
          D: DelayUs<u32>,
{
    pub fn new(clock: Pin, data: Pin, delay: D) -> Self {
        Self {
            clock,
            data,
            delay,
        }
    }

    pub fn free(self) -> (Pin, Pin, D) {
        (self.clock, self.data, self.delay)
    }

    /// Drive clock and data to their idle (low) levels.
    pub fn initialize(&mut self) -> Result<(), Pin::Error> {
        self.clock.set_low()?;
        self.data.set_low()
    }

    /// Open `latch` and hand out the bus until the guard is released or dropped.
    pub fn claim<'a>(&'a mut self, latch: &'a mut Pin) -> Result<Latched<'a, Pin, D>, Pin::Error> {
        latch.set_high()?;
        log::trace!("serial bus claimed");
        Ok(Latched {
            bus: self,
            latch,
        })
    }

    fn clock_bit(&mut self, bit: bool) -> Result<(), Pin::Error> {
        if bit {
            self.data.set_high()?;
        } else {
            self.data.set_low()?;
        }
        // the shift register samples on the rising edge
        self.clock.set_high()?;
        self.delay.delay_us(SERIAL_HALF_CLOCK_US);
        self.clock.set_low()?;
        self.delay.delay_us(SERIAL_HALF_CLOCK_US);
        Ok(())
    }
}

/// The bus with one device latch open.
pub struct Latched<'a, Pin, D>
    where Pin: OutputPin,
          D: DelayUs<u32>,
{
    bus: &'a mut SerialInterface<Pin, D>,
    latch: &'a mut Pin,
}

impl<'a, Pin, D> Latched<'a, Pin, D>
    where Pin: OutputPin,
          D: DelayUs<u32>,
{
    /// Shift one byte out MSB first. The order must match the receiving shift register;
    /// reversing it silently programs a bit-reversed value.
    pub fn stream(&mut self, byte: u8) -> Result<(), Pin::Error> {
        for bit in (0..8).rev() {
            self.bus.clock_bit((byte >> bit) & 0x01 == 0x01)?;
        }
        Ok(())
    }

    /// Lower the latch, committing the streamed value, and return data to idle.
    pub fn release(self) -> Result<(), Pin::Error> {
        let mut latched = core::mem::ManuallyDrop::new(self);
        latched.close()
    }

    fn close(&mut self) -> Result<(), Pin::Error> {
        self.latch.set_low()?;
        self.bus.data.set_low()?;
        log::trace!("serial bus released");
        Ok(())
    }
}

impl<Pin, D> Drop for Latched<'_, Pin, D>
    where Pin: OutputPin,
          D: DelayUs<u32>,
{
    fn drop(&mut self) {
        self.close().unwrap_or(());
    }
}
