use embedded_hal::blocking::delay::DelayUs;
use embedded_hal::digital::v2::OutputPin;

use crate::counter::Half;
use crate::delay::HOLD_TIME_US;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Byte {
    Upper,
    Lower,
}

/// The four active-low output-enable gates of an SN74LV8154 (GAL, GAU, GBL, GBU).
///
/// Every gate drives the same Y bus, so at most one may be low. Opening a gate borrows the
/// whole set mutably, which makes a second simultaneous open impossible to express.
pub(crate) struct GateSet<Pin>
    where Pin: OutputPin,
{
    a_lower: Pin,
    a_upper: Pin,
    b_lower: Pin,
    b_upper: Pin,
}

impl<Pin> GateSet<Pin>
    where Pin: OutputPin,
{
    /// Take ownership of the gate pins and drive them all high (bus released).
    pub(crate) fn new(a_lower: Pin, a_upper: Pin, b_lower: Pin, b_upper: Pin) -> Result<Self, Pin::Error> {
        let mut gates = Self {
            a_lower,
            a_upper,
            b_lower,
            b_upper,
        };
        gates.a_lower.set_high()?;
        gates.a_upper.set_high()?;
        gates.b_lower.set_high()?;
        gates.b_upper.set_high()?;
        Ok(gates)
    }

    pub(crate) fn open<'g, D>(&'g mut self, half: Half, byte: Byte, delay: &mut D) -> Result<OpenGate<'g, Pin>, Pin::Error>
        where D: DelayUs<u32>,
    {
        let pin = match (half, byte) {
            (Half::A, Byte::Lower) => &mut self.a_lower,
            (Half::A, Byte::Upper) => &mut self.a_upper,
            (Half::B, Byte::Lower) => &mut self.b_lower,
            (Half::B, Byte::Upper) => &mut self.b_upper,
        };
        OpenGate::new(pin, delay)
    }
}

/// A gate held low. Dropping it, on any path, puts the gate back high.
pub(crate) struct OpenGate<'g, Pin>
    where Pin: OutputPin,
{
    pin: &'g mut Pin,
}

impl<'g, Pin> OpenGate<'g, Pin>
    where Pin: OutputPin,
{
    fn new<D>(pin: &'g mut Pin, delay: &mut D) -> Result<Self, Pin::Error>
        where D: DelayUs<u32>,
    {
        pin.set_low()?;
        let gate = Self {
            pin
        };
        // bus settle
        delay.delay_us(HOLD_TIME_US);
        Ok(gate)
    }

    /// Release the gate, reporting a failure to drive it high.
    pub(crate) fn close(self) -> Result<(), Pin::Error> {
        let mut gate = core::mem::ManuallyDrop::new(self);
        gate.pin.set_high()
    }
}

impl<Pin> Drop for OpenGate<'_, Pin>
    where Pin: OutputPin,
{
    fn drop(&mut self) {
        log::trace!("gate released on error path");
        self.pin.set_high().unwrap_or(());
    }
}
