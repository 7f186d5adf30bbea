use embedded_hal::digital::v2::InputPin;

/// Counter A ripple-carry output (RCOA), read straight from the pin.
pub(crate) struct Overflow<Pin>
    where Pin: InputPin
{
    pin: Pin
}

impl<Pin> Overflow<Pin>
    where Pin: InputPin
{
    pub(crate) fn new(pin: Pin) -> Self {
        Self {
            pin
        }
    }

    /// Current level; not latched, so a short carry pulse can be missed between samples.
    pub(crate) fn is_set(&self) -> Result<bool, Pin::Error> {
        self.pin.is_high()
    }
}
