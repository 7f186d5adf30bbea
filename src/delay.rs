use embedded_hal::blocking::delay::DelayUs;
use embedded_hal::timer::CountDown;

use nb::block;
use embedded_time::duration::{Duration, Microseconds};

/// Minimum hold time for gate, register-clock and clear pulses.
pub const HOLD_TIME_US: u32 = 2;

/// Half of a serial clock cycle on the delay-line bus.
pub const SERIAL_HALF_CLOCK_US: u32 = 1;

/// Busy-wait microsecond delay built from any count-down timer.
///
/// Board crates hand one of these to [`CounterDevice::initialize`](crate::CounterDevice::initialize)
/// and [`SerialInterface::new`](crate::SerialInterface::new) when their HAL offers a
/// `CountDown` but no `DelayUs`.
pub struct DelayTimer<CD>
    where
        CD: CountDown,
        CD::Time: Duration + From<Microseconds>,
{
    count_down: CD,
}

impl<CD> DelayTimer<CD>
    where
        CD: CountDown,
        CD::Time: Duration + From<Microseconds>,
{
    pub fn new(count_down: CD) -> Self {
        Self {
            count_down,
        }
    }

    pub fn free(self) -> CD {
        self.count_down
    }
}

impl<CD> DelayUs<u32> for DelayTimer<CD>
    where
        CD: CountDown,
        CD::Time: Duration + From<Microseconds>,
{
    fn delay_us(&mut self, us: u32) {
        if us == 0 {
            return;
        }
        let duration = Microseconds(us);
        self.count_down.start(duration);
        // CountDown::wait is infallible (Void), so the block only spins on WouldBlock.
        let _ = block!(self.count_down.wait());
    }
}
