use core::fmt;

/// Role of a pin in the counter wiring, used to name what is missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinRole {
    /// Register A lower byte gate (GAL).
    GateALower,
    /// Register A upper byte gate (GAU).
    GateAUpper,
    /// Register B lower byte gate (GBL).
    GateBLower,
    /// Register B upper byte gate (GBU).
    GateBUpper,
    /// Register clock (RCLK).
    RegisterClock,
    /// Asynchronous clear (CCLR).
    Clear,
}

/// Wiring problems detected once, by `CounterDevice::initialize`.
///
/// These are not recoverable: a device built from this configuration would drive
/// meaningless electrical states. The caller decides whether to halt or report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigurationError<E> {
    MissingPin(PinRole),
    NoDataBus,
    TooManyDataBuses,
    IncompleteDataBus { chip: usize, pins: usize },
    /// Single 32-bit mode with both the counter B enable and the overflow pin wired.
    EnableWiredWithOverflow,
    InvalidTestFrequency { frequency_hz: u32 },
    ClockNotRunning,
    Pin(E),
}

/// Recoverable misuse of a correctly configured device. Hardware state is untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageError {
    NotSingle32,
    NoCounterBEnable,
    NoOverflowPin,
    CounterBDisabled,
    SelfTestNotStarted,
    NoSuchChip(usize),
    NoSuchDelayLine { bus: usize, channel: usize },
    SerialBusBusy,
}

#[derive(Debug)]
pub enum Error<E> {
    Usage(UsageError),
    Pin(E),
    Clock(embedded_time::clock::Error),
}

impl<E> From<UsageError> for Error<E> {
    fn from(e: UsageError) -> Self {
        Error::Usage(e)
    }
}

impl<E> Error<E> {
    pub fn usage(&self) -> Option<UsageError> {
        match self {
            Error::Usage(e) => Some(*e),
            _ => None,
        }
    }
}

impl fmt::Display for UsageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UsageError::NotSingle32 => f.write_str("counter is not in single 32-bit mode"),
            UsageError::NoCounterBEnable => f.write_str("no counter B enable pin"),
            UsageError::NoOverflowPin => f.write_str("no overflow pin"),
            UsageError::CounterBDisabled => f.write_str("counter B is disabled"),
            UsageError::SelfTestNotStarted => f.write_str("self-test generator has not ticked"),
            UsageError::NoSuchChip(chip) => write!(f, "no counter chip {}", chip),
            UsageError::NoSuchDelayLine { bus, channel } => {
                write!(f, "no delay line {} on bus {}", channel, bus)
            }
            UsageError::SerialBusBusy => f.write_str("serial bus already claimed"),
        }
    }
}

impl<E> fmt::Display for Error<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Usage(e) => e.fmt(f),
            Error::Pin(_) => f.write_str("pin error"),
            Error::Clock(_) => f.write_str("clock error"),
        }
    }
}
