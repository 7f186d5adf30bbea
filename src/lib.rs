//! Hardware protocol layer of a coincidence-counting instrument: SN74LV8154 counter
//! register access, a polled self-test signal generator, and serially programmed delay
//! lines on a shared clock/data bus.
//!
//! Everything is generic over `embedded-hal` pins and delays, and over an `embedded-time`
//! clock for the self-test generator. Devices are explicit handles built from static
//! wiring; there is no global state.

#![cfg_attr(not(test), no_std)]

pub mod command;
pub mod counter;
pub mod delay;
pub mod delay_line;
pub mod error;
mod gate;
mod overflow;
pub mod serial;

#[cfg(test)]
mod mock;

pub use counter::{CounterConfig, CounterDevice, Half, Mode};
pub use delay_line::DelayLine;
pub use error::{ConfigurationError, Error, PinRole, UsageError};
pub use self_test::{Channel, ChannelConfig, SelfTestConfig, SelfTestSignalGenerator};
pub use serial::SerialInterface;
