//! Register access for SN74LV8154 dual 16-bit ripple counters.
//!
//! The chip has two 16-bit counters (A and B) whose values are copied into a storage
//! register on a rising edge of RCLK. The storage register is read one byte at a time
//! through a shared tri-state Y bus, selected by four active-low gates. Up to
//! [`MAX_CHIPS`] chips may share the gate, RCLK and CCLR lines, each with its own data bus;
//! every gate window samples all of them.
//!
//! In [`Mode::Single32`] counter A's ripple carry drives counter B's clock and the pair is
//! read as one 32-bit value. In [`Mode::Dual16`] the counters are independent.

use embedded_hal::blocking::delay::DelayUs;
use embedded_hal::digital::v2::{InputPin, OutputPin};
use embedded_time::Clock;
use heapless::{consts::*, Vec};

use crate::delay::HOLD_TIME_US;
use crate::error::{ConfigurationError, Error, PinRole, UsageError};
use crate::gate::{Byte, GateSet};
use crate::overflow::Overflow;
use crate::self_test::{SelfTestConfig, SelfTestSignalGenerator};

/// Width of each data bus.
pub const BUS_WIDTH: usize = 8;
/// Maximum number of chips sharing one set of gate/control lines.
pub const MAX_CHIPS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Single32,
    Dual16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Half {
    A,
    B,
}

/// Static wiring of one counter device. Every pin is optional here so that a missing one
/// can be reported by [`CounterDevice::initialize`] instead of failing to compile on one
/// board revision and not another.
pub struct CounterConfig<Out, In> {
    pub mode: Mode,
    pub gate_a_lower: Option<Out>,
    pub gate_a_upper: Option<Out>,
    pub gate_b_lower: Option<Out>,
    pub gate_b_upper: Option<Out>,
    pub register_clock: Option<Out>,
    pub clear: Option<Out>,
    pub overflow: Option<In>,
    pub counter_b_enable: Option<Out>,
    /// One bus per chip, pins ordered Y0 (LSB) to Y7 (MSB).
    pub data_buses: Vec<Vec<In, U8>, U4>,
    pub self_test: SelfTestConfig<Out>,
    rejected_buses: usize,
}

impl<Out, In> CounterConfig<Out, In> {
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            gate_a_lower: None,
            gate_a_upper: None,
            gate_b_lower: None,
            gate_b_upper: None,
            register_clock: None,
            clear: None,
            overflow: None,
            counter_b_enable: None,
            data_buses: Vec::new(),
            self_test: SelfTestConfig::default(),
            rejected_buses: 0,
        }
    }

    /// Add the data bus of the next chip, LSB first.
    pub fn with_data_bus(mut self, pins: [In; BUS_WIDTH]) -> Self {
        let mut bus = Vec::new();
        for pin in IntoIterator::into_iter(pins) {
            bus.push(pin).unwrap_or(());
        }
        if self.data_buses.push(bus).is_err() {
            self.rejected_buses += 1;
        }
        self
    }
}

struct DataBus<Pin>
    where Pin: InputPin,
{
    pins: Vec<Pin, U8>,
}

impl<Pin> DataBus<Pin>
    where Pin: InputPin,
{
    /// Bit `i` of the result is the level of `pins[i]`.
    fn sample(&self) -> Result<u8, Pin::Error> {
        let mut value = 0u8;
        for (i, pin) in self.pins.iter().enumerate() {
            if pin.is_high()? {
                value |= 1 << i;
            }
        }
        Ok(value)
    }
}

/// Active-low count enable of counter B (CCKEN). The pin level is tracked locally.
struct CounterBEnable<Pin>
    where Pin: OutputPin,
{
    pin: Pin,
    high: bool,
}

pub struct CounterDevice<'clock, Out, In, D, C>
    where Out: OutputPin,
          In: InputPin,
          D: DelayUs<u32>,
          C: Clock + 'clock,
{
    mode: Mode,
    gates: GateSet<Out>,
    register_clock: Out,
    clear: Out,
    overflow: Option<Overflow<In>>,
    counter_b_enable: Option<CounterBEnable<Out>>,
    buses: Vec<DataBus<In>, U4>,
    delay: D,
    self_test: Option<SelfTestSignalGenerator<'clock, Out, C>>,
}

impl<'clock, Out, In, D, C, E> CounterDevice<'clock, Out, In, D, C>
    where Out: OutputPin<Error = E>,
          In: InputPin<Error = E>,
          D: DelayUs<u32>,
          C: Clock + 'clock,
          E: core::fmt::Debug,
{
    /// Validate the wiring, drive every output to its idle level and arm the self-test
    /// channels. A configuration error is fatal: the pins are dropped and nothing else can
    /// be done with them.
    pub fn initialize(config: CounterConfig<Out, In>, delay: D, clock: &'clock C) -> Result<Self, ConfigurationError<E>> {
        let mode = config.mode;
        match Self::build(config, delay, clock) {
            Ok(device) => {
                log::info!("counter ready: {:?}, {} chip(s)", mode, device.chips());
                Ok(device)
            }
            Err(e) => {
                log::error!("counter configuration rejected: {:?}", e);
                Err(e)
            }
        }
    }

    fn build(config: CounterConfig<Out, In>, delay: D, clock: &'clock C) -> Result<Self, ConfigurationError<E>> {
        let CounterConfig {
            mode,
            gate_a_lower,
            gate_a_upper,
            gate_b_lower,
            gate_b_upper,
            register_clock,
            clear,
            overflow,
            counter_b_enable,
            data_buses,
            self_test,
            rejected_buses,
        } = config;

        let gate_a_lower = gate_a_lower.ok_or(ConfigurationError::MissingPin(PinRole::GateALower))?;
        let gate_a_upper = gate_a_upper.ok_or(ConfigurationError::MissingPin(PinRole::GateAUpper))?;
        let gate_b_lower = gate_b_lower.ok_or(ConfigurationError::MissingPin(PinRole::GateBLower))?;
        let gate_b_upper = gate_b_upper.ok_or(ConfigurationError::MissingPin(PinRole::GateBUpper))?;
        let mut register_clock = register_clock.ok_or(ConfigurationError::MissingPin(PinRole::RegisterClock))?;
        let mut clear = clear.ok_or(ConfigurationError::MissingPin(PinRole::Clear))?;

        if rejected_buses > 0 {
            return Err(ConfigurationError::TooManyDataBuses);
        }
        if data_buses.is_empty() {
            return Err(ConfigurationError::NoDataBus);
        }
        if let Some((chip, bus)) = data_buses.iter().enumerate().find(|(_, bus)| bus.len() != BUS_WIDTH) {
            return Err(ConfigurationError::IncompleteDataBus { chip, pins: bus.len() });
        }
        // CCKEN chained to RCOA is the hardware 32-bit wiring and cannot also be driven.
        if mode == Mode::Single32 && counter_b_enable.is_some() && overflow.is_some() {
            return Err(ConfigurationError::EnableWiredWithOverflow);
        }

        let gates = GateSet::new(gate_a_lower, gate_a_upper, gate_b_lower, gate_b_upper)
            .map_err(ConfigurationError::Pin)?;
        register_clock.set_low().map_err(ConfigurationError::Pin)?;
        clear.set_high().map_err(ConfigurationError::Pin)?;
        let counter_b_enable = match counter_b_enable {
            Some(mut pin) => {
                pin.set_low().map_err(ConfigurationError::Pin)?;
                Some(CounterBEnable { pin, high: false })
            }
            None => None,
        };

        let self_test = if self_test.is_empty() {
            None
        } else {
            Some(SelfTestSignalGenerator::initialize(self_test, clock)?)
        };

        let mut buses = Vec::new();
        for pins in data_buses {
            buses.push(DataBus { pins }).unwrap_or(());
        }

        Ok(Self {
            mode,
            gates,
            register_clock,
            clear,
            overflow: overflow.map(Overflow::new),
            counter_b_enable,
            buses,
            delay,
            self_test,
        })
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Number of chips read in parallel.
    pub fn chips(&self) -> usize {
        self.buses.len()
    }

    pub fn self_test(&self) -> Option<&SelfTestSignalGenerator<'clock, Out, C>> {
        self.self_test.as_ref()
    }

    /// Advance the self-test generator; call once per control-loop iteration.
    pub fn tick(&mut self) -> Result<(), Error<E>> {
        match self.self_test.as_mut() {
            Some(generator) => generator.tick(),
            None => Ok(()),
        }
    }

    /// Pulse RCLK, copying the live counts of every chip into its storage register.
    pub fn latch(&mut self) -> Result<(), Error<E>> {
        self.register_clock.set_high().map_err(Error::Pin)?;
        self.delay.delay_us(HOLD_TIME_US);
        self.register_clock.set_low().map_err(Error::Pin)?;
        log::trace!("counts latched");
        Ok(())
    }

    /// Read one half of chip 0's storage register without latching first.
    pub fn read_latched(&mut self, half: Half) -> Result<u16, Error<E>> {
        self.read_latched_on(0, half)
    }

    pub fn read_latched_on(&mut self, chip: usize, half: Half) -> Result<u16, Error<E>> {
        self.check_read(Some(chip), half)?;
        let values = self.sample_half(half).map_err(Error::Pin)?;
        Ok(values[chip])
    }

    /// Latch, then read one half of chip 0.
    pub fn read_register(&mut self, half: Half) -> Result<u16, Error<E>> {
        self.read_register_on(0, half)
    }

    pub fn read_register_on(&mut self, chip: usize, half: Half) -> Result<u16, Error<E>> {
        self.check_read(Some(chip), half)?;
        self.latch()?;
        self.read_latched_on(chip, half)
    }

    /// `(B << 16) | A` of chip 0, from a single latch. Single 32-bit mode only.
    pub fn read_counter32(&mut self) -> Result<u32, Error<E>> {
        self.read_counter32_on(0)
    }

    pub fn read_counter32_on(&mut self, chip: usize) -> Result<u32, Error<E>> {
        self.check_single32()?;
        self.check_read(Some(chip), Half::B)?;
        self.latch()?;
        let upper = self.sample_half(Half::B).map_err(Error::Pin)?;
        let lower = self.sample_half(Half::A).map_err(Error::Pin)?;
        Ok(join32(upper[chip], lower[chip]))
    }

    /// Read `half` from the storage register of every chip, without latching first.
    /// Returns how many entries of `out` were filled.
    pub fn read_all_latched(&mut self, half: Half, out: &mut [u16]) -> Result<usize, Error<E>> {
        self.check_read(None, half)?;
        let values = self.sample_half(half).map_err(Error::Pin)?;
        let n = out.len().min(self.chips());
        out[..n].copy_from_slice(&values[..n]);
        Ok(n)
    }

    /// Latch, then read `half` of every chip.
    pub fn read_all(&mut self, half: Half, out: &mut [u16]) -> Result<usize, Error<E>> {
        self.check_read(None, half)?;
        self.latch()?;
        self.read_all_latched(half, out)
    }

    /// Latch once and read the 32-bit value of every chip. Single 32-bit mode only.
    pub fn read_all_counters32(&mut self, out: &mut [u32]) -> Result<usize, Error<E>> {
        self.check_single32()?;
        self.check_read(None, Half::B)?;
        self.latch()?;
        let upper = self.sample_half(Half::B).map_err(Error::Pin)?;
        let lower = self.sample_half(Half::A).map_err(Error::Pin)?;
        let n = out.len().min(self.chips());
        for (i, value) in out[..n].iter_mut().enumerate() {
            *value = join32(upper[i], lower[i]);
        }
        Ok(n)
    }

    /// Asynchronous active-low clear of both counters on every chip.
    pub fn clear(&mut self) -> Result<(), Error<E>> {
        self.clear.set_low().map_err(Error::Pin)?;
        self.delay.delay_us(HOLD_TIME_US);
        self.clear.set_high().map_err(Error::Pin)?;
        log::info!("counters cleared");
        Ok(())
    }

    /// Whether counter B is counting. Always true when the enable pin is not wired.
    pub fn counter_b_enabled(&self) -> bool {
        self.counter_b_enable.as_ref().map_or(true, |enable| !enable.high)
    }

    /// Flip counter B's enable and return the new enabled state.
    pub fn toggle_counter_b_enable(&mut self) -> Result<bool, Error<E>> {
        let enable = match self.counter_b_enable.as_mut() {
            Some(enable) => enable,
            None => return Err(refuse(UsageError::NoCounterBEnable)),
        };
        if enable.high {
            enable.pin.set_low().map_err(Error::Pin)?;
        } else {
            enable.pin.set_high().map_err(Error::Pin)?;
        }
        enable.high = !enable.high;
        let enabled = !enable.high;
        log::info!("counter B {}", if enabled { "enabled" } else { "disabled" });
        Ok(enabled)
    }

    /// Current level of the overflow pin. A plain read: edges between calls are not seen.
    pub fn overflowed(&self) -> Result<bool, Error<E>> {
        match self.overflow.as_ref() {
            Some(overflow) => overflow.is_set().map_err(Error::Pin),
            None => Err(refuse(UsageError::NoOverflowPin)),
        }
    }

    fn check_single32(&self) -> Result<(), UsageError> {
        if self.mode != Mode::Single32 {
            return Err(refuse(UsageError::NotSingle32));
        }
        Ok(())
    }

    fn check_read(&self, chip: Option<usize>, half: Half) -> Result<(), UsageError> {
        if let Some(chip) = chip {
            if chip >= self.chips() {
                return Err(refuse(UsageError::NoSuchChip(chip)));
            }
        }
        if half == Half::B && !self.counter_b_enabled() {
            return Err(refuse(UsageError::CounterBDisabled));
        }
        if let Some(generator) = self.self_test.as_ref() {
            if !generator.ready_for_measurement() {
                return Err(refuse(UsageError::SelfTestNotStarted));
            }
        }
        Ok(())
    }

    /// Upper byte then lower byte of `half`, for every chip. Exactly one gate is low at a
    /// time, and none is low once this returns, on success or failure.
    fn sample_half(&mut self, half: Half) -> Result<[u16; MAX_CHIPS], E> {
        let mut values = [0u16; MAX_CHIPS];
        for &byte in [Byte::Upper, Byte::Lower].iter() {
            let gate = self.gates.open(half, byte, &mut self.delay)?;
            for (value, bus) in values.iter_mut().zip(self.buses.iter()) {
                let sampled = u16::from(bus.sample()?);
                *value = match byte {
                    Byte::Upper => sampled << 8,
                    Byte::Lower => *value | sampled,
                };
            }
            gate.close()?;
        }
        log::trace!("register {:?}: {:?}", half, &values[..self.buses.len()]);
        Ok(values)
    }
}

fn join32(upper: u16, lower: u16) -> u32 {
    u32::from(upper) << 16 | u32::from(lower)
}

fn refuse<T: From<UsageError>>(e: UsageError) -> T {
    log::warn!("refused: {}", e);
    T::from(e)
}
