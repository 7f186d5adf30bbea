//! Simulated bench wiring for unit tests: pins, a recording delay, a settable clock and an
//! SN74LV8154 model that answers on the data buses.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::vec::Vec;

use embedded_hal::blocking::delay::DelayUs;
use embedded_hal::digital::v2::{InputPin, OutputPin};
use embedded_time::clock;
use embedded_time::fraction::Fraction;
use embedded_time::{Clock, Instant};

use crate::counter::{CounterConfig, Mode};
use crate::self_test::ChannelConfig;

pub const GAL: u8 = 0;
pub const GAU: u8 = 1;
pub const GBL: u8 = 2;
pub const GBU: u8 = 3;
pub const RCLK: u8 = 4;
pub const CCLR: u8 = 5;
pub const B_ENABLE: u8 = 6;
pub const OVERFLOW: u8 = 7;
pub const TEST_A: u8 = 8;
pub const TEST_B: u8 = 9;
pub const SER_CLK: u8 = 10;
pub const SER_DATA: u8 = 11;
pub const LATCH_0: u8 = 12;
pub const LATCH_1: u8 = 13;
pub const BUS_BASE: u8 = 16;

const GATES: [u8; 4] = [GAL, GAU, GBL, GBU];

pub fn bus_pin(chip: usize, bit: usize) -> u8 {
    BUS_BASE + (chip * 8 + bit) as u8
}

/// Failure reported by a [`TestPin`] armed with [`Board::fail_pin`], naming the pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinFault(pub u8);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Set(u8, bool),
    Delay(u32),
}

#[derive(Default)]
struct Chip {
    live_a: u16,
    live_b: u16,
    stored_a: u16,
    stored_b: u16,
}

struct State {
    levels: [bool; 64],
    events: Vec<Event>,
    chips: Vec<Chip>,
    overflow: bool,
    max_gates_low: usize,
    fault: Option<(u8, usize)>,
}

impl State {
    /// One-shot: the armed pin fails once its remaining access count reaches zero.
    fn check_fault(&mut self, id: u8) -> Result<(), PinFault> {
        match self.fault {
            Some((pin, 0)) if pin == id => {
                self.fault = None;
                Err(PinFault(id))
            }
            Some((pin, remaining)) if pin == id => {
                self.fault = Some((pin, remaining - 1));
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

#[derive(Clone)]
pub struct Board(Rc<RefCell<State>>);

impl Board {
    pub fn new(chips: usize) -> Self {
        let mut state = State {
            levels: [false; 64],
            events: Vec::new(),
            chips: Vec::new(),
            overflow: false,
            max_gates_low: 0,
            fault: None,
        };
        for _ in 0..chips {
            state.chips.push(Chip::default());
        }
        Board(Rc::new(RefCell::new(state)))
    }

    pub fn pin(&self, id: u8) -> TestPin {
        TestPin { id, board: self.clone() }
    }

    pub fn delay(&self) -> TestDelay {
        TestDelay(self.clone())
    }

    pub fn level(&self, id: u8) -> bool {
        self.0.borrow().levels[id as usize]
    }

    pub fn events(&self) -> Vec<Event> {
        self.0.borrow().events.clone()
    }

    /// Forget recorded events and the gate-conflict high-water mark.
    pub fn clear_events(&self) {
        let mut state = self.0.borrow_mut();
        state.events.clear();
        state.max_gates_low = 0;
    }

    pub fn max_gates_low(&self) -> usize {
        self.0.borrow().max_gates_low
    }

    /// Let `id` succeed `after` more times, then fail once. A failed write leaves the level
    /// unchanged and records no event.
    pub fn fail_pin(&self, id: u8, after: usize) {
        self.0.borrow_mut().fault = Some((id, after));
    }

    pub fn set_overflow(&self, level: bool) {
        self.0.borrow_mut().overflow = level;
    }

    pub fn set_counts(&self, chip: usize, a: u16, b: u16) {
        let mut state = self.0.borrow_mut();
        let chip = &mut state.chips[chip];
        chip.live_a = a;
        chip.live_b = b;
    }

    pub fn stored(&self, chip: usize) -> (u16, u16) {
        let state = self.0.borrow();
        (state.chips[chip].stored_a, state.chips[chip].stored_b)
    }

    /// Input pulses on counter A with RCOA chained into CLKB, as in 32-bit wiring.
    pub fn pulse_chained(&self, chip: usize, pulses: u32) {
        let mut state = self.0.borrow_mut();
        if !state.levels[CCLR as usize] {
            return;
        }
        let chip = &mut state.chips[chip];
        let value = ((chip.live_b as u32) << 16 | chip.live_a as u32).wrapping_add(pulses);
        chip.live_a = value as u16;
        chip.live_b = (value >> 16) as u16;
    }

    pub fn pulse_a(&self, chip: usize, pulses: u16) {
        let mut state = self.0.borrow_mut();
        if !state.levels[CCLR as usize] {
            return;
        }
        let chip = &mut state.chips[chip];
        chip.live_a = chip.live_a.wrapping_add(pulses);
    }

    /// Data pin level sampled at each rising edge of the clock pin.
    pub fn data_at_rising_edges(&self, clock: u8, data: u8) -> Vec<bool> {
        let mut clock_level = false;
        let mut data_level = false;
        let mut bits = Vec::new();
        for event in self.events() {
            if let Event::Set(id, level) = event {
                if id == data {
                    data_level = level;
                } else if id == clock {
                    if level && !clock_level {
                        bits.push(data_level);
                    }
                    clock_level = level;
                }
            }
        }
        bits
    }

    /// Total delay spent while `id` was held at `level`, one entry per hold.
    pub fn holds(&self, id: u8, level: bool) -> Vec<u32> {
        let mut holds = Vec::new();
        let mut current: Option<u32> = None;
        for event in self.events() {
            match event {
                Event::Set(pin, l) if pin == id => {
                    if l == level && current.is_none() {
                        current = Some(0);
                    } else if l != level {
                        if let Some(total) = current.take() {
                            holds.push(total);
                        }
                    }
                }
                Event::Delay(us) => {
                    if let Some(total) = current.as_mut() {
                        *total += us;
                    }
                }
                _ => {}
            }
        }
        holds
    }

    pub fn pin_events(&self, id: u8) -> Vec<bool> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Set(pin, level) if pin == id => Some(level),
                _ => None,
            })
            .collect()
    }

    fn drive(&self, id: u8, level: bool) -> Result<(), PinFault> {
        let mut state = self.0.borrow_mut();
        state.check_fault(id)?;
        let previous = state.levels[id as usize];
        state.levels[id as usize] = level;
        state.events.push(Event::Set(id, level));

        if id == RCLK && level && !previous {
            for chip in state.chips.iter_mut() {
                chip.stored_a = chip.live_a;
                chip.stored_b = chip.live_b;
            }
        }
        if id == CCLR && !level {
            for chip in state.chips.iter_mut() {
                chip.live_a = 0;
                chip.live_b = 0;
            }
        }

        let gates_low = GATES.iter().filter(|g| !state.levels[**g as usize]).count();
        if gates_low > state.max_gates_low {
            state.max_gates_low = gates_low;
        }
        Ok(())
    }

    fn sense(&self, id: u8) -> Result<bool, PinFault> {
        self.0.borrow_mut().check_fault(id)?;
        let state = self.0.borrow();
        if id == OVERFLOW {
            return Ok(state.overflow);
        }
        if id < BUS_BASE {
            return Ok(state.levels[id as usize]);
        }
        let offset = (id - BUS_BASE) as usize;
        let (chip, bit) = (offset / 8, offset % 8);
        let chip = match state.chips.get(chip) {
            Some(chip) => chip,
            None => return Ok(false),
        };
        let open: Vec<u8> = GATES
            .iter()
            .copied()
            .filter(|g| !state.levels[*g as usize])
            .collect();
        let byte = match open.as_slice() {
            [GAL] => chip.stored_a as u8,
            [GAU] => (chip.stored_a >> 8) as u8,
            [GBL] => chip.stored_b as u8,
            [GBU] => (chip.stored_b >> 8) as u8,
            // Tri-stated, or two drivers fighting: nothing meaningful on the bus.
            _ => 0xA5,
        };
        Ok((byte >> bit) & 1 == 1)
    }
}

pub struct TestPin {
    id: u8,
    board: Board,
}

impl OutputPin for TestPin {
    type Error = PinFault;

    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.board.drive(self.id, false)
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.board.drive(self.id, true)
    }
}

impl InputPin for TestPin {
    type Error = PinFault;

    fn is_high(&self) -> Result<bool, Self::Error> {
        self.board.sense(self.id)
    }

    fn is_low(&self) -> Result<bool, Self::Error> {
        self.board.sense(self.id).map(|high| !high)
    }
}

pub struct TestDelay(Board);

impl DelayUs<u32> for TestDelay {
    fn delay_us(&mut self, us: u32) {
        (self.0).0.borrow_mut().events.push(Event::Delay(us));
    }
}

/// Microsecond clock moved by hand.
#[derive(Debug, Default)]
pub struct TestClock {
    now: Cell<u32>,
}

impl TestClock {
    pub fn advance(&self, us: u32) {
        self.now.set(self.now.get().wrapping_add(us));
    }
}

impl Clock for TestClock {
    type T = u32;
    const SCALING_FACTOR: Fraction = Fraction::new(1, 1_000_000);

    fn try_now(&self) -> Result<Instant<Self>, clock::Error> {
        Ok(Instant::new(self.now.get()))
    }
}

/// 32.768 kHz tick counter, as driven by a watch crystal.
#[derive(Debug, Default)]
pub struct RtcClock {
    ticks: Cell<u32>,
}

impl RtcClock {
    pub fn advance(&self, ticks: u32) {
        self.ticks.set(self.ticks.get().wrapping_add(ticks));
    }
}

impl Clock for RtcClock {
    type T = u32;
    const SCALING_FACTOR: Fraction = Fraction::new(1, 32_768);

    fn try_now(&self) -> Result<Instant<Self>, clock::Error> {
        Ok(Instant::new(self.ticks.get()))
    }
}

/// Fully wired configuration for `chips` parallel counters.
pub fn config(board: &Board, mode: Mode, chips: usize) -> CounterConfig<TestPin, TestPin> {
    let mut config = CounterConfig::new(mode);
    config.gate_a_lower = Some(board.pin(GAL));
    config.gate_a_upper = Some(board.pin(GAU));
    config.gate_b_lower = Some(board.pin(GBL));
    config.gate_b_upper = Some(board.pin(GBU));
    config.register_clock = Some(board.pin(RCLK));
    config.clear = Some(board.pin(CCLR));
    for chip in 0..chips {
        config = config.with_data_bus([
            board.pin(bus_pin(chip, 0)),
            board.pin(bus_pin(chip, 1)),
            board.pin(bus_pin(chip, 2)),
            board.pin(bus_pin(chip, 3)),
            board.pin(bus_pin(chip, 4)),
            board.pin(bus_pin(chip, 5)),
            board.pin(bus_pin(chip, 6)),
            board.pin(bus_pin(chip, 7)),
        ]);
    }
    config
}

pub fn test_channel(board: &Board, id: u8, frequency_hz: u32) -> Option<ChannelConfig<TestPin>> {
    Some(ChannelConfig { pin: board.pin(id), frequency_hz })
}
