//! Operator command lines mapped onto counter and delay-line operations.
//!
//! ```text
//! latch | save                   pulse RCLK
//! read                           latched counts, decimal
//! clear                          clear both counters
//! toggle-b                       flip counter B enable
//! overflow                       overflow pin level
//! set <bus> <channel> <value>    program a delay line
//! inc <bus> <channel> <delta>
//! dec <bus> <channel> <delta>
//! get <bus> <channel>            cached delay value
//! ```
//!
//! Values are decimal and truncated to 8 bits. Reading the line off the serial port is the
//! caller's job.

use core::fmt::{self, Display, Write};

use embedded_hal::blocking::delay::DelayUs;
use embedded_hal::digital::v2::{InputPin, OutputPin};
use embedded_time::Clock;
use heapless::{consts::*, String};
use nom::{
    branch::alt,
    bytes::complete::{tag, take_while},
    character::complete::{digit1, space0, space1},
    combinator::{all_consuming, map, map_opt},
    sequence::{delimited, pair, preceded},
    IResult,
};

use crate::counter::{CounterDevice, Half, Mode, MAX_CHIPS};
use crate::delay_line::DelayLine;
use crate::error::{Error, UsageError};

pub type Reply = String<U64>;

macro_rules! reply {
    ($($arg:tt)*) => ({
        let mut r = Reply::new();
        write!(r, $($arg)*).unwrap_or(());
        r
    })
}

/// A delay line is addressed by the serial bus it hangs off and its position on that bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineAddress {
    pub bus: usize,
    pub channel: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Latch,
    Read,
    Clear,
    ToggleCounterB,
    Overflow,
    SetDelay { line: LineAddress, value: u8 },
    IncrementDelay { line: LineAddress, delta: u8 },
    DecrementDelay { line: LineAddress, delta: u8 },
    GetDelay { line: LineAddress },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseError;

impl Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("unknown command")
    }
}

/// Decimal digits taken modulo 256.
fn byte_value(input: &[u8]) -> IResult<&[u8], u8> {
    map(digit1, |digits: &[u8]| {
        digits.iter().fold(0u8, |acc, d| acc.wrapping_mul(10).wrapping_add(d - b'0'))
    })(input)
}

fn index(input: &[u8]) -> IResult<&[u8], usize> {
    map_opt(digit1, |digits: &[u8]| core::str::from_utf8(digits).ok()?.parse().ok())(input)
}

fn line_address(input: &[u8]) -> IResult<&[u8], LineAddress> {
    map(
        pair(preceded(space1, index), preceded(space1, index)),
        |(bus, channel)| LineAddress { bus, channel },
    )(input)
}

fn counter_command(input: &[u8]) -> IResult<&[u8], Command> {
    alt((
        map(alt((tag("latch"), tag("save"))), |_| Command::Latch),
        map(tag("read"), |_| Command::Read),
        map(tag("clear"), |_| Command::Clear),
        map(tag("toggle-b"), |_| Command::ToggleCounterB),
        map(tag("overflow"), |_| Command::Overflow),
    ))(input)
}

#[rustfmt::skip]
fn delay_command(input: &[u8]) -> IResult<&[u8], Command> {
    alt((
        map(preceded(tag("set"), pair(line_address, preceded(space1, byte_value))),
            |(line, value)| Command::SetDelay { line, value }),
        map(preceded(tag("inc"), pair(line_address, preceded(space1, byte_value))),
            |(line, delta)| Command::IncrementDelay { line, delta }),
        map(preceded(tag("dec"), pair(line_address, preceded(space1, byte_value))),
            |(line, delta)| Command::DecrementDelay { line, delta }),
        map(preceded(tag("get"), line_address),
            |line| Command::GetDelay { line }),
    ))(input)
}

fn line_end(input: &[u8]) -> IResult<&[u8], &[u8]> {
    take_while(|c: u8| c == b'\r' || c == b'\n')(input)
}

/// Parse one command line, with or without its line terminator.
pub fn parse(line: &[u8]) -> Result<Command, ParseError> {
    let result: IResult<&[u8], Command> = all_consuming(delimited(
        space0,
        alt((counter_command, delay_command)),
        pair(space0, line_end),
    ))(line);

    match result {
        Ok((_, command)) => Ok(command),
        Err(_) => {
            log::warn!("unparsed command {:?}", line);
            Err(ParseError)
        }
    }
}

fn push_value<V: Display>(reply: &mut Reply, value: V) {
    if !reply.is_empty() {
        reply.push(' ').unwrap_or(());
    }
    write!(reply, "{}", value).unwrap_or(());
}

fn delay_line<'a, 'bus, Pin, D>(
    lines: &'a mut [&mut [DelayLine<'bus, Pin, D>]],
    address: LineAddress,
) -> Result<&'a mut DelayLine<'bus, Pin, D>, UsageError>
    where Pin: OutputPin,
          D: DelayUs<u32>,
{
    lines
        .get_mut(address.bus)
        .and_then(|bus| bus.get_mut(address.channel))
        .ok_or_else(|| {
            let e = UsageError::NoSuchDelayLine { bus: address.bus, channel: address.channel };
            log::warn!("refused: {}", e);
            e
        })
}

impl Command {
    /// Run the command and format the reply.
    ///
    /// `read` answers with one 32-bit value per chip in single mode, and with `A B` per chip
    /// in dual mode, where B is `-` while counter B is disabled.
    pub fn execute<'clock, 'bus, Out, In, D, C, LinePin, LineDelay, E>(
        &self,
        counter: &mut CounterDevice<'clock, Out, In, D, C>,
        delay_lines: &mut [&mut [DelayLine<'bus, LinePin, LineDelay>]],
    ) -> Result<Reply, Error<E>>
        where Out: OutputPin<Error = E>,
              In: InputPin<Error = E>,
              D: DelayUs<u32>,
              C: Clock + 'clock,
              LinePin: OutputPin<Error = E>,
              LineDelay: DelayUs<u32>,
              E: fmt::Debug,
    {
        match *self {
            Command::Latch => {
                counter.latch()?;
                Ok(reply!("ok"))
            }
            Command::Clear => {
                counter.clear()?;
                Ok(reply!("ok"))
            }
            Command::Read => {
                let mut reply = Reply::new();
                match counter.mode() {
                    Mode::Single32 => {
                        let mut values = [0u32; MAX_CHIPS];
                        let n = counter.read_all_counters32(&mut values)?;
                        for value in &values[..n] {
                            push_value(&mut reply, value);
                        }
                    }
                    Mode::Dual16 => {
                        let mut a = [0u16; MAX_CHIPS];
                        let mut b = [0u16; MAX_CHIPS];
                        let n = counter.read_all(Half::A, &mut a)?;
                        let b_counting = counter.counter_b_enabled();
                        if b_counting {
                            counter.read_all_latched(Half::B, &mut b)?;
                        }
                        for i in 0..n {
                            push_value(&mut reply, a[i]);
                            if b_counting {
                                push_value(&mut reply, b[i]);
                            } else {
                                push_value(&mut reply, '-');
                            }
                        }
                    }
                }
                Ok(reply)
            }
            Command::ToggleCounterB => {
                let enabled = counter.toggle_counter_b_enable()?;
                Ok(reply!("{}", if enabled { "enabled" } else { "disabled" }))
            }
            Command::Overflow => {
                let overflowed = counter.overflowed()?;
                Ok(reply!("{}", overflowed as u8))
            }
            Command::SetDelay { line, value } => {
                delay_line(delay_lines, line)?.write(value)?;
                Ok(reply!("{}", value))
            }
            Command::IncrementDelay { line, delta } => {
                let value = delay_line(delay_lines, line)?.increment(delta)?;
                Ok(reply!("{}", value))
            }
            Command::DecrementDelay { line, delta } => {
                let value = delay_line(delay_lines, line)?.decrement(delta)?;
                Ok(reply!("{}", value))
            }
            Command::GetDelay { line } => {
                Ok(reply!("{}", delay_line(delay_lines, line)?.read()))
            }
        }
    }
}
