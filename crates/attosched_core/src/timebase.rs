/*
    AttoSched

    Copyright 2022-2025 Daniel Balsom

    Permission is hereby granted, free of charge, to any person obtaining a
    copy of this software and associated documentation files (the “Software”),
    to deal in the Software without restriction, including without limitation
    the rights to use, copy, modify, merge, publish, distribute, sublicense,
    and/or sell copies of the Software, and to permit persons to whom the
    Software is furnished to do so, subject to the following conditions:

    The above copyright notice and this permission notice shall be included in
    all copies or substantial portions of the Software.

    THE SOFTWARE IS PROVIDED “AS IS”, WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
    IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
    FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
    AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
    LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
    FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
    DEALINGS IN THE SOFTWARE.

    ---------------------------------------------------------------------------
    core::timebase.rs

    Defines the Timebase type, an exact point in emulated time made up of
    whole seconds and attoseconds (10^-18 s). All scheduling decisions are
    made on Timebase values; conversion to f64 exists for display and
    profiling only.

*/

use std::{
    cmp::Ordering,
    fmt,
    ops::{Add, AddAssign, Sub},
};

use serde_derive::{Deserialize, Serialize};
use thiserror::Error;

pub const ATTOSECONDS_PER_SECOND: u64 = 1_000_000_000_000_000_000;
pub const ATTOSECONDS_PER_MILLISECOND: u64 = ATTOSECONDS_PER_SECOND / 1_000;
pub const ATTOSECONDS_PER_MICROSECOND: u64 = ATTOSECONDS_PER_SECOND / 1_000_000;
pub const ATTOSECONDS_PER_NANOSECOND: u64 = ATTOSECONDS_PER_SECOND / 1_000_000_000;

/// Magnitude limit of the seconds part. Values at or beyond this are not representable,
/// and `seconds == MAX_SECONDS` is reserved for [Timebase::NEVER].
pub const MAX_SECONDS: i64 = 1_000_000_000;

const ATTOS_I128: i128 = ATTOSECONDS_PER_SECOND as i128;

#[derive(Copy, Clone, Debug, Error, PartialEq, Eq)]
pub enum TimebaseError {
    #[error("Timebase overflow: result exceeds ±{MAX_SECONDS} seconds")]
    Overflow,
    #[error("Frequency must be non-zero")]
    ZeroFrequency,
}

/// An exact instant (or span) of emulated time.
///
/// The attosecond part is always normalized into `[0, 10^18)`, so a negative value such as
/// -0.25s is stored as `{ seconds: -1, attoseconds: 750_000_000_000_000_000 }`. Field order
/// matters: the derived `Ord` compares seconds first, which also places [Timebase::NEVER]
/// after every finite value.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timebase {
    seconds: i64,
    attoseconds: u64,
}

impl Timebase {
    pub const ZERO: Timebase = Timebase {
        seconds: 0,
        attoseconds: 0,
    };

    /// The "infinite future". Disabled timers and idle units report this.
    pub const NEVER: Timebase = Timebase {
        seconds: MAX_SECONDS,
        attoseconds: 0,
    };

    pub fn new(seconds: i64, attoseconds: u64) -> Result<Timebase, TimebaseError> {
        let total = (seconds as i128)
            .checked_mul(ATTOS_I128)
            .and_then(|t| t.checked_add(attoseconds as i128))
            .ok_or(TimebaseError::Overflow)?;
        Timebase::from_attoseconds(total)
    }

    /// Build a Timebase from a total attosecond count.
    pub fn from_attoseconds(total: i128) -> Result<Timebase, TimebaseError> {
        let seconds = total.div_euclid(ATTOS_I128);
        if seconds >= MAX_SECONDS as i128 || seconds <= -(MAX_SECONDS as i128) {
            return Err(TimebaseError::Overflow);
        }
        Ok(Timebase {
            seconds: seconds as i64,
            attoseconds: total.rem_euclid(ATTOS_I128) as u64,
        })
    }

    /// Total attoseconds. Not meaningful for [Timebase::NEVER].
    #[inline]
    pub fn as_attoseconds(&self) -> i128 {
        self.seconds as i128 * ATTOS_I128 + self.attoseconds as i128
    }

    /// Lossy conversion from floating point seconds. Non-finite or out of range input
    /// saturates to [Timebase::NEVER] (or its negative bound).
    pub fn from_seconds(seconds: f64) -> Timebase {
        if seconds.is_nan() || seconds >= MAX_SECONDS as f64 {
            return Timebase::NEVER;
        }
        if seconds <= -(MAX_SECONDS as f64) {
            return Timebase {
                seconds: -(MAX_SECONDS - 1),
                attoseconds: 0,
            };
        }
        let whole = seconds.floor();
        let mut attos = ((seconds - whole) * ATTOSECONDS_PER_SECOND as f64) as u64;
        // The f64 product can round up to exactly one second.
        if attos >= ATTOSECONDS_PER_SECOND {
            attos = ATTOSECONDS_PER_SECOND - 1;
        }
        Timebase {
            seconds: whole as i64,
            attoseconds: attos,
        }
    }

    #[inline]
    pub fn from_double(seconds: f64) -> Timebase {
        Timebase::from_seconds(seconds)
    }

    /// Whole seconds plus a sub-second attosecond part. Anything at or past the
    /// representable range saturates to exactly [Timebase::NEVER].
    fn saturating_from_parts(seconds: u64, attoseconds: u64) -> Timebase {
        if seconds >= MAX_SECONDS as u64 {
            return Timebase::NEVER;
        }
        Timebase {
            seconds: seconds as i64,
            attoseconds,
        }
    }

    pub fn from_msec(msec: u64) -> Timebase {
        Timebase::saturating_from_parts(msec / 1_000, (msec % 1_000) * ATTOSECONDS_PER_MILLISECOND)
    }

    pub fn from_usec(usec: u64) -> Timebase {
        Timebase::saturating_from_parts(usec / 1_000_000, (usec % 1_000_000) * ATTOSECONDS_PER_MICROSECOND)
    }

    pub fn from_nsec(nsec: u64) -> Timebase {
        Timebase::saturating_from_parts(
            nsec / 1_000_000_000,
            (nsec % 1_000_000_000) * ATTOSECONDS_PER_NANOSECOND,
        )
    }

    /// Length of one tick of a clock running at `frequency` Hz, truncated to whole attoseconds.
    #[inline]
    pub fn attoseconds_per_tick(frequency: u32) -> Result<u64, TimebaseError> {
        if frequency == 0 {
            return Err(TimebaseError::ZeroFrequency);
        }
        Ok(ATTOSECONDS_PER_SECOND / frequency as u64)
    }

    /// The period of a clock running at `frequency` Hz.
    pub fn from_hz(frequency: u32) -> Result<Timebase, TimebaseError> {
        Timebase::from_ticks(1, frequency)
    }

    /// The instant `count` ticks of a `frequency` Hz clock after zero.
    ///
    /// Whole seconds are split off first so that the truncated tick period only ever applies
    /// to the sub-second remainder. This keeps [Timebase::as_ticks] an exact inverse.
    pub fn from_ticks(count: u64, frequency: u32) -> Result<Timebase, TimebaseError> {
        let per_tick = Timebase::attoseconds_per_tick(frequency)?;
        let seconds = count / frequency as u64;
        let remainder = count % frequency as u64;
        if seconds >= MAX_SECONDS as u64 {
            return Err(TimebaseError::Overflow);
        }
        Ok(Timebase {
            seconds: seconds as i64,
            attoseconds: remainder * per_tick,
        })
    }

    /// Whole ticks of a `frequency` Hz clock elapsed at this instant. Negative instants yield
    /// zero and [Timebase::NEVER] yields `u64::MAX`.
    pub fn as_ticks(&self, frequency: u32) -> Result<u64, TimebaseError> {
        let per_tick = Timebase::attoseconds_per_tick(frequency)?;
        if self.is_never() {
            return Ok(u64::MAX);
        }
        if self.seconds < 0 {
            return Ok(0);
        }
        Ok(self.seconds as u64 * frequency as u64 + self.attoseconds / per_tick)
    }

    /// Lossy. For display and profiling only.
    pub fn as_double(&self) -> f64 {
        self.seconds as f64 + self.attoseconds as f64 / ATTOSECONDS_PER_SECOND as f64
    }

    #[inline]
    pub fn seconds(&self) -> i64 {
        self.seconds
    }

    #[inline]
    pub fn attoseconds(&self) -> u64 {
        self.attoseconds
    }

    #[inline]
    pub fn is_never(&self) -> bool {
        self.seconds >= MAX_SECONDS
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.seconds == 0 && self.attoseconds == 0
    }

    #[inline]
    pub fn compare(a: Timebase, b: Timebase) -> Ordering {
        a.cmp(&b)
    }

    /// Exact addition. [Timebase::NEVER] absorbs any operand.
    pub fn checked_add(self, rhs: Timebase) -> Result<Timebase, TimebaseError> {
        if self.is_never() || rhs.is_never() {
            return Ok(Timebase::NEVER);
        }
        // Both parts are < 10^18, so the sum cannot overflow a u64.
        let mut attos = self.attoseconds + rhs.attoseconds;
        let mut seconds = self.seconds + rhs.seconds;
        if attos >= ATTOSECONDS_PER_SECOND {
            attos -= ATTOSECONDS_PER_SECOND;
            seconds += 1;
        }
        if seconds >= MAX_SECONDS || seconds <= -MAX_SECONDS {
            return Err(TimebaseError::Overflow);
        }
        Ok(Timebase {
            seconds,
            attoseconds: attos,
        })
    }

    /// Exact subtraction. [Timebase::NEVER] on either side yields NEVER.
    pub fn checked_sub(self, rhs: Timebase) -> Result<Timebase, TimebaseError> {
        if self.is_never() || rhs.is_never() {
            return Ok(Timebase::NEVER);
        }
        let mut seconds = self.seconds - rhs.seconds;
        let attos = if self.attoseconds >= rhs.attoseconds {
            self.attoseconds - rhs.attoseconds
        }
        else {
            seconds -= 1;
            self.attoseconds + ATTOSECONDS_PER_SECOND - rhs.attoseconds
        };
        if seconds >= MAX_SECONDS || seconds <= -MAX_SECONDS {
            return Err(TimebaseError::Overflow);
        }
        Ok(Timebase {
            seconds,
            attoseconds: attos,
        })
    }

    pub fn checked_mul(self, factor: u32) -> Result<Timebase, TimebaseError> {
        if self.is_never() {
            return Ok(Timebase::NEVER);
        }
        Timebase::from_attoseconds(self.as_attoseconds() * factor as i128)
    }

    /// Exact division, rounding toward negative infinity at attosecond resolution.
    pub fn checked_div(self, divisor: u32) -> Result<Timebase, TimebaseError> {
        if divisor == 0 {
            return Err(TimebaseError::ZeroFrequency);
        }
        if self.is_never() {
            return Ok(Timebase::NEVER);
        }
        Timebase::from_attoseconds(self.as_attoseconds().div_euclid(divisor as i128))
    }

    /// Difference saturating at zero; NEVER minus anything finite stays NEVER.
    pub fn saturating_sub(self, rhs: Timebase) -> Timebase {
        match self.checked_sub(rhs) {
            Ok(t) if t < Timebase::ZERO => Timebase::ZERO,
            Ok(t) => t,
            Err(_) => Timebase::ZERO,
        }
    }
}

impl Add for Timebase {
    type Output = Timebase;

    /// Panics on overflow, like `std::time::Duration`. Scheduling code uses
    /// [Timebase::checked_add] and reports overflow as a session error instead.
    fn add(self, rhs: Timebase) -> Timebase {
        match self.checked_add(rhs) {
            Ok(t) => t,
            Err(e) => panic!("{e}"),
        }
    }
}

impl AddAssign for Timebase {
    fn add_assign(&mut self, rhs: Timebase) {
        *self = *self + rhs;
    }
}

impl Sub for Timebase {
    type Output = Timebase;

    fn sub(self, rhs: Timebase) -> Timebase {
        match self.checked_sub(rhs) {
            Ok(t) => t,
            Err(e) => panic!("{e}"),
        }
    }
}

impl fmt::Display for Timebase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_never() {
            return write!(f, "never");
        }
        if self.seconds < 0 {
            // Print the magnitude so that -0.25 reads as "-0.250..." rather than "-1.750...".
            let magnitude = -self.as_attoseconds();
            let secs = magnitude / ATTOS_I128;
            let attos = magnitude % ATTOS_I128;
            return write!(f, "-{}.{:018}", secs, attos);
        }
        write!(f, "{}.{:018}", self.seconds, self.attoseconds)
    }
}
