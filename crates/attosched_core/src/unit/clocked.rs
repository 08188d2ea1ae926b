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
    core::unit::clocked.rs

    A ClockedUnit adapts a cycle-counting core (typically a CPU
    interpreter) to the scheduler. Time is converted to whole cycles of
    the unit's clock; the core is given a cycle budget that never crosses
    the target instant, and reports how many cycles it actually used.

*/

use std::any::Any;

use crate::{timebase::Timebase, unit::ExecutableUnit};

/// A core that executes in whole clock cycles.
pub trait CycleCore {
    /// Execute at most `budget` cycles and return the number consumed. A core that cannot
    /// fit its next instruction into the remaining budget stops early; a halted core
    /// should consume the whole budget.
    fn execute(&mut self, budget: u64) -> u64;

    /// Cycles from the current position until the core needs the scheduler's attention,
    /// for example an interrupt that has been latched but not yet serviced.
    fn cycles_until_event(&self) -> Option<u64> {
        None
    }

    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

pub struct ClockedUnit {
    name: String,
    frequency: u32,
    granularity: u64,
    // Local time is `base + cycles` at `frequency`. Deriving it from a cycle count rather
    // than accumulating Timebase deltas keeps it exact.
    base: Timebase,
    cycles: u64,
    total_cycles: u64,
    overruns: u64,
    core: Box<dyn CycleCore>,
}

impl ClockedUnit {
    /// Create a unit clocked at `frequency` Hz. `granularity` is the smallest number of
    /// cycles the core can be asked to run; budgets are rounded down to a multiple of it.
    pub fn new(name: impl Into<String>, frequency: u32, granularity: u64, core: Box<dyn CycleCore>) -> Self {
        let frequency = if frequency == 0 {
            log::warn!("ClockedUnit created with a zero clock; using 1Hz");
            1
        }
        else {
            frequency
        };
        Self {
            name: name.into(),
            frequency,
            granularity: granularity.max(1),
            base: Timebase::ZERO,
            cycles: 0,
            total_cycles: 0,
            overruns: 0,
            core,
        }
    }

    pub fn frequency(&self) -> u32 {
        self.frequency
    }

    pub fn granularity(&self) -> u64 {
        self.granularity
    }

    /// Cycles executed over the unit's lifetime.
    pub fn total_cycles(&self) -> u64 {
        self.total_cycles
    }

    /// Number of times the core reported using more cycles than it was given.
    pub fn overruns(&self) -> u64 {
        self.overruns
    }

    pub fn core(&self) -> &dyn CycleCore {
        self.core.as_ref()
    }

    pub fn core_mut(&mut self) -> &mut dyn CycleCore {
        self.core.as_mut()
    }

    pub fn core_as<T: Any>(&self) -> Option<&T> {
        self.core.as_any().downcast_ref::<T>()
    }

    pub fn core_as_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.core.as_any_mut().downcast_mut::<T>()
    }

    /// Period of one clock cycle.
    pub fn cycle_period(&self) -> Timebase {
        Timebase::from_ticks(1, self.frequency).unwrap_or(Timebase::NEVER)
    }

    fn time_at(&self, cycles: u64) -> Timebase {
        match Timebase::from_ticks(cycles, self.frequency).and_then(|t| self.base.checked_add(t)) {
            Ok(t) => t,
            Err(_) => Timebase::NEVER,
        }
    }

    /// Whole cycles that fit between the unit's base and `target`.
    fn cycles_until(&self, target: Timebase) -> u64 {
        if target <= self.base {
            return 0;
        }
        target
            .checked_sub(self.base)
            .and_then(|span| span.as_ticks(self.frequency))
            .unwrap_or(u64::MAX)
    }
}

impl ExecutableUnit for ClockedUnit {
    fn name(&self) -> &str {
        &self.name
    }

    fn local_time(&self) -> Timebase {
        self.time_at(self.cycles)
    }

    fn advance(&mut self, target: Timebase) -> Timebase {
        let available = self.cycles_until(target).saturating_sub(self.cycles);
        let budget = available - available % self.granularity;
        if budget == 0 {
            return self.local_time();
        }

        let mut used = self.core.execute(budget);
        if used > budget {
            log::warn!(
                "{}: core used {} cycles of a {} cycle budget; clamping",
                self.name,
                used,
                budget
            );
            self.overruns += 1;
            used = budget;
        }
        self.cycles += used;
        self.total_cycles += used;
        self.local_time()
    }

    fn next_event_hint(&self) -> Timebase {
        match self.core.cycles_until_event() {
            Some(n) => self.time_at(self.cycles.saturating_add(n)),
            None => Timebase::NEVER,
        }
    }

    fn resync(&mut self, instant: Timebase) {
        if instant > self.local_time() {
            self.base = instant;
            self.cycles = 0;
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
