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
    core::profiler.rs

    A scope-based execution profiler. Time is credited to whichever
    category is on top of a FILO stack of active scopes, so scopes may
    nest: starting a new scope pauses the one below it, and stopping it
    resumes the one below. The profiler is an explicit object owned by the
    run loop; it reads emulated time only to throttle how often its report
    text is regenerated.

*/

use std::{
    cell::Cell,
    fmt::Write,
    ops::{Deref, DerefMut},
    rc::Rc,
};

use crate::{config::ProfilerConfig, timebase::Timebase};
use fxhash::FxHashMap;
use strum_macros::AsRefStr;
use web_time::Instant;

/// A profiling category. Report lines are ordered by this enum's order; percentages are
/// normalized over every category before `Profiler`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, AsRefStr)]
pub enum ProfileCategory {
    /// Time spent inside the executable unit with this index.
    #[strum(serialize = "Unit")]
    Unit(u16),
    #[strum(serialize = "Memory Read")]
    MemoryRead,
    #[strum(serialize = "Memory Write")]
    MemoryWrite,
    #[strum(serialize = "Video Update")]
    Video,
    #[strum(serialize = "Sound Generation")]
    Sound,
    #[strum(serialize = "Timer Callbacks")]
    TimerCallbacks,
    #[strum(serialize = "Input Processing")]
    Input,
    #[strum(serialize = "Unaccounted/Overhead")]
    Extra,
    #[strum(serialize = "User")]
    User(u8),
    #[strum(serialize = "Profiler")]
    Profiler,
    #[strum(serialize = "Idle")]
    Idle,
    /// Base of the stack. Collects time when no other scope is active; never reported.
    #[strum(serialize = "Total")]
    Total,
}

impl ProfileCategory {
    #[inline]
    fn is_normalized(&self) -> bool {
        *self < ProfileCategory::Profiler
    }
}

/// A monotonic tick source.
pub trait ProfileClock {
    fn ticks(&self) -> u64;
}

/// Host wall clock, in nanoseconds.
pub struct WallClock {
    origin: Instant,
}

impl Default for WallClock {
    fn default() -> Self {
        Self { origin: Instant::now() }
    }
}

impl ProfileClock for WallClock {
    fn ticks(&self) -> u64 {
        self.origin.elapsed().as_nanos() as u64
    }
}

/// A clock advanced by hand. Clones share the same counter.
#[derive(Clone, Debug, Default)]
pub struct ManualClock(Rc<Cell<u64>>);

impl ManualClock {
    pub fn advance(&self, ticks: u64) {
        self.0.set(self.0.get() + ticks);
    }

    pub fn set(&self, ticks: u64) {
        self.0.set(ticks);
    }
}

impl ProfileClock for ManualClock {
    fn ticks(&self) -> u64 {
        self.0.get()
    }
}

pub struct Profiler<C: ProfileClock = WallClock> {
    clock: C,
    enabled: bool,
    text_interval: Timebase,
    // Emulated time of the last text regeneration. None forces the next call to regenerate.
    text_time: Option<Timebase>,
    data: FxHashMap<ProfileCategory, u64>,
    filo: Vec<ProfileCategory>,
    last_ticks: u64,
    unit_names: FxHashMap<u16, String>,
    text: String,
}

impl Profiler<WallClock> {
    pub fn new(config: &ProfilerConfig) -> Self {
        Profiler::with_clock(config, WallClock::default())
    }
}

impl<C: ProfileClock> Profiler<C> {
    pub fn with_clock(config: &ProfilerConfig, clock: C) -> Self {
        let mut profiler = Self {
            clock,
            enabled: false,
            text_interval: config.text_interval(),
            text_time: None,
            data: FxHashMap::default(),
            filo: Vec::new(),
            last_ticks: 0,
            unit_names: FxHashMap::default(),
            text: String::new(),
        };
        profiler.reset(config.enabled);
        profiler
    }

    /// Clear the scope stack and enable or disable profiling. Accumulated data is kept
    /// until the next report.
    pub fn reset(&mut self, enabled: bool) {
        self.text_time = None;
        self.enabled = enabled;
        self.filo.clear();
        if enabled {
            self.filo.push(ProfileCategory::Total);
            self.last_ticks = self.clock.ticks();
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Name shown for `ProfileCategory::Unit(index)` in the report.
    pub fn set_unit_name(&mut self, index: u16, name: impl Into<String>) {
        self.unit_names.insert(index, name.into());
    }

    /// Credit the time since the last transition to the scope on top of the stack.
    #[inline]
    fn credit_top(&mut self, now: u64) {
        if let Some(top) = self.filo.last() {
            *self.data.entry(*top).or_insert(0) += now.saturating_sub(self.last_ticks);
        }
        self.last_ticks = now;
    }

    pub fn start(&mut self, category: ProfileCategory) {
        if !self.enabled {
            return;
        }
        let now = self.clock.ticks();
        self.credit_top(now);
        self.filo.push(category);
    }

    pub fn stop(&mut self) {
        if !self.enabled {
            return;
        }
        if self.filo.len() <= 1 {
            log::debug!("Profiler::stop() with no active scope");
            return;
        }
        let now = self.clock.ticks();
        self.credit_top(now);
        self.filo.pop();
    }

    /// Start `category` and stop it when the returned guard is dropped. The guard derefs to
    /// the profiler, so scopes can be nested through it.
    pub fn scope(&mut self, category: ProfileCategory) -> ProfilerScope<'_, C> {
        self.start(category);
        ProfilerScope { profiler: self }
    }

    /// Ticks accumulated for `category` since the last report.
    pub fn data(&self, category: ProfileCategory) -> u64 {
        self.data.get(&category).copied().unwrap_or(0)
    }

    pub fn depth(&self) -> usize {
        self.filo.len().saturating_sub(1)
    }

    /// The report text. It is regenerated when at least the configured interval of emulated
    /// time has passed since the last regeneration, and accumulated data is cleared each time
    /// it is.
    pub fn text(&mut self, now: Timebase) -> &str {
        if !self.enabled {
            return "";
        }
        self.start(ProfileCategory::Profiler);

        let due = match self.text_time {
            None => true,
            Some(last) => now < last || now.saturating_sub(last) >= self.text_interval,
        };
        if due {
            self.update_text();
            self.text_time = Some(now);
        }

        self.stop();
        &self.text
    }

    fn update_text(&mut self) {
        let mut categories: Vec<(ProfileCategory, u64)> = self
            .data
            .iter()
            .filter(|(c, ticks)| **c != ProfileCategory::Total && **ticks != 0)
            .map(|(c, ticks)| (*c, *ticks))
            .collect();
        categories.sort_unstable_by_key(|(c, _)| *c);

        let normalize: u64 = categories
            .iter()
            .filter(|(c, _)| c.is_normalized())
            .map(|(_, t)| *t)
            .sum();
        let total: u64 = categories.iter().map(|(_, t)| *t).sum();

        self.text.clear();
        if total == 0 || normalize == 0 {
            return;
        }

        let percent = |ticks: u64, of: u64| ((ticks as u128 * 100 + of as u128 / 2) / of as u128) as u64;
        for (category, ticks) in categories {
            let _ = write!(self.text, "{:02}% ", percent(ticks, total));
            if category.is_normalized() {
                let _ = write!(self.text, "{:02}% ", percent(ticks, normalize));
            }
            let _ = match category {
                ProfileCategory::Unit(index) => match self.unit_names.get(&index) {
                    Some(name) => write!(self.text, "'{}'", name),
                    None => write!(self.text, "'unit{}'", index),
                },
                ProfileCategory::User(n) => write!(self.text, "User {}", n),
                _ => write!(self.text, "{}", category.as_ref()),
            };
            self.text.push('\n');
        }

        self.data.clear();
    }
}

pub struct ProfilerScope<'a, C: ProfileClock> {
    profiler: &'a mut Profiler<C>,
}

impl<C: ProfileClock> Deref for ProfilerScope<'_, C> {
    type Target = Profiler<C>;

    fn deref(&self) -> &Self::Target {
        self.profiler
    }
}

impl<C: ProfileClock> DerefMut for ProfilerScope<'_, C> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.profiler
    }
}

impl<C: ProfileClock> Drop for ProfilerScope<'_, C> {
    fn drop(&mut self) {
        self.profiler.stop();
    }
}
