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
    core::timer.rs

    The timer queue. Timers are owned exclusively by the scheduler and
    addressed by TimerHandle. Armed timers are kept in an ordered index
    keyed by (deadline, handle); handles are issued in registration order
    and never reused, so timers due at the same instant always fire in the
    order they were registered and a stale handle can never alias a newer
    timer.

*/

use std::{collections::BTreeSet, fmt};

use crate::{scheduler::TimerContext, slots::SlotHandle, timebase::Timebase};
use fxhash::FxHashMap;
use serde_derive::{Deserialize, Serialize};

pub type TimerCallback = Box<dyn FnMut(&mut TimerContext<'_>, u64)>;

pub const DEFAULT_TIMER_TAG: &str = "timer";

/// Stable timer identity. The inner value is the registration sequence number.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimerHandle(u64);

impl TimerHandle {
    pub fn sequence(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

struct Timer {
    tag: &'static str,
    deadline: Timebase,
    period: Timebase,
    armed_at: Timebase,
    enabled: bool,
    // Persistent timers survive a one-shot firing and wait, disarmed, to be re-armed.
    persistent: bool,
    callback: Option<TimerCallback>,
    param: u64,
    payload: Option<SlotHandle>,
}

impl Timer {
    #[inline]
    fn is_active(&self) -> bool {
        self.enabled && !self.deadline.is_never()
    }
}

/// Everything the scheduler needs to invoke a timer that has come due.
pub struct FiringTimer {
    pub handle: TimerHandle,
    pub tag: &'static str,
    pub due: Timebase,
    pub param: u64,
    pub payload: Option<SlotHandle>,
    pub callback: TimerCallback,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TimerSnapshot {
    pub handle: TimerHandle,
    pub tag: String,
    pub deadline: Timebase,
    pub period: Timebase,
    pub enabled: bool,
    pub persistent: bool,
    pub param: u64,
    pub payload: Option<SlotHandle>,
}

#[derive(Default)]
pub struct TimerQueue {
    timers: FxHashMap<TimerHandle, Timer>,
    order: BTreeSet<(Timebase, TimerHandle)>,
    next_sequence: u64,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_handle(&mut self) -> TimerHandle {
        let handle = TimerHandle(self.next_sequence);
        self.next_sequence += 1;
        handle
    }

    fn index(&mut self, handle: TimerHandle) {
        if let Some(timer) = self.timers.get(&handle) {
            if timer.is_active() {
                self.order.insert((timer.deadline, handle));
            }
        }
    }

    fn unindex(&mut self, handle: TimerHandle) {
        if let Some(timer) = self.timers.get(&handle) {
            self.order.remove(&(timer.deadline, handle));
        }
    }

    /// Register a timer. A `deadline` of [Timebase::NEVER] creates it disarmed.
    pub fn insert(
        &mut self,
        deadline: Timebase,
        period: Timebase,
        callback: TimerCallback,
        param: u64,
        payload: Option<SlotHandle>,
        persistent: bool,
        now: Timebase,
    ) -> TimerHandle {
        let handle = self.next_handle();
        self.timers.insert(
            handle,
            Timer {
                tag: DEFAULT_TIMER_TAG,
                deadline,
                period: Self::checked_period(handle, period),
                armed_at: now,
                enabled: true,
                persistent,
                callback: Some(callback),
                param,
                payload,
            },
        );
        self.index(handle);
        log::trace!("Registered timer {} due at {}", handle, deadline);
        handle
    }

    /// A NEVER period means one-shot. A negative period would re-arm the timer in the past on
    /// every firing and stall time, so it is treated as one-shot too.
    fn checked_period(handle: TimerHandle, period: Timebase) -> Timebase {
        if period < Timebase::ZERO {
            log::warn!("Timer {} given negative period {}, treating it as one-shot", handle, period);
            return Timebase::ZERO;
        }
        if period.is_never() {
            return Timebase::ZERO;
        }
        period
    }

    /// Remove a timer. Unknown and already-fired handles are ignored.
    pub fn cancel(&mut self, handle: TimerHandle) -> bool {
        self.unindex(handle);
        match self.timers.remove(&handle) {
            Some(timer) => {
                log::trace!("Cancelled timer {} ({})", handle, timer.tag);
                true
            }
            None => false,
        }
    }

    /// Re-arm a timer at `instant`, keeping its identity and period.
    pub fn reset(&mut self, handle: TimerHandle, instant: Timebase, now: Timebase) -> bool {
        let period = match self.timers.get(&handle) {
            Some(timer) => timer.period,
            None => return false,
        };
        self.adjust(handle, instant, period, now)
    }

    /// Re-arm a timer at `instant` with a new period.
    pub fn adjust(&mut self, handle: TimerHandle, instant: Timebase, period: Timebase, now: Timebase) -> bool {
        if !self.timers.contains_key(&handle) {
            return false;
        }
        self.unindex(handle);
        if let Some(timer) = self.timers.get_mut(&handle) {
            timer.deadline = instant;
            timer.period = Self::checked_period(handle, period);
            timer.armed_at = now;
            timer.enabled = true;
        }
        self.index(handle);
        true
    }

    /// Enable or disable a timer without forgetting its deadline.
    pub fn enable(&mut self, handle: TimerHandle, enabled: bool) -> bool {
        if !self.timers.contains_key(&handle) {
            return false;
        }
        self.unindex(handle);
        if let Some(timer) = self.timers.get_mut(&handle) {
            timer.enabled = enabled;
        }
        self.index(handle);
        true
    }

    pub fn set_tag(&mut self, handle: TimerHandle, tag: &'static str) {
        if let Some(timer) = self.timers.get_mut(&handle) {
            timer.tag = tag;
        }
    }

    pub fn set_param(&mut self, handle: TimerHandle, param: u64) {
        if let Some(timer) = self.timers.get_mut(&handle) {
            timer.param = param;
        }
    }

    pub fn contains(&self, handle: TimerHandle) -> bool {
        self.timers.contains_key(&handle)
    }

    pub fn is_enabled(&self, handle: TimerHandle) -> bool {
        self.timers.get(&handle).is_some_and(|t| t.is_active())
    }

    pub fn deadline(&self, handle: TimerHandle) -> Option<Timebase> {
        self.timers.get(&handle).map(|t| t.deadline)
    }

    pub fn period(&self, handle: TimerHandle) -> Option<Timebase> {
        self.timers.get(&handle).map(|t| t.period)
    }

    pub fn param(&self, handle: TimerHandle) -> Option<u64> {
        self.timers.get(&handle).map(|t| t.param)
    }

    pub fn tag(&self, handle: TimerHandle) -> Option<&'static str> {
        self.timers.get(&handle).map(|t| t.tag)
    }

    pub fn payload(&self, handle: TimerHandle) -> Option<SlotHandle> {
        self.timers.get(&handle).and_then(|t| t.payload)
    }

    /// Time left until the timer fires. NEVER for disabled or disarmed timers.
    pub fn remaining(&self, handle: TimerHandle, now: Timebase) -> Option<Timebase> {
        self.timers.get(&handle).map(|t| {
            if t.is_active() {
                t.deadline.saturating_sub(now)
            }
            else {
                Timebase::NEVER
            }
        })
    }

    /// Time since the timer was last armed or last fired.
    pub fn elapsed(&self, handle: TimerHandle, now: Timebase) -> Option<Timebase> {
        self.timers.get(&handle).map(|t| now.saturating_sub(t.armed_at))
    }

    /// Earliest deadline among armed, enabled timers.
    #[inline]
    pub fn next_deadline(&self) -> Timebase {
        self.order.first().map_or(Timebase::NEVER, |(deadline, _)| *deadline)
    }

    /// Handles of all timers due at or before `horizon`, in firing order.
    pub fn due(&self, horizon: Timebase) -> Vec<TimerHandle> {
        self.order
            .iter()
            .take_while(|(deadline, _)| *deadline <= horizon)
            .map(|(_, handle)| *handle)
            .collect()
    }

    /// Take a due timer out for firing. Periodic timers are re-armed at `due + period`,
    /// one-shots are disarmed. Returns None if the timer was cancelled, re-armed past
    /// `horizon` or disabled since the due list was built.
    pub fn begin_fire(&mut self, handle: TimerHandle, horizon: Timebase) -> Option<FiringTimer> {
        let timer = self.timers.get(&handle)?;
        if !timer.is_active() || timer.deadline > horizon || timer.callback.is_none() {
            return None;
        }
        self.unindex(handle);
        let timer = self.timers.get_mut(&handle)?;
        let due = timer.deadline;
        if timer.period.is_zero() {
            timer.deadline = Timebase::NEVER;
        }
        else {
            timer.deadline = match due.checked_add(timer.period) {
                Ok(next) => next,
                Err(e) => {
                    log::warn!("Timer {} ({}) cannot be re-armed: {}", handle, timer.tag, e);
                    Timebase::NEVER
                }
            };
        }
        timer.armed_at = due;
        let firing = FiringTimer {
            handle,
            tag: timer.tag,
            due,
            param: timer.param,
            payload: timer.payload,
            callback: timer.callback.take()?,
        };
        self.index(handle);
        Some(firing)
    }

    /// Return a callback after firing. A transient one-shot that was not re-armed by its own
    /// callback is destroyed here.
    pub fn end_fire(&mut self, handle: TimerHandle, callback: TimerCallback) {
        let remove = match self.timers.get_mut(&handle) {
            Some(timer) => {
                if timer.callback.is_none() {
                    timer.callback = Some(callback);
                }
                !timer.persistent && timer.deadline.is_never()
            }
            // Cancelled by its own callback.
            None => false,
        };
        if remove {
            self.cancel(handle);
        }
    }

    /// Disarm a timer whose payload slot has been released.
    pub fn retire_stale(&mut self, handle: TimerHandle) {
        let persistent = match self.timers.get(&handle) {
            Some(timer) => timer.persistent,
            None => return,
        };
        if persistent {
            self.unindex(handle);
            if let Some(timer) = self.timers.get_mut(&handle) {
                timer.deadline = Timebase::NEVER;
            }
        }
        else {
            self.cancel(handle);
        }
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    pub fn armed_count(&self) -> usize {
        self.order.len()
    }

    pub fn clear(&mut self) {
        self.timers.clear();
        self.order.clear();
    }

    /// Timing state of every timer, in handle order. Callbacks are not captured.
    pub fn snapshot(&self) -> Vec<TimerSnapshot> {
        let mut handles: Vec<_> = self.timers.keys().copied().collect();
        handles.sort_unstable();
        handles
            .into_iter()
            .filter_map(|handle| {
                self.timers.get(&handle).map(|t| TimerSnapshot {
                    handle,
                    tag: t.tag.to_string(),
                    deadline: t.deadline,
                    period: t.period,
                    enabled: t.enabled,
                    persistent: t.persistent,
                    param: t.param,
                    payload: t.payload,
                })
            })
            .collect()
    }
}
