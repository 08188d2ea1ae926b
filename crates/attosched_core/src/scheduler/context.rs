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
    core::scheduler::context.rs

    TimerContext is the window a firing timer callback gets onto the
    machine: the current time, the timer API, the registered units and
    payload slots. Callbacks never see the scheduler itself, so they
    cannot start a nested quantum or tear the session down; the strongest
    thing they can do is request an abort, which the scheduler reports
    once the quantum completes.

*/

use std::any::Any;

use crate::{
    scheduler::units::UnitSet,
    slots::{SlotHandle, SlotTable},
    timebase::{Timebase, TimebaseError},
    timer::{TimerHandle, TimerQueue},
    unit::{UnitDispatch, UnitId},
};

pub struct TimerContext<'a> {
    pub(crate) now: Timebase,
    pub(crate) due: Timebase,
    pub(crate) handle: TimerHandle,
    pub(crate) payload: Option<SlotHandle>,
    pub(crate) timers: &'a mut TimerQueue,
    pub(crate) units: &'a mut UnitSet,
    pub(crate) slots: &'a mut SlotTable,
    pub(crate) abort: &'a mut Option<String>,
}

impl<'a> TimerContext<'a> {
    /// Current global time. All units have been advanced to (or as close as their
    /// granularity allows to) this instant.
    #[inline]
    pub fn now(&self) -> Timebase {
        self.now
    }

    /// The instant this timer was due. Equal to `now()` unless the timer was scheduled in the
    /// past or became due during a quantum that ended later.
    #[inline]
    pub fn due(&self) -> Timebase {
        self.due
    }

    /// Handle of the timer being fired.
    #[inline]
    pub fn handle(&self) -> TimerHandle {
        self.handle
    }

    /// Schedule a transient timer. It is never fired within the current firing pass, even
    /// when `instant` is at or before now; it fires at the next boundary.
    pub fn schedule<F>(&mut self, instant: Timebase, period: Timebase, callback: F, param: u64) -> TimerHandle
    where
        F: FnMut(&mut TimerContext<'_>, u64) + 'static,
    {
        self.timers
            .insert(instant, period, Box::new(callback), param, None, false, self.now)
    }

    /// Schedule a transient one-shot `delay` after now. Fails if now plus `delay` is past the
    /// representable range.
    pub fn schedule_after<F>(&mut self, delay: Timebase, callback: F, param: u64) -> Result<TimerHandle, TimebaseError>
    where
        F: FnMut(&mut TimerContext<'_>, u64) + 'static,
    {
        let instant = self.now.checked_add(delay)?;
        Ok(self.schedule(instant, Timebase::ZERO, callback, param))
    }

    /// Allocate a persistent, disarmed timer.
    pub fn alloc<F>(&mut self, callback: F, param: u64) -> TimerHandle
    where
        F: FnMut(&mut TimerContext<'_>, u64) + 'static,
    {
        self.timers.insert(
            Timebase::NEVER,
            Timebase::ZERO,
            Box::new(callback),
            param,
            None,
            true,
            self.now,
        )
    }

    pub fn cancel(&mut self, handle: TimerHandle) {
        self.timers.cancel(handle);
    }

    pub fn reset(&mut self, handle: TimerHandle, instant: Timebase) {
        self.timers.reset(handle, instant, self.now);
    }

    pub fn adjust(&mut self, handle: TimerHandle, instant: Timebase, period: Timebase) {
        self.timers.adjust(handle, instant, period, self.now);
    }

    pub fn enable(&mut self, handle: TimerHandle, enabled: bool) {
        self.timers.enable(handle, enabled);
    }

    pub fn set_param(&mut self, handle: TimerHandle, param: u64) {
        self.timers.set_param(handle, param);
    }

    pub fn deadline(&self, handle: TimerHandle) -> Option<Timebase> {
        self.timers.deadline(handle)
    }

    pub fn unit(&self, id: UnitId) -> Option<&UnitDispatch> {
        self.units.get(id)
    }

    pub fn unit_mut(&mut self, id: UnitId) -> Option<&mut UnitDispatch> {
        self.units.get_mut(id)
    }

    /// Typed access to a unit, e.g. `ctx.unit_as::<ClockedUnit>(cpu)`.
    pub fn unit_as<T: Any>(&mut self, id: UnitId) -> Option<&mut T> {
        self.units.get_as::<T>(id)
    }

    /// The payload bound to this timer, if it has one of type `T`. Stale payloads never reach
    /// a callback; the scheduler skips the timer instead.
    pub fn payload<T: Any>(&mut self) -> Option<&mut T> {
        let handle = self.payload?;
        self.slots.get_mut::<T>(handle)
    }

    pub fn slots(&mut self) -> &mut SlotTable {
        &mut *self.slots
    }

    /// Ask for the session to end. The scheduler finishes the current quantum and reports
    /// `SessionStatus::Aborted`. The first reason given is kept.
    pub fn request_abort(&mut self, reason: impl Into<String>) {
        if self.abort.is_none() {
            let reason = reason.into();
            log::warn!("Timer {} requested session abort: {}", self.handle, reason);
            *self.abort = Some(reason);
        }
    }

    pub fn abort_requested(&self) -> bool {
        self.abort.is_some()
    }
}
