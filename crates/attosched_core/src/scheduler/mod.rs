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
    core::scheduler::mod.rs

    The execution scheduler. The scheduler owns the timer queue, the
    registered executable units and the payload slot table, and drives
    them forward in bounded quanta. Each quantum computes a horizon from
    the quantum cap, the earliest timer deadline and the units' event
    hints, runs every unit up to that horizon in priority order, then
    fires every timer that has come due in (deadline, registration) order.
    All of this happens on the calling thread; timer callbacks reach the
    machine only through a TimerContext.

*/

pub mod context;
pub mod snapshot;
pub mod units;

use std::any::Any;

pub use context::TimerContext;
pub use snapshot::{SchedulerSnapshot, UnitSnapshot};
pub use units::UnitSet;

use crate::{
    config::SchedulerConfig,
    error::SchedulerError,
    slots::{SlotHandle, SlotTable},
    timebase::{Timebase, TimebaseError},
    timer::{TimerHandle, TimerQueue},
    unit::{ExecutableUnit, UnitDispatch, UnitId},
};
use serde_derive::{Deserialize, Serialize};
use strum_macros::Display;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Display)]
pub enum SchedulerState {
    Idle,
    Running,
    Advancing,
    Draining,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SessionStatus {
    Continue,
    Aborted,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerStats {
    pub quanta: u64,
    pub timers_fired: u64,
    pub stale_payload_skips: u64,
}

/// What `end_session` did with the state left in the scheduler.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Timers that were already due and fired during the drain.
    pub fired: usize,
    /// Timers dropped without firing.
    pub discarded: usize,
    pub units_released: usize,
    pub slots_released: usize,
}

pub struct Scheduler {
    config: SchedulerConfig,
    quantum_cap: Timebase,
    state: SchedulerState,
    now: Timebase,
    // Highest horizon ever issued. No unit may be ahead of it.
    authorized: Timebase,
    timers: TimerQueue,
    units: UnitSet,
    slots: SlotTable,
    abort: Option<String>,
    stats: SchedulerStats,
}

impl Default for Scheduler {
    fn default() -> Self {
        Scheduler::new(SchedulerConfig::default())
    }
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        let quantum_cap = config.quantum_cap();
        Self {
            config,
            quantum_cap,
            state: SchedulerState::Idle,
            now: Timebase::ZERO,
            authorized: Timebase::ZERO,
            timers: TimerQueue::new(),
            units: UnitSet::default(),
            slots: SlotTable::new(),
            abort: None,
            stats: SchedulerStats::default(),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn quantum_cap(&self) -> Timebase {
        self.quantum_cap
    }

    /// Change the quantum cap. Takes effect from the next quantum.
    pub fn set_quantum_cap(&mut self, cap: Timebase) {
        self.quantum_cap = if cap.is_zero() || cap.is_never() {
            self.config.quantum_cap()
        }
        else {
            cap
        };
    }

    #[inline]
    pub fn now(&self) -> Timebase {
        self.now
    }

    #[inline]
    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// The highest horizon any unit has been allowed to run to.
    pub fn authorized(&self) -> Timebase {
        self.authorized
    }

    pub fn quantum_count(&self) -> u64 {
        self.stats.quanta
    }

    pub fn stats(&self) -> SchedulerStats {
        self.stats
    }

    // ------------------------------------------------------------------------------------
    // Session lifecycle
    // ------------------------------------------------------------------------------------

    /// Begin a session. Global time restarts at zero; units and timers registered while
    /// idle are kept.
    pub fn start_session(&mut self) -> Result<(), SchedulerError> {
        if self.state != SchedulerState::Idle {
            return Err(SchedulerError::InvalidState {
                op:    "start_session",
                state: self.state,
            });
        }
        self.now = Timebase::ZERO;
        self.authorized = Timebase::ZERO;
        self.abort = None;
        self.stats = SchedulerStats::default();
        self.state = SchedulerState::Running;
        log::debug!(
            "Session started with {} units, {} timers, quantum cap {}",
            self.units.len(),
            self.timers.len(),
            self.quantum_cap
        );
        Ok(())
    }

    /// Run one quantum. Returns `SessionStatus::Aborted` once a timer callback has requested
    /// an abort; the quantum in which the request was made still completes.
    ///
    /// A fatal error tears the session down: timers, units and payload slots are dropped and
    /// the scheduler returns to `Idle`.
    pub fn run_quantum(&mut self) -> Result<SessionStatus, SchedulerError> {
        if self.state != SchedulerState::Running {
            return Err(SchedulerError::InvalidState {
                op:    "run_quantum",
                state: self.state,
            });
        }
        if self.abort.is_some() {
            return Ok(SessionStatus::Aborted);
        }

        self.state = SchedulerState::Advancing;
        match self.advance_quantum() {
            Ok(()) => {
                self.state = SchedulerState::Running;
                if self.abort.is_some() {
                    Ok(SessionStatus::Aborted)
                }
                else {
                    Ok(SessionStatus::Continue)
                }
            }
            Err(e) => {
                log::error!("Fatal scheduler error at {}: {}", self.now, e);
                self.teardown();
                Err(e)
            }
        }
    }

    /// Run quanta until global time reaches `until`, the session aborts, or an error occurs.
    pub fn run_until(&mut self, until: Timebase) -> Result<SessionStatus, SchedulerError> {
        while self.now < until {
            if self.run_quantum()? == SessionStatus::Aborted {
                return Ok(SessionStatus::Aborted);
            }
        }
        Ok(SessionStatus::Continue)
    }

    /// End the session. Timers already due at the current time fire once, without units
    /// being advanced; everything else is discarded and all units and payload slots are
    /// released.
    pub fn end_session(&mut self) -> Result<DrainReport, SchedulerError> {
        if self.state != SchedulerState::Running {
            return Err(SchedulerError::InvalidState {
                op:    "end_session",
                state: self.state,
            });
        }
        self.state = SchedulerState::Draining;

        let fired_before = self.stats.timers_fired;
        self.fire_due_timers(self.now);

        let report = DrainReport {
            fired: (self.stats.timers_fired - fired_before) as usize,
            discarded: self.timers.len(),
            units_released: self.units.len(),
            slots_released: self.slots.len(),
        };
        self.teardown();
        log::debug!(
            "Session ended at {}: {} fired, {} discarded, {} units released",
            self.now,
            report.fired,
            report.discarded,
            report.units_released
        );
        Ok(report)
    }

    /// Ask for the session to end after the current quantum. The first reason is kept.
    pub fn request_abort(&mut self, reason: impl Into<String>) {
        if self.abort.is_none() {
            self.abort = Some(reason.into());
        }
    }

    pub fn abort_reason(&self) -> Option<&str> {
        self.abort.as_deref()
    }

    fn teardown(&mut self) {
        self.timers.clear();
        self.units.clear();
        self.slots.clear();
        self.state = SchedulerState::Idle;
    }

    // ------------------------------------------------------------------------------------
    // Quantum
    // ------------------------------------------------------------------------------------

    fn advance_quantum(&mut self) -> Result<(), SchedulerError> {
        let horizon = self.compute_horizon()?;
        if horizon > self.authorized {
            self.authorized = horizon;
        }
        let end = self.advance_units(horizon)?;
        self.now = end;
        self.fire_due_timers(end);
        self.stats.quanta += 1;
        Ok(())
    }

    /// The instant units may run to in this quantum. Never earlier than now, so timers
    /// scheduled in the past fire at this boundary.
    fn compute_horizon(&self) -> Result<Timebase, SchedulerError> {
        let overflow = SchedulerError::TimeOverflow {
            now: self.now,
            cap: self.quantum_cap,
        };
        let cap = match self.now.checked_add(self.quantum_cap) {
            // The cap must bound every quantum; an unbounded horizon is as fatal as a wrapped one.
            Ok(cap) if !cap.is_never() => cap,
            _ => return Err(overflow),
        };
        let mut horizon = cap.min(self.timers.next_deadline());

        for entry in self.units.iter().filter(|e| !e.suspended) {
            let hint = entry.unit.next_event_hint();
            if hint.is_never() {
                continue;
            }
            let cursor = entry.unit.local_time();
            if hint < cursor {
                return Err(SchedulerError::CausalityViolation {
                    unit: entry.unit.name().to_string(),
                    hint,
                    cursor,
                });
            }
            // A hint at or before now has already been honored; a zero length quantum
            // would never get past it.
            if hint > self.now && hint < horizon {
                horizon = hint;
            }
        }
        Ok(horizon.max(self.now))
    }

    /// Advance every unit to `horizon` and return the instant the quantum ends at: the
    /// earliest instant reached by a unit that made progress, or `horizon` if none did.
    fn advance_units(&mut self, horizon: Timebase) -> Result<Timebase, SchedulerError> {
        let mut end: Option<Timebase> = None;

        for entry in self.units.iter_mut().filter(|e| !e.suspended) {
            let before = entry.unit.local_time();
            let reached = entry.unit.advance(horizon);

            if reached < before {
                return Err(SchedulerError::TimeRegression {
                    unit: entry.unit.name().to_string(),
                    reached,
                    cursor: before,
                });
            }
            // A unit left ahead of this horizon by an earlier quantum may stay where it is.
            if reached > horizon.max(before) {
                return Err(SchedulerError::HorizonOvershoot {
                    unit: entry.unit.name().to_string(),
                    reached,
                    horizon,
                });
            }
            if reached > before {
                end = Some(end.map_or(reached, |e| e.min(reached)));
            }
            if let Some(reason) = entry.unit.take_abort_request() {
                if self.abort.is_none() {
                    log::warn!("Unit '{}' requested session abort: {}", entry.unit.name(), reason);
                    self.abort = Some(reason);
                }
            }
        }
        Ok(end.unwrap_or(horizon).max(self.now))
    }

    /// Fire every timer due at or before `end`. The due list is taken once, so timers
    /// created by callbacks in this pass wait for the next boundary.
    fn fire_due_timers(&mut self, end: Timebase) {
        for handle in self.timers.due(end) {
            if let Some(slot) = self.timers.payload(handle) {
                if !self.slots.is_valid(slot) {
                    log::debug!("Timer {} skipped: payload slot {:?} was released", handle, slot);
                    self.timers.retire_stale(handle);
                    self.stats.stale_payload_skips += 1;
                    continue;
                }
            }

            let Some(mut firing) = self.timers.begin_fire(handle, end)
            else {
                continue;
            };
            log::trace!("Firing timer {} ({}) due {} at {}", handle, firing.tag, firing.due, self.now);

            let mut ctx = TimerContext {
                now: self.now,
                due: firing.due,
                handle,
                payload: firing.payload,
                timers: &mut self.timers,
                units: &mut self.units,
                slots: &mut self.slots,
                abort: &mut self.abort,
            };
            (firing.callback)(&mut ctx, firing.param);

            self.timers.end_fire(handle, firing.callback);
            self.stats.timers_fired += 1;
        }
    }

    // ------------------------------------------------------------------------------------
    // Units
    // ------------------------------------------------------------------------------------

    /// Register a unit. Units run in ascending `priority`, ties in registration order. A
    /// unit registered into a running session is resynced to the current time.
    pub fn register_unit(&mut self, unit: impl Into<UnitDispatch>, priority: i32) -> UnitId {
        let mut unit = unit.into();
        if self.state != SchedulerState::Idle {
            unit.resync(self.now);
        }
        self.units.insert(unit, priority)
    }

    pub fn unregister_unit(&mut self, id: UnitId) -> Option<UnitDispatch> {
        self.units.remove(id)
    }

    /// Stop advancing a unit. A suspended unit neither runs nor contributes event hints.
    pub fn suspend_unit(&mut self, id: UnitId) -> bool {
        match self.units.entry_mut(id) {
            Some(entry) => {
                entry.suspended = true;
                true
            }
            None => false,
        }
    }

    /// Resume a suspended unit. Its local time is moved forward to now without executing.
    pub fn resume_unit(&mut self, id: UnitId) -> bool {
        let now = self.now;
        match self.units.entry_mut(id) {
            Some(entry) => {
                if entry.suspended {
                    entry.unit.resync(now);
                    entry.suspended = false;
                }
                true
            }
            None => false,
        }
    }

    pub fn is_suspended(&self, id: UnitId) -> Option<bool> {
        self.units.entry(id).map(|e| e.suspended)
    }

    pub fn unit(&self, id: UnitId) -> Option<&UnitDispatch> {
        self.units.get(id)
    }

    pub fn unit_mut(&mut self, id: UnitId) -> Option<&mut UnitDispatch> {
        self.units.get_mut(id)
    }

    pub fn unit_as<T: Any>(&mut self, id: UnitId) -> Option<&mut T> {
        self.units.get_as::<T>(id)
    }

    pub fn unit_ids(&self) -> Vec<UnitId> {
        self.units.ids()
    }

    pub fn unit_count(&self) -> usize {
        self.units.len()
    }

    // ------------------------------------------------------------------------------------
    // Timers
    // ------------------------------------------------------------------------------------

    /// Schedule a transient timer. A zero `period` makes a one-shot, which is destroyed after
    /// it fires. An `instant` in the past fires at the next quantum boundary.
    pub fn schedule<F>(&mut self, instant: Timebase, period: Timebase, callback: F, param: u64) -> TimerHandle
    where
        F: FnMut(&mut TimerContext<'_>, u64) + 'static,
    {
        self.timers
            .insert(instant, period, Box::new(callback), param, None, false, self.now)
    }

    /// Schedule a transient one-shot `delay` after now. A delay of [Timebase::NEVER] creates a
    /// timer that never fires; a finite delay past the representable range is an error.
    pub fn schedule_after<F>(&mut self, delay: Timebase, callback: F, param: u64) -> Result<TimerHandle, TimebaseError>
    where
        F: FnMut(&mut TimerContext<'_>, u64) + 'static,
    {
        let instant = self.now.checked_add(delay)?;
        Ok(self.schedule(instant, Timebase::ZERO, callback, param))
    }

    /// Schedule a transient timer bound to a payload slot. If the slot is released before
    /// the timer comes due, the timer is skipped instead of fired.
    pub fn schedule_with_payload<F>(
        &mut self,
        instant: Timebase,
        period: Timebase,
        callback: F,
        param: u64,
        payload: SlotHandle,
    ) -> TimerHandle
    where
        F: FnMut(&mut TimerContext<'_>, u64) + 'static,
    {
        self.timers
            .insert(instant, period, Box::new(callback), param, Some(payload), false, self.now)
    }

    /// Allocate a persistent timer. It starts disarmed; arm it with `reset` or `adjust`.
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

    pub fn alloc_with_payload<F>(&mut self, callback: F, param: u64, payload: SlotHandle) -> TimerHandle
    where
        F: FnMut(&mut TimerContext<'_>, u64) + 'static,
    {
        self.timers.insert(
            Timebase::NEVER,
            Timebase::ZERO,
            Box::new(callback),
            param,
            Some(payload),
            true,
            self.now,
        )
    }

    /// Remove a timer. Cancelling an unknown or already fired timer does nothing.
    pub fn cancel(&mut self, handle: TimerHandle) {
        if !self.timers.cancel(handle) {
            log::debug!("cancel(): timer {} not found", handle);
        }
    }

    /// Re-arm a timer at `instant`, keeping its period and its place among same-instant timers.
    pub fn reset(&mut self, handle: TimerHandle, instant: Timebase) {
        if !self.timers.reset(handle, instant, self.now) {
            log::debug!("reset(): timer {} not found", handle);
        }
    }

    pub fn adjust(&mut self, handle: TimerHandle, instant: Timebase, period: Timebase) {
        if !self.timers.adjust(handle, instant, period, self.now) {
            log::debug!("adjust(): timer {} not found", handle);
        }
    }

    pub fn enable(&mut self, handle: TimerHandle, enabled: bool) {
        self.timers.enable(handle, enabled);
    }

    pub fn set_timer_tag(&mut self, handle: TimerHandle, tag: &'static str) {
        self.timers.set_tag(handle, tag);
    }

    pub fn set_param(&mut self, handle: TimerHandle, param: u64) {
        self.timers.set_param(handle, param);
    }

    pub fn is_enabled(&self, handle: TimerHandle) -> bool {
        self.timers.is_enabled(handle)
    }

    pub fn timer_exists(&self, handle: TimerHandle) -> bool {
        self.timers.contains(handle)
    }

    pub fn timer_deadline(&self, handle: TimerHandle) -> Option<Timebase> {
        self.timers.deadline(handle)
    }

    pub fn timer_period(&self, handle: TimerHandle) -> Option<Timebase> {
        self.timers.period(handle)
    }

    pub fn timer_param(&self, handle: TimerHandle) -> Option<u64> {
        self.timers.param(handle)
    }

    pub fn remaining(&self, handle: TimerHandle) -> Option<Timebase> {
        self.timers.remaining(handle, self.now)
    }

    pub fn elapsed(&self, handle: TimerHandle) -> Option<Timebase> {
        self.timers.elapsed(handle, self.now)
    }

    /// Earliest armed deadline, or [Timebase::NEVER].
    pub fn next_deadline(&self) -> Timebase {
        self.timers.next_deadline()
    }

    pub fn timer_count(&self) -> usize {
        self.timers.len()
    }

    // ------------------------------------------------------------------------------------
    // Payloads
    // ------------------------------------------------------------------------------------

    pub fn insert_payload<T: Any>(&mut self, payload: T) -> SlotHandle {
        self.slots.insert(payload)
    }

    /// Release a payload slot. Timers still bound to it are skipped when they come due.
    pub fn release_payload(&mut self, handle: SlotHandle) -> Option<Box<dyn Any>> {
        self.slots.release(handle)
    }

    pub fn payload<T: Any>(&self, handle: SlotHandle) -> Option<&T> {
        self.slots.get::<T>(handle)
    }

    pub fn payload_mut<T: Any>(&mut self, handle: SlotHandle) -> Option<&mut T> {
        self.slots.get_mut::<T>(handle)
    }

    pub fn slots(&self) -> &SlotTable {
        &self.slots
    }

    pub fn slots_mut(&mut self) -> &mut SlotTable {
        &mut self.slots
    }

    /// Capture the timing state of the scheduler, its timers and its units.
    pub fn snapshot(&self) -> SchedulerSnapshot {
        SchedulerSnapshot {
            now: self.now,
            authorized: self.authorized,
            stats: self.stats,
            timers: self.timers.snapshot(),
            units: self
                .units
                .iter()
                .map(|e| UnitSnapshot {
                    id: e.id,
                    name: e.unit.name().to_string(),
                    priority: e.priority,
                    suspended: e.suspended,
                    local_time: e.unit.local_time(),
                })
                .collect(),
        }
    }
}
