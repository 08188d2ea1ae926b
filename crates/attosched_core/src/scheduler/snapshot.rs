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
    core::scheduler::snapshot.rs

    A serializable capture of the scheduler's timing state: global time,
    statistics, every timer's deadline and period and every unit's local
    time. Callbacks and payloads are not captured; restoring them is the
    business of whatever save-state layer consumes the snapshot.

*/

use crate::{
    scheduler::SchedulerStats,
    timebase::Timebase,
    timer::TimerSnapshot,
    unit::UnitId,
};
use serde_derive::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct UnitSnapshot {
    pub id: UnitId,
    pub name: String,
    pub priority: i32,
    pub suspended: bool,
    pub local_time: Timebase,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SchedulerSnapshot {
    pub now: Timebase,
    pub authorized: Timebase,
    pub stats: SchedulerStats,
    pub timers: Vec<TimerSnapshot>,
    pub units: Vec<UnitSnapshot>,
}

impl SchedulerSnapshot {
    /// Timers that will fire at some point, in firing order.
    pub fn armed_timers(&self) -> impl Iterator<Item = &TimerSnapshot> {
        let mut armed: Vec<&TimerSnapshot> = self
            .timers
            .iter()
            .filter(|t| t.enabled && !t.deadline.is_never())
            .collect();
        armed.sort_by_key(|t| (t.deadline, t.handle));
        armed.into_iter()
    }
}
