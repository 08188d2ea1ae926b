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
    core::error.rs

    Error types for the scheduler. Only fatal consistency errors are
    reported here; stale handles and past-due timers are defined no-ops,
    and callback-requested aborts are reported through SessionStatus.

*/

use crate::{scheduler::SchedulerState, timebase::Timebase};
use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("Unit '{unit}' reported next event at {hint}, before its own local time {cursor}")]
    CausalityViolation {
        unit:   String,
        hint:   Timebase,
        cursor: Timebase,
    },
    #[error("Unit '{unit}' advanced to {reached}, past the authorized horizon {horizon}")]
    HorizonOvershoot {
        unit:    String,
        reached: Timebase,
        horizon: Timebase,
    },
    #[error("Unit '{unit}' moved backwards in time from {cursor} to {reached}")]
    TimeRegression {
        unit:    String,
        reached: Timebase,
        cursor:  Timebase,
    },
    #[error("Emulated time overflowed at {now} (quantum cap {cap})")]
    TimeOverflow { now: Timebase, cap: Timebase },
    #[error("Operation '{op}' is not valid while the scheduler is {state}")]
    InvalidState {
        op:    &'static str,
        state: SchedulerState,
    },
}

impl SchedulerError {
    /// True for the errors that end a session: causality violations, overshoot,
    /// regression and time overflow.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, SchedulerError::InvalidState { .. })
    }
}
