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
    core::unit::mod.rs

    Defines the ExecutableUnit trait, implemented by every device the
    scheduler drives forward in time: CPU cores, sound generators, the
    video beam tracker, or anything a driver supplies. The scheduler only
    needs two things from a unit: advance it to an instant, and ask when
    it next needs control.

*/

pub mod beam;
pub mod clocked;
pub mod sound;

use std::{any::Any, fmt};

pub use beam::{BeamTracker, VideoTiming};
pub use clocked::{ClockedUnit, CycleCore};
pub use sound::{AudioSample, SampleSource, SoundStream, SquareWave};

use crate::timebase::Timebase;
use enum_dispatch::enum_dispatch;
use serde_derive::{Deserialize, Serialize};

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UnitId(pub(crate) u32);

impl UnitId {
    pub fn index(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unit{}", self.0)
    }
}

#[enum_dispatch]
pub enum UnitDispatch {
    ClockedUnit,
    BeamTracker,
    SoundStream,
    Custom(Box<dyn ExecutableUnit>),
}

#[enum_dispatch(UnitDispatch)]
pub trait ExecutableUnit {
    fn name(&self) -> &str;

    /// The instant this unit has executed up to.
    fn local_time(&self) -> Timebase;

    /// Run until `target`, or the closest instant at or before `target` that the unit's
    /// granularity allows. Returns the instant actually reached. Must never return an
    /// instant past `target` unless the unit was already there.
    fn advance(&mut self, target: Timebase) -> Timebase;

    /// Earliest instant at which the unit needs control again, such as a pending interrupt
    /// latch. [Timebase::NEVER] if it has nothing pending.
    fn next_event_hint(&self) -> Timebase {
        Timebase::NEVER
    }

    /// Move the local time forward to `instant` without executing anything. Used when a
    /// suspended unit is resumed or a unit is registered into a running session.
    fn resync(&mut self, instant: Timebase);

    /// Polled after each `advance`. A unit that hits a condition it cannot emulate past
    /// returns a reason here; the session is then aborted once the quantum completes.
    fn take_abort_request(&mut self) -> Option<String> {
        None
    }

    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<U: ExecutableUnit + ?Sized> ExecutableUnit for Box<U> {
    fn name(&self) -> &str {
        (**self).name()
    }
    fn local_time(&self) -> Timebase {
        (**self).local_time()
    }
    fn advance(&mut self, target: Timebase) -> Timebase {
        (**self).advance(target)
    }
    fn next_event_hint(&self) -> Timebase {
        (**self).next_event_hint()
    }
    fn resync(&mut self, instant: Timebase) {
        (**self).resync(instant)
    }
    fn take_abort_request(&mut self) -> Option<String> {
        (**self).take_abort_request()
    }
    fn as_any(&self) -> &dyn Any {
        (**self).as_any()
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        (**self).as_any_mut()
    }
}

impl UnitDispatch {
    /// Wrap a driver-defined unit.
    pub fn custom<U: ExecutableUnit + 'static>(unit: U) -> Self {
        UnitDispatch::Custom(Box::new(unit))
    }

    /// Typed access to the concrete unit, through any variant.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    pub fn downcast_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.as_any_mut().downcast_mut::<T>()
    }
}

impl fmt::Debug for UnitDispatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitDispatch")
            .field("name", &self.name())
            .field("local_time", &self.local_time())
            .finish()
    }
}
