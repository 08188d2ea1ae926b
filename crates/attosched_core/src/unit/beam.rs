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
    core::unit::beam.rs

    Tracks the position of the video beam. The tracker advances one pixel
    clock at a time and can report the beam position at its local time,
    the time until the beam reaches a given position, and whether it is
    inside vertical blank. When the vblank latch is armed it asks the
    scheduler for control at the start of each vblank, so a driver can
    latch frame state at exactly that instant.

*/

use std::any::Any;

use crate::{timebase::Timebase, unit::ExecutableUnit};
use serde_derive::{Deserialize, Serialize};

#[derive(Copy, Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct VideoTiming {
    pub pixel_clock: u32,
    pub htotal: u32,
    pub vtotal: u32,
    /// First scanline of vertical blank.
    pub vblank_start: u32,
}

impl VideoTiming {
    #[inline]
    fn pixels_per_frame(&self) -> u64 {
        self.htotal as u64 * self.vtotal as u64
    }
}

pub struct BeamTracker {
    name: String,
    timing: VideoTiming,
    base: Timebase,
    // Pixel clocks elapsed since `base`.
    pixels: u64,
    // Frames completed before `base`, carried across resyncs.
    base_frame: u64,
    base_pixel_in_frame: u64,
    vblank_latch: bool,
    vblank_count: u64,
}

impl BeamTracker {
    pub fn new(name: impl Into<String>, timing: VideoTiming) -> Self {
        let mut timing = timing;
        timing.pixel_clock = timing.pixel_clock.max(1);
        timing.htotal = timing.htotal.max(1);
        timing.vtotal = timing.vtotal.max(1);
        timing.vblank_start = timing.vblank_start.min(timing.vtotal - 1);
        Self {
            name: name.into(),
            timing,
            base: Timebase::ZERO,
            pixels: 0,
            base_frame: 0,
            base_pixel_in_frame: 0,
            vblank_latch: false,
            vblank_count: 0,
        }
    }

    pub fn timing(&self) -> &VideoTiming {
        &self.timing
    }

    /// Arm or disarm the vblank latch. While armed, the tracker hints the start of each
    /// vertical blank to the scheduler.
    pub fn set_vblank_latch(&mut self, armed: bool) {
        self.vblank_latch = armed;
    }

    /// Number of vblank starts the beam has crossed.
    pub fn vblank_count(&self) -> u64 {
        self.vblank_count
    }

    #[inline]
    fn absolute_pixel(&self) -> u64 {
        self.base_pixel_in_frame + self.pixels
    }

    pub fn frame_number(&self) -> u64 {
        self.base_frame + self.absolute_pixel() / self.timing.pixels_per_frame()
    }

    pub fn hpos(&self) -> u32 {
        ((self.absolute_pixel() % self.timing.pixels_per_frame()) % self.timing.htotal as u64) as u32
    }

    pub fn vpos(&self) -> u32 {
        ((self.absolute_pixel() % self.timing.pixels_per_frame()) / self.timing.htotal as u64) as u32
    }

    pub fn in_vblank(&self) -> bool {
        self.vpos() >= self.timing.vblank_start
    }

    /// Duration of `n` pixel clocks.
    pub fn pixel_time(&self, n: u64) -> Timebase {
        Timebase::from_ticks(n, self.timing.pixel_clock).unwrap_or(Timebase::NEVER)
    }

    pub fn scanline_period(&self) -> Timebase {
        self.pixel_time(self.timing.htotal as u64)
    }

    pub fn frame_period(&self) -> Timebase {
        self.pixel_time(self.timing.pixels_per_frame())
    }

    /// Pixels from the current position until the beam next reaches (`vpos`, `hpos`).
    /// A position equal to the current one is a whole frame away.
    fn pixels_until_pos(&self, vpos: u32, hpos: u32) -> u64 {
        let frame = self.timing.pixels_per_frame();
        let vpos = vpos.min(self.timing.vtotal - 1) as u64;
        let hpos = hpos.min(self.timing.htotal - 1) as u64;
        let target = vpos * self.timing.htotal as u64 + hpos;
        let current = self.absolute_pixel() % frame;
        if target > current {
            target - current
        }
        else {
            frame - current + target
        }
    }

    /// Time from the tracker's local time until the beam next reaches (`vpos`, `hpos`).
    pub fn time_until_pos(&self, vpos: u32, hpos: u32) -> Timebase {
        self.pixel_time(self.pixels_until_pos(vpos, hpos))
    }

    fn time_at(&self, pixels: u64) -> Timebase {
        match Timebase::from_ticks(pixels, self.timing.pixel_clock).and_then(|t| self.base.checked_add(t)) {
            Ok(t) => t,
            Err(_) => Timebase::NEVER,
        }
    }
}

impl ExecutableUnit for BeamTracker {
    fn name(&self) -> &str {
        &self.name
    }

    fn local_time(&self) -> Timebase {
        self.time_at(self.pixels)
    }

    fn advance(&mut self, target: Timebase) -> Timebase {
        if target <= self.base {
            return self.local_time();
        }
        let reachable = target
            .checked_sub(self.base)
            .and_then(|span| span.as_ticks(self.timing.pixel_clock))
            .unwrap_or(self.pixels);
        if reachable <= self.pixels {
            return self.local_time();
        }

        // Count vblank starts crossed in (pixels, reachable].
        let frame = self.timing.pixels_per_frame();
        let vblank_pixel = self.timing.vblank_start as u64 * self.timing.htotal as u64;
        let crossings = |p: u64| {
            let abs = self.base_pixel_in_frame + p;
            abs / frame + u64::from(abs % frame >= vblank_pixel)
        };
        let crossed = crossings(reachable) - crossings(self.pixels);
        self.vblank_count += crossed;
        self.pixels = reachable;
        self.local_time()
    }

    fn next_event_hint(&self) -> Timebase {
        if !self.vblank_latch {
            return Timebase::NEVER;
        }
        let until = self.pixels_until_pos(self.timing.vblank_start, 0);
        self.time_at(self.pixels.saturating_add(until))
    }

    fn resync(&mut self, instant: Timebase) {
        if instant <= self.local_time() {
            return;
        }
        // Carry the beam position forward as if the beam had kept running.
        let skipped = instant
            .checked_sub(self.local_time())
            .and_then(|span| span.as_ticks(self.timing.pixel_clock))
            .unwrap_or(0);
        let frame = self.timing.pixels_per_frame();
        let abs = self.absolute_pixel() + skipped;
        self.base_frame += abs / frame;
        self.base_pixel_in_frame = abs % frame;
        self.base = instant;
        self.pixels = 0;
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
