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
    headless::machine.rs

    A small demonstration machine built on the scheduler: a CPU-like core
    with variable instruction lengths and an interrupt latch, a video beam
    tracker, and a square wave sound generator. A periodic scanline timer
    raises the CPU interrupt, and a per-frame timer bound to a payload
    slot collects frame statistics and retunes the tone.

*/

use std::any::Any;

use attosched_core::{
    scheduler::TimerContext,
    unit::{BeamTracker, ClockedUnit, CycleCore, SoundStream, SquareWave},
    ExecutableUnit,
    Scheduler,
    SchedulerError,
    SlotHandle,
    Timebase,
    TimerHandle,
    UnitId,
};

use crate::config::Machine as MachineConfig;

/// Cycle costs of the demo CPU's instructions, executed round robin.
const INSTRUCTION_CYCLES: [u64; 8] = [4, 8, 3, 12, 4, 2, 15, 6];
/// Cycles taken to service an interrupt.
const IRQ_CYCLES: u64 = 20;

pub const CPU_PRIORITY: i32 = 0;
pub const VIDEO_PRIORITY: i32 = 10;
pub const SOUND_PRIORITY: i32 = 20;

/// A stand-in for a CPU interpreter.
#[derive(Default)]
pub struct DemoCpu {
    pc: usize,
    instructions: u64,
    irq_pending: bool,
    irqs_serviced: u64,
    poll_cycles: u64,
    since_poll: u64,
}

impl DemoCpu {
    pub fn new(poll_cycles: u64) -> Self {
        Self {
            poll_cycles,
            ..Default::default()
        }
    }

    pub fn raise_irq(&mut self) {
        self.irq_pending = true;
    }

    pub fn instructions(&self) -> u64 {
        self.instructions
    }

    pub fn irqs_serviced(&self) -> u64 {
        self.irqs_serviced
    }
}

impl CycleCore for DemoCpu {
    fn execute(&mut self, budget: u64) -> u64 {
        let mut used = 0;
        loop {
            let cost = if self.irq_pending {
                IRQ_CYCLES
            }
            else {
                INSTRUCTION_CYCLES[self.pc]
            };
            if used + cost > budget {
                break;
            }
            used += cost;
            if self.irq_pending {
                self.irq_pending = false;
                self.irqs_serviced += 1;
            }
            else {
                self.pc = (self.pc + 1) % INSTRUCTION_CYCLES.len();
                self.instructions += 1;
            }
        }
        if self.poll_cycles > 0 {
            self.since_poll = (self.since_poll + used) % self.poll_cycles;
        }
        used
    }

    fn cycles_until_event(&self) -> Option<u64> {
        (self.poll_cycles > 0).then(|| self.poll_cycles - self.since_poll)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Collected by the frame timer through its payload slot.
#[derive(Debug, Default)]
pub struct FrameStats {
    pub frames: u64,
    pub last_frame_at: Timebase,
    pub beam_at_frame: (u32, u32),
    pub irqs_at_frame: u64,
}

pub struct DemoMachine {
    pub cpu: UnitId,
    pub video: UnitId,
    pub sound: UnitId,
    pub scanline_timer: TimerHandle,
    pub frame_timer: TimerHandle,
    pub frame_stats: SlotHandle,
    scanlines: u64,
}

impl DemoMachine {
    /// Register the machine's units and timers with `scheduler`.
    pub fn install(scheduler: &mut Scheduler, config: &MachineConfig) -> DemoMachine {
        let cpu = scheduler.register_unit(
            ClockedUnit::new(
                "maincpu",
                config.cpu_clock,
                config.cpu_granularity,
                Box::new(DemoCpu::new(config.cpu_poll_cycles)),
            ),
            CPU_PRIORITY,
        );

        let mut beam = BeamTracker::new("screen", config.video);
        beam.set_vblank_latch(true);
        let scanline_period = beam.scanline_period();
        let frame_period = beam.frame_period();
        let video = scheduler.register_unit(beam, VIDEO_PRIORITY);

        let sound = scheduler.register_unit(
            SoundStream::new(
                "speaker",
                config.sample_rate,
                Box::new(SquareWave {
                    frequency: config.tone_hz,
                    amplitude: 0.25,
                }),
            )
            .with_buffer_len(config.sample_rate as usize),
            SOUND_PRIORITY,
        );

        let scanline_timer = scheduler.schedule(
            scanline_period,
            scanline_period,
            move |ctx, _| {
                if let Some(core) = ctx
                    .unit_as::<ClockedUnit>(cpu)
                    .and_then(|u| u.core_as_mut::<DemoCpu>())
                {
                    core.raise_irq();
                }
            },
            0,
        );
        scheduler.set_timer_tag(scanline_timer, "scanline");

        let frame_stats = scheduler.insert_payload(FrameStats::default());
        let frame_timer = scheduler.alloc_with_payload(
            move |ctx, base_tone| Self::on_frame(ctx, cpu, video, sound, base_tone as u32),
            config.tone_hz as u64,
            frame_stats,
        );
        scheduler.set_timer_tag(frame_timer, "frame");
        scheduler.adjust(frame_timer, frame_period, frame_period);

        log::debug!(
            "Demo machine installed: scanline period {}, frame period {}",
            scanline_period,
            frame_period
        );

        DemoMachine {
            cpu,
            video,
            sound,
            scanline_timer,
            frame_timer,
            frame_stats,
            scanlines: 0,
        }
    }

    fn on_frame(ctx: &mut TimerContext<'_>, cpu: UnitId, video: UnitId, sound: UnitId, base_tone: u32) {
        let now = ctx.now();
        let beam_pos = ctx
            .unit_as::<BeamTracker>(video)
            .map(|beam| (beam.vpos(), beam.hpos()))
            .unwrap_or_default();
        let irqs = ctx
            .unit_as::<ClockedUnit>(cpu)
            .and_then(|u| u.core_as::<DemoCpu>())
            .map(|c| c.irqs_serviced())
            .unwrap_or(0);

        let frames = match ctx.payload::<FrameStats>() {
            Some(stats) => {
                stats.frames += 1;
                stats.last_frame_at = now;
                stats.beam_at_frame = beam_pos;
                stats.irqs_at_frame = irqs;
                stats.frames
            }
            None => return,
        };

        // Step the tone up an octave every 60 frames and back down.
        if let Some(wave) = ctx
            .unit_as::<SoundStream>(sound)
            .and_then(|s| s.source_as_mut::<SquareWave>())
        {
            wave.frequency = if (frames / 60) % 2 == 0 { base_tone } else { base_tone * 2 };
        }
    }

    pub fn frames(&self, scheduler: &Scheduler) -> u64 {
        scheduler
            .payload::<FrameStats>(self.frame_stats)
            .map(|s| s.frames)
            .unwrap_or(0)
    }

    pub fn frame_stats<'a>(&self, scheduler: &'a Scheduler) -> Option<&'a FrameStats> {
        scheduler.payload::<FrameStats>(self.frame_stats)
    }

    /// Take the samples produced since the last call.
    pub fn drain_audio(&mut self, scheduler: &mut Scheduler) -> usize {
        scheduler
            .unit_as::<SoundStream>(self.sound)
            .map(|s| s.drain_samples().len())
            .unwrap_or(0)
    }

    /// Scanlines elapsed according to the scanline timer's schedule.
    pub fn update_scanlines(&mut self, scheduler: &Scheduler) -> u64 {
        if let (Some(next), Some(period)) = (
            scheduler.timer_deadline(self.scanline_timer),
            scheduler.timer_period(self.scanline_timer),
        ) {
            if !period.is_zero() {
                // The timer is armed for the next scanline; the count so far is one less.
                self.scanlines = next
                    .checked_sub(period)
                    .ok()
                    .and_then(|t| t.as_attoseconds().checked_div(period.as_attoseconds()))
                    .map(|n| n.max(0) as u64)
                    .unwrap_or(self.scanlines);
            }
        }
        self.scanlines
    }

    pub fn cpu_state(&self, scheduler: &mut Scheduler) -> Option<(u64, u64, u64)> {
        let unit = scheduler.unit_as::<ClockedUnit>(self.cpu)?;
        let total = unit.total_cycles();
        let cpu = unit.core_as::<DemoCpu>()?;
        Some((total, cpu.instructions(), cpu.irqs_serviced()))
    }

    pub fn beam_state(&self, scheduler: &mut Scheduler) -> Option<(u64, u64)> {
        let beam = scheduler.unit_as::<BeamTracker>(self.video)?;
        Some((beam.frame_number(), beam.vblank_count()))
    }

    pub fn sound_state(&self, scheduler: &Scheduler) -> Option<(Timebase, u64)> {
        let stream = scheduler.unit(self.sound)?.downcast_ref::<SoundStream>()?;
        Some((stream.local_time(), stream.dropped()))
    }
}

/// Run `machine` until `until`, or until the scheduler stops.
pub fn run_frames(
    scheduler: &mut Scheduler,
    machine: &mut DemoMachine,
    until: Timebase,
) -> Result<u64, SchedulerError> {
    let mut frames = machine.frames(scheduler);
    while scheduler.now() < until {
        scheduler.run_quantum()?;
        let now_frames = machine.frames(scheduler);
        if now_frames != frames {
            frames = now_frames;
            machine.drain_audio(scheduler);
        }
    }
    Ok(frames)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Machine as MachineConfig;
    use attosched_core::{unit::VideoTiming, SchedulerConfig};

    fn small_machine() -> MachineConfig {
        MachineConfig {
            cpu_clock: 1_000_000,
            cpu_granularity: 1,
            cpu_poll_cycles: 0,
            // 100 pixels per line, 10 lines, 1 pixel per microsecond: 1ms frames.
            video: VideoTiming {
                pixel_clock:  1_000_000,
                htotal:       100,
                vtotal:       10,
                vblank_start: 8,
            },
            sample_rate: 8_000,
            tone_hz: 440,
        }
    }

    #[test]
    fn demo_cpu_stops_before_overrunning_budget() {
        let mut cpu = DemoCpu::new(0);
        // 4 + 8 + 3 = 15, the next instruction costs 12.
        assert_eq!(cpu.execute(20), 15);
        assert_eq!(cpu.instructions(), 3);
        cpu.raise_irq();
        assert_eq!(cpu.execute(19), 0);
        assert_eq!(cpu.execute(20), 20);
        assert_eq!(cpu.irqs_serviced(), 1);
    }

    #[test]
    fn frame_timer_sees_beam_at_frame_start() {
        let mut scheduler = Scheduler::new(SchedulerConfig::default());
        let mut machine = DemoMachine::install(&mut scheduler, &small_machine());
        scheduler.start_session().unwrap();

        let frames = run_frames(&mut scheduler, &mut machine, Timebase::from_msec(5)).unwrap();
        assert_eq!(frames, 5);

        let stats = machine.frame_stats(&scheduler).unwrap();
        assert_eq!(stats.last_frame_at, Timebase::from_msec(5));
        assert_eq!(stats.beam_at_frame, (0, 0));
        // One interrupt per scanline, each serviced before the next is raised.
        let (_, _, irqs) = machine.cpu_state(&mut scheduler).unwrap();
        assert!(irqs >= 49);
        assert_eq!(machine.update_scanlines(&scheduler), 50);
        let (frame, vblanks) = machine.beam_state(&mut scheduler).unwrap();
        assert_eq!(frame, 5);
        assert_eq!(vblanks, 5);
    }
}
