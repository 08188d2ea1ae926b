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
    headless::lib.rs

    Headless frontend. Reads the configuration, builds the demonstration
    machine and runs it for a fixed amount of emulated time as fast as the
    host allows, then prints a report.

*/

//! AttoSched headless front-end main library component.

#![forbid(unsafe_code)]

pub mod config;
pub mod machine;

use std::time::Instant;

use anyhow::Context;
use colored::Colorize;

use attosched_core::{ProfileCategory, Profiler, Scheduler, SessionStatus, Timebase};

use crate::{
    config::ConfigFileParams,
    machine::{DemoMachine, CPU_PRIORITY},
};

pub const DEFAULT_CONFIG_PATH: &str = "./attosched.toml";

/// Profiler category for time spent inside `run_quantum`.
const PROFILE_QUANTUM: ProfileCategory = ProfileCategory::User(1);

#[derive(Debug, Default)]
pub struct RunSummary {
    pub emulated: Timebase,
    pub host_seconds: f64,
    pub frames: u64,
    pub samples: usize,
    pub aborted: Option<String>,
    pub profile: String,
}

pub fn run() -> anyhow::Result<()> {
    // First we resolve the configuration by parsing the configuration toml and merging it with
    // command line arguments.
    let config = config::read_config_file(DEFAULT_CONFIG_PATH).with_context(|| {
        format!(
            "Please create {} in the working directory or provide the path to a configuration file with --config_file.",
            DEFAULT_CONFIG_PATH
        )
    })?;

    // RUST_LOG, when set, takes precedence over the configured level.
    env_logger::Builder::new()
        .filter_level(config.emulator.log_level.to_filter())
        .parse_default_env()
        .init();

    let summary = run_machine(&config)?;
    if config.emulator.print_report {
        print_summary(&summary);
    }
    Ok(())
}

/// Build the demonstration machine from `config` and run it to completion.
pub fn run_machine(config: &ConfigFileParams) -> anyhow::Result<RunSummary> {
    let mut scheduler = Scheduler::new(config.scheduler.clone());
    let mut profiler = Profiler::new(&config.scheduler.profiler);
    let mut machine = DemoMachine::install(&mut scheduler, &config.machine);

    let end = Timebase::from_seconds(config.emulator.run_seconds);
    log::info!(
        "Running for {} of emulated time, quantum cap {}, cpu priority {}",
        end,
        scheduler.quantum_cap(),
        CPU_PRIORITY
    );

    scheduler.start_session()?;
    let host_start = Instant::now();

    let mut summary = RunSummary::default();
    let mut last_frames = 0;
    let mut last_text = String::new();

    while scheduler.now() < end {
        let status = {
            let _scope = profiler.scope(PROFILE_QUANTUM);
            scheduler.run_quantum()
        };
        match status.context("Scheduler stopped with a fatal error")? {
            SessionStatus::Continue => {}
            SessionStatus::Aborted => {
                let reason = scheduler.abort_reason().unwrap_or("unknown").to_string();
                log::warn!("Session aborted at {}: {}", scheduler.now(), reason);
                summary.aborted = Some(reason);
                break;
            }
        }

        // Frame boundary: present audio and video, refresh the profile.
        let frames = machine.frames(&scheduler);
        if frames != last_frames {
            last_frames = frames;
            {
                let _scope = profiler.scope(ProfileCategory::Sound);
                summary.samples += machine.drain_audio(&mut scheduler);
            }
            {
                let _scope = profiler.scope(ProfileCategory::Video);
                machine.update_scanlines(&scheduler);
            }
            let text = profiler.text(scheduler.now());
            if text != last_text {
                log::debug!("Profile at {}:\n{}", scheduler.now(), text);
                last_text = text.to_string();
            }
        }
    }

    summary.emulated = scheduler.now();
    summary.host_seconds = host_start.elapsed().as_secs_f64();
    summary.frames = last_frames;
    summary.profile = last_text;

    if config.emulator.print_report {
        print_machine_state(&mut scheduler, &mut machine);
    }

    let drain = scheduler.end_session()?;
    log::info!(
        "Session drained: {} fired, {} discarded, {} units released",
        drain.fired,
        drain.discarded,
        drain.units_released
    );
    Ok(summary)
}

fn print_machine_state(scheduler: &mut Scheduler, machine: &mut DemoMachine) {
    let stats = scheduler.stats();
    println!("{}", "Scheduler".bold());
    println!("  quanta:             {}", stats.quanta);
    println!("  timers fired:       {}", stats.timers_fired);
    println!("  stale payload skips: {}", stats.stale_payload_skips);

    if let Some((cycles, instructions, irqs)) = machine.cpu_state(scheduler) {
        println!("{}", "CPU".bold());
        println!("  cycles:             {}", cycles);
        println!("  instructions:       {}", instructions);
        println!("  interrupts:         {}", irqs);
    }
    if let Some((frame, vblanks)) = machine.beam_state(scheduler) {
        println!("{}", "Video".bold());
        println!("  frame:              {}", frame);
        println!("  vblanks:            {}", vblanks);
        println!("  scanlines:          {}", machine.update_scanlines(scheduler));
    }
    if let Some((local, dropped)) = machine.sound_state(scheduler) {
        println!("{}", "Sound".bold());
        println!("  local time:         {}", local);
        println!("  dropped samples:    {}", dropped);
    }
}

fn print_summary(summary: &RunSummary) {
    let emulated = summary.emulated.as_double();
    let speed = if summary.host_seconds > 0.0 {
        emulated / summary.host_seconds
    }
    else {
        0.0
    };
    println!("{}", "Run complete".green().bold());
    println!("  emulated time:      {}", summary.emulated);
    println!("  host time:          {:.3}s ({:.1}x realtime)", summary.host_seconds, speed);
    println!("  frames:             {}", summary.frames);
    println!("  audio samples:      {}", summary.samples);
    if let Some(reason) = &summary.aborted {
        println!("  {} {}", "aborted:".red(), reason);
    }
    if !summary.profile.is_empty() {
        println!("{}", "Profile".bold());
        for line in summary.profile.lines() {
            println!("  {}", line.cyan());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{read_config, CmdLineArgs};

    #[test]
    fn short_run_completes() {
        let config = read_config(
            "[emulator]\nrun_seconds = 0.05\nprint_report = false\n",
            CmdLineArgs::default(),
        )
        .unwrap();
        let summary = run_machine(&config).unwrap();
        assert!(summary.emulated >= Timebase::from_msec(50));
        assert!(summary.aborted.is_none());
        // A CGA frame is just under 1/59.9s.
        assert_eq!(summary.frames, 2);
        assert!(summary.samples > 0);
    }
}
