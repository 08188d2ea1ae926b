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
    core::config.rs

    Scheduler and profiler configuration. These structures are
    deserialized by a frontend from its configuration file; the core never
    reads files itself.

*/

use crate::timebase::Timebase;
use serde_derive::{Deserialize, Serialize};

pub const DEFAULT_QUANTUM_CAP_US: u64 = 1_000;
/// Largest accepted quantum cap: one minute of emulated time.
pub const MAX_QUANTUM_CAP_US: u64 = 60_000_000;
pub const DEFAULT_PROFILER_TEXT_INTERVAL_MS: u64 = 500;

const fn _default_quantum_cap_us() -> u64 {
    DEFAULT_QUANTUM_CAP_US
}
const fn _default_text_interval_ms() -> u64 {
    DEFAULT_PROFILER_TEXT_INTERVAL_MS
}
const fn _default_true() -> bool {
    true
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct SchedulerConfig {
    /// Upper bound on a single quantum, in microseconds of emulated time. Guarantees the
    /// outer loop regains control periodically even when no timer is pending.
    #[serde(default = "_default_quantum_cap_us")]
    pub quantum_cap_us: u64,
    #[serde(default)]
    pub profiler: ProfilerConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            quantum_cap_us: DEFAULT_QUANTUM_CAP_US,
            profiler: ProfilerConfig::default(),
        }
    }
}

impl SchedulerConfig {
    /// The quantum cap as a Timebase, clamped to `[1us, MAX_QUANTUM_CAP_US]` so the scheduler
    /// always makes progress and always yields.
    pub fn quantum_cap(&self) -> Timebase {
        Timebase::from_usec(self.quantum_cap_us.clamp(1, MAX_QUANTUM_CAP_US))
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct ProfilerConfig {
    #[serde(default = "_default_true")]
    pub enabled: bool,
    /// Minimum emulated time between regenerations of the profiler report.
    #[serde(default = "_default_text_interval_ms")]
    pub text_interval_ms: u64,
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            text_interval_ms: DEFAULT_PROFILER_TEXT_INTERVAL_MS,
        }
    }
}

impl ProfilerConfig {
    pub fn text_interval(&self) -> Timebase {
        Timebase::from_msec(self.text_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let config: SchedulerConfig = toml::from_str("").unwrap();
        assert_eq!(config, SchedulerConfig::default());

        let config: SchedulerConfig = toml::from_str("quantum_cap_us = 0\n[profiler]\nenabled = false\n").unwrap();
        assert_eq!(config.quantum_cap(), Timebase::from_usec(1));
        assert!(!config.profiler.enabled);
        assert_eq!(config.profiler.text_interval(), Timebase::from_msec(500));
    }

    #[test]
    fn oversized_cap_is_clamped() {
        let config = SchedulerConfig {
            quantum_cap_us: 1_000_000_000_000_000,
            ..Default::default()
        };
        assert_eq!(config.quantum_cap(), Timebase::from_usec(MAX_QUANTUM_CAP_US));
        assert!(!config.quantum_cap().is_never());
    }
}
