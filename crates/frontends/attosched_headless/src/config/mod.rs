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
    headless::config::mod.rs

    Configuration for the headless frontend. The configuration is read
    from a TOML file and then overlaid with any command line arguments.

*/

mod args;

use std::path::Path;

pub use args::CmdLineArgs;
#[cfg(feature = "use_bpaf")]
pub use args::cli_args;

use attosched_core::{
    config::{SchedulerConfig, MAX_QUANTUM_CAP_US},
    unit::VideoTiming,
};
use cfg_if::cfg_if;
use serde_derive::Deserialize;
use strum_macros::{Display, EnumString};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Couldn't read configuration file {path}: {source}")]
    Io {
        path:   String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse configuration file. There may be a typo or otherwise invalid toml:\n{0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum LogLevel {
    Off,
    Error,
    #[default]
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn to_filter(self) -> log::LevelFilter {
        match self {
            LogLevel::Off => log::LevelFilter::Off,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

const fn _default_true() -> bool {
    true
}
const fn _default_run_seconds() -> f64 {
    1.0
}
const fn _default_cpu_clock() -> u32 {
    4_772_727
}
const fn _default_one() -> u64 {
    1
}
const fn _default_poll_cycles() -> u64 {
    10_000
}
const fn _default_sample_rate() -> u32 {
    48_000
}
const fn _default_tone_hz() -> u32 {
    440
}
fn _default_video() -> VideoTiming {
    // CGA-like timing: 14.318MHz dot clock, 912x262, vblank from line 200.
    VideoTiming {
        pixel_clock:  14_318_180,
        htotal:       912,
        vtotal:       262,
        vblank_start: 200,
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct Emulator {
    #[serde(default)]
    pub log_level: LogLevel,
    #[serde(default = "_default_run_seconds")]
    pub run_seconds: f64,
    #[serde(default = "_default_true")]
    pub print_report: bool,
}

impl Default for Emulator {
    fn default() -> Self {
        Self {
            log_level: LogLevel::default(),
            run_seconds: _default_run_seconds(),
            print_report: true,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct Machine {
    #[serde(default = "_default_cpu_clock")]
    pub cpu_clock: u32,
    /// Smallest number of cycles the CPU can be stepped by.
    #[serde(default = "_default_one")]
    pub cpu_granularity: u64,
    /// The CPU asks for a scheduler boundary every this many cycles.
    #[serde(default = "_default_poll_cycles")]
    pub cpu_poll_cycles: u64,
    #[serde(default = "_default_video")]
    pub video: VideoTiming,
    #[serde(default = "_default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "_default_tone_hz")]
    pub tone_hz: u32,
}

impl Default for Machine {
    fn default() -> Self {
        Self {
            cpu_clock: _default_cpu_clock(),
            cpu_granularity: 1,
            cpu_poll_cycles: _default_poll_cycles(),
            video: _default_video(),
            sample_rate: _default_sample_rate(),
            tone_hz: _default_tone_hz(),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ConfigFileParams {
    #[serde(default)]
    pub emulator: Emulator,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub machine: Machine,
}

impl ConfigFileParams {
    pub fn overlay(&mut self, shell_args: CmdLineArgs) {
        if let Some(seconds) = shell_args.seconds {
            self.emulator.run_seconds = seconds;
        }
        if let Some(quantum_us) = shell_args.quantum_us {
            self.scheduler.quantum_cap_us = quantum_us;
        }
        if shell_args.no_profile {
            self.scheduler.profiler.enabled = false;
        }
        if let Some(level) = shell_args.log_level {
            self.emulator.log_level = level;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.emulator.run_seconds.is_finite() || self.emulator.run_seconds <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "run_seconds must be a positive number of seconds, got {}",
                self.emulator.run_seconds
            )));
        }
        if self.scheduler.quantum_cap_us == 0 || self.scheduler.quantum_cap_us > MAX_QUANTUM_CAP_US {
            return Err(ConfigError::Invalid(format!(
                "quantum_cap_us must be between 1 and {}, got {}",
                MAX_QUANTUM_CAP_US, self.scheduler.quantum_cap_us
            )));
        }
        if self.machine.cpu_clock == 0 {
            return Err(ConfigError::Invalid("cpu_clock must be non-zero".to_string()));
        }
        if self.machine.sample_rate == 0 {
            return Err(ConfigError::Invalid("sample_rate must be non-zero".to_string()));
        }
        let video = &self.machine.video;
        if video.pixel_clock == 0 || video.htotal == 0 || video.vtotal == 0 {
            return Err(ConfigError::Invalid(format!("invalid video timing: {:?}", video)));
        }
        if video.vblank_start >= video.vtotal {
            return Err(ConfigError::Invalid(format!(
                "vblank_start ({}) must be below vtotal ({})",
                video.vblank_start, video.vtotal
            )));
        }
        Ok(())
    }
}

/// Parse a TOML configuration and overlay the given command line arguments.
pub fn read_config(toml_string: impl AsRef<str>, shell_args: CmdLineArgs) -> Result<ConfigFileParams, ConfigError> {
    let mut toml_args: ConfigFileParams = toml::from_str(toml_string.as_ref())?;

    // Command line arguments override config file arguments
    toml_args.overlay(shell_args);
    toml_args.validate()?;
    Ok(toml_args)
}

/// Read the command line, then the configuration file it names (or `default_path`), and
/// combine the two.
pub fn read_config_file<P>(default_path: P) -> Result<ConfigFileParams, ConfigError>
where
    P: AsRef<Path>,
{
    let shell_args: CmdLineArgs;

    cfg_if! {
        if #[cfg(feature = "use_bpaf")] {
            log::debug!("Reading command line arguments...");
            shell_args = cli_args().run();
        } else {
            log::debug!("Argument reading disabled...");
            shell_args = CmdLineArgs::default();
        }
    }

    // Allow configuration file path to be overridden by command line argument 'config_file'
    let path = match shell_args.config_file.as_ref() {
        Some(configfile_path) => configfile_path.clone(),
        None => default_path.as_ref().to_path_buf(),
    };
    let toml_string = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;

    read_config(toml_string, shell_args)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config = read_config("", CmdLineArgs::default()).unwrap();
        assert_eq!(config.scheduler, SchedulerConfig::default());
        assert_eq!(config.emulator.log_level, LogLevel::Warn);
        assert_eq!(config.machine.video.htotal, 912);
    }

    #[test]
    fn command_line_overrides_file() {
        let toml = r#"
            [emulator]
            log_level = "debug"
            run_seconds = 5.0

            [scheduler]
            quantum_cap_us = 250

            [machine]
            cpu_clock = 1000000
            video = { pixel_clock = 1000000, htotal = 64, vtotal = 32, vblank_start = 24 }
        "#;
        let args = CmdLineArgs {
            seconds: Some(0.25),
            no_profile: true,
            log_level: Some(LogLevel::Trace),
            ..Default::default()
        };
        let config = read_config(toml, args).unwrap();
        assert_eq!(config.emulator.run_seconds, 0.25);
        assert_eq!(config.emulator.log_level, LogLevel::Trace);
        assert_eq!(config.scheduler.quantum_cap_us, 250);
        assert!(!config.scheduler.profiler.enabled);
        assert_eq!(config.machine.cpu_clock, 1_000_000);
        assert_eq!(config.machine.video.vblank_start, 24);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let toml = "[machine]\nsample_rate = 0\n";
        assert!(matches!(
            read_config(toml, CmdLineArgs::default()),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            read_config("[emulator\n", CmdLineArgs::default()),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn quantum_cap_must_be_bounded() {
        for cap in [0, MAX_QUANTUM_CAP_US + 1, 1_000_000_000_000_000] {
            let args = CmdLineArgs {
                quantum_us: Some(cap),
                ..Default::default()
            };
            assert!(matches!(read_config("", args), Err(ConfigError::Invalid(_))));
        }
        let args = CmdLineArgs {
            quantum_us: Some(MAX_QUANTUM_CAP_US),
            ..Default::default()
        };
        assert!(read_config("", args).is_ok());
    }

    #[test]
    fn log_level_parses_case_insensitively() {
        assert_eq!("INFO".parse::<LogLevel>().ok(), Some(LogLevel::Info));
        assert_eq!(LogLevel::Debug.to_string(), "debug");
        assert_eq!(LogLevel::Off.to_filter(), log::LevelFilter::Off);
        assert_eq!(LogLevel::default().to_filter(), log::LevelFilter::Warn);
    }
}
