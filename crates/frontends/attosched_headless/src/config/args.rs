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
    headless::config::args.rs

    Command line arguments. Every argument is optional and, when present,
    overrides the matching value from the configuration file.

*/

use std::path::PathBuf;

use crate::config::LogLevel;

#[cfg(feature = "use_bpaf")]
use bpaf::Bpaf;

#[cfg_attr(feature = "use_bpaf", derive(Bpaf))]
#[cfg_attr(feature = "use_bpaf", bpaf(options, version, generate(cli_args)))]
#[derive(Debug, Default)]
pub struct CmdLineArgs {
    #[cfg_attr(feature = "use_bpaf", bpaf(long("config_file"), long("configfile")))]
    pub config_file: Option<PathBuf>,

    /// Emulated seconds to run for.
    #[cfg_attr(feature = "use_bpaf", bpaf(long("seconds")))]
    pub seconds: Option<f64>,

    /// Upper bound on a single scheduler quantum, in microseconds.
    #[cfg_attr(feature = "use_bpaf", bpaf(long("quantum_us")))]
    pub quantum_us: Option<u64>,

    #[cfg_attr(feature = "use_bpaf", bpaf(long("no_profile"), long("noprofile"), switch))]
    pub no_profile: bool,

    #[cfg_attr(feature = "use_bpaf", bpaf(long("log_level")))]
    pub log_level: Option<LogLevel>,
}
