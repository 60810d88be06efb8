//! # pargrep - Line-Oriented Pattern Matching
//!
//! A grep-style search tool built around three subsystems:
//!
//! - **Layered match engine**: a multi-string keyword prefilter, a
//!   dense scan automaton, and a per-pattern fallback array (with
//!   back-reference support) cascade so the expensive engine only runs
//!   on confirmed candidate lines.
//! - **Streaming buffer manager**: a page-aligned, sentinel-padded
//!   window that ingests data without line-length assumptions,
//!   preserves partial trailing lines across refills, and skips over
//!   file holes.
//! - **Parallel recursive traversal**: worker threads walk a directory
//!   tree in lockstep and fill an ordered slot array, producing output
//!   byte-identical to a sequential walk.
//!
//! ## Quick Start
//!
//! ```no_run
//! use clap::Parser;
//!
//! fn main() -> pargrep::Result<()> {
//!     let cli = pargrep::Cli::try_parse_from(["pargrep", "-n", "pattern", "file.txt"]).unwrap();
//!     let resolved = cli.resolve()?;
//!     let status = pargrep::run(resolved)?;
//!     std::process::exit(status.exit_code());
//! }
//! ```

#![allow(clippy::too_many_arguments)]

use std::path::Path;

/// Streaming buffer manager with sentinel and residue invariants
pub mod buffer;

/// Command-line interface definitions and argument resolution
pub mod cli;

/// GREP_COLORS capability parsing
pub mod colors;

/// Resolved runtime configuration
pub mod config;

/// Per-file orchestration and the scan loop
pub mod driver;

/// The layered match engine
pub mod engine;

/// Error types and result handling
pub mod error;

/// Keyword prefilter over the pattern must-list
pub mod kwset;

/// Parallel recursive traversal with ordered output
pub mod parallel;

/// Pattern compilation: dialects, engines, scan automaton
pub mod pattern;

/// Line emission through the output-sink abstraction
pub mod printer;

// Re-export commonly used types for convenience
pub use cli::{Cli, Resolved};
pub use config::Options;
pub use engine::Searcher;
pub use error::{GrepError, Result, RunStatus};
pub use pattern::{Dialect, PatternSet};

use config::DirAction;
use driver::Driver;
use pattern::PatternConfig;
use printer::{OutputSink, StdoutSink};

/// Compile the patterns and search every file operand, returning the
/// aggregated status for the process exit code.
pub fn run(resolved: Resolved) -> Result<RunStatus> {
    let Resolved {
        mut options,
        pattern_blob,
        origins,
        dialect,
        ignore_case,
        files,
        empty_pattern_list: _,
    } = resolved;

    let set = PatternSet::compile(
        &pattern_blob,
        &origins,
        PatternConfig {
            dialect,
            ignore_case,
            match_words: options.match_words,
            match_lines: options.match_lines,
            eol: options.eol,
        },
    )?;

    // Probe whether an empty line is selected; if not, runs of NUL
    // bytes under -z can be skipped without consulting the engine.
    {
        let probe = Searcher::new(&set)?;
        let hay = [options.eol, options.eol];
        options.skip_empty_lines = probe.execute(&hay, 1, 2, None).is_some() == options.invert;
    }

    let mut status = RunStatus::default();
    let mut driver = Driver::new(&options, &set)?;
    let mut sink = StdoutSink::new();
    let out_file = options.with_filename.unwrap_or(files.len() > 1);

    for file in &files {
        let path = Path::new(file);
        if options.parallel
            && options.directories == DirAction::Recurse
            && file != "-"
            && path.is_dir()
        {
            // The parallel traversal writes to stdout itself between
            // rounds; anything buffered here must go first.
            sink.flush();
            parallel::run(path, &options, &set, &mut status)?;
        } else {
            driver.grep_command_line_arg(file, out_file, &mut sink, &mut status);
        }
    }
    sink.flush();

    if printer::stdout_error_seen() {
        eprintln!("pargrep: write error");
        status.errseen = true;
    }
    Ok(status)
}
