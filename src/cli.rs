//! Command-line interface definitions and argument resolution.

use std::io::Read;
use std::path::PathBuf;

use clap::{ArgAction, Parser, ValueEnum};

use crate::colors::ColorSpec;
use crate::config::{BinaryFiles, DevAction, DirAction, ListFiles, Options};
use crate::error::{GrepError, Result};
use crate::pattern::{Dialect, OriginSpan};

#[derive(Parser, Debug)]
#[command(
    name = "pargrep",
    version,
    disable_help_flag = true,
    about = "Search for patterns in each file or standard input",
    long_about = "\
pargrep searches the named input files (or standard input) for lines\n\
matching the given patterns and prints them. With -r the search\n\
recurses into directory trees, and multiple worker threads produce\n\
output whose ordering is indistinguishable from a sequential walk.\n\
\n\
Exit status is 0 if any line is selected, 1 otherwise; if any error\n\
occurs and -q is not given, the exit status is 2."
)]
pub struct Cli {
    /// Pattern to match (when no -e or -f was given)
    pub pattern: Option<String>,

    /// Files to search; `-` means standard input
    pub files: Vec<String>,

    /// PATTERN is an extended regular expression (ERE)
    #[arg(short = 'E', long = "extended-regexp",
          overrides_with_all = ["extended_regexp", "fixed_strings", "basic_regexp", "perl_regexp"])]
    pub extended_regexp: bool,

    /// PATTERN is a set of newline-separated strings
    #[arg(short = 'F', long = "fixed-strings",
          overrides_with_all = ["extended_regexp", "fixed_strings", "basic_regexp", "perl_regexp"])]
    pub fixed_strings: bool,

    /// PATTERN is a basic regular expression (BRE, the default)
    #[arg(short = 'G', long = "basic-regexp",
          overrides_with_all = ["extended_regexp", "fixed_strings", "basic_regexp", "perl_regexp"])]
    pub basic_regexp: bool,

    /// PATTERN is a Perl regular expression
    #[arg(short = 'P', long = "perl-regexp",
          overrides_with_all = ["extended_regexp", "fixed_strings", "basic_regexp", "perl_regexp"])]
    pub perl_regexp: bool,

    /// Use PATTERN for matching (repeatable)
    #[arg(short = 'e', long = "regexp", value_name = "PATTERN", action = ArgAction::Append)]
    pub regexp: Vec<String>,

    /// Obtain patterns from FILE, one per line (repeatable; - reads stdin)
    #[arg(short = 'f', long = "file", value_name = "FILE", action = ArgAction::Append)]
    pub pattern_files: Vec<PathBuf>,

    /// Ignore case distinctions
    #[arg(short = 'i', long = "ignore-case", short_alias = 'y')]
    pub ignore_case: bool,

    /// Match only whole words
    #[arg(short = 'w', long = "word-regexp")]
    pub word_regexp: bool,

    /// Match only whole lines
    #[arg(short = 'x', long = "line-regexp")]
    pub line_regexp: bool,

    /// A data line ends in a 0 byte, not a newline
    #[arg(short = 'z', long = "null-data")]
    pub null_data: bool,

    /// Select non-matching lines
    #[arg(short = 'v', long = "invert-match")]
    pub invert_match: bool,

    /// Print only a count of selected lines per file
    #[arg(short = 'c', long = "count")]
    pub count: bool,

    /// Print only names of files containing matches
    #[arg(short = 'l', long = "files-with-matches", overrides_with = "files_without_match")]
    pub files_with_matches: bool,

    /// Print only names of files containing no match
    #[arg(short = 'L', long = "files-without-match", overrides_with = "files_with_matches")]
    pub files_without_match: bool,

    /// Stop after NUM selected lines per file
    #[arg(short = 'm', long = "max-count", value_name = "NUM")]
    pub max_count: Option<u64>,

    /// Print line numbers with output lines
    #[arg(short = 'n', long = "line-number")]
    pub line_number: bool,

    /// Print the byte offset with output lines
    #[arg(short = 'b', long = "byte-offset")]
    pub byte_offset: bool,

    /// Print the file name for each match
    #[arg(short = 'H', long = "with-filename", overrides_with = "no_filename")]
    pub with_filename: bool,

    /// Suppress the file name prefix on output
    #[arg(short = 'h', long = "no-filename", overrides_with = "with_filename")]
    pub no_filename: bool,

    /// Use LABEL as the standard input file name prefix
    #[arg(long = "label", value_name = "LABEL")]
    pub label: Option<String>,

    /// Print NUM lines of trailing context
    #[arg(short = 'A', long = "after-context", value_name = "NUM")]
    pub after_context: Option<u64>,

    /// Print NUM lines of leading context
    #[arg(short = 'B', long = "before-context", value_name = "NUM")]
    pub before_context: Option<u64>,

    /// Print NUM lines of output context
    #[arg(short = 'C', long = "context", value_name = "NUM")]
    pub context: Option<u64>,

    /// Show only the part of a line matching PATTERN
    #[arg(short = 'o', long = "only-matching")]
    pub only_matching: bool,

    /// Suppress all normal output; exit 0 on the first match
    #[arg(short = 'q', long = "quiet", alias = "silent")]
    pub quiet: bool,

    /// Suppress error messages about unreadable files
    #[arg(short = 's', long = "no-messages")]
    pub no_messages: bool,

    /// How to handle binary files
    #[arg(long = "binary-files", value_name = "TYPE", value_enum)]
    pub binary_files: Option<BinaryFilesArg>,

    /// Equivalent to --binary-files=text
    #[arg(short = 'a', long = "text")]
    pub text: bool,

    /// Equivalent to --binary-files=without-match
    #[arg(short = 'I')]
    pub ignore_binary: bool,

    /// How to handle directories
    #[arg(short = 'd', long = "directories", value_name = "ACTION", value_enum)]
    pub directories: Option<DirActionArg>,

    /// How to handle devices, FIFOs and sockets
    #[arg(short = 'D', long = "devices", value_name = "ACTION", value_enum)]
    pub devices: Option<DevActionArg>,

    /// Recurse into directories
    #[arg(short = 'r', long = "recursive")]
    pub recursive: bool,

    /// Recurse into directories, following all symlinks
    #[arg(short = 'R', long = "dereference-recursive")]
    pub dereference_recursive: bool,

    /// Number of worker threads for the recursive search
    #[arg(short = 'p', long = "parallel", value_name = "NUM")]
    pub parallel: Option<usize>,

    /// Print a 0 byte after each file name
    #[arg(short = 'Z', long = "null")]
    pub null_after_name: bool,

    /// Make tabs line up (if needed)
    #[arg(short = 'T', long = "initial-tab")]
    pub initial_tab: bool,

    /// Use markers to highlight the matching strings
    #[arg(long = "color", alias = "colour", value_name = "WHEN", value_enum,
          num_args = 0..=1, require_equals = true, default_missing_value = "auto")]
    pub color: Option<ColorWhen>,

    /// Use SEP as the group separator; an empty string disables it
    #[arg(long = "group-separator", value_name = "SEP", overrides_with = "no_group_separator")]
    pub group_separator: Option<String>,

    /// Suppress the group separator between context groups
    #[arg(long = "no-group-separator", overrides_with = "group_separator")]
    pub no_group_separator: bool,

    /// Flush output on every line
    #[arg(long = "line-buffered")]
    pub line_buffered: bool,

    /// Print this help text and exit
    #[arg(long = "help", action = ArgAction::Help)]
    pub help: Option<bool>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum BinaryFilesArg {
    Binary,
    Text,
    WithoutMatch,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum DirActionArg {
    Read,
    Recurse,
    Skip,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum DevActionArg {
    Read,
    Skip,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum ColorWhen {
    #[value(alias = "yes", alias = "force")]
    Always,
    #[value(alias = "no", alias = "none")]
    Never,
    #[value(alias = "tty", alias = "if-tty")]
    Auto,
}

/// Everything the rest of the program needs, resolved from the
/// command line and environment.
pub struct Resolved {
    pub options: Options,
    pub pattern_blob: Vec<u8>,
    pub origins: Vec<OriginSpan>,
    pub dialect: Dialect,
    pub ignore_case: bool,
    pub files: Vec<String>,
    /// The whole pattern list was empty (e.g. `-f /dev/null`); the
    /// match sense is already inverted to select nothing.
    pub empty_pattern_list: bool,
}

impl Cli {
    pub fn dialect(&self) -> Dialect {
        if self.extended_regexp {
            Dialect::Extended
        } else if self.fixed_strings {
            Dialect::Fixed
        } else if self.perl_regexp {
            Dialect::Perl
        } else {
            Dialect::Basic
        }
    }

    /// Fold flags, pattern sources and the environment into the
    /// resolved configuration.
    pub fn resolve(self) -> Result<Resolved> {
        let mut blob: Vec<u8> = Vec::new();
        let mut origins: Vec<OriginSpan> = Vec::new();
        let mut have_keys = false;

        for pat in &self.regexp {
            let start = blob.len();
            blob.extend_from_slice(pat.as_bytes());
            blob.push(b'\n');
            origins.push(OriginSpan {
                start,
                end: blob.len(),
                file: None,
            });
            have_keys = true;
        }
        for path in &self.pattern_files {
            let start = blob.len();
            let name = path.display().to_string();
            let content = if name == "-" {
                let mut buf = Vec::new();
                std::io::stdin()
                    .read_to_end(&mut buf)
                    .map_err(|e| GrepError::io("-", e))?;
                buf
            } else {
                std::fs::read(path).map_err(|e| GrepError::io(path.clone(), e))?
            };
            let had_content = !content.is_empty();
            blob.extend_from_slice(&content);
            if had_content && blob.last() != Some(&b'\n') {
                blob.push(b'\n');
            }
            origins.push(OriginSpan {
                start,
                end: blob.len(),
                file: Some(name),
            });
            have_keys = true;
        }

        let mut files = self.files.clone();
        let mut invert = self.invert_match;
        let mut match_words = self.word_regexp;
        let mut match_lines = self.line_regexp;
        let mut empty_pattern_list = false;

        if have_keys {
            if blob.is_empty() {
                // No patterns at all (say, -f /dev/null): match
                // nothing, but keep going so -v and exit codes work.
                invert = !invert;
                match_words = false;
                match_lines = false;
                empty_pattern_list = true;
            } else {
                // Strip the final separator so the last pattern is not
                // followed by a spurious empty one.
                blob.pop();
            }
        } else if let Some(pat) = &self.pattern {
            let start = blob.len();
            blob.extend_from_slice(pat.as_bytes());
            origins.push(OriginSpan {
                start,
                end: blob.len(),
                file: None,
            });
        } else {
            return Err(GrepError::Usage(
                "usage: pargrep [OPTION]... PATTERN [FILE]...".to_string(),
            ));
        }

        // When -e/-f supplied the patterns, the first positional is a
        // file operand, not a pattern.
        if have_keys {
            if let Some(p) = self.pattern.clone() {
                files.insert(0, p);
            }
        }

        let eol = if self.null_data { b'\0' } else { b'\n' };

        let list_files = if self.quiet {
            ListFiles::None
        } else if self.files_with_matches {
            ListFiles::Matching
        } else if self.files_without_match {
            ListFiles::NonMatching
        } else {
            ListFiles::None
        };

        let mut exit_on_match = self.quiet;
        let exit_failure_code = if self.quiet { 0 } else { 2 };
        if !exit_on_match && crate::driver::stdout_is_null_device() {
            exit_on_match = true;
        }
        let count_matches = self.count && !exit_on_match && list_files == ListFiles::None;
        let done_on_match = exit_on_match || list_files != ListFiles::None;
        let out_quiet = count_matches || done_on_match;

        let default_context = self.context.unwrap_or(0);
        let before_context = self.before_context.unwrap_or(default_context);
        let after_context = self.after_context.unwrap_or(default_context);
        let context_requested =
            self.before_context.is_some() || self.after_context.is_some() || self.context.is_some();

        let mut directories = match self.directories {
            Some(DirActionArg::Read) => DirAction::Read,
            Some(DirActionArg::Recurse) => DirAction::Recurse,
            Some(DirActionArg::Skip) => DirAction::Skip,
            None => DirAction::Read,
        };
        if self.recursive || self.dereference_recursive {
            directories = DirAction::Recurse;
        }
        let recursive = directories == DirAction::Recurse;

        let devices = match self.devices {
            Some(DevActionArg::Read) => DevAction::Read,
            Some(DevActionArg::Skip) => DevAction::Skip,
            None => DevAction::ReadCommandLine,
        };

        let binary_files = if let Some(arg) = self.binary_files {
            match arg {
                BinaryFilesArg::Binary => BinaryFiles::Binary,
                BinaryFilesArg::Text => BinaryFiles::Text,
                BinaryFilesArg::WithoutMatch => BinaryFiles::WithoutMatch,
            }
        } else if self.text {
            BinaryFiles::Text
        } else if self.ignore_binary {
            BinaryFiles::WithoutMatch
        } else {
            BinaryFiles::Binary
        };

        // Parallel policy: an explicit -p with an unsupported option
        // is a hard error; implicit parallelism from -r silently
        // demotes to the sequential walker instead.
        let online = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let unsupported_parallel = context_requested || match_words || self.line_buffered;
        let (parallel, num_threads) = match self.parallel {
            Some(n) => {
                if !recursive {
                    return Err(GrepError::Usage(
                        "the parallel option has to be used with -r".to_string(),
                    ));
                }
                if n < 1 {
                    return Err(GrepError::Usage(
                        "number of threads has to be positive".to_string(),
                    ));
                }
                if context_requested {
                    return Err(GrepError::Usage(
                        "parallel mode doesn't support outputting context".to_string(),
                    ));
                }
                if match_words {
                    return Err(GrepError::Usage(
                        "parallel mode doesn't support the word-regexp option".to_string(),
                    ));
                }
                if self.line_buffered {
                    return Err(GrepError::Usage(
                        "parallel mode doesn't support line buffering".to_string(),
                    ));
                }
                (true, n.min(online * 6))
            }
            // Only the -r/-R spellings imply parallelism; an explicit
            // --directories=recurse keeps the sequential walker.
            None if (self.recursive || self.dereference_recursive) && !unsupported_parallel => {
                (true, online)
            }
            None => (false, 1),
        };

        let color = match self.color {
            Some(ColorWhen::Always) => true,
            Some(ColorWhen::Never) => false,
            Some(ColorWhen::Auto) | None => {
                self.color.is_some()
                    && is_terminal::is_terminal(&std::io::stdout())
                    && std::env::var_os("TERM").map_or(true, |t| t != "dumb")
            }
        };
        let colors = if color {
            ColorSpec::from_env()
        } else {
            ColorSpec::default()
        };

        let group_separator = if self.no_group_separator {
            None
        } else {
            Some(
                self.group_separator
                    .clone()
                    .unwrap_or_else(|| "--".to_string()),
            )
        };

        let with_filename = if self.with_filename {
            Some(true)
        } else if self.no_filename {
            Some(false)
        } else {
            None
        };

        if files.is_empty() {
            files.push(if recursive { ".".to_string() } else { "-".to_string() });
        }

        let options = Options {
            eol,
            invert,
            match_words,
            match_lines,
            out_line: self.line_number,
            out_byte: self.byte_offset,
            with_filename,
            count_matches,
            list_files,
            max_count: self.max_count.unwrap_or(u64::MAX),
            before_context,
            after_context,
            context_requested,
            group_separator,
            only_matching: self.only_matching,
            quiet: self.quiet,
            suppress_errors: self.no_messages,
            binary_files,
            directories,
            devices,
            deref_recursive: self.dereference_recursive,
            label: self.label.clone(),
            line_buffered: self.line_buffered,
            null_after_name: self.null_after_name,
            align_tabs: self.initial_tab,
            color,
            colors,
            done_on_match,
            exit_on_match,
            exit_failure_code,
            out_quiet,
            skip_empty_lines: false,
            parallel,
            num_threads,
            out_dev_ino: if exit_on_match {
                None
            } else {
                crate::driver::stdout_dev_ino()
            },
        };

        Ok(Resolved {
            options,
            pattern_blob: blob,
            origins,
            dialect: self.dialect(),
            ignore_case: self.ignore_case,
            files,
            empty_pattern_list,
        })
    }
}

/// Prepend arguments from the deprecated GREP_OPTIONS variable,
/// warning once when it is set.
pub fn prepend_default_options(args: Vec<String>) -> Vec<String> {
    match std::env::var("GREP_OPTIONS") {
        Ok(extra) if !extra.is_empty() => {
            eprintln!(
                "pargrep: warning: GREP_OPTIONS is deprecated; please use an alias or script"
            );
            let mut out = Vec::with_capacity(args.len() + 4);
            out.push(args[0].clone());
            out.extend(extra.split_whitespace().map(str::to_string));
            out.extend(args.into_iter().skip(1));
            out
        }
        _ => args,
    }
}
