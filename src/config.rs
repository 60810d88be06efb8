//! Resolved runtime configuration shared read-only by every worker.
//!
//! The CLI layer folds flags, environment and derived switches into
//! one immutable `Options` value; nothing here changes after startup.

use crate::colors::ColorSpec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryFiles {
    Binary,
    Text,
    WithoutMatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListFiles {
    None,
    Matching,
    NonMatching,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirAction {
    Read,
    Recurse,
    Skip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DevAction {
    Read,
    /// Read devices named on the command line, skip the ones met
    /// while recursing (the default).
    ReadCommandLine,
    Skip,
}

#[derive(Debug, Clone)]
pub struct Options {
    pub eol: u8,
    pub invert: bool,
    pub match_words: bool,
    pub match_lines: bool,

    pub out_line: bool,
    pub out_byte: bool,
    /// -H forces filenames on, -h off; None decides per invocation
    /// (multiple files or recursion).
    pub with_filename: Option<bool>,
    pub count_matches: bool,
    pub list_files: ListFiles,
    pub max_count: u64,
    pub before_context: u64,
    pub after_context: u64,
    /// True when -A/-B/-C appeared at all; a zero-line context still
    /// prints group separators.
    pub context_requested: bool,
    pub group_separator: Option<String>,
    pub only_matching: bool,

    pub quiet: bool,
    pub suppress_errors: bool,
    pub binary_files: BinaryFiles,
    pub directories: DirAction,
    pub devices: DevAction,
    /// -R: dereference symlinks while recursing.
    pub deref_recursive: bool,
    pub label: Option<String>,
    pub line_buffered: bool,
    /// -Z: terminate file names with NUL instead of the separator.
    pub null_after_name: bool,
    pub align_tabs: bool,

    pub color: bool,
    pub colors: ColorSpec,

    /// Stop scanning a file after the first selected line (-q, -l,
    /// -L; also flipped while a binary file is scanned).
    pub done_on_match: bool,
    /// Terminate the whole process on the first selected line.
    pub exit_on_match: bool,
    /// Exit code for "trouble" when exiting on match; -q forces
    /// success even after errors.
    pub exit_failure_code: i32,
    /// Suppress normal output (counting or listing only).
    pub out_quiet: bool,
    /// The compiled pattern does not select empty lines, so runs of
    /// NUL bytes can be skipped wholesale under -z.
    pub skip_empty_lines: bool,

    pub parallel: bool,
    pub num_threads: usize,
    /// dev/inode of stdout when it is a regular file, for the
    /// "input file is also the output" self-reference check.
    pub out_dev_ino: Option<(u64, u64)>,
}
