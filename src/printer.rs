//! Line emission: head (filename, line number, byte offset), colored
//! middle, and tail, routed through an output sink.
//!
//! The sink abstraction is what lets the sequential and parallel
//! paths share one printer: direct standard output and the per-visit
//! slot buffers implement the same trait, and everything that prints
//! goes through it.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};

use memchr::memchr_iter;

use crate::config::{BinaryFiles, Options};
use crate::engine::Searcher;

pub const SEP_CHAR_SELECTED: u8 = b':';
pub const SEP_CHAR_REJECTED: u8 = b'-';

/// First write error to standard output, reported once at exit so a
/// failing close does not produce a duplicate diagnostic.
static STDOUT_ERROR: AtomicBool = AtomicBool::new(false);

pub fn stdout_error_seen() -> bool {
    STDOUT_ERROR.load(Ordering::Relaxed)
}

fn note_stdout_error() {
    STDOUT_ERROR.store(true, Ordering::Relaxed);
}

/// Destination for all normal output.
pub trait OutputSink: Send {
    fn write(&mut self, bytes: &[u8]);
    fn flush(&mut self);
}

pub struct StdoutSink {
    out: std::io::BufWriter<std::io::Stdout>,
}

impl StdoutSink {
    pub fn new() -> StdoutSink {
        StdoutSink {
            out: std::io::BufWriter::new(std::io::stdout()),
        }
    }
}

impl Default for StdoutSink {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputSink for StdoutSink {
    fn write(&mut self, bytes: &[u8]) {
        if self.out.write_all(bytes).is_err() {
            note_stdout_error();
        }
    }

    fn flush(&mut self) {
        if self.out.flush().is_err() {
            note_stdout_error();
        }
    }
}

/// Sink that appends to a byte vector; the parallel slots wrap one of
/// these per visit index, and tests capture output with it.
#[derive(Default)]
pub struct VecSink(pub Vec<u8>);

impl OutputSink for VecSink {
    fn write(&mut self, bytes: &[u8]) {
        self.0.extend_from_slice(bytes);
    }

    fn flush(&mut self) {}
}

/// Per-file printing and counting state: the match context of one
/// scan. Created per file, owned by exactly one thread.
#[derive(Debug)]
pub struct FileContext {
    pub filename: String,
    /// Print the filename in line heads.
    pub out_file: bool,
    /// Window start of the current fill, for byte-offset math.
    pub window_beg: usize,
    /// Bytes before the current window.
    pub total_cc: u64,
    /// Newlines counted so far (line numbers).
    pub total_nl: u64,
    /// Window position the newline count is valid for.
    pub last_nl: usize,
    /// Position just past the last byte emitted, if any.
    pub last_out: Option<usize>,
    /// Output-line budget left (-m).
    pub out_left: u64,
    /// Trailing-context lines still owed.
    pub pending: u64,
    /// File offset just past the last selected line.
    pub after_last_match: u64,
    pub done_on_match: bool,
    pub out_quiet: bool,
    pub encoding_error_output: bool,
}

impl FileContext {
    pub fn new(filename: String, out_file: bool, opts: &Options) -> FileContext {
        FileContext {
            filename,
            out_file,
            window_beg: 0,
            total_cc: 0,
            total_nl: 0,
            last_nl: 0,
            last_out: None,
            out_left: opts.max_count,
            pending: 0,
            after_last_match: 0,
            done_on_match: opts.done_on_match,
            out_quiet: opts.out_quiet,
            encoding_error_output: false,
        }
    }
}

pub struct LinePrinter<'a> {
    pub opts: &'a Options,
    pub searcher: &'a Searcher,
    pub sink: &'a mut dyn OutputSink,
}

impl<'a> LinePrinter<'a> {
    /// Print one line (selected or context) between `beg` and `lim`;
    /// `hay[lim - 1]` is the end-of-line byte.
    pub fn prline(&mut self, ctx: &mut FileContext, hay: &[u8], beg: usize, lim: usize, sep: u8) {
        if !self.opts.only_matching
            && !self.print_line_head(ctx, hay, beg, lim - beg - 1, lim, sep)
        {
            return;
        }

        let matching = (sep == SEP_CHAR_SELECTED) ^ self.opts.invert;
        let (line_color, match_color) = if self.opts.color {
            let selected =
                (sep == SEP_CHAR_SELECTED) ^ (self.opts.invert && self.opts.colors.reverse_video);
            (
                if selected {
                    self.opts.colors.selected_line.clone()
                } else {
                    self.opts.colors.context_line.clone()
                },
                if sep == SEP_CHAR_SELECTED {
                    self.opts.colors.selected_match.clone()
                } else {
                    self.opts.colors.context_match.clone()
                },
            )
        } else {
            (String::new(), String::new())
        };

        let mut cur = beg;
        if (self.opts.only_matching && matching)
            || (self.opts.color && (!line_color.is_empty() || !match_color.is_empty()))
        {
            if matching && (self.opts.only_matching || !match_color.is_empty()) {
                match self.print_line_middle(ctx, hay, beg, lim, &line_color, &match_color) {
                    Some(pos) => cur = pos,
                    None => return,
                }
            }
            if !self.opts.only_matching && !line_color.is_empty() {
                cur = self.print_line_tail(hay, cur, lim, &line_color);
            }
        }

        if !self.opts.only_matching && lim > cur {
            self.sink.write(&hay[cur..lim]);
        }
        if self.opts.line_buffered {
            self.sink.flush();
        }
        ctx.last_out = Some(lim);
    }

    /// Print the head fields for a line whose output portion starts at
    /// `beg` and has `len` bytes, within a line ending at `lim`.
    /// Returns false when the line is suppressed because of an
    /// encoding error.
    fn print_line_head(
        &mut self,
        ctx: &mut FileContext,
        hay: &[u8],
        beg: usize,
        len: usize,
        lim: usize,
        sep: u8,
    ) -> bool {
        if self.opts.binary_files != BinaryFiles::Text
            && std::str::from_utf8(&hay[beg..beg + len]).is_err()
        {
            ctx.encoding_error_output = true;
            ctx.done_on_match = true;
            ctx.out_quiet = true;
            return false;
        }

        let mut pending_sep = false;
        if ctx.out_file {
            self.print_filename(&ctx.filename.clone());
            if self.opts.null_after_name {
                self.sink.write(b"\0");
            } else {
                pending_sep = true;
            }
        }

        if self.opts.out_line {
            if ctx.last_nl < lim {
                nlscan(ctx, hay, beg, self.opts.eol);
                ctx.total_nl += 1;
                ctx.last_nl = lim;
            }
            if pending_sep {
                self.print_sep(sep);
            }
            self.print_offset(ctx.total_nl, 4, &self.opts.colors.line_num.clone());
            pending_sep = true;
        }

        if self.opts.out_byte {
            let pos = ctx.total_cc + (beg - ctx.window_beg) as u64;
            if pending_sep {
                self.print_sep(sep);
            }
            self.print_offset(pos, 6, &self.opts.colors.byte_num.clone());
            pending_sep = true;
        }

        if pending_sep {
            if self.opts.align_tabs {
                self.sink.write(b"\t\x08");
            }
            self.print_sep(sep);
        }
        true
    }

    /// Walk the intra-line matches, printing the gap before each one
    /// uncolored and the match itself colored (or, for -o, each match
    /// on its own line). An empty match advances one byte and defers
    /// emission. Returns the resume position for the tail, or None if
    /// a head was suppressed.
    fn print_line_middle(
        &mut self,
        ctx: &mut FileContext,
        hay: &[u8],
        beg: usize,
        lim: usize,
        line_color: &str,
        match_color: &str,
    ) -> Option<usize> {
        let mut cur = beg;
        let mut mid: Option<usize> = None;

        while cur < lim {
            let Some(m) = self.searcher.execute(hay, beg, lim, Some(cur)) else {
                break;
            };
            let b = m.start;
            let match_size = m.len;
            if b >= lim {
                break;
            }
            if match_size == 0 {
                // Keep minimal progress; a non-empty match may follow.
                if mid.is_none() {
                    mid = Some(cur);
                }
                cur = b + 1;
                continue;
            }

            if self.opts.only_matching {
                let sep = if self.opts.invert {
                    SEP_CHAR_REJECTED
                } else {
                    SEP_CHAR_SELECTED
                };
                if !self.print_line_head(ctx, hay, b, match_size, lim, sep) {
                    return None;
                }
            } else {
                self.start_color(line_color);
                if let Some(m0) = mid.take() {
                    cur = m0;
                }
                self.sink.write(&hay[cur..b]);
            }

            self.start_color_if(match_color);
            self.sink.write(&hay[b..b + match_size]);
            self.end_color_if(match_color);
            if self.opts.only_matching {
                self.sink.write(&[self.opts.eol]);
            }
            cur = b + match_size;
        }

        Some(if self.opts.only_matching {
            lim
        } else {
            mid.unwrap_or(cur)
        })
    }

    fn print_line_tail(&mut self, hay: &[u8], beg: usize, lim: usize, line_color: &str) -> usize {
        let mut eol_size = usize::from(lim > beg && hay[lim - 1] == self.opts.eol);
        eol_size += usize::from(lim - eol_size > beg && hay[lim - 1 - eol_size] == b'\r');
        let tail = lim - eol_size - beg;
        if tail > 0 {
            self.start_color(line_color);
            self.sink.write(&hay[beg..beg + tail]);
            self.end_color(line_color);
            beg + tail
        } else {
            beg
        }
    }

    pub fn print_filename(&mut self, name: &str) {
        let color = self.opts.colors.filename.clone();
        self.start_color_if(&color);
        self.sink.write(name.as_bytes());
        self.end_color_if(&color);
    }

    pub fn print_sep(&mut self, sep: u8) {
        let color = self.opts.colors.separator.clone();
        self.start_color_if(&color);
        self.sink.write(&[sep]);
        self.end_color_if(&color);
    }

    fn print_offset(&mut self, pos: u64, min_width: usize, color: &str) {
        let digits = pos.to_string();
        self.start_color_if(color);
        if self.opts.align_tabs && digits.len() < min_width {
            let pad = " ".repeat(min_width - digits.len());
            self.sink.write(pad.as_bytes());
        }
        self.sink.write(digits.as_bytes());
        self.end_color_if(color);
    }

    /// Per-file count for -c.
    pub fn print_count(&mut self, ctx: &FileContext, count: u64) {
        if ctx.out_file {
            self.print_filename(&ctx.filename.clone());
            if self.opts.null_after_name {
                self.sink.write(b"\0");
            } else {
                self.print_sep(SEP_CHAR_SELECTED);
            }
        }
        self.sink.write(count.to_string().as_bytes());
        self.sink.write(b"\n");
        if self.opts.line_buffered {
            self.sink.flush();
        }
    }

    /// File name line for -l / -L.
    pub fn print_listed_file(&mut self, name: &str) {
        self.print_filename(name);
        self.sink
            .write(if self.opts.null_after_name { b"\0" } else { b"\n" });
        if self.opts.line_buffered {
            self.sink.flush();
        }
    }

    /// Group separator between non-adjacent context groups.
    pub fn print_group_separator(&mut self) {
        if let Some(sep) = self.opts.group_separator.clone() {
            let color = self.opts.colors.separator.clone();
            self.start_color_if(&color);
            self.sink.write(sep.as_bytes());
            self.end_color_if(&color);
            self.sink.write(b"\n");
        }
    }

    pub fn binary_notice(&mut self, filename: &str) {
        self.sink.write(b"Binary file ");
        self.sink.write(filename.as_bytes());
        self.sink.write(b" matches\n");
        if self.opts.line_buffered {
            self.sink.flush();
        }
    }

    fn start_color(&mut self, cap: &str) {
        if !cap.is_empty() {
            let s = self.opts.colors.sgr_start(cap);
            self.sink.write(s.as_bytes());
        }
    }

    fn end_color(&mut self, cap: &str) {
        if !cap.is_empty() {
            let s = self.opts.colors.sgr_end();
            self.sink.write(s.as_bytes());
        }
    }

    fn start_color_if(&mut self, cap: &str) {
        if self.opts.color {
            self.start_color(cap);
        }
    }

    fn end_color_if(&mut self, cap: &str) {
        if self.opts.color {
            self.end_color(cap);
        }
    }
}

/// Advance the incremental newline count to `to`.
pub fn nlscan(ctx: &mut FileContext, hay: &[u8], to: usize, eol: u8) {
    let newlines = memchr_iter(eol, &hay[ctx.last_nl..to]).count();
    ctx.total_nl += newlines as u64;
    ctx.last_nl = to;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::colors::ColorSpec;
    use crate::config::{DevAction, DirAction, ListFiles, Options};
    use crate::pattern::{Dialect, PatternConfig, PatternSet};

    fn options() -> Options {
        Options {
            eol: b'\n',
            invert: false,
            match_words: false,
            match_lines: false,
            out_line: false,
            out_byte: false,
            with_filename: None,
            count_matches: false,
            list_files: ListFiles::None,
            max_count: u64::MAX,
            before_context: 0,
            after_context: 0,
            context_requested: false,
            group_separator: Some("--".to_string()),
            only_matching: false,
            quiet: false,
            suppress_errors: false,
            binary_files: BinaryFiles::Binary,
            directories: DirAction::Read,
            devices: DevAction::ReadCommandLine,
            deref_recursive: false,
            label: None,
            line_buffered: false,
            null_after_name: false,
            align_tabs: false,
            color: false,
            colors: ColorSpec::default(),
            done_on_match: false,
            exit_on_match: false,
            exit_failure_code: 2,
            out_quiet: false,
            skip_empty_lines: false,
            parallel: false,
            num_threads: 1,
            out_dev_ino: None,
        }
    }

    fn searcher(pattern: &str) -> Searcher {
        let set = PatternSet::compile(
            pattern.as_bytes(),
            &[],
            PatternConfig {
                dialect: Dialect::Extended,
                ignore_case: false,
                match_words: false,
                match_lines: false,
                eol: b'\n',
            },
        )
        .unwrap();
        Searcher::new(&set).unwrap()
    }

    fn print_one(opts: &Options, pattern: &str, line: &str) -> Vec<u8> {
        let s = searcher(pattern);
        let mut sink = VecSink::default();
        let mut hay = vec![b'\n'];
        hay.extend_from_slice(line.as_bytes());
        let lim = hay.len();
        let mut ctx = FileContext::new("file.txt".to_string(), false, opts);
        ctx.window_beg = 1;
        ctx.last_nl = 1;
        {
            let mut printer = LinePrinter {
                opts,
                searcher: &s,
                sink: &mut sink,
            };
            printer.prline(&mut ctx, &hay, 1, lim, SEP_CHAR_SELECTED);
        }
        sink.0
    }

    #[test]
    fn test_plain_line_passthrough() {
        let opts = options();
        assert_eq!(print_one(&opts, "abc", "xx abc yy\n"), b"xx abc yy\n");
    }

    #[test]
    fn test_only_matching_extracts_extents() {
        let mut opts = options();
        opts.only_matching = true;
        assert_eq!(print_one(&opts, "[0-9]+", "a1 b22 c333\n"), b"1\n22\n333\n");
    }

    #[test]
    fn test_line_number_head() {
        let mut opts = options();
        opts.out_line = true;
        let out = print_one(&opts, "abc", "abc\n");
        assert_eq!(out, b"1:abc\n");
    }

    #[test]
    fn test_byte_offset_head() {
        let mut opts = options();
        opts.out_byte = true;
        let out = print_one(&opts, "abc", "abc\n");
        assert_eq!(out, b"0:abc\n");
    }

    #[test]
    fn test_color_wraps_match() {
        let mut opts = options();
        opts.color = true;
        let out = print_one(&opts, "abc", "x abc y\n");
        let s = String::from_utf8_lossy(&out);
        assert!(s.contains("\x1b[01;31m\x1b[K"));
        assert!(s.contains("abc"));
        assert!(s.contains("\x1b[m\x1b[K"));
        assert!(s.starts_with("x "));
    }

    #[test]
    fn test_encoding_error_suppresses_line() {
        let opts = options();
        let s = searcher("abc");
        let mut sink = VecSink::default();
        let mut hay = vec![b'\n'];
        hay.extend_from_slice(b"abc \xff\xfe\n");
        let lim = hay.len();
        let mut ctx = FileContext::new("f".to_string(), false, &opts);
        ctx.window_beg = 1;
        ctx.last_nl = 1;
        {
            let mut printer = LinePrinter {
                opts: &opts,
                searcher: &s,
                sink: &mut sink,
            };
            printer.prline(&mut ctx, &hay, 1, lim, SEP_CHAR_SELECTED);
        }
        assert!(sink.0.is_empty());
        assert!(ctx.encoding_error_output);
        assert!(ctx.out_quiet);
    }

    #[test]
    fn test_binary_text_mode_prints_anyway() {
        let mut opts = options();
        opts.binary_files = BinaryFiles::Text;
        let s = searcher("abc");
        let mut sink = VecSink::default();
        let mut hay = vec![b'\n'];
        hay.extend_from_slice(b"abc \xff\n");
        let lim = hay.len();
        let mut ctx = FileContext::new("f".to_string(), false, &opts);
        ctx.window_beg = 1;
        ctx.last_nl = 1;
        {
            let mut printer = LinePrinter {
                opts: &opts,
                searcher: &s,
                sink: &mut sink,
            };
            printer.prline(&mut ctx, &hay, 1, lim, SEP_CHAR_SELECTED);
        }
        assert_eq!(sink.0, b"abc \xff\n");
    }

    #[test]
    fn test_filename_and_null_separator() {
        let mut opts = options();
        opts.null_after_name = true;
        let s = searcher("a");
        let mut sink = VecSink::default();
        let hay = b"\na\n".to_vec();
        let mut ctx = FileContext::new("name.txt".to_string(), true, &opts);
        ctx.window_beg = 1;
        ctx.last_nl = 1;
        {
            let mut printer = LinePrinter {
                opts: &opts,
                searcher: &s,
                sink: &mut sink,
            };
            printer.prline(&mut ctx, &hay, 1, hay.len(), SEP_CHAR_SELECTED);
        }
        assert_eq!(sink.0, b"name.txt\0a\n");
    }

    #[test]
    fn test_count_and_list_output() {
        let opts = options();
        let s = searcher("a");
        let mut sink = VecSink::default();
        let ctx = FileContext::new("dir/f".to_string(), true, &opts);
        {
            let mut printer = LinePrinter {
                opts: &opts,
                searcher: &s,
                sink: &mut sink,
            };
            printer.print_count(&ctx, 7);
            printer.print_listed_file("dir/f");
        }
        assert_eq!(sink.0, b"dir/f:7\ndir/f\n");
    }

    #[test]
    fn test_nlscan_counts_incrementally() {
        let opts = options();
        let mut ctx = FileContext::new("f".to_string(), false, &opts);
        let hay = b"\na\nb\nc\n";
        ctx.last_nl = 1;
        nlscan(&mut ctx, hay, 5, b'\n');
        assert_eq!(ctx.total_nl, 2);
        nlscan(&mut ctx, hay, hay.len(), b'\n');
        assert_eq!(ctx.total_nl, 3);
    }
}
