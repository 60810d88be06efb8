//! Per-file orchestration: directory and device policy, the buffered
//! scan loop, context handling, and exit-status aggregation.

use std::fs::Metadata;
use std::path::Path;

use memchr::{memchr, memrchr};
use walkdir::WalkDir;

use crate::buffer::{InputFile, ScanBuffer};
use crate::config::{BinaryFiles, DevAction, DirAction, ListFiles, Options};
use crate::engine::Searcher;
use crate::error::{suppressible_error, GrepError, Result, RunStatus};
use crate::pattern::PatternSet;
use crate::printer::{
    nlscan, FileContext, LinePrinter, OutputSink, SEP_CHAR_REJECTED, SEP_CHAR_SELECTED,
};

/// One sequential scanning unit: a compiled matcher replica plus its
/// buffer. The parallel traversal creates one per worker.
pub struct Driver<'a> {
    pub opts: &'a Options,
    pub set: &'a PatternSet,
    searcher: Searcher,
    buffer: ScanBuffer,
    /// Group-separator state: no separator before the first output of
    /// the whole run.
    used: bool,
}

impl<'a> Driver<'a> {
    pub fn new(opts: &'a Options, set: &'a PatternSet) -> Result<Driver<'a>> {
        Ok(Driver {
            opts,
            set,
            searcher: Searcher::new(set)?,
            buffer: ScanBuffer::new(opts.eol),
            used: false,
        })
    }

    /// Handle one command-line argument (`-` is standard input).
    pub fn grep_command_line_arg(
        &mut self,
        arg: &str,
        out_file: bool,
        sink: &mut dyn OutputSink,
        status: &mut RunStatus,
    ) {
        if arg == "-" {
            let display = self
                .opts
                .label
                .clone()
                .unwrap_or_else(|| "(standard input)".to_string());
            self.grep_desc(InputFile::Stdin, None, &display, true, out_file, sink, status);
        } else {
            self.grep_path(Path::new(arg), arg, true, out_file, sink, status);
        }
    }

    /// Open a path and dispatch on its file type.
    pub fn grep_path(
        &mut self,
        path: &Path,
        display: &str,
        command_line: bool,
        out_file: bool,
        sink: &mut dyn OutputSink,
        status: &mut RunStatus,
    ) {
        let file = match std::fs::File::open(path) {
            Ok(f) => f,
            Err(e) => {
                suppressible_error(
                    self.opts.suppress_errors,
                    &GrepError::io(path, e),
                    status,
                );
                return;
            }
        };
        let meta = match file.metadata() {
            Ok(m) => Some(m),
            Err(e) => {
                suppressible_error(
                    self.opts.suppress_errors,
                    &GrepError::io(path, e),
                    status,
                );
                return;
            }
        };
        self.grep_desc(
            InputFile::File(file),
            meta,
            display,
            command_line,
            out_file,
            sink,
            status,
        );
    }

    /// Apply the directory/device policies and scan the descriptor.
    fn grep_desc(
        &mut self,
        mut file: InputFile,
        meta: Option<Metadata>,
        display: &str,
        command_line: bool,
        out_file: bool,
        sink: &mut dyn OutputSink,
        status: &mut RunStatus,
    ) {
        let stdin = matches!(file, InputFile::Stdin);

        if let Some(meta) = &meta {
            if !stdin && meta.is_dir() {
                match self.opts.directories {
                    DirAction::Recurse => {
                        // The parallel traversal replaces this path at
                        // a higher level; reaching here means the
                        // sequential walker is wanted.
                        drop(file);
                        self.grep_dir(Path::new(display), sink, status);
                    }
                    DirAction::Skip => {}
                    DirAction::Read => {
                        suppressible_error(
                            self.opts.suppress_errors,
                            &GrepError::io(
                                display,
                                std::io::Error::new(
                                    std::io::ErrorKind::Other,
                                    "Is a directory",
                                ),
                            ),
                            status,
                        );
                    }
                }
                return;
            }
            if !stdin && self.skip_device(meta, command_line) {
                log::debug!("skipping device {display}");
                return;
            }
            // If a regular file on stdout is also this input, matches
            // we emit would be read back in, an effectively infinite
            // loop. Quiet modes and -m 1 cannot loop, so they pass.
            if !self.opts.out_quiet
                && self.opts.list_files == ListFiles::None
                && self.opts.max_count > 1
            {
                if let (Some((odev, oino)), Some((dev, ino))) =
                    (self.opts.out_dev_ino, dev_ino(meta))
                {
                    if odev == dev && oino == ino {
                        if !self.opts.suppress_errors {
                            eprintln!("pargrep: input file {display} is also the output");
                        }
                        status.errseen = true;
                        return;
                    }
                }
            }
        }

        let size = match &meta {
            Some(m) if m.is_file() => Some(m.len()),
            None if stdin => stdin_regular_size(),
            _ => None,
        };
        let start_offset = if stdin { file.tell().unwrap_or(0) } else { 0 };

        let mut ctx = FileContext::new(display.to_string(), out_file, self.opts);
        let count = self.grep(&mut file, size, start_offset, &mut ctx, sink, status);

        if self.opts.count_matches {
            let mut printer = LinePrinter {
                opts: self.opts,
                searcher: &self.searcher,
                sink,
            };
            printer.print_count(&ctx, count);
        }

        if count > 0 {
            status.matched = true;
        }
        let listed = if count > 0 {
            ListFiles::Matching
        } else {
            ListFiles::NonMatching
        };
        if self.opts.list_files == listed {
            let mut printer = LinePrinter {
                opts: self.opts,
                searcher: &self.searcher,
                sink,
            };
            printer.print_listed_file(display);
        }

        // Leave stdin positioned just past the last consumed byte when
        // -m cut the scan short.
        if stdin {
            let required = if ctx.out_left > 0 {
                self.buffer.offset()
            } else {
                ctx.after_last_match
            };
            if required != self.buffer.offset()
                && !file.seek_to(required)
                && stdin_regular_size().is_some()
            {
                suppressible_error(
                    self.opts.suppress_errors,
                    &GrepError::io(display, std::io::Error::last_os_error()),
                    status,
                );
            }
        }
    }

    fn skip_device(&self, meta: &Metadata, command_line: bool) -> bool {
        let skip = match self.opts.devices {
            DevAction::Read => false,
            DevAction::Skip => true,
            DevAction::ReadCommandLine => !command_line,
        };
        skip && is_device(meta)
    }

    /// Sequential recursive walk. Entries are sorted by file name so
    /// the visit order is deterministic and identical to the parallel
    /// traversal's numbering.
    pub fn grep_dir(&mut self, root: &Path, sink: &mut dyn OutputSink, status: &mut RunStatus) {
        let out_file = self.opts.with_filename.unwrap_or(true);
        let walker = WalkDir::new(root)
            .follow_links(self.opts.deref_recursive)
            .sort_by_file_name();
        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    let path = e
                        .path()
                        .map(|p| p.display().to_string())
                        .unwrap_or_else(|| root.display().to_string());
                    suppressible_error(
                        self.opts.suppress_errors,
                        &GrepError::io(
                            path,
                            std::io::Error::new(std::io::ErrorKind::Other, e.to_string()),
                        ),
                        status,
                    );
                    continue;
                }
            };
            if !traversal_selects(&entry, self.opts) {
                continue;
            }
            let display = entry.path().display().to_string();
            self.grep_path(entry.path(), &display, false, out_file, sink, status);
        }
    }

    /// The buffered scan loop for one descriptor. Returns the number
    /// of selected lines.
    fn grep(
        &mut self,
        file: &mut InputFile,
        size: Option<u64>,
        start_offset: u64,
        ctx: &mut FileContext,
        sink: &mut dyn OutputSink,
        status: &mut RunStatus,
    ) -> u64 {
        let eol = self.opts.eol;
        let done_on_match_0 = ctx.done_on_match;
        let out_quiet_0 = ctx.out_quiet;

        self.buffer.reset(start_offset);
        self.buffer.skip_nuls = self.opts.skip_empty_lines && eol == 0;

        let mut nlines: u64 = 0;
        let mut residue: usize = 0;
        let mut save: usize = 0;
        let mut nul_zapper: u8 = 0;
        // Selected-line count when NULs were first deduced; None while
        // the input still looks like text.
        let mut nlines_first_null: Option<u64> = None;

        if let Err(e) = self.buffer.fill(file, save, size) {
            suppressible_error(
                self.opts.suppress_errors,
                &GrepError::io(ctx.filename.clone(), e),
                status,
            );
            return 0;
        }

        let mut firsttime = true;
        let mut finished_early = false;
        loop {
            if nlines_first_null.is_none()
                && eol != 0
                && self.opts.binary_files != BinaryFiles::Text
                && (self.buffer.has_nulls()
                    || (firsttime
                        && size.map_or(false, |sz| {
                            sz > self.buffer.window_len() as u64 && file.has_hole_before(sz)
                        })))
            {
                if self.opts.binary_files == BinaryFiles::WithoutMatch {
                    ctx.done_on_match = done_on_match_0;
                    ctx.out_quiet = out_quiet_0;
                    return 0;
                }
                log::debug!("{}: binary input detected", ctx.filename);
                if !self.opts.count_matches {
                    ctx.done_on_match = true;
                    ctx.out_quiet = true;
                }
                nlines_first_null = Some(nlines);
                nul_zapper = eol;
                self.buffer.skip_nuls = self.opts.skip_empty_lines;
            }
            firsttime = false;

            ctx.total_nl += self.buffer.take_skipped_lines();
            ctx.last_nl = self.buffer.beg();
            if ctx.last_out.is_some() {
                ctx.last_out = Some(self.buffer.beg());
            }
            ctx.window_beg = self.buffer.beg();

            let beg0 = self.buffer.beg() + save;
            if beg0 == self.buffer.lim() {
                break;
            }
            self.buffer.zap_nuls(beg0, nul_zapper);

            // Split the window into complete lines plus the residue of
            // an incomplete trailing line.
            let hay = self.buffer.raw();
            let lim_line = match memrchr(eol, &hay[beg0..self.buffer.lim()]) {
                Some(i) => beg0 + i + 1,
                None => beg0 - residue,
            };
            let beg_scan = beg0 - residue;
            residue = self.buffer.lim() - lim_line;

            if beg_scan < lim_line {
                if ctx.out_left > 0 {
                    nlines += self.grepbuf(ctx, sink, beg_scan, lim_line, status);
                }
                if ctx.pending > 0 {
                    self.prpending(ctx, sink, lim_line);
                }
                if (ctx.out_left == 0 && ctx.pending == 0)
                    || (ctx.done_on_match && nlines_first_null.unwrap_or(0) < nlines)
                {
                    finished_early = true;
                    break;
                }
            }

            // Keep the last before-context lines as part of the saved
            // region; they may precede a match at the top of the next
            // window.
            let hay = self.buffer.raw();
            let mut keep = lim_line;
            for _ in 0..self.opts.before_context {
                if keep > self.buffer.beg() && Some(keep) != ctx.last_out {
                    keep -= 1;
                    while hay[keep - 1] != eol {
                        keep -= 1;
                    }
                }
            }
            if Some(keep) != ctx.last_out {
                ctx.last_out = None;
            }

            save = residue + (lim_line - keep);
            if self.opts.out_byte {
                ctx.total_cc += (self.buffer.lim() - self.buffer.beg() - save) as u64;
            }
            if self.opts.out_line {
                nlscan(ctx, self.buffer.raw(), keep, eol);
            }
            if let Err(e) = self.buffer.fill(file, save, size) {
                suppressible_error(
                    self.opts.suppress_errors,
                    &GrepError::io(ctx.filename.clone(), e),
                    status,
                );
                finished_early = true;
                break;
            }
        }

        if residue > 0 && !finished_early {
            self.buffer.append_residue_eol();
            let from = self.buffer.beg() + save - residue;
            if ctx.out_left > 0 {
                nlines += self.grepbuf(ctx, sink, from, self.buffer.lim(), status);
            }
            if ctx.pending > 0 {
                self.prpending(ctx, sink, self.buffer.lim());
            }
        }

        ctx.done_on_match = done_on_match_0;
        ctx.out_quiet = out_quiet_0;
        if !ctx.out_quiet
            && (ctx.encoding_error_output
                || nlines_first_null.map_or(false, |first| first < nlines))
        {
            let mut printer = LinePrinter {
                opts: self.opts,
                searcher: &self.searcher,
                sink,
            };
            printer.binary_notice(&ctx.filename);
        }
        nlines
    }

    /// Scan `[beg, lim)` of the buffer, printing selected lines (or
    /// the gaps between them under -v). Returns lines selected.
    fn grepbuf(
        &mut self,
        ctx: &mut FileContext,
        sink: &mut dyn OutputSink,
        beg: usize,
        lim: usize,
        status: &mut RunStatus,
    ) -> u64 {
        let outleft0 = ctx.out_left;
        let mut p = beg;
        while p < lim {
            let m = self.searcher.execute(self.buffer.raw(), p, lim, None);
            let (b, endp) = match m {
                Some(mm) => (mm.start, mm.start + mm.len),
                None => {
                    if !self.opts.invert {
                        break;
                    }
                    (lim, lim)
                }
            };
            // Don't let the empty region at the buffer's end count.
            if !self.opts.invert && b == lim {
                break;
            }
            if !self.opts.invert || p < b {
                let (prbeg, prend) = if self.opts.invert { (p, b) } else { (b, endp) };
                self.prtext(ctx, sink, prbeg, prend);
                if ctx.out_left == 0 || ctx.done_on_match {
                    if self.opts.exit_on_match {
                        sink.flush();
                        let code = if status.errseen {
                            self.opts.exit_failure_code
                        } else {
                            0
                        };
                        std::process::exit(code);
                    }
                    break;
                }
            }
            p = endp;
        }
        outleft0 - ctx.out_left
    }

    /// Print the text between `beg` and `lim`, handling leading
    /// context and the group separator.
    fn prtext(&mut self, ctx: &mut FileContext, sink: &mut dyn OutputSink, beg: usize, lim: usize) {
        let eol = self.opts.eol;
        if !ctx.out_quiet && ctx.pending > 0 {
            self.prpending(ctx, sink, beg);
        }

        let mut p = beg;
        if !ctx.out_quiet {
            let bp = ctx.last_out.unwrap_or_else(|| self.buffer.beg());
            for _ in 0..self.opts.before_context {
                if p > bp {
                    let hay = self.buffer.raw();
                    p -= 1;
                    while hay[p - 1] != eol {
                        p -= 1;
                    }
                }
            }

            if self.opts.context_requested
                && self.used
                && Some(p) != ctx.last_out
                && self.opts.group_separator.is_some()
            {
                let mut printer = LinePrinter {
                    opts: self.opts,
                    searcher: &self.searcher,
                    sink,
                };
                printer.print_group_separator();
            }

            while p < beg {
                let hay = self.buffer.raw();
                let nl = p + memchr(eol, &hay[p..beg]).map_or(beg - p - 1, |i| i) + 1;
                let mut printer = LinePrinter {
                    opts: self.opts,
                    searcher: &self.searcher,
                    sink,
                };
                printer.prline(ctx, self.buffer.raw(), p, nl, SEP_CHAR_REJECTED);
                p = nl;
            }
        }

        let n;
        if self.opts.invert {
            let mut count = 0;
            while p < lim && count < ctx.out_left {
                let hay = self.buffer.raw();
                let nl = p + memchr(eol, &hay[p..lim]).map_or(lim - p - 1, |i| i) + 1;
                if !ctx.out_quiet {
                    let mut printer = LinePrinter {
                        opts: self.opts,
                        searcher: &self.searcher,
                        sink,
                    };
                    printer.prline(ctx, self.buffer.raw(), p, nl, SEP_CHAR_SELECTED);
                }
                p = nl;
                count += 1;
            }
            n = count;
        } else {
            if !ctx.out_quiet {
                let mut printer = LinePrinter {
                    opts: self.opts,
                    searcher: &self.searcher,
                    sink,
                };
                printer.prline(ctx, self.buffer.raw(), beg, lim, SEP_CHAR_SELECTED);
            }
            n = 1;
            p = lim;
        }

        ctx.after_last_match = self.buffer.offset() - (self.buffer.lim() - p) as u64;
        ctx.pending = if ctx.out_quiet {
            0
        } else {
            self.opts.after_context
        };
        self.used = true;
        ctx.out_left -= n.min(ctx.out_left);
    }

    /// Print pending trailing-context lines up to `lim`. Trailing
    /// context ends at the next matching line once the -m budget is
    /// exhausted.
    fn prpending(&mut self, ctx: &mut FileContext, sink: &mut dyn OutputSink, lim: usize) {
        let eol = self.opts.eol;
        if ctx.last_out.is_none() {
            ctx.last_out = Some(self.buffer.beg());
        }
        while ctx.pending > 0 && ctx.last_out.unwrap() < lim {
            let p = ctx.last_out.unwrap();
            let hay = self.buffer.raw();
            let nl = p + memchr(eol, &hay[p..lim]).map_or(lim - p - 1, |i| i) + 1;
            ctx.pending -= 1;
            let selected =
                self.searcher.execute(self.buffer.raw(), p, nl, None).is_some() != self.opts.invert;
            if ctx.out_left > 0 || !selected {
                let mut printer = LinePrinter {
                    opts: self.opts,
                    searcher: &self.searcher,
                    sink,
                };
                printer.prline(ctx, self.buffer.raw(), p, nl, SEP_CHAR_REJECTED);
            } else {
                ctx.pending = 0;
            }
        }
    }
}

/// Pure selection predicate over a traversal entry; the parallel
/// workers rely on every replica deciding identically.
pub fn traversal_selects(entry: &walkdir::DirEntry, opts: &Options) -> bool {
    let ft = entry.file_type();
    if ft.is_dir() {
        return false;
    }
    if ft.is_symlink() && !opts.deref_recursive {
        return false;
    }
    true
}

fn dev_ino(meta: &Metadata) -> Option<(u64, u64)> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        return Some((meta.dev(), meta.ino()));
    }
    #[cfg(not(unix))]
    {
        let _ = meta;
        None
    }
}

fn is_device(meta: &Metadata) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::fs::FileTypeExt;
        let ft = meta.file_type();
        return ft.is_block_device() || ft.is_char_device() || ft.is_fifo() || ft.is_socket();
    }
    #[cfg(not(unix))]
    {
        let _ = meta;
        false
    }
}

/// Size of standard input when it is a regular file (the stat size is
/// only a trustworthy growth cap for regular files).
fn stdin_regular_size() -> Option<u64> {
    #[cfg(unix)]
    {
        let mut st: libc::stat = unsafe { std::mem::zeroed() };
        if unsafe { libc::fstat(libc::STDIN_FILENO, &mut st) } == 0
            && (st.st_mode & libc::S_IFMT) == libc::S_IFREG
        {
            return Some(st.st_size as u64);
        }
    }
    None
}

/// dev/inode of standard output when it is a regular file; enables
/// the input-is-output self-reference check.
pub fn stdout_dev_ino() -> Option<(u64, u64)> {
    #[cfg(unix)]
    {
        let mut st: libc::stat = unsafe { std::mem::zeroed() };
        if unsafe { libc::fstat(libc::STDOUT_FILENO, &mut st) } == 0
            && (st.st_mode & libc::S_IFMT) == libc::S_IFREG
        {
            return Some((st.st_dev as u64, st.st_ino as u64));
        }
    }
    None
}

/// True when standard output is the null device; matching can then
/// stop at the first hit, as nothing will ever be printed.
pub fn stdout_is_null_device() -> bool {
    #[cfg(unix)]
    {
        let mut st: libc::stat = unsafe { std::mem::zeroed() };
        if unsafe { libc::fstat(libc::STDOUT_FILENO, &mut st) } == 0
            && (st.st_mode & libc::S_IFMT) == libc::S_IFCHR
        {
            let mut null_st: libc::stat = unsafe { std::mem::zeroed() };
            let dev_null = std::ffi::CString::new("/dev/null").unwrap();
            if unsafe { libc::stat(dev_null.as_ptr(), &mut null_st) } == 0 {
                return st.st_dev == null_st.st_dev && st.st_ino == null_st.st_ino;
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::colors::ColorSpec;
    use crate::pattern::{Dialect, OriginSpan, PatternConfig};
    use crate::printer::VecSink;
    use std::io::Write;

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

    fn compile(pattern: &str, opts: &Options, dialect: Dialect) -> PatternSet {
        let origins: Vec<OriginSpan> = Vec::new();
        PatternSet::compile(
            pattern.as_bytes(),
            &origins,
            PatternConfig {
                dialect,
                ignore_case: false,
                match_words: opts.match_words,
                match_lines: opts.match_lines,
                eol: opts.eol,
            },
        )
        .unwrap()
    }

    fn run_on_file(pattern: &str, content: &[u8], opts: &Options) -> (Vec<u8>, RunStatus) {
        let set = compile(pattern, opts, Dialect::Extended);
        let mut driver = Driver::new(opts, &set).unwrap();
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(content).unwrap();
        tmp.flush().unwrap();
        let mut sink = VecSink::default();
        let mut status = RunStatus::default();
        let display = tmp.path().display().to_string();
        driver.grep_path(tmp.path(), &display, true, false, &mut sink, &mut status);
        (sink.0, status)
    }

    #[test]
    fn test_basic_selection() {
        let opts = options();
        let (out, status) = run_on_file("abc", b"abc\ndef\nabc\n", &opts);
        assert_eq!(out, b"abc\nabc\n");
        assert!(status.matched);
        assert!(!status.errseen);
    }

    #[test]
    fn test_no_match_status() {
        let opts = options();
        let (out, status) = run_on_file("zzz", b"abc\n", &opts);
        assert!(out.is_empty());
        assert!(!status.matched);
    }

    #[test]
    fn test_invert_partitions_lines() {
        let mut opts = options();
        opts.invert = true;
        let (out, _) = run_on_file("b", b"a\nb\nc\nb\nd\n", &opts);
        assert_eq!(out, b"a\nc\nd\n");
    }

    #[test]
    fn test_line_numbers() {
        let mut opts = options();
        opts.out_line = true;
        let (out, _) = run_on_file("x", b"x\na\nx\n", &opts);
        assert_eq!(out, b"1:x\n3:x\n");
    }

    #[test]
    fn test_byte_offsets() {
        let mut opts = options();
        opts.out_byte = true;
        let (out, _) = run_on_file("b", b"aa\nbb\n", &opts);
        assert_eq!(out, b"3:bb\n");
    }

    #[test]
    fn test_max_count_limits_output() {
        let mut opts = options();
        opts.max_count = 2;
        let (out, _) = run_on_file("x", b"x1\nx2\nx3\nx4\n", &opts);
        assert_eq!(out, b"x1\nx2\n");
    }

    #[test]
    fn test_count_matches_mode() {
        let mut opts = options();
        opts.count_matches = true;
        opts.out_quiet = true;
        let (out, _) = run_on_file("x", b"x\ny\nx\n", &opts);
        assert_eq!(out, b"2\n");
    }

    #[test]
    fn test_final_line_without_newline() {
        let opts = options();
        let (out, _) = run_on_file("def", b"abcdef", &opts);
        assert_eq!(out, b"abcdef\n");
    }

    #[test]
    fn test_binary_file_notice() {
        let opts = options();
        let (out, status) = run_on_file("data", b"data\x00more\n", &opts);
        let s = String::from_utf8_lossy(&out);
        assert!(s.starts_with("Binary file "));
        assert!(s.ends_with(" matches\n"));
        assert!(status.matched);
    }

    #[test]
    fn test_binary_without_match_is_silent() {
        let mut opts = options();
        opts.binary_files = BinaryFiles::WithoutMatch;
        let (out, status) = run_on_file("data", b"data\x00more\n", &opts);
        assert!(out.is_empty());
        assert!(!status.matched);
    }

    #[test]
    fn test_binary_text_mode_prints_lines() {
        let mut opts = options();
        opts.binary_files = BinaryFiles::Text;
        let (out, _) = run_on_file("data", b"data\x00more\n", &opts);
        // Text mode neither zaps NULs nor suppresses the line.
        assert_eq!(out, b"data\x00more\n");
    }

    #[test]
    fn test_all_nul_file() {
        let opts = options();
        let (out, status) = run_on_file("anything", &[0u8; 256], &opts);
        assert!(out.is_empty());
        assert!(!status.matched);
    }

    #[test]
    fn test_trailing_context() {
        let mut opts = options();
        opts.after_context = 1;
        opts.context_requested = true;
        let (out, _) = run_on_file("m", b"m\na\nb\nm\nc\n", &opts);
        assert_eq!(out, b"m\na\n--\nm\nc\n");
    }

    #[test]
    fn test_leading_context() {
        let mut opts = options();
        opts.before_context = 1;
        opts.context_requested = true;
        let (out, _) = run_on_file("m", b"a\nm\nb\nc\nm\n", &opts);
        assert_eq!(out, b"a\nm\n--\nc\nm\n");
    }

    #[test]
    fn test_context_adjacent_no_separator() {
        let mut opts = options();
        opts.before_context = 1;
        opts.after_context = 1;
        opts.context_requested = true;
        let (out, _) = run_on_file("m", b"a\nm\nb\nm\nc\n", &opts);
        // Groups overlap, so no separator appears.
        assert_eq!(out, b"a\nm\nb\nm\nc\n");
    }

    #[test]
    fn test_recursive_directory_scan() {
        let mut opts = options();
        opts.directories = DirAction::Recurse;
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("a.txt"), "match here\n").unwrap();
        std::fs::write(dir.path().join("sub/b.txt"), "no\n").unwrap();
        std::fs::write(dir.path().join("sub/c.txt"), "match too\n").unwrap();

        let set = compile("match", &opts, Dialect::Extended);
        let mut driver = Driver::new(&opts, &set).unwrap();
        let mut sink = VecSink::default();
        let mut status = RunStatus::default();
        let display = dir.path().display().to_string();
        driver.grep_path(dir.path(), &display, true, true, &mut sink, &mut status);

        let text = String::from_utf8(sink.0).unwrap();
        let a = format!("{}/a.txt:match here\n", dir.path().display());
        let c = format!("{}/sub/c.txt:match too\n", dir.path().display());
        assert_eq!(text, format!("{a}{c}"));
        assert!(status.matched);
    }

    #[test]
    fn test_missing_file_sets_errseen() {
        let opts = options();
        let set = compile("x", &opts, Dialect::Extended);
        let mut driver = Driver::new(&opts, &set).unwrap();
        let mut sink = VecSink::default();
        let mut status = RunStatus::default();
        driver.grep_command_line_arg("/no/such/file/here", false, &mut sink, &mut status);
        assert!(status.errseen);
        assert!(!status.matched);
    }

    #[test]
    fn test_match_spanning_buffer_refill() {
        // Line longer than the initial window must be reassembled
        // before matching.
        let opts = options();
        let mut content = vec![b'a'; 40 * 1024];
        content.extend_from_slice(b"needle");
        content.push(b'\n');
        let (out, _) = run_on_file("needle", &content, &opts);
        assert_eq!(out, content);
    }
}
