//! Streaming buffer manager.
//!
//! Reads are kept aligned on page boundaries and in multiples of the
//! page size unless a read yields a partial page. The buffer type
//! maintains two documented invariants that the engine and printer
//! rely on:
//!
//! 1. the byte immediately before the window start always holds the
//!    end-of-line byte (sentinel for backward scans), and
//! 2. at least one machine word of writable padding follows the
//!    window end (sentinel for word-aligned readers, and room for the
//!    terminator appended to a trailing residue).
//!
//! Everything between the window bounds came from sequential reads of
//! the descriptor, except where hole skipping seeked past all-zero
//! regions.

use std::io::Read;

use memchr::memchr;

/// Initial window size, not counting slack.
pub const INITIAL_BUFSIZE: usize = 32 * 1024;

const WORD: usize = std::mem::size_of::<usize>();

fn align_to(val: usize, alignment: usize) -> usize {
    match val % alignment {
        0 => val,
        r => val + (alignment - r),
    }
}

fn page_size() -> usize {
    #[cfg(unix)]
    {
        let n = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if n > 0 {
            return n as usize;
        }
    }
    4096
}

fn all_zeros(buf: &[u8]) -> bool {
    buf.iter().all(|&b| b == 0)
}

/// An input descriptor the buffer can refill from.
pub enum InputFile {
    File(std::fs::File),
    Stdin,
}

impl InputFile {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        loop {
            let res = match self {
                InputFile::File(f) => f.read(buf),
                InputFile::Stdin => std::io::stdin().lock().read(buf),
            };
            match res {
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                other => return other,
            }
        }
    }

    #[cfg(unix)]
    fn raw_fd(&self) -> i32 {
        use std::os::unix::io::AsRawFd;
        match self {
            InputFile::File(f) => f.as_raw_fd(),
            InputFile::Stdin => libc::STDIN_FILENO,
        }
    }

    /// Current read offset, when the descriptor is seekable.
    pub fn tell(&self) -> Option<u64> {
        #[cfg(unix)]
        {
            let pos = unsafe { libc::lseek(self.raw_fd(), 0, libc::SEEK_CUR) };
            if pos >= 0 {
                return Some(pos as u64);
            }
        }
        None
    }

    /// Absolute seek; used to reposition stdin after -m stops early.
    pub fn seek_to(&self, pos: u64) -> bool {
        #[cfg(unix)]
        {
            return unsafe { libc::lseek(self.raw_fd(), pos as libc::off_t, libc::SEEK_SET) } >= 0;
        }
        #[cfg(not(unix))]
        {
            let _ = pos;
            false
        }
    }

    /// Whether a hole (and therefore a run of NUL bytes) exists
    /// between the current offset and the end of a regular file of
    /// the given size.
    pub fn has_hole_before(&self, size: u64) -> bool {
        #[cfg(unix)]
        {
            let fd = self.raw_fd();
            let cur = unsafe { libc::lseek(fd, 0, libc::SEEK_CUR) };
            if cur < 0 {
                return false;
            }
            let hole = unsafe { libc::lseek(fd, cur, libc::SEEK_HOLE) };
            if hole >= 0 {
                unsafe { libc::lseek(fd, cur, libc::SEEK_SET) };
                return (hole as u64) < size;
            }
        }
        #[cfg(not(unix))]
        {
            let _ = size;
        }
        false
    }

    /// Seek to the next data region at or after `from`. Returns the
    /// new offset, or None when SEEK_DATA is unsupported or failed
    /// (the caller then disables hole skipping for the file).
    fn seek_data(&self, from: u64, size: Option<u64>) -> Option<u64> {
        #[cfg(unix)]
        {
            let fd = self.raw_fd();
            let pos = unsafe { libc::lseek(fd, from as libc::off_t, libc::SEEK_DATA) };
            if pos >= 0 {
                return Some(pos as u64);
            }
            // A hole at EOF reports ENXIO on some systems; the rest of
            // the file is all zeros, so skip straight to the end.
            let errno = std::io::Error::last_os_error().raw_os_error();
            if errno == Some(libc::ENXIO) {
                if let Some(sz) = size {
                    if from < sz {
                        let end = unsafe { libc::lseek(fd, 0, libc::SEEK_END) };
                        if end >= 0 {
                            return Some(end as u64);
                        }
                    }
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = (from, size);
        }
        None
    }
}

pub struct ScanBuffer {
    data: Vec<u8>,
    beg: usize,
    lim: usize,
    eol: u8,
    pagesize: usize,
    /// File offset just past the last byte read.
    offset: u64,
    /// Replace all-zero blocks with skipped empty lines (-z only).
    pub skip_nuls: bool,
    /// Sticky: SEEK_DATA failed once, stop trying for this file.
    pub seek_data_failed: bool,
    /// Lines accounted for while skipping zero blocks and holes.
    pub skipped_lines: u64,
}

impl ScanBuffer {
    pub fn new(eol: u8) -> ScanBuffer {
        Self::with_initial(eol, INITIAL_BUFSIZE)
    }

    pub fn with_initial(eol: u8, initial: usize) -> ScanBuffer {
        let pagesize = page_size();
        let alloc = align_to(initial.max(1), pagesize) + pagesize + WORD;
        let mut buf = ScanBuffer {
            data: vec![0; alloc],
            beg: 0,
            lim: 0,
            eol,
            pagesize,
            offset: 0,
            skip_nuls: false,
            seek_data_failed: false,
            skipped_lines: 0,
        };
        buf.place_window();
        buf
    }

    fn base_addr(&self) -> usize {
        self.data.as_ptr() as usize
    }

    fn place_window(&mut self) {
        let base = self.base_addr();
        self.beg = align_to(base + 1, self.pagesize) - base;
        self.lim = self.beg;
        self.data[self.beg - 1] = self.eol;
    }

    /// Prepare for a new file. `start_offset` is nonzero only for a
    /// pre-positioned stdin on a regular file.
    pub fn reset(&mut self, start_offset: u64) {
        self.place_window();
        self.offset = start_offset;
        self.skip_nuls = false;
        self.seek_data_failed = false;
        self.skipped_lines = 0;
    }

    pub fn raw(&self) -> &[u8] {
        &self.data
    }

    pub fn beg(&self) -> usize {
        self.beg
    }

    pub fn lim(&self) -> usize {
        self.lim
    }

    /// File offset corresponding to the window limit.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn window_len(&self) -> usize {
        self.lim - self.beg
    }

    /// Consume the lines accounted for by zero-block skipping since
    /// the last call; the caller folds them into its newline total.
    pub fn take_skipped_lines(&mut self) -> u64 {
        std::mem::take(&mut self.skipped_lines)
    }

    /// True if the current window contains a NUL byte.
    pub fn has_nulls(&self) -> bool {
        memchr(0, &self.data[self.beg..self.lim]).is_some()
    }

    /// Replace every NUL byte from `from` to the window limit with
    /// the end-of-line byte, so binary input cannot manufacture
    /// unbounded pseudo-lines.
    pub fn zap_nuls(&mut self, from: usize, zapper: u8) {
        if zapper == 0 {
            return;
        }
        let mut i = from;
        while let Some(off) = memchr(0, &self.data[i..self.lim]) {
            i += off;
            while i < self.lim && self.data[i] == 0 {
                self.data[i] = zapper;
                i += 1;
            }
        }
    }

    /// Terminate a trailing residue. The tail padding guarantees room.
    pub fn append_residue_eol(&mut self) {
        self.data[self.lim] = self.eol;
        self.lim += 1;
    }

    /// Read new data, saving `save` bytes of old data (the incomplete
    /// trailing line). On return the window spans the saved bytes
    /// followed by freshly read data, with both sentinels in place.
    ///
    /// `file_size` is the stat size when it is trustworthy (regular
    /// file); it caps buffer growth so a huge sparse tail does not
    /// balloon the allocation.
    pub fn fill(
        &mut self,
        file: &mut InputFile,
        save: usize,
        file_size: Option<u64>,
    ) -> std::io::Result<()> {
        let saved_offset = self.lim - save;
        let readbuf;

        if self.pagesize <= self.data.len() - WORD - self.lim {
            // Enough slack to read in place.
            readbuf = self.lim;
            self.beg = self.lim - save;
        } else {
            let minsize = save + self.pagesize;
            let mut newsize = self.data.len() - self.pagesize - WORD;
            while newsize < minsize {
                newsize = newsize
                    .checked_mul(2)
                    .expect("buffer size overflow");
            }
            // Try not to allocate more than the file can still
            // provide, unless the read offset already passed the stat
            // size (the file is most likely growing).
            if let Some(sz) = file_size {
                if sz >= self.offset {
                    let maxsize = save as u64 + (sz - self.offset);
                    if minsize as u64 <= maxsize && maxsize < newsize as u64 {
                        newsize = maxsize as usize;
                    }
                }
            }
            let newalloc = newsize + self.pagesize + WORD;
            if self.data.len() < newalloc {
                log::debug!(
                    "growing scan buffer {} -> {} bytes (residue {})",
                    self.data.len(),
                    newalloc,
                    save
                );
                let mut newdata = vec![0u8; newalloc];
                let base = newdata.as_ptr() as usize;
                let rb = align_to(base + 1 + save, self.pagesize) - base;
                newdata[rb - save..rb]
                    .copy_from_slice(&self.data[saved_offset..saved_offset + save]);
                self.data = newdata;
                readbuf = rb;
            } else {
                let base = self.base_addr();
                let rb = align_to(base + 1 + save, self.pagesize) - base;
                self.data.copy_within(saved_offset..saved_offset + save, rb - save);
                readbuf = rb;
            }
            self.beg = readbuf - save;
            self.data[self.beg - 1] = self.eol;
        }

        let mut readsize = self.data.len() - WORD - readbuf;
        readsize -= readsize % self.pagesize;

        let fillsize = loop {
            let n = file.read(&mut self.data[readbuf..readbuf + readsize])?;
            self.offset += n as u64;

            if n == 0 || !self.skip_nuls || !all_zeros(&self.data[readbuf..readbuf + n]) {
                break n;
            }
            // A block of zeros under -z is a run of empty lines; count
            // them and try to leap the hole instead of reading it.
            self.skipped_lines += n as u64;
            if !self.seek_data_failed {
                match file.seek_data(self.offset, file_size) {
                    Some(data_start) => {
                        self.skipped_lines += data_start - self.offset;
                        self.offset = data_start;
                    }
                    None => self.seek_data_failed = true,
                }
            }
        };

        self.lim = readbuf + fillsize;
        // Zero the word after the window; word-at-a-time readers peek
        // at (but never use) those bytes.
        self.data[self.lim..self.lim + WORD].fill(0);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn input(bytes: &[u8]) -> (InputFile, Option<u64>, tempfile::NamedTempFile) {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(bytes).unwrap();
        tmp.flush().unwrap();
        let f = std::fs::File::open(tmp.path()).unwrap();
        (InputFile::File(f), Some(bytes.len() as u64), tmp)
    }

    #[test]
    fn test_sentinel_and_padding_invariants() {
        let content = b"hello\nworld\n";
        let (mut file, size, _tmp) = input(content);
        let mut buf = ScanBuffer::new(b'\n');
        buf.reset(0);
        buf.fill(&mut file, 0, size).unwrap();
        assert!(buf.beg() >= 1);
        assert_eq!(buf.raw()[buf.beg() - 1], b'\n');
        assert_eq!(&buf.raw()[buf.beg()..buf.lim()], content);
        // Tail padding is zeroed and within the allocation.
        assert!(buf.lim() + WORD <= buf.raw().len());
        assert!(buf.raw()[buf.lim()..buf.lim() + WORD].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_residue_preserved_across_refills() {
        // A line that straddles the first page-sized read must be
        // reassembled by the save/copy path.
        let pagesize = page_size();
        let mut content = vec![b'a'; pagesize - 3];
        content.push(b'\n');
        content.extend_from_slice(b"straddling-line-tail\n");
        let (mut file, size, _tmp) = input(&content);

        let mut buf = ScanBuffer::with_initial(b'\n', 1);
        buf.reset(0);
        buf.fill(&mut file, 0, size).unwrap();
        let first = buf.window_len();
        assert!(first <= content.len());

        // Everything after the last newline is residue.
        let window = &buf.raw()[buf.beg()..buf.lim()];
        let last_nl = window.iter().rposition(|&b| b == b'\n').unwrap();
        let save = window.len() - (last_nl + 1);
        let residue: Vec<u8> = window[last_nl + 1..].to_vec();

        buf.fill(&mut file, save, size).unwrap();
        assert_eq!(buf.raw()[buf.beg() - 1], b'\n');
        let window = &buf.raw()[buf.beg()..buf.lim()];
        assert!(window.starts_with(&residue));
        assert!(window.ends_with(b"straddling-line-tail\n"));
    }

    #[test]
    fn test_whole_file_reassembles() {
        let pagesize = page_size();
        let mut content = Vec::new();
        for i in 0..(3 * pagesize / 10) {
            content.extend_from_slice(format!("line number {i}\n").as_bytes());
        }
        let (mut file, size, _tmp) = input(&content);

        let mut buf = ScanBuffer::with_initial(b'\n', 1);
        buf.reset(0);
        let mut collected = Vec::new();
        let mut save = 0;
        loop {
            buf.fill(&mut file, save, size).unwrap();
            let fresh = buf.lim() - (buf.beg() + save);
            if fresh == 0 {
                break;
            }
            let full = &buf.raw()[buf.beg()..buf.lim()];
            // Collect up to the last complete line; the rest is the
            // residue rolled into the next fill.
            let keep = full.iter().rposition(|&b| b == b'\n').map_or(0, |i| i + 1);
            collected.extend_from_slice(&full[..keep]);
            save = full.len() - keep;
        }
        collected.extend_from_slice(&buf.raw()[buf.lim() - save..buf.lim()]);
        assert_eq!(collected, content);
    }

    #[test]
    fn test_zap_nuls_rewrites_zero_bytes() {
        let content = b"ab\x00cd\x00\x00ef\n";
        let (mut file, size, _tmp) = input(content);
        let mut buf = ScanBuffer::new(b'\n');
        buf.reset(0);
        buf.fill(&mut file, 0, size).unwrap();
        assert!(buf.has_nulls());
        buf.zap_nuls(buf.beg(), b'\n');
        assert!(!buf.has_nulls());
        assert_eq!(&buf.raw()[buf.beg()..buf.lim()], b"ab\ncd\n\nef\n");
    }

    #[test]
    fn test_skip_nuls_counts_zero_blocks_as_lines() {
        let pagesize = page_size();
        let mut content = vec![0u8; pagesize];
        content.extend_from_slice(b"data\x00");
        let (mut file, size, _tmp) = input(&content);
        let mut buf = ScanBuffer::with_initial(0, 1);
        buf.reset(0);
        buf.skip_nuls = true;
        buf.fill(&mut file, 0, size).unwrap();
        let window = &buf.raw()[buf.beg()..buf.lim()];
        assert_eq!(window, b"data\x00");
        assert_eq!(buf.skipped_lines, pagesize as u64);
    }

    #[test]
    fn test_append_residue_eol_uses_tail_padding() {
        let content = b"no-trailing-newline";
        let (mut file, size, _tmp) = input(content);
        let mut buf = ScanBuffer::new(b'\n');
        buf.reset(0);
        buf.fill(&mut file, 0, size).unwrap();
        let lim = buf.lim();
        buf.append_residue_eol();
        assert_eq!(buf.lim(), lim + 1);
        assert_eq!(buf.raw()[buf.lim() - 1], b'\n');
    }
}
