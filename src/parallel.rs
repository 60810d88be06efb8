//! Parallel recursive traversal with ordered output.
//!
//! Every worker owns a private filesystem iterator rooted at the same
//! path and advances it over the identical, deterministically sorted
//! entry sequence; only the worker whose id matches
//! `visit_index % workers` actually opens and scans an entry. Output
//! lands in a slot array indexed by visit order, and the main thread
//! flushes slots strictly in index order, so the byte stream cannot be
//! told apart from what the sequential walker would have produced.
//!
//! When a worker's visit counter reaches the round ceiling it returns;
//! once all workers are back, the slots are flushed and a new round
//! starts with the iterators resuming where they stopped.

use std::path::Path;
use std::sync::{Mutex, RwLock};

use crate::config::Options;
use crate::driver::{traversal_selects, Driver};
use crate::error::{suppressible_error, GrepError, Result, RunStatus};
use crate::pattern::PatternSet;
use crate::printer::{OutputSink, StdoutSink};

const INITIAL_NUM_SLOTS: usize = 32 * 1024;

/// Growable array of per-visit output buffers.
///
/// Writers hold the array's read lock plus the slot's own mutex; the
/// array only grows under the write lock, which is the safe
/// equivalent of acquiring every per-slot lock before touching the
/// array header.
pub struct SlotArray {
    slots: RwLock<Vec<Mutex<Vec<u8>>>>,
}

impl SlotArray {
    pub fn new() -> SlotArray {
        Self::with_capacity(INITIAL_NUM_SLOTS)
    }

    pub fn with_capacity(n: usize) -> SlotArray {
        SlotArray {
            slots: RwLock::new((0..n).map(|_| Mutex::new(Vec::new())).collect()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.read().unwrap().len()
    }

    fn append(&self, index: usize, bytes: &[u8]) {
        let slots = self.slots.read().unwrap();
        slots[index].lock().unwrap().extend_from_slice(bytes);
    }

    /// Double the array until `index` fits with headroom.
    fn grow(&self, index: usize) {
        let mut slots = self.slots.write().unwrap();
        if index + 4 < slots.len() {
            return;
        }
        let mut new_len = slots.len().max(1);
        while index + 4 >= new_len {
            new_len *= 2;
        }
        log::debug!("growing slot array {} -> {new_len}", slots.len());
        let additional = new_len - slots.len();
        slots.extend((0..additional).map(|_| Mutex::new(Vec::new())));
    }

    /// Drain one slot for flushing, releasing its memory.
    fn take(&self, index: usize) -> Vec<u8> {
        let slots = self.slots.read().unwrap();
        if index >= slots.len() {
            return Vec::new();
        }
        let taken = std::mem::take(&mut *slots[index].lock().unwrap());
        taken
    }
}

impl Default for SlotArray {
    fn default() -> Self {
        Self::new()
    }
}

/// Sink routing one visit index's output into its slot.
pub struct SlotSink<'a> {
    slots: &'a SlotArray,
    index: usize,
}

impl OutputSink for SlotSink<'_> {
    fn write(&mut self, bytes: &[u8]) {
        self.slots.append(self.index, bytes);
    }

    fn flush(&mut self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RoundEnd {
    Exhausted,
    Ceiling,
}

struct WorkerState<'a> {
    id: usize,
    workers: usize,
    iter: walkdir::IntoIter,
    visited: u64,
    driver: Driver<'a>,
    status: RunStatus,
    out_file: bool,
}

impl WorkerState<'_> {
    fn run_round(&mut self, slots: &SlotArray, max_allowed: u64) -> RoundEnd {
        let opts = self.driver.opts;
        while let Some(entry) = self.iter.next() {
            let index = self.visited as usize;
            let mine = self.visited % self.workers as u64 == self.id as u64;
            if mine && index + 4 >= slots.capacity() {
                slots.grow(index);
            }

            match entry {
                Err(e) => {
                    // Every replica sees the same error entry; only
                    // the owner reports it, keeping the numbering
                    // aligned and the diagnostic single.
                    if mine {
                        let path = e
                            .path()
                            .map(|p| p.display().to_string())
                            .unwrap_or_default();
                        suppressible_error(
                            opts.suppress_errors,
                            &GrepError::io(
                                path,
                                std::io::Error::new(std::io::ErrorKind::Other, e.to_string()),
                            ),
                            &mut self.status,
                        );
                    }
                }
                Ok(ent) => {
                    if mine && traversal_selects(&ent, opts) {
                        let display = ent.path().display().to_string();
                        let mut sink = SlotSink { slots, index };
                        self.driver.grep_path(
                            ent.path(),
                            &display,
                            false,
                            self.out_file,
                            &mut sink,
                            &mut self.status,
                        );
                    }
                }
            }

            self.visited += 1;
            if self.visited >= max_allowed {
                return RoundEnd::Ceiling;
            }
        }
        RoundEnd::Exhausted
    }
}

/// Search a directory tree with `opts.num_threads` workers, flushing
/// ordered output to standard output between rounds.
pub fn run(root: &Path, opts: &Options, set: &PatternSet, status: &mut RunStatus) -> Result<()> {
    let workers = opts.num_threads.max(1);
    let out_file = opts.with_filename.unwrap_or(true);
    let slots = SlotArray::new();
    let max_allowed = (1u64 << 25) * workers as u64 - 8;

    let mut states = Vec::with_capacity(workers);
    for id in 0..workers {
        states.push(WorkerState {
            id,
            workers,
            iter: new_walker(root, opts),
            visited: 0,
            driver: Driver::new(opts, set)?,
            status: RunStatus::default(),
            out_file,
        });
    }

    let mut out = StdoutSink::new();
    loop {
        let mut any_ceiling = false;
        crossbeam::thread::scope(|s| {
            let mut handles = Vec::with_capacity(states.len());
            for state in states.iter_mut() {
                let slots = &slots;
                handles.push(s.spawn(move |_| state.run_round(slots, max_allowed)));
            }
            for handle in handles {
                if handle.join().expect("worker panicked") == RoundEnd::Ceiling {
                    any_ceiling = true;
                }
            }
        })
        .expect("worker scope failed");

        let visited = states[0].visited;
        log::debug!("flushing {} slots", visited);
        for i in 0..visited as usize {
            let bytes = slots.take(i);
            if !bytes.is_empty() {
                out.write(&bytes);
            }
        }
        if !any_ceiling {
            break;
        }
        for state in states.iter_mut() {
            state.visited = 0;
        }
    }
    out.flush();

    for state in &states {
        status.merge(state.status);
    }
    Ok(())
}

/// Deterministic walker construction shared by all replicas; every
/// worker must observe the identical entry sequence.
fn new_walker(root: &Path, opts: &Options) -> walkdir::IntoIter {
    walkdir::WalkDir::new(root)
        .follow_links(opts.deref_recursive)
        .sort_by_file_name()
        .into_iter()
}
