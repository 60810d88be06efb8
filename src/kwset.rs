//! Multi-string keyword prefilter built from the pattern set's
//! must-list.
//!
//! The keyword set is a necessary-condition filter: every line that
//! can match the full pattern contains at least one keyword, so a miss
//! here lets the engine skip the expensive layers entirely. Entries
//! come in two flavors. An *exact* entry proves the whole pattern on
//! its own (the pattern was a pure literal); exact entries are padded
//! with the end-of-line byte on the sides where the literal was
//! anchored. A *filter* entry merely narrows candidates and always
//! hands off to the automaton/regex layers.

use aho_corasick::{AhoCorasick, AhoCorasickBuilder, MatchKind};

use crate::error::{GrepError, Result};

/// A fixed string that must occur in any match.
#[derive(Debug, Clone)]
pub struct Must {
    pub bytes: Vec<u8>,
    /// The literal is the entire pattern (an exact-match entry).
    pub exact: bool,
    /// Literal was anchored at line start / line end.
    pub begline: bool,
    pub endline: bool,
}

/// Position of a keyword hit inside the searched window.
#[derive(Debug, Clone, Copy)]
pub struct KwMatch {
    pub index: usize,
    pub start: usize,
    pub end: usize,
}

pub struct KwSet {
    ac: AhoCorasick,
    exact_count: usize,
    /// Some entry starts with the end-of-line byte, so searches must
    /// begin one byte early to see the sentinel before the window.
    begline: bool,
}

impl KwSet {
    /// Build the matcher from must-list entries. Exact entries sort to
    /// the front so that a pattern index below `exact_count` certifies
    /// the whole line. Returns None when there is nothing to build.
    pub fn build(musts: Vec<Must>, eol: u8, ignore_case: bool) -> Result<Option<KwSet>> {
        if musts.is_empty() {
            return Ok(None);
        }
        // ASCII case folding is all Aho-Corasick offers; a non-ASCII
        // must under -i would produce false negatives, so give up on
        // the prefilter instead.
        if ignore_case && musts.iter().any(|m| !m.bytes.is_ascii()) {
            return Ok(None);
        }

        let mut entries: Vec<(Vec<u8>, bool)> = Vec::with_capacity(musts.len());
        let mut begline = false;
        for m in &musts {
            if m.exact {
                let mut padded = Vec::with_capacity(m.bytes.len() + 2);
                if m.begline {
                    padded.push(eol);
                    begline = true;
                }
                padded.extend_from_slice(&m.bytes);
                if m.endline {
                    padded.push(eol);
                }
                entries.push((padded, true));
            } else {
                entries.push((m.bytes.clone(), false));
            }
        }
        entries.sort_by_key(|(_, exact)| !*exact);
        let exact_count = entries.iter().take_while(|(_, exact)| *exact).count();

        let ac = AhoCorasickBuilder::new()
            .match_kind(MatchKind::LeftmostFirst)
            .ascii_case_insensitive(ignore_case)
            .build(entries.iter().map(|(bytes, _)| bytes.as_slice()))
            .map_err(|e| GrepError::Pattern(e.to_string()))?;

        Ok(Some(KwSet {
            ac,
            exact_count,
            begline,
        }))
    }

    /// Find the first keyword at or after `from` in `hay[..limit]`.
    /// When an entry is line-start anchored the caller must ensure
    /// `hay[from - 1]` holds the end-of-line sentinel; the search then
    /// starts one byte early so anchored entries can fire on the first
    /// line of the window.
    pub fn find(&self, hay: &[u8], from: usize, limit: usize) -> Option<KwMatch> {
        let start = if self.begline { from - 1 } else { from };
        self.ac.find(&hay[start..limit]).map(|m| KwMatch {
            index: m.pattern().as_usize(),
            start: start + m.start(),
            end: start + m.end(),
        })
    }

    /// True if the entry at `index` confirms the whole pattern.
    pub fn is_exact(&self, index: usize) -> bool {
        index < self.exact_count
    }

    pub fn exact_count(&self) -> usize {
        self.exact_count
    }
}

impl std::fmt::Debug for KwSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KwSet")
            .field("patterns", &self.ac.patterns_len())
            .field("exact_count", &self.exact_count)
            .field("begline", &self.begline)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn must(bytes: &[u8], exact: bool) -> Must {
        Must {
            bytes: bytes.to_vec(),
            exact,
            begline: false,
            endline: false,
        }
    }

    #[test]
    fn test_exact_entries_sort_first() {
        let kws = KwSet::build(
            vec![must(b"filter", false), must(b"whole", true)],
            b'\n',
            false,
        )
        .unwrap()
        .unwrap();
        assert_eq!(kws.exact_count(), 1);
        let hay = b"\nsome whole line\n";
        let m = kws.find(hay, 1, hay.len()).unwrap();
        assert!(kws.is_exact(m.index));
        assert_eq!(&hay[m.start..m.end], b"whole");
    }

    #[test]
    fn test_anchored_entry_uses_sentinel() {
        let kws = KwSet::build(
            vec![Must {
                bytes: b"top".to_vec(),
                exact: true,
                begline: true,
                endline: true,
            }],
            b'\n',
            false,
        )
        .unwrap()
        .unwrap();
        // hay[0] is the sentinel in front of the window starting at 1.
        let hay = b"\ntop\nnot top\n";
        let m = kws.find(hay, 1, hay.len()).unwrap();
        assert_eq!(m.start, 0);
        assert_eq!(&hay[m.start..m.end], b"\ntop\n");
        assert!(kws.find(hay, m.end, hay.len()).is_none());
    }

    #[test]
    fn test_case_folding_is_ascii_only() {
        let kws = KwSet::build(vec![must(b"AbC", false)], b'\n', true)
            .unwrap()
            .unwrap();
        let hay = b"\nxx abc yy\n";
        assert!(kws.find(hay, 1, hay.len()).is_some());

        // Non-ASCII must under -i disables the prefilter entirely.
        assert!(KwSet::build(vec![must("é".as_bytes(), false)], b'\n', true)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_miss_returns_none() {
        let kws = KwSet::build(vec![must(b"needle", false)], b'\n', false)
            .unwrap()
            .unwrap();
        let hay = b"\nplain haystack\n";
        assert!(kws.find(hay, 1, hay.len()).is_none());
    }
}
