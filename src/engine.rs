//! The layered match engine: keyword prefilter, scan automaton, and
//! the per-pattern fallback array, run as an explicit state machine.
//!
//! The cascade ordering is a contract, not an optimization: the
//! prefilter may only ever skip text that cannot match, the automaton
//! narrows candidates to single lines, and the fallback array is
//! consulted only when the automaton cannot decide on its own
//! (back-references, anchors, word/line modes) or when a caller probes
//! a specific position for intra-line match extents.

use memchr::{memchr, memrchr};
use regex_automata::dfa::Automaton;
use regex_automata::Input;

use crate::error::Result;
use crate::kwset::KwSet;
use crate::pattern::{PatternEngine, PatternSet, ScanDfa};

/// A selected region, absolute within the searched window. In normal
/// mode this is a whole line including its end-of-line byte; in probe
/// mode it is the exact match extent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineMatch {
    pub start: usize,
    pub len: usize,
}

/// States of the cascade. Offsets are absolute within the window.
enum State {
    /// Looking for the next candidate from `beg` on.
    Searching { beg: usize },
    /// The prefilter hit; `scan_end` bounds the automaton run.
    KwHit {
        line_beg: usize,
        scan_end: usize,
        exact: bool,
    },
    /// Run the automaton over `[scan_beg, scan_end)`.
    DfaScan { scan_beg: usize, scan_end: usize },
    /// The automaton (or its absence) left a single candidate line
    /// that the fallback array must decide.
    RegexNeeded { line_beg: usize, line_end: usize },
    /// A whole line was selected.
    Accept { line_beg: usize, line_end: usize },
}

/// One worker's private replica of the compiled matcher. Replicas are
/// never shared across threads; the fallback engines keep scratch
/// state internally, exactly like the register blocks they replace.
pub struct Searcher {
    engines: Vec<PatternEngine>,
    dfa: Option<ScanDfa>,
    kwset: Option<KwSet>,
    eol: u8,
    match_words: bool,
    match_lines: bool,
}

impl Searcher {
    pub fn new(set: &PatternSet) -> Result<Searcher> {
        Ok(Searcher {
            engines: set.compile_engines()?,
            dfa: set.compile_dfa(),
            kwset: set.compile_kwset()?,
            eol: set.config.eol,
            match_words: set.config.match_words,
            match_lines: set.config.match_lines,
        })
    }

    /// Find the next matching line in `hay[start..limit]`, or probe
    /// position `probe` for the exact leftmost-longest match extent.
    ///
    /// Contract: `hay[start - 1]` holds the end-of-line byte (the
    /// buffer sentinel), and every line inside the window is
    /// terminated; the caller appends a terminator to a trailing
    /// residue before the final pass.
    pub fn execute(
        &self,
        hay: &[u8],
        start: usize,
        limit: usize,
        probe: Option<usize>,
    ) -> Option<LineMatch> {
        if let Some(ptr) = probe {
            let line_end = self.line_end(hay, ptr.max(start), limit);
            let line_beg = self.line_start(hay, start, ptr.max(start));
            return self.regex_probe(hay, line_beg, line_end, ptr);
        }

        let mut state = State::Searching { beg: start };
        loop {
            state = match state {
                State::Searching { beg } => {
                    if beg >= limit {
                        return None;
                    }
                    match &self.kwset {
                        Some(kws) => match kws.find(hay, beg, limit) {
                            None => return None,
                            Some(hit) => {
                                let pos = hit.start.max(beg);
                                let line_beg = self.line_start(hay, start, pos);
                                let exact = kws.is_exact(hit.index);
                                let scan_end =
                                    self.kw_scan_end(hay, beg, line_beg, pos, limit, exact);
                                State::KwHit {
                                    line_beg,
                                    scan_end,
                                    exact,
                                }
                            }
                        },
                        None => State::DfaScan {
                            scan_beg: beg,
                            scan_end: limit,
                        },
                    }
                }

                State::KwHit {
                    line_beg,
                    scan_end,
                    exact,
                } => {
                    if exact {
                        // The entry proves the whole pattern; the hit
                        // line is selected as-is.
                        State::Accept {
                            line_beg,
                            line_end: self.line_end(hay, line_beg, limit),
                        }
                    } else {
                        State::DfaScan {
                            scan_beg: line_beg,
                            scan_end,
                        }
                    }
                }

                State::DfaScan { scan_beg, scan_end } => match &self.dfa {
                    None => State::RegexNeeded {
                        line_beg: scan_beg,
                        line_end: self.line_end(hay, scan_beg, limit),
                    },
                    Some(scan) => match self.dfa_find(scan, hay, scan_beg, scan_end) {
                        Ok(None) => State::Searching { beg: scan_end },
                        Ok(Some(pos)) => {
                            let line_beg = self.line_start(hay, start, pos);
                            let line_end = self.line_end(hay, pos, limit);
                            if scan.exact {
                                // Rule out candidates the window-wide
                                // run produced by crossing a line
                                // boundary (negated classes match the
                                // terminator).
                                let content_end = self.content_end(hay, line_beg, line_end);
                                match self.dfa_find(scan, hay, line_beg, content_end) {
                                    Ok(Some(_)) => State::Accept { line_beg, line_end },
                                    _ => State::Searching { beg: line_end },
                                }
                            } else {
                                State::RegexNeeded { line_beg, line_end }
                            }
                        }
                        // The automaton gave up on this haystack; let
                        // the fallback array decide line by line.
                        Err(()) => State::RegexNeeded {
                            line_beg: scan_beg,
                            line_end: self.line_end(hay, scan_beg, limit),
                        },
                    },
                },

                State::RegexNeeded { line_beg, line_end } => {
                    if self.regex_confirm(hay, line_beg, line_end) {
                        State::Accept { line_beg, line_end }
                    } else {
                        State::Searching { beg: line_end }
                    }
                }

                State::Accept { line_beg, line_end } => {
                    return Some(LineMatch {
                        start: line_beg,
                        len: line_end - line_beg,
                    });
                }
            };
        }
    }

    fn line_start(&self, hay: &[u8], floor: usize, pos: usize) -> usize {
        match memrchr(self.eol, &hay[floor..pos]) {
            Some(i) => floor + i + 1,
            None => floor,
        }
    }

    fn line_end(&self, hay: &[u8], pos: usize, limit: usize) -> usize {
        match memchr(self.eol, &hay[pos..limit]) {
            Some(i) => pos + i + 1,
            None => limit,
        }
    }

    fn content_end(&self, hay: &[u8], line_beg: usize, line_end: usize) -> usize {
        if line_end > line_beg && hay[line_end - 1] == self.eol {
            line_end - 1
        } else {
            line_end
        }
    }

    /// Bound for the automaton run following a keyword hit. An exact
    /// hit or a slow automaton stops at the hit line; a fast automaton
    /// gets up to four times the distance already covered, so it keeps
    /// ahead of the prefilter on dense candidate regions.
    fn kw_scan_end(
        &self,
        hay: &[u8],
        prev_beg: usize,
        line_beg: usize,
        pos: usize,
        limit: usize,
        exact: bool,
    ) -> usize {
        let fast = self.dfa.as_ref().map_or(false, |d| d.is_fast);
        let lead = std::cmp::max(16, pos - line_beg);
        let end = if exact || !fast || lead < (pos - prev_beg) / 4 {
            pos
        } else if lead < (limit - prev_beg) / 4 {
            std::cmp::min(limit, prev_beg + 4 * lead)
        } else {
            limit
        };
        self.line_end(hay, end, limit)
    }

    fn dfa_find(
        &self,
        scan: &ScanDfa,
        hay: &[u8],
        from: usize,
        to: usize,
    ) -> std::result::Result<Option<usize>, ()> {
        match scan.dfa.try_search_fwd(&Input::new(hay).range(from..to)) {
            Ok(hit) => Ok(hit.map(|hm| hm.offset())),
            Err(_) => Err(()),
        }
    }

    /// Does this line match, honoring whole-line and whole-word modes?
    fn regex_confirm(&self, hay: &[u8], line_beg: usize, line_end: usize) -> bool {
        let content_end = self.content_end(hay, line_beg, line_end);
        let line = &hay[line_beg..content_end];
        for engine in &self.engines {
            if self.line_matches(engine, line) {
                return true;
            }
        }
        false
    }

    fn line_matches(&self, engine: &PatternEngine, line: &[u8]) -> bool {
        let Some((mut mstart, mut mlen)) = engine.find_from(line, 0) else {
            return false;
        };
        if self.match_lines {
            return mstart == 0 && mlen == line.len();
        }
        if !self.match_words {
            return true;
        }
        // Whole-word mode: shrink, then advance. A line can hold more
        // than one occurrence, and a shorter alternative at the same
        // spot may be the one that lands on a word boundary.
        loop {
            if !prev_is_word(line, mstart) && !next_is_word(line, mstart + mlen) {
                return true;
            }
            let mut shorter = None;
            if mlen > 0 {
                shorter = engine.find_anchored_bounded(line, mstart, mstart + mlen - 1);
            }
            match shorter {
                Some(len) if len > 0 => mlen = len,
                _ => {
                    if mstart + 1 > line.len() {
                        return false;
                    }
                    match engine.find_from(line, mstart + 1) {
                        Some((s, l)) => {
                            mstart = s;
                            mlen = l;
                        }
                        None => return false,
                    }
                }
            }
        }
    }

    /// Probe mode: leftmost-then-longest exact extent at or after
    /// `ptr`, across all patterns. Used by the printer for coloring
    /// and --only-matching.
    fn regex_probe(
        &self,
        hay: &[u8],
        line_beg: usize,
        line_end: usize,
        ptr: usize,
    ) -> Option<LineMatch> {
        let content_end = self.content_end(hay, line_beg, line_end);
        if ptr > content_end {
            return None;
        }
        let line = &hay[line_beg..content_end];
        let rel_ptr = ptr - line_beg;
        let mut best: Option<(usize, usize)> = None;
        for engine in &self.engines {
            let found = if self.match_words && !self.match_lines {
                self.probe_word(engine, line, rel_ptr, best.map_or(line.len(), |(s, _)| s))
            } else if self.match_lines {
                match engine.find_from(line, rel_ptr) {
                    Some((s, l)) if s == rel_ptr && l == line.len() - rel_ptr => {
                        Some((rel_ptr, line.len() - rel_ptr))
                    }
                    _ => None,
                }
            } else {
                engine.find_from(line, rel_ptr)
            };
            if let Some((s, l)) = found {
                let better = match best {
                    None => true,
                    Some((bs, bl)) => s < bs || (s == bs && l > bl),
                };
                if better {
                    best = Some((s, l));
                }
            }
        }
        best.map(|(s, l)| LineMatch {
            start: line_beg + s,
            len: l,
        })
    }

    /// The word-boundary walk of probe mode, bounded by the best
    /// candidate found so far.
    fn probe_word(
        &self,
        engine: &PatternEngine,
        line: &[u8],
        from: usize,
        best_start: usize,
    ) -> Option<(usize, usize)> {
        let (mut mstart, mut mlen) = engine.find_from(line, from)?;
        while mstart <= best_start {
            if !prev_is_word(line, mstart) && !next_is_word(line, mstart + mlen) {
                return Some((mstart, mlen));
            }
            let mut shorter = None;
            if mlen > 0 {
                shorter = engine.find_anchored_bounded(line, mstart, mstart + mlen - 1);
            }
            match shorter {
                Some(len) if len > 0 => mlen = len,
                _ => {
                    if mstart + 1 > line.len() {
                        return None;
                    }
                    match engine.find_from(line, mstart + 1) {
                        Some((s, l)) => {
                            mstart = s;
                            mlen = l;
                        }
                        None => return None,
                    }
                }
            }
        }
        None
    }
}

impl PatternEngine {
    /// Leftmost match starting at or after `from`.
    pub(crate) fn find_from(&self, line: &[u8], from: usize) -> Option<(usize, usize)> {
        if from > line.len() {
            return None;
        }
        match self {
            PatternEngine::Standard(re) => re
                .find_at(line, from)
                .map(|m| (m.start(), m.end() - m.start())),
            PatternEngine::Backref(re) => {
                // The fancy engine works on str; a line that is not
                // valid UTF-8 cannot match a back-reference pattern.
                let s = std::str::from_utf8(line).ok()?;
                let mut pos = from;
                while pos < s.len() && !s.is_char_boundary(pos) {
                    pos += 1;
                }
                re.find_from_pos(s, pos)
                    .ok()
                    .flatten()
                    .map(|m| (m.start(), m.end() - m.start()))
            }
        }
    }

    /// Longest match anchored exactly at `at` ending no later than
    /// `bound`, or None if nothing is anchored there.
    pub(crate) fn find_anchored_bounded(
        &self,
        line: &[u8],
        at: usize,
        bound: usize,
    ) -> Option<usize> {
        let bound = bound.min(line.len());
        if at > bound {
            return None;
        }
        match self {
            PatternEngine::Standard(re) => match re.find_at(&line[..bound], at) {
                Some(m) if m.start() == at => Some(m.end() - at),
                _ => None,
            },
            PatternEngine::Backref(re) => {
                let mut b = bound;
                let s = std::str::from_utf8(line).ok()?;
                while b > at && !s.is_char_boundary(b) {
                    b -= 1;
                }
                match re.find_from_pos(&s[..b], at).ok().flatten() {
                    Some(m) if m.start() == at => Some(m.end() - at),
                    _ => None,
                }
            }
        }
    }
}

/// Whether -w considers the character ending at `pos` a word
/// constituent. Underscore and alphanumerics count; bytes that do not
/// decode are not word characters.
fn prev_is_word(line: &[u8], pos: usize) -> bool {
    if pos == 0 {
        return false;
    }
    let b = line[pos - 1];
    if b.is_ascii() {
        return b == b'_' || b.is_ascii_alphanumeric();
    }
    for w in 2..=4 {
        if pos >= w {
            if let Ok(s) = std::str::from_utf8(&line[pos - w..pos]) {
                if let Some(c) = s.chars().next() {
                    return c.is_alphanumeric() || c == '_';
                }
            }
        }
    }
    false
}

fn next_is_word(line: &[u8], pos: usize) -> bool {
    if pos >= line.len() {
        return false;
    }
    let b = line[pos];
    if b.is_ascii() {
        return b == b'_' || b.is_ascii_alphanumeric();
    }
    let end = (pos + 4).min(line.len());
    for w in 2..=end - pos {
        if let Ok(s) = std::str::from_utf8(&line[pos..pos + w]) {
            if let Some(c) = s.chars().next() {
                return c.is_alphanumeric() || c == '_';
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::{Dialect, PatternConfig, PatternSet};

    fn searcher(pattern: &str, dialect: Dialect, words: bool, lines: bool, icase: bool) -> Searcher {
        let config = PatternConfig {
            dialect,
            ignore_case: icase,
            match_words: words,
            match_lines: lines,
            eol: b'\n',
        };
        let set = PatternSet::compile(pattern.as_bytes(), &[], config).unwrap();
        Searcher::new(&set).unwrap()
    }

    /// Collect every matching line of `text`, exercising the same
    /// window contract the buffer manager provides: a sentinel byte in
    /// front, every line terminated.
    fn select(s: &Searcher, text: &str) -> Vec<String> {
        let mut hay = vec![b'\n'];
        hay.extend_from_slice(text.as_bytes());
        if !hay.ends_with(b"\n") {
            hay.push(b'\n');
        }
        let limit = hay.len();
        let mut out = Vec::new();
        let mut beg = 1;
        while beg < limit {
            match s.execute(&hay, beg, limit, None) {
                Some(m) => {
                    out.push(
                        String::from_utf8_lossy(&hay[m.start..m.start + m.len])
                            .trim_end_matches('\n')
                            .to_string(),
                    );
                    beg = m.start + m.len;
                }
                None => break,
            }
        }
        out
    }

    #[test]
    fn test_literal_selects_lines() {
        let s = searcher("abc", Dialect::Extended, false, false, false);
        assert_eq!(select(&s, "abc\ndef\nabc\n"), vec!["abc", "abc"]);
    }

    #[test]
    fn test_substring_hit_selects_whole_line() {
        let s = searcher("bc", Dialect::Extended, false, false, false);
        assert_eq!(select(&s, "xxbcx\nno\n"), vec!["xxbcx"]);
    }

    #[test]
    fn test_alternation() {
        let s = searcher("cat|dog", Dialect::Extended, false, false, false);
        assert_eq!(select(&s, "a cat\na bird\na dog\n"), vec!["a cat", "a dog"]);
    }

    #[test]
    fn test_anchored_line_pattern() {
        let s = searcher("^b$", Dialect::Extended, false, false, false);
        assert_eq!(select(&s, "a\nb\nab\nb\n"), vec!["b", "b"]);
    }

    #[test]
    fn test_backref_fallback() {
        let s = searcher(r"(a)\1", Dialect::Extended, false, false, false);
        assert_eq!(select(&s, "aa\nab\n"), vec!["aa"]);
    }

    #[test]
    fn test_whole_line_mode() {
        let s = searcher("b", Dialect::Extended, false, true, false);
        assert_eq!(select(&s, "b\nab\nb c\nb\n"), vec!["b", "b"]);
    }

    #[test]
    fn test_whole_word_mode() {
        let s = searcher("cat", Dialect::Extended, true, false, false);
        assert_eq!(
            select(&s, "a cat here\nconcatenate\ncat\nbobcat\n"),
            vec!["a cat here", "cat"]
        );
    }

    #[test]
    fn test_whole_word_shrink_alternative() {
        // `=+` greedily takes `==` whose right neighbor is a word
        // character; the shorter anchored match still lands on a
        // boundary, so the line is selected.
        let s = searcher("=+", Dialect::Extended, true, false, false);
        assert_eq!(select(&s, "==x\n"), vec!["==x"]);
        assert!(select(&s, "a=b\n").is_empty());
    }

    #[test]
    fn test_ignore_case() {
        let s = searcher("AbC", Dialect::Extended, false, false, true);
        assert_eq!(select(&s, "abc\nABC\nxbc\n"), vec!["abc", "ABC"]);
    }

    #[test]
    fn test_empty_pattern_selects_every_line() {
        let s = searcher("", Dialect::Basic, false, false, false);
        assert_eq!(select(&s, "a\n\nb\n"), vec!["a", "", "b"]);
    }

    #[test]
    fn test_no_match_returns_none() {
        let s = searcher("zebra", Dialect::Extended, false, false, false);
        assert!(select(&s, "a\nb\n").is_empty());
    }

    #[test]
    fn test_probe_returns_match_extent() {
        let s = searcher("[0-9]+", Dialect::Extended, false, false, false);
        let hay = b"\nab 123 cd 45\n";
        let m = s.execute(hay, 1, hay.len(), Some(1)).unwrap();
        assert_eq!(&hay[m.start..m.start + m.len], b"123");
        let m2 = s.execute(hay, 1, hay.len(), Some(m.start + m.len)).unwrap();
        assert_eq!(&hay[m2.start..m2.start + m2.len], b"45");
        assert!(s
            .execute(hay, 1, hay.len(), Some(m2.start + m2.len))
            .is_none());
    }

    #[test]
    fn test_probe_leftmost_longest_across_patterns() {
        let s = searcher("ab\nabcd", Dialect::Extended, false, false, false);
        let hay = b"\nxxabcdyy\n";
        let m = s.execute(hay, 1, hay.len(), Some(1)).unwrap();
        assert_eq!(&hay[m.start..m.start + m.len], b"abcd");
    }

    #[test]
    fn test_multiple_patterns_from_blob() {
        let s = searcher("one\ntwo", Dialect::Extended, false, false, false);
        assert_eq!(
            select(&s, "one\nthree\ntwo here\n"),
            vec!["one", "two here"]
        );
    }

    #[test]
    fn test_negated_class_does_not_cross_lines() {
        // The window-wide automaton can produce a candidate spanning
        // the terminator; the per-line recheck must reject it.
        let s = searcher("a[^x]*b", Dialect::Extended, false, false, false);
        assert!(select(&s, "a\nb\n").is_empty());
        assert_eq!(select(&s, "aqqb\n"), vec!["aqqb"]);
    }

    #[test]
    fn test_bre_dialect_end_to_end() {
        let s = searcher(r"a\(b\|c\)d", Dialect::Basic, false, false, false);
        assert_eq!(select(&s, "abd\nacd\naxd\n"), vec!["abd", "acd"]);
    }
}
