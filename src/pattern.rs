//! Pattern compilation: dialect translation, per-pattern engines, the
//! scan DFA, and must-list extraction for the keyword prefilter.
//!
//! The input is a newline-separated pattern blob (NUL-separated under
//! -z never occurs: -e/-f always join with newlines, matching the
//! original tool). Each pattern compiles separately so that a syntax
//! error or a back-reference stays local to the pattern containing it;
//! the joined form feeds the DFA layer.

use memchr::memchr;
use regex_automata::dfa::dense;
use regex_syntax::hir::{Hir, HirKind, Look};

use crate::error::{GrepError, Result};
use crate::kwset::Must;

/// Regex dialect selected on the command line; the last flag wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Basic,
    Extended,
    Awk,
    GnuAwk,
    PosixAwk,
    Perl,
    Fixed,
}

/// Compilation inputs shared by every layer.
#[derive(Debug, Clone, Copy)]
pub struct PatternConfig {
    pub dialect: Dialect,
    pub ignore_case: bool,
    pub match_words: bool,
    pub match_lines: bool,
    pub eol: u8,
}

/// Byte range of the pattern blob contributed by one -e/-f option,
/// used to resolve `file:lineno:` prefixes on compile errors.
#[derive(Debug, Clone)]
pub struct OriginSpan {
    pub start: usize,
    pub end: usize,
    /// None for command-line patterns (bare diagnostic).
    pub file: Option<String>,
}

/// One compiled pattern of the fallback array.
#[derive(Debug)]
pub enum PatternEngine {
    Standard(regex::bytes::Regex),
    /// Used when the pattern carries back-references, which the
    /// standard engine does not support.
    Backref(fancy_regex::Regex),
}

/// The window-scanning automaton. `exact` is false whenever the
/// automaton accepts a superset of the pattern language (widened
/// back-references or anchors, word/line wrapping, NUL line
/// terminators); inexact hits always go through the regex array.
pub struct ScanDfa {
    pub dfa: dense::DFA<Vec<u32>>,
    pub exact: bool,
    pub is_fast: bool,
}

impl std::fmt::Debug for ScanDfa {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanDfa")
            .field("exact", &self.exact)
            .field("is_fast", &self.is_fast)
            .finish()
    }
}

/// A compiled, immutable pattern set. Workers replicate the runtime
/// artifacts from this by recompiling (the fallback engines keep
/// mutable scratch internally, so replicas are never shared).
#[derive(Debug)]
pub struct PatternSet {
    pub config: PatternConfig,
    /// Translated (modern-syntax) per-pattern sources.
    translated: Vec<String>,
    backrefs: Vec<bool>,
    scan_pattern: String,
    scan_exact: bool,
    scan_fast: bool,
    musts: Option<Vec<Must>>,
}

impl PatternSet {
    /// Split the blob, translate each pattern for the configured
    /// dialect, and precompute the joined scan pattern and must-list.
    /// Any per-pattern failure is reported with a `file:lineno:`
    /// prefix when the pattern came from a file.
    pub fn compile(blob: &[u8], origins: &[OriginSpan], mut config: PatternConfig) -> Result<PatternSet> {
        let mut dialect = config.dialect;
        let blob = if dialect == Dialect::Fixed && should_promote_fixed(blob, &config) {
            log::debug!("promoting fixed-strings pattern to the basic dialect");
            dialect = Dialect::Basic;
            config.dialect = Dialect::Basic;
            fixed_to_basic(blob)
        } else {
            blob.to_vec()
        };

        let mut translated = Vec::new();
        let mut backrefs = Vec::new();
        let mut offset = 0;
        let mut errors: Vec<String> = Vec::new();
        while offset <= blob.len() {
            let rest = &blob[offset..];
            let len = memchr(b'\n', rest).unwrap_or(rest.len());
            let pat = &rest[..len];
            // Translate, then test-compile, so every syntax error is
            // caught here with its filename:lineno prefix; replica
            // compilation later cannot fail.
            let outcome = translate_one(pat, dialect).and_then(|t| {
                let backref = has_backref(&t);
                compile_engine(&t, backref, &config).map(|_| (t, backref))
            });
            match outcome {
                Ok((t, backref)) => {
                    backrefs.push(backref);
                    translated.push(t);
                }
                Err(msg) => {
                    let prefixed = match resolve_origin(origins, &blob, offset) {
                        Some((file, lineno)) => format!("{file}:{lineno}: {msg}"),
                        None => msg,
                    };
                    errors.push(prefixed);
                }
            }
            if offset + len >= blob.len() {
                break;
            }
            offset += len + 1;
        }
        if !errors.is_empty() {
            return Err(GrepError::Pattern(errors.join("\n")));
        }

        // Joined form for the DFA; -w/-x wrap it so the automaton can
        // rule out unbounded candidates, while the per-pattern array
        // stays unwrapped for boundary resolution.
        let joined = translated
            .iter()
            .map(|t| format!("(?:{t})"))
            .collect::<Vec<_>>()
            .join("|");
        let wrapped = if config.match_lines {
            format!("^(?:{joined})$")
        } else if config.match_words {
            format!("(?:^|[^0-9A-Za-z_])(?:{joined})(?:[^0-9A-Za-z_]|$)")
        } else {
            joined
        };
        let (scan_pattern, widened) = widen_for_scan(&wrapped);
        let any_backref = backrefs.iter().any(|&b| b);
        let scan_exact = !any_backref
            && !widened
            && !config.match_words
            && !config.match_lines
            && config.eol == b'\n';
        let scan_fast = scan_exact && scan_pattern.is_ascii();

        let musts = extract_musts(&translated, &backrefs, &config);

        Ok(PatternSet {
            config,
            translated,
            backrefs,
            scan_pattern,
            scan_exact,
            scan_fast,
            musts,
        })
    }

    pub fn has_backrefs(&self) -> bool {
        self.backrefs.iter().any(|&b| b)
    }

    /// Compile the per-pattern fallback array. Every pattern was
    /// test-compiled during `compile`, so failures here cannot occur
    /// in practice.
    pub(crate) fn compile_engines(&self) -> Result<Vec<PatternEngine>> {
        self.translated
            .iter()
            .zip(&self.backrefs)
            .map(|(t, &backref)| {
                compile_engine(t, backref, &self.config).map_err(GrepError::Pattern)
            })
            .collect()
    }

    /// Compile the dense scan automaton. A build failure (size limits
    /// on a pathological pattern) disables the DFA layer rather than
    /// failing the run; the engine then confirms line by line.
    pub(crate) fn compile_dfa(&self) -> Option<ScanDfa> {
        let unicode = self.config.ignore_case && !self.scan_pattern.is_ascii();
        let syntax = regex_automata::util::syntax::Config::new()
            .case_insensitive(self.config.ignore_case)
            .unicode(unicode)
            .utf8(false)
            .multi_line(false)
            .dot_matches_new_line(self.config.eol != b'\n');
        match dense::Builder::new()
            .syntax(syntax)
            .configure(dense::Config::new())
            .build(&self.scan_pattern)
        {
            Ok(dfa) => Some(ScanDfa {
                dfa,
                exact: self.scan_exact,
                is_fast: self.scan_fast,
            }),
            Err(e) => {
                log::warn!("scan automaton unavailable, falling back to per-line confirmation: {e}");
                None
            }
        }
    }

    /// Build the keyword prefilter from the extracted must-list.
    pub(crate) fn compile_kwset(&self) -> Result<Option<crate::kwset::KwSet>> {
        match &self.musts {
            Some(musts) => crate::kwset::KwSet::build(
                musts.clone(),
                self.config.eol,
                self.config.ignore_case,
            ),
            None => Ok(None),
        }
    }
}

/// Fixed-strings promotion test: (1) single-byte word matching, (2)
/// encoding errors in the pattern, (3) -i without a cheap fold.
fn should_promote_fixed(blob: &[u8], config: &PatternConfig) -> bool {
    if config.match_words {
        return true;
    }
    if std::str::from_utf8(blob).is_err() {
        return true;
    }
    config.ignore_case && !blob.is_ascii()
}

/// Escape the bytes that are special in a basic regex, leaving the
/// rest untouched. Invalid UTF-8 bytes are carried through verbatim;
/// they only ever arise from byte-identical fixed strings.
fn fixed_to_basic(blob: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(blob.len() * 2);
    for &b in blob {
        if matches!(b, b'$' | b'*' | b'.' | b'[' | b'\\' | b'^') {
            out.push(b'\\');
        }
        out.push(b);
    }
    out
}

/// Compile one translated pattern into its engine.
fn compile_engine(
    t: &str,
    backref: bool,
    config: &PatternConfig,
) -> std::result::Result<PatternEngine, String> {
    if backref {
        let mut flags = String::new();
        if config.ignore_case {
            flags.push('i');
        }
        if config.eol != b'\n' {
            flags.push('s');
        }
        let pat = if flags.is_empty() {
            t.to_string()
        } else {
            format!("(?{flags}){t}")
        };
        fancy_regex::Regex::new(&pat)
            .map(PatternEngine::Backref)
            .map_err(|e| e.to_string())
    } else {
        regex::bytes::RegexBuilder::new(t)
            .case_insensitive(config.ignore_case)
            .multi_line(false)
            .dot_matches_new_line(config.eol != b'\n')
            .build()
            .map(PatternEngine::Standard)
            .map_err(|e| e.to_string())
    }
}

fn translate_one(pat: &[u8], dialect: Dialect) -> std::result::Result<String, String> {
    let text = std::str::from_utf8(pat)
        .map_err(|_| "invalid multibyte sequence in pattern".to_string())?;
    match dialect {
        Dialect::Basic => bre_to_modern(text),
        Dialect::Extended | Dialect::Awk | Dialect::GnuAwk | Dialect::PosixAwk => {
            Ok(ere_to_modern(text))
        }
        Dialect::Perl => Ok(text.to_string()),
        Dialect::Fixed => {
            let mut out = String::with_capacity(text.len() * 2);
            for c in text.chars() {
                push_literal(&mut out, c);
            }
            Ok(out)
        }
    }
}

fn push_literal(out: &mut String, c: char) {
    if matches!(
        c,
        '\\' | '.' | '+' | '*' | '?' | '(' | ')' | '|' | '[' | ']' | '{' | '}' | '^' | '$'
    ) {
        out.push('\\');
    }
    out.push(c);
}

/// What the previous token was, for deciding whether `*`, `^` are
/// operators at the current position of a basic regex.
#[derive(PartialEq)]
enum Prev {
    Start,
    GroupOpen,
    Alternation,
    Atom,
}

/// Translate a basic (grep-dialect) regex to modern syntax: `\(..\)`
/// groups, `\{m,n\}` intervals, the GNU `\|`, `\+`, `\?` extensions,
/// positional `^`/`$`, and `\<`/`\>` word boundaries.
fn bre_to_modern(pat: &str) -> std::result::Result<String, String> {
    let mut out = String::with_capacity(pat.len() + 8);
    let chars: Vec<char> = pat.chars().collect();
    let mut i = 0;
    let mut prev = Prev::Start;
    while i < chars.len() {
        let c = chars[i];
        match c {
            '\\' => {
                let d = *chars
                    .get(i + 1)
                    .ok_or_else(|| "trailing backslash".to_string())?;
                match d {
                    '(' => {
                        out.push('(');
                        prev = Prev::GroupOpen;
                    }
                    ')' => {
                        out.push(')');
                        prev = Prev::Atom;
                    }
                    '{' => {
                        out.push('{');
                        prev = Prev::Atom;
                    }
                    '}' => {
                        out.push('}');
                        prev = Prev::Atom;
                    }
                    '|' => {
                        out.push('|');
                        prev = Prev::Alternation;
                    }
                    '+' | '?' => {
                        out.push(d);
                        prev = Prev::Atom;
                    }
                    '1'..='9' => {
                        out.push('\\');
                        out.push(d);
                        prev = Prev::Atom;
                    }
                    '<' | '>' => {
                        out.push_str("\\b");
                        prev = Prev::Atom;
                    }
                    'w' | 'W' | 's' | 'S' | 'b' | 'B' => {
                        out.push('\\');
                        out.push(d);
                        prev = Prev::Atom;
                    }
                    _ => {
                        push_literal(&mut out, d);
                        prev = Prev::Atom;
                    }
                }
                i += 2;
            }
            '[' => {
                let end = copy_bracket(&chars, i, &mut out)?;
                i = end;
                prev = Prev::Atom;
            }
            '*' => {
                // Leading * is an ordinary character in a basic regex.
                if prev == Prev::Atom {
                    out.push('*');
                } else {
                    out.push_str("\\*");
                }
                prev = Prev::Atom;
                i += 1;
            }
            '^' => {
                if matches!(prev, Prev::Start | Prev::GroupOpen | Prev::Alternation) {
                    out.push('^');
                } else {
                    out.push_str("\\^");
                }
                prev = Prev::Atom;
                i += 1;
            }
            '$' => {
                let at_end = i + 1 == chars.len()
                    || (chars[i + 1] == '\\'
                        && matches!(chars.get(i + 2), Some(')') | Some('|')));
                if at_end {
                    out.push('$');
                } else {
                    out.push_str("\\$");
                }
                prev = Prev::Atom;
                i += 1;
            }
            '(' | ')' | '{' | '}' | '|' | '+' | '?' => {
                push_literal(&mut out, c);
                prev = Prev::Atom;
                i += 1;
            }
            _ => {
                out.push(c);
                prev = Prev::Atom;
                i += 1;
            }
        }
    }
    Ok(out)
}

/// Extended-dialect translation is almost the identity; only the GNU
/// `\<` / `\>` word boundaries need rewriting, and bracket expressions
/// must be skipped so their contents stay untouched.
fn ere_to_modern(pat: &str) -> String {
    let mut out = String::with_capacity(pat.len());
    let chars: Vec<char> = pat.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '\\' if matches!(chars.get(i + 1), Some('<') | Some('>')) => {
                out.push_str("\\b");
                i += 2;
            }
            '\\' if i + 1 < chars.len() => {
                out.push('\\');
                out.push(chars[i + 1]);
                i += 2;
            }
            '[' => match copy_bracket(&chars, i, &mut out) {
                Ok(end) => i = end,
                Err(_) => {
                    // Let the engine produce its own diagnostic.
                    out.push('[');
                    i += 1;
                }
            },
            c => {
                out.push(c);
                i += 1;
            }
        }
    }
    out
}

/// Copy a bracket expression verbatim, honoring the POSIX rules for a
/// leading `^`, a literal `]` in first position, and `[: :]`/`[. .]`/
/// `[= =]` sub-expressions. Returns the index just past the closing
/// bracket.
fn copy_bracket(chars: &[char], start: usize, out: &mut String) -> std::result::Result<usize, String> {
    let mut i = start;
    out.push('[');
    i += 1;
    if chars.get(i) == Some(&'^') {
        out.push('^');
        i += 1;
    }
    // POSIX allows a literal `]` in first position; the modern syntax
    // wants it escaped.
    if chars.get(i) == Some(&']') {
        out.push_str("\\]");
        i += 1;
    }
    while i < chars.len() {
        let c = chars[i];
        if c == '[' && matches!(chars.get(i + 1), Some(':') | Some('.') | Some('=')) {
            let kind = chars[i + 1];
            out.push('[');
            out.push(kind);
            i += 2;
            while i < chars.len() && !(chars[i] == kind && chars.get(i + 1) == Some(&']')) {
                out.push(chars[i]);
                i += 1;
            }
            if i >= chars.len() {
                return Err("unmatched [ or [^".to_string());
            }
            out.push(kind);
            out.push(']');
            i += 2;
        } else if c == ']' {
            out.push(']');
            return Ok(i + 1);
        } else if c == '\\' {
            // POSIX brackets treat backslash literally; modern syntax
            // wants it escaped.
            out.push_str("\\\\");
            i += 1;
        } else {
            out.push(c);
            i += 1;
        }
    }
    Err("unmatched [ or [^".to_string())
}

/// Copy a character class in modern syntax, where backslash escapes
/// are meaningful. Used on already-translated patterns.
fn copy_modern_bracket(
    chars: &[char],
    start: usize,
    out: &mut String,
) -> std::result::Result<usize, String> {
    let mut i = start;
    out.push('[');
    i += 1;
    if chars.get(i) == Some(&'^') {
        out.push('^');
        i += 1;
    }
    while i < chars.len() {
        match chars[i] {
            '\\' if i + 1 < chars.len() => {
                out.push('\\');
                out.push(chars[i + 1]);
                i += 2;
            }
            '[' if matches!(chars.get(i + 1), Some(':')) => {
                out.push('[');
                i += 1;
                while i < chars.len() && chars[i] != ']' {
                    out.push(chars[i]);
                    i += 1;
                }
                if i < chars.len() {
                    out.push(']');
                    i += 1;
                }
            }
            ']' => {
                out.push(']');
                return Ok(i + 1);
            }
            c => {
                out.push(c);
                i += 1;
            }
        }
    }
    Err("unmatched [ or [^".to_string())
}

/// True if the translated pattern contains a `\N` back-reference
/// outside a character class.
fn has_backref(pat: &str) -> bool {
    let chars: Vec<char> = pat.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '\\' if matches!(chars.get(i + 1), Some('1'..='9')) => return true,
            '\\' => i += 1,
            '[' => {
                if let Ok(end) = copy_modern_bracket(&chars, i, &mut String::new()) {
                    i = end;
                    continue;
                }
            }
            _ => {}
        }
        i += 1;
    }
    false
}

/// Widen a pattern for the scan automaton: back-references become
/// `(?:.*)` and anchors become the empty group, so the automaton
/// accepts a superset of the language and never misses a candidate.
/// Returns the widened pattern and whether anything changed.
fn widen_for_scan(pat: &str) -> (String, bool) {
    let chars: Vec<char> = pat.chars().collect();
    let mut out = String::with_capacity(pat.len());
    let mut widened = false;
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '\\' if matches!(chars.get(i + 1), Some('1'..='9')) => {
                out.push_str("(?:.*)");
                widened = true;
                i += 2;
            }
            '\\' if i + 1 < chars.len() => {
                out.push('\\');
                out.push(chars[i + 1]);
                i += 2;
            }
            '[' => {
                if let Ok(end) = copy_modern_bracket(&chars, i, &mut out) {
                    i = end;
                } else {
                    out.push('[');
                    i += 1;
                }
            }
            '^' | '$' => {
                out.push_str("(?:)");
                widened = true;
                i += 1;
            }
            c => {
                out.push(c);
                i += 1;
            }
        }
    }
    (out, widened)
}

fn resolve_origin(origins: &[OriginSpan], blob: &[u8], offset: usize) -> Option<(String, usize)> {
    for span in origins {
        if offset >= span.start && offset < span.end.max(span.start + 1) {
            let file = span.file.as_ref()?;
            let lineno = 1 + blob[span.start..offset]
                .iter()
                .filter(|&&b| b == b'\n')
                .count();
            return Some((file.clone(), lineno));
        }
    }
    None
}

/// Must-list extraction over the per-pattern HIRs. Every pattern (and
/// every top-level alternation branch) has to contribute a required
/// string, otherwise the prefilter would produce false negatives and
/// is disabled entirely.
fn extract_musts(
    translated: &[String],
    backrefs: &[bool],
    config: &PatternConfig,
) -> Option<Vec<Must>> {
    let mut musts = Vec::new();
    for (t, &backref) in translated.iter().zip(backrefs) {
        // The fancy engine owns back-reference patterns; their HIR is
        // out of reach, so no prefilter for the whole set.
        if backref {
            return None;
        }
        let hir = regex_syntax::ParserBuilder::new()
            .utf8(false)
            .build()
            .parse(t)
            .ok()?;
        let branches = match hir.kind() {
            HirKind::Alternation(subs) => subs.clone(),
            _ => vec![hir.clone()],
        };
        for branch in &branches {
            if let Some((bytes, begline, endline)) = exact_literal(branch) {
                musts.push(Must {
                    bytes,
                    exact: !config.match_words,
                    begline: begline || config.match_lines,
                    endline: endline || config.match_lines,
                });
            } else if let Some(bytes) = required_literal(branch) {
                musts.push(Must {
                    bytes,
                    exact: false,
                    begline: false,
                    endline: false,
                });
            } else {
                return None;
            }
        }
    }
    Some(musts)
}

/// If the expression is a pure literal (possibly anchored), return its
/// bytes with the begin/end-line flags.
fn exact_literal(hir: &Hir) -> Option<(Vec<u8>, bool, bool)> {
    let mut begline = false;
    let mut endline = false;
    let mut bytes = Vec::new();
    let parts: Vec<&Hir> = match hir.kind() {
        HirKind::Concat(subs) => subs.iter().collect(),
        _ => vec![hir],
    };
    for (idx, part) in parts.iter().enumerate() {
        match part.kind() {
            HirKind::Empty => {}
            HirKind::Literal(lit) => bytes.extend_from_slice(&lit.0),
            HirKind::Look(Look::Start) | HirKind::Look(Look::StartLF) if idx == 0 => {
                begline = true;
            }
            HirKind::Look(Look::End) | HirKind::Look(Look::EndLF) if idx + 1 == parts.len() => {
                endline = true;
            }
            HirKind::Capture(cap) => {
                let (inner, b, e) = exact_literal(&cap.sub)?;
                if b || e {
                    return None;
                }
                bytes.extend_from_slice(&inner);
            }
            _ => return None,
        }
    }
    Some((bytes, begline, endline))
}

/// Longest literal run that must occur in any match of the expression.
fn required_literal(hir: &Hir) -> Option<Vec<u8>> {
    match hir.kind() {
        HirKind::Literal(lit) => Some(lit.0.to_vec()),
        HirKind::Capture(cap) => required_literal(&cap.sub),
        HirKind::Repetition(rep) if rep.min >= 1 => required_literal(&rep.sub),
        HirKind::Concat(subs) => {
            let mut best: Option<Vec<u8>> = None;
            let mut run = Vec::new();
            let mut keep = |cand: Vec<u8>, best: &mut Option<Vec<u8>>| {
                if best.as_ref().map_or(true, |b| cand.len() > b.len()) && !cand.is_empty() {
                    *best = Some(cand);
                }
            };
            for sub in subs.iter() {
                match sub.kind() {
                    HirKind::Literal(lit) => run.extend_from_slice(&lit.0),
                    _ => {
                        keep(std::mem::take(&mut run), &mut best);
                        if let Some(r) = required_literal(sub) {
                            keep(r, &mut best);
                        }
                    }
                }
            }
            keep(run, &mut best);
            best
        }
        _ => None,
    }
}
