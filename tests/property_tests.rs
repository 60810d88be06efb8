use proptest::prelude::*;

use pargrep::colors::ColorSpec;
use pargrep::config::{BinaryFiles, DevAction, DirAction, ListFiles, Options};
use pargrep::driver::Driver;
use pargrep::error::RunStatus;
use pargrep::pattern::{Dialect, PatternConfig, PatternSet};
use pargrep::printer::VecSink;
use pargrep::Searcher;
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

fn compile(pattern: &str, opts: &Options) -> PatternSet {
    PatternSet::compile(
        pattern.as_bytes(),
        &[],
        PatternConfig {
            dialect: Dialect::Extended,
            ignore_case: false,
            match_words: opts.match_words,
            match_lines: opts.match_lines,
            eol: opts.eol,
        },
    )
    .unwrap()
}

/// Run the full driver over a temp file and return the emitted bytes.
fn run_driver(pattern: &str, content: &str, opts: &Options) -> Vec<u8> {
    let set = compile(pattern, opts);
    let mut driver = Driver::new(opts, &set).unwrap();
    let mut tmp = tempfile::NamedTempFile::new().unwrap();
    tmp.write_all(content.as_bytes()).unwrap();
    tmp.flush().unwrap();
    let mut sink = VecSink::default();
    let mut status = RunStatus::default();
    let display = tmp.path().display().to_string();
    driver.grep_path(tmp.path(), &display, true, false, &mut sink, &mut status);
    sink.0
}

fn naive_matching_lines(pattern: &str, content: &str) -> Vec<String> {
    content
        .lines()
        .filter(|l| l.contains(pattern))
        .map(str::to_string)
        .collect()
}

fn emitted_lines(out: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(out)
        .lines()
        .map(str::to_string)
        .collect()
}

fn text_strategy() -> impl Strategy<Value = String> {
    proptest::collection::vec("[a-d ]{0,12}", 0..40).prop_map(|lines| {
        let mut s = lines.join("\n");
        if !s.is_empty() {
            s.push('\n');
        }
        s
    })
}

proptest! {
    /// The cascade agrees with a naive per-line scan for literal
    /// patterns, which also proves the keyword prefilter never drops
    /// a matching line.
    #[test]
    fn prop_literal_matches_naive_scan(pattern in "[a-d]{1,4}", text in text_strategy()) {
        let opts = options();
        let out = run_driver(&pattern, &text, &opts);
        prop_assert_eq!(emitted_lines(&out), naive_matching_lines(&pattern, &text));
    }

    /// -v partitions the input: every line appears exactly once in
    /// the union of the selected and inverted outputs.
    #[test]
    fn prop_invert_partitions_input(pattern in "[a-d]{1,3}", text in text_strategy()) {
        let opts = options();
        let selected = emitted_lines(&run_driver(&pattern, &text, &opts));
        let mut inv_opts = options();
        inv_opts.invert = true;
        let inverted = emitted_lines(&run_driver(&pattern, &text, &inv_opts));

        let expect_sel = naive_matching_lines(&pattern, &text);
        let expect_inv: Vec<String> = text
            .lines()
            .filter(|l| !l.contains(&pattern))
            .map(str::to_string)
            .collect();
        prop_assert_eq!(selected.len() + inverted.len(), text.lines().count());
        prop_assert_eq!(selected, expect_sel);
        prop_assert_eq!(inverted, expect_inv);
    }

    /// The -c count equals the number of lines emitted without -c.
    #[test]
    fn prop_count_equals_emitted(pattern in "[a-d]{1,3}", text in text_strategy()) {
        let opts = options();
        let emitted = emitted_lines(&run_driver(&pattern, &text, &opts)).len();
        let mut count_opts = options();
        count_opts.count_matches = true;
        count_opts.out_quiet = true;
        let out = run_driver(&pattern, &text, &count_opts);
        let counted: usize = String::from_utf8_lossy(&out).trim().parse().unwrap();
        prop_assert_eq!(counted, emitted);
    }

    /// -m N emits at most N lines, and exactly min(N, total).
    #[test]
    fn prop_max_count_caps_output(pattern in "[a-d]{1,3}", text in text_strategy(), cap in 1u64..5) {
        let opts = options();
        let total = emitted_lines(&run_driver(&pattern, &text, &opts)).len();
        let mut capped = options();
        capped.max_count = cap;
        let got = emitted_lines(&run_driver(&pattern, &text, &capped)).len();
        prop_assert_eq!(got as u64, (total as u64).min(cap));
    }

    /// No line is ever emitted twice (matching the distinct-line
    /// emission contract).
    #[test]
    fn prop_no_duplicate_emission(pattern in "[a-d]{1,3}", text in text_strategy()) {
        let opts = options();
        let emitted = emitted_lines(&run_driver(&pattern, &text, &opts));
        let expected = naive_matching_lines(&pattern, &text);
        prop_assert_eq!(emitted.len(), expected.len());
    }

    /// The empty pattern selects every line exactly once when the
    /// input ends with a newline.
    #[test]
    fn prop_empty_pattern_selects_all(text in text_strategy()) {
        let opts = options();
        let out = run_driver("", &text, &opts);
        prop_assert_eq!(out.as_slice(), text.as_bytes());
    }

    /// The exact keyword path (bare literal) and the non-exact path
    /// (anchored wrapper: filter-only must, widened automaton, regex
    /// confirmation) select identical lines.
    #[test]
    fn prop_exact_and_confirmed_paths_agree(pattern in "[a-d]{1,3}", text in text_strategy()) {
        let opts = options();
        let literal_out = run_driver(&pattern, &text, &opts);
        // A line contains the literal exactly when it matches the
        // anchored dot-wrapped form, but the anchors force the full
        // confirmation cascade.
        let wrapped = format!("^.*{pattern}.*$");
        let wrapped_out = run_driver(&wrapped, &text, &opts);
        prop_assert_eq!(literal_out, wrapped_out);
    }

    /// Whole-line mode equals exact line equality for literals.
    #[test]
    fn prop_whole_line_is_equality(pattern in "[a-d]{1,3}", text in text_strategy()) {
        let mut opts = options();
        opts.match_lines = true;
        let out = emitted_lines(&run_driver(&pattern, &text, &opts));
        let expected: Vec<String> = text
            .lines()
            .filter(|l| *l == pattern)
            .map(str::to_string)
            .collect();
        prop_assert_eq!(out, expected);
    }
}

/// Sanity-check the wrapper premise used above: the anchored form
/// still selects the containing line.
#[test]
fn test_anchored_wrapper_selects_whole_line() {
    let opts = options();
    let set = compile("^.*ab.*$", &opts);
    let searcher = Searcher::new(&set).unwrap();
    let hay = b"\nxxabyy\n";
    let m = searcher.execute(hay, 1, hay.len(), None).unwrap();
    assert_eq!(&hay[m.start..m.start + m.len], b"xxabyy\n");
}
