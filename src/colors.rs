//! Terminal color capabilities parsed from `GREP_COLORS`.
//!
//! The capability dictionary follows the traditional grep layout:
//! `ms=01;31:mc=01;31:sl=:cx=:fn=35:ln=32:bn=32:se=36`, with the
//! boolean capabilities `rv` and `ne` unset unless present. Values are
//! raw SGR parameter strings; no escaping is supported, and a value
//! containing anything other than digits and `;` invalidates the rest
//! of the variable.

/// SGR capability set for the line printer.
#[derive(Debug, Clone)]
pub struct ColorSpec {
    pub selected_match: String,
    pub context_match: String,
    pub filename: String,
    pub line_num: String,
    pub byte_num: String,
    pub separator: String,
    pub selected_line: String,
    pub context_line: String,
    /// `rv`: -v swaps the sl/cx roles.
    pub reverse_video: bool,
    /// `ne`: suppress the Erase-in-Line that normally follows SGR.
    no_el: bool,
}

impl Default for ColorSpec {
    fn default() -> Self {
        Self {
            selected_match: "01;31".to_string(),
            context_match: "01;31".to_string(),
            filename: "35".to_string(),
            line_num: "32".to_string(),
            byte_num: "32".to_string(),
            separator: "36".to_string(),
            selected_line: String::new(),
            context_line: String::new(),
            reverse_video: false,
            no_el: false,
        }
    }
}

impl ColorSpec {
    /// Build the capability set from the environment. The legacy
    /// `GREP_COLOR` is honored first so that `GREP_COLORS` wins.
    pub fn from_env() -> Self {
        let mut spec = Self::default();
        if let Ok(legacy) = std::env::var("GREP_COLOR") {
            if !legacy.is_empty() && legacy.bytes().all(|b| b.is_ascii_digit() || b == b';') {
                spec.selected_match = legacy.clone();
                spec.context_match = legacy;
            }
        }
        if let Ok(val) = std::env::var("GREP_COLORS") {
            spec.parse(&val);
        }
        spec
    }

    /// Parse a `GREP_COLORS` value into the capability set. Unknown
    /// capability names are skipped for forward compatibility; a
    /// malformed value stops the parse, keeping what was seen so far.
    pub fn parse(&mut self, s: &str) {
        for item in s.split(':') {
            let (name, val) = match item.split_once('=') {
                Some((n, v)) => (n, Some(v)),
                None => (item, None),
            };
            if let Some(v) = val {
                if !v.bytes().all(|b| b.is_ascii_digit() || b == b';') {
                    return;
                }
            }
            match (name, val) {
                ("mt", Some(v)) => {
                    self.selected_match = v.to_string();
                    self.context_match = v.to_string();
                }
                ("ms", Some(v)) => self.selected_match = v.to_string(),
                ("mc", Some(v)) => self.context_match = v.to_string(),
                ("fn", Some(v)) => self.filename = v.to_string(),
                ("ln", Some(v)) => self.line_num = v.to_string(),
                ("bn", Some(v)) => self.byte_num = v.to_string(),
                ("se", Some(v)) => self.separator = v.to_string(),
                ("sl", Some(v)) => self.selected_line = v.to_string(),
                ("cx", Some(v)) => self.context_line = v.to_string(),
                ("rv", _) => self.reverse_video = true,
                ("ne", _) => self.no_el = true,
                _ => {}
            }
        }
    }

    /// The SGR start sequence for a capability, empty if the
    /// capability itself is empty.
    pub fn sgr_start(&self, cap: &str) -> String {
        if cap.is_empty() {
            String::new()
        } else if self.no_el {
            format!("\x1b[{cap}m")
        } else {
            format!("\x1b[{cap}m\x1b[K")
        }
    }

    pub fn sgr_end(&self) -> &'static str {
        if self.no_el {
            "\x1b[m"
        } else {
            "\x1b[m\x1b[K"
        }
    }
}
