//! Error types and result handling for pargrep.
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for pargrep operations
pub type Result<T> = std::result::Result<T, GrepError>;

/// Process exit codes mandated by the POSIX grep specification.
pub const EXIT_MATCH: i32 = 0;
pub const EXIT_NO_MATCH: i32 = 1;
pub const EXIT_TROUBLE: i32 = 2;

#[derive(Debug, Error)]
pub enum GrepError {
    /// A pattern failed to compile. Fatal at program start, exit 2.
    /// The message already carries a `file:lineno:` prefix when the
    /// pattern came from a -f file.
    #[error("{0}")]
    Pattern(String),

    /// Per-file I/O failure (open, read, seek, close).
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failure writing to standard output. Always exit 2.
    #[error("write error: {0}")]
    Write(std::io::Error),

    /// Line or byte counters overflowed.
    #[error("input is too large to count")]
    CountOverflow,

    /// Bad option combination detected after parsing.
    #[error("{0}")]
    Usage(String),
}

impl GrepError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        GrepError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Exit-status bookkeeping threaded through the drivers.
///
/// The aggregate over all files and workers decides the process exit
/// code: 0 if anything matched, 1 if nothing did, 2 if an error was
/// seen (and -q did not force success first).
#[derive(Debug, Clone, Copy, Default)]
pub struct RunStatus {
    pub matched: bool,
    pub errseen: bool,
}

impl RunStatus {
    pub fn merge(&mut self, other: RunStatus) {
        self.matched |= other.matched;
        self.errseen |= other.errseen;
    }

    pub fn exit_code(&self) -> i32 {
        if self.errseen {
            EXIT_TROUBLE
        } else if self.matched {
            EXIT_MATCH
        } else {
            EXIT_NO_MATCH
        }
    }
}

/// Report a per-file error unless -s is in effect; the seen-error flag
/// is raised either way so the exit status reflects it.
pub fn suppressible_error(suppress: bool, err: &GrepError, status: &mut RunStatus) {
    if !suppress {
        eprintln!("pargrep: {err}");
    }
    status.errseen = true;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_precedence() {
        let mut st = RunStatus::default();
        assert_eq!(st.exit_code(), EXIT_NO_MATCH);
        st.matched = true;
        assert_eq!(st.exit_code(), EXIT_MATCH);
        st.errseen = true;
        assert_eq!(st.exit_code(), EXIT_TROUBLE);
    }

    #[test]
    fn test_io_error_carries_path() {
        let err = GrepError::io(
            "/no/such/file",
            std::io::Error::new(std::io::ErrorKind::NotFound, "No such file or directory"),
        );
        let msg = err.to_string();
        assert!(msg.starts_with("/no/such/file: "));
    }

    #[test]
    fn test_merge_is_sticky() {
        let mut a = RunStatus {
            matched: false,
            errseen: true,
        };
        a.merge(RunStatus {
            matched: true,
            errseen: false,
        });
        assert!(a.matched && a.errseen);
    }
}
