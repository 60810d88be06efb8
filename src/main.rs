//! Main entry point for pargrep
use clap::Parser;
use env_logger::{Builder, Env, Target};

use pargrep::error::{EXIT_NO_MATCH, EXIT_TROUBLE};
use pargrep::{Cli, GrepError};

fn main() {
    setup_logging();

    let args = pargrep::cli::prepend_default_options(std::env::args().collect());
    let cli = Cli::parse_from(args);

    let resolved = match cli.resolve() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("pargrep: {e}");
            std::process::exit(EXIT_TROUBLE);
        }
    };

    // A zero match budget can never select a line; don't bother
    // opening anything.
    if resolved.options.max_count == 0 {
        std::process::exit(EXIT_NO_MATCH);
    }

    match pargrep::run(resolved) {
        Ok(status) => std::process::exit(status.exit_code()),
        Err(GrepError::Pattern(messages)) => {
            for line in messages.lines() {
                eprintln!("pargrep: {line}");
            }
            std::process::exit(EXIT_TROUBLE);
        }
        Err(e) => {
            eprintln!("pargrep: {e}");
            std::process::exit(EXIT_TROUBLE);
        }
    }
}

fn setup_logging() {
    let mut builder = Builder::from_env(Env::default().default_filter_or("warn"));
    builder.target(Target::Stderr);
    let _ = builder.try_init();
}
