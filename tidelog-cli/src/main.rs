//! Tidelog command-line front end.
//!
//! Appends records to streams, follows streams as they grow and reports
//! where a stream is currently writing.
//!
//! ```bash
//! tidelog --dir /var/log/app append out service started
//! tidelog --dir /var/log/app tail out --max-lines 100
//! tidelog --config tidelog.toml where error
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::io::Write;
use std::path::PathBuf;
use std::sync::mpsc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tidelog::{naming, FileStorage, LogConfig, LogEngine, LogTailer};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// Append-only text logs with rotation and live tailing.
#[derive(Parser, Debug)]
#[command(name = "tidelog")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log directory. Overrides the configuration file.
    #[arg(long, global = true)]
    dir: Option<PathBuf>,

    /// Diagnostic log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "warn")]
    log_level: Level,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Appends one record to a stream.
    Append {
        /// Stream name.
        stream: String,
        /// Record text; words are joined with spaces.
        #[arg(required = true)]
        text: Vec<String>,
        /// Write an error record instead of an informational one.
        #[arg(long)]
        error: bool,
    },
    /// Prints the records of a stream as they are written.
    Tail {
        /// Stream name, or a part file such as `out.003.log`.
        stream: String,
        /// Exit after this many records.
        #[arg(long)]
        max_lines: Option<u64>,
        /// Exit after this many consecutive polls without a record.
        #[arg(long)]
        idle_ticks: Option<u64>,
    },
    /// Prints the path of the part a stream writes to next.
    Where {
        /// Stream name.
        stream: String,
    },
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Diagnostics go to stderr; stdout carries tailed records.
    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut config = match &args.config {
        Some(path) => LogConfig::load(path)?,
        None => LogConfig::default(),
    };
    if let Some(dir) = args.dir {
        config = config.with_dir(dir);
    }
    config.validate()?;

    match args.command {
        Command::Append { stream, text, error } => append(&config, &stream, &text.join(" "), error),
        Command::Tail {
            stream,
            max_lines,
            idle_ticks,
        } => tail(&config, &stream, max_lines, idle_ticks),
        Command::Where { stream } => {
            let dir = config.resolve_dir()?;
            let path = naming::current_path(&FileStorage::new(), &stream, &dir)
                .with_context(|| format!("cannot resolve stream '{stream}'"))?;
            println!("{}", path.display());
            Ok(())
        }
    }
}

fn append(config: &LogConfig, stream: &str, text: &str, error: bool) -> anyhow::Result<()> {
    let engine = LogEngine::new(config).context("cannot start log engine")?;
    let written = if error {
        engine.append_error_to(stream, text, None)?
    } else {
        engine.append(stream, text)?
    };
    engine.flush_all()?;

    if written {
        info!(stream, path = ?engine.current_file_info(stream), "record appended");
    } else {
        info!(stream, level = %engine.level(), "record filtered by level");
    }
    Ok(())
}

fn tail(
    config: &LogConfig,
    stream: &str,
    max_lines: Option<u64>,
    idle_ticks: Option<u64>,
) -> anyhow::Result<()> {
    let tailer = LogTailer::new(config).context("cannot start tailer")?;
    let (done_tx, done_rx) = mpsc::channel::<()>();

    let mut lines = 0u64;
    let mut idle = 0u64;
    let path = tailer.subscribe_text(stream, move |record| {
        if record.is_empty() {
            idle += 1;
            if idle_ticks.is_some_and(|limit| idle >= limit) {
                let _ = done_tx.send(());
                return false;
            }
            return true;
        }

        idle = 0;
        lines += 1;
        let mut stdout = std::io::stdout().lock();
        let printed = writeln!(stdout, "{}", record.trim_end_matches(['\r', '\n']))
            .and_then(|()| stdout.flush());
        if printed.is_err() || max_lines.is_some_and(|limit| lines >= limit) {
            let _ = done_tx.send(());
            return false;
        }
        true
    })?;
    info!(stream, path = %path.display(), "tailing");

    // Returns once the subscriber finishes or its thread exits.
    let _ = done_rx.recv();
    tailer.shutdown();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_append() {
        let args = Args::try_parse_from([
            "tidelog", "--dir", "/tmp/logs", "append", "out", "hello", "world", "--error",
        ])
        .unwrap();
        assert_eq!(args.dir, Some(PathBuf::from("/tmp/logs")));
        match args.command {
            Command::Append { stream, text, error } => {
                assert_eq!(stream, "out");
                assert_eq!(text.join(" "), "hello world");
                assert!(error);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_parse_tail_limits() {
        let args = Args::try_parse_from([
            "tidelog", "tail", "out.003.log", "--max-lines", "5", "--log-level", "debug",
        ])
        .unwrap();
        assert_eq!(args.log_level, Level::DEBUG);
        match args.command {
            Command::Tail {
                stream,
                max_lines,
                idle_ticks,
            } => {
                assert_eq!(stream, "out.003.log");
                assert_eq!(max_lines, Some(5));
                assert_eq!(idle_ticks, None);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_append_requires_text() {
        assert!(Args::try_parse_from(["tidelog", "append", "out"]).is_err());
    }
}
