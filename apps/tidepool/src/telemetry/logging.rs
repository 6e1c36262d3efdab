//! Global `tracing` subscriber setup.

use std::fmt::Write as _;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use clap::ValueEnum;
use tracing::level_filters::LevelFilter;
use tracing::subscriber::SetGlobalDefaultError;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::EnvFilter;

/// Full `EnvFilter` directive that replaces the level-derived default.
pub const ENV_LOG_FILTER: &str = "TIDEPOOL_LOG_FILTER";

/// Targets that get debug/trace output; everything else stays at info.
const OWN_TARGETS: [&str; 3] = ["tidepool", "msgpack_wire", "transport_ring"];

#[derive(Clone, Copy, Debug, Default, ValueEnum, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error,
    #[default]
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct LogConfig {
    pub level: LogLevel,
    /// Appended to when set; stderr otherwise.
    pub file: Option<PathBuf>,
}

#[derive(thiserror::Error, Debug)]
pub enum InitError {
    #[error("cannot open log file {}: {source}", path.display())]
    OpenFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot install log subscriber: {0}")]
    Install(#[from] SetGlobalDefaultError),
}

/// Keeps the non-blocking writer flushing for the life of the process.
static WRITER_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Installs the global subscriber. Only the first successful call has any
/// effect.
///
/// Without a file the writer is stderr; the embed host owns the terminal, so
/// interactive runs should log to a file.
pub fn init(config: &LogConfig) -> Result<(), InitError> {
    if WRITER_GUARD.get().is_some() {
        return Ok(());
    }
    let (writer, guard) = open_writer(config.file.as_deref())?;
    let level = LevelFilter::from(config.level);

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter(level))
        .with_target(config.level >= LogLevel::Debug)
        .with_thread_names(config.level == LogLevel::Trace)
        .with_ansi(config.file.is_none())
        .with_writer(writer)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let _ = WRITER_GUARD.set(guard);
    Ok(())
}

fn open_writer(file: Option<&Path>) -> Result<(NonBlocking, WorkerGuard), InitError> {
    let Some(path) = file else {
        return Ok(tracing_appender::non_blocking(std::io::stderr()));
    };
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| InitError::OpenFile {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(tracing_appender::non_blocking(file))
}

fn env_filter(level: LevelFilter) -> EnvFilter {
    match std::env::var(ENV_LOG_FILTER) {
        Ok(directives) if !directives.trim().is_empty() => EnvFilter::new(directives),
        _ => EnvFilter::new(default_directives(level)),
    }
}

pub(crate) fn default_directives(level: LevelFilter) -> String {
    if level < LevelFilter::DEBUG {
        return level.to_string().to_ascii_lowercase();
    }
    let level = level.to_string().to_ascii_lowercase();
    std::iter::once("info".to_owned())
        .chain(OWN_TARGETS.iter().map(|target| format!("{target}={level}")))
        .collect::<Vec<_>>()
        .join(",")
}

/// Offset, hex and printable-ASCII columns, 16 bytes per line.
pub fn hexdump(bytes: &[u8]) -> String {
    const PER_LINE: usize = 16;
    const HEX_COLUMN: usize = PER_LINE * 3 + 1;

    let mut out = String::with_capacity(bytes.len().div_ceil(PER_LINE) * 78);
    for (line, chunk) in bytes.chunks(PER_LINE).enumerate() {
        let mut hex = String::with_capacity(HEX_COLUMN);
        for (i, byte) in chunk.iter().enumerate() {
            if i == PER_LINE / 2 {
                hex.push(' ');
            }
            let _ = write!(hex, "{byte:02x} ");
        }
        let ascii: String = chunk
            .iter()
            .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' })
            .collect();
        let _ = writeln!(
            out,
            "{:08x}  {hex:<width$} {ascii}",
            line * PER_LINE,
            width = HEX_COLUMN
        );
    }
    out
}
