use std::fs;
use std::io::{self, Write};
use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use crate::config::Config;
use crate::session::{Frame, FrameOutput, Session, SessionEvent, SessionStats};

#[derive(Debug, Clone)]
pub struct ReplayOutcome {
    /// Last frame rendered, or the grid as it stands when no batch arrived.
    pub frame: Frame,
    pub stats: SessionStats,
    pub notifications: usize,
}

/// Feeds a captured editor output stream through a fresh session in
/// `chunk`-sized pieces.
pub fn replay(bytes: &[u8], chunk: usize, config: &Config) -> ReplayOutcome {
    let mut session = Session::new(config, Vec::new());
    let mut last_frame = None;
    let mut notifications = 0;
    for piece in bytes.chunks(chunk.max(1)) {
        for event in session.feed_output(piece) {
            match event {
                SessionEvent::Frame(frame) => last_frame = Some(frame),
                SessionEvent::Notification { .. } => notifications += 1,
                _ => {}
            }
        }
    }
    ReplayOutcome {
        frame: last_frame.unwrap_or_else(|| session.render()),
        stats: session.stats(),
        notifications,
    }
}

pub fn run(path: &Path, chunk: usize, config: &Config) -> Result<SessionStats> {
    let bytes = fs::read(path).with_context(|| format!("reading capture {}", path.display()))?;
    info!(path = %path.display(), len = bytes.len(), chunk, "replaying capture");
    let outcome = replay(&bytes, chunk, config);

    let mut stdout = io::stdout().lock();
    match &outcome.frame.output {
        FrameOutput::Text(lines) => {
            for line in lines {
                writeln!(stdout, "{}", line.trim_end())?;
            }
        }
        FrameOutput::Ansi(stream) => {
            stdout.write_all(stream.as_bytes())?;
            writeln!(stdout, "\x1b[0m")?;
        }
    }
    stdout.flush()?;
    info!(
        messages = outcome.stats.messages_in,
        frames = outcome.stats.frames_rendered,
        notifications = outcome.notifications,
        decode_errors = outcome.stats.decode_errors,
        "replay finished"
    );
    Ok(outcome.stats)
}
