//! Runs an editor child process (`<editor> --embed`) and drives it from the
//! local terminal.
//!
//! Threads:
//! - `ring-pump` drains the ring consumer into the child's stdin;
//! - `editor-out` forwards child stdout chunks to the main loop;
//! - `term-input` forwards crossterm events to the main loop.
//!
//! The main thread owns the [`Session`] and therefore the ring producer.
//! Dropping the session closes the ring, which ends the pump.

use std::io::{self, Read, Stdout, Write};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use crossbeam_channel::{Receiver, Sender, unbounded};
use crossterm::event::{self, DisableBracketedPaste, EnableBracketedPaste, Event, KeyEventKind};
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use crossterm::{execute, queue};
use tracing::{debug, info, warn};
use transport_ring::{RingConsumer, RingProducer};

use crate::clipboard::ClipboardBridge;
use crate::config::Config;
use crate::input::{translate_key, translate_text};
use crate::render::{RenderMode, cursor_shape_for_mode};
use crate::session::{FrameOutput, Session, SessionEvent, SessionStats};

const READ_CHUNK: usize = 64 * 1024;
const REAP_ATTEMPTS: usize = 25;
const REAP_INTERVAL: Duration = Duration::from_millis(20);

enum HostEvent {
    Output(Vec<u8>),
    EditorExited,
    Terminal(Event),
}

/// Restores the terminal on every exit path.
struct TerminalGuard {
    stdout: Stdout,
}

impl TerminalGuard {
    fn enter() -> Result<Self> {
        enable_raw_mode().context("enabling raw mode")?;
        let mut stdout = io::stdout();
        if let Err(err) = execute!(stdout, EnterAlternateScreen, EnableBracketedPaste) {
            let _ = disable_raw_mode();
            return Err(err).context("entering alternate screen");
        }
        Ok(Self { stdout })
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let _ = execute!(
            self.stdout,
            crossterm::cursor::SetCursorStyle::DefaultUserShape,
            crossterm::cursor::Show,
            DisableBracketedPaste,
            LeaveAlternateScreen
        );
        let _ = disable_raw_mode();
    }
}

pub fn run(config: &Config, editor_args: &[String]) -> Result<SessionStats> {
    let (producer, consumer) =
        transport_ring::channel(config.ring_capacity).context("creating outbound ring")?;

    let mut child = Command::new(&config.editor)
        .arg("--embed")
        .args(editor_args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .with_context(|| format!("spawning `{} --embed`", config.editor))?;
    info!(editor = %config.editor, pid = child.id(), "editor started");

    let stdin = child.stdin.take().ok_or_else(|| anyhow!("editor stdin not piped"))?;
    let stdout = child.stdout.take().ok_or_else(|| anyhow!("editor stdout not piped"))?;

    let pump = spawn_ring_pump(consumer, stdin)?;
    let (tx, rx) = unbounded();
    spawn_output_reader(stdout, tx.clone())?;
    spawn_terminal_input(tx)?;

    let result = drive(config, producer, &rx);
    // `drive` consumed the producer; the pump sees the ring close and exits.
    if pump.join().is_err() {
        warn!("ring pump thread panicked");
    }
    reap(&mut child);
    result
}

fn drive(config: &Config, producer: RingProducer, rx: &Receiver<HostEvent>) -> Result<SessionStats> {
    let mut terminal = TerminalGuard::enter()?;
    let (cols, rows) = crossterm::terminal::size().unwrap_or((config.cols, config.rows));

    let mut session = Session::new(config, producer);
    session.set_render_mode(RenderMode::Ansi);
    session.attach(cols, rows)?;
    if config.clipboard {
        session.enable_clipboard(ClipboardBridge::system())?;
        debug!("clipboard provider installed");
    }

    let mut last_shape = None;
    for event in rx.iter() {
        match event {
            HostEvent::Output(chunk) => {
                for event in session.feed_output(&chunk) {
                    handle_session_event(event, &mut terminal.stdout, &mut last_shape)?;
                }
            }
            HostEvent::Terminal(Event::Key(key)) if key.kind != KeyEventKind::Release => {
                if let Some(keys) = translate_key(&key) {
                    session.input(&keys)?;
                }
            }
            HostEvent::Terminal(Event::Paste(text)) => {
                session.input(&translate_text(&text))?;
            }
            HostEvent::Terminal(Event::Resize(cols, rows)) => {
                debug!(cols, rows, "terminal resized");
                session.resize(cols, rows)?;
            }
            HostEvent::Terminal(_) => {}
            HostEvent::EditorExited => {
                info!("editor exited");
                break;
            }
        }
    }
    Ok(session.stats())
}

fn handle_session_event(
    event: SessionEvent,
    stdout: &mut Stdout,
    last_shape: &mut Option<crate::render::CursorShape>,
) -> Result<()> {
    match event {
        SessionEvent::Frame(frame) => {
            if let FrameOutput::Ansi(stream) = &frame.output {
                stdout.write_all(stream.as_bytes())?;
            }
            let shape = cursor_shape_for_mode(&frame.mode.name);
            if *last_shape != Some(shape) {
                queue!(stdout, shape.to_crossterm())?;
                *last_shape = Some(shape);
            }
            stdout.flush()?;
        }
        SessionEvent::Notification { method, .. } => debug!(method = %method, "editor notification"),
        SessionEvent::UnhandledRequest { id, method } => {
            debug!(id, method = %method, "editor request left unanswered")
        }
        SessionEvent::Response { id, error, .. } if !error.is_nil() => {
            warn!(id, error = ?error, "editor returned an error")
        }
        SessionEvent::Response { .. } => {}
        SessionEvent::DecodeError(err) => warn!(error = %err, "editor output corrupt"),
        SessionEvent::ProtocolError(err) => warn!(error = %err, "editor protocol error"),
    }
    Ok(())
}

fn spawn_ring_pump(mut consumer: RingConsumer, mut stdin: impl Write + Send + 'static) -> Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("ring-pump".into())
        .spawn(move || match io::copy(&mut consumer, &mut stdin) {
            Ok(bytes) => debug!(bytes, "ring closed; editor stdin done"),
            Err(err) => warn!(error = %err, "writing to editor stdin failed"),
        })
        .context("spawning ring pump")
}

fn spawn_output_reader(mut stdout: ChildStdout, tx: Sender<HostEvent>) -> Result<()> {
    thread::Builder::new()
        .name("editor-out".into())
        .spawn(move || {
            let mut buf = vec![0u8; READ_CHUNK];
            loop {
                match stdout.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if tx.send(HostEvent::Output(buf[..n].to_vec())).is_err() {
                            return;
                        }
                    }
                    Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                    Err(err) => {
                        warn!(error = %err, "reading editor stdout failed");
                        break;
                    }
                }
            }
            let _ = tx.send(HostEvent::EditorExited);
        })
        .context("spawning editor output reader")?;
    Ok(())
}

fn spawn_terminal_input(tx: Sender<HostEvent>) -> Result<()> {
    thread::Builder::new()
        .name("term-input".into())
        .spawn(move || {
            loop {
                match event::read() {
                    Ok(event) => {
                        if tx.send(HostEvent::Terminal(event)).is_err() {
                            return;
                        }
                    }
                    Err(err) => {
                        warn!(error = %err, "terminal input failed");
                        return;
                    }
                }
            }
        })
        .context("spawning terminal input reader")?;
    Ok(())
}

fn reap(child: &mut Child) {
    // stdout closing usually means the editor is exiting; give it a moment.
    for _ in 0..REAP_ATTEMPTS {
        match child.try_wait() {
            Ok(Some(status)) => {
                info!(%status, "editor finished");
                return;
            }
            Ok(None) => thread::sleep(REAP_INTERVAL),
            Err(err) => {
                warn!(error = %err, "waiting for editor failed");
                return;
            }
        }
    }
    warn!("editor still running; killing it");
    let _ = child.kill();
    let _ = child.wait();
}
