//! One editor session: the decoder, RPC channel and grid that the output
//! stream feeds, plus the commands the host sends back.

use msgpack_wire::{DecodeError, Decoder, Value};
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::clipboard::{ClipboardBridge, PROVIDER_LUA};
use crate::config::Config;
use crate::grid::{CursorPos, GridState, Mode, RedrawEvent};
use crate::metrics;
use crate::render::{self, RenderMode};
use crate::rpc::{Inbound, OutboundSink, RequestId, RequestResponder, RpcChannel, RpcError};
use crate::telemetry::PerfGuard;
use crate::telemetry::logging::hexdump;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Rpc(#[from] RpcError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameOutput {
    Text(Vec<String>),
    Ansi(String),
}

/// One render pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub output: FrameOutput,
    pub cursor: CursorPos,
    pub mode: Mode,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Frame(Frame),
    Notification {
        method: String,
        params: Value,
    },
    UnhandledRequest {
        id: RequestId,
        method: String,
    },
    Response {
        id: RequestId,
        method: Option<String>,
        error: Value,
        result: Value,
    },
    DecodeError(DecodeError),
    ProtocolError(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub messages_in: u64,
    pub frames_rendered: u64,
    pub decode_errors: u64,
    pub protocol_errors: u64,
    pub unhandled_requests: u64,
    pub redraw_events_ignored: u64,
}

pub struct Session<S> {
    decoder: Decoder,
    rpc: RpcChannel<S>,
    grid: GridState,
    render_mode: RenderMode,
    stats: SessionStats,
    clipboard: Option<ClipboardBridge>,
}

impl<S: OutboundSink> Session<S> {
    pub fn new(config: &Config, sink: S) -> Self {
        Self {
            decoder: Decoder::new(),
            rpc: RpcChannel::new(sink),
            grid: GridState::new(usize::from(config.cols), usize::from(config.rows)),
            render_mode: config.render_mode,
            stats: SessionStats::default(),
            clipboard: None,
        }
    }

    pub fn grid(&self) -> &GridState {
        &self.grid
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    pub fn render_mode(&self) -> RenderMode {
        self.render_mode
    }

    pub fn set_render_mode(&mut self, mode: RenderMode) {
        self.render_mode = mode;
    }

    pub fn set_responder(&mut self, responder: Option<Box<dyn RequestResponder>>) {
        self.rpc.set_responder(responder);
    }

    /// Routes the editor clipboard through `bridge`: installs the provider
    /// script and replaces the request responder with the bridge's paste
    /// handler. Copy notifications are consumed instead of surfaced.
    pub fn enable_clipboard(&mut self, bridge: ClipboardBridge) -> Result<RequestId, SessionError> {
        self.rpc.set_responder(Some(bridge.responder()));
        self.clipboard = Some(bridge);
        Ok(self.rpc.call(
            "nvim_exec_lua",
            vec![Value::from(PROVIDER_LUA), Value::Array(Vec::new())],
        )?)
    }

    pub fn sink(&self) -> &S {
        self.rpc.sink()
    }

    /// Renders the current grid without waiting for a flush.
    pub fn render(&self) -> Frame {
        render_frame(&self.grid, self.render_mode)
    }

    /// Starts the UI: `nvim_ui_attach` with RGB and line-grid events,
    /// followed by an explicit resize.
    pub fn attach(&mut self, cols: u16, rows: u16) -> Result<(), SessionError> {
        let options = Value::Map(vec![
            (Value::from("rgb"), Value::from(true)),
            (Value::from("ext_linegrid"), Value::from(true)),
        ]);
        self.rpc.call(
            "nvim_ui_attach",
            vec![Value::from(cols), Value::from(rows), options],
        )?;
        self.resize(cols, rows)?;
        Ok(())
    }

    pub fn resize(&mut self, cols: u16, rows: u16) -> Result<RequestId, SessionError> {
        Ok(self.rpc.call(
            "nvim_ui_try_resize",
            vec![Value::from(cols), Value::from(rows)],
        )?)
    }

    /// Sends raw key notation, e.g. `"ihello<Esc>"`.
    pub fn input(&mut self, keys: &str) -> Result<RequestId, SessionError> {
        Ok(self.rpc.call("nvim_input", vec![Value::from(keys)])?)
    }

    pub fn command(&mut self, command: &str) -> Result<RequestId, SessionError> {
        Ok(self.rpc.call("nvim_command", vec![Value::from(command)])?)
    }

    pub fn call(&mut self, method: &str, params: Vec<Value>) -> Result<RequestId, SessionError> {
        Ok(self.rpc.call(method, params)?)
    }

    pub fn notify(&mut self, method: &str, params: Vec<Value>) -> Result<(), SessionError> {
        Ok(self.rpc.notify(method, params)?)
    }

    /// Consumes a chunk of editor output. Values decoded before a malformed
    /// byte are still applied; the malformed tail is reported and discarded.
    pub fn feed_output(&mut self, chunk: &[u8]) -> Vec<SessionEvent> {
        if tracing::enabled!(tracing::Level::TRACE) {
            trace!(len = chunk.len(), "editor output\n{}", hexdump(chunk));
        }
        let mut messages = Vec::new();
        let decode_result = self.decoder.push(chunk, |value| messages.push(value));

        let mut events = Vec::new();
        for message in messages {
            self.handle_message(message, &mut events);
        }
        if let Err(err) = decode_result {
            self.stats.decode_errors += 1;
            metrics::DECODE_ERRORS.inc();
            warn!(error = %err, "editor output stream corrupt; decoder reset");
            events.push(SessionEvent::DecodeError(err));
        }
        events
    }

    fn handle_message(&mut self, message: Value, events: &mut Vec<SessionEvent>) {
        self.stats.messages_in += 1;
        let inbound = match self.rpc.dispatch(message) {
            Ok(inbound) => inbound,
            Err(err) => {
                self.stats.protocol_errors += 1;
                warn!(error = %err, "dropping editor message");
                events.push(SessionEvent::ProtocolError(err.to_string()));
                return;
            }
        };
        match inbound {
            Inbound::Redraw(batch) => self.apply_redraw(&batch, events),
            Inbound::Notification { method, params } => {
                let consumed = self
                    .clipboard
                    .as_ref()
                    .is_some_and(|bridge| bridge.handle_notification(&method, &params));
                if !consumed {
                    events.push(SessionEvent::Notification { method, params });
                }
            }
            Inbound::UnhandledRequest { id, method } => {
                self.stats.unhandled_requests += 1;
                events.push(SessionEvent::UnhandledRequest { id, method });
            }
            Inbound::Response {
                id,
                method,
                error,
                result,
            } => events.push(SessionEvent::Response {
                id,
                method,
                error,
                result,
            }),
            Inbound::Request { id, method } => debug!(id, method = %method, "peer request answered"),
        }
    }

    fn apply_redraw(&mut self, batch: &[RedrawEvent], events: &mut Vec<SessionEvent>) {
        for event in batch {
            metrics::REDRAW_EVENTS.with_label_values(&[event.name()]).inc();
        }
        let mode = self.render_mode;
        let mut frames = Vec::new();
        let summary = self
            .grid
            .apply_batch(batch, |grid| frames.push(render_frame(grid, mode)));
        trace!(
            applied = summary.applied,
            ignored = summary.ignored,
            flushes = summary.flushes,
            implicit_flush = summary.implicit_flush,
            "redraw batch"
        );
        self.stats.redraw_events_ignored += summary.ignored as u64;
        self.stats.frames_rendered += frames.len() as u64;
        metrics::FRAMES_RENDERED.inc_by(frames.len() as u64);
        events.extend(frames.into_iter().map(SessionEvent::Frame));
    }
}

fn render_frame(grid: &GridState, mode: RenderMode) -> Frame {
    let _perf = PerfGuard::new("render_frame");
    let output = match mode {
        RenderMode::Text => FrameOutput::Text(render::to_plain_text(grid)),
        RenderMode::Ansi => FrameOutput::Ansi(render::to_ansi(grid)),
    };
    Frame {
        output,
        cursor: grid.cursor(),
        mode: grid.mode().clone(),
    }
}
