//! Bridges the editor's `+`/`*` registers to a host clipboard.
//!
//! [`PROVIDER_LUA`] installs a `vim.g.clipboard` provider on the UI channel:
//! a yank becomes a [`COPY_METHOD`] notification carrying `[lines, regtype]`,
//! and a put becomes a blocking [`PASTE_METHOD`] request answered with
//! `[lines, regtype]`.

use std::sync::Arc;

use copypasta::{ClipboardContext, ClipboardProvider};
use msgpack_wire::Value;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, warn};

use crate::rpc::RequestResponder;

pub const COPY_METHOD: &str = "tidepool-clipboard-copy";
pub const PASTE_METHOD: &str = "tidepool-clipboard-paste";

/// Characterwise register type; used for every paste.
const CHARWISE: &str = "v";

pub const PROVIDER_LUA: &str = r#"
local chan = (vim.api.nvim_get_api_info() or {})[1]
if not chan then return end
local function copy(lines, regtype)
  vim.rpcnotify(chan, 'tidepool-clipboard-copy', lines, regtype)
end
local function paste()
  local ok, res = pcall(vim.rpcrequest, chan, 'tidepool-clipboard-paste')
  if not ok or type(res) ~= 'table' then return {}, 'v' end
  return res[1] or {}, res[2] or 'v'
end
vim.g.clipboard = {
  name = 'tidepool',
  copy = { ['+'] = copy, ['*'] = copy },
  paste = { ['+'] = paste, ['*'] = paste },
}
vim.opt.clipboard = 'unnamedplus'
"#;

#[derive(Debug, Error)]
#[error("clipboard unavailable: {0}")]
pub struct ClipboardError(pub String);

/// A host clipboard holding plain text.
pub trait Clipboard: Send {
    fn get(&mut self) -> Result<String, ClipboardError>;
    fn set(&mut self, text: String) -> Result<(), ClipboardError>;
}

/// The desktop clipboard. A context is opened per call so a missing display
/// only fails the operation at hand.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClipboard;

impl Clipboard for SystemClipboard {
    fn get(&mut self) -> Result<String, ClipboardError> {
        let mut ctx = ClipboardContext::new().map_err(|err| ClipboardError(err.to_string()))?;
        ctx.get_contents().map_err(|err| ClipboardError(err.to_string()))
    }

    fn set(&mut self, text: String) -> Result<(), ClipboardError> {
        let mut ctx = ClipboardContext::new().map_err(|err| ClipboardError(err.to_string()))?;
        ctx.set_contents(text).map_err(|err| ClipboardError(err.to_string()))
    }
}

/// Clipboard that lives only as long as the process.
#[derive(Debug, Default, Clone)]
pub struct MemoryClipboard {
    contents: Option<String>,
}

impl Clipboard for MemoryClipboard {
    fn get(&mut self) -> Result<String, ClipboardError> {
        self.contents
            .clone()
            .ok_or_else(|| ClipboardError("clipboard empty".into()))
    }

    fn set(&mut self, text: String) -> Result<(), ClipboardError> {
        self.contents = Some(text);
        Ok(())
    }
}

struct BridgeState {
    provider: Box<dyn Clipboard>,
    /// Last text the editor copied; pasted back when the provider has nothing.
    last_copy: Option<String>,
}

/// Shared by the session (copy notifications) and its responder (paste
/// requests).
#[derive(Clone)]
pub struct ClipboardBridge {
    state: Arc<Mutex<BridgeState>>,
}

impl ClipboardBridge {
    pub fn new(provider: impl Clipboard + 'static) -> Self {
        Self {
            state: Arc::new(Mutex::new(BridgeState {
                provider: Box::new(provider),
                last_copy: None,
            })),
        }
    }

    pub fn system() -> Self {
        Self::new(SystemClipboard)
    }

    /// Stores a copy notification. Returns `false` when `method` is not the
    /// copy method.
    pub fn handle_notification(&self, method: &str, params: &Value) -> bool {
        if method != COPY_METHOD {
            return false;
        }
        let Some(text) = params
            .as_array()
            .and_then(<[Value]>::first)
            .and_then(lines_to_text)
        else {
            warn!(params = ?params, "clipboard copy without a line list");
            return true;
        };
        debug!(bytes = text.len(), "editor copied to clipboard");
        let mut state = self.state.lock();
        if let Err(err) = state.provider.set(text.clone()) {
            warn!(error = %err, "keeping copy in memory only");
        }
        state.last_copy = Some(text);
        true
    }

    /// `[lines, "v"]` for a paste request.
    pub fn paste(&self) -> Value {
        let mut state = self.state.lock();
        let text = match state.provider.get() {
            Ok(text) if !text.is_empty() => text,
            Ok(_) => state.last_copy.clone().unwrap_or_default(),
            Err(err) => {
                debug!(error = %err, "pasting the last editor copy");
                state.last_copy.clone().unwrap_or_default()
            }
        };
        Value::Array(vec![text_to_lines(&text), Value::from(CHARWISE)])
    }

    /// Answers [`PASTE_METHOD`]; every other request gets an error reply.
    pub fn responder(&self) -> Box<dyn RequestResponder> {
        let bridge = self.clone();
        Box::new(move |method: &str, _params: &Value| {
            if method == PASTE_METHOD {
                Ok(bridge.paste())
            } else {
                Err(Value::from(format!("unsupported request `{method}`")))
            }
        })
    }
}

fn lines_to_text(lines: &Value) -> Option<String> {
    let lines = lines.as_array()?;
    let mut text = String::new();
    for (i, line) in lines.iter().enumerate() {
        if i > 0 {
            text.push('\n');
        }
        text.push_str(line.as_str()?);
    }
    Some(text)
}

fn text_to_lines(text: &str) -> Value {
    Value::Array(
        text.split('\n')
            .map(|line| Value::from(line.strip_suffix('\r').unwrap_or(line)))
            .collect(),
    )
}
