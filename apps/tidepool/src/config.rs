use std::env;
use std::str::FromStr;

use tracing::warn;
use transport_ring::DEFAULT_CAPACITY;

use crate::render::RenderMode;

pub const ENV_RING_CAPACITY: &str = "TIDEPOOL_RING_CAPACITY";
pub const ENV_EDITOR: &str = "TIDEPOOL_EDITOR";
pub const ENV_COLS: &str = "TIDEPOOL_COLS";
pub const ENV_ROWS: &str = "TIDEPOOL_ROWS";
pub const ENV_RENDER: &str = "TIDEPOOL_RENDER";
pub const ENV_CLIPBOARD: &str = "TIDEPOOL_CLIPBOARD";

/// Tidepool host configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Data bytes in the outbound ring.
    pub ring_capacity: usize,
    /// Editor executable started with `--embed`.
    pub editor: String,
    pub cols: u16,
    pub rows: u16,
    pub render_mode: RenderMode,
    /// Bridge the editor's `+` and `*` registers to the system clipboard
    /// (`true` or `false`).
    pub clipboard: bool,
}

impl Config {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let render_mode = match env::var(ENV_RENDER) {
            Ok(raw) => RenderMode::parse(&raw).unwrap_or_else(|| {
                warn!(key = ENV_RENDER, value = %raw, "unknown render mode, using default");
                defaults.render_mode
            }),
            Err(_) => defaults.render_mode,
        };
        Self {
            ring_capacity: env_or(ENV_RING_CAPACITY, defaults.ring_capacity),
            editor: env::var(ENV_EDITOR)
                .ok()
                .filter(|editor| !editor.trim().is_empty())
                .unwrap_or(defaults.editor),
            cols: env_or(ENV_COLS, defaults.cols),
            rows: env_or(ENV_ROWS, defaults.rows),
            render_mode,
            clipboard: env_or(ENV_CLIPBOARD, defaults.clipboard),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ring_capacity: DEFAULT_CAPACITY,
            editor: "nvim".to_string(),
            cols: 80,
            rows: 24,
            render_mode: RenderMode::Ansi,
            clipboard: false,
        }
    }
}

fn env_or<T>(key: &str, default: T) -> T
where
    T: FromStr + Copy + std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(key, value = %raw, default = %default, "invalid value, using default");
            default
        }),
        Err(_) => default,
    }
}
