use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::Config;
use crate::render::RenderMode;
use crate::telemetry::logging::{LogConfig, LogLevel};

#[derive(Parser, Debug)]
#[command(
    name = "tidepool",
    about = "Drive an embedded editor over msgpack-rpc and render its grid",
    author,
    version
)]
pub struct Cli {
    #[command(flatten)]
    pub logging: LoggingArgs,

    #[arg(
        long = "ring-capacity",
        global = true,
        value_name = "BYTES",
        help = "Data bytes in the outbound ring (overrides TIDEPOOL_RING_CAPACITY)"
    )]
    pub ring_capacity: Option<usize>,

    #[arg(
        long,
        global = true,
        help = "Print Prometheus metrics to stderr on exit"
    )]
    pub metrics: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug, Clone)]
pub struct LoggingArgs {
    #[arg(
        long = "log-level",
        value_enum,
        global = true,
        env = "TIDEPOOL_LOG_LEVEL",
        default_value_t = LogLevel::Warn,
        help = "Minimum log level (error, warn, info, debug, trace)"
    )]
    pub level: LogLevel,

    #[arg(
        long = "log-file",
        value_name = "PATH",
        global = true,
        env = "TIDEPOOL_LOG_FILE",
        help = "Write structured logs to the specified file"
    )]
    pub file: Option<PathBuf>,
}

impl LoggingArgs {
    pub fn to_config(&self) -> LogConfig {
        LogConfig {
            level: self.level,
            file: self.file.clone(),
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start `<editor> --embed` and drive it from this terminal
    Embed(EmbedArgs),
    /// Feed a captured editor output stream through a session and print the last frame
    Replay(ReplayArgs),
}

#[derive(Args, Debug, Clone, Default)]
pub struct EmbedArgs {
    #[arg(long, value_name = "PATH", help = "Editor executable (overrides TIDEPOOL_EDITOR)")]
    pub editor: Option<String>,

    #[arg(long, help = "Fallback width when the terminal size is unknown")]
    pub cols: Option<u16>,

    #[arg(long, help = "Fallback height when the terminal size is unknown")]
    pub rows: Option<u16>,

    #[arg(long, help = "Share the editor's + and * registers with the system clipboard")]
    pub clipboard: bool,

    /// Extra editor arguments, after `--`
    #[arg(trailing_var_arg = true)]
    pub editor_args: Vec<String>,
}

#[derive(Args, Debug, Clone)]
pub struct ReplayArgs {
    /// Raw bytes previously read from the editor's stdout
    pub capture: PathBuf,

    #[arg(long, default_value_t = 4096, help = "Bytes handed to the decoder per push")]
    pub chunk: usize,

    #[arg(long, value_enum, help = "Frame format (overrides TIDEPOOL_RENDER)")]
    pub format: Option<RenderMode>,

    #[arg(long, help = "Grid width before the capture's first resize")]
    pub cols: Option<u16>,

    #[arg(long, help = "Grid height before the capture's first resize")]
    pub rows: Option<u16>,
}

impl Cli {
    /// Layers command-line overrides on top of the environment config.
    pub fn apply_overrides(&self, config: &mut Config) {
        if let Some(capacity) = self.ring_capacity {
            config.ring_capacity = capacity;
        }
        match &self.command {
            Command::Embed(args) => {
                if let Some(editor) = &args.editor {
                    config.editor = editor.clone();
                }
                config.clipboard |= args.clipboard;
                override_size(config, args.cols, args.rows);
            }
            Command::Replay(args) => {
                if let Some(format) = args.format {
                    config.render_mode = format;
                }
                override_size(config, args.cols, args.rows);
            }
        }
    }
}

fn override_size(config: &mut Config, cols: Option<u16>, rows: Option<u16>) {
    if let Some(cols) = cols {
        config.cols = cols;
    }
    if let Some(rows) = rows {
        config.rows = rows;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn replay_flags_override_config() {
        let cli = Cli::try_parse_from([
            "tidepool",
            "--ring-capacity",
            "4096",
            "replay",
            "capture.bin",
            "--format",
            "text",
            "--cols",
            "10",
        ])
        .unwrap();
        let mut config = Config::default();
        cli.apply_overrides(&mut config);
        assert_eq!(config.ring_capacity, 4096);
        assert_eq!(config.render_mode, RenderMode::Text);
        assert_eq!(config.cols, 10);
        assert_eq!(config.rows, 24);
        match cli.command {
            Command::Replay(args) => {
                assert_eq!(args.capture, PathBuf::from("capture.bin"));
                assert_eq!(args.chunk, 4096);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn embed_collects_trailing_editor_args() {
        let cli = Cli::try_parse_from([
            "tidepool",
            "embed",
            "--editor",
            "/opt/nvim",
            "--clipboard",
            "--",
            "--clean",
            "notes.txt",
        ])
        .unwrap();
        let mut config = Config::default();
        cli.apply_overrides(&mut config);
        assert_eq!(config.editor, "/opt/nvim");
        assert!(config.clipboard);
        match cli.command {
            Command::Embed(args) => assert_eq!(args.editor_args, ["--clean", "notes.txt"]),
            other => panic!("unexpected command {other:?}"),
        }
    }
}
