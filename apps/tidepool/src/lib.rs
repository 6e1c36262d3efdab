pub mod cli;
pub mod clipboard;
pub mod config;
pub mod grid;
pub mod host;
pub mod input;
pub mod metrics;
pub mod render;
pub mod rpc;
pub mod session;
pub mod telemetry;
