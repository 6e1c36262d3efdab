//! Process-level drivers behind the `tidepool` binary.

pub mod embed;
pub mod replay;
