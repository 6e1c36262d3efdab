//! MessagePack value model with an all-or-nothing encoder and a streaming
//! decoder that tolerates arbitrary chunk boundaries.

mod decode;
mod encode;
mod error;
pub mod tag;
mod value;

pub use decode::{decode_value, Decoder, MAX_DEPTH};
pub use encode::{encode, encode_into};
pub use error::{DecodeError, EncodeError};
pub use value::Value;
