pub mod keys;

pub use keys::{translate_key, translate_text};
