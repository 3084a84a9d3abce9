//! Shared building blocks for the session bridge crates

mod error;
mod persist;
mod secret;

pub use error::{Error, Result};
pub use persist::{read_json, remove_file, write_json_atomic};
pub use secret::Secret;
