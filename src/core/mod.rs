//! Core types, traits, constants and errors (always included).

pub mod constants;
mod error;
mod traits;
mod types;

pub use error::*;
pub use traits::*;
pub use types::*;
