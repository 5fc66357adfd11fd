mod config;
mod error;
mod types;

pub use config::*;
pub use error::{Result, StrataError};
pub use types::*;
