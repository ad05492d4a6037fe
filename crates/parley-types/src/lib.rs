//! Shared chat types, capability traits and error hierarchy for Parley.

pub mod error;
pub mod message;
pub mod provider;
pub mod thinking;
pub mod tool;
pub mod util;

pub use error::{ApiError, ChatError, ConfigError, ToolError};
pub use message::*;
pub use thinking::*;
pub use tool::*;
