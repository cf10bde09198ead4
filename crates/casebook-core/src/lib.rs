pub mod config;
pub mod error;
pub mod types;

pub use config::CasebookConfig;
pub use error::{CasebookError, Result};
pub use types::*;
