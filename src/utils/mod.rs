// src/utils/mod.rs
pub mod backoff;
pub mod logging;
pub mod process;

pub use backoff::{BackoffConfig, ExponentialBackoff};
pub use process::{run_captured, CommandOutput};

/// Expand a leading `~` in a configured path.
pub fn expand_path(path: &str) -> std::path::PathBuf {
    std::path::PathBuf::from(shellexpand::tilde(path).to_string())
}
