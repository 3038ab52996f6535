pub mod agent;
pub mod coordinate;
pub mod dispatch;
pub mod forward;
pub mod keys;
pub mod mailbox;
pub mod self_test;
pub mod sign;
pub mod token;
pub mod verify;

pub use dispatch::dispatch;

use anyhow::Context;
use std::path::Path;

/// Read a file named on the command line.
pub(crate) fn read_file(path: &Path, what: &str) -> anyhow::Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("failed to read {what} {}", path.display()))
}
