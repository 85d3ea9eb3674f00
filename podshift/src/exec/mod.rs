//! External command execution: subprocess runner, the checkpoint/restore
//! tool surface, and rsync-based directory replication.
//!
//! Each capability is a trait so the coordinator and agent can be exercised
//! with fakes; the production implementations shell out.

mod runner;
mod sync;
mod tool;

pub use runner::{ProcessRunner, SystemRunner};
pub use sync::{DirectorySync, Rsync};
pub use tool::{ApptainerTool, CheckpointTool};
