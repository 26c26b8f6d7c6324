// crates/core/src/lib.rs
pub mod config;
pub mod error;
pub mod paths;
pub mod plan;
pub mod process;
pub mod progress;
pub mod tail;
pub mod types;

pub use config::*;
pub use error::*;
pub use plan::{validate_location, Archiver, TransferTool};
pub use process::{
    ExitWaiter, OutputStream, ProcessExit, ProcessRunner, RunningProcess, StopSignal,
    TransferCommand,
};
pub use progress::{parse_progress, ProgressTracker};
pub use tail::{LogBuffer, TailBuffer, Utf8Decoder};
pub use types::*;
