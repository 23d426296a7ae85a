//! Error types returned by pipeline composition and execution.

use std::ffi::OsString;
use std::io;

use crate::process::ExitStatus;

/// One command's failure as recorded by a pipeline run with `checked` set.
#[derive(Debug, Clone)]
pub struct ProcessFailure {
    /// The argv the failing command was spawned with.
    pub argv: Vec<OsString>,
    /// The OS process id.
    pub pid: u32,
    /// The exit status the process actually terminated with.
    pub exit_status: ExitStatus,
}

/// Errors returned by this crate's pipeline composition and execution API.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// A pipeline was built or composed in a way that violates the structural
    /// invariant that only the first command may redirect stdin and only the
    /// last may redirect stdout.
    #[error("invalid pipeline: {0}")]
    InvalidPipeline(String),

    /// A second redirect was attempted on a channel that was already bound.
    #[error("command already redirects {channel}")]
    AlreadyRedirected {
        /// Which channel was already bound (`"stdin"`, `"stdout"`, `"stderr"`).
        channel: &'static str,
    },

    /// At least one command in the pipeline exited with a nonzero status and
    /// `checked` was set on it.
    #[error("{} of {} command(s) in pipeline exited with a nonzero status", .failures.len(), .total)]
    ProcessError {
        /// The commands that failed, in pipeline order.
        failures: Vec<ProcessFailure>,
        /// Total number of commands in the pipeline.
        total: usize,
    },

    /// An OS-level I/O error that is not one of the above, propagated as-is.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Convenience alias for this crate's fallible operations.
pub type Result<T> = std::result::Result<T, PipelineError>;
