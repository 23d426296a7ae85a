//! Building and running external commands, singly or piped together.
//!
//! The entry point is the [`Command`] builder: a single external program and
//! the redirections, environment, and spawn options it runs with. Several
//! `Command`s connect into a [`Pipeline`] with `|`, mirroring a shell
//! pipeline, and composing pipelines is itself just as easy:
//!
//! ```no_run
//! use pipeshell::Command;
//!
//! let checksum = (Command::new("find").args([".", "-type", "f"])
//!     | Command::new("sort")
//!     | Command::new("sha1sum"))
//!     .capture()?;
//! println!("{}", checksum.stdout_str());
//! # Ok::<(), pipeshell::PipelineError>(())
//! ```
//!
//! Starting a [`Command`] or [`Pipeline`] returns a [`Job`]: a handle to the
//! running process or processes, with [`Job::wait`], [`Job::communicate`],
//! [`Job::terminate`]/[`Job::kill`], and iterator adapters over a piped
//! stream's output.
//!
//! [`Shell`] layers a mutable context -- command aliases, environment
//! scopes, working-directory scopes -- on top of the builder API, for
//! callers that want nested, scoped overrides rather than threading them
//! through every `Command` by hand.
//!
//! Compared to `std::process`, this crate adds:
//!
//! * [`Job::communicate`]/[`Pipeline::communicate`] for deadlock-free
//!   simultaneous feeding of a pipeline's stdin and draining of its stdout
//!   and stderr.
//! * Redirection to arbitrary files, in-memory buffers, or `2>&1`-style
//!   stream merging, through the [`IntoStdin`]/[`IntoOutput`] vocabulary.
//! * Non-blocking and timeout waits: [`Job::poll`], [`Job::wait`],
//!   [`Job::wait_timeout`].
//! * Multi-process OS-level pipelines via [`Pipeline`], with a single
//!   [`PipelineError::ProcessError`] collecting every non-zero exit across
//!   the whole pipeline.

#![warn(missing_docs)]

extern crate libc;

#[cfg(windows)]
extern crate winapi;

mod command;
mod communicate;
mod error;
mod globbing;
mod job;
mod pipeline;
mod process;
mod redirect;
mod shell;
mod spawn;

#[cfg(unix)]
mod posix;

#[cfg(windows)]
mod win32;

pub use self::command::Command;
pub use self::communicate::{Channel, Communicator};
pub use self::error::{PipelineError, ProcessFailure, Result};
pub use self::job::{Capture, Iter, Job, RawIter};
pub use self::pipeline::Pipeline;
pub use self::process::{ExitStatus, Process};
pub use self::redirect::{
    pipe_sentinel, stdout_sentinel, FromReader, IntoOutput, IntoStdin, Redirection, ToWriter,
};
pub use self::shell::{DirScope, EnvScope, Shell};

#[cfg(unix)]
pub use self::process::ProcessExt;

#[cfg(test)]
mod tests;
