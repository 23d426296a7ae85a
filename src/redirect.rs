//! Redirect targets: the user-facing vocabulary for connecting a command's
//! stdin/stdout/stderr to something other than the parent's own streams, and
//! its classification into the handful of shapes the spawn code understands.

use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Low-level redirection the spawn code wires up. User-facing redirect
/// targets (see [`StdinTarget`]/[`StdoutTarget`]) are classified down to
/// this before a pipeline is started.
#[derive(Clone)]
pub enum Redirection {
    /// Inherit the parent's stream.
    None,
    /// An anonymous OS pipe; the other end is exposed to the caller (or
    /// chained into the next command, for stdin/stdout between pipeline
    /// stages).
    Pipe,
    /// Valid only for stderr: duplicate stdout's file descriptor onto
    /// stderr, matching the `STDOUT` sentinel / shell `2>&1`.
    Merge,
    /// Redirect to/from an already-open file. `Arc`-wrapped so that a single
    /// open file can be shared between channels (e.g. `Merge` support)
    /// without an extra `dup()`.
    File(Arc<File>),
    /// Redirect to the platform's null device.
    Null,
}

impl std::fmt::Debug for Redirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Redirection::None => f.write_str("Redirection::None"),
            Redirection::Pipe => f.write_str("Redirection::Pipe"),
            Redirection::Merge => f.write_str("Redirection::Merge"),
            Redirection::File(_) => f.write_str("Redirection::File(..)"),
            Redirection::Null => f.write_str("Redirection::Null"),
        }
    }
}

/// A path used as a redirect target, with the `+`-suffix append convention
/// stripped and recorded separately.
#[derive(Debug, Clone)]
pub(crate) struct RedirectPath {
    pub(crate) path: PathBuf,
    pub(crate) append: bool,
}

pub(crate) fn classify_path_suffix(raw: &str) -> RedirectPath {
    match raw.strip_suffix('+') {
        Some(stripped) => RedirectPath {
            path: PathBuf::from(stripped),
            append: true,
        },
        None => RedirectPath {
            path: PathBuf::from(raw),
            append: false,
        },
    }
}

/// Wraps an arbitrary in-process byte source so it can be used as a stdin
/// redirect target. The pump reads from it lazily, chunk by chunk, feeding
/// the first command's stdin as the child is ready to accept more.
pub struct FromReader<R>(pub R);

/// Wraps an arbitrary in-process byte sink so it can be used as a
/// stdout/stderr redirect target. The pump writes every chunk it drains from
/// the corresponding channel into it, in order.
pub struct ToWriter<W>(pub W);

mod sealed {
    pub trait Sealed {}
}

/// A value that can be used as a command's `stdin` redirect target.
///
/// Implemented for [`Redirection`] (the escape hatch), path-like values
/// (opened for reading), already-open [`File`]s, in-memory byte buffers fed
/// eagerly, and [`FromReader`] for a lazily-read byte source.
pub trait IntoStdin: sealed::Sealed {
    #[doc(hidden)]
    fn into_stdin_target(self) -> StdinTarget;
}

/// A value that can be used as a command's `stdout`/`stderr` redirect
/// target.
///
/// Implemented for [`Redirection`], path-like values (the `+` suffix on a
/// string/`PathBuf` means append), already-open [`File`]s, and [`ToWriter`]
/// for an in-process sink.
pub trait IntoOutput: sealed::Sealed {
    #[doc(hidden)]
    fn into_output_target(self) -> OutputTarget;
}

/// Classified stdin redirect target, resolved by the executor at spawn time.
pub enum StdinTarget {
    Low(Redirection),
    Path(RedirectPath),
    File(File),
    Bytes(Vec<u8>),
    Reader(Box<dyn Read + Send>),
}

/// Classified stdout/stderr redirect target.
pub enum OutputTarget {
    Low(Redirection),
    Path(RedirectPath),
    File(File),
    Writer(Box<dyn Write + Send>),
}

impl sealed::Sealed for Redirection {}
impl IntoStdin for Redirection {
    fn into_stdin_target(self) -> StdinTarget {
        StdinTarget::Low(self)
    }
}
impl IntoOutput for Redirection {
    fn into_output_target(self) -> OutputTarget {
        OutputTarget::Low(self)
    }
}

impl sealed::Sealed for File {}
impl IntoStdin for File {
    fn into_stdin_target(self) -> StdinTarget {
        StdinTarget::File(self)
    }
}
impl IntoOutput for File {
    fn into_output_target(self) -> OutputTarget {
        OutputTarget::File(self)
    }
}

impl sealed::Sealed for &str {}
impl IntoStdin for &str {
    fn into_stdin_target(self) -> StdinTarget {
        StdinTarget::Path(classify_path_suffix(self))
    }
}
impl IntoOutput for &str {
    fn into_output_target(self) -> OutputTarget {
        OutputTarget::Path(classify_path_suffix(self))
    }
}

impl sealed::Sealed for String {}
impl IntoStdin for String {
    fn into_stdin_target(self) -> StdinTarget {
        StdinTarget::Path(classify_path_suffix(&self))
    }
}
impl IntoOutput for String {
    fn into_output_target(self) -> OutputTarget {
        OutputTarget::Path(classify_path_suffix(&self))
    }
}

impl sealed::Sealed for &Path {}
impl IntoStdin for &Path {
    fn into_stdin_target(self) -> StdinTarget {
        StdinTarget::Path(RedirectPath {
            path: self.to_path_buf(),
            append: false,
        })
    }
}
impl IntoOutput for &Path {
    fn into_output_target(self) -> OutputTarget {
        OutputTarget::Path(RedirectPath {
            path: self.to_path_buf(),
            append: false,
        })
    }
}

impl sealed::Sealed for PathBuf {}
impl IntoStdin for PathBuf {
    fn into_stdin_target(self) -> StdinTarget {
        StdinTarget::Path(RedirectPath {
            path: self,
            append: false,
        })
    }
}
impl IntoOutput for PathBuf {
    fn into_output_target(self) -> OutputTarget {
        OutputTarget::Path(RedirectPath {
            path: self,
            append: false,
        })
    }
}

impl sealed::Sealed for Vec<u8> {}
impl IntoStdin for Vec<u8> {
    fn into_stdin_target(self) -> StdinTarget {
        StdinTarget::Bytes(self)
    }
}

impl sealed::Sealed for &[u8] {}
impl IntoStdin for &[u8] {
    fn into_stdin_target(self) -> StdinTarget {
        StdinTarget::Bytes(self.to_vec())
    }
}

impl<const N: usize> sealed::Sealed for &[u8; N] {}
impl<const N: usize> IntoStdin for &[u8; N] {
    fn into_stdin_target(self) -> StdinTarget {
        StdinTarget::Bytes(self.to_vec())
    }
}

impl<R: Read + Send + 'static> sealed::Sealed for FromReader<R> {}
impl<R: Read + Send + 'static> IntoStdin for FromReader<R> {
    fn into_stdin_target(self) -> StdinTarget {
        StdinTarget::Reader(Box::new(self.0))
    }
}

impl<W: Write + Send + 'static> sealed::Sealed for ToWriter<W> {}
impl<W: Write + Send + 'static> IntoOutput for ToWriter<W> {
    fn into_output_target(self) -> OutputTarget {
        OutputTarget::Writer(Box::new(self.0))
    }
}

/// The `STDOUT` sentinel: as a stderr redirect, folds stderr into stdout
/// (`2>&1`). Exposed as a plain value (not a type), mirroring how callers
/// write `Redirection::Merge`/`Redirection::Pipe` directly.
pub fn stdout_sentinel() -> Redirection {
    Redirection::Merge
}

/// The `PIPE` sentinel: exposes the channel as an iterable/capturable
/// output stream (or, for stdin, an explicit unidirectional pipe the caller
/// writes to via [`crate::job::Job`]'s `stdin` field).
pub fn pipe_sentinel() -> Redirection {
    Redirection::Pipe
}
