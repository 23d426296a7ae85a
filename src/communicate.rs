//! The concurrent I/O pump: feeds a pipeline's stdin, drains its stdout and
//! shared stderr, without letting either direction block indefinitely.
//!
//! Two things are built on top of the same platform primitives:
//! [`Communicator::read`] drains everything to completion and is used by
//! [`crate::job::Job::capture`]/[`crate::job::Job::join`]; [`Communicator::stream`] exposes
//! the same bytes incrementally, for [`crate::job::Job::iterate_raw`].

use std::fmt;
use std::fs::File;
use std::io::{self, Read, Write};
use std::sync::mpsc::{Receiver, SyncSender, sync_channel};
use std::thread;
use std::time::{Duration, Instant};

/// Which drain channel a chunk came from.
///
/// Every command whose stderr ends up piped gets its own channel, indexed by
/// that command's 0-based position in the pipeline. Bytes within one channel
/// arrive in the order the child wrote them; channels never share a pipe, so
/// two children's stderr writes cannot interleave mid-write the way they
/// would if funneled through one shared fd.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// The last command's stdout.
    Stdout,
    /// One command's stderr, tagged with its position in the pipeline.
    Stderr(usize),
}

/// The data fed to a pipeline's first command, if its stdin is a pipe:
/// nothing, an eagerly-supplied buffer, or a source read lazily as the child
/// is ready to accept more.
pub(crate) enum InputData {
    None,
    Bytes(io::Cursor<Vec<u8>>),
    Reader(Box<dyn Read + Send>),
}

impl InputData {
    pub(crate) fn bytes(data: Vec<u8>) -> InputData {
        InputData::Bytes(io::Cursor::new(data))
    }

    pub(crate) fn is_none(&self) -> bool {
        matches!(self, InputData::None)
    }
}

impl Default for InputData {
    fn default() -> InputData {
        InputData::None
    }
}

impl Read for InputData {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            InputData::None => Ok(0),
            InputData::Bytes(c) => c.read(buf),
            InputData::Reader(r) => r.read(buf),
        }
    }
}

impl fmt::Debug for InputData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputData::None => f.write_str("InputData::None"),
            InputData::Bytes(c) => write!(f, "InputData::Bytes({} bytes left)", c.get_ref().len() - c.position() as usize),
            InputData::Reader(_) => f.write_str("InputData::Reader(..)"),
        }
    }
}

/// A sink a drained channel is written through to, in addition to (or
/// instead of) being buffered for [`Communicator::read`].
pub(crate) type Sink = Box<dyn Write + Send>;

/// A started pipeline's communication handle: owns the pipe ends that were
/// redirected to `Pipe`, and drives the pump.
///
/// Obtained from [`crate::job::Job::communicate`]. Unlike `Job::join`/`Job::capture`, creating
/// a `Communicator` does not wait for the pipeline to finish; it only sets up the
/// plumbing. Call [`read`](Self::read) to run the pump to completion, or
/// [`stream`](Self::stream) to consume chunks as they arrive.
pub struct Communicator {
    stdin: Option<File>,
    stdout: Option<File>,
    stderr: Vec<(usize, File)>,
    input: InputData,
    stdout_sink: Option<Sink>,
    stderr_sinks: Vec<(usize, Sink)>,
    time_limit: Option<Duration>,
}

impl fmt::Debug for Communicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Communicator")
            .field("stdin", &self.stdin.is_some())
            .field("stdout", &self.stdout.is_some())
            .field("stderr", &self.stderr.len())
            .field("input", &self.input)
            .finish()
    }
}

impl Communicator {
    pub(crate) fn new(
        stdin: Option<File>,
        stdout: Option<File>,
        stderr: Vec<(usize, File)>,
        input: InputData,
        stdout_sink: Option<Sink>,
        stderr_sinks: Vec<(usize, Sink)>,
    ) -> Communicator {
        if stdin.is_none() {
            assert!(input.is_none(), "cannot provide input to non-redirected stdin");
        }
        Communicator {
            stdin,
            stdout,
            stderr,
            input,
            stdout_sink,
            stderr_sinks,
            time_limit: None,
        }
    }

    /// Limits how long [`read`](Self::read) will run before giving up with an
    /// `ErrorKind::TimedOut` error.
    pub fn limit_time(mut self, timeout: Duration) -> Communicator {
        self.time_limit = Some(timeout);
        self
    }

    /// Runs the pump to completion: feeds all of `stdin`, drains `stdout` and
    /// every piped stderr until all are closed, and returns whatever was not
    /// written through to an attached sink.
    ///
    /// Stderr bytes from every command are concatenated into the second
    /// buffer in whatever order they were read; a channel with a sink
    /// attached contributes nothing here, since its bytes went to the sink
    /// instead. Callers that need to tell which command a chunk came from
    /// should use [`stream`](Self::stream) instead.
    pub fn read(&mut self) -> io::Result<(Vec<u8>, Vec<u8>)> {
        let deadline = self.time_limit.map(|d| Instant::now() + d);
        let (out, err) = os::communicate(
            &mut self.stdin,
            &mut self.stdout,
            &mut self.stderr,
            &mut self.input,
            self.stdout_sink.as_deref_mut(),
            &mut self.stderr_sinks,
            deadline,
        )?;
        Ok((out.unwrap_or_default(), err))
    }

    /// Consumes the communicator and returns an iterator of `(Channel, chunk)`
    /// pairs, read as they become available rather than all at once.
    ///
    /// Spawns one worker per active channel (at most one writer for stdin,
    /// one reader for stdout, one reader per piped stderr), all funneling
    /// into a single bounded channel so a slow consumer backpressures the
    /// producers. Each stderr reader is tagged with the pipeline position of
    /// the command it drains.
    pub(crate) fn stream(self) -> ChunkStream {
        let (tx, rx) = sync_channel(1);
        let mut threads = Vec::new();

        if let Some(stdin) = self.stdin {
            if !self.input.is_none() {
                threads.push(spawn_writer(stdin, self.input, tx.clone()));
            }
        }
        if let Some(stdout) = self.stdout {
            threads.push(spawn_reader(stdout, Channel::Stdout, self.stdout_sink, tx.clone()));
        }
        let mut stderr_sinks = self.stderr_sinks;
        for (idx, file) in self.stderr {
            let pos = stderr_sinks.iter().position(|(i, _)| *i == idx);
            let sink = pos.map(|p| stderr_sinks.remove(p).1);
            threads.push(spawn_reader(file, Channel::Stderr(idx), sink, tx.clone()));
        }
        drop(tx);

        ChunkStream { rx, _threads: threads }
    }
}

fn spawn_writer(
    mut stdin: File,
    mut input: InputData,
    tx: SyncSender<io::Result<(Channel, Vec<u8>)>>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let mut buf = [0u8; 65536];
        loop {
            let n = match input.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    let _ = tx.send(Err(e));
                    break;
                }
            };
            if let Err(e) = stdin.write_all(&buf[..n]) {
                if e.kind() != io::ErrorKind::BrokenPipe {
                    let _ = tx.send(Err(e));
                }
                break;
            }
        }
        // Dropping `stdin` here closes our copy of the write end, so the
        // child sees EOF.
    })
}

fn spawn_reader(
    mut file: File,
    channel: Channel,
    mut sink: Option<Sink>,
    tx: SyncSender<io::Result<(Channel, Vec<u8>)>>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let mut buf = [0u8; 65536];
        loop {
            match file.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if let Some(sink) = sink.as_mut() {
                        if let Err(e) = sink.write_all(&buf[..n]) {
                            let _ = tx.send(Err(e));
                            break;
                        }
                    }
                    if tx.send(Ok((channel, buf[..n].to_vec()))).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    let _ = tx.send(Err(e));
                    break;
                }
            }
        }
    })
}

/// Lazily yields `(Channel, chunk)` pairs as a started pipeline's output
/// arrives. See [`Communicator::stream`].
pub(crate) struct ChunkStream {
    rx: Receiver<io::Result<(Channel, Vec<u8>)>>,
    _threads: Vec<thread::JoinHandle<()>>,
}

impl Iterator for ChunkStream {
    type Item = io::Result<(Channel, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.rx.recv().ok()
    }
}

#[cfg(unix)]
mod os {
    use super::*;
    use crate::posix;
    use std::cmp::min;
    use std::os::unix::io::AsRawFd;

    fn to_poll(f: Option<&File>, for_read: bool) -> posix::PollFd {
        let optfd = f.map(File::as_raw_fd);
        let events = if for_read { posix::POLLIN } else { posix::POLLOUT };
        posix::PollFd::new(optfd, events)
    }

    /// Polls stdin (for writability) plus stdout and every still-open
    /// stderr channel (for readability) in one syscall. A `None` stream is
    /// represented to `poll(2)` as fd `-1`, which it always reports as not
    /// ready, so closed channels simply drop out without needing a
    /// variable-length dance beyond building the slice.
    fn poll_all(
        stdin: Option<&File>,
        stdout: Option<&File>,
        stderrs: &[Option<&File>],
        deadline: Option<Instant>,
    ) -> io::Result<(bool, bool, Vec<bool>)> {
        let mut fds = Vec::with_capacity(2 + stderrs.len());
        fds.push(to_poll(stdin, false));
        fds.push(to_poll(stdout, true));
        for f in stderrs {
            fds.push(to_poll(*f, true));
        }
        let timeout_ms = match deadline {
            None => -1,
            Some(d) => d.saturating_duration_since(Instant::now()).as_millis().min(i32::MAX as u128) as i32,
        };
        posix::poll(&mut fds, timeout_ms)?;

        let in_ready = fds[0].test(posix::POLLOUT | posix::POLLHUP);
        let out_ready = fds[1].test(posix::POLLIN | posix::POLLHUP);
        let err_ready = fds[2..].iter().map(|fd| fd.test(posix::POLLIN | posix::POLLHUP)).collect();
        Ok((in_ready, out_ready, err_ready))
    }

    #[allow(clippy::too_many_arguments)]
    fn comm_poll(
        stdin_ref: &mut Option<File>,
        stdout_ref: &mut Option<File>,
        stderr_refs: &mut [(usize, File)],
        input: &mut dyn Read,
        mut stdout_sink: Option<&mut dyn Write>,
        stderr_sinks: &mut [(usize, Sink)],
        deadline: Option<Instant>,
    ) -> io::Result<(Vec<u8>, Vec<u8>)> {
        // Chunk size for writing must be smaller than the pipe buffer size:
        // a large enough write to a blocking pipe deadlocks despite poll()
        // having said it was ok to write.
        const WRITE_SIZE: usize = 4096;

        let mut stdout_ref = stdout_ref.as_ref();
        let mut stderr_open = vec![true; stderr_refs.len()];

        let mut out = Vec::<u8>::new();
        let mut err = Vec::<u8>::new();
        let mut pending = Vec::<u8>::new();
        let mut input_done = false;

        loop {
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    return Err(io::Error::from(io::ErrorKind::TimedOut));
                }
            }

            if stdin_ref.is_none() && stdout_ref.is_none() && !stderr_open.iter().any(|&open| open) {
                break;
            }

            let stderr_live: Vec<Option<&File>> = stderr_refs
                .iter()
                .zip(&stderr_open)
                .map(|((_, f), &open)| open.then_some(f))
                .collect();
            let (in_ready, out_ready, err_ready) = poll_all(stdin_ref.as_ref(), stdout_ref, &stderr_live, deadline)?;

            if in_ready {
                if pending.is_empty() && !input_done {
                    let mut buf = [0u8; WRITE_SIZE];
                    let n = input.read(&mut buf)?;
                    if n == 0 {
                        input_done = true;
                    } else {
                        pending.extend_from_slice(&buf[..n]);
                    }
                }
                if input_done && pending.is_empty() {
                    stdin_ref.take();
                } else {
                    let chunk_len = min(WRITE_SIZE, pending.len());
                    match stdin_ref.as_mut().unwrap().write(&pending[..chunk_len]) {
                        Ok(n) => {
                            pending.drain(..n);
                        }
                        Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                            stdin_ref.take();
                            pending.clear();
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
            if out_ready {
                let mut buf = [0u8; 65536];
                let n = stdout_ref.unwrap().read(&mut buf)?;
                if n != 0 {
                    if let Some(sink) = stdout_sink.as_deref_mut() {
                        sink.write_all(&buf[..n])?;
                    }
                    out.extend(&buf[..n]);
                } else {
                    stdout_ref = None;
                }
            }
            for (i, ready) in err_ready.into_iter().enumerate() {
                if !ready {
                    continue;
                }
                let mut buf = [0u8; 65536];
                let idx = stderr_refs[i].0;
                let n = stderr_refs[i].1.read(&mut buf)?;
                if n != 0 {
                    if let Some((_, sink)) = stderr_sinks.iter_mut().find(|(j, _)| *j == idx) {
                        sink.write_all(&buf[..n])?;
                    }
                    err.extend(&buf[..n]);
                } else {
                    stderr_open[i] = false;
                }
            }
        }

        Ok((out, err))
    }

    #[allow(clippy::too_many_arguments)]
    pub(super) fn communicate(
        stdin_ref: &mut Option<File>,
        stdout_ref: &mut Option<File>,
        stderr_refs: &mut Vec<(usize, File)>,
        input: &mut dyn Read,
        stdout_sink: Option<&mut dyn Write>,
        stderr_sinks: &mut Vec<(usize, Sink)>,
        deadline: Option<Instant>,
    ) -> io::Result<(Option<Vec<u8>>, Vec<u8>)> {
        let have_out = stdout_ref.is_some();
        let (out, err) = comm_poll(stdin_ref, stdout_ref, stderr_refs, input, stdout_sink, stderr_sinks, deadline)?;
        Ok((have_out.then_some(out), err))
    }
}

#[cfg(windows)]
mod os {
    use super::*;

    fn comm_read(mut outfile: File, mut sink: Option<&mut dyn Write>) -> io::Result<Vec<u8>> {
        let mut contents = Vec::new();
        let mut buf = [0u8; 65536];
        loop {
            let n = outfile.read(&mut buf)?;
            if n == 0 {
                return Ok(contents);
            }
            if let Some(sink) = sink.as_deref_mut() {
                sink.write_all(&buf[..n])?;
            }
            contents.extend_from_slice(&buf[..n]);
        }
    }

    fn comm_write(mut infile: File, mut input: impl Read + Send) -> io::Result<()> {
        let mut buf = [0u8; 65536];
        loop {
            let n = input.read(&mut buf)?;
            if n == 0 {
                return Ok(());
            }
            if let Err(e) = infile.write_all(&buf[..n]) {
                if e.kind() == io::ErrorKind::BrokenPipe {
                    return Ok(());
                }
                return Err(e);
            }
        }
    }

    /// Spawns one thread per active channel (a stdin writer, a stdout
    /// reader, and one reader per piped stderr) and joins them all inside a
    /// scope, so none of the `File`/`Read`/`Write` borrows needs to be
    /// `'static`.
    #[allow(clippy::too_many_arguments)]
    pub(super) fn communicate(
        stdin: &mut Option<File>,
        stdout: &mut Option<File>,
        stderr: &mut Vec<(usize, File)>,
        input: &mut (dyn Read + Send),
        stdout_sink: Option<&mut dyn Write>,
        stderr_sinks: &mut Vec<(usize, Sink)>,
        _deadline: Option<Instant>,
    ) -> io::Result<(Option<Vec<u8>>, Vec<u8>)> {
        let stdin_job = stdin.take();
        let stdout_job = stdout.take();
        let stderr_jobs = std::mem::take(stderr);
        let mut sinks = std::mem::take(stderr_sinks);

        crossbeam_utils::thread::scope(|scope| -> io::Result<(Option<Vec<u8>>, Vec<u8>)> {
            let write_handle = stdin_job.map(|in_| scope.spawn(move |_| comm_write(in_, input)));
            let out_handle = stdout_job.map(|out| scope.spawn(move |_| comm_read(out, stdout_sink)));
            let err_handles: Vec<_> = stderr_jobs
                .into_iter()
                .map(|(idx, file)| {
                    let pos = sinks.iter().position(|(i, _)| *i == idx);
                    let sink = pos.map(|p| sinks.remove(p).1);
                    scope.spawn(move |_| {
                        let mut sink = sink;
                        comm_read(file, sink.as_deref_mut())
                    })
                })
                .collect();

            let write_ret = write_handle.map(|t| t.join().unwrap());
            let out = out_handle.map(|t| t.join().unwrap());
            let mut err = Vec::new();
            for handle in err_handles {
                err.extend(handle.join().unwrap()?);
            }
            if let Some(write_ret) = write_ret {
                write_ret?;
            }
            Ok((out.transpose()?, err))
        })
        .unwrap()
    }
}
