//! [`Job`]: a handle to one or more already-started processes.

use std::ffi::OsString;
use std::fs::File;
use std::io::{self, Read, Write};
use std::time::{Duration, Instant};

use crate::communicate::{Channel, Communicator, InputData, Sink};
use crate::error::{PipelineError, ProcessFailure, Result};
use crate::process::{ExitStatus, Process};

/// Interface to one or more already-started processes.
///
/// Created by [`crate::Command::start`] or [`crate::Pipeline::start`].
///
/// When dropped, waits for all processes to finish unless [`detach`](Self::detach)
/// was called first.
#[non_exhaustive]
pub struct Job {
    // Pipe fields come before `processes` so they drop first: closing them
    // lets children see EOF and exit before `Process::drop` waits on them.
    /// Write end of the first process's stdin pipe, if stdin was `Pipe`.
    pub stdin: Option<File>,
    /// Read end of the last process's stdout pipe, if stdout was `Pipe`.
    pub stdout: Option<File>,
    /// Read end of each command's stderr pipe that ended up `Pipe`d, tagged
    /// with that command's 0-based position in the pipeline.
    pub stderr: Vec<(usize, File)>,
    pub(crate) stdin_data: InputData,
    pub(crate) stdout_sink: Option<Sink>,
    pub(crate) stderr_sinks: Vec<(usize, Sink)>,
    pub(crate) check_success: bool,
    /// Started processes, in pipeline order.
    pub processes: Vec<Process>,
    /// The argv each entry of `processes` was spawned with, same order, used
    /// to build [`ProcessFailure`] diagnostics.
    pub(crate) argvs: Vec<Vec<OsString>>,
}

impl Job {
    /// Creates a [`Communicator`] from the pipe ends.
    ///
    /// The communicator takes ownership of `stdin`, `stdout`, and `stderr`,
    /// leaving them empty. Only streams that were redirected to a pipe are
    /// available to the communicator.
    pub fn communicate(&mut self) -> Communicator {
        Communicator::new(
            self.stdin.take(),
            self.stdout.take(),
            std::mem::take(&mut self.stderr),
            std::mem::take(&mut self.stdin_data),
            self.stdout_sink.take(),
            std::mem::take(&mut self.stderr_sinks),
        )
    }

    /// Terminates all processes in the pipeline (`SIGTERM` on Unix,
    /// `TerminateProcess` on Windows). Already-reaped processes are silently
    /// skipped.
    pub fn terminate(&self) -> io::Result<()> {
        for p in &self.processes {
            p.terminate()?;
        }
        Ok(())
    }

    /// Waits for all processes to finish and returns the last process's exit
    /// status. If no processes were started (empty pipeline), returns a
    /// successful exit status.
    ///
    /// Unlike [`join`](Self::join), this does not consume `self`, does not
    /// close the pipe ends, and ignores `check_success`.
    pub fn wait(&self) -> io::Result<ExitStatus> {
        let mut status = ExitStatus::from_raw(0);
        for p in &self.processes {
            status = p.wait()?;
        }
        Ok(status)
    }

    fn wait_all(&self) -> io::Result<Vec<ExitStatus>> {
        self.processes.iter().map(|p| p.wait()).collect()
    }

    fn check(&self, statuses: &[ExitStatus]) -> Result<()> {
        if !self.check_success {
            return Ok(());
        }
        let failures: Vec<ProcessFailure> = self
            .processes
            .iter()
            .zip(self.argvs.iter())
            .zip(statuses.iter())
            .filter(|((_, _), status)| !status.success())
            .map(|((process, argv), status)| ProcessFailure {
                argv: argv.clone(),
                pid: process.pid(),
                exit_status: *status,
            })
            .collect();
        if failures.is_empty() {
            return Ok(());
        }
        Err(PipelineError::ProcessError {
            failures,
            total: self.processes.len(),
        })
    }

    /// Returns the PID of the last process in the pipeline.
    ///
    /// # Panics
    ///
    /// Panics if no processes were started (an empty pipeline).
    pub fn pid(&self) -> u32 {
        self.processes.last().unwrap().pid()
    }

    /// Returns the PIDs of all processes in the pipeline, in pipeline order.
    pub fn pids(&self) -> Vec<u32> {
        self.processes.iter().map(|p| p.pid()).collect()
    }

    /// Kills all processes in the pipeline (`SIGKILL` on Unix,
    /// `TerminateProcess` on Windows). Already-reaped processes are silently
    /// skipped.
    pub fn kill(&self) -> io::Result<()> {
        for p in &self.processes {
            p.kill()?;
        }
        Ok(())
    }

    /// Detaches all processes in the pipeline: dropping `self` afterward will
    /// not wait for them.
    pub fn detach(&self) {
        for p in &self.processes {
            p.detach();
        }
    }

    /// Polls all processes for completion without blocking. Returns
    /// `Some(exit_status)` of the last process once all have finished, or
    /// `None` if any is still running. An empty pipeline returns a
    /// successful exit status immediately.
    pub fn poll(&self) -> Option<ExitStatus> {
        let mut status = Some(ExitStatus::from_raw(0));
        for p in &self.processes {
            status = Some(p.poll()?);
        }
        status
    }

    /// Like [`wait`](Self::wait), but with a timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> io::Result<Option<ExitStatus>> {
        let deadline = Instant::now() + timeout;
        let mut status = ExitStatus::from_raw(0);
        for p in &self.processes {
            match p.wait_timeout(deadline.saturating_duration_since(Instant::now()))? {
                Some(s) => status = s,
                None => return Ok(None),
            }
        }
        Ok(Some(status))
    }

    /// Closes the pipe ends, waits for all processes to finish, and returns
    /// the last process's exit status. If any command was built with
    /// [`checked`](crate::Command::checked) and exited non-zero, returns
    /// [`PipelineError::ProcessError`] instead.
    pub fn join(mut self) -> Result<ExitStatus> {
        self.communicate().read()?;
        let statuses = self.wait_all()?;
        self.check(&statuses)?;
        Ok(statuses.into_iter().next_back().unwrap_or(ExitStatus::from_raw(0)))
    }

    /// Like [`join`](Self::join), but returns
    /// [`PipelineError::Io`]-wrapped [`io::ErrorKind::TimedOut`] if the
    /// processes don't finish within `timeout`.
    pub fn join_timeout(mut self, timeout: Duration) -> Result<ExitStatus> {
        let deadline = Instant::now() + timeout;
        self.communicate().limit_time(timeout).read()?;
        let remaining = deadline.saturating_duration_since(Instant::now());
        let mut statuses = Vec::with_capacity(self.processes.len());
        for p in &self.processes {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match p.wait_timeout(remaining)? {
                Some(s) => statuses.push(s),
                None => return Err(io::Error::from(io::ErrorKind::TimedOut).into()),
            }
        }
        let _ = remaining;
        self.check(&statuses)?;
        Ok(statuses.into_iter().next_back().unwrap_or(ExitStatus::from_raw(0)))
    }

    /// Captures the output and waits for the process(es) to finish. Streams
    /// not redirected to a pipe contribute no bytes.
    pub fn capture(mut self) -> Result<Capture> {
        let mut comm = self.communicate();
        let (stdout, stderr) = comm.read()?;
        let statuses = self.wait_all()?;
        self.check(&statuses)?;
        Ok(Capture {
            stdout,
            stderr,
            exit_status: statuses.into_iter().next_back().unwrap_or(ExitStatus::from_raw(0)),
        })
    }

    /// Like [`capture`](Self::capture), but with a timeout.
    pub fn capture_timeout(mut self, timeout: Duration) -> Result<Capture> {
        let deadline = Instant::now() + timeout;
        let mut comm = self.communicate().limit_time(timeout);
        let (stdout, stderr) = comm.read()?;
        let mut statuses = Vec::with_capacity(self.processes.len());
        for p in &self.processes {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match p.wait_timeout(remaining)? {
                Some(s) => statuses.push(s),
                None => return Err(io::Error::from(io::ErrorKind::TimedOut).into()),
            }
        }
        self.check(&statuses)?;
        Ok(Capture {
            stdout,
            stderr,
            exit_status: statuses.into_iter().next_back().unwrap_or(ExitStatus::from_raw(0)),
        })
    }

    /// Streams `(channel, chunk)` pairs as they arrive from stdout and every
    /// piped stderr, without waiting for the process(es) to finish first.
    /// The iterator is exhausted once every piped stream hits EOF; the final
    /// item is an [`PipelineError::ProcessError`] if `checked` was set and a
    /// process failed, otherwise iteration simply ends.
    pub fn iterate_raw(self) -> RawIter {
        let check_success = self.check_success;
        let processes = self.processes;
        let argvs = self.argvs;
        let stream = Communicator::new(
            self.stdin,
            self.stdout,
            self.stderr,
            self.stdin_data,
            self.stdout_sink,
            self.stderr_sinks,
        )
        .stream();
        RawIter {
            stream,
            processes,
            argvs,
            check_success,
            finished: false,
        }
    }

    /// Like [`iterate_raw`](Self::iterate_raw), but splits each channel's
    /// bytes into complete UTF-8 lines, buffering incomplete trailing
    /// fragments across chunks. Invalid UTF-8 is replaced per
    /// [`String::from_utf8_lossy`].
    pub fn iterate(self) -> Iter {
        Iter {
            raw: self.iterate_raw(),
            bufs: std::collections::HashMap::new(),
            pending: std::collections::VecDeque::new(),
        }
    }
}

/// Output captured by [`Job::capture`].
#[derive(Debug, Clone)]
pub struct Capture {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_status: ExitStatus,
}

impl Capture {
    pub fn success(&self) -> bool {
        self.exit_status.success()
    }

    /// `stdout` decoded as UTF-8, replacing invalid sequences.
    pub fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// `stderr` decoded as UTF-8, replacing invalid sequences.
    pub fn stderr_str(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// Iterator returned by [`Job::iterate_raw`].
pub struct RawIter {
    stream: crate::communicate::ChunkStream,
    processes: Vec<Process>,
    argvs: Vec<Vec<OsString>>,
    check_success: bool,
    finished: bool,
}

impl RawIter {
    fn finish(&mut self) -> Option<Result<(Channel, Vec<u8>)>> {
        if self.finished {
            return None;
        }
        self.finished = true;
        if !self.check_success {
            return None;
        }
        let statuses: io::Result<Vec<ExitStatus>> =
            self.processes.iter().map(|p| p.wait()).collect();
        let statuses = match statuses {
            Ok(s) => s,
            Err(e) => return Some(Err(e.into())),
        };
        let failures: Vec<ProcessFailure> = self
            .processes
            .iter()
            .zip(self.argvs.iter())
            .zip(statuses.iter())
            .filter(|((_, _), status)| !status.success())
            .map(|((process, argv), status)| ProcessFailure {
                argv: argv.clone(),
                pid: process.pid(),
                exit_status: *status,
            })
            .collect();
        if failures.is_empty() {
            return None;
        }
        Some(Err(PipelineError::ProcessError {
            failures,
            total: self.processes.len(),
        }))
    }
}

impl Iterator for RawIter {
    type Item = Result<(Channel, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.stream.next() {
            Some(Ok(item)) => Some(Ok(item)),
            Some(Err(e)) => Some(Err(e.into())),
            None => self.finish(),
        }
    }
}

/// Iterator returned by [`Job::iterate`]: complete UTF-8 lines, tagged with
/// the channel they came from.
pub struct Iter {
    raw: RawIter,
    bufs: std::collections::HashMap<Channel, Vec<u8>>,
    pending: std::collections::VecDeque<Result<(Channel, String)>>,
}

impl Iter {
    fn drain_lines(&mut self, channel: Channel, chunk: &[u8]) {
        let buf = self.bufs.entry(channel).or_default();
        buf.extend_from_slice(chunk);
        loop {
            let buf = self.bufs.get_mut(&channel).unwrap();
            let Some(pos) = buf.iter().position(|&b| b == b'\n') else {
                break;
            };
            let line: Vec<u8> = buf.drain(..=pos).collect();
            let line = &line[..line.len() - 1];
            let line = String::from_utf8_lossy(line).into_owned();
            self.pending.push_back(Ok((channel, line)));
        }
    }

    fn flush_remainder(&mut self, channel: Channel) {
        let buf = self.bufs.get_mut(&channel).unwrap();
        if !buf.is_empty() {
            let line = String::from_utf8_lossy(buf).into_owned();
            buf.clear();
            self.pending.push_back(Ok((channel, line)));
        }
    }
}

impl Iterator for Iter {
    type Item = Result<(Channel, String)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.pending.pop_front() {
                return Some(item);
            }
            match self.raw.next() {
                Some(Ok((channel, chunk))) => self.drain_lines(channel, &chunk),
                Some(Err(e)) => return Some(Err(e)),
                None => {
                    let channels: Vec<Channel> = self.bufs.keys().copied().collect();
                    for channel in channels {
                        self.flush_remainder(channel);
                    }
                    if self.pending.is_empty() {
                        return None;
                    }
                }
            }
        }
    }
}

#[derive(Debug)]
pub(crate) struct ReadAdapter(pub(crate) Job);

impl Read for ReadAdapter {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.stdout.as_mut().unwrap().read(buf)
    }
}

#[derive(Debug)]
pub(crate) struct WriteAdapter(pub(crate) Job);

impl Write for WriteAdapter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.stdin.as_mut().unwrap().write(buf)
    }
    fn flush(&mut self) -> io::Result<()> {
        self.0.stdin.as_mut().unwrap().flush()
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("stdin", &self.stdin.is_some())
            .field("stdout", &self.stdout.is_some())
            .field("stderr", &self.stderr.len())
            .field("check_success", &self.check_success)
            .field("pids", &self.pids())
            .finish()
    }
}
