//! [`Pipeline`]: a sequence of [`Command`]s connected stdout-to-stdin.

use std::ffi::OsString;
use std::fmt;
use std::fs::File;
use std::io::{self, Write};
use std::ops::BitOr;
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::command::Command;
use crate::communicate::{InputData, Sink};
use crate::error::{PipelineError, Result};
use crate::job::{Capture, Job};
use crate::process::Process;
use crate::redirect::{IntoOutput, IntoStdin, OutputTarget, Redirection, StdinTarget};

/// Classifies an output redirect target the same way [`Command::apply_output`]
/// does, without tying the result to a particular command's stdout/stderr
/// field.
fn resolve_output<T: IntoOutput>(target: T) -> Result<(Redirection, Option<Sink>)> {
    match target.into_output_target() {
        OutputTarget::Low(r) => Ok((r, None)),
        OutputTarget::File(f) => Ok((Redirection::File(Arc::new(f)), None)),
        OutputTarget::Path(p) => {
            let file = std::fs::OpenOptions::new()
                .write(true)
                .create(true)
                .append(p.append)
                .truncate(!p.append)
                .open(&p.path)?;
            Ok((Redirection::File(Arc::new(file)), None))
        }
        OutputTarget::Writer(w) => Ok((Redirection::Pipe, Some(w))),
    }
}

/// Lets one caller-supplied sink be shared across several commands' stderr
/// drains, since [`Sink`] itself isn't `Clone`.
struct SharedSink(Arc<Mutex<Sink>>);

impl Write for SharedSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.lock().unwrap().flush()
    }
}

/// A builder for pipelines of [`Command`]s connected via pipes.
///
/// A pipeline is a sequence of zero or more commands, each receiving its
/// standard input from the previous command's standard output, the same way
/// a shell pipeline does. The standard input of the first command and the
/// standard output of the last can optionally be redirected from outside the
/// pipeline; every command's stderr can be redirected together via
/// [`stderr_all`](Self::stderr_all).
///
/// Most pipelines are built with the `|` operator on two [`Command`]s, which
/// produces a `Pipeline`; [`pipe`](Self::pipe) is the builder-style
/// equivalent for assembling one command at a time.
#[must_use]
pub struct Pipeline {
    commands: Vec<Command>,
    stdin: Arc<Redirection>,
    stdin_data: InputData,
    stdout: Arc<Redirection>,
    stdout_sink: Option<Sink>,
    stderr_all: Arc<Redirection>,
    stderr_all_sink: Option<Sink>,
    check_success: bool,
    detached: bool,
    cwd: Option<OsString>,
    #[cfg(unix)]
    setpgid: bool,
}

impl Default for Pipeline {
    fn default() -> Pipeline {
        Pipeline::new()
    }
}

impl Pipeline {
    /// Creates a new, empty pipeline.
    ///
    /// An empty pipeline's [`join`](Self::join) returns success immediately
    /// and [`capture`](Self::capture) returns empty output. A one-command
    /// pipeline behaves like that command run on its own.
    pub fn new() -> Pipeline {
        Pipeline {
            commands: Vec::new(),
            stdin: Arc::new(Redirection::None),
            stdin_data: InputData::None,
            stdout: Arc::new(Redirection::None),
            stdout_sink: None,
            stderr_all: Arc::new(Redirection::None),
            stderr_all_sink: None,
            check_success: false,
            detached: false,
            cwd: None,
            #[cfg(unix)]
            setpgid: false,
        }
    }

    /// Appends a command to the pipeline. Builder-style equivalent of `|`.
    pub fn pipe(mut self, cmd: Command) -> Pipeline {
        self.commands.push(cmd);
        self
    }

    /// Redirects the standard input of the first command. Returns an error
    /// if the first command already has its stdin redirected.
    pub fn stdin<T: IntoStdin>(mut self, target: T) -> Result<Pipeline> {
        if let Some(first) = self.commands.first() {
            if first.stdin_is_set() {
                return Err(PipelineError::AlreadyRedirected { channel: "stdin" });
            }
        }
        match target.into_stdin_target() {
            StdinTarget::Low(r) => self.stdin = Arc::new(r),
            StdinTarget::File(f) => self.stdin = Arc::new(Redirection::File(Arc::new(f))),
            StdinTarget::Path(p) => {
                let file = std::fs::File::open(&p.path)?;
                self.stdin = Arc::new(Redirection::File(Arc::new(file)));
            }
            StdinTarget::Bytes(b) => {
                self.stdin = Arc::new(Redirection::Pipe);
                self.stdin_data = InputData::bytes(b);
            }
            StdinTarget::Reader(r) => {
                self.stdin = Arc::new(Redirection::Pipe);
                self.stdin_data = InputData::Reader(r);
            }
        }
        Ok(self)
    }

    /// Redirects the standard output of the last command. Returns an error
    /// if the last command already has its stdout redirected.
    pub fn stdout<T: IntoOutput>(mut self, target: T) -> Result<Pipeline> {
        if let Some(last) = self.commands.last() {
            if last.stdout_is_set() {
                return Err(PipelineError::AlreadyRedirected { channel: "stdout" });
            }
        }
        let (redir, sink) = resolve_output(target)?;
        self.stdout = Arc::new(redir);
        self.stdout_sink = sink;
        Ok(self)
    }

    /// Redirects the standard error of every command in the pipeline.
    ///
    /// Unlike [`stdout`](Self::stdout), which only affects the last command,
    /// this affects all of them: stdout is piped from one command to the
    /// next, so only the last command's stdout is "free", but each
    /// command's stderr is independent and can be configured en masse. This
    /// differs from a shell's `cmd1 | cmd2 2>file`, which redirects only the
    /// last command's stderr; it is equivalent to `(cmd1 | cmd2) 2>file`,
    /// without the overhead of a subshell.
    ///
    /// If given `Redirection::Pipe`, every affected command gets its own
    /// independent pipe; the read ends land in [`Job::stderr`], tagged with
    /// each command's position in the pipeline. If given a writer, every
    /// affected command's stderr is written through to it (interleaved
    /// across commands in whatever order bytes arrive).
    pub fn stderr_all<T: IntoOutput>(mut self, target: T) -> Result<Pipeline> {
        let (redir, sink) = resolve_output(target)?;
        self.stderr_all = Arc::new(redir);
        self.stderr_all_sink = sink;
        Ok(self)
    }

    /// If set, [`join`](Self::join) and [`capture`](Self::capture) raise
    /// [`PipelineError::ProcessError`] if any command in the pipeline exits
    /// non-zero. Commands built with [`Command::checked`] contribute to this
    /// regardless of whether the pipeline itself was marked checked.
    pub fn checked(mut self) -> Pipeline {
        self.check_success = true;
        self
    }

    /// Sets the working directory for every command in the pipeline,
    /// overriding any directory set on the individual commands.
    pub fn cwd<P: AsRef<Path>>(mut self, dir: P) -> Pipeline {
        self.cwd = Some(dir.as_ref().as_os_str().to_owned());
        self
    }

    /// Starts the pipeline detached: dropping the resulting [`Job`] will not
    /// wait for any of its processes.
    pub fn detached(mut self) -> Pipeline {
        self.detached = true;
        self
    }

    /// Puts every process in the pipeline into a single new process group,
    /// whose PGID equals the first process's PID.
    #[cfg(unix)]
    pub fn set_setpgid(mut self, value: bool) -> Pipeline {
        self.setpgid = value;
        self
    }

    fn stdout_is_set(&self) -> bool {
        !matches!(*self.stdout, Redirection::None)
    }

    fn validate_positions(&self) -> Result<()> {
        let last = self.commands.len().saturating_sub(1);
        for (idx, cmd) in self.commands.iter().enumerate() {
            if idx != 0 && cmd.stdin_is_set() {
                return Err(PipelineError::InvalidPipeline(format!(
                    "command {idx} in the pipeline has stdin redirected; \
                     only the first command's stdin may be set"
                )));
            }
            if idx != last && cmd.stdout_is_set() {
                return Err(PipelineError::InvalidPipeline(format!(
                    "command {idx} in the pipeline has stdout redirected; \
                     only the last command's stdout may be set"
                )));
            }
        }
        Ok(())
    }

    /// Fans the chosen stderr redirection out to every command that does
    /// not already redirect its own stderr.
    ///
    /// If the redirection is `Pipe`, each eligible command keeps its own
    /// marker and gets its own independently-created pipe when it spawns
    /// (see [`crate::spawn`]'s per-command pipe creation) -- siblings never
    /// share one pipe, so their writes can't interleave mid-write the way
    /// they would through a single shared fd. If a sink was given, it is
    /// wrapped so every affected command's independent stderr reader can
    /// write through to the same sink.
    fn apply_stderr_all(&mut self) {
        if matches!(*self.stderr_all, Redirection::None) {
            return;
        }
        let shared_sink = self.stderr_all_sink.take().map(|sink| Arc::new(Mutex::new(sink)));
        for cmd in &mut self.commands {
            if !matches!(*cmd.stderr, Redirection::None) {
                continue;
            }
            cmd.stderr = Arc::clone(&self.stderr_all);
            if let Some(shared) = &shared_sink {
                cmd.stderr_sink = Some(Box::new(SharedSink(Arc::clone(shared))));
            }
        }
    }

    // Terminators:

    /// Starts every command in the pipeline and returns a [`Job`] handle
    /// with the running processes and their pipe ends.
    ///
    /// If a command fails to start, no further commands are started; the
    /// ones already running are waited for (they will typically exit
    /// immediately once their upstream pipe closes), unless
    /// [`detached`](Self::detached) was set.
    pub fn start(mut self) -> Result<Job> {
        if self.commands.is_empty() {
            return Ok(Job {
                stdin: None,
                stdout: None,
                stderr: Vec::new(),
                stdin_data: InputData::None,
                stdout_sink: None,
                stderr_sinks: Vec::new(),
                check_success: self.check_success,
                processes: Vec::new(),
                argvs: Vec::new(),
            });
        }

        self.validate_positions()?;

        let check_success = self.check_success || self.commands.iter().any(|c| c.check_success);
        self.apply_stderr_all();

        if let Some(dir) = self.cwd.clone() {
            for cmd in &mut self.commands {
                cmd.cwd = Some(dir.clone());
            }
        }
        if self.detached {
            for cmd in &mut self.commands {
                cmd.detached = true;
            }
        }

        if !matches!(*self.stdin, Redirection::None) {
            let first = self.commands.first_mut().unwrap();
            first.stdin = Arc::clone(&self.stdin);
            first.stdin_data = std::mem::take(&mut self.stdin_data);
        }
        if !matches!(*self.stdout, Redirection::None) {
            let last = self.commands.last_mut().unwrap();
            last.stdout = Arc::clone(&self.stdout);
            last.stdout_sink = self.stdout_sink.take();
        }

        let last_idx = self.commands.len() - 1;
        let mut processes: Vec<Process> = Vec::with_capacity(self.commands.len());
        let mut argvs: Vec<Vec<OsString>> = Vec::with_capacity(self.commands.len());
        let mut job_stdin = None;
        let mut job_stdin_data = InputData::None;
        let mut job_stdout = None;
        let mut job_stdout_sink = None;
        let mut job_stderr: Vec<(usize, File)> = Vec::new();
        let mut job_stderr_sinks: Vec<(usize, Sink)> = Vec::new();
        let mut prev_stdout: Option<File> = None;
        #[cfg(unix)]
        let mut first_pid: u32 = 0;

        for (idx, mut cmd) in self.commands.into_iter().enumerate() {
            if let Some(prev) = prev_stdout.take() {
                cmd.stdin = Arc::new(Redirection::File(Arc::new(prev)));
            }
            if idx != last_idx && !cmd.stdout_is_set() {
                cmd.stdout = Arc::new(Redirection::Pipe);
            }
            #[cfg(unix)]
            if self.setpgid {
                // `spawn()` blocks (via the exec-fail pipe) until the child
                // has called setpgid and exec'd, so the first child's group
                // already exists by the time later children are forked.
                cmd.setpgid = Some(if idx == 0 { 0 } else { first_pid });
            }

            let argv = cmd.resolved_argv();
            let cmd_stdin_data = std::mem::take(&mut cmd.stdin_data);
            let cmd_stdout_sink = cmd.stdout_sink.take();
            let cmd_stderr_sink = cmd.stderr_sink.take();

            let spawn_result = match cmd.spawn() {
                Ok(r) => r,
                Err(e) => {
                    for p in &processes {
                        let _ = p.wait();
                    }
                    return Err(e.into());
                }
            };

            if idx == 0 {
                job_stdin = spawn_result.stdin;
                job_stdin_data = cmd_stdin_data;
                #[cfg(unix)]
                if self.setpgid {
                    first_pid = spawn_result.process.pid();
                }
            }
            if idx == last_idx {
                job_stdout = spawn_result.stdout;
                job_stdout_sink = cmd_stdout_sink;
            } else {
                prev_stdout = spawn_result.stdout;
            }
            if let Some(file) = spawn_result.stderr {
                job_stderr.push((idx, file));
            }
            if let Some(sink) = cmd_stderr_sink {
                job_stderr_sinks.push((idx, sink));
            }

            argvs.push(argv);
            processes.push(spawn_result.process);
        }

        Ok(Job {
            stdin: job_stdin,
            stdout: job_stdout,
            stderr: job_stderr,
            stdin_data: job_stdin_data,
            stdout_sink: job_stdout_sink,
            stderr_sinks: job_stderr_sinks,
            check_success,
            processes,
            argvs,
        })
    }

    /// Starts the pipeline, waits for it to finish, and returns the last
    /// command's exit status.
    pub fn join(self) -> Result<crate::process::ExitStatus> {
        self.start()?.join()
    }

    /// Starts the pipeline and collects its output. Unless already
    /// configured, the last command's stdout and every command's stderr are
    /// redirected to pipes so they can be captured.
    pub fn capture(mut self) -> Result<Capture> {
        if !self.stdout_is_set() {
            self = self.stdout(Redirection::Pipe)?;
        }
        if matches!(*self.stderr_all, Redirection::None) {
            self = self.stderr_all(Redirection::Pipe)?;
        }
        self.start()?.capture()
    }

    /// Starts the pipeline and returns a [`Communicator`](crate::communicate::Communicator).
    /// Unless already configured, the last command's stdout and every
    /// command's stderr are redirected to pipes. Unlike
    /// [`capture`](Self::capture), this does not wait for the pipeline to
    /// finish.
    pub fn communicate(mut self) -> Result<crate::communicate::Communicator> {
        self = self.detached();
        if !self.stdout_is_set() {
            self = self.stdout(Redirection::Pipe)?;
        }
        if matches!(*self.stderr_all, Redirection::None) {
            self = self.stderr_all(Redirection::Pipe)?;
        }
        Ok(self.start()?.communicate())
    }
}

impl BitOr<Command> for Pipeline {
    type Output = Pipeline;

    fn bitor(self, rhs: Command) -> Pipeline {
        self.pipe(rhs)
    }
}

impl BitOr for Pipeline {
    type Output = Pipeline;

    /// Appends the commands from `rhs` to this pipeline. Pipeline-level
    /// settings (cwd, stdout, ...) on `rhs` are dropped; only its commands
    /// are taken.
    fn bitor(mut self, rhs: Pipeline) -> Pipeline {
        for cmd in rhs.commands {
            self = self.pipe(cmd);
        }
        self
    }
}

impl FromIterator<Command> for Pipeline {
    /// Builds a pipeline from an iterator of commands. An empty iterator
    /// produces an empty pipeline (see [`new`](Pipeline::new)).
    fn from_iter<I: IntoIterator<Item = Command>>(iter: I) -> Self {
        let mut p = Pipeline::new();
        for cmd in iter {
            p = p.pipe(cmd);
        }
        p
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.commands.iter().map(|c| format!("{c:?}")).collect();
        write!(f, "Pipeline {{ {} }}", parts.join(" | "))
    }
}
