//! [`Command`]: an immutable description of one process to spawn.

use std::ffi::{OsStr, OsString};
use std::fmt;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

use crate::communicate::InputData;
use crate::error::{PipelineError, Result};
use crate::pipeline::Pipeline;
use crate::redirect::{IntoOutput, IntoStdin, OutputTarget, Redirection, StdinTarget};
use crate::spawn::{self, PreexecHook};

/// An immutable description of a single process: argv plus the redirect,
/// environment, working-directory, and spawn-time options recognized by
/// this crate.
///
/// Every builder method returns a new `Command`; nothing is mutated in
/// place, so chaining never affects an already-built value. Because a
/// command can carry an in-process reader or sink, `Command` is not `Clone`
/// (a `Box<dyn Read>`/`Box<dyn Write>` isn't either); build each one fresh.
pub struct Command {
    pub(crate) argv: Vec<OsString>,
    pub(crate) executable: Option<OsString>,
    pub(crate) stdin: Arc<Redirection>,
    pub(crate) stdout: Arc<Redirection>,
    pub(crate) stderr: Arc<Redirection>,
    pub(crate) stdin_data: InputData,
    pub(crate) stdout_sink: Option<Box<dyn Write + Send>>,
    pub(crate) stderr_sink: Option<Box<dyn Write + Send>>,
    pub(crate) env: Option<Vec<(OsString, Option<OsString>)>>,
    pub(crate) cwd: Option<OsString>,
    pub(crate) check_success: bool,
    pub(crate) merge_env: bool,
    pub(crate) glob: bool,
    pub(crate) detached: bool,
    pub(crate) preexec_hook: Option<PreexecHook>,
    #[cfg(unix)]
    pub(crate) setpgid: Option<u32>,
    #[cfg(windows)]
    pub(crate) creation_flags: u32,
}

impl Command {
    /// Builds a command whose first argv token is `name` (looked up on
    /// `PATH` unless it contains a path separator).
    pub fn new<S: AsRef<OsStr>>(name: S) -> Command {
        Command {
            argv: vec![name.as_ref().to_owned()],
            executable: None,
            stdin: Arc::new(Redirection::None),
            stdout: Arc::new(Redirection::None),
            stderr: Arc::new(Redirection::None),
            stdin_data: InputData::None,
            stdout_sink: None,
            stderr_sink: None,
            env: None,
            cwd: None,
            check_success: false,
            merge_env: true,
            glob: false,
            detached: false,
            preexec_hook: None,
            #[cfg(unix)]
            setpgid: None,
            #[cfg(windows)]
            creation_flags: 0,
        }
    }

    /// Appends one argument.
    pub fn arg<S: AsRef<OsStr>>(mut self, arg: S) -> Command {
        self.argv.push(arg.as_ref().to_owned());
        self
    }

    /// Appends several arguments.
    pub fn args<I, S>(mut self, args: I) -> Command
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.argv.extend(args.into_iter().map(|a| a.as_ref().to_owned()));
        self
    }

    /// Overrides the executable to run, leaving `argv[0]` (the name the
    /// child sees itself invoked as) untouched.
    pub fn executable<S: AsRef<OsStr>>(mut self, executable: S) -> Command {
        self.executable = Some(executable.as_ref().to_owned());
        self
    }

    /// Redirects stdin. Returns an error if stdin was already redirected.
    pub fn stdin<T: IntoStdin>(self, target: T) -> Result<Command> {
        if !matches!(*self.stdin, Redirection::None) {
            return Err(PipelineError::AlreadyRedirected { channel: "stdin" });
        }
        self.apply_stdin_target(target.into_stdin_target())
    }

    pub(crate) fn apply_stdin_target(mut self, target: StdinTarget) -> Result<Command> {
        match target {
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

    /// Redirects stdout. Returns an error if stdout was already redirected.
    pub fn stdout<T: IntoOutput>(self, target: T) -> Result<Command> {
        if !matches!(*self.stdout, Redirection::None) {
            return Err(PipelineError::AlreadyRedirected { channel: "stdout" });
        }
        self.apply_output(target, Channel::Stdout)
    }

    /// Redirects stderr. Returns an error if stderr was already redirected.
    pub fn stderr<T: IntoOutput>(self, target: T) -> Result<Command> {
        if !matches!(*self.stderr, Redirection::None) {
            return Err(PipelineError::AlreadyRedirected { channel: "stderr" });
        }
        self.apply_output(target, Channel::Stderr)
    }

    pub(crate) fn apply_output<T: IntoOutput>(mut self, target: T, channel: Channel) -> Result<Command> {
        let redir = match target.into_output_target() {
            OutputTarget::Low(r) => r,
            OutputTarget::File(f) => Redirection::File(Arc::new(f)),
            OutputTarget::Path(p) => {
                let file = std::fs::OpenOptions::new()
                    .write(true)
                    .create(true)
                    .append(p.append)
                    .truncate(!p.append)
                    .open(&p.path)?;
                Redirection::File(Arc::new(file))
            }
            OutputTarget::Writer(w) => {
                match channel {
                    Channel::Stdout => self.stdout_sink = Some(w),
                    Channel::Stderr => self.stderr_sink = Some(w),
                }
                Redirection::Pipe
            }
        };
        match channel {
            Channel::Stdout => self.stdout = Arc::new(redir),
            Channel::Stderr => self.stderr = Arc::new(redir),
        }
        Ok(self)
    }

    /// Overlays environment variables onto whatever environment the command
    /// would otherwise run with. A later call for the same key wins.
    pub fn env<K, V>(mut self, key: K, value: V) -> Command
    where
        K: AsRef<OsStr>,
        V: AsRef<OsStr>,
    {
        self.env
            .get_or_insert_with(Vec::new)
            .push((key.as_ref().to_owned(), Some(value.as_ref().to_owned())));
        self
    }

    /// Merges several environment overrides at once.
    pub fn env_extend<I, K, V>(mut self, vars: I) -> Command
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<OsStr>,
        V: AsRef<OsStr>,
    {
        let entry = self.env.get_or_insert_with(Vec::new);
        entry.extend(
            vars.into_iter()
                .map(|(k, v)| (k.as_ref().to_owned(), Some(v.as_ref().to_owned()))),
        );
        self
    }

    /// Removes a variable from the effective environment, overriding both
    /// earlier overrides for the same key and (when `merge_env` is in
    /// effect) the inherited process environment.
    pub fn env_remove<K: AsRef<OsStr>>(mut self, key: K) -> Command {
        self.env
            .get_or_insert_with(Vec::new)
            .push((key.as_ref().to_owned(), None));
        self
    }

    /// Controls whether the process environment is merged underneath the
    /// per-command overrides. Defaults to `true`.
    pub fn merge_env(mut self, merge: bool) -> Command {
        self.merge_env = merge;
        self
    }

    /// Sets the working directory the child is spawned in. A relative path
    /// is interpreted relative to the calling process's own working
    /// directory, unless resolved to an absolute path beforehand (as
    /// [`crate::Shell::command`] does against its directory stack).
    pub fn cwd<P: AsRef<Path>>(mut self, dir: P) -> Command {
        self.cwd = Some(dir.as_ref().as_os_str().to_owned());
        self
    }

    /// Enables filename-glob expansion of argv tokens at spawn time.
    pub fn glob(mut self, enabled: bool) -> Command {
        self.glob = enabled;
        self
    }

    /// If set, running this command (alone, or as part of a pipeline) and
    /// seeing a nonzero exit code raises a `ProcessError` instead of
    /// silently returning the exit code.
    pub fn checked(mut self) -> Command {
        self.check_success = true;
        self
    }

    /// Starts the command detached: dropping the resulting handle will not
    /// wait for it to finish.
    pub fn detached(mut self) -> Command {
        self.detached = true;
        self
    }

    /// Registers a hook run in the child process, after stream redirection
    /// and before `exec`. Only async-signal-safe operations are sound here:
    /// the hook runs after `fork` with a single thread and no allocator
    /// invariants restored. No-op on Windows, which has no equivalent fork
    /// point.
    pub fn preexec_hook<F>(mut self, hook: F) -> Command
    where
        F: Fn() -> io::Result<()> + Send + Sync + 'static,
    {
        self.preexec_hook = Some(Arc::new(hook));
        self
    }

    pub(crate) fn stdin_is_set(&self) -> bool {
        !matches!(*self.stdin, Redirection::None)
    }

    pub(crate) fn stdout_is_set(&self) -> bool {
        !matches!(*self.stdout, Redirection::None)
    }

    #[cfg(unix)]
    pub(crate) fn setpgid_is_set(&self) -> bool {
        self.setpgid.is_some()
    }

    #[cfg(unix)]
    pub(crate) fn set_pgid_value(&mut self, pgid: u32) {
        self.setpgid = Some(pgid);
    }

    /// Expands glob metacharacters in argv (if [`glob`](Self::glob) was
    /// enabled), resolved against `self.cwd`. The program name (`argv[0]`)
    /// and any token beginning with `-` are never expanded.
    pub(crate) fn resolved_argv(&self) -> Vec<OsString> {
        if !self.glob {
            return self.argv.clone();
        }
        let cwd = self.cwd.as_ref().map(Path::new);
        let mut out = Vec::with_capacity(self.argv.len());
        for (i, tok) in self.argv.iter().enumerate() {
            if i == 0 {
                out.push(tok.clone());
            } else {
                out.extend(crate::globbing::expand_token(tok, cwd));
            }
        }
        out
    }

    pub(crate) fn os_options(&self) -> spawn::os::OsOptions {
        spawn::os::OsOptions {
            preexec_hook: self.preexec_hook.clone(),
            #[cfg(unix)]
            setpgid: self.setpgid,
            #[cfg(windows)]
            creation_flags: self.creation_flags,
        }
    }

    /// Spawns this single command, without going through a [`Pipeline`].
    pub(crate) fn spawn(self) -> io::Result<spawn::SpawnResult> {
        let argv = self.resolved_argv();
        let os_options = self.os_options();
        spawn::spawn(
            argv,
            Arc::clone(&self.stdin),
            Arc::clone(&self.stdout),
            Arc::clone(&self.stderr),
            self.executable.clone(),
            self.env.clone(),
            self.merge_env,
            self.cwd.clone(),
            self.detached,
            os_options,
        )
    }

    /// Starts this command alone and returns a [`crate::job::Job`] handle with
    /// the running process and its pipe ends.
    pub fn start(self) -> Result<crate::job::Job> {
        Pipeline::new().pipe(self).start()
    }

    /// Starts the command, waits for it to finish, and returns its exit
    /// status. If [`checked`](Self::checked) was set and the process exited
    /// non-zero, returns [`PipelineError::ProcessError`].
    pub fn join(self) -> Result<crate::process::ExitStatus> {
        self.start()?.join()
    }

    /// Starts the command and collects its output. Unless already
    /// configured, stdout and stderr are redirected to pipes so they can be
    /// captured.
    pub fn capture(mut self) -> Result<crate::job::Capture> {
        if !self.stdout_is_set() {
            self = self.stdout(Redirection::Pipe)?;
        }
        if !matches!(*self.stderr, Redirection::None) {
            // already configured, leave as-is
        } else {
            self = self.stderr(Redirection::Pipe)?;
        }
        self.start()?.capture()
    }

    /// Starts the command and returns a [`Communicator`](crate::communicate::Communicator).
    /// Unless already configured, stdout and stderr are redirected to pipes.
    /// Unlike [`capture`](Self::capture), this does not wait for the process
    /// to finish.
    pub fn communicate(mut self) -> Result<crate::communicate::Communicator> {
        self = self.detached();
        if !self.stdout_is_set() {
            self = self.stdout(Redirection::Pipe)?;
        }
        if !matches!(*self.stderr, Redirection::None) {
            // already configured, leave as-is
        } else {
            self = self.stderr(Redirection::Pipe)?;
        }
        Ok(self.start()?.communicate())
    }
}

#[derive(Clone, Copy)]
pub(crate) enum Channel {
    Stdout,
    Stderr,
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, a) in self.argv.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{}", shell_quote(a))?;
        }
        Ok(())
    }
}

fn shell_quote(arg: &OsStr) -> String {
    let s = arg.to_string_lossy();
    if !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || "-_./:=,".contains(c)) {
        s.into_owned()
    } else {
        format!("'{}'", s.replace('\'', r"'\''"))
    }
}

impl std::ops::BitOr for Command {
    type Output = Pipeline;
    fn bitor(self, rhs: Command) -> Pipeline {
        Pipeline::new().pipe(self).pipe(rhs)
    }
}
