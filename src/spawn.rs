//! Platform-specific process creation: wires up redirect targets into real
//! OS pipes/files and starts the child.

use std::ffi::OsString;
use std::fs::File;
use std::io;
use std::sync::Arc;

use crate::process::Process;
use crate::redirect::Redirection;

pub(crate) type PreexecHook = Arc<dyn Fn() -> io::Result<()> + Send + Sync>;

/// Which of the three standard streams a redirect target refers to, used to
/// fetch "inherit the parent's own stream" handles on Windows.
#[allow(dead_code)]
#[derive(Debug, Clone, Copy)]
pub(crate) enum StandardStream {
    Input,
    Output,
    Error,
}

pub(crate) struct SpawnResult {
    pub process: Process,
    pub stdin: Option<File>,
    pub stdout: Option<File>,
    pub stderr: Option<File>,
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn spawn(
    argv: Vec<OsString>,
    stdin: Arc<Redirection>,
    stdout: Arc<Redirection>,
    stderr: Arc<Redirection>,
    executable: Option<OsString>,
    env: Option<Vec<(OsString, Option<OsString>)>>,
    merge_env: bool,
    cwd: Option<OsString>,
    detached: bool,
    os_options: os::OsOptions,
) -> io::Result<SpawnResult> {
    if argv.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "cannot spawn a command with an empty argv",
        ));
    }
    let (parent_ends, child_ends) = setup_streams(stdin, stdout, stderr)?;
    let process = os::os_start(
        &argv,
        executable.as_deref(),
        env,
        merge_env,
        cwd.as_deref(),
        child_ends,
        detached,
        os_options,
    )?;
    Ok(SpawnResult {
        process,
        stdin: parent_ends.0,
        stdout: parent_ends.1,
        stderr: parent_ends.2,
    })
}

/// Prepares one channel: returns the parent-side handle to keep (if any) and
/// the possibly-rewritten `Redirection` the child should see.
fn prepare_child_stream(
    redir: &Arc<Redirection>,
    is_input: bool,
) -> io::Result<(Option<File>, Redirection)> {
    match redir.as_ref() {
        Redirection::None => Ok((None, Redirection::None)),
        Redirection::Null => Ok((None, Redirection::Null)),
        Redirection::Pipe => {
            let (parent_end, child_end) = prepare_pipe(is_input)?;
            Ok((Some(parent_end), Redirection::File(Arc::new(child_end))))
        }
        Redirection::File(_) => {
            // Share the already-open file without an extra dup(); the
            // child's copy is this same Arc.
            Ok((None, (**redir).clone()))
        }
        Redirection::Merge => Ok((None, Redirection::Merge)),
    }
}

/// Creates a pipe. `parent_writes` is true for stdin (parent writes, child
/// reads), false for stdout/stderr (child writes, parent reads).
fn prepare_pipe(parent_writes: bool) -> io::Result<(File, File)> {
    let (read_end, write_end) = os::make_pipe()?;
    if parent_writes {
        Ok((write_end, read_end))
    } else {
        Ok((read_end, write_end))
    }
}

fn prepare_null_file(for_read: bool) -> io::Result<File> {
    os::open_null_device(for_read)
}

enum MergeKind {
    ErrToOut,
    OutToErr,
    None,
}

#[allow(clippy::type_complexity)]
fn setup_streams(
    stdin: Arc<Redirection>,
    stdout: Arc<Redirection>,
    stderr: Arc<Redirection>,
) -> io::Result<(
    (Option<File>, Option<File>, Option<File>),
    (Redirection, Redirection, Redirection),
)> {
    let stdout_is_merge = matches!(*stdout, Redirection::Merge);
    let stderr_is_merge = matches!(*stderr, Redirection::Merge);
    if matches!(*stdin, Redirection::Merge) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "stdin cannot use Redirection::Merge",
        ));
    }
    if stdout_is_merge && stderr_is_merge {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "stdout and stderr cannot both redirect to each other",
        ));
    }
    let merge = if stderr_is_merge {
        MergeKind::ErrToOut
    } else if stdout_is_merge {
        MergeKind::OutToErr
    } else {
        MergeKind::None
    };

    let (parent_in, child_in) = prepare_child_stream(&stdin, true)?;
    let (mut parent_out, mut child_out) = if stdout_is_merge {
        (None, Redirection::None)
    } else {
        prepare_child_stream(&stdout, false)?
    };
    let (mut parent_err, mut child_err) = if stderr_is_merge {
        (None, Redirection::None)
    } else {
        prepare_child_stream(&stderr, false)?
    };

    if matches!(child_out, Redirection::Null) {
        parent_out = None;
        child_out = Redirection::File(Arc::new(prepare_null_file(false)?));
    }
    if matches!(child_err, Redirection::Null) {
        parent_err = None;
        child_err = Redirection::File(Arc::new(prepare_null_file(false)?));
    }
    if matches!(child_in, Redirection::Null) {
        return Ok((
            (None, parent_out, parent_err),
            (
                Redirection::File(Arc::new(prepare_null_file(true)?)),
                child_out,
                child_err,
            ),
        ));
    }

    match merge {
        MergeKind::ErrToOut => child_err = child_out.clone(),
        MergeKind::OutToErr => child_out = child_err.clone(),
        MergeKind::None => {}
    }

    Ok((
        (parent_in, parent_out, parent_err),
        (child_in, child_out, child_err),
    ))
}

/// Builds the child's environment from overrides, either merged underneath
/// the parent's own environment (last write per key wins) or standing alone,
/// formatted as `KEY=VALUE` entries. A `None` override value removes the key
/// entirely, even if it would otherwise be inherited.
fn format_env(overrides: &[(OsString, Option<OsString>)], merge_env: bool) -> Vec<OsString> {
    use std::collections::HashMap;
    use std::os::unix::ffi::OsStrExt;

    let mut merged: HashMap<Vec<u8>, (OsString, OsString)> = HashMap::new();
    if merge_env {
        for (k, v) in std::env::vars_os() {
            merged.insert(k.as_os_str().as_bytes().to_vec(), (k, v));
        }
    }
    for (k, v) in overrides {
        let key_bytes = k.as_os_str().as_bytes().to_vec();
        match v {
            Some(v) => {
                merged.insert(key_bytes, (k.clone(), v.clone()));
            }
            None => {
                merged.remove(&key_bytes);
            }
        }
    }
    merged
        .into_values()
        .map(|(mut k, v)| {
            k.push("=");
            k.push(&v);
            k
        })
        .collect()
}

#[cfg(unix)]
pub(crate) mod os {
    use super::*;
    use crate::posix;
    use std::io::{ErrorKind, Read, Write};
    use std::os::unix::io::{AsRawFd, FromRawFd, IntoRawFd, RawFd};

    pub const NULL_DEVICE: &str = "/dev/null";

    #[derive(Default, Clone)]
    pub(crate) struct OsOptions {
        pub setpgid: Option<u32>,
        pub preexec_hook: Option<PreexecHook>,
    }

    pub fn make_pipe() -> io::Result<(File, File)> {
        posix::pipe()
    }

    pub fn open_null_device(for_read: bool) -> io::Result<File> {
        use std::fs::OpenOptions;
        OpenOptions::new()
            .read(for_read)
            .write(!for_read)
            .open(NULL_DEVICE)
    }

    fn set_inheritable(file: &File, inheritable: bool) -> io::Result<()> {
        let fd = file.as_raw_fd();
        let flags = posix::fcntl(fd, posix::F_GETFD, None)?;
        let new_flags = if inheritable {
            flags & !posix::FD_CLOEXEC
        } else {
            flags | posix::FD_CLOEXEC
        };
        posix::fcntl(fd, posix::F_SETFD, Some(new_flags))?;
        Ok(())
    }

    /// Reads a 4-byte little-endian errno from the exec-fail pipe. `None`
    /// means EOF with nothing written, i.e. `exec` succeeded.
    fn read_exact_or_eof(fd: RawFd) -> io::Result<Option<i32>> {
        let mut f = unsafe { File::from_raw_fd(fd) };
        let mut buf = [0u8; 4];
        let mut read_total = 0;
        let result = loop {
            match f.read(&mut buf[read_total..]) {
                Ok(0) => break Ok(()),
                Ok(n) => {
                    read_total += n;
                    if read_total == buf.len() {
                        break Ok(());
                    }
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => break Err(e),
            }
        };
        std::mem::forget(f); // caller owns closing `fd`
        result?;
        match read_total {
            0 => Ok(None),
            4 => Ok(Some(i32::from_le_bytes(buf))),
            _ => Err(io::Error::other("short read on exec-fail pipe")),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn os_start(
        argv: &[OsString],
        executable: Option<&std::ffi::OsStr>,
        env: Option<Vec<(OsString, Option<OsString>)>>,
        merge_env: bool,
        cwd: Option<&std::ffi::OsStr>,
        child_streams: (Redirection, Redirection, Redirection),
        detached: bool,
        os_options: OsOptions,
    ) -> io::Result<Process> {
        let cmd_to_exec: OsString = executable
            .map(|e| e.to_owned())
            .unwrap_or_else(|| argv[0].clone());
        let child_env = env
            .as_deref()
            .map(|overrides| format_env(overrides, merge_env));
        let prepared = posix::prep_exec(&cmd_to_exec, argv, child_env.as_deref())?;

        let (read_fail, write_fail) = posix::pipe()?;
        set_inheritable(&write_fail, false)?;

        let (stdin, stdout, stderr) = child_streams;
        let cwd = cwd.map(|c| c.to_owned());

        // SAFETY: between fork() and exec()/_exit() in the child, only
        // async-signal-safe operations run: no heap allocation beyond what
        // was prepared in the parent, no locks besides the raw syscalls
        // wrapped by `posix`.
        match posix::fork()? {
            None => {
                drop(read_fail);
                let exec_err =
                    run_child(stdin, stdout, stderr, cwd.as_deref(), &os_options, &prepared);
                let code = exec_err.raw_os_error().unwrap_or(-1);
                let mut f = write_fail;
                let _ = f.write_all(&code.to_le_bytes());
                posix::_exit(127);
            }
            Some(pid) => {
                drop(write_fail);
                drop(stdin);
                drop(stdout);
                drop(stderr);
                let fd = read_fail.into_raw_fd();
                let result = read_exact_or_eof(fd);
                unsafe { libc::close(fd) };
                match result? {
                    None => Ok(Process::new(pid, (), detached)),
                    Some(errno) => {
                        let _ = posix::waitpid(pid, 0);
                        Err(io::Error::from_raw_os_error(errno))
                    }
                }
            }
        }
    }

    /// Runs in the forked child. Only returns (with the exec error) on
    /// failure; success never returns because `exec` replaced the process
    /// image.
    fn run_child(
        stdin: Redirection,
        stdout: Redirection,
        stderr: Redirection,
        cwd: Option<&std::ffi::OsStr>,
        os_options: &OsOptions,
        prepared: &posix::PreparedExec,
    ) -> io::Error {
        if let Err(e) = try_run_child(stdin, stdout, stderr, cwd, os_options) {
            return e;
        }
        prepared.exec()
    }

    fn try_run_child(
        stdin: Redirection,
        stdout: Redirection,
        stderr: Redirection,
        cwd: Option<&std::ffi::OsStr>,
        os_options: &OsOptions,
    ) -> io::Result<()> {
        if let Some(cwd) = cwd {
            std::env::set_current_dir(cwd)?;
        }
        dup2_if_needed(&stdin, 0)?;
        dup2_if_needed(&stdout, 1)?;
        dup2_if_needed(&stderr, 2)?;

        posix::reset_sigpipe()?;

        if let Some(pgid) = os_options.setpgid {
            posix::setpgid(0, pgid)?;
        }
        if let Some(hook) = &os_options.preexec_hook {
            hook()?;
        }
        Ok(())
    }

    fn dup2_if_needed(redir: &Redirection, target_fd: i32) -> io::Result<()> {
        match redir {
            Redirection::None => Ok(()),
            Redirection::Merge => {
                let other = if target_fd == 1 { 2 } else { 1 };
                posix::dup2(other, target_fd)
            }
            Redirection::File(f) => posix::dup2(f.as_raw_fd(), target_fd),
            Redirection::Null | Redirection::Pipe => {
                unreachable!("Null/Pipe should have been resolved to a File before exec")
            }
        }
    }
}

#[cfg(windows)]
pub(crate) mod os {
    use super::*;
    use crate::win32;
    use std::os::windows::io::{AsRawHandle, RawHandle};

    pub const NULL_DEVICE: &str = "nul";

    #[derive(Default, Clone)]
    pub(crate) struct OsOptions {
        pub creation_flags: u32,
        pub preexec_hook: Option<PreexecHook>,
    }

    pub fn make_pipe() -> io::Result<(File, File)> {
        win32::CreateOverlappedPipe()
    }

    pub fn open_null_device(for_read: bool) -> io::Result<File> {
        use std::fs::OpenOptions;
        OpenOptions::new()
            .read(for_read)
            .write(!for_read)
            .open(NULL_DEVICE)
    }

    struct RcHandle(std::rc::Rc<File>);

    impl AsRawHandle for RcHandle {
        fn as_raw_handle(&self) -> RawHandle {
            self.0.as_raw_handle()
        }
    }

    fn ensure_child_stream(
        redir: &Redirection,
        which: StandardStream,
    ) -> io::Result<Box<dyn AsRawHandle>> {
        match redir {
            Redirection::None => Ok(Box::new(RcHandle(win32::make_standard_stream(which)?))),
            Redirection::File(f) => Ok(Box::new(f.try_clone()?)),
            Redirection::Null => {
                let for_read = matches!(which, StandardStream::Input);
                Ok(Box::new(open_null_device(for_read)?))
            }
            Redirection::Merge | Redirection::Pipe => unreachable!(
                "Merge/Pipe should have been resolved before reaching Windows os_start"
            ),
        }
    }

    /// `CreateProcess` resolves a bare command name against `PATH` itself
    /// when given no directory separator, so this is a pass-through kept
    /// for parity with the pipeline's argv[0] convention.
    fn locate_in_path(cmd: &std::ffi::OsStr) -> OsString {
        cmd.to_owned()
    }

    /// Quoting per the documented `CommandLineToArgvW` / `ArgvQuote`
    /// convention used by the Microsoft C runtime.
    fn append_quoted(cmdline: &mut String, arg: &std::ffi::OsStr) {
        let arg = arg.to_string_lossy();
        if !arg.is_empty() && !arg.contains([' ', '\t', '\n', '\x0b', '"']) {
            cmdline.push_str(&arg);
            return;
        }
        cmdline.push('"');
        let mut chars = arg.chars().peekable();
        while let Some(c) = chars.next() {
            if c == '\\' {
                let mut backslashes = 1;
                while chars.peek() == Some(&'\\') {
                    chars.next();
                    backslashes += 1;
                }
                if chars.peek() == Some(&'"') || chars.peek().is_none() {
                    cmdline.push_str(&"\\".repeat(backslashes * 2));
                } else {
                    cmdline.push_str(&"\\".repeat(backslashes));
                }
                continue;
            }
            if c == '"' {
                cmdline.push('\\');
            }
            cmdline.push(c);
        }
        cmdline.push('"');
    }

    fn assemble_cmdline(argv: &[OsString]) -> OsString {
        let mut s = String::new();
        for (i, a) in argv.iter().enumerate() {
            if i > 0 {
                s.push(' ');
            }
            append_quoted(&mut s, a);
        }
        OsString::from(s)
    }

    fn format_env_block(
        overrides: Option<Vec<(OsString, Option<OsString>)>>,
        merge_env: bool,
    ) -> Option<Vec<u16>> {
        use std::collections::HashMap;
        use std::os::windows::ffi::OsStrExt;

        let overrides = overrides?;
        let mut merged: HashMap<String, (OsString, OsString)> = HashMap::new();
        if merge_env {
            for (k, v) in std::env::vars_os() {
                merged.insert(k.to_string_lossy().to_uppercase(), (k, v));
            }
        }
        for (k, v) in overrides {
            let key = k.to_string_lossy().to_uppercase();
            match v {
                Some(v) => {
                    merged.insert(key, (k, v));
                }
                None => {
                    merged.remove(&key);
                }
            }
        }
        let mut block: Vec<u16> = Vec::new();
        for (_, (k, v)) in merged {
            block.extend(k.encode_wide());
            block.push(b'=' as u16);
            block.extend(v.encode_wide());
            block.push(0);
        }
        block.push(0);
        Some(block)
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn os_start(
        argv: &[OsString],
        executable: Option<&std::ffi::OsStr>,
        env: Option<Vec<(OsString, Option<OsString>)>>,
        merge_env: bool,
        cwd: Option<&std::ffi::OsStr>,
        child_streams: (Redirection, Redirection, Redirection),
        detached: bool,
        os_options: OsOptions,
    ) -> io::Result<Process> {
        let (stdin, stdout, stderr) = child_streams;
        let stdin_h = ensure_child_stream(&stdin, StandardStream::Input)?;
        let stdout_h = ensure_child_stream(&stdout, StandardStream::Output)?;
        let stderr_h = ensure_child_stream(&stderr, StandardStream::Error)?;

        win32::SetHandleInformation(
            stdin_h.as_raw_handle(),
            win32::HANDLE_FLAG_INHERIT,
            win32::HANDLE_FLAG_INHERIT,
        )?;
        win32::SetHandleInformation(
            stdout_h.as_raw_handle(),
            win32::HANDLE_FLAG_INHERIT,
            win32::HANDLE_FLAG_INHERIT,
        )?;
        win32::SetHandleInformation(
            stderr_h.as_raw_handle(),
            win32::HANDLE_FLAG_INHERIT,
            win32::HANDLE_FLAG_INHERIT,
        )?;

        let cmdline = assemble_cmdline(argv);
        let appname = executable.map(locate_in_path);
        let env_block = format_env_block(env, merge_env);

        let (handle, pid) = win32::CreateProcess(
            appname.as_deref(),
            &cmdline,
            &env_block,
            &cwd,
            true,
            os_options.creation_flags,
            Some(stdin_h.as_raw_handle()),
            Some(stdout_h.as_raw_handle()),
            Some(stderr_h.as_raw_handle()),
            win32::STARTF_USESTDHANDLES,
        )?;
        let _ = os_options.preexec_hook; // no fork point to run it at on Windows
        Ok(Process::new(
            pid as u32,
            crate::process::ExtProcessState(handle),
            detached,
        ))
    }
}
