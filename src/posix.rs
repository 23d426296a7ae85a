//! Thin, safe-ish wrappers around the POSIX calls the spawn and pump code
//! needs. Kept deliberately close to libc; higher layers own the policy.

use std::ffi::{CString, OsStr, OsString};
use std::fs::File;
use std::io::{Error, Result};
use std::mem;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::FromRawFd;
use std::ptr;

use crate::process::ExitStatus;

pub use libc::ECHILD;

fn check_err<T: Ord + Default>(num: T) -> Result<T> {
    if num < T::default() {
        return Err(Error::last_os_error());
    }
    Ok(num)
}

pub fn pipe() -> Result<(File, File)> {
    let mut fds = [0 as libc::c_int; 2];
    check_err(unsafe { libc::pipe(&mut fds[0]) })?;
    Ok(unsafe { (File::from_raw_fd(fds[0]), File::from_raw_fd(fds[1])) })
}

/// Forks the process. Returns `None` in the child, `Some(child_pid)` in the
/// parent. Deliberately not `unsafe fn`-documented at length here: callers
/// must still observe the usual fork-then-exec async-signal-safety rules in
/// the child until the following `exec` call.
pub fn fork() -> Result<Option<u32>> {
    let pid = check_err(unsafe { libc::fork() })?;
    if pid == 0 {
        Ok(None)
    } else {
        Ok(Some(pid as u32))
    }
}

fn os_to_cstring(s: &OsStr) -> Result<CString> {
    let bytes = s.as_bytes();
    if bytes.iter().any(|&b| b == 0) {
        return Err(Error::from_raw_os_error(libc::EINVAL));
    }
    Ok(CString::new(bytes).expect("converting Unix path to C string"))
}

/// Argv (and optionally envp) converted to C strings ahead of `fork()`, so
/// the child does no allocation before `exec`.
pub struct PreparedExec {
    cmd: CString,
    argv: Vec<CString>,
    env: Option<Vec<CString>>,
}

pub fn prep_exec<S: AsRef<OsStr>>(
    cmd: S,
    argv: &[OsString],
    env: Option<&[OsString]>,
) -> Result<PreparedExec> {
    let cmd = os_to_cstring(cmd.as_ref())?;
    let argv = argv
        .iter()
        .map(|a| os_to_cstring(a))
        .collect::<Result<Vec<_>>>()?;
    let env = env
        .map(|vars| vars.iter().map(|v| os_to_cstring(v)).collect::<Result<Vec<_>>>())
        .transpose()?;
    Ok(PreparedExec { cmd, argv, env })
}

impl PreparedExec {
    /// Execs, replacing the current process image. Only returns on failure
    /// (mirrors libc `exec*` semantics); the returned error should be
    /// reported through the exec-fail-pipe and the child should `_exit`.
    pub fn exec(&self) -> Error {
        let mut argv_ptr: Vec<*const libc::c_char> =
            self.argv.iter().map(|a| a.as_ptr()).collect();
        argv_ptr.push(ptr::null());

        match &self.env {
            Some(env) => {
                let mut envp_ptr: Vec<*const libc::c_char> =
                    env.iter().map(|e| e.as_ptr()).collect();
                envp_ptr.push(ptr::null());
                unsafe {
                    libc::execve(self.cmd.as_ptr(), argv_ptr.as_ptr(), envp_ptr.as_ptr());
                }
            }
            None => unsafe {
                libc::execvp(self.cmd.as_ptr(), argv_ptr.as_ptr());
            },
        }
        Error::last_os_error()
    }
}

pub fn _exit(status: u8) -> ! {
    unsafe { libc::_exit(status as libc::c_int) }
}

pub const WNOHANG: i32 = libc::WNOHANG;

pub fn waitpid(pid: u32, flags: i32) -> Result<(u32, ExitStatus)> {
    let mut status: libc::c_int = 0;
    let got_pid = check_err(unsafe {
        libc::waitpid(pid as libc::pid_t, &mut status as *mut libc::c_int, flags)
    })?;
    Ok((got_pid as u32, ExitStatus::from_raw(status)))
}

pub const SIGTERM: i32 = libc::SIGTERM;
pub const SIGKILL: i32 = libc::SIGKILL;

pub fn kill(pid: u32, signal: i32) -> Result<()> {
    check_err(unsafe { libc::kill(pid as libc::pid_t, signal) })?;
    Ok(())
}

/// Sends a signal to the process group led by `pid` (negative-pid `kill(2)` convention).
pub fn killpg(pgid: u32, signal: i32) -> Result<()> {
    check_err(unsafe { libc::kill(-(pgid as libc::pid_t), signal) })?;
    Ok(())
}

pub fn setpgid(pid: u32, pgid: u32) -> Result<()> {
    check_err(unsafe { libc::setpgid(pid as libc::pid_t, pgid as libc::pid_t) })?;
    Ok(())
}

pub fn setuid(uid: u32) -> Result<()> {
    check_err(unsafe { libc::setuid(uid as libc::uid_t) })?;
    Ok(())
}

pub fn setgid(gid: u32) -> Result<()> {
    check_err(unsafe { libc::setgid(gid as libc::gid_t) })?;
    Ok(())
}

pub const F_GETFD: i32 = libc::F_GETFD;
pub const F_SETFD: i32 = libc::F_SETFD;
pub const FD_CLOEXEC: i32 = libc::FD_CLOEXEC;

pub fn fcntl(fd: i32, cmd: i32, arg1: Option<i32>) -> Result<i32> {
    check_err(unsafe {
        match arg1 {
            Some(arg1) => libc::fcntl(fd, cmd, arg1),
            None => libc::fcntl(fd, cmd),
        }
    })
}

pub fn dup2(oldfd: i32, newfd: i32) -> Result<()> {
    check_err(unsafe { libc::dup2(oldfd, newfd) })?;
    Ok(())
}

pub fn dup(fd: i32) -> Result<i32> {
    check_err(unsafe { libc::dup(fd) })
}

/// Resets SIGPIPE to its default disposition in the child. Quoting
/// `std::process::Command::do_exec`:
///
/// """
/// libstd ignores SIGPIPE, and signal-handling libraries often set
/// a mask. Child processes inherit ignored signals and the signal
/// mask from their parent, but most UNIX programs do not reset
/// these things on their own, so we need to clean things up now to
/// avoid confusing the program we're about to run.
/// """
///
/// Without this, a process in the middle of a pipeline whose downstream
/// neighbor exits early would see a blocked/ignored SIGPIPE on write and
/// hang instead of exiting, which is what every shell relies on.
pub fn reset_sigpipe() -> Result<()> {
    unsafe {
        let mut set: libc::sigset_t = mem::zeroed();
        check_err(libc::sigemptyset(&mut set))?;
        check_err(libc::pthread_sigmask(libc::SIG_SETMASK, &set, ptr::null_mut()))?;
        let ret = libc::signal(libc::SIGPIPE, libc::SIG_DFL);
        if ret == libc::SIG_ERR {
            return Err(Error::last_os_error());
        }
    }
    Ok(())
}

pub struct PollFd(libc::pollfd);

impl PollFd {
    pub fn new(fd: Option<i32>, events: i16) -> PollFd {
        PollFd(libc::pollfd {
            fd: fd.unwrap_or(-1),
            events,
            revents: 0,
        })
    }

    pub fn test(&self, mask: i16) -> bool {
        self.0.revents & mask != 0
    }
}

pub use libc::{POLLERR, POLLHUP, POLLIN, POLLNVAL, POLLOUT, POLLPRI};

pub fn poll(fds: &mut [PollFd], timeout: i32) -> Result<usize> {
    let cnt = unsafe {
        let fds_ptr = &mut fds[0].0 as *mut libc::pollfd;
        check_err(libc::poll(fds_ptr, fds.len() as libc::nfds_t, timeout))?
    };
    Ok(cnt as usize)
}
