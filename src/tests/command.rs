use std::io::Read;

use crate::{Command, PipelineError, Redirection};

#[test]
fn join_returns_exit_status() {
    let status = Command::new("true").join().unwrap();
    assert!(status.success());
}

#[test]
fn join_reports_failure_exit_code() {
    let status = Command::new("false").join().unwrap();
    assert!(!status.success());
    assert_eq!(status.code(), Some(1));
}

#[test]
fn checked_raises_on_nonzero_exit() {
    let err = Command::new("false").checked().join().unwrap_err();
    match err {
        PipelineError::ProcessError { failures, total } => {
            assert_eq!(total, 1);
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].exit_status.code(), Some(1));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn capture_collects_stdout() {
    let capture = Command::new("echo").arg("hello").capture().unwrap();
    assert!(capture.success());
    assert_eq!(capture.stdout_str().trim_end(), "hello");
}

#[test]
fn capture_collects_stderr_separately() {
    let capture = Command::new("sh")
        .args(["-c", "echo out; echo err 1>&2"])
        .capture()
        .unwrap();
    assert_eq!(capture.stdout_str().trim_end(), "out");
    assert_eq!(capture.stderr_str().trim_end(), "err");
}

#[test]
fn stdin_from_bytes_is_fed_to_child() {
    let capture = Command::new("cat")
        .stdin(b"piped in".as_slice())
        .unwrap()
        .capture()
        .unwrap();
    assert_eq!(capture.stdout_str(), "piped in");
}

#[test]
fn redirecting_same_channel_twice_is_rejected() {
    let err = Command::new("cat")
        .stdout(Redirection::Null)
        .unwrap()
        .stdout(Redirection::Pipe)
        .unwrap_err();
    assert!(matches!(
        err,
        PipelineError::AlreadyRedirected { channel: "stdout" }
    ));
}

#[test]
fn env_overrides_are_visible_to_child() {
    let capture = Command::new("sh")
        .args(["-c", "echo $GREETING"])
        .env("GREETING", "hi there")
        .capture()
        .unwrap();
    assert_eq!(capture.stdout_str().trim_end(), "hi there");
}

#[test]
fn env_remove_hides_inherited_variable() {
    // SAFETY: test runs single-threaded within this process's test harness slot
    // for this variable; no other test reads or writes it.
    unsafe {
        std::env::set_var("PIPESHELL_TEST_VAR", "ambient");
    }
    let capture = Command::new("sh")
        .args(["-c", "echo [$PIPESHELL_TEST_VAR]"])
        .env_remove("PIPESHELL_TEST_VAR")
        .capture()
        .unwrap();
    assert_eq!(capture.stdout_str().trim_end(), "[]");
    unsafe {
        std::env::remove_var("PIPESHELL_TEST_VAR");
    }
}

#[test]
fn cwd_changes_child_working_directory() {
    let dir = tempfile::tempdir().unwrap();
    let capture = Command::new("pwd").cwd(dir.path()).capture().unwrap();
    let printed = capture.stdout_str();
    assert_eq!(printed.trim_end(), dir.path().to_str().unwrap());
}

#[test]
fn communicate_round_trips_stdin_and_stdout() {
    let mut communicator = Command::new("cat")
        .stdin(b"round trip".as_slice())
        .unwrap()
        .communicate()
        .unwrap();
    let (out, _err) = communicator.read().unwrap();
    assert_eq!(out, b"round trip");
}

#[test]
fn unknown_program_surfaces_as_io_error() {
    let err = Command::new("pipeshell-definitely-not-a-real-binary").join();
    assert!(err.is_err());
}

#[test]
fn debug_renders_shell_quoted_argv() {
    let cmd = Command::new("echo").args(["two words", "plain"]);
    let rendered = format!("{cmd:?}");
    assert!(rendered.contains("'two words'"));
    assert!(rendered.contains("plain"));
}

#[test]
fn capture_reads_full_pipe_output_without_deadlock() {
    // A line count well past the OS pipe buffer, to exercise the concurrent
    // pump rather than a single read() call.
    let capture = Command::new("sh")
        .args(["-c", "for i in $(seq 1 20000); do echo line$i; done"])
        .capture()
        .unwrap();
    assert!(capture.success());
    assert_eq!(capture.stdout_str().lines().count(), 20000);
}

#[test]
fn glob_expands_matching_tokens() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.txt"), b"").unwrap();
    std::fs::write(dir.path().join("b.txt"), b"").unwrap();
    let capture = Command::new("ls")
        .arg("*.txt")
        .glob(true)
        .cwd(dir.path())
        .capture()
        .unwrap();
    let mut names: Vec<&str> = capture.stdout_str().lines().collect();
    names.sort_unstable();
    assert_eq!(names, vec!["a.txt", "b.txt"]);
}

#[test]
fn stdout_to_file_writes_child_output() {
    let dir = tempfile::tempdir().unwrap();
    let out_path = dir.path().join("out.txt");
    let status = Command::new("echo")
        .arg("to a file")
        .stdout(out_path.as_path())
        .unwrap()
        .join()
        .unwrap();
    assert!(status.success());
    let mut contents = String::new();
    std::fs::File::open(&out_path)
        .unwrap()
        .read_to_string(&mut contents)
        .unwrap();
    assert_eq!(contents.trim_end(), "to a file");
}
