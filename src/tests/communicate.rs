use std::time::Duration;

use crate::Command;

#[test]
fn communicate_feeds_stdin_and_drains_stdout_without_deadlock() {
    // More bytes than a single OS pipe buffer, on both sides, to exercise
    // the concurrent pump rather than a blocking read/write pair.
    let payload = vec![b'x'; 4 * 1024 * 1024];
    let mut communicator = Command::new("cat")
        .stdin(payload.clone())
        .unwrap()
        .communicate()
        .unwrap();
    let (out, _err) = communicator.read().unwrap();
    assert_eq!(out, payload);
}

#[test]
fn communicate_splits_stdout_and_stderr() {
    let mut communicator = Command::new("sh")
        .args(["-c", "echo out; echo err 1>&2"])
        .communicate()
        .unwrap();
    let (out, err) = communicator.read().unwrap();
    assert_eq!(out, b"out\n");
    assert_eq!(err, b"err\n");
}

#[test]
fn limit_time_times_out_on_a_stalled_process() {
    let mut communicator = Command::new("sleep")
        .arg("5")
        .communicate()
        .unwrap()
        .limit_time(Duration::from_millis(50));
    let result = communicator.read();
    assert_eq!(result.unwrap_err().kind(), std::io::ErrorKind::TimedOut);
}
