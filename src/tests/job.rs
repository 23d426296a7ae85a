use std::time::Duration;

use crate::Command;

#[test]
fn poll_reflects_running_then_finished() {
    let job = Command::new("sleep").arg("1").start().unwrap();
    assert!(job.poll().is_none());
    let status = job.wait().unwrap();
    assert!(status.success());
    assert_eq!(job.poll(), Some(status));
}

#[test]
fn wait_timeout_returns_none_before_deadline() {
    let job = Command::new("sleep").arg("2").start().unwrap();
    let result = job.wait_timeout(Duration::from_millis(50)).unwrap();
    assert!(result.is_none());
    job.terminate().unwrap();
    job.wait().unwrap();
}

#[test]
fn terminate_stops_a_long_running_process() {
    let job = Command::new("sleep").arg("30").start().unwrap();
    job.terminate().unwrap();
    let status = job.wait().unwrap();
    assert!(!status.success());
}

#[test]
fn pids_reports_one_entry_per_stage() {
    let job = (Command::new("true") | Command::new("true") | Command::new("true"))
        .start()
        .unwrap();
    assert_eq!(job.pids().len(), 3);
    job.wait().unwrap();
}

#[test]
fn detach_lets_drop_skip_the_wait() {
    let job = Command::new("sleep").arg("30").start().unwrap();
    job.detach();
    job.terminate().unwrap();
    // dropping a detached Job must not block on wait()
}

#[test]
fn iterate_yields_lines_tagged_with_their_channel() {
    let job = Command::new("echo")
        .arg("a\nb\nc")
        .stdout(crate::Redirection::Pipe)
        .unwrap()
        .start()
        .unwrap();
    let lines: Vec<String> = job
        .iterate()
        .map(|item| item.unwrap().1)
        .collect();
    assert_eq!(lines, vec!["a", "b", "c"]);
}
