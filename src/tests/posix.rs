use crate::{Command, Pipeline, ProcessExt};

#[test]
fn terminate_sends_sigterm() {
    let job = Command::new("sleep").arg("5").start().unwrap();
    job.terminate().unwrap();
    let status = job.wait().unwrap();
    assert!(status.is_killed_by(libc::SIGTERM));
}

#[test]
fn send_signal_reaches_the_child() {
    let job = Command::new("sleep").arg("5").start().unwrap();
    job.processes[0].send_signal(libc::SIGUSR1).unwrap();
    let status = job.wait().unwrap();
    assert!(status.is_killed_by(libc::SIGUSR1));
}

#[test]
fn send_signal_group_reaches_every_member() {
    let job = Pipeline::new()
        .pipe(Command::new("sleep").arg("5"))
        .pipe(Command::new("sleep").arg("5"))
        .set_setpgid(true)
        .start()
        .unwrap();
    job.processes[0].send_signal_group(libc::SIGTERM).unwrap();
    for process in &job.processes {
        let status = process.wait().unwrap();
        assert!(status.is_killed_by(libc::SIGTERM));
    }
}
