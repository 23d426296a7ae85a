use crate::Command;

#[test]
fn terminate_stops_a_long_running_process() {
    let job = Command::new("ping").args(["-n", "30", "127.0.0.1"]).start().unwrap();
    assert!(job.poll().is_none());
    job.terminate().unwrap();
    let status = job.wait().unwrap();
    assert!(!status.success());
}

#[test]
fn exit_status_code_roundtrips() {
    let status = Command::new("cmd").args(["/C", "exit 42"]).join().unwrap();
    assert_eq!(status.code(), Some(42));
}
