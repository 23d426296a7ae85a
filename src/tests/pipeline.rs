use crate::{Channel, Command, Pipeline, PipelineError, Redirection};

#[test]
fn bitor_chains_commands_into_a_pipeline() {
    let capture = (Command::new("echo").arg("one\ntwo\nthree")
        | Command::new("sort").arg("-r")
        | Command::new("head").args(["-n", "1"]))
    .capture()
    .unwrap();
    assert_eq!(capture.stdout_str().trim_end(), "two");
}

#[test]
fn empty_pipeline_is_a_no_op() {
    let status = Pipeline::new().join().unwrap();
    assert!(status.success());
}

#[test]
fn stdout_redirect_applies_only_to_last_command() {
    let pipeline = Command::new("echo").arg("a") | Command::new("cat");
    let pipeline = pipeline.stdout(Redirection::Pipe).unwrap();
    let capture = pipeline.capture().unwrap();
    assert_eq!(capture.stdout_str().trim_end(), "a");
}

#[test]
fn stdin_redirect_on_non_first_command_is_rejected() {
    let first = Command::new("echo").arg("a").stdin(b"x".as_slice()).unwrap();
    let pipeline = first | Command::new("cat");
    let err = pipeline.stdin(b"y".as_slice()).unwrap_err();
    assert!(matches!(
        err,
        PipelineError::AlreadyRedirected { channel: "stdin" }
    ));
}

#[test]
fn checked_reports_every_failing_stage() {
    let pipeline = Command::new("false") | Command::new("false") | Command::new("true");
    let err = pipeline.checked().join().unwrap_err();
    match err {
        PipelineError::ProcessError { failures, total } => {
            assert_eq!(total, 3);
            assert_eq!(failures.len(), 2);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn stderr_all_collects_every_stage_stderr() {
    let pipeline = Command::new("sh").args(["-c", "echo e1 1>&2"])
        | Command::new("sh").args(["-c", "cat; echo e2 1>&2"]);
    let capture = pipeline.capture().unwrap();
    let stderr = capture.stderr_str();
    assert!(stderr.contains("e1"));
    assert!(stderr.contains("e2"));
}

#[test]
fn pipeline_join_succeeds_when_all_stages_succeed() {
    let status = (Command::new("true") | Command::new("true")).join().unwrap();
    assert!(status.success());
}

#[test]
fn iterate_raw_tags_each_stage_stderr_with_its_own_channel() {
    let pipeline = Command::new("sh").args(["-c", "echo one 1>&2"])
        | Command::new("sh").args(["-c", "cat; echo two 1>&2"]);
    let pipeline = pipeline.stderr_all(Redirection::Pipe).unwrap();
    let job = pipeline.start().unwrap();

    let mut by_channel: std::collections::HashMap<Channel, Vec<u8>> = std::collections::HashMap::new();
    for item in job.iterate_raw() {
        let (channel, chunk) = item.unwrap();
        by_channel.entry(channel).or_default().extend(chunk);
    }

    let first = by_channel.get(&Channel::Stderr(0)).expect("stage 0 stderr channel present");
    let second = by_channel.get(&Channel::Stderr(1)).expect("stage 1 stderr channel present");
    assert_eq!(String::from_utf8_lossy(first).trim_end(), "one");
    assert_eq!(String::from_utf8_lossy(second).trim_end(), "two");
}
