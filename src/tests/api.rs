use crate::{
    Capture, Command, Communicator, ExitStatus, Job, Pipeline, PipelineError, Process,
    Redirection, Shell,
};

fn assert_send_sync<T: Send + Sync>() {}

#[test]
fn public_types_are_send_and_sync() {
    assert_send_sync::<Command>();
    assert_send_sync::<Pipeline>();
    assert_send_sync::<Job>();
    assert_send_sync::<Capture>();
    assert_send_sync::<Communicator>();
    assert_send_sync::<ExitStatus>();
    assert_send_sync::<Process>();
    assert_send_sync::<PipelineError>();
    assert_send_sync::<Redirection>();
    assert_send_sync::<Shell>();
}
