use ferry_command_lib::logging::setup_default_logging;

use crate::{
    ferry::worker::Worker,
    mock::{aggregator::SimpleAggregator, sync_backend::Backend},
};


#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Success,
    Fail,
}

impl From<bool> for State {
    fn from(success: bool) -> Self {
        if success {
            State::Success
        } else {
            State::Fail
        }
    }
}

/// A proxy forwarding to a single mock upstream answering `response`
pub fn setup_test<S: Into<String>, R: Into<Vec<u8>>>(
    name: S,
    response: R,
) -> (Worker, Backend<SimpleAggregator>) {
    let name = name.into();
    setup_default_logging("info", &name);

    let backend = Backend::spawn(
        format!("{name}_BACKEND"),
        response,
        SimpleAggregator::default(),
    );
    let worker = Worker::start_new_worker(name, Worker::config(backend.port()));
    (worker, backend)
}

/// A port nothing listens on
pub fn closed_port() -> u16 {
    let probe = std::net::TcpListener::bind("127.0.0.1:0").expect("could not bind probe");
    probe
        .local_addr()
        .expect("could not get the probe address")
        .port()
}
