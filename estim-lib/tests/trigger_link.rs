mod common;

use estim_lib::config::TriggerConfig;
use estim_lib::error::TransportError;
use estim_lib::packet::ControlCommand;
use estim_lib::param::StimulationParam;
use estim_lib::transport::{Telemetry, Transport, TriggerLink};
use std::io::{self, Cursor, Read};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(2);

async fn drain(mut rx: mpsc::UnboundedReceiver<Telemetry>) -> Vec<Telemetry> {
    let mut seen = Vec::new();
    while let Some(t) = timeout(WAIT, rx.recv()).await.expect("trigger link did not finish") {
        seen.push(t);
    }
    seen
}

#[tokio::test]
async fn test_start_frames_become_requests() {
    common::init_tracing();
    let stream = vec![
        0x00, 0xFF, // line noise
        0x5A, 0xBB, 0xA5, // start
        0x5A, 0xBB, 0x00, // bad tail
        0x5A, 0x42, 0xA5, // unknown command
        0x5A, 0xBB, 0xA5, // start
    ];
    let link = TriggerLink::from_reader("cursor", Cursor::new(stream));
    assert!(link.init().is_ok());

    let (tx, rx) = mpsc::unbounded_channel();
    let task = link.attach(tx).unwrap();

    assert_eq!(
        drain(rx).await,
        vec![Telemetry::StartRequested, Telemetry::StartRequested]
    );
    task.await.unwrap();
}

/// Yields one byte per read and a timeout in between, like a quiet serial port.
struct Trickle {
    bytes: Vec<u8>,
    pos: usize,
    tick: bool,
}

impl Read for Trickle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.tick = !self.tick;
        if self.tick {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "quiet"));
        }
        match self.bytes.get(self.pos) {
            Some(b) => {
                buf[0] = *b;
                self.pos += 1;
                Ok(1)
            }
            None => Ok(0),
        }
    }
}

#[tokio::test]
async fn test_timeouts_and_split_frames() {
    let link = TriggerLink::from_reader(
        "trickle",
        Trickle {
            bytes: vec![0x5A, 0xBB, 0xA5],
            pos: 0,
            tick: false,
        },
    );
    let (tx, rx) = mpsc::unbounded_channel();
    let _task = link.attach(tx).unwrap();
    assert_eq!(drain(rx).await, vec![Telemetry::StartRequested]);
}

#[tokio::test]
async fn test_source_is_taken_once() {
    let link = TriggerLink::from_reader("cursor", Cursor::new(Vec::new()));
    let (tx, _rx) = mpsc::unbounded_channel();
    let _task = link.attach(tx.clone()).unwrap();
    assert!(matches!(link.attach(tx), Err(TransportError::AlreadyAttached)));
}

#[test]
fn test_no_command_path() {
    let link = TriggerLink::from_reader("cursor", Cursor::new(Vec::new()));
    // logged and dropped
    link.send_control(ControlCommand::Start, &StimulationParam::default());
    assert_eq!(link.name(), "trigger");
}

#[tokio::test]
async fn test_disabled_and_missing_ports() {
    let link = TriggerLink::disabled("/dev/ttyS99");
    assert!(matches!(
        link.init(),
        Err(TransportError::LinkUnavailable { .. })
    ));
    let (tx, _rx) = mpsc::unbounded_channel();
    assert!(link.attach(tx).is_err());

    let missing = TriggerLink::open(&TriggerConfig {
        port: "/dev/estim-no-such-port".to_string(),
        baud_rate: 115_200,
    });
    assert!(matches!(
        missing,
        Err(TransportError::LinkUnavailable { path }) if path == "/dev/estim-no-such-port"
    ));
}
