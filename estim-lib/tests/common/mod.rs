//! Common test utilities and shared doubles

// Shared across test files; not every item is used in every file
#![allow(dead_code)]

use embedded_hal::spi::{ErrorKind, ErrorType, Operation, SpiDevice};
use estim_lib::error::TransportError;
use estim_lib::packet::ControlCommand;
use estim_lib::param::{PidParam, StimulationParam};
use estim_lib::transport::{Telemetry, TelemetrySink, Transport};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::task::JoinHandle;

/// Install a test-writer subscriber once; later calls are ignored.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn therapy_param() -> StimulationParam {
    StimulationParam {
        frequency_hz: 100,
        positive_width_us: 200,
        negative_width_us: 200,
        dead_time_us: 50,
        positive_amp_ma: 5.0,
        negative_amp_ma: 5.0,
    }
}

/// A command as seen by a transport.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Sent {
    Control(ControlCommand, StimulationParam),
    Pid(PidParam),
}

/// Transport that records every command and lets the test push telemetry.
#[derive(Clone, Default)]
pub struct RecordingTransport {
    sent: Arc<Mutex<Vec<Sent>>>,
    sink: Arc<Mutex<Option<TelemetrySink>>>,
    fail_init: Arc<AtomicBool>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport whose `init` fails until [`Self::set_fail_init`] clears it.
    pub fn unavailable() -> Self {
        let transport = Self::default();
        transport.set_fail_init(true);
        transport
    }

    pub fn set_fail_init(&self, fail: bool) {
        self.fail_init.store(fail, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().clone()
    }

    pub fn controls(&self) -> Vec<ControlCommand> {
        self.sent
            .lock()
            .iter()
            .filter_map(|s| match s {
                Sent::Control(cmd, _) => Some(*cmd),
                Sent::Pid(_) => None,
            })
            .collect()
    }

    pub fn count(&self, command: ControlCommand) -> usize {
        self.controls().into_iter().filter(|c| *c == command).count()
    }

    pub fn is_attached(&self) -> bool {
        self.sink.lock().is_some()
    }

    /// Deliver telemetry as if it had arrived on the link.
    pub fn push(&self, telemetry: Telemetry) {
        let sink = self.sink.lock();
        let sink = sink.as_ref().expect("transport not attached");
        sink.send(telemetry).expect("controller gone");
    }
}

impl Transport for RecordingTransport {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn init(&self) -> Result<(), TransportError> {
        if self.fail_init.load(Ordering::SeqCst) {
            Err(TransportError::LinkUnavailable {
                path: "recording".to_string(),
            })
        } else {
            Ok(())
        }
    }

    fn send_control(&self, command: ControlCommand, param: &StimulationParam) {
        self.sent.lock().push(Sent::Control(command, *param));
    }

    fn send_pid(&self, pid: &PidParam) {
        self.sent.lock().push(Sent::Pid(*pid));
    }

    fn attach(&self, sink: TelemetrySink) -> Result<JoinHandle<()>, TransportError> {
        self.init()?;
        *self.sink.lock() = Some(sink);
        Ok(tokio::spawn(async {}))
    }
}

/// In-memory SPI device. Writes are recorded per transfer, reads are served
/// from a byte queue and padded with zeros.
#[derive(Clone, Default)]
pub struct FakeSpi {
    written: Arc<Mutex<Vec<Vec<u8>>>>,
    rx: Arc<Mutex<VecDeque<u8>>>,
    fail: Arc<AtomicBool>,
}

impl FakeSpi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue(&self, bytes: &[u8]) {
        self.rx.lock().extend(bytes.iter().copied());
    }

    pub fn written(&self) -> Vec<Vec<u8>> {
        self.written.lock().clone()
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    fn fill(&self, buf: &mut [u8]) {
        let mut rx = self.rx.lock();
        for b in buf.iter_mut() {
            *b = rx.pop_front().unwrap_or(0);
        }
    }
}

impl ErrorType for FakeSpi {
    type Error = ErrorKind;
}

impl SpiDevice<u8> for FakeSpi {
    fn transaction(&mut self, operations: &mut [Operation<'_, u8>]) -> Result<(), ErrorKind> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ErrorKind::Other);
        }
        for op in operations.iter_mut() {
            match op {
                Operation::Write(buf) => self.written.lock().push(buf.to_vec()),
                Operation::Read(buf) => self.fill(buf),
                Operation::Transfer(read, write) => {
                    self.written.lock().push(write.to_vec());
                    self.fill(read);
                }
                Operation::TransferInPlace(buf) => {
                    self.written.lock().push(buf.to_vec());
                    self.fill(buf);
                }
                Operation::DelayNs(_) => {}
            }
        }
        Ok(())
    }
}
