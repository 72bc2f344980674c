use super::{TelemetrySink, Telemetry, Transport};
use crate::config::TriggerConfig;
use crate::error::TransportError;
use crate::framing::FrameBuffer;
use crate::packet::{ButtonCommand, ControlCommand};
use crate::param::{PidParam, StimulationParam};
use parking_lot::Mutex;
use std::io::{ErrorKind, Read};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

const READ_TIMEOUT: Duration = Duration::from_millis(100);
const ERROR_BACKOFF: Duration = Duration::from_millis(500);
const READ_CHUNK: usize = 64;

/// Serial link carrying the physical start button.
///
/// Receive only. The byte source is taken by the first `attach`.
#[derive(Clone)]
pub struct TriggerLink {
    path: String,
    enabled: bool,
    source: Arc<Mutex<Option<Box<dyn Read + Send>>>>,
}

impl TriggerLink {
    /// Read button frames from an arbitrary byte source.
    pub fn from_reader(path: impl Into<String>, reader: impl Read + Send + 'static) -> Self {
        Self {
            path: path.into(),
            enabled: true,
            source: Arc::new(Mutex::new(Some(Box::new(reader)))),
        }
    }

    /// Open the serial port named by `config` (8N1, no flow control).
    pub fn open(config: &TriggerConfig) -> Result<Self, TransportError> {
        let port = serialport::new(&config.port, config.baud_rate)
            .timeout(READ_TIMEOUT)
            .open()
            .map_err(|e| {
                debug!("serial open error on {}: {}", config.port, e);
                TransportError::LinkUnavailable {
                    path: config.port.clone(),
                }
            })?;
        info!(port = %config.port, baud = config.baud_rate, "Trigger port opened");
        Ok(Self::from_reader(config.port.clone(), port))
    }

    pub fn disabled(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            enabled: false,
            source: Arc::new(Mutex::new(None)),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    fn read_loop(path: String, mut source: Box<dyn Read + Send>, sink: TelemetrySink) {
        let mut frames = FrameBuffer::new();
        let mut chunk = [0u8; READ_CHUNK];
        let mut errors: u32 = 0;

        while !sink.is_closed() {
            let n = match source.read(&mut chunk) {
                Ok(0) => {
                    debug!(path = %path, "Trigger source reached end of stream");
                    break;
                }
                Ok(n) => n,
                Err(e)
                    if matches!(
                        e.kind(),
                        ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                    ) =>
                {
                    continue;
                }
                Err(e) => {
                    errors = errors.saturating_add(1);
                    if errors <= 3 {
                        warn!("Trigger read failed on {}: {}", path, e);
                    }
                    std::thread::sleep(ERROR_BACKOFF);
                    continue;
                }
            };
            errors = 0;
            trace!(bytes = %hex::encode(&chunk[..n]), "Trigger read");
            frames.extend(&chunk[..n]);

            while let Some(button) = frames.next_button() {
                match button.command {
                    ButtonCommand::Start => {
                        info!("Start button pressed");
                        if sink.send(Telemetry::StartRequested).is_err() {
                            return;
                        }
                    }
                    ButtonCommand::Unknown(cmd) => {
                        debug!("Ignoring button command {:#04x}", cmd);
                    }
                }
            }
        }
        info!(path = %path, "Trigger link stopped");
    }
}

impl Transport for TriggerLink {
    fn name(&self) -> &'static str {
        "trigger"
    }

    fn init(&self) -> Result<(), TransportError> {
        if self.enabled {
            Ok(())
        } else {
            Err(TransportError::LinkUnavailable {
                path: self.path.clone(),
            })
        }
    }

    fn send_control(&self, command: ControlCommand, _param: &StimulationParam) {
        debug!("Trigger link has no command path, dropping {}", command);
    }

    fn send_pid(&self, _pid: &PidParam) {
        debug!("Trigger link has no command path, dropping PID parameters");
    }

    fn attach(&self, sink: TelemetrySink) -> Result<JoinHandle<()>, TransportError> {
        self.init()?;
        let source = self
            .source
            .lock()
            .take()
            .ok_or(TransportError::AlreadyAttached)?;
        let path = self.path.clone();
        Ok(tokio::task::spawn_blocking(move || {
            Self::read_loop(path, source, sink)
        }))
    }
}
