use super::{forward, TelemetrySink, Transport};
use crate::constants::{MAX_TELEMETRY_SIZE, SPI_POLL_PERIOD};
use crate::error::TransportError;
use crate::framing::FrameBuffer;
use crate::message::{ControlPacket, PidPacket, Record};
use crate::packet::ControlCommand;
use crate::param::{PidParam, StimulationParam};
use embedded_hal::spi::{Error as _, ErrorKind, SpiDevice};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

// Log every failure up to here, then only every Nth one until a poll succeeds
const FAILURE_LOG_BURST: u32 = 3;
const FAILURE_LOG_EVERY: u32 = 50;

/// Byte-level duplex transfers, erased over the concrete SPI device type.
trait DuplexLink: Send {
    fn write(&mut self, bytes: &[u8]) -> Result<(), ErrorKind>;
    fn read(&mut self, buf: &mut [u8]) -> Result<(), ErrorKind>;
}

impl<D> DuplexLink for D
where
    D: SpiDevice<u8> + Send,
{
    fn write(&mut self, bytes: &[u8]) -> Result<(), ErrorKind> {
        SpiDevice::write(self, bytes).map_err(|e| e.kind())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<(), ErrorKind> {
        SpiDevice::read(self, buf).map_err(|e| e.kind())
    }
}

/// Link to the stimulator microcontroller over SPI.
///
/// The device is a full-duplex bus that cannot overlap transfers, so a single
/// lock covers command writes and poll reads end to end.
#[derive(Clone)]
pub struct SpiTransport {
    path: String,
    bus: Arc<Mutex<Option<Box<dyn DuplexLink>>>>,
    poll_period: Duration,
    attached: Arc<AtomicBool>,
}

impl SpiTransport {
    /// Wrap an already-configured SPI device.
    pub fn new<D>(path: impl Into<String>, device: D) -> Self
    where
        D: SpiDevice<u8> + Send + 'static,
    {
        Self::with_bus(path.into(), Some(Box::new(device)))
    }

    /// A link whose device could not be opened. Every operation fails fast.
    pub fn disabled(path: impl Into<String>) -> Self {
        Self::with_bus(path.into(), None)
    }

    fn with_bus(path: String, bus: Option<Box<dyn DuplexLink>>) -> Self {
        Self {
            path,
            bus: Arc::new(Mutex::new(bus)),
            poll_period: SPI_POLL_PERIOD,
            attached: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Open and configure `/dev/spidevB.C` (mode 0, 8 bits per word).
    #[cfg(feature = "linux-spi")]
    pub fn open(path: &str, speed_hz: u32) -> Result<Self, TransportError> {
        use linux_embedded_hal::SpidevDevice;
        use linux_embedded_hal::spidev::{SpiModeFlags, SpidevOptions};

        let mut device = SpidevDevice::open(path).map_err(|e| {
            debug!("spidev open error: {:?}", e);
            TransportError::LinkUnavailable {
                path: path.to_string(),
            }
        })?;
        let options = SpidevOptions::new()
            .bits_per_word(8)
            .max_speed_hz(speed_hz)
            .mode(SpiModeFlags::SPI_MODE_0)
            .build();
        device.0.configure(&options)?;
        info!(path, speed_hz, "SPI device opened");
        Ok(Self::new(path, device))
    }

    pub fn with_poll_period(mut self, period: Duration) -> Self {
        self.poll_period = period;
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_available(&self) -> bool {
        self.bus.lock().is_some()
    }

    fn unavailable(&self) -> TransportError {
        TransportError::LinkUnavailable {
            path: self.path.clone(),
        }
    }

    fn transfer_failed(&self, kind: ErrorKind) -> TransportError {
        TransportError::TransferFailed {
            path: self.path.clone(),
            reason: format!("{:?}", kind),
        }
    }

    /// Write one complete record as a single transfer.
    fn transmit(&self, frame: &[u8]) -> Result<(), TransportError> {
        let mut bus = self.bus.lock();
        let link = bus.as_mut().ok_or_else(|| self.unavailable())?;
        trace!(bytes = %hex::encode(frame), "SPI write");
        link.write(frame).map_err(|kind| self.transfer_failed(kind))
    }

    /// Read one poll window into `frames`.
    fn poll_once(&self, frames: &mut FrameBuffer) -> Result<(), TransportError> {
        let mut rx = [0u8; MAX_TELEMETRY_SIZE];
        {
            let mut bus = self.bus.lock();
            let link = bus.as_mut().ok_or_else(|| self.unavailable())?;
            link.read(&mut rx).map_err(|kind| self.transfer_failed(kind))?;
        }
        trace!(head = rx[0], "SPI read");
        frames.extend(&rx);
        Ok(())
    }

    fn poll_loop(self, sink: TelemetrySink) {
        info!(path = %self.path, period_ms = self.poll_period.as_millis() as u64, "SPI polling started");
        let mut frames = FrameBuffer::new();
        let mut failures: u32 = 0;

        while !sink.is_closed() {
            let started = Instant::now();
            match self.poll_once(&mut frames) {
                Ok(()) => {
                    if failures > 0 {
                        info!("SPI poll recovered after {} failed transfer(s)", failures);
                    }
                    failures = 0;
                }
                Err(e) => {
                    failures = failures.saturating_add(1);
                    if failures <= FAILURE_LOG_BURST || failures % FAILURE_LOG_EVERY == 0 {
                        warn!("SPI poll failed ({} in a row): {}", failures, e);
                    }
                }
            }
            if !forward(&mut frames, &sink) {
                break;
            }
            std::thread::sleep(self.poll_period.saturating_sub(started.elapsed()));
        }

        self.attached.store(false, Ordering::SeqCst);
        info!(path = %self.path, "SPI polling stopped");
    }
}

impl Transport for SpiTransport {
    fn name(&self) -> &'static str {
        "spi"
    }

    fn init(&self) -> Result<(), TransportError> {
        if self.is_available() {
            Ok(())
        } else {
            Err(self.unavailable())
        }
    }

    fn send_control(&self, command: ControlCommand, param: &StimulationParam) {
        let packet = ControlPacket::new(command, param);
        match self.transmit(&packet.encode()) {
            Ok(()) => debug!("Sent {} ({})", command, packet.param),
            Err(e) => warn!("Failed to send {}: {}", command, e),
        }
    }

    fn send_pid(&self, pid: &PidParam) {
        let packet = PidPacket { gains: *pid };
        match self.transmit(&packet.encode()) {
            Ok(()) => debug!("Sent PID ({})", pid),
            Err(e) => warn!("Failed to send PID parameters: {}", e),
        }
    }

    fn attach(&self, sink: TelemetrySink) -> Result<JoinHandle<()>, TransportError> {
        self.init()?;
        if self.attached.swap(true, Ordering::SeqCst) {
            return Err(TransportError::AlreadyAttached);
        }
        let link = self.clone();
        Ok(tokio::task::spawn_blocking(move || link.poll_loop(sink)))
    }
}
