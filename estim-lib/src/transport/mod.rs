//! Device links.
//!
//! A [`Transport`] sends command records and delivers decoded telemetry to a
//! single consumer. Three links implement it: the SPI link to the stimulator
//! ([`SpiTransport`]), a software stand-in for it ([`SimTransport`]), and the
//! serial button link ([`TriggerLink`]) which only ever reports start requests.

pub mod sim;
pub mod spi;
pub mod trigger;

pub use sim::SimTransport;
pub use spi::SpiTransport;
pub use trigger::TriggerLink;

use crate::config::{LinkConfig, SimConfig};
use crate::constants::TELEMETRY_HEADS;
use crate::error::TransportError;
use crate::framing::FrameBuffer;
use crate::message::{Packet, StatusPacket, WaveformPacket};
use crate::packet::ControlCommand;
use crate::param::{PidParam, StimulationParam};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// Decoded device -> host event.
#[derive(Debug, Clone, PartialEq)]
pub enum Telemetry {
    Waveform(WaveformPacket),
    Status(StatusPacket),
    /// The physical start button was pressed
    StartRequested,
}

/// Where a link delivers its telemetry, in arrival order.
pub type TelemetrySink = mpsc::UnboundedSender<Telemetry>;

/// Capability every device link provides.
///
/// Send operations never fail back into the caller: a lost command is
/// logged by the link, so that a failing transfer can never abort a stop.
pub trait Transport: Send + 'static {
    fn name(&self) -> &'static str;

    /// Report whether the link came up. Safe to call repeatedly.
    fn init(&self) -> Result<(), TransportError> {
        Ok(())
    }

    fn send_control(&self, command: ControlCommand, param: &StimulationParam);

    fn send_pid(&self, pid: &PidParam);

    /// Start delivering telemetry to `sink` on a background task.
    /// The task ends once the receiving side of `sink` is dropped.
    fn attach(&self, sink: TelemetrySink) -> Result<JoinHandle<()>, TransportError>;
}

/// The closed set of links, selected at runtime.
pub enum Link {
    Hardware(SpiTransport),
    Simulated(SimTransport),
    Trigger(TriggerLink),
}

impl Link {
    /// Build the main link described by `config`.
    ///
    /// A hardware link that cannot be opened is returned disabled; its
    /// `init` reports the failure.
    pub fn from_config(config: &LinkConfig) -> Self {
        match config {
            LinkConfig::Hardware { device, speed_hz } => {
                Link::Hardware(open_hardware(device, *speed_hz))
            }
            LinkConfig::Simulated { seed } => Link::Simulated(SimTransport::new(SimConfig {
                seed: *seed,
                ..Default::default()
            })),
        }
    }
}

#[cfg(feature = "linux-spi")]
fn open_hardware(device: &str, speed_hz: u32) -> SpiTransport {
    SpiTransport::open(device, speed_hz).unwrap_or_else(|e| {
        error!("Failed to open SPI device {}: {}", device, e);
        SpiTransport::disabled(device)
    })
}

#[cfg(not(feature = "linux-spi"))]
fn open_hardware(device: &str, _speed_hz: u32) -> SpiTransport {
    error!("Built without linux-spi support, {} stays disabled", device);
    SpiTransport::disabled(device)
}

impl Transport for Link {
    fn name(&self) -> &'static str {
        match self {
            Link::Hardware(link) => link.name(),
            Link::Simulated(link) => link.name(),
            Link::Trigger(link) => link.name(),
        }
    }

    fn init(&self) -> Result<(), TransportError> {
        match self {
            Link::Hardware(link) => link.init(),
            Link::Simulated(link) => link.init(),
            Link::Trigger(link) => link.init(),
        }
    }

    fn send_control(&self, command: ControlCommand, param: &StimulationParam) {
        match self {
            Link::Hardware(link) => link.send_control(command, param),
            Link::Simulated(link) => link.send_control(command, param),
            Link::Trigger(link) => link.send_control(command, param),
        }
    }

    fn send_pid(&self, pid: &PidParam) {
        match self {
            Link::Hardware(link) => link.send_pid(pid),
            Link::Simulated(link) => link.send_pid(pid),
            Link::Trigger(link) => link.send_pid(pid),
        }
    }

    fn attach(&self, sink: TelemetrySink) -> Result<JoinHandle<()>, TransportError> {
        match self {
            Link::Hardware(link) => link.attach(sink),
            Link::Simulated(link) => link.attach(sink),
            Link::Trigger(link) => link.attach(sink),
        }
    }
}

/// Drain every complete telemetry frame from `frames` into `sink`.
///
/// Returns `false` once the consumer has gone away.
pub(crate) fn forward(frames: &mut FrameBuffer, sink: &TelemetrySink) -> bool {
    while let Some(packet) = frames.next_packet(&TELEMETRY_HEADS) {
        let event = match packet {
            Packet::Waveform(waveform) => Telemetry::Waveform(waveform),
            Packet::Status(status) => {
                debug!("Status: {}", status);
                Telemetry::Status(status)
            }
            Packet::Control(_) | Packet::Pid(_) => continue,
        };
        if sink.send(event).is_err() {
            return false;
        }
    }
    true
}
