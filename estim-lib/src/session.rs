//! Treatment session state machine.
//!
//! [`Session`] is synchronous and owns everything that decides whether the
//! output is enabled: the cached parameters, the countdown and the run state.
//! It never waits on anything; [`crate::controller::SessionController`] feeds
//! it one message at a time.

use crate::constants::WAVEFORM_BATCH_SIZE;
use crate::error::{ParamError, TransportError};
use crate::message::{StatusPacket, WaveformPacket};
use crate::packet::{ControlCommand, ErrorCode};
use crate::param::{PidParam, StimulationParam};
use crate::transport::{Telemetry, Transport};
use strum_macros::Display;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display)]
pub enum RunState {
    #[default]
    Idle,
    Running,
    /// Declared for observers; nothing enters it yet
    Paused,
    /// The main link failed to come up
    Error,
}

/// Fields of a status packet as presented to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MonitoringData {
    pub real_freq: u16,
    pub battery_pct: u8,
    pub error: ErrorCode,
}

impl From<StatusPacket> for MonitoringData {
    fn from(status: StatusPacket) -> Self {
        Self {
            real_freq: status.real_freq,
            battery_pct: status.battery_pct,
            error: status.error,
        }
    }
}

/// Notification for observers of a session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged(RunState),
    /// Remaining whole seconds
    TimeUpdated(u32),
    Monitoring(MonitoringData),
    Waveform([f32; WAVEFORM_BATCH_SIZE]),
    /// The external start button was pressed. Starting is up to the observer.
    StartRequested,
}

/// Why a running session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum StopReason {
    #[strum(to_string = "user request")]
    User,
    #[strum(to_string = "timer expired")]
    Expired,
    #[strum(to_string = "device fault")]
    DeviceFault(ErrorCode),
    #[strum(to_string = "status timeout")]
    StatusTimeout,
    #[strum(to_string = "shutdown")]
    Shutdown,
}

/// Point-in-time copy of the session for observers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionSnapshot {
    pub state: RunState,
    pub remaining_secs: u32,
    pub parameters: StimulationParam,
}

pub struct Session<T: Transport> {
    transport: T,
    events: mpsc::UnboundedSender<SessionEvent>,
    state: RunState,
    param: StimulationParam,
    remaining_secs: u32,
    timer_armed: bool,
    timer_epoch: u64,
}

impl<T: Transport> Session<T> {
    /// Take ownership of `transport` and bring it up.
    ///
    /// A link that fails to initialize leaves the session in [`RunState::Error`].
    pub fn new(transport: T, events: mpsc::UnboundedSender<SessionEvent>) -> Self {
        let mut session = Self {
            transport,
            events,
            state: RunState::Idle,
            param: StimulationParam::default(),
            remaining_secs: 0,
            timer_armed: false,
            timer_epoch: 0,
        };
        if let Err(e) = session.transport.init() {
            error!("{} link failed to initialize: {}", session.transport.name(), e);
            session.state = RunState::Error;
        }
        session
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn remaining_secs(&self) -> u32 {
        self.remaining_secs
    }

    pub fn parameters(&self) -> StimulationParam {
        self.param
    }

    /// Whether the one-second countdown should be ticking.
    pub fn timer_armed(&self) -> bool {
        self.timer_armed
    }

    /// Incremented every time the countdown is armed, so a driver can realign
    /// its ticker to the moment the session started.
    pub fn timer_epoch(&self) -> u64 {
        self.timer_epoch
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state,
            remaining_secs: self.remaining_secs,
            parameters: self.param,
        }
    }

    /// Begin a session of `duration_secs` with the cached parameters.
    ///
    /// Returns `Ok(false)` when the call is ignored: a session is already
    /// running or the link is in error. Nothing is sent in that case.
    pub fn start(&mut self, duration_secs: u32) -> Result<bool, ParamError> {
        match self.state {
            RunState::Running => {
                debug!("Start ignored, session already running");
                return Ok(false);
            }
            RunState::Error => {
                warn!("Start refused, {} link is unavailable", self.transport.name());
                return Ok(false);
            }
            RunState::Idle | RunState::Paused => {}
        }
        self.param.validate()?;

        self.remaining_secs = duration_secs;
        self.transport.send_control(ControlCommand::Start, &self.param);
        self.timer_armed = true;
        self.timer_epoch += 1;
        self.state = RunState::Running;
        info!("Session started for {} s ({})", duration_secs, self.param);

        self.emit(SessionEvent::StateChanged(RunState::Running));
        self.emit(SessionEvent::TimeUpdated(duration_secs));
        Ok(true)
    }

    /// User stop. No-op unless running.
    pub fn stop(&mut self) -> bool {
        self.halt(StopReason::User)
    }

    /// The one path that turns the output off.
    ///
    /// Returns `false`, sending nothing and emitting nothing, unless the
    /// session is running; a second stop racing the first is harmless.
    pub fn halt(&mut self, reason: StopReason) -> bool {
        if self.state != RunState::Running {
            return false;
        }
        self.timer_armed = false;
        self.transport.send_control(ControlCommand::Stop, &self.param);
        self.remaining_secs = 0;
        self.state = RunState::Idle;

        match reason {
            StopReason::DeviceFault(_) | StopReason::StatusTimeout => {
                error!("Session force-stopped: {}", reason)
            }
            _ => info!("Session stopped: {}", reason),
        }

        self.emit(SessionEvent::TimeUpdated(0));
        self.emit(SessionEvent::StateChanged(RunState::Idle));
        true
    }

    /// Cache parameters for the next start. A running session keeps the
    /// values it was started with.
    pub fn update_parameters(&mut self, param: StimulationParam) {
        self.param = param;
        if self.state == RunState::Running {
            info!("Parameters updated, applied at next start: {}", param);
        } else {
            info!("Parameters updated: {}", param);
        }
    }

    /// Forward regulator gains straight to the device. Not cached.
    pub fn set_pid(&mut self, pid: PidParam) {
        info!("Sending PID parameters: {}", pid);
        self.transport.send_pid(&pid);
    }

    /// One countdown period elapsed.
    pub fn tick(&mut self) {
        if self.state != RunState::Running || !self.timer_armed {
            return;
        }
        if self.remaining_secs <= 1 {
            self.halt(StopReason::Expired);
        } else {
            self.remaining_secs -= 1;
            self.emit(SessionEvent::TimeUpdated(self.remaining_secs));
        }
    }

    /// Apply a status packet. A fault while running stops the output before
    /// observers hear about it.
    pub fn handle_status(&mut self, status: StatusPacket) {
        if status.error.is_fault() {
            if self.state == RunState::Running {
                error!("Device reported {} while running, stopping", status.error);
                self.halt(StopReason::DeviceFault(status.error));
            } else {
                warn!("Device reported {} while {}", status.error, self.state);
            }
        }
        self.emit(SessionEvent::Monitoring(status.into()));
    }

    pub fn handle_waveform(&mut self, waveform: WaveformPacket) {
        self.emit(SessionEvent::Waveform(waveform.samples));
    }

    pub fn handle_telemetry(&mut self, telemetry: Telemetry) {
        match telemetry {
            Telemetry::Status(status) => self.handle_status(status),
            Telemetry::Waveform(waveform) => self.handle_waveform(waveform),
            Telemetry::StartRequested => self.emit(SessionEvent::StartRequested),
        }
    }

    /// Retry link initialization from [`RunState::Error`].
    pub fn recover(&mut self) -> Result<(), TransportError> {
        if self.state != RunState::Error {
            return Ok(());
        }
        self.transport.init()?;
        info!("{} link recovered", self.transport.name());
        self.state = RunState::Idle;
        self.emit(SessionEvent::StateChanged(RunState::Idle));
        Ok(())
    }

    fn emit(&self, event: SessionEvent) {
        // observers may have gone away
        let _ = self.events.send(event);
    }
}
