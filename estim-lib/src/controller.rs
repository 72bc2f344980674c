//! Single-consumer loop driving a [`Session`].
//!
//! Telemetry, trigger events, user commands and timer ticks all arrive as
//! messages and are applied one at a time on one task. Telemetry is polled
//! first, so a fault report is handled before any queued command or tick.

use crate::config::ControllerConfig;
use crate::error::SessionError;
use crate::param::{PidParam, StimulationParam};
use crate::session::{Session, SessionEvent, SessionSnapshot, StopReason};
use crate::transport::{Link, Telemetry, Transport};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

const MIN_TICK: Duration = Duration::from_millis(1);

/// Inbound request to the controller.
#[derive(Debug)]
pub enum SessionCommand {
    Start(u32),
    Stop,
    UpdateParameters(StimulationParam),
    SetPid(PidParam),
    Recover,
    Snapshot(oneshot::Sender<SessionSnapshot>),
    Shutdown,
}

/// Cloneable front end of a running [`SessionController`].
#[derive(Debug, Clone)]
pub struct SessionHandle {
    tx: mpsc::UnboundedSender<SessionCommand>,
}

impl SessionHandle {
    fn send(&self, command: SessionCommand) -> Result<(), SessionError> {
        self.tx.send(command).map_err(|_| SessionError::Closed)
    }

    pub fn start(&self, duration_secs: u32) -> Result<(), SessionError> {
        self.send(SessionCommand::Start(duration_secs))
    }

    pub fn stop(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::Stop)
    }

    pub fn update_parameters(&self, param: StimulationParam) -> Result<(), SessionError> {
        self.send(SessionCommand::UpdateParameters(param))
    }

    pub fn set_pid(&self, pid: PidParam) -> Result<(), SessionError> {
        self.send(SessionCommand::SetPid(pid))
    }

    pub fn recover(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::Recover)
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionCommand::Snapshot(reply))?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    /// Stop any running session and end the controller task.
    pub fn shutdown(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::Shutdown)
    }
}

pub struct SessionController<T: Transport> {
    session: Session<T>,
    config: ControllerConfig,
    commands: mpsc::UnboundedReceiver<SessionCommand>,
    handle: SessionHandle,
    trigger: Option<Link>,
}

impl<T: Transport> SessionController<T> {
    /// Build a controller around `transport`. Session events are delivered on
    /// the returned receiver.
    pub fn new(
        transport: T,
        config: ControllerConfig,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (tx, commands) = mpsc::unbounded_channel();
        let controller = Self {
            session: Session::new(transport, events_tx),
            config,
            commands,
            handle: SessionHandle { tx },
            trigger: None,
        };
        (controller, events_rx)
    }

    /// Also listen to an independent trigger link.
    pub fn with_trigger(mut self, trigger: Link) -> Self {
        self.trigger = Some(trigger);
        self
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    pub fn session(&self) -> &Session<T> {
        &self.session
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Run until shutdown or until every handle is dropped.
    pub async fn run(self) {
        let SessionController {
            mut session,
            config,
            mut commands,
            handle,
            trigger,
        } = self;
        // the loop must not keep its own command channel alive
        drop(handle);

        let (telemetry_tx, mut telemetry_rx) = mpsc::unbounded_channel::<Telemetry>();
        let mut main_task = attach(session.transport(), &telemetry_tx);

        let (trigger_tx, mut trigger_rx) = mpsc::unbounded_channel::<Telemetry>();
        let trigger_task = trigger.as_ref().and_then(|link| attach(link, &trigger_tx));
        let mut trigger_open = trigger_task.is_some();
        drop(trigger_tx);

        let mut ticker = tokio::time::interval(config.tick.max(MIN_TICK));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut epoch = session.timer_epoch();
        let mut last_status = Instant::now();

        info!(link = session.transport().name(), state = %session.state(), "Session controller running");

        loop {
            let watchdog = config
                .status_timeout
                .filter(|_| session.timer_armed())
                .map(|timeout| last_status + timeout);

            tokio::select! {
                biased;

                Some(telemetry) = telemetry_rx.recv() => {
                    if matches!(telemetry, Telemetry::Status(_)) {
                        last_status = Instant::now();
                    }
                    session.handle_telemetry(telemetry);
                }

                event = trigger_rx.recv(), if trigger_open => match event {
                    Some(telemetry) => session.handle_telemetry(telemetry),
                    None => {
                        warn!("Trigger link closed");
                        trigger_open = false;
                    }
                },

                command = commands.recv() => match command {
                    Some(SessionCommand::Start(secs)) => {
                        if let Err(e) = session.start(secs) {
                            warn!("Start rejected: {}", e);
                        }
                    }
                    Some(SessionCommand::Stop) => {
                        session.stop();
                    }
                    Some(SessionCommand::UpdateParameters(param)) => session.update_parameters(param),
                    Some(SessionCommand::SetPid(pid)) => session.set_pid(pid),
                    Some(SessionCommand::Recover) => match session.recover() {
                        Ok(()) if main_task.is_none() => {
                            main_task = attach(session.transport(), &telemetry_tx);
                        }
                        Ok(()) => {}
                        Err(e) => warn!("Recovery failed: {}", e),
                    },
                    Some(SessionCommand::Snapshot(reply)) => {
                        let _ = reply.send(session.snapshot());
                    }
                    Some(SessionCommand::Shutdown) | None => break,
                },

                _ = ticker.tick(), if session.timer_armed() => session.tick(),

                _ = sleep_until(watchdog), if watchdog.is_some() => {
                    session.halt(StopReason::StatusTimeout);
                }
            }

            if session.timer_epoch() != epoch {
                epoch = session.timer_epoch();
                ticker.reset();
                last_status = Instant::now();
            }
        }

        session.halt(StopReason::Shutdown);
        if let Some(task) = main_task {
            task.abort();
        }
        info!("Session controller stopped");
    }
}

fn attach<L: Transport>(link: &L, sink: &mpsc::UnboundedSender<Telemetry>) -> Option<JoinHandle<()>> {
    match link.attach(sink.clone()) {
        Ok(task) => {
            debug!("{} link attached", link.name());
            Some(task)
        }
        Err(e) => {
            warn!("{} link delivers no telemetry: {}", link.name(), e);
            None
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
