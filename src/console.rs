//! Line-oriented operator console.

use anyhow::{Context, Result, anyhow, bail};
use estim_lib::packet::ErrorCode;
use estim_lib::param::{PidParam, StimulationParam};
use estim_lib::session::{RunState, SessionEvent};
use estim_lib::SessionHandle;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

const HELP: &str = "\
commands:
  start [secs]                 start a session (default duration without secs)
  stop                         stop the running session
  param key=value ...          freq, pos_amp, neg_amp, pos_width, neg_width, dead
  pid <kp> <ki> <kd> [limit]   send regulator gains
  status                       print the session state
  recover                      retry a failed link
  quit                         stop and exit";

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Start(Option<u32>),
    Stop,
    Param(Vec<(String, String)>),
    Pid(PidParam),
    Status,
    Recover,
    Help,
    Quit,
}

pub fn parse_command(line: &str) -> Result<ConsoleCommand> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        bail!("empty command");
    };
    let rest: Vec<&str> = words.collect();

    match verb {
        "start" => match rest.as_slice() {
            [] => Ok(ConsoleCommand::Start(None)),
            [secs] => Ok(ConsoleCommand::Start(Some(
                secs.parse().with_context(|| format!("invalid duration: {}", secs))?,
            ))),
            _ => bail!("usage: start [secs]"),
        },
        "stop" => Ok(ConsoleCommand::Stop),
        "param" => {
            if rest.is_empty() {
                bail!("usage: param key=value ...");
            }
            let pairs = rest
                .iter()
                .map(|kv| {
                    kv.split_once('=')
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .ok_or_else(|| anyhow!("expected key=value, got {}", kv))
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(ConsoleCommand::Param(pairs))
        }
        "pid" => {
            let values = rest
                .iter()
                .map(|v| v.parse::<f32>().with_context(|| format!("invalid gain: {}", v)))
                .collect::<Result<Vec<_>>>()?;
            match values.as_slice() {
                [kp, ki, kd] => Ok(ConsoleCommand::Pid(PidParam {
                    kp: *kp,
                    ki: *ki,
                    kd: *kd,
                    integral_limit: 0.0,
                })),
                [kp, ki, kd, limit] => Ok(ConsoleCommand::Pid(PidParam {
                    kp: *kp,
                    ki: *ki,
                    kd: *kd,
                    integral_limit: *limit,
                })),
                _ => bail!("usage: pid <kp> <ki> <kd> [limit]"),
            }
        }
        "status" => Ok(ConsoleCommand::Status),
        "recover" => Ok(ConsoleCommand::Recover),
        "help" | "?" => Ok(ConsoleCommand::Help),
        "quit" | "exit" => Ok(ConsoleCommand::Quit),
        other => bail!("unknown command: {} (try help)", other),
    }
}

/// Apply `key=value` edits on top of `base`.
pub fn apply_params(base: StimulationParam, pairs: &[(String, String)]) -> Result<StimulationParam> {
    let mut param = base;
    for (key, value) in pairs {
        let bad = || format!("invalid value for {}: {}", key, value);
        match key.as_str() {
            "freq" => param.frequency_hz = value.parse().with_context(bad)?,
            "pos_width" => param.positive_width_us = value.parse().with_context(bad)?,
            "neg_width" => param.negative_width_us = value.parse().with_context(bad)?,
            "dead" => param.dead_time_us = value.parse().with_context(bad)?,
            "pos_amp" => param.positive_amp_ma = value.parse().with_context(bad)?,
            "neg_amp" => param.negative_amp_ma = value.parse().with_context(bad)?,
            "amp" => {
                let amp: f32 = value.parse().with_context(bad)?;
                param.positive_amp_ma = amp;
                param.negative_amp_ma = amp;
            }
            other => bail!("unknown parameter: {}", other),
        }
    }
    param.validate()?;
    Ok(param)
}

pub struct Console {
    handle: SessionHandle,
    params: StimulationParam,
    default_duration: u32,
    last_error: ErrorCode,
}

impl Console {
    pub fn new(handle: SessionHandle, params: StimulationParam, default_duration: u32) -> Self {
        Self {
            handle,
            params,
            default_duration,
            last_error: ErrorCode::None,
        }
    }

    /// Run until `quit`, end of input, or the controller going away.
    pub async fn run(mut self, mut events: mpsc::UnboundedReceiver<SessionEvent>) -> Result<()> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        println!("{}", HELP);

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line.context("Failed to read stdin")? else {
                        info!("End of input");
                        break;
                    };
                    if line.trim().is_empty() {
                        continue;
                    }
                    match parse_command(&line) {
                        Ok(ConsoleCommand::Quit) => break,
                        Ok(command) => self.execute(command).await?,
                        Err(e) => println!("{:#}", e),
                    }
                }
                event = events.recv() => match event {
                    Some(event) => self.on_event(event)?,
                    None => {
                        warn!("Session controller stopped");
                        break;
                    }
                },
            }
        }
        Ok(())
    }

    async fn execute(&mut self, command: ConsoleCommand) -> Result<()> {
        match command {
            ConsoleCommand::Start(secs) => self.handle.start(secs.unwrap_or(self.default_duration))?,
            ConsoleCommand::Stop => self.handle.stop()?,
            ConsoleCommand::Param(pairs) => match apply_params(self.params, &pairs) {
                Ok(param) => {
                    self.params = param;
                    self.handle.update_parameters(param)?;
                    println!("parameters: {}", param);
                }
                Err(e) => println!("{:#}", e),
            },
            ConsoleCommand::Pid(pid) => self.handle.set_pid(pid)?,
            ConsoleCommand::Status => {
                let snapshot = self.handle.snapshot().await?;
                println!(
                    "{} | remaining {} s | last error: {} | {}",
                    snapshot.state, snapshot.remaining_secs, self.last_error, snapshot.parameters
                );
            }
            ConsoleCommand::Recover => self.handle.recover()?,
            ConsoleCommand::Help => println!("{}", HELP),
            ConsoleCommand::Quit => {}
        }
        Ok(())
    }

    fn on_event(&mut self, event: SessionEvent) -> Result<()> {
        match event {
            SessionEvent::StateChanged(RunState::Error) => {
                error!("Link unavailable, use recover to retry")
            }
            SessionEvent::StateChanged(state) => info!("State: {}", state),
            SessionEvent::TimeUpdated(secs) => {
                if secs % 60 == 0 || secs <= 10 {
                    info!("Remaining: {} s", secs);
                } else {
                    debug!("Remaining: {} s", secs);
                }
            }
            SessionEvent::Monitoring(data) => {
                if data.error != self.last_error {
                    if data.error.is_fault() {
                        warn!("Device error: {}", data.error);
                    } else {
                        info!("Device error cleared");
                    }
                    self.last_error = data.error;
                }
                debug!(
                    battery = data.battery_pct,
                    measured = data.real_freq,
                    "Monitoring"
                );
            }
            SessionEvent::Waveform(samples) => {
                let peak = samples.iter().fold(0.0f32, |m, s| m.max(s.abs()));
                trace!(peak, "Waveform batch");
            }
            SessionEvent::StartRequested => {
                info!("Start button pressed");
                self.handle.start(self.default_duration)?;
            }
        }
        Ok(())
    }
}
