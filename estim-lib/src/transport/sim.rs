use super::{forward, TelemetrySink, Transport};
use crate::config::SimConfig;
use crate::constants::WAVEFORM_BATCH_SIZE;
use crate::error::{DecodeError, TransportError};
use crate::framing::FrameBuffer;
use crate::message::{ControlPacket, Packet, PidPacket, Record, StatusPacket, WaveformPacket};
use crate::packet::{ControlCommand, ErrorCode};
use crate::param::{PidParam, StimulationParam};
use bytes::{BufMut, Bytes, BytesMut};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f64::consts::TAU;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Sample noise amplitude, mA. Samples carry uniform noise in `[-NOISE, NOISE)`.
pub const SIM_NOISE_MA: f32 = 0.05;

/// Load impedance reported while idle (electrodes not driven), ohms
pub const SIM_IMPEDANCE_IDLE: u16 = 20_000;

/// Base load impedance reported under stimulation, ohms
pub const SIM_IMPEDANCE_RUNNING: u16 = 500;

/// Jitter added to the running impedance, ohms
pub const SIM_IMPEDANCE_JITTER: u16 = 20;

/// Nominal ADC sample period of the simulated acquisition
const SAMPLE_RATE_HZ: f64 = 1000.0;

const BATTERY_LOW: u8 = 95;
const BATTERY_HIGH: u8 = 96;

/// State of the pretend microcontroller.
struct DeviceModel {
    running: bool,
    param: StimulationParam,
    pid: PidParam,
    phase: f64,
    battery_pct: u8,
    rng: StdRng,
    ticks: u64,
}

impl DeviceModel {
    fn apply_control(&mut self, packet: ControlPacket) {
        match packet.command {
            ControlCommand::Start => {
                self.running = true;
                self.param = packet.param;
                // every session starts the sine at zero phase
                self.phase = 0.0;
                info!(">>> START received: {}", packet.param);
            }
            ControlCommand::Stop => {
                self.running = false;
                info!(">>> STOP received, output disabled");
            }
            ControlCommand::Update => {
                self.param = packet.param;
                info!(">>> UPDATE received: {}", packet.param);
            }
            ControlCommand::Unknown(cmd) => {
                warn!("Simulated device ignoring unknown command {:#04x}", cmd);
            }
        }
    }

    fn waveform(&mut self) -> WaveformPacket {
        let (amplitude, frequency) = if self.running {
            (self.param.positive_amp_ma, f64::from(self.param.frequency_hz))
        } else {
            (0.0, 1.0)
        };
        let step = TAU * frequency / SAMPLE_RATE_HZ;

        let mut samples = [0.0f32; WAVEFORM_BATCH_SIZE];
        for sample in samples.iter_mut() {
            let noise = self.rng.gen_range(-SIM_NOISE_MA..SIM_NOISE_MA);
            *sample = amplitude * self.phase.sin() as f32 + noise;
            self.phase = (self.phase + step) % TAU;
        }
        WaveformPacket::new(samples)
    }

    fn status(&mut self) -> StatusPacket {
        if self.rng.gen_range(0..10) == 0 {
            self.battery_pct = if self.battery_pct == BATTERY_LOW {
                BATTERY_HIGH
            } else {
                BATTERY_LOW
            };
        }
        // No timer capture to measure here; the measurement slot carries a
        // synthetic load impedance instead.
        let impedance = if self.running {
            SIM_IMPEDANCE_RUNNING + self.rng.gen_range(0..SIM_IMPEDANCE_JITTER)
        } else {
            SIM_IMPEDANCE_IDLE
        };
        StatusPacket {
            battery_pct: self.battery_pct,
            real_freq: impedance,
            error: ErrorCode::None,
        }
    }
}

/// Software stand-in for the SPI link.
///
/// Commands are accepted as wire bytes and telemetry is produced as wire
/// bytes, so the codec and framing paths run exactly as they do on hardware.
#[derive(Clone)]
pub struct SimTransport {
    model: Arc<Mutex<DeviceModel>>,
    period: Duration,
    attached: Arc<AtomicBool>,
}

impl SimTransport {
    pub fn new(config: SimConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            model: Arc::new(Mutex::new(DeviceModel {
                running: false,
                param: StimulationParam::default(),
                pid: PidParam::default(),
                phase: 0.0,
                battery_pct: BATTERY_LOW,
                rng,
                ticks: 0,
            })),
            period: config.period,
            attached: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Whether the simulated output stage is enabled.
    pub fn is_running(&self) -> bool {
        self.model.lock().running
    }

    /// Parameters of the last START or UPDATE the device accepted.
    pub fn active_param(&self) -> StimulationParam {
        self.model.lock().param
    }

    /// Gains of the last PID packet the device accepted.
    pub fn active_pid(&self) -> PidParam {
        self.model.lock().pid
    }

    /// Accept one command record as it would arrive on the wire.
    pub fn receive(&self, frame: &[u8]) -> Result<(), DecodeError> {
        let packet = Packet::decode(frame)?;
        let mut model = self.model.lock();
        match packet {
            Packet::Control(control) => model.apply_control(control),
            Packet::Pid(PidPacket { gains }) => {
                info!(">>> PID received: {}", gains);
                model.pid = gains;
            }
            other => debug!("Simulated device ignoring {:#04x} frame", other.head()),
        }
        Ok(())
    }

    /// Produce one period of telemetry: a waveform frame then a status frame.
    pub fn synthesize(&self) -> Bytes {
        let mut model = self.model.lock();
        let waveform = model.waveform();
        let status = model.status();

        model.ticks += 1;
        let per_second = (Duration::from_secs(1).as_millis() / self.period.as_millis().max(1)) as u64;
        if model.ticks % per_second.max(1) == 0 {
            info!(
                "[Heartbeat] State: {} | Amp: {:.2} mA | Bat: {}% | Imp: {} Ohm",
                if model.running { "RUNNING" } else { "IDLE" },
                if model.running { model.param.positive_amp_ma } else { 0.0 },
                status.battery_pct,
                status.real_freq
            );
        }

        let mut out = BytesMut::with_capacity(WaveformPacket::SIZE + StatusPacket::SIZE);
        out.put(waveform.encode());
        out.put(status.encode());
        out.freeze()
    }

    fn deliver(&self, frame: Bytes) {
        if let Err(e) = self.receive(&frame) {
            warn!("Simulated device rejected frame: {}", e);
        }
    }
}

impl Transport for SimTransport {
    fn name(&self) -> &'static str {
        "simulated"
    }

    fn send_control(&self, command: ControlCommand, param: &StimulationParam) {
        self.deliver(ControlPacket::new(command, param).encode());
    }

    fn send_pid(&self, pid: &PidParam) {
        self.deliver(PidPacket { gains: *pid }.encode());
    }

    fn attach(&self, sink: TelemetrySink) -> Result<JoinHandle<()>, TransportError> {
        if self.attached.swap(true, Ordering::SeqCst) {
            return Err(TransportError::AlreadyAttached);
        }
        let sim = self.clone();
        Ok(tokio::spawn(async move {
            info!(period_ms = sim.period.as_millis() as u64, "Simulation started");
            let mut ticker = tokio::time::interval(sim.period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut frames = FrameBuffer::new();
            loop {
                ticker.tick().await;
                frames.extend(&sim.synthesize());
                if !forward(&mut frames, &sink) {
                    break;
                }
            }
            sim.attached.store(false, Ordering::SeqCst);
            info!("Simulation stopped");
        }))
    }
}
