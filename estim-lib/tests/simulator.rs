mod common;

use common::therapy_param;
use estim_lib::config::SimConfig;
use estim_lib::constants::TELEMETRY_HEADS;
use estim_lib::error::TransportError;
use estim_lib::framing::FrameBuffer;
use estim_lib::message::{ControlPacket, Packet, Record, StatusPacket, WaveformPacket};
use estim_lib::packet::{ControlCommand, ErrorCode};
use estim_lib::param::PidParam;
use estim_lib::transport::sim::{
    SIM_IMPEDANCE_IDLE, SIM_IMPEDANCE_JITTER, SIM_IMPEDANCE_RUNNING, SIM_NOISE_MA,
};
use estim_lib::transport::{SimTransport, Telemetry, Transport};
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

fn seeded() -> SimTransport {
    common::init_tracing();
    SimTransport::new(SimConfig {
        seed: Some(7),
        ..Default::default()
    })
}

/// Run one synthesis period through the same framing path a link uses.
fn one_period(sim: &SimTransport) -> (WaveformPacket, StatusPacket) {
    let mut frames = FrameBuffer::new();
    frames.extend(&sim.synthesize());
    let waveform = match frames.next_packet(&TELEMETRY_HEADS) {
        Some(Packet::Waveform(w)) => w,
        other => panic!("expected waveform, got {:?}", other),
    };
    let status = match frames.next_packet(&TELEMETRY_HEADS) {
        Some(Packet::Status(s)) => s,
        other => panic!("expected status, got {:?}", other),
    };
    assert!(frames.is_empty());
    (waveform, status)
}

#[test]
fn test_idle_output_is_noise_only() {
    let sim = seeded();
    assert!(!sim.is_running());

    for _ in 0..40 {
        let (waveform, status) = one_period(&sim);
        assert!(
            waveform.samples.iter().all(|s| s.abs() <= SIM_NOISE_MA),
            "idle sample outside noise band: {:?}",
            waveform.samples
        );
        assert_eq!(status.real_freq, SIM_IMPEDANCE_IDLE);
        assert_eq!(status.error, ErrorCode::None);
        assert!(matches!(status.battery_pct, 95 | 96));
    }
}

#[test]
fn test_start_drives_sine_at_cached_amplitude() {
    let sim = seeded();
    sim.send_control(ControlCommand::Start, &therapy_param());
    assert!(sim.is_running());
    assert_eq!(sim.active_param(), therapy_param());

    let (waveform, status) = one_period(&sim);
    let amp = therapy_param().positive_amp_ma;
    let peak = waveform.samples.iter().fold(0.0f32, |m, s| m.max(s.abs()));
    assert!(peak <= amp + SIM_NOISE_MA);
    assert!(peak > amp * 0.9, "peak {} too low for {} mA", peak, amp);
    // phase restarts at zero on START
    assert!(waveform.samples[0].abs() <= SIM_NOISE_MA);
    assert!(
        (SIM_IMPEDANCE_RUNNING..SIM_IMPEDANCE_RUNNING + SIM_IMPEDANCE_JITTER)
            .contains(&status.real_freq)
    );
}

#[test]
fn test_stop_and_update_follow_wire_commands() {
    let sim = seeded();
    sim.send_control(ControlCommand::Start, &therapy_param());

    let mut softer = therapy_param();
    softer.positive_amp_ma = 1.0;
    sim.send_control(ControlCommand::Update, &softer);
    assert!(sim.is_running());
    assert_eq!(sim.active_param(), softer);

    sim.send_control(ControlCommand::Stop, &softer);
    assert!(!sim.is_running());
    let (_, status) = one_period(&sim);
    assert_eq!(status.real_freq, SIM_IMPEDANCE_IDLE);
}

#[test]
fn test_pid_and_raw_frames() {
    let sim = seeded();
    let pid = PidParam {
        kp: 3.0,
        ki: 0.2,
        kd: 0.01,
        integral_limit: 20.0,
    };
    sim.send_pid(&pid);
    assert_eq!(sim.active_pid(), pid);

    let mut frame = ControlPacket::start(&therapy_param()).encode().to_vec();
    frame[4] ^= 0xFF;
    assert!(sim.receive(&frame).is_err());
    assert!(!sim.is_running(), "corrupted START must be ignored");
}

/// Log sink shared with a scoped subscriber.
#[derive(Clone, Default)]
struct CapturedLog(Arc<Mutex<Vec<u8>>>);

impl CapturedLog {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for CapturedLog {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[test]
fn test_heartbeat_logged_at_info() {
    let log = CapturedLog::default();
    let writer = log.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_writer(move || writer.clone())
        .finish();

    // default period is 50 ms, so one heartbeat per 20 periods
    let sim = SimTransport::new(SimConfig {
        seed: Some(3),
        ..Default::default()
    });
    tracing::subscriber::with_default(subscriber, || {
        for _ in 0..19 {
            sim.synthesize();
        }
        assert!(!log.text().contains("[Heartbeat]"));
        sim.synthesize();
    });

    let text = log.text();
    assert!(text.contains("[Heartbeat] State: IDLE"), "log was: {}", text);
    assert!(text.contains("Imp: 20000 Ohm"), "log was: {}", text);
}

#[test]
fn test_same_seed_same_telemetry() {
    let a = seeded();
    let b = seeded();
    for _ in 0..5 {
        assert_eq!(a.synthesize(), b.synthesize());
    }
}

#[tokio::test(start_paused = true)]
async fn test_attached_simulation_streams_in_order() {
    let sim = SimTransport::new(SimConfig {
        period: Duration::from_millis(50),
        seed: Some(1),
    });
    let (tx, mut rx) = mpsc::unbounded_channel();
    let task = sim.attach(tx.clone()).unwrap();

    assert!(matches!(sim.attach(tx), Err(TransportError::AlreadyAttached)));

    for _ in 0..3 {
        assert!(matches!(rx.recv().await, Some(Telemetry::Waveform(_))));
        assert!(matches!(rx.recv().await, Some(Telemetry::Status(_))));
    }

    drop(rx);
    task.await.unwrap();

    // a finished simulation can be attached again
    let (tx, _rx) = mpsc::unbounded_channel();
    assert!(sim.attach(tx).is_ok());
}

#[test]
fn test_encoded_period_is_two_frames() {
    let sim = seeded();
    assert_eq!(
        sim.synthesize().len(),
        WaveformPacket::SIZE + StatusPacket::SIZE
    );
}
