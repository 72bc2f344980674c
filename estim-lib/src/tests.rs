use crate::error::DecodeError;
use crate::message::{ButtonPacket, ControlPacket, Packet, PidPacket, Record, StatusPacket};
use crate::packet::{ButtonCommand, ControlCommand, ErrorCode};
use crate::param::{PidParam, StimulationParam};
use bytes::Bytes;

// START, 100 Hz, 200/200 us, 50 us dead time, 5 mA both phases
const CONTROL_START_HEX: &str = "aa016400c800c800320000000000a0400000a04091";
// Kp 1.0, Ki 0.5, Kd 0.0, limit 10.0
const PID_HEX: &str = "dd000000803f0000003f00000000000020413c";
const STATUS_IDLE_HEX: &str = "cc5064000080";
const STATUS_OVER_CURRENT_HEX: &str = "cc5064000282";

fn therapy_param() -> StimulationParam {
    StimulationParam {
        frequency_hz: 100,
        positive_width_us: 200,
        negative_width_us: 200,
        dead_time_us: 50,
        positive_amp_ma: 5.0,
        negative_amp_ma: 5.0,
    }
}

#[test]
fn test_encode_control_start() {
    let packet = ControlPacket::start(&therapy_param());
    assert_eq!(hex::encode(packet.encode()), CONTROL_START_HEX);
}

#[test]
fn test_parse_control_start() {
    let bytes = hex::decode(CONTROL_START_HEX).expect("Failed to decode hex");
    let packet = ControlPacket::decode(&bytes).expect("Failed to parse control packet");
    assert_eq!(packet.command, ControlCommand::Start);
    assert_eq!(packet.param, therapy_param());
    assert_eq!(packet.dead_cycle_us, 0);
}

#[test]
fn test_stop_carries_no_parameters() {
    let encoded = ControlPacket::new(ControlCommand::Stop, &therapy_param()).encode();
    assert_eq!(encoded.len(), ControlPacket::SIZE);
    assert_eq!(&encoded[..2], &[0xAA, 0x02]);
    assert!(encoded[2..20].iter().all(|b| *b == 0));
    // checksum of AA 02 followed by zeros
    assert_eq!(encoded[20], 0xAC);
}

#[test]
fn test_encode_pid() {
    let packet = PidPacket {
        gains: PidParam {
            kp: 1.0,
            ki: 0.5,
            kd: 0.0,
            integral_limit: 10.0,
        },
    };
    assert_eq!(hex::encode(packet.encode()), PID_HEX);
}

#[test]
fn test_parse_status() {
    let bytes = Bytes::from(hex::decode(STATUS_IDLE_HEX).unwrap());
    let packet = Packet::decode(&bytes).unwrap();
    assert_eq!(
        packet,
        Packet::Status(StatusPacket {
            battery_pct: 80,
            real_freq: 100,
            error: ErrorCode::None,
        })
    );
}

#[test]
fn test_parse_status_over_current() {
    let bytes = hex::decode(STATUS_OVER_CURRENT_HEX).unwrap();
    let status = StatusPacket::decode(&bytes).unwrap();
    assert_eq!(status.error, ErrorCode::OverCurrent);
    assert!(status.error.is_fault());
    assert_eq!(status.to_string(), "Battery: 80%, Freq: 100 Hz, Error: over current");
}

#[test]
fn test_parse_button_start() {
    let button = ButtonPacket::decode(&[0x5A, 0xBB, 0xA5]).unwrap();
    assert_eq!(button.command, ButtonCommand::Start);
    assert_eq!(ButtonPacket::decode(&[0x5A, 0xBB, 0x00]), Err(DecodeError::BadTail(0x00)));
}

#[test]
fn test_corrupted_checksum_byte() {
    let mut bytes = hex::decode(STATUS_IDLE_HEX).unwrap();
    bytes[5] = 0x81;
    assert_eq!(
        StatusPacket::decode(&bytes),
        Err(DecodeError::ChecksumMismatch {
            expected: 0x80,
            actual: 0x81
        })
    );
}

#[test]
fn test_truncated_frame() {
    let bytes = hex::decode(CONTROL_START_HEX).unwrap();
    assert_eq!(
        Packet::decode(&bytes[..10]),
        Err(DecodeError::InvalidLength {
            expected: 21,
            actual: 10
        })
    );
}

#[test]
fn test_unknown_head() {
    assert_eq!(Packet::decode(&[0x12, 0x00, 0x12]), Err(DecodeError::UnknownHead(0x12)));
    // the button head is not a main-link head
    assert_eq!(Packet::decode(&[0x5A, 0xBB, 0xA5]), Err(DecodeError::UnknownHead(0x5A)));
}
