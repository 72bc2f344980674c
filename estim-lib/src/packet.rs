//! Wire layouts of the stimulator link.
//!
//! Every record is a packed little-endian structure whose last byte is an
//! 8-bit additive checksum over all preceding bytes. The `*Raw` structs below
//! mirror the firmware definitions byte for byte; the typed records built on
//! top of them live in [`crate::message`].

use crate::constants::*;
use crate::error::DecodeError;
use num_enum::{FromPrimitive, IntoPrimitive};
use strum_macros::Display;
use zerocopy::byteorder::little_endian::{F32, U16};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

/// Command carried by a control packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoPrimitive, FromPrimitive)]
#[repr(u8)]
pub enum ControlCommand {
    Start = 0x01,
    Stop = 0x02,
    Update = 0x03,

    #[num_enum(catch_all)]
    Unknown(u8),
}

/// Fault reported by the device in a status packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoPrimitive, FromPrimitive)]
#[repr(u8)]
pub enum ErrorCode {
    #[strum(to_string = "none")]
    None = 0x00,
    #[strum(to_string = "electrode detached")]
    ElectrodeDetached = 0x01,
    #[strum(to_string = "over current")]
    OverCurrent = 0x02,
    #[strum(to_string = "communication timeout")]
    CommTimeout = 0x03,

    #[num_enum(catch_all)]
    #[strum(to_string = "unknown")]
    Unknown(u8),
}

// num_enum rejects `#[default]` alongside `catch_all`
impl Default for ErrorCode {
    fn default() -> Self {
        ErrorCode::None
    }
}

impl ErrorCode {
    /// Any non-zero code is a fault, including codes this host does not know.
    pub fn is_fault(&self) -> bool {
        u8::from(*self) != 0
    }
}

/// Command carried by a button frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoPrimitive, FromPrimitive)]
#[repr(u8)]
pub enum ButtonCommand {
    Start = 0xBB,

    #[num_enum(catch_all)]
    Unknown(u8),
}

#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct ControlPacketRaw {
    pub head: u8,
    pub cmd: u8,
    pub freq: U16,           // Hz
    pub positive_width: U16, // us
    pub negative_width: U16, // us
    pub dead_pulse: U16,     // us, between positive and negative phase
    pub dead_cycle: U16,     // us, between cycles; 0 lets the device compute it
    pub amp_pos: F32,        // mA
    pub amp_neg: F32,        // mA
    pub checksum: u8,
}

#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct PidPacketRaw {
    pub head: u8,
    pub reserved: u8,
    pub kp: F32,
    pub ki: F32,
    pub kd: F32,
    pub integ_limit: F32,
    pub checksum: u8,
}

#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct WaveformPacketRaw {
    pub head: u8,
    pub adc_batch: [F32; WAVEFORM_BATCH_SIZE],
    pub checksum: u8,
}

#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct StatusPacketRaw {
    pub head: u8,
    pub battery_pct: u8,
    pub real_freq: U16,
    pub error_code: u8,
    pub checksum: u8,
}

#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct ButtonPacketRaw {
    pub head: u8,
    pub cmd: u8,
    pub tail: u8,
}

const _: () = assert!(size_of::<ControlPacketRaw>() == CONTROL_PACKET_SIZE);
const _: () = assert!(size_of::<PidPacketRaw>() == PID_PACKET_SIZE);
const _: () = assert!(size_of::<WaveformPacketRaw>() == WAVEFORM_PACKET_SIZE);
const _: () = assert!(size_of::<StatusPacketRaw>() == STATUS_PACKET_SIZE);
const _: () = assert!(size_of::<ButtonPacketRaw>() == BUTTON_PACKET_SIZE);

/// 8-bit sum, modulo 256, of `bytes`.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |sum, b| sum.wrapping_add(*b))
}

/// Serialize a raw record and write its checksum into the last byte.
pub(crate) fn seal<R: IntoBytes + Immutable>(raw: &R) -> Vec<u8> {
    let mut bytes = raw.as_bytes().to_vec();
    if let Some((last, body)) = bytes.split_last_mut() {
        *last = checksum(body);
    }
    bytes
}

/// Verify head, length and checksum, then reinterpret `bytes` as `R`.
pub(crate) fn open<R>(bytes: &[u8], head: u8) -> Result<R, DecodeError>
where
    R: FromBytes + KnownLayout + Immutable,
{
    let first = *bytes.first().ok_or(DecodeError::InvalidLength {
        expected: size_of::<R>(),
        actual: 0,
    })?;
    if first != head {
        return Err(DecodeError::UnknownHead(first));
    }
    if bytes.len() != size_of::<R>() {
        return Err(DecodeError::InvalidLength {
            expected: size_of::<R>(),
            actual: bytes.len(),
        });
    }
    verify_checksum(bytes)?;
    R::read_from_bytes(bytes).map_err(|_| DecodeError::InvalidLength {
        expected: size_of::<R>(),
        actual: bytes.len(),
    })
}

/// Recompute the checksum over everything but the last byte and compare.
pub fn verify_checksum(frame: &[u8]) -> Result<(), DecodeError> {
    let Some((&stored, body)) = frame.split_last() else {
        return Err(DecodeError::InvalidLength { expected: 1, actual: 0 });
    };
    let computed = checksum(body);
    if computed != stored {
        return Err(DecodeError::ChecksumMismatch {
            expected: computed,
            actual: stored,
        });
    }
    Ok(())
}

/// Fixed size of the main-link record starting with `head`.
pub fn frame_size(head: u8) -> Option<usize> {
    match head {
        HEAD_CONTROL => Some(CONTROL_PACKET_SIZE),
        HEAD_PID => Some(PID_PACKET_SIZE),
        HEAD_WAVEFORM => Some(WAVEFORM_PACKET_SIZE),
        HEAD_STATUS => Some(STATUS_PACKET_SIZE),
        _ => None,
    }
}
