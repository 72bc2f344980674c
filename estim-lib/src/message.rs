use crate::constants::*;
use crate::error::DecodeError;
use crate::packet::{
    self, ButtonCommand, ButtonPacketRaw, ControlCommand, ControlPacketRaw, ErrorCode, PidPacketRaw,
    StatusPacketRaw, WaveformPacketRaw,
};
use crate::param::{PidParam, StimulationParam};
use bytes::Bytes;
use num_enum::FromPrimitive;
use std::fmt;
use zerocopy::byteorder::little_endian::{F32, U16};
use zerocopy::{FromBytes, FromZeros};

/// A fixed-size record with a distinguished head byte.
pub trait Record: Sized {
    const HEAD: u8;
    const SIZE: usize;

    /// Serialize to exactly `SIZE` bytes, checksum included.
    fn encode(&self) -> Bytes;

    /// Parse exactly `SIZE` bytes, verifying head and integrity.
    fn decode(bytes: &[u8]) -> Result<Self, DecodeError>;
}

/// Host -> device stimulation command.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlPacket {
    pub command: ControlCommand,
    pub param: StimulationParam,
    /// Dead time between cycles; 0 lets the device compute it
    pub dead_cycle_us: u16,
}

impl ControlPacket {
    /// Build a command for `param`. STOP carries no parameters.
    pub fn new(command: ControlCommand, param: &StimulationParam) -> Self {
        let param = match command {
            ControlCommand::Stop => StimulationParam::default(),
            _ => *param,
        };
        Self {
            command,
            param,
            dead_cycle_us: 0,
        }
    }

    pub fn start(param: &StimulationParam) -> Self {
        Self::new(ControlCommand::Start, param)
    }

    pub fn stop() -> Self {
        Self::new(ControlCommand::Stop, &StimulationParam::default())
    }

    pub fn update(param: &StimulationParam) -> Self {
        Self::new(ControlCommand::Update, param)
    }
}

impl Record for ControlPacket {
    const HEAD: u8 = HEAD_CONTROL;
    const SIZE: usize = CONTROL_PACKET_SIZE;

    fn encode(&self) -> Bytes {
        let raw = ControlPacketRaw {
            head: Self::HEAD,
            cmd: self.command.into(),
            freq: U16::new(self.param.frequency_hz),
            positive_width: U16::new(self.param.positive_width_us),
            negative_width: U16::new(self.param.negative_width_us),
            dead_pulse: U16::new(self.param.dead_time_us),
            dead_cycle: U16::new(self.dead_cycle_us),
            amp_pos: F32::new(self.param.positive_amp_ma),
            amp_neg: F32::new(self.param.negative_amp_ma),
            checksum: 0,
        };
        Bytes::from(packet::seal(&raw))
    }

    fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let raw: ControlPacketRaw = packet::open(bytes, Self::HEAD)?;
        Ok(Self {
            command: ControlCommand::from_primitive(raw.cmd),
            param: StimulationParam {
                frequency_hz: raw.freq.get(),
                positive_width_us: raw.positive_width.get(),
                negative_width_us: raw.negative_width.get(),
                dead_time_us: raw.dead_pulse.get(),
                positive_amp_ma: raw.amp_pos.get(),
                negative_amp_ma: raw.amp_neg.get(),
            },
            dead_cycle_us: raw.dead_cycle.get(),
        })
    }
}

/// Host -> device regulator gains.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PidPacket {
    pub gains: PidParam,
}

impl Record for PidPacket {
    const HEAD: u8 = HEAD_PID;
    const SIZE: usize = PID_PACKET_SIZE;

    fn encode(&self) -> Bytes {
        let raw = PidPacketRaw {
            head: Self::HEAD,
            reserved: 0,
            kp: F32::new(self.gains.kp),
            ki: F32::new(self.gains.ki),
            kd: F32::new(self.gains.kd),
            integ_limit: F32::new(self.gains.integral_limit),
            checksum: 0,
        };
        Bytes::from(packet::seal(&raw))
    }

    fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let raw: PidPacketRaw = packet::open(bytes, Self::HEAD)?;
        Ok(Self {
            gains: PidParam {
                kp: raw.kp.get(),
                ki: raw.ki.get(),
                kd: raw.kd.get(),
                integral_limit: raw.integ_limit.get(),
            },
        })
    }
}

/// Device -> host batch of ADC samples.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WaveformPacket {
    pub samples: [f32; WAVEFORM_BATCH_SIZE],
}

impl WaveformPacket {
    pub fn new(samples: [f32; WAVEFORM_BATCH_SIZE]) -> Self {
        Self { samples }
    }
}

impl Record for WaveformPacket {
    const HEAD: u8 = HEAD_WAVEFORM;
    const SIZE: usize = WAVEFORM_PACKET_SIZE;

    fn encode(&self) -> Bytes {
        let mut raw = WaveformPacketRaw::new_zeroed();
        raw.head = Self::HEAD;
        for (slot, sample) in raw.adc_batch.iter_mut().zip(self.samples) {
            *slot = F32::new(sample);
        }
        Bytes::from(packet::seal(&raw))
    }

    fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let raw: WaveformPacketRaw = packet::open(bytes, Self::HEAD)?;
        Ok(Self {
            samples: raw.adc_batch.map(|s| s.get()),
        })
    }
}

/// Device -> host low-rate status.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StatusPacket {
    pub battery_pct: u8,
    /// Stimulation frequency as measured by the device timer
    pub real_freq: u16,
    pub error: ErrorCode,
}

impl Record for StatusPacket {
    const HEAD: u8 = HEAD_STATUS;
    const SIZE: usize = STATUS_PACKET_SIZE;

    fn encode(&self) -> Bytes {
        let raw = StatusPacketRaw {
            head: Self::HEAD,
            battery_pct: self.battery_pct,
            real_freq: U16::new(self.real_freq),
            error_code: self.error.into(),
            checksum: 0,
        };
        Bytes::from(packet::seal(&raw))
    }

    fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let raw: StatusPacketRaw = packet::open(bytes, Self::HEAD)?;
        Ok(Self {
            battery_pct: raw.battery_pct,
            real_freq: raw.real_freq.get(),
            error: ErrorCode::from_primitive(raw.error_code),
        })
    }
}

impl fmt::Display for StatusPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Battery: {}%, Freq: {} Hz, Error: {}",
            self.battery_pct, self.real_freq, self.error
        )
    }
}

/// Frame on the auxiliary button link. The tail byte, not a checksum,
/// guards this frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ButtonPacket {
    pub command: ButtonCommand,
}

impl Record for ButtonPacket {
    const HEAD: u8 = BUTTON_FRAME_HEAD;
    const SIZE: usize = BUTTON_PACKET_SIZE;

    fn encode(&self) -> Bytes {
        Bytes::copy_from_slice(&[Self::HEAD, self.command.into(), BUTTON_FRAME_TAIL])
    }

    fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let head = *bytes.first().ok_or(DecodeError::InvalidLength {
            expected: Self::SIZE,
            actual: 0,
        })?;
        if head != Self::HEAD {
            return Err(DecodeError::UnknownHead(head));
        }
        let raw = ButtonPacketRaw::read_from_bytes(bytes).map_err(|_| DecodeError::InvalidLength {
            expected: Self::SIZE,
            actual: bytes.len(),
        })?;
        if raw.tail != BUTTON_FRAME_TAIL {
            return Err(DecodeError::BadTail(raw.tail));
        }
        Ok(Self {
            command: ButtonCommand::from_primitive(raw.cmd),
        })
    }
}

/// Any record that can appear on the main link.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Control(ControlPacket),
    Pid(PidPacket),
    Waveform(WaveformPacket),
    Status(StatusPacket),
}

impl Packet {
    pub fn head(&self) -> u8 {
        match self {
            Packet::Control(_) => ControlPacket::HEAD,
            Packet::Pid(_) => PidPacket::HEAD,
            Packet::Waveform(_) => WaveformPacket::HEAD,
            Packet::Status(_) => StatusPacket::HEAD,
        }
    }

    pub fn encode(&self) -> Bytes {
        match self {
            Packet::Control(p) => p.encode(),
            Packet::Pid(p) => p.encode(),
            Packet::Waveform(p) => p.encode(),
            Packet::Status(p) => p.encode(),
        }
    }

    /// Decode one record, dispatching on its lead byte.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let head = *bytes.first().ok_or(DecodeError::InvalidLength {
            expected: STATUS_PACKET_SIZE,
            actual: 0,
        })?;
        match head {
            HEAD_CONTROL => ControlPacket::decode(bytes).map(Packet::Control),
            HEAD_PID => PidPacket::decode(bytes).map(Packet::Pid),
            HEAD_WAVEFORM => WaveformPacket::decode(bytes).map(Packet::Waveform),
            HEAD_STATUS => StatusPacket::decode(bytes).map(Packet::Status),
            other => Err(DecodeError::UnknownHead(other)),
        }
    }
}

impl From<ControlPacket> for Packet {
    fn from(p: ControlPacket) -> Self {
        Packet::Control(p)
    }
}

impl From<PidPacket> for Packet {
    fn from(p: PidPacket) -> Self {
        Packet::Pid(p)
    }
}

impl From<WaveformPacket> for Packet {
    fn from(p: WaveformPacket) -> Self {
        Packet::Waveform(p)
    }
}

impl From<StatusPacket> for Packet {
    fn from(p: StatusPacket) -> Self {
        Packet::Status(p)
    }
}
