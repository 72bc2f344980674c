// Protocol constants shared with the stimulator firmware

use std::time::Duration;

/// Frame head of a control packet (host -> device)
pub const HEAD_CONTROL: u8 = 0xAA;

/// Frame head of a PID configuration packet (host -> device)
pub const HEAD_PID: u8 = 0xDD;

/// Frame head of a waveform batch packet (device -> host)
pub const HEAD_WAVEFORM: u8 = 0xBB;

/// Frame head of a status packet (device -> host)
pub const HEAD_STATUS: u8 = 0xCC;

/// Heads accepted on the main link
pub const MAIN_HEADS: [u8; 4] = [HEAD_CONTROL, HEAD_PID, HEAD_WAVEFORM, HEAD_STATUS];

/// Heads the host expects to receive on the main link
pub const TELEMETRY_HEADS: [u8; 2] = [HEAD_WAVEFORM, HEAD_STATUS];

/// Number of ADC samples in one waveform packet
pub const WAVEFORM_BATCH_SIZE: usize = 50;

/// Size of a control packet: head, cmd, five u16 timings, two f32 amplitudes, checksum (21 bytes)
pub const CONTROL_PACKET_SIZE: usize = 21;

/// Size of a PID configuration packet (19 bytes)
pub const PID_PACKET_SIZE: usize = 19;

/// Size of a waveform packet: head + 50 f32 samples + checksum (202 bytes)
pub const WAVEFORM_PACKET_SIZE: usize = 1 + 4 * WAVEFORM_BATCH_SIZE + 1;

/// Size of a status packet (6 bytes)
pub const STATUS_PACKET_SIZE: usize = 6;

/// Largest record the device can send, used as the SPI poll read size
pub const MAX_TELEMETRY_SIZE: usize = WAVEFORM_PACKET_SIZE;

/// Frame head on the auxiliary button link
pub const BUTTON_FRAME_HEAD: u8 = 0x5A;

/// Frame tail on the auxiliary button link
pub const BUTTON_FRAME_TAIL: u8 = 0xA5;

/// Size of a button frame: head + command + tail (3 bytes)
pub const BUTTON_PACKET_SIZE: usize = 3;

/// Upper bound for any receive buffer; exceeding it clears the buffer
pub const MAX_BUFFER_SIZE: usize = 1024;

/// Poll period of the hardware link
pub const SPI_POLL_PERIOD: Duration = Duration::from_millis(20);

/// Default SPI clock for the hardware link
pub const SPI_DEFAULT_SPEED_HZ: u32 = 1_000_000;

/// Default SPI device node
pub const SPI_DEFAULT_DEVICE: &str = "/dev/spidev1.0";

/// Synthesis period of the simulated link
pub const SIM_PERIOD: Duration = Duration::from_millis(50);

/// Baud rate of the auxiliary button link
pub const BUTTON_BAUD_RATE: u32 = 115_200;

/// Session countdown resolution
pub const SESSION_TICK: Duration = Duration::from_secs(1);

/// Default time without a status packet before a running session is stopped
pub const DEFAULT_STATUS_TIMEOUT: Duration = Duration::from_secs(3);
