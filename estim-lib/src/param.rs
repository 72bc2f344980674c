use crate::error::ParamError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Waveform-shaping values sent to the device with every START.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct StimulationParam {
    pub frequency_hz: u16,
    pub positive_width_us: u16,
    pub negative_width_us: u16,
    /// Dead time between the positive and negative phase
    pub dead_time_us: u16,
    pub positive_amp_ma: f32,
    pub negative_amp_ma: f32,
}

impl StimulationParam {
    /// Check the amplitude fields before they are put on the wire.
    ///
    /// The frame format accepts any float, so this is the only place where a
    /// NaN or negative amplitude gets caught.
    pub fn validate(&self) -> Result<(), ParamError> {
        check_amplitude("positive_amp_ma", self.positive_amp_ma)?;
        check_amplitude("negative_amp_ma", self.negative_amp_ma)
    }
}

fn check_amplitude(field: &'static str, value: f32) -> Result<(), ParamError> {
    if !value.is_finite() {
        return Err(ParamError::NotFinite { field, value });
    }
    if value < 0.0 {
        return Err(ParamError::Negative { field, value });
    }
    Ok(())
}

impl fmt::Display for StimulationParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} Hz, +{:.2} mA/{} us, -{:.2} mA/{} us, dead {} us",
            self.frequency_hz,
            self.positive_amp_ma,
            self.positive_width_us,
            self.negative_amp_ma,
            self.negative_width_us,
            self.dead_time_us
        )
    }
}

/// Gains for the current regulator running on the microcontroller.
/// The host only transports them.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PidParam {
    pub kp: f32,
    pub ki: f32,
    pub kd: f32,
    /// Integral clamp
    pub integral_limit: f32,
}

impl fmt::Display for PidParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Kp: {}, Ki: {}, Kd: {}, Limit: {}",
            self.kp, self.ki, self.kd, self.integral_limit
        )
    }
}
