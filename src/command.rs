use coolbox_peripherals::cycle::{FanSpeed, OperatingMode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A control command as it arrives from a remote caller.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ControlRequest {
    pub mode: Option<String>,
    pub fan_speed: Option<String>,
}

#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum CommandError {
    #[error("Invalid mode selected")]
    Mode,
    #[error("Invalid fan speed {0}")]
    FanSpeed(String),
}

impl ControlRequest {
    pub fn new(mode: &str, fan_speed: Option<&str>) -> ControlRequest {
        ControlRequest {
            mode: Some(mode.to_string()),
            fan_speed: fan_speed.map(str::to_string),
        }
    }

    pub fn into_mode(self) -> Result<OperatingMode, CommandError> {
        let mode = self.mode.ok_or(CommandError::Mode)?;
        let with_compressor = if mode == "off" {
            return Ok(OperatingMode::Off);
        } else if mode.contains("fan_only") {
            false
        } else if mode.contains("with_compressor") {
            true
        } else {
            return Err(CommandError::Mode);
        };

        let fan_speed = match self.fan_speed {
            Some(speed) => speed
                .parse::<FanSpeed>()
                .map_err(|_| CommandError::FanSpeed(speed))?,
            None => FanSpeed::default(),
        };

        Ok(if with_compressor {
            OperatingMode::WithCompressor(fan_speed)
        } else {
            OperatingMode::FanOnly(fan_speed)
        })
    }
}

/// Acknowledgement text for an accepted mode.
pub fn accepted_message(mode: OperatingMode) -> &'static str {
    match mode {
        OperatingMode::Off => "AC turned off",
        OperatingMode::FanOnly(_) => "Fan mode activated",
        OperatingMode::WithCompressor(_) => "Compressor cycle started",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn off_ignores_fan_speed() {
        assert_eq!(
            ControlRequest::new("off", Some("warp")).into_mode(),
            Ok(OperatingMode::Off)
        );
    }

    #[test]
    fn modes_match_by_substring() {
        assert_eq!(
            ControlRequest::new("cool_fan_only", Some("high")).into_mode(),
            Ok(OperatingMode::FanOnly(FanSpeed::High))
        );
        assert_eq!(
            ControlRequest::new("with_compressor", Some("medium")).into_mode(),
            Ok(OperatingMode::WithCompressor(FanSpeed::Medium))
        );
    }

    #[test]
    fn fan_speed_defaults_to_low() {
        assert_eq!(
            ControlRequest::new("fan_only", None).into_mode(),
            Ok(OperatingMode::FanOnly(FanSpeed::Low))
        );
    }

    #[test]
    fn rejects_unknown_values() {
        assert_eq!(
            ControlRequest::new("heat", Some("low")).into_mode(),
            Err(CommandError::Mode)
        );
        assert_eq!(
            ControlRequest::default().into_mode(),
            Err(CommandError::Mode)
        );
        assert_eq!(
            ControlRequest::new("fan_only", Some("LOW!")).into_mode(),
            Err(CommandError::FanSpeed("LOW!".to_string()))
        );
    }

    #[test]
    fn unknown_mode_wins_over_bad_fan_speed() {
        assert_eq!(
            ControlRequest::new("heat", Some("turbo")).into_mode(),
            Err(CommandError::Mode)
        );
        assert_eq!(
            ControlRequest {
                mode: None,
                fan_speed: Some("turbo".to_string()),
            }
            .into_mode(),
            Err(CommandError::Mode)
        );
    }

    #[test]
    fn deserializes_partial_json() {
        let request: ControlRequest = serde_json::from_str(r#"{"mode":"fan_only"}"#).unwrap();
        assert_eq!(request.fan_speed, None);
        assert_eq!(
            request.into_mode(),
            Ok(OperatingMode::FanOnly(FanSpeed::Low))
        );
    }
}
