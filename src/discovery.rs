use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use color_eyre::eyre::WrapErr;
use color_eyre::Result;
use coolbox_peripherals::cycle::FanSpeed;
use serde::Serialize;
use strum::IntoEnumIterator;

const MODES: [&str; 3] = ["off", "fan_only", "with_compressor"];

/// Points a third-party bridge at the control and status endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct Descriptor {
    pub accessory: &'static str,
    pub name: String,
    pub control_url: String,
    pub status_url: String,
    pub schedule_url: String,
    pub modes: Vec<&'static str>,
    pub fan_speeds: Vec<String>,
}

impl Descriptor {
    pub fn new(name: &str, host: &str, port: u16) -> Descriptor {
        let base = format!("http://{}:{}/api", host, port);
        Descriptor {
            accessory: "Coolbox",
            name: name.to_string(),
            control_url: format!("{}/control", base),
            status_url: format!("{}/status", base),
            schedule_url: format!("{}/schedule", base),
            modes: MODES.to_vec(),
            fan_speeds: FanSpeed::iter().map(|speed| speed.to_string()).collect(),
        }
    }

    pub fn write_to<W: Write>(&self, mut writer: W) -> Result<()> {
        serde_json::to_writer_pretty(&mut writer, self).wrap_err("Could not serialize descriptor")?;
        writeln!(writer).wrap_err("Could not write descriptor")?;
        Ok(())
    }

    /// Writes to `output`, or stdout when no path is given.
    pub fn write(&self, output: Option<&Path>) -> Result<()> {
        match output {
            Some(path) => {
                let file = File::create(path)
                    .wrap_err_with(|| format!("Could not create {}", path.display()))?;
                self.write_to(file)?;
                info!("wrote discovery descriptor to {}", path.display());
                Ok(())
            }
            None => self.write_to(io::stdout().lock()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_points_at_api() {
        let descriptor = Descriptor::new("Bedroom", "192.168.1.20", 5000);
        let mut out = Vec::new();
        descriptor.write_to(&mut out).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(json["name"], "Bedroom");
        assert_eq!(json["control_url"], "http://192.168.1.20:5000/api/control");
        assert_eq!(json["status_url"], "http://192.168.1.20:5000/api/status");
        assert_eq!(json["fan_speeds"], serde_json::json!(["low", "medium", "high"]));
        assert_eq!(json["modes"][2], "with_compressor");
    }
}
