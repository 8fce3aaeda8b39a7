use anyhow::Result;
use cpal::traits::{DeviceTrait, HostTrait};
use tracing::warn;

#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub name: String,
    pub is_default_input: bool,
    pub is_default_output: bool,
    /// "48000 Hz, 2 ch, f32" for devices that can play.
    pub output_format: Option<String>,
}

pub fn list_devices() -> Result<Vec<DeviceInfo>> {
    let host = cpal::default_host();
    let default_in = host.default_input_device().and_then(|d| d.name().ok());
    let default_out = host.default_output_device().and_then(|d| d.name().ok());

    let devices = match host.devices() {
        Ok(d) => d,
        Err(e) => {
            warn!("device enumeration failed: {e}");
            return Ok(Vec::new());
        }
    };
    Ok(devices
        .map(|dev| {
            let name = dev.name().unwrap_or_else(|_| "<unknown>".to_string());
            let output_format = dev.default_output_config().ok().map(|c| {
                format!("{} Hz, {} ch, {}", c.sample_rate().0, c.channels(), c.sample_format())
            });
            DeviceInfo {
                is_default_input: default_in.as_deref() == Some(name.as_str()),
                is_default_output: default_out.as_deref() == Some(name.as_str()),
                output_format,
                name,
            }
        })
        .collect())
}

/// Pretty-print for the CLI.
pub fn print_devices() -> Result<()> {
    let list = list_devices()?;
    if list.is_empty() {
        println!("(no devices found)");
        return Ok(());
    }
    for (i, d) in list.iter().enumerate() {
        let marks = match (d.is_default_input, d.is_default_output) {
            (true, true) => "[*I *O] ",
            (true, false) => "[*I] ",
            (false, true) => "[*O] ",
            (false, false) => "",
        };
        match &d.output_format {
            Some(fmt) => println!("{marks}{i:>2}  {}  ({fmt})", d.name),
            None => println!("{marks}{i:>2}  {}", d.name),
        }
    }
    Ok(())
}
