use std::process::{Command, Output};

use anyhow::{bail, Context as _};
use tracing::debug;

use crate::{parse::parse_devices, DeviceNotFound, Transport};

const ADB_PROGRAM: &str = "adb";

/// Address of a running adb server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdbServer {
    host: String,
    port: u16,
}

impl AdbServer {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    fn command(&self) -> Command {
        let mut command = Command::new(ADB_PROGRAM);
        command
            .arg("-H")
            .arg(&self.host)
            .arg("-P")
            .arg(self.port.to_string());
        command
    }

    fn run(&self, serial: Option<&str>, args: &[&str]) -> anyhow::Result<Output> {
        let mut command = self.command();
        if let Some(serial) = serial {
            command.arg("-s").arg(serial);
        }
        let output = command
            .args(args)
            .output()
            .with_context(|| format!("failed to execute command: adb {:?}", args))?;
        if !output.status.success() {
            bail!(
                "adb {:?} failed with status {:?}: {}",
                args,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim(),
            );
        }
        Ok(output)
    }

    /// Serials of all devices attached to the server.
    pub fn devices(&self) -> anyhow::Result<Vec<String>> {
        let output = self.run(None, &["devices"])?;
        Ok(parse_devices(&String::from_utf8(output.stdout)?))
    }

    /// Returns a handle to the device, failing if the server doesn't list it.
    pub fn device(&self, serial: &str) -> anyhow::Result<AdbDevice> {
        let devices = self.devices()?;
        if !devices.iter().any(|d| d == serial) {
            return Err(DeviceNotFound {
                serial: serial.into(),
                attached: devices,
            }
            .into());
        }
        Ok(AdbDevice {
            server: self.clone(),
            serial: serial.into(),
        })
    }
}

pub struct AdbDevice {
    server: AdbServer,
    serial: String,
}

impl AdbDevice {
    pub fn serial(&self) -> &str {
        &self.serial
    }
}

impl Transport for AdbDevice {
    fn shell(&self, command: &str) -> anyhow::Result<String> {
        debug!(serial = %self.serial, "shell: {command}");
        let output = self.server.run(Some(&self.serial), &["shell", command])?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn screencap(&self) -> anyhow::Result<Vec<u8>> {
        // exec-out keeps the PNG stream binary-clean.
        let output = self
            .server
            .run(Some(&self.serial), &["exec-out", "screencap", "-p"])?;
        Ok(output.stdout)
    }
}
