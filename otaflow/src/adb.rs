/*
 * SPDX-FileCopyrightText: 2026 otaflow contributors
 * SPDX-License-Identifier: GPL-3.0-only
 */

//! Thin wrapper around the `adb` command line. Output is human readable text,
//! so only substring checks are done on it.

use std::{
    fmt,
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
    process::Command,
    sync::atomic::AtomicBool,
};

use anyhow::{Context, Result, anyhow};
use tempfile::NamedTempFile;
use tracing::{debug, info};
use zip::ZipArchive;

use crate::{
    download::{self, ProgressDisplay},
    tool::{self, Invocation},
};

const PLATFORM_TOOLS_BASE_URL: &str = "https://dl.google.com/android/repository";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    NotInstalled,
    NoDevice,
    Unauthorized,
    NotDebugging,
    Ready { model: String },
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotInstalled => f.write_str("ADB is not installed"),
            Self::NoDevice => f.write_str("No device found"),
            Self::Unauthorized => f.write_str("Device is not authorized. Please check your device"),
            Self::NotDebugging => {
                f.write_str("Device is not in USB debugging mode. Please enable it")
            }
            Self::Ready { model } => write!(f, "ADB connection is OK: {model}"),
        }
    }
}

/// States of the devices listed in `adb devices` output, eg. `device`,
/// `unauthorized`, or `offline`. Anything before the `List of devices attached`
/// header is skipped.
pub fn listed_states(devices_output: &str) -> impl Iterator<Item = &str> {
    devices_output
        .lines()
        .skip_while(|l| !l.starts_with("List of devices"))
        .skip(1)
        .filter(|l| !l.starts_with('*'))
        .filter_map(|l| {
            let mut fields = l.split_whitespace();
            fields.next()?;
            fields.next()
        })
}

/// Whether `adb devices` lists any device, authorized or not.
pub fn has_listed_device(devices_output: &str) -> bool {
    listed_states(devices_output).next().is_some()
}

pub fn is_unauthorized(output: &str) -> bool {
    output.contains("device unauthorized")
}

/// Whether a `sys.usb.state` value indicates USB debugging. Devices report a
/// comma-separated list of USB functions, where `adb` means debugging is on.
pub fn is_debugging(usb_state: &str) -> bool {
    usb_state.contains("debugging") || usb_state.trim().split(',').any(|f| f == "adb")
}

/// State implied by the device list alone. Returns [`None`] if a device is
/// ready to be queried.
fn classify_devices(devices_output: &str) -> Option<ConnectionState> {
    let mut unauthorized = false;

    for state in listed_states(devices_output) {
        match state {
            "device" => return None,
            "unauthorized" => unauthorized = true,
            // Offline or recovery devices can't be queried with getprop.
            _ => {}
        }
    }

    if unauthorized {
        Some(ConnectionState::Unauthorized)
    } else {
        Some(ConnectionState::NoDevice)
    }
}

/// Derive the connection state from the textual output of the individual
/// queries. Each query is only consulted if the previous check passed.
pub fn classify_connection(
    devices_output: &str,
    model_output: &str,
    usb_state_output: &str,
) -> ConnectionState {
    if let Some(state) = classify_devices(devices_output) {
        state
    } else if is_unauthorized(model_output) {
        ConnectionState::Unauthorized
    } else if !is_debugging(usb_state_output) {
        ConnectionState::NotDebugging
    } else {
        ConnectionState::Ready {
            model: model_output.trim().to_owned(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct DeviceBridge {
    program: PathBuf,
}

impl DeviceBridge {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Run adb and return stdout and stderr combined. adb reports errors such
    /// as `device unauthorized` on stderr.
    fn query(&self, args: &[&str]) -> Result<(bool, String), tool::Error> {
        let invocation = Invocation::new(&self.program).args(args);
        debug!("Running: {invocation}");

        let output = Command::new(&self.program)
            .args(args)
            .output()
            .map_err(|e| tool::Error::Spawn(invocation.to_string(), e))?;

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));

        Ok((output.status.success(), text))
    }

    pub fn is_installed(&self) -> bool {
        matches!(self.query(&["version"]), Ok((true, _)))
    }

    pub fn devices(&self) -> Result<String, tool::Error> {
        self.query(&["devices"]).map(|(_, text)| text)
    }

    pub fn getprop(&self, key: &str) -> Result<String, tool::Error> {
        self.query(&["shell", "getprop", key]).map(|(_, text)| text)
    }

    pub fn check_connection(&self) -> Result<ConnectionState, tool::Error> {
        if !self.is_installed() {
            return Ok(ConnectionState::NotInstalled);
        }

        let devices = self.devices()?;
        if let Some(state) = classify_devices(&devices) {
            return Ok(state);
        }

        let model = self.getprop("ro.product.model")?;
        let usb_state = self.getprop("sys.usb.state")?;

        Ok(classify_connection(&devices, &model, &usb_state))
    }
}

/// Download URL of the platform-tools package for the host OS.
pub fn platform_tools_url() -> Option<String> {
    let os = if cfg!(target_os = "windows") {
        "windows"
    } else if cfg!(target_os = "linux") {
        "linux"
    } else if cfg!(target_os = "macos") {
        "darwin"
    } else {
        return None;
    };

    Some(format!(
        "{PLATFORM_TOOLS_BASE_URL}/platform-tools-latest-{os}.zip"
    ))
}

/// Extract a platform-tools zip into `directory`. The archive contains a
/// top-level `platform-tools/` directory. Returns the path to it.
pub fn extract_platform_tools(archive: &Path, directory: &Path) -> Result<PathBuf> {
    let file = File::open(archive).with_context(|| format!("Failed to open: {archive:?}"))?;
    let mut zip = ZipArchive::new(BufReader::new(file))
        .with_context(|| format!("Failed to read zip: {archive:?}"))?;

    zip.extract(directory)
        .with_context(|| format!("Failed to extract {archive:?} to {directory:?}"))?;

    let tools_dir = directory.join("platform-tools");
    if !tools_dir.is_dir() {
        return Err(anyhow!("Archive did not contain platform-tools: {archive:?}"));
    }

    Ok(tools_dir)
}

/// Download and extract the platform-tools package into `directory`.
pub fn install_platform_tools(
    directory: &Path,
    display: &mut dyn ProgressDisplay,
    cancel_signal: &AtomicBool,
) -> Result<PathBuf> {
    let url = platform_tools_url().ok_or_else(|| anyhow!("Unsupported host OS"))?;

    std::fs::create_dir_all(directory)
        .with_context(|| format!("Failed to create directory: {directory:?}"))?;

    let temp = NamedTempFile::new_in(directory)
        .with_context(|| format!("Failed to create temp file in: {directory:?}"))?;

    info!("Downloading {url}");
    download::download_file(&url, temp.path(), display, cancel_signal)?;

    extract_platform_tools(temp.path(), directory)
}
