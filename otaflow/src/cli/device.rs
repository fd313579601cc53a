/*
 * SPDX-FileCopyrightText: 2026 otaflow contributors
 * SPDX-License-Identifier: GPL-3.0-only
 */

use std::{path::Path, sync::atomic::AtomicBool, time::Duration};

use anyhow::{Result, bail};
use clap::Parser;

use crate::{
    adb::{self, ConnectionState, DeviceBridge},
    cli::{status, warning},
    config::Config,
    download::BasicProgressDisplay,
};

pub fn device_main(
    cli: &DeviceCli,
    config: &Config,
    work_dir: &Path,
    cancel_signal: &AtomicBool,
) -> Result<()> {
    let bridge = DeviceBridge::new(&config.tools.adb);
    let state = bridge.check_connection()?;

    match &state {
        ConnectionState::Ready { .. } => status!("{state}"),
        ConnectionState::NotInstalled if cli.install_tools => {
            warning!("{state}");

            let mut display = BasicProgressDisplay::new(Duration::from_millis(50));
            let tools_dir = adb::install_platform_tools(work_dir, &mut display, cancel_signal)?;

            status!("Extracted platform-tools to {tools_dir:?}");
            status!("Add this directory to PATH or set tools.adb in the config file");
        }
        ConnectionState::NotInstalled => {
            bail!("{state}. Rerun with --install-tools to download platform-tools");
        }
        _ => bail!("{state}"),
    }

    Ok(())
}

/// Check the connection to a device over ADB.
///
/// This verifies that ADB is installed, that a device is connected and
/// authorized, and that USB debugging is enabled.
#[derive(Debug, Parser)]
pub struct DeviceCli {
    /// Download Android platform-tools if ADB is not installed.
    #[arg(long)]
    pub install_tools: bool,
}
