/*
 * SPDX-FileCopyrightText: 2026 otaflow contributors
 * SPDX-License-Identifier: GPL-3.0-only
 */

use std::{fmt, fs, path::PathBuf, str::FromStr};

use anyhow::{Context, Result};
use thiserror::Error;
use tracing::info;

use crate::{
    config::Config,
    selection::BuildSelection,
    store::ArtifactStore,
    tool::{Invocation, ToolRunner},
};

/// Magisk versions newer than this need a preinit partition.
pub const MAGISK_PREINIT_THRESHOLD: f64 = 25.2;

/// Partition used for Magisk's preinit data.
pub const PREINIT_PARTITION: &str = "persist";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("Invalid Magisk version: {0:?}")]
    InvalidMagiskVersion(String),
}

/// A user-supplied Magisk version. The original string is kept because it is
/// part of the APK file name, so `25.20` and `25.2` refer to different files
/// even though they compare equal.
#[derive(Clone, Debug, PartialEq)]
pub struct MagiskVersion {
    raw: String,
    number: f64,
}

impl MagiskVersion {
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn number(&self) -> f64 {
        self.number
    }
}

impl fmt::Display for MagiskVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for MagiskVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim();

        match raw.parse::<f64>() {
            Ok(number) if number.is_finite() && number >= 0.0 => Ok(Self {
                raw: raw.to_owned(),
                number,
            }),
            _ => Err(Error::InvalidMagiskVersion(raw.to_owned())),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PatchVariant {
    Standard,
    Preinit { partition: &'static str },
}

impl PatchVariant {
    /// Strictly greater than the threshold selects the preinit variant.
    pub fn for_version(version: &MagiskVersion) -> Self {
        if version.number() > MAGISK_PREINIT_THRESHOLD {
            Self::Preinit {
                partition: PREINIT_PARTITION,
            }
        } else {
            Self::Standard
        }
    }
}

/// Builds and runs the extract and patch invocations of the OTA patcher.
pub struct PatchDispatcher<'a> {
    config: &'a Config,
    store: &'a ArtifactStore,
    runner: &'a mut dyn ToolRunner,
}

impl<'a> PatchDispatcher<'a> {
    pub fn new(
        config: &'a Config,
        store: &'a ArtifactStore,
        runner: &'a mut dyn ToolRunner,
    ) -> Self {
        Self {
            config,
            store,
            runner,
        }
    }

    fn patcher(&self) -> Result<Invocation> {
        Invocation::from_argv(&self.config.tools.patcher)
            .context("OTA patcher command line is empty")
    }

    pub fn magisk_apk(&self, version: &MagiskVersion) -> PathBuf {
        self.config.magisk_apk(version.as_str())
    }

    /// `extract --input <zip> --directory <boot dir> --boot-only`
    pub fn extract_invocation(&self, selection: &BuildSelection) -> Result<Invocation> {
        let invocation = self
            .patcher()?
            .arg("extract")
            .arg("--input")
            .arg(self.store.ota_path(selection))
            .arg("--directory")
            .arg(self.store.boot_dir(selection))
            .arg("--boot-only");

        Ok(invocation)
    }

    /// `patch --input <zip> --privkey-avb <key> --privkey-ota <key> --cert-ota
    /// <cert> [--magisk-preinit-device <partition>] --magisk <apk>`
    pub fn patch_invocation(
        &self,
        selection: &BuildSelection,
        version: &MagiskVersion,
    ) -> Result<(PatchVariant, Invocation)> {
        let keys = &self.config.keys;
        let variant = PatchVariant::for_version(version);

        let mut invocation = self
            .patcher()?
            .arg("patch")
            .arg("--input")
            .arg(self.store.ota_path(selection))
            .arg("--privkey-avb")
            .arg(&keys.avb_key)
            .arg("--privkey-ota")
            .arg(&keys.ota_key)
            .arg("--cert-ota")
            .arg(&keys.ota_cert);

        if let PatchVariant::Preinit { partition } = variant {
            invocation = invocation.arg("--magisk-preinit-device").arg(partition);
        }

        invocation = invocation.arg("--magisk").arg(self.magisk_apk(version));

        Ok((variant, invocation))
    }

    /// Extract the boot images of the selected OTA into its boot directory.
    pub fn extract_boot_images(&mut self, selection: &BuildSelection) -> Result<()> {
        let boot_dir = self.store.boot_dir(selection);
        fs::create_dir_all(&boot_dir)
            .with_context(|| format!("Failed to create directory: {boot_dir:?}"))?;

        let invocation = self.extract_invocation(selection)?;
        info!("Extracting boot images to {boot_dir:?}");

        let pipeline = [invocation];
        self.runner
            .run(&pipeline)?
            .check(&pipeline)
            .context("Failed to extract boot images")?;

        Ok(())
    }

    /// Patch the selected OTA with the given Magisk version.
    pub fn patch(
        &mut self,
        selection: &BuildSelection,
        version: &MagiskVersion,
    ) -> Result<PatchVariant> {
        let (variant, invocation) = self.patch_invocation(selection, version)?;
        info!("Patching OTA with Magisk {version} ({variant:?})");

        let pipeline = [invocation];
        self.runner
            .run(&pipeline)?
            .check(&pipeline)
            .context("Failed to patch OTA")?;

        Ok(variant)
    }
}
