/*
 * SPDX-FileCopyrightText: 2026 otaflow contributors
 * SPDX-License-Identifier: GPL-3.0-only
 */

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Locations of the signing keys and their derived artifacts.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct KeyPaths {
    pub avb_key: PathBuf,
    pub avb_pkmd: PathBuf,
    pub ota_key: PathBuf,
    pub ota_cert: PathBuf,
}

impl Default for KeyPaths {
    fn default() -> Self {
        Self {
            avb_key: PathBuf::from("keys/avb.key"),
            avb_pkmd: PathBuf::from("keys/avb_pkmd.bin"),
            ota_key: PathBuf::from("keys/ota.key"),
            ota_cert: PathBuf::from("keys/ota.crt"),
        }
    }
}

/// Command lines of the external collaborators. Multi-element entries are a
/// program followed by leading arguments, eg. `["avbroot", "ota"]` to use the
/// native avbroot binary instead of the Python script.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Tools {
    pub adb: String,
    pub openssl: String,
    pub avbtool: Vec<String>,
    pub patcher: Vec<String>,
}

impl Default for Tools {
    fn default() -> Self {
        Self {
            adb: "adb".to_owned(),
            openssl: "openssl".to_owned(),
            avbtool: vec![
                "python".to_owned(),
                "./avbroot/external/avb/avbtool.py".to_owned(),
            ],
            patcher: vec!["python".to_owned(), "./avbroot/avbroot.py".to_owned()],
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Root of the factory OTA tree.
    pub root: PathBuf,
    /// Directory containing `Magisk-v<version>.apk` files.
    pub magisk_dir: PathBuf,
    pub keys: KeyPaths,
    pub tools: Tools,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root: PathBuf::from("factory_ota"),
            magisk_dir: PathBuf::from("magisk"),
            keys: KeyPaths::default(),
            tools: Tools::default(),
        }
    }
}

impl Config {
    /// Resolve all relative layout paths against `base`. Tool command lines are
    /// left alone since they are looked up relative to the process.
    #[must_use]
    pub fn resolve(mut self, base: &Path) -> Self {
        let join = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };

        join(&mut self.root);
        join(&mut self.magisk_dir);
        join(&mut self.keys.avb_key);
        join(&mut self.keys.avb_pkmd);
        join(&mut self.keys.ota_key);
        join(&mut self.keys.ota_cert);

        self
    }

    /// Path to the Magisk APK for a user-entered version string.
    pub fn magisk_apk(&self, version: &str) -> PathBuf {
        self.magisk_dir.join(format!("Magisk-v{version}.apk"))
    }
}

/// Load the config file at `path`, or the defaults if no path is given.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let Some(path) = path else {
        return Ok(Config::default());
    };

    let contents =
        fs::read_to_string(path).with_context(|| format!("Failed to read config: {path:?}"))?;

    parse_config(&contents).with_context(|| format!("Failed to parse config: {path:?}"))
}

pub fn parse_config(contents: &str) -> Result<Config> {
    let config = toml_edit::de::from_str(contents)?;

    Ok(config)
}

pub fn to_toml(config: &Config) -> Result<String> {
    let data = toml_edit::ser::to_string_pretty(config).context("Failed to serialize config")?;

    Ok(data)
}
