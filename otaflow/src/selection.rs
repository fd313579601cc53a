/*
 * SPDX-FileCopyrightText: 2026 otaflow contributors
 * SPDX-License-Identifier: GPL-3.0-only
 */

use std::{fmt, str::FromStr};

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("Unknown build type: {0:?}")]
    UnknownBuildType(String),
    #[error("Unknown device: {0:?}")]
    UnknownDevice(String),
    #[error("Build number has no '.' separator: {0:?}")]
    MissingSeparator(String),
    #[error("Build number has an empty version component: {0:?}")]
    EmptyVersion(String),
    #[error("Build number has an empty ID component: {0:?}")]
    EmptyId(String),
    #[error("Build number contains invalid character {1:?}: {0:?}")]
    InvalidCharacter(String, char),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BuildType {
    Aosp,
    Pixel,
    Graphene,
    DownloadOta,
}

impl BuildType {
    pub const ALL: [Self; 4] = [Self::Aosp, Self::Pixel, Self::Graphene, Self::DownloadOta];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Aosp => "aosp",
            Self::Pixel => "pixel",
            Self::Graphene => "graphene",
            Self::DownloadOta => "download_ota",
        }
    }
}

impl fmt::Display for BuildType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BuildType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s.trim())
            .ok_or_else(|| Error::UnknownBuildType(s.to_owned()))
    }
}

/// Supported device codenames. The list is independent of the build type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Device {
    Cheetah,
    Panther,
    Bluejay,
    Raven,
    Oriole,
    Barbet,
    Redfin,
    Bramble,
    Sunfish,
    Coral,
    Flame,
}

impl Device {
    pub const ALL: [Self; 11] = [
        Self::Cheetah,
        Self::Panther,
        Self::Bluejay,
        Self::Raven,
        Self::Oriole,
        Self::Barbet,
        Self::Redfin,
        Self::Bramble,
        Self::Sunfish,
        Self::Coral,
        Self::Flame,
    ];

    pub fn codename(self) -> &'static str {
        match self {
            Self::Cheetah => "cheetah",
            Self::Panther => "panther",
            Self::Bluejay => "bluejay",
            Self::Raven => "raven",
            Self::Oriole => "oriole",
            Self::Barbet => "barbet",
            Self::Redfin => "redfin",
            Self::Bramble => "bramble",
            Self::Sunfish => "sunfish",
            Self::Coral => "coral",
            Self::Flame => "flame",
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.codename())
    }
}

impl FromStr for Device {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|d| d.codename() == s.trim())
            .ok_or_else(|| Error::UnknownDevice(s.to_owned()))
    }
}

/// A build number such as `TQ2A.230505.002.2023050500`, split on the first
/// `.` into an uppercased version and the remaining ID.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BuildNumber {
    pub version: String,
    pub id: String,
}

impl FromStr for BuildNumber {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();

        // Both components become path components.
        if let Some(c) = trimmed
            .chars()
            .find(|c| matches!(c, '/' | '\\') || c.is_whitespace() || c.is_control())
        {
            return Err(Error::InvalidCharacter(trimmed.to_owned(), c));
        }

        let (version, id) = trimmed
            .split_once('.')
            .ok_or_else(|| Error::MissingSeparator(trimmed.to_owned()))?;

        if version.is_empty() {
            return Err(Error::EmptyVersion(trimmed.to_owned()));
        } else if id.is_empty() || id.chars().all(|c| c == '.') {
            return Err(Error::EmptyId(trimmed.to_owned()));
        }

        Ok(Self {
            version: version.to_uppercase(),
            id: id.to_owned(),
        })
    }
}

/// A fully resolved selection. This uniquely identifies an OTA in the store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BuildSelection {
    pub build_type: BuildType,
    pub device: Device,
    pub version: String,
    pub id: String,
}

impl BuildSelection {
    pub fn new(build_type: BuildType, device: Device, build: BuildNumber) -> Self {
        Self {
            build_type,
            device,
            version: build.version,
            id: build.id,
        }
    }
}
