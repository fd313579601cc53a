/*
 * SPDX-FileCopyrightText: 2026 otaflow contributors
 * SPDX-License-Identifier: GPL-3.0-only
 */

//! The on-disk tree of downloaded OTAs and extracted boot images:
//!
//! ```text
//! <root>/<buildtype>/<device>/<VERSION>/<id>.zip
//! <root>/<buildtype>/<device>/<VERSION>/boot/<id>/{boot.img,init_boot.img}
//! ```
//!
//! Nothing is cached. Every query goes to the filesystem.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use walkdir::WalkDir;

use crate::selection::{BuildSelection, BuildType, Device};

/// Images that must all be present for an extraction to count as complete.
pub const BOOT_IMAGES: [&str; 2] = ["boot.img", "init_boot.img"];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TreeEntry {
    pub depth: usize,
    pub name: String,
    pub is_dir: bool,
}

#[derive(Clone, Debug)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn build_type_dir(&self, build_type: BuildType) -> PathBuf {
        self.root.join(build_type.as_str())
    }

    pub fn device_dir(&self, build_type: BuildType, device: Device) -> PathBuf {
        self.build_type_dir(build_type).join(device.codename())
    }

    pub fn version_dir(&self, selection: &BuildSelection) -> PathBuf {
        self.device_dir(selection.build_type, selection.device).join(&selection.version)
    }

    pub fn ota_path(&self, selection: &BuildSelection) -> PathBuf {
        self.version_dir(selection).join(format!("{}.zip", selection.id))
    }

    pub fn boot_dir(&self, selection: &BuildSelection) -> PathBuf {
        self.version_dir(selection).join("boot").join(&selection.id)
    }

    pub fn ota_exists(&self, selection: &BuildSelection) -> bool {
        self.ota_path(selection).is_file()
    }

    /// Partial extractions (eg. only `boot.img`) count as absent.
    pub fn boot_images_exist(&self, selection: &BuildSelection) -> bool {
        let dir = self.boot_dir(selection);

        BOOT_IMAGES.iter().all(|name| dir.join(name).is_file())
    }

    /// Build type directories present under the root.
    pub fn list_build_types(&self) -> Result<Vec<String>> {
        list_dirs(&self.root)
    }

    /// Device directories present under a build type.
    pub fn list_devices(&self, build_type: BuildType) -> Result<Vec<String>> {
        list_dirs(&self.build_type_dir(build_type))
    }

    /// Recursive listing of a device directory. The first entry is the device
    /// directory itself at depth 0. Returns [`None`] if the directory does not
    /// exist.
    pub fn version_tree(
        &self,
        build_type: BuildType,
        device: Device,
    ) -> Result<Option<Vec<TreeEntry>>> {
        let dir = self.device_dir(build_type, device);
        if !dir.is_dir() {
            return Ok(None);
        }

        let mut entries = vec![TreeEntry {
            depth: 0,
            name: device.codename().to_owned(),
            is_dir: true,
        }];

        // Files are listed before subdirectories at each level.
        let walker = WalkDir::new(&dir).min_depth(1).sort_by(|a, b| {
            let a_dir = a.file_type().is_dir();
            let b_dir = b.file_type().is_dir();

            a_dir
                .cmp(&b_dir)
                .then_with(|| a.file_name().cmp(b.file_name()))
        });

        for entry in walker {
            let entry = entry.with_context(|| format!("Failed to list directory: {dir:?}"))?;

            entries.push(TreeEntry {
                depth: entry.depth(),
                name: entry.file_name().to_string_lossy().into_owned(),
                is_dir: entry.file_type().is_dir(),
            });
        }

        Ok(Some(entries))
    }
}

/// Sorted names of the subdirectories of `path`. A missing directory is
/// treated as empty.
fn list_dirs(path: &Path) -> Result<Vec<String>> {
    let reader = match fs::read_dir(path) {
        Ok(r) => r,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(vec![]),
        Err(e) => return Err(e).with_context(|| format!("Failed to list directory: {path:?}")),
    };

    let mut names = vec![];

    for entry in reader {
        let entry = entry.with_context(|| format!("Failed to list directory: {path:?}"))?;

        if entry.path().is_dir() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }

    names.sort();

    Ok(names)
}

/// Render a tree with four spaces of indentation per level and a trailing `/`
/// on directories.
pub fn render_tree(entries: &[TreeEntry]) -> String {
    let mut result = String::new();

    for entry in entries {
        result.push_str(&" ".repeat(4 * entry.depth));
        result.push_str(&entry.name);
        if entry.is_dir {
            result.push('/');
        }
        result.push('\n');
    }

    result
}
