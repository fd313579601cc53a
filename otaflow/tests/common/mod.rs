/*
 * SPDX-FileCopyrightText: 2026 otaflow contributors
 * SPDX-License-Identifier: GPL-3.0-only
 */

#![allow(dead_code)]

use std::{
    ffi::OsStr,
    fs,
    path::{Path, PathBuf},
};

use anyhow::Result;

use otaflow::{
    config::Config,
    download::OtaFetcher,
    store::BOOT_IMAGES,
    tool::{self, Invocation, Outcome, ToolRunner},
};

/// Config with every layout path inside `dir`.
pub fn test_config(dir: &Path) -> Config {
    Config::default().resolve(dir)
}

pub fn touch(path: &Path) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, b"").unwrap();
}

/// Runner that records every pipeline and pretends to be the real tools by
/// creating the files they would have written.
#[derive(Default)]
pub struct RecordingRunner {
    pub pipelines: Vec<Vec<Invocation>>,
    /// Subcommand or program argument that makes the run fail.
    pub fail_on: Option<String>,
    /// Skip creating output files even when the run succeeds.
    pub no_outputs: bool,
}

impl RecordingRunner {
    pub fn failing_on(arg: &str) -> Self {
        Self {
            fail_on: Some(arg.to_owned()),
            ..Default::default()
        }
    }

    pub fn invocations(&self) -> impl Iterator<Item = &Invocation> {
        self.pipelines.iter().flatten()
    }

    /// First invocation containing `arg` as an argument.
    pub fn find(&self, arg: &str) -> Option<&Invocation> {
        self.invocations()
            .find(|i| i.get_args().iter().any(|a| a == arg))
    }

    fn matches_failure(&self, invocation: &Invocation) -> bool {
        let Some(fail_on) = &self.fail_on else {
            return false;
        };

        invocation.program() == OsStr::new(fail_on)
            || invocation.get_args().iter().any(|a| a == fail_on.as_str())
    }

    fn create_outputs(invocation: &Invocation) {
        for flag in ["-out", "--output"] {
            if let Some(path) = invocation.flag_value(flag) {
                touch(Path::new(path));
            }
        }

        if invocation.get_args().iter().any(|a| a == "extract") {
            if let Some(dir) = invocation.flag_value("--directory") {
                for name in BOOT_IMAGES {
                    touch(&Path::new(dir).join(name));
                }
            }
        }
    }
}

impl ToolRunner for RecordingRunner {
    fn run(&mut self, pipeline: &[Invocation]) -> Result<Outcome, tool::Error> {
        self.pipelines.push(pipeline.to_vec());

        if pipeline.iter().any(|i| self.matches_failure(i)) {
            return Ok(Outcome::Failed {
                code: Some(1),
                stderr: "simulated failure".to_owned(),
            });
        }

        if !self.no_outputs {
            for invocation in pipeline {
                Self::create_outputs(invocation);
            }
        }

        Ok(Outcome::Success)
    }
}

/// Fetcher that writes a fixed payload instead of going to the network.
pub struct StubFetcher {
    pub payload: Vec<u8>,
    pub requests: Vec<(String, PathBuf)>,
}

impl StubFetcher {
    pub fn new(payload: &[u8]) -> Self {
        Self {
            payload: payload.to_vec(),
            requests: vec![],
        }
    }
}

impl OtaFetcher for StubFetcher {
    fn fetch(&mut self, url: &str, output: &Path) -> Result<()> {
        self.requests.push((url.to_owned(), output.to_owned()));
        fs::write(output, &self.payload)?;

        Ok(())
    }
}
