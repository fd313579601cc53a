/*
 * SPDX-FileCopyrightText: 2026 otaflow contributors
 * SPDX-License-Identifier: GPL-3.0-only
 */

//! The interactive selection flow:
//!
//! ```text
//! SelectBuildType -> SelectDevice -> SelectVersion
//!     -> [Download ->] ExtractBoot -> SelectMagisk -> Dispatch
//! ```
//!
//! Invalid input at any prompt re-prompts the same step.

use std::{
    io::{BufRead, Write},
    str::FromStr,
    sync::atomic::{AtomicBool, Ordering},
};

use anyhow::{Context, Result, bail};
use tracing::debug;

use crate::{
    config::Config,
    download::{self, DownloadOutcome, OtaFetcher},
    patch::{MagiskVersion, PatchDispatcher, PatchVariant},
    selection::{BuildNumber, BuildSelection, BuildType, Device},
    store::{self, ArtifactStore},
    tool::ToolRunner,
};

const BANNER_WIDTH: usize = 50;

/// How the flow ended when it did not fail.
#[derive(Clone, Debug, PartialEq)]
pub enum FlowEnd {
    /// Both the OTA and its boot images were already present.
    AlreadyExtracted(BuildSelection),
    /// The entered download URL does not point to a known OTA host.
    InvalidUrl(BuildSelection),
    Patched {
        selection: BuildSelection,
        magisk: MagiskVersion,
        variant: PatchVariant,
    },
}

#[derive(Clone, Debug)]
enum Step {
    SelectBuildType,
    SelectDevice(BuildType),
    SelectVersion(BuildType, Device),
    Download(BuildSelection),
    ExtractBoot(BuildSelection),
    SelectMagisk(BuildSelection),
    Dispatch(BuildSelection, MagiskVersion),
}

/// Current selection shown at the top of every screen.
#[derive(Default)]
struct Banner<'a> {
    build_type: Option<BuildType>,
    device: Option<Device>,
    version: &'a str,
    id: &'a str,
    magisk: &'a str,
}

impl<'a> Banner<'a> {
    fn from_selection(selection: &'a BuildSelection) -> Self {
        Self {
            build_type: Some(selection.build_type),
            device: Some(selection.device),
            version: &selection.version,
            id: &selection.id,
            magisk: "",
        }
    }

    fn render(&self) -> String {
        let separator = "#".repeat(BANNER_WIDTH);
        let build_type = self.build_type.map(|t| t.as_str()).unwrap_or_default();
        let device = self.device.map(|d| d.codename()).unwrap_or_default();

        format!(
            " \n{separator}\n  \n\
             BUILDTYPE : {build_type}\n\
             DEVICE : {device}\n\
             VERSION: {}\n\
             ID: {}\n\
             MAGISK: {}\n \n\
             {separator}\n  \n",
            self.version, self.id, self.magisk,
        )
    }
}

pub struct Menu<'a> {
    config: &'a Config,
    store: ArtifactStore,
    input: &'a mut dyn BufRead,
    output: &'a mut dyn Write,
    runner: &'a mut dyn ToolRunner,
    fetcher: &'a mut dyn OtaFetcher,
    cancel_signal: &'a AtomicBool,
    clear_screen: bool,
}

impl<'a> Menu<'a> {
    pub fn new(
        config: &'a Config,
        input: &'a mut dyn BufRead,
        output: &'a mut dyn Write,
        runner: &'a mut dyn ToolRunner,
        fetcher: &'a mut dyn OtaFetcher,
        cancel_signal: &'a AtomicBool,
    ) -> Self {
        Self {
            config,
            store: ArtifactStore::new(&config.root),
            input,
            output,
            runner,
            fetcher,
            cancel_signal,
            clear_screen: false,
        }
    }

    /// Clear the terminal before each screen.
    #[must_use]
    pub fn with_clear_screen(mut self, clear_screen: bool) -> Self {
        self.clear_screen = clear_screen;
        self
    }

    pub fn run(&mut self) -> Result<FlowEnd> {
        let mut step = Step::SelectBuildType;

        loop {
            debug!("Menu step: {step:?}");

            step = match step {
                Step::SelectBuildType => Step::SelectDevice(self.select_build_type()?),
                Step::SelectDevice(build_type) => {
                    Step::SelectVersion(build_type, self.select_device(build_type)?)
                }
                Step::SelectVersion(build_type, device) => {
                    let build = self.select_version(build_type, device)?;
                    let selection = BuildSelection::new(build_type, device, build);

                    if !self.store.ota_exists(&selection) {
                        Step::Download(selection)
                    } else if self.store.boot_images_exist(&selection) {
                        writeln!(self.output, "Boot image already extracted.")?;
                        return Ok(FlowEnd::AlreadyExtracted(selection));
                    } else {
                        Step::ExtractBoot(selection)
                    }
                }
                Step::Download(selection) => match self.download(&selection)? {
                    DownloadOutcome::InvalidUrl => {
                        writeln!(
                            self.output,
                            "Invalid URL. Please provide a valid OTA update URL from the website."
                        )?;
                        return Ok(FlowEnd::InvalidUrl(selection));
                    }
                    DownloadOutcome::AlreadyPresent(path) => {
                        writeln!(self.output, "OTA update already present at {path:?}")?;
                        Step::ExtractBoot(selection)
                    }
                    DownloadOutcome::Downloaded { ota, .. } => {
                        writeln!(self.output, "OTA update downloaded and copied to {ota:?}")?;
                        Step::ExtractBoot(selection)
                    }
                },
                Step::ExtractBoot(selection) => {
                    self.show_screen(&Banner::from_selection(&selection))?;
                    self.dispatcher().extract_boot_images(&selection)?;
                    Step::SelectMagisk(selection)
                }
                Step::SelectMagisk(selection) => {
                    let magisk = self.select_magisk(&selection)?;
                    Step::Dispatch(selection, magisk)
                }
                Step::Dispatch(selection, magisk) => {
                    let variant = self.dispatcher().patch(&selection, &magisk)?;
                    writeln!(self.output, "Patched OTA with Magisk {magisk}.")?;

                    return Ok(FlowEnd::Patched {
                        selection,
                        magisk,
                        variant,
                    });
                }
            };
        }
    }

    fn dispatcher(&mut self) -> PatchDispatcher<'_> {
        PatchDispatcher::new(self.config, &self.store, &mut *self.runner)
    }

    fn check_cancel(&self) -> Result<()> {
        if self.cancel_signal.load(Ordering::SeqCst) {
            bail!("Received cancel signal");
        }

        Ok(())
    }

    fn show_screen(&mut self, banner: &Banner<'_>) -> Result<()> {
        if self.clear_screen {
            write!(self.output, "\x1b[2J\x1b[H")?;
        }
        write!(self.output, "{}", banner.render())?;

        Ok(())
    }

    /// Print `message` and read one line. End of input is an error so that a
    /// closed stdin cannot cause an endless re-prompt loop.
    fn prompt(&mut self, message: &str) -> Result<String> {
        self.check_cancel()?;

        write!(self.output, "{message}")?;
        self.output.flush()?;

        let mut line = String::new();
        let n = self
            .input
            .read_line(&mut line)
            .context("Failed to read from standard input")?;

        self.check_cancel()?;

        if n == 0 {
            bail!("Standard input was closed");
        }

        Ok(line.trim().to_owned())
    }

    /// Prompt until the input parses as `T`.
    fn prompt_parse<T>(&mut self, message: &str) -> Result<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        loop {
            let line = self.prompt(message)?;

            match line.parse() {
                Ok(value) => return Ok(value),
                Err(e) => writeln!(self.output, "{e}")?,
            }
        }
    }

    fn select_build_type(&mut self) -> Result<BuildType> {
        self.show_screen(&Banner::default())?;

        let available = self.store.list_build_types()?;
        writeln!(self.output, "Available build types in {:?}:", self.store.root())?;
        for name in available {
            writeln!(self.output, "- {name}")?;
        }

        self.prompt_parse("Please enter the buildtype(aosp, pixel, graphene, download_ota): ")
    }

    fn select_device(&mut self, build_type: BuildType) -> Result<Device> {
        self.show_screen(&Banner {
            build_type: Some(build_type),
            ..Default::default()
        })?;

        if self.store.build_type_dir(build_type).is_dir() {
            writeln!(self.output, "Available devices for {build_type}:")?;
            for name in self.store.list_devices(build_type)? {
                writeln!(self.output, "- {name}")?;
            }
        } else {
            writeln!(self.output, "No directory found for build type {build_type}")?;
        }

        self.prompt_parse("Please enter the device(cheetah, raven, ...): ")
    }

    fn select_version(&mut self, build_type: BuildType, device: Device) -> Result<BuildNumber> {
        self.show_screen(&Banner {
            build_type: Some(build_type),
            device: Some(device),
            ..Default::default()
        })?;

        match self.store.version_tree(build_type, device)? {
            Some(entries) => {
                let dir = self.store.device_dir(build_type, device);
                writeln!(self.output, "Version directory found: {dir:?}")?;
                write!(self.output, "{}", store::render_tree(&entries))?;
            }
            None => writeln!(
                self.output,
                "No directory found for {device} for build type {build_type}"
            )?,
        }

        self.prompt_parse("Please enter the build-number(TQ2A.230505.002.2023050500, ...): ")
    }

    fn download(&mut self, selection: &BuildSelection) -> Result<DownloadOutcome> {
        self.show_screen(&Banner::from_selection(selection))?;

        let url = self.prompt("Please enter the OTA URL from the website: ")?;

        self.show_screen(&Banner::from_selection(selection))?;

        download::download_ota(&self.store, selection, &url, &mut *self.fetcher)
    }

    fn select_magisk(&mut self, selection: &BuildSelection) -> Result<MagiskVersion> {
        loop {
            let magisk: MagiskVersion =
                self.prompt_parse("Please enter the magisk version (25.2, 26.1, ...): ")?;

            let apk = self.config.magisk_apk(magisk.as_str());
            if apk.is_file() {
                self.show_screen(&Banner {
                    magisk: magisk.as_str(),
                    ..Banner::from_selection(selection)
                })?;

                return Ok(magisk);
            }

            writeln!(self.output, "Magisk APK not found: {apk:?}")?;
        }
    }
}
