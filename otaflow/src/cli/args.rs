/*
 * SPDX-FileCopyrightText: 2026 otaflow contributors
 * SPDX-License-Identifier: GPL-3.0-only
 */

use std::{
    io::{self, IsTerminal},
    path::PathBuf,
    sync::atomic::{AtomicBool, Ordering},
};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::{Level, info};

use crate::{
    cli::{
        completion, device,
        menu::{FlowEnd, Menu},
        status, warning,
    },
    config::{self, Config},
    download::HttpFetcher,
    keys::{KeyProvisioner, StepResult},
    patch::PatchVariant,
    selection::BuildSelection,
    tool::ProcessRunner,
};

#[derive(Clone, Copy, Debug, Default, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => Self::ERROR,
            LogLevel::Warn => Self::WARN,
            LogLevel::Info => Self::INFO,
            LogLevel::Debug => Self::DEBUG,
            LogLevel::Trace => Self::TRACE,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, ValueEnum)]
pub enum LogFormat {
    /// Level and message only.
    #[default]
    Short,
    /// Also include the module path.
    Medium,
    /// Also include timestamps and thread IDs.
    Long,
}

pub fn init_logging(level: LogLevel, format: LogFormat) {
    let builder = tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal())
        .with_max_level(Level::from(level));

    match format {
        LogFormat::Short => builder.without_time().with_target(false).init(),
        LogFormat::Medium => builder.without_time().with_target(true).init(),
        LogFormat::Long => builder.with_target(true).with_thread_ids(true).init(),
    }
}

#[derive(Debug, Args)]
pub struct GlobalArgs {
    /// Path to TOML config file.
    ///
    /// All fields are optional. Missing fields use the default layout.
    #[arg(short, long, value_name = "FILE", value_parser, global = true)]
    pub config: Option<PathBuf>,

    /// Base directory for relative paths in the layout.
    #[arg(
        short,
        long,
        value_name = "DIRECTORY",
        value_parser,
        default_value = ".",
        global = true
    )]
    pub work_dir: PathBuf,

    /// Lowest log message severity to output.
    #[arg(long, value_enum, default_value_t, global = true)]
    pub log_level: LogLevel,

    /// Output format for log messages.
    #[arg(long, value_enum, default_value_t, global = true)]
    pub log_format: LogFormat,
}

/// Print the effective configuration.
#[derive(Debug, Parser)]
pub struct ConfigCli {}

#[derive(Debug, Subcommand)]
pub enum Command {
    Completion(completion::CompletionCli),
    Config(ConfigCli),
    Device(device::DeviceCli),
}

/// Download, organize, and patch factory OTA images.
///
/// Without a subcommand, the signing keys are generated if needed and then the
/// interactive selection menu is started.
#[derive(Debug, Parser)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    #[command(flatten)]
    pub global: GlobalArgs,
}

fn describe(s: &BuildSelection) -> String {
    format!("{}/{}/{}/{}", s.build_type, s.device, s.version, s.id)
}

fn workflow_main(config: &Config, cancel_signal: &AtomicBool) -> Result<()> {
    let mut runner = ProcessRunner;

    let report = KeyProvisioner::new(&config.keys, &config.tools, &mut runner)
        .provision()
        .context("Failed to provision signing keys")?;

    for (artifact, result) in &report.steps {
        match result {
            StepResult::Present => {}
            StepResult::Generated => status!("Generated {artifact}"),
            StepResult::Failed(msg) => warning!("Failed to generate {artifact}: {msg}"),
            StepResult::Skipped => warning!("Skipped {artifact}: its private key is missing"),
        }
    }

    let mut fetcher = HttpFetcher::new(cancel_signal);
    let stdin = io::stdin();
    let mut input = stdin.lock();
    let mut output = io::stdout();
    let clear_screen = output.is_terminal();

    let end = Menu::new(
        config,
        &mut input,
        &mut output,
        &mut runner,
        &mut fetcher,
        cancel_signal,
    )
    .with_clear_screen(clear_screen)
    .run()?;

    match end {
        FlowEnd::AlreadyExtracted(s) | FlowEnd::InvalidUrl(s) => {
            info!("Finished without patching: {}", describe(&s));
        }
        FlowEnd::Patched {
            selection, variant, ..
        } => {
            if let PatchVariant::Preinit { partition } = variant {
                info!("Used Magisk preinit partition: {partition}");
            }
            status!("Finished patching {}", describe(&selection));
        }
    }

    Ok(())
}

fn config_main(config: &Config) -> Result<()> {
    print!("{}", config::to_toml(config)?);

    Ok(())
}

pub fn main(logging_initialized: &AtomicBool, cancel_signal: &AtomicBool) -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.global.log_level, cli.global.log_format);
    logging_initialized.store(true, Ordering::SeqCst);

    let work_dir = &cli.global.work_dir;
    let config = config::load_config(cli.global.config.as_deref())?.resolve(work_dir);

    match &cli.command {
        None => workflow_main(&config, cancel_signal),
        Some(Command::Completion(c)) => completion::completion_main(c),
        Some(Command::Config(_)) => config_main(&config),
        Some(Command::Device(c)) => device::device_main(c, &config, work_dir, cancel_signal),
    }
}
