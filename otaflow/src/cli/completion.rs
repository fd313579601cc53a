/*
 * SPDX-FileCopyrightText: 2026 otaflow contributors
 * SPDX-License-Identifier: GPL-3.0-only
 */

use std::io::{self, Write};

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::Shell;

use crate::cli::args::Cli;

pub fn completion_main(cli: &CompletionCli) -> Result<()> {
    let mut command = Cli::command();
    let bin_name = command.get_name().to_owned();
    let mut stdout = io::stdout().lock();

    clap_complete::generate(cli.shell, &mut command, bin_name, &mut stdout);
    stdout.flush()?;

    Ok(())
}

/// Generate shell tab completion scripts for otaflow.
#[derive(Debug, Parser)]
pub struct CompletionCli {
    /// Shell to generate completions for.
    #[arg(short, long, value_name = "SHELL", value_parser)]
    pub shell: Shell,
}
