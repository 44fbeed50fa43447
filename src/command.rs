// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! External command execution.
//!
//! Every piece of real work pkgrepo does is delegated to some external tool:
//! git for cleaning working trees, makepkg and friends for building, repo-add
//! for index maintenance. This module provides the one seam all of those go
//! through, so the rest of the crate only needs to know whether a command
//! succeeded and what it printed.

use std::{
    ffi::OsString,
    fmt::{Display, Formatter, Result as FmtResult},
    path::Path,
    process::Command,
};
use tracing::{debug, instrument, warn};

/// Captured result of an external command.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
}

/// Layer of indirection for running external programs.
pub trait CommandRunner {
    /// Run `argv` with `cwd` as working directory, blocking until it exits.
    ///
    /// A command that ran but exited unsuccessfully is not an error here,
    /// only a command that could not be started at all.
    ///
    /// # Errors
    ///
    /// - Return [`CommandError::EmptyArgv`] if no program was given.
    /// - Return [`CommandError::Spawn`] if the program could not be started.
    fn run(&self, argv: &[OsString], cwd: &Path) -> Result<CommandOutput>;

    /// Run `argv` and treat unsuccessful exit as an error.
    ///
    /// # Errors
    ///
    /// - Return [`CommandError::Failed`] if the command exits unsuccessfully.
    /// - Everything [`CommandRunner::run`] returns.
    fn check(&self, argv: &[OsString], cwd: &Path) -> Result<CommandOutput> {
        let output = self.run(argv, cwd)?;
        if !output.success {
            return Err(CommandError::Failed {
                command: CommandLine::from(argv),
                stderr: chomp(&output.stderr),
            });
        }

        Ok(output)
    }
}

impl<R> CommandRunner for &R
where
    R: CommandRunner + ?Sized,
{
    fn run(&self, argv: &[OsString], cwd: &Path) -> Result<CommandOutput> {
        (**self).run(argv, cwd)
    }
}

/// Run commands as child processes of the current process.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    #[instrument(skip(self, argv), fields(command = %CommandLine::from(argv)), level = "debug")]
    fn run(&self, argv: &[OsString], cwd: &Path) -> Result<CommandOutput> {
        let (program, args) = argv.split_first().ok_or(CommandError::EmptyArgv)?;
        debug!("executing in {:?}", cwd.display());

        let output = Command::new(program)
            .args(args)
            .current_dir(cwd)
            .output()
            .map_err(|source| CommandError::Spawn {
                command: CommandLine::from(argv),
                source,
            })?;

        let result = CommandOutput {
            stdout: String::from_utf8_lossy(output.stdout.as_slice()).into_owned(),
            stderr: String::from_utf8_lossy(output.stderr.as_slice()).into_owned(),
            success: output.status.success(),
        };

        if !result.stdout.is_empty() {
            debug!("stdout: {}", chomp(&result.stdout));
        }

        if !result.stderr.is_empty() {
            if result.success {
                debug!("stderr: {}", chomp(&result.stderr));
            } else {
                warn!("stderr: {}", chomp(&result.stderr));
            }
        }

        Ok(result)
    }
}

/// Build an argument vector from anything string-like.
pub fn argv(items: impl IntoIterator<Item = impl Into<OsString>>) -> Vec<OsString> {
    items.into_iter().map(Into::into).collect()
}

/// Printable form of an argument vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine(String);

impl From<&[OsString]> for CommandLine {
    fn from(argv: &[OsString]) -> Self {
        Self(
            argv.iter()
                .map(|arg| arg.to_string_lossy())
                .collect::<Vec<_>>()
                .join(" "),
        )
    }
}

impl Display for CommandLine {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(&self.0)
    }
}

// INVARIANT: Chomp trailing newlines.
fn chomp(message: &str) -> String {
    message.trim_end_matches(['\r', '\n']).to_string()
}

/// Command execution error types.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    /// No program given to run.
    #[error("cannot run an empty command line")]
    EmptyArgv,

    /// Program could not be started.
    #[error("failed to spawn `{command}`")]
    Spawn {
        command: CommandLine,
        #[source]
        source: std::io::Error,
    },

    /// Program ran but exited unsuccessfully.
    #[error("command `{command}` failed: {stderr}")]
    Failed { command: CommandLine, stderr: String },
}

/// Friendly result alias :3
pub type Result<T, E = CommandError> = std::result::Result<T, E>;
