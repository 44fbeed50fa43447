// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Build sandbox.
//!
//! Recipes are never built on the host directly. Instead, pkgrepo keeps a
//! long-lived clean chroot around, refreshes its base system before every
//! build, and lets `makechrootpkg` build each recipe inside a throwaway copy
//! of it.
//!
//! The chroot itself is provisioned out of band, e.g., through
//! `mkarchroot <chroot>/root base-devel`.

use crate::{
    command::{argv, CommandRunner, Result, SystemRunner},
    config::SandboxSettings,
};

use std::{
    ffi::OsString,
    path::{Path, PathBuf},
};
use tracing::{info, instrument};

/// Layer of indirection for the build sandbox.
pub trait Sandbox {
    /// Bring the sandbox base system up to date.
    fn refresh_base(&self) -> Result<()>;

    /// Refresh version metadata of recipe at `recipe_dir`.
    ///
    /// May rewrite the version fields of the recipe's declaration file.
    fn probe_version(&self, recipe_dir: &Path) -> Result<()>;

    /// Build recipe at `recipe_dir`, leaving any produced artifact in it.
    fn build_recipe(&self, recipe_dir: &Path) -> Result<()>;
}

impl<T> Sandbox for &T
where
    T: Sandbox + ?Sized,
{
    fn refresh_base(&self) -> Result<()> {
        (**self).refresh_base()
    }

    fn probe_version(&self, recipe_dir: &Path) -> Result<()> {
        (**self).probe_version(recipe_dir)
    }

    fn build_recipe(&self, recipe_dir: &Path) -> Result<()> {
        (**self).build_recipe(recipe_dir)
    }
}

/// Clean chroot driven through the devtools scripts.
#[derive(Debug, Clone)]
pub struct ChrootSandbox<R = SystemRunner>
where
    R: CommandRunner,
{
    chroot: PathBuf,
    sudo: bool,
    runner: R,
}

impl<R> ChrootSandbox<R>
where
    R: CommandRunner,
{
    /// Construct new chroot sandbox rooted at `chroot`.
    pub fn new(chroot: impl Into<PathBuf>, settings: &SandboxSettings, runner: R) -> Self {
        Self {
            chroot: chroot.into(),
            sudo: settings.sudo,
            runner,
        }
    }

    fn privileged(&self, args: Vec<OsString>) -> Vec<OsString> {
        if self.sudo {
            let mut full = argv(["sudo"]);
            full.extend(args);
            full
        } else {
            args
        }
    }
}

impl<R> Sandbox for ChrootSandbox<R>
where
    R: CommandRunner,
{
    #[instrument(skip(self), level = "debug")]
    fn refresh_base(&self) -> Result<()> {
        info!("refresh sandbox at {:?}", self.chroot.display());
        let args = self.privileged(argv([
            OsString::from("arch-nspawn"),
            self.chroot.join("root").into_os_string(),
            "pacman".into(),
            "-Syu".into(),
            "--noconfirm".into(),
        ]));
        self.runner.check(&args, &self.chroot)?;

        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    fn probe_version(&self, recipe_dir: &Path) -> Result<()> {
        // INVARIANT: makepkg refuses to run as root, so never use sudo here.
        let args = argv(["makepkg", "--nobuild", "--nodeps", "--skipinteg"]);
        self.runner.check(&args, recipe_dir)?;

        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    fn build_recipe(&self, recipe_dir: &Path) -> Result<()> {
        info!("build recipe at {:?}", recipe_dir.display());
        let args = self.privileged(argv([
            OsString::from("makechrootpkg"),
            "-c".into(),
            "-r".into(),
            self.chroot.clone().into_os_string(),
        ]));
        self.runner.check(&args, recipe_dir)?;

        Ok(())
    }
}
