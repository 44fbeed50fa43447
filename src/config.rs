// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration layout.
//!
//! Specify the layout for the configuration file that pkgrepo uses to
//! simplify the process of serialization and deserialization. File I/O is
//! left to the caller to figure out.
//!
//! Every field carries a default, so an empty file, or no file at all, yields
//! a working setup that expects the classic layout:
//!
//! - Recipe tree at `/opt/pkgrepo/pkgbuilds`.
//! - Output directory at `/www/pkgrepo`, holding `pkgrepo.db.tar.gz`.
//! - Clean chroot at `/opt/pkgrepo/chroot`.

use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    path::{Path, PathBuf},
    str::FromStr,
};

/// Top-level settings of pkgrepo.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    /// Locations of the recipe tree, output directory, and sandbox.
    pub paths: PathSettings,

    /// How to read recipe declaration files.
    pub recipe: RecipeSettings,

    /// Which files in the output directory count as artifacts.
    pub artifact: ArtifactSettings,

    /// How to drive the build sandbox.
    pub sandbox: SandboxSettings,

    /// Which remote branch the recipe tree follows.
    pub vcs: VcsSettings,
}

impl Settings {
    /// Absolute path to the package index file.
    pub fn index_path(&self) -> PathBuf {
        self.paths.output.join(&self.paths.index)
    }
}

impl FromStr for Settings {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let mut settings: Settings = toml::de::from_str(data).map_err(ConfigError::Deserialize)?;

        // INVARIANT: Perform shell expansion on every path field.
        settings.paths.recipes = expand_path(&settings.paths.recipes)?;
        settings.paths.output = expand_path(&settings.paths.output)?;
        settings.paths.chroot = expand_path(&settings.paths.chroot)?;

        Ok(settings)
    }
}

impl Display for Settings {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::ser::to_string_pretty(self)
                .map_err(ConfigError::Serialize)?
                .as_str(),
        )
    }
}

/// Filesystem locations.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PathSettings {
    /// Recipe tree, one subdirectory per recipe.
    pub recipes: PathBuf,

    /// Directory holding installed artifacts and the package index.
    pub output: PathBuf,

    /// File name of the package index inside the output directory.
    pub index: String,

    /// Root of the clean chroot used for building.
    pub chroot: PathBuf,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            recipes: PathBuf::from("/opt/pkgrepo/pkgbuilds"),
            output: PathBuf::from("/www/pkgrepo"),
            index: "pkgrepo.db.tar.gz".into(),
            chroot: PathBuf::from("/opt/pkgrepo/chroot"),
        }
    }
}

/// Layout of a recipe declaration file.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RecipeSettings {
    /// Name of the declaration file inside each recipe directory.
    pub declaration: String,

    /// Key holding the recipe name.
    pub name_key: String,

    /// Key holding the upstream version.
    pub version_key: String,

    /// Key holding the release counter.
    pub release_key: String,

    /// Optional key holding a version epoch.
    pub epoch_key: Option<String>,
}

impl Default for RecipeSettings {
    fn default() -> Self {
        Self {
            declaration: "PKGBUILD".into(),
            name_key: "pkgname".into(),
            version_key: "pkgver".into(),
            release_key: "pkgrel".into(),
            epoch_key: Some("epoch".into()),
        }
    }
}

/// Artifact file recognition.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ArtifactSettings {
    /// File name suffixes that mark a file as a candidate artifact.
    pub suffixes: Vec<String>,
}

impl Default for ArtifactSettings {
    fn default() -> Self {
        Self {
            suffixes: vec![".pkg.tar.xz".into(), ".pkg.tar.zst".into()],
        }
    }
}

/// Build sandbox settings.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SandboxSettings {
    /// Prefix privileged sandbox commands with sudo.
    pub sudo: bool,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self { sudo: true }
    }
}

/// Version control settings for the recipe tree.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct VcsSettings {
    /// Remote to fetch from.
    pub remote: String,

    /// Branch to follow. Uses the currently checked out branch if unset.
    pub branch: Option<String>,
}

impl Default for VcsSettings {
    fn default() -> Self {
        Self {
            remote: "origin".into(),
            branch: None,
        }
    }
}

fn expand_path(path: &Path) -> Result<PathBuf> {
    let expanded = shellexpand::full(path.to_string_lossy().as_ref())
        .map_err(ConfigError::ShellExpansion)?
        .into_owned();

    Ok(PathBuf::from(expanded))
}

/// Configuration error types.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to deserialize configuration.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Failed to serialize configuration.
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),

    /// Failed to perform shell expansion on configuration.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<std::env::VarError>),
}

impl From<ConfigError> for FmtError {
    fn from(_: ConfigError) -> Self {
        FmtError
    }
}

/// Friendly result alias :3
type Result<T, E = ConfigError> = std::result::Result<T, E>;
