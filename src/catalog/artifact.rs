// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Built artifacts.
//!
//! An __artifact__ is a package file produced by building a recipe. All
//! metadata pkgrepo needs about an artifact is encoded in its file name:
//!
//! ```text
//! <name>-<upstream>-<release>-<arch>.<ext>
//! ```
//!
//! The name itself may contain hyphens, the other fields may not. So the
//! file name is split from the right. For example,
//! `python-foo-bar-1.2.0-3-any.pkg.tar.zst` is version `1.2.0-3` of
//! `python-foo-bar` built for `any` architecture.

use crate::{
    catalog::{CatalogError, ParseError, Result},
    config::ArtifactSettings,
    index::PackageIndex,
};

use glob::Pattern;
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};
use tracing::{debug, info, instrument, warn};

/// Version of a recipe or artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Version {
    upstream: String,
    release: String,
}

impl Version {
    /// Construct new version from upstream version and release counter.
    pub fn new(upstream: impl Into<String>, release: impl Into<String>) -> Self {
        Self {
            upstream: upstream.into(),
            release: release.into(),
        }
    }

    pub fn upstream(&self) -> &str {
        &self.upstream
    }

    pub fn release(&self) -> &str {
        &self.release
    }
}

impl Display for Version {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        write!(fmt, "{}-{}", self.upstream, self.release)
    }
}

/// Built package file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    name: String,
    version: Version,
    arch: String,
    path: PathBuf,
}

impl Artifact {
    /// Parse artifact from its file path.
    ///
    /// # Errors
    ///
    /// - Return [`ParseError::FileName`] if the file name does not follow
    ///   the artifact file name grammar.
    pub fn from_path(path: impl Into<PathBuf>) -> Result<Self, ParseError> {
        let path = path.into();
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let bad_name = || ParseError::FileName {
            file_name: file_name.clone(),
        };

        let mut fields = file_name.rsplitn(4, '-');
        let tail = fields.next().ok_or_else(bad_name)?;
        let release = fields.next().ok_or_else(bad_name)?;
        let upstream = fields.next().ok_or_else(bad_name)?;
        let name = fields.next().ok_or_else(bad_name)?;
        let (arch, ext) = tail.split_once('.').ok_or_else(bad_name)?;

        if [name, upstream, release, arch, ext].iter().any(|field| field.is_empty()) {
            return Err(bad_name());
        }

        Ok(Self {
            name: name.into(),
            version: Version::new(upstream, release),
            arch: arch.into(),
            path,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &Version {
        &self.version
    }

    pub fn arch(&self) -> &str {
        &self.arch
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Index of artifact slot inside an [`ArtifactCatalog`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ArtifactId(usize);

/// Installed artifacts of the output directory.
#[derive(Debug, Clone)]
pub struct ArtifactCatalog {
    dir: PathBuf,
    suffixes: Vec<String>,

    // INVARIANT: Uninstalled artifacts leave an empty slot behind, so every
    // ArtifactId handed out stays valid until the next refresh.
    slots: Vec<Option<Artifact>>,
}

impl ArtifactCatalog {
    /// Construct new empty catalog for output directory `dir`.
    pub fn new(dir: impl Into<PathBuf>, settings: &ArtifactSettings) -> Self {
        Self {
            dir: dir.into(),
            suffixes: settings.suffixes.clone(),
            slots: Vec::new(),
        }
    }

    /// Rescan output directory, replacing all known artifacts.
    ///
    /// # Errors
    ///
    /// - Return [`CatalogError::ReadDir`] if output directory cannot be read.
    #[instrument(skip(self), level = "debug")]
    pub fn refresh(&mut self) -> Result<()> {
        let artifacts = scan_artifacts(&self.dir, &self.suffixes)?;
        debug!(
            "found {} artifacts in {:?}",
            artifacts.len(),
            self.dir.display()
        );
        self.slots = artifacts.into_iter().map(Some).collect();

        Ok(())
    }

    /// Locate freshly built artifact named `name` inside `dir`.
    ///
    /// # Errors
    ///
    /// - Return [`CatalogError::ReadDir`] if `dir` cannot be read.
    pub fn find_built(&self, dir: &Path, name: &str) -> Result<Option<Artifact>> {
        Ok(scan_artifacts(dir, &self.suffixes)?
            .into_iter()
            .find(|artifact| artifact.name() == name))
    }

    pub fn get(&self, id: ArtifactId) -> Option<&Artifact> {
        self.slots.get(id.0).and_then(Option::as_ref)
    }

    /// Find installed artifact by name.
    pub fn find(&self, name: &str) -> Option<ArtifactId> {
        self.iter()
            .find(|(_, artifact)| artifact.name() == name)
            .map(|(id, _)| id)
    }

    /// Iterate over installed artifacts in scan order.
    pub fn iter(&self) -> impl Iterator<Item = (ArtifactId, &Artifact)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(idx, slot)| slot.as_ref().map(|artifact| (ArtifactId(idx), artifact)))
    }

    /// Number of installed artifacts.
    pub fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Move built artifact into output directory and register it.
    ///
    /// Registration only happens once the file is in place, so the package
    /// index never points at a missing file. A file the index refuses is
    /// deleted again, so the output directory never holds an unregistered
    /// artifact.
    ///
    /// # Errors
    ///
    /// - Return [`CatalogError::Move`] if the file cannot be moved.
    /// - Return [`CatalogError::Index`] if the package index refuses it.
    /// - Return [`CatalogError::Remove`] if a refused file cannot be deleted.
    #[instrument(skip(self, built, index), fields(artifact = %built.name()), level = "debug")]
    pub fn install(&mut self, built: Artifact, index: &impl PackageIndex) -> Result<ArtifactId> {
        let file_name = built.path().file_name().map(ToOwned::to_owned).unwrap_or_default();
        let target = self.dir.join(file_name);
        move_file(built.path(), &target)?;

        if let Err(err) = index.register(&target) {
            warn!("package index refused {:?}, take it back out", target.display());
            delete_file(&target)?;
            return Err(err.into());
        }
        info!("install {} {}", built.name(), built.version());

        self.slots.push(Some(Artifact {
            path: target,
            ..built
        }));

        Ok(ArtifactId(self.slots.len() - 1))
    }

    /// Delete installed artifact and deregister it.
    ///
    /// Deregistration only happens once the file is gone. An already missing
    /// file still gets deregistered. The slot is only emptied once the index
    /// agreed, so a failed uninstall can simply be called again.
    ///
    /// # Errors
    ///
    /// - Return [`CatalogError::Remove`] if the file cannot be deleted.
    /// - Return [`CatalogError::Index`] if the package index refuses it.
    #[instrument(skip(self, index), level = "debug")]
    pub fn uninstall(&mut self, id: ArtifactId, index: &impl PackageIndex) -> Result<()> {
        let Some(artifact) = self.get(id) else {
            return Ok(());
        };
        info!("uninstall {} {}", artifact.name(), artifact.version());

        delete_file(artifact.path())?;
        index.deregister(artifact.name())?;
        self.slots[id.0] = None;

        Ok(())
    }

    /// Delete installed artifact without touching the package index.
    ///
    /// For extra files of a name whose index entry is already gone.
    ///
    /// # Errors
    ///
    /// - Return [`CatalogError::Remove`] if the file cannot be deleted.
    pub fn discard(&mut self, id: ArtifactId) -> Result<()> {
        let Some(artifact) = self.get(id) else {
            return Ok(());
        };
        debug!("discard {:?}", artifact.path().display());

        delete_file(artifact.path())?;
        self.slots[id.0] = None;

        Ok(())
    }
}

fn scan_artifacts(dir: &Path, suffixes: &[String]) -> Result<Vec<Artifact>> {
    // INVARIANT: Surface unreadable directories, glob would silently skip them.
    fs::read_dir(dir).map_err(|source| CatalogError::ReadDir {
        path: dir.to_path_buf(),
        source,
    })?;

    let base = Pattern::escape(&dir.to_string_lossy());
    let mut paths = Vec::new();
    for suffix in suffixes {
        let pattern = format!("{base}/*{}", Pattern::escape(suffix));
        paths.extend(glob::glob(&pattern)?.filter_map(|entry| match entry {
            Ok(path) => path.is_file().then_some(path),
            Err(err) => {
                warn!("skip unreadable entry: {err}");
                None
            }
        }));
    }
    paths.sort();
    paths.dedup();

    let mut artifacts = Vec::new();
    for path in paths {
        match Artifact::from_path(&path) {
            Ok(artifact) => artifacts.push(artifact),
            Err(err) => warn!("skip {:?}: {err}", path.display()),
        }
    }

    Ok(artifacts)
}

fn delete_file(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => {
            warn!("artifact {:?} already gone", path.display());
            Ok(())
        }
        Err(source) => Err(CatalogError::Remove {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn move_file(from: &Path, to: &Path) -> Result<()> {
    let move_error = |source| CatalogError::Move {
        from: from.to_path_buf(),
        to: to.to_path_buf(),
        source,
    };

    // INVARIANT: Recipe tree and output directory may live on different
    // filesystems, fall back to copy and delete when rename cannot cross.
    if fs::rename(from, to).is_err() {
        fs::copy(from, to).map_err(move_error)?;
        fs::remove_file(from).map_err(move_error)?;
    }

    Ok(())
}
