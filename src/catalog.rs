// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Working set of a reconciliation run.
//!
//! A __catalog__ is a snapshot of two directories: the recipe tree, and the
//! output directory holding built artifacts. Recipes and artifacts are linked
//! to each other by name through a [`CrossReference`].
//!
//! # Snapshot Semantics
//!
//! Both directories are mutated from outside: the recipe tree by version
//! control synchronization, the output directory by whoever else feels like
//! dropping files there. So the catalog never tries to track those changes
//! incrementally. A refresh rescans both directories from scratch and
//! rebuilds every link, and a catalog is created anew for every run.
//!
//! Entries that cannot be parsed are logged and skipped. They never abort a
//! refresh, since unrelated files may live in either directory.

pub mod artifact;
pub mod recipe;
pub mod xref;

pub use artifact::{Artifact, ArtifactCatalog, ArtifactId, Version};
pub use recipe::{Recipe, RecipeCatalog, RecipeId};
pub use xref::CrossReference;

use crate::{command::CommandError, config::Settings};

use std::path::PathBuf;
use tracing::{debug, instrument};

/// Recipes, artifacts, and the links between them.
#[derive(Debug)]
pub struct Catalog {
    recipes: RecipeCatalog,
    artifacts: ArtifactCatalog,
    xref: CrossReference,
}

impl Catalog {
    /// Construct new empty catalog over directories named in `settings`.
    pub fn new(settings: &Settings) -> Self {
        Self {
            recipes: RecipeCatalog::new(&settings.paths.recipes, &settings.recipe),
            artifacts: ArtifactCatalog::new(&settings.paths.output, &settings.artifact),
            xref: CrossReference::default(),
        }
    }

    /// Rescan recipe tree and output directory, then relink everything.
    ///
    /// # Errors
    ///
    /// - Return [`CatalogError::ReadDir`] if either directory cannot be read.
    #[instrument(skip(self), level = "debug")]
    pub fn refresh(&mut self) -> Result<()> {
        self.recipes.refresh()?;
        self.artifacts.refresh()?;
        self.relink();

        Ok(())
    }

    /// Rescan output directory only, then relink everything.
    ///
    /// # Errors
    ///
    /// - Return [`CatalogError::ReadDir`] if the directory cannot be read.
    pub fn refresh_artifacts(&mut self) -> Result<()> {
        self.artifacts.refresh()?;
        self.relink();

        Ok(())
    }

    /// Throw away all links and recompute them from scratch.
    pub fn relink(&mut self) {
        self.xref = CrossReference::rebuild(self.recipes.iter(), self.artifacts.iter());
        debug!(
            "linked {} recipes to {} artifacts",
            self.recipes.len(),
            self.artifacts.len()
        );
    }

    pub fn recipes(&self) -> &RecipeCatalog {
        &self.recipes
    }

    pub fn recipes_mut(&mut self) -> &mut RecipeCatalog {
        &mut self.recipes
    }

    pub fn artifacts(&self) -> &ArtifactCatalog {
        &self.artifacts
    }

    pub fn artifacts_mut(&mut self) -> &mut ArtifactCatalog {
        &mut self.artifacts
    }

    pub fn xref(&self) -> &CrossReference {
        &self.xref
    }

    /// Artifact currently produced by recipe `id`, if any.
    pub fn linked_artifact(&self, id: RecipeId) -> Option<&Artifact> {
        self.xref
            .artifact_of(id)
            .and_then(|artifact| self.artifacts.get(artifact))
    }

    /// Installed artifacts whose recipe no longer exists.
    pub fn orphaned(&self) -> Vec<ArtifactId> {
        self.artifacts
            .iter()
            .map(|(id, _)| id)
            .filter(|id| self.xref.recipe_of(*id).is_none())
            .collect()
    }

    /// Record that recipe `recipe` now produces artifact `artifact`.
    pub fn link(&mut self, recipe: RecipeId, artifact: ArtifactId) {
        self.xref.link(recipe, artifact);
    }

    /// Forget whatever artifact recipe `recipe` was linked to.
    pub fn unlink(&mut self, recipe: RecipeId) {
        self.xref.unlink_recipe(recipe);
    }
}

/// Single catalog entry that could not be parsed.
///
/// Never fatal. Callers log these and move on to the next entry.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    /// File name does not follow the artifact file name grammar.
    #[error("artifact file name {file_name:?} does not match <name>-<version>-<release>-<arch>.<ext>")]
    FileName { file_name: String },

    /// Recipe directory lacks its declaration file.
    #[error("recipe declaration {:?} cannot be read", path.display())]
    Declaration {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Recipe declaration lacks a required field.
    #[error("recipe declaration {:?} has no usable {field} field", path.display())]
    MissingField { field: String, path: PathBuf },
}

/// Catalog error types.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    /// Directory cannot be scanned.
    #[error("failed to read directory {:?}", path.display())]
    ReadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Directory path cannot be turned into a scan pattern.
    #[error(transparent)]
    Pattern(#[from] glob::PatternError),

    /// Artifact file cannot be deleted.
    #[error("failed to remove artifact {:?}", path.display())]
    Remove {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Artifact file cannot be moved into the output directory.
    #[error("failed to move artifact {:?} to {:?}", from.display(), to.display())]
    Move {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Package index refused an update.
    #[error(transparent)]
    Index(#[from] CommandError),
}

impl CatalogError {
    /// Check if retrying the failed operation later might succeed.
    ///
    /// Index tooling failures are worth another try. Filesystem failures
    /// mean the output directory is in a state we cannot reason about.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Index(_))
    }
}

/// Friendly result alias :3
pub type Result<T, E = CatalogError> = std::result::Result<T, E>;
