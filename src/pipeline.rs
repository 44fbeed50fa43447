// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Build and install a single recipe.
//!
//! The pipeline takes one recipe from source to installed artifact:
//!
//! 1. Refresh the sandbox base system.
//! 2. Discard untracked files in the recipe's working tree.
//! 3. Build the recipe inside the sandbox.
//! 4. Locate the artifact the build produced.
//! 5. Uninstall the artifact the recipe produced before, if any.
//! 6. Move the new artifact to the output directory and register it.
//! 7. Link recipe and new artifact in the catalog.
//!
//! The old artifact is always gone from the package index before the new
//! one enters it, so the index never lists two artifacts of one name.

use crate::{
    catalog::{recipe::discard_untracked, ArtifactId, Catalog, CatalogError, RecipeId},
    command::{CommandError, CommandRunner},
    index::PackageIndex,
    sandbox::Sandbox,
};

use std::path::PathBuf;
use tracing::{info, instrument};

/// Build-and-install pipeline borrowing its collaborators.
#[derive(Debug)]
pub struct BuildPipeline<'a, S, I, R>
where
    S: Sandbox,
    I: PackageIndex,
    R: CommandRunner,
{
    sandbox: &'a S,
    index: &'a I,
    runner: &'a R,
}

impl<'a, S, I, R> BuildPipeline<'a, S, I, R>
where
    S: Sandbox,
    I: PackageIndex,
    R: CommandRunner,
{
    /// Construct new pipeline.
    pub fn new(sandbox: &'a S, index: &'a I, runner: &'a R) -> Self {
        Self {
            sandbox,
            index,
            runner,
        }
    }

    /// Build recipe `id` and install what it produced.
    ///
    /// # Errors
    ///
    /// - Return [`PipelineError::UnknownRecipe`] if `id` is not in `catalog`.
    /// - Return [`PipelineError::Build`] if sandbox refresh, cleaning, or
    ///   building fails.
    /// - Return [`PipelineError::MissingArtifact`] if the build succeeded
    ///   but produced nothing.
    /// - Return [`PipelineError::Install`] if uninstalling or installing
    ///   fails.
    #[instrument(skip(self, catalog), level = "debug")]
    pub fn build(&self, catalog: &mut Catalog, id: RecipeId) -> Result<ArtifactId> {
        let recipe = catalog
            .recipes()
            .get(id)
            .cloned()
            .ok_or(PipelineError::UnknownRecipe)?;
        let name = recipe.name().to_string();
        let dir = recipe.location();
        info!("attempt update of {name}");

        let build_error = |source| PipelineError::Build {
            recipe: name.clone(),
            source,
        };
        self.sandbox.refresh_base().map_err(build_error)?;
        discard_untracked(self.runner, dir).map_err(build_error)?;
        self.sandbox.build_recipe(dir).map_err(build_error)?;

        let install_error = |source| PipelineError::Install {
            recipe: name.clone(),
            source,
        };
        let built = catalog
            .artifacts()
            .find_built(dir, &name)
            .map_err(install_error)?
            .ok_or_else(|| PipelineError::MissingArtifact {
                recipe: name.clone(),
                dir: dir.to_path_buf(),
            })?;

        if let Some(previous) = catalog.xref().artifact_of(id) {
            catalog
                .artifacts_mut()
                .uninstall(previous, self.index)
                .map_err(install_error)?;
            catalog.unlink(id);
        }

        let version = built.version().clone();
        let installed = catalog
            .artifacts_mut()
            .install(built, self.index)
            .map_err(install_error)?;
        catalog.link(id, installed);
        info!("updated {name} to {version}");

        Ok(installed)
    }
}

/// Build-and-install error types.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Recipe identifier does not belong to the catalog.
    #[error("no such recipe in catalog")]
    UnknownRecipe,

    /// External build tooling failed.
    #[error("failed to build {recipe}")]
    Build {
        recipe: String,
        #[source]
        source: CommandError,
    },

    /// Builder reported success without producing an artifact.
    #[error("building {recipe} succeeded but left no artifact in {:?}", dir.display())]
    MissingArtifact { recipe: String, dir: PathBuf },

    /// Old artifact could not be removed, or new artifact installed.
    #[error("failed to install {recipe}")]
    Install {
        recipe: String,
        #[source]
        source: CatalogError,
    },
}

impl PipelineError {
    /// Check if the recipe is worth another try in a later round.
    ///
    /// Tooling failures may go away once other recipes are built. A builder
    /// that claims success without output, or a filesystem that refuses
    /// moves, will not get better by retrying.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Build { .. } => true,
            Self::Install { source, .. } => source.is_recoverable(),
            Self::UnknownRecipe | Self::MissingArtifact { .. } => false,
        }
    }
}

/// Friendly result alias :3
pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
