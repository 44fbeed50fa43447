// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Reconciliation engine.
//!
//! The engine compares the recipe tree against the output directory, and
//! rebuilds whatever is out of date. It offers two entry points:
//!
//! - [`Reconciler::reconcile_all`] synchronizes the recipe tree, removes
//!   artifacts whose recipe is gone, and rebuilds every recipe that was never
//!   built or whose version moved.
//! - [`Reconciler::reconcile_one`] rebuilds one named recipe unconditionally,
//!   for triggers that already know what changed.
//!
//! # Retrying to a Fixpoint
//!
//! Recipes are built in scan order, not in dependency order. A recipe that
//! needs the fresh artifact of a sibling may fail the first time around, and
//! succeed once that sibling is installed. So failed recipes are queued up
//! for another round, and rounds continue for as long as each one makes
//! progress. A round where every queued recipe fails again means no valid
//! build order exists for what is left, and the run gives up.

use crate::{
    catalog::{Catalog, CatalogError, RecipeId},
    command::{CommandRunner, SystemRunner},
    config::Settings,
    index::{PackageIndex, RepoDatabase},
    lock::{LockError, RunLock},
    pipeline::{BuildPipeline, PipelineError},
    sandbox::{ChrootSandbox, Sandbox},
    vcs::{Git2Sync, VcsError, VcsSync},
};

use std::collections::BTreeSet;
use tracing::{debug, info, instrument, warn};

/// Summary of a successful run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// Number of build rounds it took to converge.
    pub rounds: usize,

    /// Recipes built, in build order.
    pub built: Vec<String>,

    /// Orphaned artifacts removed.
    pub removed: Vec<String>,
}

/// Drives reconciliation runs against external collaborators.
#[derive(Debug)]
pub struct Reconciler<
    V = Git2Sync,
    S = ChrootSandbox,
    I = RepoDatabase,
    R = SystemRunner,
> where
    V: VcsSync,
    S: Sandbox,
    I: PackageIndex,
    R: CommandRunner,
{
    settings: Settings,
    vcs: V,
    sandbox: S,
    index: I,
    runner: R,
}

impl Reconciler {
    /// Construct reconciler using the real tooling described by `settings`.
    pub fn from_settings(settings: Settings) -> Self {
        let vcs = Git2Sync::from(&settings.vcs);
        let sandbox = ChrootSandbox::new(&settings.paths.chroot, &settings.sandbox, SystemRunner);
        let index = RepoDatabase::new(settings.index_path(), SystemRunner);

        Self::new(settings, vcs, sandbox, index, SystemRunner)
    }
}

impl<V, S, I, R> Reconciler<V, S, I, R>
where
    V: VcsSync,
    S: Sandbox,
    I: PackageIndex,
    R: CommandRunner,
{
    /// Construct new reconciler.
    pub fn new(settings: Settings, vcs: V, sandbox: S, index: I, runner: R) -> Self {
        Self {
            settings,
            vcs,
            sandbox,
            index,
            runner,
        }
    }

    /// Bring the whole output directory in line with the recipe tree.
    ///
    /// # Errors
    ///
    /// - Return [`ReconcileError::Lock`] if another run is in flight.
    /// - Return [`ReconcileError::Sync`] if the recipe tree cannot be synced.
    /// - Return [`ReconcileError::Catalog`] if either directory cannot be
    ///   scanned, or an orphan cannot be removed.
    /// - Return [`ReconcileError::Pipeline`] on a non-retryable build defect.
    /// - Return [`ReconcileError::Unresolvable`] if a retry round makes no
    ///   progress.
    #[instrument(skip(self), level = "debug")]
    pub fn reconcile_all(&self) -> Result<RunReport> {
        let _lock = RunLock::acquire(&self.settings.paths.output)?;
        info!("attempt update of package repository");

        self.vcs.reset_to_latest(&self.settings.paths.recipes)?;

        let mut catalog = Catalog::new(&self.settings);
        catalog.refresh()?;

        let removed = self.remove_orphans(&mut catalog)?;
        let queue = self.rebuild_set(&mut catalog);
        let (rounds, built) = self.retry_to_fixpoint(&mut catalog, queue)?;
        info!(
            "package repository up to date after {rounds} rounds, {} built, {} removed",
            built.len(),
            removed.len()
        );

        Ok(RunReport {
            rounds,
            built,
            removed,
        })
    }

    /// Rebuild recipe named `name` no matter what.
    ///
    /// # Errors
    ///
    /// - Return [`ReconcileError::Lock`] if another run is in flight.
    /// - Return [`ReconcileError::Catalog`] if either directory cannot be
    ///   scanned.
    /// - Return [`ReconcileError::UnknownRecipe`] if no recipe is named
    ///   `name`.
    /// - Return [`ReconcileError::Pipeline`] if building or installing fails.
    #[instrument(skip(self), level = "debug")]
    pub fn reconcile_one(&self, name: &str) -> Result<RunReport> {
        let _lock = RunLock::acquire(&self.settings.paths.output)?;

        // INVARIANT: Artifacts are scanned as well, the old artifact must be
        // known to be uninstalled before the new one goes in.
        let mut catalog = Catalog::new(&self.settings);
        catalog.refresh()?;

        let id = catalog
            .recipes()
            .find(name)
            .ok_or_else(|| ReconcileError::UnknownRecipe { name: name.into() })?;
        self.pipeline()
            .build(&mut catalog, id)
            .map_err(|source| ReconcileError::Pipeline {
                recipe: name.into(),
                source,
            })?;

        Ok(RunReport {
            rounds: 1,
            built: vec![name.into()],
            removed: Vec::new(),
        })
    }

    fn pipeline(&self) -> BuildPipeline<'_, S, I, R> {
        BuildPipeline::new(&self.sandbox, &self.index, &self.runner)
    }

    fn remove_orphans(&self, catalog: &mut Catalog) -> Result<Vec<String>> {
        let orphans = catalog.orphaned();
        if orphans.is_empty() {
            return Ok(Vec::new());
        }

        let mut removed = Vec::new();
        for id in orphans {
            let Some(name) = catalog.artifacts().get(id).map(|a| a.name().to_string()) else {
                continue;
            };

            // INVARIANT: Deregister each name once, the index holds at most
            // one entry per name.
            if removed.contains(&name) {
                catalog.artifacts_mut().discard(id)?;
                continue;
            }

            info!("remove {name}, its recipe is gone");
            catalog.artifacts_mut().uninstall(id, &self.index)?;
            removed.push(name);
        }

        // INVARIANT: Links are recomputed, never patched after bulk removal.
        catalog.refresh_artifacts()?;

        Ok(removed)
    }

    /// Recipes never built, or whose version differs from their artifact.
    ///
    /// Recipes whose version cannot be resolved right now are included, the
    /// retry loop decides whether they ever become buildable.
    fn rebuild_set(&self, catalog: &mut Catalog) -> Vec<RecipeId> {
        let mut queue = Vec::new();
        for id in catalog.recipes().ids() {
            let name = catalog
                .recipes()
                .get(id)
                .map(|recipe| recipe.name().to_string())
                .unwrap_or_default();

            let version =
                match catalog
                    .recipes_mut()
                    .resolve_version(id, &self.runner, &self.sandbox)
                {
                    Ok(version) => version,
                    Err(err) => {
                        warn!("cannot evaluate {name} right now: {err}");
                        queue.push(id);
                        continue;
                    }
                };

            match catalog.linked_artifact(id) {
                None => {
                    info!("{name} {version} was never built");
                    queue.push(id);
                }
                Some(artifact) if artifact.version() != &version => {
                    info!("{name} is out of date, {} -> {version}", artifact.version());
                    queue.push(id);
                }
                Some(_) => debug!("{name} {version} is up to date"),
            }
        }

        queue
    }

    fn retry_to_fixpoint(
        &self,
        catalog: &mut Catalog,
        mut queue: Vec<RecipeId>,
    ) -> Result<(usize, Vec<String>)> {
        let pipeline = self.pipeline();
        let mut rounds = 0;
        let mut built = Vec::new();

        while !queue.is_empty() {
            rounds += 1;
            debug!("round {rounds} with {} recipes", queue.len());

            let mut retries = Vec::new();
            for &id in &queue {
                let name = recipe_name(catalog, id);
                match pipeline.build(catalog, id) {
                    Ok(_) => built.push(name),
                    Err(err) if err.is_recoverable() => {
                        warn!("postpone update of {name}: {err}");
                        retries.push(id);
                    }
                    Err(source) => {
                        return Err(ReconcileError::Pipeline {
                            recipe: name,
                            source,
                        })
                    }
                }
            }

            // INVARIANT: Progress is judged by membership, not by order.
            let attempted: BTreeSet<_> = queue.iter().copied().collect();
            let failed: BTreeSet<_> = retries.iter().copied().collect();
            if attempted == failed {
                let recipes = retries.iter().map(|id| recipe_name(catalog, *id)).collect();
                return Err(ReconcileError::Unresolvable { recipes, rounds });
            }

            queue = retries;
        }

        Ok((rounds, built))
    }
}

fn recipe_name(catalog: &Catalog, id: RecipeId) -> String {
    catalog
        .recipes()
        .get(id)
        .map(|recipe| recipe.name().to_string())
        .unwrap_or_default()
}

/// Reconciliation error types.
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    /// Run lock cannot be acquired.
    #[error(transparent)]
    Lock(#[from] LockError),

    /// Recipe tree cannot be synchronized.
    #[error(transparent)]
    Sync(#[from] VcsError),

    /// Catalog cannot be refreshed, or orphan removal failed.
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    /// No recipe with requested name exists.
    #[error("no recipe named {name}")]
    UnknownRecipe { name: String },

    /// Building or installing a recipe failed beyond retrying.
    #[error("cannot update {recipe}")]
    Pipeline {
        recipe: String,
        #[source]
        source: PipelineError,
    },

    /// Retry round made no progress.
    #[error("cannot resolve rebuild of {} after {rounds} rounds", recipes.join(", "))]
    Unresolvable { recipes: Vec<String>, rounds: usize },
}

/// Friendly result alias :3
pub type Result<T, E = ReconcileError> = std::result::Result<T, E>;
