// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Build recipes.
//!
//! A __recipe__ is one directory of the recipe tree holding a declaration
//! file, e.g., a PKGBUILD. The declaration is scanned for plain `key=value`
//! lines only. It is never evaluated.
//!
//! # Lazy Versions
//!
//! The name of a recipe is fixed, but its version is not. Recipes tracking a
//! VCS source compute their version when the build tooling runs, and write
//! it back into the declaration. So the version of a recipe stays unknown
//! until [`RecipeCatalog::resolve_version`] asks the sandbox for it. That
//! operation runs external tooling every time it is called, and always
//! returns the freshly probed value.

use crate::{
    catalog::{artifact::Version, CatalogError, ParseError, Result},
    command::{argv, CommandError, CommandRunner},
    config::RecipeSettings,
    sandbox::Sandbox,
};

use std::{
    collections::{BTreeMap, BTreeSet},
    fs,
    path::{Path, PathBuf},
};
use tracing::{debug, instrument, warn};

/// Single build recipe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipe {
    name: String,
    location: PathBuf,
    version: Option<Version>,
}

impl Recipe {
    /// Construct new recipe with unresolved version.
    pub fn new(name: impl Into<String>, location: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            location: location.into(),
            version: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Working directory of all build commands for this recipe.
    pub fn location(&self) -> &Path {
        &self.location
    }

    /// Version seen by the last [`RecipeCatalog::resolve_version`] call.
    pub fn version(&self) -> Option<&Version> {
        self.version.as_ref()
    }
}

/// Index of recipe inside a [`RecipeCatalog`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecipeId(usize);

/// Recipes of the recipe tree.
#[derive(Debug, Clone)]
pub struct RecipeCatalog {
    root: PathBuf,
    settings: RecipeSettings,
    recipes: Vec<Recipe>,
}

impl RecipeCatalog {
    /// Construct new empty catalog for recipe tree at `root`.
    pub fn new(root: impl Into<PathBuf>, settings: &RecipeSettings) -> Self {
        Self {
            root: root.into(),
            settings: settings.clone(),
            recipes: Vec::new(),
        }
    }

    /// Rescan recipe tree, replacing all known recipes.
    ///
    /// Hidden directories are skipped. Directories without a readable
    /// declaration or declared name are logged and skipped.
    ///
    /// # Errors
    ///
    /// - Return [`CatalogError::ReadDir`] if recipe tree cannot be read.
    #[instrument(skip(self), level = "debug")]
    pub fn refresh(&mut self) -> Result<()> {
        let read_dir_error = |source| CatalogError::ReadDir {
            path: self.root.clone(),
            source,
        };

        let mut dirs = Vec::new();
        for entry in fs::read_dir(&self.root).map_err(read_dir_error)? {
            let entry = entry.map_err(read_dir_error)?;
            let hidden = entry.file_name().to_string_lossy().starts_with('.');
            if !hidden && entry.path().is_dir() {
                dirs.push(entry.path());
            }
        }
        dirs.sort();

        let recipes: Vec<Recipe> = dirs
            .into_iter()
            .filter_map(|dir| match self.parse_recipe(&dir) {
                Ok(recipe) => Some(recipe),
                Err(err) => {
                    warn!("skip recipe {:?}: {err}", dir.display());
                    None
                }
            })
            .collect();

        // INVARIANT: At most one recipe per name, ambiguous names are skipped
        // entirely.
        let mut claims: BTreeMap<&str, usize> = BTreeMap::new();
        for recipe in &recipes {
            *claims.entry(recipe.name()).or_default() += 1;
        }
        let ambiguous: BTreeSet<String> = claims
            .into_iter()
            .filter(|(_, count)| *count > 1)
            .map(|(name, _)| name.to_string())
            .collect();

        self.recipes = recipes
            .into_iter()
            .filter(|recipe| {
                let keep = !ambiguous.contains(recipe.name());
                if !keep {
                    warn!(
                        "skip recipe {:?}: name {} declared by more than one recipe",
                        recipe.location().display(),
                        recipe.name()
                    );
                }
                keep
            })
            .collect();
        debug!(
            "found {} recipes in {:?}",
            self.recipes.len(),
            self.root.display()
        );

        Ok(())
    }

    fn parse_recipe(&self, dir: &Path) -> Result<Recipe, ParseError> {
        let contents = self.read_declaration(dir)?;
        let name = self.require_field(&contents, &self.settings.name_key, dir)?;

        Ok(Recipe::new(name, dir))
    }

    fn read_declaration(&self, dir: &Path) -> Result<String, ParseError> {
        let path = dir.join(&self.settings.declaration);
        fs::read_to_string(&path).map_err(|source| ParseError::Declaration { path, source })
    }

    fn require_field(&self, contents: &str, key: &str, dir: &Path) -> Result<String, ParseError> {
        scan_field(contents, key).ok_or_else(|| ParseError::MissingField {
            field: key.into(),
            path: dir.join(&self.settings.declaration),
        })
    }

    fn read_version(&self, dir: &Path) -> Result<Version, ParseError> {
        let contents = self.read_declaration(dir)?;
        let upstream = self.require_field(&contents, &self.settings.version_key, dir)?;
        let release = self.require_field(&contents, &self.settings.release_key, dir)?;

        // INVARIANT: Epoch zero is never spelled out in artifact file names.
        let epoch = self
            .settings
            .epoch_key
            .as_deref()
            .and_then(|key| scan_field(&contents, key))
            .filter(|epoch| epoch != "0");

        let upstream = match epoch {
            Some(epoch) => format!("{epoch}:{upstream}"),
            None => upstream,
        };

        Ok(Version::new(upstream, release))
    }

    pub fn get(&self, id: RecipeId) -> Option<&Recipe> {
        self.recipes.get(id.0)
    }

    /// Find recipe by its declared name.
    pub fn find(&self, name: &str) -> Option<RecipeId> {
        self.recipes
            .iter()
            .position(|recipe| recipe.name() == name)
            .map(RecipeId)
    }

    /// Iterate over recipes in scan order.
    pub fn iter(&self) -> impl Iterator<Item = (RecipeId, &Recipe)> + '_ {
        self.recipes
            .iter()
            .enumerate()
            .map(|(idx, recipe)| (RecipeId(idx), recipe))
    }

    /// Identifiers of all recipes in scan order.
    pub fn ids(&self) -> Vec<RecipeId> {
        (0..self.recipes.len()).map(RecipeId).collect()
    }

    pub fn len(&self) -> usize {
        self.recipes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recipes.is_empty()
    }

    /// Probe current version of recipe `id`.
    ///
    /// Has side effects: the working tree of the recipe is cleaned, the
    /// sandbox refreshes the version metadata in the declaration, the
    /// declaration is read back, and the working tree is cleaned again.
    /// Calling this twice yields the same answer as long as nothing upstream
    /// changed in between.
    ///
    /// # Errors
    ///
    /// - Return [`ResolveError::UnknownRecipe`] if `id` is not in the catalog.
    /// - Return [`ResolveError::Tooling`] if cleaning or probing fails.
    /// - Return [`ResolveError::Parse`] if version fields are missing after
    ///   probing.
    #[instrument(skip(self, runner, sandbox), level = "debug")]
    pub fn resolve_version(
        &mut self,
        id: RecipeId,
        runner: &impl CommandRunner,
        sandbox: &impl Sandbox,
    ) -> Result<Version, ResolveError> {
        let dir = self
            .get(id)
            .map(|recipe| recipe.location().to_path_buf())
            .ok_or(ResolveError::UnknownRecipe)?;

        discard_changes(runner, &dir)?;
        sandbox.probe_version(&dir)?;
        let version = self.read_version(&dir);
        discard_changes(runner, &dir)?;
        let version = version?;

        debug!("{:?} resolves to version {version}", dir.display());
        if let Some(recipe) = self.recipes.get_mut(id.0) {
            recipe.version = Some(version.clone());
        }

        Ok(version)
    }
}

/// Discard local modifications and untracked files under `dir`.
///
/// # Errors
///
/// - Return [`CommandError`] if git fails.
pub fn discard_changes(runner: &impl CommandRunner, dir: &Path) -> Result<(), CommandError> {
    runner.check(&argv(["git", "checkout", "--", "."]), dir)?;
    discard_untracked(runner, dir)
}

/// Discard untracked files under `dir`, ignored ones included.
///
/// # Errors
///
/// - Return [`CommandError`] if git fails.
pub fn discard_untracked(runner: &impl CommandRunner, dir: &Path) -> Result<(), CommandError> {
    runner.check(&argv(["git", "clean", "-d", "-f", "-x"]), dir)?;

    Ok(())
}

/// Find value of first `key=value` line for `key`.
///
/// Quotes are stripped, and arrays yield their first element.
fn scan_field(contents: &str, key: &str) -> Option<String> {
    contents.lines().find_map(|line| {
        let (found, raw) = line.trim().split_once('=')?;
        if found != key {
            return None;
        }

        let mut raw = raw.trim();
        if let Some(inner) = raw.strip_prefix('(') {
            raw = inner.split(')').next()?.trim();
        }

        let value = match raw.chars().next()? {
            quote @ ('"' | '\'') => raw[1..].split(quote).next()?,
            _ => raw.split_whitespace().next()?,
        };

        (!value.is_empty()).then(|| value.to_string())
    })
}

/// Version resolution error types.
///
/// All of these mean the recipe cannot be evaluated right now, and is worth
/// another try later.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    /// Recipe identifier does not belong to this catalog.
    #[error("no such recipe in catalog")]
    UnknownRecipe,

    /// Cleaning or probing the recipe failed.
    #[error(transparent)]
    Tooling(#[from] CommandError),

    /// Declaration lacks version fields after probing.
    #[error(transparent)]
    Parse(#[from] ParseError),
}
