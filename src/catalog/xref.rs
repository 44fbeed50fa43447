// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Links between recipes and artifacts.

use crate::catalog::{Artifact, ArtifactId, Recipe, RecipeId};

use std::collections::{BTreeMap, HashMap};
use tracing::warn;

/// Bidirectional name-based links between recipes and artifacts.
///
/// Recipes without an artifact have never been built. Artifacts without a
/// recipe are orphans whose recipe was removed from the tree.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CrossReference {
    by_recipe: BTreeMap<RecipeId, ArtifactId>,
    by_artifact: BTreeMap<ArtifactId, RecipeId>,
}

impl CrossReference {
    /// Link every recipe to the artifact sharing its name.
    ///
    /// A name claimed by more than one artifact is ambiguous, so none of
    /// those artifacts get linked. They all end up orphaned, and the recipe
    /// ends up unbuilt.
    pub fn rebuild<'a>(
        recipes: impl IntoIterator<Item = (RecipeId, &'a Recipe)>,
        artifacts: impl IntoIterator<Item = (ArtifactId, &'a Artifact)>,
    ) -> Self {
        let mut by_name: HashMap<&str, Option<ArtifactId>> = HashMap::new();
        for (id, artifact) in artifacts {
            by_name
                .entry(artifact.name())
                .and_modify(|slot| {
                    warn!("multiple artifacts named {}", artifact.name());
                    *slot = None;
                })
                .or_insert(Some(id));
        }

        let mut xref = Self::default();
        for (recipe, artifact) in recipes.into_iter().filter_map(|(id, recipe)| {
            by_name
                .get(recipe.name())
                .copied()
                .flatten()
                .map(|artifact| (id, artifact))
        }) {
            xref.link(recipe, artifact);
        }

        xref
    }

    pub fn artifact_of(&self, recipe: RecipeId) -> Option<ArtifactId> {
        self.by_recipe.get(&recipe).copied()
    }

    pub fn recipe_of(&self, artifact: ArtifactId) -> Option<RecipeId> {
        self.by_artifact.get(&artifact).copied()
    }

    /// Link `recipe` and `artifact`, dropping any previous link of either.
    pub fn link(&mut self, recipe: RecipeId, artifact: ArtifactId) {
        self.unlink_recipe(recipe);
        if let Some(previous) = self.by_artifact.remove(&artifact) {
            self.by_recipe.remove(&previous);
        }

        self.by_recipe.insert(recipe, artifact);
        self.by_artifact.insert(artifact, recipe);
    }

    /// Drop link of `recipe`, if any.
    pub fn unlink_recipe(&mut self, recipe: RecipeId) {
        if let Some(artifact) = self.by_recipe.remove(&recipe) {
            self.by_artifact.remove(&artifact);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        catalog::{ArtifactCatalog, RecipeCatalog},
        config::{ArtifactSettings, RecipeSettings},
    };
    use pretty_assertions::assert_eq;
    use std::fs;

    fn fixture(recipes: &[&str], artifacts: &[&str]) -> (RecipeCatalog, ArtifactCatalog) {
        let root = tempfile::tempdir().unwrap();
        for name in recipes {
            fs::create_dir(root.path().join(name)).unwrap();
            fs::write(
                root.path().join(name).join("PKGBUILD"),
                format!("pkgname={name}\n"),
            )
            .unwrap();
        }
        for file in artifacts {
            fs::write(root.path().join(file), b"").unwrap();
        }

        let mut recipe_catalog = RecipeCatalog::new(root.path(), &RecipeSettings::default());
        recipe_catalog.refresh().unwrap();
        let mut artifact_catalog = ArtifactCatalog::new(root.path(), &ArtifactSettings::default());
        artifact_catalog.refresh().unwrap();

        (recipe_catalog, artifact_catalog)
    }

    fn name_of<'a>(artifacts: &'a ArtifactCatalog, id: Option<ArtifactId>) -> Option<&'a str> {
        id.and_then(|id| artifacts.get(id)).map(Artifact::name)
    }

    #[test]
    fn rebuild_links_by_name() {
        let (recipes, artifacts) = fixture(
            &["bar", "foo", "libzig"],
            &[
                "foo-1.0-1-x86_64.pkg.tar.xz",
                "libzig-0.10.0-2-x86_64.pkg.tar.xz",
                "orphan-2.0-1-any.pkg.tar.zst",
            ],
        );
        let xref = CrossReference::rebuild(recipes.iter(), artifacts.iter());

        let bar = recipes.find("bar").unwrap();
        let foo = recipes.find("foo").unwrap();
        let libzig = recipes.find("libzig").unwrap();
        let orphan = artifacts.find("orphan").unwrap();

        assert_eq!(xref.artifact_of(bar), None);
        assert_eq!(name_of(&artifacts, xref.artifact_of(foo)), Some("foo"));
        assert_eq!(name_of(&artifacts, xref.artifact_of(libzig)), Some("libzig"));
        assert_eq!(xref.recipe_of(orphan), None);
        assert_eq!(xref.recipe_of(artifacts.find("foo").unwrap()), Some(foo));
    }

    #[test]
    fn rebuild_refuses_ambiguous_names() {
        let (recipes, artifacts) = fixture(
            &["foo"],
            &["foo-1.0-1-x86_64.pkg.tar.xz", "foo-1.1-1-x86_64.pkg.tar.xz"],
        );
        let xref = CrossReference::rebuild(recipes.iter(), artifacts.iter());

        assert_eq!(xref.artifact_of(recipes.find("foo").unwrap()), None);
        assert!(artifacts.iter().all(|(id, _)| xref.recipe_of(id).is_none()));
    }

    #[test]
    fn link_replaces_previous_links() {
        let (recipes, artifacts) = fixture(
            &["foo"],
            &["foo-1.0-1-x86_64.pkg.tar.xz", "bar-1.0-1-x86_64.pkg.tar.xz"],
        );
        let foo = recipes.find("foo").unwrap();
        let old = artifacts.find("foo").unwrap();
        let new = artifacts.find("bar").unwrap();

        let mut xref = CrossReference::rebuild(recipes.iter(), artifacts.iter());
        assert_eq!(xref.artifact_of(foo), Some(old));

        xref.link(foo, new);
        assert_eq!(xref.artifact_of(foo), Some(new));
        assert_eq!(xref.recipe_of(old), None);
        assert_eq!(xref.recipe_of(new), Some(foo));

        xref.unlink_recipe(foo);
        assert_eq!(xref, CrossReference::default());
    }
}
