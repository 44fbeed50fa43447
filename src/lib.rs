// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Keep a package repository in sync with a tree of build recipes.
//!
//! pkgrepo watches over three things: a __recipe tree__ with one directory
//! per recipe, an __output directory__ full of built artifacts, and the
//! __package index__ listing those artifacts. Whenever it is triggered, it
//! figures out which recipes are stale, rebuilds them in a sandbox, and
//! swaps the fresh artifacts into the output directory and index.
//!
//! pkgrepo does none of the heavy lifting itself. Git moves the recipe tree,
//! the devtools chroot scripts build recipes, and repo-add maintains the
//! index. What pkgrepo owns is the order in which all of that happens, and
//! the decision of what needs to happen at all.
//!
//! # See Also
//!
//! 1. [`Reconciler`] for the entry points.
//! 2. [`catalog`] for how recipes and artifacts are tracked.
//! 3. [`pipeline`] for how one recipe gets rebuilt.

pub mod catalog;
pub mod command;
pub mod config;
pub mod engine;
pub mod index;
pub mod lock;
pub mod path;
pub mod pipeline;
pub mod sandbox;
pub mod vcs;

pub use catalog::{Artifact, Catalog, Recipe, Version};
pub use config::Settings;
pub use engine::{Reconciler, ReconcileError, RunReport};
