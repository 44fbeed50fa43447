// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use crate::{FakeIndex, FakeRunner, FakeSandbox, FakeVcs, RepoFixture, Workspace};

use anyhow::Result;
use git2::Repository;
use pkgrepo::{
    lock::{LockError, RunLock},
    pipeline::PipelineError,
    vcs::{Git2Sync, VcsSync},
    ReconcileError, Reconciler,
};
use pretty_assertions::assert_eq;
use std::fs;

struct Fakes {
    vcs: FakeVcs,
    sandbox: FakeSandbox,
    index: FakeIndex,
    runner: FakeRunner,
}

impl Fakes {
    fn new(sandbox: FakeSandbox) -> Self {
        Self {
            vcs: FakeVcs::default(),
            sandbox,
            index: FakeIndex::default(),
            runner: FakeRunner::default(),
        }
    }

    fn reconciler(
        &self,
        workspace: &Workspace,
    ) -> Reconciler<&FakeVcs, &FakeSandbox, &FakeIndex, &FakeRunner> {
        Reconciler::new(
            workspace.settings.clone(),
            &self.vcs,
            &self.sandbox,
            &self.index,
            &self.runner,
        )
    }
}

#[test]
fn reconcile_all_builds_never_built_recipes() -> Result<()> {
    let workspace = Workspace::new()?;
    workspace.add_recipe("bar", "2.0", "3")?;
    workspace.add_recipe("foo", "1.0", "1")?;
    let fakes = Fakes::new(FakeSandbox::default());

    let report = fakes.reconciler(&workspace).reconcile_all()?;

    assert_eq!(report.rounds, 1);
    assert_eq!(report.built, vec!["bar".to_string(), "foo".to_string()]);
    assert!(report.removed.is_empty());
    assert_eq!(fakes.vcs.syncs.get(), 1);
    assert_eq!(
        workspace.installed()?,
        vec![
            "bar-2.0-3-x86_64.pkg.tar.xz".to_string(),
            "foo-1.0-1-x86_64.pkg.tar.xz".to_string(),
        ]
    );
    assert_eq!(fakes.index.entries().len(), 2);
    assert!(fakes
        .runner
        .calls
        .borrow()
        .iter()
        .any(|call| call == "git clean -d -f -x"));
    assert!(!workspace
        .recipes()
        .join("foo/foo-1.0-1-x86_64.pkg.tar.xz")
        .exists());

    Ok(())
}

#[test]
fn reconcile_all_twice_builds_nothing_the_second_time() -> Result<()> {
    let workspace = Workspace::new()?;
    workspace.add_recipe("foo", "1.0", "1")?;
    let fakes = Fakes::new(FakeSandbox::default());

    fakes.reconciler(&workspace).reconcile_all()?;
    let report = fakes.reconciler(&workspace).reconcile_all()?;

    assert_eq!(report.rounds, 0);
    assert!(report.built.is_empty());
    assert_eq!(fakes.sandbox.attempts_of("foo"), 1);
    assert_eq!(fakes.vcs.syncs.get(), 2);

    Ok(())
}

#[test]
fn reconcile_all_skips_up_to_date_recipe() -> Result<()> {
    let workspace = Workspace::new()?;
    workspace.add_recipe("foo", "1.0", "1")?;
    workspace.add_artifact("foo-1.0-1-x86_64.pkg.tar.xz")?;
    let fakes = Fakes::new(FakeSandbox::default());

    let report = fakes.reconciler(&workspace).reconcile_all()?;

    assert_eq!(report.rounds, 0);
    assert!(report.built.is_empty());
    assert!(fakes.sandbox.attempts.borrow().is_empty());
    assert!(fakes.index.log.borrow().is_empty());
    assert_eq!(
        fs::read(workspace.output().join("foo-1.0-1-x86_64.pkg.tar.xz"))?,
        b"old build"
    );

    Ok(())
}

#[test]
fn reconcile_all_replaces_stale_artifact() -> Result<()> {
    let workspace = Workspace::new()?;
    workspace.add_recipe("foo", "1.1", "1")?;
    workspace.add_artifact("foo-1.0-1-x86_64.pkg.tar.xz")?;
    let fakes = Fakes::new(FakeSandbox::default());
    fakes
        .index
        .entries
        .borrow_mut()
        .insert("foo".into(), "foo-1.0-1-x86_64.pkg.tar.xz".into());

    let report = fakes.reconciler(&workspace).reconcile_all()?;

    assert_eq!(report.built, vec!["foo".to_string()]);
    assert_eq!(
        workspace.installed()?,
        vec!["foo-1.1-1-x86_64.pkg.tar.xz".to_string()]
    );
    assert_eq!(
        fakes.index.log.borrow().clone(),
        vec![
            "remove foo".to_string(),
            "add foo-1.1-1-x86_64.pkg.tar.xz".to_string(),
        ]
    );
    assert!(fakes.index.duplicates.borrow().is_empty());

    Ok(())
}

#[test]
fn reconcile_all_removes_orphaned_artifact() -> Result<()> {
    let workspace = Workspace::new()?;
    workspace.add_recipe("bar", "2.0", "3")?;
    workspace.add_artifact("bar-2.0-3-x86_64.pkg.tar.xz")?;
    workspace.add_artifact("foo-1.0-1-x86_64.pkg.tar.xz")?;
    let fakes = Fakes::new(FakeSandbox::default());

    let report = fakes.reconciler(&workspace).reconcile_all()?;

    assert_eq!(report.removed, vec!["foo".to_string()]);
    assert!(report.built.is_empty());
    assert_eq!(
        workspace.installed()?,
        vec!["bar-2.0-3-x86_64.pkg.tar.xz".to_string()]
    );
    assert_eq!(
        fakes.index.log.borrow().clone(),
        vec!["remove foo".to_string()]
    );

    Ok(())
}

#[test]
fn reconcile_all_gives_up_when_round_makes_no_progress() -> Result<()> {
    let workspace = Workspace::new()?;
    workspace.add_recipe("a", "1.0", "1")?;
    workspace.add_recipe("b", "1.0", "1")?;
    let sandbox = FakeSandbox {
        broken: ["a".to_string()].into(),
        ..Default::default()
    };
    let fakes = Fakes::new(sandbox);

    let result = fakes.reconciler(&workspace).reconcile_all();

    match result {
        Err(ReconcileError::Unresolvable { recipes, rounds }) => {
            assert_eq!(recipes, vec!["a".to_string()]);
            assert_eq!(rounds, 2);
        }
        other => panic!("expected unresolvable run, got {other:?}"),
    }
    assert_eq!(fakes.sandbox.attempts_of("a"), 2);
    assert_eq!(fakes.sandbox.attempts_of("b"), 1);
    assert_eq!(
        workspace.installed()?,
        vec!["b-1.0-1-x86_64.pkg.tar.xz".to_string()]
    );

    Ok(())
}

#[test]
fn reconcile_all_retries_recipe_after_its_prerequisite() -> Result<()> {
    let workspace = Workspace::new()?;
    workspace.add_recipe("a", "1.0", "1")?;
    workspace.add_recipe("b", "1.0", "1")?;
    let sandbox = FakeSandbox {
        needs: [("a".to_string(), "b".to_string())].into(),
        ..Default::default()
    };
    let fakes = Fakes::new(sandbox);

    let report = fakes.reconciler(&workspace).reconcile_all()?;

    assert_eq!(report.rounds, 2);
    assert_eq!(report.built, vec!["b".to_string(), "a".to_string()]);
    assert_eq!(
        fakes.sandbox.attempts.borrow().clone(),
        vec!["a".to_string(), "b".to_string(), "a".to_string()]
    );

    Ok(())
}

#[test]
fn reconcile_all_aborts_on_missing_artifact() -> Result<()> {
    let workspace = Workspace::new()?;
    workspace.add_recipe("a", "1.0", "1")?;
    workspace.add_recipe("b", "1.0", "1")?;
    let sandbox = FakeSandbox {
        hollow: ["a".to_string()].into(),
        ..Default::default()
    };
    let fakes = Fakes::new(sandbox);

    let result = fakes.reconciler(&workspace).reconcile_all();

    assert!(matches!(
        result,
        Err(ReconcileError::Pipeline {
            ref recipe,
            source: PipelineError::MissingArtifact { .. },
        }) if recipe == "a"
    ));
    assert_eq!(fakes.sandbox.attempts_of("a"), 1);
    assert_eq!(fakes.sandbox.attempts_of("b"), 0);

    Ok(())
}

#[test]
fn reconcile_all_builds_recipe_whose_version_cannot_be_probed() -> Result<()> {
    let workspace = Workspace::new()?;
    workspace.add_recipe("foo", "1.0", "1")?;
    workspace.add_artifact("foo-1.0-1-x86_64.pkg.tar.xz")?;
    let sandbox = FakeSandbox {
        unprobeable: ["foo".to_string()].into(),
        ..Default::default()
    };
    let fakes = Fakes::new(sandbox);

    let report = fakes.reconciler(&workspace).reconcile_all()?;

    assert_eq!(report.rounds, 1);
    assert_eq!(report.built, vec!["foo".to_string()]);
    assert_eq!(
        fs::read(workspace.output().join("foo-1.0-1-x86_64.pkg.tar.xz"))?,
        b"fresh build"
    );

    Ok(())
}

#[test]
fn reconcile_one_rebuilds_up_to_date_recipe() -> Result<()> {
    let workspace = Workspace::new()?;
    workspace.add_recipe("bar", "2.0", "3")?;
    workspace.add_recipe("foo", "1.0", "1")?;
    workspace.add_artifact("foo-1.0-1-x86_64.pkg.tar.xz")?;
    let fakes = Fakes::new(FakeSandbox::default());
    fakes
        .index
        .entries
        .borrow_mut()
        .insert("foo".into(), "foo-1.0-1-x86_64.pkg.tar.xz".into());

    let report = fakes.reconciler(&workspace).reconcile_one("foo")?;

    assert_eq!(report.rounds, 1);
    assert_eq!(report.built, vec!["foo".to_string()]);
    assert_eq!(fakes.vcs.syncs.get(), 0);
    assert_eq!(
        fakes.sandbox.attempts.borrow().clone(),
        vec!["foo".to_string()]
    );
    assert_eq!(
        fakes.index.log.borrow().clone(),
        vec![
            "remove foo".to_string(),
            "add foo-1.0-1-x86_64.pkg.tar.xz".to_string(),
        ]
    );
    assert!(fakes.index.duplicates.borrow().is_empty());
    assert_eq!(
        fs::read(workspace.output().join("foo-1.0-1-x86_64.pkg.tar.xz"))?,
        b"fresh build"
    );

    Ok(())
}

#[test]
fn reconcile_one_rejects_unknown_recipe() -> Result<()> {
    let workspace = Workspace::new()?;
    workspace.add_recipe("foo", "1.0", "1")?;
    let fakes = Fakes::new(FakeSandbox::default());

    let result = fakes.reconciler(&workspace).reconcile_one("nope");

    assert!(matches!(
        result,
        Err(ReconcileError::UnknownRecipe { ref name }) if name == "nope"
    ));
    assert!(fakes.sandbox.attempts.borrow().is_empty());
    assert!(fakes.index.log.borrow().is_empty());

    Ok(())
}

#[test]
fn runs_refuse_to_overlap() -> Result<()> {
    let workspace = Workspace::new()?;
    workspace.add_recipe("foo", "1.0", "1")?;
    let fakes = Fakes::new(FakeSandbox::default());

    let lock = RunLock::acquire(workspace.output())?;
    let result = fakes.reconciler(&workspace).reconcile_all();
    assert!(matches!(
        result,
        Err(ReconcileError::Lock(LockError::Busy { .. }))
    ));
    assert_eq!(fakes.vcs.syncs.get(), 0);

    drop(lock);
    fakes.reconciler(&workspace).reconcile_all()?;
    assert_eq!(fakes.sandbox.attempts_of("foo"), 1);

    Ok(())
}

#[test]
fn failed_deregistration_is_retried_before_registering() -> Result<()> {
    let workspace = Workspace::new()?;
    workspace.add_recipe("bar", "2.0", "3")?;
    workspace.add_recipe("foo", "1.1", "1")?;
    workspace.add_artifact("foo-1.0-1-x86_64.pkg.tar.xz")?;
    let mut fakes = Fakes::new(FakeSandbox::default());
    fakes.index = FakeIndex::default().with_entry("foo", "foo-1.0-1-x86_64.pkg.tar.xz");
    fakes.index.failing_deregisters.set(1);

    let report = fakes.reconciler(&workspace).reconcile_all()?;

    assert_eq!(report.rounds, 2);
    assert_eq!(report.built, vec!["bar".to_string(), "foo".to_string()]);
    assert!(fakes.index.duplicates.borrow().is_empty());
    assert_eq!(
        fakes.index.entries().get("foo").map(String::as_str),
        Some("foo-1.1-1-x86_64.pkg.tar.xz")
    );
    assert_eq!(
        fakes.index.log.borrow().clone(),
        vec![
            "add bar-2.0-3-x86_64.pkg.tar.xz".to_string(),
            "remove foo".to_string(),
            "add foo-1.1-1-x86_64.pkg.tar.xz".to_string(),
        ]
    );

    Ok(())
}

#[test]
fn refused_registration_leaves_nothing_behind() -> Result<()> {
    let workspace = Workspace::new()?;
    workspace.add_recipe("foo", "1.0", "1")?;
    let fakes = Fakes::new(FakeSandbox::default());
    fakes.index.refuse_register.set(true);

    let result = fakes.reconciler(&workspace).reconcile_all();
    assert!(matches!(
        result,
        Err(ReconcileError::Unresolvable { ref recipes, rounds: 1 }) if recipes == &["foo".to_string()]
    ));
    assert!(workspace.installed()?.is_empty());

    fakes.index.refuse_register.set(false);
    let report = fakes.reconciler(&workspace).reconcile_all()?;

    assert_eq!(report.built, vec!["foo".to_string()]);
    assert_eq!(
        workspace.installed()?,
        vec!["foo-1.0-1-x86_64.pkg.tar.xz".to_string()]
    );
    assert_eq!(
        fakes.index.entries().get("foo").map(String::as_str),
        Some("foo-1.0-1-x86_64.pkg.tar.xz")
    );

    Ok(())
}

#[test]
fn recipes_sharing_a_name_are_skipped() -> Result<()> {
    let workspace = Workspace::new()?;
    workspace.add_recipe("foo", "1.0", "1")?;
    let copy = workspace.recipes().join("foo-copy");
    fs::create_dir_all(&copy)?;
    fs::write(copy.join("PKGBUILD"), "pkgname=foo\npkgver=1.0\npkgrel=1\n")?;
    workspace.add_recipe("bar", "2.0", "3")?;
    let fakes = Fakes::new(FakeSandbox::default());

    let first = fakes.reconciler(&workspace).reconcile_all()?;
    let second = fakes.reconciler(&workspace).reconcile_all()?;

    assert_eq!(first.built, vec!["bar".to_string()]);
    assert!(second.built.is_empty());
    assert_eq!(fakes.sandbox.attempts_of("foo"), 0);
    assert!(fakes.index.duplicates.borrow().is_empty());

    Ok(())
}

#[test]
fn orphans_sharing_a_name_are_deregistered_once() -> Result<()> {
    let workspace = Workspace::new()?;
    workspace.add_artifact("foo-1.0-1-x86_64.pkg.tar.xz")?;
    workspace.add_artifact("foo-1.1-1-x86_64.pkg.tar.xz")?;
    let mut fakes = Fakes::new(FakeSandbox::default());
    fakes.index = FakeIndex {
        strict: true,
        ..Default::default()
    }
    .with_entry("foo", "foo-1.1-1-x86_64.pkg.tar.xz");

    let report = fakes.reconciler(&workspace).reconcile_all()?;

    assert_eq!(report.removed, vec!["foo".to_string()]);
    assert!(workspace.installed()?.is_empty());
    assert!(fakes.index.entries().is_empty());
    assert_eq!(
        fakes.index.log.borrow().clone(),
        vec!["remove foo".to_string()]
    );

    Ok(())
}

#[test]
fn git2_sync_fast_forwards_and_discards_local_changes() -> Result<()> {
    let root = tempfile::tempdir()?;
    let upstream = RepoFixture::new(root.path().join("upstream"))?;
    upstream.stage_and_commit("PKGBUILD", "pkgname=foo\npkgver=1.0\npkgrel=1\n")?;

    let local_path = root.path().join("local");
    let url = upstream.path().to_string_lossy().into_owned();
    let local = Repository::clone(&url, &local_path)?;
    fs::write(local_path.join("PKGBUILD"), "pkgname=foo\npkgver=r42\npkgrel=1\n")?;

    upstream.stage_and_commit("PKGBUILD", "pkgname=foo\npkgver=1.1\npkgrel=1\n")?;
    upstream.stage_and_commit("README", "foo packaging\n")?;

    Git2Sync::new("origin", None).reset_to_latest(&local_path)?;

    assert_eq!(
        fs::read_to_string(local_path.join("PKGBUILD"))?,
        "pkgname=foo\npkgver=1.1\npkgrel=1\n"
    );
    assert_eq!(
        fs::read_to_string(local_path.join("README"))?,
        "foo packaging\n"
    );
    assert_eq!(local.head()?.shorthand(), Some("main"));

    Ok(())
}
