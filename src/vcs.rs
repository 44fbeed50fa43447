// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Recipe tree synchronization.
//!
//! The recipe tree is a Git repository, usually with one submodule per
//! recipe. Building mutates it in place: version probing rewrites
//! declaration files, and builds leave sources and packages behind. So
//! before every full reconciliation the tree is forced back to a pristine
//! state, and only then moved forward to whatever the remote has.

use crate::config::VcsSettings;

use auth_git2::GitAuthenticator;
use git2::{
    build::CheckoutBuilder, Config, FetchOptions, RemoteCallbacks, Repository, ResetType,
    SubmoduleUpdateOptions,
};
use std::path::Path;
use tracing::{debug, info, instrument};

/// Layer of indirection for recipe tree synchronization.
pub trait VcsSync {
    /// Discard local mutations of the tree at `root`, then bring it and all
    /// nested sub-trees to the latest known state.
    fn reset_to_latest(&self, root: &Path) -> Result<()>;
}

impl<T> VcsSync for &T
where
    T: VcsSync + ?Sized,
{
    fn reset_to_latest(&self, root: &Path) -> Result<()> {
        (**self).reset_to_latest(root)
    }
}

/// Recipe tree synchronization through libgit2.
#[derive(Debug, Clone)]
pub struct Git2Sync {
    remote: String,
    branch: Option<String>,
}

impl Git2Sync {
    /// Construct new synchronizer following `branch` of `remote`.
    ///
    /// Follows the currently checked out branch if `branch` is [`None`].
    pub fn new(remote: impl Into<String>, branch: Option<String>) -> Self {
        Self {
            remote: remote.into(),
            branch,
        }
    }

    fn current_branch(&self, repository: &Repository) -> Result<String> {
        if let Some(branch) = &self.branch {
            return Ok(branch.clone());
        }

        let head = repository.head()?;
        if !head.is_branch() {
            return Err(VcsError::DetachedHead);
        }

        head.shorthand()
            .map(ToString::to_string)
            .ok_or(VcsError::DetachedHead)
    }

    fn fetch(&self, repository: &Repository, branch: &str) -> Result<()> {
        // INVARIANT: Never prompt, nobody is around to answer.
        let authenticator = GitAuthenticator::default()
            .try_password_prompt(0)
            .prompt_ssh_key_password(false);
        let config = Config::open_default()?;

        let mut rc = RemoteCallbacks::new();
        rc.credentials(authenticator.credentials(&config));
        let mut fo = FetchOptions::new();
        fo.remote_callbacks(rc);

        let refspec = format!("+refs/heads/{branch}:refs/remotes/{}/{branch}", self.remote);
        let mut remote = repository.find_remote(&self.remote)?;
        remote.fetch(&[refspec.as_str()], Some(&mut fo), None)?;

        Ok(())
    }

    fn fast_forward(&self, repository: &Repository, branch: &str) -> Result<()> {
        let fetch_head = repository.find_reference("FETCH_HEAD")?;
        let incoming = repository.reference_to_annotated_commit(&fetch_head)?;
        let (analysis, _) = repository.merge_analysis(&[&incoming])?;

        if analysis.is_up_to_date() {
            debug!("branch {branch} already up to date");
            return Ok(());
        }

        if !analysis.is_fast_forward() {
            return Err(VcsError::Diverged {
                branch: branch.into(),
            });
        }

        let refname = format!("refs/heads/{branch}");
        let message = format!("pkgrepo: fast-forward {branch} to {}", incoming.id());
        match repository.find_reference(&refname) {
            Ok(mut reference) => {
                reference.set_target(incoming.id(), &message)?;
            }
            Err(_) => {
                repository.reference(&refname, incoming.id(), true, &message)?;
            }
        }
        repository.set_head(&refname)?;
        repository.checkout_head(Some(CheckoutBuilder::default().force()))?;
        info!("fast-forward {branch} to {}", incoming.id());

        Ok(())
    }

    fn update_submodules(&self, repository: &Repository) -> Result<()> {
        for mut submodule in repository.submodules()? {
            let name = submodule.name().unwrap_or("<unnamed>").to_string();
            debug!("update submodule {name}");

            let authenticator = GitAuthenticator::default()
                .try_password_prompt(0)
                .prompt_ssh_key_password(false);
            let config = Config::open_default()?;
            let mut rc = RemoteCallbacks::new();
            rc.credentials(authenticator.credentials(&config));
            let mut fo = FetchOptions::new();
            fo.remote_callbacks(rc);
            let mut opts = SubmoduleUpdateOptions::new();
            opts.fetch(fo);

            submodule
                .update(true, Some(&mut opts))
                .map_err(|source| VcsError::Submodule {
                    name: name.clone(),
                    source,
                })?;

            // INVARIANT: Nested trees get the same treatment as the top-level.
            let nested = submodule.open()?;
            discard_local_changes(&nested)?;
            self.update_submodules(&nested)?;
        }

        Ok(())
    }
}

impl From<&VcsSettings> for Git2Sync {
    fn from(settings: &VcsSettings) -> Self {
        Self::new(settings.remote.clone(), settings.branch.clone())
    }
}

impl VcsSync for Git2Sync {
    #[instrument(skip(self), level = "debug")]
    fn reset_to_latest(&self, root: &Path) -> Result<()> {
        info!("synchronize recipe tree at {:?}", root.display());
        let repository = Repository::open(root)?;
        discard_local_changes(&repository)?;

        let branch = self.current_branch(&repository)?;
        self.fetch(&repository, &branch)?;
        self.fast_forward(&repository, &branch)?;
        self.update_submodules(&repository)?;

        Ok(())
    }
}

fn discard_local_changes(repository: &Repository) -> Result<()> {
    let head = repository.head()?.peel_to_commit()?;
    repository.reset(head.as_object(), ResetType::Hard, None)?;

    Ok(())
}

/// Recipe tree synchronization error types.
#[derive(Debug, thiserror::Error)]
pub enum VcsError {
    /// Local branch cannot be fast-forwarded to the remote one.
    #[error("branch {branch} diverged from its remote counterpart")]
    Diverged { branch: String },

    /// No branch to follow was configured and HEAD is detached.
    #[error("cannot determine branch to follow, HEAD is detached")]
    DetachedHead,

    /// Submodule cannot be initialized or updated.
    #[error("failed to update submodule {name}")]
    Submodule {
        name: String,
        #[source]
        source: git2::Error,
    },

    /// Operations from libgit2 fail.
    #[error(transparent)]
    Git2(#[from] git2::Error),
}

/// Friendly result alias :3
pub type Result<T, E = VcsError> = std::result::Result<T, E>;
