// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Package index maintenance.
//!
//! The package index is the database file pacman clients download to learn
//! what the repository offers. Its format is owned by `repo-add` and
//! `repo-remove`, so pkgrepo only ever asks those tools to add or drop
//! entries.

use crate::command::{argv, CommandRunner, Result, SystemRunner};

use std::{
    ffi::OsString,
    path::{Path, PathBuf},
};
use tracing::{info, instrument};

/// Layer of indirection for the package index.
pub trait PackageIndex {
    /// Add artifact file at `artifact` to the index.
    fn register(&self, artifact: &Path) -> Result<()>;

    /// Drop every index entry named `name`.
    fn deregister(&self, name: &str) -> Result<()>;
}

impl<T> PackageIndex for &T
where
    T: PackageIndex + ?Sized,
{
    fn register(&self, artifact: &Path) -> Result<()> {
        (**self).register(artifact)
    }

    fn deregister(&self, name: &str) -> Result<()> {
        (**self).deregister(name)
    }
}

/// Index database maintained through `repo-add` and `repo-remove`.
#[derive(Debug, Clone)]
pub struct RepoDatabase<R = SystemRunner>
where
    R: CommandRunner,
{
    database: PathBuf,
    runner: R,
}

impl<R> RepoDatabase<R>
where
    R: CommandRunner,
{
    /// Construct new index handle for database file at `database`.
    pub fn new(database: impl Into<PathBuf>, runner: R) -> Self {
        Self {
            database: database.into(),
            runner,
        }
    }

    fn workdir(&self) -> &Path {
        self.database.parent().unwrap_or_else(|| Path::new("."))
    }
}

impl<R> PackageIndex for RepoDatabase<R>
where
    R: CommandRunner,
{
    #[instrument(skip(self), level = "debug")]
    fn register(&self, artifact: &Path) -> Result<()> {
        info!("register {:?} in package index", artifact.display());
        let args = argv([
            OsString::from("repo-add"),
            self.database.clone().into_os_string(),
            artifact.as_os_str().to_os_string(),
        ]);
        self.runner.check(&args, self.workdir())?;

        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    fn deregister(&self, name: &str) -> Result<()> {
        info!("deregister {name} from package index");
        let args = argv([
            OsString::from("repo-remove"),
            self.database.clone().into_os_string(),
            name.into(),
        ]);
        self.runner.check(&args, self.workdir())?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{CommandLine, CommandOutput};
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;

    struct Recorder {
        calls: RefCell<Vec<String>>,
        success: bool,
    }

    impl CommandRunner for Recorder {
        fn run(&self, argv: &[OsString], cwd: &Path) -> Result<CommandOutput> {
            assert_eq!(cwd, Path::new("/www/pkgrepo"));
            self.calls
                .borrow_mut()
                .push(CommandLine::from(argv).to_string());
            Ok(CommandOutput {
                stderr: "==> ERROR: nope\n".into(),
                success: self.success,
                ..Default::default()
            })
        }
    }

    #[test]
    fn repo_database_calls_repo_tools() -> anyhow::Result<()> {
        let recorder = Recorder {
            calls: RefCell::new(Vec::new()),
            success: true,
        };
        let index = RepoDatabase::new("/www/pkgrepo/pkgrepo.db.tar.gz", &recorder);

        index.register(Path::new("/www/pkgrepo/foo-1.0-1-x86_64.pkg.tar.xz"))?;
        index.deregister("foo")?;

        let expect = vec![
            "repo-add /www/pkgrepo/pkgrepo.db.tar.gz /www/pkgrepo/foo-1.0-1-x86_64.pkg.tar.xz"
                .to_string(),
            "repo-remove /www/pkgrepo/pkgrepo.db.tar.gz foo".to_string(),
        ];
        assert_eq!(recorder.calls.into_inner(), expect);

        Ok(())
    }

    #[test]
    fn repo_database_reports_failure() {
        let recorder = Recorder {
            calls: RefCell::new(Vec::new()),
            success: false,
        };
        let index = RepoDatabase::new("/www/pkgrepo/pkgrepo.db.tar.gz", &recorder);

        let result = index.deregister("foo");
        assert!(matches!(
            result,
            Err(crate::command::CommandError::Failed { ref stderr, .. }) if stderr == "==> ERROR: nope"
        ));
    }
}
