//! Version-control capability used by the gate and the ingestion pipeline.
//!
//! The pipeline only needs four things: probe a diff forward, probe it in
//! reverse, apply it, and list changed files against a base ref. `GitCli`
//! provides them by shelling out to `git` through the command runner.

use crate::error::CommandError;
use crate::exec::{CommandOutput, CommandRunner};
use std::io::Write;
use std::path::Path;
use tracing::debug;

pub trait Vcs {
    /// True when `patch` would apply cleanly to `dir`.
    fn check_apply(&self, dir: &Path, patch: &str) -> Result<bool, CommandError>;
    /// True when `patch` is already present in `dir` (reverse applies).
    fn check_reverse(&self, dir: &Path, patch: &str) -> Result<bool, CommandError>;
    /// Apply `patch` to `dir`, returning the command output on failure.
    fn apply(&self, dir: &Path, patch: &str) -> Result<Result<(), String>, CommandError>;
    /// Paths changed between `base` and `HEAD`.
    fn changed_files(&self, dir: &Path, base: &str) -> Result<Vec<String>, CommandError>;
}

pub struct GitCli {
    runner: CommandRunner,
}

impl GitCli {
    pub fn new(runner: CommandRunner) -> Self {
        GitCli { runner }
    }

    fn git(&self, dir: &Path, args: &[&str]) -> Result<CommandOutput, CommandError> {
        let mut argv = vec!["git".to_string()];
        argv.extend(args.iter().map(|a| a.to_string()));
        self.runner.run(&argv, dir, &[])
    }

    /// Run `git apply <flags> <file>` with `patch` written to a temp file.
    fn git_apply(&self, dir: &Path, flags: &[&str], patch: &str) -> Result<CommandOutput, CommandError> {
        let spawn_err = |source| CommandError::Spawn {
            program: "git".into(),
            source,
        };
        let mut file = tempfile::NamedTempFile::new().map_err(spawn_err)?;
        file.write_all(patch.as_bytes()).map_err(spawn_err)?;
        file.flush().map_err(spawn_err)?;
        let path = file.path().to_string_lossy().to_string();
        let mut args = vec!["apply"];
        args.extend_from_slice(flags);
        args.push(&path);
        self.git(dir, &args)
    }
}

impl Vcs for GitCli {
    fn check_apply(&self, dir: &Path, patch: &str) -> Result<bool, CommandError> {
        Ok(self.git_apply(dir, &["--check"], patch)?.success())
    }

    fn check_reverse(&self, dir: &Path, patch: &str) -> Result<bool, CommandError> {
        Ok(self.git_apply(dir, &["--reverse", "--check"], patch)?.success())
    }

    fn apply(&self, dir: &Path, patch: &str) -> Result<Result<(), String>, CommandError> {
        let out = self.git_apply(dir, &[], patch)?;
        if out.success() {
            Ok(Ok(()))
        } else {
            Ok(Err(out.combined()))
        }
    }

    fn changed_files(&self, dir: &Path, base: &str) -> Result<Vec<String>, CommandError> {
        let remote = format!("origin/{}...HEAD", base);
        let mut out = self.git(dir, &["diff", "--name-only", &remote])?;
        if !out.success() {
            debug!(base, "remote ref missing; diffing against local ref");
            let local = format!("{}...HEAD", base);
            out = self.git(dir, &["diff", "--name-only", &local])?;
        }
        if !out.success() {
            return Ok(Vec::new());
        }
        Ok(out
            .stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    pub(crate) fn git(dir: &Path, args: &[&str]) {
        let argv: Vec<String> = std::iter::once("git")
            .chain(args.iter().copied())
            .map(str::to_string)
            .collect();
        let out = CommandRunner::default().run(&argv, dir, &[]).unwrap();
        assert!(out.success(), "git {:?} failed: {}", args, out.combined());
    }

    pub(crate) fn init_repo(dir: &Path) {
        git(dir, &["init", "-q", "-b", "main"]);
        git(dir, &["config", "user.email", "dev@example.com"]);
        git(dir, &["config", "user.name", "Dev"]);
    }

    pub(crate) const PATCH: &str = "--- a/m.py\n+++ b/m.py\n@@ -1,2 +1,2 @@\n import yaml\n-cfg = yaml.load(s)\n+cfg = yaml.safe_load(s)\n";

    #[test]
    fn probes_and_applies_diffs() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("m.py"), "import yaml\ncfg = yaml.load(s)\n").unwrap();
        let vcs = GitCli::new(CommandRunner::default());
        assert!(vcs.check_apply(dir.path(), PATCH).unwrap());
        assert!(!vcs.check_reverse(dir.path(), PATCH).unwrap());
        assert_eq!(vcs.apply(dir.path(), PATCH).unwrap(), Ok(()));
        assert!(vcs.check_reverse(dir.path(), PATCH).unwrap());
        assert!(!vcs.check_apply(dir.path(), PATCH).unwrap());
        assert!(vcs.apply(dir.path(), PATCH).unwrap().is_err());
    }

    #[test]
    fn changed_files_fall_back_to_local_ref() {
        let dir = tempdir().unwrap();
        init_repo(dir.path());
        fs::write(dir.path().join("a.py"), "x = 1\n").unwrap();
        git(dir.path(), &["add", "."]);
        git(dir.path(), &["commit", "-q", "-m", "base"]);
        git(dir.path(), &["branch", "base"]);
        fs::write(dir.path().join("b.py"), "y = 2\n").unwrap();
        git(dir.path(), &["add", "."]);
        git(dir.path(), &["commit", "-q", "-m", "change"]);
        let vcs = GitCli::new(CommandRunner::default());
        assert_eq!(vcs.changed_files(dir.path(), "base").unwrap(), vec!["b.py".to_string()]);
        assert!(vcs.changed_files(dir.path(), "nope").unwrap().is_empty());
    }
}
