//! Validator suite: external commands run as black boxes in a directory.
//!
//! Validators run with `PACKGATE_NESTED=1` so a validator that invokes this
//! tool again (a test suite exercising it, for instance) can tell it is
//! nested. Commands marked `skip_when_nested` are skipped when the variable
//! is already set in our own environment.

use crate::config::{ValidatorSpec, NESTED_ENV};
use crate::error::CommandError;
use crate::exec::CommandRunner;
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyReport {
    pub passed: bool,
    /// Name of the first failing validator.
    pub failed: Option<String>,
    /// Captured output of every validator that ran, in order.
    pub output: String,
}

pub fn is_nested() -> bool {
    std::env::var_os(NESTED_ENV).is_some()
}

/// Run `validators` in order inside `dir`, stopping at the first failure.
pub fn run_validators(
    validators: &[ValidatorSpec],
    dir: &Path,
    runner: &CommandRunner,
) -> Result<VerifyReport, CommandError> {
    run_validators_scoped(validators, dir, runner, is_nested())
}

fn run_validators_scoped(
    validators: &[ValidatorSpec],
    dir: &Path,
    runner: &CommandRunner,
    nested: bool,
) -> Result<VerifyReport, CommandError> {
    let mut output = String::new();
    for validator in validators {
        if nested && validator.skip_when_nested {
            info!(validator = %validator.name, "skipped in nested run");
            continue;
        }
        info!(validator = %validator.name, "running validator");
        let out = runner.run(&validator.argv, dir, &[(NESTED_ENV, "1")])?;
        output.push_str(&format!("$ {}\n", validator.argv.join(" ")));
        output.push_str(&out.combined());
        if !out.success() {
            return Ok(VerifyReport {
                passed: false,
                failed: Some(validator.name.clone()),
                output,
            });
        }
    }
    Ok(VerifyReport {
        passed: true,
        failed: None,
        output,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator(name: &str, script: &str, skip_when_nested: bool) -> ValidatorSpec {
        ValidatorSpec {
            name: name.into(),
            argv: vec!["sh".into(), "-c".into(), script.into()],
            skip_when_nested,
        }
    }

    #[test]
    fn stops_at_first_failure() {
        let dir = tempfile::tempdir().unwrap();
        let validators = vec![
            validator("lint", "echo linted", false),
            validator("types", "echo broken >&2; exit 1", false),
            validator("tests", "touch ran", false),
        ];
        let r = run_validators_scoped(&validators, dir.path(), &CommandRunner::default(), false).unwrap();
        assert!(!r.passed);
        assert_eq!(r.failed.as_deref(), Some("types"));
        assert!(r.output.contains("linted\n"));
        assert!(r.output.contains("broken\n"));
        assert!(!dir.path().join("ran").exists());
    }

    #[test]
    fn nested_runs_skip_marked_validators_and_see_the_marker() {
        let dir = tempfile::tempdir().unwrap();
        let validators = vec![
            validator("marker", "test \"$PACKGATE_NESTED\" = 1", false),
            validator("tests", "exit 1", true),
        ];
        let runner = CommandRunner::default();
        assert!(run_validators_scoped(&validators, dir.path(), &runner, true).unwrap().passed);
        assert!(!run_validators_scoped(&validators, dir.path(), &runner, false).unwrap().passed);
    }
}
