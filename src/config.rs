//! Configuration discovery and effective settings resolution.
//!
//! packgate reads `packgate.toml|yaml|yml` from the repository root (or
//! closest ancestor) and merges it with CLI flags to produce an `Effective`
//! config that is passed explicitly to every stage.
//! Defaults:
//! - `registry`: built-in pack table
//! - `output`: `human`
//! - `scan.exclude`: `["tests/"]`, `scan.max_function_lines`: 100
//! - `scan.findings`: `packgate-scan.jsonl`
//! - `gate.gate_on`: every high-severity pack
//! - `gate.waiver_file_pattern`: `docs/agents/waivers/PR-{pr}.md`
//! - `agent.tasks_dir`: `.packgate/tasks`
//! - `verify.commands`: ruff, mypy, pytest (pytest skipped when nested)
//! - `verify.timeout_secs`: none
//!
//! Overrides precedence: CLI > config file > defaults.

use crate::error::ConfigError;
use crate::models::PackId;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_NAMES: [&str; 3] = ["packgate.toml", "packgate.yaml", "packgate.yml"];
pub const DEFAULT_FINDINGS: &str = "packgate-scan.jsonl";
pub const DEFAULT_WAIVER_PATTERN: &str = "docs/agents/waivers/PR-{pr}.md";
pub const DEFAULT_WAIVER_MARKER: &str = r"\b(?:pack|tf_id)\s*:\s*([A-Z]+-\d{3})\b";
/// Set for validator processes so a nested packgate run can tell.
pub const NESTED_ENV: &str = "PACKGATE_NESTED";

#[derive(Debug, Default, Deserialize, Clone)]
/// `[scan]` section.
pub struct ScanCfg {
    pub exclude: Option<Vec<String>>,
    pub max_function_lines: Option<usize>,
    pub findings: Option<String>,
}

#[derive(Debug, Default, Deserialize, Clone)]
/// `[gate]` section.
pub struct GateCfg {
    pub gate_on: Option<Vec<String>>,
    pub waiver_file_pattern: Option<String>,
    pub waiver_marker: Option<String>,
}

#[derive(Debug, Default, Deserialize, Clone)]
/// `[agent]` section.
pub struct AgentCfg {
    pub tasks_dir: Option<String>,
    pub workspace_exclude: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize, Clone)]
/// `[verify]` section.
pub struct VerifyCfg {
    pub timeout_secs: Option<u64>,
    pub commands: Option<Vec<ValidatorSpec>>,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
/// One external validator invocation (`[[verify.commands]]`).
pub struct ValidatorSpec {
    pub name: String,
    pub argv: Vec<String>,
    #[serde(default)]
    pub skip_when_nested: bool,
}

#[derive(Debug, Default, Deserialize, Clone)]
/// Root configuration loaded from `packgate.toml|yaml`.
pub struct PackgateConfig {
    pub registry: Option<String>,
    pub output: Option<String>,
    #[serde(default)]
    pub scan: Option<ScanCfg>,
    #[serde(default)]
    pub gate: Option<GateCfg>,
    #[serde(default)]
    pub agent: Option<AgentCfg>,
    #[serde(default)]
    pub verify: Option<VerifyCfg>,
}

#[derive(Debug, Clone)]
/// Scanner inputs: where files live and which roots are never audited.
pub struct ScanSettings {
    pub root: PathBuf,
    pub exclude: Vec<String>,
    pub max_function_lines: usize,
}

#[derive(Debug, Clone)]
pub struct GateSettings {
    /// `None` means "every high-severity pack in the registry".
    pub gate_on: Option<BTreeSet<PackId>>,
    pub waiver_file_pattern: String,
    pub waiver_marker: String,
}

#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub tasks_dir: PathBuf,
    pub workspace_exclude: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct VerifySettings {
    pub timeout: Option<Duration>,
    pub commands: Vec<ValidatorSpec>,
}

#[derive(Debug, Clone)]
/// Fully-resolved configuration used by commands after applying precedence.
pub struct Effective {
    pub repo_root: PathBuf,
    pub config_found: bool,
    pub registry: Option<PathBuf>,
    pub output: String,
    pub findings: PathBuf,
    pub scan: ScanSettings,
    pub gate: GateSettings,
    pub agent: AgentSettings,
    pub verify: VerifySettings,
}

/// Check a change identifier before it becomes part of a waiver file name.
pub fn parse_change_id(id: &str) -> Result<String, String> {
    if id.trim().is_empty() {
        return Err("change id must not be empty".into());
    }
    if id.contains('/') || id.contains('\\') || id.contains("..") {
        return Err(format!("change id `{}` must not contain `/`, `\\` or `..`", id));
    }
    Ok(id.to_string())
}

impl Effective {
    /// Waiver record for change `change_id` (see [`parse_change_id`]).
    pub fn waiver_path(&self, change_id: &str) -> PathBuf {
        self.repo_root
            .join(self.gate.waiver_file_pattern.replace("{pr}", change_id))
    }
}

pub fn default_validators() -> Vec<ValidatorSpec> {
    vec![
        ValidatorSpec {
            name: "ruff".into(),
            argv: vec!["ruff".into(), "check".into(), ".".into()],
            skip_when_nested: false,
        },
        ValidatorSpec {
            name: "mypy".into(),
            argv: vec!["mypy".into(), ".".into()],
            skip_when_nested: false,
        },
        ValidatorSpec {
            name: "pytest".into(),
            argv: vec!["pytest".into(), "-q".into()],
            skip_when_nested: true,
        },
    ]
}

/// Walk upward from `start` to detect the repository root.
///
/// Stops when a `packgate.toml|yaml|yml` or a `.git` directory is found.
pub fn detect_repo_root(start: &Path) -> PathBuf {
    let mut cur = start;
    loop {
        if CONFIG_NAMES.iter().any(|n| cur.join(n).exists()) || cur.join(".git").exists() {
            return cur.to_path_buf();
        }
        match cur.parent() {
            Some(p) => cur = p,
            None => return start.to_path_buf(),
        }
    }
}

/// Load `PackgateConfig` from `packgate.toml` or `packgate.yaml|yml` if present.
pub fn load_config(root: &Path) -> Result<Option<PackgateConfig>, ConfigError> {
    for name in CONFIG_NAMES {
        let path = root.join(name);
        if !path.exists() {
            continue;
        }
        let text = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        let parsed = if name.ends_with(".toml") {
            toml::from_str::<PackgateConfig>(&text).map_err(|e| e.to_string())
        } else {
            serde_yaml::from_str::<PackgateConfig>(&text).map_err(|e| e.to_string())
        };
        return parsed
            .map(Some)
            .map_err(|message| ConfigError::Parse { path, message });
    }
    Ok(None)
}

/// Resolve `Effective` by merging CLI flags, discovered config, and defaults.
pub fn resolve_effective(
    cli_repo_root: Option<&str>,
    cli_registry: Option<&str>,
    cli_output: Option<&str>,
) -> Result<Effective, ConfigError> {
    let start = PathBuf::from(cli_repo_root.unwrap_or("."));
    let start = start.canonicalize().unwrap_or(start);
    let repo_root = detect_repo_root(&start);
    let loaded = load_config(&repo_root)?;
    let config_found = loaded.is_some();
    let cfg = loaded.unwrap_or_default();

    let registry = cli_registry
        .map(str::to_string)
        .or(cfg.registry)
        .map(|r| repo_root.join(r));

    let output = cli_output
        .map(str::to_string)
        .or(cfg.output)
        .unwrap_or_else(|| "human".to_string());

    let scan_cfg = cfg.scan.unwrap_or_default();
    let findings = repo_root.join(
        scan_cfg
            .findings
            .unwrap_or_else(|| DEFAULT_FINDINGS.to_string()),
    );
    let scan = ScanSettings {
        root: repo_root.clone(),
        exclude: scan_cfg
            .exclude
            .unwrap_or_else(|| vec!["tests/".to_string()]),
        max_function_lines: scan_cfg.max_function_lines.unwrap_or(100),
    };

    let gate_cfg = cfg.gate.unwrap_or_default();
    let gate = GateSettings {
        gate_on: gate_cfg
            .gate_on
            .map(|ids| ids.into_iter().map(PackId::from).collect()),
        waiver_file_pattern: gate_cfg
            .waiver_file_pattern
            .unwrap_or_else(|| DEFAULT_WAIVER_PATTERN.to_string()),
        waiver_marker: gate_cfg
            .waiver_marker
            .unwrap_or_else(|| DEFAULT_WAIVER_MARKER.to_string()),
    };

    let agent_cfg = cfg.agent.unwrap_or_default();
    let agent = AgentSettings {
        tasks_dir: repo_root.join(
            agent_cfg
                .tasks_dir
                .unwrap_or_else(|| ".packgate/tasks".to_string()),
        ),
        workspace_exclude: agent_cfg.workspace_exclude.unwrap_or_else(|| {
            [".git", "target", ".venv", "node_modules"]
                .iter()
                .map(|s| s.to_string())
                .collect()
        }),
    };

    let verify_cfg = cfg.verify.unwrap_or_default();
    let verify = VerifySettings {
        timeout: verify_cfg.timeout_secs.map(Duration::from_secs),
        commands: verify_cfg.commands.unwrap_or_else(default_validators),
    };

    Ok(Effective {
        repo_root,
        config_found,
        registry,
        output,
        findings,
        scan,
        gate,
        agent,
        verify,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_detect_and_load_toml() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        let mut f = fs::File::create(root.join("packgate.toml")).unwrap();
        writeln!(
            f,
            "{}",
            r#"
output = "json"
registry = "conf/packs.toml"
[scan]
exclude = ["tests/", "fixtures/"]
max_function_lines = 60
[gate]
gate_on = ["BEX-001", "SQL-007"]
[verify]
timeout_secs = 30
[[verify.commands]]
name = "lint"
argv = ["ruff", "check", "."]
    "#
        )
        .unwrap();

        let eff = resolve_effective(root.to_str(), None, None).unwrap();
        assert!(eff.config_found);
        assert_eq!(eff.output, "json");
        assert!(eff.registry.as_ref().unwrap().ends_with("conf/packs.toml"));
        assert_eq!(eff.scan.max_function_lines, 60);
        assert_eq!(eff.scan.exclude.len(), 2);
        let gated = eff.gate.gate_on.unwrap();
        assert!(gated.contains(&PackId::SqlFormat));
        assert_eq!(eff.verify.timeout, Some(Duration::from_secs(30)));
        assert_eq!(eff.verify.commands.len(), 1);
        assert!(!eff.verify.commands[0].skip_when_nested);
    }

    #[test]
    fn test_load_yaml_and_defaults() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::write(
            root.join("packgate.yaml"),
            "output: human\nagent:\n  tasks_dir: out/tasks\n",
        )
        .unwrap();

        let eff = resolve_effective(root.to_str(), None, None).unwrap();
        assert_eq!(eff.output, "human");
        assert!(eff.agent.tasks_dir.ends_with("out/tasks"));
        assert!(eff.registry.is_none());
        assert!(eff.gate.gate_on.is_none());
        assert_eq!(eff.scan.exclude, vec!["tests/".to_string()]);
        assert!(eff.findings.ends_with(DEFAULT_FINDINGS));
        assert!(eff.verify.timeout.is_none());
        assert_eq!(eff.verify.commands, default_validators());
    }

    #[test]
    fn test_cli_overrides_config() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::write(root.join("packgate.toml"), "output = \"json\"\n").unwrap();
        let eff = resolve_effective(root.to_str(), Some("mine.yaml"), Some("human")).unwrap();
        assert_eq!(eff.output, "human");
        assert!(eff.registry.unwrap().ends_with("mine.yaml"));
    }

    #[test]
    fn test_detect_root_from_subdir_and_waiver_path() {
        let dir = tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        fs::create_dir_all(root.join(".git")).unwrap();
        fs::create_dir_all(root.join("pkg/sub")).unwrap();
        let eff = resolve_effective(root.join("pkg/sub").to_str(), None, None).unwrap();
        assert_eq!(eff.repo_root, root);
        assert!(!eff.config_found);
        assert_eq!(
            eff.waiver_path("42"),
            root.join("docs/agents/waivers/PR-42.md")
        );
    }

    #[test]
    fn test_change_id_cannot_leave_the_waiver_dir() {
        assert_eq!(parse_change_id("42").unwrap(), "42");
        assert_eq!(parse_change_id("feature-x.2").unwrap(), "feature-x.2");
        for bad in ["../../x", "a/b", "a\\b", "..", " "] {
            assert!(parse_change_id(bad).is_err(), "accepted {:?}", bad);
        }
    }

    #[test]
    fn test_malformed_config_is_an_error() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("packgate.toml"), "output = [").unwrap();
        let err = resolve_effective(dir.path().to_str(), None, None).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
