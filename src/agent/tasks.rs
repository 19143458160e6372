//! Task packets: one JSON file per finding that needs a reviewer's decision.
//!
//! - A finding needs review when its pack is suggest-only or its message
//!   hits the pack's `review_on` vocabulary.
//! - Packets are named `<PACK>-<NNN>.json` with a counter per pack, in the
//!   order findings appear.
//! - After writing, every other `*.json` in the tasks directory is removed
//!   so the directory mirrors the current findings exactly.

use super::frame::code_frame;
use crate::models::{Finding, PackId};
use crate::registry::Registry;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize)]
pub struct TaskPacket {
    pub pack: String,
    pub file: String,
    pub line: usize,
    pub message: String,
    pub frame: String,
    pub code_frame: String,
    pub allowed_transforms: Vec<String>,
    pub decision_rule: String,
    pub hints: Vec<String>,
}

/// Packets for the findings that need review, keyed by file name.
pub fn build_packets(
    root: &Path,
    registry: &Registry,
    findings: &[Finding],
    only: Option<&BTreeSet<PackId>>,
) -> Vec<(String, TaskPacket)> {
    let mut counters: BTreeMap<&PackId, usize> = BTreeMap::new();
    let mut out = Vec::new();
    for f in findings {
        if only.map(|set| !set.contains(&f.pack)).unwrap_or(false) {
            continue;
        }
        let Some(pack) = registry.get(&f.pack) else {
            debug!(pack = %f.pack, "finding for unregistered pack");
            continue;
        };
        if !pack.needs_review(&f.message) {
            continue;
        }
        let n = counters.entry(&f.pack).or_insert(0);
        *n += 1;
        let mut hints = pack.hints.clone();
        for t in &f.hint_tokens {
            if !hints.contains(t) {
                hints.push(t.clone());
            }
        }
        out.push((
            format!("{}-{:03}.json", f.pack, n),
            TaskPacket {
                pack: f.pack.to_string(),
                file: f.file.clone(),
                line: f.line,
                message: f.message.clone(),
                frame: f.frame.clone(),
                code_frame: code_frame(root, f),
                allowed_transforms: pack.allowed_transforms.clone(),
                decision_rule: pack.decision_rule.clone(),
                hints,
            },
        ));
    }
    out
}

/// Write packets into `dir` and remove stale ones. Returns written paths.
pub fn emit_tasks(
    root: &Path,
    dir: &Path,
    registry: &Registry,
    findings: &[Finding],
    only: Option<&BTreeSet<PackId>>,
) -> io::Result<Vec<PathBuf>> {
    fs::create_dir_all(dir)?;
    let mut written = Vec::new();
    for (name, packet) in build_packets(root, registry, findings, only) {
        let path = dir.join(name);
        let json = serde_json::to_string_pretty(&packet).map_err(io::Error::other)?;
        fs::write(&path, json + "\n")?;
        written.push(path);
    }
    let keep: BTreeSet<&PathBuf> = written.iter().collect();
    let pattern = dir.join("*.json");
    match glob::glob(&pattern.to_string_lossy()) {
        Ok(paths) => {
            for stale in paths.flatten().filter(|p| !keep.contains(p)) {
                debug!(path = %stale.display(), "removing stale task");
                fs::remove_file(&stale)?;
            }
        }
        Err(e) => warn!(error = %e, "bad task cleanup pattern"),
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::Scanner;
    use crate::scan::tests::settings;
    use tempfile::tempdir;

    const AMBIGUOUS_SUB: &str = r#"# ruff: noqa: I001
import subprocess


def run_cmd(cmd: str) -> int:
    # ambiguous: uses shell=True which is risky
    return subprocess.run(cmd, shell=True).returncode
"#;

    #[test]
    fn shell_usage_becomes_a_packet_and_stale_ones_go() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::write(root.join("tool.py"), AMBIGUOUS_SUB).unwrap();
        let reg = Registry::builtin().unwrap();
        let s = settings(root.to_path_buf());
        let findings = Scanner::new(&s, &reg).scan(&["tool.py".to_string()]).unwrap();

        let tasks = root.join(".packgate/tasks");
        fs::create_dir_all(&tasks).unwrap();
        fs::write(tasks.join("OLD-001.json"), "{}").unwrap();
        fs::write(tasks.join("keep.txt"), "").unwrap();

        let written = emit_tasks(root, &tasks, &reg, &findings, None).unwrap();
        assert_eq!(written, vec![tasks.join("SUB-006-001.json")]);
        assert!(!tasks.join("OLD-001.json").exists());
        assert!(tasks.join("keep.txt").exists());

        let packet: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&written[0]).unwrap()).unwrap();
        assert_eq!(packet["pack"], "SUB-006");
        assert_eq!(packet["message"], "uses shell=True");
        assert_eq!(packet["frame"], "def run_cmd()");
        assert!(packet["code_frame"].as_str().unwrap().contains("> 7 |"));
    }

    #[test]
    fn suggest_only_packs_always_need_review() {
        let root = tempdir().unwrap();
        let reg = Registry::builtin().unwrap();
        let f = |pack: PackId, message: &str| Finding {
            pack,
            file: "q.py".into(),
            line: 1,
            col: 0,
            message: message.into(),
            frame: "<module>".into(),
            hint_tokens: vec!["execute".into()],
            span: None,
        };
        let findings = vec![
            f(PackId::SqlFormat, "string-formatted SQL passed to execute"),
            f(PackId::UnsafeYaml, "unsafe yaml.load; use safe_load"),
            f(PackId::SqlFormat, "string-formatted SQL passed to execute"),
        ];
        let packets = build_packets(root.path(), &reg, &findings, None);
        let names: Vec<_> = packets.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["SQL-007-001.json", "SQL-007-002.json"]);
        let only: BTreeSet<PackId> = [PackId::UnsafeYaml].into_iter().collect();
        assert!(build_packets(root.path(), &reg, &findings, Some(&only)).is_empty());
    }
}
