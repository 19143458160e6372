//! Patcher: minimal, idempotent text fixes for auto-fixable packs.
//!
//! - Fixers run in a fixed registration order. Each one sees the text left
//!   by the previous fixer, parsed afresh.
//! - A fixer only returns edits; applying them (descending, overlap-safe)
//!   happens here, followed by a re-parse. Output that no longer parses is
//!   discarded for that fixer.
//! - An edit dropped for overlapping another one is picked up by re-running
//!   the same fixer on its own output until it yields nothing, so the
//!   patched text is a fixpoint and each pack contributes at most one diff.
//! - Only packs the registry enables and marks auto-fixable are patched.

pub mod edit;
pub mod imports;

mod blocks;
mod calls;
mod defaults;
mod handlers;

use crate::config::ScanSettings;
use crate::error::{ScanError, SyntaxError};
use crate::models::{FixMode, PackId};
use crate::registry::Registry;
use crate::scan;
use crate::syntax::{self, Module};
use edit::{apply_edits, Edit};
use rayon::prelude::*;
use similar::TextDiff;
use std::collections::BTreeSet;
use std::fs;
use tracing::{debug, warn};
use tree_sitter::Node;

/// Rounds a single fixer may take to reach its fixpoint.
const MAX_ROUNDS: usize = 16;

/// Produces the edits that fix one pack in one module.
pub trait Fixer: Send + Sync {
    fn pack(&self) -> PackId;
    fn edits(&self, module: &Module<'_>) -> Vec<Edit>;
}

pub struct Patcher {
    fixers: Vec<Box<dyn Fixer>>,
}

impl Default for Patcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Patcher {
    pub fn new() -> Self {
        let fixers: Vec<Box<dyn Fixer>> = vec![
            Box::new(handlers::NarrowExcept),
            Box::new(handlers::ReraiseSilent),
            Box::new(defaults::NoneDefault),
            Box::new(blocks::ScopedResource),
            Box::new(calls::CheckedSubprocess),
            Box::new(calls::ArgChoices),
            Box::new(calls::PrintToLogger),
            Box::new(handlers::ChainRaise),
            Box::new(calls::JoinPath),
            Box::new(calls::SafeYaml),
            Box::new(blocks::GuardJson),
        ];
        Patcher { fixers }
    }

    /// Fixers for the packs `registry` enables and marks auto-fixable.
    pub fn for_registry(registry: &Registry) -> Self {
        let mut patcher = Self::new();
        patcher.fixers.retain(|f| {
            let pack = f.pack();
            let keep = registry
                .get(&pack)
                .map(|p| p.detect && p.fix == FixMode::Auto)
                .unwrap_or(false);
            if !keep {
                debug!(%pack, "fixer disabled by registry");
            }
            keep
        });
        patcher
    }

    /// Packs that have a fixer, in registration order.
    pub fn packs(&self) -> Vec<PackId> {
        self.fixers.iter().map(|f| f.pack()).collect()
    }

    /// Run the selected fixers over `source`, returning the final text and
    /// one unified diff per fixer that changed it.
    pub fn apply(
        &self,
        source: &str,
        path: &str,
        packs: Option<&BTreeSet<PackId>>,
    ) -> Result<(String, Vec<String>), SyntaxError> {
        syntax::parse(source)?;
        let mut current = source.to_string();
        let mut diffs = Vec::new();
        for fixer in &self.fixers {
            let pack = fixer.pack();
            if packs.map(|set| !set.contains(&pack)).unwrap_or(false) {
                continue;
            }
            let fixed = fixpoint(fixer.as_ref(), &current, path)?;
            if fixed != current {
                diffs.push(unified_diff(path, &current, &fixed));
                current = fixed;
            }
        }
        Ok((current, diffs))
    }
}

/// Re-run `fixer` on its own output until it stops producing edits. A
/// round whose output no longer parses is discarded and ends the loop.
fn fixpoint(fixer: &dyn Fixer, source: &str, path: &str) -> Result<String, SyntaxError> {
    let pack = fixer.pack();
    let mut current = source.to_string();
    for round in 0..MAX_ROUNDS {
        let edits = {
            let module = syntax::parse(&current)?;
            fixer.edits(&module)
        };
        if edits.is_empty() {
            return Ok(current);
        }
        debug!(%pack, path, round, edits = edits.len(), "fixer produced edits");
        let next = apply_edits(&current, edits);
        if next == current {
            return Ok(current);
        }
        if let Err(e) = syntax::parse(&next) {
            warn!(%pack, path, error = %e, "discarding fix that breaks the parse");
            return Ok(current);
        }
        current = next;
    }
    warn!(%pack, path, "fixer did not settle; keeping the last parsable text");
    Ok(current)
}

/// `a/<path>` / `b/<path>` unified diff with three lines of context.
pub fn unified_diff(path: &str, before: &str, after: &str) -> String {
    TextDiff::from_lines(before, after)
        .unified_diff()
        .context_radius(3)
        .header(&format!("a/{}", path), &format!("b/{}", path))
        .to_string()
}

pub struct FixResult {
    pub file: String,
    pub changed: bool,
    pub diffs: Vec<String>,
    pub wrote: bool,
}

/// Patch every file in `files` (relative to `settings.root`).
///
/// Excluded and non-Python paths are skipped. Results are sorted by file.
/// A read or parse failure aborts the run.
pub fn run_fix(
    settings: &ScanSettings,
    registry: &Registry,
    files: &[String],
    packs: Option<&BTreeSet<PackId>>,
    write: bool,
) -> Result<Vec<FixResult>, ScanError> {
    let patcher = Patcher::for_registry(registry);
    let selected: Vec<&String> = files
        .iter()
        .filter(|f| f.ends_with(".py") && !scan::is_excluded(settings, f))
        .collect();
    let mut results: Vec<FixResult> = selected
        .par_iter()
        .map(|file| {
            let abs = settings.root.join(file);
            let source = fs::read_to_string(&abs).map_err(|source| ScanError::Io {
                path: abs.clone(),
                source,
            })?;
            let (fixed, diffs) = patcher
                .apply(&source, file, packs)
                .map_err(|source| ScanError::Parse {
                    path: abs.clone(),
                    source,
                })?;
            let changed = fixed != source;
            let mut wrote = false;
            if changed && write {
                fs::write(&abs, &fixed).map_err(|source| ScanError::Io {
                    path: abs.clone(),
                    source,
                })?;
                wrote = true;
            }
            Ok(FixResult {
                file: file.to_string(),
                changed,
                diffs,
                wrote,
            })
        })
        .collect::<Result<_, ScanError>>()?;
    results.sort_by(|a, b| a.file.cmp(&b.file));
    Ok(results)
}

/// Every node of one of `kinds`, in pre-order.
pub(crate) fn nodes_of<'t>(root: Node<'t>, kinds: &[&str]) -> Vec<Node<'t>> {
    let mut out = Vec::new();
    syntax::walk(root, &mut |n| {
        if kinds.contains(&n.kind()) {
            out.push(n);
        }
    });
    out
}

/// One indentation step in the style of `indent`.
pub(crate) fn indent_unit(indent: &str) -> &'static str {
    if indent.starts_with('\t') {
        "\t"
    } else {
        "    "
    }
}

/// True when `node` is the only thing on its (single) line, ignoring a
/// trailing comment.
pub(crate) fn alone_on_line(node: Node<'_>, source: &str) -> bool {
    if syntax::line(node) != syntax::end_line(node) {
        return false;
    }
    let Some(line) = source.lines().nth(syntax::line(node) - 1) else {
        return false;
    };
    let text = syntax::text(node, source);
    let rest = line.trim_start();
    rest.strip_prefix(text)
        .map(|tail| {
            let tail = tail.trim();
            tail.is_empty() || tail.starts_with('#')
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::tests::settings;
    use tempfile::tempdir;

    fn only(pack: PackId) -> BTreeSet<PackId> {
        [pack].into_iter().collect()
    }

    const BEX_BEFORE: &str = r#"# ruff: noqa: I001
import json

def load_data(path):
    try:
        with open(path) as f:
            return json.loads(f.read())
    except Exception:
        return {}
"#;

    #[test]
    fn broad_handler_fixture_is_narrowed_once() {
        let p = Patcher::new();
        let (out, diffs) = p.apply(BEX_BEFORE, "bex.py", None).unwrap();
        assert_eq!(diffs.len(), 1);
        assert!(diffs[0].starts_with("--- a/bex.py\n+++ b/bex.py\n"));
        assert!(out.contains(
            "    except (json.JSONDecodeError, KeyError, IndexError, ValueError, TypeError, OSError, subprocess.CalledProcessError):\n"
        ));
        assert!(out.contains("import json\nimport subprocess\n"));
        let (again, diffs) = p.apply(&out, "bex.py", None).unwrap();
        assert_eq!(again, out);
        assert!(diffs.is_empty());
    }

    #[test]
    fn pack_filter_limits_fixers() {
        let src = "import yaml\n\ndef f(x=[]):\n    return yaml.load(x)\n";
        let p = Patcher::new();
        let (out, diffs) = p.apply(src, "m.py", Some(&only(PackId::UnsafeYaml))).unwrap();
        assert_eq!(diffs.len(), 1);
        assert_eq!(out, "import yaml\n\ndef f(x=[]):\n    return yaml.safe_load(x)\n");
    }

    #[test]
    fn unparsable_input_is_an_error() {
        assert!(Patcher::new().apply("def f(:\n", "m.py", None).is_err());
    }

    #[test]
    fn every_fixer_is_idempotent_on_a_mixed_file() {
        let src = r#"import subprocess
import yaml


def run(cmd, opts={}):
    subprocess.run(cmd)
    try:
        cfg = yaml.load(open("c.yml"), Loader=yaml.Loader)
    except:
        pass
    return cfg
"#;
        let p = Patcher::new();
        let (out, diffs) = p.apply(src, "m.py", None).unwrap();
        assert!(diffs.len() >= 4);
        let (again, more) = p.apply(&out, "m.py", None).unwrap();
        assert_eq!(again, out);
        assert!(more.is_empty());
    }

    #[test]
    fn run_fix_writes_only_when_asked() {
        let dir = tempdir().unwrap();
        let root = dir.path().to_path_buf();
        std::fs::create_dir_all(root.join("tests")).unwrap();
        let src = "import yaml\ncfg = yaml.load(s)\n";
        std::fs::write(root.join("a.py"), src).unwrap();
        std::fs::write(root.join("tests/t.py"), src).unwrap();
        std::fs::write(root.join("clean.py"), "x = 1\n").unwrap();
        let s = settings(root.clone());
        let files = vec!["clean.py".to_string(), "a.py".into(), "tests/t.py".into()];

        let reg = Registry::builtin().unwrap();
        let dry = run_fix(&s, &reg, &files, None, false).unwrap();
        assert_eq!(dry.len(), 2);
        assert_eq!(dry[0].file, "a.py");
        assert!(dry[0].changed && !dry[0].wrote);
        assert!(!dry[1].changed);
        assert_eq!(std::fs::read_to_string(root.join("a.py")).unwrap(), src);

        let wet = run_fix(&s, &reg, &files, None, true).unwrap();
        assert!(wet[0].wrote);
        assert_eq!(
            std::fs::read_to_string(root.join("a.py")).unwrap(),
            "import yaml\ncfg = yaml.safe_load(s)\n"
        );
        assert_eq!(std::fs::read_to_string(root.join("tests/t.py")).unwrap(), src);
    }

    const BEX_SUGGEST_ONLY: &str = r#"
[[packs]]
id = "BEX-001"
name = "broad except"
severity = "high"
auto = false
decision_rule = "narrow by hand"

[[packs]]
id = "YAML-015"
name = "unsafe yaml"
severity = "high"
auto = true
decision_rule = "safe_load"

[[packs]]
id = "MDA-003"
name = "mutable default"
severity = "medium"
auto = true
detect = false
decision_rule = "None default"
"#;

    #[test]
    fn registry_keeps_suggest_only_and_disabled_packs_unpatched() {
        let reg = Registry::parse(BEX_SUGGEST_ONLY, std::path::Path::new("packs.toml")).unwrap();
        let p = Patcher::for_registry(&reg);
        assert_eq!(p.packs(), vec![PackId::UnsafeYaml]);

        let dir = tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let src = "import yaml

def f(x=[]):
    try:
        return yaml.load(x)
    except Exception:
        return None
";
        std::fs::write(root.join("m.py"), src).unwrap();
        let results = run_fix(&settings(root.clone()), &reg, &["m.py".to_string()], None, true).unwrap();
        assert_eq!(results[0].diffs.len(), 1);
        let out = std::fs::read_to_string(root.join("m.py")).unwrap();
        assert!(out.contains("yaml.safe_load(x)"));
        assert!(out.contains("def f(x=[]):"));
        assert!(out.contains("except Exception:"));
    }

    #[test]
    fn dropped_overlapping_edits_are_fixed_in_a_later_round() {
        let two_pairs = r#"def copy(a, b):
    x = open(a)
    text = x.read()
    x.close()
    y = open(b, "w")
    y.write(text)
    y.close()
"#;
        let nested = r#"def merge(p, q):
    f = open(p)
    if q:
        g = open(q)
        data = g.read()
        g.close()
    f.close()
    return data
"#;
        let p = Patcher::new();
        let set = only(PackId::UnmanagedResource);
        for src in [two_pairs, nested] {
            let (out, diffs) = p.apply(src, "m.py", Some(&set)).unwrap();
            assert_eq!(diffs.len(), 1);
            assert!(!out.contains(".close()"), "left a pair behind:\n{}", out);
            let (again, more) = p.apply(&out, "m.py", Some(&set)).unwrap();
            assert_eq!(again, out);
            assert!(more.is_empty());
        }
        let (out, _) = p.apply(nested, "m.py", Some(&set)).unwrap();
        assert_eq!(
            out,
            "def merge(p, q):\n    with open(p) as f:\n        if q:\n            with open(q) as g:\n                data = g.read()\n    return data\n"
        );
    }
}
