//! Pack registry loading and validation.
//!
//! The registry document is TOML or YAML (chosen by file extension) with a
//! top-level `packs` array. Every record is checked before anything is
//! returned, and all problems are reported together in one
//! `ConfigError::Invalid`.
//!
//! Record fields:
//! - required: `id` (`LETTERS-NNN`), `name`, `severity` (low|medium|high),
//!   `auto` (bool), `decision_rule`
//! - optional: `detect` (bool, default true), `detect_signals`,
//!   `allowed_transforms`, `hints`, `review_on` (string lists)

use crate::error::ConfigError;
use crate::models::{FixMode, Pack, PackId, Severity};
use regex::Regex;
use serde_json::Value as Json;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

const BUILTIN: &str = include_str!("../packs.toml");

#[derive(Debug, Clone)]
/// Process-wide, read-only pack table. Keeps document order for listings.
pub struct Registry {
    packs: BTreeMap<PackId, Pack>,
    order: Vec<PackId>,
}

/// Load the registry at `path`, or the built-in one when `None`.
pub fn load_registry(path: Option<&Path>) -> Result<Registry, ConfigError> {
    match path {
        Some(p) => Registry::load(p),
        None => Registry::builtin(),
    }
}

impl Registry {
    pub fn builtin() -> Result<Registry, ConfigError> {
        Registry::parse(BUILTIN, Path::new("<builtin>/packs.toml"))
    }

    pub fn load(path: &Path) -> Result<Registry, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Registry::parse(&text, path)
    }

    /// Parse registry text; the format follows `origin`'s extension.
    pub fn parse(text: &str, origin: &Path) -> Result<Registry, ConfigError> {
        let doc = parse_document(text, origin)?;
        let records = match doc.get("packs") {
            Some(Json::Array(items)) => items.clone(),
            _ => {
                return Err(ConfigError::Invalid {
                    path: origin.to_path_buf(),
                    problems: vec!["missing top-level `packs` array".into()],
                })
            }
        };

        let mut problems = Vec::new();
        let mut packs = BTreeMap::new();
        let mut order = Vec::new();
        let mut seen = BTreeSet::new();
        for (i, rec) in records.iter().enumerate() {
            let label = rec
                .get("id")
                .and_then(Json::as_str)
                .map(|s| format!("packs[{}] ({})", i, s))
                .unwrap_or_else(|| format!("packs[{}]", i));
            match validate_record(rec) {
                Ok(pack) => {
                    if !seen.insert(pack.id.clone()) {
                        problems.push(format!("{}: duplicate id", label));
                        continue;
                    }
                    order.push(pack.id.clone());
                    packs.insert(pack.id.clone(), pack);
                }
                Err(errs) => {
                    problems.extend(errs.into_iter().map(|e| format!("{}: {}", label, e)));
                }
            }
        }
        if !problems.is_empty() {
            return Err(ConfigError::Invalid {
                path: origin.to_path_buf(),
                problems,
            });
        }
        Ok(Registry { packs, order })
    }

    pub fn get(&self, id: &PackId) -> Option<&Pack> {
        self.packs.get(id)
    }

    /// Packs in document order.
    pub fn iter(&self) -> impl Iterator<Item = &Pack> {
        self.order.iter().filter_map(|id| self.packs.get(id))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Default gated set: every high-severity pack.
    pub fn high_severity_ids(&self) -> BTreeSet<PackId> {
        self.iter()
            .filter(|p| p.severity == Severity::High)
            .map(|p| p.id.clone())
            .collect()
    }

    /// Packs whose detection is enabled.
    pub fn detecting(&self) -> BTreeSet<PackId> {
        self.iter().filter(|p| p.detect).map(|p| p.id.clone()).collect()
    }
}

fn parse_document(text: &str, origin: &Path) -> Result<Json, ConfigError> {
    let ext = origin
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("toml")
        .to_ascii_lowercase();
    let parse_err = |message: String| ConfigError::Parse {
        path: PathBuf::from(origin),
        message,
    };
    match ext.as_str() {
        "yaml" | "yml" => {
            let v: serde_yaml::Value =
                serde_yaml::from_str(text).map_err(|e| parse_err(e.to_string()))?;
            serde_json::to_value(v).map_err(|e| parse_err(e.to_string()))
        }
        _ => {
            let v: toml::Value = toml::from_str(text).map_err(|e| parse_err(e.to_string()))?;
            serde_json::to_value(v).map_err(|e| parse_err(e.to_string()))
        }
    }
}

fn validate_record(rec: &Json) -> Result<Pack, Vec<String>> {
    let mut errs = Vec::new();
    let Some(obj) = rec.as_object() else {
        return Err(vec!["record must be a table".into()]);
    };

    let id = required_str(obj, "id", &mut errs);
    if let Some(id) = id.as_deref() {
        match Regex::new(r"^[A-Z]+-\d{3}$") {
            Ok(re) if !re.is_match(id) => errs.push(format!("id `{}` must look like LETTERS-NNN", id)),
            _ => {}
        }
    }
    let name = required_str(obj, "name", &mut errs);
    let severity = match obj.get("severity") {
        None => {
            errs.push("missing field: severity".into());
            None
        }
        Some(v) => {
            let sev = v.as_str().and_then(Severity::parse);
            if sev.is_none() {
                errs.push("severity must be one of low|medium|high".into());
            }
            sev
        }
    };
    let auto = match obj.get("auto") {
        None => {
            errs.push("missing field: auto".into());
            None
        }
        Some(Json::Bool(b)) => Some(*b),
        Some(_) => {
            errs.push("auto must be boolean".into());
            None
        }
    };
    let detect = match obj.get("detect") {
        None => true,
        Some(Json::Bool(b)) => *b,
        Some(_) => {
            errs.push("detect must be boolean".into());
            true
        }
    };
    let decision_rule = required_str(obj, "decision_rule", &mut errs);
    let detect_signals = str_list(obj, "detect_signals", &mut errs);
    let allowed_transforms = str_list(obj, "allowed_transforms", &mut errs);
    let hints = str_list(obj, "hints", &mut errs);
    let review_on = str_list(obj, "review_on", &mut errs);

    match (id, name, severity, auto, decision_rule) {
        (Some(id), Some(name), Some(severity), Some(auto), Some(decision_rule)) if errs.is_empty() => {
            Ok(Pack {
                id: PackId::from(id),
                name,
                severity,
                fix: if auto { FixMode::Auto } else { FixMode::SuggestOnly },
                detect,
                detect_signals,
                allowed_transforms,
                decision_rule,
                hints,
                review_on,
            })
        }
        _ => Err(errs),
    }
}

fn required_str(obj: &serde_json::Map<String, Json>, key: &str, errs: &mut Vec<String>) -> Option<String> {
    match obj.get(key) {
        None => {
            errs.push(format!("missing field: {}", key));
            None
        }
        Some(Json::String(s)) if !s.trim().is_empty() => Some(s.clone()),
        Some(Json::String(_)) => {
            errs.push(format!("{} must not be empty", key));
            None
        }
        Some(_) => {
            errs.push(format!("{} must be string", key));
            None
        }
    }
}

fn str_list(obj: &serde_json::Map<String, Json>, key: &str, errs: &mut Vec<String>) -> Vec<String> {
    match obj.get(key) {
        None => Vec::new(),
        Some(Json::Array(items)) => {
            let out: Vec<String> = items.iter().filter_map(|v| v.as_str().map(str::to_string)).collect();
            if out.len() != items.len() {
                errs.push(format!("{} must be list[string]", key));
            }
            out
        }
        Some(_) => {
            errs.push(format!("{} must be list[string]", key));
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn builtin_registry_covers_every_known_pack() {
        let reg = Registry::builtin().unwrap();
        for id in PackId::KNOWN.iter() {
            assert!(reg.get(id).is_some(), "missing {}", id);
        }
        let gated = reg.high_severity_ids();
        assert!(gated.contains(&PackId::BroadExcept));
        assert!(gated.contains(&PackId::UnsafeYaml));
        assert!(!gated.contains(&PackId::Complexity));
        assert_eq!(reg.get(&PackId::SqlFormat).unwrap().fix, FixMode::SuggestOnly);
    }

    #[test]
    fn reports_every_problem_at_once() {
        let text = r#"
[[packs]]
id = "BEX-001"
name = "broad"
severity = "urgent"
auto = true
decision_rule = "x"

[[packs]]
id = "bad id"
severity = "low"
auto = "yes"
decision_rule = "x"

[[packs]]
id = "BEX-001"
name = "dup"
severity = "low"
auto = false
decision_rule = "x"
hints = ["a", 3]
"#;
        let err = Registry::parse(text, Path::new("packs.toml")).unwrap_err();
        let ConfigError::Invalid { problems, .. } = err else {
            panic!("expected Invalid");
        };
        let all = problems.join("\n");
        assert!(all.contains("severity must be one of low|medium|high"));
        assert!(all.contains("must look like LETTERS-NNN"));
        assert!(all.contains("missing field: name"));
        assert!(all.contains("auto must be boolean"));
        assert!(all.contains("hints must be list[string]"));
        assert!(problems.len() >= 5);
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let text = r#"
[[packs]]
id = "LOG-010"
name = "a"
severity = "low"
auto = true
decision_rule = "x"

[[packs]]
id = "LOG-010"
name = "b"
severity = "low"
auto = true
decision_rule = "x"
"#;
        let err = Registry::parse(text, Path::new("packs.toml")).unwrap_err();
        assert!(err.to_string().contains("duplicate id"));
    }

    #[test]
    fn loads_yaml_with_other_ids_and_defaults() {
        let dir = tempdir().unwrap();
        let p = dir.path().join("packs.yaml");
        fs::write(
            &p,
            r#"
packs:
  - id: DUP-018
    name: duplication
    severity: medium
    auto: false
    detect: false
    decision_rule: factor it out
"#,
        )
        .unwrap();
        let reg = load_registry(Some(&p)).unwrap();
        let pack = reg.get(&PackId::Other("DUP-018".into())).unwrap();
        assert!(!pack.detect);
        assert!(pack.hints.is_empty());
        assert!(reg.detecting().is_empty());
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let dir = tempdir().unwrap();
        let err = Registry::load(&dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
