//! Scanner: tree-shaped detection of pack violations in Python sources.
//!
//! - Files are parsed with tree-sitter; a read or parse failure aborts the
//!   scan with a `ScanError` naming the file.
//! - Files under an excluded root (test fixtures by default) never produce
//!   findings.
//! - Findings for one file follow pre-order traversal of its tree. Across
//!   files, results keep the order of the input paths.
//!
//! Detectors are grouped by the construct they look at: `handlers` (try /
//! except), `functions` (signatures and size), `calls`, and `loops`.

mod calls;
mod functions;
mod handlers;
mod loops;

pub(crate) use calls::{is_unmanaged_acquire, json_decode_guarded};
pub(crate) use functions::mutable_defaults;
pub(crate) use handlers::{is_broad, is_silent, unchained_raises};

use crate::config::ScanSettings;
use crate::error::{ScanError, SyntaxError};
use crate::models::{Finding, PackId};
use crate::registry::Registry;
use crate::syntax::{self, Module};
use crate::utils::{normalize_rel, rel_to_root};
use glob::MatchOptions;
use rayon::prelude::*;
use serde_json::Value as Json;
use std::collections::BTreeSet;
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::Path;
use tracing::{debug, warn};
use tree_sitter::Node;

/// Token vocabulary used to populate broad-except hints when the registry
/// does not supply one.
pub const DEFAULT_HANDLER_SIGNALS: [&str; 10] = [
    "json.load",
    "json.loads",
    "open(",
    "Path(",
    "os.",
    "shutil.",
    "int(",
    "float(",
    "Decimal(",
    "datetime.",
];

pub struct Scanner<'a> {
    settings: &'a ScanSettings,
    enabled: BTreeSet<PackId>,
    handler_signals: Vec<String>,
}

impl<'a> Scanner<'a> {
    pub fn new(settings: &'a ScanSettings, registry: &Registry) -> Self {
        let handler_signals = registry
            .get(&PackId::BroadExcept)
            .map(|p| p.hints.clone())
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| DEFAULT_HANDLER_SIGNALS.iter().map(|s| s.to_string()).collect());
        Scanner {
            settings,
            enabled: registry.detecting(),
            handler_signals,
        }
    }

    /// Restrict detection to `packs` (intersected with the enabled set).
    pub fn only(mut self, packs: &BTreeSet<PackId>) -> Self {
        self.enabled = self.enabled.intersection(packs).cloned().collect();
        self
    }

    pub fn is_excluded(&self, path: &str) -> bool {
        is_excluded(self.settings, path)
    }

    /// Scan `paths` (relative to the repository root, or absolute).
    pub fn scan(&self, paths: &[String]) -> Result<Vec<Finding>, ScanError> {
        let selected: Vec<&String> = paths
            .iter()
            .filter(|p| p.ends_with(".py"))
            .filter(|p| !self.is_excluded(p))
            .collect();
        debug!(files = selected.len(), "scanning");
        let per_file: Vec<Vec<Finding>> = selected
            .par_iter()
            .map(|p| self.scan_file(p))
            .collect::<Result<_, _>>()?;
        Ok(per_file.into_iter().flatten().collect())
    }

    fn scan_file(&self, path: &str) -> Result<Vec<Finding>, ScanError> {
        let abs = self.settings.root.join(path);
        let source = fs::read_to_string(&abs).map_err(|source| ScanError::Io {
            path: abs.clone(),
            source,
        })?;
        self.scan_source(&normalize_rel(path), &source)
            .map_err(|source| ScanError::Parse { path: abs, source })
    }

    /// Run every enabled detector over one file's text.
    pub fn scan_source(&self, file: &str, source: &str) -> Result<Vec<Finding>, SyntaxError> {
        let module = syntax::parse(source)?;
        let mut ctx = Ctx {
            file,
            module: &module,
            enabled: &self.enabled,
            handler_signals: &self.handler_signals,
            max_function_lines: self.settings.max_function_lines,
            out: Vec::new(),
        };
        let root = module.root();
        syntax::walk(root, &mut |node| match node.kind() {
            "try_statement" => handlers::visit_try(&mut ctx, node),
            "function_definition" => functions::visit_def(&mut ctx, node),
            "call" => calls::visit_call(&mut ctx, node),
            "return_statement" => calls::visit_return(&mut ctx, node),
            "for_statement" | "while_statement" => loops::visit_loop(&mut ctx, node),
            _ => {}
        });
        Ok(ctx.out)
    }
}

/// Per-file detection state shared by the detector modules.
pub(crate) struct Ctx<'a, 's> {
    pub file: &'a str,
    pub module: &'a Module<'s>,
    pub enabled: &'a BTreeSet<PackId>,
    pub handler_signals: &'a [String],
    pub max_function_lines: usize,
    pub out: Vec<Finding>,
}

impl<'a, 's> Ctx<'a, 's> {
    pub fn source(&self) -> &'s str {
        self.module.source
    }

    pub fn text(&self, node: Node<'_>) -> &'s str {
        self.module.text(node)
    }

    pub fn wants(&self, pack: &PackId) -> bool {
        self.enabled.contains(pack)
    }

    pub fn emit(
        &mut self,
        pack: PackId,
        at: Node<'_>,
        message: impl Into<String>,
        hint_tokens: Vec<String>,
        span: Option<(usize, usize)>,
    ) {
        if !self.wants(&pack) {
            return;
        }
        self.out.push(Finding {
            pack,
            file: self.file.to_string(),
            line: syntax::line(at),
            col: syntax::col(at),
            message: message.into(),
            frame: syntax::frame(at, self.module.source),
            hint_tokens,
            span,
        });
    }
}

/// True when `path` lies under one of the excluded roots.
pub fn is_excluded(settings: &ScanSettings, path: &str) -> bool {
    let rel = rel_to_root(Path::new(path), &settings.root);
    settings.exclude.iter().any(|ex| {
        let ex = normalize_rel(ex);
        let ex = ex.trim_end_matches('/');
        !ex.is_empty() && (rel == ex || rel.starts_with(&format!("{}/", ex)))
    })
}

/// Every `.py` file under `root` outside excluded roots, relative and sorted.
/// Hidden directories are skipped.
pub fn discover(settings: &ScanSettings) -> Vec<String> {
    let pattern = settings.root.join("**").join("*.py");
    let opts = MatchOptions {
        require_literal_leading_dot: true,
        ..MatchOptions::new()
    };
    let mut files: Vec<String> = match glob::glob_with(&pattern.to_string_lossy(), opts) {
        Ok(paths) => paths
            .flatten()
            .map(|p| rel_to_root(&p, &settings.root))
            .collect(),
        Err(e) => {
            warn!(error = %e, "bad discovery pattern");
            Vec::new()
        }
    };
    files.retain(|f| !is_excluded(settings, f));
    files.sort();
    files
}

/// Expand CLI path arguments: directories become their `.py` files.
pub fn expand_paths(settings: &ScanSettings, args: &[String]) -> Vec<String> {
    if args.is_empty() {
        return discover(settings);
    }
    let mut out = Vec::new();
    for a in args {
        let p = settings.root.join(a);
        if p.is_dir() {
            let sub = ScanSettings {
                root: p.clone(),
                exclude: Vec::new(),
                max_function_lines: settings.max_function_lines,
            };
            let prefix = rel_to_root(&p, &settings.root);
            out.extend(discover(&sub).into_iter().map(|f| {
                if prefix.is_empty() || prefix == "." {
                    f
                } else {
                    format!("{}/{}", prefix, f)
                }
            }));
        } else {
            out.push(rel_to_root(&p, &settings.root));
        }
    }
    out
}

/// Write findings as one JSON object per line.
pub fn write_findings(path: &Path, findings: &[Finding]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut f = io::BufWriter::new(fs::File::create(path)?);
    for finding in findings {
        let line = serde_json::to_string(finding).map_err(io::Error::other)?;
        writeln!(f, "{}", line)?;
    }
    f.flush()
}

/// Read a findings stream, skipping blank and malformed lines.
pub fn read_findings(path: &Path) -> io::Result<Vec<Finding>> {
    let f = fs::File::open(path)?;
    let mut out = Vec::new();
    for (i, line) in io::BufReader::new(f).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Finding>(&line) {
            Ok(finding) => out.push(finding),
            Err(e) => warn!(line = i + 1, error = %e, "skipping malformed finding"),
        }
    }
    Ok(out)
}

/// Read only the `(pack, file)` pairs of a findings stream.
///
/// More tolerant than `read_findings`: legacy key names are accepted and
/// records missing either field are kept with an empty value.
pub fn read_gate_records(path: &Path) -> io::Result<Vec<(String, String)>> {
    let text = fs::read_to_string(path)?;
    Ok(text
        .lines()
        .filter_map(|line| serde_json::from_str::<Json>(line).ok())
        .filter(|v| v.is_object())
        .map(|v| {
            let pack = ["pack", "tf_id"]
                .iter()
                .find_map(|k| v.get(*k).and_then(Json::as_str))
                .unwrap_or_default()
                .to_string();
            let file = ["file", "path", "filename"]
                .iter()
                .find_map(|k| v.get(*k).and_then(Json::as_str))
                .unwrap_or_default()
                .to_string();
            (pack, file)
        })
        .collect())
}
