//! Agent ingestion: trial-apply supplied diffs in a disposable copy of the
//! tree, verify there, then merge into the real tree or record a waiver.
//!
//! Terminal outcomes of one invocation:
//! - merged: the verified workspace content of every touched file is
//!   copied over the real tree; `accepted` is the number of files changed;
//! - rejected (patch apply failed, verify failed, or aborted): nothing in
//!   the real tree changes, one batch waiver is appended, `waived = 1`.
//!
//! The workspace is a `TempDir` and is removed on every path when it drops.
//! Callers serialise invocations; there is no locking here.

use super::diffdoc::{collect_documents, parse_document, FileDiff};
use super::waiver::{waive_batch, RejectedDocument};
use crate::config::Effective;
use crate::error::IngestError;
use crate::exec::CommandRunner;
use crate::utils::rel_to_root;
use crate::vcs::Vcs;
use crate::verify::run_validators;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::Path;
use tempfile::TempDir;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestOutcome {
    pub accepted: usize,
    pub waived: usize,
    pub documents: Vec<String>,
    /// Waiver reason when the batch was rejected.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

pub struct Ingestor<'a> {
    eff: &'a Effective,
    vcs: &'a dyn Vcs,
    runner: &'a CommandRunner,
}

impl<'a> Ingestor<'a> {
    pub fn new(eff: &'a Effective, vcs: &'a dyn Vcs, runner: &'a CommandRunner) -> Self {
        Ingestor { eff, vcs, runner }
    }

    /// Ingest every diff document under `source`. Only failing to record the
    /// waiver itself is an error; every other failure becomes a waiver.
    pub fn ingest(&self, source: &Path, change_id: &str) -> io::Result<IngestOutcome> {
        let (docs, listing_error) = match collect_documents(source) {
            Ok(docs) => (docs, None),
            Err(e) => (Vec::new(), Some(IngestError::Io(e))),
        };
        let names: Vec<String> = docs.iter().map(|d| rel_to_root(d, source)).collect();
        if docs.is_empty() && listing_error.is_none() {
            info!(dir = %source.display(), "no diff documents to ingest");
            return Ok(IngestOutcome::default());
        }

        let result = match listing_error {
            Some(e) => Err(e),
            None => self.run(&docs, &names),
        };
        match result {
            Ok(accepted) => {
                info!(accepted, "ingestion merged");
                Ok(IngestOutcome {
                    accepted,
                    waived: 0,
                    documents: names,
                    reason: None,
                })
            }
            Err(e) => {
                warn!(reason = e.reason(), error = %e, "ingestion rejected");
                let path = self.eff.waiver_path(change_id);
                let rejected: Vec<RejectedDocument> = docs
                    .iter()
                    .zip(&names)
                    .map(|(doc, name)| RejectedDocument {
                        name: name.clone(),
                        text: fs::read_to_string(doc).unwrap_or_default(),
                    })
                    .collect();
                waive_batch(&path, e.reason(), &rejected, &e.detail())?;
                Ok(IngestOutcome {
                    accepted: 0,
                    waived: 1,
                    documents: names,
                    reason: Some(e.reason().to_string()),
                })
            }
        }
    }

    fn run(&self, docs: &[std::path::PathBuf], names: &[String]) -> Result<usize, IngestError> {
        let mut diffs = Vec::new();
        for (doc, name) in docs.iter().zip(names) {
            let text = fs::read_to_string(doc)?;
            let parsed = parse_document(&text)
                .map_err(|e| IngestError::PatchConflict(format!("{}: {}", name, e)))?;
            diffs.extend(parsed);
        }

        let workspace = TempDir::new()?;
        copy_tree(&self.eff.repo_root, workspace.path(), &self.eff.agent.workspace_exclude)?;
        debug!(workspace = %workspace.path().display(), diffs = diffs.len(), "workspace ready");

        for diff in &diffs {
            match diff {
                FileDiff::NewFile { path, content } => write_file(workspace.path(), path, content)?,
                FileDiff::Modify { path, patch } => {
                    if self.vcs.check_reverse(workspace.path(), patch)? {
                        continue;
                    }
                    if !self.vcs.check_apply(workspace.path(), patch)? {
                        return Err(IngestError::PatchConflict(format!("{} does not apply", path)));
                    }
                    self.vcs
                        .apply(workspace.path(), patch)?
                        .map_err(IngestError::PatchConflict)?;
                }
            }
        }

        let report = run_validators(&self.eff.verify.commands, workspace.path(), self.runner)?;
        if !report.passed {
            return Err(IngestError::VerifyFailure(report.output));
        }
        self.merge(workspace.path(), &diffs)
    }

    /// Copy the verified workspace's touched files over the real tree.
    /// Every file is read before the first write, and only files whose
    /// content differs are written and counted.
    fn merge(&self, workspace: &Path, diffs: &[FileDiff]) -> Result<usize, IngestError> {
        let root = &self.eff.repo_root;
        let touched: BTreeSet<&str> = diffs.iter().map(|d| d.path()).collect();
        let mut pending = Vec::new();
        for path in touched {
            let Ok(verified) = fs::read_to_string(workspace.join(path)) else {
                debug!(path, "not present in workspace");
                continue;
            };
            let current = fs::read_to_string(root.join(path)).ok();
            if current.as_deref() == Some(verified.as_str()) {
                debug!(path, "already up to date");
                continue;
            }
            pending.push((path, verified));
        }
        for (path, content) in &pending {
            write_file(root, path, content)?;
            info!(path, "merged");
        }
        Ok(pending.len())
    }
}

fn write_file(root: &Path, rel: &str, content: &str) -> io::Result<()> {
    let dest = root.join(rel);
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(dest, content)
}

/// Copy `from` into `to`, skipping symlinks and any path with a component
/// listed in `exclude`.
fn copy_tree(from: &Path, to: &Path, exclude: &[String]) -> io::Result<()> {
    let walker = WalkDir::new(from).follow_links(false).into_iter().filter_entry(|e| {
        e.depth() == 0
            || !e
                .file_name()
                .to_str()
                .map(|n| exclude.iter().any(|x| x == n))
                .unwrap_or(false)
    });
    for entry in walker {
        let entry = entry.map_err(io::Error::other)?;
        let Ok(rel) = entry.path().strip_prefix(from) else {
            continue;
        };
        let dest = to.join(rel);
        let kind = entry.file_type();
        if kind.is_dir() {
            fs::create_dir_all(&dest)?;
        } else if kind.is_file() {
            fs::copy(entry.path(), &dest)?;
        }
    }
    Ok(())
}
