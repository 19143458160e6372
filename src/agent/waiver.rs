//! Append-only waiver records, one file per change.
//!
//! Single-finding blocks carry a `pack: ID` marker the gate counts. Batch
//! rejection blocks written by ingestion carry none, so they only count
//! through the gate's fallbacks.

use super::frame::code_frame;
use crate::config::Effective;
use crate::models::{Finding, PackId};
use crate::syntax;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::info;

/// Lines of captured output kept in a batch waiver.
const OUTPUT_TAIL: usize = 40;
/// Lines of each rejected document kept in a batch waiver.
const DOCUMENT_HEAD: usize = 60;

fn append(path: &Path, block: &str) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut f = OpenOptions::new().create(true).append(true).open(path)?;
    f.write_all(block.as_bytes())
}

fn tail(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    lines[lines.len().saturating_sub(n)..].join("\n")
}

pub fn finding_block(finding: &Finding, reason: &str, frame: &str) -> String {
    let mut block = format!(
        "## Waiver: {pack} at {file}:{line}\n\npack: {pack}\nlocation: {file}:{line}:{col}\nframe: {frame}\nreason: {reason}\n",
        pack = finding.pack,
        file = finding.file,
        line = finding.line,
        col = finding.col,
        frame = finding.frame,
        reason = reason,
    );
    if !frame.is_empty() {
        block.push_str("\n```text\n");
        block.push_str(frame);
        block.push_str("```\n");
    }
    block.push('\n');
    block
}

/// A rejected diff document: its name under the ingest directory and text.
#[derive(Debug, Clone)]
pub struct RejectedDocument {
    pub name: String,
    pub text: String,
}

pub fn batch_block(reason: &str, documents: &[RejectedDocument], output: &str) -> String {
    let mut block = format!("## Ingestion rejected: {}\n\nreason: {}\ndocuments:\n", reason, reason);
    for d in documents {
        block.push_str(&format!("- {}\n", d.name));
    }
    for d in documents.iter().filter(|d| !d.text.trim().is_empty()) {
        let lines: Vec<&str> = d.text.lines().collect();
        block.push_str(&format!("\n### {}\n\n```diff\n", d.name));
        for l in lines.iter().take(DOCUMENT_HEAD) {
            block.push_str(l);
            block.push('\n');
        }
        if lines.len() > DOCUMENT_HEAD {
            block.push_str(&format!("... {} more lines\n", lines.len() - DOCUMENT_HEAD));
        }
        block.push_str("```\n");
    }
    let output = tail(output, OUTPUT_TAIL);
    if !output.is_empty() {
        block.push_str("\n```text\n");
        block.push_str(&output);
        block.push_str("\n```\n");
    }
    block.push('\n');
    block
}

/// Finding to waive by hand: the recorded one at `file:line` for `pack`
/// when the stream has it, otherwise one built from the source.
pub fn manual_finding(
    eff: &Effective,
    recorded: &[Finding],
    pack: PackId,
    file: &str,
    line: usize,
    col: usize,
) -> Finding {
    if let Some(f) = recorded
        .iter()
        .find(|f| f.pack == pack && f.file == file && f.line == line)
    {
        return f.clone();
    }
    let frame = fs::read_to_string(eff.repo_root.join(file))
        .ok()
        .and_then(|src| {
            syntax::parse(&src)
                .ok()
                .map(|m| syntax::frame(syntax::node_at(m.root(), line, col), &src))
        })
        .unwrap_or_else(|| "<module>".to_string());
    Finding {
        pack,
        file: file.to_string(),
        line,
        col,
        message: "waived by hand".to_string(),
        frame,
        hint_tokens: Vec::new(),
        span: None,
    }
}

/// Append a waiver for one finding to the record of `change_id`. Repeated
/// calls append repeated blocks.
pub fn waive(eff: &Effective, finding: &Finding, reason: &str, change_id: &str) -> io::Result<PathBuf> {
    let path = eff.waiver_path(change_id);
    let frame = code_frame(&eff.repo_root, finding);
    append(&path, &finding_block(finding, reason, &frame))?;
    info!(pack = %finding.pack, file = %finding.file, path = %path.display(), "waiver recorded");
    Ok(path)
}

/// Append a batch rejection block to `path`.
pub fn waive_batch(path: &Path, reason: &str, documents: &[RejectedDocument], output: &str) -> io::Result<()> {
    append(path, &batch_block(reason, documents, output))?;
    info!(reason, path = %path.display(), "batch waiver recorded");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{resolve_effective, DEFAULT_WAIVER_MARKER};
    use crate::gate::count_waivers;
    use std::collections::BTreeSet;
    use tempfile::tempdir;

    fn finding() -> Finding {
        Finding {
            pack: PackId::Subprocess,
            file: "tool.py".into(),
            line: 2,
            col: 4,
            message: "uses shell=True".into(),
            frame: "def run_cmd()".into(),
            hint_tokens: vec![],
            span: None,
        }
    }

    #[test]
    fn waive_appends_marked_blocks_without_dedup() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("packgate.toml"), "").unwrap();
        fs::write(dir.path().join("tool.py"), "def run_cmd(cmd):\n    subprocess.run(cmd, shell=True)\n").unwrap();
        let eff = resolve_effective(Some(dir.path().to_str().unwrap()), None, None).unwrap();

        let path = waive(&eff, &finding(), "trusted input", "12").unwrap();
        waive(&eff, &finding(), "trusted input", "12").unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert!(path.ends_with("docs/agents/waivers/PR-12.md"));
        assert_eq!(text.matches("## Waiver: SUB-006 at tool.py:2").count(), 2);
        assert!(text.contains("location: tool.py:2:4\n"));
        assert!(text.contains("> 2 |     subprocess.run(cmd, shell=True)\n"));

        let gated: BTreeSet<PackId> = [PackId::Subprocess].into_iter().collect();
        assert_eq!(count_waivers(Some(&text), &gated, DEFAULT_WAIVER_MARKER), 2);
    }

    #[test]
    fn manual_finding_prefers_recorded_then_source_frame() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("packgate.toml"), "").unwrap();
        fs::write(dir.path().join("tool.py"), "def run_cmd(cmd):\n    subprocess.run(cmd, shell=True)\n").unwrap();
        let eff = resolve_effective(Some(dir.path().to_str().unwrap()), None, None).unwrap();

        let recorded = vec![finding()];
        let f = manual_finding(&eff, &recorded, PackId::Subprocess, "tool.py", 2, 0);
        assert_eq!(f.message, "uses shell=True");

        let f = manual_finding(&eff, &recorded, PackId::BroadExcept, "tool.py", 2, 4);
        assert_eq!(f.frame, "def run_cmd()");
        assert_eq!(f.message, "waived by hand");
        let f = manual_finding(&eff, &[], PackId::BroadExcept, "gone.py", 1, 0);
        assert_eq!(f.frame, "<module>");
    }

    #[test]
    fn batch_block_keeps_output_tail_and_no_marker() {
        let output: String = (1..=50).map(|i| format!("out{}\n", i)).collect();
        let docs = vec![
            RejectedDocument {
                name: "a.diff".into(),
                text: "--- a/m.py\n+++ b/m.py\n@@ -1 +1 @@\n-x = 1\n+x = 2\n".into(),
            },
            RejectedDocument {
                name: "long.diff".into(),
                text: (1..=70).map(|i| format!("+line{}\n", i)).collect(),
            },
        ];
        let block = batch_block("verify failed", &docs, &output);
        assert!(block.starts_with("## Ingestion rejected: verify failed\n"));
        assert!(block.contains("- a.diff\n- long.diff\n"));
        assert!(block.contains("### a.diff\n\n```diff\n--- a/m.py\n+++ b/m.py\n@@ -1 +1 @@\n-x = 1\n+x = 2\n```\n"));
        assert!(block.contains("+line60\n... 10 more lines\n```\n"));
        assert!(!block.contains("+line61"));
        assert!(!block.contains("out10\n"));
        assert!(block.contains("out11\nout12"));
        assert!(!block.contains("pack:"));
    }
}
