//! Diff documents supplied for ingestion.
//!
//! A document is unified-diff text that may touch several files. Each file
//! section becomes either a `NewFile` (old side `/dev/null`, content taken
//! from the `+` lines) or a `Modify` carrying the section text for
//! `git apply`. Hunk bodies are consumed by the line counts in their `@@`
//! headers, so a `--- ` inside a hunk is never mistaken for a new section.

use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileDiff {
    NewFile { path: String, content: String },
    Modify { path: String, patch: String },
}

impl FileDiff {
    pub fn path(&self) -> &str {
        match self {
            FileDiff::NewFile { path, .. } | FileDiff::Modify { path, .. } => path,
        }
    }
}

/// Every `.diff`/`.patch` file under `dir`, recursively, sorted by path.
/// A missing directory has no documents.
pub fn collect_documents(dir: &Path) -> io::Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut docs = Vec::new();
    for entry in WalkDir::new(dir).follow_links(false) {
        let entry = entry.map_err(io::Error::other)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let ext = entry.path().extension().and_then(|e| e.to_str());
        if matches!(ext, Some("diff") | Some("patch")) {
            docs.push(entry.into_path());
        }
    }
    docs.sort();
    Ok(docs)
}

/// Strip the `a/`/`b/` prefix and any trailing timestamp from a header path.
fn header_path(raw: &str) -> String {
    let raw = raw.split('\t').next().unwrap_or(raw).trim_end();
    raw.strip_prefix("a/")
        .or_else(|| raw.strip_prefix("b/"))
        .unwrap_or(raw)
        .to_string()
}

/// `@@ -a,b +c,d @@` -> `(b, d)`; a missing count means 1.
fn hunk_counts(header: &str) -> Option<(usize, usize)> {
    let body = header.strip_prefix("@@ ")?;
    let end = body.find(" @@")?;
    let mut parts = body[..end].split_whitespace();
    let count = |range: &str| -> Option<usize> {
        match range.split_once(',') {
            Some((_, n)) => n.parse().ok(),
            None => Some(1),
        }
    };
    let old = count(parts.next()?.strip_prefix('-')?)?;
    let new = count(parts.next()?.strip_prefix('+')?)?;
    Some((old, new))
}

/// Split one document into per-file diffs.
pub fn parse_document(text: &str) -> Result<Vec<FileDiff>, String> {
    let lines: Vec<&str> = text.lines().collect();
    let mut out = Vec::new();
    let mut i = 0;
    while i < lines.len() {
        let Some(old) = lines[i].strip_prefix("--- ") else {
            i += 1;
            continue;
        };
        let Some(new) = lines.get(i + 1).and_then(|l| l.strip_prefix("+++ ")) else {
            return Err(format!("line {}: `---` header without `+++`", i + 1));
        };
        let start = i;
        i += 2;
        let mut added = String::new();
        let mut hunks = 0;
        while let Some(header) = lines.get(i).filter(|l| l.starts_with("@@")) {
            let (mut old_left, mut new_left) =
                hunk_counts(header).ok_or_else(|| format!("line {}: malformed hunk header", i + 1))?;
            hunks += 1;
            i += 1;
            while old_left > 0 || new_left > 0 {
                let Some(line) = lines.get(i) else {
                    return Err("hunk ends before its declared length".into());
                };
                match line.chars().next() {
                    Some('+') => {
                        new_left = new_left.saturating_sub(1);
                        added.push_str(&line[1..]);
                        added.push('\n');
                    }
                    Some('-') => old_left = old_left.saturating_sub(1),
                    Some(' ') | None => {
                        old_left = old_left.saturating_sub(1);
                        new_left = new_left.saturating_sub(1);
                    }
                    Some('\\') => {}
                    Some(_) => return Err(format!("line {}: unexpected hunk line", i + 1)),
                }
                i += 1;
            }
            if lines.get(i).map(|l| l.starts_with('\\')).unwrap_or(false) {
                if added.ends_with('\n') {
                    added.pop();
                }
                i += 1;
            }
        }
        if hunks == 0 {
            return Err(format!("line {}: file section without hunks", start + 1));
        }
        let path = header_path(new);
        if old.split('\t').next().map(str::trim_end) == Some("/dev/null") {
            out.push(FileDiff::NewFile { path, content: added });
        } else {
            let mut patch = lines[start..i].join("\n");
            patch.push('\n');
            out.push(FileDiff::Modify { path, patch });
        }
    }
    if out.is_empty() {
        return Err("no file sections found".into());
    }
    Ok(out)
}
