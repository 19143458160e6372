//! Code frames: a few numbered source lines around a finding.

use crate::models::Finding;
use std::fs;
use std::path::Path;
use tracing::warn;

/// Lines of context shown above and below the marked range.
pub const CONTEXT: usize = 2;

/// Render lines `start..=end` of `source` with context, a right-aligned line
/// number gutter, and `>` on the marked lines.
pub fn render_frame(source: &str, (start, end): (usize, usize)) -> String {
    let lines: Vec<&str> = source.lines().collect();
    if lines.is_empty() {
        return String::new();
    }
    let start = start.max(1);
    let end = end.max(start);
    let first = start.saturating_sub(CONTEXT).max(1);
    let last = (end + CONTEXT).min(lines.len());
    if first > last {
        return String::new();
    }
    let width = last.to_string().len();
    let mut out = String::new();
    for n in first..=last {
        let marker = if (start..=end).contains(&n) { '>' } else { ' ' };
        out.push_str(&format!("{} {:>w$} | {}\n", marker, n, lines[n - 1], w = width));
    }
    out
}

/// Frame for `finding`, read from `root`. Unreadable files give an empty
/// frame.
pub fn code_frame(root: &Path, finding: &Finding) -> String {
    match fs::read_to_string(root.join(&finding.file)) {
        Ok(source) => render_frame(&source, finding.line_range()),
        Err(e) => {
            warn!(file = %finding.file, error = %e, "cannot read source for code frame");
            String::new()
        }
    }
}
