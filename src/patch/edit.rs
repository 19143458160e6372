//! Text edits addressed by (line, column) and their ordered application.

use tracing::warn;
use tree_sitter::Node;

#[derive(Debug, Clone, PartialEq, Eq)]
/// Replace the half-open region `start..end` with `replacement`.
///
/// Lines are 1-based, columns are 0-based byte offsets into the line.
pub struct Edit {
    pub start: (usize, usize),
    pub end: (usize, usize),
    pub replacement: String,
}

impl Edit {
    pub fn new(start: (usize, usize), end: (usize, usize), replacement: impl Into<String>) -> Self {
        Edit {
            start,
            end,
            replacement: replacement.into(),
        }
    }

    pub fn insert(at: (usize, usize), text: impl Into<String>) -> Self {
        Edit::new(at, at, text)
    }

    /// Replace exactly the text of `node`.
    pub fn replace(node: Node<'_>, text: impl Into<String>) -> Self {
        Edit::new(start_of(node), end_of(node), text)
    }

    /// Replace whole lines `first..=last`, including the final newline.
    pub fn replace_lines(first: usize, last: usize, text: impl Into<String>) -> Self {
        Edit::new((first, 0), (last + 1, 0), text)
    }
}

pub fn start_of(node: Node<'_>) -> (usize, usize) {
    let p = node.start_position();
    (p.row + 1, p.column)
}

pub fn end_of(node: Node<'_>) -> (usize, usize) {
    let p = node.end_position();
    (p.row + 1, p.column)
}

/// Insert `text` at the start of `line`. Past the end of a file with no
/// trailing newline, a newline is added first.
pub fn insert_at_line(source: &str, line: usize, text: impl Into<String>) -> Edit {
    let mut text = text.into();
    let at = (line, 0);
    if LineIndex::new(source).offset(at) == source.len()
        && !source.is_empty()
        && !source.ends_with('\n')
    {
        text.insert(0, '\n');
    }
    Edit::insert(at, text)
}

/// Byte offsets of line starts, for (line, col) -> offset conversion.
pub struct LineIndex {
    starts: Vec<usize>,
    len: usize,
}

impl LineIndex {
    pub fn new(source: &str) -> Self {
        let mut starts = vec![0];
        starts.extend(source.match_indices('\n').map(|(i, _)| i + 1));
        LineIndex {
            starts,
            len: source.len(),
        }
    }

    /// Offset of `(line, col)`, clamped to the end of the text.
    pub fn offset(&self, (line, col): (usize, usize)) -> usize {
        match self.starts.get(line.saturating_sub(1)) {
            Some(start) => (start + col).min(self.len),
            None => self.len,
        }
    }
}

/// Apply `edits` in strictly descending start order so every offset is
/// computed against the original text. An edit that overlaps one already
/// applied is dropped.
pub fn apply_edits(source: &str, mut edits: Vec<Edit>) -> String {
    if edits.is_empty() {
        return source.to_string();
    }
    let index = LineIndex::new(source);
    edits.sort_by(|a, b| (b.start, b.end).cmp(&(a.start, a.end)));
    let mut out = source.to_string();
    let mut floor = usize::MAX;
    for e in edits {
        let s = index.offset(e.start);
        let t = index.offset(e.end).max(s);
        if t > floor {
            warn!(start = ?e.start, end = ?e.end, "dropping overlapping edit");
            continue;
        }
        if !out.is_char_boundary(s) || !out.is_char_boundary(t) {
            warn!(start = ?e.start, "dropping edit off a character boundary");
            continue;
        }
        out.replace_range(s..t, &e.replacement);
        floor = s;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const SRC: &str = "alpha = 1\nbeta = 2\ngamma = 3\n";

    fn rename_edits() -> Vec<Edit> {
        vec![
            Edit::new((1, 0), (1, 5), "alpha_renamed"),
            Edit::new((2, 0), (2, 4), "beta_renamed"),
            Edit::new((3, 0), (3, 5), "gamma_renamed"),
        ]
    }

    #[test]
    fn order_of_input_does_not_matter() {
        let expected = "alpha_renamed = 1\nbeta_renamed = 2\ngamma_renamed = 3\n";
        assert_eq!(apply_edits(SRC, rename_edits()), expected);
        let mut rev = rename_edits();
        rev.reverse();
        assert_eq!(apply_edits(SRC, rev), expected);
    }

    #[test]
    fn ascending_application_with_original_offsets_corrupts() {
        let index = LineIndex::new(SRC);
        let mut naive = SRC.to_string();
        for e in rename_edits() {
            let s = index.offset(e.start);
            let t = index.offset(e.end);
            naive.replace_range(s..t, &e.replacement);
        }
        // Growing replacements shift later offsets instead of running off the end.
        assert!(naive.starts_with("alpha_renabeta_renamed="));
        assert_ne!(naive, apply_edits(SRC, rename_edits()));
    }

    #[test]
    fn overlapping_edits_are_dropped() {
        let edits = vec![
            Edit::new((1, 0), (2, 4), "x"),
            Edit::new((2, 0), (2, 4), "b"),
        ];
        assert_eq!(apply_edits(SRC, edits), "alpha = 1\nb = 2\ngamma = 3\n");
    }

    #[test]
    fn line_replacement_and_end_of_file_insert() {
        let out = apply_edits(
            SRC,
            vec![
                Edit::replace_lines(2, 2, "beta = 20\n"),
                Edit::insert((4, 0), "delta = 4\n"),
            ],
        );
        assert_eq!(out, "alpha = 1\nbeta = 20\ngamma = 3\ndelta = 4\n");
        let index = LineIndex::new("x");
        assert_eq!(index.offset((9, 0)), 1);
    }
}
