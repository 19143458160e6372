//! Module-level import bookkeeping for fixers that introduce names.

use super::edit::{insert_at_line, Edit};
use crate::syntax::{self, Module};

/// True when `module` is bound by a top-level `import` (including
/// `import module.sub` and `import module as alias`).
pub fn has_import(m: &Module<'_>, module: &str) -> bool {
    syntax::statements(m.root()).into_iter().any(|stmt| {
        if stmt.kind() != "import_statement" {
            return false;
        }
        syntax::named(stmt).into_iter().any(|n| {
            let dotted = match n.kind() {
                "aliased_import" => n.child_by_field_name("name"),
                "dotted_name" => Some(n),
                _ => None,
            };
            dotted
                .map(|d| {
                    let t = m.text(d);
                    t == module || t.starts_with(&format!("{}.", module))
                })
                .unwrap_or(false)
        })
    })
}

/// True when a top-level statement assigns `name`.
pub fn has_module_binding(m: &Module<'_>, name: &str) -> bool {
    syntax::statements(m.root()).into_iter().any(|stmt| {
        stmt.kind() == "expression_statement"
            && syntax::named(stmt).into_iter().any(|a| {
                a.kind() == "assignment"
                    && a.child_by_field_name("left").map(|l| m.text(l) == name) == Some(true)
            })
    })
}

/// Where new imports go: after a module docstring and the leading import
/// block, or before the first statement when there is neither.
pub fn insertion_point(m: &Module<'_>) -> (usize, usize) {
    let stmts = syntax::statements(m.root());
    let mut after = None;
    let mut i = 0;
    if let Some(doc) = syntax::docstring(m.root()) {
        after = Some(doc);
        i = 1;
    }
    while let Some(s) = stmts.get(i) {
        if !matches!(
            s.kind(),
            "import_statement" | "import_from_statement" | "future_import_statement"
        ) {
            break;
        }
        after = Some(*s);
        i += 1;
    }
    match (after, stmts.first()) {
        (Some(node), _) => (syntax::end_line(node) + 1, 0),
        (None, Some(first)) => (syntax::line(*first), 0),
        (None, None) => (1, 0),
    }
}

/// One edit that adds every line in `lines` at the import insertion point.
pub fn insert_top(m: &Module<'_>, lines: &[String]) -> Option<Edit> {
    if lines.is_empty() {
        return None;
    }
    let (line, _) = insertion_point(m);
    let mut text = lines.join("\n");
    text.push('\n');
    Some(insert_at_line(m.source, line, text))
}

/// Edit adding `import x` for each of `modules` not yet imported.
pub fn ensure_imports(m: &Module<'_>, modules: &[&str]) -> Option<Edit> {
    let missing: Vec<String> = modules
        .iter()
        .filter(|name| !has_import(m, name))
        .map(|name| format!("import {}", name))
        .collect();
    insert_top(m, &missing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::edit::apply_edits;
    use crate::syntax::parse;

    #[test]
    fn inserts_after_docstring_and_imports() {
        let src = "\"\"\"Doc.\"\"\"\nfrom __future__ import annotations\nimport os\n\nx = 1\n";
        let m = parse(src).unwrap();
        assert_eq!(insertion_point(&m), (4, 0));
        let e = ensure_imports(&m, &["os", "json"]).unwrap();
        assert_eq!(
            apply_edits(src, vec![e]),
            "\"\"\"Doc.\"\"\"\nfrom __future__ import annotations\nimport os\nimport json\n\nx = 1\n"
        );
    }

    #[test]
    fn keeps_leading_comments_above_insertion() {
        let src = "# ruff: noqa\n\ndef f():\n    pass\n";
        let m = parse(src).unwrap();
        assert_eq!(insertion_point(&m), (3, 0));
        assert!(ensure_imports(&parse("import os.path\n").unwrap(), &["os"]).is_none());
    }

    #[test]
    fn handles_missing_trailing_newline() {
        let src = "import os";
        let m = parse(src).unwrap();
        let e = ensure_imports(&m, &["json"]).unwrap();
        assert_eq!(apply_edits(src, vec![e]), "import os\nimport json\n");
    }

    #[test]
    fn module_bindings() {
        let m = parse("import logging\nlogger = logging.getLogger(__name__)\n").unwrap();
        assert!(has_module_binding(&m, "logger"));
        assert!(!has_module_binding(&m, "log"));
    }
}
