//! Statement-level fixers that restructure whole lines: scoped resources
//! and guarded JSON decoding.

use super::edit::Edit;
use super::{alone_on_line, imports, indent_unit, nodes_of, Fixer};
use crate::models::PackId;
use crate::scan::{is_unmanaged_acquire, json_decode_guarded};
use crate::syntax::{self, Module};
use std::collections::BTreeSet;
use tree_sitter::Node;

/// The single assignment inside an expression statement.
fn sole_assignment(stmt: Node<'_>) -> Option<Node<'_>> {
    if stmt.kind() != "expression_statement" {
        return None;
    }
    match syntax::named(stmt).as_slice() {
        [a] if a.kind() == "assignment" => Some(*a),
        _ => None,
    }
}

/// True when `stmt` is exactly `name.close()`.
fn is_close_of(stmt: Node<'_>, name: &str, src: &str) -> bool {
    if stmt.kind() != "expression_statement" {
        return false;
    }
    match syntax::named(stmt).as_slice() {
        [call] if call.kind() == "call" => {
            syntax::call_name(*call, src) == Some(format!("{}.close", name))
                && syntax::arguments(*call).map(|a| syntax::named(a).is_empty()) == Some(true)
        }
        _ => false,
    }
}

fn has_multiline_string(stmt: Node<'_>) -> bool {
    let mut found = false;
    syntax::walk(stmt, &mut |n| {
        if syntax::is_string(n) && syntax::line(n) != syntax::end_line(n) {
            found = true;
        }
    });
    found
}

pub struct ScopedResource;

impl ScopedResource {
    /// `name = open(...)` ... `name.close()` in one block becomes
    /// `with open(...) as name:` around the statements in between.
    fn rewrite(block: Node<'_>, src: &str) -> Option<Edit> {
        let stmts = syntax::statements(block);
        for (i, stmt) in stmts.iter().enumerate() {
            let Some(assign) = sole_assignment(*stmt) else {
                continue;
            };
            let (Some(left), Some(call)) = (
                assign.child_by_field_name("left"),
                assign.child_by_field_name("right"),
            ) else {
                continue;
            };
            if left.kind() != "identifier"
                || call.kind() != "call"
                || !is_unmanaged_acquire(call, src)
                || !alone_on_line(*stmt, src)
            {
                continue;
            }
            let name = syntax::text(left, src);
            let Some(j) = (i + 1..stmts.len()).find(|j| is_close_of(stmts[*j], name, src)) else {
                continue;
            };
            let close = stmts[j];
            if j == i + 1 || !alone_on_line(close, src) {
                continue;
            }
            if stmts[i + 1..j].iter().any(|s| has_multiline_string(*s)) {
                continue;
            }

            let first = syntax::line(*stmt);
            let last = syntax::line(close);
            let lines: Vec<&str> = src.lines().collect();
            let indent = syntax::indent_at(src, stmt.start_byte());
            let unit = indent_unit(indent);
            let mut text = format!("{}with {} as {}:\n", indent, syntax::text(call, src), name);
            for l in lines.get(first..last - 1).unwrap_or(&[]) {
                if l.trim().is_empty() {
                    text.push('\n');
                } else {
                    text.push_str(unit);
                    text.push_str(l);
                    text.push('\n');
                }
            }
            return Some(Edit::replace_lines(first, last, text));
        }
        None
    }
}

impl Fixer for ScopedResource {
    fn pack(&self) -> PackId {
        PackId::UnmanagedResource
    }

    /// One rewrite per block per round. Further pairs in a block, and outer
    /// pairs whose edit was dropped for overlapping an inner one, are taken
    /// by the patcher's next round.
    fn edits(&self, m: &Module<'_>) -> Vec<Edit> {
        let mut blocks = vec![m.root()];
        blocks.extend(nodes_of(m.root(), &["block"]));
        blocks
            .into_iter()
            .filter_map(|b| Self::rewrite(b, m.source))
            .collect()
    }
}

pub struct GuardJson;

impl GuardJson {
    /// The statement to wrap and the fallback for the handler body.
    fn target<'t>(call: Node<'t>, src: &str) -> Option<(Node<'t>, String)> {
        let parent = call.parent()?;
        match parent.kind() {
            "return_statement" => Some((parent, "return None".to_string())),
            "assignment" => {
                let stmt = parent.parent().filter(|s| s.kind() == "expression_statement")?;
                let left = parent.child_by_field_name("left")?;
                let right = parent.child_by_field_name("right")?;
                if left.kind() != "identifier" || right.id() != call.id() {
                    return None;
                }
                Some((stmt, format!("{} = None", syntax::text(left, src))))
            }
            _ => None,
        }
    }
}

impl Fixer for GuardJson {
    fn pack(&self) -> PackId {
        PackId::UnguardedJson
    }

    fn edits(&self, m: &Module<'_>) -> Vec<Edit> {
        let src = m.source;
        let mut seen = BTreeSet::new();
        let mut edits = Vec::new();
        for call in nodes_of(m.root(), &["call"]) {
            let name = syntax::call_name(call, src);
            if !matches!(name.as_deref(), Some("json.loads") | Some("json.load")) {
                continue;
            }
            if json_decode_guarded(call, src) {
                continue;
            }
            let Some((stmt, fallback)) = Self::target(call, src) else {
                continue;
            };
            let in_block = stmt
                .parent()
                .map(|p| matches!(p.kind(), "block" | "module"))
                .unwrap_or(false);
            if !in_block || !alone_on_line(stmt, src) || !seen.insert(syntax::line(stmt)) {
                continue;
            }
            let indent = syntax::indent_at(src, stmt.start_byte());
            let unit = indent_unit(indent);
            let text = format!(
                "{i}try:\n{i}{u}{stmt}\n{i}except json.JSONDecodeError:\n{i}{u}{fallback}\n",
                i = indent,
                u = unit,
                stmt = syntax::text(stmt, src),
                fallback = fallback,
            );
            let line = syntax::line(stmt);
            edits.push(Edit::replace_lines(line, line, text));
        }
        if !edits.is_empty() {
            edits.extend(imports::ensure_imports(m, &["json"]));
        }
        edits
    }
}

#[cfg(test)]
mod tests {
    use crate::models::PackId;
    use crate::patch::Patcher;
    use std::collections::BTreeSet;

    fn fix(pack: PackId, src: &str) -> String {
        let set: BTreeSet<PackId> = [pack].into_iter().collect();
        Patcher::new().apply(src, "m.py", Some(&set)).unwrap().0
    }

    #[test]
    fn acquire_release_becomes_with_block() {
        let src = r#"def b(p):
    f = open(p)
    data = f.read()

    f.close()
    return data
"#;
        let out = fix(PackId::UnmanagedResource, src);
        assert_eq!(
            out,
            "def b(p):\n    with open(p) as f:\n        data = f.read()\n\n    return data\n"
        );
        assert_eq!(fix(PackId::UnmanagedResource, &out), out);
    }

    #[test]
    fn resource_without_release_is_left_alone() {
        let src = "def b(p):\n    f = open(p)\n    return f.read()\n";
        assert_eq!(fix(PackId::UnmanagedResource, src), src);
        let adjacent = "def c(p):\n    f = open(p)\n    f.close()\n";
        assert_eq!(fix(PackId::UnmanagedResource, adjacent), adjacent);
    }

    #[test]
    fn json_fixture_is_guarded() {
        let before = "# ruff: noqa: I001\nimport json\ndef parse(s):\n    return json.loads(s)\n";
        let after = "# ruff: noqa: I001\nimport json\ndef parse(s):\n    try:\n        return json.loads(s)\n    except json.JSONDecodeError:\n        return None\n";
        assert_eq!(fix(PackId::UnguardedJson, before), after);
        assert_eq!(fix(PackId::UnguardedJson, after), after);
    }

    #[test]
    fn json_assignment_falls_back_to_none() {
        let src = "import json\n\ndef read(fp):\n    data = json.load(fp)\n    return data\n";
        assert_eq!(
            fix(PackId::UnguardedJson, src),
            "import json\n\ndef read(fp):\n    try:\n        data = json.load(fp)\n    except json.JSONDecodeError:\n        data = None\n    return data\n"
        );
    }
}
