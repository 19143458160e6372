//! Python syntax trees via tree-sitter, plus the node helpers the scanner
//! and patcher share.
//!
//! Both stages parse from text on every run; nothing here caches trees
//! across calls. Positions reported to callers are 1-based lines and
//! 0-based byte columns.

use crate::error::SyntaxError;
use tree_sitter::{Node, Parser, Point, Tree};

/// Parsed Python source. The tree borrows nothing; `source` is kept
/// alongside so node text can be sliced out.
pub struct Module<'s> {
    pub source: &'s str,
    pub tree: Tree,
}

impl<'s> Module<'s> {
    pub fn root(&self) -> Node<'_> {
        self.tree.root_node()
    }

    pub fn text(&self, node: Node<'_>) -> &'s str {
        text(node, self.source)
    }
}

/// Parse `source`; any error or missing node makes the whole file unparsable.
pub fn parse(source: &str) -> Result<Module<'_>, SyntaxError> {
    let mut parser = Parser::new();
    parser
        .set_language(&tree_sitter_python::LANGUAGE.into())
        .map_err(|_| SyntaxError { line: 0, col: 0 })?;
    let tree = parser
        .parse(source, None)
        .ok_or(SyntaxError { line: 0, col: 0 })?;
    let root = tree.root_node();
    if root.has_error() {
        let at = first_error(root).map(|n| n.start_position()).unwrap_or(Point { row: 0, column: 0 });
        return Err(SyntaxError {
            line: at.row + 1,
            col: at.column,
        });
    }
    Ok(Module { source, tree })
}

fn first_error(node: Node<'_>) -> Option<Node<'_>> {
    if node.is_error() || node.is_missing() {
        return Some(node);
    }
    children(node)
        .into_iter()
        .filter(|c| c.has_error())
        .find_map(first_error)
}

pub fn text<'s>(node: Node<'_>, source: &'s str) -> &'s str {
    source.get(node.byte_range()).unwrap_or("")
}

pub fn line(node: Node<'_>) -> usize {
    node.start_position().row + 1
}

pub fn end_line(node: Node<'_>) -> usize {
    node.end_position().row + 1
}

pub fn col(node: Node<'_>) -> usize {
    node.start_position().column
}

/// All children, anonymous tokens included.
pub fn children(node: Node<'_>) -> Vec<Node<'_>> {
    let mut cursor = node.walk();
    node.children(&mut cursor).collect()
}

/// Named children without comments.
pub fn named(node: Node<'_>) -> Vec<Node<'_>> {
    let mut cursor = node.walk();
    node.named_children(&mut cursor)
        .filter(|c| c.kind() != "comment")
        .collect()
}

/// Statements of a `block` or `module`.
pub fn statements(block: Node<'_>) -> Vec<Node<'_>> {
    named(block)
}

pub fn ancestors(node: Node<'_>) -> impl Iterator<Item = Node<'_>> {
    std::iter::successors(node.parent(), |n| n.parent())
}

pub fn is_scope(node: Node<'_>) -> bool {
    matches!(node.kind(), "function_definition" | "class_definition" | "lambda")
}

/// Visit `node` and its descendants in pre-order.
pub fn walk<'t>(node: Node<'t>, f: &mut dyn FnMut(Node<'t>)) {
    f(node);
    for c in named(node) {
        walk(c, f);
    }
}

pub fn is_async(def: Node<'_>) -> bool {
    children(def).first().map(|c| c.kind() == "async").unwrap_or(false)
}

pub fn def_name<'s>(def: Node<'_>, source: &'s str) -> &'s str {
    def.child_by_field_name("name").map(|n| text(n, source)).unwrap_or("")
}

/// Label of the nearest enclosing def/class, or `<module>`.
pub fn frame(node: Node<'_>, source: &str) -> String {
    let scope = std::iter::once(node)
        .chain(ancestors(node))
        .find(|n| matches!(n.kind(), "function_definition" | "class_definition"));
    match scope {
        Some(def) if def.kind() == "function_definition" => {
            let prefix = if is_async(def) { "async def" } else { "def" };
            format!("{} {}()", prefix, def_name(def, source))
        }
        Some(class) => format!("class {}", def_name(class, source)),
        None => "<module>".to_string(),
    }
}

pub fn enclosing_function(node: Node<'_>) -> Option<Node<'_>> {
    ancestors(node).find(|n| n.kind() == "function_definition")
}

/// Smallest named node covering 1-based `line`, 0-based `col`.
pub fn node_at<'t>(root: Node<'t>, line: usize, col: usize) -> Node<'t> {
    let at = Point {
        row: line.saturating_sub(1),
        column: col,
    };
    root.named_descendant_for_point_range(at, at).unwrap_or(root)
}

/// `a`, `a.b`, `a.b.c`; `None` for anything that is not a plain dotted name.
pub fn dotted_name(node: Node<'_>, source: &str) -> Option<String> {
    match node.kind() {
        "identifier" => Some(text(node, source).to_string()),
        "attribute" => {
            let object = node.child_by_field_name("object")?;
            let attr = node.child_by_field_name("attribute")?;
            Some(format!("{}.{}", dotted_name(object, source)?, text(attr, source)))
        }
        _ => None,
    }
}

/// Dotted name of the callee of a `call` node.
pub fn call_name(call: Node<'_>, source: &str) -> Option<String> {
    dotted_name(call.child_by_field_name("function")?, source)
}

/// Last segment of the callee (`execute` for `cur.execute`), even when the
/// receiver is not a plain name.
pub fn call_attr<'s>(call: Node<'_>, source: &'s str) -> Option<&'s str> {
    let func = call.child_by_field_name("function")?;
    match func.kind() {
        "identifier" => Some(text(func, source)),
        "attribute" => func.child_by_field_name("attribute").map(|a| text(a, source)),
        _ => None,
    }
}

pub fn arguments(call: Node<'_>) -> Option<Node<'_>> {
    call.child_by_field_name("arguments")
        .filter(|a| a.kind() == "argument_list")
}

pub fn positional_args(call: Node<'_>) -> Vec<Node<'_>> {
    arguments(call)
        .map(|args| {
            named(args)
                .into_iter()
                .filter(|a| {
                    !matches!(
                        a.kind(),
                        "keyword_argument" | "list_splat" | "dictionary_splat"
                    )
                })
                .collect()
        })
        .unwrap_or_default()
}

/// `(name, keyword_argument node)` pairs.
pub fn keyword_args<'t>(call: Node<'t>, source: &str) -> Vec<(String, Node<'t>)> {
    arguments(call)
        .map(|args| {
            named(args)
                .into_iter()
                .filter(|a| a.kind() == "keyword_argument")
                .filter_map(|kw| {
                    let name = kw.child_by_field_name("name")?;
                    Some((text(name, source).to_string(), kw))
                })
                .collect()
        })
        .unwrap_or_default()
}

pub fn keyword_value<'t>(call: Node<'t>, name: &str, source: &str) -> Option<Node<'t>> {
    keyword_args(call, source)
        .into_iter()
        .find(|(k, _)| k == name)
        .and_then(|(_, kw)| kw.child_by_field_name("value"))
}

pub fn has_splat(call: Node<'_>) -> bool {
    arguments(call)
        .map(|args| {
            named(args)
                .iter()
                .any(|a| matches!(a.kind(), "list_splat" | "dictionary_splat"))
        })
        .unwrap_or(false)
}

/// String literal with an `f` prefix (or a concatenation containing one).
pub fn is_fstring(node: Node<'_>, source: &str) -> bool {
    match node.kind() {
        "string" => {
            let t = text(node, source);
            let prefix: String = t.chars().take_while(|c| *c != '"' && *c != '\'').collect();
            prefix.to_ascii_lowercase().contains('f')
        }
        "concatenated_string" => named(node).into_iter().any(|s| is_fstring(s, source)),
        _ => false,
    }
}

pub fn is_string(node: Node<'_>) -> bool {
    matches!(node.kind(), "string" | "concatenated_string")
}

pub fn binary_op<'s>(node: Node<'_>, source: &'s str) -> Option<&'s str> {
    if node.kind() != "binary_operator" {
        return None;
    }
    node.child_by_field_name("operator").map(|op| text(op, source))
}

/// Parts of a chain of `+`: `a + '/' + b` -> `[a, '/', b]`.
pub fn plus_operands<'t>(node: Node<'t>, source: &str) -> Vec<Node<'t>> {
    if binary_op(node, source) == Some("+") {
        let mut out = Vec::new();
        if let Some(l) = node.child_by_field_name("left") {
            out.extend(plus_operands(l, source));
        }
        if let Some(r) = node.child_by_field_name("right") {
            out.extend(plus_operands(r, source));
        }
        out
    } else {
        vec![node]
    }
}

/// The exception filter and bound name of an `except` clause.
pub struct Handler<'t> {
    pub clause: Node<'t>,
    pub filter: Option<Node<'t>>,
    pub name: Option<Node<'t>>,
    pub body: Option<Node<'t>>,
}

pub fn handler(clause: Node<'_>) -> Handler<'_> {
    let parts = named(clause);
    let body = parts.iter().copied().find(|n| n.kind() == "block");
    let head: Vec<Node<'_>> = parts.into_iter().filter(|n| n.kind() != "block").collect();
    let (filter, name) = match head.as_slice() {
        [] => (None, None),
        [only] if only.kind() == "as_pattern" => {
            let inner = named(*only);
            let filter = inner.first().copied();
            let name = inner
                .iter()
                .find(|n| n.kind() == "as_pattern_target")
                .and_then(|t| named(*t).first().copied().or(Some(*t)));
            (filter, name)
        }
        [only] => (Some(*only), None),
        [filter, name, ..] => (Some(*filter), Some(*name)),
    };
    Handler {
        clause,
        filter,
        name,
        body,
    }
}

/// Dotted names listed in an except filter (`A` or `(A, B)`).
pub fn filter_names(filter: Node<'_>, source: &str) -> Vec<String> {
    let inner = if filter.kind() == "parenthesized_expression" {
        named(filter).first().copied().unwrap_or(filter)
    } else {
        filter
    };
    if inner.kind() == "tuple" {
        named(inner)
            .into_iter()
            .filter_map(|n| dotted_name(n, source))
            .collect()
    } else {
        dotted_name(inner, source).into_iter().collect()
    }
}

/// Module docstring, if the first statement is a bare string.
pub fn docstring(block: Node<'_>) -> Option<Node<'_>> {
    let first = statements(block).into_iter().next()?;
    if first.kind() != "expression_statement" {
        return None;
    }
    let inner = named(first);
    (inner.len() == 1 && is_string(inner[0])).then_some(first)
}

/// True when `node` sits in the true branch of `if __name__ == "__main__":`.
pub fn under_main_guard(node: Node<'_>, source: &str) -> bool {
    ancestors(node).any(|a| {
        if a.kind() != "if_statement" {
            return false;
        }
        let Some(cond) = a.child_by_field_name("condition") else {
            return false;
        };
        let compact: String = text(cond, source).chars().filter(|c| !c.is_whitespace()).collect();
        let is_main = compact == "__name__==\"__main__\"" || compact == "__name__=='__main__'";
        let in_body = a
            .child_by_field_name("consequence")
            .map(|b| b.start_byte() <= node.start_byte() && node.end_byte() <= b.end_byte())
            .unwrap_or(false);
        is_main && in_body
    })
}

/// Leading whitespace of the line containing byte `offset`.
pub fn indent_at(source: &str, offset: usize) -> &str {
    let start = source[..offset.min(source.len())].rfind('\n').map(|i| i + 1).unwrap_or(0);
    let rest = &source[start..];
    let len = rest.len() - rest.trim_start_matches([' ', '\t']).len();
    &rest[..len]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn first_of_kind<'t>(root: Node<'t>, kind: &str) -> Node<'t> {
        let mut found = None;
        walk(root, &mut |n| {
            if found.is_none() && n.kind() == kind {
                found = Some(n);
            }
        });
        found.unwrap()
    }

    #[test]
    fn parse_rejects_broken_source() {
        let err = parse("def f(:\n    pass\n").err().unwrap();
        assert_eq!(err.line, 1);
        assert!(parse("x = 1\n").is_ok());
    }

    #[test]
    fn handler_shapes() {
        let src = "try:\n    f()\nexcept (ValueError, KeyError) as err:\n    pass\n";
        let m = parse(src).unwrap();
        let h = handler(first_of_kind(m.root(), "except_clause"));
        assert_eq!(filter_names(h.filter.unwrap(), src), vec!["ValueError", "KeyError"]);
        assert_eq!(m.text(h.name.unwrap()), "err");

        let src = "try:\n    f()\nexcept:\n    pass\n";
        let m = parse(src).unwrap();
        let h = handler(first_of_kind(m.root(), "except_clause"));
        assert!(h.filter.is_none() && h.name.is_none() && h.body.is_some());
    }

    #[test]
    fn frames_and_calls() {
        let src = "class C:\n    async def go(self):\n        subprocess.run(['ls'], check=True)\n";
        let m = parse(src).unwrap();
        let call = first_of_kind(m.root(), "call");
        assert_eq!(frame(call, src), "async def go()");
        assert_eq!(call_name(call, src).as_deref(), Some("subprocess.run"));
        assert_eq!(keyword_value(call, "check", src).map(|v| m.text(v)), Some("True"));
        assert_eq!(positional_args(call).len(), 1);
        assert_eq!(frame(m.root(), src), "<module>");
        assert_eq!(frame(node_at(m.root(), 3, 8), src), "async def go()");
        assert_eq!(frame(node_at(m.root(), 1, 0), src), "class C");
    }

    #[test]
    fn plus_chain_operands_outlive_the_source_borrow() {
        let m = parse("p = base + '/' + name\n").unwrap();
        let parts = {
            let src = String::from(m.source);
            plus_operands(first_of_kind(m.root(), "binary_operator"), &src)
        };
        let texts: Vec<&str> = parts.iter().map(|n| m.text(*n)).collect();
        assert_eq!(texts, vec!["base", "'/'", "name"]);
    }

    #[test]
    fn main_guard_detection() {
        let src = "if __name__ == '__main__':\n    print('a')\nelse:\n    print('b')\n";
        let m = parse(src).unwrap();
        let mut calls = Vec::new();
        walk(m.root(), &mut |n| {
            if n.kind() == "call" {
                calls.push(n);
            }
        });
        assert!(under_main_guard(calls[0], src));
        assert!(!under_main_guard(calls[1], src));
    }

    #[test]
    fn fstrings_and_indent() {
        let src = "x = f\"{a}/b\"\ny = 'plain'\n";
        let m = parse(src).unwrap();
        let mut strings = Vec::new();
        walk(m.root(), &mut |n| {
            if n.kind() == "string" {
                strings.push(n);
            }
        });
        assert!(is_fstring(strings[0], src));
        assert!(!is_fstring(strings[1], src));
        assert_eq!(indent_at("def f():\n    return 1\n", 14), "    ");
    }
}
