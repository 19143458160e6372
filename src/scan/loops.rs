//! Loop-body detectors: blocking I/O and re-sliced windows.
//!
//! Each loop only reports constructs whose innermost enclosing loop is
//! itself, so nested loops never duplicate a finding.

use super::Ctx;
use crate::models::PackId;
use crate::syntax;
use tree_sitter::Node;

const BLOCKING_IO: [&str; 4] = ["open", "socket.socket", "requests.get", "requests.post"];

fn is_loop(node: Node<'_>) -> bool {
    matches!(node.kind(), "for_statement" | "while_statement")
}

/// Descendants of a loop body, stopping at nested loops and scopes.
fn body_nodes(body: Node<'_>) -> Vec<Node<'_>> {
    let mut out = Vec::new();
    let mut stack = vec![body];
    while let Some(n) = stack.pop() {
        for c in syntax::named(n).into_iter().rev() {
            out.push(c);
            if !is_loop(c) && !syntax::is_scope(c) {
                stack.push(c);
            }
        }
    }
    out.sort_by_key(|n| n.start_byte());
    out
}

/// Lower and upper bounds of a `slice` node (`a:b`, `a:b:c`).
fn slice_bounds(slice: Node<'_>) -> (Option<Node<'_>>, Option<Node<'_>>) {
    let mut lower = None;
    let mut upper = None;
    let mut colons = 0;
    for c in syntax::children(slice) {
        if c.kind() == ":" {
            colons += 1;
            continue;
        }
        if !c.is_named() || c.kind() == "comment" {
            continue;
        }
        match colons {
            0 => lower = Some(c),
            1 => upper = Some(c),
            _ => {}
        }
    }
    (lower, upper)
}

pub(crate) fn visit_loop(ctx: &mut Ctx<'_, '_>, node: Node<'_>) {
    let Some(body) = node.child_by_field_name("body") else {
        return;
    };
    let src = ctx.source();
    let span = Some((syntax::line(node), syntax::end_line(node)));
    for n in body_nodes(body) {
        match n.kind() {
            "call" => {
                if let Some(name) = syntax::call_name(n, src) {
                    if BLOCKING_IO.contains(&name.as_str()) {
                        ctx.emit(
                            PackId::LoopIo,
                            n,
                            format!("I/O call in loop: {}", name),
                            vec![name.clone()],
                            span,
                        );
                    }
                }
            }
            "slice" if node.kind() == "for_statement" => {
                let (lower, upper) = slice_bounds(n);
                let windowed = lower
                    .map(|l| matches!(syntax::binary_op(l, src), Some("-") | Some("+")))
                    .unwrap_or(false)
                    && upper.map(|u| u.kind() == "identifier").unwrap_or(false);
                if windowed {
                    let at = n.parent().filter(|p| p.kind() == "subscript").unwrap_or(n);
                    ctx.emit(
                        PackId::RollingWindow,
                        at,
                        "sliding window recompute in loop",
                        vec!["slice".into()],
                        span,
                    );
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::scan::tests::scan_text;

    #[test]
    fn io_in_loops_reports_innermost_loop_only() {
        let src = r#"
import requests
for url in urls:
    r = requests.get(url)
    for p in paths:
        fh = open(p)
while True:
    data = requests.post(url, json=body)
"#;
        let found = scan_text(src);
        let iob: Vec<_> = found
            .iter()
            .filter(|f| f.pack.as_str() == "IOB-013")
            .map(|f| (f.line, f.message.clone(), f.span))
            .collect();
        assert_eq!(
            iob,
            vec![
                (4, "I/O call in loop: requests.get".to_string(), Some((3, 6))),
                (6, "I/O call in loop: open".to_string(), Some((5, 6))),
                (8, "I/O call in loop: requests.post".to_string(), Some((7, 8))),
            ]
        );
    }

    #[test]
    fn windowed_slices_in_for_loops() {
        let src = r#"
def avg(xs, w):
    out = []
    for i in range(w, len(xs)):
        window = xs[i - w:i]
        head = xs[0:i]
        out.append(sum(window) / w)
    return out
"#;
        let found = scan_text(src);
        let rol: Vec<_> = found.iter().filter(|f| f.pack.as_str() == "ROL-012").collect();
        assert_eq!(rol.len(), 1);
        assert_eq!(rol[0].line, 5);
        assert_eq!(rol[0].span, Some((4, 7)));
    }
}
