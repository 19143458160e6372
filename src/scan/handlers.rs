//! try/except detectors: broad handlers, silent handlers, unchained raises.

use super::Ctx;
use crate::models::PackId;
use crate::syntax::{self, Handler};
use tree_sitter::Node;

/// Filters that catch everything.
pub const UNIVERSAL: [&str; 2] = ["Exception", "BaseException"];

/// Bare `except:` or a filter that is exactly a universal type.
pub(crate) fn is_broad(h: &Handler<'_>, source: &str) -> bool {
    match h.filter {
        None => true,
        Some(f) => matches!(syntax::dotted_name(f, source).as_deref(), Some(n) if UNIVERSAL.contains(&n)),
    }
}

/// The lone `pass`/`continue` statement of a silent handler.
pub(crate) fn is_silent<'t>(h: &Handler<'t>) -> Option<Node<'t>> {
    let body = syntax::statements(h.body?);
    match body.as_slice() {
        [only] if matches!(only.kind(), "pass_statement" | "continue_statement") => Some(*only),
        _ => None,
    }
}

/// Direct `raise X(...)` statements of a named handler that carry no cause.
/// Bare `raise` and raises inside nested blocks or defs are not included.
pub(crate) fn unchained_raises<'t>(h: &Handler<'t>) -> Vec<Node<'t>> {
    let (Some(_), Some(body)) = (h.name, h.body) else {
        return Vec::new();
    };
    syntax::statements(body)
        .into_iter()
        .filter(|s| s.kind() == "raise_statement")
        .filter(|s| !syntax::named(*s).is_empty())
        .filter(|s| !syntax::children(*s).iter().any(|c| c.kind() == "from"))
        .collect()
}

pub(crate) fn visit_try(ctx: &mut Ctx<'_, '_>, node: Node<'_>) {
    let body = node.child_by_field_name("body");
    for clause in syntax::named(node) {
        if !matches!(clause.kind(), "except_clause" | "except_group_clause") {
            continue;
        }
        let h = syntax::handler(clause);

        if is_broad(&h, ctx.source()) {
            let (hints, span) = match body {
                Some(b) => (
                    signal_tokens(ctx.text(b), ctx.handler_signals),
                    Some(block_span(b)),
                ),
                None => (Vec::new(), None),
            };
            ctx.emit(PackId::BroadExcept, clause, "broad/bare except detected", hints, span);
        }

        if let Some(stmt) = is_silent(&h) {
            ctx.emit(
                PackId::SilentHandler,
                stmt,
                "silent handler (pass/continue)",
                Vec::new(),
                None,
            );
        }

        if let Some(name) = h.name {
            let name = ctx.text(name).to_string();
            for raise in unchained_raises(&h) {
                ctx.emit(
                    PackId::ErrorChaining,
                    raise,
                    format!("raise without 'from {}'", name),
                    vec![name.clone()],
                    None,
                );
            }
        }
    }
}

/// Start/end lines of a block's statements.
fn block_span(block: Node<'_>) -> (usize, usize) {
    let stmts = syntax::statements(block);
    match (stmts.first(), stmts.last()) {
        (Some(first), Some(last)) => (syntax::line(*first), syntax::end_line(*last)),
        _ => (syntax::line(block), syntax::end_line(block)),
    }
}

/// Vocabulary tokens present in the guarded block, plus derived markers for
/// indexing and process calls.
fn signal_tokens(text: &str, vocabulary: &[String]) -> Vec<String> {
    let mut tokens: Vec<String> = vocabulary
        .iter()
        .filter(|t| text.contains(t.as_str()))
        .cloned()
        .collect();
    if text.contains('[') && text.contains(']') {
        tokens.push("[]-indexing".into());
    }
    if [".run(", ".Popen(", ".call("].iter().any(|t| text.contains(t)) {
        tokens.push("subprocess.*".into());
    }
    tokens
}
