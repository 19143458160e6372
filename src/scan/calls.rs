//! Call-site detectors: subprocess hardening, unmanaged handles, SQL
//! formatting, argparse choices, print logging, unsafe deserialization, and
//! string-built paths.

use super::Ctx;
use crate::models::PackId;
use crate::syntax;
use tree_sitter::Node;

/// Calls that acquire an OS handle.
pub const ACQUIRE: [&str; 2] = ["open", "socket.socket"];
/// Handler types that cover `json.JSONDecodeError`.
pub const JSON_DECODE_GUARDS: [&str; 3] = ["json.JSONDecodeError", "JSONDecodeError", "ValueError"];

const SHELL_ENTRY_POINTS: [&str; 5] = [
    "subprocess.run",
    "subprocess.call",
    "subprocess.check_call",
    "subprocess.check_output",
    "subprocess.Popen",
];

/// An `open`/`socket.socket` call with no `with` between it and the
/// enclosing function boundary.
pub(crate) fn is_unmanaged_acquire(call: Node<'_>, source: &str) -> bool {
    let Some(name) = syntax::call_name(call, source) else {
        return false;
    };
    if !ACQUIRE.contains(&name.as_str()) {
        return false;
    }
    for a in syntax::ancestors(call) {
        if a.kind() == "with_statement" {
            return false;
        }
        if syntax::is_scope(a) {
            break;
        }
    }
    true
}

/// True when `call` sits in the body of a `try` with a decode-error handler,
/// searching up to the enclosing function boundary.
pub(crate) fn json_decode_guarded(call: Node<'_>, source: &str) -> bool {
    let mut child = call;
    for a in syntax::ancestors(call) {
        if syntax::is_scope(a) {
            return false;
        }
        if a.kind() == "try_statement" {
            let in_body = a
                .child_by_field_name("body")
                .map(|b| b.id() == child.id())
                .unwrap_or(false);
            if in_body && handles_decode_error(a, source) {
                return true;
            }
        }
        child = a;
    }
    false
}

fn handles_decode_error(try_node: Node<'_>, source: &str) -> bool {
    syntax::named(try_node)
        .into_iter()
        .filter(|c| c.kind() == "except_clause")
        .filter_map(|c| syntax::handler(c).filter)
        .any(|f| {
            syntax::filter_names(f, source)
                .iter()
                .any(|n| JSON_DECODE_GUARDS.contains(&n.as_str()))
        })
}

fn is_true(node: Option<Node<'_>>, source: &str) -> bool {
    node.map(|n| syntax::text(n, source) == "True").unwrap_or(false)
}

/// f-string, `+`/`%` formatting, or a `.format(...)` call.
fn is_formatted(expr: Node<'_>, source: &str) -> bool {
    if syntax::is_fstring(expr, source) {
        return true;
    }
    if matches!(syntax::binary_op(expr, source), Some("+") | Some("%")) {
        return true;
    }
    expr.kind() == "call" && syntax::call_attr(expr, source) == Some("format")
        && expr
            .child_by_field_name("function")
            .map(|f| f.kind() == "attribute")
            .unwrap_or(false)
}

/// Value of the last `name = ...` statement before `before_line` in the
/// enclosing function body (or module).
fn last_assignment<'t>(call: Node<'t>, name: &str, source: &str) -> Option<Node<'t>> {
    let scope_body = match syntax::enclosing_function(call) {
        Some(def) => def.child_by_field_name("body")?,
        None => {
            let mut top = call;
            while let Some(p) = top.parent() {
                top = p;
            }
            top
        }
    };
    let before = call.start_byte();
    let mut found = None;
    for stmt in syntax::statements(scope_body) {
        if stmt.start_byte() >= before {
            break;
        }
        if stmt.kind() != "expression_statement" {
            continue;
        }
        for assign in syntax::named(stmt).into_iter().filter(|n| n.kind() == "assignment") {
            let target = assign.child_by_field_name("left");
            if target.map(|t| t.kind() == "identifier" && syntax::text(t, source) == name) == Some(true) {
                found = assign.child_by_field_name("right");
            }
        }
    }
    found
}

pub(crate) fn visit_call(ctx: &mut Ctx<'_, '_>, call: Node<'_>) {
    let src = ctx.source();
    let name = syntax::call_name(call, src);
    let attr = syntax::call_attr(call, src);
    let via_attribute = call
        .child_by_field_name("function")
        .map(|f| f.kind() == "attribute")
        .unwrap_or(false);

    if let Some(name) = name.as_deref() {
        subprocess_checks(ctx, call, name);

        if is_unmanaged_acquire(call, src) {
            ctx.emit(
                PackId::UnmanagedResource,
                call,
                format!("{} without context manager", name),
                vec![name.to_string()],
                None,
            );
        }

        if name == "print" && !syntax::under_main_guard(call, src) {
            ctx.emit(PackId::PrintLogging, call, "print() in library code", vec!["print".into()], None);
        }

        if name == "yaml.load" {
            ctx.emit(
                PackId::UnsafeYaml,
                call,
                "unsafe yaml.load; use safe_load",
                vec!["yaml.load".into()],
                None,
            );
        }

        if (name == "json.loads" || name == "json.load") && !json_decode_guarded(call, src) {
            ctx.emit(
                PackId::UnguardedJson,
                call,
                format!("{} without JSONDecodeError handling", name),
                vec![name.to_string()],
                None,
            );
        }

        if name == "open" {
            if let Some(first) = syntax::positional_args(call).first().copied() {
                if syntax::is_fstring(first, src) {
                    ctx.emit(
                        PackId::PathConcat,
                        call,
                        "interpolated path passed to open",
                        vec!["path".into()],
                        None,
                    );
                } else if first.kind() == "binary_operator" {
                    ctx.emit(
                        PackId::PathConcat,
                        call,
                        "path built by string concatenation",
                        vec!["+".into(), "/".into()],
                        None,
                    );
                }
            }
        }
    }

    if via_attribute && matches!(attr, Some("execute") | Some("executemany")) {
        if let Some(first) = syntax::positional_args(call).first().copied() {
            let risky = is_formatted(first, src)
                || (first.kind() == "identifier"
                    && last_assignment(call, syntax::text(first, src), src)
                        .map(|v| is_formatted(v, src))
                        .unwrap_or(false));
            if risky {
                ctx.emit(
                    PackId::SqlFormat,
                    call,
                    "string-formatted SQL passed to execute",
                    vec!["execute".into()],
                    Some((syntax::line(call), syntax::end_line(call))),
                );
            }
        }
    }

    if via_attribute && attr == Some("add_argument") {
        let type_str = syntax::keyword_value(call, "type", src)
            .map(|v| v.kind() == "identifier" && syntax::text(v, src) == "str")
            .unwrap_or(false);
        let has_choices = syntax::keyword_value(call, "choices", src).is_some();
        if type_str && !has_choices {
            ctx.emit(
                PackId::ArgChoices,
                call,
                "CLI enum missing choices",
                vec!["argparse".into()],
                None,
            );
        }
    }
}

fn subprocess_checks(ctx: &mut Ctx<'_, '_>, call: Node<'_>, name: &str) {
    if !SHELL_ENTRY_POINTS.contains(&name) {
        return;
    }
    let src = ctx.source();
    let hint = vec![name.to_string()];
    let has = |kw: &str| syntax::keyword_value(call, kw, src).is_some();
    match name {
        "subprocess.run" => {
            if !has("check") {
                ctx.emit(PackId::Subprocess, call, "missing check=True", hint.clone(), None);
            } else if !(has("text") || has("universal_newlines")) {
                ctx.emit(PackId::Subprocess, call, "consider text=True", hint.clone(), None);
            }
        }
        "subprocess.call" => {
            ctx.emit(PackId::Subprocess, call, "use run(..., check=True)", hint.clone(), None);
        }
        _ => {}
    }
    if is_true(syntax::keyword_value(call, "shell", src), src) {
        ctx.emit(PackId::Subprocess, call, "uses shell=True", hint, None);
    }
}

/// `return a + '/' + b` style path building.
pub(crate) fn visit_return(ctx: &mut Ctx<'_, '_>, ret: Node<'_>) {
    let src = ctx.source();
    let Some(value) = syntax::named(ret).first().copied() else {
        return;
    };
    if syntax::binary_op(value, src) != Some("+") {
        return;
    }
    let slash = syntax::plus_operands(value, src)
        .into_iter()
        .any(|op| op.kind() == "string" && !syntax::is_fstring(op, src) && syntax::text(op, src).contains('/'));
    if slash {
        ctx.emit(
            PackId::PathConcat,
            ret,
            "path built by string concatenation",
            vec!["+".into(), "/".into()],
            None,
        );
    }
}

#[cfg(test)]
mod tests {
    use crate::models::Finding;
    use crate::scan::tests::scan_text;

    fn only<'a>(found: &'a [Finding], pack: &str) -> Vec<&'a Finding> {
        found.iter().filter(|f| f.pack.as_str() == pack).collect()
    }

    #[test]
    fn subprocess_messages() {
        let src = r#"
import subprocess
subprocess.run(["ls"])
subprocess.run(["ls"], check=True)
subprocess.run(["ls"], check=True, text=True)
subprocess.call("ls", shell=True)
subprocess.Popen(["ls"])
"#;
        let found = scan_text(src);
        let msgs: Vec<_> = only(&found, "SUB-006").iter().map(|f| (f.line, f.message.clone())).collect();
        assert_eq!(
            msgs,
            vec![
                (3, "missing check=True".to_string()),
                (4, "consider text=True".to_string()),
                (6, "use run(..., check=True)".to_string()),
                (6, "uses shell=True".to_string()),
            ]
        );
    }

    #[test]
    fn resources_need_with_up_to_function_boundary() {
        let src = r#"
def a(p):
    with open(p) as f:
        return f.read()

def b(p):
    f = open(p)
    data = f.read()
    f.close()
    return data

def c(p):
    with lock:
        def inner():
            return open(p)
        return inner
"#;
        let found = scan_text(src);
        let res: Vec<_> = only(&found, "RES-005").iter().map(|f| (f.line, f.frame.clone())).collect();
        assert_eq!(res, vec![(7, "def b()".to_string()), (15, "def inner()".to_string())]);
        assert_eq!(only(&found, "RES-005")[0].message, "open without context manager");
    }

    #[test]
    fn sql_formatting_traced_one_assignment_back() {
        let src = r#"
def q(cur, uid, name):
    cur.execute(f"select * from t where id = {uid}")
    cur.execute("select * from t where id = %s" % uid)
    cur.execute("select {}".format(name))
    sql = "select * from t where name = '" + name + "'"
    cur.execute(sql)
    safe = "select * from t where id = ?"
    cur.execute(safe, (uid,))
    cur.executemany("insert into t values (?)", rows)
"#;
        let found = scan_text(src);
        let lines: Vec<_> = only(&found, "SQL-007").iter().map(|f| f.line).collect();
        assert_eq!(lines, vec![3, 4, 5, 7]);
        assert_eq!(only(&found, "SQL-007")[0].span, Some((3, 3)));
    }

    #[test]
    fn argparse_print_and_yaml() {
        let src = r#"
import argparse, yaml
p = argparse.ArgumentParser()
p.add_argument("--mode", type=str)
p.add_argument("--level", type=str, choices=["a", "b"])
p.add_argument("--n", type=int)
cfg = yaml.load(text, Loader=yaml.FullLoader)
ok = yaml.safe_load(text)
print("lib")
if __name__ == "__main__":
    print("main")
"#;
        let found = scan_text(src);
        assert_eq!(only(&found, "ARG-008").len(), 1);
        assert_eq!(only(&found, "ARG-008")[0].line, 4);
        assert_eq!(only(&found, "YAML-015").len(), 1);
        let logs = only(&found, "LOG-010");
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].line, 9);
    }

    #[test]
    fn json_guard_requires_decode_handler_around_the_call() {
        let src = r#"
import json

def a(s):
    return json.loads(s)

def b(s):
    try:
        return json.loads(s)
    except json.JSONDecodeError:
        return None

def c(s):
    try:
        return json.loads(s)
    except (KeyError, ValueError):
        return None

def d(s):
    try:
        pass
    except json.JSONDecodeError:
        return json.loads(s)

def e(fp):
    try:
        def inner():
            return json.load(fp)
    except json.JSONDecodeError:
        pass
"#;
        let found = scan_text(src);
        let frames: Vec<_> = only(&found, "JSON-016").iter().map(|f| f.frame.clone()).collect();
        assert_eq!(frames, vec!["def a()", "def d()", "def inner()"]);
    }

    #[test]
    fn string_built_paths() {
        let src = r#"
def p(base, name):
    return base + "/" + name

def q(base, name):
    return base + name

def r(base, name):
    with open(f"{base}/{name}") as fh:
        return fh.read()
"#;
        let found = scan_text(src);
        let path: Vec<_> = only(&found, "PATH-014").iter().map(|f| (f.line, f.message.clone())).collect();
        assert_eq!(
            path,
            vec![
                (3, "path built by string concatenation".to_string()),
                (9, "interpolated path passed to open".to_string()),
            ]
        );
    }
}
