//! Function-level detectors: mutable defaults, length, and annotations.

use super::Ctx;
use crate::models::PackId;
use crate::syntax;
use tree_sitter::Node;

/// A parameter default that is a list/dict/set literal.
pub(crate) struct MutableDefault<'t> {
    pub param: Node<'t>,
    pub name: String,
    pub value: Node<'t>,
}

pub(crate) fn collection_kind(value: Node<'_>) -> Option<&'static str> {
    match value.kind() {
        "list" => Some("List"),
        "dictionary" => Some("Dict"),
        "set" => Some("Set"),
        _ => None,
    }
}

pub(crate) fn mutable_defaults<'t>(def: Node<'t>, source: &str) -> Vec<MutableDefault<'t>> {
    let Some(params) = def.child_by_field_name("parameters") else {
        return Vec::new();
    };
    syntax::named(params)
        .into_iter()
        .filter(|p| matches!(p.kind(), "default_parameter" | "typed_default_parameter"))
        .filter_map(|p| {
            let value = p.child_by_field_name("value")?;
            collection_kind(value)?;
            let name = p.child_by_field_name("name")?;
            Some(MutableDefault {
                param: p,
                name: syntax::text(name, source).to_string(),
                value,
            })
        })
        .collect()
}

pub(crate) fn visit_def(ctx: &mut Ctx<'_, '_>, def: Node<'_>) {
    for md in mutable_defaults(def, ctx.source()) {
        let kind = collection_kind(md.value).unwrap_or("List");
        ctx.emit(
            PackId::MutableDefault,
            md.value,
            format!("mutable default for '{}'", md.name),
            vec![kind.to_string()],
            Some((syntax::line(md.param), syntax::end_line(md.param))),
        );
    }

    let name = syntax::def_name(def, ctx.source());
    let loc = syntax::end_line(def) - syntax::line(def) + 1;
    if loc >= ctx.max_function_lines {
        ctx.emit(
            PackId::Complexity,
            def,
            format!("function length {} >= {} LOC", loc, ctx.max_function_lines),
            vec!["long-func".into()],
            Some((syntax::line(def), syntax::end_line(def))),
        );
    }

    if !name.starts_with('_') {
        if let Some(message) = signature_gap(def, ctx.source()) {
            ctx.emit(PackId::Typing, def, message, vec!["public-def".into()], None);
        }
    }
}

/// Why a signature is incomplete, if it is.
fn signature_gap(def: Node<'_>, source: &str) -> Option<&'static str> {
    let method = syntax::ancestors(def)
        .find(|a| syntax::is_scope(*a))
        .map(|a| a.kind() == "class_definition")
        .unwrap_or(false);
    let params = def
        .child_by_field_name("parameters")
        .map(syntax::named)
        .unwrap_or_default();

    let mut missing = def.child_by_field_name("return_type").is_none();
    let mut has_any = def
        .child_by_field_name("return_type")
        .map(|t| is_any(t, source))
        .unwrap_or(false);
    for (i, p) in params.iter().enumerate() {
        match p.kind() {
            "identifier" | "default_parameter" => {
                let pname = if p.kind() == "identifier" {
                    syntax::text(*p, source)
                } else {
                    p.child_by_field_name("name")
                        .map(|n| syntax::text(n, source))
                        .unwrap_or("")
                };
                if !(method && i == 0 && matches!(pname, "self" | "cls")) {
                    missing = true;
                }
            }
            "typed_parameter" | "typed_default_parameter" => {
                if p.child_by_field_name("type").map(|t| is_any(t, source)).unwrap_or(false) {
                    has_any = true;
                }
            }
            _ => {}
        }
    }
    if missing {
        Some("missing annotations")
    } else if has_any {
        Some("Any in signature")
    } else {
        None
    }
}

fn is_any(type_node: Node<'_>, source: &str) -> bool {
    matches!(syntax::text(type_node, source).trim(), "Any" | "typing.Any")
}

#[cfg(test)]
mod tests {
    use crate::config::ScanSettings;
    use crate::registry::Registry;
    use crate::scan::tests::scan_text;
    use crate::scan::Scanner;
    use std::path::PathBuf;

    #[test]
    fn flags_each_mutable_default() {
        let src = "def f(a, b=[], c: dict = {}, d=None, e={1}) -> None:\n    return None\n";
        let found = scan_text(src);
        let mda: Vec<_> = found.iter().filter(|f| f.pack.as_str() == "MDA-003").collect();
        let msgs: Vec<_> = mda.iter().map(|f| f.message.as_str()).collect();
        assert_eq!(
            msgs,
            vec![
                "mutable default for 'b'",
                "mutable default for 'c'",
                "mutable default for 'e'"
            ]
        );
        assert_eq!(mda[1].hint_tokens, vec!["Dict".to_string()]);
        assert_eq!(mda[2].hint_tokens, vec!["Set".to_string()]);
    }

    #[test]
    fn typing_gaps_skip_private_and_receiver() {
        let src = r#"
from typing import Any

class C:
    def ok(self, x: int) -> int:
        return x

    def loose(self, x: Any) -> int:
        return 1

def _private(x):
    return x

async def fetch(url):
    return url
"#;
        let found = scan_text(src);
        let typ: Vec<_> = found
            .iter()
            .filter(|f| f.pack.as_str() == "TYP-009")
            .map(|f| (f.frame.as_str(), f.message.as_str()))
            .collect();
        assert_eq!(
            typ,
            vec![
                ("def loose()", "Any in signature"),
                ("async def fetch()", "missing annotations")
            ]
        );
    }

    #[test]
    fn long_functions_use_configured_threshold() {
        let mut body = String::from("def long_one() -> None:\n");
        for i in 0..9 {
            body.push_str(&format!("    x{} = {}\n", i, i));
        }
        let reg = Registry::builtin().unwrap();
        let s = ScanSettings {
            root: PathBuf::from("."),
            exclude: vec![],
            max_function_lines: 10,
        };
        let found = Scanner::new(&s, &reg).scan_source("m.py", &body).unwrap();
        let cpl: Vec<_> = found.iter().filter(|f| f.pack.as_str() == "CPL-017").collect();
        assert_eq!(cpl.len(), 1);
        assert_eq!(cpl[0].message, "function length 10 >= 10 LOC");
        assert_eq!(cpl[0].span, Some((1, 10)));

        let s9 = ScanSettings {
            max_function_lines: 11,
            ..s
        };
        let found = Scanner::new(&s9, &reg).scan_source("m.py", &body).unwrap();
        assert!(found.iter().all(|f| f.pack.as_str() != "CPL-017"));
    }
}
