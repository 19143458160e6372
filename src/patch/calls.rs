//! Call-site fixers: subprocess flags, argparse choices, print-to-logger,
//! joined paths, and safe YAML loading.

use super::edit::{end_of, start_of, Edit};
use super::{imports, nodes_of, Fixer};
use crate::models::PackId;
use crate::syntax::{self, Module};
use tree_sitter::Node;

fn calls_named<'t>(m: &'t Module<'_>, name: &str) -> Vec<Node<'t>> {
    nodes_of(m.root(), &["call"])
        .into_iter()
        .filter(|c| syntax::call_name(*c, m.source).as_deref() == Some(name))
        .collect()
}

/// Last argument node (comments excluded) of a call.
fn last_argument(call: Node<'_>) -> Option<Node<'_>> {
    syntax::arguments(call).and_then(|a| syntax::named(a).last().copied())
}

pub struct CheckedSubprocess;

impl Fixer for CheckedSubprocess {
    fn pack(&self) -> PackId {
        PackId::Subprocess
    }

    /// `shell=True` is left alone; it is a review item, not an auto-fix.
    fn edits(&self, m: &Module<'_>) -> Vec<Edit> {
        let src = m.source;
        calls_named(m, "subprocess.run")
            .into_iter()
            .filter(|c| !syntax::has_splat(*c))
            .filter_map(|call| {
                let has = |kw: &str| syntax::keyword_value(call, kw, src).is_some();
                let mut add = String::new();
                if !has("check") {
                    add.push_str(", check=True");
                }
                if !has("text") && !has("universal_newlines") {
                    add.push_str(", text=True");
                }
                if add.is_empty() {
                    return None;
                }
                last_argument(call).map(|last| Edit::insert(end_of(last), add))
            })
            .collect()
    }
}

pub struct SafeYaml;

impl Fixer for SafeYaml {
    fn pack(&self) -> PackId {
        PackId::UnsafeYaml
    }

    fn edits(&self, m: &Module<'_>) -> Vec<Edit> {
        let src = m.source;
        let mut edits = Vec::new();
        for call in calls_named(m, "yaml.load") {
            let attr = call
                .child_by_field_name("function")
                .and_then(|f| f.child_by_field_name("attribute"));
            if let Some(attr) = attr {
                edits.push(Edit::replace(attr, "safe_load"));
            }
            let Some(args) = syntax::arguments(call) else {
                continue;
            };
            let all = syntax::named(args);
            let Some(i) = all.iter().position(|a| {
                a.kind() == "keyword_argument"
                    && a.child_by_field_name("name").map(|n| syntax::text(n, src)) == Some("Loader")
            }) else {
                continue;
            };
            let kw = all[i];
            let edit = if i > 0 {
                Edit::new(end_of(all[i - 1]), end_of(kw), "")
            } else if let Some(next) = all.get(1) {
                Edit::new(start_of(kw), start_of(*next), "")
            } else {
                Edit::replace(kw, "")
            };
            edits.push(edit);
        }
        edits
    }
}

pub struct ArgChoices;

impl ArgChoices {
    /// `--log-level` -> `["LOG_LEVELS", "LOG_LEVEL_CHOICES", "LOG_LEVEL"]`.
    fn candidates(option: &str) -> Vec<String> {
        let base = option.trim_start_matches('-').replace('-', "_").to_uppercase();
        if base.is_empty() {
            return Vec::new();
        }
        vec![format!("{}S", base), format!("{}_CHOICES", base), base]
    }

    /// Text of a module-level list/tuple of plain string literals bound to
    /// `name`, rendered as a list.
    fn constant_choices(m: &Module<'_>, name: &str) -> Option<String> {
        let src = m.source;
        let value = syntax::statements(m.root())
            .into_iter()
            .filter(|s| s.kind() == "expression_statement")
            .flat_map(syntax::named)
            .filter(|a| a.kind() == "assignment")
            .filter(|a| {
                a.child_by_field_name("left")
                    .map(|l| l.kind() == "identifier" && syntax::text(l, src) == name)
                    .unwrap_or(false)
            })
            .filter_map(|a| a.child_by_field_name("right"))
            .last()?;
        if !matches!(value.kind(), "list" | "tuple") {
            return None;
        }
        let items = syntax::named(value);
        if items.is_empty()
            || !items
                .iter()
                .all(|i| i.kind() == "string" && !syntax::is_fstring(*i, src))
        {
            return None;
        }
        let texts: Vec<&str> = items.iter().map(|i| syntax::text(*i, src)).collect();
        Some(format!("[{}]", texts.join(", ")))
    }
}

fn unquote(literal: &str) -> Option<&str> {
    let t = literal.trim();
    let quote = t.chars().next().filter(|c| *c == '\'' || *c == '"')?;
    t.strip_prefix(quote)?.strip_suffix(quote)
}

impl Fixer for ArgChoices {
    fn pack(&self) -> PackId {
        PackId::ArgChoices
    }

    fn edits(&self, m: &Module<'_>) -> Vec<Edit> {
        let src = m.source;
        let mut edits = Vec::new();
        for call in nodes_of(m.root(), &["call"]) {
            let via_attribute = call
                .child_by_field_name("function")
                .map(|f| f.kind() == "attribute")
                .unwrap_or(false);
            if !via_attribute || syntax::call_attr(call, src) != Some("add_argument") {
                continue;
            }
            if syntax::keyword_value(call, "choices", src).is_some() {
                continue;
            }
            let Some((_, type_kw)) = syntax::keyword_args(call, src).into_iter().find(|(k, kw)| {
                k == "type"
                    && kw
                        .child_by_field_name("value")
                        .map(|v| v.kind() == "identifier" && syntax::text(v, src) == "str")
                        .unwrap_or(false)
            }) else {
                continue;
            };
            let option = syntax::positional_args(call)
                .into_iter()
                .filter(|a| a.kind() == "string")
                .filter_map(|a| unquote(syntax::text(a, src)))
                .find(|o| o.starts_with("--"));
            let Some(option) = option else { continue };
            let choices = Self::candidates(option)
                .iter()
                .find_map(|name| Self::constant_choices(m, name));
            if let Some(choices) = choices {
                edits.push(Edit::insert(end_of(type_kw), format!(", choices={}", choices)));
            }
        }
        edits
    }
}

pub struct PrintToLogger;

impl Fixer for PrintToLogger {
    fn pack(&self) -> PackId {
        PackId::PrintLogging
    }

    fn edits(&self, m: &Module<'_>) -> Vec<Edit> {
        let src = m.source;
        let mut edits: Vec<Edit> = calls_named(m, "print")
            .into_iter()
            .filter(|c| !syntax::under_main_guard(*c, src))
            .filter(|c| {
                let args = syntax::arguments(*c).map(syntax::named).unwrap_or_default();
                args.len() == 1 && syntax::positional_args(*c).len() == 1
            })
            .filter_map(|c| c.child_by_field_name("function"))
            .map(|f| Edit::replace(f, "logger.info"))
            .collect();
        if edits.is_empty() {
            return edits;
        }
        let mut header = Vec::new();
        if !imports::has_import(m, "logging") {
            header.push("import logging".to_string());
        }
        if !imports::has_module_binding(m, "logger") {
            header.push("logger = logging.getLogger(__name__)".to_string());
        }
        edits.extend(imports::insert_top(m, &header));
        edits
    }
}

pub struct JoinPath;

impl JoinPath {
    /// `a + '/' + b + '/' + c` -> `os.path.join(a, b, c)`; any other shape
    /// of `+` chain is left for review.
    fn joined(expr: Node<'_>, src: &str) -> Option<String> {
        if syntax::binary_op(expr, src) != Some("+") {
            return None;
        }
        let parts = syntax::plus_operands(expr, src);
        if parts.len() < 3 || parts.len() % 2 == 0 {
            return None;
        }
        let mut pieces = Vec::new();
        for (i, p) in parts.iter().enumerate() {
            let is_sep = p.kind() == "string" && matches!(syntax::text(*p, src), "'/'" | "\"/\"");
            if i % 2 == 1 {
                if !is_sep {
                    return None;
                }
            } else if is_sep {
                return None;
            } else {
                pieces.push(syntax::text(*p, src));
            }
        }
        Some(format!("os.path.join({})", pieces.join(", ")))
    }
}

impl Fixer for JoinPath {
    fn pack(&self) -> PackId {
        PackId::PathConcat
    }

    fn edits(&self, m: &Module<'_>) -> Vec<Edit> {
        let src = m.source;
        let mut targets = Vec::new();
        for ret in nodes_of(m.root(), &["return_statement"]) {
            targets.extend(syntax::named(ret).first().copied());
        }
        for call in calls_named(m, "open") {
            targets.extend(syntax::positional_args(call).first().copied());
        }
        let mut edits: Vec<Edit> = targets
            .into_iter()
            .filter_map(|e| Self::joined(e, src).map(|text| Edit::replace(e, text)))
            .collect();
        if !edits.is_empty() {
            edits.extend(imports::ensure_imports(m, &["os"]));
        }
        edits
    }
}
