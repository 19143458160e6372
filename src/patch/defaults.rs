//! Mutable default parameters become `None` plus a guarded initialisation.

use super::edit::{insert_at_line, Edit};
use super::{indent_unit, nodes_of, Fixer};
use crate::models::PackId;
use crate::scan::mutable_defaults;
use crate::syntax::{self, Module};

pub struct NoneDefault;

impl Fixer for NoneDefault {
    fn pack(&self) -> PackId {
        PackId::MutableDefault
    }

    fn edits(&self, m: &Module<'_>) -> Vec<Edit> {
        let src = m.source;
        let mut edits = Vec::new();
        for def in nodes_of(m.root(), &["function_definition"]) {
            let found = mutable_defaults(def, src);
            if found.is_empty() {
                continue;
            }
            let Some(body) = def.child_by_field_name("body") else {
                continue;
            };
            let stmts = syntax::statements(body);
            let Some(first) = stmts.first().copied() else {
                continue;
            };
            // `def f(x=[]): return x` has nowhere to put a guard.
            let header_end = def
                .child_by_field_name("parameters")
                .map(syntax::end_line)
                .unwrap_or_else(|| syntax::line(def));
            if syntax::line(first) <= header_end {
                continue;
            }

            let indent = syntax::indent_at(src, first.start_byte());
            let unit = indent_unit(indent);
            let body_text = m.text(body);
            let mut guards = String::new();
            for md in &found {
                edits.push(Edit::replace(md.value, "None"));
                if body_text.contains(&format!("if {} is None:", md.name)) {
                    continue;
                }
                guards.push_str(&format!(
                    "{indent}if {name} is None:\n{indent}{unit}{name} = {value}\n",
                    indent = indent,
                    unit = unit,
                    name = md.name,
                    value = m.text(md.value),
                ));
            }
            if guards.is_empty() {
                continue;
            }
            let at = match syntax::docstring(body) {
                Some(doc) => syntax::end_line(doc) + 1,
                None => syntax::line(first),
            };
            edits.push(insert_at_line(src, at, guards));
        }
        edits
    }
}
