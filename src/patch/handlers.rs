//! Handler fixers: narrow broad catches, re-raise from silent handlers, and
//! chain raises to the handled error.

use super::edit::{end_of, Edit};
use super::{imports, nodes_of, Fixer};
use crate::models::PackId;
use crate::scan::{is_broad, is_silent, unchained_raises};
use crate::syntax::{self, Handler, Module};

/// Replacement filter for broad handlers.
pub const NARROW_TYPES: &str = "(json.JSONDecodeError, KeyError, IndexError, ValueError, TypeError, OSError, subprocess.CalledProcessError)";

fn handlers<'t>(m: &'t Module<'_>) -> Vec<Handler<'t>> {
    nodes_of(m.root(), &["except_clause"])
        .into_iter()
        .map(syntax::handler)
        .collect()
}

pub struct NarrowExcept;

impl Fixer for NarrowExcept {
    fn pack(&self) -> PackId {
        PackId::BroadExcept
    }

    fn edits(&self, m: &Module<'_>) -> Vec<Edit> {
        let mut edits: Vec<Edit> = handlers(m)
            .iter()
            .filter(|h| is_broad(h, m.source))
            .filter_map(|h| match h.filter {
                Some(filter) => Some(Edit::replace(filter, NARROW_TYPES)),
                None => syntax::children(h.clause)
                    .into_iter()
                    .find(|c| c.kind() == "except")
                    .map(|kw| Edit::insert(end_of(kw), format!(" {}", NARROW_TYPES))),
            })
            .collect();
        if !edits.is_empty() {
            edits.extend(imports::ensure_imports(m, &["json", "subprocess"]));
        }
        edits
    }
}

pub struct ReraiseSilent;

impl Fixer for ReraiseSilent {
    fn pack(&self) -> PackId {
        PackId::SilentHandler
    }

    fn edits(&self, m: &Module<'_>) -> Vec<Edit> {
        handlers(m)
            .iter()
            .filter_map(is_silent)
            .map(|stmt| Edit::replace(stmt, "raise"))
            .collect()
    }
}

pub struct ChainRaise;

impl Fixer for ChainRaise {
    fn pack(&self) -> PackId {
        PackId::ErrorChaining
    }

    fn edits(&self, m: &Module<'_>) -> Vec<Edit> {
        let mut edits = Vec::new();
        for h in handlers(m) {
            let Some(name) = h.name else { continue };
            let name = m.text(name);
            for raise in unchained_raises(&h) {
                edits.push(Edit::insert(end_of(raise), format!(" from {}", name)));
            }
        }
        edits
    }
}
