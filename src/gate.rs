//! Gate: reconcile findings against waivers for a change footprint.
//!
//! `compute_gate` is pure arithmetic over already-loaded inputs. `run_gate`
//! gathers those inputs (findings stream, footprint, waiver record) and never
//! fails: missing or unreadable sources degrade to empty inputs so the gate
//! always prints a verdict.
//!
//! Waiver counting, in order:
//! - `pack: ID` markers whose id is gated;
//! - otherwise, plain occurrences of each gated id in the text;
//! - otherwise, one blanket waiver if the record exists at all.

use crate::config::Effective;
use crate::models::{PackId, Verdict};
use crate::registry::Registry;
use crate::scan::read_gate_records;
use crate::utils::normalize_rel;
use crate::vcs::Vcs;
use regex::Regex;
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

/// Number of waivers recorded in `text` for the `gated` packs.
pub fn count_waivers(text: Option<&str>, gated: &BTreeSet<PackId>, marker: &str) -> usize {
    let Some(text) = text else {
        return 0;
    };
    let by_marker = match Regex::new(marker) {
        Ok(re) => re
            .captures_iter(text)
            .filter_map(|c| c.get(1))
            .filter(|m| gated.contains(&PackId::from(m.as_str())))
            .count(),
        Err(e) => {
            warn!(error = %e, "invalid waiver marker pattern; ignoring markers");
            0
        }
    };
    if by_marker > 0 {
        return by_marker;
    }
    let by_id: usize = gated.iter().map(|id| text.matches(id.as_str()).count()).sum();
    if by_id > 0 {
        return by_id;
    }
    1
}

pub fn compute_gate(
    footprint: &[String],
    records: &[(String, String)],
    waiver_text: Option<&str>,
    gated: &BTreeSet<PackId>,
    marker: &str,
) -> Verdict {
    let changed: BTreeSet<String> = footprint
        .iter()
        .map(|f| normalize_rel(f.trim()))
        .filter(|f| !f.is_empty())
        .collect();
    let l1_in_pr = records
        .iter()
        .filter(|(pack, file)| {
            gated.contains(&PackId::from(pack.as_str())) && changed.contains(&normalize_rel(file))
        })
        .count();
    let waivers = count_waivers(waiver_text, gated, marker);
    let remaining_l1 = l1_in_pr.saturating_sub(waivers);
    Verdict {
        total_all: records.len(),
        l1_in_pr,
        waivers,
        remaining_l1,
        changed_files: changed.len(),
        gate_tf_ids: gated.iter().map(|id| id.to_string()).collect(),
        exit_code: if remaining_l1 > 0 { 1 } else { 0 },
    }
}

/// Where the change footprint comes from.
pub enum Footprint<'a> {
    /// Newline-delimited file list.
    List(&'a Path),
    /// Files changed against a base ref.
    Base(&'a str),
    None,
}

/// Packs the gate counts: configured `gate_on`, else every high-severity pack.
pub fn gated_ids(eff: &Effective, registry: &Registry) -> BTreeSet<PackId> {
    eff.gate
        .gate_on
        .clone()
        .unwrap_or_else(|| registry.high_severity_ids())
}

pub fn run_gate(
    eff: &Effective,
    registry: &Registry,
    change_id: &str,
    footprint: Footprint<'_>,
    findings: &Path,
    vcs: &dyn Vcs,
) -> Verdict {
    let files: Vec<String> = match footprint {
        Footprint::List(path) => match fs::read_to_string(path) {
            Ok(text) => text.lines().map(str::to_string).collect(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cannot read changed-file list");
                Vec::new()
            }
        },
        Footprint::Base(base) => vcs.changed_files(&eff.repo_root, base).unwrap_or_else(|e| {
            warn!(error = %e, "cannot list changed files");
            Vec::new()
        }),
        Footprint::None => Vec::new(),
    };
    let records = if findings.exists() {
        read_gate_records(findings).unwrap_or_else(|e| {
            warn!(path = %findings.display(), error = %e, "cannot read findings");
            Vec::new()
        })
    } else {
        debug!(path = %findings.display(), "no findings stream; nothing to gate");
        Vec::new()
    };
    let waiver_path = eff.waiver_path(change_id);
    let waiver_text = fs::read_to_string(&waiver_path).ok();
    compute_gate(
        &files,
        &records,
        waiver_text.as_deref(),
        &gated_ids(eff, registry),
        &eff.gate.waiver_marker,
    )
}
