//! Output rendering for scan, fix, gate, emit, ingest, and packs commands.
//!
//! Supports `human` (default) and `json` outputs. JSON forms carry per-item
//! fields and a top-level summary. The gate verdict is always a single JSON
//! object on stdout.

use crate::agent::IngestOutcome;
use crate::models::{FixMode, Finding, Pack, Severity, Verdict};
use crate::patch::FixResult;
use crate::registry::Registry;
use owo_colors::OwoColorize;
use serde_json::json;
use serde_json::Value as JsonVal;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

fn use_colors(output: &str) -> bool {
    output != "json" && std::env::var_os("NO_COLOR").is_none()
}

fn print_json(value: &JsonVal) {
    println!("{:#}", value);
}

fn severity_label(sev: Option<Severity>, color: bool) -> String {
    let (icon, label) = match sev {
        Some(Severity::High) => ("✖", "⟦high⟧"),
        Some(Severity::Medium) => ("▲", "⟦medium⟧"),
        _ => ("◆", "⟦low⟧"),
    };
    if !color {
        return format!("{} {}", icon, label);
    }
    match sev {
        Some(Severity::High) => format!("{} {}", icon.red(), label.red().bold()),
        Some(Severity::Medium) => format!("{} {}", icon.yellow(), label.yellow().bold()),
        _ => format!("{} {}", icon.blue(), label.blue().bold()),
    }
}

/// Print scan findings in the requested format.
pub fn print_findings(findings: &[Finding], registry: &Registry, output: &str, stream: &Path) {
    match output {
        "json" => print_json(&compose_findings_json(findings, stream)),
        _ => {
            let color = use_colors(output);
            for f in findings {
                let sev = registry.get(&f.pack).map(|p| p.severity);
                let loc = format!("{}:{}:{}", f.file, f.line, f.col);
                let loc = if color { loc.bold().to_string() } else { loc };
                println!(
                    "{} {} ❲{}❳ {} ({})",
                    severity_label(sev, color),
                    loc,
                    f.pack,
                    f.message,
                    f.frame
                );
            }
            let files = findings
                .iter()
                .map(|f| f.file.as_str())
                .collect::<std::collections::BTreeSet<_>>()
                .len();
            let summary = format!(
                "Summary: findings={} files={} stream={}",
                findings.len(),
                files,
                stream.display()
            );
            if color {
                println!("{}", summary.bold());
            } else {
                println!("{}", summary);
            }
        }
    }
}

/// Compose scan JSON object (pure) for testing/snapshot purposes.
pub fn compose_findings_json(findings: &[Finding], stream: &Path) -> JsonVal {
    let mut by_pack: BTreeMap<String, usize> = BTreeMap::new();
    for f in findings {
        *by_pack.entry(f.pack.to_string()).or_insert(0) += 1;
    }
    let files = findings
        .iter()
        .map(|f| f.file.as_str())
        .collect::<std::collections::BTreeSet<_>>()
        .len();
    json!({
        "results": findings,
        "summary": {
            "total": findings.len(),
            "files": files,
            "by_pack": by_pack,
            "stream": stream.to_string_lossy(),
        }
    })
}

/// Print fix results. Diffs are shown only when `diff` is set.
pub fn print_fix(results: &[FixResult], output: &str, diff: bool) {
    match output {
        "json" => print_json(&compose_fix_json(results, diff)),
        _ => {
            let color = use_colors(output);
            for r in results {
                if r.wrote {
                    if color {
                        println!("{} {}", "✏️  fixed:".green().bold(), r.file.bold());
                    } else {
                        println!("✏️  fixed: {}", r.file);
                    }
                } else if r.changed {
                    if color {
                        println!("{} {}", "would fix:".yellow().bold(), r.file.bold());
                    } else {
                        println!("would fix: {}", r.file);
                    }
                    if diff {
                        for d in &r.diffs {
                            print!("{}", d);
                        }
                    }
                } else if color {
                    println!("{} {}", "no changes:".bright_black(), r.file);
                } else {
                    println!("no changes: {}", r.file);
                }
            }
        }
    }
}

/// Compose fix JSON object (pure) for testing/snapshot purposes.
pub fn compose_fix_json(results: &[FixResult], diff: bool) -> JsonVal {
    let items: Vec<_> = results
        .iter()
        .map(|r| {
            json!({
                "file": r.file,
                "changed": r.changed,
                "wrote": r.wrote,
                "diff": if diff && r.changed { Some(r.diffs.concat()) } else { None },
            })
        })
        .collect();
    let summary = json!({
        "changed": results.iter().filter(|r| r.changed).count(),
        "total": results.len(),
        "wrote": results.iter().filter(|r| r.wrote).count(),
    });
    json!({"results": items, "summary": summary})
}

/// Print the gate verdict. One compact JSON line always goes to stdout;
/// human mode adds a one-line status on stderr.
pub fn print_verdict(verdict: &Verdict, output: &str) {
    println!("{}", compose_verdict_line(verdict));
    if output == "json" {
        return;
    }
    let status = if verdict.exit_code == 0 {
        format!("gate passed ({} in footprint, {} waived)", verdict.l1_in_pr, verdict.waivers)
    } else {
        format!("gate failed: {} unwaived finding(s) in footprint", verdict.remaining_l1)
    };
    if !use_colors(output) {
        eprintln!("{}", status);
    } else if verdict.exit_code == 0 {
        eprintln!("{}", status.green().bold());
    } else {
        eprintln!("{}", status.red().bold());
    }
}

pub fn compose_verdict_json(verdict: &Verdict) -> JsonVal {
    serde_json::to_value(verdict).unwrap_or(JsonVal::Null)
}

/// The verdict as a single-line JSON object.
pub fn compose_verdict_line(verdict: &Verdict) -> String {
    compose_verdict_json(verdict).to_string()
}

/// Print the task packets written by `emit`.
pub fn print_tasks(written: &[PathBuf], root: &Path, output: &str) {
    let rel: Vec<String> = written
        .iter()
        .map(|p| crate::utils::rel_to_root(p, root))
        .collect();
    match output {
        "json" => print_json(&json!({"results": rel, "summary": {"written": rel.len()}})),
        _ => {
            let color = use_colors(output);
            for p in &rel {
                if color {
                    println!("{} {}", "📝 task:".green().bold(), p);
                } else {
                    println!("📝 task: {}", p);
                }
            }
            if rel.is_empty() {
                println!("no findings need review");
            }
        }
    }
}

/// Print an ingestion outcome.
pub fn print_ingest(outcome: &IngestOutcome, waiver: &Path, output: &str) {
    match output {
        "json" => print_json(&serde_json::to_value(outcome).unwrap_or(JsonVal::Null)),
        _ => {
            let color = use_colors(output);
            if let Some(reason) = &outcome.reason {
                let head = format!("rejected ({}):", reason);
                if color {
                    println!("{} waiver appended to {}", head.red().bold(), waiver.display());
                } else {
                    println!("{} waiver appended to {}", head, waiver.display());
                }
            } else if outcome.documents.is_empty() {
                println!("nothing to ingest");
            } else if color {
                println!(
                    "{} {} file(s) from {} document(s)",
                    "📥 merged:".green().bold(),
                    outcome.accepted,
                    outcome.documents.len()
                );
            } else {
                println!(
                    "📥 merged: {} file(s) from {} document(s)",
                    outcome.accepted,
                    outcome.documents.len()
                );
            }
        }
    }
}

pub fn print_waiver(finding: &Finding, path: &Path, output: &str) {
    match output {
        "json" => print_json(&json!({
            "waiver": path.to_string_lossy(),
            "finding": finding,
        })),
        _ => println!(
            "{} waived {} at {}:{} in {}",
            crate::utils::info_prefix(),
            finding.pack,
            finding.file,
            finding.line,
            path.display()
        ),
    }
}

/// Aligned `id severity auto name` table (pure).
pub fn compose_packs_table(registry: &Registry) -> String {
    let rows: Vec<[String; 4]> = registry
        .iter()
        .map(|p| {
            let auto = match p.fix {
                FixMode::Auto => "yes",
                FixMode::SuggestOnly => "no",
            };
            let name = if p.detect {
                p.name.clone()
            } else {
                format!("{} (disabled)", p.name)
            };
            [p.id.to_string(), p.severity.as_str().to_string(), auto.to_string(), name]
        })
        .collect();
    let header = ["ID", "SEVERITY", "AUTO", "NAME"].map(String::from);
    let mut widths = [0usize; 4];
    for row in std::iter::once(&header).chain(rows.iter()) {
        for (w, cell) in widths.iter_mut().zip(row.iter()) {
            *w = (*w).max(cell.chars().count());
        }
    }
    let mut out = String::new();
    for row in std::iter::once(&header).chain(rows.iter()) {
        let line = format!(
            "{:<w0$}  {:<w1$}  {:<w2$}  {}",
            row[0],
            row[1],
            row[2],
            row[3],
            w0 = widths[0],
            w1 = widths[1],
            w2 = widths[2]
        );
        out.push_str(line.trim_end());
        out.push('\n');
    }
    out
}

pub fn print_packs(registry: &Registry, output: &str) {
    match output {
        "json" => {
            let packs: Vec<&Pack> = registry.iter().collect();
            print_json(&json!({"results": packs, "summary": {"total": packs.len()}}));
        }
        _ => print!("{}", compose_packs_table(registry)),
    }
}

/// Full description block of one pack (pure).
pub fn compose_pack_block(pack: &Pack) -> String {
    let list = |items: &[String]| {
        if items.is_empty() {
            "  (none)\n".to_string()
        } else {
            items.iter().map(|i| format!("  - {}\n", i)).collect()
        }
    };
    let mut out = format!(
        "{} {}\nseverity: {}\nfix: {}\ndetect: {}\n",
        pack.id,
        pack.name,
        pack.severity.as_str(),
        match pack.fix {
            FixMode::Auto => "auto",
            FixMode::SuggestOnly => "suggest-only",
        },
        pack.detect
    );
    out.push_str("signals:\n");
    out.push_str(&list(&pack.detect_signals));
    out.push_str("transforms:\n");
    out.push_str(&list(&pack.allowed_transforms));
    out.push_str(&format!("decision rule: {}\n", pack.decision_rule));
    out.push_str("hints:\n");
    out.push_str(&list(&pack.hints));
    if !pack.review_on.is_empty() {
        out.push_str("review on:\n");
        out.push_str(&list(&pack.review_on));
    }
    out
}

pub fn print_pack(pack: &Pack, output: &str) {
    match output {
        "json" => print_json(&serde_json::to_value(pack).unwrap_or(JsonVal::Null)),
        _ => {
            let block = compose_pack_block(pack);
            if use_colors(output) {
                let (head, rest) = block.split_once('\n').unwrap_or((block.as_str(), ""));
                println!("{}", head.bold());
                print!("{}", rest);
            } else {
                print!("{}", block);
            }
        }
    }
}
