//! packgate CLI binary entry point.
//! Resolves configuration, delegates to the library stages, and prints results.
//!
//! Exit codes: 0 ok, 1 check failed (gate, `fix --check`, rejected ingest),
//! 2 usage or configuration error.

use clap::Parser;
use packgate::agent::{self, Ingestor};
use packgate::cli::{Cli, Commands, Common, PacksCmd};
use packgate::config::{self, Effective};
use packgate::exec::CommandRunner;
use packgate::gate::{self, Footprint};
use packgate::models::{Finding, PackId};
use packgate::registry::{load_registry, Registry};
use packgate::scan::{self, Scanner};
use packgate::vcs::GitCli;
use packgate::{output, patch, utils};
use std::collections::BTreeSet;
use std::path::Path;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter = EnvFilter::try_from_env("PACKGATE_LOG").unwrap_or_else(|_| EnvFilter::new("packgate=warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn fail(msg: impl std::fmt::Display) -> i32 {
    eprintln!("{} {}", utils::error_prefix(), msg);
    2
}

/// Resolve effective config and the pack registry for one command.
fn setup(common: &Common) -> Result<(Effective, Registry), String> {
    let eff = config::resolve_effective(
        common.repo_root.as_deref(),
        common.registry.as_deref(),
        common.output.as_deref(),
    )
    .map_err(|e| e.to_string())?;
    if !matches!(eff.output.as_str(), "human" | "json") {
        return Err(format!("unknown output mode: {} (expected human|json)", eff.output));
    }
    if !eff.config_found && eff.output != "json" {
        eprintln!("{} No packgate.toml found; using defaults.", utils::note_prefix());
    }
    let registry = load_registry(eff.registry.as_deref()).map_err(|e| e.to_string())?;
    Ok((eff, registry))
}

/// `--pack` values as a filter; empty means no filter.
fn pack_filter(ids: &[String], registry: &Registry) -> Result<Option<BTreeSet<PackId>>, String> {
    if ids.is_empty() {
        return Ok(None);
    }
    let mut set = BTreeSet::new();
    for id in ids {
        let id = PackId::from(id.as_str());
        if registry.get(&id).is_none() {
            return Err(format!("unknown pack id: {}", id));
        }
        set.insert(id);
    }
    Ok(Some(set))
}

/// Findings from the stream at `path`; a missing stream is empty.
fn load_findings(path: &Path) -> Result<Vec<Finding>, String> {
    if !path.exists() {
        eprintln!(
            "{} No findings stream at {}; run `packgate scan` first.",
            utils::note_prefix(),
            path.display()
        );
        return Ok(Vec::new());
    }
    scan::read_findings(path).map_err(|e| format!("cannot read {}: {}", path.display(), e))
}

fn cmd_scan(common: Common, paths: Vec<String>, out: Option<String>, packs: Vec<String>) -> i32 {
    let (eff, registry) = match setup(&common) {
        Ok(v) => v,
        Err(e) => return fail(e),
    };
    let filter = match pack_filter(&packs, &registry) {
        Ok(f) => f,
        Err(e) => return fail(e),
    };
    let files = scan::expand_paths(&eff.scan, &paths);
    let mut scanner = Scanner::new(&eff.scan, &registry);
    if let Some(set) = &filter {
        scanner = scanner.only(set);
    }
    let mut findings = match scanner.scan(&files) {
        Ok(f) => f,
        Err(e) => return fail(e),
    };
    // Stable: per-file traversal order survives.
    findings.sort_by(|a, b| a.file.cmp(&b.file));
    let stream = out.map(|o| eff.repo_root.join(o)).unwrap_or_else(|| eff.findings.clone());
    if let Err(e) = scan::write_findings(&stream, &findings) {
        return fail(format!("cannot write {}: {}", stream.display(), e));
    }
    output::print_findings(&findings, &registry, &eff.output, &stream);
    0
}

fn cmd_fix(common: Common, paths: Vec<String>, packs: Vec<String>, write: bool, diff: bool, check: bool) -> i32 {
    let (eff, registry) = match setup(&common) {
        Ok(v) => v,
        Err(e) => return fail(e),
    };
    let filter = match pack_filter(&packs, &registry) {
        Ok(f) => f,
        Err(e) => return fail(e),
    };
    // --diff/--check force a dry run.
    let write = write && !(diff || check);
    let files = scan::expand_paths(&eff.scan, &paths);
    let results = match patch::run_fix(&eff.scan, &registry, &files, filter.as_ref(), write) {
        Ok(r) => r,
        Err(e) => return fail(e),
    };
    output::print_fix(&results, &eff.output, diff);
    if check && results.iter().any(|r| r.changed) {
        return 1;
    }
    0
}

fn cmd_gate(
    common: Common,
    pr: String,
    changed: Option<String>,
    base: Option<String>,
    findings: Option<String>,
) -> i32 {
    let (eff, registry) = match setup(&common) {
        Ok(v) => v,
        Err(e) => return fail(e),
    };
    let changed = changed.map(|c| eff.repo_root.join(c));
    let footprint = match (&changed, &base) {
        (Some(list), _) => Footprint::List(list),
        (None, Some(base)) => Footprint::Base(base),
        (None, None) => Footprint::None,
    };
    let findings = findings
        .map(|f| eff.repo_root.join(f))
        .unwrap_or_else(|| eff.findings.clone());
    let vcs = GitCli::new(CommandRunner::new(eff.verify.timeout));
    let verdict = gate::run_gate(&eff, &registry, &pr, footprint, &findings, &vcs);
    output::print_verdict(&verdict, &eff.output);
    verdict.exit_code
}

fn cmd_emit(common: Common, findings: Option<String>, packs: Vec<String>) -> i32 {
    let (eff, registry) = match setup(&common) {
        Ok(v) => v,
        Err(e) => return fail(e),
    };
    let filter = match pack_filter(&packs, &registry) {
        Ok(f) => f,
        Err(e) => return fail(e),
    };
    let stream = findings
        .map(|f| eff.repo_root.join(f))
        .unwrap_or_else(|| eff.findings.clone());
    let found = match load_findings(&stream) {
        Ok(f) => f,
        Err(e) => return fail(e),
    };
    match agent::emit_tasks(&eff.repo_root, &eff.agent.tasks_dir, &registry, &found, filter.as_ref()) {
        Ok(written) => {
            output::print_tasks(&written, &eff.repo_root, &eff.output);
            0
        }
        Err(e) => fail(format!("cannot write task packets: {}", e)),
    }
}

fn cmd_ingest(common: Common, dir: String, pr: String) -> i32 {
    let (eff, _registry) = match setup(&common) {
        Ok(v) => v,
        Err(e) => return fail(e),
    };
    let runner = CommandRunner::new(eff.verify.timeout);
    let vcs = GitCli::new(runner.clone());
    let source = eff.repo_root.join(dir);
    match Ingestor::new(&eff, &vcs, &runner).ingest(&source, &pr) {
        Ok(outcome) => {
            output::print_ingest(&outcome, &eff.waiver_path(&pr), &eff.output);
            if outcome.waived > 0 {
                1
            } else {
                0
            }
        }
        Err(e) => fail(format!("cannot record waiver: {}", e)),
    }
}

fn cmd_waive(common: Common, pr: String, pack: String, file: String, line: usize, col: usize, reason: String) -> i32 {
    let (eff, registry) = match setup(&common) {
        Ok(v) => v,
        Err(e) => return fail(e),
    };
    let pack = PackId::from(pack.as_str());
    if registry.get(&pack).is_none() {
        return fail(format!("unknown pack id: {}", pack));
    }
    if reason.trim().is_empty() {
        return fail("a waiver needs a non-empty --reason");
    }
    let recorded = if eff.findings.exists() {
        scan::read_findings(&eff.findings).unwrap_or_default()
    } else {
        Vec::new()
    };
    let file = utils::normalize_rel(&file);
    let finding = agent::manual_finding(&eff, &recorded, pack, &file, line, col);
    match agent::waive(&eff, &finding, reason.trim(), &pr) {
        Ok(path) => {
            output::print_waiver(&finding, &path, &eff.output);
            0
        }
        Err(e) => fail(format!("cannot write waiver: {}", e)),
    }
}

fn cmd_packs(cmd: PacksCmd) -> i32 {
    match cmd {
        PacksCmd::List { common } => match setup(&common) {
            Ok((eff, registry)) => {
                output::print_packs(&registry, &eff.output);
                0
            }
            Err(e) => fail(e),
        },
        PacksCmd::Explain { common, id } => {
            let (eff, registry) = match setup(&common) {
                Ok(v) => v,
                Err(e) => return fail(e),
            };
            match registry.get(&PackId::from(id.as_str())) {
                Some(pack) => {
                    output::print_pack(pack, &eff.output);
                    0
                }
                None => fail(format!("unknown pack id: {}", id)),
            }
        }
    }
}

fn main() {
    init_tracing();
    let cli = Cli::parse();
    let code = match cli.cmd {
        Commands::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            0
        }
        Commands::Scan {
            common,
            paths,
            out,
            packs,
        } => cmd_scan(common, paths, out, packs),
        Commands::Fix {
            common,
            paths,
            packs,
            write,
            diff,
            check,
        } => cmd_fix(common, paths, packs, write, diff, check),
        Commands::Gate {
            common,
            pr,
            changed,
            base,
            findings,
        } => cmd_gate(common, pr, changed, base, findings),
        Commands::Emit {
            common,
            findings,
            packs,
        } => cmd_emit(common, findings, packs),
        Commands::Ingest { common, dir, pr } => cmd_ingest(common, dir, pr),
        Commands::Waive {
            common,
            pr,
            pack,
            file,
            line,
            col,
            reason,
        } => cmd_waive(common, pr, pack, file, line, col, reason),
        Commands::Packs { cmd } => cmd_packs(cmd),
    };
    std::process::exit(code);
}
