//! CLI argument parsing via `clap`.

use crate::config::parse_change_id;
use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "packgate",
    version,
    about = "packgate: detect, patch, and gate Python hygiene packs",
    long_about = "packgate scans Python sources for known hazard packs, applies minimal idempotent fixes, and gates a change on the high-severity findings it touches.\n\nConfiguration precedence: CLI > packgate.toml > defaults.",
    after_help = "Examples:\n  packgate scan\n  packgate fix src/ --diff\n  packgate gate --pr 42 --base main\n  packgate emit\n  packgate ingest --dir .packgate/diffs --pr 42",
    arg_required_else_help = true
)]
/// Top-level CLI options and subcommands.
pub struct Cli {
    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Args, Clone, Default)]
/// Options shared by every command that reads configuration.
pub struct Common {
    #[arg(long, help = "Repository root (default: current dir)")]
    pub repo_root: Option<String>,
    #[arg(long, help = "Pack registry document (TOML or YAML; default: built-in)")]
    pub registry: Option<String>,
    #[arg(long, help = "Output mode: human|json (default: human)")]
    pub output: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show version
    #[command(about = "Show version", long_about = "Print the current packgate version.")]
    Version,
    /// Detect pack violations
    #[command(
        about = "Scan for pack findings",
        long_about = "Scan Python files (default: every .py under the repo root outside excluded roots) and write the findings stream.",
        after_help = "Examples:\n  packgate scan\n  packgate scan pkg/ tool.py --output json"
    )]
    Scan {
        #[command(flatten)]
        common: Common,
        #[arg(help = "Files or directories to scan")]
        paths: Vec<String>,
        #[arg(long, help = "Findings stream path (default: [scan].findings)")]
        out: Option<String>,
        #[arg(long = "pack", help = "Restrict detection to these pack ids (repeatable)")]
        packs: Vec<String>,
    },
    /// Apply auto-fixes
    #[command(
        about = "Apply auto-fixes",
        long_about = "Run the fixers over the selected files. When --diff or --check is set, write is disabled.",
        after_help = "Examples:\n  packgate fix --diff\n  packgate fix pkg/ --pack BEX-001 --write"
    )]
    Fix {
        #[command(flatten)]
        common: Common,
        #[arg(help = "Files or directories to fix")]
        paths: Vec<String>,
        #[arg(long = "pack", help = "Only run fixers for these pack ids (repeatable)")]
        packs: Vec<String>,
        #[arg(long, action = clap::ArgAction::SetTrue, help = "Write changes to files")]
        write: bool,
        #[arg(long, action = clap::ArgAction::SetTrue, help = "Show diffs for changed files (implies write=false)")]
        diff: bool,
        #[arg(long, action = clap::ArgAction::SetTrue, help = "Exit non-zero if changes would occur (implies write=false)")]
        check: bool,
    },
    /// Gate a change on its footprint
    #[command(
        about = "Gate a change",
        long_about = "Count gated findings in the change footprint, subtract waivers, and print the verdict as JSON. Exits 1 when unwaived findings remain.",
        after_help = "Examples:\n  packgate gate --pr 42 --changed changed.txt\n  packgate gate --pr 42 --base main"
    )]
    Gate {
        #[command(flatten)]
        common: Common,
        #[arg(long, value_parser = parse_change_id, help = "Change identifier used in the waiver file name")]
        pr: String,
        #[arg(long, help = "Newline-delimited changed-file list")]
        changed: Option<String>,
        #[arg(long, help = "Base ref to diff against when no list is given")]
        base: Option<String>,
        #[arg(long, help = "Findings stream path (default: [scan].findings)")]
        findings: Option<String>,
    },
    /// Write task packets for findings that need review
    #[command(
        about = "Emit task packets",
        long_about = "Write one JSON task packet per finding that needs a reviewer's decision and remove stale packets."
    )]
    Emit {
        #[command(flatten)]
        common: Common,
        #[arg(long, help = "Findings stream path (default: [scan].findings)")]
        findings: Option<String>,
        #[arg(long = "pack", help = "Only emit packets for these pack ids (repeatable)")]
        packs: Vec<String>,
    },
    /// Ingest supplied diffs
    #[command(
        about = "Ingest diffs",
        long_about = "Trial-apply every .diff/.patch under --dir in an isolated copy, run the validators there, and merge on success. Any failure records one waiver and changes nothing.",
        after_help = "Examples:\n  packgate ingest --dir .packgate/diffs --pr 42"
    )]
    Ingest {
        #[command(flatten)]
        common: Common,
        #[arg(long, help = "Directory holding diff documents")]
        dir: String,
        #[arg(long, value_parser = parse_change_id, help = "Change identifier used in the waiver file name")]
        pr: String,
    },
    /// Record a manual waiver
    #[command(
        about = "Waive a finding",
        long_about = "Append a waiver block with a code frame and a pack marker to the change's waiver file."
    )]
    Waive {
        #[command(flatten)]
        common: Common,
        #[arg(long, value_parser = parse_change_id)]
        pr: String,
        #[arg(long)]
        pack: String,
        #[arg(long)]
        file: String,
        #[arg(long)]
        line: usize,
        #[arg(long, default_value_t = 0)]
        col: usize,
        #[arg(long)]
        reason: String,
    },
    /// Pack registry inspection
    Packs {
        #[command(subcommand)]
        cmd: PacksCmd,
    },
}

#[derive(Subcommand)]
/// Subcommands for `packgate packs`
pub enum PacksCmd {
    #[command(about = "List packs", long_about = "Render the registry as an aligned table.")]
    List {
        #[command(flatten)]
        common: Common,
    },
    #[command(about = "Explain a pack", long_about = "Render one pack's signals, transforms, decision rule, and hints.")]
    Explain {
        #[command(flatten)]
        common: Common,
        #[arg(help = "Pack id, e.g. BEX-001")]
        id: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn fix_accepts_repeated_packs_and_paths() {
        let cli = Cli::try_parse_from([
            "packgate", "fix", "pkg/", "tool.py", "--pack", "BEX-001", "--pack", "SIL-002", "--diff",
        ])
        .unwrap();
        match cli.cmd {
            Commands::Fix { paths, packs, diff, write, .. } => {
                assert_eq!(paths, vec!["pkg/", "tool.py"]);
                assert_eq!(packs, vec!["BEX-001", "SIL-002"]);
                assert!(diff && !write);
            }
            _ => panic!("expected fix"),
        }
    }

    #[test]
    fn gate_requires_pr() {
        assert!(Cli::try_parse_from(["packgate", "gate", "--base", "main"]).is_err());
        assert!(Cli::try_parse_from(["packgate", "gate", "--pr", "../../x"]).is_err());
        assert!(Cli::try_parse_from(["packgate", "ingest", "--dir", "d", "--pr", "a/b"]).is_err());
        let cli = Cli::try_parse_from(["packgate", "gate", "--pr", "7", "--output", "json"]).unwrap();
        match cli.cmd {
            Commands::Gate { pr, common, .. } => {
                assert_eq!(pr, "7");
                assert_eq!(common.output.as_deref(), Some("json"));
            }
            _ => panic!("expected gate"),
        }
    }
}
