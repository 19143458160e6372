//! packgate core library.
//!
//! This crate exposes programmatic APIs for detecting Python hygiene packs,
//! patching the auto-fixable ones, and gating a change on the high-severity
//! findings inside its footprint.
//!
//! High-level modules:
//! - `cli`: CLI argument parsing (binary uses this).
//! - `config`: Discovery and effective configuration resolution.
//! - `registry`: Pack registry loading and validation.
//! - `syntax`: tree-sitter parsing and node helpers.
//! - `scan`: Detectors and the findings stream.
//! - `patch`: Fixers, edit application, and unified diffs.
//! - `gate`: Footprint arithmetic and waiver counting.
//! - `exec`, `vcs`, `verify`: External commands, git, and validators.
//! - `agent`: Task packets, waivers, and diff ingestion.
//! - `models`: Packs, findings, and verdicts.
//! - `output`: Human/JSON printers.
//! - `utils`: Supporting helpers.
pub mod agent;
pub mod cli;
pub mod config;
pub mod error;
pub mod exec;
pub mod gate;
pub mod models;
pub mod output;
pub mod patch;
pub mod registry;
pub mod scan;
pub mod syntax;
pub mod utils;
pub mod vcs;
pub mod verify;
