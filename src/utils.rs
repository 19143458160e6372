//! Small shared helpers: colored message prefixes and path display.

use owo_colors::OwoColorize;
use std::path::Path;

fn colors_enabled() -> bool {
    std::env::var_os("NO_COLOR").is_none()
}

pub fn error_prefix() -> String {
    if colors_enabled() {
        "error:".red().bold().to_string()
    } else {
        "error:".to_string()
    }
}

pub fn note_prefix() -> String {
    if colors_enabled() {
        "note:".yellow().bold().to_string()
    } else {
        "note:".to_string()
    }
}

pub fn info_prefix() -> String {
    if colors_enabled() {
        "info:".blue().bold().to_string()
    } else {
        "info:".to_string()
    }
}

/// Forward-slash path without a leading `./`.
pub fn normalize_rel(p: &str) -> String {
    let s = p.replace('\\', "/");
    let mut s = s.as_str();
    while let Some(rest) = s.strip_prefix("./") {
        s = rest;
    }
    s.to_string()
}

/// `path` relative to `root` when it lives under it, otherwise as given.
pub fn rel_to_root(path: &Path, root: &Path) -> String {
    let rel = if path.is_absolute() {
        pathdiff::diff_paths(path, root)
            .filter(|r| !r.starts_with(".."))
            .unwrap_or_else(|| path.to_path_buf())
    } else {
        path.to_path_buf()
    };
    normalize_rel(&rel.to_string_lossy())
}
