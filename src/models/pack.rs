//! Pack identifiers and registry entries.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Stable pack identifier.
///
/// Known packs have their own variant so the scanner and patcher can
/// dispatch on them; anything else registered in a pack document is kept
/// verbatim in `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PackId {
    BroadExcept,
    SilentHandler,
    MutableDefault,
    UnmanagedResource,
    Subprocess,
    SqlFormat,
    ArgChoices,
    Typing,
    PrintLogging,
    ErrorChaining,
    RollingWindow,
    LoopIo,
    PathConcat,
    UnsafeYaml,
    UnguardedJson,
    Complexity,
    Other(String),
}

impl PackId {
    pub const KNOWN: [PackId; 16] = [
        PackId::BroadExcept,
        PackId::SilentHandler,
        PackId::MutableDefault,
        PackId::UnmanagedResource,
        PackId::Subprocess,
        PackId::SqlFormat,
        PackId::ArgChoices,
        PackId::Typing,
        PackId::PrintLogging,
        PackId::ErrorChaining,
        PackId::RollingWindow,
        PackId::LoopIo,
        PackId::PathConcat,
        PackId::UnsafeYaml,
        PackId::UnguardedJson,
        PackId::Complexity,
    ];

    pub fn as_str(&self) -> &str {
        match self {
            PackId::BroadExcept => "BEX-001",
            PackId::SilentHandler => "SIL-002",
            PackId::MutableDefault => "MDA-003",
            PackId::UnmanagedResource => "RES-005",
            PackId::Subprocess => "SUB-006",
            PackId::SqlFormat => "SQL-007",
            PackId::ArgChoices => "ARG-008",
            PackId::Typing => "TYP-009",
            PackId::PrintLogging => "LOG-010",
            PackId::ErrorChaining => "ERR-011",
            PackId::RollingWindow => "ROL-012",
            PackId::LoopIo => "IOB-013",
            PackId::PathConcat => "PATH-014",
            PackId::UnsafeYaml => "YAML-015",
            PackId::UnguardedJson => "JSON-016",
            PackId::Complexity => "CPL-017",
            PackId::Other(s) => s.as_str(),
        }
    }
}

impl From<&str> for PackId {
    fn from(s: &str) -> Self {
        PackId::KNOWN
            .iter()
            .find(|k| k.as_str() == s)
            .cloned()
            .unwrap_or_else(|| PackId::Other(s.to_string()))
    }
}

impl From<String> for PackId {
    fn from(s: String) -> Self {
        PackId::from(s.as_str())
    }
}

impl From<PackId> for String {
    fn from(id: PackId) -> Self {
        id.as_str().to_string()
    }
}

impl FromStr for PackId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(PackId::from(s))
    }
}

impl fmt::Display for PackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered severity: `Low < Medium < High`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn parse(s: &str) -> Option<Severity> {
        match s {
            "low" => Some(Severity::Low),
            "medium" => Some(Severity::Medium),
            "high" => Some(Severity::High),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
/// Whether a pack's findings may be patched without review.
pub enum FixMode {
    Auto,
    SuggestOnly,
}

#[derive(Debug, Clone, Serialize)]
/// Immutable registry entry.
pub struct Pack {
    pub id: PackId,
    pub name: String,
    pub severity: Severity,
    pub fix: FixMode,
    /// Disabled packs stay in the registry but produce no findings.
    pub detect: bool,
    pub detect_signals: Vec<String>,
    pub allowed_transforms: Vec<String>,
    pub decision_rule: String,
    pub hints: Vec<String>,
    /// Message fragments that make an otherwise auto-fixable finding ambiguous.
    pub review_on: Vec<String>,
}

impl Pack {
    /// True when a finding with `message` must go to a reviewer instead of a fixer.
    pub fn needs_review(&self, message: &str) -> bool {
        self.fix == FixMode::SuggestOnly || self.review_on.iter().any(|m| message.contains(m))
    }
}
