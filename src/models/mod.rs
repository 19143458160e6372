//! Shared data models: packs, findings, and gate verdicts.

pub mod pack;

pub use pack::{FixMode, Pack, PackId, Severity};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// One occurrence of a pack violation. Serialized as one JSON line.
pub struct Finding {
    #[serde(alias = "tf_id")]
    pub pack: PackId,
    pub file: String,
    pub line: usize,
    pub col: usize,
    pub message: String,
    pub frame: String,
    #[serde(default)]
    pub hint_tokens: Vec<String>,
    /// Inclusive start/end line range of the offending construct.
    #[serde(default)]
    pub span: Option<(usize, usize)>,
}

impl Finding {
    /// Lines to show around this finding, falling back to the finding line.
    pub fn line_range(&self) -> (usize, usize) {
        self.span.unwrap_or((self.line, self.line))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
/// Gate outcome. Recomputed on every invocation.
pub struct Verdict {
    pub total_all: usize,
    pub l1_in_pr: usize,
    pub waivers: usize,
    pub remaining_l1: usize,
    pub changed_files: usize,
    pub gate_tf_ids: Vec<String>,
    #[serde(skip)]
    pub exit_code: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finding_json_line_shape() {
        let f = Finding {
            pack: PackId::BroadExcept,
            file: "a.py".into(),
            line: 3,
            col: 4,
            message: "broad except".into(),
            frame: "def f()".into(),
            hint_tokens: vec!["json.loads".into()],
            span: Some((2, 5)),
        };
        let v = serde_json::to_value(&f).unwrap();
        assert_eq!(v["pack"], "BEX-001");
        assert_eq!(v["span"], serde_json::json!([2, 5]));
        let back: Finding = serde_json::from_value(v).unwrap();
        assert_eq!(back, f);
    }

    #[test]
    fn finding_accepts_legacy_pack_key_and_null_span() {
        let line = r#"{"tf_id":"SIL-002","file":"b.py","line":1,"col":0,"message":"m","frame":"<module>","span":null}"#;
        let f: Finding = serde_json::from_str(line).unwrap();
        assert_eq!(f.pack, PackId::SilentHandler);
        assert!(f.hint_tokens.is_empty());
        assert_eq!(f.line_range(), (1, 1));
    }

    #[test]
    fn verdict_exit_code_is_not_serialized() {
        let v = Verdict {
            total_all: 1,
            l1_in_pr: 1,
            waivers: 0,
            remaining_l1: 1,
            changed_files: 1,
            gate_tf_ids: vec!["BEX-001".into()],
            exit_code: 1,
        };
        let j = serde_json::to_value(&v).unwrap();
        assert!(j.get("exit_code").is_none());
        assert_eq!(j["remaining_l1"], 1);
    }
}
