// src/pipeline/like.rs

use regex::Regex;

use crate::error::{Result, RxError};
use crate::records::PrescribingRecord;

/// A SQL `LIKE` pattern (`%` any run, `_` one char) compiled to a regex, used
/// to check cached rows against the drug codes the query asked for.
#[derive(Debug, Clone)]
pub struct LikePattern {
    source: String,
    re: Regex,
}

impl LikePattern {
    pub fn new(pattern: &str) -> Result<Self> {
        let mut re = String::with_capacity(pattern.len() + 2);
        re.push('^');
        for c in pattern.chars() {
            match c {
                '%' => re.push_str(".*"),
                '_' => re.push('.'),
                other => re.push_str(&regex::escape(&other.to_string())),
            }
        }
        re.push('$');
        let re = Regex::new(&re)
            .map_err(|e| RxError::Config(format!("bad LIKE pattern {:?}: {}", pattern, e)))?;
        Ok(Self {
            source: pattern.to_string(),
            re,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn is_match(&self, code: &str) -> bool {
        self.re.is_match(code)
    }

    /// Keep matching rows; returns how many were dropped alongside.
    pub fn retain(&self, rows: Vec<PrescribingRecord>) -> (Vec<PrescribingRecord>, usize) {
        let before = rows.len();
        let kept: Vec<_> = rows.into_iter().filter(|r| self.is_match(&r.bnf_code)).collect();
        let dropped = before - kept.len();
        (kept, dropped)
    }
}
