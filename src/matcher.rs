//! Pairing of CL maps with the optical-flow file of the same frame.
//!
//! Two ordered strategies, first success wins:
//!
//! 1. [`Correspondence::ExactNumeric`] – the last digit run of the CL file's
//!    stem equals the last digit run of a flow file name. Ties go to the
//!    lexicographically smallest name.
//! 2. [`Correspondence::PatternFallback`] – a flow file name contains one of
//!    a few patterns derived from the CL stem (frame number, full stem,
//!    first `_` token, first two tokens).
//!
//! Neither matching gives [`Correspondence::NoMatch`].

use std::fs;
use std::path::{Path, PathBuf};

use crate::data::flo::FLO_EXTENSION;
use crate::error::{EngineError, Result};

/// Outcome of a correspondence lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Correspondence {
    ExactNumeric(PathBuf),
    PatternFallback(PathBuf),
    NoMatch,
}

impl Correspondence {
    pub fn path(&self) -> Option<&Path> {
        match self {
            Correspondence::ExactNumeric(p) | Correspondence::PatternFallback(p) => Some(p),
            Correspondence::NoMatch => None,
        }
    }

    pub fn into_path(self) -> Option<PathBuf> {
        match self {
            Correspondence::ExactNumeric(p) | Correspondence::PatternFallback(p) => Some(p),
            Correspondence::NoMatch => None,
        }
    }
}

/// Numeric value of the last run of ASCII digits in `name`.
///
/// `frame_0164_CL` → `Some(164)`, `background` → `None`. Runs too long for
/// `u64` are treated as absent.
pub fn last_digit_run(name: &str) -> Option<u64> {
    let bytes = name.as_bytes();
    let end = bytes.iter().rposition(|b| b.is_ascii_digit())? + 1;
    let start = bytes[..end]
        .iter()
        .rposition(|b| !b.is_ascii_digit())
        .map(|i| i + 1)
        .unwrap_or(0);
    name[start..end].parse().ok()
}

/// Sort key placing files in frame order: `(last digit run, name)`, names
/// without digits last.
pub fn frame_order_key(name: &str) -> (u64, String) {
    (last_digit_run(name).unwrap_or(u64::MAX), name.to_string())
}

fn file_stem(name: &str) -> &str {
    Path::new(name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(name)
}

/// Patterns tried by the containment fallback, in order.
fn fallback_patterns(stem: &str) -> Vec<String> {
    let mut patterns = Vec::with_capacity(4);
    if let Some(n) = last_digit_run(stem) {
        patterns.push(n.to_string());
    }
    let parts: Vec<&str> = stem.split('_').collect();
    patterns.push(stem.to_string());
    patterns.push(parts[0].to_string());
    if parts.len() >= 2 {
        patterns.push(parts[..2].join("_"));
    } else {
        patterns.push(stem.to_string());
    }
    patterns.retain(|p| !p.is_empty());
    patterns
}

/// Resolve the flow file for `cl_name` among `candidates` (file names).
///
/// Candidates are considered in lexicographic order so the result does not
/// depend on directory listing order.
pub fn match_flow_name<'a>(cl_name: &str, candidates: &[&'a str]) -> Option<(&'a str, bool)> {
    let mut sorted: Vec<&'a str> = candidates.to_vec();
    sorted.sort_unstable();

    let stem = file_stem(cl_name);
    if let Some(frame) = last_digit_run(stem) {
        if let Some(hit) = sorted
            .iter()
            .find(|name| last_digit_run(name) == Some(frame))
        {
            return Some((*hit, true));
        }
    }

    let patterns = fallback_patterns(stem);
    sorted
        .iter()
        .find(|name| patterns.iter().any(|p| name.contains(p.as_str())))
        .map(|hit| (*hit, false))
}

/// Index of the `.flo` files in one directory.
#[derive(Debug, Clone)]
pub struct FlowIndex {
    dir: PathBuf,
    names: Vec<String>,
}

impl FlowIndex {
    /// List the `.flo` files of `dir`.
    pub fn scan(dir: &Path) -> Result<Self> {
        let entries = fs::read_dir(dir).map_err(|e| EngineError::io(dir, e))?;
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| EngineError::io(dir, e))?;
            let path = entry.path();
            let is_flo = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e == FLO_EXTENSION)
                .unwrap_or(false);
            if is_flo && path.is_file() {
                if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        log::debug!("{} flow files in {}", names.len(), dir.display());
        Ok(Self {
            dir: dir.to_path_buf(),
            names,
        })
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Find the flow file for the CL artifact named `cl_name`.
    pub fn resolve(&self, cl_name: &str) -> Correspondence {
        let candidates: Vec<&str> = self.names.iter().map(String::as_str).collect();
        match match_flow_name(cl_name, &candidates) {
            Some((name, true)) => Correspondence::ExactNumeric(self.dir.join(name)),
            Some((name, false)) => {
                log::debug!("{cl_name}: no exact frame match, falling back to {name}");
                Correspondence::PatternFallback(self.dir.join(name))
            }
            None => Correspondence::NoMatch,
        }
    }
}
