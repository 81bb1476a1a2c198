//! Batch rewriting of identifiers at the locations reported by one tool.
//!
//! Each finding names the offending identifier as the message text before the
//! first `(`. Every rewrite is guarded by the patch engine's exact match, and
//! no file is written unless every finding of the tool applied cleanly.

use crate::db::Store;
use crate::model::Finding;
use crate::patch::LineEditor;
use crate::report::{Flow, for_each_finding};
use anyhow::{Context, Result, bail};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::debug;

/// Identifier renames, keyed by the old name.
#[derive(Debug, Default, Clone)]
pub struct RewriteRules {
    rules: HashMap<String, String>,
}

impl RewriteRules {
    /// Parses `OLD=NEW` pairs. Both sides must be non-empty.
    pub fn parse<S: AsRef<str>>(pairs: &[S]) -> Result<Self> {
        let mut rules = HashMap::new();
        for pair in pairs {
            let pair = pair.as_ref();
            let Some((old, new)) = pair.split_once('=') else {
                bail!("rewrite rule must be OLD=NEW: {pair}");
            };
            let (old, new) = (old.trim(), new.trim());
            if old.is_empty() || new.is_empty() {
                bail!("rewrite rule must be OLD=NEW: {pair}");
            }
            rules.insert(old.to_string(), new.to_string());
        }
        Ok(Self { rules })
    }

    pub fn get(&self, old: &str) -> Option<&str> {
        self.rules.get(old).map(String::as_str)
    }
}

/// A finding that could not be patched.
#[derive(Debug, Clone)]
pub struct RewriteFailure {
    pub finding: Finding,
    pub reason: String,
    /// Current bytes of the reported line, when the file could be read.
    pub source_line: Option<Vec<u8>>,
    /// Length of the identifier the finding points at.
    pub width: usize,
}

#[derive(Debug, Default)]
pub struct RewriteSummary {
    pub applied: usize,
    pub failures: Vec<RewriteFailure>,
    /// False when some stored path was missing or had no matching report.
    pub clean: bool,
    /// Files replaced on disk; empty on dry runs and on any failure.
    pub written: Vec<String>,
}

impl RewriteSummary {
    pub fn succeeded(&self) -> bool {
        self.clean && self.failures.is_empty()
    }
}

/// Identifier named by a finding message: the text before the first `(`,
/// without surrounding whitespace.
pub fn identifier(message: &str) -> &str {
    message.split('(').next().unwrap_or_default().trim()
}

/// Patches every valid finding of `tool` in memory, then writes the touched
/// files unless `dry_run` is set or anything failed.
///
/// The findings of a file are applied from the last position to the first,
/// so a rewrite that changes the length of a line never shifts a column that
/// is still to be patched.
pub fn apply(store: &Store, tool: &str, rules: &RewriteRules, dry_run: bool) -> Result<RewriteSummary> {
    let mut by_path: BTreeMap<String, Vec<Finding>> = BTreeMap::new();
    let clean = for_each_finding(store, |finding| {
        if finding.tool == tool {
            by_path
                .entry(finding.path.clone())
                .or_default()
                .push(finding.clone());
        }
        Flow::Continue
    })?;

    let mut editors: Vec<(String, LineEditor)> = Vec::with_capacity(by_path.len());
    let mut applied = 0;
    let mut failures = Vec::new();
    for (path, mut findings) in by_path {
        findings.sort_by(|a, b| (b.line, b.column).cmp(&(a.line, a.column)));
        let mut editor = match LineEditor::read(Path::new(&path)) {
            Ok(editor) => editor,
            Err(err) => {
                failures.extend(findings.into_iter().rev().map(|finding| RewriteFailure {
                    width: identifier(&finding.message).len(),
                    reason: format!("could not read file: {err}"),
                    source_line: None,
                    finding,
                }));
                continue;
            }
        };
        let mut file_failures = Vec::new();
        for finding in findings {
            let name = identifier(&finding.message);
            let line = finding.line as usize;
            let column = finding.column as usize;
            let result = match rules.get(name) {
                Some(replacement) => match editor.patch(line, column, name, replacement) {
                    Ok(()) => {
                        debug!(path = %path, line, column, from = name, to = replacement, "patched");
                        Ok(())
                    }
                    Err(err) => Err((
                        err.to_string(),
                        editor.line_bytes(line).map(<[u8]>::to_vec),
                    )),
                },
                None => Err((format!("no rewrite rule for '{name}'"), None)),
            };
            match result {
                Ok(()) => applied += 1,
                Err((reason, source_line)) => file_failures.push(RewriteFailure {
                    width: name.len(),
                    reason,
                    source_line,
                    finding,
                }),
            }
        }
        file_failures.reverse();
        failures.extend(file_failures);
        editors.push((path, editor));
    }

    let mut summary = RewriteSummary {
        applied,
        failures,
        clean,
        written: Vec::new(),
    };
    if dry_run || !summary.succeeded() {
        return Ok(summary);
    }
    for (path, editor) in &editors {
        editor
            .write(Path::new(path))
            .with_context(|| format!("write {path}"))?;
        summary.written.push(path.clone());
    }
    Ok(summary)
}
