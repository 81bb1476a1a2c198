//! Write path: buffers the findings of one analysis run and lands them in a
//! single store transaction.
//!
//! Committing never deletes anything by default. A path that was marked for
//! processing gets a fresh FileRecord row, and because queries pick the newest
//! row whose fingerprint matches the file on disk, the findings attached to
//! older rows stop being visible.

use crate::config::Retention;
use crate::db::{self, Outcome, Store};
use crate::error::{LedgerError, StoreError};
use crate::identity::FileIdentity;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug)]
struct PendingFile {
    identity: FileIdentity,
    /// Referenced by at least one staged finding; always gets a row.
    has_findings: bool,
    /// Marked for processing; gets a row only if the path is already known.
    touched: bool,
}

#[derive(Debug)]
struct StagedFinding {
    file: usize,
    line: u32,
    column: u32,
    tool: String,
    message: String,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CommitStats {
    pub files: usize,
    pub findings: usize,
    pub pruned: usize,
}

pub struct Ledger<'s> {
    store: &'s mut Store,
    files: Vec<PendingFile>,
    by_canonical: HashMap<String, usize>,
    by_alias: HashMap<PathBuf, usize>,
    staged: Vec<StagedFinding>,
    touched: Vec<PathBuf>,
    error: Option<String>,
}

impl<'s> Ledger<'s> {
    pub fn new(store: &'s mut Store) -> Self {
        Self {
            store,
            files: Vec::new(),
            by_canonical: HashMap::new(),
            by_alias: HashMap::new(),
            staged: Vec::new(),
            touched: Vec::new(),
            error: None,
        }
    }

    /// Stages one finding. Fails without touching the store when `path`
    /// cannot be resolved on disk.
    pub fn record(
        &mut self,
        path: impl AsRef<Path>,
        line: u32,
        column: u32,
        tool: &str,
        message: &str,
    ) -> Result<(), LedgerError> {
        let path = path.as_ref();
        let file = match self.pending_index(path) {
            Ok(file) => file,
            Err(err) => {
                self.error = Some(err.to_string());
                return Err(err);
            }
        };
        self.files[file].has_findings = true;
        self.staged.push(StagedFinding {
            file,
            line,
            column,
            tool: tool.to_string(),
            message: message.to_string(),
        });
        Ok(())
    }

    /// Declares `path` in scope for this run. Resolved at commit time.
    pub fn mark_for_processing(&mut self, path: impl AsRef<Path>) {
        self.touched.push(path.as_ref().to_path_buf());
    }

    pub fn staged_findings(&self) -> usize {
        self.staged.len()
    }

    /// Message of the most recent failure of this ledger.
    pub fn error_message(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Writes everything staged since the last commit in one transaction.
    /// The buffers are emptied whether or not the commit succeeds.
    pub fn commit(&mut self) -> Result<CommitStats, StoreError> {
        self.resolve_touched();
        let files = std::mem::take(&mut self.files);
        let staged = std::mem::take(&mut self.staged);
        self.by_canonical.clear();
        self.by_alias.clear();

        let retention = self.store.retention();
        let result = self.store.transact(|tx| {
            let mut stats = CommitStats::default();
            let mut ids = Vec::with_capacity(files.len());
            for pending in &files {
                let known = pending.touched
                    && !pending.has_findings
                    && db::latest_file_id(tx, &pending.identity.path)?.is_some();
                if !(pending.has_findings || known) {
                    ids.push(None);
                    continue;
                }
                let id = db::insert_file(tx, &pending.identity)?;
                stats.files += 1;
                if retention == Retention::PruneSuperseded {
                    stats.pruned += db::prune_older_rows(tx, &pending.identity.path, id)?;
                }
                ids.push(Some(id));
            }
            for finding in &staged {
                let Some(file_id) = ids[finding.file] else {
                    return Ok(Outcome::Error(format!(
                        "no file row for {}",
                        files[finding.file].identity.path
                    )));
                };
                db::insert_report(
                    tx,
                    file_id,
                    finding.line,
                    finding.column,
                    &finding.tool,
                    &finding.message,
                )?;
                stats.findings += 1;
            }
            Ok(Outcome::Commit(stats))
        });

        match result {
            Ok(resolution) => {
                let stats = resolution.into_inner();
                info!(
                    files = stats.files,
                    findings = stats.findings,
                    pruned = stats.pruned,
                    "committed findings"
                );
                Ok(stats)
            }
            Err(err) => {
                self.error = Some(err.to_string());
                Err(err)
            }
        }
    }

    fn resolve_touched(&mut self) {
        for path in std::mem::take(&mut self.touched) {
            match self.pending_index(&path) {
                Ok(file) => self.files[file].touched = true,
                Err(err) => {
                    warn!("{err}");
                    self.error = Some(err.to_string());
                }
            }
        }
    }

    /// Index of the pending entry for `path`, resolving it on first sight.
    /// Aliases of an already seen canonical path share its entry.
    fn pending_index(&mut self, path: &Path) -> Result<usize, LedgerError> {
        if let Some(&file) = self.by_alias.get(path) {
            return Ok(file);
        }
        let identity = FileIdentity::resolve(path);
        if !identity.is_valid() {
            return Err(LedgerError::FileNotFound(path.display().to_string()));
        }
        let file = match self.by_canonical.get(&identity.path) {
            Some(&file) => file,
            None => {
                debug!(path = %identity.path, mtime = identity.mtime, size = identity.size, "resolved file");
                self.by_canonical
                    .insert(identity.path.clone(), self.files.len());
                self.files.push(PendingFile {
                    identity,
                    has_findings: false,
                    touched: false,
                });
                self.files.len() - 1
            }
        };
        self.by_alias.insert(path.to_path_buf(), file);
        Ok(file)
    }
}
