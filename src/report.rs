//! Read path: replays stored findings that are still valid for the files as
//! they currently exist on disk.

use crate::db::{self, Store};
use crate::error::StoreError;
use crate::identity::FileIdentity;
use crate::model::Finding;
use rusqlite::Connection;
use std::collections::VecDeque;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplayEvent {
    Finding(Finding),
    /// The stored path no longer resolves on disk.
    FileMissing(String),
    /// No stored row carries the file's current fingerprint.
    NoMatchingReport(String),
}

/// Single pass over the store. Paths are visited in byte order; the findings
/// of a path are loaded when the scan reaches it.
pub struct Replay<'s> {
    conn: &'s Connection,
    paths: std::vec::IntoIter<String>,
    pending: VecDeque<Finding>,
}

impl<'s> Replay<'s> {
    pub fn new(store: &'s Store) -> Result<Self, StoreError> {
        let conn = store.connection();
        let paths =
            db::finding_paths(conn).map_err(|err| StoreError::sqlite("list paths", err))?;
        Ok(Self {
            conn,
            paths: paths.into_iter(),
            pending: VecDeque::new(),
        })
    }

    /// Drops what is left of the current path; the scan resumes at the next one.
    pub fn skip_file(&mut self) {
        self.pending.clear();
    }

    fn enter(&mut self, path: String) -> Result<Option<ReplayEvent>, StoreError> {
        let current = FileIdentity::resolve(&path);
        if !current.is_valid() {
            return Ok(Some(ReplayEvent::FileMissing(path)));
        }
        let lookup = FileIdentity {
            path: path.clone(),
            ..current
        };
        let Some(file_id) = db::matching_file_id(self.conn, &lookup)
            .map_err(|err| StoreError::sqlite("match file", err))?
        else {
            return Ok(Some(ReplayEvent::NoMatchingReport(path)));
        };
        let rows = db::reports_for_file(self.conn, file_id)
            .map_err(|err| StoreError::sqlite("load reports", err))?;
        self.pending
            .extend(rows.into_iter().map(|(line, column, tool, message)| Finding {
                path: path.clone(),
                line,
                column,
                tool,
                message,
            }));
        Ok(None)
    }
}

impl Iterator for Replay<'_> {
    type Item = Result<ReplayEvent, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(finding) = self.pending.pop_front() {
                return Some(Ok(ReplayEvent::Finding(finding)));
            }
            let path = self.paths.next()?;
            match self.enter(path) {
                Ok(Some(event)) => return Some(Ok(event)),
                Ok(None) => continue,
                Err(err) => {
                    self.paths = Vec::new().into_iter();
                    return Some(Err(err));
                }
            }
        }
    }
}

/// What the consumer wants after seeing a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// Skip the remaining findings of this path only.
    NextFile,
}

/// Feeds every valid finding to `callback`. Returns false if any path was
/// missing or had no matching report; storage faults are errors.
pub fn for_each_finding<F>(store: &Store, mut callback: F) -> Result<bool, StoreError>
where
    F: FnMut(&Finding) -> Flow,
{
    let mut clean = true;
    let mut replay = Replay::new(store)?;
    while let Some(event) = replay.next() {
        match event? {
            ReplayEvent::Finding(finding) => {
                if callback(&finding) == Flow::NextFile {
                    replay.skip_file();
                }
            }
            ReplayEvent::FileMissing(path) => {
                warn!("{path}: could not find file on disk");
                clean = false;
            }
            ReplayEvent::NoMatchingReport(path) => {
                warn!("{path}: could not find report for current file");
                clean = false;
            }
        }
    }
    Ok(clean)
}
