use std::path::PathBuf;

/// Failures of the storage engine.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("could not open {path}: {source}")]
    Open {
        path: PathBuf,
        source: rusqlite::Error,
    },

    #[error("could not find {file_name} in {start} or its parent directories")]
    NotFound {
        file_name: &'static str,
        start: PathBuf,
    },

    #[error("could not resolve directory {path}: {source}")]
    Resolve {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("{source} [{context}]")]
    Sqlite {
        context: String,
        source: rusqlite::Error,
    },

    #[error("trying to execute statement with unbound parameters: {0}")]
    UnboundParameters(String),

    #[error("transaction aborted: {0}")]
    Aborted(String),

    #[error("transaction failed after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },
}

impl StoreError {
    pub(crate) fn sqlite(context: impl Into<String>, source: rusqlite::Error) -> Self {
        StoreError::Sqlite {
            context: context.into(),
            source,
        }
    }
}

/// Returns true for the sqlite result codes that signal lock contention.
pub fn is_contention(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error {
                code: rusqlite::ffi::ErrorCode::DatabaseBusy
                    | rusqlite::ffi::ErrorCode::DatabaseLocked,
                ..
            },
            _,
        )
    )
}

/// Rejections from [`crate::patch::LineEditor::patch`]. The buffer is untouched
/// whenever one of these is returned.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PatchError {
    #[error("line {line} outside of file with {count} lines")]
    LineOutOfRange { line: usize, count: usize },

    #[error("column {column} outside of line {line} with {len} bytes")]
    ColumnOutOfRange {
        line: usize,
        column: usize,
        len: usize,
    },

    #[error("expected {expected:?} at {line}:{column}")]
    Mismatch {
        line: usize,
        column: usize,
        expected: String,
    },
}

/// Problems scoped to a single reported item.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("could not find file on disk: {0}")]
    FileNotFound(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::ffi;

    #[test]
    fn busy_and_locked_are_contention() {
        let busy = rusqlite::Error::SqliteFailure(ffi::Error::new(ffi::SQLITE_BUSY), None);
        let locked = rusqlite::Error::SqliteFailure(ffi::Error::new(ffi::SQLITE_LOCKED), None);
        let constraint =
            rusqlite::Error::SqliteFailure(ffi::Error::new(ffi::SQLITE_CONSTRAINT), None);
        assert!(is_contention(&busy));
        assert!(is_contention(&locked));
        assert!(!is_contention(&constraint));
        assert!(!is_contention(&rusqlite::Error::QueryReturnedNoRows));
    }
}
