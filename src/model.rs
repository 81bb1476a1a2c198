use serde::Serialize;
use std::fmt;

/// A stored finding as replayed by the query engine.
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct Finding {
    pub path: String,
    pub line: u32,
    pub column: u32,
    pub tool: String,
    pub message: String,
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}: ({}) {}",
            self.path, self.line, self.column, self.tool, self.message
        )
    }
}

/// One observed fingerprint of a file. Rows are append-only; a path may have
/// many of them.
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub id: i64,
    pub path: String,
    pub mtime: i64,
    pub size: u64,
}
