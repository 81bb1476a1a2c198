/// Schema applied by [`super::Store::create`]. Every statement is idempotent,
/// so running it against an existing store is harmless. `page_size` only takes
/// effect before the first table is created.
pub const SCHEMA: &str = "
    PRAGMA page_size = 4096;
    PRAGMA journal_mode = WAL;

    CREATE TABLE IF NOT EXISTS files (
        id INTEGER PRIMARY KEY,
        path TEXT NOT NULL,
        mtime INTEGER NOT NULL,
        size INTEGER NOT NULL
    );

    CREATE INDEX IF NOT EXISTS files_path ON files(path);

    CREATE TABLE IF NOT EXISTS reports (
        file INTEGER NOT NULL REFERENCES files(id) ON DELETE CASCADE,
        line INTEGER NOT NULL,
        column INTEGER NOT NULL,
        tool TEXT NOT NULL,
        message TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS reports_file ON reports(file);
";
