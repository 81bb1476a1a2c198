//! Line-oriented editing of source files at reported locations.
//!
//! A patch only lands when the bytes at the reported column are exactly what
//! the caller expects, so a report produced against an older version of the
//! file cannot corrupt the current one. Lines are kept as raw bytes; source
//! files need not be valid UTF-8.

use crate::error::PatchError;
use std::borrow::Cow;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::Path;

#[derive(Debug, Default, Clone)]
pub struct LineEditor {
    lines: Vec<Vec<u8>>,
}

impl LineEditor {
    /// Loads `path`, one entry per newline-terminated line. A final line
    /// without a newline is kept.
    pub fn read(path: &Path) -> io::Result<Self> {
        Ok(Self::from_bytes(&fs::read(path)?))
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut lines: Vec<Vec<u8>> = bytes.split(|&byte| byte == b'\n').map(<[u8]>::to_vec).collect();
        if lines.last().is_some_and(|last| last.is_empty()) {
            lines.pop();
        }
        Self { lines }
    }

    pub fn from_text(text: &str) -> Self {
        Self::from_bytes(text.as_bytes())
    }

    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    /// 1-based access to the raw bytes of a line.
    pub fn line_bytes(&self, number: usize) -> Option<&[u8]> {
        number
            .checked_sub(1)
            .and_then(|index| self.lines.get(index))
            .map(Vec::as_slice)
    }

    /// 1-based line for display; invalid UTF-8 is replaced.
    pub fn line(&self, number: usize) -> Option<Cow<'_, str>> {
        self.line_bytes(number).map(String::from_utf8_lossy)
    }

    /// Replaces `old` with `new` at 1-based `line` and `column` (a byte
    /// offset). Nothing changes unless the bytes at that position are exactly
    /// `old`.
    pub fn patch(
        &mut self,
        line: usize,
        column: usize,
        old: &str,
        new: &str,
    ) -> Result<(), PatchError> {
        let count = self.lines.len();
        let text = line
            .checked_sub(1)
            .and_then(|index| self.lines.get_mut(index))
            .ok_or(PatchError::LineOutOfRange { line, count })?;
        if column == 0 || column > text.len() {
            return Err(PatchError::ColumnOutOfRange {
                line,
                column,
                len: text.len(),
            });
        }
        let start = column - 1;
        let end = start + old.len();
        if text.get(start..end) != Some(old.as_bytes()) {
            return Err(PatchError::Mismatch {
                line,
                column,
                expected: old.to_string(),
            });
        }
        text.splice(start..end, new.bytes());
        Ok(())
    }

    /// Replaces `path` with the buffer. The content goes to a sibling
    /// temporary file first, which is renamed over the original only after a
    /// complete write; on failure the temporary file is removed and the
    /// original is left as it was.
    pub fn write(&self, path: &Path) -> io::Result<()> {
        self.write_with(path, |file| Box::new(BufWriter::new(file)))
    }

    fn write_with<F>(&self, path: &Path, wrap: F) -> io::Result<()>
    where
        F: for<'a> FnOnce(&'a mut File) -> Box<dyn Write + 'a>,
    {
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut tmp = tempfile::Builder::new()
            .prefix(&format!(".{name}."))
            .suffix(".new")
            .tempfile_in(dir)?;
        {
            let mut out = wrap(tmp.as_file_mut());
            for line in &self.lines {
                out.write_all(line)?;
                out.write_all(b"\n")?;
            }
            out.flush()?;
        }
        tmp.as_file().sync_all()?;
        if let Ok(metadata) = fs::metadata(path) {
            fs::set_permissions(tmp.path(), metadata.permissions())?;
        }
        tmp.persist(path).map_err(|err| err.error)?;
        Ok(())
    }
}

/// Marker line for `text`: every character of the first `column - 1` bytes
/// becomes a space, except tabs, which are kept so the marker lines up with
/// the source; then `width` carets. Empty when `column` is zero.
pub fn carets(text: &[u8], column: usize, width: usize) -> String {
    if column == 0 {
        return String::new();
    }
    let prefix_len = column - 1;
    let prefix = &text[..prefix_len.min(text.len())];
    let mut marker: String = String::from_utf8_lossy(prefix)
        .chars()
        .map(|ch| if ch == '\t' { '\t' } else { ' ' })
        .collect();
    marker.extend(std::iter::repeat_n(' ', prefix_len.saturating_sub(text.len())));
    marker.extend(std::iter::repeat_n('^', width));
    marker
}
