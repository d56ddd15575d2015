//! Line index: byte offsets where each line begins.
//!
//! The index is a sorted vector rebuilt by a single pass over the piece
//! sequence after every committed mutation. Entry 0 is always 0; entry i is
//! one past the i-th `'\n'`. A line's range includes its trailing newline
//! (and an optional preceding `'\r'`); callers that want the visible line
//! trim those explicitly.

use crate::storage::PieceTable;

/// Sorted sequence of line-start byte offsets.
#[derive(Debug, Clone)]
pub struct LineIndex {
    starts: Vec<usize>,
}

impl LineIndex {
    /// Index of an empty document (a single line starting at 0).
    pub fn new() -> Self {
        Self { starts: vec![0] }
    }

    /// Rebuild from the current piece sequence in one pass.
    pub fn rebuild(&mut self, table: &PieceTable) {
        self.starts.clear();
        self.starts.push(0);

        let mut global = 0usize;
        for piece in table.pieces() {
            for (i, &byte) in table.piece_bytes(piece).iter().enumerate() {
                if byte == b'\n' {
                    self.starts.push(global + i + 1);
                }
            }
            global += piece.len;
        }
    }

    /// Convenience constructor for a freshly indexed table.
    pub fn from_table(table: &PieceTable) -> Self {
        let mut index = Self::new();
        index.rebuild(table);
        index
    }

    /// Number of lines (always ≥ 1).
    pub fn line_count(&self) -> usize {
        self.starts.len()
    }

    /// Index of the last line.
    pub fn last_line(&self) -> usize {
        self.starts.len() - 1
    }

    /// The line containing byte position `pos` (upper bound minus one,
    /// clamped to a valid line).
    pub fn line_of(&self, pos: usize) -> usize {
        let upper = self.starts.partition_point(|&s| s <= pos);
        upper.saturating_sub(1).min(self.last_line())
    }

    /// Byte offset where line `line` starts (clamped to the last line).
    pub fn line_start(&self, line: usize) -> usize {
        self.starts[line.min(self.last_line())]
    }

    /// Half-open byte range `[start, end)` of line `line`, including its
    /// trailing newline. `doc_len` bounds the final line.
    pub fn line_range(&self, line: usize, doc_len: usize) -> (usize, usize) {
        let line = line.min(self.last_line());
        let start = self.starts[line];
        let end = if line + 1 < self.starts.len() {
            self.starts[line + 1]
        } else {
            doc_len
        };
        (start, end.max(start))
    }

    /// Like [`LineIndex::line_range`] but with the trailing newline (and an
    /// optional preceding `'\r'`) trimmed off.
    pub fn visible_line_range(
        &self,
        line: usize,
        table: &PieceTable,
    ) -> (usize, usize) {
        let (start, mut end) = self.line_range(line, table.len());
        if end > start && table.byte_at(end - 1) == Some(b'\n') {
            end -= 1;
            if end > start && table.byte_at(end - 1) == Some(b'\r') {
                end -= 1;
            }
        }
        (start, end)
    }
}

impl Default for LineIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index_of(text: &str) -> (PieceTable, LineIndex) {
        let table = PieceTable::from_text(text);
        let index = LineIndex::from_table(&table);
        (table, index)
    }

    #[test]
    fn test_empty_document_has_one_line() {
        let (_, index) = index_of("");
        assert_eq!(index.line_count(), 1);
        assert_eq!(index.line_start(0), 0);
    }

    #[test]
    fn test_starts_after_each_newline() {
        let (_, index) = index_of("ab\ncd\nef");
        assert_eq!(index.line_count(), 3);
        assert_eq!(index.line_start(0), 0);
        assert_eq!(index.line_start(1), 3);
        assert_eq!(index.line_start(2), 6);
    }

    #[test]
    fn test_trailing_newline_opens_empty_line() {
        let (_, index) = index_of("ab\n");
        assert_eq!(index.line_count(), 2);
        assert_eq!(index.line_start(1), 3);
    }

    #[test]
    fn test_line_of() {
        let (_, index) = index_of("ab\ncd\nef");
        assert_eq!(index.line_of(0), 0);
        assert_eq!(index.line_of(2), 0); // the '\n' belongs to line 0
        assert_eq!(index.line_of(3), 1);
        assert_eq!(index.line_of(7), 2);
        assert_eq!(index.line_of(100), 2);
    }

    #[test]
    fn test_line_range_includes_newline() {
        let (table, index) = index_of("ab\ncd");
        assert_eq!(index.line_range(0, table.len()), (0, 3));
        assert_eq!(index.line_range(1, table.len()), (3, 5));
    }

    #[test]
    fn test_visible_line_range_trims_crlf() {
        let (table, index) = index_of("ab\r\ncd\n");
        assert_eq!(index.visible_line_range(0, &table), (0, 2));
        assert_eq!(index.visible_line_range(1, &table), (4, 6));
        assert_eq!(index.visible_line_range(2, &table), (7, 7));
    }

    #[test]
    fn test_rebuild_tracks_edits() {
        let mut table = PieceTable::from_text("ab\ncd");
        let mut index = LineIndex::from_table(&table);

        table.insert(2, b"\nX");
        index.rebuild(&table);
        assert_eq!(index.line_count(), 3);
        assert_eq!(index.line_start(1), 3);

        table.erase(2, 2);
        index.rebuild(&table);
        assert_eq!(index.line_count(), 2);
    }

    #[test]
    fn test_strictly_increasing() {
        let (_, index) = index_of("a\n\n\nb\n");
        let starts: Vec<usize> = (0..index.line_count()).map(|i| index.line_start(i)).collect();
        assert!(starts.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(starts[0], 0);
    }
}
