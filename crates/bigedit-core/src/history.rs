//! Batched undo/redo log.
//!
//! Every intent produces at most one [`EditBatch`]: the ordered primitive
//! ops plus the cursor set before and after. Undo replays ops in reverse
//! with each op inverted; redo replays them forward. The log tracks a
//! save point (the stack depth that matches on-disk bytes) which drives the
//! dirty indicator; pushing a new batch while behind the save point makes
//! the saved state unreachable and the document permanently modified until
//! the next save.

use crate::cursor::CursorSet;
use crate::storage::PieceTable;

/// One primitive document mutation with enough payload to invert it.
#[derive(Debug, Clone, PartialEq)]
pub enum EditOp {
    /// `text` was inserted at `pos`.
    Insert {
        /// Byte position of the insert.
        pos: usize,
        /// The inserted text.
        text: String,
    },
    /// `text` was erased at `pos`.
    Erase {
        /// Byte position of the erase.
        pos: usize,
        /// The erased text.
        text: String,
    },
}

impl EditOp {
    /// Re-apply this op (the redo direction).
    pub fn apply(&self, table: &mut PieceTable) {
        match self {
            Self::Insert { pos, text } => table.insert(*pos, text.as_bytes()),
            Self::Erase { pos, text } => table.erase(*pos, text.len()),
        }
    }

    /// Invert this op (the undo direction).
    pub fn revert(&self, table: &mut PieceTable) {
        match self {
            Self::Insert { pos, text } => table.erase(*pos, text.len()),
            Self::Erase { pos, text } => table.insert(*pos, text.as_bytes()),
        }
    }
}

/// An atomic group of ops with the cursor sets bracketing it.
///
/// Ops apply in stored order on redo and in reverse-with-inversion on undo;
/// intermediate states do not satisfy all invariants and must not be
/// observed.
#[derive(Debug, Clone)]
pub struct EditBatch {
    /// The ordered primitive ops.
    pub ops: Vec<EditOp>,
    /// Cursor set before the batch applied.
    pub before: CursorSet,
    /// Cursor set after the batch applied.
    pub after: CursorSet,
}

/// Undo and redo stacks plus the save point.
#[derive(Debug)]
pub struct UndoLog {
    undo: Vec<EditBatch>,
    redo: Vec<EditBatch>,
    /// Undo depth matching on-disk bytes; `None` once the saved state became
    /// unreachable (the user undid past the save, then edited).
    save_point: Option<usize>,
}

impl UndoLog {
    /// A fresh log whose save point is the empty history.
    pub fn new() -> Self {
        Self {
            undo: Vec::new(),
            redo: Vec::new(),
            save_point: Some(0),
        }
    }

    /// Reset for a new document.
    pub fn clear(&mut self) {
        self.undo.clear();
        self.redo.clear();
        self.save_point = Some(0);
    }

    /// Record a successful save at the current depth.
    pub fn mark_saved(&mut self) {
        self.save_point = Some(self.undo.len());
    }

    /// Whether the document differs from the last saved state.
    pub fn is_modified(&self) -> bool {
        self.save_point != Some(self.undo.len())
    }

    /// Push a freshly produced batch. Clears redo; if the save point sat in
    /// the redo region it becomes unreachable.
    pub fn push(&mut self, batch: EditBatch) {
        if let Some(save_point) = self.save_point {
            if save_point > self.undo.len() {
                self.save_point = None;
            }
        }
        self.undo.push(batch);
        self.redo.clear();
    }

    /// Whether there is anything to undo.
    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    /// Whether there is anything to redo.
    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    /// Depth of the undo stack.
    pub fn undo_depth(&self) -> usize {
        self.undo.len()
    }

    /// Depth of the redo stack.
    pub fn redo_depth(&self) -> usize {
        self.redo.len()
    }

    /// Take the newest batch off the undo stack. The caller replays it
    /// inverted, then hands it back via [`UndoLog::push_undone`].
    pub fn pop_undo(&mut self) -> Option<EditBatch> {
        self.undo.pop()
    }

    /// Park an undone batch on the redo stack.
    pub fn push_undone(&mut self, batch: EditBatch) {
        self.redo.push(batch);
    }

    /// Take the newest batch off the redo stack. The caller replays it
    /// forward, then hands it back via [`UndoLog::push_redone`].
    pub fn pop_redo(&mut self) -> Option<EditBatch> {
        self.redo.pop()
    }

    /// Return a redone batch to the undo stack.
    pub fn push_redone(&mut self, batch: EditBatch) {
        self.undo.push(batch);
    }
}

impl Default for UndoLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch_inserting(pos: usize, text: &str) -> EditBatch {
        EditBatch {
            ops: vec![EditOp::Insert {
                pos,
                text: text.to_string(),
            }],
            before: CursorSet::caret(pos),
            after: CursorSet::caret(pos + text.len()),
        }
    }

    #[test]
    fn test_fresh_log_is_unmodified() {
        let log = UndoLog::new();
        assert!(!log.is_modified());
        assert!(!log.can_undo());
        assert!(!log.can_redo());
    }

    #[test]
    fn test_push_modifies_and_clears_redo() {
        let mut log = UndoLog::new();
        log.push(batch_inserting(0, "a"));
        assert!(log.is_modified());

        let batch = log.pop_undo().unwrap();
        log.push_undone(batch);
        assert!(log.can_redo());

        log.push(batch_inserting(0, "b"));
        assert!(!log.can_redo());
    }

    #[test]
    fn test_save_point_round_trip() {
        let mut log = UndoLog::new();
        log.push(batch_inserting(0, "a"));
        log.mark_saved();
        assert!(!log.is_modified());

        // Undo behind the save point: modified again.
        let batch = log.pop_undo().unwrap();
        log.push_undone(batch);
        assert!(log.is_modified());

        // Redo back to the save point: clean.
        let batch = log.pop_redo().unwrap();
        log.push_redone(batch);
        assert!(!log.is_modified());
    }

    #[test]
    fn test_save_point_becomes_unreachable_after_divergence() {
        let mut log = UndoLog::new();
        log.push(batch_inserting(0, "a"));
        log.mark_saved();

        // Undo past the save, then type something new.
        let batch = log.pop_undo().unwrap();
        log.push_undone(batch);
        log.push(batch_inserting(0, "b"));

        // The saved state cannot be reached anymore; undoing all the way
        // back must still report modified.
        assert!(log.is_modified());
        let batch = log.pop_undo().unwrap();
        log.push_undone(batch);
        assert!(log.is_modified());
    }

    #[test]
    fn test_ops_invert_cleanly() {
        let mut table = PieceTable::from_text("hello");
        let op = EditOp::Insert {
            pos: 5,
            text: " world".to_string(),
        };
        op.apply(&mut table);
        assert_eq!(table.text(), "hello world");
        op.revert(&mut table);
        assert_eq!(table.text(), "hello");

        let erase = EditOp::Erase {
            pos: 0,
            text: "he".to_string(),
        };
        erase.apply(&mut table);
        assert_eq!(table.text(), "llo");
        erase.revert(&mut table);
        assert_eq!(table.text(), "hello");
    }
}
