//! Edit engine.
//!
//! [`Editor`] aggregates the storage, line index, cursor set, undo log, and
//! layout oracle, and exposes one method per editing intent. Every intent
//! produces at most one [`EditBatch`] and leaves all invariants restored:
//! the line index matches the piece sequence, every cursor position is in
//! bounds, and `virtual_space` holds only for cursors whose desired X sits
//! past their line end.
//!
//! Edits are applied per cursor in descending start order so an edit at
//! offset p never perturbs pending edits at offsets greater than p. All
//! primitives are total: out-of-range inputs clamp, empty inputs are
//! no-ops; only the file binding can fail.

use std::path::{Path, PathBuf};

use crate::binding::{self, Encoding, FileError};
use crate::clipboard::ClipboardPayload;
use crate::cursor::{Cursor, CursorSet};
use crate::history::{EditBatch, EditOp, UndoLog};
use crate::layout::Shaper;
use crate::line_index::LineIndex;
use crate::search::{self, is_word_byte, SearchOptions};
use crate::storage::PieceTable;

/// Pointer travel (in px, either axis) that turns a pending drag into a
/// real drag-move.
const DRAG_THRESHOLD_PX: f32 = 5.0;

/// Editing intents routed through [`Editor::apply`].
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    /// Insert text at every cursor (replacing selections).
    Insert(String),
    /// Erase one cluster left of each caret, or each selection.
    Backspace,
    /// Erase one cluster right of each caret, or each selection.
    DeleteForward,
    /// Paste a clipboard payload (dispatches on the rectangular bit).
    Paste(ClipboardPayload),
    /// Delete every line covered by a cursor.
    DeleteLines,
    /// Move covered line blocks up by one line.
    MoveLinesUp,
    /// Move covered line blocks down by one line.
    MoveLinesDown,
    /// Duplicate covered line blocks above themselves.
    DuplicateLinesUp,
    /// Duplicate covered line blocks below themselves.
    DuplicateLinesDown,
    /// Map every selection through the Unicode case map.
    ConvertCase {
        /// Uppercase when true, lowercase otherwise.
        upper: bool,
    },
    /// Replace every occurrence in one atomic batch.
    ReplaceAll {
        /// The search query.
        query: String,
        /// The replacement text (supports `$n` captures in regex mode).
        replacement: String,
        /// Search options.
        options: SearchOptions,
    },
    /// Revert the newest batch.
    Undo,
    /// Re-apply the newest undone batch.
    Redo,
}

/// Drag-over-selection gesture state.
///
/// `Idle → Pending` on a press inside an existing selection, `Pending →
/// Moving` once the pointer travels the threshold, and release either
/// commits the move or collapses the selection at the click.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DragState {
    /// No gesture in progress.
    Idle,
    /// Pressed inside a selection, not yet moved far enough.
    Pending {
        /// Selected range under the press.
        source_start: usize,
        /// Exclusive end of that range.
        source_end: usize,
        /// Press position in pixels.
        press_x: f32,
        /// Press position in pixels.
        press_y: f32,
    },
    /// Dragging the selected text towards a destination.
    Moving {
        /// Selected range being moved.
        source_start: usize,
        /// Exclusive end of that range.
        source_end: usize,
        /// Current drop position.
        dest: usize,
    },
}

/// Rectangular-selection gesture anchor, in (line, visual X) coordinates.
#[derive(Debug, Clone, Copy)]
struct RectGesture {
    anchor_line: usize,
    anchor_x: f32,
    head_line: usize,
    head_x: f32,
}

/// The editing core.
pub struct Editor {
    table: PieceTable,
    lines: LineIndex,
    cursors: CursorSet,
    history: UndoLog,
    shaper: Box<dyn Shaper>,
    path: Option<PathBuf>,
    encoding: Encoding,
    composition: Option<String>,
    drag: DragState,
    rect: Option<RectGesture>,
}

impl Editor {
    /// An empty document.
    pub fn new(shaper: Box<dyn Shaper>) -> Self {
        Self {
            table: PieceTable::empty(),
            lines: LineIndex::new(),
            cursors: CursorSet::caret(0),
            history: UndoLog::new(),
            shaper,
            path: None,
            encoding: Encoding::Utf8,
            composition: None,
            drag: DragState::Idle,
            rect: None,
        }
    }

    /// A document seeded with UTF-8 text (tests and hosts).
    pub fn with_text(text: &str, shaper: Box<dyn Shaper>) -> Self {
        let mut editor = Self::new(shaper);
        editor.table = PieceTable::from_text(text);
        editor.lines.rebuild(&editor.table);
        editor
    }

    // --- Accessors -------------------------------------------------------

    /// The whole document as an owned string.
    pub fn text(&self) -> String {
        self.table.text()
    }

    /// Document length in bytes.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Whether the document is empty.
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// The piece table (hosts stream it out for display or save).
    pub fn table(&self) -> &PieceTable {
        &self.table
    }

    /// The line index.
    pub fn lines(&self) -> &LineIndex {
        &self.lines
    }

    /// Number of lines.
    pub fn line_count(&self) -> usize {
        self.lines.line_count()
    }

    /// Visible text of `line` (newline trimmed).
    pub fn line_text(&self, line: usize) -> String {
        let (start, end) = self.lines.visible_line_range(line, &self.table);
        self.table.range_string(start, end - start)
    }

    /// The cursor set.
    pub fn cursors(&self) -> &CursorSet {
        &self.cursors
    }

    /// Detected encoding of the current document.
    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// Path the document is bound to, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Whether the document differs from the last saved state.
    pub fn is_modified(&self) -> bool {
        self.history.is_modified()
    }

    /// Whether undo is available.
    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    /// Whether redo is available.
    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    /// Depth of the undo stack.
    pub fn undo_depth(&self) -> usize {
        self.history.undo_depth()
    }

    /// The active IME composition text, if any.
    pub fn composition(&self) -> Option<&str> {
        self.composition.as_deref()
    }

    /// Current drag gesture state.
    pub fn drag_state(&self) -> DragState {
        self.drag
    }

    /// The layout oracle in use.
    pub fn shaper(&self) -> &dyn Shaper {
        &*self.shaper
    }

    // --- Coordinate mapping ---------------------------------------------

    /// Visual X of byte position `pos` on its line.
    pub fn x_at(&self, pos: usize) -> f32 {
        let line = self.lines.line_of(pos);
        let (start, text) = self.visible_line(line);
        let offset = pos.saturating_sub(start).min(text.len());
        self.shaper.x_in_line(&text, offset)
    }

    /// Byte position on `line` nearest to visual X (snapped to cluster
    /// boundaries, clamped before the newline).
    pub fn position_at(&self, line: usize, x: f32) -> usize {
        let line = line.min(self.lines.last_line());
        let (start, text) = self.visible_line(line);
        start + self.shaper.offset_in_line_from_x(&text, x)
    }

    fn visible_line(&self, line: usize) -> (usize, String) {
        let (start, end) = self.lines.visible_line_range(line, &self.table);
        (start, self.table.range_string(start, end - start))
    }

    /// Byte position and visual X of the physical end of `line`.
    fn line_end_info(&self, line: usize) -> (usize, f32) {
        let (start, text) = self.visible_line(line);
        let end_x = self.shaper.x_in_line(&text, text.len());
        (start + text.len(), end_x)
    }

    /// One cluster to the left (stepping over a full newline sequence).
    pub fn grapheme_left(&self, pos: usize) -> usize {
        if pos == 0 {
            return 0;
        }
        if self.table.byte_at(pos - 1) == Some(b'\n') {
            if pos >= 2 && self.table.byte_at(pos - 2) == Some(b'\r') {
                return pos - 2;
            }
            return pos - 1;
        }
        let line = self.lines.line_of(pos);
        let (start, text) = self.visible_line(line);
        let local = pos.saturating_sub(start).min(text.len());
        start + self.shaper.grapheme_step(&text, local, false)
    }

    /// One cluster to the right (stepping over a full newline sequence).
    pub fn grapheme_right(&self, pos: usize) -> usize {
        let len = self.table.len();
        if pos >= len {
            return len;
        }
        match self.table.byte_at(pos) {
            Some(b'\n') => return pos + 1,
            Some(b'\r') if self.table.byte_at(pos + 1) == Some(b'\n') => return pos + 2,
            _ => {}
        }
        let line = self.lines.line_of(pos);
        let (start, text) = self.visible_line(line);
        let local = pos - start;
        start + self.shaper.grapheme_step(&text, local.min(text.len()), true)
    }

    /// Previous word boundary: skip whitespace, then a run of one word
    /// class. A newline adjacent to the caret is always a single step.
    pub fn word_left(&self, pos: usize) -> usize {
        if pos == 0 {
            return 0;
        }
        let mut cur = pos;
        if self.table.byte_at(cur - 1) == Some(b'\n') {
            return cur - 1;
        }
        while cur > 0 {
            match self.table.byte_at(cur - 1) {
                Some(b'\n') => break,
                Some(b) if b.is_ascii_whitespace() => cur -= 1,
                _ => break,
            }
        }
        if cur == 0 {
            return 0;
        }
        let Some(first) = self.table.byte_at(cur - 1) else {
            return cur;
        };
        if first == b'\n' {
            return cur;
        }
        let class = is_word_byte(first);
        while cur > 0 {
            match self.table.byte_at(cur - 1) {
                Some(b'\n') => break,
                Some(b) if b.is_ascii_whitespace() => break,
                Some(b) if is_word_byte(b) != class => break,
                Some(_) => cur -= 1,
                None => break,
            }
        }
        cur
    }

    /// Next word boundary (mirrors [`Editor::word_left`]).
    pub fn word_right(&self, pos: usize) -> usize {
        let len = self.table.len();
        if pos >= len {
            return len;
        }
        let mut cur = pos;
        let Some(first) = self.table.byte_at(cur) else {
            return len;
        };
        if first == b'\n' {
            return cur + 1;
        }
        if !first.is_ascii_whitespace() {
            let class = is_word_byte(first);
            while cur < len {
                match self.table.byte_at(cur) {
                    Some(b'\n') => break,
                    Some(b) if b.is_ascii_whitespace() => break,
                    Some(b) if is_word_byte(b) != class => break,
                    Some(_) => cur += 1,
                    None => break,
                }
            }
        }
        while cur < len {
            match self.table.byte_at(cur) {
                Some(b'\n') => break,
                Some(b) if b.is_ascii_whitespace() => cur += 1,
                _ => break,
            }
        }
        cur
    }

    // --- Batch plumbing --------------------------------------------------

    /// Mutate the table, record the op, and shift every cursor.
    fn apply_insert(&mut self, pos: usize, text: String, ops: &mut Vec<EditOp>) {
        if text.is_empty() {
            return;
        }
        self.table.insert(pos, text.as_bytes());
        self.cursors.shift_for_insert(pos, text.len());
        ops.push(EditOp::Insert { pos, text });
    }

    /// Erase, record, and shift. Length clamps to the document.
    fn apply_erase(&mut self, pos: usize, len: usize, ops: &mut Vec<EditOp>) {
        if len == 0 {
            return;
        }
        let text = self.table.range_string(pos, len);
        if text.is_empty() {
            return;
        }
        self.table.erase(pos, text.len());
        self.cursors.shift_for_erase(pos, text.len());
        ops.push(EditOp::Erase { pos, text });
    }

    /// Push the finished batch onto the undo log.
    fn commit(&mut self, before: CursorSet, ops: Vec<EditOp>) {
        let after = self.cursors.clone();
        self.history.push(EditBatch { ops, before, after });
    }

    /// Re-derive `desired_x` / `original_anchor_x` from the head and clear
    /// the virtual flag for the given cursors.
    fn refresh_visual_for(&mut self, indices: &[usize]) {
        for &idx in indices {
            let head = self.cursors.get(idx).head;
            let x = self.x_at(head);
            let cursor = self.cursors.get_mut(idx);
            cursor.desired_x = x;
            cursor.original_anchor_x = x;
            cursor.virtual_space = false;
        }
    }

    fn refresh_visual_all(&mut self) {
        let all: Vec<usize> = (0..self.cursors.len()).collect();
        self.refresh_visual_for(&all);
    }

    // --- Insert / replace (the general path) -----------------------------

    /// Insert `text` at every cursor, replacing selections. Cursors in
    /// virtual space get their padding spaces inserted in the same batch.
    pub fn insert_text(&mut self, text: &str) {
        self.insert_with(|_| text);
    }

    /// Like [`Editor::insert_text`] with a per-cursor payload; `text_for`
    /// receives the cursor's rank in ascending document order.
    fn insert_with<'a>(&mut self, text_for: impl Fn(usize) -> &'a str) {
        self.end_rect_gesture();
        let before = self.cursors.clone();
        let mut ops: Vec<EditOp> = Vec::new();
        let order = self.cursors.indices_by_start_desc();
        let count = order.len();

        // Selections go first so padding and insertion see final geometry.
        for &idx in &order {
            let cursor = *self.cursors.get(idx);
            if cursor.has_selection() {
                self.apply_erase(cursor.start(), cursor.end() - cursor.start(), &mut ops);
            }
        }
        if !ops.is_empty() {
            self.lines.rebuild(&self.table);
        }

        for (rank_desc, &idx) in order.iter().enumerate() {
            let payload = text_for(count - 1 - rank_desc);
            if payload.is_empty() {
                continue;
            }

            let cursor = *self.cursors.get(idx);
            if cursor.virtual_space {
                let line = self.lines.line_of(cursor.head);
                let (end_pos, end_x) = self.line_end_info(line);
                let cell = self.shaper.reference_cell_width();
                let excess = cursor.desired_x - end_x;
                if cell > 0.0 && excess > cell * 0.5 {
                    let spaces = (excess / cell).round() as usize;
                    if spaces > 0 {
                        self.apply_insert(end_pos, " ".repeat(spaces), &mut ops);
                    }
                }
            }

            let pos = self.cursors.get(idx).head;
            self.apply_insert(pos, payload.to_string(), &mut ops);
        }

        if ops.is_empty() {
            return;
        }
        self.lines.rebuild(&self.table);
        self.refresh_visual_all();
        self.commit(before, ops);
    }

    // --- Backspace / delete ----------------------------------------------

    /// Backspace. Selections are deleted; carets in virtual space retract
    /// one reference cell without touching text (and without a batch);
    /// other carets erase one cluster to the left.
    pub fn backspace(&mut self) {
        self.end_rect_gesture();
        let any_selection = self.cursors.iter().any(|c| c.has_selection());
        let before = self.cursors.clone();
        let mut ops: Vec<EditOp> = Vec::new();
        let mut affected: Vec<usize> = Vec::new();
        let order = self.cursors.indices_by_start_desc();

        for &idx in &order {
            let cursor = *self.cursors.get(idx);
            if any_selection {
                if cursor.has_selection() {
                    self.apply_erase(cursor.start(), cursor.end() - cursor.start(), &mut ops);
                    affected.push(idx);
                }
            } else if cursor.virtual_space {
                let line = self.lines.line_of(cursor.head);
                let (_, end_x) = self.line_end_info(line);
                let cell = self.shaper.reference_cell_width();
                let cursor = self.cursors.get_mut(idx);
                cursor.desired_x = (cursor.desired_x - cell).max(end_x);
                cursor.original_anchor_x = cursor.desired_x;
                if cursor.desired_x <= end_x {
                    cursor.virtual_space = false;
                }
            } else if cursor.head > 0 {
                let prev = self.grapheme_left(cursor.head);
                if prev < cursor.head {
                    self.apply_erase(prev, cursor.head - prev, &mut ops);
                    affected.push(idx);
                }
            }
        }

        if ops.is_empty() {
            return;
        }
        self.lines.rebuild(&self.table);
        self.refresh_visual_for(&affected);
        self.commit(before, ops);
    }

    /// Delete forward: selections, else one cluster to the right.
    pub fn delete_forward(&mut self) {
        self.end_rect_gesture();
        let before = self.cursors.clone();
        let mut ops: Vec<EditOp> = Vec::new();
        let order = self.cursors.indices_by_start_desc();

        for &idx in &order {
            let cursor = *self.cursors.get(idx);
            let start = cursor.start();
            let len = if cursor.has_selection() {
                cursor.end() - start
            } else {
                self.grapheme_right(start) - start
            };
            if len > 0 {
                self.apply_erase(start, len, &mut ops);
            }
        }

        for cursor in self.cursors.iter_mut() {
            cursor.virtual_space = false;
        }
        if ops.is_empty() {
            return;
        }
        self.lines.rebuild(&self.table);
        self.refresh_visual_all();
        self.commit(before, ops);
    }

    // --- Clipboard -------------------------------------------------------

    /// Gather every selection (in document order, newline separated) into a
    /// payload carrying the rectangular bit. `None` when nothing is
    /// selected.
    pub fn copy(&self) -> Option<ClipboardPayload> {
        let parts: Vec<String> = self
            .cursors
            .sorted_by_start()
            .iter()
            .filter(|c| c.has_selection())
            .map(|c| self.table.range_string(c.start(), c.end() - c.start()))
            .collect();
        if parts.is_empty() {
            return None;
        }
        Some(ClipboardPayload {
            text: parts.join("\n"),
            rectangular: self.cursors.is_rectangular(),
        })
    }

    /// Copy, then delete every selection in one batch.
    pub fn cut(&mut self) -> Option<ClipboardPayload> {
        let payload = self.copy()?;
        self.insert_text("");
        Some(payload)
    }

    /// Paste. Rectangular payloads paste spatially; otherwise a payload
    /// with exactly one line per cursor distributes line-per-cursor, and
    /// anything else inserts whole at every cursor.
    pub fn paste(&mut self, payload: &ClipboardPayload) {
        if payload.text.is_empty() {
            return;
        }
        if payload.rectangular {
            self.block_paste(&payload.text);
            return;
        }
        let lines: Vec<&str> = payload.text.split('\n').collect();
        if self.cursors.len() > 1 && lines.len() == self.cursors.len() {
            self.insert_with(|rank| lines[rank]);
        } else {
            self.insert_text(&payload.text);
        }
    }

    /// Spatial paste of a rectangular payload: each payload line lands at
    /// the base visual X on consecutive lines below the base position,
    /// padding with spaces and synthesizing trailing newlines as needed.
    /// The cursor set is replaced by one caret at the right edge of each
    /// inserted segment.
    pub fn block_paste(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.end_rect_gesture();
        let before = self.cursors.clone();
        let mut ops: Vec<EditOp> = Vec::new();

        let base = self.cursors.sorted_by_start()[0];
        let base_pos = base.head;
        let base_line = self.lines.line_of(base_pos);
        let base_x = if base.virtual_space {
            base.desired_x
        } else {
            self.x_at(base_pos)
        };

        let segments: Vec<&str> = text.split('\n').collect();

        // Synthesize trailing newlines when the payload spans below EOF.
        let needed_last = base_line + segments.len() - 1;
        if needed_last >= self.lines.line_count() {
            let extra = needed_last - self.lines.line_count() + 1;
            let pos = self.table.len();
            self.apply_insert(pos, "\n".repeat(extra), &mut ops);
            self.lines.rebuild(&self.table);
        }

        let cell = self.shaper.reference_cell_width();
        // (line, caret) pairs, recorded bottom-up and shifted as lower
        // offsets receive text.
        let mut carets: Vec<(usize, usize)> = Vec::new();

        for (i, segment) in segments.iter().enumerate().rev() {
            let line = base_line + i;
            let (end_pos, end_x) = self.line_end_info(line);

            let mut inserted = 0usize;
            let insert_pos = if cell > 0.0 && base_x > end_x + cell * 0.5 {
                let spaces = ((base_x - end_x) / cell).round() as usize;
                if spaces > 0 {
                    self.apply_insert(end_pos, " ".repeat(spaces), &mut ops);
                    inserted += spaces;
                }
                end_pos + spaces
            } else {
                self.position_at(line, base_x)
            };

            if !segment.is_empty() {
                self.apply_insert(insert_pos, segment.to_string(), &mut ops);
                inserted += segment.len();
            }

            for caret in carets.iter_mut() {
                caret.1 += inserted;
            }
            carets.push((line, insert_pos + segment.len()));
        }

        if ops.is_empty() {
            return;
        }
        self.lines.rebuild(&self.table);

        carets.reverse();
        let new_cursors: Vec<Cursor> = carets
            .iter()
            .map(|&(_, pos)| Cursor::caret(pos, self.x_at(pos)))
            .collect();
        self.cursors.replace(new_cursors);
        self.cursors.set_rectangular(false);
        self.commit(before, ops);
    }

    // --- Line operations -------------------------------------------------

    /// Maximal contiguous blocks of line indices covered by any cursor. A
    /// selection ending exactly at a line start does not include that line.
    fn covered_line_blocks(&self) -> Vec<(usize, usize)> {
        let mut covered = std::collections::BTreeSet::new();
        for cursor in self.cursors.iter() {
            let start_line = self.lines.line_of(cursor.start());
            let mut end_line = self.lines.line_of(cursor.end());
            if cursor.has_selection()
                && end_line > start_line
                && cursor.end() == self.lines.line_start(end_line)
            {
                end_line -= 1;
            }
            for line in start_line..=end_line {
                covered.insert(line);
            }
        }

        let mut blocks: Vec<(usize, usize)> = Vec::new();
        for line in covered {
            match blocks.last_mut() {
                Some((_, end)) if *end + 1 == line => *end = line,
                _ => blocks.push((line, line)),
            }
        }
        blocks
    }

    /// Number of lines that hold content (the empty slot after a final
    /// newline does not count).
    fn content_line_count(&self) -> usize {
        let last = self.lines.last_line();
        if self.lines.line_start(last) >= self.table.len() && last > 0 {
            last
        } else {
            last + 1
        }
    }

    /// Delete every covered line. Cursors collapse onto the surviving
    /// neighbor.
    pub fn delete_lines(&mut self) {
        self.end_rect_gesture();
        let before = self.cursors.clone();
        let mut ops: Vec<EditOp> = Vec::new();

        let all_lines: Vec<usize> = self
            .covered_line_blocks()
            .iter()
            .flat_map(|&(s, e)| s..=e)
            .collect();

        for &line in all_lines.iter().rev() {
            let (start, end) = self.lines.line_range(line, self.table.len());
            if end > start {
                self.apply_erase(start, end - start, &mut ops);
            } else if line > 0 {
                // Empty line: remove the preceding newline sequence.
                let mut del_start = start - 1;
                if del_start > 0 && self.table.byte_at(del_start - 1) == Some(b'\r') {
                    del_start -= 1;
                }
                self.apply_erase(del_start, start - del_start, &mut ops);
            }
        }

        if ops.is_empty() {
            return;
        }
        for cursor in self.cursors.iter_mut() {
            cursor.collapse();
        }
        self.cursors.merge_overlapping();
        self.lines.rebuild(&self.table);
        self.refresh_visual_all();
        self.commit(before, ops);
    }

    /// Move covered line blocks one line up or down, swapping each block
    /// with its neighbor. The document is first terminated with a newline
    /// (inside the same batch) so the EOF swap stays symmetric.
    pub fn move_lines(&mut self, up: bool) {
        self.end_rect_gesture();
        let content_lines = self.content_line_count();
        let blocks: Vec<(usize, usize)> = self
            .covered_line_blocks()
            .into_iter()
            .map(|(s, e)| (s.min(content_lines - 1), e.min(content_lines - 1)))
            .filter(|&(s, e)| if up { s > 0 } else { e + 1 < content_lines })
            .collect();
        if blocks.is_empty() {
            return;
        }

        let before = self.cursors.clone();
        let mut ops: Vec<EditOp> = Vec::new();

        let len = self.table.len();
        if len > 0 && self.table.byte_at(len - 1) != Some(b'\n') {
            self.apply_insert(len, "\n".to_string(), &mut ops);
            self.lines.rebuild(&self.table);
        }

        // Outermost first in the direction of movement.
        let ordered: Vec<(usize, usize)> = if up {
            blocks
        } else {
            blocks.into_iter().rev().collect()
        };

        for (bs, be) in ordered {
            let neighbor_line = if up { bs - 1 } else { be + 1 };
            let block_start = self.lines.line_start(bs);
            let (_, block_end) = self.lines.line_range(be, self.table.len());
            let (neighbor_start, neighbor_end) =
                self.lines.line_range(neighbor_line, self.table.len());

            let block_len = block_end - block_start;
            let neighbor_len = neighbor_end - neighbor_start;
            if block_len == 0 || neighbor_len == 0 {
                continue;
            }

            let (region_start, region_end) = if up {
                (neighbor_start, block_end)
            } else {
                (block_start, neighbor_end)
            };
            let block_text = self.table.range_string(block_start, block_len);
            let neighbor_text = self.table.range_string(neighbor_start, neighbor_len);
            let swapped = if up {
                format!("{block_text}{neighbor_text}")
            } else {
                format!("{neighbor_text}{block_text}")
            };

            // The region rewrite mangles cursor positions via the generic
            // shift rules; map them explicitly instead.
            let mapped: Vec<(usize, usize)> = self
                .cursors
                .iter()
                .map(|c| {
                    let map = |cursor: &Cursor| -> isize {
                        let overlaps_block = cursor.start() < block_end
                            && cursor.end() > block_start
                            || (!cursor.has_selection()
                                && cursor.head >= block_start
                                && cursor.head < block_end);
                        let overlaps_neighbor = cursor.start() < neighbor_end
                            && cursor.end() > neighbor_start
                            || (!cursor.has_selection()
                                && cursor.head >= neighbor_start
                                && cursor.head < neighbor_end);
                        if overlaps_block {
                            if up {
                                -(neighbor_len as isize)
                            } else {
                                neighbor_len as isize
                            }
                        } else if overlaps_neighbor {
                            if up {
                                block_len as isize
                            } else {
                                -(block_len as isize)
                            }
                        } else {
                            0
                        }
                    };
                    let delta = map(c);
                    (
                        c.head.wrapping_add_signed(delta),
                        c.anchor.wrapping_add_signed(delta),
                    )
                })
                .collect();

            self.apply_erase(region_start, region_end - region_start, &mut ops);
            self.apply_insert(region_start, swapped, &mut ops);

            for (cursor, (head, anchor)) in self.cursors.iter_mut().zip(mapped) {
                cursor.head = head;
                cursor.anchor = anchor;
            }
        }

        if ops.is_empty() {
            return;
        }
        self.cursors.clamp_to(self.table.len());
        self.lines.rebuild(&self.table);
        self.refresh_visual_all();
        self.commit(before, ops);
    }

    /// Duplicate covered line blocks, placing the cursors on the new copy
    /// so repeating the operation duplicates again.
    pub fn duplicate_lines(&mut self, up: bool) {
        self.end_rect_gesture();
        let blocks = self.covered_line_blocks();
        if blocks.is_empty() {
            return;
        }

        let before = self.cursors.clone();
        let mut ops: Vec<EditOp> = Vec::new();

        for &(bs, be) in blocks.iter().rev() {
            let block_start = self.lines.line_start(bs);
            let (_, mut block_end) = self.lines.line_range(be, self.table.len());
            let mut text = self.table.range_string(block_start, block_end - block_start);
            if text.is_empty() {
                continue;
            }
            if !text.ends_with('\n') {
                // Final line without a newline: terminate the document so
                // the copy stays line shaped.
                let pos = self.table.len();
                self.apply_insert(pos, "\n".to_string(), &mut ops);
                text.push('\n');
                block_end += 1;
            }
            let copy_len = text.len();
            let insert_pos = if up { block_start } else { block_end };

            let saved: Vec<(usize, usize)> = self
                .cursors
                .iter()
                .map(|c| (c.head, c.anchor))
                .collect();

            self.apply_insert(insert_pos, text, &mut ops);

            // Re-aim cursors that lived in the original block at the copy.
            let in_block = |p: usize| p >= block_start && p < block_end;
            for (idx, (head, anchor)) in saved.into_iter().enumerate() {
                if !(in_block(head) || in_block(anchor)) {
                    continue;
                }
                let cursor = self.cursors.get_mut(idx);
                if up {
                    // The copy occupies the original offsets.
                    cursor.head = head;
                    cursor.anchor = anchor;
                } else {
                    cursor.head = head + copy_len;
                    cursor.anchor = anchor + copy_len;
                }
            }
        }

        if ops.is_empty() {
            return;
        }
        self.lines.rebuild(&self.table);
        self.refresh_visual_all();
        self.commit(before, ops);
    }

    // --- Case conversion -------------------------------------------------

    /// Map every selection through the Unicode case map (length may change,
    /// e.g. ß → SS); downstream cursors shift by the delta.
    pub fn convert_case(&mut self, upper: bool) {
        self.end_rect_gesture();
        let before = self.cursors.clone();
        let mut ops: Vec<EditOp> = Vec::new();
        let order = self.cursors.indices_by_start_desc();

        for &idx in &order {
            let cursor = *self.cursors.get(idx);
            if !cursor.has_selection() {
                continue;
            }
            let start = cursor.start();
            let old = self.table.range_string(start, cursor.end() - start);
            let new = if upper {
                old.to_uppercase()
            } else {
                old.to_lowercase()
            };
            if new == old {
                continue;
            }
            let new_len = new.len();
            self.apply_erase(start, old.len(), &mut ops);
            self.apply_insert(start, new, &mut ops);

            // Keep the converted text selected, preserving direction.
            let cursor_mut = self.cursors.get_mut(idx);
            if cursor.is_forward() {
                cursor_mut.anchor = start;
                cursor_mut.head = start + new_len;
            } else {
                cursor_mut.head = start;
                cursor_mut.anchor = start + new_len;
            }
        }

        if ops.is_empty() {
            return;
        }
        self.lines.rebuild(&self.table);
        for idx in 0..self.cursors.len() {
            let head = self.cursors.get(idx).head;
            let x = self.x_at(head);
            let cursor = self.cursors.get_mut(idx);
            cursor.desired_x = x;
            cursor.virtual_space = false;
        }
        self.commit(before, ops);
    }

    // --- Find / replace --------------------------------------------------

    /// Find the next occurrence from the primary cursor and select it.
    /// Wraps around exactly once. An invalid regex behaves as "no match"
    /// and leaves the cursor set unchanged.
    pub fn find_next(
        &mut self,
        query: &str,
        options: SearchOptions,
        forward: bool,
    ) -> Option<(usize, usize)> {
        let text = self.table.text();
        let primary = *self.cursors.primary();
        let from = if forward { primary.end() } else { primary.start() };

        match search::find(&text, query, options, from, forward) {
            Ok(Some(m)) => {
                let x = self.x_at(m.end);
                self.cursors
                    .replace(vec![Cursor::selection(m.end, m.start, x)]);
                self.cursors.set_rectangular(false);
                Some((m.start, m.end))
            }
            Ok(None) => None,
            Err(err) => {
                log::warn!("find: {err}");
                None
            }
        }
    }

    /// Replace every occurrence in one atomic batch, collecting matches in
    /// a single pass and applying from last to first (replaced text is not
    /// re-searched). Returns the number of replacements; an invalid regex
    /// replaces nothing and leaves everything unchanged.
    pub fn replace_all(
        &mut self,
        query: &str,
        replacement: &str,
        options: SearchOptions,
    ) -> usize {
        let text = self.table.text();
        let plan = match search::replace_plan(&text, query, replacement, options) {
            Ok(plan) => plan,
            Err(err) => {
                log::warn!("replace-all: {err}");
                return 0;
            }
        };
        if plan.is_empty() {
            return 0;
        }

        self.end_rect_gesture();
        let before = self.cursors.clone();
        let mut ops: Vec<EditOp> = Vec::new();
        for rep in plan.iter().rev() {
            self.apply_erase(rep.range.start, rep.range.len(), &mut ops);
            self.apply_insert(rep.range.start, rep.text.clone(), &mut ops);
        }

        let count = plan.len();
        log::debug!("replace-all: {count} occurrence(s)");
        self.cursors.merge_overlapping();
        self.lines.rebuild(&self.table);
        self.refresh_visual_all();
        self.commit(before, ops);
        count
    }

    /// Select the word at the primary caret, or append a cursor over the
    /// next occurrence of the current selection (literal, case-sensitive,
    /// wrapping once). New cursors are not merged during the gesture.
    pub fn select_next_occurrence(&mut self) {
        let primary = *self.cursors.primary();
        if !primary.has_selection() {
            self.select_word_at(primary.head);
            return;
        }

        let needle = self
            .table
            .range_string(primary.start(), primary.end() - primary.start());
        if needle.is_empty() {
            return;
        }
        let text = self.table.text();
        let found = search::find(&text, &needle, SearchOptions::default(), primary.end(), true);
        let Ok(Some(m)) = found else { return };
        let covered = self
            .cursors
            .iter()
            .any(|c| c.start() <= m.start && m.end <= c.end());
        if covered {
            return;
        }
        let x = self.x_at(m.end);
        self.cursors.push(Cursor::selection(m.end, m.start, x));
        self.cursors.set_rectangular(false);
    }

    // --- Selection gestures ----------------------------------------------

    /// Select the word around `pos` (word-class bytes, stopping at
    /// newlines). On a newline, selects the newline itself.
    pub fn select_word_at(&mut self, pos: usize) {
        self.end_rect_gesture();
        let len = self.table.len();
        if pos >= len {
            let x = self.x_at(len);
            self.cursors.replace(vec![Cursor::caret(len, x)]);
            self.cursors.set_rectangular(false);
            return;
        }
        let Some(byte) = self.table.byte_at(pos) else {
            return;
        };
        if byte == b'\n' {
            let x = self.x_at(pos + 1);
            self.cursors
                .replace(vec![Cursor::selection(pos + 1, pos, x)]);
            self.cursors.set_rectangular(false);
            return;
        }

        let class = is_word_byte(byte);
        let mut start = pos;
        while start > 0 {
            match self.table.byte_at(start - 1) {
                Some(b'\n') => break,
                Some(b) if is_word_byte(b) != class => break,
                Some(_) => start -= 1,
                None => break,
            }
        }
        let mut end = pos;
        while end < len {
            match self.table.byte_at(end) {
                Some(b'\n') => break,
                Some(b) if is_word_byte(b) != class => break,
                Some(_) => end += 1,
                None => break,
            }
        }
        let x = self.x_at(end);
        self.cursors.replace(vec![Cursor::selection(end, start, x)]);
        self.cursors.set_rectangular(false);
    }

    /// Select the whole line containing `pos`, including its newline.
    pub fn select_line_at(&mut self, pos: usize) {
        self.end_rect_gesture();
        let line = self.lines.line_of(pos);
        let (start, end) = self.lines.line_range(line, self.table.len());
        let x = self.x_at(end);
        self.cursors.replace(vec![Cursor::selection(end, start, x)]);
        self.cursors.set_rectangular(false);
    }

    /// Select the entire document with a single cursor.
    pub fn select_all(&mut self) {
        self.end_rect_gesture();
        let len = self.table.len();
        self.cursors
            .replace(vec![Cursor::selection(len, 0, self.x_at(len))]);
        self.cursors.set_rectangular(false);
    }

    /// Escape: collapse to the primary caret and leave rectangular mode.
    pub fn collapse_selections(&mut self) {
        self.end_rect_gesture();
        self.cursors.collapse_to_primary();
    }

    /// Place a single caret at `pos`.
    pub fn set_caret(&mut self, pos: usize) {
        self.end_rect_gesture();
        let pos = pos.min(self.table.len());
        let x = self.x_at(pos);
        self.cursors.replace(vec![Cursor::caret(pos, x)]);
        self.cursors.set_rectangular(false);
    }

    /// Add a caret at `pos` (Ctrl-click); it becomes primary.
    pub fn add_caret(&mut self, pos: usize) {
        let pos = pos.min(self.table.len());
        let x = self.x_at(pos);
        self.cursors.push(Cursor::caret(pos, x));
        self.cursors.set_rectangular(false);
    }

    /// Move the primary head to `pos`, keeping its anchor (Shift-click or
    /// drag selection).
    pub fn extend_primary_to(&mut self, pos: usize) {
        let pos = pos.min(self.table.len());
        let x = self.x_at(pos);
        let primary = self.cursors.primary_mut();
        primary.head = pos;
        primary.desired_x = x;
        primary.virtual_space = false;
    }

    /// Place a caret at (line, x), entering virtual space when `x` lies
    /// past the line end (the Alt-click gesture).
    pub fn set_caret_virtual(&mut self, line: usize, x: f32) {
        self.end_rect_gesture();
        let line = line.min(self.lines.last_line());
        let (end_pos, end_x) = self.line_end_info(line);
        if x > end_x {
            let mut cursor = Cursor::caret(end_pos, x);
            cursor.virtual_space = true;
            self.cursors.replace(vec![cursor]);
            self.cursors.set_rectangular(false);
        } else {
            self.set_caret(self.position_at(line, x));
        }
    }

    // --- Rectangular selection -------------------------------------------

    /// Begin a rectangular selection at (line, x) (Alt-drag press).
    pub fn rect_select_begin(&mut self, line: usize, x: f32) {
        let line = line.min(self.lines.last_line());
        self.rect = Some(RectGesture {
            anchor_line: line,
            anchor_x: x,
            head_line: line,
            head_x: x,
        });
        self.rebuild_rect_selection();
    }

    /// Update the head of the rectangular selection (Alt-drag move).
    pub fn rect_select_update(&mut self, line: usize, x: f32) {
        if self.rect.is_none() {
            self.rect_select_begin(line, x);
            return;
        }
        let last = self.lines.last_line();
        if let Some(rect) = &mut self.rect {
            rect.head_line = line.min(last);
            rect.head_x = x.max(0.0);
        }
        self.rebuild_rect_selection();
    }

    /// Grow the rectangular selection by whole cells / lines (the
    /// Alt+Shift+arrow gesture). Starts a gesture at the primary caret
    /// when none is active.
    pub fn rect_select_step(&mut self, dx_cells: i32, dy_lines: i32) {
        if self.rect.is_none() {
            let head = self.cursors.primary().head;
            let line = self.lines.line_of(head);
            let x = self.x_at(head);
            self.rect = Some(RectGesture {
                anchor_line: line,
                anchor_x: x,
                head_line: line,
                head_x: x,
            });
        }
        let cell = self.shaper.reference_cell_width();
        let last = self.lines.last_line();
        if let Some(rect) = &mut self.rect {
            rect.head_x = (rect.head_x + dx_cells as f32 * cell).max(0.0);
            rect.head_line = rect
                .head_line
                .saturating_add_signed(dy_lines as isize)
                .min(last);
        }
        self.rebuild_rect_selection();
    }

    /// Whether a rectangular gesture is active.
    pub fn is_rect_selecting(&self) -> bool {
        self.rect.is_some()
    }

    /// Finish the rectangular gesture (mouse up), merging overlaps.
    pub fn rect_select_end(&mut self) {
        if self.rect.take().is_some() {
            self.cursors.merge_overlapping();
        }
    }

    fn end_rect_gesture(&mut self) {
        self.rect = None;
    }

    /// Derive one cursor per spanned line from the gesture coordinates.
    /// Cursors whose head X lies past their line end float in virtual
    /// space; no padding is inserted until an edit commits it.
    fn rebuild_rect_selection(&mut self) {
        let Some(rect) = self.rect else { return };
        let top = rect.anchor_line.min(rect.head_line);
        let bottom = rect.anchor_line.max(rect.head_line);

        let mut cursors: Vec<Cursor> = Vec::with_capacity(bottom - top + 1);
        for line in top..=bottom {
            let (_, end_x) = self.line_end_info(line);
            let anchor = self.position_at(line, rect.anchor_x);
            let head = self.position_at(line, rect.head_x);
            cursors.push(Cursor {
                head,
                anchor,
                desired_x: rect.head_x,
                original_anchor_x: rect.anchor_x,
                virtual_space: rect.head_x > end_x,
            });
        }
        self.cursors.replace(cursors);
        self.cursors.set_rectangular(true);
    }

    // --- Movement --------------------------------------------------------

    /// Move every caret one cluster (or word) left/right. Without `extend`
    /// an existing selection collapses to its edge instead of moving.
    pub fn move_horizontal(&mut self, forward: bool, by_word: bool, extend: bool) {
        self.end_rect_gesture();
        for idx in 0..self.cursors.len() {
            let cursor = *self.cursors.get(idx);
            let new_head = if cursor.has_selection() && !extend {
                if forward {
                    cursor.end()
                } else {
                    cursor.start()
                }
            } else if by_word {
                if forward {
                    self.word_right(cursor.head)
                } else {
                    self.word_left(cursor.head)
                }
            } else if forward {
                self.grapheme_right(cursor.head)
            } else {
                self.grapheme_left(cursor.head)
            };

            let x = self.x_at(new_head);
            let cursor = self.cursors.get_mut(idx);
            cursor.head = new_head;
            if !extend {
                cursor.anchor = new_head;
            }
            cursor.desired_x = x;
            cursor.original_anchor_x = x;
            cursor.virtual_space = false;
        }
        self.cursors.merge_overlapping();
    }

    /// Move every caret `delta` lines vertically, re-entering the desired X
    /// on the target line. Carets already on an edge line stay put.
    pub fn move_vertical(&mut self, delta: isize, extend: bool) {
        self.end_rect_gesture();
        let last = self.lines.last_line() as isize;
        for idx in 0..self.cursors.len() {
            let cursor = *self.cursors.get(idx);
            let line = self.lines.line_of(cursor.head) as isize;
            let target = (line + delta).clamp(0, last);
            if target != line {
                let desired_x = cursor.desired_x;
                let new_head = self.position_at(target as usize, desired_x);
                let cursor = self.cursors.get_mut(idx);
                cursor.head = new_head;
            }
            let cursor = self.cursors.get_mut(idx);
            if !extend {
                cursor.anchor = cursor.head;
            }
            cursor.virtual_space = false;
        }
        self.cursors.merge_overlapping();
    }

    /// Home/End: move every caret to its line start or visible line end.
    pub fn move_line_edge(&mut self, to_end: bool, extend: bool) {
        self.end_rect_gesture();
        for idx in 0..self.cursors.len() {
            let head = self.cursors.get(idx).head;
            let line = self.lines.line_of(head);
            let (start, end) = self.lines.visible_line_range(line, &self.table);
            let new_head = if to_end { end } else { start };
            let x = self.x_at(new_head);
            let cursor = self.cursors.get_mut(idx);
            cursor.head = new_head;
            if !extend {
                cursor.anchor = new_head;
            }
            cursor.desired_x = x;
            cursor.original_anchor_x = x;
            cursor.virtual_space = false;
        }
        self.cursors.merge_overlapping();
    }

    /// Ctrl+Home/End: collapse to a single cursor at the document edge.
    pub fn move_document_edge(&mut self, to_end: bool, extend: bool) {
        self.end_rect_gesture();
        let target = if to_end { self.table.len() } else { 0 };
        let anchor = if extend {
            self.cursors.primary().anchor
        } else {
            target
        };
        let x = self.x_at(target);
        self.cursors
            .replace(vec![Cursor::selection(target, anchor, x)]);
        self.cursors.set_rectangular(false);
    }

    // --- Drag gesture ----------------------------------------------------

    /// Pointer press at document position `pos` (pixel coords for the
    /// move threshold). Returns true when the press landed inside an
    /// existing selection and a drag-move may follow; the host should not
    /// treat it as a caret click.
    pub fn pointer_down(&mut self, pos: usize, px: f32, py: f32) -> bool {
        for cursor in self.cursors.iter() {
            if cursor.has_selection() && pos >= cursor.start() && pos < cursor.end() {
                self.drag = DragState::Pending {
                    source_start: cursor.start(),
                    source_end: cursor.end(),
                    press_x: px,
                    press_y: py,
                };
                return true;
            }
        }
        false
    }

    /// Pointer motion while pressed.
    pub fn pointer_moved(&mut self, pos: usize, px: f32, py: f32) {
        match self.drag {
            DragState::Pending {
                source_start,
                source_end,
                press_x,
                press_y,
            } => {
                if (px - press_x).abs() >= DRAG_THRESHOLD_PX
                    || (py - press_y).abs() >= DRAG_THRESHOLD_PX
                {
                    self.drag = DragState::Moving {
                        source_start,
                        source_end,
                        dest: pos,
                    };
                }
            }
            DragState::Moving {
                source_start,
                source_end,
                ..
            } => {
                self.drag = DragState::Moving {
                    source_start,
                    source_end,
                    dest: pos,
                };
            }
            DragState::Idle => {}
        }
    }

    /// Pointer release: commit the drag-move, or collapse the selection at
    /// the click when the pointer never travelled the threshold.
    pub fn pointer_up(&mut self, pos: usize) {
        match self.drag {
            DragState::Pending { .. } => {
                self.drag = DragState::Idle;
                self.set_caret(pos);
            }
            DragState::Moving {
                source_start,
                source_end,
                dest,
            } => {
                self.drag = DragState::Idle;
                self.commit_drag_move(source_start, source_end, dest);
            }
            DragState::Idle => {}
        }
    }

    fn commit_drag_move(&mut self, source_start: usize, source_end: usize, dest: usize) {
        if dest >= source_start && dest <= source_end {
            return;
        }
        let text = self.table.range_string(source_start, source_end - source_start);
        if text.is_empty() {
            return;
        }

        let before = self.cursors.clone();
        let mut ops: Vec<EditOp> = Vec::new();
        self.apply_erase(source_start, text.len(), &mut ops);

        let insert_pos = if dest > source_start {
            dest - text.len()
        } else {
            dest
        };
        let moved_len = text.len();
        self.apply_insert(insert_pos, text, &mut ops);

        self.lines.rebuild(&self.table);
        let x = self.x_at(insert_pos + moved_len);
        self.cursors
            .replace(vec![Cursor::selection(insert_pos + moved_len, insert_pos, x)]);
        self.cursors.set_rectangular(false);
        self.commit(before, ops);
    }

    // --- IME composition -------------------------------------------------

    /// Update the uncommitted composition string (empty clears it).
    pub fn ime_update(&mut self, text: &str) {
        self.composition = if text.is_empty() {
            None
        } else {
            Some(text.to_string())
        };
    }

    /// Commit composed text through the general insert path.
    pub fn ime_commit(&mut self, text: &str) {
        self.composition = None;
        if !text.is_empty() {
            self.insert_text(text);
        }
    }

    /// Abandon the composition.
    pub fn ime_cancel(&mut self) {
        self.composition = None;
    }

    // --- Undo / redo -----------------------------------------------------

    /// Revert the newest batch: ops replay in reverse with each op
    /// inverted, then the batch's before-cursors are restored.
    pub fn undo(&mut self) -> bool {
        self.end_rect_gesture();
        let Some(batch) = self.history.pop_undo() else {
            return false;
        };
        for op in batch.ops.iter().rev() {
            op.revert(&mut self.table);
        }
        self.cursors = batch.before.clone();
        self.history.push_undone(batch);
        self.lines.rebuild(&self.table);
        true
    }

    /// Re-apply the newest undone batch and restore its after-cursors.
    pub fn redo(&mut self) -> bool {
        self.end_rect_gesture();
        let Some(batch) = self.history.pop_redo() else {
            return false;
        };
        for op in &batch.ops {
            op.apply(&mut self.table);
        }
        self.cursors = batch.after.clone();
        self.history.push_redone(batch);
        self.lines.rebuild(&self.table);
        true
    }

    // --- Font change -----------------------------------------------------

    /// Swap the layout oracle (font change). Every cursor's desired X
    /// rescales by the ratio of reference cell widths so cursors stay on
    /// their column.
    pub fn set_shaper(&mut self, shaper: Box<dyn Shaper>) {
        let old = self.shaper.reference_cell_width();
        let new = shaper.reference_cell_width();
        if old > 0.0 && new > 0.0 && old != new {
            let ratio = new / old;
            for cursor in self.cursors.iter_mut() {
                cursor.desired_x *= ratio;
                cursor.original_anchor_x *= ratio;
            }
        }
        self.shaper = shaper;
    }

    // --- File binding ----------------------------------------------------

    /// Open `path`, replacing the document. Undo resets, the save point is
    /// the freshly loaded state, and a single caret sits at 0.
    pub fn open(&mut self, path: &Path) -> Result<(), FileError> {
        let (source, encoding) = binding::open_document(path)?;
        self.table = PieceTable::from_source(source);
        self.encoding = encoding;
        self.path = Some(path.to_path_buf());
        self.lines.rebuild(&self.table);
        self.cursors = CursorSet::caret(0);
        self.history.clear();
        self.composition = None;
        self.drag = DragState::Idle;
        self.rect = None;
        Ok(())
    }

    /// Replace the document with an empty unbound one.
    pub fn new_document(&mut self) {
        self.table = PieceTable::empty();
        self.encoding = Encoding::Utf8;
        self.path = None;
        self.lines.rebuild(&self.table);
        self.cursors = CursorSet::caret(0);
        self.history.clear();
        self.composition = None;
        self.drag = DragState::Idle;
        self.rect = None;
    }

    /// Save to `path` via write-temp-then-rename, then re-open the written
    /// file as the new mapping. The document bytes are unchanged, so the
    /// cursor set and undo history stay valid; the save point advances.
    pub fn save_as(&mut self, path: &Path) -> Result<(), FileError> {
        binding::save_document(path, &self.table, self.encoding)?;
        self.path = Some(path.to_path_buf());

        match binding::open_document(path) {
            Ok((source, encoding)) => {
                self.table = PieceTable::from_source(source);
                self.encoding = encoding;
                self.lines.rebuild(&self.table);
                let len = self.table.len();
                self.cursors.clamp_to(len);
            }
            Err(err) => {
                // The save itself succeeded; keep editing the in-memory
                // pieces.
                log::warn!("could not re-map {} after save: {err}", path.display());
            }
        }

        self.history.mark_saved();
        Ok(())
    }

    // --- Intent dispatch -------------------------------------------------

    /// Route an editing intent to its implementation.
    pub fn apply(&mut self, intent: Intent) {
        match intent {
            Intent::Insert(text) => self.insert_text(&text),
            Intent::Backspace => self.backspace(),
            Intent::DeleteForward => self.delete_forward(),
            Intent::Paste(payload) => self.paste(&payload),
            Intent::DeleteLines => self.delete_lines(),
            Intent::MoveLinesUp => self.move_lines(true),
            Intent::MoveLinesDown => self.move_lines(false),
            Intent::DuplicateLinesUp => self.duplicate_lines(true),
            Intent::DuplicateLinesDown => self.duplicate_lines(false),
            Intent::ConvertCase { upper } => self.convert_case(upper),
            Intent::ReplaceAll {
                query,
                replacement,
                options,
            } => {
                self.replace_all(&query, &replacement, options);
            }
            Intent::Undo => {
                self.undo();
            }
            Intent::Redo => {
                self.redo();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Character-cell shaper for tests: every scalar is one cell wide.
    struct CellShaper {
        cell: f32,
    }

    impl CellShaper {
        fn boxed(cell: f32) -> Box<dyn Shaper> {
            Box::new(Self { cell })
        }
    }

    impl Shaper for CellShaper {
        fn x_in_line(&self, line: &str, byte_offset: usize) -> f32 {
            let offset = byte_offset.min(line.len());
            line[..offset].chars().count() as f32 * self.cell
        }

        fn offset_in_line_from_x(&self, line: &str, x: f32) -> usize {
            let mut acc = 0.0f32;
            for (idx, _) in line.char_indices() {
                if x < acc + self.cell * 0.5 {
                    return idx;
                }
                acc += self.cell;
            }
            line.len()
        }

        fn grapheme_step(&self, line: &str, byte_offset: usize, forward: bool) -> usize {
            let offset = byte_offset.min(line.len());
            if forward {
                line[offset..]
                    .chars()
                    .next()
                    .map(|c| offset + c.len_utf8())
                    .unwrap_or(offset)
            } else {
                line[..offset]
                    .chars()
                    .next_back()
                    .map(|c| offset - c.len_utf8())
                    .unwrap_or(0)
            }
        }

        fn reference_cell_width(&self) -> f32 {
            self.cell
        }
    }

    fn editor(text: &str) -> Editor {
        Editor::with_text(text, CellShaper::boxed(8.0))
    }

    #[test]
    fn test_insert_at_single_caret() {
        let mut ed = editor("");
        ed.insert_text("hello");
        assert_eq!(ed.text(), "hello");
        assert_eq!(ed.cursors().primary().head, 5);
        assert!(ed.is_modified());
    }

    #[test]
    fn test_insert_replaces_selection() {
        let mut ed = editor("hello world");
        ed.set_caret(0);
        ed.select_word_at(0);
        ed.insert_text("goodbye");
        assert_eq!(ed.text(), "goodbye world");
    }

    #[test]
    fn test_multi_caret_insert_shifts_all() {
        let mut ed = editor("a\nb\nc\n");
        ed.set_caret(0);
        ed.add_caret(2);
        ed.add_caret(4);
        ed.insert_text("X");
        assert_eq!(ed.text(), "Xa\nXb\nXc\n");
        let heads: Vec<usize> = ed.cursors().iter().map(|c| c.head).collect();
        assert_eq!(heads, vec![1, 4, 7]);
    }

    #[test]
    fn test_backspace_at_zero_is_noop() {
        let mut ed = editor("abc");
        ed.set_caret(0);
        ed.backspace();
        assert_eq!(ed.text(), "abc");
        assert!(!ed.can_undo());
    }

    #[test]
    fn test_backspace_erases_cluster() {
        let mut ed = editor("héllo");
        ed.set_caret(3); // after 'é' (2 bytes)
        ed.backspace();
        assert_eq!(ed.text(), "hllo");
        assert_eq!(ed.cursors().primary().head, 1);
    }

    #[test]
    fn test_delete_forward_at_end_is_noop() {
        let mut ed = editor("abc");
        ed.set_caret(3);
        ed.delete_forward();
        assert_eq!(ed.text(), "abc");
        assert!(!ed.can_undo());
    }

    #[test]
    fn test_virtual_space_typing_pads() {
        let mut ed = editor("ab\n");
        // Click at column 6 of line 0 in virtual mode.
        ed.set_caret_virtual(0, 6.0 * 8.0);
        assert!(ed.cursors().primary().virtual_space);
        ed.insert_text("X");
        assert_eq!(ed.text(), "ab    X\n");
        let primary = ed.cursors().primary();
        assert_eq!(primary.head, 7);
        assert!(!primary.virtual_space);
    }

    #[test]
    fn test_virtual_space_undo_removes_padding_too() {
        let mut ed = editor("ab\n");
        ed.set_caret_virtual(0, 6.0 * 8.0);
        ed.insert_text("X");
        ed.undo();
        assert_eq!(ed.text(), "ab\n");
    }

    #[test]
    fn test_virtual_backspace_retracts_without_batch() {
        let mut ed = editor("ab\n");
        ed.set_caret_virtual(0, 6.0 * 8.0);
        ed.backspace();
        assert_eq!(ed.text(), "ab\n");
        assert!(!ed.can_undo());
        let primary = ed.cursors().primary();
        assert!(primary.virtual_space);
        assert_eq!(primary.desired_x, 5.0 * 8.0);
    }

    #[test]
    fn test_undo_redo_round_trip() {
        let mut ed = editor("");
        ed.insert_text("hello world");
        ed.set_caret(5);
        ed.insert_text(",");
        assert_eq!(ed.text(), "hello, world");

        assert!(ed.undo());
        assert_eq!(ed.text(), "hello world");
        assert!(ed.undo());
        assert_eq!(ed.text(), "");
        assert!(!ed.is_modified());
        assert!(!ed.undo());

        assert!(ed.redo());
        assert!(ed.redo());
        assert_eq!(ed.text(), "hello, world");
    }

    #[test]
    fn test_undo_restores_cursor_set() {
        let mut ed = editor("a\nb\n");
        ed.set_caret(0);
        ed.add_caret(2);
        ed.insert_text("X");
        ed.undo();
        let heads: Vec<usize> = ed.cursors().iter().map(|c| c.head).collect();
        assert_eq!(heads, vec![0, 2]);
    }

    #[test]
    fn test_block_paste_spatial() {
        let mut ed = editor("abc\ndef\nghi\n");
        ed.set_caret(1);
        ed.block_paste("PQ\nRS\nTU");
        assert_eq!(ed.text(), "aPQbc\ndRSef\ngTUhi\n");
        let heads: Vec<usize> = ed.cursors().iter().map(|c| c.head).collect();
        assert_eq!(heads, vec![3, 9, 15]);
    }

    #[test]
    fn test_block_paste_pads_and_extends() {
        let mut ed = editor("abcdef\nx\n");
        ed.set_caret(4); // column 4 of line 0
        ed.block_paste("12\n34\n56");
        // Line 1 ("x") pads to column 4; the trailing empty line does too.
        assert_eq!(ed.text(), "abcd12ef\nx   34\n    56");
    }

    #[test]
    fn test_block_paste_synthesizes_lines() {
        let mut ed = editor("ab");
        ed.set_caret(2);
        ed.block_paste("1\n2");
        // A line is synthesized below EOF and padded to the base column.
        assert_eq!(ed.text(), "ab1\n  2");
    }

    #[test]
    fn test_move_line_down_across_eof() {
        let mut ed = editor("A\nB");
        ed.set_caret(0);
        ed.move_lines(false);
        assert_eq!(ed.text(), "B\nA\n");
        // The cursor rides the "A" line, now line 1.
        assert_eq!(ed.lines().line_of(ed.cursors().primary().head), 1);
    }

    #[test]
    fn test_move_line_up_and_undo() {
        let mut ed = editor("one\ntwo\nthree\n");
        ed.set_caret(4); // on "two"
        ed.move_lines(true);
        assert_eq!(ed.text(), "two\none\nthree\n");
        ed.undo();
        assert_eq!(ed.text(), "one\ntwo\nthree\n");
    }

    #[test]
    fn test_duplicate_line_down_repeats() {
        let mut ed = editor("ab\ncd\n");
        ed.set_caret(0);
        ed.duplicate_lines(false);
        assert_eq!(ed.text(), "ab\nab\ncd\n");
        // The cursor sits on the copy, so repeating duplicates again.
        ed.duplicate_lines(false);
        assert_eq!(ed.text(), "ab\nab\nab\ncd\n");
    }

    #[test]
    fn test_delete_line_collapses_cursor() {
        let mut ed = editor("one\ntwo\nthree\n");
        ed.set_caret(5);
        ed.delete_lines();
        assert_eq!(ed.text(), "one\nthree\n");
        assert_eq!(ed.cursors().primary().head, 4);
    }

    #[test]
    fn test_selection_ending_at_line_start_excludes_line() {
        let mut ed = editor("one\ntwo\nthree\n");
        ed.set_caret(0);
        ed.extend_primary_to(4); // selects "one\n" exactly
        ed.delete_lines();
        assert_eq!(ed.text(), "two\nthree\n");
    }

    #[test]
    fn test_convert_case_unicode_aware() {
        let mut ed = editor("straße");
        ed.select_all();
        ed.convert_case(true);
        assert_eq!(ed.text(), "STRASSE");
        ed.undo();
        assert_eq!(ed.text(), "straße");
    }

    #[test]
    fn test_convert_case_length_change_shifts_downstream() {
        // Dotless ı (2 bytes) uppercases to I (1 byte).
        let mut ed = editor("ı x");
        ed.set_caret(0);
        ed.extend_primary_to(2);
        ed.add_caret(3);
        ed.convert_case(true);
        assert_eq!(ed.text(), "I x");
        assert_eq!(ed.cursors().get(1).head, 2);
    }

    #[test]
    fn test_replace_all_regex_scenario() {
        let mut ed = editor("foo1 foo2 foo3");
        let count = ed.replace_all(
            r"foo(\d)",
            "bar$1",
            SearchOptions {
                regex: true,
                ..SearchOptions::default()
            },
        );
        assert_eq!(count, 3);
        assert_eq!(ed.text(), "bar1 bar2 bar3");
        assert_eq!(ed.undo_depth(), 1);
        ed.undo();
        assert_eq!(ed.text(), "foo1 foo2 foo3");
        assert!(!ed.is_modified());
    }

    #[test]
    fn test_replace_all_invalid_regex_changes_nothing() {
        let mut ed = editor("abc");
        let count = ed.replace_all(
            "(",
            "x",
            SearchOptions {
                regex: true,
                ..SearchOptions::default()
            },
        );
        assert_eq!(count, 0);
        assert_eq!(ed.text(), "abc");
        assert!(!ed.can_undo());
    }

    #[test]
    fn test_select_next_occurrence() {
        let mut ed = editor("cat dog cat bird cat");
        ed.set_caret(0);
        ed.select_next_occurrence(); // selects the word "cat"
        assert_eq!(ed.cursors().len(), 1);
        assert!(ed.cursors().primary().has_selection());

        ed.select_next_occurrence();
        assert_eq!(ed.cursors().len(), 2);
        ed.select_next_occurrence();
        assert_eq!(ed.cursors().len(), 3);
        // All occurrences taken: the wrap lands on covered matches.
        ed.select_next_occurrence();
        assert_eq!(ed.cursors().len(), 3);
    }

    #[test]
    fn test_drag_move_commits_one_batch() {
        let mut ed = editor("one two three");
        ed.set_caret(0);
        ed.extend_primary_to(3); // select "one"
        assert!(ed.pointer_down(1, 10.0, 10.0));
        ed.pointer_moved(8, 40.0, 10.0);
        ed.pointer_up(8);
        assert_eq!(ed.text(), " two onethree");
        assert_eq!(ed.undo_depth(), 1);
        ed.undo();
        assert_eq!(ed.text(), "one two three");
    }

    #[test]
    fn test_drag_without_motion_collapses() {
        let mut ed = editor("one two");
        ed.set_caret(0);
        ed.extend_primary_to(3);
        assert!(ed.pointer_down(1, 10.0, 10.0));
        ed.pointer_up(1);
        assert_eq!(ed.text(), "one two");
        assert!(!ed.cursors().primary().has_selection());
        assert_eq!(ed.cursors().primary().head, 1);
    }

    #[test]
    fn test_drag_into_source_is_noop() {
        let mut ed = editor("one two");
        ed.set_caret(0);
        ed.extend_primary_to(3);
        assert!(ed.pointer_down(1, 10.0, 10.0));
        ed.pointer_moved(2, 40.0, 10.0);
        ed.pointer_up(2);
        assert_eq!(ed.text(), "one two");
        assert!(!ed.can_undo());
    }

    #[test]
    fn test_rect_selection_and_typing() {
        let mut ed = editor("alpha\nbeta\ngamma\n");
        ed.rect_select_begin(0, 2.0 * 8.0);
        ed.rect_select_update(2, 2.0 * 8.0);
        assert!(ed.cursors().is_rectangular());
        assert_eq!(ed.cursors().len(), 3);
        ed.insert_text("_");
        assert_eq!(ed.text(), "al_pha\nbe_ta\nga_mma\n");
    }

    #[test]
    fn test_rect_selection_virtual_column() {
        let mut ed = editor("abcdef\nx\n");
        ed.rect_select_begin(0, 4.0 * 8.0);
        ed.rect_select_update(1, 4.0 * 8.0);
        // Line 1 is shorter than the column: its cursor floats virtually.
        assert!(ed.cursors().get(1).virtual_space);
        ed.insert_text("!");
        assert_eq!(ed.text(), "abcd!ef\nx   !\n");
    }

    #[test]
    fn test_copy_carries_rectangular_bit() {
        let mut ed = editor("ab\ncd\n");
        ed.rect_select_begin(0, 0.0);
        ed.rect_select_update(1, 2.0 * 8.0);
        ed.rect_select_end();
        let payload = ed.copy().unwrap();
        assert!(payload.rectangular);
        assert_eq!(payload.text, "ab\ncd");
    }

    #[test]
    fn test_multi_caret_paste_distributes_lines() {
        let mut ed = editor("x\ny\n");
        ed.set_caret(0);
        ed.add_caret(2);
        ed.paste(&ClipboardPayload::plain("1\n2"));
        assert_eq!(ed.text(), "1x\n2y\n");
    }

    #[test]
    fn test_cut_removes_selection_and_restores_on_undo() {
        let mut ed = editor("hello world");
        ed.select_word_at(0);
        let payload = ed.cut().unwrap();
        assert_eq!(payload.text, "hello");
        assert_eq!(ed.text(), " world");
        ed.undo();
        assert_eq!(ed.text(), "hello world");
        assert!(ed.cursors().primary().has_selection());
    }

    #[test]
    fn test_word_motion() {
        let ed = editor("foo bar_baz  qux");
        // A word step lands at the start of the next word.
        assert_eq!(ed.word_right(0), 4);
        assert_eq!(ed.word_right(4), 13);
        assert_eq!(ed.word_left(16), 13);
        assert_eq!(ed.word_left(13), 4);
        assert_eq!(ed.word_left(0), 0);
        assert_eq!(ed.word_right(16), 16);
    }

    #[test]
    fn test_vertical_motion_keeps_desired_x() {
        let mut ed = editor("longline\nab\nlongline\n");
        ed.set_caret(6); // column 6 on line 0
        ed.move_vertical(1, false);
        // Line 1 is short: caret clamps to its end.
        assert_eq!(ed.cursors().primary().head, 11);
        ed.move_vertical(1, false);
        // Back out to column 6 on line 2.
        assert_eq!(ed.cursors().primary().head, 18);
    }

    #[test]
    fn test_shaper_swap_rescales_desired_x() {
        let mut ed = editor("abcd");
        ed.set_caret(2);
        let x_before = ed.cursors().primary().desired_x;
        ed.set_shaper(CellShaper::boxed(16.0));
        assert_eq!(ed.cursors().primary().desired_x, x_before * 2.0);
    }

    #[test]
    fn test_escape_collapses_to_primary() {
        let mut ed = editor("a b c");
        ed.set_caret(0);
        ed.add_caret(2);
        ed.add_caret(4);
        ed.collapse_selections();
        assert_eq!(ed.cursors().len(), 1);
        assert_eq!(ed.cursors().primary().head, 4);
    }

    #[test]
    fn test_ime_composition_lifecycle() {
        let mut ed = editor("");
        ed.ime_update("にほ");
        assert_eq!(ed.composition(), Some("にほ"));
        assert_eq!(ed.text(), "");
        ed.ime_commit("日本");
        assert_eq!(ed.composition(), None);
        assert_eq!(ed.text(), "日本");
        ed.ime_update("x");
        ed.ime_cancel();
        assert_eq!(ed.composition(), None);
        assert_eq!(ed.text(), "日本");
    }

    #[test]
    fn test_intent_dispatch() {
        let mut ed = editor("");
        ed.apply(Intent::Insert("abc".into()));
        ed.apply(Intent::Backspace);
        assert_eq!(ed.text(), "ab");
        ed.apply(Intent::Undo);
        assert_eq!(ed.text(), "abc");
        ed.apply(Intent::Redo);
        assert_eq!(ed.text(), "ab");
    }
}
