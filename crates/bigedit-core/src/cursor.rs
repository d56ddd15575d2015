//! Cursors and the cursor set.
//!
//! A cursor is a logical byte range (head + anchor) plus the visual state
//! that survives vertical movement and virtual-space editing: the desired X
//! coordinate, the X its anchor had when the cursor was created, and whether
//! the cursor currently floats past the physical end of its line.
//!
//! In single-caret mode the set holds one cursor; in multi-caret mode it
//! holds several, which collectively represent either independent carets or
//! a rectangular selection. The two are indistinguishable from shape alone,
//! so the set carries a flag set at creation time; it drives copy/paste
//! semantics.

/// One caret or selection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cursor {
    /// Current caret byte position.
    pub head: usize,
    /// Selection origin; equal to `head` when nothing is selected.
    pub anchor: usize,
    /// Visual X the cursor wants to sit at (document coordinates).
    pub desired_x: f32,
    /// Visual X the anchor had when the cursor was created or last reset.
    pub original_anchor_x: f32,
    /// True only while `desired_x` exceeds the X of the head's physical
    /// line end (the cursor floats in virtual space).
    pub virtual_space: bool,
}

impl Cursor {
    /// A collapsed caret at `pos`.
    pub fn caret(pos: usize, x: f32) -> Self {
        Self {
            head: pos,
            anchor: pos,
            desired_x: x,
            original_anchor_x: x,
            virtual_space: false,
        }
    }

    /// A selection from `anchor` to `head`.
    pub fn selection(head: usize, anchor: usize, x: f32) -> Self {
        Self {
            head,
            anchor,
            desired_x: x,
            original_anchor_x: x,
            virtual_space: false,
        }
    }

    /// Lower end of the selected range.
    pub fn start(&self) -> usize {
        self.head.min(self.anchor)
    }

    /// Upper end of the selected range (exclusive).
    pub fn end(&self) -> usize {
        self.head.max(self.anchor)
    }

    /// Whether this cursor selects anything.
    pub fn has_selection(&self) -> bool {
        self.head != self.anchor
    }

    /// Forward means the head sits at or after the anchor.
    pub fn is_forward(&self) -> bool {
        self.head >= self.anchor
    }

    /// Drop the selection, keeping the head.
    pub fn collapse(&mut self) {
        self.anchor = self.head;
    }
}

/// Non-empty ordered collection of cursors. The last cursor is primary.
#[derive(Debug, Clone, PartialEq)]
pub struct CursorSet {
    cursors: Vec<Cursor>,
    rectangular: bool,
}

impl CursorSet {
    /// A set holding a single collapsed caret at `pos`.
    pub fn caret(pos: usize) -> Self {
        Self {
            cursors: vec![Cursor::caret(pos, 0.0)],
            rectangular: false,
        }
    }

    /// A set holding a single cursor.
    pub fn single(cursor: Cursor) -> Self {
        Self {
            cursors: vec![cursor],
            rectangular: false,
        }
    }

    /// Build from a cursor list. An empty list degenerates to a caret at 0
    /// so the set stays non-empty.
    pub fn from_cursors(cursors: Vec<Cursor>, rectangular: bool) -> Self {
        let cursors = if cursors.is_empty() {
            vec![Cursor::caret(0, 0.0)]
        } else {
            cursors
        };
        Self {
            cursors,
            rectangular,
        }
    }

    /// Number of cursors (≥ 1).
    pub fn len(&self) -> usize {
        self.cursors.len()
    }

    /// Always false; the set is never empty.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Whether this set was created by a rectangular gesture.
    pub fn is_rectangular(&self) -> bool {
        self.rectangular
    }

    /// Flip the rectangular marker (set at gesture time).
    pub fn set_rectangular(&mut self, rectangular: bool) {
        self.rectangular = rectangular;
    }

    /// The primary cursor (last in the set).
    pub fn primary(&self) -> &Cursor {
        self.cursors.last().expect("cursor set is never empty")
    }

    /// Mutable primary cursor.
    pub fn primary_mut(&mut self) -> &mut Cursor {
        self.cursors.last_mut().expect("cursor set is never empty")
    }

    /// Iterate cursors in set order.
    pub fn iter(&self) -> std::slice::Iter<'_, Cursor> {
        self.cursors.iter()
    }

    /// Iterate cursors mutably.
    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Cursor> {
        self.cursors.iter_mut()
    }

    /// Borrow a cursor by index.
    pub fn get(&self, idx: usize) -> &Cursor {
        &self.cursors[idx]
    }

    /// Borrow a cursor mutably by index.
    pub fn get_mut(&mut self, idx: usize) -> &mut Cursor {
        &mut self.cursors[idx]
    }

    /// Append a cursor; it becomes primary.
    pub fn push(&mut self, cursor: Cursor) {
        self.cursors.push(cursor);
    }

    /// Replace every cursor, preserving the non-empty invariant.
    pub fn replace(&mut self, cursors: Vec<Cursor>) {
        if cursors.is_empty() {
            return;
        }
        self.cursors = cursors;
    }

    /// Cursor indices ordered by descending selection start, the order in
    /// which edits must be applied so an edit at offset p does not perturb
    /// pending edits at offsets > p.
    pub fn indices_by_start_desc(&self) -> Vec<usize> {
        let mut indices: Vec<usize> = (0..self.cursors.len()).collect();
        indices.sort_by(|&a, &b| self.cursors[b].start().cmp(&self.cursors[a].start()));
        indices
    }

    /// Cursors ordered by ascending selection start (copy order).
    pub fn sorted_by_start(&self) -> Vec<Cursor> {
        let mut sorted = self.cursors.clone();
        sorted.sort_by_key(|c| c.start());
        sorted
    }

    /// Shift every cursor for an insert of `len` bytes at `pos`: positions
    /// at or after `pos` move right. The anchor follows the same rule.
    pub fn shift_for_insert(&mut self, pos: usize, len: usize) {
        for cursor in &mut self.cursors {
            if cursor.head >= pos {
                cursor.head += len;
            }
            if cursor.anchor >= pos {
                cursor.anchor += len;
            }
        }
    }

    /// Shift every cursor for an erase of `len` bytes at `pos`: positions
    /// past the erased span move left; positions inside it clamp to `pos`.
    pub fn shift_for_erase(&mut self, pos: usize, len: usize) {
        let shift = |p: usize| {
            if p <= pos {
                p
            } else if p >= pos + len {
                p - len
            } else {
                pos
            }
        };
        for cursor in &mut self.cursors {
            cursor.head = shift(cursor.head);
            cursor.anchor = shift(cursor.anchor);
        }
    }

    /// Clamp every position into `[0, doc_len]`.
    pub fn clamp_to(&mut self, doc_len: usize) {
        for cursor in &mut self.cursors {
            cursor.head = cursor.head.min(doc_len);
            cursor.anchor = cursor.anchor.min(doc_len);
        }
    }

    /// Sort by head and coalesce overlapping cursors, preserving the
    /// directionality of the earlier cursor in each merge.
    pub fn merge_overlapping(&mut self) {
        if self.cursors.len() < 2 {
            return;
        }
        self.cursors.sort_by_key(|c| c.head);

        let mut merged: Vec<Cursor> = Vec::with_capacity(self.cursors.len());
        merged.push(self.cursors[0]);
        for &cursor in &self.cursors[1..] {
            let prev = merged.last_mut().expect("non-empty");
            if cursor.start() <= prev.end() {
                let new_start = prev.start().min(cursor.start());
                let new_end = prev.end().max(cursor.end());
                if prev.is_forward() {
                    prev.anchor = new_start;
                    prev.head = new_end;
                } else {
                    prev.anchor = new_end;
                    prev.head = new_start;
                }
            } else {
                merged.push(cursor);
            }
        }
        self.cursors = merged;
    }

    /// Collapse the whole set to the primary cursor with its selection
    /// dropped (the Escape gesture).
    pub fn collapse_to_primary(&mut self) {
        let mut primary = *self.primary();
        primary.collapse();
        self.cursors = vec![primary];
        self.rectangular = false;
    }
}
