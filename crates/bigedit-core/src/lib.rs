#![warn(missing_docs)]
//! `bigedit-core` - Headless editing core for very large files.
//!
//! # Overview
//!
//! `bigedit-core` is the editing kernel of a text editor built to open
//! gigabyte-scale files instantly: the document is a piece table over a
//! read-only file mapping plus an append-only add buffer, so no edit ever
//! copies the original bytes. It is headless: drawing, shaping, clipboard
//! transport, and input decoding belong to the host. The crate covers:
//!
//! - **Storage**: piece table with O(pieces) insert/erase ([`storage`])
//! - **Line access**: line-start index rebuilt per mutation ([`line_index`])
//! - **Selection model**: multi-caret and rectangular selections with
//!   virtual space ([`cursor`])
//! - **Coordinate mapping**: byte offset ↔ visual X through an abstract
//!   shaper ([`layout`])
//! - **Editing**: atomic multi-cursor edit batches with undo/redo and a
//!   save point ([`editor`], [`history`])
//! - **Search**: literal/regex find and replace-all ([`search`])
//! - **File binding**: BOM-aware open over a mapping, atomic
//!   write-temp-then-rename save ([`binding`])
//!
//! # Architecture Layers
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │  Edit Engine (intents, undo/redo, gestures) │  ← Public API
//! ├─────────────────────────────────────────────┤
//! │  Cursor Set (multi-caret, rect, virtual X)  │  ← Selection model
//! ├─────────────────────────────────────────────┤
//! │  Layout Oracle (host shaper trait)          │  ← Coordinate mapping
//! ├─────────────────────────────────────────────┤
//! │  Line Index (line-start offsets)            │  ← Line access
//! ├─────────────────────────────────────────────┤
//! │  Piece Table (mapping ∪ add buffer)         │  ← Text storage
//! └─────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```rust
//! use bigedit_core::{Editor, Shaper};
//!
//! # struct Mono;
//! # impl Shaper for Mono {
//! #     fn x_in_line(&self, line: &str, o: usize) -> f32 {
//! #         line[..o.min(line.len())].chars().count() as f32
//! #     }
//! #     fn offset_in_line_from_x(&self, line: &str, x: f32) -> usize {
//! #         line.char_indices().nth(x as usize).map(|(i, _)| i).unwrap_or(line.len())
//! #     }
//! #     fn grapheme_step(&self, line: &str, o: usize, fwd: bool) -> usize {
//! #         if fwd { line[o..].chars().next().map(|c| o + c.len_utf8()).unwrap_or(o) }
//! #         else { line[..o].chars().next_back().map(|c| o - c.len_utf8()).unwrap_or(0) }
//! #     }
//! #     fn reference_cell_width(&self) -> f32 { 1.0 }
//! # }
//! let mut editor = Editor::new(Box::new(Mono));
//! editor.insert_text("hello world\n");
//! editor.set_caret(5);
//! editor.insert_text(",");
//! assert_eq!(editor.text(), "hello, world\n");
//!
//! editor.undo();
//! editor.undo();
//! assert_eq!(editor.text(), "");
//! assert!(!editor.is_modified());
//! ```
//!
//! # Concurrency
//!
//! The core is single-threaded cooperative: one owner thread drives every
//! intent, and no primitive yields or fails. Undo/redo, find, replace-all,
//! and the line-index rebuild are O(document) worst case; hosts that need
//! them off-thread can run them on a copy and apply the resulting
//! [`history::EditBatch`] verbatim.

pub mod binding;
pub mod clipboard;
pub mod cursor;
pub mod editor;
pub mod history;
pub mod layout;
pub mod line_index;
pub mod search;
pub mod storage;

pub use binding::{Encoding, FileError, MappedFile};
pub use clipboard::{Clipboard, ClipboardPayload, MemoryClipboard};
pub use cursor::{Cursor, CursorSet};
pub use editor::{DragState, Editor, Intent};
pub use history::{EditBatch, EditOp, UndoLog};
pub use layout::Shaper;
pub use line_index::LineIndex;
pub use search::{SearchMatch, SearchOptions};
pub use storage::{OriginalSource, Piece, PieceTable};
