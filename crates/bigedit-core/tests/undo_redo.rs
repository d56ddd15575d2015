//! Undo/redo behavior across every batch-producing intent.
//!
//! The law under test: for any batch, undo-then-redo and redo-then-undo are
//! no-ops on the document, and the cursor sets snap back to the batch's
//! before/after snapshots.

use bigedit_core::{ClipboardPayload, Editor, SearchOptions};
use bigedit_core_mono::MonoShaper;

fn editor(text: &str) -> Editor {
    Editor::with_text(text, Box::new(MonoShaper::new(1.0)))
}

/// Drive `op`, then check undo/redo round-trips the document exactly.
fn assert_round_trip(initial: &str, op: impl FnOnce(&mut Editor)) {
    let mut ed = editor(initial);
    op(&mut ed);
    let after = ed.text();
    let cursors_after = ed.cursors().clone();

    assert!(ed.undo(), "operation should have produced a batch");
    assert_eq!(ed.text(), initial, "undo must restore the document");

    assert!(ed.redo());
    assert_eq!(ed.text(), after, "redo must reproduce the document");
    assert_eq!(
        ed.cursors(),
        &cursors_after,
        "redo must restore the after-cursors"
    );

    assert!(ed.undo());
    assert_eq!(ed.text(), initial);
}

#[test]
fn test_round_trip_insert_multi_caret() {
    assert_round_trip("a\nb\nc\n", |ed| {
        ed.set_caret(0);
        ed.add_caret(2);
        ed.add_caret(4);
        ed.insert_text("--");
    });
}

#[test]
fn test_round_trip_backspace_over_selection() {
    assert_round_trip("hello world", |ed| {
        ed.select_word_at(6);
        ed.backspace();
    });
}

#[test]
fn test_round_trip_delete_lines() {
    assert_round_trip("one\ntwo\nthree\nfour\n", |ed| {
        ed.set_caret(4);
        ed.add_caret(14);
        ed.delete_lines();
    });
}

#[test]
fn test_round_trip_move_lines() {
    assert_round_trip("one\ntwo\nthree", |ed| {
        ed.set_caret(4);
        ed.move_lines(false);
    });
}

#[test]
fn test_round_trip_duplicate_lines() {
    assert_round_trip("one\ntwo", |ed| {
        ed.set_caret(5);
        ed.duplicate_lines(false);
    });
}

#[test]
fn test_round_trip_block_paste() {
    assert_round_trip("abc\nd\n", |ed| {
        ed.set_caret(2);
        ed.paste(&ClipboardPayload::rectangular("12\n34\n56"));
    });
}

#[test]
fn test_round_trip_replace_all() {
    assert_round_trip("x a x b x", |ed| {
        ed.replace_all("x", "yy", SearchOptions::default());
    });
}

#[test]
fn test_round_trip_case_conversion() {
    assert_round_trip("große straße", |ed| {
        ed.select_all();
        ed.convert_case(true);
    });
}

#[test]
fn test_undo_restores_before_cursors() {
    let mut ed = editor("one two three");
    ed.set_caret(4);
    ed.select_next_occurrence(); // selects "two"
    let before = ed.cursors().clone();
    ed.insert_text("2");
    ed.undo();
    assert_eq!(ed.cursors(), &before);
}

#[test]
fn test_new_edit_clears_redo() {
    let mut ed = editor("");
    ed.insert_text("a");
    ed.insert_text("b");
    ed.undo();
    assert!(ed.can_redo());

    ed.insert_text("c");
    assert!(!ed.can_redo());
    assert_eq!(ed.text(), "ac");
}

#[test]
fn test_undo_depth_counts_batches_not_ops() {
    let mut ed = editor("a\nb\nc\n");
    ed.set_caret(0);
    ed.add_caret(2);
    ed.add_caret(4);
    // Three cursors, one intent: exactly one batch.
    ed.insert_text("X");
    assert_eq!(ed.undo_depth(), 1);
    ed.undo();
    assert_eq!(ed.text(), "a\nb\nc\n");
}

#[test]
fn test_cursor_only_moves_are_not_undoable() {
    let mut ed = editor("hello\nworld\n");
    ed.set_caret(3);
    ed.move_vertical(1, false);
    ed.move_horizontal(true, false, false);
    ed.select_all();
    ed.collapse_selections();
    assert!(!ed.can_undo());
    assert!(!ed.is_modified());
}
