//! Find and replace through the engine.

use bigedit_core::{Editor, SearchOptions};
use bigedit_core_mono::MonoShaper;

fn editor(text: &str) -> Editor {
    Editor::with_text(text, Box::new(MonoShaper::new(1.0)))
}

fn regex() -> SearchOptions {
    SearchOptions {
        regex: true,
        ..Default::default()
    }
}

#[test]
fn test_find_selects_match() {
    let mut ed = editor("one two one");
    ed.set_caret(0);
    let found = ed.find_next("two", SearchOptions::default(), true);
    assert_eq!(found, Some((4, 7)));

    let primary = ed.cursors().primary();
    assert_eq!(primary.start(), 4);
    assert_eq!(primary.end(), 7);
}

#[test]
fn test_find_advances_past_current_selection() {
    let mut ed = editor("ab ab ab");
    ed.set_caret(0);
    ed.find_next("ab", SearchOptions::default(), true);
    assert_eq!(ed.cursors().primary().start(), 0);
    ed.find_next("ab", SearchOptions::default(), true);
    assert_eq!(ed.cursors().primary().start(), 3);
    ed.find_next("ab", SearchOptions::default(), true);
    assert_eq!(ed.cursors().primary().start(), 6);
    // Wraps around exactly once.
    ed.find_next("ab", SearchOptions::default(), true);
    assert_eq!(ed.cursors().primary().start(), 0);
}

#[test]
fn test_find_backward() {
    let mut ed = editor("ab ab ab");
    ed.set_caret(7);
    ed.find_next("ab", SearchOptions::default(), false);
    assert_eq!(ed.cursors().primary().start(), 6);
    ed.find_next("ab", SearchOptions::default(), false);
    assert_eq!(ed.cursors().primary().start(), 3);
}

#[test]
fn test_find_missing_returns_none_and_keeps_cursors() {
    let mut ed = editor("hello");
    ed.set_caret(2);
    let before = ed.cursors().clone();
    assert_eq!(ed.find_next("zzz", SearchOptions::default(), true), None);
    assert_eq!(ed.cursors(), &before);
}

#[test]
fn test_find_whole_word_skips_substrings() {
    let mut ed = editor("scatter cat concatenate");
    ed.set_caret(0);
    let options = SearchOptions {
        whole_word: true,
        ..Default::default()
    };
    assert_eq!(ed.find_next("cat", options, true), Some((8, 11)));
}

#[test]
fn test_find_case_insensitive() {
    let mut ed = editor("Hello HELLO hello");
    ed.set_caret(0);
    let options = SearchOptions {
        match_case: false,
        ..Default::default()
    };
    assert_eq!(ed.find_next("hello", options, true), Some((0, 5)));
    assert_eq!(ed.find_next("hello", options, true), Some((6, 11)));
}

#[test]
fn test_invalid_regex_is_no_match() {
    let mut ed = editor("abc");
    ed.set_caret(1);
    let before = ed.cursors().clone();
    assert_eq!(ed.find_next("(unclosed", regex(), true), None);
    assert_eq!(ed.cursors(), &before);
    assert_eq!(ed.replace_all("(unclosed", "x", regex()), 0);
    assert_eq!(ed.text(), "abc");
}

#[test]
fn test_replace_all_count_and_single_batch() {
    let mut ed = editor("x.x.x.x");
    let count = ed.replace_all("x", "yz", SearchOptions::default());
    assert_eq!(count, 4);
    assert_eq!(ed.text(), "yz.yz.yz.yz");
    assert_eq!(ed.undo_depth(), 1);
}

#[test]
fn test_replace_all_does_not_rescan_replacements() {
    // Replacing "aa" with "a" must halve the run, not cascade.
    let mut ed = editor("aaaa");
    let count = ed.replace_all("aa", "a", SearchOptions::default());
    assert_eq!(count, 2);
    assert_eq!(ed.text(), "aa");
}

#[test]
fn test_replace_all_with_empty_replacement() {
    let mut ed = editor("a-b-c");
    let count = ed.replace_all("-", "", SearchOptions::default());
    assert_eq!(count, 2);
    assert_eq!(ed.text(), "abc");
    ed.undo();
    assert_eq!(ed.text(), "a-b-c");
}

#[test]
fn test_replace_all_regex_captures() {
    let mut ed = editor("key=1; other=22;");
    let count = ed.replace_all(r"(\w+)=(\d+)", "$2:$1", regex());
    assert_eq!(count, 2);
    assert_eq!(ed.text(), "1:key; 22:other;");
}

#[test]
fn test_replace_all_multiline_regex() {
    let mut ed = editor("a\nb\na\n");
    let count = ed.replace_all("^a$", "X", regex());
    assert_eq!(count, 2);
    assert_eq!(ed.text(), "X\nb\nX\n");
}

#[test]
fn test_select_next_occurrence_flow() {
    let mut ed = editor("num + num * num");
    ed.set_caret(1);
    ed.select_next_occurrence();
    assert_eq!(ed.cursors().len(), 1);
    assert_eq!(ed.cursors().primary().start(), 0);

    ed.select_next_occurrence();
    ed.select_next_occurrence();
    assert_eq!(ed.cursors().len(), 3);

    // Typing replaces all three occurrences at once.
    ed.insert_text("n");
    assert_eq!(ed.text(), "n + n * n");
}
