//! Terminal host for the `bigedit` editing core.
//!
//! Usage:
//!
//! ```bash
//! tui-bigedit [file]
//! ```
//!
//! The single optional positional argument is the file to open; the process
//! exits non-zero when that open fails. There are no flags.
//!
//! # Keys
//!
//! - Arrows: move (Shift selects, Ctrl moves by word)
//! - Alt+Shift+Arrows: rectangular selection
//! - Home/End, PageUp/PageDown, Ctrl+Home/Ctrl+End
//! - Ctrl+S: save (prompts for a path when the buffer is untitled)
//! - Ctrl+Q: quit (asks when there are unsaved changes)
//! - Ctrl+Z / Ctrl+Y: undo / redo
//! - Ctrl+C / Ctrl+X / Ctrl+V: copy / cut / paste
//! - Ctrl+A: select all, Ctrl+D: select next occurrence
//! - Ctrl+F: find (Enter searches; F3 / Shift+F3 repeat)
//! - Ctrl+H: replace all (two prompts: find, then replacement)
//! - Alt+C / Alt+W / Alt+R in a prompt: toggle case / word / regex
//! - Ctrl+K: delete line(s), Alt+D / Alt+Shift+D: duplicate down / up
//! - Alt+Up / Alt+Down: move line(s)
//! - Alt+U / Alt+L: UPPER / lower case
//! - Esc: collapse to a single caret (or cancel a prompt)

use std::io::{self, stdout};
use std::path::PathBuf;
use std::time::Duration;
use std::{env, process};

use bigedit_core::{
    Clipboard, ClipboardPayload, Editor, MemoryClipboard, SearchOptions,
};
use bigedit_core_mono::MonoShaper;
use crossterm::event::{
    self, DisableBracketedPaste, EnableBracketedPaste, Event, KeyCode, KeyEvent, KeyEventKind,
    KeyModifiers,
};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::Paragraph;
use ratatui::{Frame, Terminal};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InputMode {
    Normal,
    Find,
    ReplaceFind,
    ReplaceWith,
    SavePath,
    ConfirmQuit,
}

struct App {
    editor: Editor,
    clipboard: MemoryClipboard,
    input_mode: InputMode,
    prompt: String,
    last_query: String,
    pending_query: String,
    search_options: SearchOptions,
    scroll_row: usize,
    scroll_col: u16,
    page_rows: usize,
    status: String,
    should_quit: bool,
}

impl App {
    fn new(path: Option<PathBuf>) -> Result<Self, String> {
        let mut editor = Editor::new(Box::new(MonoShaper::new(1.0)));
        if let Some(path) = &path {
            editor
                .open(path)
                .map_err(|err| err.to_string())?;
        }

        Ok(Self {
            editor,
            clipboard: MemoryClipboard::new(),
            input_mode: InputMode::Normal,
            prompt: String::new(),
            last_query: String::new(),
            pending_query: String::new(),
            search_options: SearchOptions::default(),
            scroll_row: 0,
            scroll_col: 0,
            page_rows: 1,
            status: String::new(),
            should_quit: false,
        })
    }

    // --- Rendering -------------------------------------------------------

    fn render(&mut self, frame: &mut Frame) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Min(1),
                Constraint::Length(1),
                Constraint::Length(1),
            ])
            .split(frame.area());

        self.page_rows = chunks[0].height.max(1) as usize;
        self.ensure_caret_visible(chunks[0]);

        self.render_text(frame, chunks[0]);
        self.render_status(frame, chunks[1]);
        self.render_prompt(frame, chunks[2]);
    }

    fn render_text(&self, frame: &mut Frame, area: Rect) {
        let selection_style = Style::default().bg(Color::Blue).fg(Color::White);
        let caret_style = Style::default().add_modifier(Modifier::REVERSED);

        let mut rows: Vec<Line> = Vec::with_capacity(area.height as usize);
        let last_line = self.editor.line_count() - 1;

        for row in 0..area.height as usize {
            let line = self.scroll_row + row;
            if line > last_line {
                break;
            }
            let start = self.editor.lines().line_start(line);
            let text = self.editor.line_text(line);

            let mut spans: Vec<Span> = Vec::new();
            for (offset, ch) in text.char_indices() {
                let pos = start + offset;
                let style = if self.caret_at(pos) {
                    caret_style
                } else if self.selected_at(pos) {
                    selection_style
                } else {
                    Style::default()
                };
                spans.push(Span::styled(ch.to_string(), style));
            }

            // Carets at or past the end of the line (virtual space).
            let end_pos = start + text.len();
            let end_col = text.len();
            let mut tail_cols: Vec<usize> = self
                .editor
                .cursors()
                .iter()
                .filter(|c| c.head == end_pos && self.editor.lines().line_of(c.head) == line)
                .map(|c| {
                    if c.virtual_space {
                        c.desired_x.round() as usize
                    } else {
                        end_col
                    }
                })
                .collect();
            tail_cols.sort_unstable();
            let mut col = end_col;
            for tail in tail_cols {
                while col < tail {
                    spans.push(Span::raw(" "));
                    col += 1;
                }
                spans.push(Span::styled(" ", caret_style));
                col += 1;
            }

            rows.push(Line::from(spans));
        }

        let paragraph = Paragraph::new(rows).scroll((0, self.scroll_col));
        frame.render_widget(paragraph, area);
    }

    fn caret_at(&self, pos: usize) -> bool {
        self.editor
            .cursors()
            .iter()
            .any(|c| !c.virtual_space && c.head == pos)
    }

    fn selected_at(&self, pos: usize) -> bool {
        self.editor
            .cursors()
            .iter()
            .any(|c| c.has_selection() && pos >= c.start() && pos < c.end())
    }

    fn render_status(&self, frame: &mut Frame, area: Rect) {
        let primary = self.editor.cursors().primary();
        let line = self.editor.lines().line_of(primary.head);
        let col = self.editor.x_at(primary.head).round() as usize;

        let name = self
            .editor
            .path()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "[untitled]".to_string());
        let dirty = if self.editor.is_modified() { "*" } else { "" };
        let cursors = self.editor.cursors().len();
        let text = format!(
            " {name}{dirty}  {}  Ln {}, Col {}  {cursors} cursor(s)",
            self.editor.encoding().label(),
            line + 1,
            col + 1,
        );
        let style = Style::default().bg(Color::DarkGray).fg(Color::White);
        frame.render_widget(Paragraph::new(text).style(style), area);
    }

    fn render_prompt(&self, frame: &mut Frame, area: Rect) {
        let text = match self.input_mode {
            InputMode::Normal => self.status.clone(),
            InputMode::Find => format!("Find{}: {}", self.option_tags(), self.prompt),
            InputMode::ReplaceFind => {
                format!("Replace - find{}: {}", self.option_tags(), self.prompt)
            }
            InputMode::ReplaceWith => format!(
                "Replace '{}' with: {}",
                self.pending_query, self.prompt
            ),
            InputMode::SavePath => format!("Save as: {}", self.prompt),
            InputMode::ConfirmQuit => "Unsaved changes. Save before quitting? (y/n/Esc)".into(),
        };
        frame.render_widget(Paragraph::new(text), area);
    }

    fn option_tags(&self) -> String {
        let mut tags = String::new();
        if !self.search_options.match_case {
            tags.push_str(" [i]");
        }
        if self.search_options.whole_word {
            tags.push_str(" [w]");
        }
        if self.search_options.regex {
            tags.push_str(" [re]");
        }
        tags
    }

    fn ensure_caret_visible(&mut self, area: Rect) {
        let rows = area.height.max(1) as usize;
        let primary = self.editor.cursors().primary();
        let line = self.editor.lines().line_of(primary.head);

        if line < self.scroll_row {
            self.scroll_row = line;
        } else if line >= self.scroll_row + rows {
            self.scroll_row = line + 1 - rows;
        }

        let col = if primary.virtual_space {
            primary.desired_x.round() as usize
        } else {
            self.editor.x_at(primary.head).round() as usize
        };
        let width = area.width.max(1) as usize;
        if col < self.scroll_col as usize {
            self.scroll_col = col as u16;
        } else if col >= self.scroll_col as usize + width {
            self.scroll_col = (col + 1 - width) as u16;
        }
    }

    // --- Input -----------------------------------------------------------

    fn handle_key(&mut self, key: KeyEvent) {
        if key.kind != KeyEventKind::Press && key.kind != KeyEventKind::Repeat {
            return;
        }
        self.status.clear();

        match self.input_mode {
            InputMode::Normal => self.handle_normal_key(key),
            InputMode::ConfirmQuit => self.handle_confirm_quit_key(key),
            _ => self.handle_prompt_key(key),
        }
    }

    fn handle_normal_key(&mut self, key: KeyEvent) {
        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        let alt = key.modifiers.contains(KeyModifiers::ALT);
        let shift = key.modifiers.contains(KeyModifiers::SHIFT);

        match key.code {
            KeyCode::Char('q') if ctrl => self.request_quit(),
            KeyCode::Char('s') if ctrl => self.save(),
            KeyCode::Char('z') if ctrl => {
                if !self.editor.undo() {
                    self.status = "Nothing to undo".into();
                }
            }
            KeyCode::Char('y') if ctrl => {
                if !self.editor.redo() {
                    self.status = "Nothing to redo".into();
                }
            }
            KeyCode::Char('a') if ctrl => self.editor.select_all(),
            KeyCode::Char('d') if ctrl => self.editor.select_next_occurrence(),
            KeyCode::Char('c') if ctrl => {
                if let Some(payload) = self.editor.copy() {
                    self.clipboard.write(payload);
                }
            }
            KeyCode::Char('x') if ctrl => {
                if let Some(payload) = self.editor.cut() {
                    self.clipboard.write(payload);
                }
            }
            KeyCode::Char('v') if ctrl => {
                if let Some(payload) = self.clipboard.read() {
                    self.editor.paste(&payload);
                }
            }
            KeyCode::Char('f') if ctrl => {
                self.input_mode = InputMode::Find;
                self.prompt.clear();
            }
            KeyCode::Char('h') if ctrl => {
                self.input_mode = InputMode::ReplaceFind;
                self.prompt.clear();
            }
            KeyCode::Char('k') if ctrl => self.editor.delete_lines(),
            KeyCode::F(3) => self.repeat_find(!shift),
            KeyCode::Char('d' | 'D') if alt => self.editor.duplicate_lines(shift),
            KeyCode::Char('u' | 'U') if alt => self.editor.convert_case(true),
            KeyCode::Char('l' | 'L') if alt => self.editor.convert_case(false),
            KeyCode::Up if alt && shift => self.editor.rect_select_step(0, -1),
            KeyCode::Down if alt && shift => self.editor.rect_select_step(0, 1),
            KeyCode::Left if alt && shift => self.editor.rect_select_step(-1, 0),
            KeyCode::Right if alt && shift => self.editor.rect_select_step(1, 0),
            KeyCode::Up if alt => self.editor.move_lines(true),
            KeyCode::Down if alt => self.editor.move_lines(false),
            KeyCode::Left => self.editor.move_horizontal(false, ctrl, shift),
            KeyCode::Right => self.editor.move_horizontal(true, ctrl, shift),
            KeyCode::Up => self.editor.move_vertical(-1, shift),
            KeyCode::Down => self.editor.move_vertical(1, shift),
            KeyCode::Home if ctrl => self.editor.move_document_edge(false, shift),
            KeyCode::End if ctrl => self.editor.move_document_edge(true, shift),
            KeyCode::Home => self.editor.move_line_edge(false, shift),
            KeyCode::End => self.editor.move_line_edge(true, shift),
            KeyCode::PageUp => self
                .editor
                .move_vertical(-(self.page_rows as isize), shift),
            KeyCode::PageDown => self.editor.move_vertical(self.page_rows as isize, shift),
            KeyCode::Backspace => self.editor.backspace(),
            KeyCode::Delete => self.editor.delete_forward(),
            KeyCode::Enter => self.editor.insert_text("\n"),
            KeyCode::Tab => self.editor.insert_text("    "),
            KeyCode::Esc => self.editor.collapse_selections(),
            KeyCode::Char(c) if !ctrl && !alt => {
                self.editor.insert_text(&c.to_string());
            }
            _ => {}
        }
    }

    fn handle_prompt_key(&mut self, key: KeyEvent) {
        let alt = key.modifiers.contains(KeyModifiers::ALT);
        match key.code {
            KeyCode::Esc => {
                self.input_mode = InputMode::Normal;
                self.prompt.clear();
            }
            KeyCode::Backspace => {
                self.prompt.pop();
            }
            KeyCode::Char('c' | 'C') if alt => {
                self.search_options.match_case = !self.search_options.match_case;
            }
            KeyCode::Char('w' | 'W') if alt => {
                self.search_options.whole_word = !self.search_options.whole_word;
            }
            KeyCode::Char('r' | 'R') if alt => {
                self.search_options.regex = !self.search_options.regex;
            }
            KeyCode::Enter => self.finish_prompt(),
            KeyCode::Char(c) if !key.modifiers.contains(KeyModifiers::CONTROL) => {
                self.prompt.push(c);
            }
            _ => {}
        }
    }

    fn finish_prompt(&mut self) {
        match self.input_mode {
            InputMode::Find => {
                self.last_query = self.prompt.clone();
                self.input_mode = InputMode::Normal;
                self.repeat_find(true);
            }
            InputMode::ReplaceFind => {
                self.pending_query = self.prompt.clone();
                self.prompt.clear();
                self.input_mode = InputMode::ReplaceWith;
            }
            InputMode::ReplaceWith => {
                let replacement = self.prompt.clone();
                let query = self.pending_query.clone();
                let count = self
                    .editor
                    .replace_all(&query, &replacement, self.search_options);
                self.status = format!("Replaced {count} occurrence(s)");
                self.last_query = query;
                self.input_mode = InputMode::Normal;
            }
            InputMode::SavePath => {
                let path = PathBuf::from(self.prompt.trim());
                self.input_mode = InputMode::Normal;
                if path.as_os_str().is_empty() {
                    self.status = "Save cancelled".into();
                } else {
                    self.save_to(path);
                }
            }
            InputMode::Normal | InputMode::ConfirmQuit => {}
        }
        self.prompt.clear();
    }

    fn handle_confirm_quit_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Char('y' | 'Y') => {
                self.input_mode = InputMode::Normal;
                self.save();
                if !self.editor.is_modified() {
                    self.should_quit = true;
                }
            }
            KeyCode::Char('n' | 'N') => self.should_quit = true,
            KeyCode::Esc => self.input_mode = InputMode::Normal,
            _ => {}
        }
    }

    fn repeat_find(&mut self, forward: bool) {
        if self.last_query.is_empty() {
            self.status = "No search query".into();
            return;
        }
        let query = self.last_query.clone();
        match self.editor.find_next(&query, self.search_options, forward) {
            Some(_) => {}
            None => self.status = format!("Not found: {query}"),
        }
    }

    fn request_quit(&mut self) {
        if self.editor.is_modified() {
            self.input_mode = InputMode::ConfirmQuit;
        } else {
            self.should_quit = true;
        }
    }

    fn save(&mut self) {
        match self.editor.path().map(|p| p.to_path_buf()) {
            Some(path) => self.save_to(path),
            None => {
                self.input_mode = InputMode::SavePath;
                self.prompt.clear();
            }
        }
    }

    fn save_to(&mut self, path: PathBuf) {
        match self.editor.save_as(&path) {
            Ok(()) => self.status = format!("Saved {}", path.display()),
            Err(err) => {
                log::warn!("save failed: {err}");
                self.status = format!("Save failed: {err}");
            }
        }
    }

    fn handle_paste(&mut self, text: String) {
        self.editor.paste(&ClipboardPayload::plain(text));
    }
}

fn run_app<B: ratatui::backend::Backend>(
    terminal: &mut Terminal<B>,
    app: &mut App,
) -> io::Result<()> {
    loop {
        terminal.draw(|frame| app.render(frame))?;

        if app.should_quit {
            break;
        }

        if event::poll(Duration::from_millis(100))? {
            match event::read()? {
                Event::Key(key) => app.handle_key(key),
                Event::Paste(text) => app.handle_paste(text),
                Event::Resize(..) => {}
                _ => {}
            }
        }
    }
    Ok(())
}

fn main() -> io::Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    if args.len() > 2 {
        eprintln!("usage: {} [file]", args[0]);
        process::exit(2);
    }
    let path = args.get(1).map(PathBuf::from);

    let mut app = match App::new(path) {
        Ok(app) => app,
        Err(err) => {
            eprintln!("{err}");
            process::exit(1);
        }
    };

    enable_raw_mode()?;
    let mut stdout = stdout();
    execute!(stdout, EnterAlternateScreen, EnableBracketedPaste)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = run_app(&mut terminal, &mut app);

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), DisableBracketedPaste, LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    result
}
