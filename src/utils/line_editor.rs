//! Single-line text editing shared by the terminal prompts of the `login` /
//! `signup` commands and the input fields of the full-screen UI.

use std::fmt;
use std::io::{self, Write};
use std::time::Duration;

use ratatui::crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode},
};
use unicode_width::UnicodeWidthStr;

pub const MASK_CHAR: char = '•';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MaskMode {
    #[default]
    Plain,
    Hidden,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LineEditorState {
    text: String,
    /// Cursor position in characters, not bytes.
    cursor: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineEditAction {
    Insert(char),
    Paste(String),
    Backspace,
    Delete,
    MoveLeft,
    MoveRight,
    MoveStart,
    MoveEnd,
    ClearAll,
    Submit,
    Cancel,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineEditOutcome {
    Continue { redraw: bool },
    Submit(String),
    Cancelled,
}

impl LineEditorState {
    pub fn with_text(text: impl Into<String>) -> Self {
        let text = text.into();
        let cursor = text.chars().count();
        Self { text, cursor }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn clear(&mut self) {
        self.text.clear();
        self.cursor = 0;
    }

    /// Text as it should appear on screen.
    pub fn display(&self, mask: MaskMode) -> String {
        match mask {
            MaskMode::Plain => self.text.clone(),
            MaskMode::Hidden => MASK_CHAR.to_string().repeat(self.text.chars().count()),
        }
    }

    /// Terminal columns between the start of the field and the cursor.
    pub fn cursor_columns(&self, mask: MaskMode) -> usize {
        let before: String = self.display(mask).chars().take(self.cursor).collect();
        UnicodeWidthStr::width(before.as_str())
    }

    pub fn apply(&mut self, action: LineEditAction) -> LineEditOutcome {
        let changed = match action {
            LineEditAction::Insert(c) => {
                let at = self.byte_index(self.cursor);
                self.text.insert(at, c);
                self.cursor += 1;
                true
            }
            LineEditAction::Paste(pasted) => {
                let line = sanitize_line(&pasted);
                let at = self.byte_index(self.cursor);
                self.text.insert_str(at, &line);
                self.cursor += line.chars().count();
                if pasted.contains(['\n', '\r']) {
                    return LineEditOutcome::Submit(self.text.clone());
                }
                !line.is_empty()
            }
            LineEditAction::Backspace => {
                if self.cursor == 0 {
                    false
                } else {
                    let start = self.byte_index(self.cursor - 1);
                    let end = self.byte_index(self.cursor);
                    self.text.replace_range(start..end, "");
                    self.cursor -= 1;
                    true
                }
            }
            LineEditAction::Delete => {
                let start = self.byte_index(self.cursor);
                if start >= self.text.len() {
                    false
                } else {
                    let end = self.byte_index(self.cursor + 1);
                    self.text.replace_range(start..end, "");
                    true
                }
            }
            LineEditAction::MoveLeft => self.move_to(self.cursor.saturating_sub(1)),
            LineEditAction::MoveRight => self.move_to(self.cursor + 1),
            LineEditAction::MoveStart => self.move_to(0),
            LineEditAction::MoveEnd => self.move_to(usize::MAX),
            LineEditAction::ClearAll => {
                let had_text = !self.text.is_empty();
                self.clear();
                had_text
            }
            LineEditAction::Submit => return LineEditOutcome::Submit(self.text.clone()),
            LineEditAction::Cancel => return LineEditOutcome::Cancelled,
        };
        LineEditOutcome::Continue { redraw: changed }
    }

    fn move_to(&mut self, position: usize) -> bool {
        let clamped = position.min(self.text.chars().count());
        let moved = clamped != self.cursor;
        self.cursor = clamped;
        moved
    }

    fn byte_index(&self, char_index: usize) -> usize {
        self.text
            .char_indices()
            .nth(char_index)
            .map(|(idx, _)| idx)
            .unwrap_or(self.text.len())
    }
}

/// Keep the first line of pasted text and drop control characters.
fn sanitize_line(text: &str) -> String {
    text.split(['\n', '\r'])
        .next()
        .unwrap_or_default()
        .chars()
        .map(|c| if c == '\t' { ' ' } else { c })
        .filter(|c| !c.is_control())
        .collect()
}

pub fn map_key_event_to_action(key: &KeyEvent) -> Option<LineEditAction> {
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
    match key.code {
        KeyCode::Enter => Some(LineEditAction::Submit),
        KeyCode::Esc => Some(LineEditAction::Cancel),
        KeyCode::Backspace => Some(LineEditAction::Backspace),
        KeyCode::Delete => Some(LineEditAction::Delete),
        KeyCode::Left => Some(LineEditAction::MoveLeft),
        KeyCode::Right => Some(LineEditAction::MoveRight),
        KeyCode::Home => Some(LineEditAction::MoveStart),
        KeyCode::End => Some(LineEditAction::MoveEnd),
        KeyCode::Char('a') if ctrl => Some(LineEditAction::MoveStart),
        KeyCode::Char('e') if ctrl => Some(LineEditAction::MoveEnd),
        KeyCode::Char('u') if ctrl => Some(LineEditAction::ClearAll),
        KeyCode::Char('c') if ctrl => Some(LineEditAction::Cancel),
        KeyCode::Char(c) if !ctrl => Some(LineEditAction::Insert(c)),
        _ => None,
    }
}

#[derive(Debug, Clone)]
pub struct LineEditorError {
    message: String,
}

impl LineEditorError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.message == CANCELLED
    }
}

const CANCELLED: &str = "Cancelled by user";

impl fmt::Display for LineEditorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for LineEditorError {}

impl From<io::Error> for LineEditorError {
    fn from(err: io::Error) -> Self {
        LineEditorError::new(err.to_string())
    }
}

/// Read one line from the terminal in raw mode, echoing it according to
/// `mask`. Esc and Ctrl+C cancel.
pub fn prompt_line(prompt: &str, mask: MaskMode) -> Result<String, LineEditorError> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    let paste_enabled = execute!(stdout, event::EnableBracketedPaste).is_ok();

    let result = edit_loop(prompt, mask);

    let restore = disable_raw_mode();
    if paste_enabled {
        let _ = execute!(stdout, event::DisableBracketedPaste);
    }
    println!();
    let value = result?;
    restore?;
    Ok(value)
}

fn edit_loop(prompt: &str, mask: MaskMode) -> Result<String, LineEditorError> {
    let mut state = LineEditorState::default();
    let mut needs_redraw = true;

    loop {
        if needs_redraw {
            redraw_line(prompt, &state, mask)?;
            needs_redraw = false;
        }
        if !event::poll(Duration::from_millis(100))? {
            continue;
        }
        let action = match event::read()? {
            Event::Key(key) if key.kind == KeyEventKind::Press => map_key_event_to_action(&key),
            Event::Paste(text) => Some(LineEditAction::Paste(text)),
            _ => None,
        };
        let Some(action) = action else {
            continue;
        };
        match state.apply(action) {
            LineEditOutcome::Continue { redraw } => needs_redraw = redraw,
            LineEditOutcome::Submit(value) => return Ok(value),
            LineEditOutcome::Cancelled => return Err(LineEditorError::new(CANCELLED)),
        }
    }
}

fn redraw_line(prompt: &str, state: &LineEditorState, mask: MaskMode) -> io::Result<()> {
    let mut stdout = io::stdout();
    write!(stdout, "\r\x1b[K{}{}", prompt, state.display(mask))?;
    let column = UnicodeWidthStr::width(prompt) + state.cursor_columns(mask);
    if column > 0 {
        write!(stdout, "\r\x1b[{column}C")?;
    } else {
        write!(stdout, "\r")?;
    }
    stdout.flush()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn type_text(state: &mut LineEditorState, text: &str) {
        for c in text.chars() {
            state.apply(LineEditAction::Insert(c));
        }
    }

    #[test]
    fn inserts_at_cursor() {
        let mut state = LineEditorState::default();
        type_text(&mut state, "ac");
        state.apply(LineEditAction::MoveLeft);
        state.apply(LineEditAction::Insert('b'));
        assert_eq!(state.text(), "abc");
        assert_eq!(state.cursor(), 2);
    }

    #[test]
    fn editing_handles_multibyte_characters() {
        let mut state = LineEditorState::with_text("naïve");
        state.apply(LineEditAction::MoveLeft);
        state.apply(LineEditAction::MoveLeft);
        assert_eq!(
            state.apply(LineEditAction::Backspace),
            LineEditOutcome::Continue { redraw: true }
        );
        assert_eq!(state.text(), "nave");
        state.apply(LineEditAction::Delete);
        assert_eq!(state.text(), "nae");
    }

    #[test]
    fn moves_at_the_edges_do_not_redraw() {
        let mut state = LineEditorState::with_text("x");
        assert_eq!(
            state.apply(LineEditAction::MoveRight),
            LineEditOutcome::Continue { redraw: false }
        );
        state.apply(LineEditAction::MoveStart);
        assert_eq!(
            state.apply(LineEditAction::Backspace),
            LineEditOutcome::Continue { redraw: false }
        );
    }

    #[test]
    fn paste_with_newline_submits_first_line() {
        let mut state = LineEditorState::with_text("pre-");
        let outcome = state.apply(LineEditAction::Paste("secret\nignored".to_string()));
        assert_eq!(outcome, LineEditOutcome::Submit("pre-secret".to_string()));
    }

    #[test]
    fn paste_drops_control_characters() {
        let mut state = LineEditorState::default();
        state.apply(LineEditAction::Paste("a\tb\u{7}c".to_string()));
        assert_eq!(state.text(), "a bc");
    }

    #[test]
    fn hidden_mask_hides_every_character() {
        let state = LineEditorState::with_text("pässword");
        assert_eq!(state.display(MaskMode::Hidden), "••••••••");
        assert_eq!(state.display(MaskMode::Plain), "pässword");
        assert_eq!(state.cursor_columns(MaskMode::Hidden), 8);
    }

    #[test]
    fn control_keys_map_to_editing_actions() {
        let ctrl = |c| KeyEvent::new(KeyCode::Char(c), KeyModifiers::CONTROL);
        assert_eq!(map_key_event_to_action(&ctrl('a')), Some(LineEditAction::MoveStart));
        assert_eq!(map_key_event_to_action(&ctrl('u')), Some(LineEditAction::ClearAll));
        assert_eq!(map_key_event_to_action(&ctrl('c')), Some(LineEditAction::Cancel));
        assert_eq!(map_key_event_to_action(&ctrl('x')), None);
        assert_eq!(
            map_key_event_to_action(&KeyEvent::new(KeyCode::Char('x'), KeyModifiers::SHIFT)),
            Some(LineEditAction::Insert('x'))
        );
    }
}
