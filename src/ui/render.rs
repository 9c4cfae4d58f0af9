use ratatui::{
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, ListState, Paragraph},
    Frame,
};
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use crate::auth::Route;
use crate::core::message::Message;
use crate::core::store::ERROR_MARKER;
use crate::ui::app::{ChatApp, Focus};
use crate::ui::forms::{AuthForm, FormField, FormKind};
use crate::utils::line_editor::{LineEditorState, MaskMode};

pub const SIDEBAR_WIDTH: u16 = 28;
const INPUT_HEIGHT: u16 = 3;
const FORM_WIDTH: u16 = 52;
const FORM_HEIGHT: u16 = 12;
const STREAMING_MARK: &str = "● ";
const TYPING_INDICATOR: &str = "…";

pub struct ChatLayout {
    pub sidebar: Rect,
    pub transcript: Rect,
    pub input: Rect,
}

pub fn chat_layout(area: Rect) -> ChatLayout {
    let [sidebar, main] =
        Layout::horizontal([Constraint::Length(SIDEBAR_WIDTH), Constraint::Min(0)]).areas(area);
    let [transcript, input] =
        Layout::vertical([Constraint::Min(0), Constraint::Length(INPUT_HEIGHT)]).areas(main);
    ChatLayout {
        sidebar,
        transcript,
        input,
    }
}

/// Inner size of a bordered block.
fn inner(area: Rect) -> Rect {
    Block::default().borders(Borders::ALL).inner(area)
}

/// Word-wrap `text` to `width` columns. Words wider than a line are split.
/// Explicit newlines are kept; an empty input still yields one line.
pub fn wrap_text(text: &str, width: usize) -> Vec<String> {
    let width = width.max(1);
    let mut lines = Vec::new();

    for paragraph in text.split('\n') {
        let mut current = String::new();
        let mut current_width = 0;

        for word in paragraph.split(' ') {
            let word_width = UnicodeWidthStr::width(word);
            let needed = if current.is_empty() { word_width } else { current_width + 1 + word_width };
            if needed <= width {
                if !current.is_empty() {
                    current.push(' ');
                    current_width += 1;
                }
                current.push_str(word);
                current_width += word_width;
                continue;
            }

            if !current.is_empty() {
                lines.push(std::mem::take(&mut current));
                current_width = 0;
            }
            for c in word.chars() {
                let char_width = UnicodeWidthChar::width(c).unwrap_or(0);
                if current_width + char_width > width && !current.is_empty() {
                    lines.push(std::mem::take(&mut current));
                    current_width = 0;
                }
                current.push(c);
                current_width += char_width;
            }
        }
        lines.push(current);
    }

    lines
}

fn message_style(message: &Message) -> Style {
    if message.is_user() {
        Style::default().fg(Color::Cyan)
    } else if message.content.starts_with(ERROR_MARKER) {
        Style::default().fg(Color::Yellow)
    } else {
        Style::default()
    }
}

/// Lay out a conversation's messages as pre-wrapped lines.
pub fn transcript_lines(messages: &[Message], width: u16, streaming: bool) -> Vec<Line<'static>> {
    let mut lines = Vec::new();
    let last_index = messages.len().saturating_sub(1);

    for (index, message) in messages.iter().enumerate() {
        if index > 0 {
            lines.push(Line::default());
        }
        let label = format!("{}: ", message.role.display_label());
        let content = if message.content.is_empty() && streaming && index == last_index {
            TYPING_INDICATOR
        } else {
            message.content.as_str()
        };
        let style = message_style(message);
        let label_style = style.add_modifier(Modifier::BOLD);

        let label_width = UnicodeWidthStr::width(label.as_str());
        let columns = usize::from(width);
        if columns > label_width {
            // Continuation lines hang under the content, not the label.
            let indent = " ".repeat(label_width);
            for (line_index, text) in wrap_text(content, columns - label_width).into_iter().enumerate() {
                let prefix = if line_index == 0 {
                    Span::styled(label.clone(), label_style)
                } else {
                    Span::raw(indent.clone())
                };
                lines.push(Line::from(vec![prefix, Span::styled(text, style)]));
            }
        } else {
            lines.push(Line::from(Span::styled(label.trim_end().to_string(), label_style)));
            for text in wrap_text(content, columns) {
                lines.push(Line::from(Span::styled(text, style)));
            }
        }
    }

    lines
}

fn active_transcript(app: &ChatApp, width: u16) -> Vec<Line<'static>> {
    let store = app.controller.store();
    transcript_lines(
        &store.active().messages,
        width,
        app.controller.is_busy(store.active_id()),
    )
}

/// Refresh scroll bounds for a terminal of size `area` before drawing.
pub fn update_scroll_bounds(app: &mut ChatApp, area: Rect) {
    if app.route != Route::Main {
        return;
    }
    let viewport = inner(chat_layout(area).transcript);
    let total = active_transcript(app, viewport.width).len();
    let total = u16::try_from(total).unwrap_or(u16::MAX);
    app.scroll.max_offset = total.saturating_sub(viewport.height);
}

pub fn draw(f: &mut Frame, app: &ChatApp) {
    match app.route {
        Route::Main => draw_chat(f, app),
        Route::Login | Route::Signup => draw_form(f, &app.form),
    }
}

fn focused_border(focused: bool) -> Style {
    if focused {
        Style::default().fg(Color::Cyan)
    } else {
        Style::default().fg(Color::DarkGray)
    }
}

fn draw_chat(f: &mut Frame, app: &ChatApp) {
    let layout = chat_layout(f.area());
    let store = app.controller.store();

    let streaming: Vec<&str> = app.controller.streaming_conversations().collect();
    let items: Vec<ListItem> = store
        .conversations()
        .iter()
        .map(|conversation| {
            let mark = if streaming.contains(&conversation.id.as_str()) {
                STREAMING_MARK
            } else {
                "  "
            };
            let style = if conversation.id == store.active_id() {
                Style::default().add_modifier(Modifier::BOLD)
            } else {
                Style::default()
            };
            ListItem::new(Line::from(vec![
                Span::styled(mark, Style::default().fg(Color::Green)),
                Span::styled(conversation.title.clone(), style),
            ]))
        })
        .collect();

    let sidebar_focused = app.focus == Focus::Sidebar;
    let list = List::new(items)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title("Chats")
                .title_bottom("Ctrl+N new")
                .border_style(focused_border(sidebar_focused)),
        )
        .highlight_style(Style::default().bg(Color::DarkGray));
    let selected = if sidebar_focused {
        app.sidebar_index
    } else {
        store.position(store.active_id()).unwrap_or(0)
    };
    let mut list_state = ListState::default().with_selected(Some(selected));
    f.render_stateful_widget(list, layout.sidebar, &mut list_state);

    let viewport = inner(layout.transcript);
    let lines = active_transcript(app, viewport.width);
    let transcript = Paragraph::new(lines)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(format!("EESYAI · {}", store.active().title))
                .border_style(focused_border(false)),
        )
        .scroll((app.scroll.effective_offset(), 0));
    f.render_widget(transcript, layout.transcript);

    let (field, title) = match app.focus {
        Focus::Rename => (&app.rename, "Rename chat (Enter save · Esc cancel)".to_string()),
        _ if app.active_is_busy() => (&app.input, "Waiting for reply…".to_string()),
        _ => (
            &app.input,
            "Message (Enter send · Tab chats · Ctrl+R rename · Ctrl+D delete · Ctrl+O log out · Ctrl+C quit)"
                .to_string(),
        ),
    };
    let mut input_block = Block::default()
        .borders(Borders::ALL)
        .title(title)
        .border_style(focused_border(app.focus != Focus::Sidebar));
    if let Some(status) = &app.status {
        input_block = input_block.title_bottom(Span::styled(
            status.clone(),
            Style::default().fg(Color::Yellow),
        ));
    }
    let input_inner = input_block.inner(layout.input);
    let (visible, cursor_column) = visible_field(field, MaskMode::Plain, input_inner.width);
    f.render_widget(Paragraph::new(visible).block(input_block), layout.input);
    if app.focus != Focus::Sidebar {
        f.set_cursor_position((input_inner.x + cursor_column, input_inner.y));
    }
}

/// Horizontal window of a single-line field that keeps the cursor visible.
fn visible_field(field: &LineEditorState, mask: MaskMode, width: u16) -> (String, u16) {
    let text = field.display(mask);
    let cursor = field.cursor_columns(mask);
    let width = usize::from(width.max(1));
    if cursor < width {
        return (text, u16::try_from(cursor).unwrap_or(0));
    }

    let mut skipped = 0;
    let mut chars = text.chars();
    let overflow = cursor + 1 - width;
    while skipped < overflow {
        match chars.next() {
            Some(c) => skipped += UnicodeWidthChar::width(c).unwrap_or(0),
            None => break,
        }
    }
    let column = cursor.saturating_sub(skipped);
    (chars.collect(), u16::try_from(column).unwrap_or(0))
}

fn centered(area: Rect, width: u16, height: u16) -> Rect {
    let width = width.min(area.width);
    let height = height.min(area.height);
    Rect {
        x: area.x + (area.width - width) / 2,
        y: area.y + (area.height - height) / 2,
        width,
        height,
    }
}

fn draw_form(f: &mut Frame, form: &AuthForm) {
    let area = centered(f.area(), FORM_WIDTH, FORM_HEIGHT);
    let block = Block::default()
        .borders(Borders::ALL)
        .title(form.kind.title())
        .border_style(Style::default().fg(Color::Cyan));
    let inner_area = block.inner(area);
    f.render_widget(block, area);

    let field_width = inner_area.width.saturating_sub(10);
    let row = |field: FormField, label: &str, state: &LineEditorState, mask: MaskMode| {
        let focused = form.focus == field;
        let (visible, _) = visible_field(state, mask, field_width);
        let label_style = if focused {
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)
        } else {
            Style::default()
        };
        Line::from(vec![
            Span::styled(format!("{label:<10}"), label_style),
            Span::raw(visible),
        ])
    };

    let mut lines = vec![Line::default()];
    lines.push(row(FormField::Username, "Email", &form.username, MaskMode::Plain));
    lines.push(Line::default());
    lines.push(row(FormField::Password, "Password", &form.password, MaskMode::Hidden));
    lines.push(Line::default());
    if let Some(error) = &form.error {
        lines.push(Line::from(Span::styled(error.clone(), Style::default().fg(Color::Red))));
    } else if let Some(notice) = &form.notice {
        lines.push(Line::from(Span::styled(notice.clone(), Style::default().fg(Color::Green))));
    } else if form.pending {
        lines.push(Line::from(Span::styled("Please wait…", Style::default().fg(Color::DarkGray))));
    } else {
        lines.push(Line::default());
    }
    lines.push(Line::default());
    let hint = match form.kind {
        FormKind::Login => "Enter submit · Tab switch field · Ctrl+S sign up",
        FormKind::Signup => "Enter submit · Tab switch field · Ctrl+L log in",
    };
    lines.push(Line::from(Span::styled(hint, Style::default().fg(Color::DarkGray))));
    f.render_widget(Paragraph::new(lines), inner_area);

    let (field_row, field, mask) = match form.focus {
        FormField::Username => (1, &form.username, MaskMode::Plain),
        FormField::Password => (3, &form.password, MaskMode::Hidden),
    };
    let (_, cursor_column) = visible_field(field, mask, field_width);
    f.set_cursor_position((inner_area.x + 10 + cursor_column, inner_area.y + field_row));
}
