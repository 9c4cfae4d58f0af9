//! State of the full-screen client and its reaction to keys, stream updates
//! and finished auth requests. Nothing here touches the terminal, so the
//! whole interaction can be exercised in tests.

use ratatui::crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::api::ApiClient;
use crate::auth::{self, gate, AuthError, Route, Session};
use crate::core::chat_stream::{StreamError, StreamMessage, StreamParams};
use crate::core::controller::{ChatController, SendOutcome, SubmitError};
use crate::core::store::StoreEvent;
use crate::ui::forms::{AuthForm, FormKind, FormOutcome};
use crate::utils::line_editor::{map_key_event_to_action, LineEditAction, LineEditorState};

/// Work the event loop has to start on behalf of the UI.
pub enum AppCommand {
    SpawnStream(StreamParams),
    Login { username: String, password: String },
    Signup { username: String, password: String },
}

#[derive(Debug)]
pub enum AuthResult {
    LoggedIn(Result<String, AuthError>),
    SignedUp(Result<Route, AuthError>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Focus {
    Input,
    Sidebar,
    Rename,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScrollState {
    pub offset: u16,
    pub auto_scroll: bool,
    /// Largest useful offset for the last drawn frame.
    pub max_offset: u16,
}

impl Default for ScrollState {
    fn default() -> Self {
        Self {
            offset: 0,
            auto_scroll: true,
            max_offset: 0,
        }
    }
}

impl ScrollState {
    pub fn effective_offset(&self) -> u16 {
        if self.auto_scroll {
            self.max_offset
        } else {
            self.offset.min(self.max_offset)
        }
    }

    pub fn scroll_up(&mut self, lines: u16) {
        self.offset = self.effective_offset().saturating_sub(lines);
        self.auto_scroll = false;
    }

    pub fn scroll_down(&mut self, lines: u16) {
        let target = self.effective_offset().saturating_add(lines);
        if target >= self.max_offset {
            self.auto_scroll = true;
        } else {
            self.offset = target;
        }
    }

    pub fn follow(&mut self) {
        self.auto_scroll = true;
    }
}

const PAGE_LINES: u16 = 10;
const SESSION_EXPIRED: &str = "Session expired. Please log in again.";
const ACCOUNT_CREATED: &str = "Account created. Please log in.";

pub struct ChatApp {
    pub route: Route,
    pub session: Session,
    pub api: ApiClient,
    pub controller: ChatController,
    store_events: mpsc::UnboundedReceiver<StoreEvent>,
    pub input: LineEditorState,
    pub form: AuthForm,
    pub focus: Focus,
    pub sidebar_index: usize,
    pub rename: LineEditorState,
    rename_target: Option<String>,
    pub status: Option<String>,
    pub scroll: ScrollState,
    pub exit_requested: bool,
}

impl ChatApp {
    pub fn new(api: ApiClient, session: Session, mut controller: ChatController) -> Self {
        let store_events = controller.store_mut().subscribe();
        let route = gate(Route::Main, &session);
        let form_kind = match route {
            Route::Signup => FormKind::Signup,
            _ => FormKind::Login,
        };
        Self {
            route,
            session,
            api,
            controller,
            store_events,
            input: LineEditorState::default(),
            form: AuthForm::new(form_kind),
            focus: Focus::Input,
            sidebar_index: 0,
            rename: LineEditorState::default(),
            rename_target: None,
            status: None,
            scroll: ScrollState::default(),
            exit_requested: false,
        }
    }

    /// Show `requested`, or whatever screen the session allows instead.
    pub fn navigate(&mut self, requested: Route) {
        let route = gate(requested, &self.session);
        if route != requested {
            debug!(requested = requested.path(), shown = route.path(), "Redirected");
        }
        match route {
            Route::Login => self.form.reset_for(FormKind::Login),
            Route::Signup => self.form.reset_for(FormKind::Signup),
            Route::Main => {
                self.focus = Focus::Input;
                self.scroll.follow();
            }
        }
        self.route = route;
    }

    pub fn active_is_busy(&self) -> bool {
        self.controller
            .is_busy(self.controller.store().active_id())
    }

    pub fn handle_key(&mut self, key: &KeyEvent) -> Option<AppCommand> {
        if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
            self.exit_requested = true;
            return None;
        }

        match self.route {
            Route::Main => match self.focus {
                Focus::Input => self.handle_input_key(key),
                Focus::Sidebar => {
                    self.handle_sidebar_key(key);
                    None
                }
                Focus::Rename => {
                    self.handle_rename_key(key);
                    None
                }
            },
            Route::Login | Route::Signup => {
                let outcome = self.form.handle_key(key);
                self.handle_form_outcome(outcome)
            }
        }
    }

    pub fn handle_paste(&mut self, text: &str) -> Option<AppCommand> {
        match self.route {
            Route::Main => {
                let target = match self.focus {
                    Focus::Input => &mut self.input,
                    Focus::Rename => &mut self.rename,
                    Focus::Sidebar => return None,
                };
                // Pasting must never send; keep only the first line in the field.
                let first_line = text.lines().next().unwrap_or_default();
                target.apply(LineEditAction::Paste(first_line.to_string()));
                None
            }
            Route::Login | Route::Signup => {
                let outcome = self.form.handle_paste(text);
                self.handle_form_outcome(outcome)
            }
        }
    }

    fn handle_form_outcome(&mut self, outcome: FormOutcome) -> Option<AppCommand> {
        match outcome {
            FormOutcome::None => None,
            FormOutcome::SwitchTo(route) => {
                self.navigate(route);
                None
            }
            FormOutcome::Submit { username, password } => match self.form.kind {
                FormKind::Login => Some(AppCommand::Login { username, password }),
                FormKind::Signup => Some(AppCommand::Signup { username, password }),
            },
        }
    }

    fn handle_input_key(&mut self, key: &KeyEvent) -> Option<AppCommand> {
        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        match key.code {
            KeyCode::Enter => return self.submit(),
            KeyCode::Tab => {
                self.focus = Focus::Sidebar;
                self.sidebar_index = self
                    .controller
                    .store()
                    .position(self.controller.store().active_id())
                    .unwrap_or(0);
                return None;
            }
            KeyCode::Up => self.scroll.scroll_up(1),
            KeyCode::Down => self.scroll.scroll_down(1),
            KeyCode::PageUp => self.scroll.scroll_up(PAGE_LINES),
            KeyCode::PageDown => self.scroll.scroll_down(PAGE_LINES),
            KeyCode::Char('n') if ctrl => self.new_conversation(),
            KeyCode::Char('d') if ctrl => {
                let id = self.controller.store().active_id().to_string();
                self.delete_conversation(&id);
            }
            KeyCode::Char('r') if ctrl => {
                let id = self.controller.store().active_id().to_string();
                self.start_rename(id);
            }
            KeyCode::Char('o') if ctrl => self.logout(),
            _ => {
                if let Some(action) = map_key_event_to_action(key) {
                    if !matches!(action, LineEditAction::Cancel | LineEditAction::Submit) {
                        self.input.apply(action);
                    }
                }
            }
        }
        None
    }

    fn handle_sidebar_key(&mut self, key: &KeyEvent) {
        let count = self.controller.store().conversations().len();
        match key.code {
            KeyCode::Up => self.sidebar_index = self.sidebar_index.saturating_sub(1),
            KeyCode::Down => {
                self.sidebar_index = (self.sidebar_index + 1).min(count.saturating_sub(1));
            }
            KeyCode::Enter => {
                if let Some(id) = self.sidebar_selection() {
                    self.controller.store_mut().select_conversation(&id);
                    self.scroll.follow();
                }
                self.focus = Focus::Input;
            }
            KeyCode::Tab | KeyCode::Esc => self.focus = Focus::Input,
            KeyCode::Char('n') => {
                self.new_conversation();
                self.focus = Focus::Input;
            }
            KeyCode::Char('d') | KeyCode::Delete => {
                if let Some(id) = self.sidebar_selection() {
                    self.delete_conversation(&id);
                }
            }
            KeyCode::Char('r') => {
                if let Some(id) = self.sidebar_selection() {
                    self.start_rename(id);
                }
            }
            _ => {}
        }
    }

    fn handle_rename_key(&mut self, key: &KeyEvent) {
        let Some(action) = map_key_event_to_action(key) else {
            return;
        };
        match action {
            LineEditAction::Submit => {
                if let Some(id) = self.rename_target.take() {
                    if !self
                        .controller
                        .store_mut()
                        .rename_conversation(&id, self.rename.text())
                    {
                        self.status = Some("Title unchanged".to_string());
                    }
                }
                self.focus = Focus::Input;
            }
            LineEditAction::Cancel => {
                self.rename_target = None;
                self.focus = Focus::Input;
            }
            other => {
                self.rename.apply(other);
            }
        }
    }

    fn sidebar_selection(&self) -> Option<String> {
        self.controller
            .store()
            .conversations()
            .get(self.sidebar_index)
            .map(|conversation| conversation.id.clone())
    }

    fn start_rename(&mut self, id: String) {
        let Some(conversation) = self.controller.store().get(&id) else {
            return;
        };
        self.rename = LineEditorState::with_text(conversation.title.clone());
        self.rename_target = Some(id);
        self.focus = Focus::Rename;
    }

    fn new_conversation(&mut self) {
        self.controller.store_mut().create_conversation();
        self.sidebar_index = 0;
        self.scroll.follow();
    }

    fn delete_conversation(&mut self, id: &str) {
        self.controller.delete_conversation(id);
        let count = self.controller.store().conversations().len();
        self.sidebar_index = self.sidebar_index.min(count.saturating_sub(1));
    }

    fn submit(&mut self) -> Option<AppCommand> {
        let mut text = self.input.text().to_string();
        match self
            .controller
            .submit(&mut text, &self.api, self.session.token())
        {
            Ok(params) => {
                self.input.clear();
                self.status = None;
                self.scroll.follow();
                Some(AppCommand::SpawnStream(params))
            }
            Err(SubmitError::EmptyInput) => None,
            Err(SubmitError::NotAuthenticated) => {
                self.navigate(Route::Login);
                None
            }
            Err(err) => {
                self.status = Some(err.to_string());
                None
            }
        }
    }

    fn logout(&mut self) {
        if let Err(err) = auth::logout(&mut self.session) {
            warn!(error = %err, "Could not remove stored token");
        }
        self.navigate(Route::Login);
    }

    pub fn handle_stream_message(&mut self, stream_id: u64, message: StreamMessage) {
        let outcome = self.controller.handle_stream_message(stream_id, message);
        if let Some(SendOutcome::Failed {
            error: StreamError::Unauthorized,
            ..
        }) = outcome
        {
            if let Err(err) = self.session.clear() {
                warn!(error = %err, "Could not remove expired token");
            }
            self.navigate(Route::Login);
            self.form.error = Some(SESSION_EXPIRED.to_string());
        }
    }

    /// Apply a finished login or signup. Results for a form that is no
    /// longer waiting (the user switched screens meanwhile) are dropped.
    pub fn handle_auth_result(&mut self, result: AuthResult) {
        let expected = match result {
            AuthResult::LoggedIn(_) => FormKind::Login,
            AuthResult::SignedUp(_) => FormKind::Signup,
        };
        if !self.form.pending || self.form.kind != expected || self.route != expected.route() {
            debug!(?expected, "Ignoring stale auth result");
            return;
        }
        match result {
            AuthResult::LoggedIn(Ok(token)) => match self.session.store_token(token) {
                Ok(()) => self.navigate(Route::Main),
                Err(err) => self.form.fail(AuthError::Storage(err).to_string()),
            },
            AuthResult::SignedUp(Ok(route)) => {
                self.navigate(route);
                self.form.notice = Some(ACCOUNT_CREATED.to_string());
            }
            AuthResult::LoggedIn(Err(err)) | AuthResult::SignedUp(Err(err)) => {
                self.form.fail(err.to_string());
            }
        }
    }

    /// Consume pending store notifications. Returns true when anything
    /// changed and the screen needs a redraw.
    pub fn drain_store_events(&mut self) -> bool {
        let mut changed = false;
        while let Ok(event) = self.store_events.try_recv() {
            debug!(conversation = %event.conversation_id(), ?event, "Store changed");
            changed = true;
        }
        changed
    }

    pub fn shutdown(&mut self) {
        self.controller.shutdown();
    }
}
