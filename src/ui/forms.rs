//! Login and signup screens.

use ratatui::crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

use crate::auth::Route;
use crate::utils::line_editor::{map_key_event_to_action, LineEditAction, LineEditOutcome, LineEditorState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormKind {
    Login,
    Signup,
}

impl FormKind {
    pub fn title(self) -> &'static str {
        match self {
            FormKind::Login => "Log In",
            FormKind::Signup => "Sign Up",
        }
    }

    pub fn route(self) -> Route {
        match self {
            FormKind::Login => Route::Login,
            FormKind::Signup => Route::Signup,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormField {
    Username,
    Password,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormOutcome {
    None,
    Submit { username: String, password: String },
    SwitchTo(Route),
}

#[derive(Debug, Clone)]
pub struct AuthForm {
    pub kind: FormKind,
    pub username: LineEditorState,
    pub password: LineEditorState,
    pub focus: FormField,
    pub error: Option<String>,
    pub notice: Option<String>,
    /// A request is in flight; further submits are ignored.
    pub pending: bool,
}

impl AuthForm {
    pub fn new(kind: FormKind) -> Self {
        Self {
            kind,
            username: LineEditorState::default(),
            password: LineEditorState::default(),
            focus: FormField::Username,
            error: None,
            notice: None,
            pending: false,
        }
    }

    /// Switch the form to `kind`, keeping the typed email but never the
    /// password.
    pub fn reset_for(&mut self, kind: FormKind) {
        let username = std::mem::take(&mut self.username);
        *self = Self::new(kind);
        self.username = username;
    }

    pub fn focused_field(&self) -> &LineEditorState {
        match self.focus {
            FormField::Username => &self.username,
            FormField::Password => &self.password,
        }
    }

    fn focused_field_mut(&mut self) -> &mut LineEditorState {
        match self.focus {
            FormField::Username => &mut self.username,
            FormField::Password => &mut self.password,
        }
    }

    fn toggle_focus(&mut self) {
        self.focus = match self.focus {
            FormField::Username => FormField::Password,
            FormField::Password => FormField::Username,
        };
    }

    pub fn handle_key(&mut self, key: &KeyEvent) -> FormOutcome {
        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        match key.code {
            KeyCode::Tab | KeyCode::BackTab | KeyCode::Up | KeyCode::Down => {
                self.toggle_focus();
                return FormOutcome::None;
            }
            KeyCode::Char('s') if ctrl && self.kind == FormKind::Login => {
                return FormOutcome::SwitchTo(Route::Signup);
            }
            KeyCode::Char('l') if ctrl && self.kind == FormKind::Signup => {
                return FormOutcome::SwitchTo(Route::Login);
            }
            _ => {}
        }

        let Some(action) = map_key_event_to_action(key) else {
            return FormOutcome::None;
        };
        match action {
            LineEditAction::Cancel => FormOutcome::None,
            LineEditAction::Submit if self.focus == FormField::Username => {
                self.focus = FormField::Password;
                FormOutcome::None
            }
            LineEditAction::Submit => self.submit(),
            other => {
                self.focused_field_mut().apply(other);
                FormOutcome::None
            }
        }
    }

    pub fn handle_paste(&mut self, text: &str) -> FormOutcome {
        match self
            .focused_field_mut()
            .apply(LineEditAction::Paste(text.to_string()))
        {
            LineEditOutcome::Submit(_) if self.focus == FormField::Password => self.submit(),
            _ => FormOutcome::None,
        }
    }

    fn submit(&mut self) -> FormOutcome {
        if self.pending {
            return FormOutcome::None;
        }
        let username = self.username.text().trim().to_string();
        let password = self.password.text().to_string();
        if username.is_empty() || password.is_empty() {
            self.error = Some("Email and password are required".to_string());
            return FormOutcome::None;
        }
        self.error = None;
        self.notice = None;
        self.pending = true;
        FormOutcome::Submit { username, password }
    }

    /// Record a failed attempt; the password is cleared for the retry.
    pub fn fail(&mut self, message: impl Into<String>) {
        self.pending = false;
        self.error = Some(message.into());
        self.password.clear();
        self.focus = FormField::Password;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn type_into(form: &mut AuthForm, text: &str) {
        for c in text.chars() {
            form.handle_key(&key(KeyCode::Char(c)));
        }
    }

    #[test]
    fn enter_moves_from_email_to_password_then_submits() {
        let mut form = AuthForm::new(FormKind::Login);
        type_into(&mut form, "ada@example.com");
        assert_eq!(form.handle_key(&key(KeyCode::Enter)), FormOutcome::None);
        assert_eq!(form.focus, FormField::Password);

        type_into(&mut form, "secret");
        assert_eq!(
            form.handle_key(&key(KeyCode::Enter)),
            FormOutcome::Submit {
                username: "ada@example.com".to_string(),
                password: "secret".to_string(),
            }
        );
        assert!(form.pending);
        assert_eq!(form.handle_key(&key(KeyCode::Enter)), FormOutcome::None);
    }

    #[test]
    fn empty_fields_are_not_submitted() {
        let mut form = AuthForm::new(FormKind::Login);
        form.focus = FormField::Password;
        assert_eq!(form.handle_key(&key(KeyCode::Enter)), FormOutcome::None);
        assert!(form.error.is_some());
        assert!(!form.pending);
    }

    #[test]
    fn failure_clears_password_and_allows_retry() {
        let mut form = AuthForm::new(FormKind::Login);
        type_into(&mut form, "ada");
        form.handle_key(&key(KeyCode::Tab));
        type_into(&mut form, "pw");
        form.handle_key(&key(KeyCode::Enter));

        form.fail("Invalid credentials");

        assert!(!form.pending);
        assert_eq!(form.error.as_deref(), Some("Invalid credentials"));
        assert!(form.password.is_empty());
        assert_eq!(form.username.text(), "ada");
    }

    #[test]
    fn screens_link_to_each_other() {
        let mut login = AuthForm::new(FormKind::Login);
        let ctrl_s = KeyEvent::new(KeyCode::Char('s'), KeyModifiers::CONTROL);
        assert_eq!(login.handle_key(&ctrl_s), FormOutcome::SwitchTo(Route::Signup));

        let mut signup = AuthForm::new(FormKind::Signup);
        let ctrl_l = KeyEvent::new(KeyCode::Char('l'), KeyModifiers::CONTROL);
        assert_eq!(signup.handle_key(&ctrl_l), FormOutcome::SwitchTo(Route::Login));
    }

    #[test]
    fn reset_keeps_email_only() {
        let mut form = AuthForm::new(FormKind::Signup);
        type_into(&mut form, "ada");
        form.focus = FormField::Password;
        type_into(&mut form, "pw");
        form.error = Some("oops".into());

        form.reset_for(FormKind::Login);

        assert_eq!(form.kind, FormKind::Login);
        assert_eq!(form.username.text(), "ada");
        assert!(form.password.is_empty());
        assert!(form.error.is_none());
    }

    #[test]
    fn pasted_password_with_newline_submits() {
        let mut form = AuthForm::new(FormKind::Login);
        type_into(&mut form, "ada");
        form.focus = FormField::Password;
        assert_eq!(
            form.handle_paste("hunter2\n"),
            FormOutcome::Submit {
                username: "ada".to_string(),
                password: "hunter2".to_string(),
            }
        );
    }
}
