use std::io::{self, BufRead, IsTerminal, Write};

use crate::utils::line_editor::{prompt_line, LineEditorError, MaskMode};

pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Ask for whatever part of the credentials was not given on the command
/// line. The password is never echoed.
pub fn prompt_credentials(username: Option<String>) -> Result<Credentials, LineEditorError> {
    let username = match username.filter(|name| !name.trim().is_empty()) {
        Some(name) => name,
        None => read_field("Email: ", MaskMode::Plain)?,
    };
    let password = read_field("Password: ", MaskMode::Hidden)?;

    let username = username.trim().to_string();
    if username.is_empty() || password.is_empty() {
        return Err(LineEditorError::new("Email and password are required"));
    }
    Ok(Credentials { username, password })
}

fn read_field(prompt: &str, mask: MaskMode) -> Result<String, LineEditorError> {
    if io::stdin().is_terminal() {
        return prompt_line(prompt, mask);
    }

    // Piped input: read plain lines so scripts can feed credentials.
    print!("{prompt}");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    if mask == MaskMode::Hidden {
        println!();
    }
    Ok(line.trim_end_matches(['\n', '\r']).to_string())
}
