use std::io::{self, BufRead};

use anyhow::Result;
use dialoguer::{Confirm, Input, Password};
use zeroize::Zeroizing;

/// Environment variable holding the password in non-interactive mode.
pub const PASSWORD_ENV: &str = "STIRLITZ_PASSWORD";

/// Prompt for a password (hidden input).
pub fn password(non_interactive: bool, prompt: &str) -> Result<Zeroizing<String>> {
    if non_interactive {
        return std::env::var(PASSWORD_ENV)
            .map(Zeroizing::new)
            .map_err(|_| anyhow::anyhow!("{PASSWORD_ENV} env var is required in non-interactive mode"));
    }
    let password: String = Password::new().with_prompt(prompt).interact()?;
    Ok(Zeroizing::new(password))
}

/// Prompt for a new password and its confirmation. The two are returned
/// as typed; the core decides whether they match.
pub fn new_password(non_interactive: bool) -> Result<(Zeroizing<String>, Zeroizing<String>)> {
    if non_interactive {
        let password = password(true, "")?;
        return Ok((password.clone(), password));
    }
    let password: String = Password::new().with_prompt("New password").interact()?;
    let confirm: String = Password::new().with_prompt("Repeat password").interact()?;
    Ok((Zeroizing::new(password), Zeroizing::new(confirm)))
}

/// Prompt for a user name unless one was given.
pub fn user_name(non_interactive: bool, given: Option<String>) -> Result<String> {
    if let Some(name) = given {
        return Ok(name);
    }
    if non_interactive {
        anyhow::bail!("--user is required in non-interactive mode");
    }
    let name: String = Input::new().with_prompt("User name").interact_text()?;
    Ok(name)
}

/// Yes/no question, defaulting to no. Non-interactive mode never confirms.
pub fn confirm(non_interactive: bool, question: &str) -> Result<bool> {
    if non_interactive {
        return Ok(false);
    }
    Ok(Confirm::new()
        .with_prompt(question)
        .default(false)
        .interact()?)
}

/// Read the counterpart's key. Interactive mode uses a prompt; otherwise
/// the first non-empty line of stdin is taken.
pub fn opponent_key(non_interactive: bool) -> Result<String> {
    if non_interactive {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let line = line?;
            if !line.trim().is_empty() {
                return Ok(line);
            }
        }
        anyhow::bail!("No opponent key on stdin");
    }
    let key: String = Input::new()
        .with_prompt("Opponent key")
        .interact_text()?;
    Ok(key)
}
