//! Profile subcommands: create, list, remove.
//!
//! User-facing output uses writeln! to stdout (this is a CLI binary, not debug output).

use std::io::{self, Write};

use crate::context::CliContext;
use crate::prompt;

/// Profile subcommand actions.
#[derive(clap::Subcommand, Debug)]
pub enum ProfileAction {
    /// Create a new password-protected profile.
    Create {
        /// Profile name (also the file name in the profile directory).
        name: String,
        /// User name stored in the profile.
        #[arg(short, long)]
        user: Option<String>,
    },
    /// List stored profiles.
    List,
    /// Remove a profile and its stored key.
    Remove {
        /// Profile name.
        name: String,
    },
}

/// Execute a profile subcommand.
pub async fn run(action: ProfileAction, ctx: &CliContext) -> anyhow::Result<()> {
    match action {
        ProfileAction::Create { name, user } => create(ctx, &name, user).await,
        ProfileAction::List => list(ctx),
        ProfileAction::Remove { name } => remove(ctx, &name).await,
    }
}

async fn create(ctx: &CliContext, name: &str, user: Option<String>) -> anyhow::Result<()> {
    let user_name = prompt::user_name(ctx.non_interactive, user)?;
    let (password, confirm) = prompt::new_password(ctx.non_interactive)?;
    let mut session = ctx.session();
    session
        .create_profile(name, &user_name, &password, &confirm)
        .await?;
    session.close();

    let mut out = io::stdout();
    writeln!(out, "Created profile {name} for {user_name}")?;
    writeln!(out, "Run `stirlitz key exchange --profile {name}` to set up a key.")?;
    Ok(())
}

fn list(ctx: &CliContext) -> anyhow::Result<()> {
    let names = ctx.store().list()?;
    let mut out = io::stdout();
    if names.is_empty() {
        writeln!(out, "No profiles")?;
    }
    for name in names {
        writeln!(out, "{name}")?;
    }
    Ok(())
}

async fn remove(ctx: &CliContext, name: &str) -> anyhow::Result<()> {
    if !ctx.store().contains(name)? {
        anyhow::bail!("Profile not found: {name}");
    }
    if !ctx.confirm(&format!("Remove profile {name}? Are you sure?"))? {
        writeln!(io::stdout(), "Aborted")?;
        return Ok(());
    }
    let mut session = ctx.session();
    session.remove_profile(name).await?;
    writeln!(io::stdout(), "Removed profile {name}")?;
    Ok(())
}
