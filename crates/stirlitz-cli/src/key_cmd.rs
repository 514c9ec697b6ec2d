//! Key subcommands: manual exchange and clearing the stored key.

use std::io::{self, Write};

use stirlitz_core::{SessionController, SharedKeyPreview};

use crate::context::CliContext;
use crate::prompt;

/// Key subcommand actions.
#[derive(clap::Subcommand, Debug)]
pub enum KeyAction {
    /// Exchange keys with a counterpart and store the shared key.
    Exchange {
        #[arg(short, long)]
        profile: String,
    },
    /// Forget the stored key of a profile.
    Clear {
        #[arg(short, long)]
        profile: String,
    },
}

/// Execute a key subcommand.
pub async fn run(action: KeyAction, ctx: &CliContext) -> anyhow::Result<()> {
    match action {
        KeyAction::Exchange { profile } => {
            let mut session = ctx.login(&profile).await?;
            let result = exchange(ctx, &mut session).await;
            session.close();
            result.map(|_| ())
        }
        KeyAction::Clear { profile } => clear(ctx, &profile).await,
    }
}

/// Walk through one key exchange on an authenticated session. Returns
/// whether a new key was committed.
pub async fn exchange(ctx: &CliContext, session: &mut SessionController) -> anyhow::Result<bool> {
    let own = session.begin_key_exchange()?;
    let mut out = io::stdout();
    writeln!(out, "Send this key to your counterpart:")?;
    writeln!(out)?;
    writeln!(out, "    {own}")?;
    writeln!(out)?;
    out.flush()?;

    let preview = loop {
        let entered = prompt::opponent_key(ctx.non_interactive)?;
        match session.set_opponent_key(&entered) {
            Ok(preview) => break preview,
            Err(e) if !ctx.non_interactive => {
                writeln!(io::stderr(), "{e}. Try again.")?;
            }
            Err(e) => {
                session.cancel_exchange()?;
                return Err(e.into());
            }
        }
    };

    print_preview(&preview)?;
    let question = if preview.replaces_existing {
        "This replaces the key stored in the profile. Store the new key?"
    } else {
        "Fingerprints match on both sides? Store the key?"
    };
    if !ctx.confirm(question)? {
        session.cancel_exchange()?;
        writeln!(io::stdout(), "Key not stored")?;
        return Ok(false);
    }

    let fingerprint = session.commit_shared_key().await?;
    writeln!(io::stdout(), "Stored key {fingerprint}")?;
    Ok(true)
}

fn print_preview(preview: &SharedKeyPreview) -> io::Result<()> {
    let mut out = io::stdout();
    writeln!(out, "Shared key fingerprint: {}", preview.fingerprint)?;
    writeln!(out, "{}", preview.randomart)?;
    writeln!(out, "Compare it with your counterpart over a trusted channel.")
}

async fn clear(ctx: &CliContext, profile: &str) -> anyhow::Result<()> {
    let mut session = ctx.login(profile).await?;
    let has_key = session.profile().is_some_and(|p| p.has_key());
    if !has_key {
        writeln!(io::stdout(), "Profile {profile} has no stored key")?;
        session.close();
        return Ok(());
    }
    let confirmed = ctx.confirm("Clear the stored key? Are you sure?")?;
    let result = if confirmed {
        session.clear_stored_key().await
    } else {
        Ok(())
    };
    session.close();
    result?;
    writeln!(io::stdout(), "{}", if confirmed { "Key cleared" } else { "Aborted" })?;
    Ok(())
}
