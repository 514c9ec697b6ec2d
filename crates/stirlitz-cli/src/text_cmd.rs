//! Text subcommands: encrypt stdin to hex ciphertext and back.

use std::io::{self, Read, Write};

use zeroize::Zeroizing;

use crate::context::CliContext;

/// Text subcommand actions.
#[derive(clap::Subcommand, Debug)]
pub enum TextAction {
    /// Encrypt stdin and print hex ciphertext.
    Encrypt {
        #[arg(short, long)]
        profile: String,
    },
    /// Decrypt hex ciphertext from stdin and print the text.
    Decrypt {
        #[arg(short, long)]
        profile: String,
    },
}

/// Execute a text subcommand.
pub async fn run(action: TextAction, ctx: &CliContext) -> anyhow::Result<()> {
    let (profile, encrypt) = match &action {
        TextAction::Encrypt { profile } => (profile, true),
        TextAction::Decrypt { profile } => (profile, false),
    };
    let mut session = ctx.login(profile).await?;

    let input = read_all(io::stdin().lock())?;

    let result = if encrypt {
        session.encrypt_text(&input).await.map(|ct| {
            let mut line = ct;
            line.push('\n');
            Zeroizing::new(line)
        })
    } else {
        session.decrypt_text(&input).await
    };
    session.close();

    let mut out = io::stdout();
    out.write_all(result?.as_bytes())?;
    out.flush()?;
    Ok(())
}

/// Read everything into a buffer that is wiped on drop.
fn read_all(mut reader: impl Read) -> io::Result<Zeroizing<String>> {
    let mut input = Zeroizing::new(String::new());
    reader.read_to_string(&mut input)?;
    Ok(input)
}
