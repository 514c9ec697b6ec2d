//! One-time session: an ephemeral profile, a key exchange, then a loop
//! over stdin lines until EOF. Nothing is written to the profile
//! directory; the key is gone when the process exits.
//!
//! Input lines:
//! - `e:<text>` prints the hex ciphertext of `<text>`
//! - `d:<hex>` prints the decrypted text

use std::io::{self, Write};

use stirlitz_core::SessionController;
use zeroize::Zeroizing;

use crate::context::CliContext;
use crate::{key_cmd, prompt};

/// One parsed input line.
#[derive(Debug, PartialEq, Eq)]
pub enum Request<'a> {
    Encrypt(&'a str),
    Decrypt(&'a str),
    Blank,
}

/// Parse an input line. Unknown prefixes are an error.
pub fn parse_line(line: &str) -> anyhow::Result<Request<'_>> {
    let line = line.strip_suffix('\r').unwrap_or(line);
    if line.trim().is_empty() {
        return Ok(Request::Blank);
    }
    if let Some(text) = line.strip_prefix("e:") {
        return Ok(Request::Encrypt(text));
    }
    if let Some(hex) = line.strip_prefix("d:") {
        return Ok(Request::Decrypt(hex.trim()));
    }
    anyhow::bail!("Expected `e:<text>` or `d:<hex>`")
}

/// Run a one-time session.
pub async fn run(user: Option<String>, ctx: &CliContext) -> anyhow::Result<()> {
    let user_name = prompt::user_name(ctx.non_interactive, user)?;
    let password = prompt::password(ctx.non_interactive, "Session password")?;

    let mut session = ctx.session();
    session.login_ephemeral(&user_name, &password)?;
    let result = serve(ctx, &mut session).await;
    session.close();
    result
}

async fn serve(ctx: &CliContext, session: &mut SessionController) -> anyhow::Result<()> {
    if !key_cmd::exchange(ctx, session).await? {
        return Ok(());
    }

    let mut out = io::stdout();
    writeln!(out, "Ready. Enter e:<text> to encrypt, d:<hex> to decrypt, EOF to quit.")?;
    out.flush()?;

    let mut line = Zeroizing::new(String::new());
    loop {
        line.clear();
        if io::stdin().read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim_end_matches('\n');
        let reply: anyhow::Result<Zeroizing<String>> = match parse_line(line) {
            Ok(Request::Blank) => continue,
            Ok(Request::Encrypt(text)) => session
                .encrypt_text(text)
                .await
                .map(Zeroizing::new)
                .map_err(Into::into),
            Ok(Request::Decrypt(hex)) => session.decrypt_text(hex).await.map_err(Into::into),
            Err(e) => Err(e),
        };
        match reply {
            Ok(reply) => writeln!(out, "{}", reply.as_str())?,
            Err(e) => writeln!(io::stderr(), "error: {e}")?,
        }
        out.flush()?;
    }
    Ok(())
}
