//! Local (passphrase) file encryption: no profile, the key comes from a
//! user name and password.

use std::path::PathBuf;

use stirlitz_core::JobMode;

use crate::context::CliContext;
use crate::file_cmd::{drive, report};
use crate::prompt;

/// Local subcommand actions.
#[derive(clap::Subcommand, Debug)]
pub enum LocalAction {
    /// Encrypt a file under a user name and password.
    Encrypt {
        #[arg(short, long)]
        user: Option<String>,
        src: PathBuf,
        dst: PathBuf,
    },
    /// Decrypt a file encrypted with `local encrypt`.
    Decrypt {
        #[arg(short, long)]
        user: Option<String>,
        src: PathBuf,
        dst: PathBuf,
    },
}

/// Execute a local subcommand.
pub async fn run(action: LocalAction, ctx: &CliContext) -> anyhow::Result<()> {
    let (mode, user, src, dst) = match action {
        LocalAction::Encrypt { user, src, dst } => (JobMode::Encrypt, user, src, dst),
        LocalAction::Decrypt { user, src, dst } => (JobMode::Decrypt, user, src, dst),
    };
    let user_name = prompt::user_name(ctx.non_interactive, user)?;
    let mut session = ctx.session();
    let started = match mode {
        JobMode::Encrypt => {
            let (password, confirm) = prompt::new_password(ctx.non_interactive)?;
            session.start_passphrase_encryption(&user_name, &password, &confirm, &src, &dst)
        }
        JobMode::Decrypt => {
            let password = prompt::password(ctx.non_interactive, "Password")?;
            session.start_passphrase_job(mode, &user_name, &password, &src, &dst)
        }
    };
    let result = match started {
        Ok(handle) => drive(handle).await,
        Err(e) => Err(e.into()),
    };
    session.close();

    report(result?)
}
