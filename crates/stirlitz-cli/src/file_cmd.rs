//! File subcommands. The job runs in the background while this side
//! reports progress on stderr; Ctrl-C cancels it and leaves the
//! destination untouched.

use std::io::{self, Write};
use std::path::PathBuf;

use stirlitz_core::{JobHandle, JobMode, JobOutput, JobStatus};
use tracing::warn;

use crate::context::CliContext;

/// File subcommand actions.
#[derive(clap::Subcommand, Debug)]
pub enum FileAction {
    /// Encrypt a file with the profile key.
    Encrypt {
        #[arg(short, long)]
        profile: String,
        src: PathBuf,
        dst: PathBuf,
    },
    /// Decrypt a file with the profile key.
    Decrypt {
        #[arg(short, long)]
        profile: String,
        src: PathBuf,
        dst: PathBuf,
    },
}

/// Execute a file subcommand.
pub async fn run(action: FileAction, ctx: &CliContext) -> anyhow::Result<()> {
    let (mode, profile, src, dst) = match action {
        FileAction::Encrypt { profile, src, dst } => (JobMode::Encrypt, profile, src, dst),
        FileAction::Decrypt { profile, src, dst } => (JobMode::Decrypt, profile, src, dst),
    };
    let mut session = ctx.login(&profile).await?;
    let result = match session.start_file_job(mode, &src, &dst) {
        Ok(handle) => drive(handle).await,
        Err(e) => Err(e.into()),
    };
    session.close();
    report(result?)
}

/// Follow a job to completion, printing progress and cancelling on Ctrl-C.
pub async fn drive(handle: JobHandle) -> anyhow::Result<JobOutput> {
    let mut status = handle.subscribe();
    let cancel = handle.cancellation_token();
    let mode = handle.mode();
    let mut wait = Box::pin(handle.wait());
    let mut err = io::stderr();
    let mut watching = true;

    loop {
        tokio::select! {
            result = &mut wait => {
                writeln!(err)?;
                return Ok(result?);
            }
            _ = tokio::signal::ctrl_c(), if !cancel.is_cancelled() => {
                warn!(%mode, "Interrupted, cancelling job");
                cancel.cancel();
            }
            changed = status.changed(), if watching => {
                if changed.is_err() {
                    watching = false;
                    continue;
                }
                if let JobStatus::Running { bytes } = *status.borrow_and_update() {
                    write!(err, "\r{mode}: {}", format_bytes(bytes))?;
                    err.flush()?;
                }
            }
        }
    }
}

/// Tell the user where the output went.
pub fn report(output: JobOutput) -> anyhow::Result<()> {
    if let JobOutput::File(path) = output {
        writeln!(io::stdout(), "Wrote {}", path.display())?;
    }
    Ok(())
}

/// Human-readable byte count for progress lines.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes;
    let mut unit = 0;
    while value >= 1024 * 10 && unit < UNITS.len() - 1 {
        value /= 1024;
        unit += 1;
    }
    format!("{value} {}", UNITS[unit])
}
