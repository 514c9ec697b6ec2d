//! Stirlitz CLI
//!
//! Encrypt text and files for one counterpart after a manual key exchange.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::info;

use stirlitz_cli::context::CliContext;
use stirlitz_cli::file_cmd::{self, FileAction};
use stirlitz_cli::key_cmd::{self, KeyAction};
use stirlitz_cli::local_cmd::{self, LocalAction};
use stirlitz_cli::oneshot;
use stirlitz_cli::profile_cmd::{self, ProfileAction};
use stirlitz_cli::text_cmd::{self, TextAction};
use stirlitz_core::config::load_config;
use stirlitz_core::tracing_init::init_tracing;

#[derive(Parser, Debug)]
#[command(name = "stirlitz")]
#[command(version, about = "Symmetric encryption with a manually exchanged key", long_about = None)]
struct Cli {
    /// Profile directory (overrides config and `STIRLITZ_PROFILES_DIR`)
    #[arg(long, global = true)]
    profiles_dir: Option<PathBuf>,

    /// Never prompt; the password is read from `STIRLITZ_PASSWORD`
    #[arg(long, global = true)]
    non_interactive: bool,

    /// Answer yes to confirmations
    #[arg(short, long, global = true)]
    yes: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Manage profiles
    #[command(subcommand)]
    Profile(ProfileAction),
    /// Exchange or clear the shared key of a profile
    #[command(subcommand)]
    Key(KeyAction),
    /// Encrypt or decrypt text from stdin
    #[command(subcommand)]
    Text(TextAction),
    /// Encrypt or decrypt a file with a profile key
    #[command(subcommand)]
    File(FileAction),
    /// Encrypt or decrypt a file with a user name and password
    #[command(subcommand)]
    Local(LocalAction),
    /// One-time session: exchange a key, then encrypt/decrypt stdin lines
    Oneshot {
        #[arg(short, long)]
        user: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = load_config()?;
    if let Some(dir) = cli.profiles_dir {
        config.store.profiles_dir = dir;
    }
    let level = &config.log.level;
    init_tracing(
        &format!("stirlitz={level},stirlitz_cli={level},stirlitz_core={level}"),
        config.log.json,
    );
    info!(version = env!("CARGO_PKG_VERSION"), "Starting stirlitz CLI");

    let ctx = CliContext::open(&config, cli.non_interactive, cli.yes)?;

    match cli.command {
        Commands::Profile(action) => profile_cmd::run(action, &ctx).await,
        Commands::Key(action) => key_cmd::run(action, &ctx).await,
        Commands::Text(action) => text_cmd::run(action, &ctx).await,
        Commands::File(action) => file_cmd::run(action, &ctx).await,
        Commands::Local(action) => local_cmd::run(action, &ctx).await,
        Commands::Oneshot { user } => oneshot::run(user, &ctx).await,
    }
}
