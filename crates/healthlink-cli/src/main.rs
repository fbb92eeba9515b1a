//! healthlink - patient/doctor health records from the command line.
//!
//! Accounts and profiles live with the identity provider, vitals, document
//! indexes and access lists on the ledger, and document bytes in the
//! content store.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod app;
mod commands;
mod session_store;

use app::App;

/// healthlink - patient/doctor health records
#[derive(Parser, Debug)]
#[command(name = "healthlink")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "healthlink.toml")]
    config: PathBuf,

    /// Path to the persisted session
    #[arg(long, env = "HEALTHLINK_SESSION_FILE")]
    session_file: Option<PathBuf>,

    /// Refuse to save a profile without a connected wallet
    #[arg(long)]
    require_wallet: bool,

    /// Print results as JSON
    #[arg(long)]
    json: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    // === Account ===
    /// Create an account and sign in
    Signup(commands::account::SignupArgs),

    /// Sign in with email and password
    Signin(commands::account::SigninArgs),

    /// Sign out and forget the stored session
    Signout,

    /// Show the signed-in identity and session state
    Whoami,

    /// Password reset and change
    #[command(subcommand)]
    Password(commands::account::PasswordCommands),

    // === Wallet ===
    /// Wallet connection
    #[command(subcommand)]
    Wallet(commands::wallet::WalletCommands),

    // === Profile ===
    /// Show or submit the role profile
    #[command(subcommand)]
    Profile(commands::profile::ProfileCommands),

    // === Records ===
    /// Daily vitals
    #[command(subcommand)]
    Vitals(commands::records::VitalsCommands),

    /// Medical documents
    #[command(subcommand)]
    Documents(commands::records::DocumentCommands),

    // === Access ===
    /// Doctor access to the signed-in patient's records
    #[command(subcommand)]
    Access(commands::access::AccessCommands),

    /// Patients who shared records with the signed-in doctor
    Patients,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;
    rt.block_on(run(cli))
}

async fn run(cli: Cli) -> Result<()> {
    let session_file = cli
        .session_file
        .clone()
        .unwrap_or_else(session_store::default_path);
    let app = App::open(&cli.config, session_file, cli.require_wallet).await?;
    let json = cli.json;

    let outcome = match cli.command {
        Commands::Signup(args) => commands::account::signup(&app, args).await,
        Commands::Signin(args) => commands::account::signin(&app, args).await,
        Commands::Signout => commands::account::signout(&app).await,
        Commands::Whoami => commands::account::whoami(&app, json),
        Commands::Password(cmd) => commands::account::run_password(&app, cmd).await,
        Commands::Wallet(cmd) => commands::wallet::run(&app, cmd, json).await,
        Commands::Profile(cmd) => commands::profile::run(&app, cmd, json).await,
        Commands::Vitals(cmd) => commands::records::run_vitals(&app, cmd, json).await,
        Commands::Documents(cmd) => commands::records::run_documents(&app, cmd, json).await,
        Commands::Access(cmd) => commands::access::run(&app, cmd, json).await,
        Commands::Patients => commands::access::patients(&app, json).await,
    };

    // the provider may have rotated tokens even when the command failed
    let closed = app.close();
    outcome?;
    closed
}
