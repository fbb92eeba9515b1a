//! Account commands: sign-up, sign-in, sign-out and passwords.

use anyhow::{Context, Result, bail};
use clap::{Args, Subcommand};
use healthlink_core::identity::{IdentityProviderClient, Role};
use healthlink_core::ledger::WalletAddress;
use healthlink_core::session::{MissingReason, ProfileStatus, SessionPhase, SessionSnapshot};
use secrecy::SecretString;
use serde_json::json;

use super::print_json;
use crate::app::App;

/// Arguments for `signup`.
#[derive(Args, Debug)]
pub struct SignupArgs {
    /// Account email
    email: String,

    /// Account role (patient or doctor)
    #[arg(long, default_value = "patient")]
    role: Role,

    /// Wallet address to record with the account
    #[arg(long)]
    wallet: Option<WalletAddress>,

    /// Password
    #[arg(long, env = "HEALTHLINK_PASSWORD", hide_env_values = true)]
    password: String,
}

/// Arguments for `signin`.
#[derive(Args, Debug)]
pub struct SigninArgs {
    /// Account email
    email: String,

    /// Password
    #[arg(long, env = "HEALTHLINK_PASSWORD", hide_env_values = true)]
    password: String,
}

/// `password` subcommands.
#[derive(Subcommand, Debug)]
pub enum PasswordCommands {
    /// Email a password-reset link
    Reset {
        /// Account email
        email: String,
    },

    /// Change the signed-in account's password
    Update {
        /// New password
        #[arg(long, env = "HEALTHLINK_NEW_PASSWORD", hide_env_values = true)]
        new_password: String,
    },
}

/// Creates an account and signs in.
pub async fn signup(app: &App, args: SignupArgs) -> Result<()> {
    let identity = app
        .identity
        .sign_up(
            args.email.trim(),
            &SecretString::from(args.password),
            args.role,
            args.wallet,
        )
        .await
        .context("sign-up failed")?;
    app.resync().await;
    println!("Created {} account {} ({})", identity.role, identity.email, identity.id);
    if app.snapshot().identity.is_none() {
        println!("Confirm your email address, then run `healthlink signin`.");
    }
    Ok(())
}

/// Signs in.
pub async fn signin(app: &App, args: SigninArgs) -> Result<()> {
    let session = app
        .identity
        .sign_in(args.email.trim(), &SecretString::from(args.password))
        .await
        .context("sign-in failed")?;
    app.resync().await;
    println!(
        "Signed in as {} ({})",
        session.identity.email, session.identity.role
    );
    print_profile_hint(&app.snapshot());
    Ok(())
}

/// Signs out.
pub async fn signout(app: &App) -> Result<()> {
    app.identity.sign_out().await.context("sign-out failed")?;
    app.resync().await;
    println!("Signed out");
    Ok(())
}

/// Prints the session state.
pub fn whoami(app: &App, json: bool) -> Result<()> {
    let snapshot = app.snapshot();
    if json {
        return print_json(&json!({
            "phase": phase_label(snapshot.phase),
            "identity": snapshot.identity,
            "wallet": snapshot.wallet_address(),
            "wallet_connected": snapshot.wallet.is_connected(),
        }));
    }
    let Some(identity) = &snapshot.identity else {
        println!("Not signed in");
        return Ok(());
    };
    println!("{} ({}, {})", identity.email, identity.role, identity.id);
    println!("  session: {}", phase_label(snapshot.phase));
    match snapshot.wallet_address() {
        Some(address) => println!("  wallet:  {address}"),
        None => println!("  wallet:  none"),
    }
    print_profile_hint(&snapshot);
    Ok(())
}

/// Runs a `password` subcommand.
pub async fn run_password(app: &App, cmd: PasswordCommands) -> Result<()> {
    match cmd {
        PasswordCommands::Reset { email } => {
            app.identity
                .request_password_reset(email.trim())
                .await
                .context("password reset failed")?;
            println!("Password reset email sent to {}", email.trim());
        },
        PasswordCommands::Update { new_password } => {
            if app.snapshot().identity.is_none() {
                bail!("not signed in");
            }
            app.identity
                .update_password(&SecretString::from(new_password))
                .await
                .context("password update failed")?;
            println!("Password updated");
        },
    }
    Ok(())
}

pub(crate) const fn phase_label(phase: SessionPhase) -> &'static str {
    match phase {
        SessionPhase::Uninitialized => "uninitialized",
        SessionPhase::Loading => "loading",
        SessionPhase::Anonymous => "anonymous",
        SessionPhase::Authenticated(ProfileStatus::Loaded) => "authenticated",
        SessionPhase::Authenticated(ProfileStatus::Missing(MissingReason::NotCreated)) => {
            "authenticated, profile not created"
        },
        SessionPhase::Authenticated(ProfileStatus::Missing(MissingReason::Unavailable)) => {
            "authenticated, profile unavailable"
        },
    }
}

fn print_profile_hint(snapshot: &SessionSnapshot) {
    match snapshot.phase {
        SessionPhase::Authenticated(ProfileStatus::Missing(MissingReason::NotCreated)) => {
            if let Some(role) = snapshot.role() {
                println!("No {role} profile yet. Create one with `healthlink profile {role}`.");
            }
        },
        SessionPhase::Authenticated(ProfileStatus::Missing(MissingReason::Unavailable)) => {
            println!("Profile could not be loaded right now; try again later.");
        },
        _ => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_labels_distinguish_missing_reasons() {
        assert_ne!(
            phase_label(SessionPhase::Authenticated(ProfileStatus::Missing(
                MissingReason::NotCreated
            ))),
            phase_label(SessionPhase::Authenticated(ProfileStatus::Missing(
                MissingReason::Unavailable
            )))
        );
        assert_eq!(phase_label(SessionPhase::Anonymous), "anonymous");
    }
}
