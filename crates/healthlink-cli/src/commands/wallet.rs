//! Wallet commands.

use anyhow::Result;
use clap::Subcommand;
use healthlink_core::session::{WalletConnectError, WalletState};
use serde_json::json;

use super::print_json;
use crate::app::App;

/// `wallet` subcommands.
#[derive(Subcommand, Debug)]
pub enum WalletCommands {
    /// Ask the wallet for account access
    Connect,

    /// Show the wallet connection
    Status,
}

/// Runs a `wallet` subcommand.
pub async fn run(app: &App, cmd: WalletCommands, json: bool) -> Result<()> {
    match cmd {
        WalletCommands::Connect => connect(app, json).await,
        WalletCommands::Status => status(app, json),
    }
}

async fn connect(app: &App, json: bool) -> Result<()> {
    match app.service.session().connect_wallet().await {
        Ok(address) => {
            if json {
                return print_json(&json!({ "connected": true, "address": address }));
            }
            println!("Wallet connected: {address}");
            Ok(())
        },
        Err(err) => {
            if json {
                print_json(&json!({ "connected": false, "reason": err.reason() }))?;
            } else {
                println!("{}", advice(&err));
            }
            Err(err.into())
        },
    }
}

fn status(app: &App, json: bool) -> Result<()> {
    let snapshot = app.snapshot();
    let recorded = snapshot.identity.as_ref().and_then(|i| i.wallet_address);
    if json {
        return print_json(&json!({
            "connected": snapshot.wallet.address(),
            "recorded": recorded,
        }));
    }
    match snapshot.wallet {
        WalletState::Connected(address) => println!("Connected: {address}"),
        WalletState::Disconnected => println!("Not connected"),
    }
    if let Some(address) = recorded {
        println!("Recorded on account: {address}");
    }
    Ok(())
}

const fn advice(err: &WalletConnectError) -> &'static str {
    match err {
        WalletConnectError::BridgeUnavailable => {
            "No wallet bridge configured. Set ledger.rpc_url in the config file."
        },
        WalletConnectError::UserDeclined => "The wallet declined the connection request.",
        WalletConnectError::NoAccount => "The wallet has no account to offer.",
        _ => "The wallet could not be reached.",
    }
}
