//! Access commands for patients and the doctor's patient list.

use anyhow::Result;
use clap::Subcommand;
use healthlink_core::identity::ProfileId;
use healthlink_core::ledger::WalletAddress;
use healthlink_core::records::AccessChange;
use serde_json::json;

use super::print_json;
use super::records::{document_json, format_vitals, print_document};
use crate::app::App;

/// `access` subcommands.
#[derive(Subcommand, Debug)]
pub enum AccessCommands {
    /// Let a doctor read your records
    Grant {
        /// Doctor wallet
        doctor: WalletAddress,

        /// Doctor profile id, recorded in the audit trail
        #[arg(long)]
        doctor_profile: Option<String>,
    },

    /// Withdraw a doctor's access
    Revoke {
        /// Doctor wallet
        doctor: WalletAddress,

        /// Doctor profile id, recorded in the audit trail
        #[arg(long)]
        doctor_profile: Option<String>,
    },

    /// List active grants
    #[command(alias = "ls")]
    List,
}

/// Runs an `access` subcommand.
pub async fn run(app: &App, cmd: AccessCommands, json: bool) -> Result<()> {
    match cmd {
        AccessCommands::Grant {
            doctor,
            doctor_profile,
        } => {
            let profile = doctor_profile.map(ProfileId::new);
            let change = app.service.grant_access(&doctor, profile.as_ref()).await?;
            report("Granted access to", &doctor, &change, json)
        },
        AccessCommands::Revoke {
            doctor,
            doctor_profile,
        } => {
            let profile = doctor_profile.map(ProfileId::new);
            let change = app.service.revoke_access(&doctor, profile.as_ref()).await?;
            report("Revoked access from", &doctor, &change, json)
        },
        AccessCommands::List => {
            let grants = app.service.access_grants().await?;
            if json {
                return print_json(&grants);
            }
            if grants.is_empty() {
                println!("No active grants");
            }
            for grant in &grants {
                println!(
                    "patient {} -> doctor {} since {}",
                    grant.patient_id,
                    grant.doctor_id,
                    grant.access_granted_at.format("%Y-%m-%d %H:%M")
                );
            }
            Ok(())
        },
    }
}

/// Prints the patients who shared records with the signed-in doctor.
pub async fn patients(app: &App, json: bool) -> Result<()> {
    let patients = app.service.shared_patients().await?;
    if json {
        let body: Vec<_> = patients
            .iter()
            .map(|p| {
                json!({
                    "address": p.address,
                    "details": p.details,
                    "vitals": p.vitals,
                    "documents": p.documents.iter().map(document_json).collect::<Vec<_>>(),
                })
            })
            .collect();
        return print_json(&body);
    }
    if patients.is_empty() {
        println!("No patients have shared records with you");
    }
    for patient in &patients {
        let details = &patient.details;
        println!("{} ({})", details.full_name, patient.address);
        println!(
            "  born {}, blood group {}, {} kg, phone {}",
            details.date_of_birth, details.blood_group, details.weight_kg, details.phone_number
        );
        if let Some(latest) = patient.vitals.last() {
            println!("  latest vitals: {}", format_vitals(latest));
        }
        for document in &patient.documents {
            print!("  ");
            print_document(document);
        }
    }
    Ok(())
}

fn report(verb: &str, doctor: &WalletAddress, change: &AccessChange, json: bool) -> Result<()> {
    if json {
        let audit = match &change.audit {
            None => json!(null),
            Some(Ok(grant)) => json!({ "recorded": true, "grant": grant }),
            Some(Err(err)) => json!({ "recorded": false, "error": err.to_string() }),
        };
        return print_json(&json!({
            "doctor": doctor,
            "tx_hash": change.receipt.tx_hash,
            "audit": audit,
        }));
    }
    println!("{verb} {doctor} ({})", change.receipt.tx_hash);
    if let Some(Err(err)) = &change.audit {
        println!("  audit trail not updated: {err}");
    }
    Ok(())
}
