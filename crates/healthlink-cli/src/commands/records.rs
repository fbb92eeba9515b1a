//! Vitals and document commands.

use std::path::PathBuf;

use anyhow::Result;
use clap::Subcommand;
use healthlink_core::ledger::{VitalRecord, WalletAddress};
use healthlink_core::records::{DocumentUpload, DocumentView, VitalReading};
use serde_json::json;

use super::print_json;
use super::profile::read_blob;
use crate::app::App;

/// `vitals` subcommands.
#[derive(Subcommand, Debug)]
pub enum VitalsCommands {
    /// Record today's reading
    Add {
        /// Systolic pressure (mmHg)
        #[arg(long)]
        systolic: u32,

        /// Diastolic pressure (mmHg)
        #[arg(long)]
        diastolic: u32,

        /// Blood sugar (mg/dL)
        #[arg(long)]
        sugar: u32,

        /// Heart rate (bpm)
        #[arg(long)]
        heart_rate: u32,
    },

    /// List readings
    #[command(alias = "ls")]
    List {
        /// Patient wallet (defaults to the signed-in patient)
        #[arg(long)]
        patient: Option<WalletAddress>,
    },
}

/// `documents` subcommands.
#[derive(Subcommand, Debug)]
pub enum DocumentCommands {
    /// Pin a file and record it on the ledger
    Upload {
        /// File to upload
        file: PathBuf,

        /// Document title
        #[arg(long)]
        title: String,

        /// Category, e.g. Lab or Radiology
        #[arg(long)]
        category: String,

        /// Notes
        #[arg(long, default_value = "")]
        notes: String,
    },

    /// List documents
    #[command(alias = "ls")]
    List {
        /// Patient wallet (defaults to the signed-in patient)
        #[arg(long)]
        patient: Option<WalletAddress>,
    },

    /// Remove a document's pin (the ledger entry stays)
    Unpin {
        /// Content identifier
        cid: String,
    },
}

/// Runs a `vitals` subcommand.
pub async fn run_vitals(app: &App, cmd: VitalsCommands, json: bool) -> Result<()> {
    match cmd {
        VitalsCommands::Add {
            systolic,
            diastolic,
            sugar,
            heart_rate,
        } => {
            let reading = VitalReading {
                systolic,
                diastolic,
                blood_sugar: sugar,
                heart_rate,
            };
            let (record, receipt) = app.service.record_vitals(reading).await?;
            if json {
                return print_json(&json!({ "record": record, "tx_hash": receipt.tx_hash }));
            }
            println!("Recorded {} ({})", format_vitals(&record), receipt.tx_hash);
        },
        VitalsCommands::List { patient } => {
            let records = app.service.vitals(patient).await?;
            if json {
                return print_json(&records);
            }
            if records.is_empty() {
                println!("No vitals recorded");
            }
            for record in &records {
                println!("{}  {}", record.recorded_at, format_vitals(record));
            }
        },
    }
    Ok(())
}

/// Runs a `documents` subcommand.
pub async fn run_documents(app: &App, cmd: DocumentCommands, json: bool) -> Result<()> {
    match cmd {
        DocumentCommands::Upload {
            file,
            title,
            category,
            notes,
        } => {
            let upload = DocumentUpload {
                title,
                category,
                notes,
                file: read_blob(&file)?,
            };
            let (view, receipt) = app.service.upload_document(upload).await?;
            if json {
                return print_json(&json!({
                    "document": document_json(&view),
                    "tx_hash": receipt.tx_hash,
                }));
            }
            println!("Uploaded {} ({})", view.record.name, view.record.content_id);
            println!("  {}", view.url);
        },
        DocumentCommands::List { patient } => {
            let views = app.service.documents(patient).await?;
            if json {
                let docs: Vec<_> = views.iter().map(document_json).collect();
                return print_json(&docs);
            }
            if views.is_empty() {
                println!("No documents");
            }
            for view in &views {
                print_document(view);
            }
        },
        DocumentCommands::Unpin { cid } => {
            app.service.unpin_document(&cid).await?;
            println!("Unpinned {cid}");
        },
    }
    Ok(())
}

pub(crate) fn format_vitals(record: &VitalRecord) -> String {
    format!(
        "BP {}/{} mmHg, sugar {} mg/dL, pulse {} bpm",
        record.systolic, record.diastolic, record.blood_sugar, record.heart_rate
    )
}

pub(crate) fn document_json(view: &DocumentView) -> serde_json::Value {
    json!({
        "cid": view.record.content_id,
        "name": view.record.name,
        "category": view.record.category,
        "uploaded_on": view.record.uploaded_on,
        "notes": view.record.notes,
        "url": view.url,
    })
}

pub(crate) fn print_document(view: &DocumentView) {
    println!(
        "{}  [{}] {}  {}",
        view.record.uploaded_on, view.record.category, view.record.name, view.url
    );
    if !view.record.notes.is_empty() {
        println!("    {}", view.record.notes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_vitals() {
        let record = VitalRecord {
            recorded_at: "2024-03-01T09:30:00.000Z".into(),
            systolic: 120,
            diastolic: 80,
            blood_sugar: 95,
            heart_rate: 72,
        };
        assert_eq!(
            format_vitals(&record),
            "BP 120/80 mmHg, sugar 95 mg/dL, pulse 72 bpm"
        );
    }
}
