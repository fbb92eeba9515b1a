//! Profile commands.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::NaiveDate;
use clap::{Args, Subcommand};
use healthlink_core::content::ContentBlob;
use healthlink_core::identity::{DoctorDraft, PatientDraft, Profile};
use healthlink_core::records::ProfileSubmission;
use healthlink_core::validation::split_list;

use super::print_json;
use crate::app::App;

/// `profile` subcommands.
#[derive(Subcommand, Debug)]
pub enum ProfileCommands {
    /// Show the signed-in user's profile
    Show,

    /// Create or update the patient profile
    Patient(PatientArgs),

    /// Create or update the doctor profile
    Doctor(DoctorArgs),
}

/// Patient profile fields.
#[derive(Args, Debug)]
pub struct PatientArgs {
    /// Full name
    #[arg(long)]
    full_name: String,

    /// Date of birth (YYYY-MM-DD)
    #[arg(long)]
    date_of_birth: NaiveDate,

    /// Blood group, e.g. O+
    #[arg(long)]
    blood_group: String,

    /// Weight in kilograms
    #[arg(long)]
    weight: u32,

    /// 12-digit Aadhaar number
    #[arg(long)]
    aadhaar: String,

    /// 10-digit phone number
    #[arg(long)]
    phone: String,

    /// Married
    #[arg(long)]
    married: bool,

    /// Profile photo to upload
    #[arg(long)]
    photo: Option<PathBuf>,
}

/// Doctor profile fields.
#[derive(Args, Debug)]
pub struct DoctorArgs {
    /// Full name
    #[arg(long)]
    full_name: String,

    /// Qualification, e.g. "MBBS, MD"
    #[arg(long)]
    qualification: String,

    /// Comma-separated areas of specialization
    #[arg(long)]
    areas: String,

    /// Phone number
    #[arg(long)]
    phone: String,

    /// Profile photo to upload
    #[arg(long)]
    photo: Option<PathBuf>,
}

/// Runs a `profile` subcommand.
pub async fn run(app: &App, cmd: ProfileCommands, json: bool) -> Result<()> {
    match cmd {
        ProfileCommands::Show => show(app, json),
        ProfileCommands::Patient(args) => {
            let photo = args.photo.as_deref().map(read_blob).transpose()?;
            let draft = PatientDraft {
                full_name: args.full_name,
                date_of_birth: args.date_of_birth,
                blood_group: args.blood_group.trim().to_uppercase(),
                weight: args.weight,
                aadhar_number: args.aadhaar,
                phone_number: args.phone,
                is_married: args.married,
                wallet_address: None,
                profile_photo_url: None,
            };
            let submission = app.service.submit_patient_profile(draft, photo).await?;
            report(&submission, json)
        },
        ProfileCommands::Doctor(args) => {
            let photo = args.photo.as_deref().map(read_blob).transpose()?;
            let draft = DoctorDraft {
                full_name: args.full_name,
                qualification: args.qualification,
                specialized_areas: split_list(&args.areas),
                phone_number: args.phone,
                wallet_address: None,
                profile_photo_url: None,
            };
            let submission = app.service.submit_doctor_profile(draft, photo).await?;
            report(&submission, json)
        },
    }
}

fn show(app: &App, json: bool) -> Result<()> {
    let snapshot = app.snapshot();
    if snapshot.identity.is_none() {
        bail!("not signed in");
    }
    let Some(profile) = &snapshot.profile else {
        println!("No profile loaded");
        return Ok(());
    };
    if json {
        return match profile {
            Profile::Patient(p) => print_json(p),
            Profile::Doctor(d) => print_json(d),
        };
    }
    print_profile(profile);
    Ok(())
}

fn report(submission: &ProfileSubmission, json: bool) -> Result<()> {
    if json {
        let tx_hash = submission.registration.as_ref().map(|r| r.tx_hash.as_str());
        let body = match &submission.profile {
            Profile::Patient(p) => serde_json::json!({ "profile": p, "registration_tx": tx_hash }),
            Profile::Doctor(d) => serde_json::json!({ "profile": d, "registration_tx": tx_hash }),
        };
        return print_json(&body);
    }
    println!("Profile saved ({})", submission.profile.id());
    match &submission.registration {
        Some(receipt) => println!("Registered on chain: {}", receipt.tx_hash),
        None => println!("No wallet connected; on-chain registration skipped"),
    }
    Ok(())
}

fn print_profile(profile: &Profile) {
    match profile {
        Profile::Patient(p) => {
            println!("{} (patient {})", p.full_name, p.id);
            println!("  born:        {}", p.date_of_birth);
            println!("  blood group: {}", p.blood_group);
            println!("  weight:      {} kg", p.weight);
            println!("  phone:       {}", p.phone_number);
            println!("  married:     {}", if p.is_married { "yes" } else { "no" });
        },
        Profile::Doctor(d) => {
            println!("{} (doctor {})", d.full_name, d.id);
            println!("  qualification: {}", d.qualification);
            println!("  specialized:   {}", d.specialized_areas.join(", "));
            println!("  phone:         {}", d.phone_number);
        },
    }
    if let Some(address) = profile.wallet_address() {
        println!("  wallet:      {address}");
    }
}

/// Reads a file for upload.
pub(crate) fn read_blob(path: &Path) -> Result<ContentBlob> {
    let bytes =
        std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let file_name = path
        .file_name()
        .map_or_else(|| "upload".to_string(), |n| n.to_string_lossy().into_owned());
    Ok(ContentBlob::new(file_name, bytes))
}
