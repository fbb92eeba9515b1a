//! Subcommand implementations.

pub mod access;
pub mod account;
pub mod profile;
pub mod records;
pub mod wallet;

use anyhow::Result;
use serde::Serialize;

/// Prints `value` as pretty JSON.
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
