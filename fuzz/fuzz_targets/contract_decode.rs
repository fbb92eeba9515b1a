//! Fuzz harness for the contract return-data decoders.
//!
//! Return data comes from an RPC node and is untrusted. Every decoder must
//! reject malformed offsets, lengths and UTF-8 with an error, never a panic
//! or an unbounded allocation.

#![no_main]
use healthlink_core::ledger::{abi, contract};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let _ = contract::decode_patient_details(data);
    let _ = contract::decode_doctor_details(data);
    let _ = contract::decode_daily_reports(data);
    let _ = contract::decode_files(data);
    let _ = contract::decode_bool(data);
    let _ = abi::decode_revert_reason(data);
});
