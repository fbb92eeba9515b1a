//! Fuzz harness for `WalletAddress` parsing.
//!
//! Addresses arrive from config files, profile rows and RPC responses. A
//! parsed address must print back to a string that parses to itself.

#![no_main]
use healthlink_core::ledger::WalletAddress;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(address) = text.parse::<WalletAddress>() {
        let printed = address.to_string();
        assert_eq!(printed.parse::<WalletAddress>(), Ok(address));
    }
});
