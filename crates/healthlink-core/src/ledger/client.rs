//! Ledger client: the health-record contract behind a wallet bridge.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use super::address::WalletAddress;
use super::bridge::WalletBridge;
use super::contract::{self, selectors};
use super::error::ChainError;
use super::types::{
    DoctorDetails, DoctorRegistration, DocumentRecord, PatientDetails, TxReceipt, VitalRecord,
};

/// Default delay between receipt polls.
pub const DEFAULT_RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Default number of receipt polls before giving up.
pub const DEFAULT_RECEIPT_POLL_ATTEMPTS: u32 = 120;

/// Capability interface over the wallet bridge and the contract.
///
/// Every method either returns the requested value or a classified
/// [`ChainError`]; nothing is swallowed. Only [`LedgerClient::connect`] may
/// prompt the user.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Returns `true` if a wallet bridge is present at all.
    fn is_bridge_available(&self) -> bool;

    /// Asks the wallet for account access, prompting the user.
    ///
    /// Returns [`ChainError::BridgeUnavailable`] without a bridge and
    /// [`ChainError::UserRejected`] when the user declines.
    async fn connect(&self) -> Result<(), ChainError>;

    /// Returns the active account without prompting.
    async fn active_address(&self) -> Result<Option<WalletAddress>, ChainError>;

    /// Calls `registerPatient` from the active account.
    async fn register_patient(&self, details: &PatientDetails) -> Result<TxReceipt, ChainError>;

    /// Calls `registerDoctor` from the active account.
    async fn register_doctor(
        &self,
        registration: &DoctorRegistration,
    ) -> Result<TxReceipt, ChainError>;

    /// Calls `addDailyReport` from the active account.
    async fn add_vital_record(&self, vitals: &VitalRecord) -> Result<TxReceipt, ChainError>;

    /// Calls `uploadFile` from the active account.
    async fn add_document_record(&self, document: &DocumentRecord)
    -> Result<TxReceipt, ChainError>;

    /// Calls `grantAccess(doctor)` from the active (patient) account.
    async fn grant_access(&self, doctor: &WalletAddress) -> Result<TxReceipt, ChainError>;

    /// Calls `revokeAccess(doctor)` from the active (patient) account.
    async fn revoke_access(&self, doctor: &WalletAddress) -> Result<TxReceipt, ChainError>;

    /// Reads `getPatientDetails`.
    async fn patient_details(&self, patient: &WalletAddress) -> Result<PatientDetails, ChainError>;

    /// Reads `getDoctorDetails`.
    async fn doctor_details(&self, doctor: &WalletAddress) -> Result<DoctorDetails, ChainError>;

    /// Reads `getDailyReports`.
    async fn vital_records(&self, patient: &WalletAddress) -> Result<Vec<VitalRecord>, ChainError>;

    /// Reads `getFiles`.
    async fn document_records(
        &self,
        patient: &WalletAddress,
    ) -> Result<Vec<DocumentRecord>, ChainError>;

    /// Reads `isPatient`.
    async fn is_patient(&self, address: &WalletAddress) -> Result<bool, ChainError>;

    /// Reads `isDoctor`.
    async fn is_doctor(&self, address: &WalletAddress) -> Result<bool, ChainError>;
}

/// [`LedgerClient`] that talks to the deployed contract through a
/// [`WalletBridge`].
///
/// Writes are sent with `eth_sendTransaction` from the active account and
/// then confirmed by polling `eth_getTransactionReceipt`; reads use
/// `eth_call` against `latest`.
pub struct ContractLedgerClient {
    bridge: Option<Arc<dyn WalletBridge>>,
    contract: WalletAddress,
    poll_interval: Duration,
    poll_attempts: u32,
}

impl ContractLedgerClient {
    /// Creates a client for `contract`. `bridge` is `None` when no wallet is
    /// installed.
    #[must_use]
    pub fn new(bridge: Option<Arc<dyn WalletBridge>>, contract: WalletAddress) -> Self {
        Self {
            bridge,
            contract,
            poll_interval: DEFAULT_RECEIPT_POLL_INTERVAL,
            poll_attempts: DEFAULT_RECEIPT_POLL_ATTEMPTS,
        }
    }

    /// Sets the receipt polling schedule.
    #[must_use]
    pub fn with_receipt_polling(mut self, interval: Duration, attempts: u32) -> Self {
        self.poll_interval = interval;
        self.poll_attempts = attempts.max(1);
        self
    }

    /// Contract address.
    #[must_use]
    pub const fn contract(&self) -> &WalletAddress {
        &self.contract
    }

    fn bridge(&self) -> Result<&dyn WalletBridge, ChainError> {
        self.bridge.as_deref().ok_or(ChainError::BridgeUnavailable)
    }

    async fn accounts(&self, method: &str) -> Result<Vec<WalletAddress>, ChainError> {
        let result = self.bridge()?.request(method, json!([])).await?;
        let accounts: Vec<String> = serde_json::from_value(result)?;
        accounts
            .iter()
            .map(|raw| {
                raw.parse()
                    .map_err(|err| ChainError::MalformedResponse(format!("account {raw}: {err}")))
            })
            .collect()
    }

    async fn send(&self, method: &'static str, data: Vec<u8>) -> Result<TxReceipt, ChainError> {
        let bridge = self.bridge()?;
        let from = self
            .active_address()
            .await?
            .ok_or(ChainError::NotConnected)?;

        let tx = json!([{
            "from": from.to_string(),
            "to": self.contract.to_string(),
            "data": format!("0x{}", hex::encode(data)),
        }]);
        let tx_hash = bridge
            .request("eth_sendTransaction", tx)
            .await?
            .as_str()
            .map(String::from)
            .ok_or_else(|| ChainError::MalformedResponse("transaction hash".into()))?;
        info!(method, tx_hash = %tx_hash, from = %from, "transaction submitted");

        let receipt = self.await_receipt(bridge, &tx_hash).await?;
        info!(method, tx_hash = %tx_hash, block = ?receipt.block_number, "transaction confirmed");
        Ok(receipt)
    }

    async fn await_receipt(
        &self,
        bridge: &dyn WalletBridge,
        tx_hash: &str,
    ) -> Result<TxReceipt, ChainError> {
        for attempt in 1..=self.poll_attempts {
            let receipt = bridge
                .request("eth_getTransactionReceipt", json!([tx_hash]))
                .await?;
            if !receipt.is_null() {
                return parse_receipt(tx_hash, &receipt);
            }
            debug!(tx_hash, attempt, "receipt not yet available");
            tokio::time::sleep(self.poll_interval).await;
        }
        warn!(tx_hash, attempts = self.poll_attempts, "gave up waiting for receipt");
        Err(ChainError::ReceiptTimeout {
            tx_hash: tx_hash.to_string(),
            attempts: self.poll_attempts,
        })
    }

    async fn call(&self, data: Vec<u8>) -> Result<Vec<u8>, ChainError> {
        let bridge = self.bridge()?;
        let mut call = json!({
            "to": self.contract.to_string(),
            "data": format!("0x{}", hex::encode(data)),
        });
        // view functions may check msg.sender
        match self.active_address().await {
            Ok(Some(from)) => call["from"] = Value::String(from.to_string()),
            Ok(None) => {},
            Err(err) => debug!(error = %err, "eth_accounts failed, calling without sender"),
        }
        let result = bridge.request("eth_call", json!([call, "latest"])).await?;
        let raw = result
            .as_str()
            .ok_or_else(|| ChainError::MalformedResponse("eth_call result".into()))?;
        hex::decode(raw.trim_start_matches("0x"))
            .map_err(|err| ChainError::MalformedResponse(format!("eth_call result: {err}")))
    }
}

impl std::fmt::Debug for ContractLedgerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContractLedgerClient")
            .field("bridge", &self.bridge.is_some())
            .field("contract", &self.contract)
            .field("poll_interval", &self.poll_interval)
            .field("poll_attempts", &self.poll_attempts)
            .finish()
    }
}

fn parse_quantity(value: Option<&Value>) -> Option<u64> {
    value
        .and_then(Value::as_str)
        .and_then(|raw| u64::from_str_radix(raw.trim_start_matches("0x"), 16).ok())
}

fn parse_receipt(tx_hash: &str, receipt: &Value) -> Result<TxReceipt, ChainError> {
    match receipt.get("status").and_then(Value::as_str) {
        Some("0x1") => Ok(TxReceipt {
            tx_hash: tx_hash.to_string(),
            block_number: parse_quantity(receipt.get("blockNumber")),
            gas_used: parse_quantity(receipt.get("gasUsed")),
        }),
        Some("0x0") => Err(ChainError::Reverted { reason: None }),
        other => Err(ChainError::MalformedResponse(format!(
            "receipt status {other:?} for {tx_hash}"
        ))),
    }
}

#[async_trait]
impl LedgerClient for ContractLedgerClient {
    fn is_bridge_available(&self) -> bool {
        self.bridge.is_some()
    }

    async fn connect(&self) -> Result<(), ChainError> {
        let accounts = self.accounts("eth_requestAccounts").await?;
        if accounts.is_empty() {
            return Err(ChainError::NotConnected);
        }
        info!(address = %accounts[0], "wallet connected");
        Ok(())
    }

    async fn active_address(&self) -> Result<Option<WalletAddress>, ChainError> {
        Ok(self.accounts("eth_accounts").await?.into_iter().next())
    }

    async fn register_patient(&self, details: &PatientDetails) -> Result<TxReceipt, ChainError> {
        self.send("registerPatient", contract::register_patient(details))
            .await
    }

    async fn register_doctor(
        &self,
        registration: &DoctorRegistration,
    ) -> Result<TxReceipt, ChainError> {
        self.send("registerDoctor", contract::register_doctor(registration))
            .await
    }

    async fn add_vital_record(&self, vitals: &VitalRecord) -> Result<TxReceipt, ChainError> {
        self.send("addDailyReport", contract::add_daily_report(vitals))
            .await
    }

    async fn add_document_record(
        &self,
        document: &DocumentRecord,
    ) -> Result<TxReceipt, ChainError> {
        self.send("uploadFile", contract::upload_file(document))
            .await
    }

    async fn grant_access(&self, doctor: &WalletAddress) -> Result<TxReceipt, ChainError> {
        self.send(
            "grantAccess",
            contract::address_call(selectors::GRANT_ACCESS, doctor),
        )
        .await
    }

    async fn revoke_access(&self, doctor: &WalletAddress) -> Result<TxReceipt, ChainError> {
        self.send(
            "revokeAccess",
            contract::address_call(selectors::REVOKE_ACCESS, doctor),
        )
        .await
    }

    async fn patient_details(&self, patient: &WalletAddress) -> Result<PatientDetails, ChainError> {
        let data = self
            .call(contract::address_call(selectors::GET_PATIENT_DETAILS, patient))
            .await?;
        contract::decode_patient_details(&data)
    }

    async fn doctor_details(&self, doctor: &WalletAddress) -> Result<DoctorDetails, ChainError> {
        let data = self
            .call(contract::address_call(selectors::GET_DOCTOR_DETAILS, doctor))
            .await?;
        contract::decode_doctor_details(&data)
    }

    async fn vital_records(&self, patient: &WalletAddress) -> Result<Vec<VitalRecord>, ChainError> {
        let data = self
            .call(contract::address_call(selectors::GET_DAILY_REPORTS, patient))
            .await?;
        contract::decode_daily_reports(&data)
    }

    async fn document_records(
        &self,
        patient: &WalletAddress,
    ) -> Result<Vec<DocumentRecord>, ChainError> {
        let data = self
            .call(contract::address_call(selectors::GET_FILES, patient))
            .await?;
        contract::decode_files(&data)
    }

    async fn is_patient(&self, address: &WalletAddress) -> Result<bool, ChainError> {
        let data = self
            .call(contract::address_call(selectors::IS_PATIENT, address))
            .await?;
        contract::decode_bool(&data)
    }

    async fn is_doctor(&self, address: &WalletAddress) -> Result<bool, ChainError> {
        let data = self
            .call(contract::address_call(selectors::IS_DOCTOR, address))
            .await?;
        contract::decode_bool(&data)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;
    use crate::ledger::abi::{Token, encode};

    /// Bridge that replays canned responses and records requests.
    #[derive(Default)]
    struct ScriptedBridge {
        responses: Mutex<VecDeque<Result<Value, ChainError>>>,
        requests: Mutex<Vec<(String, Value)>>,
    }

    impl ScriptedBridge {
        fn push(&self, response: Result<Value, ChainError>) {
            self.responses.lock().unwrap().push_back(response);
        }

        fn methods(&self) -> Vec<String> {
            self.requests
                .lock()
                .unwrap()
                .iter()
                .map(|(m, _)| m.clone())
                .collect()
        }
    }

    #[async_trait]
    impl WalletBridge for ScriptedBridge {
        async fn request(&self, method: &str, params: Value) -> Result<Value, ChainError> {
            self.requests
                .lock()
                .unwrap()
                .push((method.to_string(), params));
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(Value::Null))
        }
    }

    const ACCOUNT: &str = "0x00000000000000000000000000000000000000ab";

    fn client(bridge: &Arc<ScriptedBridge>) -> ContractLedgerClient {
        let bridge: Arc<dyn WalletBridge> = bridge.clone();
        ContractLedgerClient::new(Some(bridge), WalletAddress::from_bytes([0xcc; 20]))
            .with_receipt_polling(Duration::from_millis(1), 3)
    }

    #[tokio::test]
    async fn test_no_bridge_is_unavailable() {
        let client = ContractLedgerClient::new(None, WalletAddress::ZERO);
        assert!(!client.is_bridge_available());
        assert_eq!(client.connect().await, Err(ChainError::BridgeUnavailable));
        assert_eq!(
            client.active_address().await,
            Err(ChainError::BridgeUnavailable)
        );
    }

    #[tokio::test]
    async fn test_connect_declined() {
        let bridge = Arc::new(ScriptedBridge::default());
        bridge.push(Err(ChainError::UserRejected));
        assert_eq!(client(&bridge).connect().await, Err(ChainError::UserRejected));
    }

    #[tokio::test]
    async fn test_active_address_without_accounts() {
        let bridge = Arc::new(ScriptedBridge::default());
        bridge.push(Ok(json!([])));
        assert_eq!(client(&bridge).active_address().await, Ok(None));
        assert_eq!(bridge.methods(), vec!["eth_accounts"]);
    }

    #[tokio::test]
    async fn test_write_polls_until_receipt() {
        let bridge = Arc::new(ScriptedBridge::default());
        bridge.push(Ok(json!([ACCOUNT])));
        bridge.push(Ok(json!("0xfeed")));
        bridge.push(Ok(Value::Null));
        bridge.push(Ok(json!({"status": "0x1", "blockNumber": "0x10", "gasUsed": "0x5208"})));

        let receipt = client(&bridge)
            .grant_access(&WalletAddress::from_bytes([0xdd; 20]))
            .await
            .expect("grant should succeed");
        assert_eq!(receipt.tx_hash, "0xfeed");
        assert_eq!(receipt.block_number, Some(16));
        assert_eq!(receipt.gas_used, Some(21_000));
        assert_eq!(
            bridge.methods(),
            vec![
                "eth_accounts",
                "eth_sendTransaction",
                "eth_getTransactionReceipt",
                "eth_getTransactionReceipt",
            ]
        );

        let requests = bridge.requests.lock().unwrap();
        let data = requests[1].1[0]["data"].as_str().unwrap();
        assert!(data.starts_with("0x0ae5e739"));
        assert_eq!(requests[1].1[0]["from"], ACCOUNT);
    }

    #[tokio::test]
    async fn test_failed_status_is_revert() {
        let bridge = Arc::new(ScriptedBridge::default());
        bridge.push(Ok(json!([ACCOUNT])));
        bridge.push(Ok(json!("0xbad")));
        bridge.push(Ok(json!({"status": "0x0"})));
        let err = client(&bridge)
            .revoke_access(&WalletAddress::from_bytes([0xdd; 20]))
            .await
            .unwrap_err();
        assert_eq!(err, ChainError::Reverted { reason: None });
    }

    #[tokio::test]
    async fn test_receipt_timeout() {
        let bridge = Arc::new(ScriptedBridge::default());
        bridge.push(Ok(json!([ACCOUNT])));
        bridge.push(Ok(json!("0xslow")));
        let err = client(&bridge)
            .grant_access(&WalletAddress::from_bytes([0xdd; 20]))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ChainError::ReceiptTimeout {
                tx_hash: "0xslow".into(),
                attempts: 3
            }
        );
    }

    #[tokio::test]
    async fn test_write_without_account_not_connected() {
        let bridge = Arc::new(ScriptedBridge::default());
        bridge.push(Ok(json!([])));
        let err = client(&bridge)
            .add_vital_record(&VitalRecord {
                recorded_at: "2024-01-01T00:00:00Z".into(),
                systolic: 120,
                diastolic: 80,
                blood_sugar: 90,
                heart_rate: 70,
            })
            .await
            .unwrap_err();
        assert_eq!(err, ChainError::NotConnected);
    }

    #[tokio::test]
    async fn test_view_decodes_eth_call_result() {
        let bridge = Arc::new(ScriptedBridge::default());
        bridge.push(Ok(json!([ACCOUNT])));
        bridge.push(Ok(json!(format!("0x{}", hex::encode(encode(&[Token::Bool(true)]))))));
        let patient = WalletAddress::from_bytes([0x01; 20]);
        assert!(client(&bridge).is_patient(&patient).await.unwrap());

        let requests = bridge.requests.lock().unwrap();
        assert_eq!(requests[1].0, "eth_call");
        assert_eq!(requests[1].1[1], "latest");
        assert_eq!(requests[1].1[0]["from"], ACCOUNT);
    }

    #[tokio::test]
    async fn test_view_without_accounts_omits_sender() {
        let bridge = Arc::new(ScriptedBridge::default());
        bridge.push(Err(ChainError::Unauthorized));
        bridge.push(Ok(json!(format!("0x{}", hex::encode(encode(&[Token::Bool(false)]))))));
        let doctor = WalletAddress::from_bytes([0x02; 20]);
        assert!(!client(&bridge).is_doctor(&doctor).await.unwrap());

        let requests = bridge.requests.lock().unwrap();
        assert_eq!(requests[0].0, "eth_accounts");
        assert_eq!(requests[1].0, "eth_call");
        assert!(requests[1].1[0].get("from").is_none());
    }
}
