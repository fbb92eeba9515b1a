//! Pinata pinning service client.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::multipart::{Form, Part};
use reqwest::{Method, RequestBuilder};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use super::error::PinError;
use super::{ContentBlob, ContentStoreClient, PinMetadata};

/// Pinata pinning API base.
pub const DEFAULT_PINATA_API_URL: &str = "https://api.pinata.cloud/pinning";

/// Public Pinata gateway.
pub const DEFAULT_PINATA_GATEWAY_URL: &str = "https://gateway.pinata.cloud";

/// Connection settings for Pinata.
#[derive(Clone)]
pub struct PinataSettings {
    /// Pinning API base URL.
    pub api_url: String,
    /// Gateway base URL used by [`ContentStoreClient::resolve_url`].
    pub gateway_url: String,
    /// API key, `None` when not configured.
    pub api_key: Option<SecretString>,
    /// API secret, `None` when not configured.
    pub api_secret: Option<SecretString>,
}

impl Default for PinataSettings {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_PINATA_API_URL.to_string(),
            gateway_url: DEFAULT_PINATA_GATEWAY_URL.to_string(),
            api_key: None,
            api_secret: None,
        }
    }
}

impl fmt::Debug for PinataSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PinataSettings")
            .field("api_url", &self.api_url)
            .field("gateway_url", &self.gateway_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("api_secret", &self.api_secret.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct PinResponse {
    #[serde(rename = "IpfsHash")]
    ipfs_hash: String,
}

#[derive(Debug, Default, Deserialize)]
struct KeyValues {
    #[serde(default)]
    category: Option<String>,
    #[serde(default, rename = "uploadDate")]
    upload_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct RowMetadata {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    keyvalues: Option<KeyValues>,
}

#[derive(Debug, Deserialize)]
struct PinRow {
    ipfs_pin_hash: String,
    #[serde(default)]
    size: Option<u64>,
    metadata: RowMetadata,
}

#[derive(Debug, Deserialize)]
struct PinList {
    #[serde(default)]
    rows: Vec<PinRow>,
}

impl PinList {
    fn into_metadata(self, cid: &str) -> Option<PinMetadata> {
        let row = self.rows.into_iter().find(|r| r.ipfs_pin_hash == cid)?;
        let keyvalues = row.metadata.keyvalues.unwrap_or_default();
        Some(PinMetadata {
            name: row.metadata.name.unwrap_or_default(),
            category: keyvalues.category,
            upload_date: keyvalues.upload_date,
            size: row.size,
        })
    }
}

/// [`ContentStoreClient`] backed by Pinata.
pub struct PinataClient {
    settings: PinataSettings,
    http_client: reqwest::Client,
}

impl fmt::Debug for PinataClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PinataClient")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl PinataClient {
    /// Creates a client. Missing credentials are reported per request.
    pub fn new(settings: PinataSettings) -> Result<Self, PinError> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(15))
            .timeout(Duration::from_secs(300))
            .build()?;
        Ok(Self {
            settings,
            http_client,
        })
    }

    /// Whether both API credentials are present.
    #[must_use]
    pub const fn is_configured(&self) -> bool {
        self.settings.api_key.is_some() && self.settings.api_secret.is_some()
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, PinError> {
        let (Some(key), Some(secret)) = (&self.settings.api_key, &self.settings.api_secret) else {
            return Err(PinError::NotConfigured);
        };
        let url = format!("{}/{path}", self.settings.api_url.trim_end_matches('/'));
        Ok(self
            .http_client
            .request(method, url)
            .header("pinata_api_key", key.expose_secret())
            .header("pinata_secret_api_key", secret.expose_secret()))
    }

    async fn check(response: reqwest::Response, cid: Option<&str>) -> Result<reqwest::Response, PinError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(PinError::from_status(status.as_u16(), &body, cid))
    }

    fn upload_form(
        blob: ContentBlob,
        name: &str,
        category: &str,
        uploaded_at: DateTime<Utc>,
    ) -> Result<Form, PinError> {
        let metadata = json!({
            "name": name,
            "keyvalues": {
                "category": category,
                "uploadDate": uploaded_at.to_rfc3339(),
            },
        });
        let options = json!({ "cidVersion": 0 });
        Ok(Form::new()
            .part("file", Part::bytes(blob.bytes).file_name(blob.file_name))
            .text("pinataMetadata", serde_json::to_string(&metadata)?)
            .text("pinataOptions", serde_json::to_string(&options)?))
    }
}

#[async_trait]
impl ContentStoreClient for PinataClient {
    async fn upload(
        &self,
        blob: ContentBlob,
        name: &str,
        category: &str,
    ) -> Result<String, PinError> {
        let size = blob.len();
        let form = Self::upload_form(blob, name, category, Utc::now())?;
        let response = self
            .request(Method::POST, "pinFileToIPFS")?
            .multipart(form)
            .send()
            .await?;
        let pinned: PinResponse = Self::check(response, None).await?.json().await?;
        info!(cid = %pinned.ipfs_hash, size, category, "file pinned");
        Ok(pinned.ipfs_hash)
    }

    async fn metadata(&self, cid: &str) -> Result<Option<PinMetadata>, PinError> {
        let response = self
            .request(Method::GET, "pinList")?
            .query(&[("hashContains", cid), ("status", "pinned")])
            .send()
            .await?;
        let list: PinList = Self::check(response, None).await?.json().await?;
        let metadata = list.into_metadata(cid);
        debug!(cid, found = metadata.is_some(), "pin metadata fetched");
        Ok(metadata)
    }

    async fn unpin(&self, cid: &str) -> Result<(), PinError> {
        let response = self
            .request(Method::DELETE, &format!("unpin/{cid}"))?
            .send()
            .await?;
        Self::check(response, Some(cid)).await?;
        info!(cid, "file unpinned");
        Ok(())
    }

    fn resolve_url(&self, cid: &str) -> String {
        format!("{}/ipfs/{cid}", self.settings.gateway_url.trim_end_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configured() -> PinataSettings {
        PinataSettings {
            api_key: Some(SecretString::from("key-1234")),
            api_secret: Some(SecretString::from("secret-5678")),
            ..PinataSettings::default()
        }
    }

    #[test]
    fn test_resolve_url() {
        let client = PinataClient::new(PinataSettings {
            gateway_url: "https://gw.example/".into(),
            ..PinataSettings::default()
        })
        .unwrap();
        assert_eq!(client.resolve_url("QmAbc"), "https://gw.example/ipfs/QmAbc");
    }

    #[tokio::test]
    async fn test_missing_credentials_fail_before_request() {
        let client = PinataClient::new(PinataSettings::default()).unwrap();
        assert!(!client.is_configured());
        assert_eq!(client.unpin("QmAbc").await, Err(PinError::NotConfigured));
        assert_eq!(
            client
                .upload(ContentBlob::new("a.pdf", vec![1]), "Scan", "Lab")
                .await,
            Err(PinError::NotConfigured)
        );
    }

    #[test]
    fn test_debug_redacts_credentials() {
        let client = PinataClient::new(configured()).unwrap();
        assert!(client.is_configured());
        let debug = format!("{client:?}");
        assert!(!debug.contains("key-1234"));
        assert!(!debug.contains("secret-5678"));
    }

    #[test]
    fn test_pin_list_metadata() {
        let list: PinList = serde_json::from_value(json!({
            "count": 2,
            "rows": [
                {
                    "ipfs_pin_hash": "QmOther",
                    "size": 1,
                    "metadata": { "name": "other" }
                },
                {
                    "ipfs_pin_hash": "QmAbc",
                    "size": 2048,
                    "metadata": {
                        "name": "Blood test",
                        "keyvalues": {
                            "category": "Lab",
                            "uploadDate": "2024-03-01T09:30:00.000Z"
                        }
                    }
                }
            ]
        }))
        .unwrap();
        let metadata = list.into_metadata("QmAbc").unwrap();
        assert_eq!(metadata.name, "Blood test");
        assert_eq!(metadata.category.as_deref(), Some("Lab"));
        assert_eq!(metadata.size, Some(2048));
        assert!(metadata.upload_date.is_some());
    }

    #[test]
    fn test_pin_list_without_match() {
        let list: PinList = serde_json::from_value(json!({ "count": 0, "rows": [] })).unwrap();
        assert_eq!(list.into_metadata("QmAbc"), None);
    }
}
