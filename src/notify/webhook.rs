use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use log::{debug, warn};
use reqwest::Client;
use serde::Serialize;
use sha2::Sha256;

use crate::{
    models::{ExtractedData, OwnerKey},
    scan::{NotifyError, NotifySink},
};

const HTTP_TIMEOUT: u64 = 20;
const ERROR_BODY_LIMIT: usize = 200;

pub const SIGNATURE_HEADER: &str = "X-Chainscan-Signature";
pub const TIMESTAMP_HEADER: &str = "X-Chainscan-Timestamp";

type HmacSha256 = Hmac<Sha256>;

/// Body posted for every delivered owner key.
#[derive(Debug, Serialize)]
pub struct WebhookPayload<'a> {
    pub event_type: &'static str,
    pub owner: String,
    pub created_at: String,
    pub data: &'a ExtractedData,
}

/// Posts extracted data as signed JSON to a single endpoint.
///
/// A 4xx response is reported as [`NotifyError::Rejected`], anything else that is not a 2xx as
/// [`NotifyError::Transport`]. Either way the transaction ends up in the unscanned ledger.
pub struct WebhookNotifySink {
    client: Client,
    url: String,
    secret: String,
}

impl WebhookNotifySink {
    pub fn new(url: impl Into<String>, secret: impl Into<String>) -> Result<Self, NotifyError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT))
            .user_agent(concat!("chainscan/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| NotifyError::Transport(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: url.into(),
            secret: secret.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn post(&self, payload: &str) -> Result<(), NotifyError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::from_secs(0))
            .as_secs();
        let signature = sign_payload(&self.secret, now, payload)?;

        let response = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .header(SIGNATURE_HEADER, signature)
            .header(TIMESTAMP_HEADER, now.to_string())
            .body(payload.to_string())
            .send()
            .await
            .map_err(|e| NotifyError::Transport(format!("Network error: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        if status.is_client_error() {
            let body: String = response
                .text()
                .await
                .unwrap_or_default()
                .chars()
                .take(ERROR_BODY_LIMIT)
                .collect();
            return Err(NotifyError::Rejected(format!("Client error {}: {}", status, body)));
        }
        Err(NotifyError::Transport(format!("Server error {}", status)))
    }
}

/// Signs `"<timestamp>.<payload>"` and renders the header value `t=<timestamp>,v1=<hex>`.
fn sign_payload(secret: &str, timestamp: u64, payload: &str) -> Result<String, NotifyError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| NotifyError::Rejected("Invalid webhook secret".to_string()))?;
    mac.update(format!("{}.{}", timestamp, payload).as_bytes());
    let signature = hex::encode(mac.finalize().into_bytes());
    Ok(format!("t={},v1={}", timestamp, signature))
}

#[async_trait]
impl NotifySink for WebhookNotifySink {
    async fn notify(&self, owner: &OwnerKey, data: &ExtractedData) -> Result<(), NotifyError> {
        let payload = WebhookPayload {
            event_type: "data_extracted",
            owner: owner.to_string(),
            created_at: Utc::now().to_rfc3339(),
            data,
        };
        let body = serde_json::to_string(&payload)
            .map_err(|e| NotifyError::Rejected(format!("Serialization error: {}", e)))?;

        match self.post(&body).await {
            Ok(()) => {
                debug!(owner:% = owner; "Webhook delivered");
                Ok(())
            },
            Err(e) => {
                warn!(owner:% = owner, error:% = e; "Webhook delivery failed");
                Err(e)
            },
        }
    }
}
