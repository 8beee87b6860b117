use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::db::entities::dns_account;
use crate::dns::cloudflare::CloudflareProvider;
use crate::services::credential_cipher::CredentialCipher;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("Record or zone not found: {0}")]
    NotFound(String),
    #[error("Record already exists: {0}")]
    AlreadyExists(String),
    #[error("Provider rejected the request ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Provider call timed out after {0:?}")]
    Timeout(Duration),
    #[error("Unsupported provider: {0}")]
    Unsupported(String),
    #[error("Unexpected provider response: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ProviderError::NotFound(_))
    }
}

/// Desired state of one provider record. `name` is fully qualified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSpec {
    pub name: String,
    pub record_type: String,
    pub content: String,
    pub ttl: i32,
    pub priority: Option<i32>,
    pub proxied: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderRecord {
    pub id: String,
    pub name: String,
    pub record_type: String,
    pub content: String,
    pub ttl: i32,
    pub priority: Option<i32>,
    pub proxied: bool,
}

impl ProviderRecord {
    /// Provider names are compared case-insensitively and without a trailing dot.
    pub fn matches(&self, name: &str, record_type: &str) -> bool {
        normalize_name(&self.name) == normalize_name(name)
            && self.record_type.eq_ignore_ascii_case(record_type)
    }
}

pub fn normalize_name(name: &str) -> String {
    name.trim().trim_end_matches('.').to_ascii_lowercase()
}

#[async_trait]
pub trait DnsProvider: Send + Sync {
    /// Provider zone identifier for a registered domain.
    async fn resolve_zone(&self, domain: &str) -> Result<String, ProviderError>;

    async fn list_records(&self, zone_id: &str) -> Result<Vec<ProviderRecord>, ProviderError>;

    async fn create_record(
        &self,
        zone_id: &str,
        record: &RecordSpec,
    ) -> Result<ProviderRecord, ProviderError>;

    /// Must return [`ProviderError::NotFound`] when `remote_id` no longer exists.
    async fn update_record(
        &self,
        zone_id: &str,
        remote_id: &str,
        record: &RecordSpec,
    ) -> Result<ProviderRecord, ProviderError>;

    /// Must return [`ProviderError::NotFound`] when `remote_id` no longer exists.
    async fn delete_record(&self, zone_id: &str, remote_id: &str) -> Result<(), ProviderError>;
}

/// Builds a provider client from a stored account.
#[async_trait]
pub trait ProviderFactory: Send + Sync {
    async fn for_account(
        &self,
        account: &dns_account::Model,
    ) -> Result<Arc<dyn DnsProvider>, ProviderError>;
}

#[derive(Debug, Clone, Copy)]
pub struct ProviderTimeouts {
    /// Single-record calls: create and update.
    pub validation: Duration,
    pub list: Duration,
    /// Zone lookup on first sync of a domain.
    pub bootstrap: Duration,
}

impl Default for ProviderTimeouts {
    fn default() -> Self {
        Self {
            validation: Duration::from_secs(10),
            list: Duration::from_secs(30),
            bootstrap: Duration::from_secs(60),
        }
    }
}

#[derive(Deserialize)]
struct CloudflareCredentials {
    api_token: String,
}

/// Decrypts account credentials and hands out the matching adapter. Every adapter
/// shares one HTTP client and its connection pool.
pub struct AccountProviderFactory {
    cipher: CredentialCipher,
    client: reqwest::Client,
    cloudflare_api_base: String,
    timeouts: ProviderTimeouts,
}

impl AccountProviderFactory {
    pub fn new(
        cipher: CredentialCipher,
        cloudflare_api_base: String,
        timeouts: ProviderTimeouts,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| ProviderError::Transport(e.to_string()))?;
        Ok(Self {
            cipher,
            client,
            cloudflare_api_base,
            timeouts,
        })
    }
}

#[async_trait]
impl ProviderFactory for AccountProviderFactory {
    async fn for_account(
        &self,
        account: &dns_account::Model,
    ) -> Result<Arc<dyn DnsProvider>, ProviderError> {
        match account.provider.to_ascii_lowercase().as_str() {
            "cloudflare" => {
                let plaintext = self
                    .cipher
                    .open(&account.encrypted_credentials)
                    .map_err(|e| ProviderError::InvalidResponse(format!("credentials: {e}")))?;
                let credentials: CloudflareCredentials = serde_json::from_slice(&plaintext)
                    .map_err(|e| ProviderError::InvalidResponse(format!("credentials: {e}")))?;
                let provider = CloudflareProvider::with_client(
                    self.client.clone(),
                    self.cloudflare_api_base.clone(),
                    credentials.api_token,
                    self.timeouts,
                );
                Ok(Arc::new(provider))
            }
            other => Err(ProviderError::Unsupported(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn account(provider: &str, encrypted_credentials: String) -> dns_account::Model {
        dns_account::Model {
            id: 1,
            name: "primary".into(),
            provider: provider.into(),
            encrypted_credentials,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_factory_dispatches_on_provider_name() {
        let key = "11".repeat(32);
        let cipher = CredentialCipher::from_hex_key(&key).unwrap();
        let sealed = cipher.seal(br#"{"api_token":"t"}"#).unwrap();
        let factory = AccountProviderFactory::new(
            CredentialCipher::from_hex_key(&key).unwrap(),
            "http://127.0.0.1:9".into(),
            ProviderTimeouts::default(),
        )
        .unwrap();

        assert!(factory.for_account(&account("Cloudflare", sealed.clone())).await.is_ok());
        assert!(factory.for_account(&account("cloudflare", sealed.clone())).await.is_ok());
        assert!(matches!(
            factory.for_account(&account("route53", sealed)).await,
            Err(ProviderError::Unsupported(_))
        ));
        assert!(matches!(
            factory.for_account(&account("cloudflare", "00".into())).await,
            Err(ProviderError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_record_matching_ignores_case_and_trailing_dot() {
        let record = ProviderRecord {
            id: "abc".into(),
            name: "App.Example.com.".into(),
            record_type: "A".into(),
            content: "10.0.0.1".into(),
            ttl: 60,
            priority: None,
            proxied: false,
        };
        assert!(record.matches("app.example.com", "a"));
        assert!(!record.matches("app.example.com", "AAAA"));
        assert!(!record.matches("www.example.com", "A"));
    }
}
