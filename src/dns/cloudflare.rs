//! Cloudflare v4 REST adapter.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use super::provider::{DnsProvider, ProviderError, ProviderRecord, ProviderTimeouts, RecordSpec};

pub const DEFAULT_API_BASE: &str = "https://api.cloudflare.com/client/v4";

const PAGE_SIZE: u32 = 100;
// "Record does not exist" / "Invalid object identifier".
const NOT_FOUND_CODES: &[i64] = &[81044, 7003];
// Host already taken / identical record exists.
const ALREADY_EXISTS_CODES: &[i64] = &[81053, 81057, 81058];

pub struct CloudflareProvider {
    client: Client,
    api_base: String,
    api_token: String,
    timeouts: ProviderTimeouts,
}

#[derive(Deserialize)]
struct Envelope<T> {
    success: bool,
    #[serde(default)]
    errors: Vec<ApiMessage>,
    result: Option<T>,
    result_info: Option<ResultInfo>,
}

#[derive(Deserialize, Debug)]
struct ApiMessage {
    code: i64,
    message: String,
}

#[derive(Deserialize)]
struct ResultInfo {
    page: u32,
    total_pages: u32,
}

#[derive(Deserialize)]
struct Zone {
    id: String,
}

#[derive(Deserialize)]
struct CfRecord {
    id: String,
    name: String,
    #[serde(rename = "type")]
    record_type: String,
    content: String,
    ttl: i32,
    priority: Option<i32>,
    #[serde(default)]
    proxied: bool,
}

impl From<CfRecord> for ProviderRecord {
    fn from(r: CfRecord) -> Self {
        Self {
            id: r.id,
            name: r.name,
            record_type: r.record_type,
            content: r.content,
            ttl: r.ttl,
            priority: r.priority,
            proxied: r.proxied,
        }
    }
}

#[derive(Serialize)]
struct RecordBody<'a> {
    #[serde(rename = "type")]
    record_type: &'a str,
    name: &'a str,
    content: &'a str,
    ttl: i32,
    proxied: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    priority: Option<i32>,
}

impl<'a> From<&'a RecordSpec> for RecordBody<'a> {
    fn from(spec: &'a RecordSpec) -> Self {
        Self {
            record_type: &spec.record_type,
            name: &spec.name,
            content: &spec.content,
            ttl: spec.ttl,
            proxied: spec.proxied,
            priority: spec.priority,
        }
    }
}

impl CloudflareProvider {
    pub fn new(
        api_base: String,
        api_token: String,
        timeouts: ProviderTimeouts,
    ) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .build()
            .map_err(|e| ProviderError::Transport(e.to_string()))?;
        Ok(Self::with_client(client, api_base, api_token, timeouts))
    }

    /// Reuses an existing client; `reqwest::Client` clones share one connection pool.
    pub fn with_client(
        client: Client,
        api_base: String,
        api_token: String,
        timeouts: ProviderTimeouts,
    ) -> Self {
        Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            api_token,
            timeouts,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path)
    }

    async fn send<T>(
        &self,
        request: RequestBuilder,
        timeout: Duration,
    ) -> Result<(T, Option<ResultInfo>), ProviderError>
    where
        T: for<'de> Deserialize<'de>,
    {
        let response = request
            .bearer_auth(&self.api_token)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout(timeout)
                } else {
                    ProviderError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout(timeout)
            } else {
                ProviderError::Transport(e.to_string())
            }
        })?;

        let envelope: Envelope<Value> = match serde_json::from_str(&body) {
            Ok(envelope) => envelope,
            Err(_) if status == StatusCode::NOT_FOUND => {
                return Err(ProviderError::NotFound(format!("HTTP {status}")));
            }
            Err(_) if !status.is_success() => {
                return Err(ProviderError::Api {
                    status: status.as_u16(),
                    message: format!("HTTP {status}"),
                });
            }
            Err(e) => {
                return Err(ProviderError::InvalidResponse(format!(
                    "HTTP {status}: {e}"
                )));
            }
        };

        if !status.is_success() || !envelope.success {
            return Err(classify_failure(status, &envelope.errors));
        }

        let result = envelope
            .result
            .ok_or_else(|| ProviderError::InvalidResponse("missing result".to_string()))?;
        let parsed = serde_json::from_value(result)
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
        Ok((parsed, envelope.result_info))
    }
}

fn classify_failure(status: StatusCode, errors: &[ApiMessage]) -> ProviderError {
    let message = if errors.is_empty() {
        format!("HTTP {status}")
    } else {
        errors
            .iter()
            .map(|e| format!("{}: {}", e.code, e.message))
            .collect::<Vec<_>>()
            .join("; ")
    };

    if errors.iter().any(|e| ALREADY_EXISTS_CODES.contains(&e.code)) {
        ProviderError::AlreadyExists(message)
    } else if status == StatusCode::NOT_FOUND
        || errors.iter().any(|e| NOT_FOUND_CODES.contains(&e.code))
    {
        ProviderError::NotFound(message)
    } else {
        ProviderError::Api {
            status: status.as_u16(),
            message,
        }
    }
}

#[async_trait]
impl DnsProvider for CloudflareProvider {
    async fn resolve_zone(&self, domain: &str) -> Result<String, ProviderError> {
        let request = self
            .client
            .get(self.url("/zones"))
            .query(&[("name", domain)]);
        let (zones, _): (Vec<Zone>, _) = self.send(request, self.timeouts.bootstrap).await?;
        zones
            .into_iter()
            .next()
            .map(|z| z.id)
            .ok_or_else(|| ProviderError::NotFound(format!("zone {domain}")))
    }

    async fn list_records(&self, zone_id: &str) -> Result<Vec<ProviderRecord>, ProviderError> {
        let mut records = Vec::new();
        let mut page = 1u32;
        loop {
            let request = self
                .client
                .get(self.url(&format!("/zones/{zone_id}/dns_records")))
                .query(&[("page", page), ("per_page", PAGE_SIZE)]);
            let (batch, info): (Vec<CfRecord>, _) = self.send(request, self.timeouts.list).await?;
            let fetched = batch.len();
            records.extend(batch.into_iter().map(ProviderRecord::from));

            match info {
                Some(info) if info.page < info.total_pages => page = info.page + 1,
                _ => break,
            }
            if fetched == 0 {
                break;
            }
        }
        debug!(zone_id, count = records.len(), "Listed provider records.");
        Ok(records)
    }

    async fn create_record(
        &self,
        zone_id: &str,
        record: &RecordSpec,
    ) -> Result<ProviderRecord, ProviderError> {
        let request = self
            .client
            .post(self.url(&format!("/zones/{zone_id}/dns_records")))
            .json(&RecordBody::from(record));
        let (created, _): (CfRecord, _) = self.send(request, self.timeouts.validation).await?;
        Ok(created.into())
    }

    async fn update_record(
        &self,
        zone_id: &str,
        remote_id: &str,
        record: &RecordSpec,
    ) -> Result<ProviderRecord, ProviderError> {
        let request = self
            .client
            .put(self.url(&format!("/zones/{zone_id}/dns_records/{remote_id}")))
            .json(&RecordBody::from(record));
        let (updated, _): (CfRecord, _) = self.send(request, self.timeouts.validation).await?;
        Ok(updated.into())
    }

    async fn delete_record(&self, zone_id: &str, remote_id: &str) -> Result<(), ProviderError> {
        let request = self
            .client
            .delete(self.url(&format!("/zones/{zone_id}/dns_records/{remote_id}")));
        let _: (Value, _) = self.send(request, self.timeouts.validation).await?;
        debug!(zone_id, remote_id, "Deleted provider record.");
        Ok(())
    }
}
