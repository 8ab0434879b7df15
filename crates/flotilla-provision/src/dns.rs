//! DNS adapter — find-or-create A records at the DNS provider.
//!
//! Talks to a Cloudflare-style HTTP API: every response carries a `success`
//! flag and an `errors` array. A non-success response, or one that fails
//! schema validation, is fatal to the provisioning attempt; provider error
//! messages are joined into a single diagnostic.
//!
//! Records are created unproxied (DNS-only) so certificate issuance can
//! complete HTTP validation directly against the origin.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{ProvisionError, ProvisionResult};

/// TTL for managed A records, seconds.
const RECORD_TTL: u32 = 120;

/// A DNS record as the provider reports it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DnsRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub record_type: String,
    pub name: String,
    pub content: String,
    pub ttl: u32,
    #[serde(default)]
    pub proxied: bool,
}

/// Body for create/update calls.
#[derive(Debug, Serialize)]
struct RecordPayload<'a> {
    #[serde(rename = "type")]
    record_type: &'a str,
    name: &'a str,
    content: &'a str,
    ttl: u32,
    proxied: bool,
}

/// Provider response envelope.
#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    success: bool,
    #[serde(default)]
    errors: Vec<ApiMessage>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    message: String,
}

impl<T> ApiEnvelope<T> {
    /// Unwrap the result, surfacing joined provider error messages.
    fn into_result(self, context: &str) -> ProvisionResult<T> {
        if !self.success {
            let joined = if self.errors.is_empty() {
                "provider reported failure without messages".to_string()
            } else {
                self.errors
                    .iter()
                    .map(|e| e.message.as_str())
                    .collect::<Vec<_>>()
                    .join("; ")
            };
            return Err(ProvisionError::DnsApi(format!("{context}: {joined}")));
        }
        self.result
            .ok_or_else(|| ProvisionError::DnsApi(format!("{context}: response missing result")))
    }
}

/// Finds or creates A records pointing domains at server addresses.
pub struct DnsAdapter {
    client: reqwest::Client,
    api_base: String,
    zone_id: String,
    api_token: String,
}

impl DnsAdapter {
    pub fn new(api_base: String, zone_id: String, api_token: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base,
            zone_id,
            api_token,
        }
    }

    fn records_url(&self) -> String {
        format!("{}/zones/{}/dns_records", self.api_base, self.zone_id)
    }

    /// Find an existing A record by exact name.
    pub async fn find_a_record(&self, name: &str) -> ProvisionResult<Option<DnsRecord>> {
        let response = self
            .client
            .get(self.records_url())
            .bearer_auth(&self.api_token)
            .query(&[("type", "A"), ("name", name)])
            .send()
            .await?;

        let envelope: ApiEnvelope<Vec<DnsRecord>> = response
            .json()
            .await
            .map_err(|e| ProvisionError::DnsApi(format!("list records: malformed response: {e}")))?;
        let records = envelope.into_result("list records")?;
        Ok(records.into_iter().find(|r| r.name == name))
    }

    /// Find-or-create the A record pointing `name` at `address`.
    ///
    /// An existing record is updated in place; otherwise a new DNS-only
    /// record is created.
    pub async fn upsert_a_record(&self, name: &str, address: &str) -> ProvisionResult<DnsRecord> {
        let payload = RecordPayload {
            record_type: "A",
            name,
            content: address,
            ttl: RECORD_TTL,
            proxied: false,
        };

        let record = match self.find_a_record(name).await? {
            Some(existing) => {
                debug!(%name, record_id = %existing.id, "updating existing A record");
                let response = self
                    .client
                    .put(format!("{}/{}", self.records_url(), existing.id))
                    .bearer_auth(&self.api_token)
                    .json(&payload)
                    .send()
                    .await?;
                let envelope: ApiEnvelope<DnsRecord> = response.json().await.map_err(|e| {
                    ProvisionError::DnsApi(format!("update record: malformed response: {e}"))
                })?;
                envelope.into_result("update record")?
            }
            None => {
                debug!(%name, "creating A record");
                let response = self
                    .client
                    .post(self.records_url())
                    .bearer_auth(&self.api_token)
                    .json(&payload)
                    .send()
                    .await?;
                let envelope: ApiEnvelope<DnsRecord> = response.json().await.map_err(|e| {
                    ProvisionError::DnsApi(format!("create record: malformed response: {e}"))
                })?;
                envelope.into_result("create record")?
            }
        };

        info!(%name, %address, record_id = %record.id, "A record in place");
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_success_yields_result() {
        let envelope: ApiEnvelope<Vec<DnsRecord>> = serde_json::from_str(
            r#"{"success":true,"errors":[],"result":[{"id":"r1","type":"A","name":"api.test.dev","content":"10.0.0.1","ttl":120,"proxied":false}]}"#,
        )
        .unwrap();
        let records = envelope.into_result("list records").unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "api.test.dev");
    }

    #[test]
    fn envelope_failure_joins_error_messages() {
        let envelope: ApiEnvelope<DnsRecord> = serde_json::from_str(
            r#"{"success":false,"errors":[{"message":"invalid token"},{"message":"zone not found"}],"result":null}"#,
        )
        .unwrap();
        let err = envelope.into_result("create record").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("invalid token; zone not found"), "got: {msg}");
    }

    #[test]
    fn envelope_failure_without_messages_still_errors() {
        let envelope: ApiEnvelope<DnsRecord> =
            serde_json::from_str(r#"{"success":false,"errors":[],"result":null}"#).unwrap();
        assert!(envelope.into_result("update record").is_err());
    }

    #[test]
    fn envelope_success_without_result_is_schema_violation() {
        let envelope: ApiEnvelope<DnsRecord> =
            serde_json::from_str(r#"{"success":true,"errors":[],"result":null}"#).unwrap();
        assert!(envelope.into_result("create record").is_err());
    }

    #[test]
    fn record_payload_is_dns_only() {
        let payload = RecordPayload {
            record_type: "A",
            name: "api.test.dev",
            content: "10.0.0.1",
            ttl: RECORD_TTL,
            proxied: false,
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["type"], "A");
        assert_eq!(json["proxied"], false);
        assert_eq!(json["ttl"], 120);
    }
}
