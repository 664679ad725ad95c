//! Uploader identity recovery from the audit trail.
//!
//! The audit trail can only be searched by event name and time range, so
//! correlation is done in two phases: a broad fetch of every upload event in
//! a window ending at the notification time, then an exact match on bucket
//! and key over the returned payloads. Audit delivery lags behind the storage
//! notification, so a miss is normal and never fails the run.

use std::sync::Arc;

use async_trait::async_trait;
use aws_sdk_cloudtrail::primitives::DateTime as AwsDateTime;
use aws_sdk_cloudtrail::types::{LookupAttribute, LookupAttributeKey};
use chrono::{DateTime, Utc};

use crate::error::AuditQueryFailed;

pub const ACTOR_NOT_FOUND: &str = "Not Found (CloudTrail Latency)";
pub const SOURCE_IP_NOT_FOUND: &str = "Not Found";
pub const ACTOR_UNKNOWN: &str = "Unknown";

const UPLOAD_EVENT_NAME: &str = "PutObject";
const LOOKUP_PAGE_SIZE: i32 = 50;

/// Who uploaded an object. Every field always holds either a real value or a
/// "not found" placeholder.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct UploadIdentity {
    pub actor: String,
    pub source_ip: String,
    pub upload_timestamp: DateTime<Utc>,
}

impl UploadIdentity {
    pub fn not_found(event_time: DateTime<Utc>) -> Self {
        UploadIdentity {
            actor: ACTOR_NOT_FOUND.to_string(),
            source_ip: SOURCE_IP_NOT_FOUND.to_string(),
            upload_timestamp: event_time,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.actor == ACTOR_NOT_FOUND
    }
}

/// One raw upload event from the audit trail.
#[derive(Debug, Clone, Default)]
pub struct AuditRecord {
    pub event_time: Option<DateTime<Utc>>,
    /// Full event document as JSON text.
    pub payload: Option<String>,
}

/// Audit trail that can be searched for upload events by time only.
#[async_trait]
pub trait AuditSource: Send + Sync {
    /// Returns upload events in `[start, end]` in the order the backend
    /// yields them. No ordering is guaranteed.
    async fn lookup_upload_events(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<AuditRecord>, AuditQueryFailed>;
}

#[derive(Debug, serde::Deserialize)]
struct CloudTrailEvent {
    #[serde(rename = "requestParameters")]
    request_parameters: Option<RequestParameters>,
    #[serde(rename = "userIdentity")]
    user_identity: Option<UserIdentity>,
    #[serde(rename = "sourceIPAddress")]
    source_ip_address: Option<String>,
    #[serde(rename = "eventTime")]
    event_time: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
struct RequestParameters {
    #[serde(rename = "bucketName")]
    bucket_name: Option<String>,
    key: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
struct UserIdentity {
    arn: Option<String>,
    #[serde(rename = "principalId")]
    principal_id: Option<String>,
}

pub struct IdentityCorrelator {
    source: Arc<dyn AuditSource>,
    lookback: chrono::Duration,
}

impl IdentityCorrelator {
    pub fn new(source: Arc<dyn AuditSource>, lookback: chrono::Duration) -> Self {
        Self { source, lookback }
    }

    /// Clamped to the earliest representable time rather than overflowing.
    pub fn window(&self, event_time: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        let start = event_time
            .checked_sub_signed(self.lookback)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        (start, event_time)
    }

    pub async fn correlate(
        &self,
        bucket: &str,
        key: &str,
        event_time: DateTime<Utc>,
    ) -> UploadIdentity {
        let (start, end) = self.window(event_time);

        let records = match self.source.lookup_upload_events(start, end).await {
            Ok(records) => records,
            Err(err) => {
                tracing::warn!(
                    bucket, key,
                    "Uploader lookup failed, continuing without identity: {}", err
                );
                return UploadIdentity::not_found(event_time);
            }
        };

        tracing::debug!(bucket, key, "Audit query returned {} upload events", records.len());

        match find_upload(&records, bucket, key, event_time) {
            Some(identity) => {
                tracing::info!(
                    bucket, key,
                    actor = %identity.actor,
                    source_ip = %identity.source_ip,
                    "Uploader identified"
                );
                identity
            }
            None => {
                tracing::warn!(bucket, key, "No matching upload event in the audit trail yet");
                UploadIdentity::not_found(event_time)
            }
        }
    }
}

/// First record, in received order, whose request targets exactly
/// `bucket`/`key`.
fn find_upload(
    records: &[AuditRecord],
    bucket: &str,
    key: &str,
    event_time: DateTime<Utc>,
) -> Option<UploadIdentity> {
    records.iter().find_map(|record| {
        let payload = record.payload.as_deref()?;
        let event: CloudTrailEvent = match serde_json::from_str(payload) {
            Ok(event) => event,
            Err(err) => {
                tracing::debug!("Skipping unparseable audit event: {}", err);
                return None;
            }
        };

        let params = event.request_parameters.as_ref()?;
        if params.bucket_name.as_deref() != Some(bucket) || params.key.as_deref() != Some(key) {
            return None;
        }

        let actor = event
            .user_identity
            .and_then(|identity| identity.arn.or(identity.principal_id))
            .unwrap_or_else(|| ACTOR_UNKNOWN.to_string());

        let upload_timestamp = event
            .event_time
            .as_deref()
            .and_then(|text| DateTime::parse_from_rfc3339(text).ok())
            .map(|time| time.with_timezone(&Utc))
            .or(record.event_time)
            .unwrap_or(event_time);

        Some(UploadIdentity {
            actor,
            source_ip: event
                .source_ip_address
                .unwrap_or_else(|| SOURCE_IP_NOT_FOUND.to_string()),
            upload_timestamp,
        })
    })
}

/// CloudTrail `LookupEvents`, filtered by event name.
pub struct CloudTrailAuditSource {
    client: aws_sdk_cloudtrail::Client,
    max_pages: usize,
}

impl CloudTrailAuditSource {
    pub fn new(client: aws_sdk_cloudtrail::Client, max_pages: usize) -> Self {
        Self { client, max_pages }
    }
}

#[async_trait]
impl AuditSource for CloudTrailAuditSource {
    async fn lookup_upload_events(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<AuditRecord>, AuditQueryFailed> {
        let attribute = LookupAttribute::builder()
            .attribute_key(LookupAttributeKey::EventName)
            .attribute_value(UPLOAD_EVENT_NAME)
            .build()
            .map_err(|err| AuditQueryFailed(err.to_string()))?;

        let mut records = Vec::new();
        let mut next_token: Option<String> = None;

        for _ in 0..self.max_pages.max(1) {
            let output = self
                .client
                .lookup_events()
                .lookup_attributes(attribute.clone())
                .start_time(AwsDateTime::from_millis(start.timestamp_millis()))
                .end_time(AwsDateTime::from_millis(end.timestamp_millis()))
                .max_results(LOOKUP_PAGE_SIZE)
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(|err| AuditQueryFailed(aws_sdk_cloudtrail::Error::from(err).to_string()))?;

            records.extend(output.events().iter().map(|event| AuditRecord {
                event_time: event
                    .event_time()
                    .and_then(|time| time.to_millis().ok())
                    .and_then(DateTime::from_timestamp_millis),
                payload: event.cloud_trail_event().map(str::to_string),
            }));

            match output.next_token() {
                Some(token) if !token.is_empty() => next_token = Some(token.to_string()),
                _ => break,
            }
        }

        Ok(records)
    }
}
