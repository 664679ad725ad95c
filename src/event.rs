//! Inbound upload notifications.
//!
//! Object keys arrive form-encoded: a literal `+` stands for a space and
//! everything else is percent-escaped. Keys are decoded once here so the rest
//! of the pipeline only ever sees the key as stored.

use chrono::{DateTime, Utc};
use percent_encoding::percent_decode_str;
use serde_json::Value;

use crate::error::EventError;

const OBJECT_CREATED_PREFIX: &str = "ObjectCreated:";

// Epoch values above this are taken to be milliseconds.
const EPOCH_MILLIS_THRESHOLD: i64 = 100_000_000_000;

/// One newly stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadEvent {
    pub bucket: String,
    pub key: String,
    pub event_time: DateTime<Utc>,
}

impl UploadEvent {
    pub fn new(
        bucket: &str,
        raw_key: &str,
        event_time: DateTime<Utc>,
    ) -> Result<Self, EventError> {
        if bucket.is_empty() {
            return Err(EventError::MissingField("s3.bucket.name"));
        }

        let key = decode_object_key(raw_key)?;
        if key.is_empty() {
            return Err(EventError::MissingField("s3.object.key"));
        }

        Ok(UploadEvent {
            bucket: bucket.to_string(),
            key,
            event_time,
        })
    }
}

#[derive(Debug, serde::Deserialize)]
struct S3Notification {
    #[serde(rename = "Records")]
    records: Option<Vec<S3Record>>,
    // only present on the s3:TestEvent sent when a notification is configured
    #[serde(rename = "Event")]
    event: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
struct S3Record {
    #[serde(rename = "eventName", default)]
    event_name: String,
    #[serde(rename = "eventTime", default)]
    event_time: Value,
    s3: S3Entity,
}

#[derive(Debug, serde::Deserialize)]
struct S3Entity {
    bucket: S3Bucket,
    object: S3Object,
}

#[derive(Debug, serde::Deserialize)]
struct S3Bucket {
    name: String,
}

#[derive(Debug, serde::Deserialize)]
struct S3Object {
    key: String,
}

/// Parses an S3 event notification into upload events, in record order.
///
/// Only `ObjectCreated:*` records become uploads; removals and other record
/// types are skipped. A test event yields no uploads.
pub fn parse_notification(body: &str) -> Result<Vec<UploadEvent>, EventError> {
    let notification: S3Notification = serde_json::from_str(body)?;

    let records = match notification.records {
        Some(records) => records,
        None if notification.event.as_deref() == Some("s3:TestEvent") => {
            tracing::info!("Received S3 test event, nothing to scan.");
            return Ok(Vec::new());
        }
        None => return Err(EventError::MissingField("Records")),
    };

    records
        .into_iter()
        .filter(|record| {
            let created = record.event_name.starts_with(OBJECT_CREATED_PREFIX);
            if !created {
                tracing::debug!(
                    event_name = %record.event_name,
                    key = %record.s3.object.key,
                    "Skipping non-upload record"
                );
            }
            created
        })
        .map(|record| {
            let event_time = parse_event_time(&record.event_time)?;
            UploadEvent::new(&record.s3.bucket.name, &record.s3.object.key, event_time)
        })
        .collect()
}

/// `+` becomes a space first, then percent escapes are resolved, so an
/// escaped `%2B` survives as a literal plus.
pub fn decode_object_key(raw: &str) -> Result<String, EventError> {
    let spaced = raw.replace('+', " ");
    percent_decode_str(&spaced)
        .decode_utf8()
        .map(|key| key.into_owned())
        .map_err(|_| EventError::InvalidKey(raw.to_string()))
}

/// Accepts RFC 3339 text, or an epoch value in seconds or milliseconds given
/// either as a number or as a string of digits.
pub fn parse_event_time(value: &Value) -> Result<DateTime<Utc>, EventError> {
    match value {
        Value::String(text) => {
            if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
                return Ok(parsed.with_timezone(&Utc));
            }
            text.trim()
                .parse::<i64>()
                .ok()
                .and_then(from_epoch)
                .ok_or_else(|| EventError::InvalidTimestamp(text.clone()))
        }
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|f| f as i64))
            .and_then(from_epoch)
            .ok_or_else(|| EventError::InvalidTimestamp(number.to_string())),
        Value::Null => Err(EventError::MissingField("eventTime")),
        other => Err(EventError::InvalidTimestamp(other.to_string())),
    }
}

fn from_epoch(value: i64) -> Option<DateTime<Utc>> {
    if value.abs() >= EPOCH_MILLIS_THRESHOLD {
        DateTime::from_timestamp_millis(value)
    } else {
        DateTime::from_timestamp(value, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_decode_plus_and_percent_escapes() {
        assert_eq!(
            decode_object_key("reports/my+file.pdf").unwrap(),
            "reports/my file.pdf"
        );
        assert_eq!(decode_object_key("a+b%2Bc.pdf").unwrap(), "a b+c.pdf");
        assert_eq!(
            decode_object_key("caf%C3%A9%20menu.txt").unwrap(),
            "café menu.txt"
        );
        assert_eq!(decode_object_key("plain/key.bin").unwrap(), "plain/key.bin");
    }

    #[test]
    fn test_decode_rejects_invalid_utf8() {
        let result = decode_object_key("bad%FF.bin");
        assert!(matches!(result, Err(EventError::InvalidKey(_))));
    }

    #[test]
    fn test_event_time_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();

        assert_eq!(parse_event_time(&json!("2024-01-01T10:00:00Z")).unwrap(), expected);
        assert_eq!(parse_event_time(&json!("2024-01-01T10:00:00.000Z")).unwrap(), expected);
        assert_eq!(parse_event_time(&json!(1704103200)).unwrap(), expected);
        assert_eq!(parse_event_time(&json!(1704103200000i64)).unwrap(), expected);
        assert_eq!(parse_event_time(&json!("1704103200")).unwrap(), expected);

        assert!(matches!(
            parse_event_time(&json!("yesterday")),
            Err(EventError::InvalidTimestamp(_))
        ));
        assert!(matches!(
            parse_event_time(&Value::Null),
            Err(EventError::MissingField("eventTime"))
        ));
    }

    #[test]
    fn test_parse_notification_records_in_order() {
        let body = json!({
            "Records": [
                {
                    "eventName": "ObjectCreated:Put",
                    "eventTime": "2024-01-01T10:00:00.000Z",
                    "s3": {
                        "bucket": { "name": "uploads" },
                        "object": { "key": "reports/malicious_invoice.pdf", "size": 10 }
                    }
                },
                {
                    "eventName": "ObjectCreated:CompleteMultipartUpload",
                    "eventTime": "2024-01-01T10:01:00.000Z",
                    "s3": {
                        "bucket": { "name": "uploads" },
                        "object": { "key": "second+file%21.txt" }
                    }
                }
            ]
        })
        .to_string();

        let events = parse_notification(&body).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].bucket, "uploads");
        assert_eq!(events[0].key, "reports/malicious_invoice.pdf");
        assert_eq!(events[1].key, "second file!.txt");
        assert_eq!(
            events[1].event_time,
            Utc.with_ymd_and_hms(2024, 1, 1, 10, 1, 0).unwrap()
        );
    }

    #[test]
    fn test_parse_notification_skips_removals() {
        let body = json!({
            "Records": [
                {
                    "eventName": "ObjectRemoved:Delete",
                    "eventTime": "2024-01-01T10:00:05.000Z",
                    "s3": { "bucket": { "name": "uploads" }, "object": { "key": "malicious.exe" } }
                },
                {
                    "eventTime": "2024-01-01T10:00:06.000Z",
                    "s3": { "bucket": { "name": "uploads" }, "object": { "key": "no-name.exe" } }
                },
                {
                    "eventName": "ObjectCreated:Copy",
                    "eventTime": "2024-01-01T10:00:07.000Z",
                    "s3": { "bucket": { "name": "uploads" }, "object": { "key": "copied.exe" } }
                }
            ]
        })
        .to_string();

        let events = parse_notification(&body).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].key, "copied.exe");
    }

    #[test]
    fn test_parse_notification_test_event_is_empty() {
        let body = r#"{"Service":"Amazon S3","Event":"s3:TestEvent","Bucket":"uploads"}"#;
        assert!(parse_notification(body).unwrap().is_empty());
    }

    #[test]
    fn test_parse_notification_rejects_bad_records() {
        assert!(matches!(parse_notification("not json"), Err(EventError::Json(_))));
        assert!(matches!(
            parse_notification(r#"{"foo": 1}"#),
            Err(EventError::MissingField("Records"))
        ));

        let empty_key = json!({
            "Records": [{
                "eventName": "ObjectCreated:Put",
                "eventTime": "2024-01-01T10:00:00Z",
                "s3": { "bucket": { "name": "uploads" }, "object": { "key": "" } }
            }]
        })
        .to_string();
        assert!(matches!(
            parse_notification(&empty_key),
            Err(EventError::MissingField("s3.object.key"))
        ));
    }
}
