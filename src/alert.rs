//! Operator alerts for remediated uploads.

use std::sync::Arc;

use async_trait::async_trait;
use aws_sdk_sesv2::types::{Body, Content, Destination, EmailContent, Message};

use crate::correlator::UploadIdentity;
use crate::error::NotifyFailed;
use crate::scanner::ScanResult;

pub const ALERT_SUBJECT: &str = "ALERT: Malicious File Detected and Removed";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertMessage {
    pub destination: String,
    pub source: String,
    pub subject: String,
    pub body: String,
}

/// Delivers a plain-text message.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: &AlertMessage) -> Result<(), NotifyFailed>;
}

pub struct SesMailer {
    client: aws_sdk_sesv2::Client,
}

impl SesMailer {
    pub fn new(client: aws_sdk_sesv2::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Mailer for SesMailer {
    async fn send(&self, message: &AlertMessage) -> Result<(), NotifyFailed> {
        let output = self
            .client
            .send_email()
            .from_email_address(&message.source)
            .destination(Destination::builder().to_addresses(&message.destination).build())
            .content(email_content(message)?)
            .send()
            .await
            .map_err(|err| NotifyFailed(aws_sdk_sesv2::Error::from(err).to_string()))?;

        tracing::info!("Alert sent, message id: {}", output.message_id().unwrap_or("not set"));
        Ok(())
    }
}

/// Plain-text SES content for an alert.
fn email_content(message: &AlertMessage) -> Result<EmailContent, NotifyFailed> {
    let text = |data: &str| {
        Content::builder()
            .data(data)
            .charset("UTF-8")
            .build()
            .map_err(|err| NotifyFailed(err.to_string()))
    };

    let simple = Message::builder()
        .subject(text(&message.subject)?)
        .body(Body::builder().text(text(&message.body)?).build())
        .build();

    Ok(EmailContent::builder().simple(simple).build())
}

/// What the alert reports about one remediated object.
#[derive(Debug, Clone, Copy)]
pub struct AlertDetails<'a> {
    pub bucket: &'a str,
    pub key: &'a str,
    pub scan_result: &'a ScanResult,
    pub identity: &'a UploadIdentity,
}

pub struct AlertDispatcher {
    mailer: Arc<dyn Mailer>,
    destination: String,
    source: String,
}

impl AlertDispatcher {
    pub fn new(
        mailer: Arc<dyn Mailer>,
        destination: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            mailer,
            destination: destination.into(),
            source: source.into(),
        }
    }

    pub fn compose(&self, details: &AlertDetails<'_>) -> AlertMessage {
        AlertMessage {
            destination: self.destination.clone(),
            source: self.source.clone(),
            subject: ALERT_SUBJECT.to_string(),
            body: format_body(details),
        }
    }

    pub async fn notify(&self, details: &AlertDetails<'_>) -> Result<(), NotifyFailed> {
        let message = self.compose(details);
        self.mailer.send(&message).await
    }
}

fn format_body(details: &AlertDetails<'_>) -> String {
    format!(
        "A malicious file was detected and automatically removed.\n\
         \n\
         Bucket: {}\n\
         Key: {}\n\
         Scan details: {}\n\
         \n\
         Uploader information:\n\
         Identity: {}\n\
         Source IP: {}\n\
         Upload time: {}\n",
        details.bucket,
        details.key,
        details.scan_result.details,
        details.identity.actor,
        details.identity.source_ip,
        details.identity.upload_timestamp.to_rfc3339(),
    )
}
