//! SQS poll loop feeding S3 upload notifications into the pipeline.
//!
//! A message is deleted from the queue only once every upload it carries has
//! reached a handled outcome. Anything else stays in the queue and comes back
//! after its visibility timeout, which is the only retry there is.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use aws_sdk_sqs::Client;
use futures_util::future::join_all;

use crate::event::parse_notification;
use crate::pipeline::RemediationPipeline;

const MAX_MESSAGES_PER_POLL: i32 = 10;
const LONG_POLL_SECONDS: i32 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Every upload in the message was handled; delete it.
    Acknowledge,
    /// Leave the message for redelivery.
    Retain,
}

struct QueuedNotification {
    pub body: String,
    pub receipt_handle: String,
}

/// Runs every upload in one notification body through the pipeline, in order.
pub async fn handle_notification(pipeline: &RemediationPipeline, body: &str) -> Disposition {
    let events = match parse_notification(body) {
        Ok(events) => events,
        Err(err) => {
            tracing::error!("Failed to parse upload notification: {}", err);
            return Disposition::Retain;
        }
    };

    let mut disposition = Disposition::Acknowledge;
    for event in &events {
        match pipeline.run(event).await {
            Ok(outcome) => {
                let response = outcome.response();
                tracing::info!(
                    bucket = %event.bucket,
                    key = %event.key,
                    status = ?outcome.status,
                    "Run finished with {}: {}",
                    response.status_code,
                    response.body
                );
            }
            Err(err) => {
                tracing::error!(
                    bucket = %event.bucket,
                    key = %event.key,
                    "Run aborted, leaving notification for redelivery: {}", err
                );
                disposition = Disposition::Retain;
            }
        }
    }

    disposition
}

pub struct QueueWorker {
    client: Client,
    queue_url: String,
    pipeline: Arc<RemediationPipeline>,
    poll_interval: Duration,
}

impl QueueWorker {
    pub fn new(
        client: Client,
        queue_url: impl Into<String>,
        pipeline: Arc<RemediationPipeline>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            client,
            queue_url: queue_url.into(),
            pipeline,
            poll_interval,
        }
    }

    /// Polls until ctrl-c. Messages from one poll are processed concurrently.
    pub async fn run(&self) {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!("Unable to listen for shutdown signal: {}", err);
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Polls until `shutdown` completes. Runs still in flight are dropped and
    /// their messages come back after the visibility timeout.
    pub async fn run_until<S: Future<Output = ()>>(&self, shutdown: S) {
        tracing::info!("Listening for upload notifications on {}", self.queue_url);
        tokio::pin!(shutdown);

        loop {
            let notifications = tokio::select! {
                received = self.receive_notifications() => received.unwrap_or_else(|err| {
                    tracing::error!("Error receiving upload notifications: {}", err);
                    Vec::new()
                }),
                _ = &mut shutdown => break,
            };

            if notifications.is_empty() {
                tokio::select! {
                    _ = tokio::time::sleep(self.poll_interval) => continue,
                    _ = &mut shutdown => break,
                }
            }

            let processing = join_all(
                notifications
                    .into_iter()
                    .map(|notification| self.process(notification)),
            );
            tokio::select! {
                _ = processing => {}
                _ = &mut shutdown => {
                    tracing::warn!(
                        "Shutdown during processing, unfinished notifications will be redelivered"
                    );
                    break;
                }
            }
        }

        tracing::info!("Shutdown requested, stopping worker");
    }

    async fn process(&self, notification: QueuedNotification) {
        match handle_notification(&self.pipeline, &notification.body).await {
            Disposition::Acknowledge => {
                self.delete_message(&notification.receipt_handle)
                    .await
                    .unwrap_or_else(|err| {
                        tracing::error!("Error deleting message: {}", err);
                    });
            }
            Disposition::Retain => {
                tracing::warn!("Notification not acknowledged, it will be redelivered");
            }
        }
    }

    async fn receive_notifications(&self) -> Result<Vec<QueuedNotification>, aws_sdk_sqs::Error> {
        let rcv_message_output = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(MAX_MESSAGES_PER_POLL)
            .wait_time_seconds(LONG_POLL_SECONDS)
            .send()
            .await?;

        let mut notifications = Vec::new();
        for message in rcv_message_output.messages.unwrap_or_default() {
            let body = match message.body {
                Some(body) => body,
                None => {
                    tracing::warn!("Received message with no body, skipping.");
                    continue;
                }
            };

            let receipt_handle = match message.receipt_handle {
                Some(handle) => handle,
                None => {
                    tracing::warn!("Received message with no receipt handle, skipping.");
                    continue;
                }
            };

            notifications.push(QueuedNotification { body, receipt_handle });
        }

        Ok(notifications)
    }

    async fn delete_message(&self, receipt_handle: &str) -> Result<(), aws_sdk_sqs::Error> {
        self.client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(receipt_handle)
            .send()
            .await?;

        tracing::info!("Message deleted successfully");
        Ok(())
    }
}
