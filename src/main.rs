use std::env;
use std::sync::Arc;

use tracing_subscriber::{filter, EnvFilter};

use upload_remediation::alert::{AlertDispatcher, SesMailer};
use upload_remediation::clients::AwsClients;
use upload_remediation::config::{Config, ScannerBackend};
use upload_remediation::correlator::{CloudTrailAuditSource, IdentityCorrelator};
use upload_remediation::remediator::{ObjectRemediator, S3ObjectStore};
use upload_remediation::scanner::{ClamAvScanner, KeywordScanner, Scanner};
use upload_remediation::secrets::SecretsManagerSource;
use upload_remediation::worker::QueueWorker;
use upload_remediation::RemediationPipeline;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {

    let env_filter = match env::var("LOG_LEVEL") {
        Ok(level) => EnvFilter::try_new(level)?,
        Err(_) => EnvFilter::default().add_directive(filter::LevelFilter::INFO.into()),
    };

    tracing_subscriber::fmt()
        .with_file(true)
        .with_line_number(true)
        .with_level(true)
        .pretty()
        .with_env_filter(env_filter)
        .init();


    let config = Config::from_env()?;
    let clients = AwsClients::shared(config.use_path_style_buckets).await;

    let scanner: Arc<dyn Scanner> = match config.scanner_backend {
        ScannerBackend::Keyword => {
            tracing::warn!("Using keyword scanner, objects are not inspected");
            Arc::new(KeywordScanner::new(config.scanner_keyword.clone()))
        }
        ScannerBackend::ClamAv => {
            let scanner = ClamAvScanner::new(
                clients.s3.clone(),
                config.clamd_address.clone(),
                config.scan_timeout,
            );
            match &config.scanner_secret_id {
                Some(secret_id) => Arc::new(scanner.with_secret(
                    Arc::new(SecretsManagerSource::new(clients.secrets.clone())),
                    secret_id.clone(),
                )),
                None => Arc::new(scanner),
            }
        }
    };

    let pipeline = RemediationPipeline::new(
        scanner,
        IdentityCorrelator::new(
            Arc::new(CloudTrailAuditSource::new(
                clients.cloudtrail.clone(),
                config.correlation_max_pages,
            )),
            config.correlation_window,
        ),
        ObjectRemediator::new(Arc::new(S3ObjectStore::new(clients.s3.clone()))),
        AlertDispatcher::new(
            Arc::new(SesMailer::new(clients.ses.clone())),
            config.alert_destination_email.clone(),
            config.alert_source_email.clone(),
        ),
    )
    .with_run_timeout(config.run_timeout)
    .with_correlation_timeout(config.correlation_timeout);

    let worker = QueueWorker::new(
        clients.sqs.clone(),
        config.upload_queue_url.clone(),
        Arc::new(pipeline),
        config.poll_interval,
    );
    worker.run().await;

    Ok(())
}
