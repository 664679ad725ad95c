//! Scanner backed by a clamd daemon.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3 as s3;
use futures_util::stream::StreamExt;
use s3::presigning::PresigningConfig;
use tokio::sync::OnceCell;

use super::{ScanResult, Scanner};
use crate::error::ScanError;
use crate::secrets::SecretSource;

const PRESIGNED_URL_EXPIRY: Duration = Duration::from_secs(15 * 60);

/// Connection details kept in the secret store.
#[derive(Debug, serde::Deserialize)]
struct ClamdCredentials {
    host_address: String,
}

/// Streams the object from S3 through a presigned URL into clamd.
///
/// The clamd address comes from the secret store when a secret id is set,
/// otherwise from the configured fallback. It is resolved on the first scan
/// and kept for the life of the process.
pub struct ClamAvScanner {
    s3: s3::Client,
    http: reqwest::Client,
    secret: Option<(Arc<dyn SecretSource>, String)>,
    fallback_address: String,
    address: OnceCell<String>,
    timeout: Duration,
}

impl ClamAvScanner {
    pub fn new(s3: s3::Client, fallback_address: impl Into<String>, timeout: Duration) -> Self {
        Self {
            s3,
            http: reqwest::Client::new(),
            secret: None,
            fallback_address: fallback_address.into(),
            address: OnceCell::new(),
            timeout,
        }
    }

    pub fn with_secret(
        mut self,
        source: Arc<dyn SecretSource>,
        secret_id: impl Into<String>,
    ) -> Self {
        self.secret = Some((source, secret_id.into()));
        self
    }

    /// A failed lookup is not cached, so the next scan tries again.
    async fn host_address(&self) -> Result<&str, ScanError> {
        let address = self.address.get_or_try_init(|| self.resolve_address()).await?;
        Ok(address.as_str())
    }

    async fn resolve_address(&self) -> Result<String, ScanError> {
        let Some((source, secret_id)) = &self.secret else {
            return Ok(self.fallback_address.clone());
        };

        let raw = source
            .secret_string(secret_id)
            .await
            .map_err(|err| ScanError::Unavailable(err.to_string()))?;
        let credentials: ClamdCredentials = serde_json::from_str(&raw).map_err(|err| {
            ScanError::Unavailable(format!("malformed scanner secret {}: {}", secret_id, err))
        })?;

        tracing::info!("Resolved clamd address from secret {}", secret_id);
        Ok(credentials.host_address)
    }

    async fn presigned_url(&self, bucket: &str, key: &str) -> Result<String, ScanError> {
        let presigning = PresigningConfig::builder()
            .expires_in(PRESIGNED_URL_EXPIRY)
            .build()
            .map_err(|err| ScanError::Unavailable(err.to_string()))?;

        let request = self
            .s3
            .get_object()
            .bucket(bucket)
            .key(key)
            .presigned(presigning)
            .await
            .map_err(|err| {
                let err = s3::Error::from(err);
                ScanError::Unavailable(format!("failed to presign object: {}", err))
            })?;

        Ok(request.uri().to_string())
    }

    async fn scan_object(&self, bucket: &str, key: &str) -> Result<ScanResult, ScanError> {
        let host_address = self.host_address().await?;
        let clamd_tcp = clamav_client::tokio::Tcp { host_address };

        match clamav_client::tokio::ping(clamd_tcp).await {
            Ok(_) => tracing::debug!("ClamAV is available"),
            Err(err) => {
                tracing::error!("ClamAV is not available: {}", err);
                return Err(ScanError::Unavailable(format!("clamd at {}: {}", host_address, err)));
            }
        }

        let presigned_url = self.presigned_url(bucket, key).await?;

        let reqwest_stream = self
            .http
            .get(presigned_url)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|err| ScanError::Unavailable(format!("failed to fetch object: {}", err)))?
            .bytes_stream();

        let stream = reqwest_stream
            .map(|result| result.map_err(|err| io::Error::new(io::ErrorKind::Other, err)));

        let scan_response = clamav_client::tokio::scan_stream(stream, clamd_tcp, None)
            .await
            .map_err(|err| {
                tracing::error!("Virus scan failed: {}", err);
                ScanError::Unavailable(format!("clamd scan failed: {}", err))
            })?;

        let is_file_clean = clamav_client::clean(&scan_response).map_err(|err| {
            tracing::error!("Failed to parse scan result: {}", err);
            ScanError::Unavailable(format!("unreadable clamd response: {}", err))
        })?;

        // clamd replies are ASCII in practice, but convert lossily just in case
        let reply = String::from_utf8_lossy(&scan_response)
            .trim_end_matches(['\0', '\n'])
            .to_string();

        if is_file_clean {
            tracing::info!("File is clean, no viruses found.");
            Ok(ScanResult {
                is_malicious: false,
                details: "No threats found.".to_string(),
            })
        } else {
            tracing::warn!("File is infected with a virus: {}", reply);
            Ok(ScanResult {
                is_malicious: true,
                details: format!("ClamAV: {}", reply),
            })
        }
    }
}

#[async_trait]
impl Scanner for ClamAvScanner {
    async fn scan(&self, bucket: &str, key: &str) -> Result<ScanResult, ScanError> {
        tokio::time::timeout(self.timeout, self.scan_object(bucket, key))
            .await
            .map_err(|_| ScanError::Timeout(self.timeout))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::error::SecretUnavailable;

    struct FakeSecrets {
        responses: Mutex<Vec<Result<String, SecretUnavailable>>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SecretSource for FakeSecrets {
        async fn secret_string(&self, _secret_id: &str) -> Result<String, SecretUnavailable> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.responses.lock().unwrap().remove(0)
        }
    }

    fn s3_client() -> s3::Client {
        let config = s3::Config::builder()
            .behavior_version(s3::config::BehaviorVersion::latest())
            .region(s3::config::Region::new("eu-north-1"))
            .build();
        s3::Client::from_conf(config)
    }

    #[tokio::test]
    async fn test_address_falls_back_without_secret() {
        let scanner = ClamAvScanner::new(s3_client(), "clamd:3310", Duration::from_secs(5));
        assert_eq!(scanner.host_address().await.unwrap(), "clamd:3310");
    }

    #[tokio::test]
    async fn test_address_from_secret_retries_after_failure() {
        let secrets = Arc::new(FakeSecrets {
            responses: Mutex::new(vec![
                Err(SecretUnavailable {
                    secret_id: "scanner/clamd".to_string(),
                    reason: "throttled".to_string(),
                }),
                Ok(r#"{"host_address":"10.0.0.7:3310"}"#.to_string()),
            ]),
            calls: AtomicUsize::new(0),
        });
        let scanner = ClamAvScanner::new(s3_client(), "localhost:3310", Duration::from_secs(5))
            .with_secret(secrets.clone(), "scanner/clamd");

        assert!(matches!(scanner.host_address().await, Err(ScanError::Unavailable(_))));
        assert_eq!(scanner.host_address().await.unwrap(), "10.0.0.7:3310");
        assert_eq!(scanner.host_address().await.unwrap(), "10.0.0.7:3310");
        assert_eq!(secrets.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_malformed_secret_is_unavailable() {
        let secrets = Arc::new(FakeSecrets {
            responses: Mutex::new(vec![Ok("not json".to_string())]),
            calls: AtomicUsize::new(0),
        });
        let scanner = ClamAvScanner::new(s3_client(), "localhost:3310", Duration::from_secs(5))
            .with_secret(secrets, "scanner/clamd");

        assert!(matches!(scanner.host_address().await, Err(ScanError::Unavailable(_))));
    }
}
