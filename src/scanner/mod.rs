//! Malware scanning capability.

mod clamav;

use async_trait::async_trait;

use crate::error::ScanError;

pub use clamav::ClamAvScanner;

/// Verdict for one stored object.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ScanResult {
    pub is_malicious: bool,
    pub details: String,
}

/// Inspects one stored object.
///
/// An `Err` means no verdict was reached; callers must not read it as clean.
#[async_trait]
pub trait Scanner: Send + Sync {
    async fn scan(&self, bucket: &str, key: &str) -> Result<ScanResult, ScanError>;
}

/// Deterministic stand-in that flags any key containing a marker substring.
pub struct KeywordScanner {
    keyword: String,
}

impl KeywordScanner {
    pub fn new(keyword: impl Into<String>) -> Self {
        Self {
            keyword: keyword.into(),
        }
    }
}

#[async_trait]
impl Scanner for KeywordScanner {
    async fn scan(&self, _bucket: &str, key: &str) -> Result<ScanResult, ScanError> {
        if key.contains(&self.keyword) {
            Ok(ScanResult {
                is_malicious: true,
                details: format!("Object key contains the marker '{}'.", self.keyword),
            })
        } else {
            Ok(ScanResult {
                is_malicious: false,
                details: "No threats found.".to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_keyword_scanner_verdicts() {
        let scanner = KeywordScanner::new("malicious");

        let flagged = scanner.scan("uploads", "reports/malicious_invoice.pdf").await.unwrap();
        assert!(flagged.is_malicious);
        assert!(flagged.details.contains("malicious"));

        let clean = scanner.scan("uploads", "reports/invoice.pdf").await.unwrap();
        assert!(!clean.is_malicious);
        assert!(!clean.details.is_empty());
    }
}
