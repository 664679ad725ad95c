//! Scans newly uploaded S3 objects and removes the ones found to be
//! malicious, alerting operators with whatever uploader identity the audit
//! trail can provide.

pub mod alert;
pub mod clients;
pub mod config;
pub mod correlator;
pub mod error;
pub mod event;
pub mod pipeline;
pub mod remediator;
pub mod scanner;
pub mod secrets;
pub mod worker;

pub use config::Config;
pub use error::PipelineError;
pub use event::UploadEvent;
pub use pipeline::{RemediationOutcome, RemediationPipeline, RemediationStatus};
