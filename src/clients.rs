//! Process-wide AWS clients.
//!
//! Built once from one shared SDK configuration and handed to the pipeline
//! components; clones share the underlying connection pools.

use aws_config::SdkConfig;
use aws_sdk_s3 as s3;
use tokio::sync::OnceCell;

#[derive(Clone, Debug)]
pub struct AwsClients {
    pub s3: s3::Client,
    pub sqs: aws_sdk_sqs::Client,
    pub cloudtrail: aws_sdk_cloudtrail::Client,
    pub ses: aws_sdk_sesv2::Client,
    pub secrets: aws_sdk_secretsmanager::Client,
}

static CLIENTS: OnceCell<AwsClients> = OnceCell::const_new();

impl AwsClients {
    pub fn from_conf(config: &SdkConfig, use_path_style_buckets: bool) -> Self {
        AwsClients {
            s3: s3_client(config, use_path_style_buckets),
            sqs: aws_sdk_sqs::Client::new(config),
            cloudtrail: aws_sdk_cloudtrail::Client::new(config),
            ses: aws_sdk_sesv2::Client::new(config),
            secrets: aws_sdk_secretsmanager::Client::new(config),
        }
    }

    /// Loads the SDK configuration from the environment on first use.
    pub async fn shared(use_path_style_buckets: bool) -> &'static AwsClients {
        CLIENTS
            .get_or_init(|| async move {
                let config = aws_config::load_from_env().await;
                AwsClients::from_conf(&config, use_path_style_buckets)
            })
            .await
    }
}

fn s3_client(config: &SdkConfig, use_path_style_buckets: bool) -> s3::Client {
    let client = s3::Client::new(config);

    if use_path_style_buckets {
        tracing::info!("Using path-style buckets");
        let config_builder = client.config().clone().to_builder();
        s3::Client::from_conf(config_builder.force_path_style(true).build())
    } else {
        client
    }
}
