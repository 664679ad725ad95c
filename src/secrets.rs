use async_trait::async_trait;

use crate::error::SecretUnavailable;

/// Read access to a secret store.
#[async_trait]
pub trait SecretSource: Send + Sync {
    async fn secret_string(&self, secret_id: &str) -> Result<String, SecretUnavailable>;
}

pub struct SecretsManagerSource {
    client: aws_sdk_secretsmanager::Client,
}

impl SecretsManagerSource {
    pub fn new(client: aws_sdk_secretsmanager::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SecretSource for SecretsManagerSource {
    async fn secret_string(&self, secret_id: &str) -> Result<String, SecretUnavailable> {
        let output = self
            .client
            .get_secret_value()
            .secret_id(secret_id)
            .send()
            .await
            .map_err(|err| SecretUnavailable {
                secret_id: secret_id.to_string(),
                reason: aws_sdk_secretsmanager::Error::from(err).to_string(),
            })?;

        output
            .secret_string()
            .map(str::to_string)
            .ok_or_else(|| SecretUnavailable {
                secret_id: secret_id.to_string(),
                reason: "secret has no string value".to_string(),
            })
    }
}
