//! HttpChannel - HTTP POST による stateless 配送
//!
//! 2xx 以外の応答は `DispatchError::Status` として返す。

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, instrument};

use crate::error::DispatchError;
use crate::ports::StatelessChannel;

pub struct HttpChannel {
    client: reqwest::Client,
}

impl HttpChannel {
    pub fn new(timeout: Duration) -> Result<Self, DispatchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DispatchError::Transport(format!("http client: {e}")))?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl StatelessChannel for HttpChannel {
    #[instrument(level = "debug", skip(self, payload))]
    async fn post(
        &self,
        endpoint: &str,
        payload: &serde_json::Value,
    ) -> Result<(), DispatchError> {
        let response = self
            .client
            .post(endpoint)
            .json(payload)
            .send()
            .await
            .map_err(|e| DispatchError::Transport(format!("post {endpoint}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DispatchError::Status {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
            });
        }
        debug!(endpoint, status = status.as_u16(), "stateless delivery answered");
        Ok(())
    }
}
