//! SqsQueueGateway - AWS SQS による managed queue（feature `sqs`）

use async_trait::async_trait;
use aws_sdk_sqs::Client;
use aws_sdk_sqs::types::DeleteMessageBatchRequestEntry;
use tracing::instrument;

use crate::domain::{DeleteEntry, DeleteOutcome, FailedDelete, Message};
use crate::error::GatewayError;
use crate::ports::QueueGateway;

/// SQS の receive 上限
pub const SQS_MAX_MESSAGES: u32 = 10;

#[derive(Clone)]
pub struct SqsQueueGateway {
    client: Client,
    wait_time_secs: i32,
}

impl SqsQueueGateway {
    pub fn new(client: Client, wait_time_secs: u32) -> Self {
        Self {
            client,
            wait_time_secs: wait_time_secs.min(20) as i32,
        }
    }

    /// AWS の標準の環境設定（region, credentials）から作る
    pub async fn from_env(wait_time_secs: u32) -> Self {
        let config = aws_config::load_from_env().await;
        Self::new(Client::new(&config), wait_time_secs)
    }
}

/// next_token がなくなるまでページを辿って連結する
async fn collect_pages<F, Fut>(mut fetch: F) -> Result<Vec<String>, GatewayError>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<(Vec<String>, Option<String>), GatewayError>>,
{
    let mut items = Vec::new();
    let mut next_token = None;
    loop {
        let (page, token) = fetch(next_token.take()).await?;
        items.extend(page);
        match token {
            Some(token) if !token.is_empty() => next_token = Some(token),
            _ => return Ok(items),
        }
    }
}

#[async_trait]
impl QueueGateway for SqsQueueGateway {
    #[instrument(level = "debug", skip(self))]
    async fn receive(
        &self,
        queue_url: &str,
        max_messages: u32,
    ) -> Result<Vec<Message>, GatewayError> {
        let resp = self
            .client
            .receive_message()
            .queue_url(queue_url)
            .max_number_of_messages(max_messages.clamp(1, SQS_MAX_MESSAGES) as i32)
            .wait_time_seconds(self.wait_time_secs)
            .send()
            .await
            .map_err(|e| GatewayError::Receive {
                queue_url: queue_url.to_string(),
                reason: e.to_string(),
            })?;

        Ok(resp
            .messages
            .unwrap_or_default()
            .into_iter()
            .map(|m| {
                Message::new(
                    m.message_id.unwrap_or_default(),
                    m.receipt_handle.unwrap_or_default(),
                    m.body.unwrap_or_default(),
                    queue_url,
                )
            })
            .collect())
    }

    #[instrument(level = "debug", skip(self, entries), fields(entries = entries.len()))]
    async fn delete_batch(
        &self,
        queue_url: &str,
        entries: &[DeleteEntry],
    ) -> Result<DeleteOutcome, GatewayError> {
        let delete_error = |reason: String| GatewayError::Delete {
            queue_url: queue_url.to_string(),
            reason,
        };

        let mut request = self.client.delete_message_batch().queue_url(queue_url);
        for entry in entries {
            let entry = DeleteMessageBatchRequestEntry::builder()
                .id(&entry.id)
                .receipt_handle(&entry.receipt_handle)
                .build()
                .map_err(|e| delete_error(e.to_string()))?;
            request = request.entries(entry);
        }

        let resp = request
            .send()
            .await
            .map_err(|e| delete_error(e.to_string()))?;

        Ok(DeleteOutcome {
            successful: resp.successful().iter().map(|s| s.id().to_string()).collect(),
            failed: resp
                .failed()
                .iter()
                .map(|f| FailedDelete {
                    id: f.id().to_string(),
                    code: f.code().to_string(),
                    message: f.message().map(str::to_string),
                })
                .collect(),
        })
    }

    #[instrument(level = "debug", skip(self, body))]
    async fn send(&self, queue_url: &str, body: &str) -> Result<String, GatewayError> {
        let resp = self
            .client
            .send_message()
            .queue_url(queue_url)
            .message_body(body)
            .send()
            .await
            .map_err(|e| GatewayError::Send {
                queue_url: queue_url.to_string(),
                reason: e.to_string(),
            })?;
        Ok(resp.message_id.unwrap_or_default())
    }

    #[instrument(level = "debug", skip(self))]
    async fn list_queues(&self, prefix: Option<&str>) -> Result<Vec<String>, GatewayError> {
        let prefix = prefix.map(str::to_string);
        collect_pages(|next_token| {
            let request = self
                .client
                .list_queues()
                .set_queue_name_prefix(prefix.clone())
                .set_next_token(next_token);
            async move {
                let resp = request
                    .send()
                    .await
                    .map_err(|e| GatewayError::List(e.to_string()))?;
                Ok((resp.queue_urls.unwrap_or_default(), resp.next_token))
            }
        })
        .await
    }
}
