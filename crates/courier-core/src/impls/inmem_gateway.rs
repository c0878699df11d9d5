//! InMemoryQueueGateway - 開発・テスト用の managed queue
//!
//! # 再現している性質
//! - visibility window: 受け取ったメッセージは window が過ぎるまで見えない
//! - receipt handle: 配信ごとに発行。再配信・削除のあとは無効
//! - send は常に新しい id のメッセージを作る

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;
use ulid::Ulid;

use crate::domain::{DeleteEntry, DeleteOutcome, FailedDelete, Message};
use crate::error::GatewayError;
use crate::ports::QueueGateway;

const URL_PREFIX: &str = "memory://queues/";

/// 無効な receipt handle に対する理由コード
pub const INVALID_RECEIPT: &str = "ReceiptHandleIsInvalid";
/// [`InMemoryQueueGateway::fail_deletes_for`] で失敗させた削除の理由コード
pub const FORCED_FAILURE: &str = "InternalError";

#[derive(Debug, Clone)]
struct StoredMessage {
    id: String,
    body: String,
    receipt_handle: Option<String>,
    invisible_until: Option<Instant>,
}

impl StoredMessage {
    fn new(id: String, body: String) -> Self {
        Self {
            id,
            body,
            receipt_handle: None,
            invisible_until: None,
        }
    }

    fn is_visible(&self, now: Instant) -> bool {
        self.invisible_until.is_none_or(|until| until <= now)
    }
}

#[derive(Default)]
struct GatewayState {
    /// 作成順の queue url
    order: Vec<String>,
    queues: HashMap<String, VecDeque<StoredMessage>>,
    /// 成功した send の履歴 (queue_url, body)
    sent: Vec<(String, String)>,
    /// 削除を失敗させる message id
    failing_deletes: HashSet<String>,
    receive_calls: usize,
    delete_calls: usize,
}

impl GatewayState {
    fn queue_mut(&mut self, queue_url: &str) -> Result<&mut VecDeque<StoredMessage>, GatewayError> {
        self.queues
            .get_mut(queue_url)
            .ok_or_else(|| GatewayError::UnknownQueue(queue_url.to_string()))
    }
}

pub struct InMemoryQueueGateway {
    state: Mutex<GatewayState>,
    visibility_timeout: Duration,
}

impl InMemoryQueueGateway {
    pub fn new() -> Self {
        Self::with_visibility_timeout(Duration::from_secs(30))
    }

    pub fn with_visibility_timeout(visibility_timeout: Duration) -> Self {
        Self {
            state: Mutex::new(GatewayState::default()),
            visibility_timeout,
        }
    }

    /// queue を作って url を返す（冪等）
    pub async fn create_queue(&self, name: &str) -> String {
        let url = format!("{URL_PREFIX}{name}");
        let mut state = self.state.lock().await;
        if !state.queues.contains_key(&url) {
            state.queues.insert(url.clone(), VecDeque::new());
            state.order.push(url.clone());
        }
        url
    }

    /// id を指定して積む（send 履歴には残らない）
    ///
    /// 空フィールドを含む不正なメッセージもそのまま積める
    pub async fn enqueue_with_id(
        &self,
        queue_url: &str,
        id: &str,
        body: &str,
    ) -> Result<(), GatewayError> {
        let mut state = self.state.lock().await;
        state
            .queue_mut(queue_url)?
            .push_back(StoredMessage::new(id.to_string(), body.to_string()));
        Ok(())
    }

    /// 以降、`message_id` の削除をすべて失敗として返す
    pub async fn fail_deletes_for(&self, message_id: &str) {
        self.state
            .lock()
            .await
            .failing_deletes
            .insert(message_id.to_string());
    }

    /// `queue_url` 上のメッセージ数（不可視のものも含む）
    pub async fn depth(&self, queue_url: &str) -> usize {
        let state = self.state.lock().await;
        state.queues.get(queue_url).map_or(0, VecDeque::len)
    }

    /// `queue_url` 上の body（queue 順）
    pub async fn bodies(&self, queue_url: &str) -> Vec<String> {
        let state = self.state.lock().await;
        state
            .queues
            .get(queue_url)
            .map(|q| q.iter().map(|m| m.body.clone()).collect())
            .unwrap_or_default()
    }

    /// これまでの send すべて
    pub async fn sent(&self) -> Vec<(String, String)> {
        self.state.lock().await.sent.clone()
    }

    pub async fn receive_calls(&self) -> usize {
        self.state.lock().await.receive_calls
    }

    pub async fn delete_calls(&self) -> usize {
        self.state.lock().await.delete_calls
    }
}

impl Default for InMemoryQueueGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueueGateway for InMemoryQueueGateway {
    async fn receive(
        &self,
        queue_url: &str,
        max_messages: u32,
    ) -> Result<Vec<Message>, GatewayError> {
        let now = Instant::now();
        let invisible_until = now + self.visibility_timeout;

        let mut state = self.state.lock().await;
        state.receive_calls += 1;
        let queue = state.queue_mut(queue_url)?;

        let mut out = Vec::new();
        for stored in queue.iter_mut() {
            if out.len() >= max_messages as usize {
                break;
            }
            if !stored.is_visible(now) {
                continue;
            }
            let receipt_handle = Ulid::new().to_string();
            stored.receipt_handle = Some(receipt_handle.clone());
            stored.invisible_until = Some(invisible_until);
            out.push(Message::new(
                stored.id.clone(),
                receipt_handle,
                stored.body.clone(),
                queue_url,
            ));
        }
        Ok(out)
    }

    async fn delete_batch(
        &self,
        queue_url: &str,
        entries: &[DeleteEntry],
    ) -> Result<DeleteOutcome, GatewayError> {
        let mut state = self.state.lock().await;
        state.delete_calls += 1;
        let failing = state.failing_deletes.clone();
        let queue = state.queue_mut(queue_url)?;

        let mut outcome = DeleteOutcome::default();
        for entry in entries {
            if failing.contains(&entry.id) {
                outcome
                    .failed
                    .push(FailedDelete::new(entry.id.clone(), FORCED_FAILURE));
                continue;
            }
            let pos = queue.iter().position(|m| {
                m.id == entry.id
                    && m.receipt_handle.as_deref() == Some(entry.receipt_handle.as_str())
            });
            match pos {
                Some(pos) => {
                    queue.remove(pos);
                    outcome.successful.push(entry.id.clone());
                }
                None => outcome
                    .failed
                    .push(FailedDelete::new(entry.id.clone(), INVALID_RECEIPT)),
            }
        }
        Ok(outcome)
    }

    async fn send(&self, queue_url: &str, body: &str) -> Result<String, GatewayError> {
        let id = Ulid::new().to_string();
        let mut state = self.state.lock().await;
        state
            .queue_mut(queue_url)
            .map_err(|e| GatewayError::Send {
                queue_url: queue_url.to_string(),
                reason: e.to_string(),
            })?
            .push_back(StoredMessage::new(id.clone(), body.to_string()));
        state.sent.push((queue_url.to_string(), body.to_string()));
        Ok(id)
    }

    async fn list_queues(&self, prefix: Option<&str>) -> Result<Vec<String>, GatewayError> {
        let state = self.state.lock().await;
        Ok(state
            .order
            .iter()
            .filter(|url| {
                let name = url.strip_prefix(URL_PREFIX).unwrap_or(url.as_str());
                prefix.is_none_or(|p| name.starts_with(p))
            })
            .cloned()
            .collect())
    }
}
