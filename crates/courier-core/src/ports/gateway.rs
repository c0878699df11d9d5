//! QueueGateway - pipeline から見た managed queue
//!
//! 保存・visibility window・再配信は queue サービス側の責務。
//! pipeline が使うのは receive / delete-batch / send と、起動時の queue 解決用の list だけ。

use async_trait::async_trait;

use crate::domain::{DeleteEntry, DeleteOutcome, Message};
use crate::error::GatewayError;

#[async_trait]
pub trait QueueGateway: Send + Sync {
    /// `queue_url` から最大 `max_messages` 件受け取る
    ///
    /// 要求より少ない・0 件もありうる。待ち時間には上限がある
    async fn receive(&self, queue_url: &str, max_messages: u32)
    -> Result<Vec<Message>, GatewayError>;

    /// batch delete。エントリごとの失敗は outcome に入る
    ///
    /// `Err` は呼び出し自体の失敗
    async fn delete_batch(
        &self,
        queue_url: &str,
        entries: &[DeleteEntry],
    ) -> Result<DeleteOutcome, GatewayError>;

    /// `body` を積む。新しい message id を返す
    async fn send(&self, queue_url: &str, body: &str) -> Result<String, GatewayError>;

    /// queue 識別子の一覧（queue 名の prefix で絞り込み可）
    async fn list_queues(&self, prefix: Option<&str>) -> Result<Vec<String>, GatewayError>;
}
