//! Pipeline - 1 パス分の retrieve → delete → forward
//!
//! # 主要コンポーネント
//! - **retrieval**: 全 queue から receive して queue ごとにまとめる
//! - **DeleteWorker**: 検証 → 削除 → 削除が確認された body だけ残す
//! - **Forwarder**: body ごとに配送。失敗したら元の queue に戻す
//! - **redelivery**: 再送上限と dead-letter

pub mod delete_worker;
pub mod forwarder;
pub mod redelivery;
pub mod retrieval;

pub use self::delete_worker::DeleteWorker;
pub use self::forwarder::{DispatchOutcome, DispatchReport, Dispatches, Forwarder};
pub use self::redelivery::{RedeliveryDecision, RedeliveryLedger, RedeliveryPolicy};

use std::sync::Arc;

use tracing::{debug, info};

use crate::domain::QueueBodies;
use crate::error::CourierError;
use crate::ports::{DeliveryChannel, QueueGateway};

/// パスの設定値
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// queue ごと・パスごとの receive 上限
    pub max_messages: u32,
    pub batch_deletes: bool,
    pub redelivery: RedeliveryPolicy,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            max_messages: 10,
            batch_deletes: false,
            redelivery: RedeliveryPolicy::default(),
        }
    }
}

/// 1 パスの結果
#[derive(Debug)]
pub struct PassReport {
    /// 全 queue で受け取った件数
    pub retrieved: usize,
    /// 削除が確認された body
    pub bodies: QueueBodies,
    /// このパスで始めた配送。drop すれば切り離す
    pub dispatches: Dispatches,
}

impl PassReport {
    /// どの queue にもメッセージがなかった
    pub fn is_empty(&self) -> bool {
        self.retrieved == 0
    }

    pub fn summary(&self) -> PassSummary {
        PassSummary {
            retrieved: self.retrieved,
            forwarded: self.bodies.total_items(),
        }
    }
}

/// 終わったパスの件数（実行中の配送は含まない）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub retrieved: usize,
    pub forwarded: usize,
}

pub struct Pipeline {
    gateway: Arc<dyn QueueGateway>,
    delete_worker: DeleteWorker,
    forwarder: Forwarder,
    max_messages: u32,
}

impl Pipeline {
    pub fn new(
        gateway: Arc<dyn QueueGateway>,
        channel: DeliveryChannel,
        options: PipelineOptions,
    ) -> Self {
        let ledger = Arc::new(RedeliveryLedger::new(options.redelivery));
        Self {
            delete_worker: DeleteWorker::new(gateway.clone(), options.batch_deletes),
            forwarder: Forwarder::new(gateway.clone(), channel, ledger),
            gateway,
            max_messages: options.max_messages,
        }
    }

    pub fn gateway(&self) -> &Arc<dyn QueueGateway> {
        &self.gateway
    }

    pub fn channel(&self) -> &DeliveryChannel {
        self.forwarder.channel()
    }

    pub fn forwarder(&self) -> &Forwarder {
        &self.forwarder
    }

    /// `queue_urls` に対して 1 パス実行する
    ///
    /// # 振る舞い
    /// - 重複した queue url は 1 回だけ polling
    /// - 配送を全部始めた時点で返る（完了は待たない）
    /// - 検証エラーと gateway 呼び出しの失敗はパスを中断する
    pub async fn run_pass(&self, queue_urls: &[String]) -> Result<PassReport, CourierError> {
        let queue_urls = dedup(queue_urls);

        let messages =
            retrieval::retrieve(self.gateway.as_ref(), &queue_urls, self.max_messages).await?;
        let retrieved = messages.total_items();
        let bodies = self.delete_worker.delete_all(&messages, &queue_urls).await?;

        if retrieved == 0 {
            debug!(queues = queue_urls.len(), "pass found no messages");
            return Ok(PassReport {
                retrieved,
                bodies,
                dispatches: Dispatches::default(),
            });
        }

        info!(
            retrieved,
            forwarding = bodies.total_items(),
            "forwarding messages"
        );
        let dispatches = self.forwarder.forward(bodies.clone());
        Ok(PassReport {
            retrieved,
            bodies,
            dispatches,
        })
    }
}

fn dedup(queue_urls: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(queue_urls.len());
    for queue_url in queue_urls {
        if !out.contains(queue_url) {
            out.push(queue_url.clone());
        }
    }
    out
}
