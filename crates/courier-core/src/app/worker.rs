//! Worker - プロセスの起動処理
//!
//! # フロー
//! 1. 配送モードをログに出す
//! 2. stateful 配送なら socket を接続
//! 3. queue を解決（明示 URL、なければ prefix で list）
//! 4. in_process なら scheduler を起動して Process Cache に登録
//!
//! external_trigger の場合は 1〜3 だけ行い、以降は [`Worker::trigger`] が
//! 呼ばれるたびに 1 パス実行する。

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::cache::{CacheKey, ProcessCache};
use crate::config::{CourierConfig, PollingMode};
use crate::error::CourierError;
use crate::pipeline::{PassReport, Pipeline};
use crate::ports::{DeliveryChannel, QueueGateway};
use crate::scheduler::{Bootstrap, Scheduler, SchedulerHandle, SchedulerTiming};

use super::control;

/// 起動時と restart 時に実行される準備処理
pub struct QueueBootstrap {
    gateway: Arc<dyn QueueGateway>,
    channel: DeliveryChannel,
    queue_urls: Vec<String>,
    queue_name_prefix: Option<String>,
}

impl QueueBootstrap {
    pub fn new(
        gateway: Arc<dyn QueueGateway>,
        channel: DeliveryChannel,
        config: &CourierConfig,
    ) -> Self {
        Self {
            gateway,
            channel,
            queue_urls: config.queue_urls.clone(),
            queue_name_prefix: config.queue_name_prefix.clone(),
        }
    }

    /// 対象 queue の解決
    ///
    /// 明示 URL があればそれを使い、なければ prefix で list する。
    /// 空の結果はエラーではない。
    pub async fn resolve(&self) -> Result<Vec<String>, CourierError> {
        if !self.queue_urls.is_empty() {
            return Ok(self.queue_urls.clone());
        }
        let queue_urls = self
            .gateway
            .list_queues(self.queue_name_prefix.as_deref())
            .await?;
        info!(
            prefix = ?self.queue_name_prefix,
            count = queue_urls.len(),
            "resolved queues"
        );
        Ok(queue_urls)
    }
}

#[async_trait]
impl Bootstrap for QueueBootstrap {
    async fn prepare(&self) -> Result<Vec<String>, CourierError> {
        if self.channel.is_stateful() {
            self.channel.connect().await?;
            info!("socket connected");
        }
        self.resolve().await
    }
}

pub struct Worker {
    polling_mode: PollingMode,
    timing: SchedulerTiming,
    pipeline: Arc<Pipeline>,
    bootstrap: Arc<QueueBootstrap>,
    cache: Arc<ProcessCache>,
}

impl Worker {
    /// 設定からワイヤリングする。cache はプロセス共有のもの
    pub fn new(
        config: &CourierConfig,
        gateway: Arc<dyn QueueGateway>,
        channel: DeliveryChannel,
    ) -> Self {
        let bootstrap = QueueBootstrap::new(gateway.clone(), channel.clone(), config);
        let pipeline = Pipeline::new(gateway, channel, config.pipeline_options());
        Self {
            polling_mode: config.polling_mode,
            timing: SchedulerTiming {
                poll_interval: config.poll_interval(),
                empty_delay: config.empty_delay(),
            },
            pipeline: Arc::new(pipeline),
            bootstrap: Arc::new(bootstrap),
            cache: ProcessCache::global(),
        }
    }

    /// 別の cache を使う（テスト用）
    pub fn with_cache(mut self, cache: Arc<ProcessCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    pub fn cache(&self) -> &Arc<ProcessCache> {
        &self.cache
    }

    /// 起動する
    ///
    /// in_process なら起動した scheduler の handle を返す（queue が
    /// 1 つも解決できなければ scheduler は停止状態のまま）。
    /// external_trigger なら準備だけ行って `None` を返す。
    pub async fn start(&self) -> Result<Option<SchedulerHandle>, CourierError> {
        let delivery = if self.pipeline.channel().is_stateful() {
            "stateful"
        } else {
            "stateless"
        };
        info!(delivery, polling_mode = ?self.polling_mode, "starting worker");

        match self.polling_mode {
            PollingMode::ExternalTrigger => {
                let queue_urls = self.bootstrap.prepare().await?;
                info!(queues = ?queue_urls, "waiting for external triggers");
                Ok(None)
            }
            PollingMode::InProcess => {
                // 1 プロセスに live な scheduler は 1 つまで
                control::shutdown(&self.cache).await?;

                let handle = Scheduler::spawn(
                    self.pipeline.clone(),
                    self.bootstrap.clone(),
                    self.timing,
                );
                self.cache.set(CacheKey::SchedulerHandle, handle.clone());

                // restart = clear + 準備 + start。初回起動も同じ経路を通す
                if let Err(e) = handle.restart().await {
                    control::shutdown(&self.cache).await?;
                    return Err(e);
                }
                if !handle.status().state.is_running() {
                    warn!("no queues to poll, scheduler not started");
                }
                Ok(Some(handle))
            }
        }
    }

    /// 外部トリガーから 1 パス実行する
    pub async fn trigger(&self) -> Result<PassReport, CourierError> {
        let queue_urls = self.bootstrap.resolve().await?;
        if queue_urls.is_empty() {
            warn!("triggered with no queues to poll");
        }
        self.pipeline.run_pass(&queue_urls).await
    }
}
