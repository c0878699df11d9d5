//! control - Process Cache 経由の scheduler 操作
//!
//! 外部トリガーやシグナルハンドラなど、起動時とは別の呼び出し経路から
//! scheduler を探して止める・再起動するための入口。
//!
//! # cache エントリの扱い
//! - `Worker::start` だけが書き込む
//! - `clear` は timer を止めるだけでエントリは残す（restart で再利用する）
//! - `shutdown` だけがエントリを空にする

use tracing::{debug, error, info};

use crate::cache::{CacheKey, ProcessCache};
use crate::error::CourierError;
use crate::scheduler::{SchedulerHandle, SchedulerStatus};

/// cache に登録された scheduler handle
pub fn scheduler_handle(cache: &ProcessCache) -> Option<SchedulerHandle> {
    cache.try_get::<SchedulerHandle>(CacheKey::SchedulerHandle)
}

pub fn scheduler_status(cache: &ProcessCache) -> Option<SchedulerStatus> {
    scheduler_handle(cache).map(|handle| handle.status())
}

/// polling を止める。冪等（未登録・停止済みなら何もしない）
pub async fn clear(cache: &ProcessCache) -> Result<(), CourierError> {
    match scheduler_handle(cache) {
        Some(handle) if !handle.is_closed() => handle.clear().await,
        _ => {
            debug!("no live scheduler to clear");
            Ok(())
        }
    }
}

/// clear してからトップレベルの準備処理をやり直し、polling を再開する
pub async fn restart(cache: &ProcessCache) -> Result<(), CourierError> {
    let handle = scheduler_handle(cache).ok_or(CourierError::SchedulerClosed)?;
    info!("restarting scheduler");
    handle.restart().await
}

/// pass の失敗で scheduler が止まるまで待ち、その error を返す
///
/// clear による停止は失敗ではないので待ち続ける。task が終わった場合は
/// `SchedulerClosed` を返す。自動では restart せず、呼び出し側が
/// プロセスを終了するか restart するかを決める。
pub async fn wait_for_failure(handle: &SchedulerHandle) -> CourierError {
    let stopped = handle
        .wait_for(|s| !s.state.is_running() && s.last_error.is_some())
        .await;
    match stopped {
        Ok(status) => {
            let message = status.last_error.unwrap_or_default();
            error!(error = %message, "scheduler stopped after a failed pass");
            CourierError::Scheduler(message)
        }
        Err(e) => e,
    }
}

/// scheduler task を終了し、cache エントリを空にする。冪等
pub async fn shutdown(cache: &ProcessCache) -> Result<(), CourierError> {
    match cache.take::<SchedulerHandle>(CacheKey::SchedulerHandle) {
        Some(handle) => {
            handle.shutdown().await?;
            info!("scheduler removed from process cache");
        }
        None => debug!("no scheduler registered"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::app::Worker;
    use crate::config::CourierConfig;
    use crate::impls::{InMemoryQueueGateway, LoopbackChannel};
    use crate::ports::DeliveryChannel;

    async fn start_worker(queue_urls: Vec<String>) -> (Arc<ProcessCache>, SchedulerHandle) {
        let cache = Arc::new(ProcessCache::new());
        let config = CourierConfig {
            queue_urls,
            ..CourierConfig::default()
        };
        let worker = Worker::new(
            &config,
            Arc::new(InMemoryQueueGateway::new()),
            DeliveryChannel::Stateless(Arc::new(LoopbackChannel::new())),
        )
        .with_cache(cache.clone());
        let handle = worker.start().await.unwrap().unwrap();
        (cache, handle)
    }

    #[tokio::test(start_paused = true)]
    async fn failed_pass_is_reported_as_scheduler_error() {
        let (cache, handle) = start_worker(vec!["memory://queues/missing".to_string()]).await;

        let failure = wait_for_failure(&handle).await;

        assert!(matches!(failure, CourierError::Scheduler(ref m) if m.contains("missing")));
        assert!(!handle.status().state.is_running());
        shutdown(&cache).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn clear_is_not_a_failure() {
        let gateway = InMemoryQueueGateway::new();
        let q1 = gateway.create_queue("q1").await;
        let cache = Arc::new(ProcessCache::new());
        let config = CourierConfig {
            queue_urls: vec![q1],
            ..CourierConfig::default()
        };
        let worker = Worker::new(
            &config,
            Arc::new(gateway),
            DeliveryChannel::Stateless(Arc::new(LoopbackChannel::new())),
        )
        .with_cache(cache.clone());
        let handle = worker.start().await.unwrap().unwrap();
        let watcher = tokio::spawn({
            let handle = handle.clone();
            async move { wait_for_failure(&handle).await }
        });

        clear(&cache).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_secs(30)).await;
        assert!(!watcher.is_finished());

        shutdown(&cache).await.unwrap();
        let failure = watcher.await.unwrap();
        assert!(matches!(failure, CourierError::SchedulerClosed));
    }
}
