//! DeleteWorker - 取得したメッセージを検証・削除し、削除できた body を残す
//!
//! # フロー
//! 1. 全メッセージの必須フィールドを検証（1 件でも空なら削除前に全体を中断）
//! 2. queue はリスト順、メッセージは取得順に 1 件ずつ削除
//! 3. 削除失敗はログに出して body を捨てる（visibility window 経過後に queue が再配信する）
//! 4. 削除が確認された body だけを結果に入れる

use std::sync::Arc;

use tracing::{debug, warn};

use crate::domain::{DeleteOutcome, Message, QueueBodies, QueueMessages};
use crate::error::CourierError;
use crate::ports::QueueGateway;

/// 1 回の delete-batch に載せられる最大件数
pub const MAX_DELETE_BATCH: usize = 10;

pub struct DeleteWorker {
    gateway: Arc<dyn QueueGateway>,
    batch_deletes: bool,
}

impl DeleteWorker {
    /// `batch_deletes = false` ならメッセージごとに 1 件の batch、
    /// `true` なら queue ごとに最大 [`MAX_DELETE_BATCH`] 件ずつまとめて削除
    pub fn new(gateway: Arc<dyn QueueGateway>, batch_deletes: bool) -> Self {
        Self {
            gateway,
            batch_deletes,
        }
    }

    /// `queue_urls` の queue について `messages` を全部削除する
    ///
    /// 戻り値は queue ごとの、削除が確認された body（処理順）
    pub async fn delete_all(
        &self,
        messages: &QueueMessages,
        queue_urls: &[String],
    ) -> Result<QueueBodies, CourierError> {
        validate(messages, queue_urls)?;

        let mut bodies = QueueBodies::with_queues(queue_urls);
        for queue_url in queue_urls {
            let Some(queue_messages) = messages.get(queue_url) else {
                continue;
            };
            let kept = if self.batch_deletes {
                self.delete_batched(queue_url, queue_messages).await?
            } else {
                self.delete_each(queue_url, queue_messages).await?
            };
            bodies.entry_mut(queue_url).extend(kept);
        }
        Ok(bodies)
    }

    async fn delete_each(
        &self,
        queue_url: &str,
        messages: &[Message],
    ) -> Result<Vec<String>, CourierError> {
        let mut kept = Vec::with_capacity(messages.len());
        for message in messages {
            let outcome = self
                .gateway
                .delete_batch(queue_url, &[message.delete_entry()])
                .await?;
            if classify(queue_url, message, &outcome) {
                kept.push(message.body.clone());
            }
        }
        Ok(kept)
    }

    async fn delete_batched(
        &self,
        queue_url: &str,
        messages: &[Message],
    ) -> Result<Vec<String>, CourierError> {
        let mut kept = Vec::with_capacity(messages.len());
        for chunk in messages.chunks(MAX_DELETE_BATCH) {
            let entries: Vec<_> = chunk.iter().map(Message::delete_entry).collect();
            let outcome = self.gateway.delete_batch(queue_url, &entries).await?;
            for message in chunk {
                if classify(queue_url, message, &outcome) {
                    kept.push(message.body.clone());
                }
            }
        }
        Ok(kept)
    }
}

fn validate(messages: &QueueMessages, queue_urls: &[String]) -> Result<(), CourierError> {
    for queue_url in queue_urls {
        for message in messages.get(queue_url).unwrap_or_default() {
            if let Some(field) = message.missing_field() {
                return Err(CourierError::Validation {
                    queue_url: queue_url.clone(),
                    message_id: message.id.clone(),
                    field,
                });
            }
        }
    }
    Ok(())
}

/// 結果をログに出す。削除が確認されたら true
fn classify(queue_url: &str, message: &Message, outcome: &DeleteOutcome) -> bool {
    if let Some(failed) = outcome.failure_for(&message.id) {
        warn!(
            queue_url,
            message_id = %message.id,
            receipt_handle = %message.receipt_handle,
            code = %failed.code,
            reason = failed.message.as_deref().unwrap_or(""),
            "delete failed, message left for redelivery"
        );
        return false;
    }
    if outcome.is_deleted(&message.id) {
        debug!(queue_url, message_id = %message.id, "message deleted");
        return true;
    }
    warn!(
        queue_url,
        message_id = %message.id,
        "delete outcome did not mention message"
    );
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::InMemoryQueueGateway;
    use crate::pipeline::retrieval::retrieve;
    use rstest::rstest;

    async fn setup(bodies: &[(&str, &str)]) -> (Arc<InMemoryQueueGateway>, String) {
        let gateway = Arc::new(InMemoryQueueGateway::new());
        let q1 = gateway.create_queue("q1").await;
        for (id, body) in bodies {
            gateway.enqueue_with_id(&q1, id, body).await.unwrap();
        }
        (gateway, q1)
    }

    #[rstest]
    #[tokio::test]
    async fn confirmed_deletes_keep_bodies_in_order(#[values(false, true)] batch: bool) {
        let (gateway, q1) = setup(&[("1", "foo"), ("2", "bar"), ("3", "baz")]).await;
        let urls = vec![q1.clone()];
        let messages = retrieve(gateway.as_ref(), &urls, 10).await.unwrap();

        let worker = DeleteWorker::new(gateway.clone(), batch);
        let bodies = worker.delete_all(&messages, &urls).await.unwrap();

        assert_eq!(bodies.get(&q1).unwrap(), &["foo", "bar", "baz"]);
        assert_eq!(gateway.depth(&q1).await, 0);
        let expected_calls = if batch { 1 } else { 3 };
        assert_eq!(gateway.delete_calls().await, expected_calls);
    }

    #[rstest]
    #[tokio::test]
    async fn failed_delete_drops_only_that_body(#[values(false, true)] batch: bool) {
        let (gateway, q1) = setup(&[("1", "foo"), ("2", "bar")]).await;
        gateway.fail_deletes_for("1").await;
        let urls = vec![q1.clone()];
        let messages = retrieve(gateway.as_ref(), &urls, 10).await.unwrap();

        let worker = DeleteWorker::new(gateway.clone(), batch);
        let bodies = worker.delete_all(&messages, &urls).await.unwrap();

        assert_eq!(bodies.get(&q1).unwrap(), &["bar"]);
        assert_eq!(gateway.bodies(&q1).await, vec!["foo".to_string()]);
    }

    #[rstest]
    #[case("", "foo", "id")]
    #[case("1", "", "body")]
    #[tokio::test]
    async fn empty_field_aborts_before_any_delete(
        #[case] id: &str,
        #[case] body: &str,
        #[case] field: &str,
    ) {
        let (gateway, q1) = setup(&[("0", "ok"), (id, body)]).await;
        let urls = vec![q1.clone()];
        let messages = retrieve(gateway.as_ref(), &urls, 10).await.unwrap();

        let worker = DeleteWorker::new(gateway.clone(), false);
        let err = worker.delete_all(&messages, &urls).await.unwrap_err();

        match err {
            CourierError::Validation { field: f, queue_url, .. } => {
                assert_eq!(f, field);
                assert_eq!(queue_url, q1);
            }
            other => panic!("expected validation error, got {other:?}"),
        }
        assert_eq!(gateway.delete_calls().await, 0);
        assert_eq!(gateway.depth(&q1).await, 2);
    }

    #[tokio::test]
    async fn empty_receipt_handle_is_rejected() {
        let q1 = "memory://queues/q1".to_string();
        let mut messages = QueueMessages::new();
        messages.push(&q1, Message::new("1", "", "foo", &q1));

        let worker = DeleteWorker::new(Arc::new(InMemoryQueueGateway::new()), false);
        let err = worker.delete_all(&messages, &[q1]).await.unwrap_err();
        assert!(matches!(
            err,
            CourierError::Validation { field: "receipt_handle", .. }
        ));
    }

    #[tokio::test]
    async fn stale_receipt_is_reported_as_failure() {
        let (gateway, q1) = setup(&[("1", "foo")]).await;
        let mut messages = QueueMessages::new();
        messages.push(&q1, Message::new("1", "stale-receipt", "foo", &q1));

        let worker = DeleteWorker::new(gateway.clone(), false);
        let bodies = worker.delete_all(&messages, &[q1.clone()]).await.unwrap();

        assert!(bodies.get(&q1).unwrap().is_empty());
        assert_eq!(gateway.depth(&q1).await, 1);
    }

    #[tokio::test]
    async fn every_polled_queue_is_present_in_the_result() {
        let gateway = Arc::new(InMemoryQueueGateway::new());
        let q1 = gateway.create_queue("q1").await;
        let q2 = gateway.create_queue("q2").await;
        gateway.send(&q2, "only").await.unwrap();
        let urls = vec![q1.clone(), q2.clone()];
        let messages = retrieve(gateway.as_ref(), &urls, 10).await.unwrap();

        let worker = DeleteWorker::new(gateway.clone(), false);
        let bodies = worker.delete_all(&messages, &urls).await.unwrap();

        assert_eq!(bodies.queue_count(), 2);
        assert!(bodies.get(&q1).unwrap().is_empty());
        assert_eq!(bodies.get(&q2).unwrap(), &["only"]);
    }
}
