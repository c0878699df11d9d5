//! Retrieval - queue ごとに receive し、[`QueueMessages`] にまとめる

use futures::future::try_join_all;
use tracing::debug;

use crate::domain::QueueMessages;
use crate::error::CourierError;
use crate::ports::QueueGateway;

/// `queue_urls` のすべてから receive する
///
/// # 契約
/// - 結果のキーはちょうど `queue_urls`（空の queue は空リスト）、呼び出し側の順
/// - queue が 1 つなら直接 receive、複数なら並行に receive してマージ
/// - queue 内の順序は receive の応答どおり
pub async fn retrieve(
    gateway: &dyn QueueGateway,
    queue_urls: &[String],
    max_messages: u32,
) -> Result<QueueMessages, CourierError> {
    let mut merged = QueueMessages::with_queues(queue_urls);

    match queue_urls {
        [] => {}
        [queue_url] => {
            let messages = gateway.receive(queue_url, max_messages).await?;
            merged.entry_mut(queue_url).extend(messages);
        }
        _ => {
            let received = try_join_all(
                queue_urls
                    .iter()
                    .map(|queue_url| gateway.receive(queue_url, max_messages)),
            )
            .await?;
            for (queue_url, messages) in queue_urls.iter().zip(received) {
                merged.entry_mut(queue_url).extend(messages);
            }
        }
    }

    debug!(
        queues = merged.queue_count(),
        messages = merged.total_items(),
        "retrieved messages"
    );
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::InMemoryQueueGateway;

    #[tokio::test]
    async fn single_queue_is_received_once() {
        let gateway = InMemoryQueueGateway::new();
        let q1 = gateway.create_queue("q1").await;
        gateway.enqueue_with_id(&q1, "1", "foo").await.unwrap();

        let merged = retrieve(&gateway, &[q1.clone()], 10).await.unwrap();

        assert_eq!(gateway.receive_calls().await, 1);
        let messages = merged.get(&q1).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, "1");
        assert_eq!(messages[0].body, "foo");
    }

    #[tokio::test]
    async fn fan_out_covers_every_queue_even_when_empty() {
        let gateway = InMemoryQueueGateway::new();
        let q1 = gateway.create_queue("q1").await;
        let q2 = gateway.create_queue("q2").await;
        let q3 = gateway.create_queue("q3").await;
        gateway.send(&q2, "b1").await.unwrap();
        gateway.send(&q2, "b2").await.unwrap();

        let urls = vec![q3.clone(), q1.clone(), q2.clone()];
        let merged = retrieve(&gateway, &urls, 10).await.unwrap();

        assert_eq!(gateway.receive_calls().await, 3);
        assert_eq!(
            merged.queue_urls().collect::<Vec<_>>(),
            vec![q3.as_str(), q1.as_str(), q2.as_str()]
        );
        assert!(merged.get(&q1).unwrap().is_empty());
        assert!(merged.get(&q3).unwrap().is_empty());
        let bodies: Vec<_> = merged.get(&q2).unwrap().iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, vec!["b1", "b2"]);
    }

    #[tokio::test]
    async fn receive_ceiling_is_applied_per_queue() {
        let gateway = InMemoryQueueGateway::new();
        let q1 = gateway.create_queue("q1").await;
        for i in 0..5 {
            gateway.send(&q1, &format!("m{i}")).await.unwrap();
        }

        let merged = retrieve(&gateway, &[q1.clone()], 3).await.unwrap();
        assert_eq!(merged.get(&q1).unwrap().len(), 3);
    }

    #[tokio::test]
    async fn receive_error_aborts_retrieval() {
        let gateway = InMemoryQueueGateway::new();
        let q1 = gateway.create_queue("q1").await;
        let urls = vec![q1, "memory://queues/missing".to_string()];

        let err = retrieve(&gateway, &urls, 10).await.unwrap_err();
        assert!(matches!(err, CourierError::Gateway(_)));
    }
}
