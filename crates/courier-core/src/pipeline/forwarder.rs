//! Forwarder - 削除済み body を subscriber へ転送する
//!
//! # フロー（body ごと、それぞれ別 task）
//! 1. body から SubscribeTarget を導出
//! 2. stateful なら socket に、stateless なら HTTP で送る
//! 3. 失敗したら元の body をそのまま元の queue に send し直す
//! 4. 再送上限を超えたら dead-letter queue へ（なければ破棄してログ）
//!
//! 配送の失敗がパスの失敗になることはない。

use std::sync::Arc;

use futures::future::join_all;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::redelivery::{RedeliveryDecision, RedeliveryLedger};
use crate::domain::{QueueBodies, SubscribeTarget};
use crate::error::DispatchError;
use crate::ports::{DeliveryChannel, QueueGateway};

/// 1 件の配送の結末
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Delivered,
    /// 失敗して元の queue に再送した
    Requeued { attempt: u32 },
    /// 上限を超えて dead-letter queue に送った
    DeadLettered { queue_url: String },
    /// 上限を超え、dead-letter queue もないので破棄した
    Dropped,
    /// 再送（または dead-letter への send）も失敗した
    RequeueFailed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    pub queue_url: String,
    pub body: String,
    pub outcome: DispatchOutcome,
}

/// 1 パス分の実行中の配送
///
/// drop しても task は切り離されるだけで最後まで走る
#[derive(Debug, Default)]
pub struct Dispatches {
    handles: Vec<JoinHandle<DispatchReport>>,
}

impl Dispatches {
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// すべての配送を待つ。結果は配送順
    pub async fn join(self) -> Vec<DispatchReport> {
        join_all(self.handles)
            .await
            .into_iter()
            .filter_map(|joined| match joined {
                Ok(report) => Some(report),
                Err(e) => {
                    error!(error = %e, "dispatch task did not finish");
                    None
                }
            })
            .collect()
    }
}

#[derive(Clone)]
pub struct Forwarder {
    gateway: Arc<dyn QueueGateway>,
    channel: DeliveryChannel,
    ledger: Arc<RedeliveryLedger>,
}

impl Forwarder {
    pub fn new(
        gateway: Arc<dyn QueueGateway>,
        channel: DeliveryChannel,
        ledger: Arc<RedeliveryLedger>,
    ) -> Self {
        Self {
            gateway,
            channel,
            ledger,
        }
    }

    pub fn channel(&self) -> &DeliveryChannel {
        &self.channel
    }

    pub fn ledger(&self) -> &RedeliveryLedger {
        &self.ledger
    }

    /// 各 body を 1 回ずつ別 task で配送する。完了は待たない
    pub fn forward(&self, bodies: QueueBodies) -> Dispatches {
        let mut handles = Vec::with_capacity(bodies.total_items());
        for (queue_url, queue_bodies) in bodies {
            for body in queue_bodies {
                let forwarder = self.clone();
                let queue_url = queue_url.clone();
                handles.push(tokio::spawn(async move {
                    forwarder.dispatch_one(queue_url, body).await
                }));
            }
        }
        Dispatches { handles }
    }

    /// 1 件配送し、失敗なら回復処理をする。エラーは返さない
    pub async fn dispatch_one(&self, queue_url: String, body: String) -> DispatchReport {
        let target = SubscribeTarget::parse(&body);
        info!(endpoint = %target.endpoint, params = %target.params, "dispatching message");

        let outcome = match self.deliver(&target).await {
            Ok(()) => {
                self.ledger.record_success(&queue_url, &body).await;
                DispatchOutcome::Delivered
            }
            Err(e) => {
                warn!(
                    queue_url = %queue_url,
                    endpoint = %target.endpoint,
                    error = %e,
                    "dispatch failed"
                );
                self.recover(&queue_url, &body).await
            }
        };

        DispatchReport {
            queue_url,
            body,
            outcome,
        }
    }

    async fn deliver(&self, target: &SubscribeTarget) -> Result<(), DispatchError> {
        match &self.channel {
            DeliveryChannel::Stateful(channel) => {
                channel.send(&target.socket_destination()).await
            }
            DeliveryChannel::Stateless(channel) => {
                channel.post(&target.endpoint, &target.http_payload()).await
            }
        }
    }

    async fn recover(&self, queue_url: &str, body: &str) -> DispatchOutcome {
        match self.ledger.record_failure(queue_url, body).await {
            RedeliveryDecision::Requeue { attempt } => {
                info!(queue_url, body, attempt, "re-sending message to its queue");
                match self.gateway.send(queue_url, body).await {
                    Ok(_) => DispatchOutcome::Requeued { attempt },
                    Err(e) => {
                        error!(queue_url, body, error = %e, "re-send failed, message lost");
                        DispatchOutcome::RequeueFailed {
                            reason: e.to_string(),
                        }
                    }
                }
            }
            RedeliveryDecision::DeadLetter { reason } => {
                let Some(dlq) = self.ledger.policy().dead_letter_queue_url.clone() else {
                    error!(
                        queue_url,
                        body,
                        %reason,
                        "no dead-letter queue configured, dropping message"
                    );
                    return DispatchOutcome::Dropped;
                };
                warn!(queue_url, dead_letter_queue = %dlq, %reason, "dead-lettering message");
                match self.gateway.send(&dlq, body).await {
                    Ok(_) => DispatchOutcome::DeadLettered { queue_url: dlq },
                    Err(e) => {
                        error!(
                            dead_letter_queue = %dlq,
                            body,
                            error = %e,
                            "dead-letter send failed, message lost"
                        );
                        DispatchOutcome::RequeueFailed {
                            reason: e.to_string(),
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::{Delivery, InMemoryQueueGateway, LoopbackChannel};
    use crate::pipeline::redelivery::RedeliveryPolicy;
    use crate::ports::StatefulChannel;
    use serde_json::json;

    struct Fixture {
        gateway: Arc<InMemoryQueueGateway>,
        loopback: Arc<LoopbackChannel>,
        q1: String,
    }

    impl Fixture {
        async fn new() -> Self {
            let gateway = Arc::new(InMemoryQueueGateway::new());
            let q1 = gateway.create_queue("q1").await;
            Self {
                gateway,
                loopback: Arc::new(LoopbackChannel::new()),
                q1,
            }
        }

        fn stateless(&self, policy: RedeliveryPolicy) -> Forwarder {
            Forwarder::new(
                self.gateway.clone(),
                DeliveryChannel::Stateless(self.loopback.clone()),
                Arc::new(RedeliveryLedger::new(policy)),
            )
        }

        fn stateful(&self) -> Forwarder {
            Forwarder::new(
                self.gateway.clone(),
                DeliveryChannel::Stateful(self.loopback.clone()),
                Arc::new(RedeliveryLedger::default()),
            )
        }

        fn bodies(&self, bodies: &[&str]) -> QueueBodies {
            let mut map = QueueBodies::with_queues(&[self.q1.as_str()]);
            for body in bodies {
                map.push(&self.q1, body.to_string());
            }
            map
        }
    }

    #[tokio::test]
    async fn stateless_delivery_posts_params_to_endpoint() {
        let fx = Fixture::new().await;
        let body = r#"{"endPoint":"http://sub/orders","params":"42"}"#;

        let reports = fx
            .stateless(RedeliveryPolicy::default())
            .forward(fx.bodies(&[body]))
            .join()
            .await;

        assert_eq!(reports[0].outcome, DispatchOutcome::Delivered);
        assert_eq!(
            fx.loopback.deliveries().await,
            vec![Delivery::Post {
                endpoint: "http://sub/orders".into(),
                payload: json!({ "params": "42" }),
            }]
        );
        assert!(fx.gateway.sent().await.is_empty());
    }

    #[tokio::test]
    async fn stateful_delivery_sends_composed_destination() {
        let fx = Fixture::new().await;
        StatefulChannel::connect(fx.loopback.as_ref()).await.unwrap();
        let bodies = fx.bodies(&[r#"{"endPoint":"room","params":"7"}"#, "lobby"]);

        let reports = fx.stateful().forward(bodies).join().await;

        assert!(reports.iter().all(|r| r.outcome == DispatchOutcome::Delivered));
        let mut frames = fx.loopback.deliveries().await;
        frames.sort_by_key(|d| format!("{d:?}"));
        assert_eq!(
            frames,
            vec![Delivery::Frame("lobby".into()), Delivery::Frame("room/7".into())]
        );
    }

    #[tokio::test]
    async fn failed_dispatch_resends_original_body_exactly_once() {
        let fx = Fixture::new().await;
        fx.loopback.fail_all(true).await;
        let body = r#"{ "endPoint": "http://down", "params": {"a": 1} }"#;

        let reports = fx
            .stateless(RedeliveryPolicy::default())
            .forward(fx.bodies(&[body]))
            .join()
            .await;

        assert_eq!(reports[0].outcome, DispatchOutcome::Requeued { attempt: 1 });
        assert_eq!(fx.gateway.sent().await, vec![(fx.q1.clone(), body.to_string())]);
    }

    #[tokio::test]
    async fn one_failure_does_not_block_other_messages() {
        let fx = Fixture::new().await;
        fx.loopback.fail_endpoint("http://down").await;

        let reports = fx
            .stateless(RedeliveryPolicy::default())
            .forward(fx.bodies(&["http://down", "http://up", "http://up2"]))
            .join()
            .await;

        let delivered = reports
            .iter()
            .filter(|r| r.outcome == DispatchOutcome::Delivered)
            .count();
        assert_eq!(delivered, 2);
        assert_eq!(fx.gateway.sent().await, vec![(fx.q1.clone(), "http://down".to_string())]);
    }

    #[tokio::test]
    async fn bound_reached_goes_to_dead_letter_queue() {
        let fx = Fixture::new().await;
        let dlq = fx.gateway.create_queue("q1-dead").await;
        fx.loopback.fail_all(true).await;
        let forwarder = fx.stateless(RedeliveryPolicy::bounded(1).with_dead_letter_queue(&dlq));

        let first = forwarder.dispatch_one(fx.q1.clone(), "foo".into()).await;
        let second = forwarder.dispatch_one(fx.q1.clone(), "foo".into()).await;

        assert_eq!(first.outcome, DispatchOutcome::Requeued { attempt: 1 });
        assert_eq!(second.outcome, DispatchOutcome::DeadLettered { queue_url: dlq.clone() });
        assert_eq!(
            fx.gateway.sent().await,
            vec![(fx.q1.clone(), "foo".to_string()), (dlq, "foo".to_string())]
        );
    }

    #[tokio::test]
    async fn bound_reached_without_dead_letter_queue_drops() {
        let fx = Fixture::new().await;
        fx.loopback.fail_all(true).await;
        let forwarder = fx.stateless(RedeliveryPolicy::bounded(0));

        let report = forwarder.dispatch_one(fx.q1.clone(), "foo".into()).await;

        assert_eq!(report.outcome, DispatchOutcome::Dropped);
        assert!(fx.gateway.sent().await.is_empty());
    }

    #[tokio::test]
    async fn requeue_to_missing_queue_is_absorbed() {
        let fx = Fixture::new().await;
        fx.loopback.fail_all(true).await;
        let forwarder = fx.stateless(RedeliveryPolicy::default());

        let report = forwarder
            .dispatch_one("memory://queues/gone".into(), "foo".into())
            .await;

        assert!(matches!(report.outcome, DispatchOutcome::RequeueFailed { .. }));
    }
}
