//! Redelivery - 配送に失敗した body を queue に戻すか dead-letter に回すか
//!
//! 再送すると queue が新しい id を振るので、試行回数は id では追えない。
//! ledger は `(queue_url, body)` をキーに数える
//! （body は byte 単位で同一のまま再送される）。
//!
//! # 制約
//! - 同じ queue に同じ body のメッセージが複数あると、失敗回数は 1 つのカウンタに合算される
//! - そのため 2 件目以降は上限に早く届く（dead-letter が早まる）
//! - body の外に試行回数を載せる手段（message attribute）は QueueGateway にない

use std::collections::HashMap;

use tokio::sync::Mutex;

/// 再送上限と dead-letter 先
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedeliveryPolicy {
    /// body ごとの再送上限。`None` は無制限
    pub max_redeliveries: Option<u32>,

    /// 上限到達後の送り先。`None` なら破棄
    pub dead_letter_queue_url: Option<String>,
}

impl RedeliveryPolicy {
    pub fn bounded(max_redeliveries: u32) -> Self {
        Self {
            max_redeliveries: Some(max_redeliveries),
            dead_letter_queue_url: None,
        }
    }

    pub fn unbounded() -> Self {
        Self {
            max_redeliveries: None,
            dead_letter_queue_url: None,
        }
    }

    pub fn with_dead_letter_queue(mut self, queue_url: impl Into<String>) -> Self {
        self.dead_letter_queue_url = Some(queue_url.into());
        self
    }

    /// `failures` 回目（1 始まり）の失敗に対する判断
    ///
    /// `max_redeliveries = n` なら 1..=n 回目は再送、n+1 回目で dead-letter
    pub fn decide(&self, failures: u32) -> RedeliveryDecision {
        match self.max_redeliveries {
            Some(max) if failures > max => RedeliveryDecision::DeadLetter {
                reason: format!("redelivery limit reached: {}/{}", failures - 1, max),
            },
            _ => RedeliveryDecision::Requeue { attempt: failures },
        }
    }
}

impl Default for RedeliveryPolicy {
    fn default() -> Self {
        Self::bounded(5)
    }
}

/// 配送に失敗した body の扱い
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedeliveryDecision {
    /// 元の queue に戻す
    Requeue { attempt: u32 },

    /// 再送をやめて dead-letter へ
    DeadLetter { reason: String },
}

/// `(queue_url, body)` ごとの配送失敗回数
///
/// 同じ queue 上の同一 body は区別しない（モジュールの「制約」を参照）
#[derive(Debug, Default)]
pub struct RedeliveryLedger {
    policy: RedeliveryPolicy,
    failures: Mutex<HashMap<(String, String), u32>>,
}

impl RedeliveryLedger {
    pub fn new(policy: RedeliveryPolicy) -> Self {
        Self {
            policy,
            failures: Mutex::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> &RedeliveryPolicy {
        &self.policy
    }

    /// 失敗を 1 回数えて判断する。dead-letter になった body は忘れる
    pub async fn record_failure(&self, queue_url: &str, body: &str) -> RedeliveryDecision {
        let mut failures = self.failures.lock().await;
        let key = (queue_url.to_string(), body.to_string());
        let count = failures.entry(key.clone()).or_insert(0);
        *count += 1;
        let decision = self.policy.decide(*count);
        if matches!(decision, RedeliveryDecision::DeadLetter { .. }) {
            failures.remove(&key);
        }
        decision
    }

    /// 配送できた body を忘れる
    pub async fn record_success(&self, queue_url: &str, body: &str) {
        self.failures
            .lock()
            .await
            .remove(&(queue_url.to_string(), body.to_string()));
    }

    pub async fn failures(&self, queue_url: &str, body: &str) -> u32 {
        self.failures
            .lock()
            .await
            .get(&(queue_url.to_string(), body.to_string()))
            .copied()
            .unwrap_or(0)
    }
}
