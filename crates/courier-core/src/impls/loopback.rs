//! LoopbackChannel - 開発・テスト用のプロセス内 subscriber
//!
//! stateful / stateless の両方を実装し、配送をすべて記録する。
//! 全体、または endpoint 単位で失敗させられる。

use std::collections::HashSet;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::info;

use crate::error::DispatchError;
use crate::ports::{StatefulChannel, StatelessChannel};

/// 記録された 1 件の配送
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// stateful で送られたフレーム
    Frame(String),
    /// stateless の POST
    Post {
        endpoint: String,
        payload: serde_json::Value,
    },
}

#[derive(Default)]
struct LoopbackState {
    connected: bool,
    connects: usize,
    fail_all: bool,
    failing_endpoints: HashSet<String>,
    deliveries: Vec<Delivery>,
    attempts: usize,
}

#[derive(Default)]
pub struct LoopbackChannel {
    state: Mutex<LoopbackState>,
}

impl LoopbackChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn fail_all(&self, fail: bool) {
        self.state.lock().await.fail_all = fail;
    }

    /// `endpoint` への POST と、`endpoint/` で始まるフレームを失敗させる
    pub async fn fail_endpoint(&self, endpoint: &str) {
        self.state
            .lock()
            .await
            .failing_endpoints
            .insert(endpoint.to_string());
    }

    pub async fn deliveries(&self) -> Vec<Delivery> {
        self.state.lock().await.deliveries.clone()
    }

    /// 配送の試行回数（成功・失敗とも）
    pub async fn attempts(&self) -> usize {
        self.state.lock().await.attempts
    }

    pub async fn connects(&self) -> usize {
        self.state.lock().await.connects
    }
}

impl LoopbackState {
    fn should_fail(&self, endpoint: &str) -> bool {
        self.fail_all
            || self
                .failing_endpoints
                .iter()
                .any(|e| endpoint == e || endpoint.starts_with(&format!("{e}/")))
    }
}

#[async_trait]
impl StatefulChannel for LoopbackChannel {
    async fn connect(&self) -> Result<(), DispatchError> {
        let mut state = self.state.lock().await;
        state.connected = true;
        state.connects += 1;
        Ok(())
    }

    async fn send(&self, message: &str) -> Result<(), DispatchError> {
        let mut state = self.state.lock().await;
        state.attempts += 1;
        if !state.connected {
            return Err(DispatchError::NotConnected);
        }
        if state.should_fail(message) {
            return Err(DispatchError::Transport(format!("loopback refused {message}")));
        }
        info!(frame = message, "loopback frame delivered");
        state.deliveries.push(Delivery::Frame(message.to_string()));
        Ok(())
    }
}

#[async_trait]
impl StatelessChannel for LoopbackChannel {
    async fn post(
        &self,
        endpoint: &str,
        payload: &serde_json::Value,
    ) -> Result<(), DispatchError> {
        let mut state = self.state.lock().await;
        state.attempts += 1;
        if state.should_fail(endpoint) {
            return Err(DispatchError::Status {
                endpoint: endpoint.to_string(),
                status: 503,
            });
        }
        info!(endpoint, %payload, "loopback post delivered");
        state.deliveries.push(Delivery::Post {
            endpoint: endpoint.to_string(),
            payload: payload.clone(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn frames_need_a_connection() {
        let channel = LoopbackChannel::new();
        assert!(matches!(
            StatefulChannel::send(&channel, "room").await,
            Err(DispatchError::NotConnected)
        ));
        channel.connect().await.unwrap();
        StatefulChannel::send(&channel, "room").await.unwrap();
        assert_eq!(channel.deliveries().await, vec![Delivery::Frame("room".into())]);
        assert_eq!(channel.attempts().await, 2);
    }

    #[tokio::test]
    async fn failing_endpoint_matches_frames_with_params() {
        let channel = LoopbackChannel::new();
        channel.connect().await.unwrap();
        channel.fail_endpoint("room").await;

        assert!(StatefulChannel::send(&channel, "room/7").await.is_err());
        assert!(StatefulChannel::send(&channel, "roomy").await.is_ok());
        assert!(channel.post("room", &json!({})).await.is_err());
    }
}
