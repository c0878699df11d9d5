//! Channel - subscriber への転送経路

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::DispatchError;

/// StatefulChannel は接続を持ち続ける配送経路（socket）
///
/// # 接続のライフサイクル
/// - `connect` で（再）接続する。起動時と restart 時に呼ばれる
/// - pipeline は自分では再接続しない。`send` の失敗は呼び出し側に返すだけ
#[async_trait]
pub trait StatefulChannel: Send + Sync {
    async fn connect(&self) -> Result<(), DispatchError>;

    async fn send(&self, message: &str) -> Result<(), DispatchError>;
}

/// StatelessChannel は 1 回ごとの request/response（HTTP）
#[async_trait]
pub trait StatelessChannel: Send + Sync {
    async fn post(&self, endpoint: &str, payload: &serde_json::Value)
    -> Result<(), DispatchError>;
}

/// プロセスが使う配送経路。起動時に 1 つ選ぶ
#[derive(Clone)]
pub enum DeliveryChannel {
    Stateful(Arc<dyn StatefulChannel>),
    Stateless(Arc<dyn StatelessChannel>),
}

impl DeliveryChannel {
    pub fn is_stateful(&self) -> bool {
        matches!(self, DeliveryChannel::Stateful(_))
    }

    /// stateful なら接続する。stateless では何もしない
    pub async fn connect(&self) -> Result<(), DispatchError> {
        match self {
            DeliveryChannel::Stateful(channel) => channel.connect().await,
            DeliveryChannel::Stateless(_) => Ok(()),
        }
    }
}

impl std::fmt::Debug for DeliveryChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryChannel::Stateful(_) => f.write_str("DeliveryChannel::Stateful"),
            DeliveryChannel::Stateless(_) => f.write_str("DeliveryChannel::Stateless"),
        }
    }
}
