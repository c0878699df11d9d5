use thiserror::Error;

/// queue サービス呼び出しの失敗
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("receive from {queue_url} failed: {reason}")]
    Receive { queue_url: String, reason: String },

    #[error("delete on {queue_url} failed: {reason}")]
    Delete { queue_url: String, reason: String },

    #[error("send to {queue_url} failed: {reason}")]
    Send { queue_url: String, reason: String },

    #[error("list queues failed: {0}")]
    List(String),

    #[error("unknown queue: {0}")]
    UnknownQueue(String),
}

/// 配送経路の失敗
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("socket channel is not connected")]
    NotConnected,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("subscriber {endpoint} answered with status {status}")]
    Status { endpoint: String, status: u16 },
}

/// CourierError は pipeline / scheduler の呼び出し側に返るエラー
///
/// # 分類
/// - Validation: 必須フィールドが空のメッセージ（パス全体を中断）
/// - Gateway / Channel: 呼び出し自体の失敗
/// - Scheduler: パスの失敗
///
/// 個々のメッセージの削除失敗・配送失敗は pipeline 内で吸収され、ここには出ない
#[derive(Debug, Error)]
pub enum CourierError {
    #[error("message {message_id:?} on {queue_url} is missing required field `{field}`")]
    Validation {
        queue_url: String,
        message_id: String,
        field: &'static str,
    },

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Channel(#[from] DispatchError),

    #[error("scheduler failure: {0}")]
    Scheduler(String),

    #[error("scheduler is not running")]
    SchedulerClosed,

    #[error("invalid configuration: {0}")]
    Config(String),
}
