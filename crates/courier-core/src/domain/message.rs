//! Message - queue から受け取るメッセージと削除要求

use serde::{Deserialize, Serialize};

/// Message は queue からの 1 回分の配信
///
/// # フィールド
/// - `id` / `receipt_handle`: queue サービスが発行する
/// - `receipt_handle` は配信ごとに変わる（再配信されたら別の値）
/// - `body` だけが subscriber へ転送される
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub receipt_handle: String,
    pub body: String,
    pub queue_url: String,
}

impl Message {
    pub fn new(
        id: impl Into<String>,
        receipt_handle: impl Into<String>,
        body: impl Into<String>,
        queue_url: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            receipt_handle: receipt_handle.into(),
            body: body.into(),
            queue_url: queue_url.into(),
        }
    }

    /// 空になっている必須フィールドの名前（最初の 1 つ）
    ///
    /// id / receipt_handle / body がすべて非空のときだけ削除・転送できる
    pub fn missing_field(&self) -> Option<&'static str> {
        if self.id.is_empty() {
            Some("id")
        } else if self.receipt_handle.is_empty() {
            Some("receipt_handle")
        } else if self.body.is_empty() {
            Some("body")
        } else {
            None
        }
    }

    pub fn delete_entry(&self) -> DeleteEntry {
        DeleteEntry {
            id: self.id.clone(),
            receipt_handle: self.receipt_handle.clone(),
        }
    }
}

/// DeleteEntry は batch delete に渡す 1 件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteEntry {
    pub id: String,
    pub receipt_handle: String,
}

/// 削除できなかったエントリ
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedDelete {
    pub id: String,
    /// queue サービスが返した理由コード
    pub code: String,
    pub message: Option<String>,
}

impl FailedDelete {
    pub fn new(id: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            code: code.into(),
            message: None,
        }
    }
}

/// DeleteOutcome は batch delete の結果
///
/// 部分失敗がありうるので、successful / failed の両方が非空のこともある
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteOutcome {
    /// 削除が確認された id
    pub successful: Vec<String>,
    pub failed: Vec<FailedDelete>,
}

impl DeleteOutcome {
    pub fn is_deleted(&self, id: &str) -> bool {
        self.successful.iter().any(|s| s == id)
    }

    pub fn failure_for(&self, id: &str) -> Option<&FailedDelete> {
        self.failed.iter().find(|f| f.id == id)
    }
}
