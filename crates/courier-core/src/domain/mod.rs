//! Domain - ドメインモデル
//!
//! - **message**: Message, DeleteEntry, DeleteOutcome
//! - **queue_map**: queue ごとの順序付き map（QueueMessages, QueueBodies）
//! - **target**: body から導出する配送先（SubscribeTarget）

pub mod message;
pub mod queue_map;
pub mod target;

pub use message::{DeleteEntry, DeleteOutcome, FailedDelete, Message};
pub use queue_map::{QueueBodies, QueueMap, QueueMessages};
pub use target::SubscribeTarget;
